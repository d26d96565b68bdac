//! Capture session: the open input stream and the thread that drains it.
//!
//! [`CaptureSession::start`] spawns a dedicated `ecg-capture` thread which
//! opens the stream, reports back whether that worked, and then loops:
//!
//! ```text
//! while !stop {
//!     read one chunk (blocks ≈ chunk / rate)
//!     append to the ring buffer (trims the head past the cap)
//!     chunks_recorded += 1
//!     sleep `pace` (1 / rate by default)
//! }
//! drop stream → status Stopped
//! ```
//!
//! Stopping is cooperative.  [`CaptureSession::request_stop`] raises a flag
//! that the loop sees after its current blocking read returns.
//! [`CaptureSession::close`] raises it and then waits on a condition variable
//! in bounded slices until the worker reports that it has released the
//! stream, giving up after the configured teardown timeout.  A worker that
//! outlives the timeout is muted: it can no longer publish status, so a
//! later session owns the channel alone.
//!
//! A failed read ends the session: the stream is dropped, the error is
//! published as [`CaptureStatus::Failed`] and the ring buffer keeps its last
//! good contents.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use thiserror::Error;

use crate::config::CaptureConfig;
use crate::monitor::state::{CaptureStatus, StatusSender};

use super::backend::{AudioBackend, InputStream};
use super::buffer::{new_shared_buffer, SharedRingBuffer};
use super::device::DeviceDescriptor;

// ---------------------------------------------------------------------------
// CaptureError
// ---------------------------------------------------------------------------

/// Errors that can occur while discovering devices or running a capture
/// session.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CaptureError {
    #[error("no usable input device available")]
    NoDeviceAvailable,

    #[error("input device {0} is not in the device catalog")]
    UnknownDevice(usize),

    #[error("no usable sample rate for device {index} [{name}]")]
    NoUsableRate { index: usize, name: String },

    #[error("a capture session is already running")]
    AlreadyRunning,

    #[error("no capture session is running")]
    NotRunning,

    /// Opening or reading the hardware stream failed.
    #[error("audio stream error: {0}")]
    Stream(String),

    #[error("failed to spawn capture thread: {0}")]
    Spawn(String),

    #[error("invalid capture settings: {0}")]
    InvalidConfig(String),
}

impl CaptureError {
    /// Run [`CaptureConfig::validate`] and fold a rejection into this enum.
    pub fn check_config(config: &CaptureConfig) -> Result<(), CaptureError> {
        config
            .validate()
            .map_err(|e| CaptureError::InvalidConfig(e.to_string()))
    }
}

/// Human-readable summary of what a session is recording from.
pub fn status_message(device: &DeviceDescriptor, rate: u32) -> String {
    format!(
        "recording from \"{}\" (device {}) at {} Hz",
        device.name, device.index, rate
    )
}

// ---------------------------------------------------------------------------
// Termination latch
// ---------------------------------------------------------------------------

/// Set once by the worker when it has released the stream.
#[derive(Default)]
struct Termination {
    done: Mutex<bool>,
    cvar: Condvar,
}

impl Termination {
    fn mark(&self) {
        *self.done.lock() = true;
        self.cvar.notify_all();
    }

    fn is_set(&self) -> bool {
        *self.done.lock()
    }

    /// Wait in `poll`-sized slices until set or `limit` has elapsed.
    ///
    /// Returns `true` when the latch was set.
    fn wait(&self, poll: Duration, limit: Duration) -> bool {
        let deadline = Instant::now() + limit;
        let mut done = self.done.lock();
        while !*done {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            self.cvar.wait_for(&mut done, poll.min(deadline - now));
        }
        true
    }
}

/// Marks the latch when the worker exits, panics included.
struct TerminationGuard(Arc<Termination>);

impl Drop for TerminationGuard {
    fn drop(&mut self) {
        self.0.mark();
    }
}

// ---------------------------------------------------------------------------
// CaptureSession
// ---------------------------------------------------------------------------

/// The live state of one open stream.
///
/// Owns the capture thread and, through it, the hardware stream.  Dropping a
/// session raises the stop flag without waiting; call
/// [`close`](Self::close) for a bounded, drained shutdown.
pub struct CaptureSession {
    device: DeviceDescriptor,
    rate: u32,
    chunk_size: usize,
    buffer: SharedRingBuffer,
    chunks_recorded: Arc<AtomicU64>,
    stop: Arc<AtomicBool>,
    muted: Arc<AtomicBool>,
    terminated: Arc<Termination>,
    worker: Option<thread::JoinHandle<()>>,
    status: StatusSender,
    teardown_poll: Duration,
    teardown_timeout: Duration,
}

impl std::fmt::Debug for CaptureSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureSession")
            .field("device", &self.device)
            .field("rate", &self.rate)
            .field("chunk_size", &self.chunk_size)
            .field("chunks_recorded", &self.chunks_recorded())
            .finish_non_exhaustive()
    }
}

impl CaptureSession {
    /// Open `device` at `rate` on a new capture thread and start recording.
    ///
    /// Blocks until the worker has either opened the stream or failed to.
    /// On failure the thread has already exited and nothing is left running.
    ///
    /// # Errors
    ///
    /// [`CaptureError::InvalidConfig`] when `config` does not validate,
    /// [`CaptureError::Stream`] when the backend refuses the stream,
    /// [`CaptureError::Spawn`] when the OS refuses the thread.
    pub fn start(
        backend: Arc<dyn AudioBackend>,
        device: DeviceDescriptor,
        rate: u32,
        config: &CaptureConfig,
        status: StatusSender,
    ) -> Result<Self, CaptureError> {
        CaptureError::check_config(config)?;
        if rate == 0 {
            return Err(CaptureError::InvalidConfig("sample rate must be positive".into()));
        }
        let chunk_size = config.chunk_size;
        let capacity = ((config.max_memory_secs * rate as f64) as usize).max(1);
        let buffer = new_shared_buffer(capacity);
        let chunks_recorded = Arc::new(AtomicU64::new(0));
        let stop = Arc::new(AtomicBool::new(false));
        let muted = Arc::new(AtomicBool::new(false));
        let terminated = Arc::new(Termination::default());

        let worker = CaptureWorker {
            backend,
            device: device.clone(),
            rate,
            chunk_size,
            pace: config.pace(rate),
            buffer: Arc::clone(&buffer),
            chunks_recorded: Arc::clone(&chunks_recorded),
            stop: Arc::clone(&stop),
            muted: Arc::clone(&muted),
            status: Arc::clone(&status),
        };

        log::debug!("start stream with rate: {rate}");
        let (ready_tx, ready_rx) = mpsc::channel();
        let guard = TerminationGuard(Arc::clone(&terminated));
        let handle = thread::Builder::new()
            .name("ecg-capture".into())
            .spawn(move || {
                let _guard = guard;
                worker.run(ready_tx);
            })
            .map_err(|e| CaptureError::Spawn(e.to_string()))?;

        let opened = ready_rx.recv().unwrap_or_else(|_| {
            Err(CaptureError::Stream(
                "capture thread exited before the stream opened".into(),
            ))
        });
        if let Err(e) = opened {
            if handle.join().is_err() {
                log::error!("capture thread panicked during start");
            }
            return Err(e);
        }

        Ok(Self {
            device,
            rate,
            chunk_size,
            buffer,
            chunks_recorded,
            stop,
            muted,
            terminated,
            worker: Some(handle),
            status,
            teardown_poll: Duration::from_millis(config.teardown_poll_ms.max(1)),
            teardown_timeout: Duration::from_millis(config.teardown_timeout_ms),
        })
    }

    /// Raise the stop flag.  The worker exits after its in-flight read.
    pub fn request_stop(&self) {
        if !self.stop.swap(true, Ordering::AcqRel) {
            log::info!("stopping the stream");
            self.status.send_if_modified(|s| {
                if matches!(s, CaptureStatus::Running { .. }) {
                    *s = CaptureStatus::Stopping;
                    true
                } else {
                    false
                }
            });
        }
    }

    /// Stop and wait (bounded) for the worker to release the stream.
    ///
    /// Returns `true` when the worker drained in time.  On timeout the worker
    /// is muted and a warning is logged; this never fails.  The session keeps
    /// its termination latch, so [`is_terminated`](Self::is_terminated) still
    /// reports when the stream is finally released and a later `close` joins
    /// the thread.
    pub fn close(&mut self) -> bool {
        self.request_stop();
        log::debug!("sending stream termination command...");

        if !self
            .terminated
            .wait(self.teardown_poll, self.teardown_timeout)
        {
            log::warn!(
                "capture thread did not stop within {:?}; muting it",
                self.teardown_timeout
            );
            // Checked by the worker under the channel lock, so nothing it
            // publishes can land after this returns.
            self.status.send_if_modified(|_| {
                self.muted.store(true, Ordering::Release);
                false
            });
            return false;
        }

        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                log::error!("capture thread panicked");
            }
        }
        true
    }

    /// `true` once the worker has released the stream (stopped or failed).
    pub fn is_terminated(&self) -> bool {
        self.terminated.is_set()
    }

    /// Copy of the current history, oldest first.
    pub fn snapshot(&self) -> Vec<i16> {
        self.buffer.lock().snapshot()
    }

    /// Handle to the shared history.
    pub fn buffer(&self) -> SharedRingBuffer {
        Arc::clone(&self.buffer)
    }

    pub fn device(&self) -> &DeviceDescriptor {
        &self.device
    }

    /// Negotiated sample rate (Hz).
    pub fn rate(&self) -> u32 {
        self.rate
    }

    /// Samples per read.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Chunks successfully read so far.
    pub fn chunks_recorded(&self) -> u64 {
        self.chunks_recorded.load(Ordering::Acquire)
    }

    /// Recording time derived from the sample count.
    pub fn elapsed_secs(&self) -> f64 {
        self.chunks_recorded() as f64 * self.chunk_size as f64 / self.rate as f64
    }

    /// Sample capacity of the history.
    pub fn max_memory_samples(&self) -> usize {
        self.buffer.lock().capacity()
    }

    /// See [`status_message`].
    pub fn message(&self) -> String {
        status_message(&self.device, self.rate)
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
    }
}

// ---------------------------------------------------------------------------
// CaptureWorker
// ---------------------------------------------------------------------------

/// Everything the capture thread owns.
struct CaptureWorker {
    backend: Arc<dyn AudioBackend>,
    device: DeviceDescriptor,
    rate: u32,
    chunk_size: usize,
    pace: Duration,
    buffer: SharedRingBuffer,
    chunks_recorded: Arc<AtomicU64>,
    stop: Arc<AtomicBool>,
    muted: Arc<AtomicBool>,
    status: StatusSender,
}

impl CaptureWorker {
    /// Replace the published status unless this worker has been muted.
    fn publish(&self, status: CaptureStatus) {
        self.status.send_if_modified(|current| {
            if self.muted.load(Ordering::Acquire) {
                return false;
            }
            *current = status;
            true
        });
    }

    fn run(self, ready: mpsc::Sender<Result<(), CaptureError>>) {
        let mut stream = match self.backend.open(&self.device, self.rate, self.chunk_size) {
            Ok(stream) => stream,
            Err(e) => {
                log::error!("failed to open device {}: {e}", self.device.index);
                let _ = ready.send(Err(e));
                return;
            }
        };

        log::info!("{}", status_message(&self.device, self.rate));
        self.publish(CaptureStatus::Running {
            device_index: self.device.index,
            device_name: self.device.name.clone(),
            rate: self.rate,
        });
        // The receiver only goes away if `start` itself is gone.
        let _ = ready.send(Ok(()));

        let outcome = self.capture_loop(stream.as_mut());
        drop(stream);

        match outcome {
            Ok(()) => {
                log::info!(
                    "stream stopped after {} chunks",
                    self.chunks_recorded.load(Ordering::Acquire)
                );
                self.publish(CaptureStatus::Stopped);
            }
            Err(e) => {
                log::error!("capture stopped on stream failure: {e}");
                self.publish(CaptureStatus::Failed(e));
            }
        }
    }

    fn capture_loop(&self, stream: &mut dyn InputStream) -> Result<(), CaptureError> {
        let mut chunk = vec![0_i16; self.chunk_size];

        while !self.stop.load(Ordering::Acquire) {
            stream.read_chunk(&mut chunk)?;

            let dumped = self.buffer.lock().append(&chunk);
            if dumped > 0 {
                log::trace!("too much data in memory, dumped {dumped} samples");
            }
            self.chunks_recorded.fetch_add(1, Ordering::AcqRel);

            if !self.pace.is_zero() {
                thread::sleep(self.pace);
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::synthetic::{SyntheticBackend, SyntheticDevice};
    use crate::monitor::state::new_status_channel;

    fn config() -> CaptureConfig {
        CaptureConfig {
            chunk_size: 50,
            max_memory_secs: 1.0,
            ..CaptureConfig::default()
        }
    }

    type Started = (
        Arc<SyntheticBackend>,
        Result<CaptureSession, CaptureError>,
        StatusSender,
    );

    fn start(backend: SyntheticBackend, rate: u32) -> Started {
        let backend = Arc::new(backend);
        let device = backend.devices().remove(0);
        let status = new_status_channel();
        let session = CaptureSession::start(
            backend.clone(),
            device,
            rate,
            &config(),
            Arc::clone(&status),
        );
        (backend, session, status)
    }

    fn wait_for_chunks(session: &CaptureSession, n: u64) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while session.chunks_recorded() < n {
            assert!(Instant::now() < deadline, "capture never reached {n} chunks");
            thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn error_display_is_informative() {
        let err = CaptureError::NoUsableRate {
            index: 2,
            name: "USB mic".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("USB mic"), "message: {msg}");
        assert!(msg.contains('2'), "message: {msg}");
    }

    #[test]
    fn status_message_names_device_and_rate() {
        let device = DeviceDescriptor {
            index: 4,
            name: "Line In".into(),
            max_input_channels: 2,
            default_sample_rate: 44_100,
        };
        assert_eq!(
            status_message(&device, 8_000),
            "recording from \"Line In\" (device 4) at 8000 Hz"
        );
    }

    #[test]
    fn session_records_chunks_and_closes() {
        let (backend, session, status) = start(
            SyntheticBackend::new(vec![SyntheticDevice::new("mic", 1_000)]),
            1_000,
        );
        let mut session = session.expect("start");
        assert!(matches!(*status.borrow(), CaptureStatus::Running { rate: 1_000, .. }));
        assert_eq!(backend.open_streams(), 1);

        wait_for_chunks(&session, 3);
        assert!(session.close());
        assert!(session.is_terminated());
        assert_eq!(backend.open_streams(), 0);
        assert_eq!(*status.borrow(), CaptureStatus::Stopped);

        let len = session.snapshot().len();
        let chunks = session.chunks_recorded() as usize;
        assert_eq!(len, (chunks * 50).min(session.max_memory_samples()));
    }

    #[test]
    fn history_never_exceeds_cap() {
        let (_, session, _) = start(
            SyntheticBackend::new(vec![SyntheticDevice::new("mic", 1_000)]).with_realtime(false),
            1_000,
        );
        let mut session = session.expect("start");

        // 1 s of memory at 1 kHz = 1000 samples = 20 chunks.
        wait_for_chunks(&session, 40);
        assert_eq!(session.max_memory_samples(), 1_000);
        assert_eq!(session.snapshot().len(), 1_000);
        session.close();
    }

    #[test]
    fn refused_open_leaves_nothing_running() {
        let (backend, session, status) = start(
            SyntheticBackend::new(vec![SyntheticDevice::new("mic", 1_000).with_rates(&[2_000])]),
            1_000,
        );
        assert!(matches!(session, Err(CaptureError::Stream(_))));
        assert_eq!(backend.open_streams(), 0);
        assert_eq!(*status.borrow(), CaptureStatus::Idle);
    }

    #[test]
    fn read_failure_ends_session_and_keeps_data() {
        let (backend, session, status) = start(
            SyntheticBackend::new(vec![SyntheticDevice::new("mic", 1_000)])
                .with_realtime(false)
                .with_failure_after(4),
            1_000,
        );
        let mut session = session.expect("start");

        assert!(session.terminated.wait(Duration::from_millis(5), Duration::from_secs(5)));
        assert!(matches!(*status.borrow(), CaptureStatus::Failed(CaptureError::Stream(_))));
        assert_eq!(backend.open_streams(), 0);
        assert_eq!(session.chunks_recorded(), 4);
        assert_eq!(session.snapshot().len(), 200);

        // Closing an already-failed session is quiet.
        assert!(session.close());
        assert!(matches!(*status.borrow(), CaptureStatus::Failed(_)));
    }

    #[test]
    fn elapsed_secs_follows_sample_count() {
        let (_, session, _) = start(
            SyntheticBackend::new(vec![SyntheticDevice::new("mic", 1_000)])
                .with_realtime(false)
                .with_failure_after(10),
            1_000,
        );
        let session = session.expect("start");
        assert!(session.terminated.wait(Duration::from_millis(5), Duration::from_secs(5)));
        assert!((session.elapsed_secs() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn timed_out_worker_cannot_publish() {
        // 500-sample reads at 1 kHz outlast a 20 ms teardown budget.
        let backend = Arc::new(SyntheticBackend::new(vec![SyntheticDevice::new("mic", 1_000)]));
        let device = backend.devices().remove(0);
        let status = new_status_channel();
        let cfg = CaptureConfig {
            chunk_size: 500,
            teardown_timeout_ms: 20,
            teardown_poll_ms: 5,
            ..CaptureConfig::default()
        };
        let mut session =
            CaptureSession::start(backend.clone(), device, 1_000, &cfg, Arc::clone(&status))
                .expect("start");

        assert!(!session.close());
        assert!(!session.is_terminated());
        assert_eq!(*status.borrow(), CaptureStatus::Stopping);

        assert!(session.terminated.wait(Duration::from_millis(5), Duration::from_secs(5)));
        assert_eq!(backend.open_streams(), 0);
        assert_eq!(*status.borrow(), CaptureStatus::Stopping);

        // Second close only joins the finished thread.
        assert!(session.close());
    }

    #[test]
    fn invalid_config_is_rejected_before_spawning() {
        let backend = Arc::new(SyntheticBackend::new(vec![SyntheticDevice::new("mic", 1_000)]));
        let device = backend.devices().remove(0);
        let cfg = CaptureConfig {
            pace_secs: Some(f64::NAN),
            ..CaptureConfig::default()
        };
        let result =
            CaptureSession::start(backend.clone(), device, 1_000, &cfg, new_status_channel());
        assert!(matches!(result, Err(CaptureError::InvalidConfig(_))));
        assert_eq!(backend.open_streams(), 0);
    }

    #[test]
    fn termination_wait_times_out() {
        let latch = Termination::default();
        let started = Instant::now();
        assert!(!latch.wait(Duration::from_millis(5), Duration::from_millis(30)));
        assert!(started.elapsed() >= Duration::from_millis(30));
        latch.mark();
        assert!(latch.wait(Duration::from_millis(5), Duration::from_millis(30)));
    }
}
