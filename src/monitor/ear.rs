//! The monitor's capture context.
//!
//! [`Ear`] ties the device catalog, at most one [`CaptureSession`] and the
//! status channel together behind the handful of calls a display needs:
//!
//! ```text
//! list_devices() ─▶ start(index) ─▶ read_filtered(cutoff) … ─▶ stop() ─▶ close()
//! ```
//!
//! Everything audio-related hangs off the `Arc<dyn AudioBackend>` passed to
//! [`Ear::new`]; two `Ear`s over two backends are fully independent.

use std::sync::Arc;

use tokio::sync::watch;

use crate::audio::{
    lowpass, AudioBackend, CaptureError, CaptureSession, DeviceCatalog, DeviceDescriptor,
};
use crate::config::CaptureConfig;

use super::state::{new_status_channel, CaptureStatus, StatusSender};

/// Device catalog plus the (single) active capture session.
///
/// ```rust
/// use std::sync::Arc;
/// use diy_ecg::audio::{SyntheticBackend, SyntheticDevice};
/// use diy_ecg::config::CaptureConfig;
/// use diy_ecg::monitor::Ear;
///
/// let backend = Arc::new(SyntheticBackend::new(vec![SyntheticDevice::new("ECG", 8_000)]));
/// let mut ear = Ear::new(backend, CaptureConfig::default());
///
/// let session = ear.start(0).unwrap();
/// assert_eq!(session.rate(), 8_000);
///
/// let trace = ear.read_filtered(40.0);
/// println!("{} samples on screen", trace.len());
/// ear.close();
/// ```
#[derive(Debug)]
pub struct Ear {
    catalog: DeviceCatalog,
    config: CaptureConfig,
    session: Option<CaptureSession>,
    /// Closed session whose worker missed the teardown timeout and may
    /// still hold its stream.
    draining: Option<CaptureSession>,
    status: StatusSender,
}

impl Ear {
    /// Enumerate the backend's devices and start out idle.
    pub fn new(backend: Arc<dyn AudioBackend>, config: CaptureConfig) -> Self {
        let catalog = DeviceCatalog::enumerate(backend, config.chunk_size);
        log::info!("{} usable input device(s)", catalog.devices().len());
        Self {
            catalog,
            config,
            session: None,
            draining: None,
            status: new_status_channel(),
        }
    }

    // -----------------------------------------------------------------------
    // Devices
    // -----------------------------------------------------------------------

    /// `(index, name)` of every usable input device.
    pub fn list_devices(&self) -> Vec<(usize, String)> {
        self.catalog.list()
    }

    pub fn devices(&self) -> &[DeviceDescriptor] {
        self.catalog.devices()
    }

    /// Re-run enumeration, e.g. after plugging in a sound card.
    ///
    /// Returns the number of usable devices.
    ///
    /// # Errors
    ///
    /// [`CaptureError::AlreadyRunning`] while a session is recording or a
    /// closed one has not released its stream yet; probing would contend
    /// with the open stream.
    pub fn refresh_devices(&mut self) -> Result<usize, CaptureError> {
        if self.is_running() || !self.reap_draining() {
            return Err(CaptureError::AlreadyRunning);
        }
        let backend = Arc::clone(self.catalog.backend());
        self.catalog = DeviceCatalog::enumerate(backend, self.config.chunk_size);
        Ok(self.catalog.devices().len())
    }

    // -----------------------------------------------------------------------
    // Session lifecycle
    // -----------------------------------------------------------------------

    /// Start recording from catalog device `index` at a negotiated rate.
    ///
    /// A fixed `capture.sample_rate` from the config skips negotiation.
    pub fn start(&mut self, index: usize) -> Result<&CaptureSession, CaptureError> {
        self.start_with_rate(index, None)
    }

    /// Start recording from catalog device `index`.
    ///
    /// `rate` overrides both the config and negotiation.  A previous session
    /// whose stream has already ended is released first; the new one only
    /// replaces it once it is actually recording, so a failed start leaves
    /// the old history readable.
    ///
    /// # Errors
    ///
    /// - [`CaptureError::InvalidConfig`]: the capture settings do not validate.
    /// - [`CaptureError::NoDeviceAvailable`]: the catalog is empty.
    /// - [`CaptureError::AlreadyRunning`]: the current session is live, or a
    ///   closed one is still draining its stream.
    /// - [`CaptureError::UnknownDevice`]: `index` is not in the catalog.
    /// - [`CaptureError::NoUsableRate`]: no candidate rate opens.
    /// - [`CaptureError::Stream`] / [`CaptureError::Spawn`]: opening failed.
    pub fn start_with_rate(
        &mut self,
        index: usize,
        rate: Option<u32>,
    ) -> Result<&CaptureSession, CaptureError> {
        CaptureError::check_config(&self.config)?;

        if self.catalog.is_empty() {
            log::warn!("no input device available");
            return Err(CaptureError::NoDeviceAvailable);
        }

        if !self.reap_draining() {
            log::warn!("previous capture thread still holds its stream");
            return Err(CaptureError::AlreadyRunning);
        }

        if let Some(previous) = self.session.as_mut() {
            if !previous.is_terminated() {
                return Err(CaptureError::AlreadyRunning);
            }
            // Already drained, so this only joins the thread.
            previous.close();
        }

        let device = self
            .catalog
            .get(index)
            .cloned()
            .ok_or(CaptureError::UnknownDevice(index))?;

        let rate = match rate.or(self.config.sample_rate) {
            Some(rate) => rate,
            None => self.catalog.negotiate_rate(&device)?,
        };

        let session = CaptureSession::start(
            Arc::clone(self.catalog.backend()),
            device,
            rate,
            &self.config,
            Arc::clone(&self.status),
        )?;
        let session: &CaptureSession = self.session.insert(session);
        Ok(session)
    }

    /// Ask the capture thread to stop after its in-flight read.
    ///
    /// With nothing running this is a no-op.
    pub fn stop(&self) {
        match &self.session {
            Some(session) if !session.is_terminated() => session.request_stop(),
            _ => log::debug!("stop ignored: {}", CaptureError::NotRunning),
        }
    }

    /// Stop, wait (bounded) for the stream to be released and drop the
    /// session.
    ///
    /// Idempotent and never fails.  A `Failed` status is left in place so the
    /// cause stays visible; otherwise the status returns to `Idle`.
    pub fn close(&mut self) {
        let Some(mut session) = self.session.take() else {
            log::debug!("close ignored: {}", CaptureError::NotRunning);
            return;
        };

        if !session.close() {
            log::warn!("audio stream still held by the capture thread; new sessions wait for it");
            self.draining = Some(session);
        }

        self.status.send_if_modified(|s| {
            if matches!(s, CaptureStatus::Failed(_) | CaptureStatus::Idle) {
                false
            } else {
                *s = CaptureStatus::Idle;
                true
            }
        });
        log::info!("capture closed");
    }

    // -----------------------------------------------------------------------
    // Reading
    // -----------------------------------------------------------------------

    /// Low-passed copy of the current history (`cutoff_hz <= 0` is raw).
    ///
    /// Empty when no session exists.  A session whose stream failed keeps
    /// serving its last good samples until it is closed or replaced.
    pub fn read_filtered(&self, cutoff_hz: f64) -> Vec<f64> {
        match &self.session {
            Some(session) => lowpass(&session.snapshot(), session.rate(), cutoff_hz),
            None => Vec::new(),
        }
    }

    /// Raw copy of the current history, oldest first.
    pub fn snapshot(&self) -> Vec<i16> {
        self.session
            .as_ref()
            .map(CaptureSession::snapshot)
            .unwrap_or_default()
    }

    // -----------------------------------------------------------------------
    // Status
    // -----------------------------------------------------------------------

    pub fn session(&self) -> Option<&CaptureSession> {
        self.session.as_ref()
    }

    /// `true` while a capture thread is still reading.
    pub fn is_running(&self) -> bool {
        self.session.as_ref().is_some_and(|s| !s.is_terminated())
    }

    /// `true` while a closed session's thread has yet to release its stream.
    pub fn is_draining(&self) -> bool {
        self.draining.as_ref().is_some_and(|s| !s.is_terminated())
    }

    /// Join and drop a draining session once it has let go of the stream.
    ///
    /// Returns `false` while it still holds it.
    fn reap_draining(&mut self) -> bool {
        match self.draining.as_mut() {
            Some(session) if !session.is_terminated() => false,
            Some(session) => {
                session.close();
                self.draining = None;
                true
            }
            None => true,
        }
    }

    /// Current status.
    pub fn status(&self) -> CaptureStatus {
        self.status.borrow().clone()
    }

    /// Receiver that observes every status transition.
    pub fn subscribe(&self) -> watch::Receiver<CaptureStatus> {
        self.status.subscribe()
    }

    /// Device and rate of the current session, for display.
    pub fn message(&self) -> Option<String> {
        self.session.as_ref().map(CaptureSession::message)
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }
}

impl Drop for Ear {
    fn drop(&mut self) {
        self.close();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
