//! In-process audio backend that generates a synthetic ECG trace.
//!
//! Stands in for "play the demo ECG recording into the line input": no sound
//! card or cable needed.  Each [`SyntheticDevice`] is a virtual input with a
//! configurable channel count, default rate and set of rates it accepts.
//!
//! The backend also keeps score of open streams and probes, which lets tests
//! check that device verification never leaves a trial stream behind.
//!
//! # Example
//!
//! ```rust
//! use diy_ecg::audio::{AudioBackend, InputStream, SyntheticBackend, SyntheticDevice};
//!
//! let backend = SyntheticBackend::new(vec![SyntheticDevice::new("demo", 8_000)]);
//! let device = backend.devices().remove(0);
//! let mut stream = backend.open(&device, 8_000, 100).unwrap();
//!
//! let mut chunk = vec![0_i16; 100];
//! stream.read_chunk(&mut chunk).unwrap();
//! assert_eq!(backend.open_streams(), 1);
//! drop(stream);
//! assert_eq!(backend.open_streams(), 0);
//! ```

use std::f64::consts::PI;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::backend::{AudioBackend, InputStream};
use super::capture::CaptureError;
use super::device::DeviceDescriptor;

// ---------------------------------------------------------------------------
// Waveform
// ---------------------------------------------------------------------------

/// Signal produced by every synthetic stream.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Waveform {
    /// Lead-II style heartbeat with optional mains hum riding on top.
    Ecg {
        beats_per_minute: f64,
        hum_hz: f64,
        /// Hum amplitude relative to the R peak.
        hum_level: f64,
    },
    /// A pure tone.
    Sine { freq_hz: f64 },
}

impl Default for Waveform {
    fn default() -> Self {
        Self::Ecg {
            beats_per_minute: 72.0,
            hum_hz: 60.0,
            hum_level: 0.2,
        }
    }
}

/// (centre s, width s, relative amplitude) for the P, Q, R, S and T waves.
const BEAT_SHAPE: [(f64, f64, f64); 5] = [
    (0.10, 0.025, 0.12),
    (0.20, 0.010, -0.10),
    (0.23, 0.012, 1.00),
    (0.26, 0.010, -0.25),
    (0.45, 0.040, 0.30),
];

impl Waveform {
    /// Value at time `t` seconds, roughly in `[-1.0, 1.0]`.
    pub fn value_at(&self, t: f64) -> f64 {
        match *self {
            Waveform::Ecg {
                beats_per_minute,
                hum_hz,
                hum_level,
            } => {
                let period = 60.0 / beats_per_minute.max(1.0);
                let phase = t % period;
                let beat: f64 = BEAT_SHAPE
                    .iter()
                    .map(|&(centre, width, amp)| {
                        let d = phase - centre;
                        amp * (-(d * d) / (2.0 * width * width)).exp()
                    })
                    .sum();
                beat + hum_level * (2.0 * PI * hum_hz * t).sin()
            }
            Waveform::Sine { freq_hz } => (2.0 * PI * freq_hz * t).sin(),
        }
    }
}

// ---------------------------------------------------------------------------
// SyntheticDevice
// ---------------------------------------------------------------------------

/// A virtual input device.
#[derive(Debug, Clone)]
pub struct SyntheticDevice {
    name: String,
    channels: u16,
    default_rate: u32,
    /// `None` accepts any positive rate.
    rates: Option<Vec<u32>>,
}

impl SyntheticDevice {
    /// Mono device accepting any rate, preferring `default_rate`.
    pub fn new(name: impl Into<String>, default_rate: u32) -> Self {
        Self {
            name: name.into(),
            channels: 1,
            default_rate,
            rates: None,
        }
    }

    /// Override the advertised input channel count (0 = output only).
    pub fn with_channels(mut self, channels: u16) -> Self {
        self.channels = channels;
        self
    }

    /// Only open at the listed rates.  An empty list never opens.
    pub fn with_rates(mut self, rates: &[u32]) -> Self {
        self.rates = Some(rates.to_vec());
        self
    }

    fn accepts(&self, rate: u32) -> bool {
        self.channels > 0
            && rate > 0
            && self.rates.as_ref().map_or(true, |r| r.contains(&rate))
    }
}

// ---------------------------------------------------------------------------
// SyntheticBackend
// ---------------------------------------------------------------------------

/// [`AudioBackend`] serving [`SyntheticDevice`]s.
#[derive(Debug)]
pub struct SyntheticBackend {
    devices: Vec<SyntheticDevice>,
    waveform: Waveform,
    /// Peak sample value.
    amplitude: f64,
    /// Sleep one chunk duration per read, like real hardware.
    realtime: bool,
    /// Fail every read after this many chunks.
    fail_after_chunks: Option<u64>,
    open_streams: Arc<AtomicUsize>,
    probes: AtomicUsize,
}

impl SyntheticBackend {
    /// Backend with the default ECG waveform and real-time pacing.
    pub fn new(devices: Vec<SyntheticDevice>) -> Self {
        Self {
            devices,
            waveform: Waveform::default(),
            amplitude: 8_000.0,
            realtime: true,
            fail_after_chunks: None,
            open_streams: Arc::new(AtomicUsize::new(0)),
            probes: AtomicUsize::new(0),
        }
    }

    /// A single mono 44.1 kHz device named "Synthetic ECG".
    pub fn demo() -> Self {
        Self::new(vec![SyntheticDevice::new("Synthetic ECG", 44_100)])
    }

    pub fn with_waveform(mut self, waveform: Waveform, amplitude: f64) -> Self {
        self.waveform = waveform;
        self.amplitude = amplitude;
        self
    }

    pub fn with_realtime(mut self, realtime: bool) -> Self {
        self.realtime = realtime;
        self
    }

    /// Make every stream fail once it has delivered `chunks` chunks.
    pub fn with_failure_after(mut self, chunks: u64) -> Self {
        self.fail_after_chunks = Some(chunks);
        self
    }

    /// Streams opened (by `open`) and not yet dropped.
    pub fn open_streams(&self) -> usize {
        self.open_streams.load(Ordering::SeqCst)
    }

    /// Trial opens performed so far.
    pub fn probe_count(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    fn lookup(&self, device: &DeviceDescriptor) -> Option<&SyntheticDevice> {
        self.devices
            .get(device.index)
            .filter(|d| d.name == device.name)
    }
}

impl AudioBackend for SyntheticBackend {
    fn devices(&self) -> Vec<DeviceDescriptor> {
        self.devices
            .iter()
            .enumerate()
            .map(|(index, d)| DeviceDescriptor {
                index,
                name: d.name.clone(),
                max_input_channels: d.channels,
                default_sample_rate: d.default_rate,
            })
            .collect()
    }

    fn probe(&self, device: &DeviceDescriptor, rate: u32, chunk: usize) -> bool {
        self.probes.fetch_add(1, Ordering::SeqCst);
        chunk > 0 && self.lookup(device).is_some_and(|d| d.accepts(rate))
    }

    fn open(
        &self,
        device: &DeviceDescriptor,
        rate: u32,
        chunk: usize,
    ) -> Result<Box<dyn InputStream>, CaptureError> {
        let accepted = chunk > 0 && self.lookup(device).is_some_and(|d| d.accepts(rate));
        if !accepted {
            return Err(CaptureError::Stream(format!(
                "device {} [{}] refused {rate} Hz",
                device.index, device.name
            )));
        }

        self.open_streams.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(SyntheticStream {
            rate,
            waveform: self.waveform,
            amplitude: self.amplitude,
            realtime: self.realtime,
            fail_after_chunks: self.fail_after_chunks,
            position: 0,
            chunks_read: 0,
            open_streams: Arc::clone(&self.open_streams),
        }))
    }
}

// ---------------------------------------------------------------------------
// SyntheticStream
// ---------------------------------------------------------------------------

struct SyntheticStream {
    rate: u32,
    waveform: Waveform,
    amplitude: f64,
    realtime: bool,
    fail_after_chunks: Option<u64>,
    /// Samples generated so far; keeps phase continuous across chunks.
    position: u64,
    chunks_read: u64,
    open_streams: Arc<AtomicUsize>,
}

impl InputStream for SyntheticStream {
    fn read_chunk(&mut self, out: &mut [i16]) -> Result<(), CaptureError> {
        if self
            .fail_after_chunks
            .is_some_and(|limit| self.chunks_read >= limit)
        {
            return Err(CaptureError::Stream("synthetic device unplugged".into()));
        }

        if self.realtime {
            std::thread::sleep(Duration::from_secs_f64(
                out.len() as f64 / self.rate as f64,
            ));
        }

        let rate = self.rate as f64;
        for (i, sample) in out.iter_mut().enumerate() {
            let t = (self.position + i as u64) as f64 / rate;
            let value = self.amplitude * self.waveform.value_at(t);
            *sample = value.round().clamp(i16::MIN as f64, i16::MAX as f64) as i16;
        }

        self.position += out.len() as u64;
        self.chunks_read += 1;
        Ok(())
    }
}

impl Drop for SyntheticStream {
    fn drop(&mut self) {
        self.open_streams.fetch_sub(1, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(backend: &SyntheticBackend) -> DeviceDescriptor {
        backend.devices().remove(0)
    }

    #[test]
    fn devices_are_indexed_in_order() {
        let backend = SyntheticBackend::new(vec![
            SyntheticDevice::new("a", 8_000),
            SyntheticDevice::new("b", 48_000).with_channels(2),
        ]);
        let devices = backend.devices();
        assert_eq!(devices[1].index, 1);
        assert_eq!(devices[1].max_input_channels, 2);
        assert_eq!(devices[1].default_sample_rate, 48_000);
    }

    #[test]
    fn probe_respects_rate_list() {
        let backend =
            SyntheticBackend::new(vec![SyntheticDevice::new("a", 8_000).with_rates(&[16_000])]);
        let device = descriptor(&backend);
        assert!(!backend.probe(&device, 8_000, 100));
        assert!(backend.probe(&device, 16_000, 100));
        assert_eq!(backend.probe_count(), 2);
        assert_eq!(backend.open_streams(), 0);
    }

    #[test]
    fn open_refused_rate_is_stream_error() {
        let backend =
            SyntheticBackend::new(vec![SyntheticDevice::new("a", 8_000).with_rates(&[16_000])]);
        let device = descriptor(&backend);
        assert!(matches!(
            backend.open(&device, 8_000, 100),
            Err(CaptureError::Stream(_))
        ));
        assert_eq!(backend.open_streams(), 0);
    }

    #[test]
    fn sine_stream_is_phase_continuous() {
        let backend = SyntheticBackend::new(vec![SyntheticDevice::new("a", 1_000)])
            .with_waveform(Waveform::Sine { freq_hz: 10.0 }, 1_000.0)
            .with_realtime(false);
        let device = descriptor(&backend);
        let mut stream = backend.open(&device, 1_000, 25).expect("open");

        let mut joined = Vec::new();
        let mut chunk = vec![0_i16; 25];
        for _ in 0..4 {
            stream.read_chunk(&mut chunk).expect("read");
            joined.extend_from_slice(&chunk);
        }

        // 100 samples at 1 kHz = one full 10 Hz period.
        assert_eq!(joined[0], 0);
        assert_eq!(joined[25], 1_000);
        assert_eq!(joined[75], -1_000);
    }

    #[test]
    fn stream_fails_after_limit() {
        let backend = SyntheticBackend::demo()
            .with_realtime(false)
            .with_failure_after(2);
        let device = descriptor(&backend);
        let mut stream = backend.open(&device, 44_100, 10).expect("open");
        let mut chunk = vec![0_i16; 10];

        assert!(stream.read_chunk(&mut chunk).is_ok());
        assert!(stream.read_chunk(&mut chunk).is_ok());
        assert!(matches!(
            stream.read_chunk(&mut chunk),
            Err(CaptureError::Stream(_))
        ));
    }

    #[test]
    fn ecg_peaks_at_r_wave() {
        let wave = Waveform::Ecg {
            beats_per_minute: 60.0,
            hum_hz: 60.0,
            hum_level: 0.0,
        };
        let r = wave.value_at(0.23);
        assert!((r - 1.0).abs() < 0.01, "R peak = {r}");
        assert!(wave.value_at(0.8).abs() < 0.01);
        // Periodic at one beat per second.
        assert!((wave.value_at(1.23) - r).abs() < 1e-9);
    }
}
