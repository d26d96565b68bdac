//! Sound-card capture via `cpal`.
//!
//! [`CpalBackend`] adapts cpal's callback model to the blocking
//! [`InputStream`] the capture loop expects: the cpal callback converts each
//! hardware buffer to mono `i16` and forwards it over an mpsc channel, and
//! [`InputStream::read_chunk`] accumulates those blocks until one chunk is
//! full.
//!
//! Devices are the default host's input devices, indexed in enumeration
//! order.  Streams are opened mono when the device allows it; otherwise the
//! narrowest supported layout is used and only the first channel is kept.

use std::collections::VecDeque;
use std::sync::mpsc;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, SampleFormat, SampleRate, StreamConfig};
use thiserror::Error;

use super::backend::{AudioBackend, InputStream};
use super::capture::CaptureError;
use super::device::DeviceDescriptor;

// ---------------------------------------------------------------------------
// CpalError
// ---------------------------------------------------------------------------

/// Errors raised by cpal while opening a stream.
#[derive(Debug, Error)]
pub enum CpalError {
    #[error("failed to enumerate input devices: {0}")]
    Devices(#[from] cpal::DevicesError),

    #[error("input device {0} is no longer present")]
    DeviceGone(usize),

    #[error("failed to query supported input configs: {0}")]
    SupportedConfigs(#[from] cpal::SupportedStreamConfigsError),

    #[error("device does not offer capture at {0} Hz")]
    UnsupportedRate(u32),

    #[error("unsupported sample format: {0:?}")]
    UnsupportedFormat(SampleFormat),

    #[error("failed to build input stream: {0}")]
    BuildStream(#[from] cpal::BuildStreamError),

    #[error("failed to start audio stream: {0}")]
    PlayStream(#[from] cpal::PlayStreamError),
}

impl From<CpalError> for CaptureError {
    fn from(err: CpalError) -> Self {
        CaptureError::Stream(err.to_string())
    }
}

// ---------------------------------------------------------------------------
// Packet
// ---------------------------------------------------------------------------

/// What the cpal callbacks send to the reading side.
enum Packet {
    Samples(Vec<i16>),
    Error(String),
}

// ---------------------------------------------------------------------------
// CpalBackend
// ---------------------------------------------------------------------------

/// [`AudioBackend`] over the default cpal host.
///
/// Holds no host handle of its own; every call resolves the host afresh so
/// the backend stays `Send + Sync` on every platform.
#[derive(Debug, Clone)]
pub struct CpalBackend {
    /// Longest wait for hardware data before a read is declared failed.
    read_timeout: Duration,
}

impl CpalBackend {
    pub fn new(read_timeout: Duration) -> Self {
        Self { read_timeout }
    }

    fn input_device(&self, descriptor: &DeviceDescriptor) -> Result<cpal::Device, CpalError> {
        let host = cpal::default_host();
        let device = host
            .input_devices()?
            .nth(descriptor.index)
            .ok_or(CpalError::DeviceGone(descriptor.index))?;

        // Indices shift when devices come and go; make sure it is the same one.
        match device.name() {
            Ok(name) if name == descriptor.name => Ok(device),
            _ => Err(CpalError::DeviceGone(descriptor.index)),
        }
    }

    /// Build (but do not start) a mono-ish input stream at `rate`.
    fn build(
        &self,
        descriptor: &DeviceDescriptor,
        rate: u32,
        tx: mpsc::Sender<Packet>,
    ) -> Result<cpal::Stream, CpalError> {
        let device = self.input_device(descriptor)?;
        let (config, format) = stream_config(&device, rate)?;
        let channels = usize::from(config.channels.max(1));

        let err_tx = tx.clone();
        let err_fn = move |err: cpal::StreamError| {
            log::error!("cpal stream error: {err}");
            let _ = err_tx.send(Packet::Error(err.to_string()));
        };

        let stream = match format {
            SampleFormat::I16 => device.build_input_stream(
                &config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    forward(&tx, data, channels, |s| s);
                },
                err_fn,
                None,
            )?,
            SampleFormat::U16 => device.build_input_stream(
                &config,
                move |data: &[u16], _: &cpal::InputCallbackInfo| {
                    forward(&tx, data, channels, |s| (i32::from(s) - 32_768) as i16);
                },
                err_fn,
                None,
            )?,
            SampleFormat::F32 => device.build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    forward(&tx, data, channels, |s| {
                        (s.clamp(-1.0, 1.0) * f32::from(i16::MAX)) as i16
                    });
                },
                err_fn,
                None,
            )?,
            other => return Err(CpalError::UnsupportedFormat(other)),
        };
        Ok(stream)
    }
}

impl Default for CpalBackend {
    fn default() -> Self {
        Self::new(Duration::from_secs(2))
    }
}

impl AudioBackend for CpalBackend {
    fn devices(&self) -> Vec<DeviceDescriptor> {
        let host = cpal::default_host();
        let devices = match host.input_devices() {
            Ok(devices) => devices,
            Err(e) => {
                log::warn!("failed to enumerate input devices: {e}");
                return Vec::new();
            }
        };

        devices
            .enumerate()
            .map(|(index, device)| {
                let name = device
                    .name()
                    .unwrap_or_else(|_| "Unknown Device".to_string());
                let max_input_channels = device
                    .supported_input_configs()
                    .map(|ranges| ranges.map(|r| r.channels()).max().unwrap_or(0))
                    .unwrap_or(0);
                let default_sample_rate = device
                    .default_input_config()
                    .map(|c| c.sample_rate().0)
                    .unwrap_or(0);
                DeviceDescriptor {
                    index,
                    name,
                    max_input_channels,
                    default_sample_rate,
                }
            })
            .collect()
    }

    /// Building the input stream is the trial open: cpal negotiates the
    /// device, layout and rate there and fails if any is refused.  The stream
    /// is never played.  cpal picks its own buffer size (`BufferSize::Default`),
    /// so `_chunk` plays no part in whether a device opens.
    fn probe(&self, device: &DeviceDescriptor, rate: u32, _chunk: usize) -> bool {
        let (tx, _rx) = mpsc::channel();
        match self.build(device, rate, tx) {
            // Dropped right here: the trial stream never outlives the probe.
            Ok(_stream) => true,
            Err(e) => {
                log::debug!("probe of device {} at {rate} Hz failed: {e}", device.index);
                false
            }
        }
    }

    fn open(
        &self,
        device: &DeviceDescriptor,
        rate: u32,
        chunk: usize,
    ) -> Result<Box<dyn InputStream>, CaptureError> {
        let (tx, rx) = mpsc::channel();
        let stream = self.build(device, rate, tx)?;
        stream.play().map_err(CpalError::from)?;

        // Never time out before one chunk could possibly have arrived.
        let chunk_time = Duration::from_secs_f64(chunk as f64 / rate.max(1) as f64);
        Ok(Box::new(CpalStream {
            stream,
            rx,
            pending: VecDeque::with_capacity(chunk * 2),
            timeout: self.read_timeout.max(chunk_time * 2),
        }))
    }
}

/// Pick a stream layout for `rate`: fewest channels, then the format that
/// converts most directly to `i16`.
fn stream_config(
    device: &cpal::Device,
    rate: u32,
) -> Result<(StreamConfig, SampleFormat), CpalError> {
    let mut ranges: Vec<_> = device
        .supported_input_configs()?
        .filter(|r| r.min_sample_rate().0 <= rate && rate <= r.max_sample_rate().0)
        .filter(|r| format_rank(r.sample_format()).is_some())
        .collect();
    ranges.sort_by_key(|r| (r.channels(), format_rank(r.sample_format())));

    let range = ranges
        .into_iter()
        .next()
        .ok_or(CpalError::UnsupportedRate(rate))?;

    let config = StreamConfig {
        channels: range.channels(),
        sample_rate: SampleRate(rate),
        buffer_size: BufferSize::Default,
    };
    Ok((config, range.sample_format()))
}

fn format_rank(format: SampleFormat) -> Option<u8> {
    match format {
        SampleFormat::I16 => Some(0),
        SampleFormat::F32 => Some(1),
        SampleFormat::U16 => Some(2),
        _ => None,
    }
}

/// Keep the first channel of each interleaved frame and send it on.
fn forward<T: Copy>(
    tx: &mpsc::Sender<Packet>,
    data: &[T],
    channels: usize,
    convert: impl Fn(T) -> i16,
) {
    let mono: Vec<i16> = data.chunks(channels).map(|frame| convert(frame[0])).collect();
    // The reader is gone once the session has stopped.
    let _ = tx.send(Packet::Samples(mono));
}

// ---------------------------------------------------------------------------
// CpalStream
// ---------------------------------------------------------------------------

struct CpalStream {
    stream: cpal::Stream,
    rx: mpsc::Receiver<Packet>,
    pending: VecDeque<i16>,
    timeout: Duration,
}

impl InputStream for CpalStream {
    fn read_chunk(&mut self, out: &mut [i16]) -> Result<(), CaptureError> {
        while self.pending.len() < out.len() {
            match self.rx.recv_timeout(self.timeout) {
                Ok(Packet::Samples(samples)) => self.pending.extend(samples),
                Ok(Packet::Error(msg)) => return Err(CaptureError::Stream(msg)),
                Err(mpsc::RecvTimeoutError::Timeout) => {
                    return Err(CaptureError::Stream(format!(
                        "no audio received for {:?}",
                        self.timeout
                    )))
                }
                Err(mpsc::RecvTimeoutError::Disconnected) => {
                    return Err(CaptureError::Stream("audio callback disconnected".into()))
                }
            }
        }

        let n = out.len();
        for (slot, sample) in out.iter_mut().zip(self.pending.drain(..n)) {
            *slot = sample;
        }
        Ok(())
    }
}

impl Drop for CpalStream {
    fn drop(&mut self) {
        if let Err(e) = self.stream.pause() {
            log::debug!("failed to pause audio stream: {e}");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_keeps_first_channel() {
        let (tx, rx) = mpsc::channel();
        forward(&tx, &[1_i16, 100, 2, 200, 3, 300], 2, |s| s);
        match rx.recv().expect("packet") {
            Packet::Samples(s) => assert_eq!(s, vec![1, 2, 3]),
            Packet::Error(e) => panic!("unexpected error packet: {e}"),
        }
    }

    #[test]
    fn forward_converts_float_samples() {
        let (tx, rx) = mpsc::channel();
        forward(&tx, &[1.0_f32, -1.0, 0.0, 2.0], 1, |s| {
            (s.clamp(-1.0, 1.0) * f32::from(i16::MAX)) as i16
        });
        match rx.recv().expect("packet") {
            Packet::Samples(s) => assert_eq!(s, vec![i16::MAX, -i16::MAX, 0, i16::MAX]),
            Packet::Error(e) => panic!("unexpected error packet: {e}"),
        }
    }

    #[test]
    fn format_rank_prefers_i16() {
        assert!(format_rank(SampleFormat::I16) < format_rank(SampleFormat::F32));
        assert!(format_rank(SampleFormat::F32) < format_rank(SampleFormat::U16));
        assert_eq!(format_rank(SampleFormat::U8), None);
    }

    #[test]
    fn cpal_errors_become_stream_errors() {
        let err: CaptureError = CpalError::UnsupportedRate(12_345).into();
        assert!(matches!(err, CaptureError::Stream(ref msg) if msg.contains("12345")));
    }

    #[test]
    fn backend_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<CpalBackend>();
    }
}
