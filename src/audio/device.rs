//! Input device discovery, verification and sample-rate negotiation.
//!
//! [`DeviceCatalog::enumerate`] asks the backend for every input device and
//! keeps only those that declare at least one input channel *and* survive a
//! trial open at their default rate.  Probe failures are not errors: the
//! device is simply left out of the catalog.
//!
//! [`DeviceCatalog::negotiate_rate`] picks the sample rate a session will run
//! at, falling back through [`CANDIDATE_RATES`] when the default rate does not
//! open.

use std::sync::Arc;

use super::backend::AudioBackend;
use super::capture::CaptureError;

/// Rates tried, in this order, when a device's default rate does not open.
pub const CANDIDATE_RATES: [u32; 13] = [
    8_000, 9_600, 11_025, 12_000, 16_000, 22_050, 24_000, 32_000, 44_100, 48_000, 88_200, 96_000,
    192_000,
];

// ---------------------------------------------------------------------------
// DeviceDescriptor
// ---------------------------------------------------------------------------

/// One input device as reported by the host when the catalog was built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    /// Host device index.
    pub index: usize,
    /// Human-readable device name.
    pub name: String,
    /// Largest number of input channels the device supports.
    pub max_input_channels: u16,
    /// Sample rate the host prefers for this device (Hz).
    pub default_sample_rate: u32,
}

// ---------------------------------------------------------------------------
// DeviceCatalog
// ---------------------------------------------------------------------------

/// The verified set of capture devices, plus the backend used to probe them.
pub struct DeviceCatalog {
    backend: Arc<dyn AudioBackend>,
    devices: Vec<DeviceDescriptor>,
    chunk: usize,
}

impl std::fmt::Debug for DeviceCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceCatalog")
            .field("devices", &self.devices)
            .field("chunk", &self.chunk)
            .finish_non_exhaustive()
    }
}

impl DeviceCatalog {
    /// Query every host input device and keep the ones that open for capture.
    ///
    /// `chunk` is the read size used for trial opens.  An empty result is
    /// logged as a warning; it is only an error once someone tries to start
    /// a session.
    pub fn enumerate(backend: Arc<dyn AudioBackend>, chunk: usize) -> Self {
        let devices: Vec<DeviceDescriptor> = backend
            .devices()
            .into_iter()
            .filter(|device| verify_device(backend.as_ref(), device, None, chunk))
            .collect();

        if devices.is_empty() {
            log::warn!("no valid input device found");
        }

        Self {
            backend,
            devices,
            chunk,
        }
    }

    /// Verified devices in host order.
    pub fn devices(&self) -> &[DeviceDescriptor] {
        &self.devices
    }

    /// `(index, name)` pairs for a device picker.
    pub fn list(&self) -> Vec<(usize, String)> {
        self.devices
            .iter()
            .map(|d| (d.index, d.name.clone()))
            .collect()
    }

    /// Look up a verified device by host index.
    pub fn get(&self, index: usize) -> Option<&DeviceDescriptor> {
        self.devices.iter().find(|d| d.index == index)
    }

    /// Returns `true` when no device passed verification.
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// The backend the catalog was built from.
    pub fn backend(&self) -> &Arc<dyn AudioBackend> {
        &self.backend
    }

    /// Re-run the trial open for `device` at `rate`.
    pub fn verify(&self, device: &DeviceDescriptor, rate: u32) -> bool {
        verify_device(self.backend.as_ref(), device, Some(rate), self.chunk)
    }

    /// Choose the sample rate a session on `device` will run at.
    ///
    /// The default rate wins if it opens.  Otherwise the first of
    /// [`CANDIDATE_RATES`] that opens is used.
    ///
    /// # Errors
    ///
    /// [`CaptureError::NoUsableRate`] when nothing opens.
    pub fn negotiate_rate(&self, device: &DeviceDescriptor) -> Result<u32, CaptureError> {
        let default = device.default_sample_rate;
        if self.verify(device, default) {
            return Ok(default);
        }

        let fallback = CANDIDATE_RATES
            .iter()
            .copied()
            .filter(|&rate| rate != default)
            .find(|&rate| self.verify(device, rate));

        match fallback {
            Some(rate) => {
                log::debug!(
                    "device {} [{}]: default rate {default} Hz refused, using {rate} Hz",
                    device.index,
                    device.name
                );
                Ok(rate)
            }
            None => {
                log::error!(
                    "can not find valid sample rate for device: {} [{}]",
                    device.index,
                    device.name
                );
                Err(CaptureError::NoUsableRate {
                    index: device.index,
                    name: device.name.clone(),
                })
            }
        }
    }
}

/// Trial-open `device` at `rate` (or its default rate).
fn verify_device(
    backend: &dyn AudioBackend,
    device: &DeviceDescriptor,
    rate: Option<u32>,
    chunk: usize,
) -> bool {
    log::debug!("{device:?}");
    if device.max_input_channels < 1 {
        return false;
    }

    let rate = rate.unwrap_or(device.default_sample_rate);
    if rate == 0 {
        return false;
    }

    if backend.probe(device, rate, chunk) {
        log::debug!("device {} [{}] opens at {rate} Hz", device.index, device.name);
        true
    } else {
        log::warn!(
            "can not open device {} [{}] for capture at {rate} Hz",
            device.index,
            device.name
        );
        false
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::synthetic::{SyntheticBackend, SyntheticDevice};

    fn catalog(devices: Vec<SyntheticDevice>) -> (Arc<SyntheticBackend>, DeviceCatalog) {
        let backend = Arc::new(SyntheticBackend::new(devices));
        let catalog = DeviceCatalog::enumerate(backend.clone(), 100);
        (backend, catalog)
    }

    #[test]
    fn enumerate_skips_devices_without_inputs() {
        let (_, catalog) = catalog(vec![
            SyntheticDevice::new("speakers", 44_100).with_channels(0),
            SyntheticDevice::new("line in", 44_100),
        ]);

        assert_eq!(catalog.list(), vec![(1, "line in".to_string())]);
    }

    #[test]
    fn enumerate_skips_devices_that_fail_to_open() {
        let (_, catalog) = catalog(vec![
            SyntheticDevice::new("broken", 44_100).with_rates(&[]),
            SyntheticDevice::new("mic", 48_000),
        ]);

        assert_eq!(catalog.devices().len(), 1);
        assert_eq!(catalog.devices()[0].name, "mic");
        assert!(catalog.get(0).is_none());
        assert!(catalog.get(1).is_some());
    }

    #[test]
    fn enumerate_with_no_devices_is_empty_not_error() {
        let (_, catalog) = catalog(Vec::new());
        assert!(catalog.is_empty());
        assert!(catalog.list().is_empty());
    }

    #[test]
    fn probes_leave_no_stream_open() {
        let (backend, catalog) = catalog(vec![
            SyntheticDevice::new("a", 44_100),
            SyntheticDevice::new("b", 96_000).with_rates(&[22_050]),
        ]);
        assert_eq!(backend.open_streams(), 0);

        let b = catalog.get(1).cloned();
        // "b" refuses its default rate, so it never makes the catalog.
        assert!(b.is_none());
        let a = catalog.get(0).cloned().expect("device a");
        catalog.negotiate_rate(&a).expect("rate");
        assert_eq!(backend.open_streams(), 0);
        assert!(backend.probe_count() >= 2);
    }

    #[test]
    fn negotiate_prefers_default_rate() {
        let (_, catalog) = catalog(vec![SyntheticDevice::new("mic", 44_100)]);
        let device = catalog.get(0).cloned().expect("device");
        assert_eq!(catalog.negotiate_rate(&device), Ok(44_100));
    }

    #[test]
    fn negotiate_falls_back_in_candidate_order() {
        // Lists 44.1 kHz as default but only opens at these two rates.
        let backend = Arc::new(SyntheticBackend::new(vec![
            SyntheticDevice::new("picky", 44_100).with_rates(&[48_000, 16_000]),
        ]));
        let catalog = DeviceCatalog::enumerate(backend.clone(), 100);
        assert!(catalog.is_empty(), "default rate refused, so not verified");

        let descriptor = backend.devices().remove(0);
        let rate = catalog.negotiate_rate(&descriptor).expect("fallback rate");
        assert_eq!(rate, 16_000);
        assert!(catalog.verify(&descriptor, rate));
    }

    #[test]
    fn negotiate_unknown_device_has_no_rate() {
        let (_, catalog) = catalog(Vec::new());
        let ghost = DeviceDescriptor {
            index: 3,
            name: "ghost".into(),
            max_input_channels: 1,
            default_sample_rate: 44_100,
        };

        assert!(matches!(
            catalog.negotiate_rate(&ghost),
            Err(CaptureError::NoUsableRate { index: 3, .. })
        ));
    }

    #[test]
    fn negotiate_fails_when_nothing_opens() {
        let backend = Arc::new(SyntheticBackend::new(vec![
            SyntheticDevice::new("dead", 44_100).with_rates(&[]),
        ]));
        let catalog = DeviceCatalog::enumerate(backend.clone(), 100);
        let descriptor = backend.devices().remove(0);

        let err = catalog.negotiate_rate(&descriptor).unwrap_err();
        assert_eq!(
            err,
            CaptureError::NoUsableRate {
                index: 0,
                name: "dead".into()
            }
        );
    }

    #[test]
    fn candidate_rates_are_ascending() {
        assert!(CANDIDATE_RATES.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(CANDIDATE_RATES[0], 8_000);
        assert_eq!(CANDIDATE_RATES[12], 192_000);
    }
}
