//! Host audio seam.
//!
//! [`AudioBackend`] is everything the capture core needs from the host audio
//! subsystem: listing input devices, probing whether a device opens at a
//! given rate, and opening a blocking [`InputStream`].  The hardware
//! implementation is [`CpalBackend`](crate::audio::CpalBackend); tests and
//! demos use [`SyntheticBackend`](crate::audio::SyntheticBackend).
//!
//! The backend is shared as `Arc<dyn AudioBackend>` by the
//! [`Ear`](crate::monitor::Ear) context object; nothing in the crate keeps a
//! global audio handle.

use super::capture::CaptureError;
use super::device::DeviceDescriptor;

/// Object-safe, thread-safe interface to the host audio subsystem.
pub trait AudioBackend: Send + Sync {
    /// Every input-capable device the host reports, unverified.
    fn devices(&self) -> Vec<DeviceDescriptor>;

    /// Trial-open `device` for mono capture at `rate` with `chunk`-sized
    /// reads.  The trial stream must be closed before this returns.
    fn probe(&self, device: &DeviceDescriptor, rate: u32, chunk: usize) -> bool;

    /// Open `device` for mono capture.
    ///
    /// Called on the capture thread; the returned stream never leaves it.
    fn open(
        &self,
        device: &DeviceDescriptor,
        rate: u32,
        chunk: usize,
    ) -> Result<Box<dyn InputStream>, CaptureError>;
}

/// A running mono input stream.
///
/// Dropping the value closes the hardware stream.
pub trait InputStream {
    /// Block until `out.len()` samples have been captured and copy them into
    /// `out`.
    fn read_chunk(&mut self, out: &mut [i16]) -> Result<(), CaptureError>;
}

// Compile-time assertion: both traits must stay object-safe.
const _: fn() = || {
    fn _assert_object_safe(_: Box<dyn AudioBackend>, _: Box<dyn InputStream>) {}
};
