//! Audio capture core: device discovery → capture thread → ring buffer →
//! spectral low-pass.
//!
//! # Pipeline
//!
//! ```text
//! AudioBackend ─devices/probe─▶ DeviceCatalog ─negotiate_rate─▶ rate
//!              ─open──────────▶ CaptureSession (ecg-capture thread)
//!                                   │ read_chunk → append
//!                                   ▼
//!                             SharedRingBuffer ─snapshot─▶ lowpass → display
//! ```
//!
//! # Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use diy_ecg::audio::{DeviceCatalog, SyntheticBackend};
//!
//! let catalog = DeviceCatalog::enumerate(Arc::new(SyntheticBackend::demo()), 100);
//! let device = &catalog.devices()[0];
//! let rate = catalog.negotiate_rate(device).unwrap();
//! assert!(catalog.verify(device, rate));
//! ```

pub mod backend;
pub mod buffer;
pub mod capture;
pub mod cpal_backend;
pub mod device;
pub mod filter;
pub mod synthetic;

pub use backend::{AudioBackend, InputStream};
pub use buffer::{new_shared_buffer, RingBuffer, SharedRingBuffer};
pub use capture::{status_message, CaptureError, CaptureSession};
pub use cpal_backend::{CpalBackend, CpalError};
pub use device::{DeviceCatalog, DeviceDescriptor, CANDIDATE_RATES};
pub use filter::{lowpass, soft_edges, EDGE_FRACTION};
pub use synthetic::{SyntheticBackend, SyntheticDevice, Waveform};
