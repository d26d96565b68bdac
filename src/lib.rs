//! Sound-card ECG capture core.
//!
//! Records a mono signal from a sound-card input (or a synthetic ECG
//! generator), keeps a bounded history of it and serves low-pass filtered
//! copies for display.
//!
//! - [`audio`]: backends, device catalog, capture thread, ring buffer, filter.
//! - [`monitor`]: the [`Ear`](monitor::Ear) facade and its status channel.
//! - [`config`]: `settings.toml` loading.

pub mod audio;
pub mod config;
pub mod monitor;
