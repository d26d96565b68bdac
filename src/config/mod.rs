//! Configuration module for the ECG monitor.
//!
//! Provides `AppConfig` (top-level settings), the capture and monitor
//! sub-configs, and TOML loading from the per-user `settings.toml` via
//! `AppConfig::load`.

pub mod settings;

pub use settings::{settings_path, AppConfig, CaptureConfig, MonitorConfig, SourceKind};
