//! Application settings structs, defaults and TOML loading.
//!
//! All structs implement `Serialize`, `Deserialize`, `Default` and `Clone`
//! so they can be read from TOML and shared across threads.  Missing keys
//! fall back to their defaults, so a settings file only needs the values it
//! changes.  The monitor never writes settings back to disk.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

/// Per-user directory name under the platform config dir.
const APP_DIR: &str = "diy-ecg";

/// Where [`AppConfig::load`] looks: `settings.toml` under the platform
/// config dir (`%APPDATA%`, `~/Library/Application Support`, `~/.config`),
/// or under the working directory when the platform reports none.
pub fn settings_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
        .join("settings.toml")
}

// ---------------------------------------------------------------------------
// CaptureConfig
// ---------------------------------------------------------------------------

/// Settings for the capture stream and its history buffer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Samples per hardware read.  Also sets the display refresh cadence.
    pub chunk_size: usize,
    /// Seconds of history kept in memory; older samples are dropped.
    pub max_memory_secs: f64,
    /// Fixed sample rate in Hz.  `None` negotiates one per device.
    pub sample_rate: Option<u32>,
    /// Sleep between reads in seconds.  `None` means one sample period
    /// (`1 / rate`).  Clamped to one chunk duration.
    pub pace_secs: Option<f64>,
    /// Longest wait for hardware data before a read counts as failed.
    pub read_timeout_ms: u64,
    /// Slice length of the teardown wait.
    pub teardown_poll_ms: u64,
    /// Give up waiting for the capture thread after this long.
    pub teardown_timeout_ms: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            chunk_size: 100,
            max_memory_secs: 5.0,
            sample_rate: None,
            pace_secs: None,
            read_timeout_ms: 2_000,
            teardown_poll_ms: 100,
            teardown_timeout_ms: 5_000,
        }
    }
}

impl CaptureConfig {
    /// Reject values the capture loop cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            bail!("capture.chunk_size must be at least 1");
        }
        if !self.max_memory_secs.is_finite() || self.max_memory_secs <= 0.0 {
            bail!(
                "capture.max_memory_secs must be a positive number (got {})",
                self.max_memory_secs
            );
        }
        if self.sample_rate == Some(0) {
            bail!("capture.sample_rate must be positive");
        }
        if self.pace_secs.is_some_and(|p| p < 0.0 || !p.is_finite()) {
            bail!("capture.pace_secs must be a finite, non-negative number");
        }
        Ok(())
    }

    /// Inter-read yield for a stream at `rate` Hz.
    pub fn pace(&self, rate: u32) -> Duration {
        let rate = f64::from(rate.max(1));
        let chunk_secs = self.chunk_size as f64 / rate;
        let secs = self
            .pace_secs
            .filter(|p| p.is_finite())
            .unwrap_or(1.0 / rate);
        Duration::try_from_secs_f64(secs.clamp(0.0, chunk_secs)).unwrap_or(Duration::ZERO)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

// ---------------------------------------------------------------------------
// SourceKind
// ---------------------------------------------------------------------------

/// Where samples come from.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum SourceKind {
    /// Sound-card inputs through cpal.
    Hardware,
    /// Built-in synthetic ECG generator.
    Synthetic,
}

impl Default for SourceKind {
    fn default() -> Self {
        Self::Hardware
    }
}

// ---------------------------------------------------------------------------
// MonitorConfig
// ---------------------------------------------------------------------------

/// Settings for the headless monitor binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub source: SourceKind,
    /// Host index of the device to record from; `None` picks the first
    /// verified device.
    pub device_index: Option<usize>,
    /// Low-pass cutoff in Hz applied to the displayed trace (0 = raw).
    pub lowpass_hz: f64,
    /// How long to record before closing, in seconds.
    pub run_secs: f64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            source: SourceKind::default(),
            device_index: None,
            lowpass_hz: 0.0,
            run_secs: 10.0,
        }
    }
}

// ---------------------------------------------------------------------------
// AppConfig  (top-level)
// ---------------------------------------------------------------------------

/// Top-level application configuration, read from `settings.toml`.
///
/// ```rust,no_run
/// use diy_ecg::config::AppConfig;
///
/// // Returns Default when the file is missing.
/// let config = AppConfig::load().unwrap();
/// println!("{} samples per chunk", config.capture.chunk_size);
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Capture stream / history settings.
    pub capture: CaptureConfig,
    /// Monitor binary settings.
    pub monitor: MonitorConfig,
}

impl AppConfig {
    /// Load configuration from [`settings_path`].
    ///
    /// Returns `Ok(AppConfig::default())` when the file does not exist.
    pub fn load() -> Result<Self> {
        Self::load_from(&settings_path())
    }

    /// Load from an explicit path (useful for tests).
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.capture.validate()?;
        Ok(config)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    /// `load_from` on a non-existent path must return `Default` without error.
    #[test]
    fn load_missing_returns_default() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("nonexistent.toml");

        let config = AppConfig::load_from(&path).expect("should not error");
        let default = AppConfig::default();

        assert_eq!(config.capture.chunk_size, default.capture.chunk_size);
        assert_eq!(config.capture.max_memory_secs, default.capture.max_memory_secs);
        assert_eq!(config.monitor.source, default.monitor.source);
    }

    #[test]
    fn settings_path_is_per_app() {
        let path = settings_path();
        assert!(path.ends_with("diy-ecg/settings.toml"), "{}", path.display());
    }

    #[test]
    fn default_values() {
        let cfg = AppConfig::default();

        assert_eq!(cfg.capture.chunk_size, 100);
        assert_eq!(cfg.capture.max_memory_secs, 5.0);
        assert!(cfg.capture.sample_rate.is_none());
        assert!(cfg.capture.pace_secs.is_none());
        assert_eq!(cfg.capture.teardown_poll_ms, 100);
        assert_eq!(cfg.monitor.source, SourceKind::Hardware);
        assert_eq!(cfg.monitor.lowpass_hz, 0.0);
        assert!(cfg.capture.validate().is_ok());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("settings.toml");
        std::fs::write(
            &path,
            "[capture]\nchunk_size = 256\nsample_rate = 8000\n\n[monitor]\nsource = \"Synthetic\"\nlowpass_hz = 50.0\n",
        )
        .expect("write");

        let cfg = AppConfig::load_from(&path).expect("load");
        assert_eq!(cfg.capture.chunk_size, 256);
        assert_eq!(cfg.capture.sample_rate, Some(8_000));
        assert_eq!(cfg.capture.max_memory_secs, 5.0);
        assert_eq!(cfg.monitor.source, SourceKind::Synthetic);
        assert_eq!(cfg.monitor.lowpass_hz, 50.0);
        assert!(cfg.monitor.device_index.is_none());
    }

    #[test]
    fn invalid_file_is_rejected() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("settings.toml");
        std::fs::write(&path, "[capture]\nchunk_size = 0\n").expect("write");

        let err = AppConfig::load_from(&path).unwrap_err();
        assert!(err.to_string().contains("chunk_size"), "{err}");
    }

    #[test]
    fn malformed_toml_is_an_error() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("settings.toml");
        std::fs::write(&path, "[capture\nchunk_size = ").expect("write");
        assert!(AppConfig::load_from(&path).is_err());
    }

    #[test]
    fn validate_rejects_bad_memory() {
        let cfg = CaptureConfig {
            max_memory_secs: 0.0,
            ..CaptureConfig::default()
        };
        assert!(cfg.validate().is_err());

        let nan = CaptureConfig {
            max_memory_secs: f64::NAN,
            ..CaptureConfig::default()
        };
        assert!(nan.validate().is_err());
    }

    #[test]
    fn pace_defaults_to_one_sample_period() {
        let cfg = CaptureConfig::default();
        assert_eq!(cfg.pace(1_000), Duration::from_millis(1));
    }

    #[test]
    fn pace_is_bounded_by_chunk_duration() {
        let cfg = CaptureConfig {
            chunk_size: 100,
            pace_secs: Some(10.0),
            ..CaptureConfig::default()
        };
        // 100 samples at 1 kHz = 100 ms.
        assert_eq!(cfg.pace(1_000), Duration::from_millis(100));

        let off = CaptureConfig {
            pace_secs: Some(0.0),
            ..CaptureConfig::default()
        };
        assert!(off.pace(44_100).is_zero());
    }

    #[test]
    fn pace_ignores_non_finite_values() {
        let cfg = CaptureConfig {
            pace_secs: Some(f64::NAN),
            ..CaptureConfig::default()
        };
        assert!(cfg.validate().is_err());
        assert_eq!(cfg.pace(1_000), Duration::from_millis(1));
    }
}
