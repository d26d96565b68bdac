//! Capture status and the channel it is published on.
//!
//! [`CaptureStatus`] is the lifecycle of one capture session.  The capture
//! thread publishes transitions on a [`StatusSender`]; displays hold a
//! `watch::Receiver` and re-render on change.
//!
//! ```text
//! Idle ──start──▶ Running ──stop──▶ Stopping ──drained──▶ Stopped
//!                    │
//!                    └──read failed──▶ Failed(err)
//! Stopped / Failed ──close──▶ Idle   (Failed is kept so the error stays visible)
//! ```

use std::sync::Arc;

use tokio::sync::watch;

use crate::audio::CaptureError;

// ---------------------------------------------------------------------------
// CaptureStatus
// ---------------------------------------------------------------------------

/// States of a capture session.
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureStatus {
    /// No stream is open.
    Idle,

    /// The capture thread is reading from the device.
    Running {
        device_index: usize,
        device_name: String,
        rate: u32,
    },

    /// Stop was requested; the in-flight read has not returned yet.
    Stopping,

    /// The stream was released after a requested stop.
    Stopped,

    /// The stream broke while recording.  The history keeps its last
    /// good contents.
    Failed(CaptureError),
}

impl CaptureStatus {
    /// Returns `true` while samples are flowing into the history.
    ///
    /// ```
    /// use diy_ecg::monitor::CaptureStatus;
    ///
    /// assert!(!CaptureStatus::Idle.is_running());
    /// assert!(CaptureStatus::Running {
    ///     device_index: 0,
    ///     device_name: "mic".into(),
    ///     rate: 44_100,
    /// }
    /// .is_running());
    /// assert!(!CaptureStatus::Stopping.is_running());
    /// ```
    pub fn is_running(&self) -> bool {
        matches!(self, CaptureStatus::Running { .. })
    }

    /// A short label for a status bar.
    pub fn label(&self) -> &'static str {
        match self {
            CaptureStatus::Idle => "Idle",
            CaptureStatus::Running { .. } => "Recording",
            CaptureStatus::Stopping => "Stopping",
            CaptureStatus::Stopped => "Stopped",
            CaptureStatus::Failed(_) => "Error",
        }
    }

    /// The full status line.
    pub fn message(&self) -> String {
        match self {
            CaptureStatus::Running {
                device_index,
                device_name,
                rate,
            } => format!(
                "recording from \"{device_name}\" (device {device_index}) at {rate} Hz"
            ),
            CaptureStatus::Failed(e) => format!("capture failed: {e}"),
            other => other.label().to_string(),
        }
    }
}

impl Default for CaptureStatus {
    fn default() -> Self {
        CaptureStatus::Idle
    }
}

// ---------------------------------------------------------------------------
// StatusSender
// ---------------------------------------------------------------------------

/// Shared publishing end of the status channel.
///
/// `watch::Sender` needs no runtime, so the capture thread publishes with
/// `send_replace` directly.  Subscribers may be sync (`borrow`) or async
/// (`changed().await`).
pub type StatusSender = Arc<watch::Sender<CaptureStatus>>;

/// Construct a new [`StatusSender`] starting at [`CaptureStatus::Idle`].
pub fn new_status_channel() -> StatusSender {
    let (tx, _rx) = watch::channel(CaptureStatus::Idle);
    Arc::new(tx)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
