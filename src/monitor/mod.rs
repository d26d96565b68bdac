//! Monitor-facing surface of the capture core.
//!
//! [`Ear`] is what a display talks to: it lists devices, owns the one active
//! capture session and hands out filtered copies of the history.  Session
//! transitions are published as [`CaptureStatus`] on a `tokio::sync::watch`
//! channel, so a stream that breaks mid-run is reported without the caller
//! having to poll for errors.

pub mod ear;
pub mod state;

// ---------------------------------------------------------------------------
// Public re-exports
// ---------------------------------------------------------------------------

pub use ear::Ear;
pub use state::{new_status_channel, CaptureStatus, StatusSender};
