//! Application entry point: headless ECG monitor.
//!
//! # Startup sequence
//!
//! 1. Initialise logging.
//! 2. Load [`AppConfig`] from disk (returns default on first run).
//! 3. Build the audio backend (sound card or synthetic ECG).
//! 4. Create the [`Ear`], list devices and start recording.
//! 5. Re-read the filtered trace once per chunk interval, logging a summary
//!    once per second, until `monitor.run_secs` has passed or the stream
//!    breaks.
//! 6. Close the session.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Context;
use diy_ecg::{
    audio::{AudioBackend, CaptureSession, CpalBackend, SyntheticBackend},
    config::{AppConfig, SourceKind},
    monitor::{CaptureStatus, Ear},
};

fn main() -> anyhow::Result<()> {
    // 1. Logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    log::info!("DIY ECG monitor starting up");

    // 2. Configuration
    let config = AppConfig::load().unwrap_or_else(|e| {
        log::warn!("Failed to load config ({e}); using defaults");
        AppConfig::default()
    });

    // 3. Backend
    let backend: Arc<dyn AudioBackend> = match config.monitor.source {
        SourceKind::Hardware => Arc::new(CpalBackend::new(config.capture.read_timeout())),
        SourceKind::Synthetic => {
            log::info!("using the synthetic ECG source");
            Arc::new(SyntheticBackend::demo())
        }
    };

    // 4. Devices + session
    let mut ear = Ear::new(backend, config.capture.clone());
    let devices = ear.list_devices();
    for (index, name) in &devices {
        log::info!("  [{index}] {name}");
    }

    let index = config
        .monitor
        .device_index
        .or_else(|| devices.first().map(|(index, _)| *index))
        .unwrap_or(0);
    let session = ear.start(index).context("failed to start capture")?;
    let interval = Duration::from_secs_f64(session.chunk_size() as f64 / session.rate() as f64);

    // 5. Display loop
    let run_for = Duration::try_from_secs_f64(config.monitor.run_secs.max(0.0))
        .unwrap_or(Duration::MAX);
    let mut status_rx = ear.subscribe();
    let started = Instant::now();
    let mut last_report = started;

    while started.elapsed() < run_for {
        thread::sleep(interval);
        let trace = ear.read_filtered(config.monitor.lowpass_hz);

        if status_rx.has_changed().unwrap_or(false) {
            let status = status_rx.borrow_and_update().clone();
            log::info!("status: {}", status.message());
            if !status.is_running() {
                break;
            }
        }

        if last_report.elapsed() >= Duration::from_secs(1) {
            last_report = Instant::now();
            let peak = trace.iter().fold(0.0_f64, |m, v| m.max(v.abs()));
            let elapsed = ear.session().map_or(0.0, CaptureSession::elapsed_secs);
            log::info!(
                "{} samples held, {elapsed:.1} s recorded, peak {peak:.0}",
                trace.len()
            );
        }
    }

    // 6. Teardown
    ear.close();
    if let CaptureStatus::Failed(e) = ear.status() {
        return Err(e).context("capture stopped early");
    }
    log::info!("DIY ECG monitor shut down");
    Ok(())
}
