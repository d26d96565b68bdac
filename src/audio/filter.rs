//! Frequency-domain low-pass filter for the display trace.
//!
//! [`lowpass`] is a pure function of a snapshot, its sample rate and a cutoff.
//! It never touches the shared ring buffer: callers hand it a copy.
//!
//! # Steps
//!
//! 1. Promote samples to `f64` and taper 5 % of each edge with a Hann ramp
//!    ([`soft_edges`]) so the hard edges of the snapshot do not leak across
//!    the spectrum.
//! 2. Forward FFT.
//! 3. Zero every bin further than `len / rate * cutoff` bins from either end.
//! 4. Inverse FFT, keep the real part.
//!
//! # Example
//!
//! ```rust
//! use diy_ecg::audio::lowpass;
//!
//! let raw = vec![0_i16, 100, -100, 50, 0, 25, -25, 0];
//! // A cutoff of 0 is an explicit passthrough.
//! assert_eq!(lowpass(&raw, 1_000, 0.0), vec![0.0, 100.0, -100.0, 50.0, 0.0, 25.0, -25.0, 0.0]);
//! assert_eq!(lowpass(&raw, 1_000, 50.0).len(), raw.len());
//! ```

use std::f64::consts::PI;

use rustfft::num_complex::Complex;
use rustfft::FftPlanner;

/// Fraction of the snapshot tapered on each edge before transforming.
pub const EDGE_FRACTION: f64 = 0.05;

/// Multiply both edges of `data` by a Hann ramp covering `frac_edge` of its
/// length.
///
/// The ramp is the rising and falling halves of a Hann window of twice the
/// ramp length.  Snapshots too short for a one-sample ramp are left as is.
pub fn soft_edges(data: &mut [f64], frac_edge: f64) {
    let ramp = (data.len() as f64 * frac_edge) as usize;
    if ramp == 0 {
        return;
    }

    let window = hann(ramp * 2);
    let len = data.len();
    for i in 0..ramp {
        data[i] *= window[i];
        data[len - ramp + i] *= window[ramp + i];
    }
}

/// Symmetric Hann window of `size` points (`0.5 - 0.5 cos(2πn / (size - 1))`).
fn hann(size: usize) -> Vec<f64> {
    if size == 1 {
        return vec![1.0];
    }
    let denom = (size - 1) as f64;
    (0..size)
        .map(|n| 0.5 - 0.5 * (2.0 * PI * n as f64 / denom).cos())
        .collect()
}

/// Low-pass `samples` recorded at `rate` Hz, rejecting content above
/// `cutoff_hz`.
///
/// A cutoff of zero or below returns the samples unchanged (as `f64`).  The
/// output always has the same length as the input.  A cutoff below one bin
/// of resolution (`len / rate * cutoff_hz < 1`) only applies the edge taper.
pub fn lowpass(samples: &[i16], rate: u32, cutoff_hz: f64) -> Vec<f64> {
    let mut data: Vec<f64> = samples.iter().map(|&s| f64::from(s)).collect();
    if cutoff_hz <= 0.0 || data.is_empty() || rate == 0 {
        return data;
    }

    soft_edges(&mut data, EDGE_FRACTION);

    let len = data.len();
    let mut spectrum: Vec<Complex<f64>> = data.iter().map(|&x| Complex::new(x, 0.0)).collect();

    let mut planner = FftPlanner::<f64>::new();
    planner.plan_fft_forward(len).process(&mut spectrum);

    // Below one bin of resolution nothing is rejected; at or above Nyquist
    // nothing is either.
    let trim = (len as f64 / rate as f64 * cutoff_hz) as usize;
    if trim > 0 && 2 * trim < len {
        for bin in &mut spectrum[trim..len - trim] {
            *bin = Complex::new(0.0, 0.0);
        }
    }

    planner.plan_fft_inverse(len).process(&mut spectrum);

    // rustfft leaves the inverse unnormalised.
    let scale = 1.0 / len as f64;
    spectrum.iter().map(|c| c.re * scale).collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
