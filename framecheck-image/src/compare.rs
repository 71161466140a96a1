//! Whole-frame comparison.
//!
//! Two comparators with deliberately different characters:
//!
//! - [`similarity_psnr`] - noise-tolerant similarity in dB, used to judge
//!   whether two frames show "the same" screen despite lossy capture.
//! - [`pixels_differ`] - exact thresholded difference, used for idle /
//!   no-change detection where a single moved pixel matters but capture
//!   noise of a few levels per channel must still be forgiven.
//!
//! Degenerate numeric cases return defined sentinels ([`VERY_SIM`],
//! [`VERY_DIFF`]) instead of propagating a division by zero.

use crate::Image;
use anyhow::{bail, Result};

/// Sentinel returned when two frames cannot be compared (dimension mismatch).
pub const VERY_DIFF: f64 = 0.0;

/// Sentinel returned for a zero-noise (identical) comparison.
pub const VERY_SIM: f64 = 1_000_000.0;

/// Peak signal-to-noise ratio between two equally sized frames, in dB.
///
/// Higher is more similar and the value is unbounded above. Identical
/// frames return [`VERY_SIM`]; frames of different dimensions return
/// [`VERY_DIFF`]. For typical re-encoded captures of the same screen the
/// value lands somewhere between 30 and 50.
pub fn similarity_psnr(a: &Image, b: &Image) -> f64 {
    if a.width() != b.width() || a.height() != b.height() {
        return VERY_DIFF;
    }
    let mut sse = 0u64;
    for (&pa, &pb) in a.data().iter().zip(b.data()) {
        let d = pa as i64 - pb as i64;
        sse += (d * d) as u64;
    }
    if sse == 0 {
        return VERY_SIM;
    }
    let samples = a.width() as f64 * a.height() as f64 * 3.0;
    10.0 * ((255.0 * 255.0 * samples) / sse as f64).log10()
}

/// True when any pixel of `a` and `b` differs by more than
/// `max_channel_diff` on any channel, or when the dimensions differ.
///
/// `max_channel_diff == 0` is an exact comparison; a small nonzero value
/// forgives lossy capture noise while still catching real content changes.
pub fn pixels_differ(a: &Image, b: &Image, max_channel_diff: u8) -> bool {
    if a.width() != b.width() || a.height() != b.height() {
        return true;
    }
    a.data()
        .iter()
        .zip(b.data())
        .any(|(&pa, &pb)| pa.abs_diff(pb) > max_channel_diff)
}

/// Per-channel absolute difference image. The inputs must have identical
/// dimensions.
pub fn absdiff(a: &Image, b: &Image) -> Result<Image> {
    if a.width() != b.width() || a.height() != b.height() {
        bail!(
            "cannot diff images of different dimensions ({}x{} vs {}x{})",
            a.width(),
            a.height(),
            b.width(),
            b.height()
        );
    }
    let data = a
        .data()
        .iter()
        .zip(b.data())
        .map(|(&pa, &pb)| pa.abs_diff(pb))
        .collect();
    Ok(Image::from_raw(a.width(), a.height(), data))
}
