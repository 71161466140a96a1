//! Canonical pixel buffer for screen verification.
//!
//! This crate owns the [`Image`] type used everywhere else in the workspace:
//! a dense, row-major grid of 3-byte RGB pixels plus a lazily grown analysis
//! cache (grayscale + blur) that accelerates repeated region matching against
//! the same screenshot.
//!
//! The other responsibilities that naturally live next to the buffer are here
//! as well:
//!
//! - [`compare`] - whole-frame similarity (PSNR) and exact per-pixel
//!   difference thresholding
//! - [`ppm`] - the P6 wire layout, including the header length a checksum
//!   consumer must skip
//! - [`workers`] - explicit pre-spawn of the data-parallel worker pool
//!
//! Encoded file formats (PNG) are delegated to the `image` crate; only PPM is
//! implemented in-crate because its exact byte layout is part of the contract.

pub mod analysis;
pub mod compare;
mod image_buffer;
pub mod ppm;
pub mod workers;

pub use analysis::GrayRoi;
pub use image_buffer::Image;

// Re-export the geometry types; every consumer of Image needs them.
pub use framecheck_common::{Point, Rect};
