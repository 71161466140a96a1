//! Region matching: locate a reference sub-image ("needle") within a
//! screenshot ("haystack") near an expected position, tolerating the noise
//! real captures carry (lossy recompression, scaling artifacts, minor color
//! drift).
//!
//! The entry point is [`search`]; see its documentation for the algorithm
//! and the failure tiers. [`correlation`] holds the sliding-window
//! primitives it is built on.

pub mod correlation;
mod search;

pub use search::{search, MatchResult, SearchError};
