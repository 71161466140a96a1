//! Needle search with tie-breaking and calibrated similarity scoring.

use crate::correlation::{enhanced_mse, sqdiff_map};
use framecheck_common::{Point, Rect};
use framecheck_image::Image;
use thiserror::Error;

/// Candidates within this much of the best correlation error are treated as
/// tied. Near-ties are common with repetitive UI content, and picking the
/// wrong one drifts the reported position across successive frames.
const CANDIDATE_TOLERANCE: f64 = 10.0;

/// Similarity calibration: `0.9 + (40 - mse) / 380`, so an enhanced MSE of
/// about 2 maps to 1.0 and 40 maps to 0.9. Callers typically treat 0.96 and
/// up as "matched". The constants are behavioral contract; they are tuned,
/// not derived.
const SIMILARITY_OFFSET: f64 = 0.9;
const SIMILARITY_MSE_KNEE: f64 = 40.0;
const SIMILARITY_MSE_SPAN: f64 = 380.0;

/// Outcome of a needle search.
///
/// `(x, y)` is the top-left corner of the best match in haystack
/// coordinates; `similarity` is in `[0, 1]`. A degenerate search yields
/// [`MatchResult::none`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchResult {
    pub x: i32,
    pub y: i32,
    pub similarity: f64,
}

impl MatchResult {
    /// The "no result" sentinel `(0, 0, 0.0)`.
    pub fn none() -> Self {
        Self {
            x: 0,
            y: 0,
            similarity: 0.0,
        }
    }
}

/// Hard failures of [`search`]: programming errors upstream, never a normal
/// "no match". Geometric misses are soft and return [`MatchResult::none`]
/// instead, because reference images legitimately drift out of range across
/// product versions.
#[derive(Debug, Error)]
pub enum SearchError {
    #[error("haystack image is empty")]
    EmptyHaystack,

    #[error("needle image is empty")]
    EmptyNeedle,

    #[error("analysis failed: {0}")]
    Analysis(#[from] anyhow::Error),
}

/// Searches for `needle` in `haystack` near `expected`, looking at most
/// `margin` pixels beyond it in every direction.
///
/// `expected` names where the needle content should be in the haystack; its
/// dimensions select how much of the needle image (from its top-left
/// corner) takes part in the comparison.
///
/// # Algorithm
///
/// 1. The search window is `expected` grown by `margin`, clipped to the
///    haystack.
/// 2. Both sides are reduced to their grayscale+blur analysis planes and a
///    normalized squared-difference map is computed over the window.
/// 3. A zero error at the expected position short-circuits: exact matches
///    are the common case and skip the full-window scan's refinement.
/// 4. Otherwise all positions within [`CANDIDATE_TOLERANCE`] of the best
///    error are collected and the one closest to the expected origin wins.
/// 5. The winner is re-scored with the enhanced MSE and mapped to a
///    similarity in `[0, 1]`.
pub fn search(
    haystack: &mut Image,
    needle: &mut Image,
    expected: Rect,
    margin: u32,
) -> Result<MatchResult, SearchError> {
    if haystack.is_empty() {
        return Err(SearchError::EmptyHaystack);
    }
    if needle.is_empty() {
        return Err(SearchError::EmptyNeedle);
    }

    let needle_rect = Rect::new(0, 0, expected.width, expected.height);
    if expected.is_empty()
        || !haystack.bounds().contains_rect(&expected)
        || !needle.bounds().contains_rect(&needle_rect)
    {
        tracing::warn!(
            "search region {expected:?} out of range (haystack {}x{}, needle {}x{})",
            haystack.width(),
            haystack.height(),
            needle.width(),
            needle.height()
        );
        return Ok(MatchResult::none());
    }

    let window = expected
        .expanded(margin)
        .clipped_to(haystack.width(), haystack.height());
    let window_plane = haystack.analysis(window)?;
    let needle_plane = needle.analysis(needle_rect)?;

    let Some(errors) = sqdiff_map(&window_plane, &needle_plane) else {
        tracing::warn!("search window {window:?} smaller than needle {needle_rect:?}");
        return Ok(MatchResult::none());
    };

    // error at the position the caller expected; an exact hit ends here
    let expected_error = errors.value((expected.x - window.x) as u32, (expected.y - window.y) as u32);
    if expected_error == 0.0 {
        return Ok(MatchResult {
            x: expected.x,
            y: expected.y,
            similarity: 1.0,
        });
    }

    let best = errors.min_value();
    let chosen = errors
        .iter()
        .filter(|&(_, _, v)| v <= best + CANDIDATE_TOLERANCE)
        .min_by_key(|&(cx, cy, _)| {
            Point::new(window.x + cx as i32, window.y + cy as i32).distance_sq(&expected.origin())
        });
    let Some((cx, cy, _)) = chosen else {
        return Ok(MatchResult::none());
    };

    let candidate = window_plane.crop(cx, cy, needle_plane.width, needle_plane.height);
    let mse = enhanced_mse(&candidate, &needle_plane);
    let similarity =
        (SIMILARITY_OFFSET + (SIMILARITY_MSE_KNEE - mse) / SIMILARITY_MSE_SPAN).clamp(0.0, 1.0);
    tracing::debug!(
        "search near {expected:?}: best candidate at ({}, {}), mse {mse:.2}, similarity {similarity:.3}",
        window.x + cx as i32,
        window.y + cy as i32
    );

    Ok(MatchResult {
        x: window.x + cx as i32,
        y: window.y + cy as i32,
        similarity,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_images_are_hard_errors() {
        let mut empty = Image::new(0, 0);
        let mut img = Image::new(10, 10);
        let r = Rect::new(0, 0, 4, 4);
        assert!(matches!(
            search(&mut empty, &mut img.clone(), r, 0),
            Err(SearchError::EmptyHaystack)
        ));
        assert!(matches!(
            search(&mut img, &mut Image::new(5, 0), r, 0),
            Err(SearchError::EmptyNeedle)
        ));
    }

    #[test]
    fn test_out_of_range_expected_is_soft_failure() {
        let mut haystack = Image::new(20, 20);
        let mut needle = Image::new(8, 8);
        let result = search(&mut haystack, &mut needle, Rect::new(16, 16, 8, 8), 4).unwrap();
        assert_eq!(result, MatchResult::none());
    }

    #[test]
    fn test_needle_smaller_than_region_is_soft_failure() {
        let mut haystack = Image::new(20, 20);
        let mut needle = Image::new(4, 4);
        let result = search(&mut haystack, &mut needle, Rect::new(0, 0, 8, 8), 0).unwrap();
        assert_eq!(result, MatchResult::none());
    }

    #[test]
    fn test_exact_match_zero_margin() {
        let mut haystack = Image::new(32, 32);
        for i in 0..32 {
            haystack.put_pixel(i, i, [255, 255, 255]);
            haystack.put_pixel(31 - i, i, [200, 40, 10]);
        }
        let region = Rect::new(5, 7, 12, 9);
        let mut needle = haystack.crop(region).unwrap();
        let result = search(&mut haystack, &mut needle, region, 0).unwrap();
        assert_eq!((result.x, result.y), (5, 7));
        assert_eq!(result.similarity, 1.0);
    }
}
