//! Sliding-window correlation primitives.
//!
//! Both operate on the grayscale+blurred analysis planes, never on raw RGB;
//! the blur absorbs single-pixel capture noise before any arithmetic
//! happens.

use framecheck_image::GrayRoi;
use rayon::prelude::*;

/// Per-position matching error of a template slid over a window.
///
/// `value(x, y)` is the mean squared grayscale difference of the template
/// placed with its top-left corner at `(x, y)` within the window: 0 for a
/// perfect overlap, up to `255^2` for inverted content. Normalizing by the
/// template area keeps the scale independent of the needle size so the
/// candidate tolerance below is meaningful everywhere.
#[derive(Debug, Clone)]
pub struct ErrorMap {
    width: u32,
    height: u32,
    values: Vec<f64>,
}

impl ErrorMap {
    /// Result width (number of candidate x positions).
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Result height (number of candidate y positions).
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Error at candidate position `(x, y)`.
    pub fn value(&self, x: u32, y: u32) -> f64 {
        self.values[y as usize * self.width as usize + x as usize]
    }

    /// The smallest error in the map.
    pub fn min_value(&self) -> f64 {
        self.values.iter().copied().fold(f64::INFINITY, f64::min)
    }

    /// Iterates `(x, y, value)` over all candidate positions.
    pub fn iter(&self) -> impl Iterator<Item = (u32, u32, f64)> + '_ {
        let width = self.width;
        self.values
            .iter()
            .enumerate()
            .map(move |(i, &v)| (i as u32 % width, i as u32 / width, v))
    }
}

/// Slides `template` over every position in `window` and returns the error
/// map, or `None` when the window is smaller than the template in either
/// dimension.
///
/// Rows of the result are computed in parallel on the rayon pool.
pub fn sqdiff_map(window: &GrayRoi, template: &GrayRoi) -> Option<ErrorMap> {
    let res_w = (window.width as i64) - (template.width as i64) + 1;
    let res_h = (window.height as i64) - (template.height as i64) + 1;
    if res_w <= 0 || res_h <= 0 {
        return None;
    }
    let (res_w, res_h) = (res_w as usize, res_h as usize);
    let tw = template.width as usize;
    let th = template.height as usize;
    let ww = window.width as usize;
    let area = (tw * th) as f64;

    let values: Vec<f64> = (0..res_h)
        .into_par_iter()
        .flat_map_iter(|oy| {
            (0..res_w).map(move |ox| {
                let mut sse = 0u64;
                for ty in 0..th {
                    let wrow = &window.data[(oy + ty) * ww + ox..][..tw];
                    let trow = &template.data[ty * tw..][..tw];
                    for (&w, &t) in wrow.iter().zip(trow) {
                        let d = w as i64 - t as i64;
                        sse += (d * d) as u64;
                    }
                }
                sse as f64 / area
            })
        })
        .collect();

    Some(ErrorMap {
        width: res_w as u32,
        height: res_h as u32,
        values,
    })
}

/// Mean squared error with small differences forgiven.
///
/// Absolute grayscale differences below 16 count as zero; surviving
/// differences are quantized to the nearest multiple of 16 before squaring.
/// Recompression banding thus vanishes while real content changes keep
/// their full weight. Both ROIs must have identical dimensions.
pub fn enhanced_mse(a: &GrayRoi, b: &GrayRoi) -> f64 {
    debug_assert_eq!((a.width, a.height), (b.width, b.height));
    let mut sse = 0u64;
    for (&pa, &pb) in a.data.iter().zip(&b.data) {
        let d = pa.abs_diff(pb) as u64;
        if d < 16 {
            continue;
        }
        let q = (d + 8) / 16 * 16;
        sse += q * q;
    }
    sse as f64 / a.data.len() as f64
}
