//! Grayscale+blur analysis plane.
//!
//! Region matching never runs on raw RGB: both sides are first reduced to a
//! blurred grayscale derivative, which suppresses recompression noise and
//! cuts the correlation cost to a third. Computing that derivative for a
//! large screenshot is the expensive part, so [`Image::analysis`] caches it
//! per image (see `image_buffer.rs`); this module holds the actual pixel
//! math and the [`GrayRoi`] view handed to the matcher.
//!
//! Grayscale uses BT.601 luma weighting in fixed point
//! (`(r*4899 + g*9617 + b*1868) >> 14`). Blur is a separable 3x3 binomial
//! kernel (`[1 2 1] / 4` per axis) with edge clamping at the borders of the
//! computed region. Rows are processed in parallel on the rayon pool.
//!
//! [`Image::analysis`]: crate::Image::analysis

use framecheck_common::Rect;
use rayon::prelude::*;

/// Cached analysis state stored inside an [`Image`](crate::Image).
///
/// `gray` is a full-size plane (width * height bytes) of which only the
/// pixels inside `valid` hold computed values.
#[derive(Debug, Clone)]
pub(crate) struct AnalysisCache {
    pub(crate) gray: Vec<u8>,
    pub(crate) valid: Rect,
}

/// A rectangular excerpt of the analysis plane: one byte per pixel,
/// row-major, tightly packed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrayRoi {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl GrayRoi {
    /// Value at `(x, y)`. Callers index within bounds; this is a plain
    /// slice access.
    pub fn at(&self, x: u32, y: u32) -> u8 {
        self.data[y as usize * self.width as usize + x as usize]
    }

    /// Copies out a sub-rectangle. The rectangle must lie within the ROI.
    pub fn crop(&self, x: u32, y: u32, width: u32, height: u32) -> GrayRoi {
        assert!(
            x + width <= self.width && y + height <= self.height,
            "crop {}x{}+{}+{} exceeds ROI {}x{}",
            width,
            height,
            x,
            y,
            self.width,
            self.height
        );
        let mut data = vec![0u8; width as usize * height as usize];
        for row in 0..height as usize {
            let src = (y as usize + row) * self.width as usize + x as usize;
            data[row * width as usize..(row + 1) * width as usize]
                .copy_from_slice(&self.data[src..src + width as usize]);
        }
        GrayRoi {
            width,
            height,
            data,
        }
    }
}

/// Computes the grayscale+blur derivative of `region` from the RGB pixels in
/// `rgb` (stride `img_width` pixels) and stores it into the full-size `gray`
/// plane at the same coordinates.
pub(crate) fn compute_region(gray: &mut [u8], img_width: u32, rgb: &[u8], region: Rect) {
    let rw = region.width as usize;
    let rh = region.height as usize;
    let stride = img_width as usize;
    let rx = region.x as usize;
    let ry = region.y as usize;

    // Pass 1: luma, region-local buffer.
    let mut luma = vec![0u8; rw * rh];
    luma.par_chunks_mut(rw).enumerate().for_each(|(row, out)| {
        let base = ((ry + row) * stride + rx) * 3;
        for (col, px) in out.iter_mut().enumerate() {
            let o = base + col * 3;
            let (r, g, b) = (rgb[o] as u32, rgb[o + 1] as u32, rgb[o + 2] as u32);
            *px = ((r * 4899 + g * 9617 + b * 1868 + 8192) >> 14) as u8;
        }
    });

    // Pass 2: horizontal [1 2 1]/4, clamped at the region borders.
    let mut hpass = vec![0u8; rw * rh];
    hpass.par_chunks_mut(rw).enumerate().for_each(|(row, out)| {
        let src = &luma[row * rw..(row + 1) * rw];
        for col in 0..rw {
            let l = src[col.saturating_sub(1)] as u32;
            let c = src[col] as u32;
            let r = src[(col + 1).min(rw - 1)] as u32;
            out[col] = ((l + 2 * c + r + 2) >> 2) as u8;
        }
    });

    // Pass 3: vertical [1 2 1]/4 into a region-local buffer, then copy the
    // rows into the shared plane.
    let mut vpass = vec![0u8; rw * rh];
    vpass.par_chunks_mut(rw).enumerate().for_each(|(row, out)| {
        let up = &hpass[row.saturating_sub(1) * rw..][..rw];
        let mid = &hpass[row * rw..][..rw];
        let down = &hpass[(row + 1).min(rh - 1) * rw..][..rw];
        for col in 0..rw {
            out[col] = ((up[col] as u32 + 2 * mid[col] as u32 + down[col] as u32 + 2) >> 2) as u8;
        }
    });
    for row in 0..rh {
        let dst = (ry + row) * stride + rx;
        gray[dst..dst + rw].copy_from_slice(&vpass[row * rw..][..rw]);
    }
}
