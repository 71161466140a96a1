//! The [`Image`] pixel buffer.
//!
//! # Memory Layout
//!
//! Pixels are stored row-major as 3-byte RGB triples with no padding:
//!
//! ```text
//! Total size = width * height * 3 bytes
//! Pixel at (x, y) starts at offset: (y * width + x) * 3
//! ```
//!
//! # Ownership
//!
//! An `Image` is exclusively owned: there is no aliasing across mutation.
//! [`Image::clone`] produces a deep copy with an independent analysis cache.
//! Every mutating operation drops the cached analysis plane so a stale
//! derivative can never be served (see [`Image::analysis`]).

use crate::analysis::{self, AnalysisCache, GrayRoi};
use anyhow::{anyhow, bail, Context, Result};
use framecheck_common::Rect;
use image::codecs::png::PngEncoder;
use image::{ColorType, ImageEncoder};
use std::path::Path;

/// Gray level used as the backdrop when a scale request grows an image.
const CANVAS_GRAY: u8 = 0x80;

/// An owned RGB pixel buffer with a cached grayscale+blur derivative.
///
/// Dimensions are fixed at construction; operations that change geometry
/// (`crop`, `scale`) produce a new buffer.
#[derive(Debug, Clone)]
pub struct Image {
    width: u32,
    height: u32,
    data: Vec<u8>,
    analysis: Option<AnalysisCache>,
}

impl Image {
    /// Creates a zero-filled (black) image of the given dimensions.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![0u8; width as usize * height as usize * 3],
            analysis: None,
        }
    }

    /// Wraps an existing RGB pixel vector. `data` must hold exactly
    /// `width * height * 3` bytes.
    pub(crate) fn from_raw(width: u32, height: u32, data: Vec<u8>) -> Self {
        debug_assert_eq!(data.len(), width as usize * height as usize * 3);
        Self {
            width,
            height,
            data,
            analysis: None,
        }
    }

    /// Decodes an encoded image (PNG) from memory.
    pub fn from_bytes(encoded: &[u8]) -> Result<Self> {
        let decoded = image::load_from_memory(encoded)
            .context("failed to decode image data")?
            .into_rgb8();
        Ok(Self {
            width: decoded.width(),
            height: decoded.height(),
            data: decoded.into_raw(),
            analysis: None,
        })
    }

    /// Loads an image from a file, or `None` when it cannot be read/decoded.
    ///
    /// Missing reference images are an expected condition (test suites drift
    /// across product versions), so this is a soft failure.
    pub fn read<P: AsRef<Path>>(path: P) -> Option<Self> {
        match image::open(path.as_ref()) {
            Ok(decoded) => {
                let rgb = decoded.into_rgb8();
                Some(Self {
                    width: rgb.width(),
                    height: rgb.height(),
                    data: rgb.into_raw(),
                    analysis: None,
                })
            }
            Err(err) => {
                tracing::warn!("failed to read image {:?}: {err}", path.as_ref());
                None
            }
        }
    }

    /// Writes the image to a file; returns `false` when the buffer is empty
    /// or encoding/IO fails.
    pub fn write<P: AsRef<Path>>(&self, path: P) -> bool {
        if self.is_empty() {
            tracing::warn!("refusing to write empty image to {:?}", path.as_ref());
            return false;
        }
        match image::save_buffer(
            path.as_ref(),
            &self.data,
            self.width,
            self.height,
            ColorType::Rgb8,
        ) {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!("failed to write image {:?}: {err}", path.as_ref());
                false
            }
        }
    }

    /// Encodes the image as PNG bytes.
    pub fn encode_png(&self) -> Result<Vec<u8>> {
        if self.is_empty() {
            bail!("cannot encode empty image");
        }
        let mut bytes = Vec::new();
        PngEncoder::new(&mut bytes)
            .write_image(&self.data, self.width, self.height, ColorType::Rgb8)
            .context("PNG encoding failed")?;
        Ok(bytes)
    }

    /// Image width in pixels.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Image height in pixels.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// True when the image covers no pixels.
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// The full image rectangle `(0, 0, width, height)`.
    pub fn bounds(&self) -> Rect {
        Rect::new(0, 0, self.width, self.height)
    }

    /// Raw RGB pixel data, row-major, 3 bytes per pixel.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Reads one pixel, or `None` when out of bounds.
    pub fn get_pixel(&self, x: u32, y: u32) -> Option<(u8, u8, u8)> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let o = (y as usize * self.width as usize + x as usize) * 3;
        Some((self.data[o], self.data[o + 1], self.data[o + 2]))
    }

    /// Writes one pixel. Out-of-bounds writes are ignored; stream decoders
    /// legitimately clip (e.g. macroblocks overhanging the right/bottom edge).
    pub fn put_pixel(&mut self, x: u32, y: u32, rgb: [u8; 3]) {
        if x >= self.width || y >= self.height {
            return;
        }
        self.analysis = None;
        let o = (y as usize * self.width as usize + x as usize) * 3;
        self.data[o..o + 3].copy_from_slice(&rgb);
    }

    /// Fills a rectangle with a solid color.
    pub fn fill_rect(&mut self, rect: Rect, rgb: [u8; 3]) -> Result<()> {
        if !self.bounds().contains_rect(&rect) {
            return Err(anyhow!(
                "fill rectangle {rect:?} out of bounds ({}x{})",
                self.width,
                self.height
            ));
        }
        self.analysis = None;
        for y in rect.y..rect.bottom() {
            let row = (y as usize * self.width as usize + rect.x as usize) * 3;
            for px in self.data[row..row + rect.width as usize * 3].chunks_exact_mut(3) {
                px.copy_from_slice(&rgb);
            }
        }
        Ok(())
    }

    /// Blanks out a region by filling it green, in place.
    ///
    /// Used to mask areas that are expected to differ (clocks, cursors)
    /// before comparing frames. The rectangle is clipped to the image; a
    /// fully out-of-range request is a soft no-op.
    pub fn replace_rect(&mut self, rect: Rect) {
        let clipped = rect.clipped_to(self.width, self.height);
        if clipped.is_empty() {
            tracing::warn!(
                "replace_rect {rect:?} outside image ({}x{})",
                self.width,
                self.height
            );
            return;
        }
        // clipped is inside bounds by construction
        let _ = self.fill_rect(clipped, [0, 255, 0]);
    }

    /// Copies the given region into a new image, or `None` (with a log) when
    /// the rectangle exceeds the bounds.
    pub fn crop(&self, rect: Rect) -> Option<Image> {
        if !self.bounds().contains_rect(&rect) {
            tracing::warn!(
                "crop rectangle {rect:?} out of bounds ({}x{})",
                self.width,
                self.height
            );
            return None;
        }
        let mut out = Image::new(rect.width, rect.height);
        for y in 0..rect.height as usize {
            let src = ((rect.y as usize + y) * self.width as usize + rect.x as usize) * 3;
            let dst = y * rect.width as usize * 3;
            let len = rect.width as usize * 3;
            out.data[dst..dst + len].copy_from_slice(&self.data[src..src + len]);
        }
        Some(out)
    }

    /// Pastes `src` into this image with its top-left corner at `(x, y)`,
    /// overwriting destination pixels. The source is clipped to the
    /// destination bounds; a zero-area source is a no-op.
    pub fn blend(&mut self, src: &Image, x: i32, y: i32) {
        if src.is_empty() {
            return;
        }
        let dest = Rect::new(x, y, src.width, src.height).clipped_to(self.width, self.height);
        if dest.is_empty() {
            return;
        }
        self.analysis = None;
        let src_x0 = (dest.x - x) as usize;
        let src_y0 = (dest.y - y) as usize;
        for row in 0..dest.height as usize {
            let s = ((src_y0 + row) * src.width as usize + src_x0) * 3;
            let d = ((dest.y as usize + row) * self.width as usize + dest.x as usize) * 3;
            let len = dest.width as usize * 3;
            self.data[d..d + len].copy_from_slice(&src.data[s..s + len]);
        }
    }

    /// Resamples the image to the given dimensions.
    ///
    /// Shrinking averages source boxes. Growing does *not* upsample: the
    /// source is centered on a mid-gray canvas instead, so no detail is
    /// fabricated that could then corrupt matching.
    pub fn scale(&self, width: u32, height: u32) -> Image {
        if self.is_empty() || width == 0 || height == 0 {
            return Image::new(width, height);
        }
        if width == self.width && height == self.height {
            return self.clone();
        }
        if width >= self.width && height >= self.height {
            let mut out = Image::new(width, height);
            out.data.fill(CANVAS_GRAY);
            out.blend(
                self,
                ((width - self.width) / 2) as i32,
                ((height - self.height) / 2) as i32,
            );
            return out;
        }
        let mut out = Image::new(width, height);
        let (sw, sh) = (self.width as usize, self.height as usize);
        for dy in 0..height as usize {
            let y0 = dy * sh / height as usize;
            let y1 = (((dy + 1) * sh) / height as usize).max(y0 + 1).min(sh);
            for dx in 0..width as usize {
                let x0 = dx * sw / width as usize;
                let x1 = (((dx + 1) * sw) / width as usize).max(x0 + 1).min(sw);
                let mut acc = [0u32; 3];
                for sy in y0..y1 {
                    for sx in x0..x1 {
                        let o = (sy * sw + sx) * 3;
                        acc[0] += self.data[o] as u32;
                        acc[1] += self.data[o + 1] as u32;
                        acc[2] += self.data[o + 2] as u32;
                    }
                }
                let n = ((y1 - y0) * (x1 - x0)) as u32;
                let o = (dy * width as usize + dx) * 3;
                out.data[o] = (acc[0] / n) as u8;
                out.data[o + 1] = (acc[1] / n) as u8;
                out.data[o + 2] = (acc[2] / n) as u8;
            }
        }
        out
    }

    /// Binarizes the image in place: pixels whose mean channel value is below
    /// `level` become black, all others white.
    pub fn threshold(&mut self, level: u8) {
        self.analysis = None;
        for px in self.data.chunks_exact_mut(3) {
            let mean = (px[0] as u16 + px[1] as u16 + px[2] as u16) / 3;
            let v = if mean < level as u16 { 0 } else { 255 };
            px.fill(v);
        }
    }

    /// Mean color over all pixels, each channel normalized to `0.0..=1.0`.
    pub fn mean_color(&self) -> [f32; 3] {
        if self.is_empty() {
            return [0.0; 3];
        }
        let mut acc = [0u64; 3];
        for px in self.data.chunks_exact(3) {
            acc[0] += px[0] as u64;
            acc[1] += px[1] as u64;
            acc[2] += px[2] as u64;
        }
        let n = (self.width as u64 * self.height as u64 * 255) as f32;
        [acc[0] as f32 / n, acc[1] as f32 / n, acc[2] as f32 / n]
    }

    /// Returns the grayscale+blurred derivative of (at least) `rect`.
    ///
    /// The derivative is cached: the cache tracks the union of all rectangles
    /// ever requested and only recomputes when a request falls outside it.
    /// Once the union covers more than half the image the cache is promoted
    /// to the whole image, so repeated partial requests amortize to one full
    /// computation. Any mutation of the pixel data drops the cache.
    ///
    /// Requests outside the image bounds are a caller error.
    pub fn analysis(&mut self, rect: Rect) -> Result<GrayRoi> {
        if rect.is_empty() || !self.bounds().contains_rect(&rect) {
            return Err(anyhow!(
                "analysis rectangle {rect:?} invalid for {}x{} image",
                self.width,
                self.height
            ));
        }
        let needs_rebuild = match &self.analysis {
            Some(cache) => !cache.valid.contains_rect(&rect),
            None => true,
        };
        if needs_rebuild {
            let mut region = match self.analysis.take() {
                Some(cache) => cache.valid.union(&rect),
                None => rect,
            };
            if region.area() * 2 > self.bounds().area() {
                region = self.bounds();
            }
            tracing::debug!(
                "rebuilding analysis cache over {region:?} ({}x{} image)",
                self.width,
                self.height
            );
            let mut gray = vec![0u8; self.width as usize * self.height as usize];
            analysis::compute_region(&mut gray, self.width, &self.data, region);
            self.analysis = Some(AnalysisCache {
                gray,
                valid: region,
            });
        }
        let cache = self
            .analysis
            .as_ref()
            .ok_or_else(|| anyhow!("analysis cache missing after rebuild"))?;
        let mut data = vec![0u8; rect.width as usize * rect.height as usize];
        for row in 0..rect.height as usize {
            let src = (rect.y as usize + row) * self.width as usize + rect.x as usize;
            let dst = row * rect.width as usize;
            data[dst..dst + rect.width as usize]
                .copy_from_slice(&cache.gray[src..src + rect.width as usize]);
        }
        Ok(GrayRoi {
            width: rect.width,
            height: rect.height,
            data,
        })
    }

    /// The region the analysis cache currently covers, if any. Diagnostics
    /// only; the cache itself is private.
    pub fn analysis_region(&self) -> Option<Rect> {
        self.analysis.as_ref().map(|c| c.valid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_is_black() {
        let img = Image::new(4, 3);
        assert_eq!(img.width(), 4);
        assert_eq!(img.height(), 3);
        assert!(img.data().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_put_get_pixel() {
        let mut img = Image::new(10, 10);
        img.put_pixel(3, 4, [1, 2, 3]);
        assert_eq!(img.get_pixel(3, 4), Some((1, 2, 3)));
        assert_eq!(img.get_pixel(10, 4), None);
        // out-of-bounds write is ignored
        img.put_pixel(100, 100, [9, 9, 9]);
    }

    #[test]
    fn test_crop_out_of_bounds_is_none() {
        let img = Image::new(10, 10);
        assert!(img.crop(Rect::new(5, 5, 10, 10)).is_none());
        assert!(img.crop(Rect::new(0, 0, 10, 10)).is_some());
    }

    #[test]
    fn test_crop_copies_pixels() {
        let mut img = Image::new(10, 10);
        img.put_pixel(5, 5, [10, 20, 30]);
        let cropped = img.crop(Rect::new(4, 4, 3, 3)).unwrap();
        assert_eq!(cropped.get_pixel(1, 1), Some((10, 20, 30)));
        assert_eq!(cropped.get_pixel(0, 0), Some((0, 0, 0)));
    }

    #[test]
    fn test_blend_clips() {
        let mut dst = Image::new(10, 10);
        let mut src = Image::new(4, 4);
        src.fill_rect(Rect::new(0, 0, 4, 4), [255, 0, 0]).unwrap();
        dst.blend(&src, 8, 8);
        assert_eq!(dst.get_pixel(9, 9), Some((255, 0, 0)));
        assert_eq!(dst.get_pixel(7, 7), Some((0, 0, 0)));
        // zero-area source is a no-op
        dst.blend(&Image::new(0, 0), 0, 0);
    }

    #[test]
    fn test_replace_rect_fills_green() {
        let mut img = Image::new(10, 10);
        img.replace_rect(Rect::new(2, 2, 3, 3));
        assert_eq!(img.get_pixel(3, 3), Some((0, 255, 0)));
        assert_eq!(img.get_pixel(0, 0), Some((0, 0, 0)));
        // fully outside: soft no-op
        img.replace_rect(Rect::new(50, 50, 5, 5));
    }

    #[test]
    fn test_scale_up_centers_on_gray() {
        let mut img = Image::new(2, 2);
        img.fill_rect(Rect::new(0, 0, 2, 2), [255, 255, 255]).unwrap();
        let scaled = img.scale(6, 6);
        assert_eq!(scaled.get_pixel(0, 0), Some((0x80, 0x80, 0x80)));
        assert_eq!(scaled.get_pixel(2, 2), Some((255, 255, 255)));
        assert_eq!(scaled.get_pixel(3, 3), Some((255, 255, 255)));
    }

    #[test]
    fn test_scale_down_averages() {
        let mut img = Image::new(4, 4);
        img.fill_rect(Rect::new(0, 0, 2, 4), [200, 0, 0]).unwrap();
        img.fill_rect(Rect::new(2, 0, 2, 4), [0, 0, 0]).unwrap();
        let scaled = img.scale(2, 2);
        assert_eq!(scaled.get_pixel(0, 0), Some((200, 0, 0)));
        assert_eq!(scaled.get_pixel(1, 1), Some((0, 0, 0)));
        let half = img.scale(1, 1).get_pixel(0, 0).unwrap();
        assert_eq!(half.0, 100);
    }

    #[test]
    fn test_threshold_binarizes_on_mean() {
        let mut img = Image::new(2, 1);
        img.put_pixel(0, 0, [100, 100, 100]);
        img.put_pixel(1, 0, [200, 200, 200]);
        img.threshold(128);
        assert_eq!(img.get_pixel(0, 0), Some((0, 0, 0)));
        assert_eq!(img.get_pixel(1, 0), Some((255, 255, 255)));
    }

    #[test]
    fn test_mean_color() {
        let mut img = Image::new(2, 1);
        img.put_pixel(0, 0, [255, 0, 0]);
        img.put_pixel(1, 0, [0, 0, 255]);
        let mean = img.mean_color();
        assert!((mean[0] - 0.5).abs() < 1e-3);
        assert!(mean[1].abs() < 1e-6);
        assert!((mean[2] - 0.5).abs() < 1e-3);
    }

    #[test]
    fn test_encode_empty_fails() {
        assert!(Image::new(0, 0).encode_png().is_err());
        assert!(!Image::new(0, 5).write("/tmp/framecheck-empty.png"));
    }

    #[test]
    fn test_mutation_drops_analysis_cache() {
        let mut img = Image::new(16, 16);
        let _ = img.analysis(Rect::new(0, 0, 8, 8)).unwrap();
        assert!(img.analysis_region().is_some());
        img.put_pixel(0, 0, [1, 1, 1]);
        assert!(img.analysis_region().is_none());
    }

    #[test]
    fn test_analysis_out_of_bounds_is_error() {
        let mut img = Image::new(8, 8);
        assert!(img.analysis(Rect::new(4, 4, 8, 8)).is_err());
        assert!(img.analysis(Rect::new(0, 0, 0, 0)).is_err());
    }
}
