//! Uncompressed framebuffer decoders.
//!
//! # RAW
//!
//! The simplest RFB encoding: `width * height` pixels in the server's pixel
//! format, row-major, no compression. The byte cost per pixel comes from the
//! negotiated [`VncPixelFormat`].
//!
//! # RGB555
//!
//! A fixed whole-screen format some IPMI framebuffers deliver: 16 bits per
//! pixel, little-endian, 5 bits per channel packed `0RRRRRGGGGGBBBBB` (the
//! most significant bit is ignored). Channel values are scaled x8 to 8-bit.

use crate::{ByteCursor, VncPixelFormat};
use anyhow::{bail, Context, Result};
use framecheck_common::Rect;
use framecheck_image::Image;

/// Decodes an uncompressed RAW rectangle into `img`.
///
/// The rectangle must lie within the image; the stream must carry
/// `rect.area() * bytes_per_pixel` bytes.
pub fn decode_raw(img: &mut Image, rect: Rect, format: &VncPixelFormat, data: &[u8]) -> Result<()> {
    if !img.bounds().contains_rect(&rect) {
        bail!(
            "RAW rectangle {rect:?} outside framebuffer ({}x{})",
            img.width(),
            img.height()
        );
    }
    let mut cursor = ByteCursor::new(data);
    for y in 0..rect.height {
        for x in 0..rect.width {
            let rgb = format
                .read_pixel(&mut cursor)
                .with_context(|| format!("RAW decode failed at ({x}, {y}) in {rect:?}"))?;
            img.put_pixel(rect.x as u32 + x, rect.y as u32 + y, rgb);
        }
    }
    Ok(())
}

/// Decodes a whole-screen RGB555 frame into `img`.
///
/// `data` must carry `width * height` 16-bit words.
pub fn decode_rgb555(img: &mut Image, data: &[u8]) -> Result<()> {
    let mut cursor = ByteCursor::new(data);
    for y in 0..img.height() {
        for x in 0..img.width() {
            let word = cursor
                .read_u16_le()
                .with_context(|| format!("RGB555 decode failed at ({x}, {y})"))?;
            let r = ((word >> 10) & 0x1F) as u8 * 8;
            let g = ((word >> 5) & 0x1F) as u8 * 8;
            let b = (word & 0x1F) as u8 * 8;
            img.put_pixel(x, y, [r, g, b]);
        }
    }
    Ok(())
}
