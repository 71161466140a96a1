//! ZRLE tile decoder.
//!
//! ZRLE (Zlib Run-Length Encoding) covers a rectangle with 64x64 tiles in
//! row-major order (smaller at the right/bottom edges). This module decodes
//! the tile layer, which operates on **already-inflated** bytes; the outer
//! zlib layer is handled by [`ZlibInflater`], whose state deliberately
//! persists across rectangles of one update stream.
//!
//! # Tile Format
//!
//! Each tile starts with one sub-encoding byte:
//!
//! ```text
//! 0          raw: tile_w * tile_h pixels, row-major
//! 1          solid: one pixel fills the tile
//! 2..=127    packed palette: n colors, then indices at 1/2/4 bits per
//!            pixel (4 if n > 4, 2 if n > 2, else 1), rows packed MSB-first
//!            and padded to a byte boundary
//! 128        plain RLE: (pixel, run length) pairs in row-major order,
//!            runs wrap across tile rows
//! 130..=255  palette RLE: n = sub - 128 colors, then entries of
//!            7-bit index + run flag; flagged entries carry a run length
//! ```
//!
//! Run lengths are one plus the sum of continuation bytes: a 0xFF byte adds
//! 255 and continues, any other byte adds its value and terminates.
//!
//! ```text
//! [10]          -> length 11
//! [255, 100]    -> length 356
//! [255, 255, 0] -> length 511
//! ```
//!
//! Pixels are read through [`VncPixelFormat::read_pixel`], so the tile layer
//! is independent of the negotiated pixel width.

use crate::{ByteCursor, VncPixelFormat};
use anyhow::{bail, Context, Result};
use flate2::{Decompress, FlushDecompress};
use framecheck_common::Rect;
use framecheck_image::Image;

/// Tile edge length (pixels); edge tiles use the remaining width/height.
const TILE_SIZE: u32 = 64;

/// In-memory palette capacity. A sub-encoding byte can request at most 127
/// colors on either branch (2..=127 packed, 130..=255 minus 128), so 128
/// entries always suffice; the bound is asserted where the palette is read.
const MAX_PALETTE: usize = 128;

/// Decodes a ZRLE rectangle from already-inflated tile data.
///
/// Returns the number of bytes consumed, so a caller multiplexing several
/// rectangles out of one inflated buffer can advance its own offset.
pub fn decode_zrle(
    img: &mut Image,
    rect: Rect,
    format: &VncPixelFormat,
    data: &[u8],
) -> Result<usize> {
    if !img.bounds().contains_rect(&rect) {
        bail!(
            "ZRLE rectangle {rect:?} outside framebuffer ({}x{})",
            img.width(),
            img.height()
        );
    }
    let mut cursor = ByteCursor::new(data);
    let mut ty = 0;
    while ty < rect.height {
        let tile_h = TILE_SIZE.min(rect.height - ty);
        let mut tx = 0;
        while tx < rect.width {
            let tile_w = TILE_SIZE.min(rect.width - tx);
            let origin = (rect.x as u32 + tx, rect.y as u32 + ty);
            decode_tile(img, format, &mut cursor, origin, tile_w, tile_h).with_context(|| {
                format!("ZRLE tile at ({tx}, {ty}) in {rect:?} failed")
            })?;
            tx += TILE_SIZE;
        }
        ty += TILE_SIZE;
    }
    tracing::debug!(
        "ZRLE rect {rect:?}: consumed {} of {} bytes",
        cursor.position(),
        data.len()
    );
    Ok(cursor.position())
}

fn decode_tile(
    img: &mut Image,
    format: &VncPixelFormat,
    cursor: &mut ByteCursor,
    origin: (u32, u32),
    tile_w: u32,
    tile_h: u32,
) -> Result<()> {
    let sub_encoding = cursor.read_u8().context("missing sub-encoding byte")?;
    match sub_encoding {
        0 => decode_raw_tile(img, format, cursor, origin, tile_w, tile_h),
        1 => decode_solid_tile(img, format, cursor, origin, tile_w, tile_h),
        2..=127 => decode_packed_palette_tile(
            img,
            format,
            cursor,
            origin,
            tile_w,
            tile_h,
            sub_encoding as usize,
        ),
        128 => decode_plain_rle_tile(img, format, cursor, origin, tile_w, tile_h),
        129 => bail!("invalid sub-encoding 129"),
        _ => decode_palette_rle_tile(
            img,
            format,
            cursor,
            origin,
            tile_w,
            tile_h,
            (sub_encoding - 128) as usize,
        ),
    }
}

fn decode_raw_tile(
    img: &mut Image,
    format: &VncPixelFormat,
    cursor: &mut ByteCursor,
    (ox, oy): (u32, u32),
    tile_w: u32,
    tile_h: u32,
) -> Result<()> {
    for y in 0..tile_h {
        for x in 0..tile_w {
            let rgb = format.read_pixel(cursor)?;
            img.put_pixel(ox + x, oy + y, rgb);
        }
    }
    Ok(())
}

fn decode_solid_tile(
    img: &mut Image,
    format: &VncPixelFormat,
    cursor: &mut ByteCursor,
    (ox, oy): (u32, u32),
    tile_w: u32,
    tile_h: u32,
) -> Result<()> {
    let rgb = format.read_pixel(cursor)?;
    for y in 0..tile_h {
        for x in 0..tile_w {
            img.put_pixel(ox + x, oy + y, rgb);
        }
    }
    Ok(())
}

fn decode_packed_palette_tile(
    img: &mut Image,
    format: &VncPixelFormat,
    cursor: &mut ByteCursor,
    (ox, oy): (u32, u32),
    tile_w: u32,
    tile_h: u32,
    palette_size: usize,
) -> Result<()> {
    let palette = read_palette(format, cursor, palette_size)?;
    let bits = if palette_size > 4 {
        4
    } else if palette_size > 2 {
        2
    } else {
        1
    };
    for y in 0..tile_h {
        // indices are packed MSB-first, each row padded to a byte boundary
        let mut byte = 0u8;
        let mut avail = 0u32;
        for x in 0..tile_w {
            if avail == 0 {
                byte = cursor.read_u8().context("packed palette row truncated")?;
                avail = 8;
            }
            avail -= bits;
            let index = ((byte >> avail) & ((1 << bits) - 1)) as usize;
            if index >= palette_size {
                bail!("packed palette index {index} out of range (size {palette_size})");
            }
            img.put_pixel(ox + x, oy + y, palette[index]);
        }
    }
    Ok(())
}

fn decode_plain_rle_tile(
    img: &mut Image,
    format: &VncPixelFormat,
    cursor: &mut ByteCursor,
    origin: (u32, u32),
    tile_w: u32,
    tile_h: u32,
) -> Result<()> {
    let area = (tile_w * tile_h) as usize;
    let mut pos = 0usize;
    while pos < area {
        let rgb = format.read_pixel(cursor)?;
        let run = read_run_length(cursor)?;
        if pos + run > area {
            bail!(
                "RLE run of {run} exceeds remaining tile pixels ({})",
                area - pos
            );
        }
        fill_run(img, origin, tile_w, pos, run, rgb);
        pos += run;
    }
    Ok(())
}

fn decode_palette_rle_tile(
    img: &mut Image,
    format: &VncPixelFormat,
    cursor: &mut ByteCursor,
    origin: (u32, u32),
    tile_w: u32,
    tile_h: u32,
    palette_size: usize,
) -> Result<()> {
    let palette = read_palette(format, cursor, palette_size)?;
    let area = (tile_w * tile_h) as usize;
    let mut pos = 0usize;
    while pos < area {
        let entry = cursor.read_u8().context("palette RLE entry truncated")?;
        let index = (entry & 0x7F) as usize;
        if index >= palette_size {
            bail!("palette RLE index {index} out of range (size {palette_size})");
        }
        let run = if entry & 0x80 != 0 {
            read_run_length(cursor)?
        } else {
            1
        };
        if pos + run > area {
            bail!(
                "RLE run of {run} exceeds remaining tile pixels ({})",
                area - pos
            );
        }
        fill_run(img, origin, tile_w, pos, run, palette[index]);
        pos += run;
    }
    Ok(())
}

/// Writes `run` copies of `rgb` starting at linear tile position `pos`,
/// wrapping across tile rows.
fn fill_run(img: &mut Image, (ox, oy): (u32, u32), tile_w: u32, pos: usize, run: usize, rgb: [u8; 3]) {
    for p in pos..pos + run {
        let x = (p as u32) % tile_w;
        let y = (p as u32) / tile_w;
        img.put_pixel(ox + x, oy + y, rgb);
    }
}

fn read_palette(
    format: &VncPixelFormat,
    cursor: &mut ByteCursor,
    palette_size: usize,
) -> Result<Vec<[u8; 3]>> {
    assert!(
        palette_size <= MAX_PALETTE,
        "palette size {palette_size} exceeds capacity {MAX_PALETTE}"
    );
    let mut palette = Vec::with_capacity(palette_size);
    for _ in 0..palette_size {
        palette.push(format.read_pixel(cursor)?);
    }
    Ok(palette)
}

/// One plus the sum of continuation bytes; 0xFF adds 255 and continues.
fn read_run_length(cursor: &mut ByteCursor) -> Result<usize> {
    let mut length = 1usize;
    loop {
        let byte = cursor.read_u8().context("run length truncated")?;
        length += byte as usize;
        if byte != 0xFF {
            return Ok(length);
        }
    }
}

/// Persistent zlib inflater for the outer ZRLE layer.
///
/// One remote-display session uses a single continuous zlib stream: only the
/// first rectangle carries a zlib header, later rectangles are raw deflate
/// continuation data, so the inflater state must survive between calls.
/// [`ZlibInflater::reset`] starts a fresh stream.
pub struct ZlibInflater {
    inner: Decompress,
}

impl Default for ZlibInflater {
    fn default() -> Self {
        Self::new()
    }
}

impl ZlibInflater {
    /// Creates an inflater expecting a zlib-wrapped stream.
    pub fn new() -> Self {
        Self {
            inner: Decompress::new(true),
        }
    }

    /// Discards stream state; the next input must carry a zlib header.
    pub fn reset(&mut self) {
        self.inner.reset(true);
    }

    /// Inflates one compressed chunk, preserving stream state for the next.
    pub fn inflate(&mut self, compressed: &[u8]) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        let mut buf = vec![0u8; 64 * 1024];
        let mut consumed_total = 0usize;
        loop {
            let before_in = self.inner.total_in();
            let before_out = self.inner.total_out();
            let status = self
                .inner
                .decompress(&compressed[consumed_total..], &mut buf, FlushDecompress::Sync)
                .context("zlib inflation failed")?;
            consumed_total += (self.inner.total_in() - before_in) as usize;
            out.extend_from_slice(&buf[..(self.inner.total_out() - before_out) as usize]);
            if consumed_total >= compressed.len() {
                return Ok(out);
            }
            match status {
                flate2::Status::Ok | flate2::Status::BufError => continue,
                flate2::Status::StreamEnd => {
                    tracing::warn!(
                        "zlib stream ended early ({consumed_total}/{} bytes consumed)",
                        compressed.len()
                    );
                    return Ok(out);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::ZlibEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn rgb888() -> VncPixelFormat {
        VncPixelFormat::rgb888()
    }

    /// Little-endian RGB888 pixel bytes for the test format.
    fn px(r: u8, g: u8, b: u8) -> [u8; 4] {
        [b, g, r, 0]
    }

    #[test]
    fn test_solid_tile_fills_and_consumes_exactly() {
        let mut img = Image::new(64, 64);
        let mut data = vec![1u8];
        data.extend_from_slice(&px(10, 20, 30));
        let consumed = decode_zrle(&mut img, Rect::new(0, 0, 64, 64), &rgb888(), &data).unwrap();
        // one sub-encoding byte plus one pixel
        assert_eq!(consumed, 1 + 4);
        for y in 0..64 {
            for x in 0..64 {
                assert_eq!(img.get_pixel(x, y), Some((10, 20, 30)));
            }
        }
    }

    #[test]
    fn test_raw_tile() {
        let mut img = Image::new(2, 2);
        let mut data = vec![0u8];
        data.extend_from_slice(&px(255, 0, 0));
        data.extend_from_slice(&px(0, 255, 0));
        data.extend_from_slice(&px(0, 0, 255));
        data.extend_from_slice(&px(9, 9, 9));
        let consumed = decode_zrle(&mut img, Rect::new(0, 0, 2, 2), &rgb888(), &data).unwrap();
        assert_eq!(consumed, data.len());
        assert_eq!(img.get_pixel(0, 0), Some((255, 0, 0)));
        assert_eq!(img.get_pixel(1, 0), Some((0, 255, 0)));
        assert_eq!(img.get_pixel(0, 1), Some((0, 0, 255)));
        assert_eq!(img.get_pixel(1, 1), Some((9, 9, 9)));
    }

    #[test]
    fn test_packed_palette_2bit_msb_first() {
        // 4 colors => 2-bit indices; one row of 4 pixels = one byte
        let mut img = Image::new(4, 1);
        let mut data = vec![4u8];
        data.extend_from_slice(&px(255, 0, 0));
        data.extend_from_slice(&px(0, 255, 0));
        data.extend_from_slice(&px(0, 0, 255));
        data.extend_from_slice(&px(255, 255, 255));
        data.push(0b00_01_10_11); // indices 0, 1, 2, 3
        decode_zrle(&mut img, Rect::new(0, 0, 4, 1), &rgb888(), &data).unwrap();
        assert_eq!(img.get_pixel(0, 0), Some((255, 0, 0)));
        assert_eq!(img.get_pixel(1, 0), Some((0, 255, 0)));
        assert_eq!(img.get_pixel(2, 0), Some((0, 0, 255)));
        assert_eq!(img.get_pixel(3, 0), Some((255, 255, 255)));
    }

    #[test]
    fn test_packed_palette_rows_are_byte_padded() {
        // 2 colors => 1-bit indices; 3-pixel rows still take a whole byte
        let mut img = Image::new(3, 2);
        let mut data = vec![2u8];
        data.extend_from_slice(&px(0, 0, 0));
        data.extend_from_slice(&px(255, 255, 255));
        data.push(0b101_00000); // row 0: 1 0 1
        data.push(0b010_00000); // row 1: 0 1 0
        decode_zrle(&mut img, Rect::new(0, 0, 3, 2), &rgb888(), &data).unwrap();
        assert_eq!(img.get_pixel(0, 0), Some((255, 255, 255)));
        assert_eq!(img.get_pixel(1, 0), Some((0, 0, 0)));
        assert_eq!(img.get_pixel(2, 0), Some((255, 255, 255)));
        assert_eq!(img.get_pixel(0, 1), Some((0, 0, 0)));
        assert_eq!(img.get_pixel(1, 1), Some((255, 255, 255)));
        assert_eq!(img.get_pixel(2, 1), Some((0, 0, 0)));
    }

    #[test]
    fn test_plain_rle_wraps_rows() {
        // 3x3 tile: run of 5 red then run of 4 blue
        let mut img = Image::new(3, 3);
        let mut data = vec![128u8];
        data.extend_from_slice(&px(255, 0, 0));
        data.push(4); // length 5
        data.extend_from_slice(&px(0, 0, 255));
        data.push(3); // length 4
        decode_zrle(&mut img, Rect::new(0, 0, 3, 3), &rgb888(), &data).unwrap();
        for i in 0..5u32 {
            assert_eq!(img.get_pixel(i % 3, i / 3), Some((255, 0, 0)));
        }
        for i in 5..9u32 {
            assert_eq!(img.get_pixel(i % 3, i / 3), Some((0, 0, 255)));
        }
    }

    #[test]
    fn test_run_length_continuation_chain() {
        // 64x8 tile = 512 pixels: single run of length 1 + 255 + 255 + 1
        let mut img = Image::new(64, 8);
        let mut data = vec![128u8];
        data.extend_from_slice(&px(7, 7, 7));
        data.extend_from_slice(&[255, 255, 1]);
        let consumed = decode_zrle(&mut img, Rect::new(0, 0, 64, 8), &rgb888(), &data).unwrap();
        assert_eq!(consumed, data.len());
        assert_eq!(img.get_pixel(63, 7), Some((7, 7, 7)));
    }

    #[test]
    fn test_palette_rle_runs_and_singles() {
        // 6x1 tile: red, blue x4, red
        let mut img = Image::new(6, 1);
        let mut data = vec![130u8]; // palette of 2, RLE
        data.extend_from_slice(&px(255, 0, 0));
        data.extend_from_slice(&px(0, 0, 255));
        data.push(0); // red, single
        data.push(0x80 | 1); // blue, run follows
        data.push(3); // length 4
        data.push(0); // red, single
        decode_zrle(&mut img, Rect::new(0, 0, 6, 1), &rgb888(), &data).unwrap();
        assert_eq!(img.get_pixel(0, 0), Some((255, 0, 0)));
        for x in 1..5 {
            assert_eq!(img.get_pixel(x, 0), Some((0, 0, 255)));
        }
        assert_eq!(img.get_pixel(5, 0), Some((255, 0, 0)));
    }

    #[test]
    fn test_multiple_tiles_row_major() {
        // 128x1 rect = two 64x1 tiles, each solid
        let mut img = Image::new(128, 1);
        let mut data = vec![1u8];
        data.extend_from_slice(&px(255, 0, 0));
        data.push(1);
        data.extend_from_slice(&px(0, 0, 255));
        decode_zrle(&mut img, Rect::new(0, 0, 128, 1), &rgb888(), &data).unwrap();
        assert_eq!(img.get_pixel(0, 0), Some((255, 0, 0)));
        assert_eq!(img.get_pixel(63, 0), Some((255, 0, 0)));
        assert_eq!(img.get_pixel(64, 0), Some((0, 0, 255)));
        assert_eq!(img.get_pixel(127, 0), Some((0, 0, 255)));
    }

    #[test]
    fn test_run_exceeding_tile_is_error() {
        let mut img = Image::new(1, 1);
        let mut data = vec![128u8];
        data.extend_from_slice(&px(1, 1, 1));
        data.push(4); // run of 5 in a 1-pixel tile
        let err = decode_zrle(&mut img, Rect::new(0, 0, 1, 1), &rgb888(), &data).unwrap_err();
        assert!(format!("{err:?}").contains("exceeds remaining tile pixels"));
    }

    #[test]
    fn test_truncated_stream_is_error() {
        let mut img = Image::new(1, 1);
        assert!(decode_zrle(&mut img, Rect::new(0, 0, 1, 1), &rgb888(), &[128]).is_err());
    }

    #[test]
    fn test_invalid_sub_encoding() {
        let mut img = Image::new(1, 1);
        assert!(decode_zrle(&mut img, Rect::new(0, 0, 1, 1), &rgb888(), &[129]).is_err());
    }

    #[test]
    fn test_rect_outside_framebuffer_is_error() {
        let mut img = Image::new(10, 10);
        assert!(decode_zrle(&mut img, Rect::new(8, 8, 4, 4), &rgb888(), &[]).is_err());
    }

    #[test]
    fn test_zlib_inflater_round_trip() {
        let payload: Vec<u8> = (0..=255u8).cycle().take(1000).collect();
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&payload).unwrap();
        let compressed = encoder.finish().unwrap();

        let mut inflater = ZlibInflater::new();
        let inflated = inflater.inflate(&compressed).unwrap();
        assert_eq!(inflated, payload);
    }
}
