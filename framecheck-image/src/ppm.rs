//! Binary PPM (P6) layout.
//!
//! PPM is used transiently when a caller wants to hash the raw pixel bytes of
//! a frame: the image is serialized as P6 and the checksum is taken over the
//! payload *after* the header. The exact layout therefore matters:
//!
//! ```text
//! +------------------+
//! | "P6\n"           |  magic
//! +------------------+
//! | "{w} {h}\n"      |  dimensions, decimal ASCII
//! +------------------+
//! | "255\n"          |  maximum channel value
//! +------------------+
//! | RGB triples      |  w * h * 3 bytes, row-major
//! +------------------+
//! ```
//!
//! [`PpmBytes::header_len`] is the byte offset of the pixel payload, so a
//! checksum consumer can skip the header without re-parsing it.

use crate::Image;
use anyhow::{bail, Context, Result};

/// A serialized P6 image together with its header length.
#[derive(Debug, Clone)]
pub struct PpmBytes {
    pub bytes: Vec<u8>,
    pub header_len: usize,
}

impl PpmBytes {
    /// The pixel payload: everything after the header.
    pub fn pixel_bytes(&self) -> &[u8] {
        &self.bytes[self.header_len..]
    }
}

/// Serializes an image as binary PPM. Fails on an empty image.
pub fn encode(img: &Image) -> Result<PpmBytes> {
    if img.is_empty() {
        bail!("cannot encode empty image as PPM");
    }
    let header = format!("P6\n{} {}\n255\n", img.width(), img.height());
    let header_len = header.len();
    let mut bytes = header.into_bytes();
    bytes.extend_from_slice(img.data());
    Ok(PpmBytes { bytes, header_len })
}

/// Parses a binary PPM image.
///
/// Accepts the standard header flexibility (any whitespace between tokens,
/// `#` comment lines) but requires a maximum channel value of 255.
pub fn decode(bytes: &[u8]) -> Result<Image> {
    let mut pos = 0usize;
    if bytes.len() < 2 || &bytes[0..2] != b"P6" {
        bail!("not a binary PPM image (missing P6 magic)");
    }
    pos += 2;
    let width = read_token(bytes, &mut pos).context("PPM width missing")?;
    let height = read_token(bytes, &mut pos).context("PPM height missing")?;
    let maxval = read_token(bytes, &mut pos).context("PPM maxval missing")?;
    if maxval != 255 {
        bail!("unsupported PPM maxval {maxval} (only 255)");
    }
    // exactly one whitespace byte separates the header from the payload
    if !bytes.get(pos).is_some_and(|b| b.is_ascii_whitespace()) {
        bail!("malformed PPM header");
    }
    pos += 1;
    let expected = width as usize * height as usize * 3;
    let payload = &bytes[pos..];
    if payload.len() < expected {
        bail!(
            "truncated PPM payload: need {expected} bytes, have {}",
            payload.len()
        );
    }
    Ok(Image::from_raw(width, height, payload[..expected].to_vec()))
}

/// Reads the next decimal token, skipping whitespace and `#` comments.
fn read_token(bytes: &[u8], pos: &mut usize) -> Result<u32> {
    loop {
        match bytes.get(*pos) {
            Some(b) if b.is_ascii_whitespace() => *pos += 1,
            Some(b'#') => {
                while bytes.get(*pos).is_some_and(|&b| b != b'\n') {
                    *pos += 1;
                }
            }
            Some(b) if b.is_ascii_digit() => break,
            _ => bail!("unexpected byte in PPM header"),
        }
    }
    let mut value: u64 = 0;
    while let Some(&b) = bytes.get(*pos) {
        if !b.is_ascii_digit() {
            break;
        }
        value = value * 10 + (b - b'0') as u64;
        if value > u32::MAX as u64 {
            bail!("PPM header value out of range");
        }
        *pos += 1;
    }
    Ok(value as u32)
}
