//! Decoders turning remote-framebuffer byte streams into [`Image`] pixels.
//!
//! Three families of input are handled:
//!
//! - **RFB/VNC pixel encodings**: [`decode_raw`] (uncompressed pixels in the
//!   server's pixel format) and [`decode_zrle`] (the 64x64-tile run-length
//!   scheme, operating on already-inflated bytes; [`ZlibInflater`] owns the
//!   outer zlib layer).
//! - **RGB555**: the fixed 16-bit packed format some IPMI SOL framebuffers
//!   deliver ([`decode_rgb555`]).
//! - **AST2100**: the proprietary JPEG-derived macroblock codec used by
//!   certain IPMI KVM redirections ([`decode_ast2100`]).
//!
//! Foreign pixel layouts are described by a [`VncPixelFormat`], created once
//! per remote-display session and consulted for every decoded pixel.
//!
//! # Fail-fast policy
//!
//! Every read goes through a bounds-checked [`ByteCursor`] (or the codec's
//! bit reader); a truncated or corrupt stream yields an error, never an
//! out-of-bounds access or a silently wrong image. There is no recovery
//! path: once stream state is lost, subsequent data cannot be located.
//!
//! [`Image`]: framecheck_image::Image

mod ast2100;
mod cursor;
mod format;
mod raw;
mod zrle;

pub use ast2100::{decode_ast2100, Ast2100Decoder};
pub use cursor::ByteCursor;
pub use format::VncPixelFormat;
pub use raw::{decode_raw, decode_rgb555};
pub use zrle::{decode_zrle, ZlibInflater};
