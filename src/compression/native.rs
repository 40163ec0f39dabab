//! Host backend over the system `libcompression` on Apple platforms.
//!
//! Only LZFSE is accelerated; LZSS has no system codec and is delegated to
//! the portable implementation.

use std::os::raw::c_void;

use log::debug;

use super::{CodecBackend, CodecKind, PortableBackend, MAX_OUTPUT};
use crate::error::{Error, Result};

const COMPRESSION_LZFSE: i32 = 0x801;

#[link(name = "compression")]
extern "C" {
    fn compression_decode_buffer(
        dst_buffer: *mut u8,
        dst_size: usize,
        src_buffer: *const u8,
        src_size: usize,
        scratch_buffer: *mut c_void,
        algorithm: i32,
    ) -> usize;

    fn compression_encode_buffer(
        dst_buffer: *mut u8,
        dst_size: usize,
        src_buffer: *const u8,
        src_size: usize,
        scratch_buffer: *mut c_void,
        algorithm: i32,
    ) -> usize;
}

#[derive(Debug, Default)]
pub struct AppleBackend {
    portable: PortableBackend,
}

impl AppleBackend {
    fn decode_lzfse(&self, data: &[u8], size_hint: Option<usize>) -> Result<Vec<u8>> {
        let mut cap = size_hint
            .map(|n| n.saturating_add(1))
            .unwrap_or_else(|| data.len().saturating_mul(4).max(64 * 1024))
            .min(MAX_OUTPUT);
        loop {
            let mut out = vec![0u8; cap];
            // SAFETY: both buffers are valid for the sizes passed; a null
            // scratch buffer makes the library allocate its own.
            let n = unsafe {
                compression_decode_buffer(
                    out.as_mut_ptr(),
                    out.len(),
                    data.as_ptr(),
                    data.len(),
                    std::ptr::null_mut(),
                    COMPRESSION_LZFSE,
                )
            };
            if n == 0 {
                return Err(Error::CorruptStream { codec: "lzfse".into(), reason: "libcompression decode failed".into() });
            }
            if n < cap || cap >= MAX_OUTPUT {
                out.truncate(n);
                return Ok(out);
            }
            cap = cap.saturating_mul(2).min(MAX_OUTPUT);
            debug!("libcompression: growing output buffer to {cap} bytes");
        }
    }

    fn encode_lzfse(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut out = vec![0u8; data.len() + data.len() / 16 + 4096];
        // SAFETY: as above.
        let n = unsafe {
            compression_encode_buffer(
                out.as_mut_ptr(),
                out.len(),
                data.as_ptr(),
                data.len(),
                std::ptr::null_mut(),
                COMPRESSION_LZFSE,
            )
        };
        if n == 0 && !data.is_empty() {
            return Err(Error::CorruptStream { codec: "lzfse".into(), reason: "libcompression encode failed".into() });
        }
        out.truncate(n);
        Ok(out)
    }
}

impl CodecBackend for AppleBackend {
    fn name(&self) -> &'static str {
        "libcompression"
    }

    fn supports(&self, codec: CodecKind) -> bool {
        match codec {
            CodecKind::None | CodecKind::Lzfse => true,
            CodecKind::Lzss => self.portable.supports(codec),
        }
    }

    fn decompress(&self, codec: CodecKind, data: &[u8], size_hint: Option<usize>) -> Result<Vec<u8>> {
        match codec {
            CodecKind::Lzfse => self.decode_lzfse(data, size_hint),
            _ => self.portable.decompress(codec, data, size_hint),
        }
    }

    fn compress(&self, codec: CodecKind, data: &[u8]) -> Result<Vec<u8>> {
        match codec {
            CodecKind::Lzfse => self.encode_lzfse(data),
            _ => self.portable.compress(codec, data),
        }
    }
}
