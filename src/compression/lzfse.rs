//! LZFSE streams.

#[cfg(feature = "lzfse")]
use log::debug;

use crate::error::{Error, Result};
#[cfg(feature = "lzfse")]
use super::MAX_OUTPUT;

const BLOCK_MAGICS: [&[u8; 4]; 4] = [b"bvx2", b"bvx1", b"bvxn", b"bvx-"];
const END_OF_STREAM: &[u8; 4] = b"bvx$";

/// A stream opens with a block header, or is nothing but the end marker.
pub fn looks_like_lzfse(buf: &[u8]) -> bool {
    (buf.len() >= 4 && BLOCK_MAGICS.iter().any(|m| buf.starts_with(*m))) || buf == END_OF_STREAM
}

#[cfg(feature = "lzfse")]
pub fn decompress(buf: &[u8], size_hint: Option<usize>) -> Result<Vec<u8>> {
    // The decoder cannot tell "exactly full" from "too small", so leave one spare byte.
    let mut cap = size_hint
        .map(|n| n.saturating_add(1))
        .unwrap_or_else(|| buf.len().saturating_mul(4).max(64 * 1024))
        .min(MAX_OUTPUT);
    loop {
        let mut output = vec![0u8; cap];
        match lzfse::decode_buffer(buf, &mut output) {
            // the decoder reports failure as an empty result
            Ok(0) if buf != END_OF_STREAM => {
                return Err(Error::CorruptStream { codec: "lzfse".into(), reason: "decoder produced no output".into() });
            }
            Ok(n) => {
                output.truncate(n);
                debug!("lzfse: {} -> {} bytes", buf.len(), n);
                return Ok(output);
            }
            Err(lzfse::Error::BufferTooSmall) if cap < MAX_OUTPUT => {
                cap = cap.saturating_mul(2).min(MAX_OUTPUT);
                debug!("lzfse: growing output buffer to {cap} bytes");
            }
            Err(e) => {
                return Err(Error::CorruptStream { codec: "lzfse".into(), reason: format!("{e:?}") });
            }
        }
    }
}

#[cfg(feature = "lzfse")]
pub fn compress(data: &[u8]) -> Result<Vec<u8>> {
    // worst case is a raw (bvx-) block plus headers
    let mut output = vec![0u8; data.len() + data.len() / 16 + 4096];
    let n = lzfse::encode_buffer(data, &mut output)
        .map_err(|e| Error::CorruptStream { codec: "lzfse".into(), reason: format!("encode: {e:?}") })?;
    output.truncate(n);
    Ok(output)
}

#[cfg(not(feature = "lzfse"))]
pub fn decompress(_buf: &[u8], _size_hint: Option<usize>) -> Result<Vec<u8>> {
    Err(Error::UnsupportedCodec { codec: "lzfse".into(), detail: " (built without the lzfse feature)".into() })
}

#[cfg(not(feature = "lzfse"))]
pub fn compress(_data: &[u8]) -> Result<Vec<u8>> {
    Err(Error::UnsupportedCodec { codec: "lzfse".into(), detail: " (built without the lzfse feature)".into() })
}
