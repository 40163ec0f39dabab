//! `complzss` framing and the LZSS stream codec.
//!
//! Frame layout (big-endian): magic `complzss`, adler32 of the decompressed
//! data, decompressed size, compressed size, version (1), zero padding up to
//! 0x180, the LZSS stream, then optional trailing bytes that are not part of
//! the stream.

use log::{debug, warn};

use crate::error::{Error, Result};

pub const MAGIC: &[u8; 8] = b"complzss";
pub const HEADER_LEN: usize = 0x180;
const VERSION: u32 = 1;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ComplzssHeader {
    pub adler32: u32,
    pub uncompressed_size: u32,
    pub compressed_size: u32,
    pub version: u32,
}

impl ComplzssHeader {
    /// Validate a decoded stream against the header's size and checksum.
    pub fn check(&self, mut out: Vec<u8>) -> Result<Vec<u8>> {
        let want = self.uncompressed_size as usize;
        if out.len() < want {
            return Err(corrupt(format!("decoded {} bytes, header says {}", out.len(), want)));
        }
        out.truncate(want);
        let sum = adler32(&out);
        if sum != self.adler32 {
            return Err(corrupt(format!("adler32 {:08x} != header {:08x}", sum, self.adler32)));
        }
        Ok(out)
    }
}

pub struct Complzss<'a> {
    pub header: ComplzssHeader,
    pub stream: &'a [u8],
    pub trailer: &'a [u8],
}

impl<'a> Complzss<'a> {
    pub fn parse(data: &'a [u8]) -> Result<Self> {
        if data.len() < HEADER_LEN || !data.starts_with(MAGIC) {
            return Err(corrupt("truncated complzss header"));
        }
        let be = |off: usize| u32::from_be_bytes([data[off], data[off + 1], data[off + 2], data[off + 3]]);
        let header = ComplzssHeader {
            adler32: be(0x08),
            uncompressed_size: be(0x0C),
            compressed_size: be(0x10),
            version: be(0x14),
        };
        if header.version != VERSION {
            warn!("complzss version {} (expected {})", header.version, VERSION);
        }
        let body = &data[HEADER_LEN..];
        let clen = header.compressed_size as usize;
        if clen > body.len() {
            return Err(corrupt(format!("stream needs {} bytes, {} present", clen, body.len())));
        }
        let (stream, trailer) = body.split_at(clen);
        if !trailer.is_empty() {
            debug!("complzss: {} trailing bytes after stream", trailer.len());
        }
        Ok(Complzss { header, stream, trailer })
    }

    pub fn wrap(plain: &[u8], stream: &[u8], trailer: &[u8]) -> Result<Vec<u8>> {
        let size = |n: usize, what: &str| {
            u32::try_from(n).map_err(|_| Error::CorruptStream {
                codec: "lzss".into(),
                reason: format!("{what} of {n} bytes exceeds the complzss header range"),
            })
        };
        let mut out = Vec::with_capacity(HEADER_LEN + stream.len() + trailer.len());
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&adler32(plain).to_be_bytes());
        out.extend_from_slice(&size(plain.len(), "input")?.to_be_bytes());
        out.extend_from_slice(&size(stream.len(), "stream")?.to_be_bytes());
        out.extend_from_slice(&VERSION.to_be_bytes());
        out.resize(HEADER_LEN, 0);
        out.extend_from_slice(stream);
        out.extend_from_slice(trailer);
        Ok(out)
    }
}

fn corrupt(reason: impl Into<String>) -> Error {
    Error::CorruptStream { codec: "lzss".into(), reason: reason.into() }
}

pub fn adler32(data: &[u8]) -> u32 {
    const MOD: u32 = 65521;
    let (mut a, mut b) = (1u32, 0u32);
    // 5552 is the largest run that cannot overflow b before reducing
    for chunk in data.chunks(5552) {
        for &x in chunk {
            a += x as u32;
            b += a;
        }
        a %= MOD;
        b %= MOD;
    }
    (b << 16) | a
}

// Stream format read by the boot chain and xnu: a 4 KiB ring pre-filled with
// spaces, writing from N - F. Each flag byte covers eight items, LSB first; a
// set bit is a literal, a clear bit a two-byte reference holding a 12-bit
// absolute ring position and a 4-bit length minus three.
const N: usize = 4096;
const F: usize = 18;
const MIN_MATCH: usize = 3;
const RING_START: usize = N - F;
const HASH_BITS: u32 = 14;
const MAX_CHAIN: usize = 256;

pub fn decompress(stream: &[u8], size_hint: Option<usize>) -> Result<Vec<u8>> {
    let mut ring = [b' '; N];
    let mut r = RING_START;
    let limit = size_hint.unwrap_or(usize::MAX);
    // a two-byte reference expands to at most F bytes
    let bound = stream.len().saturating_mul(F / 2).min(super::MAX_OUTPUT);
    let mut out = Vec::with_capacity(size_hint.map_or(bound, |n| n.min(bound)));
    let mut src = stream.iter().copied();
    let mut flags: u32 = 0;
    while out.len() < limit {
        flags >>= 1;
        if flags & 0x100 == 0 {
            let Some(c) = src.next() else { break };
            flags = u32::from(c) | 0xFF00;
        }
        if flags & 1 != 0 {
            let Some(c) = src.next() else { break };
            out.push(c);
            ring[r] = c;
            r = (r + 1) & (N - 1);
        } else {
            let (Some(lo), Some(hi)) = (src.next(), src.next()) else { break };
            let pos = usize::from(lo) | (usize::from(hi & 0xF0) << 4);
            let len = usize::from(hi & 0x0F) + MIN_MATCH;
            for k in 0..len {
                let c = ring[(pos + k) & (N - 1)];
                out.push(c);
                ring[r] = c;
                r = (r + 1) & (N - 1);
            }
        }
    }
    if out.len() > limit {
        out.truncate(limit);
    }
    Ok(out)
}

/// Greedy encoder over hash chains. References only reach back to bytes
/// already emitted, so any conforming decoder reproduces `data`.
pub fn compress(data: &[u8]) -> Result<Vec<u8>> {
    let hash = |p: usize| {
        ((usize::from(data[p]) << 6) ^ (usize::from(data[p + 1]) << 3) ^ usize::from(data[p + 2])) & ((1 << HASH_BITS) - 1)
    };
    let mut head = vec![usize::MAX; 1 << HASH_BITS];
    let mut prev = vec![usize::MAX; data.len()];
    let mut out = Vec::with_capacity(data.len() / 2 + 16);
    let mut flag_pos = 0;
    let mut bit = 8;
    let mut p = 0;
    while p < data.len() {
        if bit == 8 {
            flag_pos = out.len();
            out.push(0u8);
            bit = 0;
        }
        let (mut best_len, mut best_pos) = (0, 0);
        if p + MIN_MATCH <= data.len() {
            let max = F.min(data.len() - p);
            let mut cand = head[hash(p)];
            let mut chain = 0;
            while cand != usize::MAX && p - cand <= N - F && chain < MAX_CHAIN {
                let len = (0..max).take_while(|&k| data[cand + k] == data[p + k]).count();
                if len > best_len {
                    best_len = len;
                    best_pos = cand;
                    if len == max {
                        break;
                    }
                }
                cand = prev[cand];
                chain += 1;
            }
        }
        let step = if best_len >= MIN_MATCH {
            let slot = (RING_START + best_pos) & (N - 1);
            out.push((slot & 0xFF) as u8);
            out.push((((slot >> 4) & 0xF0) | (best_len - MIN_MATCH)) as u8);
            best_len
        } else {
            out[flag_pos] |= 1 << bit;
            out.push(data[p]);
            1
        };
        bit += 1;
        for q in p..p + step {
            if q + MIN_MATCH <= data.len() {
                let h = hash(q);
                prev[q] = head[h];
                head[h] = q;
            }
        }
        p += step;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adler32_known_values() {
        assert_eq!(adler32(b""), 1);
        assert_eq!(adler32(b"Wikipedia"), 0x11E6_0398);
        let big = vec![0xFFu8; 100_000];
        // reference value computed with zlib
        assert_eq!(adler32(&big), 0x149A_302C);
    }

    #[test]
    fn frame_parse_splits_trailer() {
        let framed = Complzss::wrap(b"abc", b"STREAM", b"TAIL").unwrap();
        assert_eq!(framed.len(), HEADER_LEN + 10);
        let f = Complzss::parse(&framed).unwrap();
        assert_eq!(f.stream, b"STREAM");
        assert_eq!(f.trailer, b"TAIL");
        assert_eq!(f.header.uncompressed_size, 3);
        assert_eq!(f.header.adler32, adler32(b"abc"));
    }

    #[test]
    fn short_frame_is_corrupt() {
        let mut framed = Complzss::wrap(b"abc", b"STREAM", b"").unwrap();
        framed.truncate(HEADER_LEN + 2);
        assert!(matches!(Complzss::parse(&framed), Err(Error::CorruptStream { .. })));
        assert!(matches!(Complzss::parse(b"complzss"), Err(Error::CorruptStream { .. })));
    }

    // emitted by the reference (Okumura) encoder the kernelcache tooling uses
    const REFERENCE_TEXT: &[u8] = b"IMG4 kernelcache kernelcache kernelcache, im4p im4p im4p!";
    const REFERENCE_STREAM: &str = "ff494d4734206b6572ff6e656c6361636865fcf2ff04032c20696d347002170721";

    #[test]
    fn decodes_hand_built_stream() {
        // literals "ab", then ring position 0xFEE (where "ab" landed), length 6
        assert_eq!(decompress(&[0x03, b'a', b'b', 0xEE, 0xF3], None).unwrap(), b"abababab");
        // a reference before any literal reads the space-filled ring
        assert_eq!(decompress(&[0x00, 0x00, 0x00], None).unwrap(), b"   ");
        // size hint stops mid-reference
        assert_eq!(decompress(&[0x03, b'a', b'b', 0xEE, 0xF3], Some(5)).unwrap(), b"ababa");
    }

    #[test]
    fn decodes_reference_encoder_output() {
        let stream = hex::decode(REFERENCE_STREAM).unwrap();
        assert_eq!(decompress(&stream, None).unwrap(), REFERENCE_TEXT);
        assert_eq!(decompress(&stream, Some(REFERENCE_TEXT.len())).unwrap(), REFERENCE_TEXT);

        let ours = compress(REFERENCE_TEXT).unwrap();
        assert!(ours.len() <= stream.len());
        assert_eq!(decompress(&ours, None).unwrap(), REFERENCE_TEXT);
    }

    #[test]
    fn round_trip_past_the_ring() {
        let mut data = Vec::new();
        for i in 0..9000u32 {
            data.extend_from_slice(format!("{:03} ", (i * 7) % 211).as_bytes());
        }
        data.extend((0..=255u8).cycle().take(5000));
        let packed = compress(&data).unwrap();
        assert!(packed.len() < data.len() / 2);
        assert_eq!(decompress(&packed, Some(data.len())).unwrap(), data);
        assert!(compress(b"").unwrap().is_empty());
        assert_eq!(decompress(&compress(b"xy").unwrap(), None).unwrap(), b"xy");
    }
}
