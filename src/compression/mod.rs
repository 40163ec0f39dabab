//! Compression scheme detection and codec dispatch.
//!
//! The scheme is never stored in the payload; it is inferred from the first
//! bytes of the data. The byte-level codecs live behind [`CodecBackend`] so the
//! host-accelerated implementation and the portable one are interchangeable.

use log::debug;
use serde::Serialize;

use crate::error::{Error, Result};

pub mod lzfse;
pub mod lzss;
#[cfg(target_vendor = "apple")]
pub mod native;

/// Upper bound for output buffers grown while decoding without a size hint.
pub(crate) const MAX_OUTPUT: usize = 1 << 31;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
pub enum CodecKind {
    None,
    Lzfse,
    Lzss,
}

impl CodecKind {
    pub fn name(&self) -> &'static str {
        match self {
            CodecKind::None => "none",
            CodecKind::Lzfse => "lzfse",
            CodecKind::Lzss => "lzss",
        }
    }
}

impl std::fmt::Display for CodecKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Inspect the leading bytes against each codec's signature.
pub fn identify(data: &[u8]) -> CodecKind {
    if data.starts_with(lzss::MAGIC) {
        CodecKind::Lzss
    } else if lzfse::looks_like_lzfse(data) {
        CodecKind::Lzfse
    } else {
        CodecKind::None
    }
}

/// Byte-level codec implementation. Streams passed here are bare: container
/// headers such as `complzss` are handled by the dispatcher.
pub trait CodecBackend: Send + Sync {
    fn name(&self) -> &'static str;

    fn supports(&self, codec: CodecKind) -> bool;

    fn decompress(&self, codec: CodecKind, data: &[u8], size_hint: Option<usize>) -> Result<Vec<u8>>;

    fn compress(&self, codec: CodecKind, data: &[u8]) -> Result<Vec<u8>>;
}

/// Backend selection knobs. The process environment is read only by the
/// binary; the library takes this struct.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct DispatcherConfig {
    /// Use the portable codecs even where a platform backend exists.
    pub force_portable: bool,
}

impl DispatcherConfig {
    /// Interpret the text of the portable-codec toggle
    /// (`1`/`true`/`yes`/`on`, any case, mean set).
    pub fn from_env_value(value: Option<&str>) -> Self {
        let force_portable = value
            .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
            .unwrap_or(false);
        DispatcherConfig { force_portable }
    }
}

pub struct Dispatcher {
    backend: Box<dyn CodecBackend>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher").field("backend", &self.backend.name()).finish()
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Dispatcher::new(DispatcherConfig::default())
    }
}

impl Dispatcher {
    pub fn new(config: DispatcherConfig) -> Self {
        let backend = select_backend(config);
        debug!("compression backend: {} (force_portable={})", backend.name(), config.force_portable);
        Dispatcher { backend }
    }

    pub fn with_backend(backend: Box<dyn CodecBackend>) -> Self {
        Dispatcher { backend }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn identify(&self, data: &[u8]) -> CodecKind {
        identify(data)
    }

    pub fn decompress(&self, data: &[u8], size_hint: Option<usize>) -> Result<Vec<u8>> {
        self.decompress_with_trailer(data, size_hint).map(|(out, _)| out)
    }

    /// Like [`Dispatcher::decompress`], also returning bytes that followed the
    /// compressed stream inside its container (the blob some kernelcaches
    /// append after the `complzss` stream).
    pub fn decompress_with_trailer(
        &self,
        data: &[u8],
        size_hint: Option<usize>,
    ) -> Result<(Vec<u8>, Option<Vec<u8>>)> {
        let codec = identify(data);
        debug!("decompress: identified {} ({} bytes)", codec, data.len());
        match codec {
            CodecKind::None => Ok((data.to_vec(), None)),
            CodecKind::Lzfse => {
                self.require(codec)?;
                Ok((self.backend.decompress(codec, data, size_hint)?, None))
            }
            CodecKind::Lzss => {
                self.require(codec)?;
                let frame = lzss::Complzss::parse(data)?;
                let raw = self.backend.decompress(codec, frame.stream, Some(frame.header.uncompressed_size as usize))?;
                let out = frame.header.check(raw)?;
                let trailer = (!frame.trailer.is_empty()).then(|| frame.trailer.to_vec());
                Ok((out, trailer))
            }
        }
    }

    pub fn compress(&self, data: &[u8], codec: CodecKind) -> Result<Vec<u8>> {
        self.compress_with_trailer(data, codec, None)
    }

    pub fn compress_with_trailer(&self, data: &[u8], codec: CodecKind, trailer: Option<&[u8]>) -> Result<Vec<u8>> {
        match codec {
            CodecKind::None => Ok(data.to_vec()),
            CodecKind::Lzfse => {
                self.require(codec)?;
                self.backend.compress(codec, data)
            }
            CodecKind::Lzss => {
                self.require(codec)?;
                let stream = self.backend.compress(codec, data)?;
                lzss::Complzss::wrap(data, &stream, trailer.unwrap_or_default())
            }
        }
    }

    fn require(&self, codec: CodecKind) -> Result<()> {
        if self.backend.supports(codec) {
            Ok(())
        } else {
            Err(Error::UnsupportedCodec {
                codec: codec.name().into(),
                detail: format!(" (backend {})", self.backend.name()),
            })
        }
    }
}

fn select_backend(config: DispatcherConfig) -> Box<dyn CodecBackend> {
    #[cfg(target_vendor = "apple")]
    {
        if !config.force_portable {
            return Box::new(native::AppleBackend::default());
        }
    }
    let _ = config;
    Box::new(PortableBackend)
}

/// Pure library codecs available on every host.
#[derive(Copy, Clone, Debug, Default)]
pub struct PortableBackend;

impl CodecBackend for PortableBackend {
    fn name(&self) -> &'static str {
        "portable"
    }

    fn supports(&self, codec: CodecKind) -> bool {
        match codec {
            CodecKind::None => true,
            CodecKind::Lzfse => cfg!(feature = "lzfse"),
            CodecKind::Lzss => true,
        }
    }

    fn decompress(&self, codec: CodecKind, data: &[u8], size_hint: Option<usize>) -> Result<Vec<u8>> {
        match codec {
            CodecKind::None => Ok(data.to_vec()),
            CodecKind::Lzfse => lzfse::decompress(data, size_hint),
            CodecKind::Lzss => lzss::decompress(data, size_hint),
        }
    }

    fn compress(&self, codec: CodecKind, data: &[u8]) -> Result<Vec<u8>> {
        match codec {
            CodecKind::None => Ok(data.to_vec()),
            CodecKind::Lzfse => lzfse::compress(data),
            CodecKind::Lzss => lzss::compress(data),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identify_each_magic() {
        assert_eq!(identify(b""), CodecKind::None);
        assert_eq!(identify(b"\xcf\xfa\xed\xfe"), CodecKind::None);
        assert_eq!(identify(b"bvx2\x00\x10\x00\x00"), CodecKind::Lzfse);
        assert_eq!(identify(b"bvx-\x03\x00\x00\x00abc"), CodecKind::Lzfse);
        assert_eq!(identify(b"bvx$"), CodecKind::Lzfse);
        assert_eq!(identify(b"complzss\x00\x00\x00\x00"), CodecKind::Lzss);
        // prefixes of a magic are not a match
        assert_eq!(identify(b"bvx"), CodecKind::None);
        assert_eq!(identify(b"compl"), CodecKind::None);
    }

    #[test]
    fn env_value_parsing() {
        assert!(!DispatcherConfig::from_env_value(None).force_portable);
        assert!(DispatcherConfig::from_env_value(Some("1")).force_portable);
        assert!(DispatcherConfig::from_env_value(Some(" TRUE ")).force_portable);
        assert!(!DispatcherConfig::from_env_value(Some("0")).force_portable);
        assert!(!DispatcherConfig::from_env_value(Some("")).force_portable);
    }

    #[test]
    fn forced_portable_backend_is_selected() {
        let d = Dispatcher::new(DispatcherConfig { force_portable: true });
        assert_eq!(d.backend_name(), "portable");
    }

    struct NothingBackend;

    impl CodecBackend for NothingBackend {
        fn name(&self) -> &'static str {
            "nothing"
        }
        fn supports(&self, codec: CodecKind) -> bool {
            codec == CodecKind::None
        }
        fn decompress(&self, _: CodecKind, _: &[u8], _: Option<usize>) -> Result<Vec<u8>> {
            unreachable!()
        }
        fn compress(&self, _: CodecKind, _: &[u8]) -> Result<Vec<u8>> {
            unreachable!()
        }
    }

    #[test]
    fn missing_backend_is_unsupported() {
        let d = Dispatcher::with_backend(Box::new(NothingBackend));
        let err = d.decompress(b"bvx2\x00\x00\x00\x00", None).unwrap_err();
        assert!(matches!(err, Error::UnsupportedCodec { ref codec, .. } if codec == "lzfse"));
        let err = d.compress(b"abc", CodecKind::Lzss).unwrap_err();
        assert!(matches!(err, Error::UnsupportedCodec { .. }));
        assert_eq!(d.compress(b"abc", CodecKind::None).unwrap(), b"abc");
    }

    #[test]
    fn lzss_round_trip_keeps_trailer() {
        let d = Dispatcher::new(DispatcherConfig { force_portable: true });
        let body: Vec<u8> = b"\xcf\xfa\xed\xfe kernelcache "
            .iter()
            .cycle()
            .take(10_000)
            .copied()
            .collect();
        let packed = d.compress_with_trailer(&body, CodecKind::Lzss, Some(b"KPP!")).unwrap();
        assert_eq!(identify(&packed), CodecKind::Lzss);
        let (out, trailer) = d.decompress_with_trailer(&packed, None).unwrap();
        assert_eq!(out, body);
        assert_eq!(trailer.as_deref(), Some(&b"KPP!"[..]));
    }

    #[cfg(feature = "lzfse")]
    #[test]
    fn lzfse_round_trip() {
        let d = Dispatcher::new(DispatcherConfig { force_portable: true });
        let body: Vec<u8> = (0..50_000u32).map(|i| (i % 251) as u8).collect();
        let packed = d.compress(&body, CodecKind::Lzfse).unwrap();
        assert_eq!(identify(&packed), CodecKind::Lzfse);
        assert_eq!(d.decompress(&packed, None).unwrap(), body);
        assert_eq!(d.decompress(&packed, Some(body.len())).unwrap(), body);
    }

    #[test]
    fn lzss_checksum_mismatch_is_corrupt() {
        let d = Dispatcher::new(DispatcherConfig { force_portable: true });
        let mut packed = d.compress(&[7u8; 4096], CodecKind::Lzss).unwrap();
        packed[8] ^= 0xFF; // adler32 field
        let err = d.decompress(&packed, None).unwrap_err();
        assert!(matches!(err, Error::CorruptStream { .. }));
    }
}
