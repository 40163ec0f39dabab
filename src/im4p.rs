//! Payload (IM4P): `SEQUENCE { "IM4P", fourcc, description, OCTET data,
//! [OCTET keybag], [SEQUENCE { INTEGER method, INTEGER size }], ... }`.
//!
//! Trailing elements that are none of the above (newer payloads carry a
//! `[0] { SEQUENCE { "PAYP", SET { ... } } }` property block) are kept as-is
//! and written back unchanged.

use log::{debug, warn};
use serde::Serialize;

use crate::compression::{identify, CodecKind, Dispatcher};
use crate::crypto::{self, AesMode};
use crate::der::{self, TaggedValue};
use crate::error::{Error, Result};
use crate::fourcc::FourCC;
use crate::keybag::KeybagList;
use crate::property::expect_label;

/// Method number of the compression element for LZFSE.
pub const COMPRESSION_LZFSE: u64 = 1;

/// Optional trailing `SEQUENCE { INTEGER method, INTEGER uncompressed_size }`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CompressionInfo {
    pub method: u64,
    pub uncompressed_size: Option<u64>,
}

impl CompressionInfo {
    fn parse(v: &TaggedValue) -> Result<Self> {
        const CTX: &str = "IM4P compression";
        match v.expect_sequence(CTX)? {
            [method] => Ok(CompressionInfo { method: method.as_u64(CTX)?, uncompressed_size: None }),
            [method, size] => Ok(CompressionInfo {
                method: method.as_u64(CTX)?,
                uncompressed_size: Some(size.as_u64(CTX)?),
            }),
            other => Err(Error::malformed(CTX, format!("{} elements", other.len()))),
        }
    }

    fn to_tagged(self) -> TaggedValue {
        let mut seq = vec![TaggedValue::integer(self.method)];
        seq.extend(self.uncompressed_size.map(TaggedValue::integer));
        TaggedValue::sequence(seq)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Payload {
    pub fourcc: FourCC,
    pub description: String,
    pub data: Vec<u8>,
    pub kbag: Option<KeybagList>,
    /// Trailing bytes outside the payload proper: an unrecognised trailing
    /// OCTET STRING, or the blob that followed a `complzss` stream.
    pub extra_data: Option<Vec<u8>>,
    pub compression: Option<CompressionInfo>,
    /// Trailing elements this crate does not interpret, in input order.
    pub unknown_elements: Vec<TaggedValue>,
}

/// What `info` reports about a payload.
#[derive(Clone, Debug, Serialize)]
pub struct PayloadSummary {
    pub fourcc: FourCC,
    pub component: Option<&'static str>,
    pub description: String,
    pub size: usize,
    pub codec: CodecKind,
    pub encrypted: bool,
    pub keybags: Option<KeybagList>,
    pub compression: Option<CompressionInfo>,
    pub extra_data_len: Option<usize>,
    pub unknown_elements: usize,
}

impl Payload {
    pub fn new(fourcc: FourCC, description: impl Into<String>, data: Vec<u8>) -> Self {
        Payload {
            fourcc,
            description: description.into(),
            data,
            kbag: None,
            extra_data: None,
            compression: None,
            unknown_elements: Vec::new(),
        }
    }

    /// Builder entry point taking the fourcc as text.
    pub fn build(fourcc: &str, description: &str, data: Vec<u8>, kbag: Option<KeybagList>) -> Result<Self> {
        let mut p = Payload::new(FourCC::parse(fourcc)?, description, data);
        p.kbag = kbag;
        Ok(p)
    }

    pub fn parse(bytes: &[u8]) -> Result<Self> {
        match der::decode(bytes)?.as_slice() {
            [v] => Payload::from_tagged(v),
            other => Err(Error::malformed("IM4P", format!("{} top-level elements", other.len()))),
        }
    }

    pub fn from_tagged(v: &TaggedValue) -> Result<Self> {
        let seq = v.expect_sequence("IM4P")?;
        let [label, fourcc, description, data, rest @ ..] = seq else {
            return Err(Error::malformed("IM4P", format!("{} elements, expected at least 4", seq.len())));
        };
        expect_label(label, FourCC::IM4P)?;
        let fourcc = FourCC::parse(fourcc.as_ia5("IM4P.fourcc")?)?;
        let description = description.as_ia5("IM4P.description")?.to_string();
        let data = data.as_octets("IM4P.data")?.to_vec();
        debug!("IM4P {fourcc} {description:?}: {} bytes", data.len());

        let mut p = Payload::new(fourcc, description, data);
        for el in rest {
            if el.is_universal(der::OCTET_STRING) {
                let bytes = el.as_octets("IM4P")?;
                if p.kbag.is_none() {
                    match KeybagList::parse(bytes) {
                        Ok(list) => {
                            debug!("IM4P keybag with {} entries", list.entries().len());
                            p.kbag = Some(list);
                            continue;
                        }
                        Err(e) => debug!("IM4P trailing OCTET STRING is not a keybag: {e}"),
                    }
                }
                if p.extra_data.is_none() {
                    p.extra_data = Some(bytes.to_vec());
                    continue;
                }
            } else if el.is_universal(der::SEQUENCE) && p.compression.is_none() {
                match CompressionInfo::parse(el) {
                    Ok(info) => {
                        debug!("IM4P compression: method={} size={:?}", info.method, info.uncompressed_size);
                        p.compression = Some(info);
                        continue;
                    }
                    Err(e) => debug!("IM4P trailing SEQUENCE is not compression info: {e}"),
                }
            }
            debug!("IM4P: keeping unrecognised trailing {}", el.describe());
            p.unknown_elements.push(el.clone());
        }
        Ok(p)
    }

    /// Canonical element order: keybag, extra data, compression info, then
    /// the unrecognised elements.
    pub fn to_tagged(&self) -> TaggedValue {
        let mut seq = vec![
            TaggedValue::ia5(FourCC::IM4P.as_str()),
            TaggedValue::ia5(self.fourcc.as_str()),
            TaggedValue::ia5(&self.description),
            TaggedValue::octets(self.data.clone()),
        ];
        if let Some(kbag) = &self.kbag {
            seq.push(TaggedValue::octets(kbag.to_der()));
        }
        if let Some(extra) = &self.extra_data {
            seq.push(TaggedValue::octets(extra.clone()));
        }
        if let Some(info) = self.compression {
            seq.push(info.to_tagged());
        }
        seq.extend(self.unknown_elements.iter().cloned());
        TaggedValue::sequence(seq)
    }

    pub fn to_der(&self) -> Vec<u8> {
        self.to_tagged().to_der()
    }

    pub fn codec(&self) -> CodecKind {
        identify(&self.data)
    }

    pub fn is_encrypted(&self) -> bool {
        self.kbag.as_ref().is_some_and(|k| !k.is_empty())
    }

    pub fn summary(&self) -> PayloadSummary {
        PayloadSummary {
            fourcc: self.fourcc,
            component: self.fourcc.description(),
            description: self.description.clone(),
            size: self.data.len(),
            codec: self.codec(),
            encrypted: self.is_encrypted(),
            keybags: self.kbag.clone(),
            compression: self.compression,
            extra_data_len: self.extra_data.as_ref().map(Vec::len),
            unknown_elements: self.unknown_elements.len(),
        }
    }

    /// AES-256-CBC decrypt `data`; the keybag is dropped afterwards.
    pub fn decrypt(&mut self, key: &[u8], iv: &[u8]) -> Result<()> {
        self.decrypt_with_mode(key, iv, AesMode::Cbc)
    }

    pub fn decrypt_with_mode(&mut self, key: &[u8], iv: &[u8], mode: AesMode) -> Result<()> {
        self.data = crypto::decrypt_aes(&self.data, key, iv, mode)?;
        self.kbag = None;
        debug!("IM4P {}: decrypted {} bytes ({mode:?})", self.fourcc, self.data.len());
        Ok(())
    }

    /// Decrypt with the first keybag entry of `usage_class`.
    pub fn decrypt_with_keybag(&mut self, usage_class: u64) -> Result<()> {
        let entry = self
            .kbag
            .as_ref()
            .and_then(|k| k.find(usage_class))
            .cloned()
            .ok_or(Error::KeybagNotFound(usage_class))?;
        debug!("IM4P {}: using {} keybag", self.fourcc, entry.usage_name());
        self.decrypt(&entry.key, &entry.iv)
    }

    /// Replace `data` with its decompressed form. A no-op for raw data.
    pub fn decompress(&mut self, dispatcher: &Dispatcher) -> Result<()> {
        let codec = self.codec();
        if codec == CodecKind::None {
            return Ok(());
        }
        if self.is_encrypted() {
            warn!("IM4P {}: decompressing data that still carries a keybag", self.fourcc);
        }
        let hint = self
            .compression
            .and_then(|c| c.uncompressed_size)
            .and_then(|n| usize::try_from(n).ok());
        let (out, trailer) = dispatcher.decompress_with_trailer(&self.data, hint)?;
        if let (Some(info), Ok(n)) = (self.compression, u64::try_from(out.len())) {
            if info.uncompressed_size.is_some_and(|want| want != n) {
                warn!("IM4P {}: compression element says {:?} bytes, got {n}", self.fourcc, info.uncompressed_size);
            }
        }
        debug!("IM4P {}: {codec} {} -> {} bytes", self.fourcc, self.data.len(), out.len());
        self.data = out;
        self.compression = None;
        if trailer.is_some() {
            self.extra_data = trailer;
        }
        Ok(())
    }

    /// Compress `data` with `codec`. Data that is already compressed is
    /// refused unless `overwrite` is set, in which case it is decompressed
    /// first.
    pub fn compress(&mut self, dispatcher: &Dispatcher, codec: CodecKind, overwrite: bool) -> Result<()> {
        let current = self.codec();
        if current != CodecKind::None {
            if !overwrite {
                return Err(Error::AlreadyCompressed { codec: current.name().into() });
            }
            self.decompress(dispatcher)?;
        }
        match codec {
            CodecKind::None => {}
            CodecKind::Lzss => {
                let trailer = self.extra_data.take();
                self.data = dispatcher.compress_with_trailer(&self.data, codec, trailer.as_deref())?;
                self.compression = None;
            }
            CodecKind::Lzfse => {
                let size = self.data.len() as u64;
                self.data = dispatcher.compress(&self.data, codec)?;
                self.compression = Some(CompressionInfo { method: COMPRESSION_LZFSE, uncompressed_size: Some(size) });
            }
        }
        Ok(())
    }
}
