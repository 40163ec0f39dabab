//! Keybags: the per-usage-class `(iv, key)` records carried by encrypted
//! payloads, stored as an OCTET STRING holding
//! `SEQUENCE OF SEQUENCE { INTEGER class, OCTET STRING iv, OCTET STRING key }`.

use der_parser::der::parse_der;
use log::debug;
use serde::Serialize;

use crate::crypto::{IV_LEN, KEY_LEN};
use crate::der::{self, TaggedValue};
use crate::error::{Error, Result};

/// Usage class of keys fused into production devices.
pub const PRODUCTION: u64 = 1;
/// Usage class of keys fused into development devices.
pub const DEVELOPMENT: u64 = 2;

#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct Keybag {
    pub usage_class: u64,
    #[serde(serialize_with = "hex_bytes")]
    pub iv: [u8; IV_LEN],
    #[serde(serialize_with = "hex_bytes")]
    pub key: [u8; KEY_LEN],
}

impl std::fmt::Debug for Keybag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keybag")
            .field("usage_class", &self.usage_class)
            .field("iv", &hex::encode(self.iv))
            .field("key", &hex::encode(self.key))
            .finish()
    }
}

fn hex_bytes<S: serde::Serializer>(b: &[u8], s: S) -> core::result::Result<S::Ok, S::Error> {
    s.serialize_str(&hex::encode(b))
}

impl Keybag {
    pub fn new(usage_class: u64, iv: [u8; IV_LEN], key: [u8; KEY_LEN]) -> Self {
        Keybag { usage_class, iv, key }
    }

    pub fn usage_name(&self) -> &'static str {
        match self.usage_class {
            PRODUCTION => "production",
            DEVELOPMENT => "development",
            _ => "unknown",
        }
    }
}

/// Ordered keybag entries; lookups return the first match.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct KeybagList(pub Vec<Keybag>);

impl KeybagList {
    pub fn new(entries: Vec<Keybag>) -> Self {
        KeybagList(entries)
    }

    pub fn entries(&self) -> &[Keybag] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn find(&self, usage_class: u64) -> Option<&Keybag> {
        self.0.iter().find(|k| k.usage_class == usage_class)
    }

    /// Decode the DER carried inside the payload's keybag OCTET STRING.
    pub fn parse(kbag_der: &[u8]) -> Result<Self> {
        const CTX: &str = "IM4P keybag";
        debug!("keybag: {} DER bytes", kbag_der.len());
        let (rest, obj) = parse_der(kbag_der).map_err(|e| Error::malformed(CTX, e.to_string()))?;
        if !rest.is_empty() {
            return Err(Error::malformed(CTX, format!("{} trailing bytes", rest.len())));
        }
        let seq = obj
            .as_sequence()
            .map_err(|_| Error::unexpected(CTX, "SEQUENCE", format!("{:?}", obj.header.tag())))?;

        let mut out = Vec::with_capacity(seq.len());
        for (idx, entry) in seq.iter().enumerate() {
            let es = entry
                .as_sequence()
                .map_err(|_| Error::unexpected(CTX, "SEQUENCE entry", format!("{:?}", entry.header.tag())))?;
            let [class, iv, key] = es.as_slice() else {
                return Err(Error::malformed(CTX, format!("entry {idx} has {} fields, expected 3", es.len())));
            };
            let usage_class = class
                .as_u64()
                .map_err(|_| Error::unexpected(CTX, "INTEGER usage class", format!("{:?}", class.header.tag())))?;
            let iv = fixed::<IV_LEN>(iv.as_slice().ok(), CTX, "iv")?;
            let key = fixed::<KEY_LEN>(key.as_slice().ok(), CTX, "key")?;
            debug!("keybag entry {idx}: class={usage_class}");
            out.push(Keybag { usage_class, iv, key });
        }
        Ok(KeybagList(out))
    }

    pub fn to_tagged(&self) -> TaggedValue {
        TaggedValue::sequence(
            self.0
                .iter()
                .map(|k| {
                    TaggedValue::sequence(vec![
                        TaggedValue::integer(k.usage_class),
                        TaggedValue::octets(k.iv.to_vec()),
                        TaggedValue::octets(k.key.to_vec()),
                    ])
                })
                .collect(),
        )
    }

    /// DER bytes suitable for the payload's keybag OCTET STRING.
    pub fn to_der(&self) -> Vec<u8> {
        der::encode(&[self.to_tagged()])
    }
}

fn fixed<const N: usize>(bytes: Option<&[u8]>, ctx: &str, field: &str) -> Result<[u8; N]> {
    let bytes = bytes.ok_or_else(|| Error::unexpected(ctx, format!("OCTET STRING {field}"), "other"))?;
    bytes
        .try_into()
        .map_err(|_| Error::malformed(ctx, format!("{field} is {} bytes, expected {N}", bytes.len())))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> KeybagList {
        KeybagList::new(vec![
            Keybag::new(PRODUCTION, [1; 16], [2; 32]),
            Keybag::new(DEVELOPMENT, [3; 16], [4; 32]),
            Keybag::new(PRODUCTION, [5; 16], [6; 32]),
        ])
    }

    #[test]
    fn parse_reads_back_encoded_list() {
        let list = sample();
        assert_eq!(KeybagList::parse(&list.to_der()).unwrap(), list);
    }

    #[test]
    fn first_match_wins() {
        let list = sample();
        assert_eq!(list.find(PRODUCTION).unwrap().iv, [1; 16]);
        assert_eq!(list.find(DEVELOPMENT).unwrap().key, [4; 32]);
        assert!(list.find(3).is_none());
    }

    #[test]
    fn short_key_is_rejected() {
        let bad = der::encode(&[TaggedValue::sequence(vec![TaggedValue::sequence(vec![
            TaggedValue::integer(1),
            TaggedValue::octets(vec![0; 16]),
            TaggedValue::octets(vec![0; 16]),
        ])])]);
        assert!(matches!(KeybagList::parse(&bad), Err(Error::MalformedEncoding { .. })));
        assert!(KeybagList::parse(b"\x04\x02ab").is_err());
        assert!(KeybagList::parse(b"not der").is_err());
    }
}
