//! Manifest and restore-info properties.
//!
//! Each property is encoded as `[PRIVATE fourcc] { SEQUENCE { IA5String fourcc, value } }`.
//! Values decode to a typed variant only when re-encoding reproduces the
//! original bytes exactly; anything else is kept as the raw element so the
//! signed body always re-serializes byte for byte.

use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};

use crate::der::{self, TagClass, TaggedValue};
use crate::error::{Error, Result};
use crate::fourcc::FourCC;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PropertyValue {
    Integer(u64),
    Boolean(bool),
    String(String),
    Data(Vec<u8>),
    /// Any other encoding (nested sequences, oversized integers, ...).
    Raw(TaggedValue),
}

impl PropertyValue {
    pub fn from_der(v: &TaggedValue) -> Self {
        if v.class == TagClass::Universal {
            if let Some(bytes) = v.bytes() {
                match v.tag {
                    der::INTEGER => {
                        if let Some(n) = der::decode_unsigned(bytes) {
                            if der::encode_unsigned(n) == bytes {
                                return PropertyValue::Integer(n);
                            }
                        }
                    }
                    der::BOOLEAN => match bytes {
                        [0x00] => return PropertyValue::Boolean(false),
                        [0xFF] => return PropertyValue::Boolean(true),
                        _ => {}
                    },
                    der::IA5_STRING if bytes.is_ascii() => {
                        if let Ok(s) = std::str::from_utf8(bytes) {
                            return PropertyValue::String(s.to_string());
                        }
                    }
                    der::OCTET_STRING => return PropertyValue::Data(bytes.to_vec()),
                    _ => {}
                }
            }
        }
        PropertyValue::Raw(v.clone())
    }

    pub fn to_der(&self) -> TaggedValue {
        match self {
            PropertyValue::Integer(n) => TaggedValue::integer(*n),
            PropertyValue::Boolean(b) => TaggedValue::boolean(*b),
            PropertyValue::String(s) => TaggedValue::ia5(s),
            PropertyValue::Data(d) => TaggedValue::octets(d.clone()),
            PropertyValue::Raw(v) => v.clone(),
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            PropertyValue::Integer(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PropertyValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            PropertyValue::Data(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::String(s) => Some(s),
            _ => None,
        }
    }
}

impl Serialize for PropertyValue {
    fn serialize<S: Serializer>(&self, s: S) -> core::result::Result<S::Ok, S::Error> {
        let mut st = s.serialize_struct("PropertyValue", 2)?;
        match self {
            PropertyValue::Integer(n) => {
                st.serialize_field("type", "Integer")?;
                st.serialize_field("value", n)?;
            }
            PropertyValue::Boolean(b) => {
                st.serialize_field("type", "Boolean")?;
                st.serialize_field("value", b)?;
            }
            PropertyValue::String(v) => {
                st.serialize_field("type", "String")?;
                st.serialize_field("value", v)?;
            }
            PropertyValue::Data(d) => {
                st.serialize_field("type", "OctetString")?;
                st.serialize_field("value", &hex::encode(d))?;
            }
            PropertyValue::Raw(v) => {
                st.serialize_field("type", &v.describe())?;
                st.serialize_field("value", &hex::encode(v.to_der()))?;
            }
        }
        st.end()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Property {
    pub name: FourCC,
    pub value: PropertyValue,
}

impl Property {
    pub fn new(name: FourCC, value: PropertyValue) -> Self {
        Property { name, value }
    }

    pub fn parse(v: &TaggedValue, ctx: &str) -> Result<Self> {
        let inner = v.expect_wrapper(TagClass::Private, ctx)?;
        let [seq] = inner else {
            return Err(Error::malformed(ctx, format!("property wrapper holds {} elements", inner.len())));
        };
        let (name, value) = parse_named_pair(seq, ctx)?;
        if name.as_u32() != v.tag {
            return Err(Error::unexpected(
                ctx,
                format!("[PRIVATE {:#x}] for {name}", name.as_u32()),
                v.describe(),
            ));
        }
        Ok(Property { name, value: PropertyValue::from_der(value) })
    }

    pub fn to_der(&self) -> TaggedValue {
        named_wrapper(self.name, vec![self.value.to_der()])
    }
}

/// `SEQUENCE { IA5String fourcc, value }`
pub(crate) fn parse_named_pair<'a>(seq: &'a TaggedValue, ctx: &str) -> Result<(FourCC, &'a TaggedValue)> {
    match seq.expect_sequence(ctx)? {
        [name, value] => {
            let name = FourCC::parse(name.as_ia5(ctx)?)?;
            Ok((name, value))
        }
        other => Err(Error::malformed(ctx, format!("expected name/value pair, got {} elements", other.len()))),
    }
}

/// `[PRIVATE fourcc] { SEQUENCE { IA5String fourcc, rest.. } }`
pub(crate) fn named_wrapper(name: FourCC, rest: Vec<TaggedValue>) -> TaggedValue {
    let mut seq = Vec::with_capacity(1 + rest.len());
    seq.push(TaggedValue::ia5(name.as_str()));
    seq.extend(rest);
    TaggedValue::constructed(TagClass::Private, name.as_u32(), vec![TaggedValue::sequence(seq)])
}

pub(crate) fn parse_property_set(set: &TaggedValue, ctx: &str) -> Result<Vec<Property>> {
    set.expect_set(ctx)?
        .iter()
        .map(|p| Property::parse(p, ctx))
        .collect()
}

pub(crate) fn property_set(props: &[Property]) -> TaggedValue {
    TaggedValue::set(props.iter().map(Property::to_der).collect())
}

/// The leading IA5String label of a top-level structure.
pub(crate) fn expect_label(v: &TaggedValue, want: FourCC) -> Result<()> {
    let ctx = want.as_str();
    let got = v.as_ia5(ctx)?;
    if got.as_bytes() != want.bytes() {
        return Err(Error::unexpected(ctx, format!("label {want}"), format!("label {got:?}")));
    }
    Ok(())
}

pub(crate) fn find<'a>(props: &'a [Property], name: &str) -> Option<&'a PropertyValue> {
    props.iter().find(|p| p.name.as_str() == name).map(|p| &p.value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_values_reencode_exactly() {
        let raw = TaggedValue::primitive(TagClass::Universal, der::INTEGER, vec![0x00, 0x05]);
        // non-minimal integer must stay raw
        assert_eq!(PropertyValue::from_der(&raw), PropertyValue::Raw(raw.clone()));
        let ecid = TaggedValue::integer(0x0011_2233_4455_6677);
        assert_eq!(PropertyValue::from_der(&ecid), PropertyValue::Integer(0x0011_2233_4455_6677));
        assert_eq!(PropertyValue::from_der(&ecid).to_der(), ecid);
    }

    #[test]
    fn property_wrapper_round_trip() {
        let p = Property::new(FourCC::parse("CHIP").unwrap(), PropertyValue::Integer(0x8010));
        let der = p.to_der();
        assert_eq!(der.class, TagClass::Private);
        assert_eq!(der.tag, u32::from_be_bytes(*b"CHIP"));
        assert_eq!(Property::parse(&der, "MANP").unwrap(), p);
    }

    #[test]
    fn wrapper_tag_must_match_name() {
        let mut der = Property::new(FourCC::parse("CHIP").unwrap(), PropertyValue::Integer(1)).to_der();
        der.tag = u32::from_be_bytes(*b"BORD");
        assert!(matches!(Property::parse(&der, "MANP"), Err(Error::UnexpectedTag { .. })));
    }
}
