//! Restore info (IM4R): `SEQUENCE { "IM4R", SET { properties } }`, where the
//! `BNCN` property holds the boot-nonce generator.

use log::debug;
use serde::Serialize;

use crate::der::{self, TaggedValue};
use crate::error::{Error, Result};
use crate::fourcc::FourCC;
use crate::property::{self, expect_label, Property, PropertyValue};

pub const NONCE_LEN: usize = 8;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RestoreInfo {
    pub properties: Vec<Property>,
}

impl RestoreInfo {
    /// Restore info carrying only the boot-nonce generator.
    pub fn new(nonce: [u8; NONCE_LEN]) -> Self {
        RestoreInfo {
            properties: vec![Property::new(FourCC::BNCN, PropertyValue::Data(nonce.to_vec()))],
        }
    }

    /// Like [`RestoreInfo::new`] for a caller-supplied slice.
    pub fn from_nonce(nonce: &[u8]) -> Result<Self> {
        let nonce: [u8; NONCE_LEN] = nonce
            .try_into()
            .map_err(|_| Error::malformed("IM4R.BNCN", format!("nonce is {} bytes, expected {NONCE_LEN}", nonce.len())))?;
        Ok(RestoreInfo::new(nonce))
    }

    pub fn parse(bytes: &[u8]) -> Result<Self> {
        match der::decode(bytes)?.as_slice() {
            [v] => RestoreInfo::from_tagged(v),
            other => Err(Error::malformed("IM4R", format!("{} top-level elements", other.len()))),
        }
    }

    pub fn from_tagged(v: &TaggedValue) -> Result<Self> {
        match v.expect_sequence("IM4R")? {
            [label, set] => {
                expect_label(label, FourCC::IM4R)?;
                let properties = property::parse_property_set(set, "IM4R")?;
                debug!("IM4R: {} properties", properties.len());
                Ok(RestoreInfo { properties })
            }
            other => Err(Error::malformed("IM4R", format!("{} elements, expected 2", other.len()))),
        }
    }

    pub fn to_tagged(&self) -> TaggedValue {
        TaggedValue::sequence(vec![
            TaggedValue::ia5(FourCC::IM4R.as_str()),
            property::property_set(&self.properties),
        ])
    }

    pub fn to_der(&self) -> Vec<u8> {
        self.to_tagged().to_der()
    }

    pub fn property(&self, name: &str) -> Option<&PropertyValue> {
        property::find(&self.properties, name)
    }

    /// The boot-nonce generator (`BNCN`).
    pub fn get_nonce(&self) -> Result<&[u8]> {
        self.property(FourCC::BNCN.as_str())
            .and_then(PropertyValue::as_bytes)
            .ok_or_else(|| Error::missing("IM4R", "BNCN"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nonce_round_trip() {
        let r = RestoreInfo::new(*b"\x01\x23\x45\x67\x89\xab\xcd\xef");
        let back = RestoreInfo::parse(&r.to_der()).unwrap();
        assert_eq!(back, r);
        assert_eq!(back.get_nonce().unwrap(), b"\x01\x23\x45\x67\x89\xab\xcd\xef");
    }

    #[test]
    fn missing_nonce() {
        let r = RestoreInfo { properties: vec![] };
        let back = RestoreInfo::parse(&r.to_der()).unwrap();
        assert_eq!(back.get_nonce(), Err(Error::missing("IM4R", "BNCN")));
        assert!(RestoreInfo::from_nonce(&[0; 7]).is_err());
    }

    #[test]
    fn wrong_label() {
        let v = TaggedValue::sequence(vec![TaggedValue::ia5("IM4P"), TaggedValue::set(vec![])]);
        assert!(matches!(RestoreInfo::parse(&v.to_der()), Err(Error::UnexpectedTag { .. })));
    }
}
