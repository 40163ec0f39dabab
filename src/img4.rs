//! Container (IMG4): `SEQUENCE { "IMG4", IM4P, [0] { IM4M }, [1] { IM4R } }`,
//! and detection of which of the four top-level structures a buffer holds.

use log::{debug, warn};
use serde::Serialize;

use crate::der::{self, TagClass, TaggedValue};
use crate::error::{Error, Result};
use crate::fourcc::FourCC;
use crate::im4m::Manifest;
use crate::im4p::Payload;
use crate::im4r::RestoreInfo;
use crate::property::expect_label;

const MANIFEST_TAG: u32 = 0;
const RESTORE_INFO_TAG: u32 = 1;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Container {
    pub payload: Payload,
    pub manifest: Option<Manifest>,
    pub restore_info: Option<RestoreInfo>,
}

impl Container {
    pub fn new(payload: Payload, manifest: Option<Manifest>, restore_info: Option<RestoreInfo>) -> Self {
        Container { payload, manifest, restore_info }
    }

    pub fn with_restore_info(mut self, restore_info: RestoreInfo) -> Self {
        self.restore_info = Some(restore_info);
        self
    }

    pub fn parse(bytes: &[u8]) -> Result<Self> {
        match der::decode(bytes)?.as_slice() {
            [v] => Container::from_tagged(v),
            other => Err(Error::malformed("IMG4", format!("{} top-level elements", other.len()))),
        }
    }

    pub fn from_tagged(v: &TaggedValue) -> Result<Self> {
        let seq = v.expect_sequence("IMG4")?;
        let [label, payload, rest @ ..] = seq else {
            return Err(Error::malformed("IMG4", format!("{} elements, expected at least 2", seq.len())));
        };
        expect_label(label, FourCC::IMG4)?;
        let payload = Payload::from_tagged(payload)?;

        let mut manifest = None;
        let mut restore_info = None;
        for el in rest {
            let (slot_name, inner) = match (el.class, el.tag) {
                (TagClass::Context, MANIFEST_TAG) => ("IM4M", el.expect_wrapper(TagClass::Context, "IMG4 [0]")?),
                (TagClass::Context, RESTORE_INFO_TAG) => ("IM4R", el.expect_wrapper(TagClass::Context, "IMG4 [1]")?),
                _ => return Err(Error::unexpected("IMG4", "[0] IM4M or [1] IM4R", el.describe())),
            };
            let [inner] = inner else {
                return Err(Error::malformed(format!("IMG4 {slot_name}"), "wrapper must hold one element"));
            };
            match slot_name {
                "IM4M" if manifest.is_none() => manifest = Some(Manifest::from_tagged(inner)?),
                "IM4R" if restore_info.is_none() => restore_info = Some(RestoreInfo::from_tagged(inner)?),
                _ => return Err(Error::malformed("IMG4", format!("duplicate {slot_name}"))),
            }
        }
        debug!(
            "IMG4: payload {}, manifest {}, restore info {}",
            payload.fourcc,
            manifest.is_some(),
            restore_info.is_some()
        );
        Ok(Container { payload, manifest, restore_info })
    }

    /// Payload, manifest, restore info, in that order.
    pub fn to_tagged(&self) -> Result<TaggedValue> {
        let mut seq = vec![TaggedValue::ia5(FourCC::IMG4.as_str()), self.payload.to_tagged()];
        if let Some(m) = &self.manifest {
            seq.push(TaggedValue::constructed(TagClass::Context, MANIFEST_TAG, vec![m.to_tagged()?]));
        }
        if let Some(r) = &self.restore_info {
            seq.push(TaggedValue::constructed(TagClass::Context, RESTORE_INFO_TAG, vec![r.to_tagged()]));
        }
        Ok(TaggedValue::sequence(seq))
    }

    pub fn to_der(&self) -> Result<Vec<u8>> {
        Ok(self.to_tagged()?.to_der())
    }

    pub fn extract_payload(&self) -> &Payload {
        &self.payload
    }

    pub fn extract_manifest(&self) -> Option<&Manifest> {
        self.manifest.as_ref()
    }

    pub fn extract_restore_info(&self) -> Option<&RestoreInfo> {
        self.restore_info.as_ref()
    }

    /// The manifest, when present, must carry an entry for the payload.
    pub fn check_consistency(&self) -> Result<()> {
        match &self.manifest {
            Some(m) if m.image(self.payload.fourcc).is_none() => {
                warn!("IMG4: manifest has no {} entry", self.payload.fourcc);
                Err(Error::missing("IM4M", self.payload.fourcc.as_str()))
            }
            _ => Ok(()),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
pub enum Kind {
    Img4,
    Im4p,
    Im4m,
    Im4r,
}

/// Any of the four top-level structures.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Parsed {
    Img4(Box<Container>),
    Im4p(Payload),
    Im4m(Manifest),
    Im4r(RestoreInfo),
}

impl Parsed {
    pub fn kind(&self) -> Kind {
        match self {
            Parsed::Img4(_) => Kind::Img4,
            Parsed::Im4p(_) => Kind::Im4p,
            Parsed::Im4m(_) => Kind::Im4m,
            Parsed::Im4r(_) => Kind::Im4r,
        }
    }

    pub fn payload(&self) -> Option<&Payload> {
        match self {
            Parsed::Img4(c) => Some(&c.payload),
            Parsed::Im4p(p) => Some(p),
            _ => None,
        }
    }

    pub fn manifest(&self) -> Option<&Manifest> {
        match self {
            Parsed::Img4(c) => c.manifest.as_ref(),
            Parsed::Im4m(m) => Some(m),
            _ => None,
        }
    }

    pub fn restore_info(&self) -> Option<&RestoreInfo> {
        match self {
            Parsed::Img4(c) => c.restore_info.as_ref(),
            Parsed::Im4r(r) => Some(r),
            _ => None,
        }
    }
}

/// Decode a buffer and dispatch on its leading label.
pub fn parse_any(bytes: &[u8]) -> Result<Parsed> {
    let v = match der::decode(bytes)?.as_slice() {
        [v] => v.clone(),
        other => return Err(Error::malformed("top level", format!("{} elements", other.len()))),
    };
    let label = v
        .expect_sequence("top level")?
        .first()
        .ok_or_else(|| Error::malformed("top level", "empty SEQUENCE"))?
        .as_ia5("top level")?;
    debug!("top-level label {label:?}");
    let parsed = match FourCC::parse(label).ok() {
        Some(FourCC::IMG4) => Parsed::Img4(Box::new(Container::from_tagged(&v)?)),
        Some(FourCC::IM4P) => Parsed::Im4p(Payload::from_tagged(&v)?),
        Some(FourCC::IM4M) => Parsed::Im4m(Manifest::from_tagged(&v)?),
        Some(FourCC::IM4R) => Parsed::Im4r(RestoreInfo::from_tagged(&v)?),
        _ => return Err(Error::unexpected("top level", "IMG4, IM4P, IM4M or IM4R", format!("label {label:?}"))),
    };
    Ok(parsed)
}
