//! Manifest (IM4M).
//!
//! ```text
//! SEQUENCE {
//!   IA5String "IM4M", INTEGER version,
//!   SET { [PRIVATE MANB] SEQUENCE { "MANB", SET {
//!       [PRIVATE MANP] SEQUENCE { "MANP", SET { properties } },
//!       [PRIVATE krnl] SEQUENCE { "krnl", SET { DGST, ... } }, ... } } },
//!   OCTET STRING signature,
//!   SEQUENCE { certificate, ... } }
//! ```
//!
//! The signature covers the DER of the body SET (the third element). It is
//! recomputed from the parsed model, so the element order of the input is
//! kept.

use log::debug;
use serde::Serialize;

use crate::der::{self, TaggedValue};
use crate::error::{Error, Result};
use crate::fourcc::FourCC;
use crate::im4p::Payload;
use crate::property::{self, expect_label, named_wrapper, parse_named_pair, Property, PropertyValue};
use crate::verify::{self, DigestAlgorithm};

/// Per-component entry of the manifest body.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ImageEntry {
    pub fourcc: FourCC,
    pub properties: Vec<Property>,
}

impl ImageEntry {
    pub fn new(fourcc: FourCC, properties: Vec<Property>) -> Self {
        ImageEntry { fourcc, properties }
    }

    pub fn property(&self, name: &str) -> Option<&PropertyValue> {
        property::find(&self.properties, name)
    }

    pub fn digest(&self) -> Option<&[u8]> {
        self.property(FourCC::DGST.as_str()).and_then(PropertyValue::as_bytes)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Manifest {
    pub version: u64,
    /// Global properties (`MANP`).
    pub properties: Vec<Property>,
    pub images: Vec<ImageEntry>,
    pub signature: Vec<u8>,
    /// DER certificates as carried in the manifest.
    pub certificate_chain: Vec<Vec<u8>>,
    /// Where `MANP` sits among the body entries; `None` when absent.
    manp_position: Option<usize>,
}

#[derive(Clone, Debug, Serialize)]
pub struct ImageSummary {
    pub fourcc: FourCC,
    pub component: Option<&'static str>,
    pub digest: Option<String>,
    pub properties: Vec<Property>,
}

#[derive(Clone, Debug, Serialize)]
pub struct ManifestSummary {
    pub version: u64,
    pub properties: Vec<Property>,
    pub images: Vec<ImageSummary>,
    pub digest_algorithm: Option<DigestAlgorithm>,
    pub signature_len: usize,
    pub certificates: Vec<String>,
}

impl Default for Manifest {
    fn default() -> Self {
        Manifest::new(0)
    }
}

impl Manifest {
    /// An unsigned manifest with an empty `MANP`.
    pub fn new(version: u64) -> Self {
        Manifest {
            version,
            properties: Vec::new(),
            images: Vec::new(),
            signature: Vec::new(),
            certificate_chain: Vec::new(),
            manp_position: Some(0),
        }
    }

    pub fn with_property(mut self, name: FourCC, value: PropertyValue) -> Self {
        self.set_property(name, value);
        self
    }

    pub fn set_property(&mut self, name: FourCC, value: PropertyValue) {
        match self.properties.iter_mut().find(|p| p.name == name) {
            Some(p) => p.value = value,
            None => self.properties.push(Property::new(name, value)),
        }
        self.manp_position.get_or_insert(0);
    }

    pub fn with_image(mut self, entry: ImageEntry) -> Self {
        self.images.retain(|e| e.fourcc != entry.fourcc);
        self.images.push(entry);
        self
    }

    /// Add or replace the `DGST` entry for `fourcc` with the digest of `data`.
    pub fn with_image_digest(self, fourcc: FourCC, alg: DigestAlgorithm, data: &[u8]) -> Self {
        let props = vec![Property::new(FourCC::DGST, PropertyValue::Data(alg.digest(data)))];
        self.with_image(ImageEntry::new(fourcc, props))
    }

    pub fn parse(bytes: &[u8]) -> Result<Self> {
        match der::decode(bytes)?.as_slice() {
            [v] => Manifest::from_tagged(v),
            other => Err(Error::malformed("IM4M", format!("{} top-level elements", other.len()))),
        }
    }

    pub fn from_tagged(v: &TaggedValue) -> Result<Self> {
        let seq = v.expect_sequence("IM4M")?;
        let [label, version, body, trailing @ ..] = seq else {
            return Err(Error::malformed("IM4M", format!("{} elements, expected at least 3", seq.len())));
        };
        expect_label(label, FourCC::IM4M)?;
        let version = version.as_u64("IM4M.version")?;

        let [manb] = body.expect_set("IM4M body")? else {
            return Err(Error::malformed("IM4M body", "expected exactly one MANB entry"));
        };
        let manb_inner = manb.expect_wrapper(der::TagClass::Private, "MANB")?;
        let [manb_seq] = manb_inner else {
            return Err(Error::malformed("MANB", "wrapper must hold one SEQUENCE"));
        };
        let (name, entries) = parse_named_pair(manb_seq, "MANB")?;
        if name != FourCC::MANB || manb.tag != FourCC::MANB.as_u32() {
            return Err(Error::unexpected("IM4M body", "MANB", name.as_str()));
        }

        let mut m = Manifest::new(version);
        m.manp_position = None;
        for (i, entry) in entries.expect_set("MANB")?.iter().enumerate() {
            let ctx = "MANB entry";
            let inner = entry.expect_wrapper(der::TagClass::Private, ctx)?;
            let [seq] = inner else {
                return Err(Error::malformed(ctx, format!("wrapper holds {} elements", inner.len())));
            };
            let (fourcc, set) = parse_named_pair(seq, ctx)?;
            if fourcc.as_u32() != entry.tag {
                return Err(Error::unexpected(ctx, format!("[PRIVATE {:#x}] for {fourcc}", fourcc.as_u32()), entry.describe()));
            }
            let props = property::parse_property_set(set, fourcc.as_str())?;
            if fourcc == FourCC::MANP {
                if m.manp_position.is_some() {
                    return Err(Error::malformed("MANB", "duplicate MANP"));
                }
                m.manp_position = Some(i);
                m.properties = props;
            } else {
                debug!("IM4M image {fourcc}: {} properties", props.len());
                m.images.push(ImageEntry::new(fourcc, props));
            }
        }

        match trailing {
            [] => {}
            [sig] => m.signature = sig.as_octets("IM4M.signature")?.to_vec(),
            [sig, certs] => {
                m.signature = sig.as_octets("IM4M.signature")?.to_vec();
                m.certificate_chain = certs
                    .expect_sequence("IM4M.certificates")?
                    .iter()
                    .map(TaggedValue::to_der)
                    .collect();
            }
            more => return Err(Error::malformed("IM4M", format!("{} unexpected trailing elements", more.len()))),
        }
        debug!(
            "IM4M v{}: {} properties, {} images, {} byte signature, {} certificates",
            m.version,
            m.properties.len(),
            m.images.len(),
            m.signature.len(),
            m.certificate_chain.len()
        );
        Ok(m)
    }

    /// The signed region: `SET { [PRIVATE MANB] ... }`.
    pub fn body_tagged(&self) -> TaggedValue {
        let mut entries: Vec<TaggedValue> = self
            .images
            .iter()
            .map(|img| named_wrapper(img.fourcc, vec![property::property_set(&img.properties)]))
            .collect();
        if let Some(pos) = self.manp_position {
            let manp = named_wrapper(FourCC::MANP, vec![property::property_set(&self.properties)]);
            entries.insert(pos.min(entries.len()), manp);
        }
        TaggedValue::set(vec![named_wrapper(FourCC::MANB, vec![TaggedValue::set(entries)])])
    }

    pub fn body_der(&self) -> Vec<u8> {
        self.body_tagged().to_der()
    }

    pub fn to_tagged(&self) -> Result<TaggedValue> {
        let mut seq = vec![
            TaggedValue::ia5(FourCC::IM4M.as_str()),
            TaggedValue::integer(self.version),
            self.body_tagged(),
        ];
        if !self.signature.is_empty() || !self.certificate_chain.is_empty() {
            seq.push(TaggedValue::octets(self.signature.clone()));
        }
        if !self.certificate_chain.is_empty() {
            let certs = self
                .certificate_chain
                .iter()
                .enumerate()
                .map(|(index, c)| match der::decode(c)?.as_slice() {
                    [cert] => Ok(cert.clone()),
                    _ => Err(Error::MalformedCertificate { index, reason: "not a single DER element".into() }),
                })
                .collect::<Result<Vec<_>>>()?;
            seq.push(TaggedValue::sequence(certs));
        }
        Ok(TaggedValue::sequence(seq))
    }

    pub fn to_der(&self) -> Result<Vec<u8>> {
        Ok(self.to_tagged()?.to_der())
    }

    pub fn property(&self, name: &str) -> Option<&PropertyValue> {
        property::find(&self.properties, name)
    }

    pub fn ecid(&self) -> Option<u64> {
        self.property("ECID").and_then(PropertyValue::as_u64)
    }

    pub fn chip_id(&self) -> Option<u64> {
        self.property("CHIP").and_then(PropertyValue::as_u64)
    }

    pub fn board_id(&self) -> Option<u64> {
        self.property("BORD").and_then(PropertyValue::as_u64)
    }

    /// `BNCH`, the hash of the AP boot nonce.
    pub fn ap_nonce(&self) -> Option<&[u8]> {
        self.property("BNCH").and_then(PropertyValue::as_bytes)
    }

    pub fn sep_nonce(&self) -> Option<&[u8]> {
        self.property("snon").and_then(PropertyValue::as_bytes)
    }

    pub fn images(&self) -> &[ImageEntry] {
        &self.images
    }

    pub fn image(&self, fourcc: FourCC) -> Option<&ImageEntry> {
        self.images.iter().find(|e| e.fourcc == fourcc)
    }

    pub fn digest_for(&self, fourcc: FourCC) -> Option<&[u8]> {
        self.image(fourcc).and_then(ImageEntry::digest)
    }

    /// Hash family from the signing certificate; without certificates it is
    /// inferred from the length of the first stored digest.
    pub fn digest_algorithm(&self) -> Result<DigestAlgorithm> {
        if !self.certificate_chain.is_empty() {
            let chain = verify::parse_chain(&self.certificate_chain)?;
            if let Some(leaf) = verify::find_leaf(&chain) {
                return chain[leaf].signature_digest().ok_or_else(|| Error::MalformedCertificate {
                    index: leaf,
                    reason: format!("unsupported signature algorithm {}", chain[leaf].signature_oid),
                });
            }
        }
        self.images
            .iter()
            .find_map(|e| e.digest().and_then(|d| DigestAlgorithm::from_output_len(d.len())))
            .ok_or_else(|| Error::missing("IM4M", "DGST"))
    }

    /// Check the manifest signature with the leaf certificate, then the
    /// chain from that leaf up to one of `trusted_roots` (DER).
    pub fn verify_signature(&self, trusted_roots: &[Vec<u8>]) -> Result<()> {
        let chain = verify::parse_chain(&self.certificate_chain)?;
        let leaf = verify::find_leaf(&chain)
            .ok_or_else(|| Error::UntrustedChain("manifest carries no certificates".into()))?;
        let signer = &chain[leaf];
        let alg = signer.signature_digest().ok_or_else(|| Error::MalformedCertificate {
            index: leaf,
            reason: format!("unsupported signature algorithm {}", signer.signature_oid),
        })?;
        let prehash = alg.digest(&self.body_der());
        debug!("IM4M: checking {alg} signature with {:?}", signer.subject);
        verify::verify_prehashed(&signer.spki_der, alg, &prehash, &self.signature)
            .map_err(Error::SignatureMismatch)?;
        verify::validate_chain(&chain, leaf, trusted_roots)
    }

    /// Compare the digest of `payload.data` with the manifest entry for `fourcc`.
    pub fn verify_payload_digest(&self, payload: &Payload, fourcc: FourCC) -> Result<()> {
        self.verify_digest_of(&payload.data, fourcc)
    }

    /// Like [`Manifest::verify_payload_digest`] over the encoded IM4P, which
    /// is what device tickets record.
    pub fn verify_encoded_payload_digest(&self, payload: &Payload, fourcc: FourCC) -> Result<()> {
        self.verify_digest_of(&payload.to_der(), fourcc)
    }

    fn verify_digest_of(&self, data: &[u8], fourcc: FourCC) -> Result<()> {
        let expected = self
            .digest_for(fourcc)
            .ok_or_else(|| Error::missing(format!("IM4M {fourcc}"), "DGST"))?;
        let mut alg = self.digest_algorithm()?;
        if alg.output_len() != expected.len() {
            if let Some(by_len) = DigestAlgorithm::from_output_len(expected.len()) {
                debug!("IM4M {fourcc}: {}-byte DGST, using {by_len} instead of {alg}", expected.len());
                alg = by_len;
            }
        }
        verify::check_digest(fourcc.as_str(), expected, &alg.digest(data))
    }

    pub fn summary(&self) -> ManifestSummary {
        let certificates = self
            .certificate_chain
            .iter()
            .map(|c| verify::ParsedCert::parse(c).map(|p| p.subject).unwrap_or_else(|e| format!("<{e}>")))
            .collect();
        ManifestSummary {
            version: self.version,
            properties: self.properties.clone(),
            images: self
                .images
                .iter()
                .map(|e| ImageSummary {
                    fourcc: e.fourcc,
                    component: e.fourcc.description(),
                    digest: e.digest().map(hex::encode),
                    properties: e.properties.iter().filter(|p| p.name != FourCC::DGST).cloned().collect(),
                })
                .collect(),
            digest_algorithm: self.digest_algorithm().ok(),
            signature_len: self.signature.len(),
            certificates,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Manifest {
        Manifest::new(0)
            .with_property(FourCC::parse("CHIP").unwrap(), PropertyValue::Integer(0x8015))
            .with_property(FourCC::parse("BORD").unwrap(), PropertyValue::Integer(0x0C))
            .with_property(FourCC::parse("ECID").unwrap(), PropertyValue::Integer(0x001A_2B3C_4D5E_6F70))
            .with_property(FourCC::parse("BNCH").unwrap(), PropertyValue::Data(vec![0xAB; 32]))
            .with_property(FourCC::parse("CPRO").unwrap(), PropertyValue::Boolean(true))
            .with_image_digest(FourCC::parse("krnl").unwrap(), DigestAlgorithm::Sha384, b"kernel")
    }

    #[test]
    fn unsigned_round_trip() {
        let m = sample();
        let der = m.to_der().unwrap();
        let back = Manifest::parse(&der).unwrap();
        assert_eq!(back, m);
        assert_eq!(back.to_der().unwrap(), der);
        assert_eq!(back.chip_id(), Some(0x8015));
        assert_eq!(back.board_id(), Some(0x0C));
        assert_eq!(back.ecid(), Some(0x001A_2B3C_4D5E_6F70));
        assert_eq!(back.ap_nonce(), Some(&[0xAB; 32][..]));
        assert_eq!(back.sep_nonce(), None);
    }

    #[test]
    fn manp_position_is_preserved() {
        let mut m = sample();
        m.manp_position = Some(1);
        let der = m.to_der().unwrap();
        let back = Manifest::parse(&der).unwrap();
        assert_eq!(back.manp_position, Some(1));
        assert_eq!(back.body_der(), m.body_der());
    }

    #[test]
    fn digest_lookup_and_algorithm_from_length() {
        let m = sample();
        let krnl = FourCC::parse("krnl").unwrap();
        assert_eq!(m.digest_for(krnl).map(<[u8]>::len), Some(48));
        assert!(m.digest_for(FourCC::parse("ibot").unwrap()).is_none());
        assert_eq!(m.digest_algorithm().unwrap(), DigestAlgorithm::Sha384);

        let ok = Payload::new(krnl, "", b"kernel".to_vec());
        m.verify_payload_digest(&ok, krnl).unwrap();
        let bad = Payload::new(krnl, "", b"kernal".to_vec());
        assert!(matches!(m.verify_payload_digest(&bad, krnl), Err(Error::DigestMismatch { .. })));
        let rdsk = FourCC::parse("rdsk").unwrap();
        assert!(matches!(m.verify_payload_digest(&ok, rdsk), Err(Error::MissingProperty { .. })));
    }

    #[test]
    fn unsigned_manifest_has_no_trust() {
        let err = sample().verify_signature(&[]).unwrap_err();
        assert!(matches!(err, Error::UntrustedChain(_)));
    }

    #[test]
    fn wrong_body_label() {
        let body = TaggedValue::set(vec![named_wrapper(FourCC::MANP, vec![TaggedValue::set(vec![])])]);
        let v = TaggedValue::sequence(vec![TaggedValue::ia5("IM4M"), TaggedValue::integer(0), body]);
        assert!(matches!(Manifest::parse(&v.to_der()), Err(Error::UnexpectedTag { .. })));
    }
}
