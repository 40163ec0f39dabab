//! Digest computation, manifest signature checks, and certificate-chain
//! validation against caller-supplied trust anchors.
//!
//! Every signature here is checked over a prehash: the message is digested
//! with a [`DigestAlgorithm`] first and the key type (RSA PKCS#1 v1.5, ECDSA
//! P-256, ECDSA P-384) is taken from the signer's SubjectPublicKeyInfo.

use log::debug;
use p256::elliptic_curve::sec1::ToEncodedPoint as _;
use rsa::pkcs1v15::Pkcs1v15Sign;
use rsa::pkcs8::DecodePublicKey as _;
use rsa::RsaPublicKey;
use serde::Serialize;
use sha1::Sha1;
use sha2::{Digest as _, Sha256, Sha384, Sha512};
use signature::hazmat::PrehashVerifier as _;

use crate::error::{Error, Result};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum DigestAlgorithm {
    Sha1,
    Sha256,
    Sha384,
    Sha512,
}

impl DigestAlgorithm {
    pub fn name(&self) -> &'static str {
        match self {
            DigestAlgorithm::Sha1 => "SHA-1",
            DigestAlgorithm::Sha256 => "SHA-256",
            DigestAlgorithm::Sha384 => "SHA-384",
            DigestAlgorithm::Sha512 => "SHA-512",
        }
    }

    pub fn output_len(&self) -> usize {
        match self {
            DigestAlgorithm::Sha1 => 20,
            DigestAlgorithm::Sha256 => 32,
            DigestAlgorithm::Sha384 => 48,
            DigestAlgorithm::Sha512 => 64,
        }
    }

    pub fn from_output_len(len: usize) -> Option<Self> {
        match len {
            20 => Some(DigestAlgorithm::Sha1),
            32 => Some(DigestAlgorithm::Sha256),
            48 => Some(DigestAlgorithm::Sha384),
            64 => Some(DigestAlgorithm::Sha512),
            _ => None,
        }
    }

    /// Hash family of an X.509 `signatureAlgorithm` OID (RSA or ECDSA).
    pub fn from_signature_oid(oid: &str) -> Option<Self> {
        match oid {
            // sha1WithRSAEncryption / ecdsa-with-SHA1
            "1.2.840.113549.1.1.5" | "1.2.840.10045.4.1" => Some(DigestAlgorithm::Sha1),
            "1.2.840.113549.1.1.11" | "1.2.840.10045.4.3.2" => Some(DigestAlgorithm::Sha256),
            "1.2.840.113549.1.1.12" | "1.2.840.10045.4.3.3" => Some(DigestAlgorithm::Sha384),
            "1.2.840.113549.1.1.13" | "1.2.840.10045.4.3.4" => Some(DigestAlgorithm::Sha512),
            _ => None,
        }
    }

    pub fn digest(&self, data: &[u8]) -> Vec<u8> {
        match self {
            DigestAlgorithm::Sha1 => Sha1::digest(data).to_vec(),
            DigestAlgorithm::Sha256 => Sha256::digest(data).to_vec(),
            DigestAlgorithm::Sha384 => Sha384::digest(data).to_vec(),
            DigestAlgorithm::Sha512 => Sha512::digest(data).to_vec(),
        }
    }
}

impl std::fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// The fields of a certificate the verifier needs, owned.
#[derive(Clone, Debug)]
pub struct ParsedCert {
    pub der: Vec<u8>,
    pub subject: String,
    pub issuer: String,
    pub spki_der: Vec<u8>,
    pub tbs_der: Vec<u8>,
    pub signature_oid: String,
    pub signature: Vec<u8>,
}

impl ParsedCert {
    pub fn parse(der: &[u8]) -> std::result::Result<Self, String> {
        let (rest, cert) = x509_parser::parse_x509_certificate(der).map_err(|e| format!("invalid certificate DER: {e}"))?;
        if !rest.is_empty() {
            return Err(format!("{} trailing bytes after certificate", rest.len()));
        }
        Ok(ParsedCert {
            der: der.to_vec(),
            subject: cert.tbs_certificate.subject.to_string(),
            issuer: cert.tbs_certificate.issuer.to_string(),
            spki_der: cert.tbs_certificate.subject_pki.raw.to_vec(),
            tbs_der: cert.tbs_certificate.as_ref().to_vec(),
            signature_oid: cert.signature_algorithm.algorithm.to_string(),
            signature: cert.signature_value.data.to_vec(),
        })
    }

    pub fn is_self_issued(&self) -> bool {
        self.subject == self.issuer
    }

    pub fn signature_digest(&self) -> Option<DigestAlgorithm> {
        DigestAlgorithm::from_signature_oid(&self.signature_oid)
    }

    /// Check that `self` was signed by the key in `issuer`.
    pub fn verify_issued_by(&self, issuer: &ParsedCert) -> std::result::Result<(), String> {
        let alg = self
            .signature_digest()
            .ok_or_else(|| format!("unsupported signature algorithm {}", self.signature_oid))?;
        verify_prehashed(&issuer.spki_der, alg, &alg.digest(&self.tbs_der), &self.signature)
    }
}

/// Verify `signature` over an already computed `prehash` with the public key
/// in `spki_der`.
pub fn verify_prehashed(
    spki_der: &[u8],
    alg: DigestAlgorithm,
    prehash: &[u8],
    signature: &[u8],
) -> std::result::Result<(), String> {
    if let Ok(key) = RsaPublicKey::from_public_key_der(spki_der) {
        let scheme = match alg {
            DigestAlgorithm::Sha1 => Pkcs1v15Sign::new::<Sha1>(),
            DigestAlgorithm::Sha256 => Pkcs1v15Sign::new::<Sha256>(),
            DigestAlgorithm::Sha384 => Pkcs1v15Sign::new::<Sha384>(),
            DigestAlgorithm::Sha512 => Pkcs1v15Sign::new::<Sha512>(),
        };
        return key
            .verify(scheme, prehash, signature)
            .map_err(|_| format!("RSA {alg} signature verification failed"));
    }
    if let Ok(pk) = p256::PublicKey::from_public_key_der(spki_der) {
        let ep = pk.to_encoded_point(false);
        let vk = p256::ecdsa::VerifyingKey::from_sec1_bytes(ep.as_bytes()).map_err(|e| format!("bad P-256 public key: {e}"))?;
        let sig = p256::ecdsa::Signature::from_der(signature)
            .or_else(|_| p256::ecdsa::Signature::from_slice(signature))
            .map_err(|e| format!("bad ECDSA signature bytes: {e}"))?;
        return vk
            .verify_prehash(prehash, &sig)
            .map_err(|_| format!("ECDSA P-256/{alg} signature verification failed"));
    }
    if let Ok(pk) = p384::PublicKey::from_public_key_der(spki_der) {
        let ep = pk.to_encoded_point(false);
        let vk = p384::ecdsa::VerifyingKey::from_sec1_bytes(ep.as_bytes()).map_err(|e| format!("bad P-384 public key: {e}"))?;
        let sig = p384::ecdsa::Signature::from_der(signature)
            .or_else(|_| p384::ecdsa::Signature::from_slice(signature))
            .map_err(|e| format!("bad ECDSA signature bytes: {e}"))?;
        return vk
            .verify_prehash(prehash, &sig)
            .map_err(|_| format!("ECDSA P-384/{alg} signature verification failed"));
    }
    Err("unsupported public key type (expected RSA, P-256 or P-384)".into())
}

/// Parse a chain carried inside a manifest. Failures name the chain index.
pub fn parse_chain(chain: &[Vec<u8>]) -> Result<Vec<ParsedCert>> {
    chain
        .iter()
        .enumerate()
        .map(|(index, der)| ParsedCert::parse(der).map_err(|reason| Error::MalformedCertificate { index, reason }))
        .collect()
}

/// The signing certificate: the first one that issued no other certificate
/// in the chain.
pub fn find_leaf(chain: &[ParsedCert]) -> Option<usize> {
    let issued_something = |i: usize| {
        chain
            .iter()
            .enumerate()
            .any(|(j, c)| j != i && !c.is_self_issued() && c.issuer == chain[i].subject)
    };
    (0..chain.len()).find(|&i| !issued_something(i)).or(chain.len().checked_sub(1))
}

/// Walk issuer links from `chain[leaf]` until a trusted root is reached.
///
/// A link is accepted only when the issuer's subject matches and the issuer's
/// key verifies the child's signature. Reaching a certificate that is itself
/// one of the roots (byte for byte) also terminates the walk.
pub fn validate_chain(chain: &[ParsedCert], leaf: usize, trusted_roots: &[Vec<u8>]) -> Result<()> {
    let roots = trusted_roots
        .iter()
        .enumerate()
        .map(|(i, der)| {
            ParsedCert::parse(der).map_err(|reason| Error::UntrustedChain(format!("trusted root {i} is unusable: {reason}")))
        })
        .collect::<Result<Vec<_>>>()?;
    if roots.is_empty() {
        return Err(Error::UntrustedChain("no trusted roots supplied".into()));
    }

    let mut current = leaf;
    // each step moves to a different chain certificate, so the walk is bounded
    for _ in 0..=chain.len() {
        let cert = &chain[current];
        if roots.iter().any(|r| r.der == cert.der) {
            debug!("chain: {:?} is a trusted root", cert.subject);
            return Ok(());
        }
        if let Some(root) = roots
            .iter()
            .find(|r| r.subject == cert.issuer && cert.verify_issued_by(r).is_ok())
        {
            debug!("chain: {:?} issued by trusted root {:?}", cert.subject, root.subject);
            return Ok(());
        }
        let next = chain
            .iter()
            .enumerate()
            .find(|(j, c)| *j != current && c.subject == cert.issuer)
            .map(|(j, _)| j);
        let Some(next) = next else {
            return Err(Error::UntrustedChain(format!(
                "no trusted issuer for {:?} (issuer {:?})",
                cert.subject, cert.issuer
            )));
        };
        cert.verify_issued_by(&chain[next]).map_err(|e| {
            Error::UntrustedChain(format!("{:?} -> {:?}: {e}", cert.subject, chain[next].subject))
        })?;
        debug!("chain: {:?} issued by {:?}", cert.subject, chain[next].subject);
        current = next;
    }
    Err(Error::UntrustedChain("issuer loop in certificate chain".into()))
}

/// Compare a manifest digest with a computed one.
pub fn check_digest(fourcc: &str, expected: &[u8], computed: &[u8]) -> Result<()> {
    if expected == computed {
        Ok(())
    } else {
        Err(Error::DigestMismatch {
            fourcc: fourcc.to_string(),
            expected: hex::encode(expected),
            computed: hex::encode(computed),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_lengths_and_oids() {
        for alg in [DigestAlgorithm::Sha1, DigestAlgorithm::Sha256, DigestAlgorithm::Sha384, DigestAlgorithm::Sha512] {
            assert_eq!(alg.digest(b"abc").len(), alg.output_len());
            assert_eq!(DigestAlgorithm::from_output_len(alg.output_len()), Some(alg));
        }
        assert_eq!(
            hex::encode(DigestAlgorithm::Sha1.digest(b"abc")),
            "a9993e364706816aba3e25717850c26c9cd0d89d"
        );
        assert_eq!(DigestAlgorithm::from_signature_oid("1.2.840.113549.1.1.5"), Some(DigestAlgorithm::Sha1));
        assert_eq!(DigestAlgorithm::from_signature_oid("1.2.840.10045.4.3.3"), Some(DigestAlgorithm::Sha384));
        assert_eq!(DigestAlgorithm::from_signature_oid("1.2.3"), None);
    }

    #[test]
    fn digest_mismatch_reports_both_values() {
        assert!(check_digest("krnl", b"\x01", b"\x01").is_ok());
        let err = check_digest("krnl", b"\x01", b"\x02").unwrap_err();
        assert_eq!(
            err,
            Error::DigestMismatch { fourcc: "krnl".into(), expected: "01".into(), computed: "02".into() }
        );
    }

    #[test]
    fn garbage_certificate_is_malformed_with_index() {
        let err = parse_chain(&[b"junk".to_vec()]).unwrap_err();
        assert!(matches!(err, Error::MalformedCertificate { index: 0, .. }));
    }
}
