#![allow(dead_code)]

use img4::property::PropertyValue;
use img4::{CodecKind, Container, DigestAlgorithm, Dispatcher, FourCC, Manifest, Payload, RestoreInfo};
use p256::ecdsa::signature::Signer;
use p256::ecdsa::{Signature, SigningKey};
use p256::pkcs8::DecodePrivateKey;
use rcgen::{BasicConstraints, CertificateParams, DistinguishedName, DnType, IsCa, KeyPair};

pub const CHIP_ID: u64 = 0x8101;
pub const ECID: u64 = 0x001A_2B3C_4D5E_6F70;
pub const NONCE: [u8; 8] = [0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88];

pub fn krnl() -> FourCC {
    FourCC::parse("krnl").unwrap()
}

/// A root CA and a leaf it issued, both P-256.
pub struct TestPki {
    pub root_der: Vec<u8>,
    pub leaf_der: Vec<u8>,
    pub leaf_key: SigningKey,
}

fn named(cn: &str) -> CertificateParams {
    let mut params = CertificateParams::new(Vec::<String>::new()).unwrap();
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, cn);
    params.distinguished_name = dn;
    params
}

impl TestPki {
    pub fn generate(root_cn: &str) -> Self {
        let root_key = KeyPair::generate().unwrap();
        let mut root_params = named(root_cn);
        root_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        let root = root_params.self_signed(&root_key).unwrap();

        let leaf_key = KeyPair::generate().unwrap();
        let leaf = named("Test Manifest Signer").signed_by(&leaf_key, &root, &root_key).unwrap();

        TestPki {
            root_der: root.der().to_vec(),
            leaf_der: leaf.der().to_vec(),
            leaf_key: SigningKey::from_pkcs8_der(&leaf_key.serialize_der()).unwrap(),
        }
    }

    /// Attach the chain and an ECDSA-SHA256 signature over the body.
    pub fn sign(&self, mut manifest: Manifest) -> Manifest {
        manifest.certificate_chain = vec![self.leaf_der.clone(), self.root_der.clone()];
        let sig: Signature = self.leaf_key.sign(&manifest.body_der());
        manifest.signature = sig.to_der().as_bytes().to_vec();
        manifest
    }
}

/// Kernel-sized plaintext that compresses well.
pub fn kernel_bytes() -> Vec<u8> {
    let mut data = Vec::with_capacity(64 * 1024);
    data.extend_from_slice(&[0xcf, 0xfa, 0xed, 0xfe]);
    for i in 0..16_000u32 {
        data.extend_from_slice(format!("{:04}", i % 97).as_bytes());
    }
    data
}

pub fn manifest_for(fourcc: FourCC, plaintext: &[u8]) -> Manifest {
    Manifest::new(0)
        .with_property(FourCC::parse("CHIP").unwrap(), PropertyValue::Integer(CHIP_ID))
        .with_property(FourCC::parse("ECID").unwrap(), PropertyValue::Integer(ECID))
        .with_property(FourCC::parse("BNCH").unwrap(), PropertyValue::Data(vec![0xAB; 32]))
        .with_image_digest(fourcc, DigestAlgorithm::Sha256, plaintext)
}

/// A signed kernel container whose payload is `codec`-compressed and whose
/// manifest digest covers the decompressed bytes.
pub fn signed_container(pki: &TestPki, codec: CodecKind) -> (Container, Vec<u8>) {
    let plaintext = kernel_bytes();
    let mut payload = Payload::new(krnl(), "KernelCache", plaintext.clone());
    payload.compress(&Dispatcher::default(), codec, false).unwrap();
    let manifest = pki.sign(manifest_for(krnl(), &plaintext));
    let container = Container::new(payload, Some(manifest), Some(RestoreInfo::new(NONCE)));
    (container, plaintext)
}
