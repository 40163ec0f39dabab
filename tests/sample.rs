//! A kernel container produced by independent tooling: the payload was packed
//! with the reference LZSS encoder and the manifest signed with P-384 by an
//! intermediate under `data/root.der`.

use img4::{parse_any, CodecKind, DigestAlgorithm, Dispatcher, Error, FourCC, Manifest, Parsed};
use sha2::{Digest, Sha384};

const IMG4: &[u8] = include_bytes!("data/kernel.img4");
const KERNEL: &[u8] = include_bytes!("data/kernel.raw");
const MANIFEST_BODY: &[u8] = include_bytes!("data/manifest_body.der");
const ROOT: &[u8] = include_bytes!("data/root.der");
const TRAILER: &[u8] = b"KPP\x00fixture-trailer";

fn krnl() -> FourCC {
    FourCC::parse("krnl").unwrap()
}

fn sample() -> Box<img4::Container> {
    match parse_any(IMG4).unwrap() {
        Parsed::Img4(c) => c,
        other => panic!("expected an IMG4, got {:?}", other.kind()),
    }
}

#[test]
fn parses_and_reencodes_byte_for_byte() {
    let container = sample();
    assert_eq!(container.to_der().unwrap(), IMG4);
    container.check_consistency().unwrap();

    let payload = container.extract_payload();
    assert_eq!(payload.fourcc, krnl());
    assert_eq!(payload.description, "KernelCacheBuilder-fixture");
    assert_eq!(payload.codec(), CodecKind::Lzss);
    assert!(!payload.is_encrypted());
    assert_eq!(payload.unknown_elements.len(), 1);

    let manifest = container.extract_manifest().unwrap();
    assert_eq!(manifest.body_der(), MANIFEST_BODY);
    assert_eq!(manifest.chip_id(), Some(0x8020));
    assert_eq!(manifest.board_id(), Some(0x0C));
    assert_eq!(manifest.ecid(), Some(0x000A_1B2C_3D4E_5F60));
    assert_eq!(manifest.ap_nonce(), Some(&(0xA0..0xC0).collect::<Vec<u8>>()[..]));
    let names: Vec<&str> = manifest.images().iter().map(|e| e.fourcc.as_str()).collect();
    assert_eq!(names, ["krnl", "rdsk"]);
    assert_eq!(manifest.certificate_chain.len(), 2);

    let restore = container.extract_restore_info().unwrap();
    assert_eq!(restore.get_nonce().unwrap(), &[0x01, 0x23, 0x45, 0x67, 0x89, 0xab, 0xcd, 0xef][..]);
}

#[test]
fn decompresses_reference_lzss_with_trailer() {
    let mut payload = sample().extract_payload().clone();
    payload.decompress(&Dispatcher::default()).unwrap();
    assert_eq!(payload.data, KERNEL);
    assert_eq!(payload.extra_data.as_deref(), Some(TRAILER));
    assert_eq!(payload.codec(), CodecKind::None);
}

#[test]
fn verifies_signature_and_digest() {
    let container = sample();
    let manifest = container.extract_manifest().unwrap();
    assert!(matches!(manifest.digest_algorithm(), Ok(DigestAlgorithm::Sha384)));
    assert_eq!(manifest.digest_for(krnl()), Some(&Sha384::digest(KERNEL)[..]));
    manifest.verify_signature(&[ROOT.to_vec()]).unwrap();

    let mut payload = container.extract_payload().clone();
    assert!(matches!(
        manifest.verify_payload_digest(&payload, krnl()),
        Err(Error::DigestMismatch { .. })
    ));
    payload.decompress(&Dispatcher::default()).unwrap();
    manifest.verify_payload_digest(&payload, krnl()).unwrap();
}

#[test]
fn signature_needs_the_right_root_and_body() {
    let container = sample();
    let manifest = container.extract_manifest().unwrap();

    // pinning the intermediate is enough; a stranger's root is not
    manifest.verify_signature(&[manifest.certificate_chain[1].clone()]).unwrap();
    let stranger = rcgen::KeyPair::generate().unwrap();
    let stranger = rcgen::CertificateParams::new(Vec::<String>::new())
        .unwrap()
        .self_signed(&stranger)
        .unwrap();
    assert!(matches!(
        manifest.verify_signature(&[stranger.der().to_vec()]),
        Err(Error::UntrustedChain(_))
    ));

    // the leaf signs the body bytes exactly; a flipped digest bit breaks it
    let digest = Sha384::digest(KERNEL);
    let at = IMG4.windows(digest.len()).position(|w| w == &digest[..]).unwrap();
    let mut der = IMG4.to_vec();
    der[at] ^= 0x80;
    let Parsed::Img4(tampered) = parse_any(&der).unwrap() else {
        panic!("expected an IMG4");
    };
    let tampered: &Manifest = tampered.extract_manifest().unwrap();
    assert!(matches!(
        tampered.verify_signature(&[ROOT.to_vec()]),
        Err(Error::SignatureMismatch(_))
    ));
    assert_ne!(tampered.digest_for(krnl()), manifest.digest_for(krnl()));
}
