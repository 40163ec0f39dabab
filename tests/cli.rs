mod common;

use std::fs;

use assert_cmd::Command;
use common::*;
use img4::CodecKind;
use predicates::prelude::*;

fn img4() -> Command {
    let mut cmd = Command::cargo_bin("img4").unwrap();
    cmd.env_remove("RUST_LOG").env("NO_COLOR", "1");
    cmd
}

fn fixture(dir: &std::path::Path, codec: CodecKind) -> TestPki {
    let pki = TestPki::generate("Test Root CA");
    let (container, _) = signed_container(&pki, codec);
    fs::write(dir.join("kernel.img4"), container.to_der().unwrap()).unwrap();
    fs::write(dir.join("root.der"), &pki.root_der).unwrap();
    pki
}

#[test]
fn info_describes_container() {
    let dir = tempfile::tempdir().unwrap();
    fixture(dir.path(), CodecKind::Lzss);

    img4()
        .arg("info")
        .arg(dir.path().join("kernel.img4"))
        .assert()
        .success()
        .stdout(predicate::str::starts_with("IMG4 Container"))
        .stdout(predicate::str::contains("krnl (KernelCache)"))
        .stdout(predicate::str::contains("lzss"))
        .stdout(predicate::str::contains("← THIS FILE"));

    let out = img4().arg("--json").arg("info").arg(dir.path().join("kernel.img4")).output().unwrap();
    assert!(out.status.success());
    let json: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(json["kind"], "Img4");
    assert_eq!(json["payload"]["fourcc"], "krnl");
    assert_eq!(json["manifest"]["images"][0]["fourcc"], "krnl");
}

#[test]
fn verify_accepts_trusted_root_and_rejects_others() {
    let dir = tempfile::tempdir().unwrap();
    fixture(dir.path(), CodecKind::Lzfse);

    img4()
        .arg("verify")
        .arg(dir.path().join("kernel.img4"))
        .args(["--digest-over", "decompressed", "--root"])
        .arg(dir.path().join("root.der"))
        .assert()
        .success()
        .stdout(predicate::str::contains("signature: OK"))
        .stdout(predicate::str::contains("digest krnl: OK"));

    // stored data is still compressed
    img4()
        .arg("verify")
        .arg(dir.path().join("kernel.img4"))
        .arg("--root")
        .arg(dir.path().join("root.der"))
        .assert()
        .code(11);

    let other = TestPki::generate("Someone Else CA");
    fs::write(dir.path().join("other.der"), other.root_der).unwrap();
    img4()
        .arg("verify")
        .arg(dir.path().join("kernel.img4"))
        .arg("--root")
        .arg(dir.path().join("other.der"))
        .assert()
        .code(13)
        .stderr(predicate::str::contains("not trusted"));
}

#[test]
fn extract_writes_parts_and_pem_roots_work() {
    let dir = tempfile::tempdir().unwrap();
    fixture(dir.path(), CodecKind::Lzss);
    let out = dir.path().join("out");

    img4()
        .arg("extract")
        .arg(dir.path().join("kernel.img4"))
        .arg("-o")
        .arg(&out)
        .args(["--decompress", "--manifest", "--props", "--certs", "--restore-info"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Output Files"));

    assert_eq!(fs::read(out.join("im4p.decompressed.lzss")).unwrap(), kernel_bytes());
    assert_eq!(fs::read(out.join("im4r.bncn.bin")).unwrap(), NONCE);
    assert!(out.join("im4m.der").is_file());
    assert!(out.join("im4m.props.json").is_file());
    let pem = fs::read_to_string(out.join("im4m.cert.1.pem")).unwrap();
    assert!(pem.starts_with("-----BEGIN CERTIFICATE-----\n"));

    // the exported root, as PEM, is accepted as a trust anchor
    img4()
        .arg("verify")
        .arg(dir.path().join("kernel.img4"))
        .args(["--digest-over", "decompressed", "--root"])
        .arg(out.join("im4m.cert.1.pem"))
        .assert()
        .success();

    // non-empty outdir needs --force
    img4()
        .arg("extract")
        .arg(dir.path().join("kernel.img4"))
        .arg("-o")
        .arg(&out)
        .assert()
        .failure()
        .stderr(predicate::str::contains("--force"));
}

#[test]
fn pack_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let pki = fixture(dir.path(), CodecKind::Lzss);
    let raw = dir.path().join("kernel.raw");
    fs::write(&raw, kernel_bytes()).unwrap();

    let im4p = dir.path().join("kernel.im4p");
    img4()
        .args(["pack", "im4p"])
        .arg(&raw)
        .arg("-o")
        .arg(&im4p)
        .args(["--fourcc", "krnl", "--description", "KernelCache", "--compress", "lzfse"])
        .assert()
        .success();

    let im4m = dir.path().join("kernel.im4m");
    let manifest = pki.sign(manifest_for(krnl(), &kernel_bytes()));
    fs::write(&im4m, manifest.to_der().unwrap()).unwrap();

    let packed = dir.path().join("packed.img4");
    img4()
        .args(["pack", "img4", "--im4p"])
        .arg(&im4p)
        .arg("--im4m")
        .arg(&im4m)
        .args(["--nonce", "1122334455667788", "-o"])
        .arg(&packed)
        .assert()
        .success();

    img4()
        .arg("verify")
        .arg(&packed)
        .args(["--digest-over", "decompressed", "--root"])
        .arg(dir.path().join("root.der"))
        .assert()
        .success();

    img4()
        .args(["pack", "im4p"])
        .arg(&raw)
        .arg("-o")
        .arg(dir.path().join("bad.im4p"))
        .args(["--fourcc", "kernel"])
        .assert()
        .code(5);
}

#[test]
fn unknown_input_is_unexpected_tag() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("img3.bin");
    // SEQUENCE { IA5String "IMG3", INTEGER 1 }
    fs::write(&path, [0x30, 0x09, 0x16, 0x04, b'I', b'M', b'G', b'3', 0x02, 0x01, 0x01]).unwrap();
    img4().arg("info").arg(&path).assert().code(3);
}

#[test]
fn verify_sample_with_pem_root() {
    let data = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/data");
    img4()
        .arg("verify")
        .arg(data.join("kernel.img4"))
        .args(["--digest-over", "decompressed", "--root"])
        .arg(data.join("root.pem"))
        .assert()
        .success()
        .stdout(predicate::str::contains("signature: OK (2 certificates"))
        .stdout(predicate::str::contains("digest krnl: OK"));
}
