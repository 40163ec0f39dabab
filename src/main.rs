use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;

use img4::crypto::AesMode;
use img4::keybag::{DEVELOPMENT, PRODUCTION};
use img4::{CodecKind, Container, Dispatcher, DispatcherConfig, FourCC, Manifest, Parsed, Payload, RestoreInfo};

mod formatter;
mod util;

const PORTABLE_ENV: &str = "IMG4_FORCE_PORTABLE_CODECS";

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum KbagClass {
    Prod, // usage class 1
    Dev,  // usage class 2
}

impl KbagClass {
    fn usage_class(self) -> u64 {
        match self {
            KbagClass::Prod => PRODUCTION,
            KbagClass::Dev => DEVELOPMENT,
        }
    }
}

/// What the manifest digest of `verify` is computed over.
#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum DigestOver {
    /// payload data exactly as stored
    Data,
    /// payload data after decompression
    Decompressed,
    /// the whole DER-encoded IM4P
    Im4p,
}

/// IMG4 / IM4P / IM4M / IM4R inspector, extractor, packer and verifier.
#[derive(Parser, Debug)]
#[command(name = "img4", version)]
struct Cli {
    /// Debug logging on stderr (unless RUST_LOG is set)
    #[arg(short = 'v', long = "verbose", global = true, action = ArgAction::SetTrue)]
    verbose: bool,

    /// Print JSON instead of the formatted report
    #[arg(long = "json", global = true, action = ArgAction::SetTrue)]
    json: bool,

    /// Use the portable codecs even where a platform backend exists
    #[arg(long = "portable-codecs", global = true, action = ArgAction::SetTrue)]
    portable_codecs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Describe an .img4, .im4p, .im4m or .im4r file
    Info {
        #[arg(value_name = "INPUT")]
        input: PathBuf,
    },
    /// Write payload, manifest, restore info and certificates to a directory
    Extract(ExtractArgs),
    /// Build an IM4P or IMG4
    #[command(subcommand)]
    Pack(PackCommand),
    /// Check the manifest signature, certificate chain and payload digest
    Verify(VerifyArgs),
}

#[derive(Args, Debug)]
struct ExtractArgs {
    #[arg(value_name = "INPUT")]
    input: PathBuf,

    /// Output directory; created if missing
    #[arg(short = 'o', long = "outdir", default_value = "img4_dump")]
    outdir: PathBuf,

    /// Overwrite into existing non-empty outdir
    #[arg(short = 'f', long = "force", action = ArgAction::SetTrue)]
    force: bool,

    /// Decrypt the payload (with --key/--iv or a keybag entry)
    #[arg(long = "decrypt", action = ArgAction::SetTrue)]
    decrypt: bool,

    #[arg(long = "aes-mode", value_enum, default_value_t = AesMode::Cbc)]
    aes_mode: AesMode,

    /// Hex IV (32 hex chars), overrides the keybag
    #[arg(long = "iv")]
    iv_hex: Option<String>,

    /// Hex key (64 hex chars), overrides the keybag
    #[arg(long = "key")]
    key_hex: Option<String>,

    /// Keybag entry to decrypt with
    #[arg(long = "kbag-class", value_enum, default_value_t = KbagClass::Prod)]
    kbag_class: KbagClass,

    /// Also write the still-encrypted payload
    #[arg(long = "keep-ciphertext", action = ArgAction::SetTrue)]
    keep_ciphertext: bool,

    /// Decompress the payload (after decryption)
    #[arg(long = "decompress", action = ArgAction::SetTrue)]
    decompress: bool,

    /// Write the manifest as DER
    #[arg(long = "manifest", action = ArgAction::SetTrue)]
    manifest: bool,

    /// Write manifest properties and image entries as JSON
    #[arg(long = "props", action = ArgAction::SetTrue)]
    props: bool,

    /// Write the manifest certificate chain (DER + PEM)
    #[arg(long = "certs", action = ArgAction::SetTrue)]
    certs: bool,

    /// Write the restore info as DER and its boot nonce
    #[arg(long = "restore-info", action = ArgAction::SetTrue)]
    restore_info: bool,
}

#[derive(Subcommand, Debug)]
enum PackCommand {
    /// Wrap raw bytes in an IM4P
    Im4p {
        #[arg(value_name = "RAW")]
        input: PathBuf,
        #[arg(short = 'o', long = "output")]
        output: PathBuf,
        /// Component tag, e.g. krnl
        #[arg(long = "fourcc")]
        fourcc: String,
        #[arg(long = "description", default_value = "")]
        description: String,
        #[arg(long = "compress", value_enum, default_value_t = CodecKind::None)]
        compress: CodecKind,
        /// Extra bytes kept after the LZSS stream (e.g. a KPP blob)
        #[arg(long = "extra")]
        extra: Option<PathBuf>,
    },
    /// Assemble an IMG4 from an IM4P, an optional IM4M and an optional boot nonce
    Img4 {
        #[arg(long = "im4p")]
        im4p: PathBuf,
        #[arg(long = "im4m")]
        im4m: Option<PathBuf>,
        /// Boot-nonce generator, 16 hex chars
        #[arg(long = "nonce")]
        nonce: Option<String>,
        #[arg(short = 'o', long = "output")]
        output: PathBuf,
    },
}

#[derive(Args, Debug)]
struct VerifyArgs {
    /// .img4, .im4p (with --im4m) or .im4m
    #[arg(value_name = "INPUT")]
    input: PathBuf,

    /// Separate manifest to check the input against
    #[arg(long = "im4m")]
    im4m: Option<PathBuf>,

    /// Trusted root certificate, PEM or DER; repeatable
    #[arg(long = "root", required = true)]
    roots: Vec<PathBuf>,

    #[arg(long = "digest-over", value_enum, default_value_t = DigestOver::Data)]
    digest_over: DigestOver,

    /// Manifest entry to check instead of the payload's own tag
    #[arg(long = "fourcc")]
    fourcc: Option<String>,
}

#[derive(Debug, Serialize)]
struct VerifyReport {
    signature: &'static str,
    digest_algorithm: String,
    certificates: usize,
    payload: Option<String>,
    digest: Option<&'static str>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if std::env::var_os("RUST_LOG").is_none() {
        let level = if cli.verbose { "debug" } else { "warn" };
        std::env::set_var("RUST_LOG", level);
    }
    env_logger::init();
    log::debug!("Parsed CLI options: {:?}", cli);

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            let code = e
                .chain()
                .find_map(|c| c.downcast_ref::<img4::Error>())
                .map_or(1, img4::Error::exit_code);
            ExitCode::from(u8::try_from(code).unwrap_or(1))
        }
    }
}

fn run(cli: &Cli) -> Result<()> {
    let mut config = DispatcherConfig::from_env_value(std::env::var(PORTABLE_ENV).ok().as_deref());
    if cli.portable_codecs {
        config.force_portable = true;
    }
    let dispatcher = Dispatcher::new(config);
    log::debug!("codec backend: {}", dispatcher.backend_name());

    match &cli.command {
        Command::Info { input } => {
            let parsed = read_parsed(input)?;
            report(cli, &summarize(&parsed, Vec::new()), &formatter::OutputPaths::default())
        }
        Command::Extract(args) => extract(cli, args, &dispatcher),
        Command::Pack(cmd) => pack(cmd, &dispatcher),
        Command::Verify(args) => verify(cli, args, &dispatcher),
    }
}

fn read_parsed(path: &Path) -> Result<Parsed> {
    let bytes = fs::read(path).with_context(|| format!("open {:?}", path))?;
    log::debug!("Read {} bytes from {:?}", bytes.len(), path);
    Ok(img4::parse_any(&bytes).with_context(|| format!("parse {:?}", path))?)
}

fn summarize(parsed: &Parsed, notes: Vec<String>) -> formatter::Summary {
    formatter::Summary {
        kind: parsed.kind(),
        payload: parsed.payload().map(Payload::summary),
        manifest: parsed.manifest().map(Manifest::summary),
        restore_info: parsed.restore_info().cloned(),
        notes,
    }
}

fn report(cli: &Cli, summary: &formatter::Summary, paths: &formatter::OutputPaths) -> Result<()> {
    if cli.json {
        println!("{}", serde_json::to_string_pretty(summary)?);
    } else {
        print!("{}", formatter::format_summary(summary, paths, formatter::use_colors())?);
    }
    Ok(())
}

fn write(paths: &mut formatter::OutputPaths, label: impl Into<String>, path: PathBuf, data: &[u8]) -> Result<()> {
    fs::write(&path, data).with_context(|| format!("write {:?}", path))?;
    log::debug!("wrote {:?} ({} bytes)", path, data.len());
    paths.add(label, path.display().to_string());
    Ok(())
}

fn extract(cli: &Cli, args: &ExtractArgs, dispatcher: &Dispatcher) -> Result<()> {
    let parsed = read_parsed(&args.input)?;
    util::ensure_outdir(&args.outdir, args.force)?;

    let mut notes = Vec::new();
    let mut paths = formatter::OutputPaths::default();
    let dir = &args.outdir;

    if let Some(original) = parsed.payload() {
        write(&mut paths, "Payload", dir.join("im4p.bin"), &original.data)?;
        if let Some(kbag) = &original.kbag {
            write(&mut paths, "KBAG", dir.join("im4p.kbag.der"), &kbag.to_der())?;
        }

        let mut payload = original.clone();
        if args.decrypt {
            if args.keep_ciphertext {
                write(&mut paths, "Ciphertext", dir.join("im4p.ciphertext"), &original.data)?;
            }
            let (key, iv) = util::resolve_key_iv(
                args.key_hex.as_deref(),
                args.iv_hex.as_deref(),
                args.kbag_class.usage_class(),
                original,
            )?;
            payload.decrypt_with_mode(&key, &iv, args.aes_mode)?;
            let (valid, detected) = util::validate_decryption(&payload.data);
            if valid {
                log::debug!("Decryption validation: OK (detected: {detected})");
            } else {
                log::warn!("Decryption validation FAILED: {detected}; try another --aes-mode or key");
                notes.push(format!("decryption validation failed: {detected}"));
            }
            write(&mut paths, "Decrypted", dir.join("im4p.decrypted"), &payload.data)?;
        }

        if args.decompress {
            let codec = payload.codec();
            if codec == CodecKind::None {
                notes.push("no known compression detected".into());
            } else {
                payload.decompress(dispatcher)?;
                let name = format!("im4p.decompressed.{}", codec.name());
                write(&mut paths, "Decompressed", dir.join(name), &payload.data)?;
                if let Some(extra) = &payload.extra_data {
                    write(&mut paths, "Extra Data", dir.join("im4p.extra.bin"), extra)?;
                }
            }
        }
    }

    if let Some(manifest) = parsed.manifest() {
        if args.manifest {
            write(&mut paths, "Manifest", dir.join("im4m.der"), &manifest.to_der()?)?;
        }
        if args.props {
            let summary = manifest.summary();
            let json = serde_json::json!({ "properties": summary.properties, "images": summary.images });
            write(&mut paths, "Manifest Properties", dir.join("im4m.props.json"), &serde_json::to_vec_pretty(&json)?)?;
        }
        if args.certs {
            for (i, der) in manifest.certificate_chain.iter().enumerate() {
                write(&mut paths, format!("Certificate {i} (DER)"), dir.join(format!("im4m.cert.{i}.der")), der)?;
                let pem = util::pem_certificate(der);
                write(&mut paths, format!("Certificate {i} (PEM)"), dir.join(format!("im4m.cert.{i}.pem")), pem.as_bytes())?;
            }
        }
    }

    if let (Some(info), true) = (parsed.restore_info(), args.restore_info) {
        write(&mut paths, "IM4R", dir.join("im4r.der"), &info.to_der())?;
        match info.get_nonce() {
            Ok(nonce) => write(&mut paths, "Boot Nonce", dir.join("im4r.bncn.bin"), nonce)?,
            Err(e) => notes.push(e.to_string()),
        }
    }

    report(cli, &summarize(&parsed, notes), &paths)
}

fn pack(cmd: &PackCommand, dispatcher: &Dispatcher) -> Result<()> {
    match cmd {
        PackCommand::Im4p { input, output, fourcc, description, compress, extra } => {
            let data = fs::read(input).with_context(|| format!("open {:?}", input))?;
            let mut payload = Payload::build(fourcc, description, data, None)?;
            if let Some(extra) = extra {
                payload.extra_data = Some(fs::read(extra).with_context(|| format!("open {:?}", extra))?);
            }
            payload.compress(dispatcher, *compress, false)?;
            fs::write(output, payload.to_der()).with_context(|| format!("write {:?}", output))?;
            log::info!("wrote {} IM4P ({}) to {:?}", payload.fourcc, payload.codec(), output);
        }
        PackCommand::Img4 { im4p, im4m, nonce, output } => {
            let payload = Payload::parse(&fs::read(im4p).with_context(|| format!("open {:?}", im4p))?)?;
            let manifest = match im4m {
                Some(p) => Some(Manifest::parse(&fs::read(p).with_context(|| format!("open {:?}", p))?)?),
                None => None,
            };
            let restore_info = match nonce {
                Some(hex) => Some(RestoreInfo::from_nonce(&util::decode_hex(hex)?)?),
                None => None,
            };
            let container = Container::new(payload, manifest, restore_info);
            if let Err(e) = container.check_consistency() {
                log::warn!("{e}");
            }
            fs::write(output, container.to_der()?).with_context(|| format!("write {:?}", output))?;
        }
    }
    Ok(())
}

fn verify(cli: &Cli, args: &VerifyArgs, dispatcher: &Dispatcher) -> Result<()> {
    let parsed = read_parsed(&args.input)?;
    let manifest = match &args.im4m {
        Some(p) => Manifest::parse(&fs::read(p).with_context(|| format!("open {:?}", p))?)?,
        None => match parsed.manifest() {
            Some(m) => m.clone(),
            None => bail!("{:?} carries no manifest; pass --im4m", args.input),
        },
    };

    let mut roots = Vec::new();
    for path in &args.roots {
        roots.extend(util::read_certificates(path)?);
    }
    manifest.verify_signature(&roots)?;
    let mut report = VerifyReport {
        signature: "ok",
        digest_algorithm: manifest.digest_algorithm()?.to_string(),
        certificates: manifest.certificate_chain.len(),
        payload: None,
        digest: None,
    };

    if let Some(payload) = parsed.payload() {
        let fourcc = match &args.fourcc {
            Some(s) => FourCC::parse(s)?,
            None => payload.fourcc,
        };
        match args.digest_over {
            DigestOver::Data => manifest.verify_payload_digest(payload, fourcc)?,
            DigestOver::Decompressed => {
                let mut payload = payload.clone();
                payload.decompress(dispatcher)?;
                manifest.verify_payload_digest(&payload, fourcc)?;
            }
            DigestOver::Im4p => manifest.verify_encoded_payload_digest(payload, fourcc)?,
        }
        report.payload = Some(fourcc.to_string());
        report.digest = Some("ok");
    }

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "signature: OK ({} certificate{}, {})",
            report.certificates,
            if report.certificates == 1 { "" } else { "s" },
            report.digest_algorithm
        );
        if let Some(fourcc) = &report.payload {
            println!("digest {fourcc}: OK");
        }
    }
    Ok(())
}
