use std::fmt::{self, Write};

use img4::im4m::ManifestSummary;
use img4::im4p::PayloadSummary;
use img4::im4r::RestoreInfo;
use img4::property::PropertyValue;
use img4::{fourcc, Kind};

// ANSI color codes
const RESET: &str = "\x1b[0m";
const BOLD: &str = "\x1b[1m";
const DIM: &str = "\x1b[2m";
const CYAN: &str = "\x1b[36m";
const GREEN: &str = "\x1b[32m";
const BLUE: &str = "\x1b[34m";
const MAGENTA: &str = "\x1b[35m";
const RED: &str = "\x1b[31m";
const BRIGHT_GREEN: &str = "\x1b[92m";
const BRIGHT_YELLOW: &str = "\x1b[93m";
const BRIGHT_CYAN: &str = "\x1b[96m";

/// Check if color output should be enabled
pub fn use_colors() -> bool {
    atty::is(atty::Stream::Stdout) && std::env::var_os("NO_COLOR").is_none()
}

/// Paths to output files written during processing
#[derive(Default)]
pub struct OutputPaths {
    pub files: Vec<(String, String)>, // (label, path)
}

impl OutputPaths {
    pub fn add(&mut self, label: impl Into<String>, path: impl Into<String>) {
        self.files.push((label.into(), path.into()));
    }
}

/// Everything `info`/`extract` show, in the shape `--json` prints.
#[derive(Debug, serde::Serialize)]
pub struct Summary {
    pub kind: Kind,
    pub payload: Option<PayloadSummary>,
    pub manifest: Option<ManifestSummary>,
    pub restore_info: Option<RestoreInfo>,
    pub notes: Vec<String>,
}

/// Format the summary in a clean, diskutil-style output
pub fn format_summary(summary: &Summary, output_paths: &OutputPaths, colors: bool) -> Result<String, fmt::Error> {
    let mut out = String::new();
    let title = match summary.kind {
        Kind::Img4 => "IMG4 Container",
        Kind::Im4p => "IM4P Payload (Standalone)",
        Kind::Im4m => "IM4M Manifest (Standalone)",
        Kind::Im4r => "IM4R Restore Info (Standalone)",
    };
    if colors {
        writeln!(out, "{BOLD}{title}{RESET}")?;
        writeln!(out, "{CYAN}{}{RESET}", "=".repeat(50))?;
    } else {
        writeln!(out, "{title}")?;
        writeln!(out, "{}", "=".repeat(50))?;
    }
    writeln!(out)?;

    let payload_type = summary.payload.as_ref().map(|p| p.fourcc.as_str());
    if let Some(p) = &summary.payload {
        render_im4p(&mut out, p, colors)?;
        writeln!(out)?;
    }
    if let Some(m) = &summary.manifest {
        render_im4m(&mut out, m, payload_type, colors)?;
        writeln!(out)?;
    }
    if let Some(r) = &summary.restore_info {
        render_im4r(&mut out, r, colors)?;
        writeln!(out)?;
    }
    if !summary.notes.is_empty() {
        section(&mut out, "Notes", RED, colors)?;
        for n in &summary.notes {
            writeln!(out, "   - {n}")?;
        }
        writeln!(out)?;
    }
    if !output_paths.files.is_empty() {
        section(&mut out, "Output Files", BLUE, colors)?;
        let pairs: Vec<(&str, String)> = output_paths.files.iter().map(|(l, p)| (l.as_str(), p.clone())).collect();
        render_kv_block(&mut out, &pairs, 3, colors)?;
    }
    Ok(out)
}

fn section(out: &mut String, name: &str, color: &str, colors: bool) -> fmt::Result {
    if colors {
        writeln!(out, "{BOLD}{color}{name}{RESET}")
    } else {
        writeln!(out, "{name}")
    }
}

fn render_im4p(out: &mut String, info: &PayloadSummary, colors: bool) -> fmt::Result {
    section(out, "IM4P Payload", BRIGHT_CYAN, colors)?;
    let desc = info.component.unwrap_or("Unknown");
    if colors {
        writeln!(out, "   {BOLD}{CYAN}Type{RESET}: {BOLD}{GREEN}{}{RESET} ({BRIGHT_CYAN}{desc}{RESET})", info.fourcc)?;
    } else {
        writeln!(out, "   Type         :  {} ({desc})", info.fourcc)?;
    }

    let kbag = match &info.keybags {
        Some(k) if !k.is_empty() => {
            let n = k.entries().len();
            let classes: Vec<&str> = k.entries().iter().map(|e| e.usage_name()).collect();
            format!("Present ({n} entr{}: {})", if n == 1 { "y" } else { "ies" }, classes.join(", "))
        }
        _ => "Not present".to_string(),
    };
    let mut pairs = vec![
        ("Description", info.description.clone()),
        ("Data Size", format_bytes(info.size)),
        ("Compression", info.codec.to_string()),
        ("KBAG", kbag),
    ];
    if let Some(c) = &info.compression {
        let size = c.uncompressed_size.map_or_else(|| "unknown".to_string(), |n| format_bytes(n as usize));
        pairs.push(("Compression Info", format!("method {} ({size})", c.method)));
    }
    if let Some(n) = info.extra_data_len {
        pairs.push(("Extra Data", format_bytes(n)));
    }
    if info.unknown_elements > 0 {
        pairs.push(("Unparsed Elements", info.unknown_elements.to_string()));
    }
    render_kv_block(out, &pairs, 3, colors)
}

fn render_im4m(out: &mut String, info: &ManifestSummary, payload_type: Option<&str>, colors: bool) -> fmt::Result {
    section(out, "IM4M Manifest", BRIGHT_YELLOW, colors)?;
    let n = info.certificates.len();
    let pairs = vec![
        ("Version", info.version.to_string()),
        ("Certificate Chain", format!("{n} certificate{}", if n == 1 { "" } else { "s" })),
        ("Signature Length", format_bytes(info.signature_len)),
        ("Digest", info.digest_algorithm.map_or_else(|| "Unknown".to_string(), |a| a.to_string())),
    ];
    render_kv_block(out, &pairs, 3, colors)?;
    writeln!(out)?;

    if !info.properties.is_empty() {
        if colors {
            writeln!(out, "   {BOLD}Manifest Properties:{RESET}")?;
        } else {
            writeln!(out, "   Manifest Properties:")?;
        }
        let pairs: Vec<(&str, String)> = info
            .properties
            .iter()
            .map(|p| (p.name.as_str(), render_value(p.name.as_str(), &p.value)))
            .collect();
        render_kv_block(out, &pairs, 6, colors)?;
        writeln!(out)?;
    }

    if !info.images.is_empty() {
        let count = info.images.len();
        if colors {
            writeln!(
                out,
                "   {BOLD}Images Referenced:{RESET} {BRIGHT_CYAN}{count}{RESET} component{}",
                if count == 1 { "" } else { "s" }
            )?;
        } else {
            writeln!(out, "   Images Referenced:   {count} component{}", if count == 1 { "" } else { "s" })?;
        }
        let codes: Vec<&str> = info.images.iter().map(|i| i.fourcc.as_str()).collect();
        let (boot_chain, restore, firmware) = group_images(&codes);
        for code in boot_chain.iter().chain(&restore).chain(&firmware) {
            render_image_item(out, code, payload_type, colors)?;
        }
    }
    for (i, subject) in info.certificates.iter().enumerate() {
        if i == 0 {
            writeln!(out)?;
            writeln!(out, "   Certificates:")?;
        }
        writeln!(out, "      [{i}] {subject}")?;
    }
    Ok(())
}

fn render_value(name: &str, v: &PropertyValue) -> String {
    let text = match v {
        PropertyValue::Integer(n) if matches!(name, "CHIP" | "BORD" | "ECID" | "CEPO" | "SDOM") => format!("{n:#x}"),
        PropertyValue::Integer(n) => n.to_string(),
        PropertyValue::Boolean(b) => b.to_string(),
        PropertyValue::String(s) => s.clone(),
        PropertyValue::Data(d) => hex::encode(d),
        PropertyValue::Raw(r) => format!("<{}> {}", r.describe(), hex::encode(r.to_der())),
    };
    match fourcc::get_description(name) {
        Some(desc) => format!("{text}  ({desc})"),
        None => text,
    }
}

fn render_im4r(out: &mut String, info: &RestoreInfo, colors: bool) -> fmt::Result {
    section(out, "IM4R Restore Info", MAGENTA, colors)?;
    let pairs: Vec<(&str, String)> = info
        .properties
        .iter()
        .map(|p| (p.name.as_str(), render_value(p.name.as_str(), &p.value)))
        .collect();
    render_kv_block(out, &pairs, 3, colors)
}

fn render_image_item(out: &mut String, code: &str, payload_type: Option<&str>, colors: bool) -> fmt::Result {
    let desc = fourcc::get_description(code).unwrap_or("Unknown component");
    if payload_type == Some(code) {
        if colors {
            writeln!(out, "      {DIM}•{RESET} {BOLD}{GREEN}{code}{RESET} - {desc} {BOLD}{BRIGHT_GREEN}← THIS FILE{RESET}")
        } else {
            writeln!(out, "      • {code} - {desc} ← THIS FILE")
        }
    } else if colors {
        writeln!(out, "      {DIM}•{RESET} {BOLD}{code}{RESET} - {DIM}{desc}{RESET}")
    } else {
        writeln!(out, "      • {code} - {desc}")
    }
}

/// Group images into boot chain, restore, and firmware categories
fn group_images<'a>(images: &[&'a str]) -> (Vec<&'a str>, Vec<&'a str>, Vec<&'a str>) {
    let mut boot_chain = Vec::new();
    let mut restore = Vec::new();
    let mut firmware = Vec::new();
    for &code in images {
        if matches!(code, "ibot" | "ibec" | "ibss" | "ibdt" | "illb") {
            boot_chain.push(code);
        } else if code.starts_with('r') && code.len() == 4 {
            restore.push(code);
        } else {
            firmware.push(code);
        }
    }
    (boot_chain, restore, firmware)
}

/// Render a block of key-value pairs with aligned colons
fn render_kv_block(out: &mut String, pairs: &[(&str, String)], indent: usize, colors: bool) -> fmt::Result {
    let max_key_len = pairs.iter().map(|(k, _)| k.len()).max().unwrap_or(0);
    let indent_str = " ".repeat(indent);
    for (key, value) in pairs {
        let padding = " ".repeat(max_key_len - key.len());
        if colors {
            writeln!(out, "{indent_str}{BOLD}{CYAN}{key}{RESET}{padding}: {BRIGHT_CYAN}{value}{RESET}")?;
        } else {
            writeln!(out, "{indent_str}{key}{padding}:  {value}")?;
        }
    }
    Ok(())
}

/// Format bytes with thousands separators
pub fn format_bytes(n: usize) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + s.len() / 3);
    for (i, ch) in s.chars().enumerate() {
        if i > 0 && (s.len() - i) % 3 == 0 {
            result.push(',');
        }
        result.push(ch);
    }
    format!("{result} bytes")
}

#[cfg(test)]
mod tests {
    use super::*;
    use img4::im4p::Payload;
    use img4::FourCC;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(1296806), "1,296,806 bytes");
        assert_eq!(format_bytes(512), "512 bytes");
        assert_eq!(format_bytes(1000000), "1,000,000 bytes");
    }

    #[test]
    fn test_group_images() {
        let images = ["ibot", "krnl", "rdsk", "rkrn", "anef"];
        let (boot, restore, firmware) = group_images(&images);
        assert_eq!(boot, vec!["ibot"]);
        assert_eq!(restore, vec!["rdsk", "rkrn"]);
        assert_eq!(firmware, vec!["krnl", "anef"]);
    }

    #[test]
    fn plain_summary_names_payload() {
        let p = Payload::new(FourCC::parse("krnl").unwrap(), "KernelCache", vec![0; 2048]);
        let summary = Summary {
            kind: Kind::Im4p,
            payload: Some(p.summary()),
            manifest: None,
            restore_info: Some(RestoreInfo::new([0xAA; 8])),
            notes: vec![],
        };
        let text = format_summary(&summary, &OutputPaths::default(), false).unwrap();
        assert!(text.starts_with("IM4P Payload (Standalone)\n"));
        assert!(text.contains("krnl (KernelCache)"));
        assert!(text.contains("2,048 bytes"));
        assert!(text.contains("BNCN:  aaaaaaaaaaaaaaaa  (Boot Nonce)"));
    }
}
