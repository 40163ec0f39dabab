use std::collections::HashMap;
use std::fmt;

use once_cell::sync::Lazy;
use serde::{Serialize, Serializer};

use crate::error::{Error, Result};

/// Four ASCII bytes naming a structure, component, or property.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct FourCC([u8; 4]);

impl FourCC {
    pub const IMG4: FourCC = FourCC(*b"IMG4");
    pub const IM4P: FourCC = FourCC(*b"IM4P");
    pub const IM4M: FourCC = FourCC(*b"IM4M");
    pub const IM4R: FourCC = FourCC(*b"IM4R");
    pub const MANB: FourCC = FourCC(*b"MANB");
    pub const MANP: FourCC = FourCC(*b"MANP");
    pub const DGST: FourCC = FourCC(*b"DGST");
    pub const BNCN: FourCC = FourCC(*b"BNCN");

    pub const fn new(bytes: [u8; 4]) -> Self {
        FourCC(bytes)
    }

    pub fn parse(s: &str) -> Result<Self> {
        let bytes: [u8; 4] = s
            .as_bytes()
            .try_into()
            .map_err(|_| Error::InvalidFourCC(s.to_string()))?;
        if !bytes.iter().all(|b| b.is_ascii_graphic()) {
            return Err(Error::InvalidFourCC(s.to_string()));
        }
        Ok(FourCC(bytes))
    }

    pub fn bytes(&self) -> [u8; 4] {
        self.0
    }

    /// Numeric form, used as the private-class tag number in manifests.
    pub fn as_u32(&self) -> u32 {
        u32::from_be_bytes(self.0)
    }

    pub fn from_u32(v: u32) -> Self {
        FourCC(v.to_be_bytes())
    }

    pub fn as_str(&self) -> &str {
        // constructors only admit ASCII
        std::str::from_utf8(&self.0).unwrap_or("????")
    }

    pub fn description(&self) -> Option<&'static str> {
        get_description(self.as_str())
    }
}

impl TryFrom<&str> for FourCC {
    type Error = Error;

    fn try_from(s: &str) -> Result<Self> {
        FourCC::parse(s)
    }
}

impl fmt::Display for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FourCC({:?})", self.as_str())
    }
}

impl Serialize for FourCC {
    fn serialize<S: Serializer>(&self, s: S) -> core::result::Result<S::Ok, S::Error> {
        s.serialize_str(self.as_str())
    }
}

static FOURCC_MAP: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    [
        // boot chain
        ("ibot", "iBoot"),
        ("ibec", "iBEC (recovery/restore bootloader)"),
        ("ibss", "iBSS (early-stage bootloader)"),
        ("illb", "LLB (low-level bootloader)"),
        ("ibdt", "iBoot Data"),
        // restore
        ("rdsk", "Restore RamDisk"),
        ("rdtr", "Restore DeviceTree"),
        ("rkrn", "Restore KernelCache"),
        ("rlgo", "Restore Logo"),
        ("rosi", "RestoreOS"),
        ("rtsc", "Restore Trust Cache"),
        // kernel and system
        ("krnl", "KernelCache"),
        ("dtre", "DeviceTree"),
        ("isys", "System Volume Root Hash"),
        ("csys", "Base System Volume Root Hash"),
        ("trst", "Static Trust Cache"),
        ("logo", "Apple Logo"),
        ("recm", "Recovery Mode Image"),
        // coprocessor firmware
        ("sepi", "SEP Firmware"),
        ("rsep", "Restore SEP Firmware"),
        ("anef", "ANE Firmware (Neural Engine)"),
        ("aopf", "AOP Firmware (Always-On Processor)"),
        ("dcp2", "Display Coprocessor 2 Firmware"),
        ("gfxf", "GPU Firmware"),
        ("sptm", "Secure Page Table Monitor"),
        ("trxm", "Trusted Execution Monitor"),
        // structure labels
        ("MANB", "Manifest Body"),
        ("MANP", "Manifest Properties"),
        // manifest properties
        ("BORD", "Board Identifier"),
        ("CEPO", "Chip Epoch"),
        ("CHIP", "Chip Identifier"),
        ("CPRO", "Certificate Production Status"),
        ("CSEC", "Certificate Security Mode"),
        ("ECID", "Exclusive Chip ID"),
        ("SDOM", "Security Domain"),
        ("BNCH", "Boot Nonce Hash (ApNonce)"),
        ("BNCN", "Boot Nonce"),
        ("DGST", "Payload Digest"),
        ("EKEY", "Effective Encryption Key Required"),
        ("EPRO", "Effective Production Status"),
        ("ESEC", "Effective Security Mode"),
        ("snon", "SEP Nonce"),
        ("srvn", "Security Revision"),
        ("love", "Long OS Version"),
        ("apmv", "Apple Manifest Version"),
        ("tstp", "Timestamp"),
    ]
    .into_iter()
    .collect()
});

/// Get description for any 4CC code (image or property)
pub fn get_description(code: &str) -> Option<&'static str> {
    FOURCC_MAP.get(code).copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_and_unknown_codes() {
        assert_eq!(get_description("ibot"), Some("iBoot"));
        assert_eq!(get_description("krnl"), Some("KernelCache"));
        assert!(get_description("ZZZZ").is_none());
    }

    #[test]
    fn parse_rejects_wrong_length_and_non_ascii() {
        assert!(FourCC::parse("krnl").is_ok());
        assert_eq!(FourCC::parse("krn"), Err(Error::InvalidFourCC("krn".into())));
        assert!(FourCC::parse("kernel").is_err());
        assert!(FourCC::parse("kr l").is_err());
        assert!(FourCC::parse("kré").is_err());
    }

    #[test]
    fn numeric_form_matches_private_tag() {
        assert_eq!(FourCC::MANB.as_u32(), 0x4D41_4E42);
        assert_eq!(FourCC::from_u32(0x424E_434E), FourCC::BNCN);
        assert_eq!(FourCC::from_u32(FourCC::parse("iBEC").unwrap().as_u32()).as_str(), "iBEC");
    }
}
