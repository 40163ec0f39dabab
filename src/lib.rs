//! Parse, build, decrypt, decompress and verify Image4 objects: the `IMG4`
//! container, `IM4P` payloads, `IM4M` manifests and `IM4R` restore info.
//!
//! ```no_run
//! use img4::{compression::Dispatcher, parse_any, Parsed};
//!
//! # fn main() -> img4::Result<()> {
//! let bytes = std::fs::read("kernelcache.img4").unwrap_or_default();
//! if let Parsed::Img4(container) = parse_any(&bytes)? {
//!     let mut payload = container.payload.clone();
//!     payload.decompress(&Dispatcher::default())?;
//!     if let Some(manifest) = container.extract_manifest() {
//!         manifest.verify_payload_digest(&payload, payload.fourcc)?;
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod compression;
pub mod crypto;
pub mod der;
pub mod error;
pub mod fourcc;
pub mod im4m;
pub mod im4p;
pub mod im4r;
pub mod img4;
pub mod keybag;
pub mod property;
pub mod verify;

pub use compression::{CodecKind, Dispatcher, DispatcherConfig};
pub use error::{Error, Result};
pub use fourcc::FourCC;
pub use im4m::{ImageEntry, Manifest};
pub use im4p::Payload;
pub use im4r::RestoreInfo;
pub use img4::{parse_any, Container, Kind, Parsed};
pub use keybag::{Keybag, KeybagList};
pub use verify::DigestAlgorithm;
