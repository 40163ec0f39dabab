//! AES-256 over payload data.
//!
//! Payloads are not padded: CBC runs over the largest whole number of blocks
//! and any trailing partial block is left as is.

use aes::Aes256;
use cbc::cipher::{block_padding::NoPadding, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use ctr::cipher::StreamCipher;

use crate::error::{Error, Result};

pub const KEY_LEN: usize = 32;
pub const IV_LEN: usize = 16;
const BLOCK: usize = 16;

type Aes256Ctr = ctr::Ctr128BE<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;
type Aes256CbcEnc = cbc::Encryptor<Aes256>;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, serde::Serialize)]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
pub enum AesMode {
    #[default]
    Cbc,
    Ctr,
}

fn check_lengths(key: &[u8], iv: &[u8]) -> Result<()> {
    if key.len() != KEY_LEN {
        return Err(Error::DecryptionFailed(format!("key must be {KEY_LEN} bytes, got {}", key.len())));
    }
    if iv.len() != IV_LEN {
        return Err(Error::DecryptionFailed(format!("iv must be {IV_LEN} bytes, got {}", iv.len())));
    }
    Ok(())
}

pub fn decrypt_aes(ciphertext: &[u8], key: &[u8], iv: &[u8], mode: AesMode) -> Result<Vec<u8>> {
    check_lengths(key, iv)?;
    let mut buf = ciphertext.to_vec();
    match mode {
        AesMode::Ctr => apply_ctr(&mut buf, key, iv)?,
        AesMode::Cbc => {
            let whole = buf.len() - buf.len() % BLOCK;
            Aes256CbcDec::new_from_slices(key, iv)
                .map_err(|e| Error::DecryptionFailed(format!("cbc init: {e}")))?
                .decrypt_padded_mut::<NoPadding>(&mut buf[..whole])
                .map_err(|e| Error::DecryptionFailed(format!("cbc: {e:?}")))?;
        }
    }
    Ok(buf)
}

/// Inverse of [`decrypt_aes`]; used to produce encrypted payloads.
pub fn encrypt_aes(plaintext: &[u8], key: &[u8], iv: &[u8], mode: AesMode) -> Result<Vec<u8>> {
    check_lengths(key, iv)?;
    let mut buf = plaintext.to_vec();
    match mode {
        AesMode::Ctr => apply_ctr(&mut buf, key, iv)?,
        AesMode::Cbc => {
            let whole = buf.len() - buf.len() % BLOCK;
            Aes256CbcEnc::new_from_slices(key, iv)
                .map_err(|e| Error::DecryptionFailed(format!("cbc init: {e}")))?
                .encrypt_padded_mut::<NoPadding>(&mut buf[..whole], whole)
                .map_err(|e| Error::DecryptionFailed(format!("cbc: {e:?}")))?;
        }
    }
    Ok(buf)
}

fn apply_ctr(buf: &mut [u8], key: &[u8], iv: &[u8]) -> Result<()> {
    let mut c = Aes256Ctr::new_from_slices(key, iv).map_err(|e| Error::DecryptionFailed(format!("ctr init: {e}")))?;
    c.apply_keystream(buf);
    Ok(())
}
