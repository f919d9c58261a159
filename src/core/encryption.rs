//! AES-128 segment decryption
//!
//! The key is fetched once per job. When the playlist carries no `IV` attribute the IV of
//! segment *i* is twelve zero bytes followed by *i* as a big-endian `u32`.

use aes::Aes128;
use cbc::Decryptor;
use cipher::{block_padding::Pkcs7, BlockDecryptMut, KeyIvInit};

use crate::core::error_handling::{EngineError, EngineResult};
use crate::core::fetcher::PlaylistFetcher;
use crate::core::models::EncryptionInfo;
use crate::utils::network::RequestContext;

pub const METHOD_AES_128: &str = "AES-128";

type Aes128CbcDec = Decryptor<Aes128>;

/// Key material for one job
#[derive(Clone)]
pub struct EncryptionContext {
    key: [u8; 16],
    explicit_iv: Option<[u8; 16]>,
}

impl std::fmt::Debug for EncryptionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionContext")
            .field("key", &"<redacted>")
            .field("explicit_iv", &self.explicit_iv.is_some())
            .finish()
    }
}

impl EncryptionContext {
    /// Fetch the key named by `info` and prepare per-segment decryption
    pub async fn establish(
        info: &EncryptionInfo,
        fetcher: &PlaylistFetcher,
        request: &RequestContext,
    ) -> EngineResult<Self> {
        if !info.method.eq_ignore_ascii_case(METHOD_AES_128) {
            return Err(EngineError::UnsupportedEncryption {
                method: info.method.clone(),
            });
        }

        tracing::debug!("Fetching encryption key from: {}", info.key_url);
        let key_data = fetcher
            .bytes(&info.key_url, request)
            .await
            .map_err(|e| EngineError::KeyFetch {
                url: info.key_url.clone(),
                reason: e.to_string(),
            })?;

        let key: [u8; 16] = key_data[..].try_into().map_err(|_| EngineError::KeyFetch {
            url: info.key_url.clone(),
            reason: format!("AES-128 key must be 16 bytes, got {}", key_data.len()),
        })?;
        tracing::info!("Got AES-128 key ({} bytes)", key_data.len());

        Self::from_key(key, info.iv_hex.as_deref())
    }

    pub fn from_key(key: [u8; 16], iv_hex: Option<&str>) -> EngineResult<Self> {
        let explicit_iv = match iv_hex {
            Some(iv) => Some(parse_iv(iv).ok_or_else(|| {
                EngineError::Config(format!("IV {:?} is not 16 bytes of hex", iv))
            })?),
            None => None,
        };
        Ok(Self { key, explicit_iv })
    }

    /// IV for the segment at zero-based `index`
    pub fn iv_for(&self, index: usize) -> [u8; 16] {
        self.explicit_iv.unwrap_or_else(|| derive_iv(index))
    }

    /// AES-128-CBC decrypt one segment, stripping PKCS#7 padding
    pub fn decrypt(&self, index: usize, data: &[u8]) -> EngineResult<Vec<u8>> {
        let iv = self.iv_for(index);
        let decryptor = Aes128CbcDec::new_from_slices(&self.key, &iv).map_err(|e| {
            EngineError::Decrypt {
                index,
                reason: e.to_string(),
            }
        })?;

        decryptor
            .decrypt_padded_vec_mut::<Pkcs7>(data)
            .map_err(|_| EngineError::Decrypt {
                index,
                reason: format!("invalid ciphertext or padding ({} bytes)", data.len()),
            })
    }
}

/// Default HLS IV: `00 x 12 || index as u32 big-endian`
pub fn derive_iv(index: usize) -> [u8; 16] {
    let mut iv = [0u8; 16];
    iv[12..].copy_from_slice(&(index as u32).to_be_bytes());
    iv
}

/// Decode a 32-digit hex IV, with or without a `0x` prefix
pub fn parse_iv(iv: &str) -> Option<[u8; 16]> {
    let trimmed = iv.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    let mut bytes = [0u8; 16];
    hex::decode_to_slice(digits, &mut bytes).ok()?;
    Some(bytes)
}

#[cfg(test)]
pub(crate) fn encrypt_for_test(key: &[u8; 16], iv: &[u8; 16], plain: &[u8]) -> Vec<u8> {
    use cipher::BlockEncryptMut;
    cbc::Encryptor::<Aes128>::new(key.into(), iv.into()).encrypt_padded_vec_mut::<Pkcs7>(plain)
}
