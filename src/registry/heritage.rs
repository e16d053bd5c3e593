//! Serialization of record ownership into TXT targets.
//!
//! Ownership is encoded as a heritage string of the form
//! `heritage=external-dns,external-dns/owner=<id>[,external-dns/resource=<ref>]`,
//! optionally wrapped in outer quotes (the form most providers store) and
//! optionally AES-256-GCM encrypted with the 12-byte nonce prepended to the
//! ciphertext and the whole blob base64-encoded.

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Key, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use thiserror::Error;

use crate::endpoint::{
    Labels, OWNED_RECORD_LABEL, OWNER_LABEL, RESOURCE_LABEL, TXT_ENCRYPTION_NONCE_LABEL,
};

/// The well-known heritage value identifying TXT records managed by this
/// controller family.
pub const HERITAGE: &str = "external-dns";

const HERITAGE_TOKEN: &str = "heritage=external-dns";
const LABEL_TOKEN_PREFIX: &str = "external-dns/";
const NONCE_LEN: usize = 12;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Error)]
pub enum HeritageError {
    /// The target does not carry a heritage string, not even after decryption.
    #[error("target is not a valid heritage string")]
    InvalidHeritage,
    #[error("AES key must be 32 bytes, raw or base64-encoded")]
    InvalidKey,
    #[error("could not encrypt heritage string")]
    Encryption,
}

/// AES-256-GCM encryption of heritage strings.
///
/// The key may be given as 32 raw bytes or as the base64 encoding thereof.
#[derive(Clone)]
pub struct TxtEncryption {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for TxtEncryption {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TxtEncryption").finish_non_exhaustive()
    }
}

impl TxtEncryption {
    pub fn from_key(key: &str) -> Result<TxtEncryption, HeritageError> {
        let bytes = if key.len() == 32 {
            key.as_bytes().to_vec()
        } else {
            BASE64.decode(key).map_err(|_| HeritageError::InvalidKey)?
        };
        if bytes.len() != 32 {
            return Err(HeritageError::InvalidKey);
        }
        Ok(TxtEncryption {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&bytes)),
        })
    }

    /// Encrypt `plaintext`, reusing `nonce` when one is supplied so that an
    /// unchanged heritage string encrypts to the same blob across cycles.
    fn encrypt(&self, plaintext: &str, nonce: Option<&[u8]>) -> Result<String, HeritageError> {
        let nonce = match nonce {
            Some(n) if n.len() == NONCE_LEN => *Nonce::from_slice(n),
            _ => Aes256Gcm::generate_nonce(&mut OsRng),
        };
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| HeritageError::Encryption)?;
        let mut blob = nonce.to_vec();
        blob.extend(ciphertext);
        Ok(BASE64.encode(blob))
    }

    /// Decrypt a base64 nonce-prefixed blob. Returns the plaintext and the
    /// nonce it was sealed with, or `None` for anything unparseable.
    fn decrypt(&self, blob: &str) -> Option<(String, Vec<u8>)> {
        let raw = BASE64.decode(blob.trim()).ok()?;
        if raw.len() <= NONCE_LEN {
            return None;
        }
        let (nonce, ciphertext) = raw.split_at(NONCE_LEN);
        let plaintext = self.cipher.decrypt(Nonce::from_slice(nonce), ciphertext).ok()?;
        Some((String::from_utf8(plaintext).ok()?, nonce.to_vec()))
    }
}

/// Serialize ownership labels into a heritage string.
///
/// The reserved labels are emitted in fixed order (`owner`, `resource`,
/// `owned-record`), empty values are skipped. When `encryption` is given, a
/// nonce memoized in the labels (under [`TXT_ENCRYPTION_NONCE_LABEL`]) is
/// reused so the ciphertext stays stable for unchanged labels.
pub fn serialize_labels(
    labels: &Labels,
    with_quotes: bool,
    encryption: Option<&TxtEncryption>,
) -> Result<String, HeritageError> {
    let mut parts = vec![HERITAGE_TOKEN.to_string()];
    for key in [OWNER_LABEL, RESOURCE_LABEL, OWNED_RECORD_LABEL] {
        match labels.get(key) {
            Some(value) if !value.is_empty() => {
                parts.push(format!("{}{}={}", LABEL_TOKEN_PREFIX, key, value));
            }
            _ => {}
        }
    }
    let mut text = parts.join(",");

    if let Some(encryption) = encryption {
        let nonce = labels
            .get(TXT_ENCRYPTION_NONCE_LABEL)
            .and_then(|b64| BASE64.decode(b64).ok());
        text = encryption.encrypt(&text, nonce.as_deref())?;
    }

    if with_quotes {
        Ok(format!("\"{}\"", text))
    } else {
        Ok(text)
    }
}

/// Parse a TXT target into ownership labels.
///
/// Outer quotes are unwrapped first. A target that does not start with
/// `heritage=` is treated as encrypted and decrypted when a key is
/// configured; the nonce it was sealed with is memoized into the returned
/// labels. Unknown `k=v` tokens are ignored.
pub fn parse_labels(
    target: &str,
    encryption: Option<&TxtEncryption>,
) -> Result<Labels, HeritageError> {
    let mut text = unquote(target.trim()).to_string();
    let mut nonce = None;

    if !text.starts_with("heritage=") {
        let encryption = encryption.ok_or(HeritageError::InvalidHeritage)?;
        let (plaintext, used_nonce) =
            encryption.decrypt(&text).ok_or(HeritageError::InvalidHeritage)?;
        text = plaintext;
        nonce = Some(used_nonce);
    }

    let mut tokens = text.split(',');
    if tokens.next() != Some(HERITAGE_TOKEN) {
        return Err(HeritageError::InvalidHeritage);
    }

    let mut labels = Labels::new();
    for token in tokens {
        let Some((key, value)) = token.split_once('=') else {
            return Err(HeritageError::InvalidHeritage);
        };
        if let Some(label) = key.strip_prefix(LABEL_TOKEN_PREFIX) {
            labels.insert(label.to_string(), value.to_string());
        }
    }
    if let Some(nonce) = nonce {
        labels.insert(TXT_ENCRYPTION_NONCE_LABEL.to_string(), BASE64.encode(nonce));
    }
    Ok(labels)
}

fn unquote(target: &str) -> &str {
    target
        .strip_prefix('"')
        .and_then(|t| t.strip_suffix('"'))
        .unwrap_or(target)
}
