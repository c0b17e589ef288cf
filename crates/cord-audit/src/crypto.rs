//! # Encryption at Rest for Journal Lines
//!
//! When a key is configured, every journal line is wrapped as
//! `{"encrypted":true,"iv":...,"tag":...,"data":...}` using AES-256-GCM
//! with a fresh 12-byte IV per entry. The chain hashes are computed over
//! the plaintext entry, so encryption never weakens tamper evidence; it
//! only hides content from a reader without the key.
//!
//! The 32-byte key arrives as 64 hex characters (`CORD_LOG_KEY`). A key of
//! the wrong length is a configuration error and is raised, not coerced.

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use base64::Engine;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::error::{AuditError, Result};

/// GCM authentication tag length in bytes.
const TAG_LEN: usize = 16;
/// GCM nonce length in bytes.
const IV_LEN: usize = 12;

/// The on-disk shape of an encrypted journal line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptedRecord {
    /// Always true; distinguishes encrypted from plaintext lines.
    pub encrypted: bool,
    /// Hex-encoded 12-byte nonce, fresh per entry.
    pub iv: String,
    /// Hex-encoded 16-byte GCM tag.
    pub tag: String,
    /// Base64-encoded ciphertext.
    pub data: String,
}

/// AES-256-GCM wrapper bound to one configured key.
pub struct LogCipher {
    key: [u8; 32],
}

impl LogCipher {
    /// Build a cipher from 64 hex characters.
    ///
    /// # Errors
    ///
    /// Rejects keys that are not exactly 32 bytes once decoded.
    pub fn from_hex(hex_key: &str) -> Result<Self> {
        let bytes = hex::decode(hex_key.trim())
            .map_err(|e| AuditError::BadKey(format!("not hex: {e}")))?;
        let key: [u8; 32] = bytes
            .try_into()
            .map_err(|_| AuditError::BadKey("key must be 32 bytes (64 hex characters)".into()))?;
        Ok(Self { key })
    }

    /// Encrypt one plaintext journal line.
    pub fn encrypt(&self, plaintext: &str) -> Result<EncryptedRecord> {
        let cipher = Aes256Gcm::new_from_slice(&self.key)
            .map_err(|e| AuditError::Crypto(e.to_string()))?;
        let mut iv = [0u8; IV_LEN];
        rand::rngs::OsRng.fill_bytes(&mut iv);

        let sealed = cipher
            .encrypt(Nonce::from_slice(&iv), plaintext.as_bytes())
            .map_err(|e| AuditError::Crypto(e.to_string()))?;
        // The aead API appends the tag to the ciphertext; the wire format
        // stores them separately.
        let split = sealed.len() - TAG_LEN;
        Ok(EncryptedRecord {
            encrypted: true,
            iv: hex::encode(iv),
            tag: hex::encode(&sealed[split..]),
            data: base64::engine::general_purpose::STANDARD.encode(&sealed[..split]),
        })
    }

    /// Decrypt one record back to the plaintext line.
    pub fn decrypt(&self, record: &EncryptedRecord) -> Result<String> {
        let cipher = Aes256Gcm::new_from_slice(&self.key)
            .map_err(|e| AuditError::Crypto(e.to_string()))?;
        let iv = hex::decode(&record.iv).map_err(|e| AuditError::Crypto(e.to_string()))?;
        let tag = hex::decode(&record.tag).map_err(|e| AuditError::Crypto(e.to_string()))?;
        let mut sealed = base64::engine::general_purpose::STANDARD
            .decode(&record.data)
            .map_err(|e| AuditError::Crypto(e.to_string()))?;
        sealed.extend_from_slice(&tag);

        let plain = cipher
            .decrypt(Nonce::from_slice(&iv), sealed.as_slice())
            .map_err(|_| AuditError::Crypto("authentication failed".into()))?;
        String::from_utf8(plain).map_err(|e| AuditError::Crypto(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

    #[test]
    fn test_round_trip() {
        let cipher = LogCipher::from_hex(KEY).unwrap();
        let record = cipher.encrypt(r#"{"decision":"BLOCK","score":12}"#).unwrap();
        assert!(record.encrypted);
        assert_eq!(record.iv.len(), IV_LEN * 2);
        assert_eq!(record.tag.len(), TAG_LEN * 2);

        let plain = cipher.decrypt(&record).unwrap();
        assert_eq!(plain, r#"{"decision":"BLOCK","score":12}"#);
    }

    #[test]
    fn test_fresh_iv_per_entry() {
        let cipher = LogCipher::from_hex(KEY).unwrap();
        let a = cipher.encrypt("same line").unwrap();
        let b = cipher.encrypt("same line").unwrap();
        assert_ne!(a.iv, b.iv);
        assert_ne!(a.data, b.data);
    }

    #[test]
    fn test_tamper_detected() {
        let cipher = LogCipher::from_hex(KEY).unwrap();
        let mut record = cipher.encrypt("authentic entry").unwrap();
        record.tag = hex::encode([0u8; TAG_LEN]);
        assert!(cipher.decrypt(&record).is_err());
    }

    #[test]
    fn test_bad_key_rejected() {
        assert!(matches!(
            LogCipher::from_hex("deadbeef"),
            Err(AuditError::BadKey(_))
        ));
        assert!(matches!(
            LogCipher::from_hex("zz0102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f"),
            Err(AuditError::BadKey(_))
        ));
    }
}
