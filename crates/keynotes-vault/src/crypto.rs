//! Password-based string encryption and password verifiers.
//!
//! The vault engine only talks to the [`Codec`] trait, so the cipher can be
//! swapped without touching entry or envelope handling. The default
//! [`AesGcmCodec`] derives a fresh AES-256 key per call with HKDF-SHA256
//! over the password and a random salt, then seals the plaintext with
//! AES-256-GCM.
//!
//! Layout of a ciphertext string, base64 (standard alphabet):
//!   [ 1-byte version | 16-byte salt | 12-byte nonce | ciphertext + 16-byte tag ]

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use hkdf::Hkdf;
use keynotes_core::secret::constant_time_eq;
use rand::RngCore;
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::error::{Result, VaultError};

const FORMAT_VERSION: u8 = 1;
const SALT_SIZE: usize = 16;
const NONCE_SIZE: usize = 12;
const KEY_SIZE: usize = 32;
const HEADER_SIZE: usize = 1 + SALT_SIZE + NONCE_SIZE;

/// HKDF info string used to domain-separate derived keys.
const HKDF_INFO: &[u8] = b"keynotes-field-v1";

/// Symmetric string codec keyed by a password.
pub trait Codec: Send + Sync {
    /// Encrypt `plaintext` under `password`. Output is randomized.
    fn encrypt(&self, plaintext: &str, password: &str) -> Result<String>;

    /// Decrypt a string produced by [`Codec::encrypt`].
    ///
    /// Fails with [`VaultError::Decryption`] on a wrong password or a
    /// malformed or tampered ciphertext; never returns garbage.
    fn decrypt(&self, ciphertext: &str, password: &str) -> Result<String>;

    /// One-way, deterministic verifier for `password`.
    fn hash_password(&self, password: &str) -> String;

    /// Check `password` against a stored verifier in constant time.
    fn verify_password(&self, password: &str, verifier: &str) -> bool {
        constant_time_eq(
            self.hash_password(password).as_bytes(),
            verifier.as_bytes(),
        )
    }
}

/// AES-256-GCM codec with HKDF-SHA256 key derivation.
#[derive(Debug, Clone, Copy, Default)]
pub struct AesGcmCodec;

impl AesGcmCodec {
    /// Create a new codec.
    pub fn new() -> Self {
        Self
    }

    /// Derive a 256-bit key from `password` and `salt`.
    fn derive_key(password: &str, salt: &[u8]) -> Result<Zeroizing<[u8; KEY_SIZE]>> {
        let hk = Hkdf::<Sha256>::new(Some(salt), password.as_bytes());
        let mut okm = Zeroizing::new([0u8; KEY_SIZE]);
        hk.expand(HKDF_INFO, okm.as_mut())
            .map_err(|e| VaultError::encryption(format!("key derivation failed: {e}")))?;
        Ok(okm)
    }
}

impl Codec for AesGcmCodec {
    fn encrypt(&self, plaintext: &str, password: &str) -> Result<String> {
        let mut salt = [0u8; SALT_SIZE];
        rand::thread_rng().fill_bytes(&mut salt);

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);

        let key = Self::derive_key(password, &salt)?;
        let cipher = Aes256Gcm::new_from_slice(key.as_ref())
            .map_err(|e| VaultError::encryption(e.to_string()))?;

        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext.as_bytes())
            .map_err(|e| VaultError::encryption(e.to_string()))?;

        let mut out = Vec::with_capacity(HEADER_SIZE + ciphertext.len());
        out.push(FORMAT_VERSION);
        out.extend_from_slice(&salt);
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);

        Ok(STANDARD.encode(out))
    }

    fn decrypt(&self, ciphertext: &str, password: &str) -> Result<String> {
        let raw = STANDARD
            .decode(ciphertext.trim())
            .map_err(|e| VaultError::decryption(format!("base64 decode failed: {e}")))?;

        if raw.len() < HEADER_SIZE {
            return Err(VaultError::decryption("ciphertext too short"));
        }
        if raw[0] != FORMAT_VERSION {
            return Err(VaultError::decryption(format!(
                "unsupported ciphertext version {}",
                raw[0]
            )));
        }

        let salt = &raw[1..1 + SALT_SIZE];
        let nonce_bytes = &raw[1 + SALT_SIZE..HEADER_SIZE];
        let body = &raw[HEADER_SIZE..];

        let key = Self::derive_key(password, salt)?;
        let cipher = Aes256Gcm::new_from_slice(key.as_ref())
            .map_err(|e| VaultError::decryption(e.to_string()))?;

        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce_bytes), body)
            .map_err(|_| VaultError::decryption("invalid password or corrupted data"))?;

        String::from_utf8(plaintext)
            .map_err(|e| VaultError::decryption(format!("invalid UTF-8: {e}")))
    }

    fn hash_password(&self, password: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(password.as_bytes());
        hex::encode(hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_encrypt_decrypt() {
        let codec = AesGcmCodec::new();
        let encrypted = codec.encrypt("hello, secret world!", "pw").unwrap();
        let decrypted = codec.decrypt(&encrypted, "pw").unwrap();
        assert_eq!(decrypted, "hello, secret world!");
    }

    #[test]
    fn test_round_trip_unicode_and_empty() {
        let codec = AesGcmCodec::new();
        for sample in ["", "ключ 🔑", "fn main() {\n    println!(\"hi\");\n}"] {
            let encrypted = codec.encrypt(sample, "correct-horse").unwrap();
            assert_eq!(codec.decrypt(&encrypted, "correct-horse").unwrap(), sample);
        }
    }

    #[test]
    fn test_wrong_password_fails() {
        let codec = AesGcmCodec::new();
        for sample in ["", "x", "sensitive data"] {
            let encrypted = codec.encrypt(sample, "p1").unwrap();
            let result = codec.decrypt(&encrypted, "p2");
            assert!(matches!(result, Err(VaultError::Decryption(_))));
        }
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let codec = AesGcmCodec::new();
        let encrypted = codec.encrypt("important secret", "pw").unwrap();

        let mut raw = STANDARD.decode(&encrypted).unwrap();
        let idx = HEADER_SIZE + 1;
        raw[idx] ^= 0xff;
        let tampered = STANDARD.encode(raw);

        assert!(matches!(
            codec.decrypt(&tampered, "pw"),
            Err(VaultError::Decryption(_))
        ));
    }

    #[test]
    fn test_malformed_inputs_fail() {
        let codec = AesGcmCodec::new();
        assert!(codec.decrypt("not base64 !!!", "pw").is_err());
        assert!(codec.decrypt(&STANDARD.encode([1u8; 8]), "pw").is_err());

        let encrypted = codec.encrypt("v", "pw").unwrap();
        let mut raw = STANDARD.decode(&encrypted).unwrap();
        raw[0] = 9;
        let err = codec.decrypt(&STANDARD.encode(raw), "pw").unwrap_err();
        assert!(err.to_string().contains("version 9"));
    }

    #[test]
    fn test_encryption_is_randomized() {
        let codec = AesGcmCodec::new();
        let a = codec.encrypt("same plaintext", "pw").unwrap();
        let b = codec.encrypt("same plaintext", "pw").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_hash_password_is_deterministic_sha256() {
        let codec = AesGcmCodec::new();
        assert_eq!(codec.hash_password("abc"), codec.hash_password("abc"));
        assert_eq!(
            codec.hash_password("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_ne!(codec.hash_password("abc"), codec.hash_password("abd"));
    }

    #[test]
    fn test_verify_password() {
        let codec = AesGcmCodec::new();
        let verifier = codec.hash_password("correct-horse");
        assert!(codec.verify_password("correct-horse", &verifier));
        assert!(!codec.verify_password("wrong-horse", &verifier));
    }
}
