use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use base64::engine::general_purpose::URL_SAFE_NO_PAD as BASE64_URL;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use super::data::PartialRgaSimulationData;
use crate::config::EncryptionSecret;

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// Failures of the simulator hand-off. `Decryption` covers
/// malformed encoding, truncation, tampering and key mismatch alike.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RgaCryptoError {
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
    #[error("unable to decrypt simulation payload")]
    Decryption,
    #[error("decrypted simulation payload is not valid JSON")]
    Parse,
    #[error("unable to encrypt simulation payload")]
    Encryption,
}

impl RgaCryptoError {
    pub const fn code(&self) -> &'static str {
        match self {
            RgaCryptoError::InvalidInput(_) => "INVALID_INPUT",
            RgaCryptoError::Decryption => "DECRYPTION_ERROR",
            RgaCryptoError::Parse => "PARSE_ERROR",
            RgaCryptoError::Encryption => "ENCRYPTION_ERROR",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EncryptedRgaData {
    pub encrypted: String,
}

/// Seals simulator answers into a URL-safe token: base64url(nonce || ciphertext || tag).
/// Tokens stay valid for as long as the configured key does.
pub struct RgaCipher {
    cipher: Aes256Gcm,
}

impl RgaCipher {
    pub fn new(secret: &EncryptionSecret) -> Self {
        let key = Sha256::digest(secret.expose().as_bytes());
        Self {
            cipher: Aes256Gcm::new(&key),
        }
    }

    pub fn encrypt(
        &self,
        data: &PartialRgaSimulationData,
    ) -> Result<EncryptedRgaData, RgaCryptoError> {
        let plaintext = serde_json::to_vec(data).map_err(|_| RgaCryptoError::Encryption)?;
        let encrypted = self.seal(&plaintext)?;
        Ok(EncryptedRgaData { encrypted })
    }

    /// Entry point for untyped request bodies: the payload must be a JSON
    /// object shaped like simulator answers.
    pub fn encrypt_value(&self, value: Option<&Value>) -> Result<EncryptedRgaData, RgaCryptoError> {
        let value = value.ok_or(RgaCryptoError::InvalidInput("data is required"))?;
        if !value.is_object() {
            return Err(RgaCryptoError::InvalidInput("data must be an object"));
        }
        let data = PartialRgaSimulationData::deserialize(value)
            .map_err(|_| RgaCryptoError::InvalidInput("data does not match the simulation shape"))?;
        self.encrypt(&data)
    }

    pub fn decrypt(&self, encrypted: &str) -> Result<PartialRgaSimulationData, RgaCryptoError> {
        let encrypted = encrypted.trim();
        if encrypted.is_empty() {
            return Err(RgaCryptoError::InvalidInput("encrypted payload is required"));
        }
        let plaintext = self.open(encrypted)?;
        serde_json::from_slice(&plaintext).map_err(|_| RgaCryptoError::Parse)
    }

    pub fn decrypt_value(&self, value: Option<&Value>) -> Result<PartialRgaSimulationData, RgaCryptoError> {
        match value {
            Some(Value::String(encrypted)) => self.decrypt(encrypted),
            Some(_) => Err(RgaCryptoError::InvalidInput("encrypted payload must be a string")),
            None => Err(RgaCryptoError::InvalidInput("encrypted payload is required")),
        }
    }

    fn seal(&self, plaintext: &[u8]) -> Result<String, RgaCryptoError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);
        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext)
            .map_err(|_| RgaCryptoError::Encryption)?;

        let mut framed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        framed.extend_from_slice(&nonce_bytes);
        framed.extend_from_slice(&ciphertext);
        Ok(BASE64_URL.encode(framed))
    }

    fn open(&self, encoded: &str) -> Result<Vec<u8>, RgaCryptoError> {
        let framed = BASE64_URL
            .decode(encoded.as_bytes())
            .map_err(|_| RgaCryptoError::Decryption)?;
        if framed.len() < NONCE_LEN + TAG_LEN {
            return Err(RgaCryptoError::Decryption);
        }
        let (nonce_bytes, ciphertext) = framed.split_at(NONCE_LEN);
        self.cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| RgaCryptoError::Decryption)
    }
}
