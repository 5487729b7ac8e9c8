use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose, Engine as _};
use rand::{rngs::OsRng, RngCore};
use thiserror::Error;
use tracing::debug;

/// AES-256 key length in bytes.
pub const KEY_LEN: usize = 32;
/// AES-GCM nonce length in bytes.
pub const NONCE_LEN: usize = 12;
/// AES-GCM authentication tag length in bytes.
pub const TAG_LEN: usize = 16;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CipherError {
    /// The random source could not produce a nonce.
    #[error("crypto init failed: {0}")]
    CryptoInit(String),
    #[error("invalid key length: expected {expected} bytes, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },
    #[error("encrypt failed: {0}")]
    Encrypt(String),
    /// Record too short to hold a nonce and tag.
    #[error("malformed record: {len} bytes")]
    Malformed { len: usize },
    /// Authentication failed: wrong key or tampered record.
    #[error("decrypt failed: record did not authenticate")]
    Decrypt,
}

/// Key material used for encryption at rest.
#[derive(Clone, PartialEq, Eq)]
pub struct KeyMaterial {
    /// Identifier for logging/rotation (never log key bytes).
    pub id: String,
    /// 256-bit symmetric key.
    pub bytes: [u8; KEY_LEN],
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("id", &self.id)
            .field("bytes", &"<redacted>")
            .finish()
    }
}

impl KeyMaterial {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CipherError> {
        let key: [u8; KEY_LEN] = bytes.try_into().map_err(|_| CipherError::InvalidKeyLength {
            expected: KEY_LEN,
            actual: bytes.len(),
        })?;
        Ok(Self {
            id: "default".to_string(),
            bytes: key,
        })
    }

    /// Decode the `encryption_key` setting: base64 of 32 bytes, or a raw
    /// 32-byte string. Whitespace is only stripped for the base64 form; raw
    /// keys are used byte for byte.
    pub fn from_setting(secret: &str) -> Result<Self, CipherError> {
        match general_purpose::STANDARD.decode(secret.trim()) {
            Ok(decoded) if decoded.len() == KEY_LEN => Self::from_bytes(&decoded),
            Ok(decoded) if secret.len() != KEY_LEN => Err(CipherError::InvalidKeyLength {
                expected: KEY_LEN,
                actual: decoded.len(),
            }),
            _ => Self::from_bytes(secret.as_bytes()),
        }
    }

    pub fn generate() -> Result<Self, CipherError> {
        let mut bytes = [0u8; KEY_LEN];
        OsRng
            .try_fill_bytes(&mut bytes)
            .map_err(|e| CipherError::CryptoInit(e.to_string()))?;
        Ok(Self {
            id: "default".to_string(),
            bytes,
        })
    }

    /// Base64 form suitable for the `encryption_key` setting.
    pub fn encode(&self) -> String {
        general_purpose::STANDARD.encode(self.bytes)
    }
}

/// Authenticated encryption of records as `nonce ‖ ciphertext ‖ tag`.
#[derive(Clone)]
pub struct RecordCipher {
    cipher: Aes256Gcm,
    key_id: String,
}

impl RecordCipher {
    pub fn new(key: &[u8]) -> Result<Self, CipherError> {
        Self::from_material(&KeyMaterial::from_bytes(key)?)
    }

    pub fn from_material(material: &KeyMaterial) -> Result<Self, CipherError> {
        let cipher = Aes256Gcm::new_from_slice(&material.bytes).map_err(|_| {
            CipherError::InvalidKeyLength {
                expected: KEY_LEN,
                actual: material.bytes.len(),
            }
        })?;
        Ok(Self {
            cipher,
            key_id: material.id.clone(),
        })
    }

    /// Encrypt under a fresh random nonce.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CipherError> {
        let mut nonce = [0u8; NONCE_LEN];
        OsRng
            .try_fill_bytes(&mut nonce)
            .map_err(|e| CipherError::CryptoInit(e.to_string()))?;

        let sealed = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|e| CipherError::Encrypt(e.to_string()))?;

        let mut record = Vec::with_capacity(NONCE_LEN + sealed.len());
        record.extend_from_slice(&nonce);
        record.extend_from_slice(&sealed);
        debug!(key_id = %self.key_id, len = record.len(), "record sealed");
        Ok(record)
    }

    pub fn decrypt(&self, record: &[u8]) -> Result<Vec<u8>, CipherError> {
        if record.len() < NONCE_LEN + TAG_LEN {
            return Err(CipherError::Malformed { len: record.len() });
        }
        let (nonce, sealed) = record.split_at(NONCE_LEN);
        self.cipher
            .decrypt(Nonce::from_slice(nonce), sealed)
            .map_err(|_| CipherError::Decrypt)
    }
}

/// One-shot encryption with a raw key.
pub fn encrypt(plaintext: &[u8], key: &[u8]) -> Result<Vec<u8>, CipherError> {
    RecordCipher::new(key)?.encrypt(plaintext)
}

/// One-shot decryption with a raw key.
pub fn decrypt(record: &[u8], key: &[u8]) -> Result<Vec<u8>, CipherError> {
    RecordCipher::new(key)?.decrypt(record)
}
