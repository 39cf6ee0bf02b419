//! Key, token, and salt types with secure memory handling.
//!
//! All secret-bearing types zeroize their memory on drop so key material
//! does not persist after the vault locks.

use std::fmt;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

use zkvault_common::{Error, Result};

/// Length of encryption keys and derived tokens in bytes (256-bit).
pub const KEY_LENGTH: usize = 32;

/// Length of KDF salts in bytes (256-bit).
pub const SALT_LENGTH: usize = 32;

/// Symmetric key derived from the master password.
///
/// Lives only in memory while the vault is unlocked. The type deliberately
/// implements no serialization: once derived, the key bytes cannot leave
/// this crate except as ciphertext.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct MasterKey {
    key: [u8; KEY_LENGTH],
}

impl MasterKey {
    pub(crate) fn from_bytes(key: [u8; KEY_LENGTH]) -> Self {
        Self { key }
    }

    pub(crate) fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.key
    }
}

impl fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MasterKey([REDACTED])")
    }
}

/// Derived authentication token.
///
/// Sent to the backend for comparison against a stored [`TokenHash`]; never
/// used to decrypt anything. Derived from domain-separated input, so it
/// reveals nothing about the encryption key.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct AuthToken {
    bytes: [u8; KEY_LENGTH],
}

impl AuthToken {
    pub(crate) fn from_bytes(bytes: [u8; KEY_LENGTH]) -> Self {
        Self { bytes }
    }

    /// Compute the hash the backend stores and compares.
    ///
    /// The backend only ever sees this Blake2b-256 digest of the token,
    /// never anything derived closer to the password.
    pub fn hash(&self) -> TokenHash {
        use blake2::digest::consts::U32;
        use blake2::{Blake2b, Digest};

        let mut hasher = Blake2b::<U32>::new();
        hasher.update(b"authtoken");
        hasher.update(self.bytes);

        let digest = hasher.finalize();
        let mut out = [0u8; KEY_LENGTH];
        out.copy_from_slice(&digest);
        TokenHash(out)
    }

    #[cfg(test)]
    pub(crate) fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.bytes
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AuthToken([REDACTED])")
    }
}

/// Stored comparand for an [`AuthToken`].
///
/// Persisted server-side; compared as an opaque value in constant time.
#[derive(Clone)]
pub struct TokenHash([u8; KEY_LENGTH]);

impl TokenHash {
    /// Decode from the Base64 wire form.
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let bytes = BASE64
            .decode(encoded)
            .map_err(|e| Error::InvalidInput(format!("Invalid token hash encoding: {}", e)))?;
        let bytes: [u8; KEY_LENGTH] = bytes
            .try_into()
            .map_err(|_| Error::InvalidInput("Invalid token hash length".to_string()))?;
        Ok(Self(bytes))
    }

    /// Encode to the Base64 wire form.
    pub fn to_base64(&self) -> String {
        BASE64.encode(self.0)
    }
}

impl PartialEq for TokenHash {
    fn eq(&self, other: &Self) -> bool {
        self.0.ct_eq(&other.0).into()
    }
}

impl Eq for TokenHash {}

impl fmt::Debug for TokenHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TokenHash({})", self.to_base64())
    }
}

impl Serialize for TokenHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_base64())
    }
}

impl<'de> Deserialize<'de> for TokenHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        Self::from_base64(&encoded).map_err(serde::de::Error::custom)
    }
}

/// Salt for key derivation.
///
/// Generated once per vault (and regenerated on master-password change).
/// Stored server-side alongside the ciphertext; never secret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Salt([u8; SALT_LENGTH]);

impl Salt {
    /// Generate a random salt.
    pub fn generate() -> Self {
        use rand::RngCore;
        let mut salt = [0u8; SALT_LENGTH];
        rand::thread_rng().fill_bytes(&mut salt);
        Self(salt)
    }

    /// Create from raw bytes.
    pub fn from_bytes(bytes: [u8; SALT_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Get the salt bytes.
    pub fn as_bytes(&self) -> &[u8; SALT_LENGTH] {
        &self.0
    }

    /// Decode from the Base64 wire form.
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let bytes = BASE64
            .decode(encoded)
            .map_err(|e| Error::InvalidInput(format!("Invalid salt encoding: {}", e)))?;
        let bytes: [u8; SALT_LENGTH] = bytes
            .try_into()
            .map_err(|_| Error::InvalidInput("Invalid salt length".to_string()))?;
        Ok(Self(bytes))
    }

    /// Encode to the Base64 wire form.
    pub fn to_base64(&self) -> String {
        BASE64.encode(self.0)
    }
}

impl Serialize for Salt {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_base64())
    }
}

impl<'de> Deserialize<'de> for Salt {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        Self::from_base64(&encoded).map_err(serde::de::Error::custom)
    }
}
