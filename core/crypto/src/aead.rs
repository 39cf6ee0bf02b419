//! Authenticated encryption using XChaCha20-Poly1305.
//!
//! Every vault snapshot is encrypted as one opaque envelope. The 24-byte
//! nonce is safe for random generation and a fresh one is drawn inside
//! [`encrypt`] on every call, so nonce reuse under a key cannot happen.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chacha20poly1305::{
    aead::{generic_array::GenericArray, Aead, AeadCore, KeyInit, OsRng},
    XChaCha20Poly1305,
};
use serde::{Deserialize, Serialize};

use crate::keys::MasterKey;
use zkvault_common::{Error, Result};

/// Nonce size for XChaCha20-Poly1305 (24 bytes).
pub const NONCE_SIZE: usize = 24;

/// Authentication tag size (16 bytes).
pub const TAG_SIZE: usize = 16;

/// One encrypted vault snapshot as shipped to and from the backend.
///
/// Both fields are Base64. Neither is secret: the backend stores them
/// verbatim and they are the only material read back for decryption.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Ciphertext with the Poly1305 tag appended.
    pub ciphertext: String,
    /// Random nonce used for this snapshot.
    pub nonce: String,
}

/// Encrypt plaintext under the master key.
///
/// # Postconditions
/// - A fresh random nonce is generated for every call
/// - The ciphertext is authenticated; tampering is detected on decrypt
///
/// # Errors
/// - Returns error if the cipher rejects the input
pub fn encrypt(key: &MasterKey, plaintext: &[u8]) -> Result<Envelope> {
    let cipher = XChaCha20Poly1305::new(GenericArray::from_slice(key.as_bytes()));
    let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);

    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|e| Error::Crypto(format!("Encryption failed: {}", e)))?;

    Ok(Envelope {
        ciphertext: BASE64.encode(ciphertext),
        nonce: BASE64.encode(nonce),
    })
}

/// Decrypt an envelope under the master key.
///
/// # Postconditions
/// - Verifies the authentication tag before returning any plaintext
///
/// # Errors
/// - [`Error::DecryptionFailure`] on a wrong key, tampered or truncated
///   ciphertext, or a malformed envelope. Partial plaintext is never
///   returned; the caller distinguishes wrong-password from corrupt-data
///   by whether the auth token was already verified.
pub fn decrypt(key: &MasterKey, envelope: &Envelope) -> Result<Vec<u8>> {
    let ciphertext = BASE64
        .decode(&envelope.ciphertext)
        .map_err(|_| Error::DecryptionFailure)?;
    let nonce_bytes = BASE64
        .decode(&envelope.nonce)
        .map_err(|_| Error::DecryptionFailure)?;

    if nonce_bytes.len() != NONCE_SIZE || ciphertext.len() < TAG_SIZE {
        return Err(Error::DecryptionFailure);
    }

    let cipher = XChaCha20Poly1305::new(GenericArray::from_slice(key.as_bytes()));
    let nonce = GenericArray::from_slice(&nonce_bytes);

    cipher
        .decrypt(nonce, ciphertext.as_ref())
        .map_err(|_| Error::DecryptionFailure)
}
