//! Key derivation using Argon2id.
//!
//! Argon2id is a memory-hard password hashing function that provides
//! resistance to both GPU and time-memory trade-off attacks. Two values are
//! derived from each (password, salt) pair: the encryption key and the
//! server-verifiable auth token. The auth token is derived from
//! domain-separated input, so knowledge of it gives no information
//! recoverable into the encryption key.

use argon2::{Algorithm, Argon2, Params, Version};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::keys::{AuthToken, MasterKey, Salt, KEY_LENGTH};
use zkvault_common::{Error, Result};

/// Domain-separation prefix applied before auth-token derivation.
const AUTH_CONTEXT: &[u8] = b"auth:";

/// Parameters for Argon2id key derivation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KdfParams {
    /// Memory cost in KiB (e.g., 65536 = 64 MiB).
    pub memory_cost: u32,
    /// Number of iterations.
    pub time_cost: u32,
    /// Degree of parallelism.
    pub parallelism: u32,
}

impl KdfParams {
    /// Create parameters suitable for interactive use.
    ///
    /// Targets roughly 0.5-1 second of derivation time. Recalibrate
    /// upward over time as hardware improves.
    pub fn interactive() -> Self {
        Self {
            memory_cost: 65536, // 64 MiB
            time_cost: 3,
            parallelism: 4,
        }
    }

    /// Create reduced parameters for tests.
    ///
    /// Weak on purpose; never use outside test code.
    pub fn moderate() -> Self {
        Self {
            memory_cost: 8192, // 8 MiB
            time_cost: 1,
            parallelism: 1,
        }
    }
}

impl Default for KdfParams {
    fn default() -> Self {
        Self::interactive()
    }
}

/// Derive the vault encryption key from a password and salt.
///
/// # Preconditions
/// - `password` must not be empty
///
/// # Postconditions
/// - The derived key is deterministic given the same inputs
/// - The key never leaves memory unencrypted
///
/// # Errors
/// - Returns error if password is empty
/// - Returns error if Argon2id parameters are invalid
pub fn derive_key(password: &[u8], salt: &Salt, params: &KdfParams) -> Result<MasterKey> {
    let key_bytes = derive_raw(password, salt, params)?;
    Ok(MasterKey::from_bytes(*key_bytes))
}

/// Derive the auth token from a password and salt.
///
/// The input is prefixed with a fixed `"auth:"` context before hashing, so
/// the result is cryptographically independent of [`derive_key`] for the
/// same (password, salt).
///
/// # Errors
/// - Returns error if password is empty
/// - Returns error if Argon2id parameters are invalid
pub fn derive_auth_token(password: &[u8], salt: &Salt, params: &KdfParams) -> Result<AuthToken> {
    if password.is_empty() {
        return Err(Error::InvalidInput("Password cannot be empty".to_string()));
    }

    let mut input = Zeroizing::new(Vec::with_capacity(AUTH_CONTEXT.len() + password.len()));
    input.extend_from_slice(AUTH_CONTEXT);
    input.extend_from_slice(password);

    let token_bytes = derive_raw(&input, salt, params)?;
    Ok(AuthToken::from_bytes(*token_bytes))
}

fn derive_raw(
    input: &[u8],
    salt: &Salt,
    params: &KdfParams,
) -> Result<Zeroizing<[u8; KEY_LENGTH]>> {
    if input.is_empty() {
        return Err(Error::InvalidInput("Password cannot be empty".to_string()));
    }

    let argon2_params = Params::new(
        params.memory_cost,
        params.time_cost,
        params.parallelism,
        Some(KEY_LENGTH),
    )
    .map_err(|e| Error::Crypto(format!("Invalid KDF parameters: {}", e)))?;

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon2_params);

    let mut out = Zeroizing::new([0u8; KEY_LENGTH]);
    argon2
        .hash_password_into(input, salt.as_bytes(), &mut *out)
        .map_err(|e| Error::Crypto(format!("Key derivation failed: {}", e)))?;

    Ok(out)
}
