//! Backend trait definition.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use zkvault_common::Result;
use zkvault_crypto::{AuthToken, Envelope, Salt, TokenHash};

/// Everything the backend holds for one vault, written atomically.
///
/// Content updates and master-password changes share this single write
/// path, so the envelope, salt, and auth-token hash can never get out of
/// step with each other on the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultRecord {
    /// The encrypted vault snapshot.
    pub envelope: Envelope,
    /// KDF salt for the master password.
    pub salt: Salt,
    /// Stored comparand for the master auth token.
    pub auth_token_hash: TokenHash,
}

/// The backend-held secondary-password credential.
///
/// Fully independent of the vault record: resetting or losing it never
/// affects vault decryptability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecondaryRecord {
    /// KDF salt for the secondary password.
    pub salt: Salt,
    /// Stored comparand for the secondary token.
    pub token_hash: TokenHash,
}

/// Backend contract for vault persistence.
///
/// All calls presume account authentication already established by an
/// out-of-scope layer. Implementations must treat token verification as an
/// opaque hash comparison; no call ever receives key material or plaintext.
#[async_trait]
pub trait VaultBackend: Send + Sync {
    /// Check whether a vault record exists for the current account.
    ///
    /// # Returns
    /// The vault's KDF salt if a record exists, `None` otherwise.
    async fn vault_exists(&self) -> Result<Option<Salt>>;

    /// Compare a derived auth token against the stored hash.
    ///
    /// # Returns
    /// `Ok(true)` on a match, `Ok(false)` on a mismatch. Errors are
    /// reserved for transport or storage failures.
    async fn verify_auth_token(&self, token: &AuthToken) -> Result<bool>;

    /// Fetch the stored envelope for local decryption.
    ///
    /// # Errors
    /// - No vault record exists
    /// - Transport or storage failure
    async fn fetch_envelope(&self) -> Result<Envelope>;

    /// Store or replace the full vault record atomically.
    ///
    /// # Postconditions
    /// - On success the backend holds exactly `record`; on failure it
    ///   holds whatever it held before
    async fn store_vault(&self, record: VaultRecord) -> Result<()>;

    /// Delete the vault record after verifying the auth token.
    ///
    /// # Errors
    /// - [`zkvault_common::Error::InvalidCredential`] if the token does
    ///   not match the stored hash; nothing is deleted in that case
    async fn delete_vault(&self, token: &AuthToken) -> Result<()>;

    /// Get the secondary-password salt, if a credential is configured.
    async fn secondary_salt(&self) -> Result<Option<Salt>>;

    /// Compare a derived secondary token against the stored hash.
    async fn verify_secondary(&self, token: &AuthToken) -> Result<bool>;

    /// Store or replace the secondary credential.
    async fn set_secondary(&self, record: SecondaryRecord) -> Result<()>;

    /// Delete the secondary credential after verifying the token.
    ///
    /// # Errors
    /// - [`zkvault_common::Error::InvalidCredential`] on a token mismatch
    async fn delete_secondary(&self, token: &AuthToken) -> Result<()>;
}
