//! Common error types for zkvault.

use std::time::Duration;
use thiserror::Error;

/// Top-level error type for zkvault operations.
#[derive(Debug, Error)]
pub enum Error {
    /// A derived auth or secondary token did not match the stored hash.
    /// Recoverable; the user retries with a different password.
    #[error("Invalid credential")]
    InvalidCredential,

    /// The secondary-password guard is in lockout after repeated failures.
    /// Recoverable once the cooldown elapses.
    #[error("Too many failed attempts; retry in {}s", remaining.as_secs())]
    RateLimited {
        /// Time left until attempts are accepted again.
        remaining: Duration,
    },

    /// AEAD authentication failed: wrong key or tampered/corrupted
    /// ciphertext. Surfaced distinctly from [`Error::InvalidCredential`]
    /// so a corrupted vault is never reported as a wrong password.
    #[error("Decryption failed: ciphertext rejected")]
    DecryptionFailure,

    /// A backend call failed. Local state must not advance past what the
    /// backend confirmed.
    #[error("Sync failure: {0}")]
    SyncFailure(String),

    /// Programmer error: an operation was invoked in a state that does not
    /// permit it (e.g. mutating the document while locked). Never a
    /// recoverable user path.
    #[error("Precondition violated: {0}")]
    Precondition(String),

    /// Cryptographic operation failed.
    #[error("Cryptographic error: {0}")]
    Crypto(String),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
