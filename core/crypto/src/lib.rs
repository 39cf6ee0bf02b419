//! Cryptographic primitives for the zkvault core.
//!
//! This crate provides:
//! - Key derivation using Argon2id, with domain separation between the
//!   encryption key and the server-verifiable auth token
//! - Authenticated encryption of vault snapshots using XChaCha20-Poly1305
//! - Key, token, and salt types with automatic zeroization
//!
//! # Security Guarantees
//! - All key material is automatically zeroized on drop
//! - The master key cannot be serialized back out once derived
//! - No plaintext or key material is ever logged
//! - Token hashes are compared in constant time

pub mod aead;
pub mod kdf;
pub mod keys;

pub use aead::{decrypt, encrypt, Envelope};
pub use kdf::{derive_auth_token, derive_key, KdfParams};
pub use keys::{AuthToken, MasterKey, Salt, TokenHash};
