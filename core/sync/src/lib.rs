//! Sync protocol for the zkvault core.
//!
//! This crate defines the contract with the external backend collaborator:
//! what ciphertext and metadata cross the wire, and the zero-knowledge
//! rules that govern it. The backend stores opaque blobs and compares
//! opaque hashes; it never decrypts anything.
//!
//! # Design Principles
//! - Backend isolation: no backend-specific logic in vault or crypto crates
//! - Async operations: all calls are async and cancellable
//! - Zero knowledge: salts and nonces are not secret, token hashes are
//!   compared and never reversed, ciphertext+nonce is all that is read back

pub mod backend;
pub mod memory;

pub use backend::{SecondaryRecord, VaultBackend, VaultRecord};
pub use memory::MemoryBackend;
