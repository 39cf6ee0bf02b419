//! Vault engine for the zkvault core.
//!
//! This crate provides:
//! - The plaintext vault document model (entries, folders, metadata)
//! - The session state machine governing setup, unlock, lock, and
//!   auto-lock on inactivity
//! - The secondary-password guard gating reveal/copy/edit actions, with
//!   failed-attempt rate limiting and a short verification window
//!
//! # Architecture
//! The session sits between the UI and the backend, holding key material
//! only in memory for the duration of an unlock. Every mutation re-encrypts
//! the full document and pushes one opaque envelope; the backend never sees
//! plaintext or keys.

pub mod clock;
pub mod document;
pub mod guard;
pub mod session;

pub use clock::{Clock, ManualClock, SystemClock};
pub use document::{
    CustomField, Entry, EntryDraft, EntryId, EntryKind, Folder, FolderId, VaultDocument,
};
pub use guard::{GuardDecision, ProtectedAction, SecondaryGuard, SecretField};
pub use session::{spawn_auto_lock, VaultSession, VaultStatus, AUTO_LOCK_TICK, AUTO_LOCK_TIMEOUT};
