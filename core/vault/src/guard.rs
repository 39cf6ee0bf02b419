//! Secondary-password guard.
//!
//! An optional second gate in front of reveal/copy/edit actions on
//! already-decrypted secrets, independent of the master password. The
//! guard tracks consecutive verification failures (lockout after too
//! many), and opens a short validity window after a success so bursts of
//! protected actions only prompt once.
//!
//! The guard is a pure state machine over a [`Clock`]; credential
//! verification against the backend is orchestrated by the session.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::clock::Clock;
use crate::document::EntryId;
use zkvault_common::{Error, Result};

/// Consecutive failures tolerated before lockout.
pub const MAX_FAILED_ATTEMPTS: u32 = 3;

/// Cooldown during which attempts are rejected without verification.
pub const LOCKOUT_COOLDOWN: Duration = Duration::from_secs(30);

/// Validity window opened by a successful verification.
///
/// The window is a monotonic deadline: further actions do not extend it,
/// only a fresh explicit verification re-arms it.
pub const SESSION_WINDOW: Duration = Duration::from_secs(60);

/// Secret field of an entry targeted by a copy action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecretField {
    Username,
    Password,
    Notes,
}

/// A protected action expressed as data, so the guard can be driven and
/// tested without any UI dependency.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtectedAction {
    /// Show an entry's concealed fields.
    RevealEntry(EntryId),
    /// Copy one secret field to the clipboard.
    CopyField(EntryId, SecretField),
    /// Open an entry for editing.
    EditEntry(EntryId),
}

/// Outcome of requesting a protected action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardDecision {
    /// Run the action now.
    Permitted(ProtectedAction),
    /// Prompt for the secondary password; the action is held as pending
    /// and returned by the next successful verification.
    VerificationRequired,
}

/// Rate-limiting and session-window state machine.
pub struct SecondaryGuard {
    clock: Arc<dyn Clock>,
    configured: bool,
    failed_attempts: u32,
    lockout_until: Option<Instant>,
    window_until: Option<Instant>,
    pending: Option<ProtectedAction>,
}

impl SecondaryGuard {
    /// Create a guard with no credential configured.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            configured: false,
            failed_attempts: 0,
            lockout_until: None,
            window_until: None,
            pending: None,
        }
    }

    /// Whether a secondary credential is configured.
    ///
    /// An unconfigured guard permits every protected action immediately.
    pub fn is_configured(&self) -> bool {
        self.configured
    }

    pub(crate) fn set_configured(&mut self, configured: bool) {
        self.configured = configured;
        if !configured {
            self.collapse();
        }
    }

    /// Current consecutive-failure count.
    pub fn failed_attempts(&self) -> u32 {
        self.failed_attempts
    }

    /// Whether the validity window is currently open.
    pub fn window_open(&self) -> bool {
        matches!(self.window_until, Some(until) if self.clock.now() <= until)
    }

    /// Request a protected action.
    ///
    /// Exactly one action may be pending verification; a newer request
    /// replaces the older one (last wins).
    pub fn request(&mut self, action: ProtectedAction) -> GuardDecision {
        if !self.configured || self.window_open() {
            return GuardDecision::Permitted(action);
        }
        self.pending = Some(action);
        GuardDecision::VerificationRequired
    }

    /// Check whether a verification attempt may proceed.
    ///
    /// During lockout the attempt is rejected locally, without a backend
    /// round-trip and without touching the failure counter. A lockout
    /// that has expired clears itself and resets the counter.
    ///
    /// # Errors
    /// - [`Error::RateLimited`] with the remaining cooldown
    pub fn begin_attempt(&mut self) -> Result<()> {
        if let Some(until) = self.lockout_until {
            let now = self.clock.now();
            if now < until {
                return Err(Error::RateLimited {
                    remaining: until - now,
                });
            }
            self.lockout_until = None;
            self.failed_attempts = 0;
        }
        Ok(())
    }

    /// Record a failed verification.
    pub fn record_failure(&mut self) {
        self.failed_attempts += 1;
        if self.failed_attempts >= MAX_FAILED_ATTEMPTS {
            self.lockout_until = Some(self.clock.now() + LOCKOUT_COOLDOWN);
        }
    }

    /// Record a successful verification.
    ///
    /// Resets the failure counter, opens a fresh validity window, and
    /// returns the pending action, if any, for the caller to run.
    pub fn record_success(&mut self) -> Option<ProtectedAction> {
        self.failed_attempts = 0;
        self.lockout_until = None;
        self.window_until = Some(self.clock.now() + SESSION_WINDOW);
        self.pending.take()
    }

    /// Drop all ephemeral guard state.
    ///
    /// Called when the vault locks: the decrypted material the window was
    /// guarding is gone, so the window, pending action, and counters go
    /// with it.
    pub fn collapse(&mut self) {
        self.failed_attempts = 0;
        self.lockout_until = None;
        self.window_until = None;
        self.pending = None;
    }
}
