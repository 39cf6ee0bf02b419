//! In-memory backend for testing and development.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use tracing::debug;

use crate::backend::{SecondaryRecord, VaultBackend, VaultRecord};
use zkvault_common::{Error, Result};
use zkvault_crypto::{AuthToken, Envelope, Salt};

#[derive(Default)]
struct State {
    vault: Option<VaultRecord>,
    secondary: Option<SecondaryRecord>,
}

/// In-memory backend implementation.
///
/// Holds one vault record and one secondary credential, exactly like the
/// real backend's per-account storage. Write failures can be injected to
/// exercise the session's sync-failure paths.
pub struct MemoryBackend {
    state: RwLock<State>,
    fail_writes: AtomicBool,
}

impl MemoryBackend {
    /// Create a new empty backend.
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State::default()),
            fail_writes: AtomicBool::new(false),
        }
    }

    /// Make every subsequent write call fail with a sync error.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::SyncFailure("injected write failure".to_string()));
        }
        Ok(())
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VaultBackend for MemoryBackend {
    async fn vault_exists(&self) -> Result<Option<Salt>> {
        let state = self.state.read().unwrap();
        Ok(state.vault.as_ref().map(|record| record.salt.clone()))
    }

    async fn verify_auth_token(&self, token: &AuthToken) -> Result<bool> {
        let state = self.state.read().unwrap();
        let record = state
            .vault
            .as_ref()
            .ok_or_else(|| Error::NotFound("No vault record".to_string()))?;
        // TokenHash equality is constant-time.
        Ok(token.hash() == record.auth_token_hash)
    }

    async fn fetch_envelope(&self) -> Result<Envelope> {
        let state = self.state.read().unwrap();
        state
            .vault
            .as_ref()
            .map(|record| record.envelope.clone())
            .ok_or_else(|| Error::NotFound("No vault record".to_string()))
    }

    async fn store_vault(&self, record: VaultRecord) -> Result<()> {
        self.check_writable()?;
        let mut state = self.state.write().unwrap();
        debug!("Storing vault record");
        state.vault = Some(record);
        Ok(())
    }

    async fn delete_vault(&self, token: &AuthToken) -> Result<()> {
        self.check_writable()?;
        let mut state = self.state.write().unwrap();
        let record = state
            .vault
            .as_ref()
            .ok_or_else(|| Error::NotFound("No vault record".to_string()))?;
        if token.hash() != record.auth_token_hash {
            return Err(Error::InvalidCredential);
        }
        debug!("Deleting vault record");
        state.vault = None;
        Ok(())
    }

    async fn secondary_salt(&self) -> Result<Option<Salt>> {
        let state = self.state.read().unwrap();
        Ok(state.secondary.as_ref().map(|record| record.salt.clone()))
    }

    async fn verify_secondary(&self, token: &AuthToken) -> Result<bool> {
        let state = self.state.read().unwrap();
        let record = state
            .secondary
            .as_ref()
            .ok_or_else(|| Error::NotFound("No secondary credential".to_string()))?;
        Ok(token.hash() == record.token_hash)
    }

    async fn set_secondary(&self, record: SecondaryRecord) -> Result<()> {
        self.check_writable()?;
        let mut state = self.state.write().unwrap();
        debug!("Storing secondary credential");
        state.secondary = Some(record);
        Ok(())
    }

    async fn delete_secondary(&self, token: &AuthToken) -> Result<()> {
        self.check_writable()?;
        let mut state = self.state.write().unwrap();
        let record = state
            .secondary
            .as_ref()
            .ok_or_else(|| Error::NotFound("No secondary credential".to_string()))?;
        if token.hash() != record.token_hash {
            return Err(Error::InvalidCredential);
        }
        debug!("Deleting secondary credential");
        state.secondary = None;
        Ok(())
    }
}
