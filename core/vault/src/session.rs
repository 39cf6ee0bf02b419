//! Vault session state machine.
//!
//! The session owns all ephemeral vault state: the master key, the
//! decrypted document, activity timing, and the secondary guard. Key
//! material exists only inside the `Unlocked` state variant, so every exit
//! from that state drops (and zeroizes) it; there is no other way to
//! destroy it and no way for it to outlive a lock.
//!
//! All transitions and mutations take `&mut self`, which makes the
//! unlock/lock/mutate critical section single-writer by ownership. The
//! production auto-lock tick shares the session behind a mutex; see
//! [`spawn_auto_lock`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::clock::Clock;
use crate::document::{Entry, EntryDraft, EntryId, VaultDocument};
use crate::guard::{GuardDecision, ProtectedAction, SecondaryGuard};
use zkvault_common::{Error, Result};
use zkvault_crypto::{
    decrypt, derive_auth_token, derive_key, encrypt, AuthToken, KdfParams, MasterKey, Salt,
};
use zkvault_sync::{SecondaryRecord, VaultBackend, VaultRecord};

/// Inactivity timeout before the vault locks itself.
pub const AUTO_LOCK_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Granularity of the auto-lock tick.
pub const AUTO_LOCK_TICK: Duration = Duration::from_secs(1);

/// Observable session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VaultStatus {
    /// Existence of a vault has not been checked yet.
    Uninitialized,
    /// No vault record exists for this account.
    NoVault,
    /// A vault exists but no key is held.
    Locked,
    /// Key and document are held in memory.
    Unlocked,
}

/// Everything that exists only while the vault is unlocked.
struct UnlockedState {
    salt: Salt,
    key: MasterKey,
    auth_token: AuthToken,
    document: VaultDocument,
    last_activity: Instant,
}

enum State {
    Uninitialized,
    NoVault,
    Locked { salt: Salt },
    Unlocked(Box<UnlockedState>),
}

fn unlocked_mut(state: &mut State) -> Result<&mut UnlockedState> {
    match state {
        State::Unlocked(unlocked) => Ok(unlocked),
        _ => Err(Error::Precondition("Vault is not unlocked".to_string())),
    }
}

fn unlocked_ref(state: &State) -> Result<&UnlockedState> {
    match state {
        State::Unlocked(unlocked) => Ok(unlocked),
        _ => Err(Error::Precondition("Vault is not unlocked".to_string())),
    }
}

/// The vault session state machine.
///
/// Drives `Uninitialized -> NoVault -> Unlocked` (setup) and
/// `Uninitialized -> Locked <-> Unlocked` (unlock/lock) transitions, and
/// wraps every protected action behind the secondary guard.
pub struct VaultSession {
    backend: Arc<dyn VaultBackend>,
    clock: Arc<dyn Clock>,
    kdf_params: KdfParams,
    auto_lock_timeout: Duration,
    state: State,
    guard: SecondaryGuard,
}

impl VaultSession {
    /// Create a session with production parameters.
    pub fn new(backend: Arc<dyn VaultBackend>, clock: Arc<dyn Clock>) -> Self {
        Self::with_config(backend, clock, KdfParams::default(), AUTO_LOCK_TIMEOUT)
    }

    /// Create a session with explicit KDF parameters and auto-lock timeout.
    pub fn with_config(
        backend: Arc<dyn VaultBackend>,
        clock: Arc<dyn Clock>,
        kdf_params: KdfParams,
        auto_lock_timeout: Duration,
    ) -> Self {
        let guard = SecondaryGuard::new(clock.clone());
        Self {
            backend,
            clock,
            kdf_params,
            auto_lock_timeout,
            state: State::Uninitialized,
            guard,
        }
    }

    /// Current observable state.
    pub fn status(&self) -> VaultStatus {
        match self.state {
            State::Uninitialized => VaultStatus::Uninitialized,
            State::NoVault => VaultStatus::NoVault,
            State::Locked { .. } => VaultStatus::Locked,
            State::Unlocked(_) => VaultStatus::Unlocked,
        }
    }

    /// Whether the vault is currently unlocked.
    pub fn is_unlocked(&self) -> bool {
        self.status() == VaultStatus::Unlocked
    }

    /// The decrypted document.
    ///
    /// # Errors
    /// - [`Error::Precondition`] if the vault is not unlocked
    pub fn document(&self) -> Result<&VaultDocument> {
        Ok(&unlocked_ref(&self.state)?.document)
    }

    /// The decrypted entries.
    ///
    /// # Errors
    /// - [`Error::Precondition`] if the vault is not unlocked
    pub fn entries(&self) -> Result<&[Entry]> {
        Ok(&unlocked_ref(&self.state)?.document.entries)
    }

    /// Ask the backend whether a vault exists and settle into `NoVault`
    /// or `Locked`.
    ///
    /// Also learns whether a secondary credential is configured, so the
    /// guard can collapse to a no-op when there is none.
    ///
    /// # Errors
    /// - [`Error::Precondition`] if already initialized
    /// - [`Error::SyncFailure`] leaves the session `Uninitialized`
    pub async fn initialize(&mut self) -> Result<VaultStatus> {
        if !matches!(self.state, State::Uninitialized) {
            return Err(Error::Precondition(
                "Session is already initialized".to_string(),
            ));
        }

        let existing = self.backend.vault_exists().await?;
        let secondary = self.backend.secondary_salt().await?;
        self.guard.set_configured(secondary.is_some());

        self.state = match existing {
            Some(salt) => {
                debug!("Vault record found");
                State::Locked { salt }
            }
            None => {
                debug!("No vault record for this account");
                State::NoVault
            }
        };
        Ok(self.status())
    }

    /// Create the vault: generate a salt, derive key material, encrypt an
    /// empty document, and persist it. Transitions directly to `Unlocked`.
    ///
    /// # Errors
    /// - [`Error::Precondition`] unless the state is `NoVault`
    /// - [`Error::SyncFailure`] on push failure; the state stays `NoVault`
    pub async fn setup_vault(&mut self, master_password: &str) -> Result<()> {
        if !matches!(self.state, State::NoVault) {
            return Err(Error::Precondition(
                "A vault already exists or existence is unknown".to_string(),
            ));
        }

        let salt = Salt::generate();
        let (key, auth_token) = derive_pair(master_password, &salt, &self.kdf_params).await?;

        let document = VaultDocument::empty(Utc::now());
        let envelope = encrypt(&key, &Zeroizing::new(document.to_bytes()?))?;

        self.backend
            .store_vault(VaultRecord {
                envelope,
                salt: salt.clone(),
                auth_token_hash: auth_token.hash(),
            })
            .await?;

        info!("Vault created");
        self.state = State::Unlocked(Box::new(UnlockedState {
            salt,
            key,
            auth_token,
            document,
            last_activity: self.clock.now(),
        }));
        Ok(())
    }

    /// Unlock the vault with the master password.
    ///
    /// The auth token is verified by the backend before any decryption is
    /// attempted, so a wrong password and corrupted remote data surface as
    /// distinct errors.
    ///
    /// # Errors
    /// - [`Error::Precondition`] unless the state is `Locked`
    /// - [`Error::InvalidCredential`] on a wrong password; stays `Locked`
    /// - [`Error::DecryptionFailure`] if the envelope is unreadable despite
    ///   a verified token (corrupted remote data); stays `Locked`
    pub async fn unlock_vault(&mut self, master_password: &str) -> Result<()> {
        let salt = match &self.state {
            State::Locked { salt } => salt.clone(),
            _ => return Err(Error::Precondition("Vault is not locked".to_string())),
        };

        let (key, auth_token) = derive_pair(master_password, &salt, &self.kdf_params).await?;

        if !self.backend.verify_auth_token(&auth_token).await? {
            debug!("Auth token rejected by backend");
            return Err(Error::InvalidCredential);
        }

        let envelope = self.backend.fetch_envelope().await?;
        let plaintext = Zeroizing::new(decrypt(&key, &envelope)?);
        let document = VaultDocument::from_bytes(&plaintext)?;

        info!("Vault unlocked");
        self.state = State::Unlocked(Box::new(UnlockedState {
            salt,
            key,
            auth_token,
            document,
            last_activity: self.clock.now(),
        }));
        Ok(())
    }

    /// Lock the vault, destroying the key, token, and document.
    ///
    /// Also collapses any open secondary-guard window and pending action:
    /// the decrypted material the window was guarding is gone. A no-op
    /// unless the vault is unlocked.
    pub fn lock(&mut self) {
        match std::mem::replace(&mut self.state, State::Uninitialized) {
            State::Unlocked(unlocked) => {
                let salt = unlocked.salt.clone();
                // Dropping the box zeroizes the key and token.
                drop(unlocked);
                self.state = State::Locked { salt };
                self.guard.collapse();
                info!("Vault locked");
            }
            other => self.state = other,
        }
    }

    /// Record user activity, resetting the auto-lock countdown.
    ///
    /// No re-derivation happens; this only moves the activity timestamp.
    pub fn touch(&mut self) {
        let now = self.clock.now();
        if let State::Unlocked(unlocked) = &mut self.state {
            unlocked.last_activity = now;
        }
    }

    /// Auto-lock tick body: lock if the inactivity timeout has elapsed.
    ///
    /// Returns `true` if this call locked the vault.
    pub fn check_auto_lock(&mut self) -> bool {
        let now = self.clock.now();
        let expired = match &self.state {
            State::Unlocked(unlocked) => {
                now.saturating_duration_since(unlocked.last_activity) >= self.auto_lock_timeout
            }
            _ => false,
        };
        if expired {
            warn!("Inactivity timeout reached, locking vault");
            self.lock();
        }
        expired
    }

    /// Add an entry and push the re-encrypted document.
    ///
    /// The in-memory document is replaced only after the backend confirms
    /// the write, keeping client and server consistent.
    ///
    /// # Errors
    /// - [`Error::Precondition`] if the vault is not unlocked
    /// - [`Error::SyncFailure`] on push failure; the pre-mutation document
    ///   stays in memory
    pub async fn add_entry(&mut self, draft: EntryDraft) -> Result<EntryId> {
        let backend = Arc::clone(&self.backend);
        let now = self.clock.now();
        let unlocked = unlocked_mut(&mut self.state)?;

        let mut candidate = unlocked.document.clone();
        let id = candidate.add_entry(draft, Utc::now());

        let record = encrypted_record(unlocked, &candidate)?;
        backend.store_vault(record).await?;

        debug!("Entry added and pushed");
        unlocked.document = candidate;
        unlocked.last_activity = now;
        Ok(id)
    }

    /// Update an entry and push the re-encrypted document.
    ///
    /// # Errors
    /// - [`Error::NotFound`] if the entry does not exist
    /// - [`Error::SyncFailure`] on push failure; no local change
    pub async fn update_entry(&mut self, id: &EntryId, draft: EntryDraft) -> Result<()> {
        let backend = Arc::clone(&self.backend);
        let now = self.clock.now();
        let unlocked = unlocked_mut(&mut self.state)?;

        let mut candidate = unlocked.document.clone();
        candidate.update_entry(id, draft, Utc::now())?;

        let record = encrypted_record(unlocked, &candidate)?;
        backend.store_vault(record).await?;

        debug!("Entry updated and pushed");
        unlocked.document = candidate;
        unlocked.last_activity = now;
        Ok(())
    }

    /// Delete an entry and push the re-encrypted document.
    ///
    /// # Errors
    /// - [`Error::NotFound`] if the entry does not exist
    /// - [`Error::SyncFailure`] on push failure; no local change
    pub async fn delete_entry(&mut self, id: &EntryId) -> Result<()> {
        let backend = Arc::clone(&self.backend);
        let now = self.clock.now();
        let unlocked = unlocked_mut(&mut self.state)?;

        let mut candidate = unlocked.document.clone();
        candidate.delete_entry(id, Utc::now())?;

        let record = encrypted_record(unlocked, &candidate)?;
        backend.store_vault(record).await?;

        debug!("Entry deleted and pushed");
        unlocked.document = candidate;
        unlocked.last_activity = now;
        Ok(())
    }

    /// Change the master password.
    ///
    /// Verifies the old password first, then re-encrypts the current
    /// document under a brand-new salt and key and replaces the full
    /// backend record atomically. The in-memory key is swapped only after
    /// the backend confirms the write: if the push fails, the session
    /// keeps operating under the old key.
    ///
    /// # Errors
    /// - [`Error::InvalidCredential`] if `old_password` is wrong; no state
    ///   changes anywhere
    /// - [`Error::SyncFailure`] on push failure; no local change
    pub async fn change_master_password(
        &mut self,
        old_password: &str,
        new_password: &str,
    ) -> Result<()> {
        let backend = Arc::clone(&self.backend);
        let clock = Arc::clone(&self.clock);
        let params = self.kdf_params.clone();

        let old_salt = unlocked_ref(&self.state)?.salt.clone();
        let old_token = derive_token(old_password, &old_salt, &params).await?;
        if !backend.verify_auth_token(&old_token).await? {
            return Err(Error::InvalidCredential);
        }

        let new_salt = Salt::generate();
        let (new_key, new_token) = derive_pair(new_password, &new_salt, &params).await?;

        let unlocked = unlocked_mut(&mut self.state)?;
        let mut candidate = unlocked.document.clone();
        candidate.last_modified = Utc::now();

        let envelope = encrypt(&new_key, &Zeroizing::new(candidate.to_bytes()?))?;
        backend
            .store_vault(VaultRecord {
                envelope,
                salt: new_salt.clone(),
                auth_token_hash: new_token.hash(),
            })
            .await?;

        info!("Master password changed");
        unlocked.salt = new_salt;
        unlocked.key = new_key;
        unlocked.auth_token = new_token;
        unlocked.document = candidate;
        unlocked.last_activity = clock.now();
        Ok(())
    }

    /// Delete the vault after the backend verifies the password.
    ///
    /// # Errors
    /// - [`Error::InvalidCredential`] on a wrong password; stays `Unlocked`
    /// - [`Error::SyncFailure`] on backend failure; stays `Unlocked`
    pub async fn delete_vault(&mut self, master_password: &str) -> Result<()> {
        let salt = unlocked_ref(&self.state)?.salt.clone();
        let token = derive_token(master_password, &salt, &self.kdf_params).await?;

        self.backend.delete_vault(&token).await?;

        info!("Vault deleted");
        self.state = State::NoVault;
        self.guard.collapse();
        Ok(())
    }

    // Secondary-password guard surface.

    /// Request a protected action (reveal/copy/edit of a decrypted secret).
    ///
    /// If the guard's window is open (or no secondary credential is
    /// configured) the action is permitted immediately; otherwise it is
    /// held pending and the caller should prompt for the secondary
    /// password, then call [`VaultSession::verify_secondary`].
    ///
    /// # Errors
    /// - [`Error::Precondition`] if the vault is not unlocked
    pub fn request_protected(&mut self, action: ProtectedAction) -> Result<GuardDecision> {
        unlocked_ref(&self.state)?;
        self.touch();
        Ok(self.guard.request(action))
    }

    /// Verify the secondary password, opening a fresh validity window.
    ///
    /// Returns the pending action, if any, for the caller to run.
    ///
    /// # Errors
    /// - [`Error::RateLimited`] during lockout, without a backend call
    /// - [`Error::InvalidCredential`] on a wrong password
    pub async fn verify_secondary(&mut self, password: &str) -> Result<Option<ProtectedAction>> {
        unlocked_ref(&self.state)?;
        self.guard.begin_attempt()?;

        let salt = self.backend.secondary_salt().await?.ok_or_else(|| {
            Error::Precondition("No secondary credential configured".to_string())
        })?;
        let token = derive_token(password, &salt, &self.kdf_params).await?;

        if self.backend.verify_secondary(&token).await? {
            debug!("Secondary password verified");
            Ok(self.guard.record_success())
        } else {
            self.guard.record_failure();
            debug!(
                failed_attempts = self.guard.failed_attempts(),
                "Secondary password rejected"
            );
            Err(Error::InvalidCredential)
        }
    }

    /// Configure a secondary credential.
    ///
    /// Fully independent of the master password: resetting or losing it
    /// never affects vault decryptability.
    pub async fn configure_secondary(&mut self, password: &str) -> Result<()> {
        unlocked_ref(&self.state)?;

        let salt = Salt::generate();
        let token = derive_token(password, &salt, &self.kdf_params).await?;
        self.backend
            .set_secondary(SecondaryRecord {
                salt,
                token_hash: token.hash(),
            })
            .await?;

        info!("Secondary credential configured");
        self.guard.set_configured(true);
        Ok(())
    }

    /// Change the secondary credential.
    ///
    /// # Errors
    /// - [`Error::InvalidCredential`] if `old_password` is wrong
    pub async fn change_secondary(&mut self, old_password: &str, new_password: &str) -> Result<()> {
        unlocked_ref(&self.state)?;

        let old_salt = self.backend.secondary_salt().await?.ok_or_else(|| {
            Error::Precondition("No secondary credential configured".to_string())
        })?;
        let old_token = derive_token(old_password, &old_salt, &self.kdf_params).await?;
        if !self.backend.verify_secondary(&old_token).await? {
            return Err(Error::InvalidCredential);
        }

        let new_salt = Salt::generate();
        let new_token = derive_token(new_password, &new_salt, &self.kdf_params).await?;
        self.backend
            .set_secondary(SecondaryRecord {
                salt: new_salt,
                token_hash: new_token.hash(),
            })
            .await?;

        info!("Secondary credential changed");
        // A credential change invalidates any open window.
        self.guard.collapse();
        Ok(())
    }

    /// Remove the secondary credential; the guard becomes a no-op.
    ///
    /// # Errors
    /// - [`Error::InvalidCredential`] if the password is wrong
    pub async fn remove_secondary(&mut self, password: &str) -> Result<()> {
        unlocked_ref(&self.state)?;

        let salt = self.backend.secondary_salt().await?.ok_or_else(|| {
            Error::Precondition("No secondary credential configured".to_string())
        })?;
        let token = derive_token(password, &salt, &self.kdf_params).await?;
        self.backend.delete_secondary(&token).await?;

        info!("Secondary credential removed");
        self.guard.set_configured(false);
        Ok(())
    }
}

impl Drop for VaultSession {
    fn drop(&mut self) {
        // Ensure key material is destroyed even if the caller forgot to lock.
        self.lock();
    }
}

/// Re-encrypt a candidate document under the session's current key.
fn encrypted_record(unlocked: &UnlockedState, candidate: &VaultDocument) -> Result<VaultRecord> {
    let envelope = encrypt(&unlocked.key, &Zeroizing::new(candidate.to_bytes()?))?;
    Ok(VaultRecord {
        envelope,
        salt: unlocked.salt.clone(),
        auth_token_hash: unlocked.auth_token.hash(),
    })
}

/// Derive the encryption key and auth token off the async runtime.
///
/// The KDF is deliberately slow, so it runs on the blocking pool; the
/// caller still awaits it as a hard prerequisite.
async fn derive_pair(
    password: &str,
    salt: &Salt,
    params: &KdfParams,
) -> Result<(MasterKey, AuthToken)> {
    let password = Zeroizing::new(password.as_bytes().to_vec());
    let salt = salt.clone();
    let params = params.clone();
    tokio::task::spawn_blocking(move || {
        let key = derive_key(&password, &salt, &params)?;
        let token = derive_auth_token(&password, &salt, &params)?;
        Ok((key, token))
    })
    .await
    .map_err(|e| Error::Crypto(format!("Key derivation task failed: {}", e)))?
}

/// Derive only an auth token off the async runtime.
async fn derive_token(password: &str, salt: &Salt, params: &KdfParams) -> Result<AuthToken> {
    let password = Zeroizing::new(password.as_bytes().to_vec());
    let salt = salt.clone();
    let params = params.clone();
    tokio::task::spawn_blocking(move || derive_auth_token(&password, &salt, &params))
        .await
        .map_err(|e| Error::Crypto(format!("Key derivation task failed: {}", e)))?
}

/// Run the auto-lock tick against a shared session.
///
/// Ticks every [`AUTO_LOCK_TICK`] and locks the session once the
/// inactivity timeout elapses. Runs until the returned handle is aborted.
pub fn spawn_auto_lock(session: Arc<Mutex<VaultSession>>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(AUTO_LOCK_TICK);
        loop {
            ticker.tick().await;
            let mut session = session.lock().await;
            if session.check_auto_lock() {
                debug!("Auto-lock fired");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::guard::SecretField;
    use zkvault_sync::MemoryBackend;

    const MASTER: &str = "Correct-Horse1!";
    const SECONDARY: &str = "reveal-pin-9";

    fn test_session() -> (VaultSession, Arc<MemoryBackend>, Arc<ManualClock>) {
        let backend = Arc::new(MemoryBackend::new());
        let clock = Arc::new(ManualClock::new());
        let session = VaultSession::with_config(
            backend.clone(),
            clock.clone(),
            KdfParams::moderate(),
            AUTO_LOCK_TIMEOUT,
        );
        (session, backend, clock)
    }

    async fn unlocked_session() -> (VaultSession, Arc<MemoryBackend>, Arc<ManualClock>) {
        let (mut session, backend, clock) = test_session();
        assert_eq!(session.initialize().await.unwrap(), VaultStatus::NoVault);
        session.setup_vault(MASTER).await.unwrap();
        (session, backend, clock)
    }

    #[tokio::test]
    async fn test_initialize_empty_backend() {
        let (mut session, _backend, _clock) = test_session();

        assert_eq!(session.status(), VaultStatus::Uninitialized);
        assert_eq!(session.initialize().await.unwrap(), VaultStatus::NoVault);
        // Initializing twice is a programmer error.
        assert!(matches!(
            session.initialize().await,
            Err(Error::Precondition(_))
        ));
    }

    #[tokio::test]
    async fn test_initialize_existing_vault() {
        let (mut first, backend, clock) = test_session();
        first.initialize().await.unwrap();
        first.setup_vault(MASTER).await.unwrap();
        drop(first);

        let mut second = VaultSession::with_config(
            backend,
            clock,
            KdfParams::moderate(),
            AUTO_LOCK_TIMEOUT,
        );
        assert_eq!(second.initialize().await.unwrap(), VaultStatus::Locked);
    }

    #[tokio::test]
    async fn test_setup_then_unlock_scenario() {
        let (mut session, _backend, _clock) = unlocked_session().await;

        assert!(session.is_unlocked());
        assert!(session.entries().unwrap().is_empty());

        session.lock();
        assert_eq!(session.status(), VaultStatus::Locked);
        assert!(session.entries().is_err());

        assert!(matches!(
            session.unlock_vault("wrong").await,
            Err(Error::InvalidCredential)
        ));
        assert_eq!(session.status(), VaultStatus::Locked);

        session.unlock_vault(MASTER).await.unwrap();
        assert!(session.is_unlocked());
        assert!(session.entries().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_entries_survive_lock_cycle() {
        let (mut session, _backend, _clock) = unlocked_session().await;

        let draft = EntryDraft {
            username: Some("alice".to_string()),
            password: Some("hunter2-but-long".to_string()),
            ..EntryDraft::login("example.com")
        };
        let id = session.add_entry(draft).await.unwrap();
        assert_eq!(session.entries().unwrap().len(), 1);

        session.lock();
        session.unlock_vault(MASTER).await.unwrap();

        let entries = session.entries().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, id);
        assert_eq!(entries[0].username.as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn test_update_and_delete_entry() {
        let (mut session, _backend, _clock) = unlocked_session().await;

        let id = session.add_entry(EntryDraft::login("one")).await.unwrap();

        let draft = EntryDraft {
            favorite: true,
            ..EntryDraft::login("one-renamed")
        };
        session.update_entry(&id, draft).await.unwrap();
        assert_eq!(session.entries().unwrap()[0].name, "one-renamed");

        session.delete_entry(&id).await.unwrap();
        assert!(session.entries().unwrap().is_empty());

        assert!(matches!(
            session.delete_entry(&id).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_push_failure_keeps_pre_mutation_document() {
        let (mut session, backend, _clock) = unlocked_session().await;

        session.add_entry(EntryDraft::login("kept")).await.unwrap();

        backend.set_fail_writes(true);
        assert!(matches!(
            session.add_entry(EntryDraft::login("dropped")).await,
            Err(Error::SyncFailure(_))
        ));

        // Still unlocked, and the failed mutation left no trace.
        assert!(session.is_unlocked());
        let entries = session.entries().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "kept");
    }

    #[tokio::test]
    async fn test_mutation_while_locked_is_precondition() {
        let (mut session, _backend, _clock) = unlocked_session().await;
        session.lock();

        assert!(matches!(
            session.add_entry(EntryDraft::login("nope")).await,
            Err(Error::Precondition(_))
        ));
    }

    #[tokio::test]
    async fn test_change_password_invalidates_old() {
        let (mut session, _backend, _clock) = unlocked_session().await;
        let id = session.add_entry(EntryDraft::login("site")).await.unwrap();

        assert!(matches!(
            session.change_master_password("wrong", "NewPass-2!").await,
            Err(Error::InvalidCredential)
        ));

        session
            .change_master_password(MASTER, "NewPass-2!")
            .await
            .unwrap();

        session.lock();
        assert!(matches!(
            session.unlock_vault(MASTER).await,
            Err(Error::InvalidCredential)
        ));
        session.unlock_vault("NewPass-2!").await.unwrap();
        assert_eq!(session.entries().unwrap()[0].id, id);
    }

    #[tokio::test]
    async fn test_change_password_push_failure_keeps_old_key() {
        let (mut session, backend, _clock) = unlocked_session().await;
        session.add_entry(EntryDraft::login("site")).await.unwrap();

        backend.set_fail_writes(true);
        assert!(matches!(
            session.change_master_password(MASTER, "NewPass-2!").await,
            Err(Error::SyncFailure(_))
        ));
        backend.set_fail_writes(false);

        // The session still operates under the old key and password.
        session.lock();
        session.unlock_vault(MASTER).await.unwrap();
        assert_eq!(session.entries().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_corrupted_envelope_is_not_wrong_password() {
        let (mut session, backend, _clock) = unlocked_session().await;
        session.lock();

        // Replace the stored envelope with one encrypted under a different
        // key, keeping the salt and auth-token hash intact.
        let salt = backend.vault_exists().await.unwrap().unwrap();
        let params = KdfParams::moderate();
        let token = derive_auth_token(MASTER.as_bytes(), &salt, &params).unwrap();
        let bogus_key = derive_key(b"some-other-password", &salt, &params).unwrap();
        let envelope = encrypt(&bogus_key, b"garbage").unwrap();
        backend
            .store_vault(VaultRecord {
                envelope,
                salt,
                auth_token_hash: token.hash(),
            })
            .await
            .unwrap();

        assert!(matches!(
            session.unlock_vault(MASTER).await,
            Err(Error::DecryptionFailure)
        ));
        assert_eq!(session.status(), VaultStatus::Locked);
    }

    #[tokio::test]
    async fn test_auto_lock_at_timeout() {
        let (mut session, _backend, clock) = unlocked_session().await;

        clock.advance(AUTO_LOCK_TIMEOUT - Duration::from_secs(1));
        assert!(!session.check_auto_lock());
        assert!(session.is_unlocked());

        clock.advance(Duration::from_secs(1));
        assert!(session.check_auto_lock());
        assert_eq!(session.status(), VaultStatus::Locked);
        // Key and document are unrecoverable.
        assert!(session.entries().is_err());
    }

    #[tokio::test]
    async fn test_touch_resets_auto_lock() {
        let (mut session, _backend, clock) = unlocked_session().await;

        clock.advance(Duration::from_secs(200));
        session.touch();
        clock.advance(Duration::from_secs(200));
        assert!(!session.check_auto_lock());
        assert!(session.is_unlocked());

        clock.advance(Duration::from_secs(100));
        assert!(session.check_auto_lock());
    }

    #[tokio::test]
    async fn test_delete_vault_requires_password() {
        let (mut session, backend, _clock) = unlocked_session().await;

        assert!(matches!(
            session.delete_vault("wrong").await,
            Err(Error::InvalidCredential)
        ));
        assert!(session.is_unlocked());

        session.delete_vault(MASTER).await.unwrap();
        assert_eq!(session.status(), VaultStatus::NoVault);
        assert!(backend.vault_exists().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_guard_noop_without_credential() {
        let (mut session, _backend, _clock) = unlocked_session().await;

        let id = session.add_entry(EntryDraft::login("site")).await.unwrap();
        let decision = session
            .request_protected(ProtectedAction::RevealEntry(id))
            .unwrap();
        assert!(matches!(decision, GuardDecision::Permitted(_)));
    }

    #[tokio::test]
    async fn test_guard_flow_with_lockout_and_window() {
        let (mut session, _backend, clock) = unlocked_session().await;
        let id = session.add_entry(EntryDraft::login("site")).await.unwrap();
        session.configure_secondary(SECONDARY).await.unwrap();

        let action = ProtectedAction::CopyField(id, SecretField::Password);
        assert_eq!(
            session.request_protected(action.clone()).unwrap(),
            GuardDecision::VerificationRequired
        );

        for _ in 0..3 {
            assert!(matches!(
                session.verify_secondary("wrong-pin").await,
                Err(Error::InvalidCredential)
            ));
        }
        // Locked out: rejected before any backend check.
        assert!(matches!(
            session.verify_secondary(SECONDARY).await,
            Err(Error::RateLimited { .. })
        ));

        clock.advance(Duration::from_secs(30));
        let pending = session.verify_secondary(SECONDARY).await.unwrap();
        assert_eq!(pending, Some(action));

        // Window open: further protected actions run immediately.
        let again = session
            .request_protected(ProtectedAction::EditEntry(
                session.entries().unwrap()[0].id.clone(),
            ))
            .unwrap();
        assert!(matches!(again, GuardDecision::Permitted(_)));

        // Window expired: prompt again.
        clock.advance(Duration::from_secs(61));
        let expired = session
            .request_protected(ProtectedAction::RevealEntry(
                session.entries().unwrap()[0].id.clone(),
            ))
            .unwrap();
        assert_eq!(expired, GuardDecision::VerificationRequired);
    }

    #[tokio::test]
    async fn test_lock_collapses_guard_window() {
        let (mut session, _backend, _clock) = unlocked_session().await;
        let id = session.add_entry(EntryDraft::login("site")).await.unwrap();
        session.configure_secondary(SECONDARY).await.unwrap();

        session.verify_secondary(SECONDARY).await.unwrap();
        session.lock();
        session.unlock_vault(MASTER).await.unwrap();

        // The window did not survive the lock.
        let decision = session
            .request_protected(ProtectedAction::RevealEntry(id))
            .unwrap();
        assert_eq!(decision, GuardDecision::VerificationRequired);
    }

    #[tokio::test]
    async fn test_change_and_remove_secondary() {
        let (mut session, _backend, _clock) = unlocked_session().await;
        let id = session.add_entry(EntryDraft::login("site")).await.unwrap();
        session.configure_secondary(SECONDARY).await.unwrap();

        assert!(matches!(
            session.change_secondary("wrong-pin", "new-pin-7").await,
            Err(Error::InvalidCredential)
        ));
        session
            .change_secondary(SECONDARY, "new-pin-7")
            .await
            .unwrap();

        assert!(matches!(
            session.verify_secondary(SECONDARY).await,
            Err(Error::InvalidCredential)
        ));
        session.verify_secondary("new-pin-7").await.unwrap();

        session.remove_secondary("new-pin-7").await.unwrap();
        let decision = session
            .request_protected(ProtectedAction::RevealEntry(id))
            .unwrap();
        assert!(matches!(decision, GuardDecision::Permitted(_)));
    }

    #[tokio::test]
    async fn test_secondary_independent_of_vault_key() {
        // Removing and re-adding the secondary credential never affects
        // vault decryptability.
        let (mut session, _backend, _clock) = unlocked_session().await;
        session.configure_secondary(SECONDARY).await.unwrap();
        session.remove_secondary(SECONDARY).await.unwrap();
        session.configure_secondary("different-pin").await.unwrap();

        session.lock();
        session.unlock_vault(MASTER).await.unwrap();
        assert!(session.is_unlocked());
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawn_auto_lock_ticks() {
        // Drive the production tick with tokio's paused time; activity
        // timing itself still comes from the manual clock.
        let (session, _backend, clock) = unlocked_session().await;
        let session = Arc::new(Mutex::new(session));

        let handle = spawn_auto_lock(session.clone());
        clock.advance(AUTO_LOCK_TIMEOUT);

        // Paused time auto-advances while the ticker is the only waiter.
        tokio::time::sleep(AUTO_LOCK_TICK * 2).await;

        let locked = {
            let guard = session.lock().await;
            guard.status() == VaultStatus::Locked
        };
        handle.abort();
        assert!(locked);
    }
}
