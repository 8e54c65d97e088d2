//! K1 lifecycle: lazy initialization, password change, and refresh
//!
//! Readers take the state read lock for a clone of the cached key. Lifecycle
//! operations are serialized by a separate mutex and do their filesystem and
//! KDF work outside the state lock, taking the write lock only to swap.

use mkv_core::config::{KeystoreConfig, UninitializedPolicy};
use mkv_core::{AuditLog, AuditOp, AuditStatus};
use mkv_crypto::{
    derive_legacy_wrapping_key, derive_wrapping_key, generate_data_key, generate_salt,
    unwrap_data_key, wrap_data_key, CryptoError, DataKey, Salt, KEY_SIZE,
};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, OnceLock, RwLock, Weak};
use std::sync::{RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use zeroize::Zeroizing;

use crate::error::KeystoreError;
use crate::password::{load_password, write_password_file, PasswordOrigin};
use crate::persist::{
    write_key_file, KeyMaterial, KeyPersistence, StoredHierarchy, WRAPPED_K1_FILE,
};

/// Key handed out before initialization completes under the fallback policy.
/// Publicly known: anything encrypted with it is effectively plaintext.
pub const UNINITIALIZED_FALLBACK_KEY: [u8; KEY_SIZE] = *b"1234567890abcdef1234567890abcdef";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Uninitialized,
    Initializing,
    Ready,
    Rotating,
}

impl Phase {
    fn has_key(self) -> bool {
        matches!(self, Phase::Ready | Phase::Rotating)
    }
}

/// Snapshot returned by [`KeyManager::status`]
#[derive(Debug, Clone, Serialize)]
pub struct KeyManagerStatus {
    pub initialized: bool,
    pub has_key: bool,
    pub key_length: usize,
    pub password_set: bool,
    pub phase: Phase,
    pub timestamp: String,
}

struct KeyState {
    data_key: Option<DataKey>,
    /// `None` until initialized, and for legacy hierarchies without a salt file
    salt: Option<Salt>,
    password: Option<Arc<SecretString>>,
    /// `None` when the embedder supplied the password
    password_origin: Option<PasswordOrigin>,
    phase: Phase,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InitOutcome {
    Pending,
    Ready,
    Failed,
}

pub struct KeyManager {
    me: Weak<KeyManager>,
    config: KeystoreConfig,
    state: RwLock<KeyState>,
    lifecycle: Mutex<()>,
    init_spawned: AtomicBool,
    init_outcome: Mutex<InitOutcome>,
    init_cv: Condvar,
    persistence: KeyPersistence,
    audit: Arc<AuditLog>,
}

impl KeyManager {
    /// Password is discovered from the config chain on first initialization.
    pub fn new(config: KeystoreConfig, audit: Arc<AuditLog>) -> Arc<Self> {
        Self::build(config, audit, None)
    }

    pub fn with_password(
        config: KeystoreConfig,
        audit: Arc<AuditLog>,
        password: SecretString,
    ) -> Arc<Self> {
        Self::build(config, audit, Some(Arc::new(password)))
    }

    fn build(
        config: KeystoreConfig,
        audit: Arc<AuditLog>,
        password: Option<Arc<SecretString>>,
    ) -> Arc<Self> {
        let persistence = KeyPersistence::new(&config, audit.clone());
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            config,
            state: RwLock::new(KeyState {
                data_key: None,
                salt: None,
                password,
                password_origin: None,
                phase: Phase::Uninitialized,
            }),
            lifecycle: Mutex::new(()),
            init_spawned: AtomicBool::new(false),
            init_outcome: Mutex::new(InitOutcome::Pending),
            init_cv: Condvar::new(),
            persistence,
            audit,
        })
    }

    pub fn config(&self) -> &KeystoreConfig {
        &self.config
    }

    pub fn audit(&self) -> &Arc<AuditLog> {
        &self.audit
    }

    pub fn persistence(&self) -> &KeyPersistence {
        &self.persistence
    }

    /// Where the password was discovered; `None` before discovery or when
    /// supplied by the embedder.
    pub fn password_origin(&self) -> Option<PasswordOrigin> {
        self.read_state().password_origin.clone()
    }

    pub fn phase(&self) -> Phase {
        self.read_state().phase
    }

    /// Load the stored hierarchy, or create and persist a new one.
    ///
    /// Idempotent. If the stored key does not unwrap under the current
    /// password a new hierarchy replaces it; data written under the old K1
    /// becomes unreadable.
    pub fn initialize(&self) -> Result<(), KeystoreError> {
        let _lifecycle = self.lock_lifecycle();
        if self.phase().has_key() {
            self.signal(InitOutcome::Ready);
            return Ok(());
        }

        self.write_state().phase = Phase::Initializing;
        self.audit
            .event(AuditOp::KeyManagerInit, AuditStatus::Start, None);

        match self.initialize_locked() {
            Ok(()) => {
                self.audit
                    .event(AuditOp::KeyManagerInit, AuditStatus::Success, None);
                tracing::info!("key manager ready");
                self.signal(InitOutcome::Ready);
                Ok(())
            }
            Err(e) => {
                self.write_state().phase = Phase::Uninitialized;
                self.audit.event(
                    AuditOp::KeyManagerInit,
                    AuditStatus::Error,
                    Some(&e.to_string()),
                );
                self.signal(InitOutcome::Failed);
                Err(e)
            }
        }
    }

    fn initialize_locked(&self) -> Result<(), KeystoreError> {
        let password = self.password()?;

        let candidates = self.persistence.load_hierarchies();
        let (data_key, salt) = if candidates.is_empty() {
            tracing::info!("no stored key hierarchy, creating one");
            let (data_key, salt) = self.create_hierarchy(&password)?;
            (data_key, Some(salt))
        } else {
            match self.unwrap_first(candidates, &password) {
                Ok(loaded) => loaded,
                Err(e) => {
                    tracing::warn!("no stored data key is usable ({e}), creating a new key hierarchy");
                    self.audit.event(
                        AuditOp::KeyManagerInit,
                        AuditStatus::Warn,
                        Some(&format!("stored keys unusable, creating new keys: {e}")),
                    );
                    let (data_key, salt) = self.create_hierarchy(&password)?;
                    (data_key, Some(salt))
                }
            }
        };

        let mut state = self.write_state();
        state.data_key = Some(data_key);
        state.salt = salt;
        state.phase = Phase::Ready;
        Ok(())
    }

    /// Unwrap the first candidate that works. If an earlier search path held
    /// a broken pair, the good one is written back over every path.
    fn unwrap_first(
        &self,
        candidates: Vec<Result<StoredHierarchy, KeystoreError>>,
        password: &SecretString,
    ) -> Result<(DataKey, Option<Salt>), KeystoreError> {
        let mut last_error = KeystoreError::NotFound(WRAPPED_K1_FILE.into());
        for (index, candidate) in candidates.into_iter().enumerate() {
            let stored = match candidate {
                Ok(stored) => stored,
                Err(e) => {
                    tracing::warn!("skipping stored key hierarchy: {e}");
                    last_error = e;
                    continue;
                }
            };
            match self.unwrap_stored(&stored, password) {
                Ok(data_key) => {
                    if index > 0 {
                        self.repair(&data_key, &stored, password);
                    }
                    return Ok((data_key, stored.salt));
                }
                Err(e) => {
                    tracing::warn!(dir = %stored.dir.display(), "stored data key did not unwrap: {e}");
                    last_error = e.into();
                }
            }
        }
        Err(last_error)
    }

    fn repair(&self, data_key: &DataKey, stored: &StoredHierarchy, password: &SecretString) {
        let Some(salt) = &stored.salt else {
            return;
        };
        tracing::warn!(
            dir = %stored.dir.display(),
            "loaded key hierarchy from a later search path, rewriting the others"
        );
        if let Err(e) = self.wrap_and_save(data_key, salt, password) {
            tracing::warn!("could not rewrite key hierarchy: {e}");
        }
    }

    fn unwrap_stored(
        &self,
        stored: &StoredHierarchy,
        password: &SecretString,
    ) -> Result<DataKey, CryptoError> {
        let dir = stored.dir.display().to_string();
        self.audit
            .record(AuditOp::KeyManagerLoad, "", &dir, AuditStatus::Start, None);

        let result = match &stored.salt {
            Some(salt) => derive_wrapping_key(password, salt),
            None => derive_legacy_wrapping_key(password),
        }
        .and_then(|k0| unwrap_data_key(&stored.wrapped, &k0));

        match &result {
            Ok(_) => self
                .audit
                .record(AuditOp::KeyManagerLoad, "", &dir, AuditStatus::Success, None),
            Err(e) => self.audit.record(
                AuditOp::KeyManagerLoad,
                "",
                &dir,
                AuditStatus::Fail,
                Some(&e.to_string()),
            ),
        }
        result
    }

    fn create_hierarchy(&self, password: &SecretString) -> Result<(DataKey, Salt), KeystoreError> {
        self.audit
            .event(AuditOp::KeyManagerCreate, AuditStatus::Start, None);

        let data_key = generate_data_key();
        let salt = generate_salt();
        match self.wrap_and_save(&data_key, &salt, password) {
            Ok(()) => {
                self.audit
                    .event(AuditOp::KeyManagerCreate, AuditStatus::Success, None);
                Ok((data_key, salt))
            }
            Err(e) => {
                self.audit.event(
                    AuditOp::KeyManagerCreate,
                    AuditStatus::Fail,
                    Some(&e.to_string()),
                );
                Err(e)
            }
        }
    }

    fn wrap_and_save(
        &self,
        data_key: &DataKey,
        salt: &Salt,
        password: &SecretString,
    ) -> Result<(), KeystoreError> {
        let wrapping_key = derive_wrapping_key(password, salt)?;
        let wrapped = wrap_data_key(data_key, &wrapping_key)?;
        self.persistence.save_all(&KeyMaterial {
            data_key,
            wrapping_key: &wrapping_key,
            salt,
            wrapped: &wrapped,
            password,
        })?;
        Ok(())
    }

    /// The configured password, discovering it on first use.
    fn password(&self) -> Result<Arc<SecretString>, KeystoreError> {
        if let Some(password) = self.read_state().password.clone() {
            return Ok(password);
        }

        let source = load_password(&self.config)?;
        if source.is_default() {
            self.audit.event(
                AuditOp::KeyManagerInit,
                AuditStatus::Warn,
                Some("no password file found, using the default password"),
            );
        }
        let password = Arc::new(source.password);
        let mut state = self.write_state();
        state.password = Some(password.clone());
        state.password_origin = Some(source.origin);
        Ok(password)
    }

    /// Current K1.
    ///
    /// Before the first initialization completes this starts one in the
    /// background and then follows `uninitialized_policy`: either return
    /// [`UNINITIALIZED_FALLBACK_KEY`] at once or wait for the real key.
    pub fn get_data_key(&self) -> Result<DataKey, KeystoreError> {
        if let Some(key) = self.cached_key() {
            return Ok(key);
        }

        self.spawn_initialization();

        match self.config.uninitialized_policy {
            UninitializedPolicy::Fallback => {
                tracing::warn!("key manager not ready, using the fallback data key");
                Ok(DataKey::from_bytes(UNINITIALIZED_FALLBACK_KEY))
            }
            UninitializedPolicy::Wait => {
                self.wait_for_key(Duration::from_millis(self.config.wait_timeout_ms))
            }
        }
    }

    fn cached_key(&self) -> Option<DataKey> {
        let state = self.read_state();
        if state.phase.has_key() {
            state.data_key.clone()
        } else {
            None
        }
    }

    fn spawn_initialization(&self) {
        if self
            .init_spawned
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        let Some(manager) = self.me.upgrade() else {
            self.init_spawned.store(false, Ordering::Release);
            return;
        };
        *self.lock_outcome() = InitOutcome::Pending;

        let spawned = std::thread::Builder::new()
            .name("mkv-key-init".into())
            .spawn(move || match manager.initialize() {
                Ok(()) => manager.audit.event(
                    AuditOp::KeyManagerAutoInit,
                    AuditStatus::Success,
                    None,
                ),
                Err(e) => {
                    tracing::error!("background key initialization failed: {e}");
                    manager.audit.event(
                        AuditOp::KeyManagerAutoInit,
                        AuditStatus::Error,
                        Some(&e.to_string()),
                    );
                    // Let the next reader retry
                    manager.init_spawned.store(false, Ordering::Release);
                }
            });

        if let Err(e) = spawned {
            tracing::error!("could not start key initialization thread: {e}");
            self.init_spawned.store(false, Ordering::Release);
            self.signal(InitOutcome::Failed);
        }
    }

    fn wait_for_key(&self, timeout: Duration) -> Result<DataKey, KeystoreError> {
        let guard = self.lock_outcome();
        let outcome = {
            let (guard, _) = self
                .init_cv
                .wait_timeout_while(guard, timeout, |outcome| *outcome == InitOutcome::Pending)
                .unwrap_or_else(|e| e.into_inner());
            *guard
        };

        match outcome {
            InitOutcome::Pending => Err(KeystoreError::NotReady(timeout)),
            InitOutcome::Failed => Err(KeystoreError::NotInitialized),
            InitOutcome::Ready => self.cached_key().ok_or(KeystoreError::NotInitialized),
        }
    }

    /// Rewrap the unchanged K1 under a K0 derived from `new_password`.
    ///
    /// Stored values stay readable. A password discovered from a file is
    /// rewritten in that file (the configured file when the default password
    /// was in use) so the next start unwraps K1; credentials provisioned
    /// outside the process are refused before anything is written. A password
    /// passed to [`KeyManager::with_password`] is the caller's to keep.
    /// Hierarchies loaded without a salt file get a fresh salt here.
    pub fn change_password(&self, new_password: SecretString) -> Result<(), KeystoreError> {
        if new_password.expose_secret().trim().is_empty() {
            return Err(KeystoreError::Config("new password must not be empty".into()));
        }

        let _lifecycle = self.lock_lifecycle();
        self.audit
            .event(AuditOp::KeyManagerChangePass, AuditStatus::Start, None);

        match self.change_password_locked(new_password) {
            Ok(()) => {
                self.audit
                    .event(AuditOp::KeyManagerChangePass, AuditStatus::Success, None);
                tracing::info!("wrapping password changed");
                Ok(())
            }
            Err(e) => {
                self.audit.event(
                    AuditOp::KeyManagerChangePass,
                    AuditStatus::Fail,
                    Some(&e.to_string()),
                );
                Err(e)
            }
        }
    }

    fn change_password_locked(&self, new_password: SecretString) -> Result<(), KeystoreError> {
        let (data_key, salt, origin) = {
            let state = self.read_state();
            if state.phase != Phase::Ready {
                return Err(KeystoreError::NotInitialized);
            }
            let data_key = state
                .data_key
                .clone()
                .ok_or(KeystoreError::NotInitialized)?;
            (data_key, state.salt.clone(), state.password_origin.clone())
        };
        let password_file = origin
            .as_ref()
            .map(|origin| origin.writable_path(&self.config))
            .transpose()?;
        let salt = salt.unwrap_or_else(|| {
            tracing::info!("legacy hierarchy, generating a salt for the new password");
            generate_salt()
        });

        let previous = match &password_file {
            Some(path) => Some(PasswordBackup::take(path)?),
            None => None,
        };
        if let Some(path) = &password_file {
            write_password_file(path, &new_password)?;
        }

        if let Err(e) = self.wrap_and_save(&data_key, &salt, &new_password) {
            if let Some(backup) = previous {
                backup.restore();
            }
            return Err(e);
        }

        let mut state = self.write_state();
        state.salt = Some(salt);
        state.password = Some(Arc::new(new_password));
        if let Some(path) = password_file {
            tracing::info!(path = %path.display(), "new password written");
            if origin == Some(PasswordOrigin::Default) {
                state.password_origin = Some(PasswordOrigin::ConfigFile(path));
            }
        }
        Ok(())
    }

    /// Replace K1 (and the salt) with fresh random material.
    ///
    /// Stored ciphertext is not migrated: the retired key is returned so the
    /// caller can re-encrypt what it still needs. Readers keep getting the old
    /// key until the new one is persisted.
    pub fn refresh_keys(&self) -> Result<DataKey, KeystoreError> {
        let _lifecycle = self.lock_lifecycle();
        self.audit
            .event(AuditOp::KeyManagerRefresh, AuditStatus::Start, None);

        match self.refresh_locked() {
            Ok(retired) => {
                self.audit
                    .event(AuditOp::KeyManagerRefresh, AuditStatus::Success, None);
                tracing::info!("data key refreshed");
                Ok(retired)
            }
            Err(e) => {
                self.audit.event(
                    AuditOp::KeyManagerRefresh,
                    AuditStatus::Fail,
                    Some(&e.to_string()),
                );
                Err(e)
            }
        }
    }

    fn refresh_locked(&self) -> Result<DataKey, KeystoreError> {
        let password = {
            let mut state = self.write_state();
            if state.phase != Phase::Ready {
                return Err(KeystoreError::NotInitialized);
            }
            let password = state
                .password
                .clone()
                .ok_or(KeystoreError::NotInitialized)?;
            state.phase = Phase::Rotating;
            password
        };

        let data_key = generate_data_key();
        let salt = generate_salt();
        if let Err(e) = self.wrap_and_save(&data_key, &salt, &password) {
            self.write_state().phase = Phase::Ready;
            return Err(e);
        }

        let mut state = self.write_state();
        let retired = state.data_key.replace(data_key);
        state.salt = Some(salt);
        state.phase = Phase::Ready;
        retired.ok_or(KeystoreError::NotInitialized)
    }

    pub fn status(&self) -> KeyManagerStatus {
        let state = self.read_state();
        KeyManagerStatus {
            initialized: state.phase.has_key(),
            has_key: state.data_key.is_some(),
            key_length: state
                .data_key
                .as_ref()
                .map(|k| k.as_bytes().len())
                .unwrap_or(0),
            password_set: state.password.is_some(),
            phase: state.phase,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    fn signal(&self, outcome: InitOutcome) {
        *self.lock_outcome() = outcome;
        self.init_cv.notify_all();
    }

    fn read_state(&self) -> RwLockReadGuard<'_, KeyState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, KeyState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_lifecycle(&self) -> MutexGuard<'_, ()> {
        self.lifecycle.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_outcome(&self) -> MutexGuard<'_, InitOutcome> {
        self.init_outcome.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Prior contents of a password file, put back if the rewrapped key cannot
/// be persisted.
struct PasswordBackup {
    path: PathBuf,
    contents: Option<Zeroizing<Vec<u8>>>,
}

impl PasswordBackup {
    fn take(path: &Path) -> Result<Self, KeystoreError> {
        let contents = match std::fs::read(path) {
            Ok(bytes) => Some(Zeroizing::new(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                return Err(KeystoreError::Password {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                })
            }
        };
        Ok(Self {
            path: path.to_path_buf(),
            contents,
        })
    }

    fn restore(self) {
        let result = match &self.contents {
            Some(bytes) => write_key_file(&self.path, bytes),
            None => std::fs::remove_file(&self.path),
        };
        if let Err(e) = result {
            tracing::error!(
                path = %self.path.display(),
                "could not restore the previous password after a failed change: {e}"
            );
        }
    }
}

impl std::fmt::Debug for KeyManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyManager")
            .field("phase", &self.phase())
            .field("persistence", &self.persistence)
            .finish()
    }
}

/// One shared, initialized [`KeyManager`] for an embedding process.
///
/// Concurrent first callers all receive the same instance and the hierarchy
/// is loaded or created once.
pub struct KeyManagerCell {
    config: KeystoreConfig,
    audit: Arc<AuditLog>,
    manager: OnceLock<Arc<KeyManager>>,
}

impl KeyManagerCell {
    pub fn new(config: KeystoreConfig, audit: Arc<AuditLog>) -> Self {
        Self {
            config,
            audit,
            manager: OnceLock::new(),
        }
    }

    pub fn get(&self) -> Result<Arc<KeyManager>, KeystoreError> {
        let manager = self
            .manager
            .get_or_init(|| KeyManager::new(self.config.clone(), self.audit.clone()));
        manager.initialize()?;
        Ok(manager.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager_in(dir: &std::path::Path) -> Arc<KeyManager> {
        KeyManager::with_password(
            KeystoreConfig::in_dir(dir),
            Arc::new(AuditLog::disabled()),
            SecretString::from("unit-test-password"),
        )
    }

    #[test]
    fn test_initialize_creates_then_loads() {
        let dir = tempfile::tempdir().unwrap();

        let first = manager_in(dir.path());
        first.initialize().unwrap();
        assert_eq!(first.phase(), Phase::Ready);
        let key = first.get_data_key().unwrap();

        let second = manager_in(dir.path());
        second.initialize().unwrap();
        assert_eq!(second.get_data_key().unwrap().as_bytes(), key.as_bytes());
    }

    #[test]
    fn test_initialize_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_in(dir.path());
        manager.initialize().unwrap();
        let key = manager.get_data_key().unwrap();
        manager.initialize().unwrap();
        assert_eq!(manager.get_data_key().unwrap().as_bytes(), key.as_bytes());
    }

    #[test]
    fn test_lifecycle_ops_require_ready() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_in(dir.path());

        assert!(matches!(
            manager.change_password(SecretString::from("next")),
            Err(KeystoreError::NotInitialized)
        ));
        assert!(matches!(
            manager.refresh_keys(),
            Err(KeystoreError::NotInitialized)
        ));
    }

    #[test]
    fn test_empty_new_password_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_in(dir.path());
        manager.initialize().unwrap();
        assert!(matches!(
            manager.change_password(SecretString::from("  ")),
            Err(KeystoreError::Config(_))
        ));
    }

    #[test]
    fn test_status_before_and_after_init() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_in(dir.path());

        let before = manager.status();
        assert!(!before.initialized);
        assert!(!before.has_key);
        assert_eq!(before.key_length, 0);
        assert!(before.password_set);
        assert_eq!(before.phase, Phase::Uninitialized);

        manager.initialize().unwrap();
        let after = manager.status();
        assert!(after.initialized);
        assert_eq!(after.key_length, KEY_SIZE);
        assert_eq!(after.phase, Phase::Ready);
        assert!(chrono::DateTime::parse_from_rfc3339(&after.timestamp).is_ok());
    }

    #[test]
    fn test_status_serializes_phase_snake_case() {
        let dir = tempfile::tempdir().unwrap();
        let json = serde_json::to_value(manager_in(dir.path()).status()).unwrap();
        assert_eq!(json["phase"], "uninitialized");
    }

    #[test]
    fn test_wait_policy_reports_failed_initialization() {
        let blocker = tempfile::NamedTempFile::new().unwrap();
        let config = KeystoreConfig {
            search_paths: vec![blocker.path().join("unwritable")],
            uninitialized_policy: UninitializedPolicy::Wait,
            wait_timeout_ms: 30_000,
            ..KeystoreConfig::in_dir(blocker.path())
        };
        let manager = KeyManager::with_password(
            config,
            Arc::new(AuditLog::disabled()),
            SecretString::from("pw"),
        );

        let err = manager.get_data_key().unwrap_err();
        assert!(matches!(err, KeystoreError::NotInitialized), "{err:?}");
    }

    #[test]
    fn test_wait_times_out_while_pending() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_in(dir.path());

        let timeout = Duration::from_millis(20);
        let err = manager.wait_for_key(timeout).unwrap_err();
        assert!(matches!(err, KeystoreError::NotReady(t) if t == timeout), "{err:?}");
    }

    #[test]
    fn test_externally_managed_password_is_not_rewritten() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_in(dir.path());
        manager.initialize().unwrap();
        let wrapped_path = dir.path().join(crate::persist::WRAPPED_K1_FILE);
        let wrapped = std::fs::read(&wrapped_path).unwrap();

        manager.write_state().password_origin =
            Some(PasswordOrigin::EnvFile(dir.path().join("env.pw")));
        let err = manager
            .change_password(SecretString::from("next"))
            .unwrap_err();
        assert!(matches!(err, KeystoreError::Password { .. }), "{err:?}");
        assert_eq!(std::fs::read(&wrapped_path).unwrap(), wrapped);
        assert!(!dir.path().join("env.pw").exists());
    }
}
