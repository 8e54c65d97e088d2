//! Key file persistence across the configured search paths
//!
//! Per directory:
//! ```text
//! encrypted_k1.key   K1 wrapped under K0         (always)
//! k0_salt.key        PBKDF2 salt for K0          (always)
//! k1.key             K1 in the clear             (insecure_debug_artifacts only)
//! k0.key             K0 in the clear             (insecure_debug_artifacts only)
//! password.txt       the wrapping password       (insecure_debug_artifacts only)
//! ```

use mkv_core::config::KeystoreConfig;
use mkv_core::{AuditLog, AuditOp, AuditStatus};
use mkv_crypto::{DataKey, Salt, WrappedDataKey, WrappingKey};
use rayon::prelude::*;
use secrecy::{ExposeSecret, SecretString};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::KeystoreError;

pub const WRAPPED_K1_FILE: &str = "encrypted_k1.key";
pub const SALT_FILE: &str = "k0_salt.key";
pub const K1_FILE: &str = "k1.key";
pub const K0_FILE: &str = "k0.key";
pub const PASSWORD_FILE: &str = "password.txt";

/// Everything a save writes. Borrowed so the caller keeps ownership of secrets.
pub struct KeyMaterial<'a> {
    pub data_key: &'a DataKey,
    pub wrapping_key: &'a WrappingKey,
    pub salt: &'a Salt,
    pub wrapped: &'a WrappedDataKey,
    pub password: &'a SecretString,
}

/// A wrapped key found on disk
#[derive(Debug, Clone)]
pub struct StoredHierarchy {
    pub dir: PathBuf,
    pub wrapped: WrappedDataKey,
    /// `None` for hierarchies written before salts were persisted
    pub salt: Option<Salt>,
}

impl StoredHierarchy {
    pub fn is_legacy(&self) -> bool {
        self.salt.is_none()
    }
}

/// Outcome of [`KeyPersistence::save_all`]
#[derive(Debug, Default)]
pub struct SaveReport {
    pub written: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, String)>,
}

pub struct KeyPersistence {
    search_paths: Vec<PathBuf>,
    debug_artifacts: bool,
    audit: Arc<AuditLog>,
}

impl KeyPersistence {
    pub fn new(config: &KeystoreConfig, audit: Arc<AuditLog>) -> Self {
        Self {
            search_paths: config.search_paths.clone(),
            debug_artifacts: config.insecure_debug_artifacts,
            audit,
        }
    }

    pub fn search_paths(&self) -> &[PathBuf] {
        &self.search_paths
    }

    /// First search path that contains `filename`.
    pub fn find_existing(&self, filename: &str) -> Option<PathBuf> {
        self.search_paths
            .iter()
            .map(|dir| dir.join(filename))
            .find(|path| path.is_file())
    }

    pub fn has_existing(&self) -> bool {
        self.find_existing(WRAPPED_K1_FILE).is_some()
    }

    /// Locate the wrapped K1 and the salt that sits beside it.
    pub fn load_hierarchy(&self) -> Result<StoredHierarchy, KeystoreError> {
        self.load_hierarchies()
            .into_iter()
            .next()
            .unwrap_or_else(|| Err(KeystoreError::NotFound(WRAPPED_K1_FILE.into())))
    }

    /// Every search path holding a wrapped K1, in search order.
    ///
    /// A save that failed half way can leave one directory with a salt that
    /// does not match its wrapped key, so callers try the rest before giving up.
    pub fn load_hierarchies(&self) -> Vec<Result<StoredHierarchy, KeystoreError>> {
        self.search_paths
            .iter()
            .filter(|dir| dir.join(WRAPPED_K1_FILE).is_file())
            .map(|dir| load_dir(dir))
            .collect()
    }

    /// Write the hierarchy to every search path. Directories are independent:
    /// one that cannot be created or written is logged and skipped.
    pub fn save_all(&self, material: &KeyMaterial<'_>) -> Result<SaveReport, KeystoreError> {
        let results: Vec<(PathBuf, Result<(), String>)> = self
            .search_paths
            .par_iter()
            .map(|dir| (dir.clone(), self.save_dir(dir, material)))
            .collect();

        let mut report = SaveReport::default();
        for (dir, result) in results {
            let shown = dir.display().to_string();
            match result {
                Ok(()) => {
                    self.audit
                        .record(AuditOp::KeyManagerSave, "", &shown, AuditStatus::Success, None);
                    report.written.push(dir);
                }
                Err(e) => {
                    tracing::warn!(dir = %shown, "failed to save key material: {e}");
                    self.audit
                        .record(AuditOp::KeyManagerSave, "", &shown, AuditStatus::Fail, Some(&e));
                    report.failed.push((dir, e));
                }
            }
        }

        if report.written.is_empty() {
            return Err(KeystoreError::AllPathsFailed(report.failed));
        }
        tracing::info!(
            written = report.written.len(),
            failed = report.failed.len(),
            "key material saved"
        );
        Ok(report)
    }

    fn save_dir(&self, dir: &Path, material: &KeyMaterial<'_>) -> Result<(), String> {
        std::fs::create_dir_all(dir).map_err(|e| format!("create dir: {e}"))?;

        write_key_file(&dir.join(SALT_FILE), material.salt.as_bytes())
            .map_err(|e| format!("{SALT_FILE}: {e}"))?;
        write_key_file(&dir.join(WRAPPED_K1_FILE), material.wrapped.as_bytes())
            .map_err(|e| format!("{WRAPPED_K1_FILE}: {e}"))?;

        if self.debug_artifacts {
            write_key_file(&dir.join(K1_FILE), material.data_key.as_bytes())
                .map_err(|e| format!("{K1_FILE}: {e}"))?;
            write_key_file(&dir.join(K0_FILE), material.wrapping_key.as_bytes())
                .map_err(|e| format!("{K0_FILE}: {e}"))?;
            write_key_file(
                &dir.join(PASSWORD_FILE),
                material.password.expose_secret().as_bytes(),
            )
            .map_err(|e| format!("{PASSWORD_FILE}: {e}"))?;
        } else {
            // Plaintext keys left by an earlier debug run would outlive a rotation
            for name in [K1_FILE, K0_FILE] {
                let path = dir.join(name);
                if path.is_file() {
                    std::fs::remove_file(&path).map_err(|e| format!("remove {name}: {e}"))?;
                    tracing::info!(path = %path.display(), "removed stale plaintext key file");
                }
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for KeyPersistence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPersistence")
            .field("search_paths", &self.search_paths)
            .field("debug_artifacts", &self.debug_artifacts)
            .finish()
    }
}

fn load_dir(dir: &Path) -> Result<StoredHierarchy, KeystoreError> {
    let wrapped = WrappedDataKey::from_bytes(read_key_file(&dir.join(WRAPPED_K1_FILE))?);

    let salt_path = dir.join(SALT_FILE);
    let salt = if salt_path.is_file() {
        let bytes = read_key_file(&salt_path)?;
        let salt = Salt::from_slice(&bytes).map_err(|source| KeystoreError::InvalidMaterial {
            path: salt_path.clone(),
            source,
        })?;
        Some(salt)
    } else {
        tracing::warn!(dir = %dir.display(), "no {SALT_FILE} beside wrapped key, treating as legacy hierarchy");
        None
    };

    tracing::debug!(dir = %dir.display(), legacy = salt.is_none(), "found stored key hierarchy");
    Ok(StoredHierarchy {
        dir: dir.to_path_buf(),
        wrapped,
        salt,
    })
}

static TMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// Write via a temp file in the same directory and rename over the target,
/// owner read/write only.
pub fn write_key_file(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let parent = path.parent().unwrap_or(Path::new("."));
    // Unique per call: two search paths may name the same directory
    let tmp_path = parent.join(format!(
        ".{}.{}.{}.tmp",
        path.file_name().unwrap_or_default().to_string_lossy(),
        std::process::id(),
        TMP_SEQ.fetch_add(1, Ordering::Relaxed)
    ));

    let mut options = std::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let result = (|| {
        let mut file = options.open(&tmp_path)?;
        file.write_all(contents)?;
        file.sync_all()?;
        std::fs::rename(&tmp_path, path)
    })();
    if result.is_err() {
        let _ = std::fs::remove_file(&tmp_path);
    }
    result
}

pub fn read_key_file(path: &Path) -> Result<Vec<u8>, KeystoreError> {
    std::fs::read(path).map_err(|source| KeystoreError::Unreadable {
        path: path.to_path_buf(),
        source,
    })
}
