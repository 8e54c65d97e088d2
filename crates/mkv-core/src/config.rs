use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{MkvError, MkvResult};

/// Top-level configuration (loaded from mkv.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MkvConfig {
    pub keystore: KeystoreConfig,
    pub audit: AuditConfig,
    pub logging: LoggingConfig,
}

/// What `get_data_key` does before the key manager is ready
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UninitializedPolicy {
    /// Kick off background initialization and hand out the well-known fallback key
    #[default]
    Fallback,
    /// Block up to `wait_timeout_ms` for initialization, then fail
    Wait,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeystoreConfig {
    /// Directories probed in order for key material, and written on save
    pub search_paths: Vec<PathBuf>,
    /// Password file (default: password.txt in the working directory)
    pub password_file: PathBuf,
    /// Directory checked for password.txt when `password_file` is absent
    pub password_fallback_dir: PathBuf,
    /// Also write k1.key, k0.key and password.txt in the clear (diagnostics only)
    pub insecure_debug_artifacts: bool,
    /// Behaviour of key reads before initialization completes
    pub uninitialized_policy: UninitializedPolicy,
    /// Upper bound for the `wait` policy, in milliseconds
    pub wait_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Write the append-only audit log (default: true)
    pub enabled: bool,
    /// Audit log path (default: /tmp/state_mkv.log)
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

impl Default for KeystoreConfig {
    fn default() -> Self {
        Self {
            search_paths: default_search_paths(),
            password_file: PathBuf::from("password.txt"),
            password_fallback_dir: PathBuf::from("/tmp/mkv"),
            insecure_debug_artifacts: false,
            uninitialized_policy: UninitializedPolicy::Fallback,
            wait_timeout_ms: 2000,
        }
    }
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: PathBuf::from("/tmp/state_mkv.log"),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

/// Key material locations, highest priority first. The same binary runs from
/// different working directories depending on how its host launches it.
pub fn default_search_paths() -> Vec<PathBuf> {
    [
        ".",
        "/tmp",
        "/tmp/mkv",
        "/opt/mkv",
        "/home/chaincode/mkv",
        "/root/mkv",
    ]
    .iter()
    .map(PathBuf::from)
    .collect()
}

impl KeystoreConfig {
    /// Keystore rooted at a single directory: key files and password file both live there.
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            search_paths: vec![dir.to_path_buf()],
            password_file: dir.join("password.txt"),
            password_fallback_dir: dir.to_path_buf(),
            ..Self::default()
        }
    }
}

impl MkvConfig {
    /// Load from a TOML file, or defaults when the file does not exist.
    pub fn load(path: &Path) -> MkvResult<Self> {
        if !path.exists() {
            tracing::warn!("config file not found: {}  (using defaults)", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| MkvError::Config(format!("parsing {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> MkvResult<()> {
        if self.keystore.search_paths.is_empty() {
            return Err(MkvError::Config("keystore.search_paths must not be empty".into()));
        }
        if self.keystore.uninitialized_policy == UninitializedPolicy::Wait
            && self.keystore.wait_timeout_ms == 0
        {
            return Err(MkvError::Config(
                "keystore.wait_timeout_ms must be non-zero with the wait policy".into(),
            ));
        }
        Ok(())
    }
}
