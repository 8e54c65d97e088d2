//! Wrapping password discovery chain

use mkv_core::config::KeystoreConfig;
use secrecy::{ExposeSecret, SecretString};
use std::path::{Path, PathBuf};
use zeroize::Zeroize;

use crate::error::KeystoreError;
use crate::persist::write_key_file;

/// Development password used when no password source exists.
/// Anyone who reads this constant can unwrap K1; never rely on it in production.
pub const DEFAULT_PASSWORD: &str = "kmasc";

/// File name looked up in `$CREDENTIALS_DIRECTORY`
pub const CREDENTIAL_NAME: &str = "mkv-password";

/// Where the wrapping password was found
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PasswordOrigin {
    /// `$CREDENTIALS_DIRECTORY/mkv-password`
    Credentials(PathBuf),
    /// `$MKV_PASSWORD_FILE`
    EnvFile(PathBuf),
    /// `keystore.password_file`
    ConfigFile(PathBuf),
    /// `keystore.password_fallback_dir/password.txt`
    FallbackDir(PathBuf),
    /// [`DEFAULT_PASSWORD`], nothing on disk
    Default,
}

impl PasswordOrigin {
    /// File a changed password must be written to so the next start finds it.
    ///
    /// Credentials and the env file are provisioned outside this process and
    /// are refused. With the default password the configured file is created.
    pub fn writable_path(&self, config: &KeystoreConfig) -> Result<PathBuf, KeystoreError> {
        match self {
            Self::ConfigFile(path) | Self::FallbackDir(path) => Ok(path.clone()),
            Self::Default => Ok(config.password_file.clone()),
            Self::Credentials(path) | Self::EnvFile(path) => Err(KeystoreError::Password {
                path: path.clone(),
                reason: format!("{self} is managed outside mkv and cannot be rewritten"),
            }),
        }
    }
}

impl std::fmt::Display for PasswordOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Credentials(path) => write!(f, "systemd:{}", path.display()),
            Self::EnvFile(path) => write!(f, "MKV_PASSWORD_FILE:{}", path.display()),
            Self::ConfigFile(path) => write!(f, "config:{}", path.display()),
            Self::FallbackDir(path) => write!(f, "fallback:{}", path.display()),
            Self::Default => f.write_str("default"),
        }
    }
}

/// A loaded wrapping password and where it came from
pub struct PasswordSource {
    pub password: SecretString,
    pub origin: PasswordOrigin,
}

impl PasswordSource {
    pub fn is_default(&self) -> bool {
        self.origin == PasswordOrigin::Default
    }
}

impl std::fmt::Debug for PasswordSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PasswordSource")
            .field("password", &"[REDACTED]")
            .field("origin", &self.origin)
            .finish()
    }
}

/// Discover the wrapping password, see the crate docs for the order.
///
/// A source that exists but is empty or unreadable is an error rather than a
/// reason to fall through: silently switching passwords would orphan K1.
pub fn load_password(config: &KeystoreConfig) -> Result<PasswordSource, KeystoreError> {
    load_password_with_env(config, |name| std::env::var(name).ok())
}

fn load_password_with_env(
    config: &KeystoreConfig,
    env: impl Fn(&str) -> Option<String>,
) -> Result<PasswordSource, KeystoreError> {
    // 1. systemd credentials directory
    if let Some(cred_dir) = env("CREDENTIALS_DIRECTORY") {
        let path = PathBuf::from(cred_dir).join(CREDENTIAL_NAME);
        if path.exists() {
            return read_password_file(&path, PasswordOrigin::Credentials);
        }
    }

    // 2. MKV_PASSWORD_FILE env var
    if let Some(file) = env("MKV_PASSWORD_FILE") {
        let path = PathBuf::from(file);
        if path.exists() {
            return read_password_file(&path, PasswordOrigin::EnvFile);
        }
    }

    // 3. Configured password file
    if config.password_file.exists() {
        return read_password_file(&config.password_file, PasswordOrigin::ConfigFile);
    }

    // 4. Fallback directory
    let fallback = config.password_fallback_dir.join("password.txt");
    if fallback.exists() {
        return read_password_file(&fallback, PasswordOrigin::FallbackDir);
    }

    tracing::warn!(
        "no password file found (tried {} and {}); using the insecure default password",
        config.password_file.display(),
        fallback.display()
    );
    Ok(PasswordSource {
        password: SecretString::from(DEFAULT_PASSWORD),
        origin: PasswordOrigin::Default,
    })
}

fn read_password_file(
    path: &Path,
    origin: fn(PathBuf) -> PasswordOrigin,
) -> Result<PasswordSource, KeystoreError> {
    let mut raw = std::fs::read_to_string(path).map_err(|e| KeystoreError::Password {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    let trimmed = raw.trim().to_string();
    raw.zeroize();

    if trimmed.is_empty() {
        return Err(KeystoreError::Password {
            path: path.to_path_buf(),
            reason: "password file is empty".into(),
        });
    }

    let origin = origin(path.to_path_buf());
    tracing::debug!(%origin, "loaded wrapping password");
    Ok(PasswordSource {
        password: SecretString::from(trimmed),
        origin,
    })
}

/// Atomically replace a password file, owner read/write only.
pub fn write_password_file(path: &Path, password: &SecretString) -> Result<(), KeystoreError> {
    let to_error = |e: std::io::Error| KeystoreError::Password {
        path: path.to_path_buf(),
        reason: e.to_string(),
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(to_error)?;
    }
    write_key_file(path, password.expose_secret().as_bytes()).map_err(to_error)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_reads_and_trims_configured_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("password.txt"), "  s3cret\n").unwrap();
        let config = KeystoreConfig::in_dir(dir.path());

        let loaded = load_password_with_env(&config, no_env).unwrap();
        assert_eq!(loaded.password.expose_secret(), "s3cret");
        assert_eq!(
            loaded.origin,
            PasswordOrigin::ConfigFile(dir.path().join("password.txt"))
        );
        assert!(!loaded.is_default());
    }

    #[test]
    fn test_fallback_dir_used_when_file_missing() {
        let dir = tempfile::tempdir().unwrap();
        let fallback = tempfile::tempdir().unwrap();
        std::fs::write(fallback.path().join("password.txt"), "from-fallback").unwrap();

        let mut config = KeystoreConfig::in_dir(dir.path());
        config.password_fallback_dir = fallback.path().to_path_buf();

        let loaded = load_password_with_env(&config, no_env).unwrap();
        assert_eq!(loaded.password.expose_secret(), "from-fallback");
        assert!(loaded.origin.to_string().starts_with("fallback:"));
    }

    #[test]
    fn test_default_when_nothing_found() {
        let dir = tempfile::tempdir().unwrap();
        let config = KeystoreConfig::in_dir(dir.path());

        let loaded = load_password_with_env(&config, no_env).unwrap();
        assert_eq!(loaded.password.expose_secret(), DEFAULT_PASSWORD);
        assert!(loaded.is_default());
    }

    #[test]
    fn test_empty_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("password.txt"), " \n").unwrap();
        let config = KeystoreConfig::in_dir(dir.path());

        let err = load_password_with_env(&config, no_env).unwrap_err();
        assert!(matches!(err, KeystoreError::Password { .. }));
    }

    #[test]
    fn test_credentials_directory_takes_precedence() {
        let dir = tempfile::tempdir().unwrap();
        let creds = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("password.txt"), "from-config").unwrap();
        std::fs::write(creds.path().join(CREDENTIAL_NAME), "from-systemd").unwrap();
        let config = KeystoreConfig::in_dir(dir.path());
        let creds_path = creds.path().to_string_lossy().to_string();

        let loaded = load_password_with_env(&config, |name| {
            (name == "CREDENTIALS_DIRECTORY").then(|| creds_path.clone())
        })
        .unwrap();
        assert_eq!(loaded.password.expose_secret(), "from-systemd");
        assert!(matches!(
            loaded.origin.writable_path(&config),
            Err(KeystoreError::Password { .. })
        ));
    }

    #[test]
    fn test_default_origin_writes_configured_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = KeystoreConfig::in_dir(&dir.path().join("nested"));

        let target = PasswordOrigin::Default.writable_path(&config).unwrap();
        assert_eq!(target, config.password_file);

        write_password_file(&target, &SecretString::from("fresh")).unwrap();
        let loaded = load_password_with_env(&config, no_env).unwrap();
        assert_eq!(loaded.password.expose_secret(), "fresh");
        assert_eq!(loaded.origin, PasswordOrigin::ConfigFile(target));
    }

    #[test]
    fn test_debug_is_redacted() {
        let source = PasswordSource {
            password: SecretString::from("hunter2"),
            origin: PasswordOrigin::ConfigFile("x".into()),
        };
        assert!(!format!("{source:?}").contains("hunter2"));
    }
}
