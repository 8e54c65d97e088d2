//! mkv-keystore: where K1 comes from and where it is kept
//!
//! Password discovery chain (in order of precedence):
//!   1. $CREDENTIALS_DIRECTORY/mkv-password  (systemd LoadCredential)
//!   2. $MKV_PASSWORD_FILE env var (path to password file)
//!   3. keystore.password_file from mkv.toml (default: ./password.txt)
//!   4. keystore.password_fallback_dir/password.txt (default: /tmp/mkv)
//!   5. the built-in development password (insecure, logged at WARN)
//!
//! Key files are looked up across `keystore.search_paths` in order and written
//! to every one of them, since the working directory of the host process is
//! not known ahead of time.

pub mod error;
pub mod manager;
pub mod password;
pub mod persist;

pub use error::KeystoreError;
pub use manager::{
    KeyManager, KeyManagerCell, KeyManagerStatus, Phase, UNINITIALIZED_FALLBACK_KEY,
};
pub use password::{load_password, PasswordOrigin, PasswordSource, DEFAULT_PASSWORD};
pub use persist::{KeyMaterial, KeyPersistence, SaveReport, StoredHierarchy};
