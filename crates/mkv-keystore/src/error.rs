use std::path::PathBuf;
use std::time::Duration;

use mkv_crypto::CryptoError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum KeystoreError {
    #[error("{0} not found in any search path")]
    NotFound(String),

    #[error("unreadable key file {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid key material in {path}: {source}")]
    InvalidMaterial {
        path: PathBuf,
        #[source]
        source: CryptoError,
    },

    #[error("password source {path}: {reason}")]
    Password { path: PathBuf, reason: String },

    #[error("key material could not be written to any of {} search paths", .0.len())]
    AllPathsFailed(Vec<(PathBuf, String)>),

    #[error("key manager not initialized")]
    NotInitialized,

    #[error("key manager not ready after {0:?}")]
    NotReady(Duration),

    #[error("config error: {0}")]
    Config(String),

    #[error(transparent)]
    Crypto(#[from] CryptoError),
}
