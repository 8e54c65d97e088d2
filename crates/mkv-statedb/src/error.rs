use mkv_core::MkvError;
use mkv_crypto::CryptoError;
use mkv_keystore::KeystoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("data key unavailable: {0}")]
    Key(#[from] KeystoreError),

    #[error("encrypting {field}: {source}")]
    Encrypt {
        field: &'static str,
        #[source]
        source: CryptoError,
    },

    #[error("decrypting {field}: {source}")]
    Decrypt {
        field: &'static str,
        #[source]
        source: CryptoError,
    },

    #[error("malformed record: {0}")]
    Record(#[from] prost::DecodeError),

    #[error(transparent)]
    Version(#[from] MkvError),
}
