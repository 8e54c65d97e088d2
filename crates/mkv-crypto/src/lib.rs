//! mkv-crypto: value encryption for the ledger state database
//!
//! Key hierarchy:
//! ```text
//! Password + Salt (32 bytes, random per hierarchy)
//!   └── K0 wrapping key (256-bit, PBKDF2-HMAC-SHA256)
//!         └── wraps K1 data key (256-bit random)
//!               └── Value AEAD: AES-256-GCM (key=K1, nonce=random_96bit)
//! ```
//!
//! Changing the password only rewraps K1; values encrypted under K1 are untouched.

pub mod cipher;
pub mod error;
pub mod kdf;
pub mod keys;

pub use cipher::{decrypt, encrypt, random_bytes};
pub use error::CryptoError;
pub use kdf::{
    derive_key, derive_legacy_wrapping_key, derive_wrapping_key, WrappingKey, LEGACY_SALT,
    PBKDF2_ITERATIONS,
};
pub use keys::{
    generate_data_key, generate_salt, unwrap_data_key, wrap_data_key, DataKey, Salt,
    WrappedDataKey,
};

/// Size of K0 and K1 in bytes (256-bit)
pub const KEY_SIZE: usize = 32;

/// Size of a hierarchy salt in bytes
pub const SALT_SIZE: usize = 32;

/// Size of an AES-GCM nonce (96-bit)
pub const NONCE_SIZE: usize = 12;

/// Size of a GCM authentication tag
pub const TAG_SIZE: usize = 16;

/// Ciphertext slack budget per value: one 256-bit block.
/// `NONCE_SIZE + TAG_SIZE` always fits inside it.
pub const BLOCK_SIZE: usize = 32;
