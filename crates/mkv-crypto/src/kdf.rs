//! Key derivation: password + salt → K0 wrapping key (PBKDF2-HMAC-SHA256)

use pbkdf2::pbkdf2_hmac;
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use zeroize::Zeroize;

use crate::error::CryptoError;
use crate::keys::Salt;
use crate::KEY_SIZE;

/// PBKDF2 iteration count for K0. Fixed at compile time so the worst-case
/// latency of initialization and password change stays predictable.
pub const PBKDF2_ITERATIONS: u32 = 10_000;

/// Salt used by hierarchies created before per-hierarchy salts were persisted.
/// Only for loading those installations; new hierarchies always get a random [`Salt`].
pub const LEGACY_SALT: &[u8] = b"kmasc-mkv-k0-static-salt";

/// A 256-bit wrapping key (K0) derived from the password.
///
/// Zeroized on drop to prevent secrets lingering in memory.
#[derive(Clone)]
pub struct WrappingKey {
    bytes: [u8; KEY_SIZE],
}

impl WrappingKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        let array: [u8; KEY_SIZE] =
            bytes
                .try_into()
                .map_err(|_| CryptoError::InvalidKeyLength {
                    expected: KEY_SIZE,
                    actual: bytes.len(),
                })?;
        Ok(Self::from_bytes(array))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for WrappingKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for WrappingKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WrappingKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// PBKDF2-HMAC-SHA256 over arbitrary inputs.
///
/// Same inputs always give the same output.
pub fn derive_key(
    password: &[u8],
    salt: &[u8],
    iterations: u32,
    output_len: usize,
) -> Result<Vec<u8>, CryptoError> {
    if iterations == 0 {
        return Err(CryptoError::Kdf("iteration count must be non-zero".into()));
    }
    if output_len == 0 {
        return Err(CryptoError::Kdf("output length must be non-zero".into()));
    }

    let mut out = vec![0u8; output_len];
    pbkdf2_hmac::<Sha256>(password, salt, iterations, &mut out);
    Ok(out)
}

/// Derive K0 from the password and the hierarchy's salt.
pub fn derive_wrapping_key(
    password: &SecretString,
    salt: &Salt,
) -> Result<WrappingKey, CryptoError> {
    derive_with_salt(password, salt.as_bytes())
}

/// Derive K0 with [`LEGACY_SALT`] for hierarchies that have no salt file.
pub fn derive_legacy_wrapping_key(password: &SecretString) -> Result<WrappingKey, CryptoError> {
    tracing::debug!("deriving wrapping key with legacy static salt");
    derive_with_salt(password, LEGACY_SALT)
}

fn derive_with_salt(password: &SecretString, salt: &[u8]) -> Result<WrappingKey, CryptoError> {
    let mut derived = derive_key(
        password.expose_secret().as_bytes(),
        salt,
        PBKDF2_ITERATIONS,
        KEY_SIZE,
    )?;
    let key = WrappingKey::from_slice(&derived);
    derived.zeroize();
    key
}
