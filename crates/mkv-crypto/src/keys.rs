//! Key hierarchy: K1 data key generation, salts, and K1 wrapping under K0

use rand::RngCore;
use zeroize::Zeroize;

use crate::cipher::{decrypt, encrypt};
use crate::error::CryptoError;
use crate::kdf::WrappingKey;
use crate::{KEY_SIZE, SALT_SIZE};

/// The 256-bit data encryption key (K1). Zeroized on drop.
#[derive(Clone)]
pub struct DataKey {
    bytes: [u8; KEY_SIZE],
}

impl DataKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    /// Build from untrusted bytes (file contents, unwrapped plaintext).
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

impl Drop for DataKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for DataKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Per-hierarchy PBKDF2 salt. Not secret; persisted next to the wrapped key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Salt {
    bytes: [u8; SALT_SIZE],
}

impl Salt {
    pub fn from_bytes(bytes: [u8; SALT_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        let array: [u8; SALT_SIZE] =
            bytes
                .try_into()
                .map_err(|_| CryptoError::InvalidKeyLength {
                    expected: SALT_SIZE,
                    actual: bytes.len(),
                })?;
        Ok(Self::from_bytes(array))
    }

    pub fn as_bytes(&self) -> &[u8; SALT_SIZE] {
        &self.bytes
    }
}

/// K1 encrypted under K0: `[nonce][ciphertext][tag]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrappedDataKey(Vec<u8>);

impl WrappedDataKey {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Generate a random 256-bit data key.
pub fn generate_data_key() -> DataKey {
    let mut bytes = [0u8; KEY_SIZE];
    rand::thread_rng().fill_bytes(&mut bytes);
    DataKey::from_bytes(bytes)
}

/// Generate a random salt for a new hierarchy.
pub fn generate_salt() -> Salt {
    let mut bytes = [0u8; SALT_SIZE];
    rand::thread_rng().fill_bytes(&mut bytes);
    Salt::from_bytes(bytes)
}

/// Wrap (encrypt) K1 under K0.
pub fn wrap_data_key(
    data_key: &DataKey,
    wrapping_key: &WrappingKey,
) -> Result<WrappedDataKey, CryptoError> {
    encrypt(data_key.as_bytes(), wrapping_key.as_bytes()).map(WrappedDataKey)
}

/// Unwrap (decrypt) K1. Fails on a wrong K0 (wrong password) or corrupt data;
/// never yields a key that did not authenticate.
pub fn unwrap_data_key(
    wrapped: &WrappedDataKey,
    wrapping_key: &WrappingKey,
) -> Result<DataKey, CryptoError> {
    if wrapped.as_bytes().is_empty() {
        return Err(CryptoError::Truncated {
            actual: 0,
            minimum: crate::NONCE_SIZE + KEY_SIZE + crate::TAG_SIZE,
        });
    }

    let mut plaintext = decrypt(wrapped.as_bytes(), wrapping_key.as_bytes())?;
    let key = DataKey::from_slice(&plaintext);
    plaintext.zeroize();
    key
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{NONCE_SIZE, TAG_SIZE};

    fn test_wrapping_key() -> WrappingKey {
        WrappingKey::from_bytes([42u8; KEY_SIZE])
    }

    #[test]
    fn test_data_key_generation() {
        let k1 = generate_data_key();
        let k2 = generate_data_key();
        assert_ne!(k1.as_bytes(), k2.as_bytes(), "random keys must differ");
    }

    #[test]
    fn test_salt_generation() {
        let s1 = generate_salt();
        let s2 = generate_salt();
        assert_eq!(s1.as_bytes().len(), SALT_SIZE);
        assert_ne!(s1, s2);
    }

    #[test]
    fn test_wrap_unwrap_roundtrip() {
        let k0 = test_wrapping_key();
        let k1 = generate_data_key();

        let wrapped = wrap_data_key(&k1, &k0).unwrap();
        let unwrapped = unwrap_data_key(&wrapped, &k0).unwrap();

        assert_eq!(k1.as_bytes(), unwrapped.as_bytes());
    }

    #[test]
    fn test_unwrap_wrong_wrapping_key() {
        let k1 = generate_data_key();
        let wrapped = wrap_data_key(&k1, &WrappingKey::from_bytes([1u8; KEY_SIZE])).unwrap();

        let result = unwrap_data_key(&wrapped, &WrappingKey::from_bytes([2u8; KEY_SIZE]));
        assert!(matches!(result, Err(CryptoError::Decryption)));
    }

    #[test]
    fn test_unwrap_empty_is_error() {
        let result = unwrap_data_key(&WrappedDataKey::from_bytes(Vec::new()), &test_wrapping_key());
        assert!(result.is_err(), "an empty wrapped key must not unwrap to anything");
    }

    #[test]
    fn test_unwrap_rejects_wrong_plaintext_length() {
        let k0 = test_wrapping_key();
        let not_a_key = encrypt(&[9u8; 20], k0.as_bytes()).unwrap();

        let result = unwrap_data_key(&WrappedDataKey::from_bytes(not_a_key), &k0);
        assert_eq!(
            result.unwrap_err(),
            CryptoError::InvalidKeyLength {
                expected: KEY_SIZE,
                actual: 20
            }
        );
    }

    #[test]
    fn test_wrapped_key_size() {
        let wrapped = wrap_data_key(&generate_data_key(), &test_wrapping_key()).unwrap();
        // nonce (12) + key (32) + tag (16) = 60
        assert_eq!(wrapped.as_bytes().len(), NONCE_SIZE + KEY_SIZE + TAG_SIZE);
    }

    #[test]
    fn test_from_slice_length_checks() {
        assert!(DataKey::from_slice(&[0u8; 16]).is_err());
        assert!(Salt::from_slice(&[0u8; 33]).is_err());
        assert!(DataKey::from_slice(&[0u8; 32]).is_ok());
    }
}
