//! Byte-in/byte-out AES-256-GCM encryption of state values
//!
//! Encrypted value format (binary):
//! ```text
//! [12 bytes: random nonce][N bytes: ciphertext][16 bytes: GCM tag]
//! ```
//!
//! The nonce travels with the ciphertext, so decryption needs only the bytes
//! and the key. Empty input is passed through untouched in both directions:
//! the state database relies on an empty value staying empty.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use rand::RngCore;

use crate::error::CryptoError;
use crate::{KEY_SIZE, NONCE_SIZE, TAG_SIZE};

/// Encrypt `plaintext` under a 256-bit `key`.
///
/// Returns `[nonce][ciphertext][tag]`, or an empty vector for empty input.
pub fn encrypt(plaintext: &[u8], key: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = new_cipher(key)?;
    if plaintext.is_empty() {
        return Ok(Vec::new());
    }

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|_| CryptoError::Encryption)?;

    let mut result = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    result.extend_from_slice(&nonce_bytes);
    result.extend_from_slice(&ciphertext);
    Ok(result)
}

/// Decrypt the output of [`encrypt`].
///
/// Fails with [`CryptoError::Decryption`] on a wrong key or tampered bytes;
/// never returns plaintext that did not authenticate.
pub fn decrypt(encrypted: &[u8], key: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = new_cipher(key)?;
    if encrypted.is_empty() {
        return Ok(Vec::new());
    }

    let minimum = NONCE_SIZE + TAG_SIZE + 1;
    if encrypted.len() < minimum {
        return Err(CryptoError::Truncated {
            actual: encrypted.len(),
            minimum,
        });
    }

    let (nonce_bytes, ciphertext) = encrypted.split_at(NONCE_SIZE);
    let nonce = Nonce::from_slice(nonce_bytes);

    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| CryptoError::Decryption)
}

/// `n` bytes from the thread-local CSPRNG (OS-seeded).
pub fn random_bytes(n: usize) -> Vec<u8> {
    let mut buf = vec![0u8; n];
    rand::thread_rng().fill_bytes(&mut buf);
    buf
}

fn new_cipher(key: &[u8]) -> Result<Aes256Gcm, CryptoError> {
    if key.len() != KEY_SIZE {
        return Err(CryptoError::InvalidKeyLength {
            expected: KEY_SIZE,
            actual: key.len(),
        });
    }
    Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::InvalidKeyLength {
        expected: KEY_SIZE,
        actual: key.len(),
    })
}
