//! Value codec: `VersionedValue` ⇄ encrypted `DbValue` record bytes
//!
//! Each call fetches the current K1 from its [`DataKeySource`], so a refresh
//! takes effect on the next write without rebuilding the codec.

use mkv_core::{AuditLog, AuditOp, AuditStatus, Height, VersionedValue};
use mkv_crypto::{decrypt, encrypt, DataKey};
use mkv_keystore::{KeyManager, KeystoreError};
use prost::Message;
use std::sync::Arc;

use crate::error::CodecError;
use crate::proto::DbValue;

/// Where the codec gets K1 from
pub trait DataKeySource: Send + Sync {
    fn data_key(&self) -> Result<DataKey, KeystoreError>;
}

impl DataKeySource for KeyManager {
    fn data_key(&self) -> Result<DataKey, KeystoreError> {
        self.get_data_key()
    }
}

/// A fixed key, for tools and tests that hold K1 directly.
#[derive(Debug, Clone)]
pub struct StaticKey(DataKey);

impl StaticKey {
    pub fn new(key: DataKey) -> Self {
        Self(key)
    }
}

impl DataKeySource for StaticKey {
    fn data_key(&self) -> Result<DataKey, KeystoreError> {
        Ok(self.0.clone())
    }
}

pub struct ValueCodec {
    keys: Arc<dyn DataKeySource>,
    audit: Arc<AuditLog>,
}

impl ValueCodec {
    pub fn new(keys: Arc<dyn DataKeySource>, audit: Arc<AuditLog>) -> Self {
        Self { keys, audit }
    }

    /// Codec backed by a key manager, sharing its audit log.
    pub fn for_manager(manager: Arc<KeyManager>) -> Self {
        let audit = manager.audit().clone();
        Self::new(manager, audit)
    }

    /// Encrypt value and metadata and marshal the record for the storage engine.
    pub fn encode_value(
        &self,
        value: &VersionedValue,
        ns: &str,
        key: &str,
    ) -> Result<Vec<u8>, CodecError> {
        let result = if is_empty_entry(value) {
            let metadata = value.metadata.as_ref().map(|_| Vec::new());
            Ok((record_bytes(value, Vec::new(), metadata), AuditStatus::SkipEmpty))
        } else {
            self.keys
                .data_key()
                .map_err(CodecError::from)
                .and_then(|data_key| encode_with(value, &data_key))
                .map(|bytes| (bytes, AuditStatus::Success))
        };
        self.audited(AuditOp::Encrypt, ns, key, result)
    }

    /// Unmarshal a stored record and decrypt it.
    ///
    /// A record that does not authenticate under the current K1 is an error;
    /// no partially decrypted value is ever returned.
    pub fn decode_value(
        &self,
        bytes: &[u8],
        ns: &str,
        key: &str,
    ) -> Result<VersionedValue, CodecError> {
        let result = parse_record(bytes).and_then(|(record, version)| {
            if record.value.is_empty() && record.metadata.as_ref().map_or(true, Vec::is_empty) {
                let empty = VersionedValue {
                    value: Vec::new(),
                    metadata: record.metadata,
                    version,
                };
                return Ok((empty, AuditStatus::SkipEmpty));
            }
            let data_key = self.keys.data_key()?;
            decrypt_record(record, version, &data_key).map(|v| (v, AuditStatus::Success))
        });
        self.audited(AuditOp::Decrypt, ns, key, result)
    }

    /// Decrypt a record written under `previous` (a retired K1) and
    /// re-encrypt it under the current key.
    pub fn reencode_value(
        &self,
        bytes: &[u8],
        ns: &str,
        key: &str,
        previous: &DataKey,
    ) -> Result<Vec<u8>, CodecError> {
        let plain = parse_record(bytes).and_then(|(record, version)| {
            decrypt_record(record, version, previous).map(|v| (v, AuditStatus::Success))
        });
        let plain = self.audited(AuditOp::Decrypt, ns, key, plain)?;
        tracing::debug!(ns, key, "re-encrypting value under the current data key");
        self.encode_value(&plain, ns, key)
    }

    fn audited<T>(
        &self,
        op: AuditOp,
        ns: &str,
        key: &str,
        result: Result<(T, AuditStatus), CodecError>,
    ) -> Result<T, CodecError> {
        match result {
            Ok((out, status)) => {
                self.audit.record(op, ns, key, status, None);
                Ok(out)
            }
            Err(e) => {
                tracing::warn!(op = op.as_str(), ns, key, "state value codec failed: {e}");
                self.audit
                    .record(op, ns, key, AuditStatus::Fail, Some(&e.to_string()));
                Err(e)
            }
        }
    }
}

impl std::fmt::Debug for ValueCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValueCodec")
            .field("audit", &self.audit)
            .finish_non_exhaustive()
    }
}

fn is_empty_entry(value: &VersionedValue) -> bool {
    value.value.is_empty() && value.metadata.as_ref().map_or(true, |m| m.is_empty())
}

fn encode_with(value: &VersionedValue, data_key: &DataKey) -> Result<Vec<u8>, CodecError> {
    let encrypted_value =
        encrypt(&value.value, data_key.as_bytes()).map_err(|source| CodecError::Encrypt {
            field: "value",
            source,
        })?;
    let encrypted_metadata = value
        .metadata
        .as_deref()
        .map(|metadata| {
            encrypt(metadata, data_key.as_bytes()).map_err(|source| CodecError::Encrypt {
                field: "metadata",
                source,
            })
        })
        .transpose()?;
    Ok(record_bytes(value, encrypted_value, encrypted_metadata))
}

fn record_bytes(
    value: &VersionedValue,
    encrypted_value: Vec<u8>,
    encrypted_metadata: Option<Vec<u8>>,
) -> Vec<u8> {
    DbValue {
        version: value.version.to_bytes(),
        value: encrypted_value,
        metadata: encrypted_metadata,
    }
    .encode_to_vec()
}

fn parse_record(bytes: &[u8]) -> Result<(DbValue, Height), CodecError> {
    let record = DbValue::decode(bytes)?;
    let version = Height::from_bytes(&record.version)?;
    Ok((record, version))
}

fn decrypt_record(
    record: DbValue,
    version: Height,
    data_key: &DataKey,
) -> Result<VersionedValue, CodecError> {
    let value = decrypt(&record.value, data_key.as_bytes()).map_err(|source| {
        CodecError::Decrypt {
            field: "value",
            source,
        }
    })?;
    let metadata = record
        .metadata
        .map(|ciphertext| {
            decrypt(&ciphertext, data_key.as_bytes()).map_err(|source| CodecError::Decrypt {
                field: "metadata",
                source,
            })
        })
        .transpose()?;
    Ok(VersionedValue {
        value,
        metadata,
        version,
    })
}
