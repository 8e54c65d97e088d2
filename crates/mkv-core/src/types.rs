use serde::{Deserialize, Serialize};

use crate::error::{MkvError, MkvResult};

/// Commit height of a state entry: the block and the transaction within it.
///
/// Encoded as two big-endian `u64`s so byte order matches commit order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Height {
    pub block_num: u64,
    pub tx_num: u64,
}

impl Height {
    /// Length of the encoded form
    pub const ENCODED_LEN: usize = 16;

    pub fn new(block_num: u64, tx_num: u64) -> Self {
        Self { block_num, tx_num }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::ENCODED_LEN);
        out.extend_from_slice(&self.block_num.to_be_bytes());
        out.extend_from_slice(&self.tx_num.to_be_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> MkvResult<Self> {
        if bytes.len() != Self::ENCODED_LEN {
            return Err(MkvError::Version(format!(
                "encoded height has {} bytes (expected {})",
                bytes.len(),
                Self::ENCODED_LEN
            )));
        }
        let (block, tx) = bytes.split_at(8);
        let mut block_buf = [0u8; 8];
        let mut tx_buf = [0u8; 8];
        block_buf.copy_from_slice(block);
        tx_buf.copy_from_slice(tx);
        Ok(Self {
            block_num: u64::from_be_bytes(block_buf),
            tx_num: u64::from_be_bytes(tx_buf),
        })
    }
}

impl std::fmt::Display for Height {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.block_num, self.tx_num)
    }
}

/// A state value as the ledger sees it, before encryption.
///
/// `value` is always a defined container (possibly empty). `metadata` is
/// `None` when the entry carries no metadata.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VersionedValue {
    pub value: Vec<u8>,
    pub metadata: Option<Vec<u8>>,
    pub version: Height,
}

impl VersionedValue {
    pub fn new(value: impl Into<Vec<u8>>, version: Height) -> Self {
        Self {
            value: value.into(),
            metadata: None,
            version,
        }
    }

    pub fn with_metadata(mut self, metadata: impl Into<Vec<u8>>) -> Self {
        self.metadata = Some(metadata.into());
        self
    }
}
