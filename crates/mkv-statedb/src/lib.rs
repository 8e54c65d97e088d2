//! mkv-statedb: encryption hooks between the ledger and its state database
//!
//! The storage engine calls [`ValueCodec::encode_value`] before persisting a
//! state entry and [`ValueCodec::decode_value`] after reading one back. Only
//! the value and metadata are encrypted; the version stays in the clear.

pub mod codec;
pub mod error;

pub use codec::{DataKeySource, StaticKey, ValueCodec};
pub use error::CodecError;

/// Generated record types (from statedb.proto)
pub mod proto {
    include!(concat!(env!("OUT_DIR"), "/mkv.statedb.rs"));
}
