pub mod audit;
pub mod config;
pub mod error;
pub mod types;

pub use audit::{AuditLog, AuditOp, AuditStatus};
pub use error::{MkvError, MkvResult};
pub use types::{Height, VersionedValue};
