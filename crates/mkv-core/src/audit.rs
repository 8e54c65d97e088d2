//! Append-only audit log for protected reads/writes and key lifecycle events.
//!
//! Independent of the `tracing` application log: one line per operation so an
//! operator can reconstruct every encrypt/decrypt without instrumenting the
//! storage engine.
//!
//! ```text
//! 2026-03-01T12:00:00.000123Z ENCRYPT ns=mycc key=asset1 SUCCESS
//! 2026-03-01T12:00:00.000456Z DECRYPT ns=mycc key=asset1 FAIL ERROR: decryption failed
//! ```

use chrono::{DateTime, Utc};
use std::borrow::Cow;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

use crate::config::AuditConfig;

/// Operation tag written to the audit log
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditOp {
    Encrypt,
    Decrypt,
    KeyManagerInit,
    KeyManagerAutoInit,
    KeyManagerLoad,
    KeyManagerCreate,
    KeyManagerSave,
    KeyManagerChangePass,
    KeyManagerRefresh,
}

impl AuditOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditOp::Encrypt => "ENCRYPT",
            AuditOp::Decrypt => "DECRYPT",
            AuditOp::KeyManagerInit => "KEY_MANAGER_INIT",
            AuditOp::KeyManagerAutoInit => "KEY_MANAGER_AUTO_INIT",
            AuditOp::KeyManagerLoad => "KEY_MANAGER_LOAD",
            AuditOp::KeyManagerCreate => "KEY_MANAGER_CREATE",
            AuditOp::KeyManagerSave => "KEY_MANAGER_SAVE",
            AuditOp::KeyManagerChangePass => "KEY_MANAGER_CHANGE_PASS",
            AuditOp::KeyManagerRefresh => "KEY_MANAGER_REFRESH",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditStatus {
    Start,
    Success,
    Fail,
    SkipEmpty,
    Warn,
    Error,
}

impl AuditStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditStatus::Start => "START",
            AuditStatus::Success => "SUCCESS",
            AuditStatus::Fail => "FAIL",
            AuditStatus::SkipEmpty => "SKIP_EMPTY",
            AuditStatus::Warn => "WARN",
            AuditStatus::Error => "ERROR",
        }
    }
}

/// Shared audit sink. The file is opened on first write and appended to
/// under its own mutex, independent of any key lock.
pub struct AuditLog {
    path: Option<PathBuf>,
    file: OnceLock<Option<Mutex<File>>>,
}

impl AuditLog {
    pub fn open(config: &AuditConfig) -> Self {
        if config.enabled {
            Self::to_file(&config.path)
        } else {
            Self::disabled()
        }
    }

    pub fn to_file(path: &Path) -> Self {
        Self {
            path: Some(path.to_path_buf()),
            file: OnceLock::new(),
        }
    }

    /// An audit log that drops every record
    pub fn disabled() -> Self {
        Self {
            path: None,
            file: OnceLock::new(),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Record a key lifecycle event that is not tied to a state entry.
    pub fn event(&self, op: AuditOp, status: AuditStatus, detail: Option<&str>) {
        self.record(op, "", "", status, detail);
    }

    pub fn record(
        &self,
        op: AuditOp,
        ns: &str,
        key: &str,
        status: AuditStatus,
        error: Option<&str>,
    ) {
        let Some(path) = &self.path else {
            return;
        };

        let file = self.file.get_or_init(|| {
            match OpenOptions::new().create(true).append(true).open(path) {
                Ok(f) => Some(Mutex::new(f)),
                Err(e) => {
                    tracing::warn!(path = %path.display(), "audit log unavailable: {e}");
                    None
                }
            }
        });
        let Some(file) = file else {
            return;
        };

        let line = format_line(Utc::now(), op, ns, key, status, error);
        let mut guard = file.lock().unwrap_or_else(|e| e.into_inner());
        if let Err(e) = guard.write_all(line.as_bytes()) {
            tracing::warn!(path = %path.display(), "audit write failed: {e}");
        }
    }
}

impl std::fmt::Debug for AuditLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLog").field("path", &self.path).finish()
    }
}

fn format_line(
    at: DateTime<Utc>,
    op: AuditOp,
    ns: &str,
    key: &str,
    status: AuditStatus,
    error: Option<&str>,
) -> String {
    let mut line = format!(
        "{} {} ns={} key={} {}",
        at.format("%Y-%m-%dT%H:%M:%S%.6fZ"),
        op.as_str(),
        escape_field(ns),
        escape_field(key),
        status.as_str()
    );
    if let Some(msg) = error.filter(|m| !m.is_empty()) {
        line.push_str(" ERROR: ");
        line.push_str(&escape_field(msg));
    }
    line.push('\n');
    line
}

/// Control characters and backslashes escaped, so a field never spans lines.
fn escape_field(field: &str) -> Cow<'_, str> {
    if !field.chars().any(|c| c == '\\' || c.is_control()) {
        return Cow::Borrowed(field);
    }
    let mut out = String::with_capacity(field.len() + 8);
    for c in field.chars() {
        if c == '\\' || c.is_control() {
            out.extend(c.escape_default());
        } else {
            out.push(c);
        }
    }
    Cow::Owned(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_format_line() {
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let line = format_line(at, AuditOp::Encrypt, "mycc", "asset1", AuditStatus::Success, None);
        assert_eq!(line, "2026-03-01T12:00:00.000000Z ENCRYPT ns=mycc key=asset1 SUCCESS\n");
    }

    #[test]
    fn test_format_line_with_error() {
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let line = format_line(
            at,
            AuditOp::Decrypt,
            "",
            "",
            AuditStatus::Fail,
            Some("decryption failed"),
        );
        assert!(line.ends_with("DECRYPT ns= key= FAIL ERROR: decryption failed\n"));
    }

    #[test]
    fn test_control_characters_stay_on_one_line() {
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let line = format_line(
            at,
            AuditOp::Encrypt,
            "ns\n",
            "k\n2026-03-01T12:00:00.000000Z DECRYPT ns=x key=y SUCCESS",
            AuditStatus::Fail,
            Some("bad\r\nthing \\ here"),
        );
        assert_eq!(line.matches('\n').count(), 1);
        assert!(line.contains("ns=ns\\n key=k\\n2026"));
        assert!(line.ends_with("ERROR: bad\\r\\nthing \\\\ here\n"));
    }

    #[test]
    fn test_records_append() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.log");
        let log = AuditLog::to_file(&path);

        log.record(AuditOp::Encrypt, "ns", "k", AuditStatus::SkipEmpty, None);
        log.event(AuditOp::KeyManagerRefresh, AuditStatus::Start, None);

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("ENCRYPT ns=ns key=k SKIP_EMPTY"));
        assert!(lines[1].contains("KEY_MANAGER_REFRESH"));
    }

    #[test]
    fn test_disabled_writes_nothing() {
        let log = AuditLog::disabled();
        log.record(AuditOp::Decrypt, "ns", "k", AuditStatus::Success, None);
        assert!(log.path().is_none());
    }

    #[test]
    fn test_unwritable_path_does_not_panic() {
        let log = AuditLog::to_file(Path::new("/nonexistent-dir/for/audit.log"));
        log.record(AuditOp::Encrypt, "ns", "k", AuditStatus::Success, None);
    }
}
