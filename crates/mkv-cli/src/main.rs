//! mkvctl: operator tool for the mkv key hierarchy
//!
//! Commands:
//!   init                    - load the stored key hierarchy or create one
//!   status                  - key manager status as JSON
//!   change-password         - rewrap K1 under a new password
//!   refresh                 - replace K1 (existing values are NOT migrated)
//!   encrypt <value>         - print the encrypted state record (base64)
//!   decrypt <record>        - decrypt a base64 state record
//!   config show             - display the active configuration

use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use clap::{Parser, Subcommand, ValueEnum};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use mkv_core::config::MkvConfig;
use mkv_core::{AuditLog, Height, VersionedValue};
use mkv_keystore::persist::WRAPPED_K1_FILE;
use mkv_keystore::{KeyManager, KeyManagerStatus};
use mkv_statedb::ValueCodec;

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "mkvctl",
    version,
    about = "mkv key management",
    long_about = "mkvctl: manage the password-wrapped data key that encrypts ledger state values"
)]
struct Cli {
    /// Path to mkv.toml configuration file
    #[arg(long, short = 'c', env = "MKV_CONFIG", default_value = "mkv.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides logging.level
    #[arg(long, env = "MKV_LOG")]
    log: Option<String>,

    /// Log format; overrides logging.format
    #[arg(long, env = "MKV_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum, PartialEq)]
enum LogFormat {
    Json,
    Text,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Load the stored key hierarchy, or create and persist a new one
    Init,

    /// Show key manager status
    Status,

    /// Rewrap the data key under a new password
    ///
    /// Stored values stay readable. The new password replaces the one in the
    /// password file it was loaded from. Prompts twice unless a file is given.
    #[command(name = "change-password")]
    ChangePassword {
        /// Read the new password from this file instead of prompting
        #[arg(long)]
        new_password_file: Option<PathBuf>,
    },

    /// Generate a new data key, salt and wrapping key
    ///
    /// Values already stored under the old data key are not re-encrypted and
    /// become unreadable without a migration.
    Refresh {
        /// Required acknowledgement that existing values are not migrated
        #[arg(long)]
        yes: bool,
    },

    /// Encrypt a value into a state record (printed as base64)
    Encrypt {
        /// Plaintext value
        value: String,
        #[arg(long, default_value = "")]
        ns: String,
        #[arg(long, default_value = "")]
        key: String,
        /// Optional metadata, encrypted alongside the value
        #[arg(long)]
        metadata: Option<String>,
        #[arg(long, default_value_t = 0)]
        block: u64,
        #[arg(long, default_value_t = 0)]
        tx: u64,
    },

    /// Decrypt a base64 state record
    Decrypt {
        /// Record bytes, base64
        record: String,
        #[arg(long, default_value = "")]
        ns: String,
        #[arg(long, default_value = "")]
        key: String,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the active configuration (merged defaults + config file)
    Show,
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = MkvConfig::load(&cli.config)
        .with_context(|| format!("loading config {}", cli.config.display()))?;

    let level = cli.log.as_deref().unwrap_or(&config.logging.level);
    let format = cli
        .log_format
        .unwrap_or_else(|| parse_log_format(&config.logging.format));
    init_logging(level, format);

    tracing::debug!(
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.config.display(),
        "mkvctl starting"
    );

    match cli.command {
        Commands::Init => cmd_init(&config),
        Commands::Status => cmd_status(&config),
        Commands::ChangePassword { new_password_file } => {
            cmd_change_password(&config, new_password_file.as_deref())
        }
        Commands::Refresh { yes } => cmd_refresh(&config, yes),
        Commands::Encrypt {
            value,
            ns,
            key,
            metadata,
            block,
            tx,
        } => cmd_encrypt(&config, &value, metadata, &ns, &key, Height::new(block, tx)),
        Commands::Decrypt { record, ns, key } => cmd_decrypt(&config, &record, &ns, &key),
        Commands::Config {
            action: ConfigAction::Show,
        } => cmd_config_show(&config, &cli.config),
    }
}

fn init_logging(level: &str, format: LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

fn parse_log_format(value: &str) -> LogFormat {
    if value.eq_ignore_ascii_case("json") {
        LogFormat::Json
    } else {
        LogFormat::Text
    }
}

fn ready_manager(config: &MkvConfig) -> Result<Arc<KeyManager>> {
    let audit = Arc::new(AuditLog::open(&config.audit));
    let manager = KeyManager::new(config.keystore.clone(), audit);
    manager
        .initialize()
        .context("initializing key manager")?;
    Ok(manager)
}

// ── `mkvctl init` / `mkvctl status` ───────────────────────────────────────────

#[derive(Serialize)]
struct StatusReport<'a> {
    #[serde(flatten)]
    manager: KeyManagerStatus,
    key_file: Option<PathBuf>,
    search_paths: &'a [PathBuf],
    audit_log: Option<&'a Path>,
}

fn cmd_init(config: &MkvConfig) -> Result<()> {
    let existed = {
        let probe = mkv_keystore::KeyPersistence::new(
            &config.keystore,
            Arc::new(AuditLog::disabled()),
        );
        probe.has_existing()
    };

    let manager = ready_manager(config)?;
    let key_file = manager.persistence().find_existing(WRAPPED_K1_FILE);
    match (existed, key_file) {
        (true, Some(path)) => println!("loaded key hierarchy from {}", path.display()),
        (false, Some(path)) => println!("created key hierarchy at {}", path.display()),
        (_, None) => anyhow::bail!("key manager initialized but no key file is discoverable"),
    }
    Ok(())
}

fn cmd_status(config: &MkvConfig) -> Result<()> {
    let manager = ready_manager(config)?;
    let report = StatusReport {
        manager: manager.status(),
        key_file: manager.persistence().find_existing(WRAPPED_K1_FILE),
        search_paths: manager.persistence().search_paths(),
        audit_log: manager.audit().path(),
    };
    let rendered = serde_json::to_string_pretty(&report).context("serializing status")?;
    println!("{rendered}");
    Ok(())
}

// ── `mkvctl change-password` ──────────────────────────────────────────────────

fn cmd_change_password(config: &MkvConfig, new_password_file: Option<&Path>) -> Result<()> {
    let new_password = match new_password_file {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            SecretString::from(raw.trim().to_string())
        }
        None => prompt_new_password()?,
    };

    let manager = ready_manager(config)?;
    manager
        .change_password(new_password)
        .context("changing password")?;

    match manager.password_origin() {
        Some(origin) => println!("password changed; stored in {origin}"),
        None => println!("password changed"),
    }
    Ok(())
}

fn prompt_new_password() -> Result<SecretString> {
    let first = SecretString::from(
        rpassword::prompt_password("New password: ").context("reading password")?,
    );
    let second = SecretString::from(
        rpassword::prompt_password("Repeat new password: ").context("reading password")?,
    );
    if first.expose_secret() != second.expose_secret() {
        anyhow::bail!("passwords do not match");
    }
    Ok(first)
}

// ── `mkvctl refresh` ──────────────────────────────────────────────────────────

fn cmd_refresh(config: &MkvConfig, yes: bool) -> Result<()> {
    if !yes {
        anyhow::bail!(
            "refresh replaces the data key without re-encrypting stored values; \
             pass --yes to proceed"
        );
    }
    let manager = ready_manager(config)?;
    manager.refresh_keys().context("refreshing keys")?;
    println!("data key refreshed");
    Ok(())
}

// ── `mkvctl encrypt` / `mkvctl decrypt` ───────────────────────────────────────

fn cmd_encrypt(
    config: &MkvConfig,
    value: &str,
    metadata: Option<String>,
    ns: &str,
    key: &str,
    version: Height,
) -> Result<()> {
    let codec = ValueCodec::for_manager(ready_manager(config)?);
    let mut entry = VersionedValue::new(value.as_bytes().to_vec(), version);
    if let Some(metadata) = metadata {
        entry = entry.with_metadata(metadata.into_bytes());
    }

    let record = codec
        .encode_value(&entry, ns, key)
        .context("encrypting value")?;
    println!("{}", STANDARD.encode(record));
    Ok(())
}

#[derive(Serialize)]
struct DecryptedRecord {
    version: String,
    value: String,
    metadata: Option<String>,
}

fn cmd_decrypt(config: &MkvConfig, record: &str, ns: &str, key: &str) -> Result<()> {
    let bytes = STANDARD
        .decode(record.trim())
        .context("record is not valid base64")?;
    let codec = ValueCodec::for_manager(ready_manager(config)?);
    let entry = codec
        .decode_value(&bytes, ns, key)
        .context("decrypting record")?;

    let shown = DecryptedRecord {
        version: entry.version.to_string(),
        value: display_bytes(&entry.value),
        metadata: entry.metadata.as_deref().map(display_bytes),
    };
    println!(
        "{}",
        serde_json::to_string_pretty(&shown).context("serializing record")?
    );
    Ok(())
}

/// UTF-8 as-is, anything else as `base64:`-prefixed text.
fn display_bytes(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => format!("base64:{}", STANDARD.encode(bytes)),
    }
}

// ── `mkvctl config show` ──────────────────────────────────────────────────────

fn cmd_config_show(config: &MkvConfig, config_path: &Path) -> Result<()> {
    if config_path.exists() {
        println!("# Configuration from: {}", config_path.display());
    } else {
        println!("# Configuration: defaults (no file at {})", config_path.display());
    }
    println!();
    let rendered = toml::to_string_pretty(config).context("serializing config to TOML")?;
    print!("{rendered}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_encrypt_arguments() {
        let cli = Cli::try_parse_from([
            "mkvctl", "encrypt", "hello", "--ns", "mycc", "--key", "k1", "--block", "7",
        ])
        .unwrap();
        match cli.command {
            Commands::Encrypt {
                value, ns, key, block, tx, metadata,
            } => {
                assert_eq!(value, "hello");
                assert_eq!(ns, "mycc");
                assert_eq!(key, "k1");
                assert_eq!((block, tx), (7, 0));
                assert!(metadata.is_none());
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn log_format_from_config() {
        assert_eq!(parse_log_format("json"), LogFormat::Json);
        assert_eq!(parse_log_format("JSON"), LogFormat::Json);
        assert_eq!(parse_log_format("text"), LogFormat::Text);
        assert_eq!(parse_log_format("anything"), LogFormat::Text);
    }

    #[test]
    fn display_bytes_falls_back_to_base64() {
        assert_eq!(display_bytes(b"plain"), "plain");
        assert_eq!(display_bytes(&[0xff, 0xfe]), "base64://4=");
    }

    #[test]
    fn encrypt_then_decrypt_via_config() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("password.txt"), "cli-test").unwrap();
        let mut config = MkvConfig::default();
        config.keystore = mkv_core::config::KeystoreConfig::in_dir(dir.path());
        config.audit.path = dir.path().join("audit.log");

        let codec = ValueCodec::for_manager(ready_manager(&config).unwrap());
        let entry = VersionedValue::new(b"via cli".to_vec(), Height::new(1, 2));
        let record = STANDARD.encode(codec.encode_value(&entry, "ns", "k").unwrap());

        cmd_decrypt(&config, &record, "ns", "k").unwrap();
        let bytes = STANDARD.decode(&record).unwrap();
        assert_eq!(codec.decode_value(&bytes, "ns", "k").unwrap(), entry);
    }
}
