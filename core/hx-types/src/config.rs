//! Configuration loading.
//!
//! Resolved from `$XDG_CONFIG_HOME/hx/config.yaml` with XDG-style path
//! defaults. Environment overrides (`HX_SPOOL_DIR`, `HX_BLOB_DIR`,
//! `HX_DB_PATH`) take precedence over the file.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Sync target backend kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreType {
    Folder,
    S3,
}

/// S3 connection parameters for a vault with `store_type: s3`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct S3Params {
    pub bucket: String,
    pub region: String,
    /// Custom endpoint (MinIO or other S3-compatible stores).
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Force path-style addressing (required by most non-AWS endpoints).
    #[serde(default)]
    pub path_style: bool,
    #[serde(default)]
    pub access_key: Option<String>,
    #[serde(default)]
    pub secret_key: Option<String>,
}

/// One enrolled sync target.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VaultConfig {
    pub vault_id: String,
    pub store_type: StoreType,
    /// Root directory for `folder` stores; key prefix for `s3` stores.
    #[serde(default)]
    pub store_path: String,
    #[serde(default = "default_true")]
    pub encrypt: bool,
    /// 64 hex chars (32 bytes). Required when `encrypt` is true.
    #[serde(default)]
    pub master_key: Option<String>,
    #[serde(default)]
    pub s3: Option<S3Params>,
}

fn default_true() -> bool {
    true
}

/// Resolved paths and retention bounds.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    pub spool_dir: PathBuf,
    pub blob_dir: PathBuf,
    pub db_path: PathBuf,
    pub retention_events_months: u32,
    pub retention_blobs_days: u32,
    pub blob_disk_cap_gb: f64,
    #[serde(default)]
    pub vaults: Vec<VaultConfig>,
}

impl Default for Config {
    fn default() -> Self {
        let data = data_home();
        Self {
            spool_dir: data.join("hx").join("spool"),
            blob_dir: data.join("hx").join("blobs"),
            db_path: data.join("hx").join("hx.db"),
            retention_events_months: 12,
            retention_blobs_days: 90,
            blob_disk_cap_gb: 2.0,
            vaults: Vec::new(),
        }
    }
}

/// Partial file shape; unset fields fall back to defaults.
#[derive(Default, Deserialize)]
struct RawConfig {
    spool_dir: Option<PathBuf>,
    blob_dir: Option<PathBuf>,
    db_path: Option<PathBuf>,
    retention_events_months: Option<u32>,
    retention_blobs_days: Option<u32>,
    blob_disk_cap_gb: Option<f64>,
    #[serde(default)]
    vaults: Vec<VaultConfig>,
}

/// Loads config from `path` (or the default location when `None`).
/// A missing file yields the defaults; a malformed file is an error.
pub fn load_config(path: Option<&Path>) -> ConfigResult<Config> {
    let default_path = config_home().join("hx").join("config.yaml");
    let path = path.unwrap_or(&default_path);

    let mut cfg = Config::default();
    match std::fs::read_to_string(path) {
        Ok(text) => {
            let raw: RawConfig = serde_yaml::from_str(&text)?;
            if let Some(v) = raw.spool_dir {
                cfg.spool_dir = v;
            }
            if let Some(v) = raw.blob_dir {
                cfg.blob_dir = v;
            }
            if let Some(v) = raw.db_path {
                cfg.db_path = v;
            }
            if let Some(v) = raw.retention_events_months {
                cfg.retention_events_months = v;
            }
            if let Some(v) = raw.retention_blobs_days {
                cfg.retention_blobs_days = v;
            }
            if let Some(v) = raw.blob_disk_cap_gb {
                cfg.blob_disk_cap_gb = v;
            }
            cfg.vaults = raw.vaults;
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }

    if let Ok(v) = std::env::var("HX_SPOOL_DIR") {
        cfg.spool_dir = PathBuf::from(v);
    }
    if let Ok(v) = std::env::var("HX_BLOB_DIR") {
        cfg.blob_dir = PathBuf::from(v);
    }
    if let Ok(v) = std::env::var("HX_DB_PATH") {
        cfg.db_path = PathBuf::from(v);
    }

    for vault in &cfg.vaults {
        validate_vault(vault)?;
    }

    Ok(cfg)
}

fn validate_vault(vault: &VaultConfig) -> ConfigResult<()> {
    if vault.encrypt {
        match &vault.master_key {
            Some(k) if k.len() == 64 && k.bytes().all(|b| b.is_ascii_hexdigit()) => {}
            Some(_) => {
                return Err(ConfigError::Invalid(format!(
                    "vault {}: master_key must be 64 hex chars",
                    vault.vault_id
                )))
            }
            None => {
                return Err(ConfigError::Invalid(format!(
                    "vault {}: encrypt enabled but no master_key",
                    vault.vault_id
                )))
            }
        }
    }
    if vault.store_type == StoreType::S3 && vault.s3.is_none() {
        return Err(ConfigError::Invalid(format!(
            "vault {}: store_type s3 requires an s3 block",
            vault.vault_id
        )));
    }
    Ok(())
}

fn data_home() -> PathBuf {
    if let Ok(v) = std::env::var("XDG_DATA_HOME") {
        return PathBuf::from(v);
    }
    home().join(".local").join("share")
}

fn config_home() -> PathBuf {
    if let Ok(v) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(v);
    }
    home().join(".config")
}

fn home() -> PathBuf {
    std::env::var("HOME").map(PathBuf::from).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_file_uses_defaults() {
        let cfg = load_config(Some(Path::new("/nonexistent/hx.yaml"))).unwrap();
        assert_eq!(cfg.retention_events_months, 12);
        assert_eq!(cfg.retention_blobs_days, 90);
        assert!(cfg.vaults.is_empty());
    }

    #[test]
    fn file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(
            f,
            "db_path: /tmp/custom.db\nretention_events_months: 6\nvaults:\n  - vault_id: main\n    store_type: folder\n    store_path: /tmp/vault\n    encrypt: false"
        )
        .unwrap();

        let cfg = load_config(Some(&path)).unwrap();
        assert_eq!(cfg.db_path, PathBuf::from("/tmp/custom.db"));
        assert_eq!(cfg.retention_events_months, 6);
        assert_eq!(cfg.vaults.len(), 1);
        assert_eq!(cfg.vaults[0].store_type, StoreType::Folder);
    }

    #[test]
    fn encrypted_vault_requires_master_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(
            &path,
            "vaults:\n  - vault_id: main\n    store_type: folder\n    store_path: /tmp/v\n",
        )
        .unwrap();

        let err = load_config(Some(&path)).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn short_master_key_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(
            &path,
            "vaults:\n  - vault_id: main\n    store_type: folder\n    store_path: /tmp/v\n    master_key: abcd\n",
        )
        .unwrap();

        let err = load_config(Some(&path)).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }
}
