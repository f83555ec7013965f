// SPDX-FileCopyrightText: 2019-2024 Heiko Schaefer <heiko@schaefer.name>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Operator configuration, loaded from TOML with environment overrides.
//!
//! Replaces the source's module-level globals (`Pathes`, `X509atts`,
//! `LE_SERVER`, `SUBJECT_LE_CA`, `SSH_CLIENT_USER_NAME`) with one struct that
//! is loaded once and passed down explicitly.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    ValidationError(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct X509Config {
    pub rsa_bits: u32,
    pub ec_curve: String,
    pub validity_days: i64,
    pub ocsp_must_staple_default: bool,
}

impl Default for X509Config {
    fn default() -> Self {
        Self {
            rsa_bits: 3072,
            ec_curve: "P-256".into(),
            validity_days: 90,
            ocsp_must_staple_default: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SshConfig {
    pub client_user: String,
    pub known_hosts: String,
    pub identity_file: String,
    pub recv_timeout_secs: u64,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            client_user: "root".into(),
            known_hosts: "~/.ssh/known_hosts".into(),
            identity_file: "~/.ssh/id_rsa".into(),
            recv_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AcmeConfig {
    pub directory_url: String,
    pub account_path: String,
    pub ca_subject: String,
    /// Subject under which fetched intermediates are persisted for reuse
    /// across leaf certs they've signed (see `StoreIntermediateCache`).
    pub intermediate_holder_name: String,
    pub dns_propagation_delay_secs: u64,
    pub poll_interval_secs: u64,
}

impl Default for AcmeConfig {
    fn default() -> Self {
        Self {
            directory_url: "https://acme-v02.api.letsencrypt.org/directory".into(),
            account_path: "le_account.json".into(),
            ca_subject: "Let's Encrypt Authority".into(),
            intermediate_holder_name: "le-intermediates".into(),
            dns_propagation_delay_secs: 10,
            poll_interval_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PkiConfig {
    pub database_url: String,
    pub db_encryption_passphrase: Option<String>,

    pub zone_file_root: PathBuf,
    pub zone_file_include_name: String,
    /// Non-empty only for an (unsupported) remote DNS master; its presence
    /// is a fail-fast configuration error, never a working code path.
    pub tlsa_dns_master: Option<String>,
    /// Shell command run after a zone file is rewritten, to bump the SOA
    /// serial and reload the name server (e.g. `"rndc reload"`). `None`
    /// leaves reload to an external cron job or the operator.
    pub zone_reload_command: Option<String>,

    pub work_dir: PathBuf,

    /// Name of the cert meta representing the locally operated CA; its most
    /// recent active instance supplies the signer for C3 local issuance.
    pub local_ca_name: String,

    pub ssh: SshConfig,
    pub acme: AcmeConfig,
    pub x509: X509Config,
}

impl Default for PkiConfig {
    fn default() -> Self {
        Self {
            database_url: "postgres://localhost/pki".into(),
            db_encryption_passphrase: None,
            zone_file_root: PathBuf::from("/var/named/master"),
            zone_file_include_name: "acme-challenge.inc".into(),
            tlsa_dns_master: None,
            zone_reload_command: None,
            work_dir: PathBuf::from("/var/lib/pki"),
            local_ca_name: "local-ca".into(),
            ssh: SshConfig::default(),
            acme: AcmeConfig::default(),
            x509: X509Config::default(),
        }
    }
}

impl PkiConfig {
    /// Load the environment variable `PKI_CONFIG` if set, else `path`, parse it
    /// as TOML, apply environment overrides, then validate.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let resolved = match (path, std::env::var("PKI_CONFIG").ok()) {
            (Some(p), _) => Some(p.to_path_buf()),
            (None, Some(env_path)) => Some(PathBuf::from(env_path)),
            (None, None) => None,
        };

        let mut cfg = match resolved {
            Some(p) => Self::read_file(&p)?,
            None => Self::default(),
        };

        cfg.apply_env_overrides();
        cfg.validate()?;
        Ok(cfg)
    }

    fn read_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadError {
            path: path.display().to_string(),
            source,
        })?;

        toml::from_str(&content).map_err(|source| ConfigError::ParseError {
            path: path.display().to_string(),
            source,
        })
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("PKI_DATABASE_URL") {
            self.database_url = v;
        }
        if let Ok(v) = std::env::var("PKI_DB_ENCRYPTION_PASSPHRASE") {
            self.db_encryption_passphrase = Some(v);
        }
        if let Ok(v) = std::env::var("PKI_ZONE_FILE_ROOT") {
            self.zone_file_root = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("PKI_ZONE_RELOAD_COMMAND") {
            self.zone_reload_command = Some(v);
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.database_url.is_empty() {
            return Err(ConfigError::ValidationError(
                "database_url must not be empty".into(),
            ));
        }
        if self.tlsa_dns_master.is_some() {
            tracing::warn!(
                "tlsa_dns_master is configured; remote DNS master publishing is unsupported \
                 and zone publishing will fail fast"
            );
        }
        if self.x509.rsa_bits < 2048 {
            return Err(ConfigError::ValidationError(
                "x509.rsa_bits must be at least 2048".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let cfg = PkiConfig::default();
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn parse_minimal_toml() {
        let toml = r#"
            database_url = "postgres://db/pki"
        "#;
        let cfg: PkiConfig = toml::from_str(toml).unwrap();
        assert_eq!(cfg.database_url, "postgres://db/pki");
        assert_eq!(cfg.x509.rsa_bits, 3072);
    }

    #[test]
    fn rejects_small_rsa_bits() {
        let mut cfg = PkiConfig::default();
        cfg.x509.rsa_bits = 512;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn warns_but_accepts_remote_dns_master_in_config() {
        let mut cfg = PkiConfig::default();
        cfg.tlsa_dns_master = Some("ns1.example".into());
        assert!(cfg.validate().is_ok());
    }
}
