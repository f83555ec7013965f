// SPDX-FileCopyrightText: 2019-2024 Heiko Schaefer <heiko@schaefer.name>
// SPDX-License-Identifier: GPL-3.0-or-later

use thiserror::Error;

/// Tagged error kinds for the certificate lifecycle.
///
/// The deployment loop accumulates failures per-CM and only fails the whole
/// run on a fatal kind; reload-command non-zero exits are warned, not
/// propagated through this type at all.
#[derive(Error, Debug)]
pub enum PkiError {
    #[error("no valid cert instance for {name}")]
    NoInstance { name: String },

    #[error("disthost {fqdn} has no places configured")]
    MissingPlace { fqdn: String },

    #[error("mkdir failed, parent directory missing: {path}")]
    MissingParent { path: String },

    #[error("SSH/SFTP transport failure against {host}: {source}")]
    TransportError {
        host: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("ACME server did not offer a dns-01 challenge for {fqdn}")]
    UnsupportedChallenge { fqdn: String },

    #[error("ACME transport failure: {0}")]
    AcmeTransport(String),

    #[error("ACME protocol failure: {0}")]
    AcmeProtocol(String),

    #[error("authorization failed for: {fqdns:?}")]
    AuthorizationFailed { fqdns: Vec<String> },

    #[error("local issuance failed: {0}")]
    IssueFailure(String),

    #[error("persistence failure: {0}")]
    PersistenceFailure(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("at-rest encryption error: {0}")]
    Encryption(String),

    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, PkiError>;
