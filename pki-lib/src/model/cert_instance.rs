// SPDX-FileCopyrightText: 2019-2024 Heiko Schaefer <heiko@schaefer.name>
// SPDX-License-Identifier: GPL-3.0-or-later

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CiState {
    Reserved,
    Issued,
    Prepublished,
    Deployed,
    Revoked,
    Expired,
    Archived,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Algo {
    Rsa,
    Ec,
}

/// The `(cert, key, hash)` triple for one algorithm of a [`CertInstance`].
///
/// `hash` is the uppercase hex SHA-256 fingerprint of the DER cert (DANE
/// TLSA selector 0, matching type 1). At most one CKS exists per unique
/// `hash`, process-wide — enforced by [`crate::registry::Registry`].
#[derive(Debug, Clone)]
pub struct CertKeyStore {
    pub algo: Algo,
    /// PEM-encoded certificate.
    pub cert_pem: String,
    /// PEM-encoded key. Symmetrically encrypted at rest when database-level
    /// encryption is configured; always plaintext in memory.
    pub key_pem: String,
    pub hash: String,
}

/// One concrete issuance under a [`crate::model::CertMeta`].
#[derive(Debug, Clone)]
pub struct CertInstance {
    pub row_id: Option<i32>,
    pub state: CiState,
    pub ocsp_must_staple: bool,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    /// The CI that signed this one. A CA's own self-signed CI references
    /// itself once persisted.
    pub ca_cert_ci: Option<i32>,
    pub cksd: BTreeMap<Algo, CertKeyStore>,
}

impl CertInstance {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.not_before <= now && now <= self.not_after
    }

    /// Valid for deployment: has been issued and not yet revoked/expired.
    pub fn is_deployable(&self) -> bool {
        matches!(self.state, CiState::Issued | CiState::Prepublished | CiState::Deployed)
    }
}
