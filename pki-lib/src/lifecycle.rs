// SPDX-FileCopyrightText: 2019-2024 Heiko Schaefer <heiko@schaefer.name>
// SPDX-License-Identifier: GPL-3.0-or-later

//! The lifecycle coordinator (C7): sequences issue -> prepublish-TLSA ->
//! deploy -> expire-sweep.

use std::path::PathBuf;
use std::time::Duration;

use chrono::Utc;

use crate::acme::client::AcmeClient;
use crate::acme::issuer::{issue_acme, AcmeIssuer, IntermediateCache};
use crate::config::{AcmeConfig, PkiConfig};
use crate::crypto::CaKeyMaterial;
use crate::dist::{deploy, DeployFilters};
use crate::error::{PkiError, Result};
use crate::issue_local::issue_local;
use crate::model::{CertInstance, CertMeta, CertType, CiState};
use crate::registry::Registry;
use crate::ssh::SshTransport;
use crate::store::{PkiStoreRW, PkiStoreWrite};
use crate::zone::{publish_tlsa, ZoneControlHandle};

/// The dependencies a coordinator needs; owned by the caller (typically the
/// `pki-cli` binary) and borrowed for the duration of one operation.
pub struct Coordinator<'a> {
    pub store: &'a dyn PkiStoreRW,
    pub registry: &'a Registry,
    pub transport: &'a dyn SshTransport,
    pub zones: &'a ZoneControlHandle,
    pub config: &'a PkiConfig,
    pub local_ca: Option<&'a CaKeyMaterial>,
    pub local_ca_cert_ci: Option<i32>,
    pub acme_client: Option<&'a dyn AcmeClient>,
    pub intermediates: Option<&'a dyn IntermediateCache>,
}

impl<'a> Coordinator<'a> {
    /// `issue(cm)`: choose C3 or C4 per `cm.cert_type`, transitioning a fresh
    /// CI from `reserved` to `issued`.
    pub fn issue(&self, cm: &CertMeta) -> Result<CertInstance> {
        let ci = match cm.cert_type {
            CertType::Local => {
                let ca = self
                    .local_ca
                    .ok_or_else(|| PkiError::Configuration("no local CA configured".into()))?;
                let ca_cert_ci = self
                    .local_ca_cert_ci
                    .ok_or_else(|| PkiError::Configuration("no local CA instance persisted".into()))?;
                issue_local(self.store, cm, ca, ca_cert_ci, &self.config.x509)?
            }
            CertType::Le => {
                let client = self
                    .acme_client
                    .ok_or_else(|| PkiError::Configuration("no ACME client configured".into()))?;
                let intermediates = self
                    .intermediates
                    .ok_or_else(|| PkiError::Configuration("no intermediate cache configured".into()))?;
                let issuer = AcmeIssuer { client, acme_cfg: &self.config.acme, x509: &self.config.x509 };
                issue_acme(
                    &issuer,
                    self.store,
                    &self.config.zone_file_root,
                    &self.config.zone_file_include_name,
                    self.zones,
                    cm,
                    intermediates,
                    Utc::now(),
                )?
            }
        };

        // Invariant 3: a freshly issued CKS must not collide with one
        // already in use by any other instance this process has issued.
        for cks in ci.cksd.values() {
            self.registry.register_cks_hash(&cks.hash)?;
        }
        Ok(ci)
    }

    /// `prepublish_tlsa(cm, prepublished_hash)`: publish and advance the most
    /// recent instance to `prepublished`.
    pub fn prepublish_tlsa(&self, cm: &CertMeta, prepublished_hash: &str) -> Result<()> {
        let ci = cm
            .most_recent_instance()
            .ok_or_else(|| PkiError::NoInstance { name: cm.name.clone() })?;
        let active_hash = ci
            .cksd
            .values()
            .next()
            .map(|cks| cks.hash.clone())
            .ok_or_else(|| PkiError::NoInstance { name: cm.name.clone() })?;

        publish_tlsa(
            &self.config.zone_file_root,
            self.config.tlsa_dns_master.as_deref(),
            self.zones,
            cm,
            &active_hash,
            Some(prepublished_hash),
        )?;

        if let Some(row_id) = ci.row_id {
            self.store.update_cert_instance_state(row_id, CiState::Prepublished)?;
        }
        Ok(())
    }

    /// `deploy(cms, filters)`: drive the distribution engine.
    pub fn deploy(&self, cms: &[CertMeta], filters: &DeployFilters) -> Result<()> {
        deploy(
            self.transport,
            self.store,
            &self.config.zone_file_root,
            self.config.tlsa_dns_master.as_deref(),
            self.zones,
            Duration::from_secs(self.config.ssh.recv_timeout_secs),
            cms,
            filters,
        )
    }

    /// `expire_sweep`: mark CIs whose `not_after < now` as `expired`.
    pub fn expire_sweep(&self, cms: &[CertMeta]) -> Result<usize> {
        let now = Utc::now();
        let mut count = 0;
        for cm in cms {
            for ci in &cm.instances {
                if ci.not_after < now && !matches!(ci.state, CiState::Expired | CiState::Archived) {
                    if let Some(row_id) = ci.row_id {
                        self.store.update_cert_instance_state(row_id, CiState::Expired)?;
                        count += 1;
                    }
                }
            }
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn instance(not_after: chrono::DateTime<Utc>, state: CiState) -> CertInstance {
        CertInstance {
            row_id: Some(1),
            state,
            ocsp_must_staple: false,
            not_before: not_after - chrono::Duration::days(10),
            not_after,
            ca_cert_ci: None,
            cksd: BTreeMap::new(),
        }
    }

    #[test]
    fn expired_instances_are_detected_by_not_after() {
        let past = Utc::now() - chrono::Duration::days(1);
        let ci = instance(past, CiState::Issued);
        assert!(ci.not_after < Utc::now());
        assert!(!matches!(ci.state, CiState::Expired));
    }
}
