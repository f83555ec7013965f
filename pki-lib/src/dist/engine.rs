// SPDX-FileCopyrightText: 2019-2024 Heiko Schaefer <heiko@schaefer.name>
// SPDX-License-Identifier: GPL-3.0-or-later

//! The distribution engine (C6): plans and drives per-host/jail/place
//! bundles, transfers them over SFTP, runs reload commands, and advances
//! instance state.

use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;

use crate::dist::filenames::plan_files;
use crate::dist::transfer::{run_reload, transfer_files};
use crate::error::{PkiError, Result};
use crate::model::{Algo, CertInstance, CertMeta, CertType, CiState, EncryptionAlgo};
use crate::ssh::SshTransport;
use crate::store::PkiStoreWrite;
use crate::zone::{publish_tlsa, ZoneControlHandle};

/// Host whitelist/blacklist flags observed by the CLI surface.
#[derive(Debug, Clone, Default)]
pub struct DeployFilters {
    pub only_host: BTreeSet<String>,
    pub skip_host: BTreeSet<String>,
    pub no_tlsa: bool,
    pub instance_id: Option<i32>,
}

fn algos_for(encryption_algo: EncryptionAlgo) -> Vec<Algo> {
    match encryption_algo {
        EncryptionAlgo::Rsa => vec![Algo::Rsa],
        EncryptionAlgo::Ec => vec![Algo::Ec],
        EncryptionAlgo::RsaPlusEc => vec![Algo::Rsa, Algo::Ec],
    }
}

fn select_instance<'a>(cm: &'a CertMeta, filters: &DeployFilters) -> Result<&'a CertInstance> {
    let found = match filters.instance_id {
        Some(id) => cm.instances.iter().find(|ci| ci.row_id == Some(id)),
        None => cm.most_recent_active_instance(chrono::Utc::now()),
    };
    found.ok_or_else(|| PkiError::NoInstance { name: cm.name.clone() })
}

/// Deploy one CM: walk its disthosts, honoring `filters`, and publish TLSA.
/// Returns whether any host was omitted (skip/only filtering, not failure).
pub fn deploy_cert_meta(
    transport: &dyn SshTransport,
    store: &dyn PkiStoreWrite,
    zone_root: &Path,
    tlsa_dns_master: Option<&str>,
    zones: &ZoneControlHandle,
    recv_timeout: Duration,
    cm: &CertMeta,
    filters: &DeployFilters,
) -> Result<bool> {
    if cm.disthosts.is_empty() {
        return Ok(false);
    }

    let ci = select_instance(cm, filters)?;
    let mut any_host_omitted = false;

    for (fqdn, disthost) in &cm.disthosts {
        if filters.skip_host.contains(fqdn) {
            tracing::warn!(%fqdn, "host omitted: skip_host");
            any_host_omitted = true;
            continue;
        }
        if !filters.only_host.is_empty() && !filters.only_host.contains(fqdn) {
            tracing::warn!(%fqdn, "host omitted: not in only_host");
            any_host_omitted = true;
            continue;
        }

        if disthost.jails.is_empty() {
            return Err(PkiError::MissingPlace { fqdn: fqdn.clone() });
        }

        let mut session = transport.connect(fqdn)?;

        for (jail_name, jail) in &disthost.jails {
            if jail.places.is_empty() {
                return Err(PkiError::MissingPlace { fqdn: fqdn.clone() });
            }

            let dest_root = if jail_name.is_empty() {
                "".to_string()
            } else {
                format!("/{}{}", disthost.jailroot.trim_start_matches('/'), jail_name)
            };

            for place in jail.places.values() {
                for algo in algos_for(cm.encryption_algo) {
                    let Some(cks) = ci.cksd.get(&algo) else { continue };
                    let (cacert_pem, key_pem, cert_pem) =
                        (Vec::new(), cks.key_pem.as_bytes().to_vec(), cks.cert_pem.as_bytes().to_vec());

                    let files = plan_files(
                        &cm.name,
                        cm.subject_type,
                        algo,
                        place.cert_file_type,
                        cm.cert_type,
                        &key_pem,
                        &cert_pem,
                        &cacert_pem,
                        place.key_path.is_some(),
                    );

                    transfer_files(&mut *session, &dest_root, &cm.name, place, &files)?;
                }

                run_reload(&mut *session, place, jail_name, recv_timeout)?;
            }
        }
    }

    if !filters.no_tlsa {
        if let Some(cks) = ci.cksd.values().next() {
            let prepublished = None;
            publish_tlsa(zone_root, tlsa_dns_master, zones, cm, &cks.hash, prepublished)?;
        }
    }

    if !any_host_omitted {
        if let Some(row_id) = ci.row_id {
            store.update_cert_instance_state(row_id, CiState::Deployed)?;
        }
        if matches!(cm.cert_type, CertType::Local) {
            store.update_authorized_until(cm.row_id, None, cm.cert_type)?;
        }
    } else {
        tracing::warn!(cm = %cm.name, "not all hosts served; instance state unchanged");
    }

    Ok(any_host_omitted)
}

/// Drive §4.4 over a whole deploy run, then bump SOA and reload DNS once
/// after every CM has been processed.
pub fn deploy(
    transport: &dyn SshTransport,
    store: &dyn PkiStoreWrite,
    zone_root: &Path,
    tlsa_dns_master: Option<&str>,
    zones: &ZoneControlHandle,
    recv_timeout: Duration,
    cms: &[CertMeta],
    filters: &DeployFilters,
) -> Result<()> {
    let mut error_found = false;

    for cm in cms {
        if cm.disabled {
            continue;
        }
        match deploy_cert_meta(transport, store, zone_root, tlsa_dns_master, zones, recv_timeout, cm, filters) {
            Ok(_) => {}
            Err(e) => {
                tracing::error!(cm = %cm.name, error = %e, "deployment failed for cert meta");
                error_found = true;
            }
        }
    }

    zones.0.update_soa_of_updated_zones()?;
    zones.0.reload_name_server()?;

    if error_found {
        return Err(PkiError::PersistenceFailure("one or more cert metas failed to deploy".into()));
    }
    Ok(())
}
