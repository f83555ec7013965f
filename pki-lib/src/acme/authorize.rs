// SPDX-FileCopyrightText: 2019-2024 Heiko Schaefer <heiko@schaefer.name>
// SPDX-License-Identifier: GPL-3.0-or-later

//! DNS-01 authorization orchestrator, the core of C4: write zone-include
//! files, trigger reloads, poll authorization status, clean up.

use std::collections::BTreeMap;
use std::path::Path;
use std::thread::sleep;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};

use crate::acme::client::{AcmeClient, AuthzStatus};
use crate::config::AcmeConfig;
use crate::error::{PkiError, Result};
use crate::model::CertMeta;
use crate::zone::{zone_and_fqdns, ZoneControlHandle};

struct FqdnAuth {
    fqdn: String,
    authz_uri: String,
    challenge_url: String,
    key_authorization: String,
}

/// Runs the authorization phase of §4.3 steps 1-8. On success returns the
/// minimum authorization expiry across every FQDN (the new `authorized_until`).
/// Teardown (include truncation + reload) always runs, even on failure.
pub fn authorize(
    client: &dyn AcmeClient,
    zone_root: &Path,
    include_name: &str,
    zones: &ZoneControlHandle,
    cm: &CertMeta,
    acme_cfg: &AcmeConfig,
) -> Result<DateTime<Utc>> {
    let fqdns = cm.fqdns();

    // Step 2: request authorizations and pick the dns-01 challenge.
    let mut prepared = Vec::with_capacity(fqdns.len());
    for fqdn in &fqdns {
        let authz = client.new_authorization(fqdn)?;
        let challenge = authz
            .challenges
            .iter()
            .find(|c| c.kind == "dns-01")
            .ok_or_else(|| PkiError::UnsupportedChallenge { fqdn: fqdn.clone() })?;

        let key_authorization = client.key_authorization(&challenge.token);
        prepared.push(FqdnAuth {
            fqdn: fqdn.clone(),
            authz_uri: authz.uri,
            challenge_url: challenge.url.clone(),
            key_authorization,
        });
    }

    // Step 3: group by zone, write one include file per zone, cache + reload.
    let grouped = zone_and_fqdns(zone_root, cm)?;
    write_include_files(zone_root, include_name, &grouped, &prepared, client)?;
    for zone in grouped.keys() {
        zones.0.update_zone_cache(zone)?;
    }
    zones.0.update_soa_of_updated_zones()?;
    zones.0.reload_name_server()?;

    // Step 4.
    sleep(StdDuration::from_secs(acme_cfg.dns_propagation_delay_secs));

    // Step 5: validate + poll each fqdn.
    let poll_result = poll_all(client, &prepared, acme_cfg);

    // Step 7: teardown runs regardless of success.
    let teardown = (|| -> Result<()> {
        truncate_include_files(zone_root, include_name, grouped.keys())?;
        for zone in grouped.keys() {
            zones.0.update_zone_cache(zone)?;
        }
        zones.0.update_soa_of_updated_zones()?;
        zones.0.reload_name_server()?;
        Ok(())
    })();

    let (min_expiry, failed) = poll_result?;
    teardown?;

    // Step 8.
    if !failed.is_empty() {
        return Err(PkiError::AuthorizationFailed { fqdns: failed });
    }

    min_expiry.ok_or_else(|| PkiError::AcmeProtocol("no authorization expiry recorded".into()))
}

fn write_include_files(
    zone_root: &Path,
    include_name: &str,
    grouped: &BTreeMap<String, Vec<String>>,
    prepared: &[FqdnAuth],
    client: &dyn AcmeClient,
) -> Result<()> {
    for (zone, fqdns_in_zone) in grouped {
        let mut content = String::new();
        for fqdn in fqdns_in_zone {
            let entry = prepared.iter().find(|p| &p.fqdn == fqdn).expect("prepared for every fqdn");
            let txt = client.txt_record_for(&entry.key_authorization);
            content.push_str(&format!("_acme-challenge.{fqdn}. IN TXT \"{txt}\"\n"));
        }
        std::fs::write(zone_root.join(zone).join(include_name), content)?;
    }
    Ok(())
}

fn truncate_include_files<'a>(
    zone_root: &Path,
    include_name: &str,
    zones: impl Iterator<Item = &'a String>,
) -> Result<()> {
    for zone in zones {
        std::fs::write(zone_root.join(zone).join(include_name), b"")?;
    }
    Ok(())
}

/// Notify readiness then poll each authorization at `poll_interval_secs`
/// until its status is no longer `pending`. Returns the minimum expiry
/// across FQDNs that reached `valid`, plus the set of FQDNs that did not.
fn poll_all(
    client: &dyn AcmeClient,
    prepared: &[FqdnAuth],
    acme_cfg: &AcmeConfig,
) -> Result<(Option<DateTime<Utc>>, Vec<String>)> {
    let mut min_expiry: Option<DateTime<Utc>> = None;
    let mut failed = Vec::new();

    for entry in prepared {
        client.validate_authorization(&entry.challenge_url, "dns-01", &entry.key_authorization)?;

        loop {
            let status = client.get_authorization(&entry.authz_uri)?;
            match status.status {
                AuthzStatus::Pending => {
                    sleep(StdDuration::from_secs(acme_cfg.poll_interval_secs));
                    continue;
                }
                AuthzStatus::Valid => {
                    if let Some(expires) = status.expires {
                        min_expiry = Some(match min_expiry {
                            Some(current) => current.min(expires),
                            None => expires,
                        });
                    }
                    break;
                }
                AuthzStatus::Invalid | AuthzStatus::Other(_) => {
                    failed.push(entry.fqdn.clone());
                    break;
                }
            }
        }
    }

    Ok((min_expiry, failed))
}
