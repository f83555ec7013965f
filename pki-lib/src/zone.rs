// SPDX-FileCopyrightText: 2019-2024 Heiko Schaefer <heiko@schaefer.name>
// SPDX-License-Identifier: GPL-3.0-or-later

//! The zone publisher (C5): zone lookup by FQDN, TLSA record files, and the
//! three operator-supplied DNS control signals.

use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{PkiError, Result};
use crate::model::CertMeta;

/// Ordering of `update_zone_cache` / `update_SOA_of_updated_zones` /
/// `reload_name_server` is enforced by the caller (the authorizer and the
/// distribution engine), not by this trait.
pub trait ZoneControl {
    fn update_zone_cache(&self, zone: &str) -> Result<()>;
    fn update_soa_of_updated_zones(&self) -> Result<()>;
    fn reload_name_server(&self) -> Result<()>;
}

/// Local-filesystem implementation: touches a cache marker file per zone,
/// bumps a `SOA.serial` counter file, and shells out to a configurable
/// reload command. Real deployments supply their own `ZoneControl`.
pub struct FsZoneControl {
    pub zone_root: PathBuf,
    pub reload_command: Option<String>,
    updated: std::cell::RefCell<BTreeSet<String>>,
}

impl FsZoneControl {
    pub fn new(zone_root: PathBuf, reload_command: Option<String>) -> Self {
        Self { zone_root, reload_command, updated: std::cell::RefCell::new(BTreeSet::new()) }
    }
}

impl ZoneControl for FsZoneControl {
    fn update_zone_cache(&self, zone: &str) -> Result<()> {
        std::fs::write(self.zone_root.join(zone).join(".cache"), b"")?;
        self.updated.borrow_mut().insert(zone.to_string());
        Ok(())
    }

    fn update_soa_of_updated_zones(&self) -> Result<()> {
        for zone in self.updated.borrow().iter() {
            let soa_path = self.zone_root.join(zone).join("SOA.serial");
            let current: u64 = std::fs::read_to_string(&soa_path)
                .ok()
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(0);
            std::fs::write(&soa_path, (current + 1).to_string())?;
        }
        Ok(())
    }

    fn reload_name_server(&self) -> Result<()> {
        if let Some(cmd) = &self.reload_command {
            let status = std::process::Command::new("sh").arg("-c").arg(cmd).status()?;
            if !status.success() {
                tracing::warn!(?status, "name server reload command exited non-zero");
            }
        }
        self.updated.borrow_mut().clear();
        Ok(())
    }
}

/// For every FQDN walk suffixes shortest-to-longest and pick the longest one
/// for which `zone_root / <suffix>` exists locally.
pub fn zone_for_fqdn(zone_root: &Path, fqdn: &str) -> Option<String> {
    let labels: Vec<&str> = fqdn.split('.').collect();
    let mut best = None;
    for start in (0..labels.len()).rev() {
        let candidate = labels[start..].join(".");
        if zone_root.join(&candidate).is_dir() {
            best = Some(candidate);
        }
    }
    best
}

/// Group every FQDN of `cm` ([name] ++ altnames) by owning zone.
pub fn zone_and_fqdns(zone_root: &Path, cm: &CertMeta) -> Result<BTreeMap<String, Vec<String>>> {
    let mut grouped: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for fqdn in cm.fqdns() {
        let zone = zone_for_fqdn(zone_root, &fqdn)
            .ok_or_else(|| PkiError::Configuration(format!("no zone found under zone_root for {fqdn}")))?;
        grouped.entry(zone).or_default().push(fqdn);
    }
    Ok(grouped)
}

/// `publish_tlsa(cm, active_hash, prepublished_hash?)`. No-op if `cm` has no
/// TLSA prefixes. Fails fast if a remote DNS master is configured.
pub fn publish_tlsa(
    zone_root: &Path,
    tlsa_dns_master: Option<&str>,
    zones: &ZoneControlHandle,
    cm: &CertMeta,
    active_hash: &str,
    prepublished_hash: Option<&str>,
) -> Result<()> {
    if cm.tlsa_prefixes.is_empty() {
        return Ok(());
    }
    if tlsa_dns_master.is_some() {
        return Err(PkiError::Configuration(
            "remote DNS master publishing is not supported".into(),
        ));
    }

    for (zone, fqdns) in zone_and_fqdns(zone_root, cm)? {
        for fqdn in fqdns {
            let mut lines = String::new();
            for prefix in &cm.tlsa_prefixes {
                lines.push_str(&format!("{} {active_hash}\n", prefix.replace("{}", &fqdn)));
                if let Some(pp) = prepublished_hash {
                    lines.push_str(&format!("{} {pp}\n", prefix.replace("{}", &fqdn)));
                }
            }
            let path = zone_root.join(&zone).join(format!("{fqdn}.tlsa"));
            let mut f = std::fs::File::create(&path)?;
            f.write_all(lines.as_bytes())?;
        }
        zones.0.update_zone_cache(&zone)?;
    }
    Ok(())
}

/// A boxed [`ZoneControl`], so callers don't need a generic parameter
/// threaded through the authorization and distribution orchestrators.
pub struct ZoneControlHandle(pub Box<dyn ZoneControl>);

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn zone_for_fqdn_picks_longest_existing_suffix() {
        let dir = tempdir().unwrap();
        std::fs::create_dir(dir.path().join("example.com")).unwrap();
        std::fs::create_dir(dir.path().join("b.example.com")).unwrap();

        assert_eq!(
            zone_for_fqdn(dir.path(), "x.b.example.com"),
            Some("b.example.com".to_string())
        );
        assert_eq!(
            zone_for_fqdn(dir.path(), "y.example.com"),
            Some("example.com".to_string())
        );
        assert_eq!(zone_for_fqdn(dir.path(), "z.other.org"), None);
    }
}
