// SPDX-FileCopyrightText: 2019-2024 Heiko Schaefer <heiko@schaefer.name>
// SPDX-License-Identifier: GPL-3.0-or-later

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};

use crate::model::cert_instance::CertInstance;
use crate::model::place::Place;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertType {
    Le,
    Local,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubjectType {
    Ca,
    Client,
    Server,
    Reserved,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncryptionAlgo {
    Rsa,
    Ec,
    RsaPlusEc,
}

/// One jail under a disthost; an empty `name` denotes the host root (no jail).
#[derive(Debug, Clone)]
pub struct Jail {
    pub name: String,
    pub places: BTreeMap<String, Place>,
}

/// `disthosts[fqdn]`: the jailroot and jails reachable on that host.
#[derive(Debug, Clone, Default)]
pub struct DistHost {
    pub jailroot: String,
    pub jails: BTreeMap<String, Jail>,
}

/// The in-memory description of a managed subject and its deployment targets.
///
/// One CM exists per `(store, name)`: callers obtain it exclusively through
/// [`crate::registry::Registry::cert_meta`], which enforces that identity
/// invariant.
#[derive(Debug, Clone)]
pub struct CertMeta {
    pub row_id: i32,
    pub name: String,
    pub cert_type: CertType,
    pub subject_type: SubjectType,
    pub encryption_algo: EncryptionAlgo,
    pub ocsp_must_staple: bool,
    pub disabled: bool,
    pub authorized_until: Option<DateTime<Utc>>,
    pub altnames: Vec<String>,
    pub tlsa_prefixes: BTreeSet<String>,
    pub disthosts: BTreeMap<String, DistHost>,
    pub instances: Vec<CertInstance>,
}

impl CertMeta {
    /// `[name] ++ altnames`, in that order.
    pub fn fqdns(&self) -> Vec<String> {
        let mut v = vec![self.name.clone()];
        v.extend(self.altnames.iter().cloned());
        v
    }

    /// The CI with the highest `row_id`, i.e. the most recently created one.
    pub fn most_recent_instance(&self) -> Option<&CertInstance> {
        self.instances.iter().max_by_key(|ci| ci.row_id.unwrap_or(i32::MIN))
    }

    /// The most recent instance that is currently active (`not_before <= now
    /// <= not_after`) and not revoked/expired/archived.
    pub fn most_recent_active_instance(&self, now: DateTime<Utc>) -> Option<&CertInstance> {
        self.instances
            .iter()
            .filter(|ci| ci.is_active(now) && ci.is_deployable())
            .max_by_key(|ci| ci.row_id.unwrap_or(i32::MIN))
    }

    pub fn active_instances(&self, now: DateTime<Utc>) -> Vec<&CertInstance> {
        let actives: Vec<&CertInstance> = self.instances.iter().filter(|ci| ci.is_active(now)).collect();
        if actives.len() > 2 {
            tracing::warn!(cm = %self.name, count = actives.len(), "more than 2 active instances");
        }
        actives
    }
}
