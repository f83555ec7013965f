// SPDX-FileCopyrightText: 2019-2024 Heiko Schaefer <heiko@schaefer.name>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Server-side PKI lifecycle manager: issuance (local CA or ACME DNS-01),
//! persistence, DANE TLSA publication, and SFTP distribution to target
//! hosts and BSD jails.

#[macro_use]
extern crate diesel;

pub mod acme;
pub mod config;
pub mod crypto;
pub mod db;
pub mod dist;
pub mod error;
pub mod issue_local;
pub mod lifecycle;
pub mod model;
pub mod registry;
pub mod ssh;
pub mod store;
pub mod zone;

pub use config::PkiConfig;
pub use error::{PkiError, Result};
pub use lifecycle::Coordinator;
pub use registry::Registry;

use crate::db::Db;
use crate::store::PgStore;

/// Top-level handle: opens the store and holds the process-wide identity
/// registry. Callers build a [`lifecycle::Coordinator`] from its pieces for
/// each operation, the way the source builds a `Pathes`/`Certificate`
/// context once per run.
pub struct Pki {
    pub store: PgStore,
    pub registry: Registry,
    pub config: PkiConfig,
}

impl Pki {
    pub fn open(config: PkiConfig) -> Result<Self> {
        let db = Db::connect(&config.database_url)?;
        let store = PgStore::new(db, config.db_encryption_passphrase.as_deref());
        Ok(Self { store, registry: Registry::new(), config })
    }
}
