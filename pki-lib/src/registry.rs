// SPDX-FileCopyrightText: 2019-2024 Heiko Schaefer <heiko@schaefer.name>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Process-wide identity maps for CMs and CKS, replacing the source's
//! module-level `cert_metas` dict and hash-keyed key-store cache with an
//! explicit, owned component with clear init/teardown semantics.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::error::{PkiError, Result};
use crate::model::CertMeta;
use crate::store::PkiStoreRead;

/// Enforces invariants 1 and 3 of the testable properties: at most one CM
/// per `(store, name)`, at most one CKS per hash.
pub struct Registry {
    cert_metas: RefCell<HashMap<String, Rc<RefCell<CertMeta>>>>,
    cks_hashes: RefCell<HashMap<String, ()>>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            cert_metas: RefCell::new(HashMap::new()),
            cks_hashes: RefCell::new(HashMap::new()),
        }
    }

    /// Return the singleton in-memory CM for `name`, loading it from `store`
    /// on first access. Subsequent calls return the same object.
    pub fn cert_meta(
        &self,
        store: &dyn PkiStoreRead,
        name: &str,
    ) -> Result<Rc<RefCell<CertMeta>>> {
        if let Some(cm) = self.cert_metas.borrow().get(name) {
            return Ok(Rc::clone(cm));
        }

        let cm = store.load_cert_meta(name)?;
        let rc = Rc::new(RefCell::new(cm));
        self.cert_metas.borrow_mut().insert(name.to_string(), Rc::clone(&rc));
        Ok(rc)
    }

    /// Register a CKS hash as now in use; fails if another CKS already claims it.
    pub fn register_cks_hash(&self, hash: &str) -> Result<()> {
        let mut hashes = self.cks_hashes.borrow_mut();
        if hashes.contains_key(hash) {
            return Err(PkiError::PersistenceFailure(format!(
                "duplicate cert key store hash {hash}"
            )));
        }
        hashes.insert(hash.to_string(), ());
        Ok(())
    }

    pub fn forget(&self, name: &str) {
        self.cert_metas.borrow_mut().remove(name);
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_cks_hash_rejects_duplicates() {
        let reg = Registry::new();
        reg.register_cks_hash("ABC").unwrap();
        assert!(reg.register_cks_hash("ABC").is_err());
    }
}
