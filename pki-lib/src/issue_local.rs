// SPDX-FileCopyrightText: 2019-2024 Heiko Schaefer <heiko@schaefer.name>
// SPDX-License-Identifier: GPL-3.0-or-later

//! The local issuer (C3): generates a key pair + cert signed by the CM's
//! configured local CA, producing a new CI in `issued` state.

use chrono::{Duration, Utc};

use crate::config::X509Config;
use crate::crypto::{fingerprint_hex_upper, generate_leaf_cert, CaKeyMaterial};
use crate::error::{PkiError, Result};
use crate::model::{Algo, CertInstance, CertKeyStore, CertMeta, CiState, EncryptionAlgo};
use crate::store::PkiStoreWrite;

/// Algorithms implied by a CM's `encryption_algo`.
fn algos_for(encryption_algo: EncryptionAlgo) -> Vec<Algo> {
    match encryption_algo {
        EncryptionAlgo::Rsa => vec![Algo::Rsa],
        EncryptionAlgo::Ec => vec![Algo::Ec],
        EncryptionAlgo::RsaPlusEc => vec![Algo::Rsa, Algo::Ec],
    }
}

/// Issue a new local CI for `cm`, signed by `ca`. `ca_cert_ci` is the row id
/// of the CA's own CI (for a CA's self-signed CI, its own id, assigned by
/// the caller after persistence). Key generation and signing happen before
/// any write reaches the store; the CI and its CKS rows are then persisted
/// in the single read-write transaction `persist_issued_instance` runs, so
/// a signing failure never touches the database and a persistence failure
/// never leaves a partial row behind.
pub fn issue_local(
    store: &dyn PkiStoreWrite,
    cm: &CertMeta,
    ca: &CaKeyMaterial,
    ca_cert_ci: i32,
    x509: &X509Config,
) -> Result<CertInstance> {
    let not_before = Utc::now();
    let not_after = not_before + Duration::days(x509.validity_days);

    let reserved = CertInstance {
        row_id: None,
        state: CiState::Reserved,
        ocsp_must_staple: cm.ocsp_must_staple,
        not_before,
        not_after,
        ca_cert_ci: Some(ca_cert_ci),
        cksd: Default::default(),
    };

    // Key generation and signing happen entirely in memory, before anything
    // touches the database, so a signing failure never reaches the store.
    let mut cksd = Vec::new();
    for algo in algos_for(cm.encryption_algo) {
        let issued = generate_leaf_cert(
            &cm.name,
            &cm.altnames,
            algo,
            x509.rsa_bits as usize,
            x509.validity_days,
            cm.ocsp_must_staple,
            ca,
        )
        .map_err(|e| PkiError::IssueFailure(e.to_string()))?;

        cksd.push(CertKeyStore {
            algo,
            cert_pem: issued.cert_pem,
            key_pem: issued.key_pem,
            hash: fingerprint_hex_upper(&issued.cert_der),
        });
    }

    let ci_row_id = store.persist_issued_instance(cm.row_id, &reserved, false, &cksd)?;

    Ok(CertInstance {
        row_id: Some(ci_row_id),
        state: CiState::Issued,
        ocsp_must_staple: reserved.ocsp_must_staple,
        not_before,
        not_after,
        ca_cert_ci: reserved.ca_cert_ci,
        cksd: cksd.into_iter().map(|c| (c.algo, c)).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn algos_for_matches_encryption_algo() {
        assert_eq!(algos_for(EncryptionAlgo::Rsa), vec![Algo::Rsa]);
        assert_eq!(algos_for(EncryptionAlgo::Ec), vec![Algo::Ec]);
        assert_eq!(algos_for(EncryptionAlgo::RsaPlusEc), vec![Algo::Rsa, Algo::Ec]);
    }
}
