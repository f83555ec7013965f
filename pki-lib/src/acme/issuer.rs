// SPDX-FileCopyrightText: 2019-2024 Heiko Schaefer <heiko@schaefer.name>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Issuance phase of C4: generate a key, submit a CSR, load the returned
//! chain, dedupe the intermediate against an existing CA CI, persist.

use std::path::Path;

use chrono::{DateTime, Duration, Utc};

use crate::acme::client::AcmeClient;
use crate::config::{AcmeConfig, X509Config};
use crate::crypto::{fingerprint_hex_upper, generate_csr, parse_validity, pem_from_der};
use crate::error::{PkiError, Result};
use crate::model::{Algo, CertInstance, CertKeyStore, CertMeta, CiState, EncryptionAlgo};
use crate::store::PkiStoreWrite;
use crate::zone::ZoneControlHandle;

fn algos_for(encryption_algo: EncryptionAlgo) -> Vec<Algo> {
    match encryption_algo {
        EncryptionAlgo::Rsa => vec![Algo::Rsa],
        EncryptionAlgo::Ec => vec![Algo::Ec],
        EncryptionAlgo::RsaPlusEc => vec![Algo::Rsa, Algo::Ec],
    }
}

/// Look up an existing CA CI by intermediate fingerprint, or signal the
/// caller to create a new CA CM/CI (the `resolve_intermediate` cache named
/// in the supplemented features).
pub trait IntermediateCache {
    fn find_by_hash(&self, hash: &str) -> Result<Option<i32>>;
    fn store_new(&self, hash: &str, cert_pem: &str) -> Result<i32>;
}

pub struct AcmeIssuer<'a> {
    pub client: &'a dyn AcmeClient,
    pub acme_cfg: &'a AcmeConfig,
    pub x509: &'a X509Config,
}

/// The full C4 flow: runs the DNS-01 authorization (unless `authorized_until`
/// is already in the future), then issuance.
pub fn issue_acme(
    issuer: &AcmeIssuer,
    store: &dyn PkiStoreWrite,
    zone_root: &Path,
    include_name: &str,
    zones: &ZoneControlHandle,
    cm: &CertMeta,
    intermediates: &dyn IntermediateCache,
    now: DateTime<Utc>,
) -> Result<CertInstance> {
    let authorized_until = if cm.authorized_until.map(|t| t > now).unwrap_or(false) {
        cm.authorized_until.unwrap()
    } else {
        crate::acme::authorize(issuer.client, zone_root, include_name, zones, cm, issuer.acme_cfg)?
    };

    store.update_authorized_until(cm.row_id, Some(authorized_until), cm.cert_type)?;

    // CSR generation, the ACME round-trip, and intermediate resolution all
    // happen before any CI/CKS row is written, so a failure here never
    // reaches the store.
    let mut cksd = Vec::new();
    let mut ca_cert_ci = None;
    let mut not_after = now;

    for algo in algos_for(cm.encryption_algo) {
        let csr = generate_csr(&cm.name, &cm.altnames, algo, issuer.x509.rsa_bits as usize)?;
        let chain = issuer.client.issue_certificate(&csr.csr_der)?;

        let intermediate_hash = fingerprint_hex_upper(&chain.intermediate_der);
        let resolved_ca_ci = match intermediates.find_by_hash(&intermediate_hash)? {
            Some(id) => id,
            None => {
                let intermediate_pem = pem_from_der("CERTIFICATE", &chain.intermediate_der);
                intermediates.store_new(&intermediate_hash, &intermediate_pem)?
            }
        };
        ca_cert_ci = Some(resolved_ca_ci);

        let leaf_validity = parse_validity(&chain.certificate_der)
            .unwrap_or_else(|| (now, now + Duration::days(issuer.x509.validity_days)));
        not_after = leaf_validity.1;

        let cert_pem = pem_from_der("CERTIFICATE", &chain.certificate_der);
        cksd.push(CertKeyStore {
            algo,
            cert_pem,
            key_pem: csr.key_pem,
            hash: fingerprint_hex_upper(&chain.certificate_der),
        });
    }

    let ca_cert_ci = ca_cert_ci
        .ok_or_else(|| PkiError::IssueFailure(format!("no algorithm configured for {}", cm.name)))?;

    let reserved = CertInstance {
        row_id: None,
        state: CiState::Reserved,
        ocsp_must_staple: cm.ocsp_must_staple,
        not_before: now,
        not_after,
        ca_cert_ci: Some(ca_cert_ci),
        cksd: Default::default(),
    };
    let ci_row_id = store.persist_issued_instance(cm.row_id, &reserved, false, &cksd)?;

    Ok(CertInstance {
        row_id: Some(ci_row_id),
        state: CiState::Issued,
        ocsp_must_staple: reserved.ocsp_must_staple,
        not_before: now,
        not_after,
        ca_cert_ci: Some(ca_cert_ci),
        cksd: cksd.into_iter().map(|c| (c.algo, c)).collect(),
    })
}
