// SPDX-FileCopyrightText: 2019-2024 Heiko Schaefer <heiko@schaefer.name>
// SPDX-License-Identifier: GPL-3.0-or-later

//! The store adapter (C2): parameterised queries against the relational
//! store, wrapped in the right transaction isolation, translating between
//! DB rows ([`crate::db::models`]) and the domain model ([`crate::model`]).

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, NaiveDateTime, Utc};

use crate::crypto::{decrypt_key_pem, encrypt_key_pem, DbEncryptionKey};
use crate::db::models::{NewCertInstance, NewCertKeyData};
use crate::db::{Db, Isolation};
use crate::error::{PkiError, Result};
use crate::model::{
    Algo, CertFileType, CertInstance, CertKeyStore, CertMeta, CertType, CiState, DistHost,
    EncryptionAlgo, Jail, Place, SubjectType,
};

pub trait PkiStoreRead {
    fn load_cert_meta(&self, name: &str) -> Result<CertMeta>;
    fn list_cert_meta_names(&self) -> Result<Vec<String>>;
}

pub trait PkiStoreWrite {
    fn insert_cert_instance(
        &self,
        subject_id: i32,
        ci: &CertInstance,
        is_ca: bool,
    ) -> Result<i32>;
    fn update_cert_instance_state(&self, ci_row_id: i32, state: CiState) -> Result<()>;
    fn delete_cert_instance(&self, ci_row_id: i32) -> Result<()>;
    fn insert_cert_key_data(&self, ci_row_id: i32, cks: &CertKeyStore) -> Result<()>;
    fn update_authorized_until(
        &self,
        subject_id: i32,
        authorized_until: Option<DateTime<Utc>>,
        cert_type: CertType,
    ) -> Result<()>;

    /// Persist a freshly issued instance as one atomic unit: the CI insert,
    /// every CKS insert, and the transition from `reserved` to `issued`. The
    /// default composes the primitives above non-transactionally, which is
    /// adequate for in-memory test fakes; [`PgStore`] overrides it with a
    /// single serializable read-write transaction so a crash or error
    /// between steps can never leave an orphaned `reserved` row.
    fn persist_issued_instance(
        &self,
        subject_id: i32,
        reserved: &CertInstance,
        is_ca: bool,
        cksd: &[CertKeyStore],
    ) -> Result<i32> {
        let ci_row_id = self.insert_cert_instance(subject_id, reserved, is_ca)?;
        for cks in cksd {
            self.insert_cert_key_data(ci_row_id, cks)?;
        }
        self.update_cert_instance_state(ci_row_id, CiState::Issued)?;
        Ok(ci_row_id)
    }
}

pub trait PkiStoreRW: PkiStoreRead + PkiStoreWrite {}

pub struct PgStore {
    db: Db,
    encryption_key: Option<DbEncryptionKey>,
}

impl PgStore {
    pub fn new(db: Db, db_encryption_passphrase: Option<&str>) -> Self {
        Self { db, encryption_key: db_encryption_passphrase.map(DbEncryptionKey::derive) }
    }
}

impl PkiStoreRW for PgStore {}

fn parse_cert_type(s: &str) -> Result<CertType> {
    match s {
        "LE" => Ok(CertType::Le),
        "local" => Ok(CertType::Local),
        other => Err(PkiError::Configuration(format!("unknown cert_type {other}"))),
    }
}

fn parse_subject_type(s: &str) -> Result<SubjectType> {
    match s {
        "CA" => Ok(SubjectType::Ca),
        "client" => Ok(SubjectType::Client),
        "server" => Ok(SubjectType::Server),
        "reserved" => Ok(SubjectType::Reserved),
        other => Err(PkiError::Configuration(format!("unknown subject_type {other}"))),
    }
}

fn parse_encryption_algo(s: &str) -> Result<EncryptionAlgo> {
    match s {
        "rsa" => Ok(EncryptionAlgo::Rsa),
        "ec" => Ok(EncryptionAlgo::Ec),
        "rsa+ec" => Ok(EncryptionAlgo::RsaPlusEc),
        other => Err(PkiError::Configuration(format!("unknown encryption_algo {other}"))),
    }
}

fn parse_cert_file_type(s: &str) -> Result<CertFileType> {
    match s {
        "cert only" => Ok(CertFileType::CertOnly),
        "separate" => Ok(CertFileType::Separate),
        "combine key" => Ok(CertFileType::CombineKey),
        "combine cacert" => Ok(CertFileType::CombineCacert),
        "combine both" => Ok(CertFileType::CombineBoth),
        other => Err(PkiError::Configuration(format!("unknown cert_file_type {other}"))),
    }
}

fn parse_ci_state(s: &str) -> Result<CiState> {
    match s {
        "reserved" => Ok(CiState::Reserved),
        "issued" => Ok(CiState::Issued),
        "prepublished" => Ok(CiState::Prepublished),
        "deployed" => Ok(CiState::Deployed),
        "revoked" => Ok(CiState::Revoked),
        "expired" => Ok(CiState::Expired),
        "archived" => Ok(CiState::Archived),
        other => Err(PkiError::Configuration(format!("unknown instance state {other}"))),
    }
}

fn ci_state_str(s: CiState) -> &'static str {
    match s {
        CiState::Reserved => "reserved",
        CiState::Issued => "issued",
        CiState::Prepublished => "prepublished",
        CiState::Deployed => "deployed",
        CiState::Revoked => "revoked",
        CiState::Expired => "expired",
        CiState::Archived => "archived",
    }
}

fn algo_str(a: Algo) -> &'static str {
    match a {
        Algo::Rsa => "rsa",
        Algo::Ec => "ec",
    }
}

fn parse_algo(s: &str) -> Result<Algo> {
    match s {
        "rsa" => Ok(Algo::Rsa),
        "ec" => Ok(Algo::Ec),
        other => Err(PkiError::Configuration(format!("unknown algo {other}"))),
    }
}

fn naive_to_utc(n: NaiveDateTime) -> DateTime<Utc> {
    DateTime::from_utc(n, Utc)
}

fn utc_to_naive(d: DateTime<Utc>) -> NaiveDateTime {
    d.naive_utc()
}

impl PkiStoreRead for PgStore {
    fn load_cert_meta(&self, name: &str) -> Result<CertMeta> {
        self.db.transaction(Isolation::SerializableReadOnly, |conn| {
            let subject = self
                .db
                .subject_by_name(conn, name)?
                .ok_or_else(|| PkiError::Configuration(format!("no such subject {name}")))?;

            let altnames: Vec<String> = self
                .db
                .altnames(conn, subject.id)?
                .into_iter()
                .map(|r| r.altname)
                .collect();

            let tlsa_prefixes: BTreeSet<String> = self
                .db
                .tlsa_prefixes(conn, subject.id)?
                .into_iter()
                .map(|r| r.prefix)
                .collect();

            let mut disthosts: BTreeMap<String, DistHost> = BTreeMap::new();
            for target in self.db.targets(conn, subject.id)? {
                for dh_row in self.db.disthosts(conn, target.id)? {
                    let mut dist_host = DistHost {
                        jailroot: target.jailroot.clone(),
                        jails: BTreeMap::new(),
                    };
                    let jail_rows = self.db.jails(conn, dh_row.id)?;
                    let jail_count = jail_rows.len();
                    for jail_row in jail_rows {
                        if jail_row.name.is_empty() && jail_count > 1 {
                            tracing::warn!(
                                disthost = %dh_row.fqdn,
                                "empty jail name alongside named jails on the same disthost"
                            );
                        }

                        let mut places = BTreeMap::new();
                        for place_row in self.db.places(conn, jail_row.id)? {
                            places.insert(
                                place_row.name.clone(),
                                Place {
                                    name: place_row.name,
                                    cert_file_type: parse_cert_file_type(&place_row.cert_file_type)?,
                                    cert_path: place_row.cert_path,
                                    key_path: place_row.key_path,
                                    uid: place_row.uid as u32,
                                    gid: place_row.gid as u32,
                                    mode: place_row.mode as u32,
                                    chown_both: place_row.chown_both,
                                    pg_link: place_row.pg_link,
                                    reload_command: place_row.reload_command,
                                },
                            );
                        }
                        if places.is_empty() {
                            tracing::warn!(
                                disthost = %dh_row.fqdn, jail = %jail_row.name,
                                "missing place in disthost"
                            );
                        }
                        dist_host.jails.insert(jail_row.name.clone(), Jail { name: jail_row.name, places });
                    }
                    disthosts.insert(dh_row.fqdn, dist_host.clone());
                }
            }

            let mut instances = Vec::new();
            for ci_row_id in self.db.list_instances(conn, subject.id)? {
                if let Some((ci_row, cks_rows)) = self.db.load_instance(conn, ci_row_id)? {
                    let mut cksd = BTreeMap::new();
                    for cks_row in cks_rows {
                        cksd.insert(
                            parse_algo(&cks_row.algo)?,
                            CertKeyStore {
                                algo: parse_algo(&cks_row.algo)?,
                                cert_pem: cks_row.cert_pem,
                                key_pem: decrypt_key_pem(self.encryption_key.as_ref(), &cks_row.key_pem)?,
                                hash: cks_row.hash,
                            },
                        );
                    }
                    instances.push(CertInstance {
                        row_id: Some(ci_row.id),
                        state: parse_ci_state(&ci_row.state)?,
                        ocsp_must_staple: ci_row.ocsp_must_staple,
                        not_before: naive_to_utc(ci_row.not_before),
                        not_after: naive_to_utc(ci_row.not_after),
                        ca_cert_ci: ci_row.ca_cert_ci,
                        cksd,
                    });
                }
            }

            Ok(CertMeta {
                row_id: subject.id,
                name: subject.name,
                cert_type: parse_cert_type(&subject.cert_type)?,
                subject_type: parse_subject_type(&subject.subject_type)?,
                encryption_algo: parse_encryption_algo(&subject.encryption_algo)?,
                ocsp_must_staple: subject.ocsp_must_staple,
                disabled: subject.disabled,
                authorized_until: subject.authorized_until.map(naive_to_utc),
                altnames,
                tlsa_prefixes,
                disthosts,
                instances,
            })
        })
    }

    fn list_cert_meta_names(&self) -> Result<Vec<String>> {
        let conn = self.db.conn()?;
        self.db.all_subject_names(&conn)
    }
}

/// Dedupes ACME intermediates against previously persisted cert instances by
/// fingerprint, storing any newly seen one under a dedicated holder subject
/// so it can be referenced as `ca_cert_ci` by leaf CIs it has signed.
pub struct StoreIntermediateCache<'a> {
    pub store: &'a PgStore,
    pub holder_subject_id: i32,
}

impl<'a> crate::acme::issuer::IntermediateCache for StoreIntermediateCache<'a> {
    fn find_by_hash(&self, hash: &str) -> Result<Option<i32>> {
        let conn = self.store.db.conn()?;
        self.store.db.cert_instance_id_by_cks_hash(&conn, hash)
    }

    fn store_new(&self, hash: &str, cert_pem: &str) -> Result<i32> {
        let holder_subject_id = self.holder_subject_id;
        let cert_pem = cert_pem.to_string();
        let hash = hash.to_string();
        self.store.db.transaction(Isolation::SerializableReadWrite, move |conn| {
            let now = utc_to_naive(Utc::now());
            let new = NewCertInstance {
                subject_id: holder_subject_id,
                state: ci_state_str(CiState::Issued).to_string(),
                ocsp_must_staple: false,
                not_before: now,
                not_after: now,
                ca_cert_ci: None,
            };
            let ci_row_id = self.store.db.insert_cert_instance(conn, new)?;
            self.store.db.insert_cert_key_data(
                conn,
                NewCertKeyData {
                    cert_instance_id: ci_row_id,
                    algo: algo_str(Algo::Rsa).to_string(),
                    cert_pem: cert_pem.clone(),
                    key_pem: String::new(),
                    hash: hash.clone(),
                },
            )?;
            Ok(ci_row_id)
        })
    }
}

impl PkiStoreWrite for PgStore {
    fn insert_cert_instance(&self, subject_id: i32, ci: &CertInstance, is_ca: bool) -> Result<i32> {
        let conn = self.db.conn()?;
        let new = NewCertInstance {
            subject_id,
            state: ci_state_str(ci.state).to_string(),
            ocsp_must_staple: ci.ocsp_must_staple,
            not_before: utc_to_naive(ci.not_before),
            not_after: utc_to_naive(ci.not_after),
            ca_cert_ci: ci.ca_cert_ci,
        };
        if is_ca {
            self.db.insert_cacert_instance(&conn, new)
        } else {
            self.db.insert_cert_instance(&conn, new)
        }
    }

    fn update_cert_instance_state(&self, ci_row_id: i32, state: CiState) -> Result<()> {
        let conn = self.db.conn()?;
        self.db.update_cert_instance(&conn, ci_row_id, ci_state_str(state))
    }

    fn delete_cert_instance(&self, ci_row_id: i32) -> Result<()> {
        let conn = self.db.conn()?;
        self.db.delete_cert_instance(&conn, ci_row_id)
    }

    fn insert_cert_key_data(&self, ci_row_id: i32, cks: &CertKeyStore) -> Result<()> {
        let conn = self.db.conn()?;
        self.db.insert_cert_key_data(
            &conn,
            NewCertKeyData {
                cert_instance_id: ci_row_id,
                algo: algo_str(cks.algo).to_string(),
                cert_pem: cks.cert_pem.clone(),
                key_pem: encrypt_key_pem(self.encryption_key.as_ref(), &cks.key_pem)?,
                hash: cks.hash.clone(),
            },
        )?;
        Ok(())
    }

    fn update_authorized_until(
        &self,
        subject_id: i32,
        authorized_until: Option<DateTime<Utc>>,
        cert_type: CertType,
    ) -> Result<()> {
        if authorized_until.is_none() && !matches!(cert_type, CertType::Local) {
            return Err(PkiError::Configuration(
                "authorized_until may only be cleared for cert_type=local".into(),
            ));
        }
        let conn = self.db.conn()?;
        self.db.update_authorized_until(&conn, subject_id, authorized_until.map(utc_to_naive))
    }

    /// The one serializable read-write transaction spec.md §2 requires:
    /// the CI insert, every CKS insert (key material encrypted per-row if
    /// configured), and the `reserved` -> `issued` transition all commit or
    /// roll back together.
    fn persist_issued_instance(
        &self,
        subject_id: i32,
        reserved: &CertInstance,
        is_ca: bool,
        cksd: &[CertKeyStore],
    ) -> Result<i32> {
        self.db.transaction(Isolation::SerializableReadWrite, |conn| {
            let new = NewCertInstance {
                subject_id,
                state: ci_state_str(reserved.state).to_string(),
                ocsp_must_staple: reserved.ocsp_must_staple,
                not_before: utc_to_naive(reserved.not_before),
                not_after: utc_to_naive(reserved.not_after),
                ca_cert_ci: reserved.ca_cert_ci,
            };
            let ci_row_id = if is_ca {
                self.db.insert_cacert_instance(conn, new)?
            } else {
                self.db.insert_cert_instance(conn, new)?
            };

            for cks in cksd {
                self.db.insert_cert_key_data(
                    conn,
                    NewCertKeyData {
                        cert_instance_id: ci_row_id,
                        algo: algo_str(cks.algo).to_string(),
                        cert_pem: cks.cert_pem.clone(),
                        key_pem: encrypt_key_pem(self.encryption_key.as_ref(), &cks.key_pem)?,
                        hash: cks.hash.clone(),
                    },
                )?;
            }

            self.db.update_cert_instance(conn, ci_row_id, ci_state_str(CiState::Issued))?;
            Ok(ci_row_id)
        })
    }
}
