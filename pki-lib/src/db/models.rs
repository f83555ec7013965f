// SPDX-FileCopyrightText: 2019-2024 Heiko Schaefer <heiko@schaefer.name>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Row-shaped structs for the tables in [`crate::db::schema`]. Translation
//! between these rows and the domain types in [`crate::model`] happens in
//! [`crate::store`].

use chrono::NaiveDateTime;
use diesel::{Insertable, Queryable};

use crate::db::schema::*;

#[derive(Debug, Clone, Queryable)]
pub struct SubjectRow {
    pub id: i32,
    pub name: String,
    pub cert_type: String,
    pub subject_type: String,
    pub encryption_algo: String,
    pub ocsp_must_staple: bool,
    pub disabled: bool,
    pub authorized_until: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, Queryable)]
pub struct AltnameRow {
    pub id: i32,
    pub subject_id: i32,
    pub altname: String,
}

#[derive(Debug, Clone, Queryable)]
pub struct TlsaPrefixRow {
    pub id: i32,
    pub subject_id: i32,
    pub prefix: String,
}

#[derive(Debug, Clone, Queryable)]
pub struct TargetRow {
    pub id: i32,
    pub subject_id: i32,
    pub fqdn: String,
    pub jailroot: String,
}

#[derive(Debug, Clone, Queryable)]
pub struct DisthostRow {
    pub id: i32,
    pub target_id: i32,
    pub fqdn: String,
}

#[derive(Debug, Clone, Queryable)]
pub struct JailRow {
    pub id: i32,
    pub disthost_id: i32,
    pub name: String,
}

#[derive(Debug, Clone, Queryable)]
pub struct PlaceRow {
    pub id: i32,
    pub jail_id: i32,
    pub name: String,
    pub cert_file_type: String,
    pub cert_path: String,
    pub key_path: Option<String>,
    pub uid: i32,
    pub gid: i32,
    pub mode: i32,
    pub chown_both: bool,
    pub pg_link: bool,
    pub reload_command: Option<String>,
}

#[derive(Debug, Clone, Queryable)]
pub struct CertInstanceRow {
    pub id: i32,
    pub subject_id: i32,
    pub state: String,
    pub ocsp_must_staple: bool,
    pub not_before: NaiveDateTime,
    pub not_after: NaiveDateTime,
    pub ca_cert_ci: Option<i32>,
}

#[derive(Debug, Clone, Insertable)]
#[table_name = "cert_instances"]
pub struct NewCertInstance {
    pub subject_id: i32,
    pub state: String,
    pub ocsp_must_staple: bool,
    pub not_before: NaiveDateTime,
    pub not_after: NaiveDateTime,
    pub ca_cert_ci: Option<i32>,
}

#[derive(Debug, Clone, Queryable)]
pub struct CertKeyDataRow {
    pub id: i32,
    pub cert_instance_id: i32,
    pub algo: String,
    pub cert_pem: String,
    pub key_pem: String,
    pub hash: String,
}

#[derive(Debug, Clone, Insertable)]
#[table_name = "cert_key_data"]
pub struct NewCertKeyData {
    pub cert_instance_id: i32,
    pub algo: String,
    pub cert_pem: String,
    pub key_pem: String,
    pub hash: String,
}
