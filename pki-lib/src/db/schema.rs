// SPDX-FileCopyrightText: 2019-2024 Heiko Schaefer <heiko@schaefer.name>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Diesel table definitions mirroring the relational schema named in the
//! external interfaces: `Certificates`, `Subjects`, `Services`,
//! `Certificates_Services`, `Targets`, `Disthosts`, `Jails`, `Places`,
//! `CertInstances`, `CertKeyData`.

table! {
    subjects (id) {
        id -> Integer,
        name -> Text,
        cert_type -> Text,
        subject_type -> Text,
        encryption_algo -> Text,
        ocsp_must_staple -> Bool,
        disabled -> Bool,
        authorized_until -> Nullable<Timestamp>,
    }
}

table! {
    certificates (id) {
        id -> Integer,
        subject_id -> Integer,
        altname -> Text,
    }
}

table! {
    tlsa_prefixes (id) {
        id -> Integer,
        subject_id -> Integer,
        prefix -> Text,
    }
}

table! {
    services (id) {
        id -> Integer,
        name -> Text,
    }
}

table! {
    certificates_services (id) {
        id -> Integer,
        subject_id -> Integer,
        service_id -> Integer,
    }
}

table! {
    targets (id) {
        id -> Integer,
        subject_id -> Integer,
        fqdn -> Text,
        jailroot -> Text,
    }
}

table! {
    disthosts (id) {
        id -> Integer,
        target_id -> Integer,
        fqdn -> Text,
    }
}

table! {
    jails (id) {
        id -> Integer,
        disthost_id -> Integer,
        name -> Text,
    }
}

table! {
    places (id) {
        id -> Integer,
        jail_id -> Integer,
        name -> Text,
        cert_file_type -> Text,
        cert_path -> Text,
        key_path -> Nullable<Text>,
        uid -> Integer,
        gid -> Integer,
        mode -> Integer,
        chown_both -> Bool,
        pg_link -> Bool,
        reload_command -> Nullable<Text>,
    }
}

table! {
    cert_instances (id) {
        id -> Integer,
        subject_id -> Integer,
        state -> Text,
        ocsp_must_staple -> Bool,
        not_before -> Timestamp,
        not_after -> Timestamp,
        ca_cert_ci -> Nullable<Integer>,
    }
}

table! {
    cert_key_data (id) {
        id -> Integer,
        cert_instance_id -> Integer,
        algo -> Text,
        cert_pem -> Text,
        key_pem -> Text,
        hash -> Text,
    }
}

joinable!(certificates -> subjects (subject_id));
joinable!(tlsa_prefixes -> subjects (subject_id));
joinable!(certificates_services -> subjects (subject_id));
joinable!(certificates_services -> services (service_id));
joinable!(targets -> subjects (subject_id));
joinable!(disthosts -> targets (target_id));
joinable!(jails -> disthosts (disthost_id));
joinable!(places -> jails (jail_id));
joinable!(cert_instances -> subjects (subject_id));
joinable!(cert_key_data -> cert_instances (cert_instance_id));

allow_tables_to_appear_in_same_query!(
    subjects,
    certificates,
    tlsa_prefixes,
    services,
    certificates_services,
    targets,
    disthosts,
    jails,
    places,
    cert_instances,
    cert_key_data,
);
