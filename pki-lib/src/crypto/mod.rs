// SPDX-FileCopyrightText: 2019-2024 Heiko Schaefer <heiko@schaefer.name>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Key generation, CSR/cert construction, and the DANE TLSA fingerprint.

mod at_rest;
mod keys;

pub use at_rest::{decrypt_key_pem, encrypt_key_pem, DbEncryptionKey};
pub use keys::{
    fingerprint_hex_upper, generate_csr, generate_leaf_cert, generate_self_signed_ca, load_ca,
    parse_validity, pem_from_der, CaKeyMaterial, GeneratedCsr, IssuedCert,
};
