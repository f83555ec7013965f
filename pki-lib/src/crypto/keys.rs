// SPDX-FileCopyrightText: 2019-2024 Heiko Schaefer <heiko@schaefer.name>
// SPDX-License-Identifier: GPL-3.0-or-later

use chrono::{DateTime, TimeZone, Utc};
use rcgen::{
    Certificate, CertificateParams, CustomExtension, DistinguishedName, DnType, IsCa, KeyPair,
    SanType, PKCS_ECDSA_P256_SHA256,
};
use rsa::pkcs8::EncodePrivateKey;
use rsa::RsaPrivateKey;
use sha2::{Digest, Sha256};
use time::{Duration, OffsetDateTime};
use x509_parser::certificate::X509Certificate;
use x509_parser::prelude::FromDer;

use crate::error::{PkiError, Result};
use crate::model::Algo;

/// id-pkix-ocsp-nocheck is not what we want; must-staple is
/// `1.3.6.1.5.5.7.1.24` (RFC 7633) as a boolean-less OCTET STRING.
const OID_TLS_FEATURE: &[u64] = &[1, 3, 6, 1, 5, 5, 7, 1, 24];

fn rsa_key_pair(bits: usize) -> Result<KeyPair> {
    let mut rng = rand::rngs::OsRng;
    let key = RsaPrivateKey::new(&mut rng, bits)
        .map_err(|e| PkiError::IssueFailure(format!("RSA key generation failed: {e}")))?;
    let der = key
        .to_pkcs8_der()
        .map_err(|e| PkiError::IssueFailure(format!("PKCS8 encoding failed: {e}")))?;
    KeyPair::from_der(der.as_bytes())
        .map_err(|e| PkiError::IssueFailure(format!("rcgen rejected RSA key: {e}")))
}

fn ec_key_pair() -> Result<KeyPair> {
    KeyPair::generate(&PKCS_ECDSA_P256_SHA256)
        .map_err(|e| PkiError::IssueFailure(format!("EC key generation failed: {e}")))
}

fn must_staple_extension() -> CustomExtension {
    // DER SEQUENCE containing one INTEGER 5 (status_request), per RFC 7633.
    CustomExtension::from_oid_content(OID_TLS_FEATURE, vec![0x30, 0x03, 0x02, 0x01, 0x05])
}

fn build_params(
    name: &str,
    altnames: &[String],
    validity_days: i64,
    ocsp_must_staple: bool,
) -> Result<CertificateParams> {
    let mut sans = vec![name.to_string()];
    sans.extend(altnames.iter().cloned());

    let mut params = CertificateParams::new(sans.clone());
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, name);
    params.distinguished_name = dn;
    params.subject_alt_names = sans
        .into_iter()
        .map(SanType::DnsName)
        .collect::<std::result::Result<_, _>>()
        .map_err(|_| PkiError::IssueFailure("invalid SAN".into()))?;

    let now = OffsetDateTime::now_utc();
    params.not_before = now;
    params.not_after = now + Duration::days(validity_days);

    if ocsp_must_staple {
        params.custom_extensions.push(must_staple_extension());
    }

    Ok(params)
}

pub struct CaKeyMaterial {
    cert: Certificate,
    pub cert_pem: String,
    pub key_pem: String,
    pub cert_der: Vec<u8>,
}

pub struct IssuedCert {
    pub cert_pem: String,
    pub key_pem: String,
    pub cert_der: Vec<u8>,
}

/// A fresh self-signed CA certificate, used by the local issuer (C3).
pub fn generate_self_signed_ca(subject: &str, rsa_bits: usize, validity_days: i64) -> Result<CaKeyMaterial> {
    let mut params = build_params(subject, &[], validity_days, false)?;
    params.is_ca = IsCa::Ca(rcgen::BasicConstraints::Unconstrained);
    params.key_pair = Some(rsa_key_pair(rsa_bits)?);

    let cert = Certificate::from_params(params)
        .map_err(|e| PkiError::IssueFailure(format!("CA cert construction failed: {e}")))?;
    let cert_der = cert
        .serialize_der()
        .map_err(|e| PkiError::IssueFailure(format!("CA cert serialization failed: {e}")))?;
    let cert_pem = cert
        .serialize_pem()
        .map_err(|e| PkiError::IssueFailure(format!("CA cert PEM serialization failed: {e}")))?;
    let key_pem = cert.serialize_private_key_pem();

    Ok(CaKeyMaterial { cert, cert_pem, key_pem, cert_der })
}

/// Reconstruct a signer from a previously persisted CA cert+key pair, so a
/// long-lived local CA is generated once (see [`generate_self_signed_ca`])
/// and reloaded on every later run instead of being regenerated.
pub fn load_ca(cert_pem: &str, key_pem: &str) -> Result<CaKeyMaterial> {
    let key_pair = KeyPair::from_pem(key_pem)
        .map_err(|e| PkiError::IssueFailure(format!("failed to parse stored CA key: {e}")))?;
    let params = CertificateParams::from_ca_cert_pem(cert_pem, key_pair)
        .map_err(|e| PkiError::IssueFailure(format!("failed to parse stored CA cert: {e}")))?;
    let cert = Certificate::from_params(params)
        .map_err(|e| PkiError::IssueFailure(format!("failed to rebuild CA signer: {e}")))?;
    let cert_der = cert
        .serialize_der()
        .map_err(|e| PkiError::IssueFailure(format!("CA cert serialization failed: {e}")))?;

    Ok(CaKeyMaterial { cert, cert_pem: cert_pem.to_string(), key_pem: key_pem.to_string(), cert_der })
}

/// Generate a leaf key pair, build a CSR-equivalent cert over `[name] ++
/// altnames`, and sign it with `ca`. Both RSA and EC key generation funnel
/// through this one entry point so callers never branch on algorithm.
pub fn generate_leaf_cert(
    name: &str,
    altnames: &[String],
    algo: Algo,
    rsa_bits: usize,
    validity_days: i64,
    ocsp_must_staple: bool,
    ca: &CaKeyMaterial,
) -> Result<IssuedCert> {
    let mut params = build_params(name, altnames, validity_days, ocsp_must_staple)?;
    params.is_ca = IsCa::NoCa;
    params.key_pair = Some(match algo {
        Algo::Rsa => rsa_key_pair(rsa_bits)?,
        Algo::Ec => ec_key_pair()?,
    });

    let cert = Certificate::from_params(params)
        .map_err(|e| PkiError::IssueFailure(format!("leaf cert construction failed: {e}")))?;
    let cert_der = cert
        .serialize_der_with_signer(&ca.cert)
        .map_err(|e| PkiError::IssueFailure(format!("leaf cert signing failed: {e}")))?;
    let cert_pem = pem_from_der("CERTIFICATE", &cert_der);
    let key_pem = cert.serialize_private_key_pem();

    Ok(IssuedCert { cert_pem, key_pem, cert_der })
}

pub fn pem_from_der(label: &str, der: &[u8]) -> String {
    let encoded = base64::encode(der);
    let mut body = String::new();
    for chunk in encoded.as_bytes().chunks(64) {
        body.push_str(std::str::from_utf8(chunk).unwrap());
        body.push('\n');
    }
    format!("-----BEGIN {label}-----\n{body}-----END {label}-----\n")
}

pub struct GeneratedCsr {
    pub key_pem: String,
    pub csr_der: Vec<u8>,
}

/// A key pair plus a PKCS#10 CSR over `[name] ++ altnames`, for submission
/// to an external CA (the ACME issuer, C4).
pub fn generate_csr(
    name: &str,
    altnames: &[String],
    algo: Algo,
    rsa_bits: usize,
) -> Result<GeneratedCsr> {
    let mut params = build_params(name, altnames, 1, false)?;
    params.key_pair = Some(match algo {
        Algo::Rsa => rsa_key_pair(rsa_bits)?,
        Algo::Ec => ec_key_pair()?,
    });

    let cert = Certificate::from_params(params)
        .map_err(|e| PkiError::IssueFailure(format!("CSR construction failed: {e}")))?;
    let csr_der = cert
        .serialize_request_der()
        .map_err(|e| PkiError::IssueFailure(format!("CSR serialization failed: {e}")))?;
    let key_pem = cert.serialize_private_key_pem();

    Ok(GeneratedCsr { key_pem, csr_der })
}

/// Uppercase hex SHA-256 fingerprint of a DER certificate: DANE TLSA
/// selector 0, matching type 1.
pub fn fingerprint_hex_upper(der: &[u8]) -> String {
    let digest = Sha256::digest(der);
    digest.iter().map(|b| format!("{b:02X}")).collect()
}

/// Read `notBefore`/`notAfter` out of a DER certificate, for an
/// externally-issued leaf whose validity window the CA never chose
/// (the ACME issuer, C4). `None` on anything unparseable; callers fall
/// back to a locally-computed window rather than failing issuance over it.
pub fn parse_validity(der: &[u8]) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let (_, cert) = X509Certificate::from_der(der).ok()?;
    let validity = cert.validity();
    let not_before = Utc.timestamp_opt(validity.not_before.timestamp(), 0).single()?;
    let not_after = Utc.timestamp_opt(validity.not_after.timestamp(), 0).single()?;
    Some((not_before, not_after))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_deterministic_and_uppercase() {
        let a = fingerprint_hex_upper(b"hello world");
        let b = fingerprint_hex_upper(b"hello world");
        assert_eq!(a, b);
        assert_eq!(a, a.to_uppercase());
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn fingerprint_differs_for_different_input() {
        assert_ne!(fingerprint_hex_upper(b"a"), fingerprint_hex_upper(b"b"));
    }

    #[test]
    fn parse_validity_reads_back_a_generated_cert() {
        let ca = generate_self_signed_ca("ca.example.org", 2048, 30).unwrap();
        let (not_before, not_after) = parse_validity(&ca.cert_der).unwrap();
        assert!(not_after > not_before);
        assert!((not_after - not_before).num_days() >= 29);
    }

    #[test]
    fn parse_validity_rejects_garbage() {
        assert!(parse_validity(b"not a certificate").is_none());
    }
}
