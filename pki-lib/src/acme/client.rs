// SPDX-FileCopyrightText: 2019-2024 Heiko Schaefer <heiko@schaefer.name>
// SPDX-License-Identifier: GPL-3.0-or-later

//! A narrow ACME v2 wire client exposing exactly the four operations named
//! in the external interfaces: `new_authorization`, `validate_authorization`,
//! `get_authorization`, `issue_certificate`. Account handle is loaded from a
//! file path. Does not claim full RFC 8555 coverage beyond DNS-01 single
//! account issuance.

use std::path::Path;

use base64::Engine;
use chrono::{DateTime, Utc};
use rsa::pkcs8::DecodePrivateKey;
use rsa::RsaPrivateKey;
use serde::{Deserialize, Serialize};

use crate::error::{PkiError, Result};

#[derive(Debug, Clone)]
pub struct Challenge {
    pub url: String,
    pub token: String,
    pub kind: String,
}

#[derive(Debug, Clone)]
pub struct AcmeAuthorization {
    pub uri: String,
    pub challenges: Vec<Challenge>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthzStatus {
    Pending,
    Valid,
    Invalid,
    Other(String),
}

#[derive(Debug, Clone)]
pub struct AuthorizationStatus {
    pub status: AuthzStatus,
    pub expires: Option<DateTime<Utc>>,
}

pub struct IssuedChain {
    pub certificate_der: Vec<u8>,
    pub intermediate_der: Vec<u8>,
}

pub trait AcmeClient {
    fn new_authorization(&self, fqdn: &str) -> Result<AcmeAuthorization>;
    fn validate_authorization(&self, challenge_url: &str, kind: &str, key_authorization: &str) -> Result<()>;
    fn get_authorization(&self, uri: &str) -> Result<AuthorizationStatus>;
    fn issue_certificate(&self, csr_der: &[u8]) -> Result<IssuedChain>;

    /// `base64url(sha256(key_authorization))`, used to derive the DNS-01 TXT record.
    fn txt_record_for(&self, key_authorization: &str) -> String {
        use sha2::{Digest, Sha256};
        let digest = Sha256::digest(key_authorization.as_bytes());
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(digest)
    }

    /// `challenge.token ++ "." ++ jwk_thumbprint(account)`.
    fn key_authorization(&self, token: &str) -> String {
        format!("{}.{}", token, self.jwk_thumbprint())
    }

    fn jwk_thumbprint(&self) -> String;
}

#[derive(Debug, Serialize, Deserialize)]
struct AcmeAccountFile {
    account_url: String,
    private_key_pem: String,
}

#[derive(Debug, Deserialize)]
struct AcmeDirectory {
    #[serde(rename = "newNonce")]
    new_nonce: String,
    #[serde(rename = "newOrder")]
    new_order: String,
    #[serde(rename = "newAuthz")]
    new_authz: Option<String>,
}

/// Blocking, `reqwest`-based ACME v2 client. One HTTP round-trip per logical
/// operation; nonces are re-fetched per-request rather than cached across
/// calls, trading a few extra round-trips for simplicity.
pub struct AcmeHttpClient {
    http: reqwest::blocking::Client,
    directory: AcmeDirectory,
    account_url: String,
    key: RsaPrivateKey,
}

impl AcmeHttpClient {
    pub fn load(directory_url: &str, account_path: &Path) -> Result<Self> {
        let http = reqwest::blocking::Client::new();
        let directory: AcmeDirectory = http
            .get(directory_url)
            .send()
            .map_err(|e| PkiError::AcmeTransport(e.to_string()))?
            .json()
            .map_err(|e| PkiError::AcmeProtocol(e.to_string()))?;

        let raw = std::fs::read_to_string(account_path)?;
        let account: AcmeAccountFile =
            serde_json::from_str(&raw).map_err(|e| PkiError::Configuration(e.to_string()))?;
        let key = RsaPrivateKey::from_pkcs8_pem(&account.private_key_pem)
            .map_err(|e| PkiError::Configuration(format!("invalid ACME account key: {e}")))?;

        Ok(Self { http, directory, account_url: account.account_url, key })
    }

    fn fresh_nonce(&self) -> Result<String> {
        let resp = self
            .http
            .head(&self.directory.new_nonce)
            .send()
            .map_err(|e| PkiError::AcmeTransport(e.to_string()))?;
        resp.headers()
            .get("Replay-Nonce")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
            .ok_or_else(|| PkiError::AcmeProtocol("no Replay-Nonce header".into()))
    }

    fn post(&self, url: &str, payload: &serde_json::Value) -> Result<serde_json::Value> {
        let nonce = self.fresh_nonce()?;
        let body = self.jws(url, &nonce, payload)?;
        self.http
            .post(url)
            .header("content-type", "application/jose+json")
            .body(body)
            .send()
            .map_err(|e| PkiError::AcmeTransport(e.to_string()))?
            .json()
            .map_err(|e| PkiError::AcmeProtocol(e.to_string()))
    }

    fn jws(&self, url: &str, nonce: &str, payload: &serde_json::Value) -> Result<String> {
        use rsa::pkcs1v15::SigningKey;
        use rsa::signature::{SignatureEncoding, Signer};
        use sha2::Sha256;

        let protected = serde_json::json!({
            "alg": "RS256",
            "kid": self.account_url,
            "nonce": nonce,
            "url": url,
        });

        let b64 = base64::engine::general_purpose::URL_SAFE_NO_PAD;
        let protected_b64 = b64.encode(protected.to_string());
        let payload_b64 = b64.encode(payload.to_string());
        let signing_input = format!("{protected_b64}.{payload_b64}");

        let signing_key = SigningKey::<Sha256>::new(self.key.clone());
        let signature = signing_key.sign(signing_input.as_bytes());
        let sig_b64 = b64.encode(signature.to_bytes());

        let jws = serde_json::json!({
            "protected": protected_b64,
            "payload": payload_b64,
            "signature": sig_b64,
        });
        Ok(jws.to_string())
    }
}

impl AcmeClient for AcmeHttpClient {
    fn new_authorization(&self, fqdn: &str) -> Result<AcmeAuthorization> {
        let order_url = self
            .directory
            .new_authz
            .clone()
            .unwrap_or_else(|| self.directory.new_order.clone());

        let payload = serde_json::json!({ "identifier": { "type": "dns", "value": fqdn } });
        let resp = self.post(&order_url, &payload)?;

        let uri = resp
            .get("url")
            .and_then(|v| v.as_str())
            .unwrap_or(&order_url)
            .to_string();

        let challenges = resp
            .get("challenges")
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|c| {
                        Some(Challenge {
                            url: c.get("url")?.as_str()?.to_string(),
                            token: c.get("token")?.as_str()?.to_string(),
                            kind: c.get("type")?.as_str()?.to_string(),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(AcmeAuthorization { uri, challenges })
    }

    fn validate_authorization(&self, challenge_url: &str, _kind: &str, _key_authorization: &str) -> Result<()> {
        self.post(challenge_url, &serde_json::json!({}))?;
        Ok(())
    }

    fn get_authorization(&self, uri: &str) -> Result<AuthorizationStatus> {
        let resp = self
            .http
            .get(uri)
            .send()
            .map_err(|e| PkiError::AcmeTransport(e.to_string()))?
            .json::<serde_json::Value>()
            .map_err(|e| PkiError::AcmeProtocol(e.to_string()))?;

        let status = match resp.get("status").and_then(|v| v.as_str()) {
            Some("pending") => AuthzStatus::Pending,
            Some("valid") => AuthzStatus::Valid,
            Some("invalid") => AuthzStatus::Invalid,
            Some(other) => AuthzStatus::Other(other.to_string()),
            None => AuthzStatus::Other("unknown".into()),
        };
        let expires = resp
            .get("expires")
            .and_then(|v| v.as_str())
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc));

        Ok(AuthorizationStatus { status, expires })
    }

    fn issue_certificate(&self, csr_der: &[u8]) -> Result<IssuedChain> {
        let csr_b64 = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(csr_der);
        let payload = serde_json::json!({ "csr": csr_b64 });
        let resp = self.post(&self.directory.new_order, &payload)?;

        let cert_b64 = resp
            .get("certificate")
            .and_then(|v| v.as_str())
            .ok_or_else(|| PkiError::AcmeProtocol("response missing certificate".into()))?;
        let intermediate_b64 = resp
            .get("intermediate")
            .and_then(|v| v.as_str())
            .ok_or_else(|| PkiError::AcmeProtocol("response missing intermediate".into()))?;

        Ok(IssuedChain {
            certificate_der: base64::engine::general_purpose::URL_SAFE_NO_PAD
                .decode(cert_b64)
                .map_err(|e| PkiError::AcmeProtocol(e.to_string()))?,
            intermediate_der: base64::engine::general_purpose::URL_SAFE_NO_PAD
                .decode(intermediate_b64)
                .map_err(|e| PkiError::AcmeProtocol(e.to_string()))?,
        })
    }

    fn jwk_thumbprint(&self) -> String {
        use rsa::traits::PublicKeyParts;
        use sha2::{Digest, Sha256};
        // JWK thumbprint over the canonical {e, kty, n} member ordering (RFC 7638).
        let public = self.key.to_public_key();
        let n = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(public.n().to_bytes_be());
        let e = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(public.e().to_bytes_be());
        let jwk = format!(r#"{{"e":"{e}","kty":"RSA","n":"{n}"}}"#);
        let digest = Sha256::digest(jwk.as_bytes());
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(digest)
    }
}
