// SPDX-FileCopyrightText: 2019-2024 Heiko Schaefer <heiko@schaefer.name>
// SPDX-License-Identifier: GPL-3.0-or-later

//! The filename planner: a total function of `(subject, subject_type, algo,
//! cert_file_type)` returning a tagged enum, not a string the caller must
//! substring-match for `"key"`.

use crate::model::{Algo, CertFileType, CertType, SubjectType};

/// One file to write to the target host.
#[derive(Debug, Clone)]
pub struct PlannedFile {
    pub filename: String,
    pub content: Vec<u8>,
    /// Whether this file carries private key material — determines mode
    /// 0400 + chown treatment in the transfer layer.
    pub contains_key_material: bool,
    pub destination: Destination,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    /// `cert_path`, with `key_path` substituted in when the place sets one
    /// and this file is key-only.
    CertDir,
    KeyDir,
}

fn subject_type_str(t: SubjectType) -> &'static str {
    match t {
        SubjectType::Ca => "ca",
        SubjectType::Client => "client",
        SubjectType::Server => "server",
        SubjectType::Reserved => "reserved",
    }
}

fn base(subject: &str, subject_type: SubjectType, algo: Algo) -> String {
    let t = subject_type_str(subject_type);
    let a = match algo {
        Algo::Rsa => "",
        Algo::Ec => "_ec",
    };
    format!("{subject}_{t}{a}")
}

/// Plan the files written for one place / algorithm combination, given the
/// cert, key, and (if `cert_type=LE`) the CA chain material.
pub fn plan_files(
    subject: &str,
    subject_type: SubjectType,
    algo: Algo,
    cert_file_type: CertFileType,
    cert_type: CertType,
    key_pem: &[u8],
    cert_pem: &[u8],
    cacert_pem: &[u8],
    key_path_set: bool,
) -> Vec<PlannedFile> {
    let b = base(subject, subject_type, algo);
    let mut files = Vec::new();

    let concat = |parts: &[&[u8]]| -> Vec<u8> {
        let mut out = Vec::new();
        for p in parts {
            out.extend_from_slice(p);
        }
        out
    };

    match cert_file_type {
        CertFileType::Separate => {
            files.push(PlannedFile {
                filename: format!("{b}_key.pem"),
                content: key_pem.to_vec(),
                contains_key_material: true,
                destination: Destination::KeyDir,
            });
            files.push(PlannedFile {
                filename: format!("{b}_cert.pem"),
                content: cert_pem.to_vec(),
                contains_key_material: false,
                destination: Destination::CertDir,
            });
            if matches!(cert_type, CertType::Le) {
                files.push(PlannedFile {
                    filename: format!("{b}_cert_cacert_chain.pem"),
                    content: concat(&[cert_pem, cacert_pem]),
                    contains_key_material: false,
                    destination: Destination::CertDir,
                });
            }
        }
        CertFileType::CombineKey => {
            if key_path_set {
                files.push(PlannedFile {
                    filename: format!("{b}_key.pem"),
                    content: key_pem.to_vec(),
                    contains_key_material: true,
                    destination: Destination::KeyDir,
                });
            }
            files.push(PlannedFile {
                filename: format!("{b}_key_cert.pem"),
                content: concat(&[key_pem, cert_pem]),
                contains_key_material: true,
                destination: Destination::CertDir,
            });
            if matches!(cert_type, CertType::Le) {
                files.push(PlannedFile {
                    filename: format!("{b}_cert_cacert_chain.pem"),
                    content: concat(&[cert_pem, cacert_pem]),
                    contains_key_material: false,
                    destination: Destination::CertDir,
                });
            }
        }
        CertFileType::CombineBoth => {
            files.push(PlannedFile {
                filename: format!("{b}_key_cert_cacert.pem"),
                content: concat(&[key_pem, cert_pem, cacert_pem]),
                contains_key_material: true,
                destination: Destination::CertDir,
            });
        }
        CertFileType::CombineCacert => {
            files.push(PlannedFile {
                filename: format!("{b}_key.pem"),
                content: key_pem.to_vec(),
                contains_key_material: true,
                destination: Destination::CertDir,
            });
            files.push(PlannedFile {
                filename: format!("{b}_cert_cacert.pem"),
                content: concat(&[cert_pem, cacert_pem]),
                contains_key_material: false,
                destination: Destination::CertDir,
            });
        }
        CertFileType::CertOnly => {
            files.push(PlannedFile {
                filename: format!("{b}_cert.pem"),
                content: cert_pem.to_vec(),
                contains_key_material: false,
                destination: Destination::CertDir,
            });
        }
    }

    files
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(files: &[PlannedFile]) -> Vec<String> {
        files.iter().map(|f| f.filename.clone()).collect()
    }

    #[test]
    fn separate_local_has_no_chain_file() {
        let files = plan_files(
            "a.example", SubjectType::Server, Algo::Rsa, CertFileType::Separate, CertType::Local,
            b"KEY", b"CERT", b"CACERT", false,
        );
        assert_eq!(names(&files), vec!["a.example_server_key.pem", "a.example_server_cert.pem"]);
        assert!(files[0].contains_key_material);
        assert!(!files[1].contains_key_material);
    }

    #[test]
    fn separate_le_adds_chain_file() {
        let files = plan_files(
            "a.example", SubjectType::Server, Algo::Rsa, CertFileType::Separate, CertType::Le,
            b"KEY", b"CERT", b"CACERT", false,
        );
        assert_eq!(
            names(&files),
            vec![
                "a.example_server_key.pem",
                "a.example_server_cert.pem",
                "a.example_server_cert_cacert_chain.pem",
            ]
        );
    }

    #[test]
    fn combine_both_is_a_single_file_with_key_material() {
        let files = plan_files(
            "a.example", SubjectType::Server, Algo::Ec, CertFileType::CombineBoth, CertType::Local,
            b"KEY", b"CERT", b"CACERT", false,
        );
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].filename, "a.example_server_ec_key_cert_cacert.pem");
        assert_eq!(files[0].content, b"KEYCERTCACERT");
        assert!(files[0].contains_key_material);
    }

    #[test]
    fn cert_path_placeholder_is_a_caller_concern_not_the_planner() {
        // `{}` substitution happens once, at directory-resolution time in
        // the transfer layer, not in the filename planner.
        let files = plan_files(
            "a.example", SubjectType::Client, Algo::Rsa, CertFileType::CertOnly, CertType::Local,
            b"", b"CERT", b"", false,
        );
        assert_eq!(files[0].filename, "a.example_client_cert.pem");
    }
}
