// SPDX-FileCopyrightText: 2019-2024 Heiko Schaefer <heiko@schaefer.name>
// SPDX-License-Identifier: GPL-3.0-or-later

//! End-to-end coverage of the distribution engine against in-memory fakes:
//! the filename-law (no `"key" in filename` substring checks survive into
//! behaviour) and `--only-host`/`--skip-host` filtering.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};

use pki_lib::dist::{deploy_cert_meta, DeployFilters};
use pki_lib::error::Result;
use pki_lib::model::{
    Algo, CertFileType, CertInstance, CertKeyStore, CertMeta, CertType, CiState, DistHost,
    EncryptionAlgo, Jail, Place, SubjectType,
};
use pki_lib::ssh::{CommandOutput, SshSession, SshTransport};
use pki_lib::store::PkiStoreWrite;
use pki_lib::zone::{ZoneControl, ZoneControlHandle};

#[derive(Default)]
struct RecordingSession {
    put_paths: Vec<String>,
    chmod_calls: Vec<(String, u32)>,
}

impl SshSession for RecordingSession {
    fn chdir(&mut self, _path: &str) -> Result<()> {
        Ok(())
    }
    fn mkdir(&mut self, _path: &str) -> Result<()> {
        Ok(())
    }
    fn put(&mut self, remote_path: &str, _data: &[u8]) -> Result<()> {
        self.put_paths.push(remote_path.to_string());
        Ok(())
    }
    fn chmod(&mut self, remote_path: &str, mode: u32) -> Result<()> {
        self.chmod_calls.push((remote_path.to_string(), mode));
        Ok(())
    }
    fn chown(&mut self, _remote_path: &str, _uid: u32, _gid: u32) -> Result<()> {
        Ok(())
    }
    fn symlink(&mut self, _remote_path: &str, _target: &str) -> Result<()> {
        Ok(())
    }
    fn unlink(&mut self, _remote_path: &str) -> Result<()> {
        Ok(())
    }
    fn exec(&mut self, _command: &str, _recv_timeout: Duration) -> Result<CommandOutput> {
        Ok(CommandOutput { output: Vec::new(), exit_status: 0, timed_out: false })
    }
}

/// Hands out one shared [`RecordingSession`] per fqdn, so the test can
/// inspect what each host received after the run.
struct FakeTransport {
    sessions: RefCell<BTreeMap<String, std::rc::Rc<RefCell<RecordingSession>>>>,
}

impl FakeTransport {
    fn new() -> Self {
        Self { sessions: RefCell::new(BTreeMap::new()) }
    }

    fn put_paths_for(&self, fqdn: &str) -> Vec<String> {
        self.sessions.borrow().get(fqdn).map(|s| s.borrow().put_paths.clone()).unwrap_or_default()
    }
}

/// Wraps the shared `Rc<RefCell<..>>` behind the `SshSession` trait so
/// `deploy_cert_meta`'s `Box<dyn SshSession>` can still reach it.
struct SharedSession(std::rc::Rc<RefCell<RecordingSession>>);

impl SshSession for SharedSession {
    fn chdir(&mut self, p: &str) -> Result<()> {
        self.0.borrow_mut().chdir(p)
    }
    fn mkdir(&mut self, p: &str) -> Result<()> {
        self.0.borrow_mut().mkdir(p)
    }
    fn put(&mut self, remote_path: &str, data: &[u8]) -> Result<()> {
        self.0.borrow_mut().put(remote_path, data)
    }
    fn chmod(&mut self, remote_path: &str, mode: u32) -> Result<()> {
        self.0.borrow_mut().chmod(remote_path, mode)
    }
    fn chown(&mut self, remote_path: &str, uid: u32, gid: u32) -> Result<()> {
        self.0.borrow_mut().chown(remote_path, uid, gid)
    }
    fn symlink(&mut self, remote_path: &str, target: &str) -> Result<()> {
        self.0.borrow_mut().symlink(remote_path, target)
    }
    fn unlink(&mut self, remote_path: &str) -> Result<()> {
        self.0.borrow_mut().unlink(remote_path)
    }
    fn exec(&mut self, command: &str, recv_timeout: Duration) -> Result<CommandOutput> {
        self.0.borrow_mut().exec(command, recv_timeout)
    }
}

impl SshTransport for FakeTransport {
    fn connect(&self, host: &str) -> Result<Box<dyn SshSession>> {
        let session = self
            .sessions
            .borrow_mut()
            .entry(host.to_string())
            .or_insert_with(|| std::rc::Rc::new(RefCell::new(RecordingSession::default())))
            .clone();
        Ok(Box::new(SharedSession(session)))
    }
}

#[derive(Default)]
struct FakeStore {
    states: RefCell<Vec<(i32, CiState)>>,
    cleared_authorized_until: RefCell<Vec<i32>>,
}

impl PkiStoreWrite for FakeStore {
    fn insert_cert_instance(&self, _subject_id: i32, _ci: &CertInstance, _is_ca: bool) -> Result<i32> {
        unimplemented!("deploy never inserts instances")
    }
    fn update_cert_instance_state(&self, ci_row_id: i32, state: CiState) -> Result<()> {
        self.states.borrow_mut().push((ci_row_id, state));
        Ok(())
    }
    fn delete_cert_instance(&self, _ci_row_id: i32) -> Result<()> {
        unimplemented!("deploy never deletes instances")
    }
    fn insert_cert_key_data(&self, _ci_row_id: i32, _cks: &CertKeyStore) -> Result<()> {
        unimplemented!("deploy never inserts key data")
    }
    fn update_authorized_until(
        &self,
        subject_id: i32,
        authorized_until: Option<DateTime<Utc>>,
        _cert_type: CertType,
    ) -> Result<()> {
        if authorized_until.is_none() {
            self.cleared_authorized_until.borrow_mut().push(subject_id);
        }
        Ok(())
    }
}

struct NoopZone;

impl ZoneControl for NoopZone {
    fn update_zone_cache(&self, _zone: &str) -> Result<()> {
        Ok(())
    }
    fn update_soa_of_updated_zones(&self) -> Result<()> {
        Ok(())
    }
    fn reload_name_server(&self) -> Result<()> {
        Ok(())
    }
}

fn place(name: &str, cert_file_type: CertFileType) -> Place {
    Place {
        name: name.to_string(),
        cert_file_type,
        cert_path: "/etc/ssl/certs".to_string(),
        key_path: None,
        uid: 0,
        gid: 0,
        mode: 0,
        chown_both: false,
        pg_link: false,
        reload_command: None,
    }
}

fn jail(place_name: &str, cert_file_type: CertFileType) -> Jail {
    let p = place(place_name, cert_file_type);
    let mut places = BTreeMap::new();
    places.insert(p.name.clone(), p);
    Jail { name: String::new(), places }
}

fn sample_cm() -> CertMeta {
    let now = Utc::now();
    let mut cksd = BTreeMap::new();
    cksd.insert(
        Algo::Rsa,
        CertKeyStore {
            algo: Algo::Rsa,
            cert_pem: "CERT".to_string(),
            key_pem: "KEY".to_string(),
            hash: "DEADBEEF".to_string(),
        },
    );
    let ci = CertInstance {
        row_id: Some(42),
        state: CiState::Issued,
        ocsp_must_staple: false,
        not_before: now - chrono::Duration::days(1),
        not_after: now + chrono::Duration::days(89),
        ca_cert_ci: Some(1),
        cksd,
    };

    let mut disthosts = BTreeMap::new();
    for host in ["a.example", "b.example"] {
        let mut jails = BTreeMap::new();
        jails.insert(String::new(), jail("default", CertFileType::Separate));
        disthosts.insert(host.to_string(), DistHost { jailroot: "".to_string(), jails });
    }

    CertMeta {
        row_id: 7,
        name: "svc.example".to_string(),
        cert_type: CertType::Local,
        subject_type: SubjectType::Server,
        encryption_algo: EncryptionAlgo::Rsa,
        ocsp_must_staple: false,
        disabled: false,
        authorized_until: None,
        altnames: Vec::new(),
        tlsa_prefixes: Default::default(),
        disthosts,
        instances: vec![ci],
    }
}

#[test]
fn deploy_writes_separate_cert_and_key_files_to_every_host() {
    let cm = sample_cm();
    let transport = FakeTransport::new();
    let store = FakeStore::default();
    let zones = ZoneControlHandle(Box::new(NoopZone));

    deploy_cert_meta(
        &transport,
        &store,
        std::path::Path::new("/nonexistent-zone-root"),
        None,
        &zones,
        Duration::from_secs(1),
        &cm,
        &DeployFilters::default(),
    )
    .unwrap();

    for host in ["a.example", "b.example"] {
        let paths = transport.put_paths_for(host);
        assert!(paths.iter().any(|p| p.ends_with("svc.example_server_key.pem")));
        assert!(paths.iter().any(|p| p.ends_with("svc.example_server_cert.pem")));
    }

    assert_eq!(store.states.borrow().as_slice(), &[(42, CiState::Deployed)]);
    assert_eq!(store.cleared_authorized_until.borrow().as_slice(), &[7]);
}

#[test]
fn skip_host_omits_that_host_and_leaves_state_unchanged() {
    let cm = sample_cm();
    let transport = FakeTransport::new();
    let store = FakeStore::default();
    let zones = ZoneControlHandle(Box::new(NoopZone));

    let mut filters = DeployFilters::default();
    filters.skip_host.insert("b.example".to_string());

    let any_omitted = deploy_cert_meta(
        &transport,
        &store,
        std::path::Path::new("/nonexistent-zone-root"),
        None,
        &zones,
        Duration::from_secs(1),
        &cm,
        &filters,
    )
    .unwrap();

    assert!(any_omitted);
    assert!(!transport.put_paths_for("a.example").is_empty());
    assert!(transport.put_paths_for("b.example").is_empty());

    // A host was omitted: the instance must not be promoted to `deployed`.
    assert!(store.states.borrow().is_empty());
    assert!(store.cleared_authorized_until.borrow().is_empty());
}

#[test]
fn only_host_restricts_to_the_named_hosts() {
    let cm = sample_cm();
    let transport = FakeTransport::new();
    let store = FakeStore::default();
    let zones = ZoneControlHandle(Box::new(NoopZone));

    let mut filters = DeployFilters::default();
    filters.only_host.insert("a.example".to_string());

    deploy_cert_meta(
        &transport,
        &store,
        std::path::Path::new("/nonexistent-zone-root"),
        None,
        &zones,
        Duration::from_secs(1),
        &cm,
        &filters,
    )
    .unwrap();

    assert!(!transport.put_paths_for("a.example").is_empty());
    assert!(transport.put_paths_for("b.example").is_empty());
}
