// SPDX-FileCopyrightText: 2019-2024 Heiko Schaefer <heiko@schaefer.name>
// SPDX-License-Identifier: GPL-3.0-or-later

//! SSH/SFTP transport (§6): sftp, chmod/chown/symlink/unlink/mkdir/chdir,
//! `putfo`-equivalent upload, and a command channel with configurable recv
//! timeout and combined stderr.
//!
//! Every handle returned by [`SshTransport::connect`] must be released on
//! every exit path, including the error path — callers open a connection
//! per host, use it for every file of that host, then drop it.

use std::io::Read;
use std::net::TcpStream;
use std::path::Path;
use std::time::Duration;

use crate::config::SshConfig;
use crate::error::{PkiError, Result};

pub struct CommandOutput {
    pub output: Vec<u8>,
    pub exit_status: i32,
    pub timed_out: bool,
}

/// Abstracts over an established SSH+SFTP session to one host, so the
/// distribution engine can be unit-tested against an in-memory fake.
pub trait SshSession {
    fn chdir(&mut self, path: &str) -> Result<()>;
    fn mkdir(&mut self, path: &str) -> Result<()>;
    fn put(&mut self, remote_path: &str, data: &[u8]) -> Result<()>;
    fn chmod(&mut self, remote_path: &str, mode: u32) -> Result<()>;
    fn chown(&mut self, remote_path: &str, uid: u32, gid: u32) -> Result<()>;
    fn symlink(&mut self, remote_path: &str, target: &str) -> Result<()>;
    fn unlink(&mut self, remote_path: &str) -> Result<()>;
    fn exec(&mut self, command: &str, recv_timeout: Duration) -> Result<CommandOutput>;
}

pub trait SshTransport {
    fn connect(&self, host: &str) -> Result<Box<dyn SshSession>>;
}

/// `ssh2`-backed transport, authenticated by a client RSA key under a
/// configured username, verified against a known-hosts file.
pub struct Ssh2Transport {
    cfg: SshConfig,
}

impl Ssh2Transport {
    pub fn new(cfg: SshConfig) -> Self {
        Self { cfg }
    }
}

impl SshTransport for Ssh2Transport {
    fn connect(&self, host: &str) -> Result<Box<dyn SshSession>> {
        let tcp = TcpStream::connect((host, 22))
            .map_err(|e| PkiError::TransportError { host: host.to_string(), source: e.into() })?;

        let mut session = ssh2::Session::new()
            .map_err(|e| PkiError::TransportError { host: host.to_string(), source: e.into() })?;
        session.set_tcp_stream(tcp);
        session
            .handshake()
            .map_err(|e| PkiError::TransportError { host: host.to_string(), source: e.into() })?;

        let known_hosts_path = shellexpand(&self.cfg.known_hosts);
        {
            let mut known_hosts = session
                .known_hosts()
                .map_err(|e| PkiError::TransportError { host: host.to_string(), source: e.into() })?;
            known_hosts
                .read_file(Path::new(&known_hosts_path), ssh2::KnownHostFileKind::OpenSSH)
                .map_err(|e| PkiError::TransportError { host: host.to_string(), source: e.into() })?;
        }

        let identity_path = shellexpand(&self.cfg.identity_file);
        session
            .userauth_pubkey_file(&self.cfg.client_user, None, Path::new(&identity_path), None)
            .map_err(|e| PkiError::TransportError { host: host.to_string(), source: e.into() })?;

        let sftp = session
            .sftp()
            .map_err(|e| PkiError::TransportError { host: host.to_string(), source: e.into() })?;

        Ok(Box::new(Ssh2Session {
            session,
            sftp,
            host: host.to_string(),
            recv_timeout: Duration::from_secs(self.cfg.recv_timeout_secs),
        }))
    }
}

fn shellexpand(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return format!("{home}/{rest}");
        }
    }
    path.to_string()
}

struct Ssh2Session {
    session: ssh2::Session,
    sftp: ssh2::Sftp,
    host: String,
    recv_timeout: Duration,
}

impl Ssh2Session {
    fn err(&self, e: impl Into<anyhow::Error>) -> PkiError {
        PkiError::TransportError { host: self.host.clone(), source: e.into() }
    }
}

impl SshSession for Ssh2Session {
    fn chdir(&mut self, path: &str) -> Result<()> {
        self.sftp.stat(Path::new(path)).map_err(|e| self.err(e))?;
        Ok(())
    }

    fn mkdir(&mut self, path: &str) -> Result<()> {
        self.sftp
            .mkdir(Path::new(path), 0o755)
            .map_err(|_| PkiError::MissingParent { path: path.to_string() })
    }

    fn put(&mut self, remote_path: &str, data: &[u8]) -> Result<()> {
        let mut file = self
            .sftp
            .create(Path::new(remote_path))
            .map_err(|e| self.err(e))?;
        std::io::Write::write_all(&mut file, data).map_err(|e| self.err(e))?;
        Ok(())
    }

    fn chmod(&mut self, remote_path: &str, mode: u32) -> Result<()> {
        let mut stat = self.sftp.stat(Path::new(remote_path)).map_err(|e| self.err(e))?;
        stat.perm = Some(mode);
        self.sftp.setstat(Path::new(remote_path), stat).map_err(|e| self.err(e))
    }

    fn chown(&mut self, remote_path: &str, uid: u32, gid: u32) -> Result<()> {
        let mut stat = self.sftp.stat(Path::new(remote_path)).map_err(|e| self.err(e))?;
        stat.uid = Some(uid);
        stat.gid = Some(gid);
        self.sftp.setstat(Path::new(remote_path), stat).map_err(|e| self.err(e))
    }

    fn symlink(&mut self, remote_path: &str, target: &str) -> Result<()> {
        let _ = self.sftp.unlink(Path::new(remote_path));
        self.sftp
            .symlink(Path::new(target), Path::new(remote_path))
            .map_err(|e| self.err(e))
    }

    fn unlink(&mut self, remote_path: &str) -> Result<()> {
        self.sftp.unlink(Path::new(remote_path)).map_err(|e| self.err(e))
    }

    fn exec(&mut self, command: &str, recv_timeout: Duration) -> Result<CommandOutput> {
        let mut channel = self.session.channel_session().map_err(|e| self.err(e))?;
        channel.handle_extended_data(ssh2::ExtendedData::Merge).map_err(|e| self.err(e))?;
        channel.exec(command).map_err(|e| self.err(e))?;

        self.session.set_timeout(recv_timeout.as_millis() as u32);

        let mut output = Vec::new();
        let mut buf = [0u8; 4096];
        let mut timed_out = false;
        loop {
            match channel.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => output.extend_from_slice(&buf[..n]),
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {
                    timed_out = true;
                    break;
                }
                Err(e) => return Err(self.err(e)),
            }
        }

        // Collection may have stopped on a timeout; the exit status is still awaited.
        let _ = channel.wait_close();
        let exit_status = channel.exit_status().unwrap_or(-1);

        Ok(CommandOutput { output, exit_status, timed_out })
    }
}
