// SPDX-FileCopyrightText: 2019-2024 Heiko Schaefer <heiko@schaefer.name>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Per-file SFTP transfer: chdir-or-mkdir, upload, mode/ownership, the
//! `pgLink` compatibility symlink, and the per-place reload command.

use std::time::Duration;

use crate::dist::filenames::{Destination, PlannedFile};
use crate::error::{PkiError, Result};
use crate::model::Place;
use crate::ssh::SshSession;

use crate::model::DEFAULT_KEY_MODE;

fn dest_dir_for<'a>(place: &'a Place, destination: Destination) -> &'a str {
    match destination {
        Destination::KeyDir => place.key_path.as_deref().unwrap_or(&place.cert_path),
        Destination::CertDir => &place.cert_path,
    }
}

/// `{}` in `cert_path`/`key_path` is replaced exactly once with the subject name.
fn resolve_dir(template: &str, subject: &str) -> String {
    if template.contains("{}") {
        template.replacen("{}", subject, 1)
    } else {
        template.to_string()
    }
}

/// chdir into `dir`, mkdir-ing one level if missing. A missing parent is fatal.
fn ensure_dir(session: &mut dyn SshSession, dir: &str) -> Result<()> {
    if session.chdir(dir).is_ok() {
        return Ok(());
    }
    session.mkdir(dir).map_err(|_| PkiError::MissingParent { path: dir.to_string() })?;
    session.chdir(dir)
}

/// Upload every planned file for one `(fqdn, place, algorithm)` step.
pub fn transfer_files(
    session: &mut dyn SshSession,
    dest_root: &str,
    subject: &str,
    place: &Place,
    files: &[PlannedFile],
) -> Result<()> {
    for file in files {
        let dir_template = dest_dir_for(place, file.destination);
        let dir = format!("{dest_root}/{}", resolve_dir(dir_template, subject));
        ensure_dir(session, &dir)?;

        let remote_path = format!("{dir}/{}", file.filename);
        session.put(&remote_path, &file.content)?;

        if file.contains_key_material {
            let mode = if place.mode != 0 { place.mode } else { DEFAULT_KEY_MODE };
            if mode != DEFAULT_KEY_MODE {
                tracing::warn!(place = %place.name, mode, "key file mode differs from 0400");
            }
            session.chmod(&remote_path, mode)?;

            if place.pg_link {
                let link = format!("{dir}/postgresql.key");
                session.symlink(&link, &file.filename)?;
            }
        }

        if file.contains_key_material || place.chown_both {
            if place.uid != 0 || place.gid != 0 {
                session.chown(&remote_path, place.uid, place.gid)?;
            }
        } else if place.pg_link {
            let link = format!("{dir}/postgresql.crt");
            session.symlink(&link, &file.filename)?;
        }
    }
    Ok(())
}

/// Run the per-jail reload command, combining stderr into stdout, a 10s recv
/// timeout per chunk. Timeouts stop collection but the exit status is still
/// awaited. A non-zero exit is reported but not fatal.
pub fn run_reload(
    session: &mut dyn SshSession,
    place: &Place,
    jail: &str,
    recv_timeout: Duration,
) -> Result<()> {
    let Some(template) = &place.reload_command else { return Ok(()) };
    if jail.is_empty() {
        return Ok(());
    }

    let command = if template.contains("{}") {
        template.replacen("{}", jail, 1)
    } else {
        template.clone()
    };

    let out = session.exec(&command, recv_timeout)?;
    if out.timed_out {
        tracing::warn!(%command, "reload command recv timed out; exit status still awaited");
    }
    if out.exit_status != 0 {
        tracing::warn!(
            %command,
            exit_status = out.exit_status,
            output = %String::from_utf8_lossy(&out.output),
            "reload command exited non-zero"
        );
    }
    Ok(())
}
