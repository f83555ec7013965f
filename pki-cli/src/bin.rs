// SPDX-FileCopyrightText: 2019-2024 Heiko Schaefer <heiko@schaefer.name>
// SPDX-License-Identifier: GPL-3.0-or-later

use anyhow::{Context, Result};
use clap::{CommandFactory, FromArgMatches};
use tracing_subscriber::EnvFilter;

use pki_lib::acme::{AcmeClient, AcmeHttpClient};
use pki_lib::crypto::load_ca;
use pki_lib::dist::DeployFilters;
use pki_lib::lifecycle::Coordinator;
use pki_lib::ssh::Ssh2Transport;
use pki_lib::store::{PkiStoreRead, StoreIntermediateCache};
use pki_lib::zone::{FsZoneControl, ZoneControlHandle};
use pki_lib::{Pki, PkiConfig};

mod cli;

fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let app = cli::Cli::command().version(env!("CARGO_PKG_VERSION"));
    let c = cli::Cli::from_arg_matches(&app.get_matches())?;

    let config = PkiConfig::load(c.config.as_deref().map(std::path::Path::new))
        .context("failed to load configuration")?;

    let pki = Pki::open(config)?;

    let transport = Ssh2Transport::new(pki.config.ssh.clone());
    let zones = ZoneControlHandle(Box::new(FsZoneControl::new(
        pki.config.zone_file_root.clone(),
        pki.config.zone_reload_command.clone(),
    )));

    match c.cmd {
        cli::Command::Issue { name } => {
            let cm = load_cm(&pki, &name)?;
            with_coordinator(&pki, &transport, &zones, &cm, |coord| {
                let ci = coord.issue(&cm)?;
                tracing::info!(name = %cm.name, ci = ?ci.row_id, "issued new certificate instance");
                Ok(())
            })?;
        }

        cli::Command::PrepublishTlsa { name, prepublished_hash } => {
            let cm = load_cm(&pki, &name)?;
            with_coordinator(&pki, &transport, &zones, &cm, |coord| {
                coord.prepublish_tlsa(&cm, &prepublished_hash)
            })?;
        }

        cli::Command::Deploy { only_host, skip_host, no_tlsa, instance_id, name } => {
            let cms = load_cert_metas(&pki, name)?;
            let filters = DeployFilters {
                only_host: only_host.into_iter().collect(),
                skip_host: skip_host.into_iter().collect(),
                no_tlsa,
                instance_id,
            };
            let coord = bare_coordinator(&pki, &transport, &zones);
            coord.deploy(&cms, &filters)?;
        }

        cli::Command::ExpireSweep => {
            let cms = load_cert_metas(&pki, Vec::new())?;
            let coord = bare_coordinator(&pki, &transport, &zones);
            let n = coord.expire_sweep(&cms)?;
            tracing::info!(count = n, "expire-sweep complete");
        }
    }

    Ok(())
}

/// Look up a CM through the registry, so its singleton-per-name invariant
/// holds even across the several places a single CLI invocation loads one
/// (e.g. the target CM and, for local issuance, the CA's own CM).
fn load_cm(pki: &Pki, name: &str) -> Result<pki_lib::model::CertMeta> {
    let rc = pki.registry.cert_meta(&pki.store, name)?;
    let cm = rc.borrow().clone();
    Ok(cm)
}

fn load_cert_metas(pki: &Pki, name: Vec<String>) -> Result<Vec<pki_lib::model::CertMeta>> {
    let names = if name.is_empty() { pki.store.list_cert_meta_names()? } else { name };
    Ok(names.iter().map(|n| load_cm(pki, n)).collect::<Result<Vec<_>>>()?)
}

/// A coordinator with no issuer wired in, for the deploy/expire-sweep
/// commands, which never call `issue`.
fn bare_coordinator<'a>(
    pki: &'a Pki,
    transport: &'a Ssh2Transport,
    zones: &'a ZoneControlHandle,
) -> Coordinator<'a> {
    Coordinator {
        store: &pki.store,
        registry: &pki.registry,
        transport,
        zones,
        config: &pki.config,
        local_ca: None,
        local_ca_cert_ci: None,
        acme_client: None,
        intermediates: None,
    }
}

/// Build a fully-wired [`Coordinator`] for `cm.cert_type` and run `f` with
/// it: local issuance needs the persisted CA signer, ACME issuance needs an
/// HTTP client and the intermediate cache.
fn with_coordinator(
    pki: &Pki,
    transport: &Ssh2Transport,
    zones: &ZoneControlHandle,
    cm: &pki_lib::model::CertMeta,
    f: impl FnOnce(&Coordinator) -> pki_lib::Result<()>,
) -> Result<()> {
    match cm.cert_type {
        pki_lib::model::CertType::Local => {
            let ca_cm = load_cm(pki, &pki.config.local_ca_name)?;
            let ca_ci = ca_cm
                .most_recent_active_instance(chrono::Utc::now())
                .context("no active local CA instance")?;
            let ca_cks = ca_ci.cksd.values().next().context("local CA has no key material")?;
            let ca = load_ca(&ca_cks.cert_pem, &ca_cks.key_pem)?;

            let coord = Coordinator {
                store: &pki.store,
                registry: &pki.registry,
                transport,
                zones,
                config: &pki.config,
                local_ca: Some(&ca),
                local_ca_cert_ci: ca_ci.row_id,
                acme_client: None,
                intermediates: None,
            };
            f(&coord)?;
        }
        pki_lib::model::CertType::Le => {
            let client = AcmeHttpClient::load(
                &pki.config.acme.directory_url,
                std::path::Path::new(&pki.config.acme.account_path),
            )?;
            let holder = load_cm(pki, &pki.config.acme.intermediate_holder_name)?;
            let intermediates =
                StoreIntermediateCache { store: &pki.store, holder_subject_id: holder.row_id };
            let client_ref: &dyn AcmeClient = &client;

            let coord = Coordinator {
                store: &pki.store,
                registry: &pki.registry,
                transport,
                zones,
                config: &pki.config,
                local_ca: None,
                local_ca_cert_ci: None,
                acme_client: Some(client_ref),
                intermediates: Some(&intermediates),
            };
            f(&coord)?;
        }
    }
    Ok(())
}
