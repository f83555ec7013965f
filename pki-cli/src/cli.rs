// SPDX-FileCopyrightText: 2019-2024 Heiko Schaefer <heiko@schaefer.name>
// SPDX-License-Identifier: GPL-3.0-or-later

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[clap(
    name = "pki",
    author = "Heiko Schäfer <heiko@schaefer.name>",
    version,
    about = "Server-side PKI lifecycle manager: issuance, DANE TLSA publication and host distribution."
)]
pub struct Cli {
    /// Path to a TOML config file; falls back to $PKI_CONFIG, then built-in defaults.
    #[clap(short = 'c', long = "config")]
    pub config: Option<String>,

    #[clap(subcommand)]
    pub cmd: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Issue a fresh certificate instance for a cert meta.
    Issue {
        /// Name of the cert meta (subject) to issue for.
        name: String,
    },

    /// Publish a TLSA record for a not-yet-deployed instance alongside the active one.
    #[clap(name = "prepublish-tlsa")]
    PrepublishTlsa {
        name: String,

        #[clap(long = "prepublished-hash")]
        prepublished_hash: String,
    },

    /// Distribute the most recent deployable instance to configured hosts.
    Deploy {
        /// Only deploy to these disthosts; may be repeated.
        #[clap(long = "only-host")]
        only_host: Vec<String>,

        /// Skip these disthosts; may be repeated.
        #[clap(long = "skip-host")]
        skip_host: Vec<String>,

        /// Don't publish a TLSA record as part of this deploy.
        #[clap(long = "no-tlsa")]
        no_tlsa: bool,

        /// Deploy this specific cert instance row id instead of the most recent one.
        #[clap(long = "instance-id")]
        instance_id: Option<i32>,

        /// Cert metas to deploy; empty means all.
        name: Vec<String>,
    },

    /// Mark instances whose not_after has passed as expired.
    #[clap(name = "expire-sweep")]
    ExpireSweep,
}
