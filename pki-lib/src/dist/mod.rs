// SPDX-FileCopyrightText: 2019-2024 Heiko Schaefer <heiko@schaefer.name>
// SPDX-License-Identifier: GPL-3.0-or-later

//! The distribution engine (C6).

pub mod engine;
pub mod filenames;
mod transfer;

pub use engine::{deploy, deploy_cert_meta, DeployFilters};
pub use filenames::{plan_files, Destination, PlannedFile};
