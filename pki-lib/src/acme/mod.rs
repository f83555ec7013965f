// SPDX-FileCopyrightText: 2019-2024 Heiko Schaefer <heiko@schaefer.name>
// SPDX-License-Identifier: GPL-3.0-or-later

//! The ACME issuer and DNS-01 authorizer (C4).

pub mod client;
mod authorize;
pub mod issuer;

pub use authorize::authorize;
pub use client::{AcmeClient, AcmeHttpClient};
pub use issuer::{issue_acme, AcmeIssuer, IntermediateCache};
