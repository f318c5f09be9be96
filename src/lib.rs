// Copyright 2024 the zonesync authors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! An authoritative DNS server reconciled from a NetBox-style IPAM inventory.
//!
//! The server periodically pulls the IP address list from the IPAM HTTP API,
//! derives A/AAAA records from the address annotations, merges them with the
//! operator's static CNAME/TXT records, and publishes the result per zone.
//! Queries are answered over UDP and TCP, optionally TSIG-signed, and zones
//! can be transferred with AXFR from allowlisted peers.

#![warn(clippy::dbg_macro, clippy::unimplemented, rust_2018_idioms)]

pub mod config;
pub mod netbox;
pub mod notify;
pub mod reconcile;
pub mod server;
pub mod store;
pub mod webhook;
pub mod zone;
