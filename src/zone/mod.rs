// Copyright 2024 the zonesync authors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Zones: static configuration, record trees, serials, and resolution.

pub mod catalog;
pub mod manager;
pub mod serial;
pub mod tree;

pub use catalog::Catalog;
pub use manager::{ZoneManager, ZoneView};
pub use serial::Serial;
pub use tree::{RecordData, Tree};

use std::collections::BTreeMap;

use hickory_proto::rr::Name;
use ipnet::IpNet;

/// SOA parameters of a zone, fully resolved from configuration.
#[derive(Debug, Clone)]
pub struct SoaData {
    pub mname: Name,
    pub rname: Name,
    pub refresh: u32,
    pub retry: u32,
    pub expire: u32,
    pub minimum: u32,
}

/// The static part of a zone, immutable after configuration load.
///
/// `origin` is the name that owns SOA/NS and is used for query dispatch;
/// `suffix` is the name used to claim IPAM entries. They are usually equal
/// but are kept distinct on purpose.
#[derive(Debug, Clone)]
pub struct ZoneData {
    pub suffix: Name,
    pub origin: Name,
    pub ttl: u32,
    pub ns: Vec<Name>,
    pub soa: SoaData,
    pub static_records: BTreeMap<String, Vec<RecordData>>,
    pub allow_transfer: Vec<IpNet>,
}

impl ZoneData {
    /// The suffix in presentation form, used as the key for snapshots and
    /// candidate trees.
    pub fn suffix_key(&self) -> String {
        self.suffix.to_utf8()
    }
}
