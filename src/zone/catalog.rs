// Copyright 2024 the zonesync authors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The set of zones served by this process.

use std::collections::HashMap;
use std::sync::Arc;

use hickory_proto::rr::Name;

use super::manager::ZoneManager;
use super::ZoneData;

/// Dispatch table over the configured zones.
///
/// Query dispatch is keyed by *origin* and walks up the label tree so a
/// question anywhere under a zone finds its manager. IPAM placement is
/// keyed by *suffix* and scans zones in configuration order, taking the
/// first match; operators order overlapping zones most specific first.
pub struct Catalog {
    zones: Vec<Arc<ZoneManager>>,
    by_origin: HashMap<Name, Arc<ZoneManager>>,
}

impl Catalog {
    pub fn new(zones: Vec<ZoneData>) -> Self {
        let zones: Vec<Arc<ZoneManager>> =
            zones.into_iter().map(|data| Arc::new(ZoneManager::new(data))).collect();
        let by_origin = zones
            .iter()
            .map(|manager| (manager.origin().to_lowercase(), Arc::clone(manager)))
            .collect();
        Self { zones, by_origin }
    }

    /// Managers in configuration order.
    pub fn zones(&self) -> &[Arc<ZoneManager>] {
        &self.zones
    }

    /// The zone authoritative for `name`: the longest origin that is a
    /// parent of (or equal to) the name.
    pub fn find(&self, name: &Name) -> Option<&Arc<ZoneManager>> {
        let mut candidate = name.to_lowercase();
        loop {
            if let Some(manager) = self.by_origin.get(&candidate) {
                return Some(manager);
            }
            if candidate.is_root() {
                return None;
            }
            candidate = candidate.base_name();
        }
    }

    /// Where an IPAM-derived name lands: the first zone (in configuration
    /// order) whose suffix covers it, along with the prefix relative to
    /// that suffix.
    pub fn place(&self, name: &Name) -> Option<(&Arc<ZoneManager>, String)> {
        self.zones.iter().find_map(|manager| {
            manager.prefix_by_suffix(name).map(|prefix| (manager, prefix))
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::str::FromStr;

    use super::super::SoaData;
    use super::*;

    fn name(s: &str) -> Name {
        Name::from_str(s).unwrap()
    }

    fn zone(suffix: &str) -> ZoneData {
        ZoneData {
            suffix: name(suffix),
            origin: name(suffix),
            ttl: 60,
            ns: vec![name("ns1.example.com.")],
            soa: SoaData {
                mname: name("ns1.example.com."),
                rname: name("hostmaster.example.com."),
                refresh: 3600,
                retry: 900,
                expire: 604800,
                minimum: 300,
            },
            static_records: BTreeMap::new(),
            allow_transfer: Vec::new(),
        }
    }

    #[test]
    fn find_walks_up_to_the_origin() {
        let catalog = Catalog::new(vec![zone("example.com.")]);
        assert!(catalog.find(&name("example.com.")).is_some());
        assert!(catalog.find(&name("deep.under.example.com.")).is_some());
        assert!(catalog.find(&name("example.org.")).is_none());
    }

    #[test]
    fn find_prefers_the_longer_origin() {
        let catalog = Catalog::new(vec![zone("example.com."), zone("sub.example.com.")]);
        let hit = catalog.find(&name("host.sub.example.com.")).unwrap();
        assert_eq!(hit.origin(), &name("sub.example.com."));
    }

    #[test]
    fn place_takes_first_configured_match() {
        // most specific first, as operators are expected to order them
        let catalog = Catalog::new(vec![zone("sub.example.com."), zone("example.com.")]);
        let (manager, prefix) = catalog.place(&name("host.sub.example.com.")).unwrap();
        assert_eq!(manager.suffix(), &name("sub.example.com."));
        assert_eq!(prefix, "host");

        // with the broad zone first, it swallows the entry
        let catalog = Catalog::new(vec![zone("example.com."), zone("sub.example.com.")]);
        let (manager, prefix) = catalog.place(&name("host.sub.example.com.")).unwrap();
        assert_eq!(manager.suffix(), &name("example.com."));
        assert_eq!(prefix, "host.sub");
    }

    #[test]
    fn place_misses_foreign_names() {
        let catalog = Catalog::new(vec![zone("example.com.")]);
        assert!(catalog.place(&name("host.example.org.")).is_none());
    }
}
