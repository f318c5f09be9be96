// Copyright 2024 the zonesync authors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Snapshot persistence for published zones.
//!
//! One document holds every zone, keyed by suffix:
//!
//! ```yaml
//! zones:
//!   example.com.:
//!     serial: 2024030701
//!     origin: example.com.
//!     tree:
//!       records:
//!         host:
//!           - dnsType: 1
//!             a: 10.0.0.1
//! ```
//!
//! Snapshots are written only by the reconciler after a promotion and read
//! once at startup. A load failure is recoverable: the store starts over
//! with empty entries seeded for every configured zone.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::path::PathBuf;
use std::sync::Arc;

use hickory_proto::rr::{Name, RecordType};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::DataStoreConfig;
use crate::zone::{RecordData, Tree, ZoneManager};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("zone {0} not found")]
    ZoneNotFound(String),

    #[error("malformed record under {prefix:?}: {reason}")]
    MalformedRecord { prefix: String, reason: String },
}

/// Per-zone payload of the snapshot document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZoneEntry {
    #[serde(default)]
    pub serial: u32,
    #[serde(default)]
    pub origin: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tree: Option<StoredTree>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredTree {
    #[serde(default)]
    pub records: BTreeMap<String, Vec<StoredRecord>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredRecord {
    pub dns_type: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub a: Option<Ipv4Addr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aaaa: Option<Ipv6Addr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub txt: Option<String>,
}

impl From<&Tree> for StoredTree {
    fn from(tree: &Tree) -> Self {
        let records = tree
            .iter()
            .map(|(prefix, list)| {
                let stored = list
                    .iter()
                    .map(|record| {
                        let mut out = StoredRecord {
                            dns_type: u16::from(record.record_type()),
                            ..StoredRecord::default()
                        };
                        match record {
                            RecordData::A(ip) => out.a = Some(*ip),
                            RecordData::Aaaa(ip) => out.aaaa = Some(*ip),
                            RecordData::Cname(target) => out.cname = Some(target.to_utf8()),
                            RecordData::Txt(text) => out.txt = Some(text.clone()),
                        }
                        out
                    })
                    .collect();
                (prefix.clone(), stored)
            })
            .collect();
        Self { records }
    }
}

impl StoredTree {
    /// Rebuild the runtime tree. Any malformed record fails the whole
    /// conversion; the caller treats that as a failed load.
    pub fn to_tree(&self) -> Result<Tree, StoreError> {
        let mut tree = Tree::new();
        for (prefix, list) in &self.records {
            for stored in list {
                let malformed = |reason: &str| StoreError::MalformedRecord {
                    prefix: prefix.clone(),
                    reason: reason.to_string(),
                };
                let data = match RecordType::from(stored.dns_type) {
                    RecordType::A => RecordData::A(stored.a.ok_or_else(|| malformed("missing a"))?),
                    RecordType::AAAA => {
                        RecordData::Aaaa(stored.aaaa.ok_or_else(|| malformed("missing aaaa"))?)
                    }
                    RecordType::CNAME => {
                        let target = stored.cname.as_deref().ok_or_else(|| malformed("missing cname"))?;
                        RecordData::Cname(
                            Name::from_utf8(target).map_err(|e| malformed(&e.to_string()))?,
                        )
                    }
                    RecordType::TXT => RecordData::Txt(
                        stored.txt.clone().ok_or_else(|| malformed("missing txt"))?,
                    ),
                    other => return Err(malformed(&format!("unsupported type {other}"))),
                };
                tree.add(prefix, data);
            }
        }
        Ok(tree)
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreDocument {
    #[serde(default)]
    zones: BTreeMap<String, ZoneEntry>,
}

/// Persistence interface for the zone snapshot document.
pub trait SnapshotStore: Send {
    /// Re-read the document from its backing medium.
    fn load(&mut self) -> Result<(), StoreError>;

    /// Write the whole document out.
    fn save(&self) -> Result<(), StoreError>;

    /// The stored entry for a zone.
    fn zone(&self, suffix: &str) -> Result<ZoneEntry, StoreError>;

    /// Replace a zone's entry and persist. Fails with not-found when the
    /// zone was never seeded into the document.
    fn set_zone(&mut self, suffix: &str, entry: ZoneEntry) -> Result<(), StoreError>;
}

/// Build the configured store, seeded with the configured zones. Returns
/// `None` when persistence is disabled (no mode, or an unknown one).
pub fn from_config(
    config: &DataStoreConfig,
    zones: &[Arc<ZoneManager>],
) -> Option<Box<dyn SnapshotStore>> {
    match config.mode.as_str() {
        "yaml" => Some(Box::new(YamlStore::open(config.path.clone(), zones))),
        "" => None,
        other => {
            warn!(mode = other, "unknown data store mode, snapshots disabled");
            None
        }
    }
}

/// Whole-document YAML file store.
pub struct YamlStore {
    path: PathBuf,
    data: StoreDocument,
}

impl YamlStore {
    /// Open the store, falling back to a fresh document with one empty
    /// entry per configured zone when the file is missing or unreadable.
    pub fn open(path: PathBuf, zones: &[Arc<ZoneManager>]) -> Self {
        let mut store = Self { path, data: StoreDocument::default() };
        if let Err(error) = store.load() {
            debug!(%error, path = %store.path.display(), "starting with an empty snapshot document");
            store.data = StoreDocument {
                zones: zones
                    .iter()
                    .map(|zone| (zone.data().suffix_key(), ZoneEntry::default()))
                    .collect(),
            };
        }
        store
    }
}

impl SnapshotStore for YamlStore {
    fn load(&mut self) -> Result<(), StoreError> {
        let raw = fs::read_to_string(&self.path)?;
        self.data = serde_yaml::from_str(&raw)?;
        Ok(())
    }

    fn save(&self) -> Result<(), StoreError> {
        let raw = serde_yaml::to_string(&self.data)?;
        fs::write(&self.path, raw)?;
        Ok(())
    }

    fn zone(&self, suffix: &str) -> Result<ZoneEntry, StoreError> {
        self.data
            .zones
            .get(suffix)
            .cloned()
            .ok_or_else(|| StoreError::ZoneNotFound(suffix.to_string()))
    }

    fn set_zone(&mut self, suffix: &str, entry: ZoneEntry) -> Result<(), StoreError> {
        match self.data.zones.get_mut(suffix) {
            Some(slot) => {
                *slot = entry;
                self.save()
            }
            None => Err(StoreError::ZoneNotFound(suffix.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::str::FromStr;

    use crate::zone::{SoaData, ZoneData};

    use super::*;

    fn scratch_path(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!("zonesync-store-{tag}-{}.yml", std::process::id()))
    }

    fn managers(suffixes: &[&str]) -> Vec<Arc<ZoneManager>> {
        suffixes
            .iter()
            .map(|suffix| {
                let name = Name::from_str(suffix).unwrap();
                Arc::new(ZoneManager::new(ZoneData {
                    suffix: name.clone(),
                    origin: name.clone(),
                    ttl: 60,
                    ns: vec![Name::from_str("ns1.example.com.").unwrap()],
                    soa: SoaData {
                        mname: Name::from_str("ns1.example.com.").unwrap(),
                        rname: Name::from_str("hostmaster.example.com.").unwrap(),
                        refresh: 3600,
                        retry: 900,
                        expire: 604800,
                        minimum: 300,
                    },
                    static_records: BTreeMap::new(),
                    allow_transfer: Vec::new(),
                }))
            })
            .collect()
    }

    fn sample_tree() -> Tree {
        let mut tree = Tree::new();
        tree.add("host", RecordData::A("10.0.0.1".parse().unwrap()));
        tree.add("host", RecordData::Aaaa("2001:db8::1".parse().unwrap()));
        tree.add("alias", RecordData::Cname(Name::from_str("host.example.com.").unwrap()));
        tree.add("", RecordData::Txt("root record".into()));
        tree.sort();
        tree
    }

    #[test]
    fn stored_tree_round_trip() {
        let tree = sample_tree();
        let stored = StoredTree::from(&tree);
        assert_eq!(stored.to_tree().unwrap(), tree);
    }

    #[test]
    fn missing_file_seeds_configured_zones() {
        let store = YamlStore::open(scratch_path("seed"), &managers(&["example.com."]));
        let entry = store.zone("example.com.").unwrap();
        assert_eq!(entry.serial, 0);
        assert!(entry.tree.is_none());
        assert!(store.zone("example.org.").is_err());
    }

    #[test]
    fn set_zone_requires_seeded_entry() {
        let path = scratch_path("notfound");
        let mut store = YamlStore::open(path.clone(), &managers(&["example.com."]));
        let err = store.set_zone("example.org.", ZoneEntry::default()).unwrap_err();
        assert!(matches!(err, StoreError::ZoneNotFound(_)));
        let _ = fs::remove_file(path);
    }

    #[test]
    fn save_and_reload() {
        let path = scratch_path("reload");
        let zones = managers(&["example.com."]);
        let mut store = YamlStore::open(path.clone(), &zones);
        let tree = sample_tree();
        store
            .set_zone(
                "example.com.",
                ZoneEntry {
                    serial: 2_024_030_702,
                    origin: "example.com.".into(),
                    tree: Some(StoredTree::from(&tree)),
                },
            )
            .unwrap();

        let reopened = YamlStore::open(path.clone(), &zones);
        let entry = reopened.zone("example.com.").unwrap();
        assert_eq!(entry.serial, 2_024_030_702);
        assert_eq!(entry.tree.unwrap().to_tree().unwrap(), tree);
        let _ = fs::remove_file(path);
    }
}
