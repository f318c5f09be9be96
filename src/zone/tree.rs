// Copyright 2024 the zonesync authors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The per-zone record tree.
//!
//! A tree maps a *prefix* (the labels of a name left of the zone origin,
//! empty for the origin itself) to an ordered list of records. Trees are
//! built by the reconciler and frozen once published; the query path never
//! mutates them.

use std::cmp::Ordering;
use std::collections::btree_map;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};

use hickory_proto::rr::rdata::{A, AAAA, CNAME, TXT};
use hickory_proto::rr::{Name, RData, RecordType};

/// One record in a tree, without owner name or TTL. Both are supplied by
/// the zone when answers are materialized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordData {
    A(Ipv4Addr),
    Aaaa(Ipv6Addr),
    Cname(Name),
    Txt(String),
}

impl RecordData {
    pub fn record_type(&self) -> RecordType {
        match self {
            Self::A(_) => RecordType::A,
            Self::Aaaa(_) => RecordType::AAAA,
            Self::Cname(_) => RecordType::CNAME,
            Self::Txt(_) => RecordType::TXT,
        }
    }

    /// Convert to wire rdata.
    pub fn to_rdata(&self) -> RData {
        match self {
            Self::A(ip) => RData::A(A(*ip)),
            Self::Aaaa(ip) => RData::AAAA(AAAA(*ip)),
            Self::Cname(target) => RData::CNAME(CNAME(target.clone())),
            Self::Txt(text) => RData::TXT(TXT::new(vec![text.clone()])),
        }
    }

    /// Total order within a prefix list: `RecordType` value ascending, then
    /// the type-specific value. IPs compare byte-lexicographically, TXT by
    /// string order. CNAMEs are incomparable among themselves (a prefix is
    /// only ever supposed to hold one) and keep their relative order.
    fn cmp_in_list(&self, other: &Self) -> Ordering {
        let by_type = u16::from(self.record_type()).cmp(&u16::from(other.record_type()));
        by_type.then_with(|| match (self, other) {
            (Self::A(a), Self::A(b)) => a.cmp(b),
            (Self::Aaaa(a), Self::Aaaa(b)) => a.cmp(b),
            (Self::Txt(a), Self::Txt(b)) => a.cmp(b),
            _ => Ordering::Equal,
        })
    }
}

impl fmt::Display for RecordData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::A(ip) => write!(f, "A {ip}"),
            Self::Aaaa(ip) => write!(f, "AAAA {ip}"),
            Self::Cname(target) => write!(f, "CNAME {target}"),
            Self::Txt(text) => write!(f, "TXT {text:?}"),
        }
    }
}

/// Prefix-to-records mapping for one zone.
///
/// Structural equality (`PartialEq`) is exactly the change test used by the
/// reconciler: same prefixes, same list length per prefix, and per-index
/// type-and-value equality.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tree {
    records: BTreeMap<String, Vec<RecordData>>,
}

impl Tree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record to a prefix's list.
    pub fn add(&mut self, prefix: &str, record: RecordData) {
        self.records.entry(prefix.to_string()).or_default().push(record);
    }

    /// The records at a prefix, empty if the prefix is absent.
    pub fn get(&self, prefix: &str) -> &[RecordData] {
        self.records.get(prefix).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Whether the prefix holds a CNAME record.
    pub fn has_cname(&self, prefix: &str) -> bool {
        self.get(prefix)
            .iter()
            .any(|record| matches!(record, RecordData::Cname(_)))
    }

    /// Iterate prefixes and their lists in prefix order.
    pub fn iter(&self) -> btree_map::Iter<'_, String, Vec<RecordData>> {
        self.records.iter()
    }

    pub fn prefix_count(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Sort every prefix's list into the canonical order.
    pub fn sort(&mut self) {
        for list in self.records.values_mut() {
            list.sort_by(RecordData::cmp_in_list);
        }
    }

    /// Render one record as a diff line body.
    fn render(prefix: &str, record: &RecordData) -> String {
        let owner = if prefix.is_empty() { "@" } else { prefix };
        format!("{owner} {record}")
    }

    /// A deterministic, human-readable difference between two trees, as
    /// `- ` / `+ ` lines. Intended for operator notifications.
    pub fn diff(old: &Self, new: &Self) -> String {
        let flatten = |tree: &Self| {
            tree.iter()
                .flat_map(|(prefix, list)| {
                    list.iter().map(|record| Self::render(prefix, record)).collect::<Vec<_>>()
                })
                .collect::<BTreeSet<String>>()
        };
        let old_lines = flatten(old);
        let new_lines = flatten(new);
        let mut out = String::new();
        for line in old_lines.difference(&new_lines) {
            out.push_str("- ");
            out.push_str(line);
            out.push('\n');
        }
        for line in new_lines.difference(&old_lines) {
            out.push_str("+ ");
            out.push_str(line);
            out.push('\n');
        }
        out
    }
}
