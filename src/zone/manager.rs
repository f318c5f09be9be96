// Copyright 2024 the zonesync authors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Per-zone runtime state and query resolution.
//!
//! A [`ZoneManager`] owns one zone's static data plus the published
//! `(serial, tree)` pair. The pair lives behind an [`ArcSwap`] so that the
//! reconciler can replace it wholesale while query handlers keep reading a
//! consistent snapshot: a reader observes either the complete old pair or
//! the complete new pair, and a serial may only ever run ahead of the tree
//! it is read with, never behind.

use std::sync::Arc;

use arc_swap::ArcSwap;
use hickory_proto::rr::rdata::{NS, SOA};
use hickory_proto::rr::{Name, RData, Record, RecordType};
use rand::seq::SliceRandom;

use super::serial::Serial;
use super::tree::Tree;
use super::ZoneData;

/// The published state of a zone. `tree` is `None` until the first
/// promotion (or snapshot restore).
#[derive(Debug, Clone)]
struct Published {
    serial: Serial,
    tree: Option<Arc<Tree>>,
}

/// Owner of one zone's configuration, record tree and serial.
#[derive(Debug)]
pub struct ZoneManager {
    data: ZoneData,
    published: ArcSwap<Published>,
}

impl ZoneManager {
    pub fn new(data: ZoneData) -> Self {
        let published = ArcSwap::from_pointee(Published { serial: Serial::today(), tree: None });
        Self { data, published }
    }

    pub fn data(&self) -> &ZoneData {
        &self.data
    }

    pub fn origin(&self) -> &Name {
        &self.data.origin
    }

    pub fn suffix(&self) -> &Name {
        &self.data.suffix
    }

    /// Pin the current `(serial, tree)` pair. Everything answered from the
    /// returned view, including a whole AXFR stream, reads that one state.
    pub fn view(&self) -> ZoneView<'_> {
        ZoneView { data: &self.data, state: self.published.load_full() }
    }

    /// Atomically publish a new tree, keeping the current serial.
    pub fn replace_tree(&self, tree: Tree) {
        let current = self.published.load_full();
        self.published.store(Arc::new(Published {
            serial: current.serial,
            tree: Some(Arc::new(tree)),
        }));
    }

    pub fn serial(&self) -> u32 {
        self.published.load().serial.as_u32()
    }

    /// Reset the serial to today's first value.
    pub fn init_serial(&self) {
        self.swap_serial(Serial::today());
    }

    /// Replace the serial from a stored wire value.
    pub fn set_serial(&self, value: u32) {
        self.swap_serial(Serial::from_u32(value));
    }

    /// Advance the serial for one observed change.
    pub fn bump_serial(&self) {
        let current = self.published.load();
        self.swap_serial(current.serial.bumped());
    }

    fn swap_serial(&self, serial: Serial) {
        let current = self.published.load_full();
        self.published.store(Arc::new(Published { serial, tree: current.tree.clone() }));
    }

    /// The prefix of `name` relative to the IPAM suffix, used when placing
    /// inventory entries.
    pub fn prefix_by_suffix(&self, name: &Name) -> Option<String> {
        prefix_of(&self.data.suffix, name)
    }

    /// The prefix of `name` relative to the query origin.
    pub fn prefix_by_origin(&self, name: &Name) -> Option<String> {
        prefix_of(&self.data.origin, name)
    }
}

/// The labels of `name` left of `zone`, joined with dots; empty when the
/// name equals the zone. `None` when the name is not under the zone.
fn prefix_of(zone: &Name, name: &Name) -> Option<String> {
    if !zone.zone_of(name) {
        return None;
    }
    let skip = usize::from(name.num_labels() - zone.num_labels());
    let labels: Vec<String> = name
        .iter()
        .take(skip)
        .map(|label| String::from_utf8_lossy(label).to_lowercase())
        .collect();
    Some(labels.join("."))
}

/// A consistent read-only view of one zone, pinned at creation.
pub struct ZoneView<'a> {
    data: &'a ZoneData,
    state: Arc<Published>,
}

impl ZoneView<'_> {
    /// The pinned tree, if one has been published.
    pub fn tree(&self) -> Option<&Tree> {
        self.state.tree.as_deref()
    }

    pub fn serial(&self) -> u32 {
        self.state.serial.as_u32()
    }

    /// Resolve a name against the pinned tree.
    ///
    /// With `any == false` the name's prefix is looked up and its list
    /// filtered by `types`; the second value is the *unfiltered* record
    /// count at the prefix, which distinguishes an empty answer at an
    /// existing name (NOERROR) from a missing name (NXDOMAIN). With
    /// `any == true` every prefix of the zone is visited in order and
    /// owner names are synthesized under `name`; this drives AXFR.
    pub fn resolve(&self, name: &Name, types: &[RecordType], any: bool) -> (Vec<Record>, usize) {
        let Some(tree) = self.state.tree.as_deref() else {
            return (Vec::new(), 0);
        };
        let ttl = self.data.ttl;
        let mut records = Vec::new();
        let total;
        if any {
            total = tree.prefix_count();
            for (prefix, list) in tree.iter() {
                let owner = if prefix.is_empty() {
                    name.clone()
                } else {
                    match Name::from_utf8(prefix).and_then(|p| p.append_domain(name)) {
                        Ok(owner) => owner,
                        Err(_) => continue,
                    }
                };
                for data in list {
                    if types.contains(&data.record_type()) {
                        records.push(Record::from_rdata(owner.clone(), ttl, data.to_rdata()));
                    }
                }
            }
        } else {
            let Some(prefix) = prefix_of(&self.data.origin, name) else {
                return (Vec::new(), 0);
            };
            let list = tree.get(&prefix);
            total = list.len();
            for data in list {
                if types.contains(&data.record_type()) {
                    records.push(Record::from_rdata(name.clone(), ttl, data.to_rdata()));
                }
            }
            shuffle_answers(&mut records);
        }
        (records, total)
    }

    fn soa_rdata(&self) -> RData {
        let soa = &self.data.soa;
        RData::SOA(SOA::new(
            soa.mname.clone(),
            soa.rname.clone(),
            self.state.serial.as_u32(),
            soa.refresh as i32,
            soa.retry as i32,
            soa.expire as i32,
            soa.minimum,
        ))
    }

    /// The zone SOA, only at the origin itself.
    pub fn soa(&self, qname: &Name) -> Option<Record> {
        if qname != &self.data.origin {
            return None;
        }
        Some(Record::from_rdata(qname.clone(), self.data.ttl, self.soa_rdata()))
    }

    /// The SOA placed in the Authority section of negative responses.
    pub fn soa_on_error(&self) -> Record {
        Record::from_rdata(self.data.origin.clone(), self.data.ttl, self.soa_rdata())
    }

    /// The NS set, only at the origin itself. Stable order, never shuffled.
    pub fn ns_records(&self, qname: &Name) -> Option<Vec<Record>> {
        if qname != &self.data.origin {
            return None;
        }
        Some(
            self.data
                .ns
                .iter()
                .map(|ns| {
                    Record::from_rdata(
                        qname.clone(),
                        self.data.ttl,
                        RData::NS(NS(ns.clone())),
                    )
                })
                .collect(),
        )
    }
}

/// Order answers for a client: AAAA records first in their stored order,
/// then A records, then the remaining tail randomly permuted. Zone
/// transfers never go through here.
fn shuffle_answers(records: &mut Vec<Record>) {
    let mut aaaa = Vec::new();
    let mut a = Vec::new();
    let mut rest = Vec::new();
    for record in records.drain(..) {
        match record.record_type() {
            RecordType::AAAA => aaaa.push(record),
            RecordType::A => a.push(record),
            _ => rest.push(record),
        }
    }
    rest.shuffle(&mut rand::thread_rng());
    records.extend(aaaa);
    records.extend(a);
    records.extend(rest);
}
