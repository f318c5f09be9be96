// Copyright 2024 the zonesync authors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The reconciliation loop.
//!
//! One task owns the whole write path: fetch the IPAM inventory, build a
//! candidate tree per zone from the static records plus the derived
//! address records, and promote candidates that differ from the published
//! tree. Promotion bumps the serial first and swaps the tree second, so a
//! concurrent reader can see a serial that is at most ahead of its tree,
//! never behind. Runs are serialized by construction; triggers that arrive
//! mid-run coalesce into at most one follow-up.

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use hickory_proto::rr::Name;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::SlackConfig;
use crate::netbox::{IpAddressEntry, NetboxClient};
use crate::notify::notify_slack;
use crate::store::{SnapshotStore, StoredTree, ZoneEntry};
use crate::zone::{Catalog, RecordData, Tree, ZoneManager};

pub struct Reconciler {
    catalog: Arc<Catalog>,
    netbox: NetboxClient,
    mode: String,
    slack: SlackConfig,
    store: Option<Box<dyn SnapshotStore>>,
}

impl Reconciler {
    pub fn new(
        catalog: Arc<Catalog>,
        netbox: NetboxClient,
        mode: String,
        slack: SlackConfig,
        store: Option<Box<dyn SnapshotStore>>,
    ) -> Self {
        Self { catalog, netbox, mode, slack, store }
    }

    /// Run forever: once immediately, then on every timer tick and on
    /// every webhook trigger.
    pub async fn run(mut self, mut triggers: mpsc::Receiver<()>, interval: Duration) {
        self.sync().await;
        let mut timer = tokio::time::interval_at(Instant::now() + interval, interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = timer.tick() => {}
                received = triggers.recv() => {
                    if received.is_none() {
                        return;
                    }
                }
            }
            self.sync().await;
        }
    }

    /// One reconciliation cycle. Fetch failures abort the cycle and leave
    /// every published tree and serial untouched.
    pub async fn sync(&mut self) {
        let entries = match self.netbox.fetch_all().await {
            Ok(entries) => entries,
            Err(error) => {
                warn!(%error, "ipam fetch failed, keeping published zones");
                return;
            }
        };
        let mut candidates = build_candidates(&self.catalog, &self.mode, &entries);
        let zones: Vec<Arc<ZoneManager>> = self.catalog.zones().to_vec();
        for zone in zones {
            let key = zone.data().suffix_key();
            let Some(candidate) = candidates.remove(&key) else {
                continue;
            };
            self.promote(&zone, candidate).await;
        }
        info!(entries = entries.len(), "sync complete");
    }

    /// Publish `candidate` for `zone` if it differs from the current tree.
    async fn promote(&mut self, zone: &Arc<ZoneManager>, candidate: Tree) {
        let key = zone.data().suffix_key();
        let view = zone.view();
        match view.tree() {
            // nothing published yet: promote without a serial bump or a
            // notification
            None => {
                zone.replace_tree(candidate.clone());
                self.persist(zone, &candidate);
                info!(zone = %key, serial = zone.serial(), "zone published");
            }
            Some(current) => {
                if *current == candidate {
                    return;
                }
                let diff = Tree::diff(current, &candidate);
                debug!(zone = %key, diff = %diff, "zone changed");
                zone.bump_serial();
                zone.replace_tree(candidate.clone());
                self.persist(zone, &candidate);
                let serial = zone.serial();
                info!(zone = %key, serial, "zone updated");
                if let Err(error) = notify_slack(&self.slack, &key, serial, &diff).await {
                    warn!(%error, zone = %key, "slack notification failed");
                }
            }
        }
    }

    /// Write the snapshot. Failures keep the in-memory promotion.
    fn persist(&mut self, zone: &ZoneManager, tree: &Tree) {
        let Some(store) = self.store.as_mut() else {
            return;
        };
        let entry = ZoneEntry {
            serial: zone.serial(),
            origin: zone.origin().to_utf8(),
            tree: Some(StoredTree::from(tree)),
        };
        if let Err(error) = store.set_zone(&zone.data().suffix_key(), entry) {
            warn!(%error, zone = %zone.data().suffix_key(), "snapshot write failed, keeping in-memory state");
        }
    }
}

/// Build one candidate tree per zone: the operator's static records plus
/// an A or AAAA per inventory entry whose domain falls under the zone's
/// suffix. Entries that cannot be mapped are skipped.
fn build_candidates(
    catalog: &Catalog,
    mode: &str,
    entries: &[IpAddressEntry],
) -> BTreeMap<String, Tree> {
    let mut candidates: BTreeMap<String, Tree> = catalog
        .zones()
        .iter()
        .map(|zone| {
            let mut tree = Tree::new();
            for (prefix, list) in &zone.data().static_records {
                for record in list {
                    tree.add(prefix, record.clone());
                }
            }
            (zone.data().suffix_key(), tree)
        })
        .collect();

    for entry in entries {
        let raw_domain = match mode {
            "description" => entry.description.as_str(),
            "dns" => entry.dns_name.as_str(),
            other => {
                warn!(mode = other, address = %entry.address, "unknown netbox mode, entry skipped");
                continue;
            }
        };
        let domain = match Name::from_utf8(raw_domain) {
            Ok(mut name) => {
                name.set_fqdn(true);
                name
            }
            Err(error) => {
                debug!(domain = raw_domain, %error, "entry name does not parse, skipped");
                continue;
            }
        };
        let Some((zone, prefix)) = catalog.place(&domain) else {
            continue;
        };
        let ip: IpAddr = match entry.address.split('/').next().unwrap_or_default().parse() {
            Ok(ip) => ip,
            Err(_) => {
                debug!(address = %entry.address, "entry address does not parse, skipped");
                continue;
            }
        };
        let Some(tree) = candidates.get_mut(&zone.data().suffix_key()) else {
            continue;
        };
        if tree.has_cname(&prefix) {
            warn!(
                zone = %zone.data().suffix_key(),
                prefix = %prefix,
                "address record collides with a CNAME, skipped"
            );
            continue;
        }
        match ip {
            IpAddr::V4(v4) => tree.add(&prefix, RecordData::A(v4)),
            IpAddr::V6(v6) => tree.add(&prefix, RecordData::Aaaa(v6)),
        }
    }

    for tree in candidates.values_mut() {
        tree.sort();
    }
    candidates
}
