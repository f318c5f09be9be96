// Copyright 2024 the zonesync authors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The `zonesyncd` binary.
//!
//! Startup order matters: zones are merged and the snapshot is restored
//! before anything listens, the reconciler starts with an immediate sync,
//! and the DNS listeners come up last. The process then runs until SIGINT
//! or SIGTERM.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use zonesync::config::Config;
use zonesync::netbox::NetboxClient;
use zonesync::reconcile::Reconciler;
use zonesync::server::access::Access;
use zonesync::server::{self, DnsHandler, TsigKeyring};
use zonesync::store;
use zonesync::webhook::{self, WebhookBridge};
use zonesync::zone::Catalog;

#[derive(Debug, Parser)]
#[command(name = "zonesyncd", version, about = "IPAM-reconciled authoritative DNS server")]
struct Cli {
    /// Path of the configuration file
    #[arg(short, long, default_value = "./config.yml")]
    config: PathBuf,

    /// Turn on DEBUG messages (default is only INFO)
    #[arg(short, long, conflicts_with = "quiet")]
    debug: bool,

    /// Disable INFO messages, WARN and ERROR will remain
    #[arg(short, long, conflicts_with = "debug")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.quiet {
        "warn"
    } else if cli.debug {
        "debug"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    info!(config = %cli.config.display(), "zonesyncd starting");
    let config = Config::load(&cli.config)
        .with_context(|| format!("could not read config {}", cli.config.display()))?;

    let zones = config.merged_zones().context("invalid zone configuration")?;
    if zones.is_empty() {
        warn!("no zones configured, serving nothing");
    }
    let catalog = Arc::new(Catalog::new(zones));
    for zone in catalog.zones() {
        info!(origin = %zone.origin(), suffix = %zone.suffix(), "zone configured");
    }

    let keyring = Arc::new(
        TsigKeyring::from_config(&config.tsig_secrets).context("invalid tsig configuration")?,
    );

    // Restore persisted state before anything can answer or reconcile.
    let store = store::from_config(&config.data_store, catalog.zones());
    if let Some(store) = &store {
        for zone in catalog.zones() {
            match store.zone(&zone.data().suffix_key()) {
                Ok(entry) => {
                    if entry.serial != 0 {
                        zone.set_serial(entry.serial);
                    }
                    if let Some(stored) = entry.tree {
                        match stored.to_tree() {
                            Ok(tree) => {
                                zone.replace_tree(tree);
                                info!(
                                    zone = %zone.data().suffix_key(),
                                    serial = zone.serial(),
                                    "zone restored from snapshot"
                                );
                            }
                            Err(error) => {
                                warn!(
                                    zone = %zone.data().suffix_key(),
                                    %error,
                                    "stored tree is unusable, waiting for the first sync"
                                );
                            }
                        }
                    }
                }
                Err(error) => {
                    warn!(zone = %zone.data().suffix_key(), %error, "no snapshot for zone");
                }
            }
        }
    }

    // Reconciliation triggers: the webhook bridge feeds this channel, and
    // its single slot coalesces bursts while a sync is running.
    let (triggers, trigger_rx) = mpsc::channel(1);

    if !config.webhook.listen.is_empty() {
        let listen: SocketAddr = config
            .webhook
            .listen
            .parse()
            .with_context(|| format!("invalid webhook listen address {}", config.webhook.listen))?;
        let debounce = config.webhook.debounce().context("invalid webhook timeout")?;
        let bridge = Arc::new(WebhookBridge::new(
            Access::new(config.webhook.allow_from.iter().cloned()),
            debounce,
            triggers.clone(),
        ));
        tokio::spawn(webhook::run(listen, bridge));
    }

    let interval = config.netbox.interval().context("invalid netbox interval")?;
    let reconciler = Reconciler::new(
        Arc::clone(&catalog),
        NetboxClient::new(config.netbox.clone()),
        config.netbox.mode.clone(),
        config.slack.clone(),
        store,
    );
    tokio::spawn(reconciler.run(trigger_rx, interval));

    // DNS listeners last; with soReuseport the kernel load-balances across
    // the extra socket pairs.
    let handler = Arc::new(DnsHandler::new(Arc::clone(&catalog), keyring));
    let pairs = config.server.so_reuseport.unwrap_or(1).max(1);
    let reuse_port = config.server.so_reuseport.is_some();
    for addr in config.listen_addrs() {
        for _ in 0..pairs {
            let udp = server::bind_udp(addr, reuse_port)
                .with_context(|| format!("could not bind udp {addr}"))?;
            tokio::spawn(server::run_udp(udp, Arc::clone(&handler)));

            let tcp = server::bind_tcp(addr, reuse_port)
                .with_context(|| format!("could not bind tcp {addr}"))?;
            tokio::spawn(server::run_tcp(tcp, Arc::clone(&handler)));
        }
        info!(%addr, listeners = pairs, "listening on udp and tcp");
    }

    let mut sigint = signal(SignalKind::interrupt()).context("failed to install SIGINT handler")?;
    let mut sigterm =
        signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;
    tokio::select! {
        _ = sigint.recv() => info!("signal (interrupt) received, stopping"),
        _ = sigterm.recv() => info!("signal (terminate) received, stopping"),
    }
    Ok(())
}
