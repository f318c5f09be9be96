// Copyright 2024 the zonesync authors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Webhook receiver that nudges the reconciler.
//!
//! Any method on any path counts; the only gate is the CIDR allowlist.
//! Accepted requests arm a debounce window so that a burst of hooks (an
//! IPAM bulk edit fires one per object) collapses into a single
//! reconciliation after the burst settles.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{ConnectInfo, State};
use axum::http::StatusCode;
use axum::Router;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::server::access::Access;

/// How long to wait before retrying a failed listener bind.
const BIND_RETRY: Duration = Duration::from_secs(10);

/// Shared state of the receiver: allowlist, debounce window, the time of
/// the last accepted request, and the trigger channel into the reconciler.
pub struct WebhookBridge {
    allow: Access,
    debounce: Duration,
    last_access: Arc<Mutex<Instant>>,
    triggers: mpsc::Sender<()>,
}

impl WebhookBridge {
    pub fn new(allow: Access, debounce: Duration, triggers: mpsc::Sender<()>) -> Self {
        Self { allow, debounce, last_access: Arc::new(Mutex::new(Instant::now())), triggers }
    }

    fn accept(&self, peer: SocketAddr) -> StatusCode {
        if !self.allow.allowed(peer.ip()) {
            return StatusCode::UNAUTHORIZED;
        }
        info!(%peer, "webhook received");
        *self.last_access.lock().unwrap() = Instant::now();

        let last_access = Arc::clone(&self.last_access);
        let debounce = self.debounce;
        let triggers = self.triggers.clone();
        tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            let last = *last_access.lock().unwrap();
            // a newer request re-armed the window; let its timer fire
            if last.elapsed() >= debounce {
                // coalesce with whatever is already queued
                let _ = triggers.try_send(());
            }
        });
        StatusCode::OK
    }
}

async fn receive(
    State(bridge): State<Arc<WebhookBridge>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
) -> StatusCode {
    bridge.accept(peer)
}

/// Serve the webhook endpoint forever, retrying failed binds.
pub async fn run(listen: SocketAddr, bridge: Arc<WebhookBridge>) {
    let app = Router::new().fallback(receive).with_state(bridge);
    loop {
        let listener = match tokio::net::TcpListener::bind(listen).await {
            Ok(listener) => listener,
            Err(error) => {
                warn!(%error, %listen, "webhook bind failed");
                tokio::time::sleep(BIND_RETRY).await;
                continue;
            }
        };
        info!(%listen, "webhook listening");
        let serve = axum::serve(
            listener,
            app.clone().into_make_service_with_connect_info::<SocketAddr>(),
        );
        if let Err(error) = serve.await {
            warn!(%error, "webhook server failed");
        }
        tokio::time::sleep(BIND_RETRY).await;
    }
}
