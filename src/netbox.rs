// Copyright 2024 the zonesync authors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Paginated client for the IPAM `ip-addresses` listing.
//!
//! The API host actually dialed (`netbox.host`) may differ from the logical
//! server name used in the URL and for TLS verification (`netbox.serverName`);
//! the client pre-resolves the dialed host and pins the logical name to
//! those addresses.

use std::net::SocketAddr;

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::config::NetboxConfig;

#[derive(Debug, Error)]
pub enum NetboxError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid status code {status}: {body}")]
    Status { status: u16, body: String },

    #[error("failed to decode ip-addresses page: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("invalid authorization token")]
    Token,

    #[error("failed to resolve {host}: {source}")]
    Resolve { host: String, source: std::io::Error },
}

/// One entry of the `ip-addresses` listing; only the fields the zone
/// pipeline consumes.
#[derive(Debug, Clone, Deserialize)]
pub struct IpAddressEntry {
    /// Address in `ip/prefix-length` notation.
    pub address: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub dns_name: String,
}

#[derive(Debug, Deserialize)]
struct IpAddressPage {
    next: Option<String>,
    #[serde(default)]
    results: Vec<IpAddressEntry>,
}

pub struct NetboxClient {
    config: NetboxConfig,
}

impl NetboxClient {
    pub fn new(config: NetboxConfig) -> Self {
        Self { config }
    }

    fn server_name(&self) -> &str {
        self.config.server_name.as_deref().unwrap_or(&self.config.host)
    }

    fn base_url(&self) -> String {
        let scheme = if self.config.use_tls { "https" } else { "http" };
        format!("{scheme}://{}", self.server_name())
    }

    /// Build the HTTP client for one reconciliation cycle. The dialed host
    /// is re-resolved here so address changes are picked up between cycles.
    async fn client(&self) -> Result<reqwest::Client, NetboxError> {
        let mut headers = HeaderMap::new();
        let token = HeaderValue::from_str(&format!("Token {}", self.config.token))
            .map_err(|_| NetboxError::Token)?;
        headers.insert(AUTHORIZATION, token);

        let mut builder = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(std::time::Duration::from_secs(30));
        if self.config.use_tls && !self.config.verify_tls {
            builder = builder.danger_accept_invalid_certs(true);
        }
        if self.config.server_name.is_some() && self.server_name() != self.config.host {
            let addrs: Vec<SocketAddr> = tokio::net::lookup_host((self.config.host.as_str(), 0))
                .await
                .map_err(|source| NetboxError::Resolve {
                    host: self.config.host.clone(),
                    source,
                })?
                .collect();
            builder = builder.resolve_to_addrs(self.server_name(), &addrs);
        }
        Ok(builder.build()?)
    }

    /// Fetch every page of the listing. Any transport, status or decode
    /// failure aborts the fetch; the caller leaves the published zones
    /// untouched for this cycle.
    pub async fn fetch_all(&self) -> Result<Vec<IpAddressEntry>, NetboxError> {
        let client = self.client().await?;
        let url = format!("{}/api/ipam/ip-addresses", self.base_url());
        let limit = self.config.limit;
        let mut entries = Vec::new();
        for index in 0.. {
            let response = client
                .get(&url)
                .query(&[("limit", limit.to_string()), ("offset", (limit * index).to_string())])
                .send()
                .await?;
            let status = response.status();
            let body = response.bytes().await?;
            if !status.is_success() {
                return Err(NetboxError::Status {
                    status: status.as_u16(),
                    body: String::from_utf8_lossy(&body).into_owned(),
                });
            }
            let page: IpAddressPage = serde_json::from_slice(&body)?;
            entries.extend(page.results);
            match page.next {
                Some(next) => debug!(%next, "fetching next ip-addresses page"),
                None => break,
            }
        }
        Ok(entries)
    }
}
