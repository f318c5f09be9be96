// Copyright 2024 the zonesync authors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Configuration for the server binary.
//!
//! The configuration file is YAML. Most zone attributes can be given once
//! under `zoneDefault` and overridden per zone; SOA parameters, NS and TTL
//! are required after that merge and missing values fail startup.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use hickory_proto::error::ProtoError;
use hickory_proto::rr::Name;
use ipnet::IpNet;
use serde::Deserialize;
use thiserror::Error;

use crate::zone::{RecordData, SoaData, ZoneData};

/// Errors raised while loading or merging the configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("yaml decode error: {0}")]
    YamlDecode(#[from] serde_yaml::Error),

    #[error("zone {zone}: {field} not found")]
    MissingField { zone: String, field: &'static str },

    #[error("invalid domain name {name:?}: {source}")]
    InvalidName { name: String, source: ProtoError },

    #[error("zone {zone}: prefix {prefix:?} mixes CNAME with other records")]
    CnameConflict { zone: String, prefix: String },

    #[error("invalid duration {value:?}")]
    InvalidDuration { value: String },
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub server: ServerConfig,
    pub webhook: WebhookConfig,
    pub data_store: DataStoreConfig,
    pub zone_default: ZoneDefaultConfig,
    pub zones: Vec<ZoneConfig>,
    pub tsig_secrets: Vec<TsigSecretConfig>,
    pub netbox: NetboxConfig,
    pub slack: SlackConfig,
}

impl Config {
    /// Read and decode the configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(&fs::read_to_string(path)?)?)
    }

    /// Merge every configured zone with the defaults, validating as we go.
    pub fn merged_zones(&self) -> Result<Vec<ZoneData>, ConfigError> {
        self.zones
            .iter()
            .map(|zone| zone_merge(zone, &self.zone_default))
            .collect()
    }

    /// The socket addresses the DNS listeners bind, both UDP and TCP.
    pub fn listen_addrs(&self) -> Vec<SocketAddr> {
        if self.server.listen.is_empty() {
            vec![SocketAddr::from(([0, 0, 0, 0], self.server.port))]
        } else {
            self.server.listen.clone()
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerConfig {
    /// Addresses to listen on; `0.0.0.0:{port}` when empty.
    pub listen: Vec<SocketAddr>,
    pub port: u16,
    /// When set, opens this many listener pairs per address with
    /// SO_REUSEPORT.
    pub so_reuseport: Option<u32>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { listen: Vec::new(), port: 53, so_reuseport: None }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WebhookConfig {
    /// Listen address of the webhook receiver; empty disables it.
    pub listen: String,
    /// Debounce window; only the last request of a burst triggers a
    /// reconciliation.
    pub timeout: String,
    pub allow_from: Vec<IpNet>,
}

impl WebhookConfig {
    pub fn debounce(&self) -> Result<Duration, ConfigError> {
        if self.timeout.is_empty() {
            return Ok(Duration::from_secs(30));
        }
        parse_duration(&self.timeout)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DataStoreConfig {
    pub mode: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ZoneDefaultConfig {
    pub soa: SoaConfig,
    pub ttl: Option<u32>,
    pub ns: Option<Vec<String>>,
    pub allow_transfer: Option<Vec<IpNet>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZoneConfig {
    pub suffix: String,
    #[serde(default)]
    pub origin: Option<String>,
    #[serde(default)]
    pub soa: SoaConfig,
    #[serde(default)]
    pub ttl: Option<u32>,
    #[serde(default)]
    pub ns: Option<Vec<String>>,
    #[serde(default)]
    pub records: Option<Vec<StaticRecordConfig>>,
    #[serde(default)]
    pub allow_transfer: Option<Vec<IpNet>>,
}

/// An operator-authored record under a zone: a CNAME, a TXT, or both.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StaticRecordConfig {
    pub name: String,
    #[serde(default)]
    pub cname: Option<String>,
    #[serde(default)]
    pub txt: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SoaConfig {
    pub ns: Option<String>,
    #[serde(rename = "mBox")]
    pub m_box: Option<String>,
    pub refresh: Option<u32>,
    pub retry: Option<u32>,
    pub expire: Option<u32>,
    #[serde(rename = "minTTL")]
    pub min_ttl: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TsigSecretConfig {
    pub name: String,
    /// Base64-encoded key material.
    pub secret: String,
    /// `hmac-sha256` (default), `hmac-sha384` or `hmac-sha512`.
    #[serde(default)]
    pub algorithm: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NetboxConfig {
    /// Host (or address) actually dialed for the API.
    pub host: String,
    /// Logical server name for the URL and TLS verification when it differs
    /// from `host`.
    pub server_name: Option<String>,
    #[serde(rename = "useTLS")]
    pub use_tls: bool,
    #[serde(rename = "verifyTLS")]
    pub verify_tls: bool,
    pub token: String,
    /// Where the FQDN of an address comes from: `description` or `dns`.
    pub mode: String,
    /// Reconciliation interval, e.g. `1m`.
    pub interval: String,
    /// Page size for the ip-addresses listing.
    pub limit: usize,
}

impl Default for NetboxConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            server_name: None,
            use_tls: false,
            verify_tls: true,
            token: String::new(),
            mode: "description".to_string(),
            interval: "1m".to_string(),
            limit: 1000,
        }
    }
}

impl NetboxConfig {
    pub fn interval(&self) -> Result<Duration, ConfigError> {
        parse_duration(&self.interval)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SlackConfig {
    #[serde(rename = "webhookURL")]
    pub webhook_url: String,
    pub channel: String,
    pub name: String,
    #[serde(rename = "iconURL")]
    pub icon_url: String,
    pub icon_emoji: String,
}

/// Parse a duration string such as `30s`, `1m` or `1m30s`.
pub fn parse_duration(value: &str) -> Result<Duration, ConfigError> {
    let err = || ConfigError::InvalidDuration { value: value.to_string() };
    if value.is_empty() {
        return Err(err());
    }
    let mut total = Duration::ZERO;
    let mut digits = String::new();
    let mut chars = value.chars().peekable();
    while let Some(c) = chars.next() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }
        let amount: u64 = digits.parse().map_err(|_| err())?;
        digits.clear();
        let unit = match c {
            'm' if chars.peek() == Some(&'s') => {
                chars.next();
                Duration::from_millis(1)
            }
            's' => Duration::from_secs(1),
            'm' => Duration::from_secs(60),
            'h' => Duration::from_secs(3600),
            _ => return Err(err()),
        };
        total += unit * amount as u32;
    }
    if !digits.is_empty() {
        return Err(err());
    }
    Ok(total)
}

/// Parse a name and force it fully qualified, lowercased.
fn fqdn(input: &str) -> Result<Name, ConfigError> {
    let mut name = Name::from_utf8(input)
        .map_err(|source| ConfigError::InvalidName { name: input.to_string(), source })?;
    name.set_fqdn(true);
    Ok(name.to_lowercase())
}

/// Resolve a possibly-relative name against the zone suffix, the way
/// operators write CNAME targets.
fn relative_fqdn(input: &str, zone: &Name) -> Result<Name, ConfigError> {
    if input.ends_with('.') {
        return fqdn(input);
    }
    let relative = Name::from_utf8(input)
        .map_err(|source| ConfigError::InvalidName { name: input.to_string(), source })?;
    relative
        .append_domain(zone)
        .map(|name| name.to_lowercase())
        .map_err(|source| ConfigError::InvalidName { name: input.to_string(), source })
}

/// Merge a zone with the defaults into its runtime form.
fn zone_merge(zone: &ZoneConfig, defaults: &ZoneDefaultConfig) -> Result<ZoneData, ConfigError> {
    let missing = |field: &'static str| ConfigError::MissingField {
        zone: zone.suffix.clone(),
        field,
    };
    let suffix = fqdn(&zone.suffix)?;
    let origin = match &zone.origin {
        Some(origin) => fqdn(origin)?,
        None => suffix.clone(),
    };
    let ttl = zone.ttl.or(defaults.ttl).ok_or_else(|| missing("ttl"))?;
    let ns = zone
        .ns
        .as_ref()
        .or(defaults.ns.as_ref())
        .ok_or_else(|| missing("ns"))?
        .iter()
        .map(|server| fqdn(server))
        .collect::<Result<Vec<_>, _>>()?;

    let soa = SoaData {
        mname: fqdn(
            zone.soa.ns.as_deref().or(defaults.soa.ns.as_deref()).ok_or_else(|| missing("soa.ns"))?,
        )?,
        rname: fqdn(
            zone.soa
                .m_box
                .as_deref()
                .or(defaults.soa.m_box.as_deref())
                .ok_or_else(|| missing("soa.mBox"))?,
        )?,
        refresh: zone.soa.refresh.or(defaults.soa.refresh).ok_or_else(|| missing("soa.refresh"))?,
        retry: zone.soa.retry.or(defaults.soa.retry).ok_or_else(|| missing("soa.retry"))?,
        expire: zone.soa.expire.or(defaults.soa.expire).ok_or_else(|| missing("soa.expire"))?,
        minimum: zone.soa.min_ttl.or(defaults.soa.min_ttl).ok_or_else(|| missing("soa.minTTL"))?,
    };

    let mut static_records: BTreeMap<String, Vec<RecordData>> = BTreeMap::new();
    for record in zone.records.iter().flatten() {
        let prefix = record.name.to_lowercase();
        if let Some(target) = &record.cname {
            static_records
                .entry(prefix.clone())
                .or_default()
                .push(RecordData::Cname(relative_fqdn(target, &suffix)?));
        }
        if let Some(text) = &record.txt {
            static_records.entry(prefix).or_default().push(RecordData::Txt(text.clone()));
        }
    }
    for (prefix, list) in &static_records {
        let has_cname = list.iter().any(|r| matches!(r, RecordData::Cname(_)));
        if has_cname && list.len() > 1 {
            return Err(ConfigError::CnameConflict {
                zone: zone.suffix.clone(),
                prefix: prefix.clone(),
            });
        }
    }

    let allow_transfer = zone
        .allow_transfer
        .clone()
        .or_else(|| defaults.allow_transfer.clone())
        .unwrap_or_default();

    Ok(ZoneData { suffix, origin, ttl, ns, soa, static_records, allow_transfer })
}
