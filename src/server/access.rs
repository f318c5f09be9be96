// Copyright 2024 the zonesync authors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Source-address allowlists for zone transfer and the webhook receiver.

use std::net::IpAddr;

use ipnet::IpNet;

/// A deny-by-default set of allowed networks. An empty allowlist admits
/// nobody, which is the safe reading for both AXFR and webhooks.
#[derive(Debug, Clone, Default)]
pub struct Access {
    networks: Vec<IpNet>,
}

impl Access {
    pub fn new(networks: impl IntoIterator<Item = IpNet>) -> Self {
        Self { networks: networks.into_iter().collect() }
    }

    pub fn allowed(&self, addr: IpAddr) -> bool {
        self.networks.iter().any(|network| network.contains(&addr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_denies_everyone() {
        let access = Access::default();
        assert!(!access.allowed("192.168.1.1".parse().unwrap()));
        assert!(!access.allowed("fd00::1".parse().unwrap()));
    }

    #[test]
    fn v4_networks() {
        let access = Access::new(["192.168.1.0/24".parse().unwrap()]);
        assert!(access.allowed("192.168.1.1".parse().unwrap()));
        assert!(access.allowed("192.168.1.255".parse().unwrap()));
        assert!(!access.allowed("192.168.2.1".parse().unwrap()));
        assert!(!access.allowed("fd00::1".parse().unwrap()));
    }

    #[test]
    fn v6_networks() {
        let access = Access::new(["fd00::/120".parse().unwrap()]);
        assert!(access.allowed("fd00::1".parse().unwrap()));
        assert!(access.allowed("fd00::ff".parse().unwrap()));
        assert!(!access.allowed("fd00::1:1".parse().unwrap()));
    }
}
