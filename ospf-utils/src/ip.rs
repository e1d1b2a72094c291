//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;

use ipnetwork::Ipv4Network;

// Extension methods for Ipv4Addr.
pub trait Ipv4AddrExt {
    const LENGTH: usize;

    // Checks if the IPv4 address is usable as an interface address.
    fn is_usable(&self) -> bool;

    // Returns the /32 host prefix of the address.
    fn to_host_prefix(&self) -> Ipv4Network;

    // Builds a network prefix out of this address and the given netmask,
    // with the host bits cleared. Non-contiguous masks yield `None`.
    fn with_netmask(&self, mask: Ipv4Addr) -> Option<Ipv4Network>;

    // Checks if both addresses belong to the same subnet.
    fn same_subnet(&self, other: &Ipv4Addr, mask: Ipv4Addr) -> bool;
}

// Extension methods for Ipv4Network.
pub trait Ipv4NetworkExt {
    const MAX_PREFIXLEN: u8;

    // Clears the host bits.
    fn apply_mask(&self) -> Ipv4Network;

    // Checks if this is a host prefix.
    fn is_host_prefix(&self) -> bool;

    // Returns the default route.
    fn default_route() -> Ipv4Network;
}

// ===== impl Ipv4Addr =====

impl Ipv4AddrExt for Ipv4Addr {
    const LENGTH: usize = 4;

    fn is_usable(&self) -> bool {
        !(self.is_loopback()
            || self.is_broadcast()
            || self.is_multicast()
            || self.is_unspecified())
    }

    fn to_host_prefix(&self) -> Ipv4Network {
        Ipv4Network::new(*self, Ipv4Network::MAX_PREFIXLEN).unwrap()
    }

    fn with_netmask(&self, mask: Ipv4Addr) -> Option<Ipv4Network> {
        Ipv4Network::with_netmask(*self, mask)
            .ok()
            .map(|prefix| prefix.apply_mask())
    }

    fn same_subnet(&self, other: &Ipv4Addr, mask: Ipv4Addr) -> bool {
        let mask = u32::from(mask);
        u32::from(*self) & mask == u32::from(*other) & mask
    }
}

// ===== impl Ipv4Network =====

impl Ipv4NetworkExt for Ipv4Network {
    const MAX_PREFIXLEN: u8 = 32;

    fn apply_mask(&self) -> Ipv4Network {
        Ipv4Network::new(self.network(), self.prefix()).unwrap()
    }

    fn is_host_prefix(&self) -> bool {
        self.prefix() == Self::MAX_PREFIXLEN
    }

    fn default_route() -> Ipv4Network {
        Ipv4Network::new(Ipv4Addr::UNSPECIFIED, 0).unwrap()
    }
}

// ===== unit tests =====

#[cfg(test)]
mod tests {
    use const_addrs::{ip4, net4};

    use super::*;

    #[test]
    fn netmask_to_prefix() {
        assert_eq!(
            ip4!("10.0.1.7").with_netmask(ip4!("255.255.255.0")),
            Some(net4!("10.0.1.0/24"))
        );
        assert_eq!(
            ip4!("10.0.1.7").with_netmask(ip4!("255.255.255.255")),
            Some(net4!("10.0.1.7/32"))
        );
        assert_eq!(
            ip4!("10.0.1.7").with_netmask(ip4!("0.0.0.0")),
            Some(net4!("0.0.0.0/0"))
        );
    }

    #[test]
    fn non_contiguous_netmask() {
        let addr = ip4!("10.0.1.7");
        assert_eq!(addr.with_netmask(ip4!("255.0.255.0")), None);
        assert_eq!(addr.with_netmask(ip4!("255.255.255.1")), None);
        assert_eq!(addr.with_netmask(ip4!("0.255.255.255")), None);
    }

    #[test]
    fn subnet_membership() {
        let mask = ip4!("255.255.255.0");
        assert!(ip4!("10.0.1.1").same_subnet(&ip4!("10.0.1.254"), mask));
        assert!(!ip4!("10.0.1.1").same_subnet(&ip4!("10.0.2.1"), mask));
    }
}
