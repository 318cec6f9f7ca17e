//! VXLAN tunnel endpoint port naming
//!
//! A peer address maps to a port name that is stable across restarts and
//! fits the kernel's 15 byte interface name limit.
//!
//! - IPv4 peers: `vx4` followed by the 8 hex digits of the address. The
//!   mapping is bijective, so two IPv4 peers never share a name.
//! - IPv6 peers: `vx6` followed by the first 12 hex digits of the SHA-256
//!   of the 16 address octets. That is a 48-bit digest; with `n` distinct
//!   IPv6 peers the chance of any collision is roughly `n^2 / 2^49`
//!   (about 1.8e-7 for a thousand peers). A collision is detected at
//!   provisioning time as a name conflict rather than silently reusing the
//!   other peer's port.
//!
//! Equivalent spellings of one address (`2001:db8::1`, `2001:db8:0::1`)
//! are the same peer and get the same name.

use std::net::{AddrParseError, IpAddr};

use sha2::{Digest, Sha256};

pub const IPV4_PREFIX: &str = "vx4";
pub const IPV6_PREFIX: &str = "vx6";

const IPV6_DIGEST_HEX: usize = 12;

/// Parse a peer address string as given by the caller
pub fn parse_peer(peer: &str) -> Result<IpAddr, AddrParseError> {
    peer.trim().parse()
}

/// Canonical tunnel port name for a peer address
pub fn vtep_port_name(peer: IpAddr) -> String {
    match peer {
        IpAddr::V4(v4) => format!("{IPV4_PREFIX}{:08x}", u32::from(v4)),
        IpAddr::V6(v6) => {
            let digest = Sha256::digest(v6.octets());
            let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
            format!("{IPV6_PREFIX}{}", &hex[..IPV6_DIGEST_HEX])
        }
    }
}

/// Parse and name in one step
pub fn vtep_port_name_for(peer: &str) -> Result<String, AddrParseError> {
    parse_peer(peer).map(vtep_port_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::{validate_ifname, MAX_IFNAME_LEN};
    use rand::{Rng, SeedableRng};
    use std::collections::HashMap;
    use std::net::{Ipv4Addr, Ipv6Addr};

    #[test]
    fn test_ipv4_names_are_traceable() {
        assert_eq!(vtep_port_name_for("10.0.0.5").unwrap(), "vx40a000005");
        assert_eq!(vtep_port_name_for("0.0.0.0").unwrap(), "vx400000000");
        assert_eq!(vtep_port_name_for("255.255.255.255").unwrap(), "vx4ffffffff");
    }

    #[test]
    fn test_names_are_deterministic() {
        let a = vtep_port_name_for("2001:db8::1").unwrap();
        let b = vtep_port_name_for("2001:db8::1").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), MAX_IFNAME_LEN);
        assert!(a.starts_with(IPV6_PREFIX));
    }

    #[test]
    fn test_equivalent_spellings_share_a_name() {
        assert_eq!(
            vtep_port_name_for("2001:db8::1").unwrap(),
            vtep_port_name_for("2001:0db8:0:0:0:0:0:0001").unwrap()
        );
        assert_eq!(
            vtep_port_name_for(" 10.0.0.5 ").unwrap(),
            vtep_port_name_for("10.0.0.5").unwrap()
        );
    }

    #[test]
    fn test_invalid_peer() {
        assert!(vtep_port_name_for("").is_err());
        assert!(vtep_port_name_for("10.0.0").is_err());
        assert!(vtep_port_name_for("peer.example").is_err());
    }

    #[test]
    fn test_ipv4_mapped_is_distinct_from_ipv4() {
        let v4 = vtep_port_name_for("10.0.0.5").unwrap();
        let mapped = vtep_port_name_for("::ffff:10.0.0.5").unwrap();
        assert_ne!(v4, mapped);
    }

    #[test]
    fn test_no_collisions_across_sample() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(0x5eed_cafe);
        let mut seen: HashMap<String, IpAddr> = HashMap::new();

        let mut addrs: Vec<IpAddr> = vec![
            Ipv4Addr::UNSPECIFIED.into(),
            Ipv4Addr::BROADCAST.into(),
            Ipv4Addr::LOCALHOST.into(),
            Ipv6Addr::UNSPECIFIED.into(),
            Ipv6Addr::LOCALHOST.into(),
            Ipv6Addr::new(0xffff, 0xffff, 0xffff, 0xffff, 0xffff, 0xffff, 0xffff, 0xffff).into(),
            Ipv6Addr::new(0xffff, 0xffff, 0xffff, 0xffff, 0xffff, 0xffff, 0xffff, 0xfffe).into(),
        ];
        // a dense IPv4 block plus random addresses from both families
        addrs.extend((0u32..65_536).map(|i| IpAddr::V4(Ipv4Addr::from(0x0a00_0000 + i))));
        addrs.extend((0..50_000).map(|_| IpAddr::V4(Ipv4Addr::from(rng.gen::<u32>()))));
        addrs.extend((0..50_000).map(|_| IpAddr::V6(Ipv6Addr::from(rng.gen::<u128>()))));
        // IPv6 peers that differ only in the last bits
        addrs.extend((0u128..20_000).map(|i| IpAddr::V6(Ipv6Addr::from((0xfd00u128 << 112) + i))));

        for addr in addrs {
            let name = vtep_port_name(addr);
            assert!(validate_ifname(&name).is_ok(), "{name} is not a legal ifname");
            if let Some(prev) = seen.insert(name.clone(), addr) {
                assert_eq!(prev, addr, "{prev} and {addr} both map to {name}");
            }
        }
    }
}
