//! Port kinds attached to a bridge

use std::net::IpAddr;

use serde::{Deserialize, Serialize};

/// Kernel interface name limit (IFNAMSIZ minus the trailing NUL)
pub const MAX_IFNAME_LEN: usize = 15;

/// A named attachment point on a bridge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Port {
    /// The bridge's own interface; same name as the bridge
    Internal { name: String },
    /// A container or host-side interface attached by name
    Regular { name: String, vlan_tag: Option<u16> },
    /// VXLAN endpoint terminating at `peer`
    Tunnel { name: String, peer: IpAddr },
}

impl Port {
    pub fn internal(name: impl Into<String>) -> Self {
        Port::Internal { name: name.into() }
    }

    pub fn regular(name: impl Into<String>) -> Self {
        Port::Regular {
            name: name.into(),
            vlan_tag: None,
        }
    }

    pub fn tunnel(name: impl Into<String>, peer: IpAddr) -> Self {
        Port::Tunnel {
            name: name.into(),
            peer,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Port::Internal { name } | Port::Regular { name, .. } | Port::Tunnel { name, .. } => {
                name
            }
        }
    }

    /// OVSDB `Interface.type` column value
    pub fn interface_type(&self) -> &'static str {
        match self {
            Port::Internal { .. } => "internal",
            Port::Regular { .. } => "",
            Port::Tunnel { .. } => "vxlan",
        }
    }

    /// VLAN tag written to `Port.tag`; zero is treated as untagged
    pub fn vlan_tag(&self) -> Option<u16> {
        match self {
            Port::Regular { vlan_tag, .. } => vlan_tag.filter(|tag| *tag != 0),
            _ => None,
        }
    }

    pub fn peer(&self) -> Option<IpAddr> {
        match self {
            Port::Tunnel { peer, .. } => Some(*peer),
            _ => None,
        }
    }
}

/// Check a name against the kernel's interface naming rules.
///
/// Returns the reason on failure.
pub fn validate_ifname(name: &str) -> Result<(), &'static str> {
    if name.is_empty() {
        return Err("name is empty");
    }
    if name.len() > MAX_IFNAME_LEN {
        return Err("name is longer than 15 bytes");
    }
    if name == "." || name == ".." {
        return Err("name is a reserved path component");
    }
    if name.chars().any(|c| c == '/' || c == ':' || c.is_whitespace() || c.is_control()) {
        return Err("name contains '/', ':', whitespace or control characters");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interface_types() {
        assert_eq!(Port::internal("br0").interface_type(), "internal");
        assert_eq!(Port::regular("veth1").interface_type(), "");
        let peer: IpAddr = "10.0.0.2".parse().unwrap();
        let vtep = Port::tunnel("vx40a000002", peer);
        assert_eq!(vtep.interface_type(), "vxlan");
        assert_eq!(vtep.peer(), Some(peer));
        assert_eq!(vtep.name(), "vx40a000002");
    }

    #[test]
    fn test_zero_vlan_is_untagged() {
        let port = Port::Regular {
            name: "veth1".into(),
            vlan_tag: Some(0),
        };
        assert_eq!(port.vlan_tag(), None);
        let port = Port::Regular {
            name: "veth1".into(),
            vlan_tag: Some(100),
        };
        assert_eq!(port.vlan_tag(), Some(100));
    }

    #[test]
    fn test_validate_ifname() {
        assert!(validate_ifname("br0").is_ok());
        assert!(validate_ifname("a23456789012345").is_ok());
        assert!(validate_ifname("").is_err());
        assert!(validate_ifname("a234567890123456").is_err());
        assert!(validate_ifname("eth/0").is_err());
        assert!(validate_ifname("eth 0").is_err());
        assert!(validate_ifname("..").is_err());
    }

    #[test]
    fn test_port_serde_tagging() {
        let json = serde_json::to_value(Port::regular("veth1")).unwrap();
        assert_eq!(json["kind"], "regular");
        assert_eq!(json["name"], "veth1");
    }
}
