//! Error types for switch reconciliation
//!
//! `OvsError` is what the database and link backends report. `SwitchError`
//! is what the switch handle reports to its caller: every variant names the
//! bridge, port or peer that failed so the caller can retry just that unit.

use std::net::AddrParseError;
use std::time::Duration;

use thiserror::Error;

/// Backend errors raised by the OVSDB client and the link manager
#[derive(Error, Debug)]
pub enum OvsError {
    // ========================================================================
    // Socket/Connection Errors
    // ========================================================================
    #[error("OVSDB socket not found at {0}")]
    OvsdbSocketNotFound(String),

    #[error("Failed to connect to OVSDB at {0}: {1}")]
    OvsdbConnection(String, #[source] std::io::Error),

    #[error("OVSDB I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Timeout waiting for OVSDB response to '{0}'")]
    Timeout(String),

    // ========================================================================
    // Protocol Errors
    // ========================================================================
    #[error("OVSDB error: {0}")]
    Rpc(String),

    #[error("OVSDB transaction failed: {0}")]
    Transaction(String),

    #[error("Malformed OVSDB response: {0}")]
    Protocol(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // ========================================================================
    // Lookup Errors
    // ========================================================================
    #[error("Bridge '{0}' not found")]
    BridgeNotFound(String),

    #[error("Port '{0}' not found")]
    PortNotFound(String),

    #[error("Interface '{0}' not found")]
    LinkNotFound(String),

    // ========================================================================
    // Netlink Errors
    // ========================================================================
    #[error("Failed to open netlink connection: {0}")]
    NetlinkConnection(#[source] std::io::Error),

    #[error("Netlink request failed: {0}")]
    Netlink(#[from] rtnetlink::Error),

    // ========================================================================
    // Injected (in-memory backend)
    // ========================================================================
    #[error("Injected failure: {0}")]
    Injected(String),
}

impl OvsError {
    /// Get a helpful suggestion for resolving this error
    pub fn suggestion(&self) -> &'static str {
        match self {
            OvsError::OvsdbSocketNotFound(_) => {
                "Check if OVS is installed: apt install openvswitch-switch"
            }
            OvsError::OvsdbConnection(_, _) => {
                "Start OVS: sudo systemctl start openvswitch-switch"
            }
            OvsError::Timeout(_) => "Increase OVS_SWITCH_RPC_TIMEOUT_MS or check system load",
            OvsError::NetlinkConnection(_) | OvsError::Netlink(_) => {
                "Run with CAP_NET_ADMIN: sudo setcap cap_net_admin+ep <binary>"
            }
            OvsError::LinkNotFound(_) => "Check that the openvswitch kernel module is loaded",
            _ => "Check ovsdb-server and ovs-vswitchd logs for more details",
        }
    }

    /// Returns true if OVS components need to be installed/started
    pub fn needs_ovs(&self) -> bool {
        matches!(
            self,
            OvsError::OvsdbSocketNotFound(_) | OvsError::OvsdbConnection(_, _)
        )
    }
}

/// Why a single tunnel endpoint could not be provisioned
#[derive(Error, Debug)]
pub enum TunnelFailure {
    #[error("invalid peer address: {0}")]
    InvalidAddress(#[from] AddrParseError),

    #[error("port name '{0}' is already taken by another port")]
    NameConflict(String),

    #[error(transparent)]
    Backend(#[from] OvsError),
}

/// Errors reported by [`crate::SwitchHandle`] operations
#[derive(Error, Debug)]
pub enum SwitchError {
    #[error("switch database error on bridge '{bridge}': {source}")]
    Backend {
        bridge: String,
        #[source]
        source: OvsError,
    },

    #[error("invalid interface name '{name}': {reason}")]
    InvalidName { name: String, reason: &'static str },

    #[error("invalid controller endpoint '{endpoint}': {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    #[error("failed to bring up link '{link}': {source}")]
    Link {
        link: String,
        #[source]
        source: OvsError,
    },

    #[error("bridge '{bridge}' link not ready after {waited:?}")]
    BridgeNotReady { bridge: String, waited: Duration },

    #[error("failed to create port '{port}' on bridge '{bridge}': {source}")]
    PortCreate {
        bridge: String,
        port: String,
        #[source]
        source: OvsError,
    },

    #[error("failed to delete port '{port}' from bridge '{bridge}': {source}")]
    PortDelete {
        bridge: String,
        port: String,
        #[source]
        source: OvsError,
    },

    #[error("failed to create tunnel endpoint for peer '{peer}' on bridge '{bridge}': {source}")]
    TunnelCreate {
        bridge: String,
        peer: String,
        #[source]
        source: TunnelFailure,
    },

    #[error("bridge '{0}' does not exist")]
    NotFound(String),
}

impl SwitchError {
    pub(crate) fn backend(bridge: &str, source: OvsError) -> Self {
        SwitchError::Backend {
            bridge: bridge.to_string(),
            source,
        }
    }

    /// Returns true for conditions the caller may treat as non-fatal
    pub fn is_not_found(&self) -> bool {
        matches!(self, SwitchError::NotFound(_))
    }

    /// Returns true if the failure is bad caller input and retrying cannot help
    pub fn is_invalid_input(&self) -> bool {
        match self {
            SwitchError::InvalidName { .. } | SwitchError::InvalidEndpoint { .. } => true,
            SwitchError::TunnelCreate { source, .. } => {
                matches!(source, TunnelFailure::InvalidAddress(_))
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_suggestions() {
        let err = OvsError::OvsdbSocketNotFound("/run/openvswitch/db.sock".into());
        assert!(!err.suggestion().is_empty());
        assert!(err.needs_ovs());
        assert!(!OvsError::Rpc("boom".into()).needs_ovs());
    }

    #[test]
    fn test_switch_error_names_the_unit() {
        let err = SwitchError::TunnelCreate {
            bridge: "br0".into(),
            peer: "10.0.0.3".into(),
            source: TunnelFailure::Backend(OvsError::Injected("down".into())),
        };
        let msg = err.to_string();
        assert!(msg.contains("10.0.0.3"));
        assert!(msg.contains("br0"));
        assert!(!err.is_invalid_input());
    }

    #[test]
    fn test_invalid_input_classification() {
        let parse_err = "not-an-ip".parse::<std::net::IpAddr>().unwrap_err();
        let err = SwitchError::TunnelCreate {
            bridge: "br0".into(),
            peer: "not-an-ip".into(),
            source: TunnelFailure::InvalidAddress(parse_err),
        };
        assert!(err.is_invalid_input());
        assert!(SwitchError::NotFound("br0".into()).is_not_found());
    }
}
