//! ovs-switch: Open vSwitch bridge reconciliation for container networking
//!
//! This crate provides:
//! - `SwitchHandle`: idempotent bridge, port, controller and VXLAN endpoint operations
//! - OVSDB JSON-RPC client implementing the `SwitchDatabase` capability
//! - rtnetlink-backed `LinkManager` for bridge link readiness and bring-up
//! - Deterministic VXLAN endpoint port naming
//! - In-memory backends for dry runs and tests
//! - ADD/DEL provisioning glue for sandbox setup and teardown

pub mod backend;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod link;
pub mod memory;
pub mod ovsdb;
pub mod port;
pub mod provision;
pub mod switch;
pub mod vtep;

pub use backend::{LinkManager, SwitchDatabase};
pub use config::SwitchConfig;
pub use endpoint::ControllerEndpoint;
pub use error::{OvsError, SwitchError, TunnelFailure};
pub use link::NetlinkLinks;
pub use memory::{MemorySwitchDb, StaticLinks};
pub use ovsdb::OvsdbClient;
pub use port::Port;
pub use provision::{converge, release, BridgeInterface, DesiredBridge};
pub use switch::{ReadinessPolicy, SwitchHandle};
pub use vtep::{vtep_port_name, vtep_port_name_for};

/// Prelude for convenient imports
pub mod prelude {
    pub use super::backend::{LinkManager, SwitchDatabase};
    pub use super::error::SwitchError;
    pub use super::ovsdb::OvsdbClient;
    pub use super::link::NetlinkLinks;
    pub use super::switch::{ReadinessPolicy, SwitchHandle};
}
