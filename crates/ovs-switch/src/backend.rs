//! Capabilities the switch handle drives
//!
//! The database is the source of truth. Every method is a fallible remote
//! call; the handle checks existence before it creates or deletes anything.

use std::net::IpAddr;

use async_trait::async_trait;

use crate::endpoint::ControllerEndpoint;
use crate::error::OvsError;
use crate::port::Port;

/// Local switch configuration database (ovsdb-server in production)
#[async_trait]
pub trait SwitchDatabase: Send + Sync {
    async fn bridge_exists(&self, bridge: &str) -> Result<bool, OvsError>;

    /// Port names are unique database-wide, not per bridge
    async fn port_exists(&self, name: &str) -> Result<bool, OvsError>;

    /// Create a port and its interface on `bridge`.
    ///
    /// Creating `Port::Internal` named after the bridge also creates the
    /// bridge when it does not exist yet.
    async fn create_port(&self, bridge: &str, port: &Port) -> Result<(), OvsError>;

    async fn delete_port(&self, bridge: &str, name: &str) -> Result<(), OvsError>;

    /// Names of every tunnel port whose remote end is `peer`
    async fn tunnel_ports_for(&self, peer: IpAddr) -> Result<Vec<String>, OvsError>;

    async fn controller_exists(
        &self,
        bridge: &str,
        endpoint: &ControllerEndpoint,
    ) -> Result<bool, OvsError>;

    /// Attach a controller; earlier controllers on the bridge stay attached
    async fn set_controller(
        &self,
        bridge: &str,
        endpoint: &ControllerEndpoint,
    ) -> Result<(), OvsError>;

    /// Remove the bridge together with its ports and controllers
    async fn delete_bridge(&self, bridge: &str) -> Result<(), OvsError>;
}

/// Kernel link management
#[async_trait]
pub trait LinkManager: Send + Sync {
    async fn link_exists(&self, name: &str) -> Result<bool, OvsError>;

    async fn set_link_up(&self, name: &str) -> Result<(), OvsError>;
}
