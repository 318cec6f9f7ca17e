//! Sandbox ADD/DEL glue
//!
//! `converge` drives a bridge to a `DesiredBridge` and returns the interface
//! record the caller reports back; `release` undoes a sandbox's attachments.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::backend::{LinkManager, SwitchDatabase};
use crate::endpoint::ControllerEndpoint;
use crate::error::SwitchError;
use crate::switch::{ReadinessPolicy, SwitchHandle};

/// Desired state of one bridge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesiredBridge {
    /// Bridge name (e.g. "br0")
    pub bridge: String,

    /// Interfaces to attach as regular ports
    #[serde(default)]
    pub ports: Vec<String>,

    /// OpenFlow controller as "host:port" or "[v6]:port"
    #[serde(default)]
    pub controller: Option<String>,

    /// Remote VXLAN peers
    #[serde(default)]
    pub tunnel_peers: Vec<String>,
}

/// Interface description handed back to the caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeInterface {
    pub name: String,
}

/// Run the full operation sequence for `desired`.
///
/// The controller string is validated before anything is written.
pub async fn converge<D, L>(
    db: &D,
    links: &L,
    desired: &DesiredBridge,
    readiness: &ReadinessPolicy,
) -> Result<BridgeInterface, SwitchError>
where
    D: SwitchDatabase + ?Sized,
    L: LinkManager + ?Sized,
{
    info!("Converging bridge {}", desired.bridge);

    let controller = desired
        .controller
        .as_deref()
        .map(str::parse::<ControllerEndpoint>)
        .transpose()?;

    let mut switch = SwitchHandle::open_or_create(db, links, &desired.bridge, readiness).await?;

    for port in &desired.ports {
        switch.add_port(db, port).await?;
    }

    if let Some(endpoint) = controller {
        switch.set_controller_endpoint(db, endpoint).await?;
    }

    if !desired.tunnel_peers.is_empty() {
        let created = switch
            .ensure_tunnel_endpoints(db, desired.tunnel_peers.as_slice())
            .await?;
        info!("  {} tunnel endpoint(s) created", created.len());
    }

    info!("✓ Bridge '{}' converged", desired.bridge);
    Ok(BridgeInterface {
        name: switch.bridge_name().to_string(),
    })
}

/// Detach `ports` from `bridge` and optionally delete the bridge.
///
/// A bridge that is already gone is not an error here.
pub async fn release<D>(
    db: &D,
    bridge: &str,
    ports: &[String],
    delete_bridge: bool,
) -> Result<(), SwitchError>
where
    D: SwitchDatabase + ?Sized,
{
    let exists = db
        .bridge_exists(bridge)
        .await
        .map_err(|e| SwitchError::backend(bridge, e))?;
    if !exists {
        warn!("Bridge {} already gone, nothing to release", bridge);
        return Ok(());
    }

    let switch = SwitchHandle::attach(bridge);
    for port in ports {
        switch.remove_port(db, port).await?;
    }

    if delete_bridge {
        match switch.delete(db).await {
            Err(e) if e.is_not_found() => warn!("{}", e),
            other => other?,
        }
    }

    info!("✓ Released {} port(s) from bridge '{}'", ports.len(), bridge);
    Ok(())
}
