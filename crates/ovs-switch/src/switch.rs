//! Switch handle: converges one bridge toward a desired state
//!
//! Every operation checks the database before it writes, so the whole
//! sequence can be re-run after a partial failure. The database handle is
//! passed into each call; the switch handle only remembers the bridge name
//! and the controller it last set.

use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::backend::{LinkManager, SwitchDatabase};
use crate::endpoint::ControllerEndpoint;
use crate::error::{SwitchError, TunnelFailure};
use crate::port::{validate_ifname, Port};
use crate::vtep::{parse_peer, vtep_port_name};

/// How long to wait for a new bridge's kernel link to appear
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessPolicy {
    pub timeout: Duration,
    pub interval: Duration,
}

impl Default for ReadinessPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            interval: Duration::from_millis(50),
        }
    }
}

/// One local OVS bridge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwitchHandle {
    bridge: String,
    controller: Option<ControllerEndpoint>,
}

impl SwitchHandle {
    /// Open `bridge_name`, creating the bridge through its internal port if
    /// it does not exist, wait for its link, then bring the link up.
    pub async fn open_or_create<D, L>(
        db: &D,
        links: &L,
        bridge_name: &str,
        readiness: &ReadinessPolicy,
    ) -> Result<Self, SwitchError>
    where
        D: SwitchDatabase + ?Sized,
        L: LinkManager + ?Sized,
    {
        validate_ifname(bridge_name).map_err(|reason| SwitchError::InvalidName {
            name: bridge_name.to_string(),
            reason,
        })?;

        let exists = db
            .port_exists(bridge_name)
            .await
            .map_err(|e| SwitchError::backend(bridge_name, e))?;

        if exists {
            debug!("Bridge {} already present", bridge_name);
        } else {
            info!("Creating bridge {}", bridge_name);
            db.create_port(bridge_name, &Port::internal(bridge_name))
                .await
                .map_err(|source| SwitchError::PortCreate {
                    bridge: bridge_name.to_string(),
                    port: bridge_name.to_string(),
                    source,
                })?;
        }

        wait_for_link(links, bridge_name, readiness).await?;

        links
            .set_link_up(bridge_name)
            .await
            .map_err(|source| SwitchError::Link {
                link: bridge_name.to_string(),
                source,
            })?;
        info!("Bridge {} is up", bridge_name);

        Ok(Self {
            bridge: bridge_name.to_string(),
            controller: None,
        })
    }

    /// Handle for a bridge that is neither created nor waited for; used when
    /// tearing a sandbox down
    pub fn attach(bridge_name: &str) -> Self {
        Self {
            bridge: bridge_name.to_string(),
            controller: None,
        }
    }

    pub fn bridge_name(&self) -> &str {
        &self.bridge
    }

    /// Controller last set through this handle
    pub fn controller(&self) -> Option<&ControllerEndpoint> {
        self.controller.as_ref()
    }

    /// Attach an existing interface as a regular port. No-op if a port of
    /// that name is already known; the interface itself is not checked.
    pub async fn add_port<D>(&self, db: &D, if_name: &str) -> Result<(), SwitchError>
    where
        D: SwitchDatabase + ?Sized,
    {
        let port_err = |source| SwitchError::PortCreate {
            bridge: self.bridge.clone(),
            port: if_name.to_string(),
            source,
        };

        if let Err(reason) = validate_ifname(if_name) {
            return Err(SwitchError::InvalidName {
                name: if_name.to_string(),
                reason,
            });
        }
        if db.port_exists(if_name).await.map_err(port_err)? {
            debug!("Port {} already present", if_name);
            return Ok(());
        }

        db.create_port(&self.bridge, &Port::regular(if_name))
            .await
            .map_err(port_err)?;
        info!("Added port {} to bridge {}", if_name, self.bridge);
        Ok(())
    }

    /// Detach a port. No-op if no port of that name exists.
    pub async fn remove_port<D>(&self, db: &D, if_name: &str) -> Result<(), SwitchError>
    where
        D: SwitchDatabase + ?Sized,
    {
        let port_err = |source| SwitchError::PortDelete {
            bridge: self.bridge.clone(),
            port: if_name.to_string(),
            source,
        };

        if !db.port_exists(if_name).await.map_err(port_err)? {
            debug!("Port {} already absent", if_name);
            return Ok(());
        }

        db.delete_port(&self.bridge, if_name)
            .await
            .map_err(port_err)?;
        info!("Removed port {} from bridge {}", if_name, self.bridge);
        Ok(())
    }

    /// Validate `host`/`port` and register the controller on the bridge.
    /// Nothing reaches the database if validation fails.
    pub async fn set_controller<D>(
        &mut self,
        db: &D,
        host: &str,
        port: &str,
    ) -> Result<(), SwitchError>
    where
        D: SwitchDatabase + ?Sized,
    {
        let endpoint = ControllerEndpoint::parse(host, port)?;
        self.set_controller_endpoint(db, endpoint).await
    }

    pub async fn set_controller_endpoint<D>(
        &mut self,
        db: &D,
        endpoint: ControllerEndpoint,
    ) -> Result<(), SwitchError>
    where
        D: SwitchDatabase + ?Sized,
    {
        let attached = db
            .controller_exists(&self.bridge, &endpoint)
            .await
            .map_err(|e| SwitchError::backend(&self.bridge, e))?;

        if attached {
            debug!("Controller {} already set on {}", endpoint, self.bridge);
        } else {
            db.set_controller(&self.bridge, &endpoint)
                .await
                .map_err(|e| SwitchError::backend(&self.bridge, e))?;
            info!("Controller {} set on bridge {}", endpoint, self.bridge);
        }

        self.controller = Some(endpoint);
        Ok(())
    }

    /// Delete the bridge with all of its ports and controllers
    pub async fn delete<D>(&self, db: &D) -> Result<(), SwitchError>
    where
        D: SwitchDatabase + ?Sized,
    {
        let exists = db
            .bridge_exists(&self.bridge)
            .await
            .map_err(|e| SwitchError::backend(&self.bridge, e))?;
        if !exists {
            return Err(SwitchError::NotFound(self.bridge.clone()));
        }

        db.delete_bridge(&self.bridge)
            .await
            .map_err(|e| SwitchError::backend(&self.bridge, e))?;
        info!("Deleted bridge {}", self.bridge);
        Ok(())
    }

    /// Make sure a VXLAN port exists for every peer, in input order.
    ///
    /// Not transactional: the first failure is returned naming its peer and
    /// the endpoints created before it stay in place. Returns the names of
    /// the ports created by this call.
    pub async fn ensure_tunnel_endpoints<D, S>(
        &self,
        db: &D,
        peers: &[S],
    ) -> Result<Vec<String>, SwitchError>
    where
        D: SwitchDatabase + ?Sized,
        S: AsRef<str>,
    {
        let mut created = Vec::new();

        for peer_str in peers {
            let peer_str = peer_str.as_ref();
            let tunnel_err = |source: TunnelFailure| SwitchError::TunnelCreate {
                bridge: self.bridge.clone(),
                peer: peer_str.to_string(),
                source,
            };

            let peer = parse_peer(peer_str).map_err(|e| tunnel_err(e.into()))?;
            let name = vtep_port_name(peer);

            let serving = db
                .tunnel_ports_for(peer)
                .await
                .map_err(|e| tunnel_err(e.into()))?;
            if serving.contains(&name) {
                debug!("Tunnel {} to {} already present", name, peer);
                continue;
            }
            if !serving.is_empty() {
                warn!(
                    "Peer {} is served by stale port(s) {}, adding {}",
                    peer,
                    serving.join(", "),
                    name
                );
            }

            if db.port_exists(&name).await.map_err(|e| tunnel_err(e.into()))? {
                return Err(tunnel_err(TunnelFailure::NameConflict(name)));
            }

            db.create_port(&self.bridge, &Port::tunnel(name.clone(), peer))
                .await
                .map_err(|e| tunnel_err(e.into()))?;
            info!("Created tunnel {} to {} on bridge {}", name, peer, self.bridge);
            created.push(name);
        }

        Ok(created)
    }
}

/// Poll until the bridge's kernel link exists or the policy's timeout elapses
async fn wait_for_link<L>(
    links: &L,
    bridge: &str,
    policy: &ReadinessPolicy,
) -> Result<(), SwitchError>
where
    L: LinkManager + ?Sized,
{
    let interval = policy.interval.max(Duration::from_millis(1));
    let start = Instant::now();

    loop {
        let ready = links
            .link_exists(bridge)
            .await
            .map_err(|source| SwitchError::Link {
                link: bridge.to_string(),
                source,
            })?;
        if ready {
            debug!("Link {} ready after {:?}", bridge, start.elapsed());
            return Ok(());
        }

        let waited = start.elapsed();
        if waited >= policy.timeout {
            return Err(SwitchError::BridgeNotReady {
                bridge: bridge.to_string(),
                waited,
            });
        }
        sleep(interval.min(policy.timeout - waited)).await;
    }
}
