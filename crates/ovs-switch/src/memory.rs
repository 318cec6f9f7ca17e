//! In-memory backends
//!
//! `MemorySwitchDb` follows the OVSDB client's contract (database-wide port
//! names, bridge creation through its internal port, cascading bridge
//! delete) and records every call and every successful mutation.
//! `StaticLinks` stands in for the kernel. Both back the CLI's dry-run mode.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::net::IpAddr;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use crate::backend::{LinkManager, SwitchDatabase};
use crate::endpoint::ControllerEndpoint;
use crate::error::OvsError;
use crate::port::Port;

#[derive(Debug, Default)]
struct BridgeRecord {
    controllers: Vec<ControllerEndpoint>,
}

#[derive(Debug, Default)]
struct DbState {
    bridges: BTreeMap<String, BridgeRecord>,
    // port name -> (owning bridge, port)
    ports: BTreeMap<String, (String, Port)>,
    mutations: usize,
    calls: Vec<String>,
    failing_ports: HashSet<String>,
    unavailable: bool,
}

impl DbState {
    fn record(&mut self, call: String) -> Result<(), OvsError> {
        self.calls.push(call);
        if self.unavailable {
            return Err(OvsError::Injected("database unavailable".to_string()));
        }
        Ok(())
    }
}

/// Switch database held in process memory
#[derive(Debug, Default)]
pub struct MemorySwitchDb {
    state: Mutex<DbState>,
}

impl MemorySwitchDb {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, DbState> {
        // a panicking test thread must not hide the state from the others
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Make `create_port` fail for this port name
    pub fn fail_create_of(&self, port: impl Into<String>) {
        self.lock().failing_ports.insert(port.into());
    }

    /// Make every call fail as if ovsdb-server were down
    pub fn set_unavailable(&self, unavailable: bool) {
        self.lock().unavailable = unavailable;
    }

    /// Undo `fail_create_of` and `set_unavailable`
    pub fn clear_failures(&self) {
        let mut state = self.lock();
        state.failing_ports.clear();
        state.unavailable = false;
    }

    /// Number of successful writes so far
    pub fn mutations(&self) -> usize {
        self.lock().mutations
    }

    /// Every call made so far, e.g. `port_exists(veth1)`
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    pub fn bridges(&self) -> Vec<String> {
        self.lock().bridges.keys().cloned().collect()
    }

    /// Ports on a bridge, ordered by name
    pub fn ports_on(&self, bridge: &str) -> Vec<Port> {
        self.lock()
            .ports
            .values()
            .filter(|(owner, _)| owner == bridge)
            .map(|(_, port)| port.clone())
            .collect()
    }

    pub fn controllers_on(&self, bridge: &str) -> Vec<ControllerEndpoint> {
        self.lock()
            .bridges
            .get(bridge)
            .map(|b| b.controllers.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl SwitchDatabase for MemorySwitchDb {
    async fn bridge_exists(&self, bridge: &str) -> Result<bool, OvsError> {
        let mut state = self.lock();
        state.record(format!("bridge_exists({bridge})"))?;
        Ok(state.bridges.contains_key(bridge))
    }

    async fn port_exists(&self, name: &str) -> Result<bool, OvsError> {
        let mut state = self.lock();
        state.record(format!("port_exists({name})"))?;
        Ok(state.ports.contains_key(name))
    }

    async fn create_port(&self, bridge: &str, port: &Port) -> Result<(), OvsError> {
        let mut state = self.lock();
        state.record(format!("create_port({bridge}, {})", port.name()))?;

        if state.failing_ports.contains(port.name()) {
            return Err(OvsError::Injected(format!("create of {} refused", port.name())));
        }
        if state.ports.contains_key(port.name()) {
            return Err(OvsError::Transaction(format!(
                "constraint violation: duplicate port name {}",
                port.name()
            )));
        }
        if !state.bridges.contains_key(bridge) {
            match port {
                Port::Internal { name } if name == bridge => {
                    state.bridges.insert(bridge.to_string(), BridgeRecord::default());
                }
                _ => return Err(OvsError::BridgeNotFound(bridge.to_string())),
            }
        }

        state
            .ports
            .insert(port.name().to_string(), (bridge.to_string(), port.clone()));
        state.mutations += 1;
        Ok(())
    }

    async fn delete_port(&self, bridge: &str, name: &str) -> Result<(), OvsError> {
        let mut state = self.lock();
        state.record(format!("delete_port({bridge}, {name})"))?;

        if !state.bridges.contains_key(bridge) {
            return Err(OvsError::BridgeNotFound(bridge.to_string()));
        }
        match state.ports.get(name) {
            Some((owner, _)) if owner == bridge => {}
            _ => return Err(OvsError::PortNotFound(name.to_string())),
        }
        state.ports.remove(name);
        state.mutations += 1;
        Ok(())
    }

    async fn tunnel_ports_for(&self, peer: IpAddr) -> Result<Vec<String>, OvsError> {
        let mut state = self.lock();
        state.record(format!("tunnel_ports_for({peer})"))?;
        Ok(state
            .ports
            .values()
            .filter(|(_, port)| port.peer() == Some(peer))
            .map(|(_, port)| port.name().to_string())
            .collect())
    }

    async fn controller_exists(
        &self,
        bridge: &str,
        endpoint: &ControllerEndpoint,
    ) -> Result<bool, OvsError> {
        let mut state = self.lock();
        state.record(format!("controller_exists({bridge}, {endpoint})"))?;
        state
            .bridges
            .get(bridge)
            .map(|b| b.controllers.contains(endpoint))
            .ok_or_else(|| OvsError::BridgeNotFound(bridge.to_string()))
    }

    async fn set_controller(
        &self,
        bridge: &str,
        endpoint: &ControllerEndpoint,
    ) -> Result<(), OvsError> {
        let mut state = self.lock();
        state.record(format!("set_controller({bridge}, {endpoint})"))?;
        let record = state
            .bridges
            .get_mut(bridge)
            .ok_or_else(|| OvsError::BridgeNotFound(bridge.to_string()))?;
        record.controllers.push(endpoint.clone());
        state.mutations += 1;
        Ok(())
    }

    async fn delete_bridge(&self, bridge: &str) -> Result<(), OvsError> {
        let mut state = self.lock();
        state.record(format!("delete_bridge({bridge})"))?;
        if state.bridges.remove(bridge).is_none() {
            return Err(OvsError::BridgeNotFound(bridge.to_string()));
        }
        state.ports.retain(|_, (owner, _)| owner != bridge);
        state.mutations += 1;
        Ok(())
    }
}

#[derive(Debug, Default)]
struct LinkState {
    present: HashSet<String>,
    up: HashSet<String>,
    // remaining negative polls before a link shows up
    pending: HashMap<String, u32>,
    failing_up: HashSet<String>,
    auto_create: bool,
    polls: usize,
}

/// Kernel links held in process memory
#[derive(Debug, Default)]
pub struct StaticLinks {
    state: Mutex<LinkState>,
}

impl StaticLinks {
    /// Every queried link exists, as if the datapath were instantaneous
    pub fn new() -> Self {
        let links = Self::default();
        links.lock().auto_create = true;
        links
    }

    /// No link exists until added
    pub fn empty() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, LinkState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn add_link(&self, name: impl Into<String>) {
        self.lock().present.insert(name.into());
    }

    /// The link appears only after `polls` lookups have reported it missing
    pub fn appear_after(&self, name: impl Into<String>, polls: u32) {
        self.lock().pending.insert(name.into(), polls);
    }

    pub fn fail_set_up(&self, name: impl Into<String>) {
        self.lock().failing_up.insert(name.into());
    }

    pub fn is_up(&self, name: &str) -> bool {
        self.lock().up.contains(name)
    }

    /// Number of `link_exists` calls so far
    pub fn polls(&self) -> usize {
        self.lock().polls
    }
}

#[async_trait]
impl LinkManager for StaticLinks {
    async fn link_exists(&self, name: &str) -> Result<bool, OvsError> {
        let mut state = self.lock();
        state.polls += 1;
        if state.present.contains(name) {
            return Ok(true);
        }
        match state.pending.get(name).copied() {
            Some(0) => {
                state.pending.remove(name);
                state.present.insert(name.to_string());
                return Ok(true);
            }
            Some(remaining) => {
                state.pending.insert(name.to_string(), remaining - 1);
                return Ok(false);
            }
            None => {}
        }
        if state.auto_create {
            state.present.insert(name.to_string());
            return Ok(true);
        }
        Ok(false)
    }

    async fn set_link_up(&self, name: &str) -> Result<(), OvsError> {
        let mut state = self.lock();
        if state.failing_up.contains(name) {
            return Err(OvsError::Injected(format!("cannot set {name} up")));
        }
        if !state.present.contains(name) {
            return Err(OvsError::LinkNotFound(name.to_string()));
        }
        state.up.insert(name.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_internal_port_creates_bridge() {
        let db = MemorySwitchDb::new();
        db.create_port("br0", &Port::internal("br0")).await.unwrap();
        assert!(db.bridge_exists("br0").await.unwrap());
        assert_eq!(db.mutations(), 1);

        let err = db.create_port("br1", &Port::regular("veth1")).await.unwrap_err();
        assert!(matches!(err, OvsError::BridgeNotFound(_)));
    }

    #[tokio::test]
    async fn test_port_names_are_global() {
        let db = MemorySwitchDb::new();
        db.create_port("br0", &Port::internal("br0")).await.unwrap();
        db.create_port("br1", &Port::internal("br1")).await.unwrap();
        db.create_port("br0", &Port::regular("veth1")).await.unwrap();
        assert!(db.create_port("br1", &Port::regular("veth1")).await.is_err());
        assert!(db.delete_port("br1", "veth1").await.is_err());
    }

    #[tokio::test]
    async fn test_delete_bridge_cascades() {
        let db = MemorySwitchDb::new();
        db.create_port("br0", &Port::internal("br0")).await.unwrap();
        db.create_port("br0", &Port::regular("veth1")).await.unwrap();
        db.delete_bridge("br0").await.unwrap();
        assert!(!db.port_exists("veth1").await.unwrap());
        assert!(db.bridges().is_empty());
    }

    #[tokio::test]
    async fn test_unavailable_still_logs_call() {
        let db = MemorySwitchDb::new();
        db.set_unavailable(true);
        assert!(db.port_exists("x").await.is_err());
        assert_eq!(db.calls(), vec!["port_exists(x)".to_string()]);
    }

    #[tokio::test]
    async fn test_links_appear_after_polls() {
        let links = StaticLinks::empty();
        links.appear_after("br0", 2);
        assert!(!links.link_exists("br0").await.unwrap());
        assert!(!links.link_exists("br0").await.unwrap());
        assert!(links.link_exists("br0").await.unwrap());
        links.set_link_up("br0").await.unwrap();
        assert!(links.is_up("br0"));
        assert!(links.set_link_up("br1").await.is_err());
    }
}
