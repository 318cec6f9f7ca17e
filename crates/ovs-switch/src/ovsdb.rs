//! Direct OVSDB JSON-RPC client - no wrappers, pure native protocol
//! Talks directly to /var/run/openvswitch/db.sock

use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

use crate::backend::SwitchDatabase;
use crate::config::SwitchConfig;
use crate::endpoint::ControllerEndpoint;
use crate::error::OvsError;
use crate::port::Port;

pub const DEFAULT_SOCKET_PATHS: &[&str] =
    &["/var/run/openvswitch/db.sock", "/run/openvswitch/db.sock"];

const DATABASE: &str = "Open_vSwitch";

/// Direct OVSDB JSON-RPC client
#[derive(Debug, Clone)]
pub struct OvsdbClient {
    socket_path: String,
    timeout: Duration,
}

impl OvsdbClient {
    /// Use the first OVSDB socket that exists on this host
    pub fn new() -> Self {
        Self::with_socket(default_socket_path())
    }

    /// Create with a custom socket path
    pub fn with_socket(socket_path: impl Into<String>) -> Self {
        Self {
            socket_path: socket_path.into(),
            timeout: Duration::from_secs(10),
        }
    }

    pub fn from_config(config: &SwitchConfig) -> Self {
        Self::with_socket(config.ovsdb_socket.clone()).with_timeout(config.rpc_timeout)
    }

    /// Set timeout for RPC calls
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn socket_path(&self) -> &str {
        &self.socket_path
    }

    /// Send JSON-RPC request and get response
    async fn rpc_call(&self, method: &str, params: Value) -> Result<Value, OvsError> {
        log::debug!("Connecting to OVSDB socket: {}", self.socket_path);
        let stream = UnixStream::connect(&self.socket_path).await.map_err(|e| {
            if Path::new(&self.socket_path).exists() {
                OvsError::OvsdbConnection(self.socket_path.clone(), e)
            } else {
                OvsError::OvsdbSocketNotFound(self.socket_path.clone())
            }
        })?;

        let request = json!({
            "method": method,
            "params": params,
            "id": 0
        });
        let request_str = serde_json::to_string(&request)?;
        log::debug!("OVSDB request: {}", request_str);

        let mut reader = BufReader::new(stream);
        reader.get_mut().write_all(request_str.as_bytes()).await?;
        reader.get_mut().write_all(b"\n").await?;
        reader.get_mut().flush().await?;

        let mut response_line = String::new();
        let bytes_read = tokio::time::timeout(self.timeout, reader.read_line(&mut response_line))
            .await
            .map_err(|_| OvsError::Timeout(method.to_string()))??;
        if bytes_read == 0 {
            return Err(OvsError::Protocol(
                "connection closed by server".to_string(),
            ));
        }
        log::debug!("OVSDB response: {}", response_line.trim());

        let response: Value = serde_json::from_str(&response_line)?;

        // Check for error (only if it's not null)
        if let Some(error) = response.get("error") {
            if !error.is_null() {
                return Err(OvsError::Rpc(error.to_string()));
            }
        }

        Ok(response["result"].clone())
    }

    /// List all databases
    pub async fn list_dbs(&self) -> Result<Vec<String>, OvsError> {
        let result = self.rpc_call("list_dbs", json!([])).await?;
        Ok(serde_json::from_value(result)?)
    }

    /// Transact - execute OVSDB operations, failing on any per-operation error
    pub async fn transact(&self, operations: Value) -> Result<Value, OvsError> {
        let mut params = vec![json!(DATABASE)];
        if let Some(ops_array) = operations.as_array() {
            params.extend(ops_array.iter().cloned());
        }
        let result = self.rpc_call("transact", json!(params)).await?;
        check_transaction(&result)?;
        Ok(result)
    }

    /// Rows of a single select
    async fn select(
        &self,
        table: &str,
        conditions: Value,
        columns: Value,
    ) -> Result<Vec<Value>, OvsError> {
        let result = self
            .transact(json!([{
                "op": "select",
                "table": table,
                "where": conditions,
                "columns": columns
            }]))
            .await?;

        result[0]["rows"]
            .as_array()
            .cloned()
            .ok_or_else(|| OvsError::Protocol(format!("select on {table} returned no rows array")))
    }

    /// Find bridge UUID by name
    async fn find_bridge_uuid(&self, bridge_name: &str) -> Result<Option<String>, OvsError> {
        let rows = self
            .select("Bridge", json!([["name", "==", bridge_name]]), json!(["_uuid"]))
            .await?;
        Ok(rows.first().and_then(|row| parse_uuid(&row["_uuid"])))
    }

    async fn require_bridge_uuid(&self, bridge_name: &str) -> Result<String, OvsError> {
        self.find_bridge_uuid(bridge_name)
            .await?
            .ok_or_else(|| OvsError::BridgeNotFound(bridge_name.to_string()))
    }

    /// List all bridges
    pub async fn list_bridges(&self) -> Result<Vec<String>, OvsError> {
        let rows = self.select("Bridge", json!([]), json!(["name"])).await?;
        Ok(rows
            .iter()
            .filter_map(|row| row["name"].as_str().map(str::to_string))
            .collect())
    }
}

impl Default for OvsdbClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SwitchDatabase for OvsdbClient {
    async fn bridge_exists(&self, bridge: &str) -> Result<bool, OvsError> {
        Ok(self.find_bridge_uuid(bridge).await?.is_some())
    }

    async fn port_exists(&self, name: &str) -> Result<bool, OvsError> {
        let rows = self
            .select("Port", json!([["name", "==", name]]), json!(["name"]))
            .await?;
        Ok(!rows.is_empty())
    }

    async fn create_port(&self, bridge: &str, port: &Port) -> Result<(), OvsError> {
        let creates_bridge = matches!(port, Port::Internal { name } if name == bridge)
            && !self.bridge_exists(bridge).await?;

        let operations = if creates_bridge {
            create_bridge_ops(bridge, port)
        } else {
            let bridge_uuid = self.require_bridge_uuid(bridge).await?;
            attach_port_ops(&bridge_uuid, port)
        };

        self.transact(operations).await?;
        log::info!(
            "Port {} (type: {:?}) added to bridge {}",
            port.name(),
            port.interface_type(),
            bridge
        );
        Ok(())
    }

    async fn delete_port(&self, bridge: &str, name: &str) -> Result<(), OvsError> {
        let rows = self
            .select("Port", json!([["name", "==", name]]), json!(["_uuid"]))
            .await?;
        let port_uuid = rows
            .first()
            .and_then(|row| parse_uuid(&row["_uuid"]))
            .ok_or_else(|| OvsError::PortNotFound(name.to_string()))?;

        let rows = self
            .select(
                "Bridge",
                json!([["name", "==", bridge]]),
                json!(["_uuid", "ports"]),
            )
            .await?;
        let bridge_row = rows
            .first()
            .ok_or_else(|| OvsError::BridgeNotFound(bridge.to_string()))?;
        let bridge_uuid = parse_uuid(&bridge_row["_uuid"])
            .ok_or_else(|| OvsError::Protocol(format!("bridge {bridge} row has no _uuid")))?;
        // port names are global; the row may hang off another bridge
        if !parse_uuid_set(&bridge_row["ports"]).contains(&port_uuid) {
            return Err(OvsError::PortNotFound(format!("{name} on bridge {bridge}")));
        }

        self.transact(json!([
            {
                "op": "mutate",
                "table": "Bridge",
                "where": [["_uuid", "==", ["uuid", bridge_uuid]]],
                "mutations": [["ports", "delete", ["uuid", port_uuid]]]
            },
            {
                "op": "delete",
                "table": "Port",
                "where": [["_uuid", "==", ["uuid", port_uuid]]]
            },
            {
                "op": "delete",
                "table": "Interface",
                "where": [["name", "==", name]]
            }
        ]))
        .await?;
        Ok(())
    }

    async fn tunnel_ports_for(&self, peer: IpAddr) -> Result<Vec<String>, OvsError> {
        let rows = self
            .select(
                "Interface",
                json!([["type", "==", "vxlan"]]),
                json!(["name", "options"]),
            )
            .await?;
        Ok(find_tunnels_by_peer(&rows, peer))
    }

    async fn controller_exists(
        &self,
        bridge: &str,
        endpoint: &ControllerEndpoint,
    ) -> Result<bool, OvsError> {
        let rows = self
            .select("Bridge", json!([["name", "==", bridge]]), json!(["controller"]))
            .await?;
        let attached = match rows.first() {
            Some(row) => parse_uuid_set(&row["controller"]),
            None => return Err(OvsError::BridgeNotFound(bridge.to_string())),
        };
        if attached.is_empty() {
            return Ok(false);
        }

        let rows = self
            .select(
                "Controller",
                json!([["target", "==", endpoint.target()]]),
                json!(["_uuid"]),
            )
            .await?;
        Ok(rows
            .iter()
            .filter_map(|row| parse_uuid(&row["_uuid"]))
            .any(|uuid| attached.contains(&uuid)))
    }

    async fn set_controller(
        &self,
        bridge: &str,
        endpoint: &ControllerEndpoint,
    ) -> Result<(), OvsError> {
        let bridge_uuid = self.require_bridge_uuid(bridge).await?;
        self.transact(json!([
            {
                "op": "insert",
                "table": "Controller",
                "uuid-name": "ctrl",
                "row": { "target": endpoint.target() }
            },
            {
                "op": "mutate",
                "table": "Bridge",
                "where": [["_uuid", "==", ["uuid", bridge_uuid]]],
                "mutations": [["controller", "insert", ["set", [["named-uuid", "ctrl"]]]]]
            }
        ]))
        .await?;
        log::info!("Controller {} set on bridge {}", endpoint.target(), bridge);
        Ok(())
    }

    async fn delete_bridge(&self, bridge: &str) -> Result<(), OvsError> {
        let bridge_uuid = self.require_bridge_uuid(bridge).await?;

        // Port, Interface and Controller rows are not root rows; ovsdb-server
        // garbage-collects them once the bridge no longer references them.
        self.transact(json!([
            {
                "op": "mutate",
                "table": "Open_vSwitch",
                "where": [],
                "mutations": [["bridges", "delete", ["uuid", bridge_uuid]]]
            },
            {
                "op": "delete",
                "table": "Bridge",
                "where": [["_uuid", "==", ["uuid", bridge_uuid]]]
            }
        ]))
        .await?;
        Ok(())
    }
}

/// First existing well-known socket, else the conventional path
pub fn default_socket_path() -> String {
    DEFAULT_SOCKET_PATHS
        .iter()
        .find(|p| Path::new(p).exists())
        .unwrap_or(&DEFAULT_SOCKET_PATHS[0])
        .to_string()
}

/// uuid-name values must be identifiers: [a-zA-Z_][a-zA-Z0-9_]*
fn row_ref(prefix: &str, name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!("{prefix}_{cleaned}")
}

fn interface_row(port: &Port) -> Value {
    let mut row = json!({ "name": port.name() });
    if !port.interface_type().is_empty() {
        row["type"] = json!(port.interface_type());
    }
    if let Some(peer) = port.peer() {
        row["options"] = json!(["map", [["key", "flow"], ["remote_ip", peer.to_string()]]]);
    }
    row
}

fn port_row(port: &Port, iface_ref: &str) -> Value {
    let mut row = json!({
        "name": port.name(),
        "interfaces": ["set", [["named-uuid", iface_ref]]]
    });
    if let Some(tag) = port.vlan_tag() {
        row["tag"] = json!(tag);
    }
    if let Some(peer) = port.peer() {
        row["external_ids"] = json!(["map", [["peer", peer.to_string()]]]);
    }
    row
}

/// Bridge + internal port + interface in one transaction
fn create_bridge_ops(bridge: &str, port: &Port) -> Value {
    let bridge_ref = row_ref("bridge", bridge);
    let port_ref = row_ref("port", port.name());
    let iface_ref = row_ref("iface", port.name());

    json!([
        {
            "op": "insert",
            "table": "Interface",
            "uuid-name": iface_ref,
            "row": interface_row(port)
        },
        {
            "op": "insert",
            "table": "Port",
            "uuid-name": port_ref,
            "row": port_row(port, &iface_ref)
        },
        {
            "op": "insert",
            "table": "Bridge",
            "uuid-name": bridge_ref,
            "row": {
                "name": bridge,
                "ports": ["set", [["named-uuid", port_ref]]]
            }
        },
        {
            "op": "mutate",
            "table": "Open_vSwitch",
            "where": [],
            "mutations": [["bridges", "insert", ["set", [["named-uuid", bridge_ref]]]]]
        }
    ])
}

/// Port + interface attached to an existing bridge
fn attach_port_ops(bridge_uuid: &str, port: &Port) -> Value {
    let port_ref = row_ref("port", port.name());
    let iface_ref = row_ref("iface", port.name());

    json!([
        {
            "op": "insert",
            "table": "Interface",
            "uuid-name": iface_ref,
            "row": interface_row(port)
        },
        {
            "op": "insert",
            "table": "Port",
            "uuid-name": port_ref,
            "row": port_row(port, &iface_ref)
        },
        {
            "op": "mutate",
            "table": "Bridge",
            "where": [["_uuid", "==", ["uuid", bridge_uuid]]],
            "mutations": [["ports", "insert", ["set", [["named-uuid", port_ref]]]]]
        }
    ])
}

/// A transact result is an array; failed operations carry an "error" member
fn check_transaction(result: &Value) -> Result<(), OvsError> {
    let ops = result
        .as_array()
        .ok_or_else(|| OvsError::Protocol(format!("transact result is not an array: {result}")))?;
    for op in ops {
        if let Some(error) = op.get("error") {
            let details = op.get("details").and_then(Value::as_str).unwrap_or_default();
            return Err(OvsError::Transaction(format!("{error} {details}").trim().to_string()));
        }
    }
    Ok(())
}

/// ["uuid", "<id>"]
fn parse_uuid(value: &Value) -> Option<String> {
    match value.as_array()?.as_slice() {
        [tag, id] if tag == "uuid" => id.as_str().map(str::to_string),
        _ => None,
    }
}

/// A set column holds either one bare atom or ["set", [atoms...]]
fn parse_uuid_set(value: &Value) -> Vec<String> {
    match value.as_array().map(Vec::as_slice) {
        Some([tag, members]) if tag == "set" => members
            .as_array()
            .map(|atoms| atoms.iter().filter_map(parse_uuid).collect())
            .unwrap_or_default(),
        _ => parse_uuid(value).into_iter().collect(),
    }
}

/// ["map", [[k, v], ...]] lookup
fn map_get<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    match value.as_array()?.as_slice() {
        [tag, pairs] if tag == "map" => pairs.as_array()?.iter().find_map(|pair| {
            match pair.as_array()?.as_slice() {
                [k, v] if k == key => v.as_str(),
                _ => None,
            }
        }),
        _ => None,
    }
}

/// Names of the vxlan interfaces whose remote_ip equals `peer` in any spelling
fn find_tunnels_by_peer(rows: &[Value], peer: IpAddr) -> Vec<String> {
    rows.iter()
        .filter_map(|row| {
            let remote: IpAddr = map_get(&row["options"], "remote_ip")?.parse().ok()?;
            if remote == peer {
                row["name"].as_str().map(str::to_string)
            } else {
                None
            }
        })
        .collect()
}
