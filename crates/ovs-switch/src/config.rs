//! Environment Configuration Loader
//!
//! Settings come from `OVS_SWITCH_*` environment variables. An environment
//! file can pre-populate them: `$OVS_SWITCH_ENV_FILE`, then
//! `/etc/ovs-switch/environment`, then `.env`. Variables that are already
//! set are never overridden.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::ovsdb::default_socket_path;
use crate::switch::ReadinessPolicy;

/// Environment file locations tried when `OVS_SWITCH_ENV_FILE` is unset
pub const ENV_FILE_PATHS: &[&str] = &["/etc/ovs-switch/environment", ".env"];

pub const ENV_FILE_VAR: &str = "OVS_SWITCH_ENV_FILE";

pub const ENV_OVSDB_SOCKET: &str = "OVS_SWITCH_OVSDB_SOCKET";
pub const ENV_RPC_TIMEOUT_MS: &str = "OVS_SWITCH_RPC_TIMEOUT_MS";
pub const ENV_READY_TIMEOUT_MS: &str = "OVS_SWITCH_READY_TIMEOUT_MS";
pub const ENV_READY_INTERVAL_MS: &str = "OVS_SWITCH_READY_INTERVAL_MS";

/// Runtime settings for the OVSDB client and the bridge readiness wait
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwitchConfig {
    pub ovsdb_socket: String,
    pub rpc_timeout: Duration,
    pub readiness: ReadinessPolicy,
}

impl Default for SwitchConfig {
    fn default() -> Self {
        Self {
            ovsdb_socket: default_socket_path(),
            rpc_timeout: Duration::from_secs(10),
            readiness: ReadinessPolicy::default(),
        }
    }
}

impl SwitchConfig {
    /// Build from the process environment, falling back to defaults
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let millis = |key: &str, default: Duration| {
            match lookup(key).filter(|v| !v.is_empty()) {
                Some(raw) => match raw.trim().parse::<u64>() {
                    Ok(ms) => Duration::from_millis(ms),
                    Err(_) => {
                        warn!("Ignoring {}={:?}: not a number of milliseconds", key, raw);
                        default
                    }
                },
                None => default,
            }
        };

        Self {
            ovsdb_socket: lookup(ENV_OVSDB_SOCKET)
                .filter(|v| !v.is_empty())
                .unwrap_or(defaults.ovsdb_socket),
            rpc_timeout: millis(ENV_RPC_TIMEOUT_MS, defaults.rpc_timeout),
            readiness: ReadinessPolicy {
                timeout: millis(ENV_READY_TIMEOUT_MS, defaults.readiness.timeout),
                interval: millis(ENV_READY_INTERVAL_MS, defaults.readiness.interval),
            },
        }
    }
}

/// Parsed `KEY=VALUE` environment file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvFile {
    path: PathBuf,
    entries: Vec<(String, String)>,
}

impl EnvFile {
    /// Read and parse `path`; `Ok(None)` when it does not exist
    pub fn read(path: impl AsRef<Path>) -> io::Result<Option<Self>> {
        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(content) => Ok(Some(Self::parse(path, &content))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn parse(path: impl Into<PathBuf>, content: &str) -> Self {
        Self {
            path: path.into(),
            entries: content.lines().filter_map(parse_env_line).collect(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn entries(&self) -> &[(String, String)] {
        &self.entries
    }

    /// Entries whose key `is_set` does not report as already present
    fn pending<'a>(
        &'a self,
        is_set: impl Fn(&str) -> bool + 'a,
    ) -> impl Iterator<Item = &'a (String, String)> + 'a {
        self.entries.iter().filter(move |(key, _)| !is_set(key.as_str()))
    }

    /// Export the entries into the process environment without overriding
    /// anything already set. Returns how many were exported.
    pub fn apply(&self) -> usize {
        let pending: Vec<_> = self.pending(|key| std::env::var_os(key).is_some()).collect();
        for (key, value) in &pending {
            debug!("{} = {} (from {})", key, value, self.path.display());
            std::env::set_var(key, value);
        }
        pending.len()
    }
}

/// `$OVS_SWITCH_ENV_FILE` first, then the well-known locations
fn candidate_paths(custom: Option<String>) -> Vec<PathBuf> {
    custom
        .filter(|p| !p.is_empty())
        .into_iter()
        .chain(ENV_FILE_PATHS.iter().map(|p| p.to_string()))
        .map(PathBuf::from)
        .collect()
}

/// Export the first environment file found into the process environment.
///
/// Call before `SwitchConfig::from_env` and before the tracing subscriber
/// reads `RUST_LOG`. Returns the file that was used.
pub fn load_environment() -> Option<PathBuf> {
    for path in candidate_paths(std::env::var(ENV_FILE_VAR).ok()) {
        match EnvFile::read(&path) {
            Ok(Some(file)) => {
                let exported = file.apply();
                info!(
                    "Environment file {}: {} of {} entries exported",
                    path.display(),
                    exported,
                    file.entries().len()
                );
                return Some(path);
            }
            Ok(None) => {}
            Err(e) => warn!("Cannot read environment file {}: {}", path.display(), e),
        }
    }

    debug!("No environment file, using the process environment only");
    None
}

/// One `[export ]KEY=VALUE` line, the value optionally quoted.
/// Comments, blanks and malformed lines yield None.
fn parse_env_line(line: &str) -> Option<(String, String)> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let line = line.strip_prefix("export ").unwrap_or(line);

    let (key, value) = line.split_once('=')?;
    let key = key.trim();
    if key.is_empty() || key.contains(char::is_whitespace) {
        return None;
    }

    let value = value.trim();
    let value = ['"', '\'']
        .iter()
        .find_map(|&q| value.strip_prefix(q)?.strip_suffix(q))
        .unwrap_or(value);

    Some((key.to_string(), value.to_string()))
}
