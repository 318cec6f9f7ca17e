//! Controller endpoint parsing and validation

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::SwitchError;

/// Upstream OpenFlow controller address for a bridge
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ControllerEndpoint {
    host: String,
    port: u16,
}

impl ControllerEndpoint {
    /// Validate a host and a port string as received from the caller.
    pub fn parse(host: &str, port: &str) -> Result<Self, SwitchError> {
        let invalid = |reason: &str| SwitchError::InvalidEndpoint {
            endpoint: format!("{host}:{port}"),
            reason: reason.to_string(),
        };

        let host = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);
        let host = normalize_host(host).map_err(invalid)?;

        if port.is_empty() || !port.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid("port is not a decimal number"));
        }
        let port = match port.parse::<u16>() {
            Ok(0) | Err(_) => return Err(invalid("port must be between 1 and 65535")),
            Ok(p) => p,
        };

        Ok(Self { host, port })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// OVSDB `Controller.target` value, e.g. `tcp:10.0.0.5:6653`
    pub fn target(&self) -> String {
        format!("tcp:{self}")
    }
}

impl fmt::Display for ControllerEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for ControllerEndpoint {
    type Err = SwitchError;

    /// Parse `host:port` or `[v6-host]:port`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| SwitchError::InvalidEndpoint {
            endpoint: s.to_string(),
            reason: reason.to_string(),
        };

        let (host, port) = if let Some(rest) = s.strip_prefix('[') {
            let (host, tail) = rest
                .split_once(']')
                .ok_or_else(|| invalid("missing ']' in address"))?;
            let port = tail
                .strip_prefix(':')
                .ok_or_else(|| invalid("missing port in address"))?;
            (host, port)
        } else {
            let (host, port) = s
                .rsplit_once(':')
                .ok_or_else(|| invalid("missing port in address"))?;
            if host.contains(':') {
                return Err(invalid("too many colons in address"));
            }
            (host, port)
        };

        Self::parse(host, port)
    }
}

fn normalize_host(host: &str) -> Result<String, &'static str> {
    if host.is_empty() {
        return Err("host is empty");
    }
    if let Ok(ip) = host.parse::<IpAddr>() {
        if ip.is_unspecified() {
            return Err("host is the unspecified address");
        }
        return Ok(ip.to_string());
    }

    // RFC 1123 host name
    if host.len() > 253 {
        return Err("host name is longer than 253 characters");
    }
    let host = host.strip_suffix('.').unwrap_or(host);
    let labels: Vec<&str> = host.split('.').collect();
    for label in &labels {
        if label.is_empty() || label.len() > 63 {
            return Err("host name label must be 1 to 63 characters");
        }
        if !label.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-') {
            return Err("host name contains invalid characters");
        }
        if label.starts_with('-') || label.ends_with('-') {
            return Err("host name label starts or ends with '-'");
        }
    }
    // "10.0.0.256" is a broken IPv4 literal, not a host name
    if labels
        .last()
        .is_some_and(|l| l.bytes().all(|b| b.is_ascii_digit()))
    {
        return Err("host is not a valid IP address");
    }
    Ok(host.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ipv4() {
        let ep = ControllerEndpoint::parse("10.0.0.5", "6653").unwrap();
        assert_eq!(ep.host(), "10.0.0.5");
        assert_eq!(ep.port(), 6653);
        assert_eq!(ep.target(), "tcp:10.0.0.5:6653");
    }

    #[test]
    fn test_parse_ipv6_brackets_target() {
        let ep = ControllerEndpoint::parse("[fd00::1]", "6633").unwrap();
        assert_eq!(ep.host(), "fd00::1");
        assert_eq!(ep.target(), "tcp:[fd00::1]:6633");
    }

    #[test]
    fn test_port_out_of_range() {
        let err = ControllerEndpoint::parse("10.0.0.5", "99999").unwrap_err();
        assert!(matches!(err, SwitchError::InvalidEndpoint { .. }));
        assert!(ControllerEndpoint::parse("10.0.0.5", "0").is_err());
        assert!(ControllerEndpoint::parse("10.0.0.5", "+80").is_err());
        assert!(ControllerEndpoint::parse("10.0.0.5", "").is_err());
    }

    #[test]
    fn test_bad_hosts() {
        for host in ["", "0.0.0.0", "10.0.0.256", "-ctl.example", "ctl_1", "a..b"] {
            assert!(
                ControllerEndpoint::parse(host, "6653").is_err(),
                "host {host:?} should be rejected"
            );
        }
        assert!(ControllerEndpoint::parse("Controller.Example", "6653").is_ok());
    }

    #[test]
    fn test_from_str() {
        let ep: ControllerEndpoint = "ctl.example:6653".parse().unwrap();
        assert_eq!(ep.host(), "ctl.example");
        let ep: ControllerEndpoint = "[::1]:6653".parse().unwrap();
        assert_eq!(ep.to_string(), "[::1]:6653");
        assert!("::1:6653".parse::<ControllerEndpoint>().is_err());
        assert!("10.0.0.5".parse::<ControllerEndpoint>().is_err());
    }
}
