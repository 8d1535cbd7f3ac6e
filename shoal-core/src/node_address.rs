//! Node address: identifies a replica server in the cluster.
//!
//! A [`NodeAddress`] is an IP address + port. Membership records use the
//! `invalid` sentinel (`0.0.0.0:0`) for slots that name no node, e.g. a
//! partition whose primary is currently unassigned.

use std::net::{IpAddr, Ipv4Addr};

use serde::{Deserialize, Serialize};

/// Network identity of a replica server.
///
/// # Examples
///
/// ```
/// use shoal_core::NodeAddress;
///
/// let node = NodeAddress::parse("10.0.0.1:34801").expect("parse");
/// assert_eq!(node.to_string(), "10.0.0.1:34801");
/// assert!(!node.is_invalid());
/// assert!(NodeAddress::invalid().is_invalid());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeAddress {
    /// IP address (IPv4 or IPv6).
    pub ip: IpAddr,
    /// Port number.
    pub port: u16,
}

impl NodeAddress {
    /// Create a new node address.
    pub fn new(ip: IpAddr, port: u16) -> Self {
        Self { ip, port }
    }

    /// The `invalid` sentinel: `0.0.0.0:0`, meaning "no node".
    pub fn invalid() -> Self {
        Self {
            ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 0,
        }
    }

    /// Check whether this address is the `invalid` sentinel.
    pub fn is_invalid(&self) -> bool {
        self.port == 0
            && match self.ip {
                IpAddr::V4(ip) => ip.is_unspecified(),
                IpAddr::V6(ip) => ip.is_unspecified(),
            }
    }

    /// Parse from string `ip:port` format.
    ///
    /// Supports both IPv4 (`127.0.0.1:4500`) and IPv6 (`[::1]:4500`) notation.
    ///
    /// # Errors
    ///
    /// Returns an error if the IP or port cannot be parsed.
    pub fn parse(s: &str) -> Result<Self, NodeAddressParseError> {
        // Handle IPv6 bracket notation [::1]:port
        if let Some(bracket_end) = s.rfind(']') {
            if !s.starts_with('[') {
                return Err(NodeAddressParseError::InvalidIp);
            }
            let ip_str = &s[1..bracket_end];
            let port_str = s
                .get(bracket_end + 2..)
                .ok_or(NodeAddressParseError::MissingPort)?;
            let ip: IpAddr = ip_str
                .parse()
                .map_err(|_| NodeAddressParseError::InvalidIp)?;
            let port: u16 = port_str
                .parse()
                .map_err(|_| NodeAddressParseError::InvalidPort)?;
            Ok(Self::new(ip, port))
        } else {
            let (ip_str, port_str) = s
                .rsplit_once(':')
                .ok_or(NodeAddressParseError::MissingPort)?;
            let ip: IpAddr = ip_str
                .parse()
                .map_err(|_| NodeAddressParseError::InvalidIp)?;
            let port: u16 = port_str
                .parse()
                .map_err(|_| NodeAddressParseError::InvalidPort)?;
            Ok(Self::new(ip, port))
        }
    }
}

impl std::fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_invalid() {
            return write!(f, "invalid");
        }
        match self.ip {
            IpAddr::V4(ip) => write!(f, "{}:{}", ip, self.port),
            IpAddr::V6(ip) => write!(f, "[{}]:{}", ip, self.port),
        }
    }
}

/// Error parsing a node address from string.
#[derive(Debug, Clone, thiserror::Error)]
pub enum NodeAddressParseError {
    /// The IP address could not be parsed.
    #[error("invalid IP address")]
    InvalidIp,
    /// The port number could not be parsed.
    #[error("invalid port number")]
    InvalidPort,
    /// No port separator (`:`) found in the input.
    #[error("missing port separator")]
    MissingPort,
}
