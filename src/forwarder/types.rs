//! Common types for the forwarder module

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use thiserror::Error;

/// Protocol tag for UDP over IPv4
pub const PROTOCOL_UDP_IPV4: u8 = 17;
/// Protocol tag for TCP over IPv4
pub const PROTOCOL_TCP_IPV4: u8 = 6;

/// One requested public port mapping
///
/// Equality and hashing cover all five fields. Ordering is by `name` first;
/// the remaining fields only break ties so that the order stays consistent
/// with equality when stored in a `BTreeSet`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ForwardPort {
    /// Human label for the mapping, e.g. "opennet"
    pub name: String,
    /// IPv4 vs IPv6
    pub is_ip6: bool,
    /// Protocol number, see [`PROTOCOL_UDP_IPV4`] and [`PROTOCOL_TCP_IPV4`]
    pub protocol: u8,
    /// Port on this host
    pub internal_port: u16,
    /// Port requested on the router
    pub external_port: u16,
}

impl ForwardPort {
    /// Create a new forward port descriptor
    pub fn new(
        name: impl Into<String>,
        is_ip6: bool,
        protocol: u8,
        internal_port: u16,
        external_port: u16,
    ) -> Self {
        Self {
            name: name.into(),
            is_ip6,
            protocol,
            internal_port,
            external_port,
        }
    }

    /// IPv4 TCP mapping with the same internal and external port
    pub fn tcp(name: impl Into<String>, port: u16) -> Self {
        Self::new(name, false, PROTOCOL_TCP_IPV4, port, port)
    }

    /// IPv4 UDP mapping with the same internal and external port
    pub fn udp(name: impl Into<String>, port: u16) -> Self {
        Self::new(name, false, PROTOCOL_UDP_IPV4, port, port)
    }

    /// Transport protocol understood by the IGD, if any
    pub fn ip_protocol(&self) -> Option<IpProtocol> {
        IpProtocol::from_u8(self.protocol)
    }
}

/// Outcome class of a forwarding attempt
///
/// There is no definite success: the IGD never confirms that a mapping
/// was actually applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatusCode {
    /// Will never work (e.g. unsupported protocol)
    DefiniteFailure,
    /// All attempts failed, the router may still be fine later
    ProbableFailure,
    /// The router accepted the request
    MaybeSuccess,
}

/// Outcome of one forwarding attempt for one port
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardPortStatus {
    /// Outcome class
    pub code: StatusCode,
    /// Human readable reason
    pub reason: String,
    /// External port the outcome refers to
    pub external_port: u16,
}

impl ForwardPortStatus {
    /// Create a new status
    pub fn new(code: StatusCode, reason: impl Into<String>, external_port: u16) -> Self {
        Self {
            code,
            reason: reason.into(),
            external_port,
        }
    }
}

/// IP protocol numbers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum IpProtocol {
    /// TCP protocol
    TCP = 6,
    /// UDP protocol
    UDP = 17,
}

impl IpProtocol {
    /// Convert from a protocol tag
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            PROTOCOL_TCP_IPV4 => Some(IpProtocol::TCP),
            PROTOCOL_UDP_IPV4 => Some(IpProtocol::UDP),
            _ => None,
        }
    }

    /// Name used in the `NewProtocol` SOAP argument
    pub fn as_str(&self) -> &'static str {
        match self {
            IpProtocol::TCP => "TCP",
            IpProtocol::UDP => "UDP",
        }
    }

    /// Parse the `NewProtocol` SOAP argument
    pub fn from_wire(value: &str) -> Option<Self> {
        match value {
            "TCP" => Some(IpProtocol::TCP),
            "UDP" => Some(IpProtocol::UDP),
            _ => None,
        }
    }
}

impl fmt::Display for IpProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opinion about internet reachability derived from the IGD
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectivityStatus {
    /// We know the external address but not whether inbound traffic works
    NotSupported,
    /// Ports are forwarded and the router has a public address
    FullInternet,
}

/// External address reported by the IGD
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectedIp {
    /// Address the router claims to have on its WAN side
    pub address: IpAddr,
    /// Reachability opinion
    pub status: ConnectivityStatus,
}

/// Errors raised while invoking an IGD control action
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ActionError {
    /// No router and service are bound
    #[error("No IGD bound")]
    NotBound,

    /// The forwarder has been disabled or terminated
    #[error("Forwarder disabled")]
    Disabled,

    /// The port left the desired set while its mapping was being added
    #[error("Port no longer wanted")]
    Withdrawn,

    /// The service does not expose the action
    #[error("Action not available: {0}")]
    ActionUnavailable(String),

    /// The router rejected the action or did not answer
    #[error("Action {action} failed: {reason}")]
    ActionFailed {
        /// Action name
        action: String,
        /// Failure detail
        reason: String,
    },

    /// A required output argument was absent
    #[error("Missing output argument: {0}")]
    MissingOutput(String),

    /// An output argument could not be parsed
    #[error("Invalid output argument {name}: {value}")]
    InvalidOutput {
        /// Argument name
        name: String,
        /// Raw value
        value: String,
    },

    /// An input argument was missing or malformed
    #[error("Invalid argument {name}: {value}")]
    InvalidArgument {
        /// Argument name
        name: String,
        /// Raw value
        value: String,
    },
}
