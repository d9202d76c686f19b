//! UPnP IGD port forwarding
//!
//! This module keeps a router's port mappings in line with a desired set of
//! public ports:
//! - `transport` - control point abstraction (devices, services, actions)
//! - `igd` - control point backed by `igd-next`
//! - `binding` - the selected router and its connection service
//! - `delta` - add/remove delta between desired sets
//! - `agent` - discovery listener and reconciliation engine
//! - `address` - WAN address classification (double NAT)
//! - `retry` - `AddPortMapping` retry policy

// Submodules
pub mod address;
pub mod agent;
pub mod binding;
pub mod delta;
pub mod igd;
pub mod retry;
pub mod transport;
pub mod types;

// Re-export commonly used types
pub use types::{
    ActionError, ConnectivityStatus, DetectedIp, ForwardPort, ForwardPortStatus, IpProtocol,
    StatusCode, PROTOCOL_TCP_IPV4, PROTOCOL_UDP_IPV4,
};

// Re-export main entry points
pub use agent::{ForwardPortCallback, UpnpForwarder, DESCRIPTION_PREFIX};
pub use binding::{discover_service, IgdBinding};
pub use delta::PortDelta;
pub use igd::IgdControlPoint;
pub use retry::RetryPolicy;
pub use transport::{Action, ControlPoint, Device, DeviceChangeListener, Service};
