//! UPnP control point abstraction
//!
//! The forwarder does not speak SSDP or SOAP itself. It consumes a control
//! point that discovers devices, hands them over as a tree of [`Device`]s and
//! [`Service`]s, and lets us post named [`Action`]s with string arguments.
//! [`crate::forwarder::igd::IgdControlPoint`] is the implementation backed by
//! `igd-next`.

use super::types::ActionError;
use std::sync::{Arc, Weak};

/// Root device type of an Internet Gateway Device
pub const ROUTER_DEVICE: &str = "urn:schemas-upnp-org:device:InternetGatewayDevice:1";
/// WAN device type (child of the IGD)
pub const WAN_DEVICE: &str = "urn:schemas-upnp-org:device:WANDevice:1";
/// WAN connection device type (child of the WAN device)
pub const WANCON_DEVICE: &str = "urn:schemas-upnp-org:device:WANConnectionDevice:1";
/// IP connection service type
pub const WAN_IP_CONNECTION: &str = "urn:schemas-upnp-org:service:WANIPConnection:1";
/// PPP connection service type
pub const WAN_PPP_CONNECTION: &str = "urn:schemas-upnp-org:service:WANPPPConnection:1";

/// SOAP action names and their arguments
pub mod actions {
    #![allow(missing_docs)]

    /// Query the WAN address
    pub const GET_EXTERNAL_IP_ADDRESS: &str = "GetExternalIPAddress";
    /// Query link bit rates
    pub const GET_LINK_LAYER_MAX_BIT_RATES: &str = "GetLinkLayerMaxBitRates";
    /// Install a mapping
    pub const ADD_PORT_MAPPING: &str = "AddPortMapping";
    /// Remove a mapping
    pub const DELETE_PORT_MAPPING: &str = "DeletePortMapping";

    pub const NEW_EXTERNAL_IP_ADDRESS: &str = "NewExternalIPAddress";
    pub const NEW_UPSTREAM_MAX_BIT_RATE: &str = "NewUpstreamMaxBitRate";
    pub const NEW_DOWNSTREAM_MAX_BIT_RATE: &str = "NewDownstreamMaxBitRate";
    pub const NEW_REMOTE_HOST: &str = "NewRemoteHost";
    pub const NEW_EXTERNAL_PORT: &str = "NewExternalPort";
    pub const NEW_INTERNAL_CLIENT: &str = "NewInternalClient";
    pub const NEW_INTERNAL_PORT: &str = "NewInternalPort";
    pub const NEW_PROTOCOL: &str = "NewProtocol";
    pub const NEW_PORT_MAPPING_DESCRIPTION: &str = "NewPortMappingDescription";
    pub const NEW_ENABLED: &str = "NewEnabled";
    pub const NEW_LEASE_DURATION: &str = "NewLeaseDuration";
}

/// A single invocation of a SOAP action
///
/// Each call to [`Service::action`] yields a fresh instance, so arguments
/// never leak between invocations.
pub trait Action: Send {
    /// Action name as it travels on the wire
    fn name(&self) -> &str;

    /// Set an input argument
    fn set_argument_value(&mut self, name: &str, value: &str);

    /// Post the action and wait for the response. Blocking.
    fn post_control_action(&mut self) -> Result<(), ActionError>;

    /// Value of an output argument after a successful post
    fn output_argument(&self, name: &str) -> Option<String>;
}

/// A service exposed by a device
pub trait Service: Send + Sync {
    /// Service type URN
    fn service_type(&self) -> &str;

    /// Prepare an invocation of the named action, if the service has it
    fn action(&self, name: &str) -> Option<Box<dyn Action>>;
}

/// A device in the UPnP device tree
pub trait Device: Send + Sync {
    /// Unique device name, used for identity
    fn udn(&self) -> &str;

    /// Device type URN
    fn device_type(&self) -> &str;

    /// Whether this is the root of its description
    fn is_root_device(&self) -> bool;

    /// Friendly name from the description
    fn friendly_name(&self) -> &str;

    /// URL of the device description
    fn location(&self) -> &str;

    /// HTTP port of the description server
    fn http_port(&self) -> u16;

    /// Embedded devices, in description order
    fn devices(&self) -> Vec<Arc<dyn Device>>;

    /// Service of the given type, if the device exposes it
    fn service(&self, service_type: &str) -> Option<Arc<dyn Service>>;

    /// Address of the local interface the device was discovered on
    fn interface_address(&self) -> String;
}

/// Receives device announcements from a control point
pub trait DeviceChangeListener: Send + Sync {
    /// A device appeared on the network
    fn device_added(&self, device: Arc<dyn Device>);

    /// A device left the network or its announcement expired
    fn device_removed(&self, device: Arc<dyn Device>);
}

/// Discovery and control transport
///
/// Listeners are held as non-owning references: the listener owns the
/// control point, not the other way round. Dispatching to a listener that
/// has been dropped must be a no-op.
pub trait ControlPoint: Send + Sync {
    /// Register a listener for device changes
    fn add_device_change_listener(&self, listener: Weak<dyn DeviceChangeListener>);

    /// Start the background discovery process
    fn start(&self) -> crate::Result<()>;

    /// Stop the background discovery process
    ///
    /// May be called from within a listener callback and must not wait for
    /// the discovery thread in that case.
    fn stop(&self);
}
