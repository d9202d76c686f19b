//! The router we talk to and the connection service we drive
//!
//! An [`IgdBinding`] only exists once a root IGD has been found *and* a
//! usable WAN connection service has been located under it, so holding one
//! means a NAT is present.

use super::transport::{
    actions, Action, Device, Service, WANCON_DEVICE, WAN_DEVICE, WAN_IP_CONNECTION,
    WAN_PPP_CONNECTION,
};
use super::types::{ActionError, IpProtocol};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Selected router device and its connection service
#[derive(Clone)]
pub struct IgdBinding {
    router: Arc<dyn Device>,
    service: Arc<dyn Service>,
}

impl fmt::Debug for IgdBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IgdBinding")
            .field("router", &self.router.friendly_name())
            .field("udn", &self.router.udn())
            .field("service", &self.service.service_type())
            .finish()
    }
}

/// Locate the port mapping service under a root IGD
///
/// Only the first `WANDevice` and, below it, the first `WANConnectionDevice`
/// are considered. PPP is preferred over IP.
pub fn discover_service(router: &dyn Device) -> Option<Arc<dyn Service>> {
    let wan = router
        .devices()
        .into_iter()
        .find(|d| d.device_type() == WAN_DEVICE)?;

    let connection = wan
        .devices()
        .into_iter()
        .find(|d| d.device_type() == WANCON_DEVICE)?;

    if let Some(ppp) = connection.service(WAN_PPP_CONNECTION) {
        return Some(ppp);
    }

    debug!(
        "{} doesn't seem to be using PPP; we won't be able to extract bandwidth-related information out of it",
        router.friendly_name()
    );

    match connection.service(WAN_IP_CONNECTION) {
        Some(ip) => Some(ip),
        None => {
            debug!(
                "{} doesn't export WANIPConnection either: we won't be able to use it",
                router.friendly_name()
            );
            None
        }
    }
}

impl IgdBinding {
    /// Bind to `router`, walking its tree for a connection service
    pub fn discover(router: Arc<dyn Device>) -> Option<Self> {
        let service = discover_service(router.as_ref())?;
        Some(Self { router, service })
    }

    /// The root IGD
    pub fn router(&self) -> &Arc<dyn Device> {
        &self.router
    }

    /// Whether `device` is the bound router
    pub fn is_router(&self, device: &dyn Device) -> bool {
        self.router.udn() == device.udn()
    }

    /// Post `name` with `args` (in order) and hand back the answered action
    fn invoke(&self, name: &str, args: &[(&str, &str)]) -> Result<Box<dyn Action>, ActionError> {
        let mut action = self.service.action(name).ok_or_else(|| {
            debug!("Couldn't find {} action!", name);
            ActionError::ActionUnavailable(name.to_string())
        })?;

        for (arg, value) in args {
            action.set_argument_value(arg, value);
        }

        if let Err(e) = action.post_control_action() {
            debug!("{} on {} failed: {}", action.name(), self.router.friendly_name(), e);
            return Err(e);
        }
        Ok(action)
    }

    /// The external address the NAT thinks we have. Blocking.
    pub fn external_ip_address(&self) -> Result<String, ActionError> {
        let action = self.invoke(actions::GET_EXTERNAL_IP_ADDRESS, &[])?;
        action
            .output_argument(actions::NEW_EXTERNAL_IP_ADDRESS)
            .ok_or_else(|| ActionError::MissingOutput(actions::NEW_EXTERNAL_IP_ADDRESS.to_string()))
    }

    /// Reported (upstream, downstream) bit rates in bits per second. Blocking.
    pub fn link_layer_max_bit_rates(&self) -> Result<(u32, u32), ActionError> {
        let action = self.invoke(actions::GET_LINK_LAYER_MAX_BIT_RATES, &[])?;
        let up = parse_bit_rate(action.as_ref(), actions::NEW_UPSTREAM_MAX_BIT_RATE)?;
        let down = parse_bit_rate(action.as_ref(), actions::NEW_DOWNSTREAM_MAX_BIT_RATE)?;
        Ok((up, down))
    }

    /// Post `AddPortMapping` for a permanent mapping to this host. Blocking.
    pub fn add_port_mapping(
        &self,
        protocol: IpProtocol,
        internal_port: u16,
        external_port: u16,
        description: &str,
    ) -> Result<(), ActionError> {
        let external = external_port.to_string();
        let internal = internal_port.to_string();
        let client = self.router.interface_address();

        self.invoke(
            actions::ADD_PORT_MAPPING,
            &[
                (actions::NEW_REMOTE_HOST, ""),
                (actions::NEW_EXTERNAL_PORT, &external),
                (actions::NEW_INTERNAL_CLIENT, &client),
                (actions::NEW_INTERNAL_PORT, &internal),
                (actions::NEW_PROTOCOL, protocol.as_str()),
                (actions::NEW_PORT_MAPPING_DESCRIPTION, description),
                (actions::NEW_ENABLED, "1"),
                (actions::NEW_LEASE_DURATION, "0"),
            ],
        )
        .map(|_| ())
    }

    /// Post `DeletePortMapping`. Blocking.
    pub fn delete_port_mapping(
        &self,
        protocol: IpProtocol,
        external_port: u16,
    ) -> Result<(), ActionError> {
        let external = external_port.to_string();
        self.invoke(
            actions::DELETE_PORT_MAPPING,
            &[
                (actions::NEW_EXTERNAL_PORT, &external),
                (actions::NEW_PROTOCOL, protocol.as_str()),
            ],
        )
        .map(|_| ())
    }
}

fn parse_bit_rate(action: &dyn Action, name: &str) -> Result<u32, ActionError> {
    let value = action
        .output_argument(name)
        .ok_or_else(|| ActionError::MissingOutput(name.to_string()))?;
    value.trim().parse().map_err(|_| ActionError::InvalidOutput {
        name: name.to_string(),
        value,
    })
}
