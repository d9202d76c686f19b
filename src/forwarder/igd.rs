//! Control point backed by `igd-next`
//!
//! `igd-next` finds the gateway over SSDP and speaks SOAP to its connection
//! service, but it hides the description tree. We rebuild the part of the
//! tree the forwarder walks (IGD → WANDevice → WANConnectionDevice →
//! WANIPConnection) and map the few actions we need onto the typed gateway
//! calls.

use super::retry::pause;
use super::transport::{
    actions, Action, ControlPoint, Device, DeviceChangeListener, Service, ROUTER_DEVICE,
    WANCON_DEVICE, WAN_DEVICE, WAN_IP_CONNECTION,
};
use super::types::{ActionError, IpProtocol};
use crate::config::ForwarderConfig;
use igd_next::{Gateway, PortMappingProtocol, SearchOptions};
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr, UdpSocket};
use std::sync::{Arc, Mutex, Weak};
use std::thread;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

type Listeners = Arc<Mutex<Vec<Weak<dyn DeviceChangeListener>>>>;

/// SSDP discovery on a background thread, one gateway at a time
pub struct IgdControlPoint {
    search_timeout: Duration,
    search_interval: Duration,
    listeners: Listeners,
    /// Cancels the running discovery loop
    running: Mutex<Option<CancellationToken>>,
}

impl IgdControlPoint {
    /// Create a control point using the search settings from `config`
    pub fn new(config: &ForwarderConfig) -> Self {
        Self {
            search_timeout: Duration::from_millis(config.search_timeout_ms),
            search_interval: Duration::from_millis(config.search_interval_ms),
            listeners: Arc::new(Mutex::new(Vec::new())),
            running: Mutex::new(None),
        }
    }
}

impl ControlPoint for IgdControlPoint {
    fn add_device_change_listener(&self, listener: Weak<dyn DeviceChangeListener>) {
        let mut listeners = match self.listeners.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        listeners.push(listener);
    }

    fn start(&self) -> crate::Result<()> {
        let mut running = match self.running.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if running.is_some() {
            return Ok(());
        }

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let cancel = CancellationToken::new();
        let discovery = Discovery {
            timeout: self.search_timeout,
            interval: self.search_interval,
            listeners: self.listeners.clone(),
            cancel: cancel.clone(),
        };

        thread::Builder::new()
            .name("upnp-discovery".to_string())
            .spawn(move || runtime.block_on(discovery.run()))?;

        *running = Some(cancel);
        Ok(())
    }

    fn stop(&self) {
        let cancel = match self.running.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        // The caller may be a listener running on the discovery thread, so it is never joined
        if let Some(cancel) = cancel {
            debug!("Stopping UPnP discovery");
            cancel.cancel();
        }
    }
}

impl Drop for IgdControlPoint {
    fn drop(&mut self) {
        self.stop();
    }
}

enum DeviceEvent {
    Added(Arc<dyn Device>),
    Removed(Arc<dyn Device>),
}

struct Discovery {
    timeout: Duration,
    interval: Duration,
    listeners: Listeners,
    cancel: CancellationToken,
}

impl Discovery {
    async fn run(self) {
        let mut current: Option<Arc<dyn Device>> = None;

        loop {
            let timeout = self.timeout;
            let search = tokio::task::spawn_blocking(move || {
                igd_next::search_gateway(SearchOptions {
                    timeout: Some(timeout),
                    ..Default::default()
                })
                .map(gateway_device)
                .map_err(|e| e.to_string())
            });

            let found = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                found = search => found,
            };

            match found {
                Ok(Ok(device)) => {
                    let known = current.as_ref().is_some_and(|d| d.udn() == device.udn());
                    if !known {
                        if let Some(old) = current.take() {
                            self.dispatch(DeviceEvent::Removed(old)).await;
                        }
                        info!("UPnP gateway found at {}", device.location());
                        current = Some(device.clone());
                        self.dispatch(DeviceEvent::Added(device)).await;
                    }
                }
                Ok(Err(e)) => {
                    debug!("UPnP gateway search failed: {}", e);
                    if let Some(old) = current.take() {
                        self.dispatch(DeviceEvent::Removed(old)).await;
                    }
                }
                Err(e) => warn!("UPnP gateway search task failed: {}", e),
            }

            if !pause(self.interval, &self.cancel).await {
                break;
            }
        }
        debug!("UPnP discovery loop exiting");
    }

    /// Hand `event` to every live listener on the blocking pool
    ///
    /// Listeners drive the router synchronously, so they never run on the
    /// discovery task itself.
    async fn dispatch(&self, event: DeviceEvent) {
        let listeners = self.listeners.clone();
        let task = tokio::task::spawn_blocking(move || {
            for listener in live_listeners(&listeners) {
                match &event {
                    DeviceEvent::Added(device) => listener.device_added(device.clone()),
                    DeviceEvent::Removed(device) => listener.device_removed(device.clone()),
                }
            }
        });
        if let Err(e) = task.await {
            warn!("UPnP device listener failed: {}", e);
        }
    }
}

/// Upgrade the registered listeners, forgetting dropped ones
fn live_listeners(listeners: &Listeners) -> Vec<Arc<dyn DeviceChangeListener>> {
    let mut listeners = match listeners.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    listeners.retain(|l| l.strong_count() > 0);
    listeners.iter().filter_map(Weak::upgrade).collect()
}

/// Local address of the interface that routes toward `gateway`
fn local_address_toward(gateway: SocketAddr) -> std::io::Result<IpAddr> {
    // Connecting a UDP socket sends nothing, it only selects a route
    let socket = UdpSocket::bind("0.0.0.0:0")?;
    socket.connect(gateway)?;
    Ok(socket.local_addr()?.ip())
}

fn gateway_device(gateway: Gateway) -> Arc<dyn Device> {
    let addr = gateway.addr;
    let location = format!("http://{}{}", addr, gateway.root_url);
    let udn = format!("uuid:igd-next-{}", addr);
    let interface_address = match local_address_toward(addr) {
        Ok(ip) => ip.to_string(),
        Err(e) => {
            warn!("Unable to determine local address toward {}: {}", addr, e);
            String::new()
        }
    };
    let gateway = Arc::new(gateway);

    let node = |suffix: &str, device_type: &str, root: bool| IgdDevice {
        udn: format!("{}{}", udn, suffix),
        device_type: device_type.to_string(),
        root,
        friendly_name: format!("Internet gateway at {}", addr),
        location: location.clone(),
        http_port: addr.port(),
        interface_address: interface_address.clone(),
        devices: Vec::new(),
        services: Vec::new(),
    };

    let mut connection = node("::wancon", WANCON_DEVICE, false);
    connection.services.push(Arc::new(IgdService {
        service_type: WAN_IP_CONNECTION.to_string(),
        gateway,
    }));

    let mut wan = node("::wan", WAN_DEVICE, false);
    wan.devices.push(Arc::new(connection));

    let mut root = node("", ROUTER_DEVICE, true);
    root.devices.push(Arc::new(wan));
    Arc::new(root)
}

struct IgdDevice {
    udn: String,
    device_type: String,
    root: bool,
    friendly_name: String,
    location: String,
    http_port: u16,
    interface_address: String,
    devices: Vec<Arc<dyn Device>>,
    services: Vec<Arc<IgdService>>,
}

impl Device for IgdDevice {
    fn udn(&self) -> &str {
        &self.udn
    }

    fn device_type(&self) -> &str {
        &self.device_type
    }

    fn is_root_device(&self) -> bool {
        self.root
    }

    fn friendly_name(&self) -> &str {
        &self.friendly_name
    }

    fn location(&self) -> &str {
        &self.location
    }

    fn http_port(&self) -> u16 {
        self.http_port
    }

    fn devices(&self) -> Vec<Arc<dyn Device>> {
        self.devices.clone()
    }

    fn service(&self, service_type: &str) -> Option<Arc<dyn Service>> {
        self.services
            .iter()
            .find(|s| s.service_type == service_type)
            .map(|s| s.clone() as Arc<dyn Service>)
    }

    fn interface_address(&self) -> String {
        self.interface_address.clone()
    }
}

struct IgdService {
    service_type: String,
    gateway: Arc<Gateway>,
}

impl Service for IgdService {
    fn service_type(&self) -> &str {
        &self.service_type
    }

    fn action(&self, name: &str) -> Option<Box<dyn Action>> {
        match name {
            actions::GET_EXTERNAL_IP_ADDRESS
            | actions::ADD_PORT_MAPPING
            | actions::DELETE_PORT_MAPPING => Some(Box::new(IgdAction {
                name: name.to_string(),
                gateway: self.gateway.clone(),
                arguments: Arguments::default(),
                outputs: HashMap::new(),
            })),
            _ => None,
        }
    }
}

/// Input arguments of one action, by name
#[derive(Debug, Default)]
struct Arguments(HashMap<String, String>);

impl Arguments {
    fn set(&mut self, name: &str, value: &str) {
        self.0.insert(name.to_string(), value.to_string());
    }

    fn get(&self, name: &str) -> Result<&str, ActionError> {
        self.0
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| ActionError::InvalidArgument {
                name: name.to_string(),
                value: String::new(),
            })
    }

    fn parsed<T: std::str::FromStr>(&self, name: &str) -> Result<T, ActionError> {
        let value = self.get(name)?;
        value.parse().map_err(|_| ActionError::InvalidArgument {
            name: name.to_string(),
            value: value.to_string(),
        })
    }

    fn protocol(&self) -> Result<PortMappingProtocol, ActionError> {
        let value = self.get(actions::NEW_PROTOCOL)?;
        match IpProtocol::from_wire(value) {
            Some(IpProtocol::TCP) => Ok(PortMappingProtocol::TCP),
            Some(IpProtocol::UDP) => Ok(PortMappingProtocol::UDP),
            None => Err(ActionError::InvalidArgument {
                name: actions::NEW_PROTOCOL.to_string(),
                value: value.to_string(),
            }),
        }
    }
}

/// `AddPortMapping` arguments in the shape `Gateway::add_port` takes
#[derive(Debug)]
struct AddPort {
    protocol: PortMappingProtocol,
    external_port: u16,
    local_addr: SocketAddr,
    lease_duration: u32,
    description: String,
}

impl AddPort {
    fn from_arguments(arguments: &Arguments) -> Result<Self, ActionError> {
        let client: IpAddr = arguments.parsed(actions::NEW_INTERNAL_CLIENT)?;
        let internal_port: u16 = arguments.parsed(actions::NEW_INTERNAL_PORT)?;
        Ok(Self {
            protocol: arguments.protocol()?,
            external_port: arguments.parsed(actions::NEW_EXTERNAL_PORT)?,
            local_addr: SocketAddr::new(client, internal_port),
            lease_duration: arguments.parsed(actions::NEW_LEASE_DURATION)?,
            description: arguments
                .get(actions::NEW_PORT_MAPPING_DESCRIPTION)?
                .to_string(),
        })
    }
}

struct IgdAction {
    name: String,
    gateway: Arc<Gateway>,
    arguments: Arguments,
    outputs: HashMap<String, String>,
}

impl IgdAction {
    fn failed(&self, reason: impl ToString) -> ActionError {
        ActionError::ActionFailed {
            action: self.name.clone(),
            reason: reason.to_string(),
        }
    }
}

impl Action for IgdAction {
    fn name(&self) -> &str {
        &self.name
    }

    fn set_argument_value(&mut self, name: &str, value: &str) {
        self.arguments.set(name, value);
    }

    fn post_control_action(&mut self) -> Result<(), ActionError> {
        match self.name.as_str() {
            actions::GET_EXTERNAL_IP_ADDRESS => {
                let ip = self.gateway.get_external_ip().map_err(|e| self.failed(e))?;
                self.outputs
                    .insert(actions::NEW_EXTERNAL_IP_ADDRESS.to_string(), ip.to_string());
                Ok(())
            }
            actions::ADD_PORT_MAPPING => {
                let request = AddPort::from_arguments(&self.arguments)?;
                self.gateway
                    .add_port(
                        request.protocol,
                        request.external_port,
                        request.local_addr,
                        request.lease_duration,
                        &request.description,
                    )
                    .map_err(|e| self.failed(e))
            }
            actions::DELETE_PORT_MAPPING => {
                let protocol = self.arguments.protocol()?;
                let external: u16 = self.arguments.parsed(actions::NEW_EXTERNAL_PORT)?;
                self.gateway
                    .remove_port(protocol, external)
                    .map_err(|e| self.failed(e))
            }
            other => Err(ActionError::ActionUnavailable(other.to_string())),
        }
    }

    fn output_argument(&self, name: &str) -> Option<String> {
        self.outputs.get(name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn add_arguments(client: &str, protocol: &str) -> Arguments {
        let mut arguments = Arguments::default();
        for (name, value) in [
            (actions::NEW_REMOTE_HOST, ""),
            (actions::NEW_EXTERNAL_PORT, "54321"),
            (actions::NEW_INTERNAL_CLIENT, client),
            (actions::NEW_INTERNAL_PORT, "12345"),
            (actions::NEW_PROTOCOL, protocol),
            (actions::NEW_PORT_MAPPING_DESCRIPTION, "Olive opennet"),
            (actions::NEW_ENABLED, "1"),
            (actions::NEW_LEASE_DURATION, "0"),
        ] {
            arguments.set(name, value);
        }
        arguments
    }

    #[test]
    fn test_add_port_translation() {
        let request = AddPort::from_arguments(&add_arguments("192.168.1.10", "UDP")).unwrap();
        assert!(matches!(request.protocol, PortMappingProtocol::UDP));
        assert_eq!(request.external_port, 54321);
        assert_eq!(request.local_addr, "192.168.1.10:12345".parse().unwrap());
        assert_eq!(request.lease_duration, 0);
        assert_eq!(request.description, "Olive opennet");
    }

    #[test]
    fn test_unknown_lan_address_is_rejected() {
        // What the adapter hands out when no route toward the gateway was found
        let err = AddPort::from_arguments(&add_arguments("", "TCP")).unwrap_err();
        assert_eq!(
            err,
            ActionError::InvalidArgument {
                name: actions::NEW_INTERNAL_CLIENT.to_string(),
                value: String::new(),
            }
        );
    }

    #[test]
    fn test_protocol_must_be_wire_form() {
        let err = AddPort::from_arguments(&add_arguments("192.168.1.10", "udp")).unwrap_err();
        assert_eq!(
            err,
            ActionError::InvalidArgument {
                name: actions::NEW_PROTOCOL.to_string(),
                value: "udp".to_string(),
            }
        );
    }

    #[test]
    fn test_missing_argument() {
        let mut arguments = Arguments::default();
        arguments.set(actions::NEW_PROTOCOL, "TCP");
        assert_eq!(
            arguments.parsed::<u16>(actions::NEW_EXTERNAL_PORT),
            Err(ActionError::InvalidArgument {
                name: actions::NEW_EXTERNAL_PORT.to_string(),
                value: String::new(),
            })
        );
        assert!(matches!(arguments.protocol(), Ok(PortMappingProtocol::TCP)));
    }

    #[test]
    fn test_out_of_range_port() {
        let mut arguments = add_arguments("192.168.1.10", "TCP");
        arguments.set(actions::NEW_EXTERNAL_PORT, "70000");
        assert!(matches!(
            AddPort::from_arguments(&arguments),
            Err(ActionError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn test_local_address_toward_loopback() {
        let local = local_address_toward("127.0.0.1:1900".parse().unwrap()).unwrap();
        assert!(local.is_loopback());
    }
}
