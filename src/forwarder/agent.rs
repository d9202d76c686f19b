//! UPnP port forwarding agent
//!
//! [`UpnpForwarder`] listens for IGD announcements from a [`ControlPoint`],
//! binds to exactly one router, and keeps the router's port mappings in line
//! with the set of ports the application wants forwarded.
//!
//! All shared state sits behind one mutex. Nothing that blocks (router
//! actions, retry pauses, application callbacks) runs while it is held; the
//! installed set is updated in short critical sections as actions complete,
//! and only for ports that are still wanted at that point.

use super::address::{parse_external_address, suggests_double_nat};
use super::binding::IgdBinding;
use super::delta::PortDelta;
use super::retry::RetryPolicy;
use super::transport::{ControlPoint, Device, DeviceChangeListener, ROUTER_DEVICE};
use super::types::{
    ActionError, ConnectivityStatus, DetectedIp, ForwardPort, ForwardPortStatus, IpProtocol,
    StatusCode,
};
use crate::config::ForwarderConfig;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Prefix of every `NewPortMappingDescription` we install
pub const DESCRIPTION_PREFIX: &str = "Olive ";

const REASON_PROTOCOL_NOT_SUPPORTED: &str = "Protocol not supported";
const REASON_IPV6_NOT_SUPPORTED: &str = "IPv6 port forwarding not supported";
const REASON_FORWARDED: &str = "Port apparently forwarded by UPnP";
const REASON_FAILED: &str = "UPnP port forwarding apparently failed";

/// Sink for per-port forwarding outcomes
///
/// Called once per port and reconciliation, with a single-entry map.
pub trait ForwardPortCallback: Send + Sync {
    /// Report the outcome for the ports in `statuses`
    fn port_forward_status(&self, statuses: HashMap<ForwardPort, ForwardPortStatus>);
}

impl<F> ForwardPortCallback for F
where
    F: Fn(HashMap<ForwardPort, ForwardPortStatus>) + Send + Sync,
{
    fn port_forward_status(&self, statuses: HashMap<ForwardPort, ForwardPortStatus>) {
        self(statuses)
    }
}

/// Router binding state
#[derive(Debug, Clone)]
enum Binding {
    /// No IGD found yet, or the one we had went away
    Unbound,
    /// Talking to this router
    Bound(IgdBinding),
    /// More than one IGD, or an unusable one. Sticky.
    Disabled,
}

/// State guarded by the agent lock
struct State {
    binding: Binding,
    /// Ports we want forwarded; `None` until the application first asks
    desired: Option<HashSet<ForwardPort>>,
    /// Ports we have actually forwarded
    installed: HashSet<ForwardPort>,
    callback: Option<Arc<dyn ForwardPortCallback>>,
}

struct Agent {
    transport: Arc<dyn ControlPoint>,
    retry: RetryPolicy,
    state: Mutex<State>,
    // TODO: only ever set from get_address(); decide whether a rebind should clear it
    double_natted: AtomicBool,
    terminated: AtomicBool,
    /// Cancelled on termination to cut retry pauses short
    cancel: CancellationToken,
}

/// Automatic port forwarding through a UPnP Internet Gateway Device
///
/// Cloning yields another handle to the same agent. Most methods block
/// while the router is driven; from async code call them through
/// `tokio::task::spawn_blocking`.
///
/// # Example
///
/// ```no_run
/// use olive_forwarder::{ForwardPort, ForwardPortStatus, ForwarderConfig, UpnpForwarder};
/// use std::collections::{HashMap, HashSet};
///
/// let forwarder = UpnpForwarder::with_igd(ForwarderConfig::default());
/// forwarder.start().expect("Failed to start discovery");
///
/// let ports: HashSet<_> = [ForwardPort::udp("opennet", 12345)].into_iter().collect();
/// forwarder.on_change_public_ports(ports, |statuses: HashMap<ForwardPort, ForwardPortStatus>| {
///     for (port, status) in statuses {
///         println!("{} -> {:?}: {}", port.name, status.code, status.reason);
///     }
/// });
/// ```
#[derive(Clone)]
pub struct UpnpForwarder {
    agent: Arc<Agent>,
}

impl fmt::Debug for UpnpForwarder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.agent.state();
        f.debug_struct("UpnpForwarder")
            .field("binding", &state.binding)
            .field("desired", &state.desired.as_ref().map(|d| d.len()))
            .field("installed", &state.installed.len())
            .finish()
    }
}

impl UpnpForwarder {
    /// Create a forwarder driving `transport`
    ///
    /// The forwarder registers itself as a device-change listener right away;
    /// call [`UpnpForwarder::start`] to begin discovery.
    pub fn new(transport: Arc<dyn ControlPoint>, config: &ForwarderConfig) -> Self {
        let agent = Arc::new(Agent {
            transport,
            retry: config.retry_policy(),
            state: Mutex::new(State {
                binding: Binding::Unbound,
                desired: None,
                installed: HashSet::new(),
                callback: None,
            }),
            double_natted: AtomicBool::new(false),
            terminated: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        });

        let listener: Arc<dyn DeviceChangeListener> = agent.clone();
        agent
            .transport
            .add_device_change_listener(Arc::downgrade(&listener));

        Self { agent }
    }

    /// Create a forwarder backed by the `igd-next` control point
    pub fn with_igd(config: ForwarderConfig) -> Self {
        let transport = Arc::new(super::igd::IgdControlPoint::new(&config));
        Self::new(transport, &config)
    }

    /// Start the transport's discovery process
    pub fn start(&self) -> crate::Result<()> {
        info!("Starting UPnP IGD discovery");
        self.agent.transport.start()
    }

    /// Replace the set of ports to forward and the status callback
    ///
    /// Ports new to the set are forwarded and ports no longer in it are
    /// removed. If no router is bound yet the set is only recorded and the
    /// forwards happen once one is found. Blocks while the router is driven.
    pub fn on_change_public_ports<C>(&self, ports: HashSet<ForwardPort>, callback: C)
    where
        C: ForwardPortCallback + 'static,
    {
        self.on_change_public_ports_shared(ports, Arc::new(callback))
    }

    /// Same as [`UpnpForwarder::on_change_public_ports`] with a shared callback
    pub fn on_change_public_ports_shared(
        &self,
        ports: HashSet<ForwardPort>,
        callback: Arc<dyn ForwardPortCallback>,
    ) {
        self.agent.on_change_public_ports(ports, callback)
    }

    /// Remove every mapping we have installed
    pub fn unregister_all(&self) {
        self.agent.unregister_all()
    }

    /// External address as seen by the IGD, with a reachability opinion
    ///
    /// `None` when disabled, unbound, or the router's answer is unusable.
    pub fn get_address(&self) -> Option<DetectedIp> {
        self.agent.get_address()
    }

    /// Raw `NewExternalIPAddress` text. Blocking.
    pub fn get_nat_address(&self) -> Option<String> {
        self.agent.bound().ok()?.external_ip_address().ok()
    }

    /// Reported upstream bit rate in bits per second. Blocking.
    pub fn get_upstream_max_bit_rate(&self) -> Option<u32> {
        self.agent.link_layer_max_bit_rates().map(|(up, _)| up)
    }

    /// Reported downstream bit rate in bits per second. Blocking.
    pub fn get_downstream_max_bit_rate(&self) -> Option<u32> {
        self.agent.link_layer_max_bit_rates().map(|(_, down)| down)
    }

    /// Whether we are bound to an IGD with a usable connection service
    pub fn is_nat_present(&self) -> bool {
        matches!(self.agent.state().binding, Binding::Bound(_))
    }

    /// Whether the forwarder gave up (several IGDs, or an unusable one)
    pub fn is_disabled(&self) -> bool {
        matches!(self.agent.state().binding, Binding::Disabled)
    }

    /// Whether the router's WAN address suggested another NAT upstream
    pub fn is_double_natted(&self) -> bool {
        self.agent.double_natted.load(Ordering::Relaxed)
    }

    /// Snapshot of the ports currently forwarded
    pub fn installed_ports(&self) -> HashSet<ForwardPort> {
        self.agent.state().installed.clone()
    }

    /// Snapshot of the ports the application asked for
    pub fn desired_ports(&self) -> HashSet<ForwardPort> {
        self.agent.state().desired.clone().unwrap_or_default()
    }

    /// Remove our mappings and stop discovery. The forwarder is unusable afterwards.
    pub fn terminate(&self) {
        self.agent.terminate()
    }
}

impl Agent {
    fn state(&self) -> MutexGuard<'_, State> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    /// Current binding, or why there is none
    fn bound(&self) -> Result<IgdBinding, ActionError> {
        match &self.state().binding {
            Binding::Bound(binding) => Ok(binding.clone()),
            Binding::Unbound => Err(ActionError::NotBound),
            Binding::Disabled => Err(ActionError::Disabled),
        }
    }

    fn on_change_public_ports(
        &self,
        ports: HashSet<ForwardPort>,
        callback: Arc<dyn ForwardPortCallback>,
    ) {
        info!("UPnP forwarding {} ports...", ports.len());
        if self.is_terminated() {
            warn!("UPnP forwarder has been terminated, ignoring port change");
            return;
        }

        let delta = {
            let mut state = self.state();
            if let Some(current) = &state.callback {
                if !Arc::ptr_eq(current, &callback) {
                    debug!("ForwardPortCallback changed - using new value, but this is very strange!");
                }
            }
            state.callback = Some(callback);

            let delta = PortDelta::between(state.desired.as_ref(), &ports);
            state.desired = Some(ports);

            match state.binding {
                Binding::Bound(_) => delta,
                Binding::Unbound => {
                    info!("No IGD yet, when one is found we will do the forwards");
                    return;
                }
                Binding::Disabled => {
                    debug!("UPnP forwarder has been disabled previously, ignoring port change");
                    return;
                }
            }
        };

        if !delta.to_dump.is_empty() {
            self.unregister_ports(delta.to_dump);
        }
        if !delta.to_forward.is_empty() {
            self.register_ports(delta.to_forward);
        }
    }

    /// Forward every port and report one status per port
    fn register_ports(&self, ports: HashSet<ForwardPort>) {
        debug!("UPnP registerPorts - {}", ports.len());
        let ordered: BTreeSet<ForwardPort> = ports.into_iter().collect();

        for port in ordered {
            let status = if port.is_ip6 {
                ForwardPortStatus::new(
                    StatusCode::DefiniteFailure,
                    REASON_IPV6_NOT_SUPPORTED,
                    port.external_port,
                )
            } else {
                match port.ip_protocol() {
                    None => ForwardPortStatus::new(
                        StatusCode::DefiniteFailure,
                        REASON_PROTOCOL_NOT_SUPPORTED,
                        port.external_port,
                    ),
                    Some(protocol) if self.try_add_mapping(protocol, &port) => {
                        ForwardPortStatus::new(
                            StatusCode::MaybeSuccess,
                            REASON_FORWARDED,
                            port.external_port,
                        )
                    }
                    Some(_) => ForwardPortStatus::new(
                        StatusCode::ProbableFailure,
                        REASON_FAILED,
                        port.external_port,
                    ),
                }
            };
            self.report(port, status);
        }
    }

    /// Remove mappings in name order. Unsupported ports were never installed.
    fn unregister_ports(&self, ports: impl IntoIterator<Item = ForwardPort>) {
        let ordered: BTreeSet<ForwardPort> = ports.into_iter().collect();

        for port in ordered {
            if port.is_ip6 {
                continue;
            }
            let Some(protocol) = port.ip_protocol() else {
                continue;
            };
            if let Err(e) = self.remove_mapping(protocol, &port, false) {
                debug!("Removing mapping for {} failed: {}", port.external_port, e);
            }
        }
    }

    fn unregister_all(&self) {
        let installed = self.state().installed.clone();
        self.unregister_ports(installed);
    }

    fn report(&self, port: ForwardPort, status: ForwardPortStatus) {
        let callback = self.state().callback.clone();
        match callback {
            Some(callback) => {
                let mut statuses = HashMap::with_capacity(1);
                statuses.insert(port, status);
                callback.port_forward_status(statuses);
            }
            None => debug!(
                "No ForwardPortCallback registered, dropping status for {}",
                port.external_port
            ),
        }
    }

    fn try_add_mapping(&self, protocol: IpProtocol, port: &ForwardPort) -> bool {
        info!(
            "UPnP: Registering a port mapping for {} -> {} {}",
            port.internal_port, port.external_port, protocol
        );
        let description = format!("{}{}", DESCRIPTION_PREFIX, port.name);

        let mut withdrawn = false;
        let (added, tries) = self.retry.run(&self.cancel, || {
            match self.add_mapping(protocol, port, &description) {
                Ok(()) => true,
                Err(ActionError::Withdrawn) => {
                    withdrawn = true;
                    true
                }
                Err(e) => {
                    debug!("AddPortMapping for {} failed: {}", port.external_port, e);
                    false
                }
            }
        });
        let forwarded = added && !withdrawn;

        info!(
            "UPnP: {} ({} tries)",
            if forwarded {
                "Mapping is successful!"
            } else {
                "Mapping has failed!"
            },
            tries
        );
        forwarded
    }

    fn add_mapping(
        &self,
        protocol: IpProtocol,
        port: &ForwardPort,
        description: &str,
    ) -> Result<(), ActionError> {
        if self.is_terminated() {
            return Err(ActionError::Disabled);
        }
        let binding = self.bound()?;

        // Clear whatever stale mapping the router may still hold
        let _ = self.remove_mapping(protocol, port, true);

        binding.add_port_mapping(
            protocol,
            port.internal_port,
            port.external_port,
            description,
        )?;

        // The desired set or the binding may have moved on while we waited
        let kept = {
            let mut state = self.state();
            let still_bound = matches!(
                &state.binding,
                Binding::Bound(current) if current.is_router(binding.router().as_ref())
            );
            let still_desired = state
                .desired
                .as_ref()
                .is_some_and(|desired| desired.contains(port));
            let kept = still_bound && still_desired && !self.is_terminated();
            if kept {
                state.installed.insert(port.clone());
            }
            kept
        };

        if !kept {
            info!(
                "UPnP: {} {} / {} is no longer wanted, removing it again",
                port.name, port.external_port, protocol
            );
            if let Err(e) = binding.delete_port_mapping(protocol, port.external_port) {
                debug!("Removing withdrawn mapping {} failed: {}", port.external_port, e);
            }
            return Err(ActionError::Withdrawn);
        }
        Ok(())
    }

    fn remove_mapping(
        &self,
        protocol: IpProtocol,
        port: &ForwardPort,
        quiet: bool,
    ) -> Result<(), ActionError> {
        let binding = self.bound()?;

        let result = binding.delete_port_mapping(protocol, port.external_port);
        self.state().installed.remove(port);

        if !quiet {
            info!(
                "UPnP: Removed mapping for external {} {} / {}",
                port.name, port.external_port, protocol
            );
        }
        result
    }

    fn get_address(&self) -> Option<DetectedIp> {
        debug!("UPnP getAddress() called");
        let binding = match self.bound() {
            Ok(binding) => binding,
            Err(ActionError::Disabled) => {
                debug!("UPnP forwarder has been disabled previously, ignoring request");
                return None;
            }
            Err(_) => {
                debug!("No UPnP device found, detection of the external ip address has failed");
                return None;
            }
        };

        let text = match binding.external_ip_address() {
            Ok(text) => text,
            Err(e) => {
                info!("UPnP discovery has failed: {}", e);
                return None;
            }
        };
        let address = parse_external_address(&text)?;

        if suggests_double_nat(address) {
            self.double_natted.store(true, Ordering::Relaxed);
        }
        let double_natted = self.double_natted.load(Ordering::Relaxed);

        // A single forwarded port is not enough evidence
        let status = if self.state().installed.len() > 1 && !double_natted {
            ConnectivityStatus::FullInternet
        } else {
            ConnectivityStatus::NotSupported
        };

        let detected = DetectedIp { address, status };
        debug!("Successful UPnP discovery: {:?}", detected);
        Some(detected)
    }

    fn link_layer_max_bit_rates(&self) -> Option<(u32, u32)> {
        if self.double_natted.load(Ordering::Relaxed) {
            return None;
        }
        match self.bound().ok()?.link_layer_max_bit_rates() {
            Ok(rates) => Some(rates),
            Err(e) => {
                debug!("GetLinkLayerMaxBitRates failed: {}", e);
                None
            }
        }
    }

    fn terminate(&self) {
        if self.terminated.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Terminating UPnP forwarder");
        self.cancel.cancel();
        self.unregister_all();
        self.transport.stop();
    }
}

impl DeviceChangeListener for Agent {
    fn device_added(&self, device: Arc<dyn Device>) {
        if self.is_terminated() {
            return;
        }
        if matches!(self.state().binding, Binding::Disabled) {
            debug!("UPnP forwarder has been disabled previously, ignoring new device");
            return;
        }
        if device.device_type() != ROUTER_DEVICE || !device.is_root_device() {
            return;
        }

        let to_forward = {
            let mut state = self.state();
            match &state.binding {
                Binding::Disabled => return,
                Binding::Bound(_) => {
                    info!(
                        "Found more than one IGD on the network, as a result UPnP forwarding will be disabled"
                    );
                    state.binding = Binding::Disabled;
                    None
                }
                Binding::Unbound => {
                    debug!(
                        "UPnP IGD found: {} {} {}",
                        device.friendly_name(),
                        device.location(),
                        device.http_port()
                    );
                    match IgdBinding::discover(device) {
                        Some(binding) => {
                            debug!("Bound to {:?}", binding);
                            state.binding = Binding::Bound(binding);
                            state.desired.clone()
                        }
                        None => {
                            info!(
                                "The IGD we got isn't suiting our needs, UPnP forwarding will be disabled"
                            );
                            state.binding = Binding::Disabled;
                            None
                        }
                    }
                }
            }
        };

        // We only ever need one IGD
        self.transport.stop();

        if let Some(ports) = to_forward {
            if !ports.is_empty() {
                self.register_ports(ports);
            }
        }
    }

    fn device_removed(&self, device: Arc<dyn Device>) {
        let mut state = self.state();
        let is_router = match &state.binding {
            Binding::Bound(binding) => binding.is_router(device.as_ref()),
            _ => false,
        };
        if is_router {
            info!("UPnP IGD {} went away", device.friendly_name());
            state.binding = Binding::Unbound;
        }
    }
}

impl Drop for Agent {
    fn drop(&mut self) {
        if !self.is_terminated() {
            self.transport.stop();
        }
    }
}
