use super::mock::*;
use crate::forwarder::transport::{
    actions, ROUTER_DEVICE, WANCON_DEVICE, WAN_DEVICE, WAN_IP_CONNECTION, WAN_PPP_CONNECTION,
};
use crate::forwarder::{discover_service, ActionError, IgdBinding, IpProtocol};

// ========================================================================
// Service discovery
// ========================================================================

#[test]
fn test_discover_prefers_ppp() {
    let router = MockRouter::new();
    let device = MockDevice::new("uuid:igd", ROUTER_DEVICE, true)
        .with_device(
            MockDevice::new("uuid:wan", WAN_DEVICE, false).with_device(
                MockDevice::new("uuid:wancon", WANCON_DEVICE, false)
                    .with_service(WAN_IP_CONNECTION, &router)
                    .with_service(WAN_PPP_CONNECTION, &router),
            ),
        )
        .into_arc();

    let service = discover_service(device.as_ref()).expect("service should be found");
    assert_eq!(service.service_type(), WAN_PPP_CONNECTION);
}

#[test]
fn test_discover_falls_back_to_ip() {
    let router = MockRouter::new();
    let device = ip_igd("uuid:igd", &router);
    let service = discover_service(device.as_ref()).expect("service should be found");
    assert_eq!(service.service_type(), WAN_IP_CONNECTION);
}

#[test]
fn test_discover_fails_without_connection_service() {
    let device = MockDevice::new("uuid:igd", ROUTER_DEVICE, true)
        .with_device(
            MockDevice::new("uuid:wan", WAN_DEVICE, false)
                .with_device(MockDevice::new("uuid:wancon", WANCON_DEVICE, false)),
        )
        .into_arc();
    assert!(discover_service(device.as_ref()).is_none());
}

#[test]
fn test_discover_fails_without_wan_device() {
    let router = MockRouter::new();
    let device = MockDevice::new("uuid:igd", ROUTER_DEVICE, true)
        .with_device(
            MockDevice::new("uuid:lan", "urn:schemas-upnp-org:device:LANDevice:1", false)
                .with_device(
                    MockDevice::new("uuid:wancon", WANCON_DEVICE, false)
                        .with_service(WAN_IP_CONNECTION, &router),
                ),
        )
        .into_arc();
    assert!(discover_service(device.as_ref()).is_none());
}

#[test]
fn test_discover_only_tries_first_connection_device() {
    let router = MockRouter::new();
    let device = MockDevice::new("uuid:igd", ROUTER_DEVICE, true)
        .with_device(
            MockDevice::new("uuid:wan", WAN_DEVICE, false)
                .with_device(MockDevice::new("uuid:wancon-1", WANCON_DEVICE, false))
                .with_device(
                    MockDevice::new("uuid:wancon-2", WANCON_DEVICE, false)
                        .with_service(WAN_IP_CONNECTION, &router),
                ),
        )
        .into_arc();
    assert!(
        discover_service(device.as_ref()).is_none(),
        "later WANConnectionDevices must not be tried"
    );
}

#[test]
fn test_discover_only_tries_first_wan_device() {
    let router = MockRouter::new();
    let device = MockDevice::new("uuid:igd", ROUTER_DEVICE, true)
        .with_device(MockDevice::new("uuid:wan-1", WAN_DEVICE, false))
        .with_device(
            MockDevice::new("uuid:wan-2", WAN_DEVICE, false).with_device(
                MockDevice::new("uuid:wancon", WANCON_DEVICE, false)
                    .with_service(WAN_IP_CONNECTION, &router),
            ),
        )
        .into_arc();
    assert!(discover_service(device.as_ref()).is_none());
}

// ========================================================================
// Control actions
// ========================================================================

fn binding(router: &std::sync::Arc<MockRouter>) -> IgdBinding {
    IgdBinding::discover(ppp_igd("uuid:igd", router)).expect("binding")
}

#[test]
fn test_add_port_mapping_arguments_in_order() {
    let router = MockRouter::new();
    binding(&router)
        .add_port_mapping(IpProtocol::UDP, 12345, 54321, "Olive opennet")
        .unwrap();

    let adds = router.adds();
    assert_eq!(adds.len(), 1);
    let expected: Vec<(String, String)> = [
        (actions::NEW_REMOTE_HOST, ""),
        (actions::NEW_EXTERNAL_PORT, "54321"),
        (actions::NEW_INTERNAL_CLIENT, LAN_ADDRESS),
        (actions::NEW_INTERNAL_PORT, "12345"),
        (actions::NEW_PROTOCOL, "UDP"),
        (actions::NEW_PORT_MAPPING_DESCRIPTION, "Olive opennet"),
        (actions::NEW_ENABLED, "1"),
        (actions::NEW_LEASE_DURATION, "0"),
    ]
    .iter()
    .map(|(n, v)| (n.to_string(), v.to_string()))
    .collect();
    assert_eq!(adds[0].args, expected);
}

#[test]
fn test_delete_port_mapping_arguments() {
    let router = MockRouter::new();
    binding(&router)
        .delete_port_mapping(IpProtocol::TCP, 4000)
        .unwrap();

    let deletes = router.deletes();
    assert_eq!(deletes.len(), 1);
    assert_eq!(deletes[0].arg(actions::NEW_EXTERNAL_PORT), Some("4000"));
    assert_eq!(deletes[0].arg(actions::NEW_PROTOCOL), Some("TCP"));
    assert_eq!(deletes[0].args.len(), 2);
}

#[test]
fn test_add_port_mapping_failure_propagates() {
    let router = MockRouter::new();
    router.fail_next_adds(1);
    let result = binding(&router).add_port_mapping(IpProtocol::TCP, 1, 1, "Olive x");
    assert!(matches!(result, Err(ActionError::ActionFailed { .. })));
}

#[test]
fn test_missing_action_is_unavailable() {
    let router = MockRouter::new();
    router.remove_action(actions::ADD_PORT_MAPPING);
    let result = binding(&router).add_port_mapping(IpProtocol::TCP, 1, 1, "Olive x");
    assert_eq!(
        result,
        Err(ActionError::ActionUnavailable(actions::ADD_PORT_MAPPING.to_string()))
    );
    assert!(router.calls().is_empty(), "nothing should reach the wire");
}

#[test]
fn test_external_ip_address() {
    let router = MockRouter::new();
    assert_eq!(binding(&router).external_ip_address().unwrap(), "81.2.69.160");

    router.set_external_ip(None);
    assert!(binding(&router).external_ip_address().is_err());
}

#[test]
fn test_link_layer_max_bit_rates() {
    let router = MockRouter::new();
    assert_eq!(
        binding(&router).link_layer_max_bit_rates().unwrap(),
        (1_000_000, 8_000_000)
    );

    router.set_bit_rates("fast", "8000000");
    assert_eq!(
        binding(&router).link_layer_max_bit_rates(),
        Err(ActionError::InvalidOutput {
            name: actions::NEW_UPSTREAM_MAX_BIT_RATE.to_string(),
            value: "fast".to_string(),
        })
    );
}

#[test]
fn test_is_router_compares_udn() {
    let router = MockRouter::new();
    let bound = binding(&router);
    assert_eq!(bound.router().udn(), "uuid:igd");
    assert!(bound.is_router(ppp_igd("uuid:igd", &router).as_ref()));
    assert!(!bound.is_router(ppp_igd("uuid:other", &router).as_ref()));
}
