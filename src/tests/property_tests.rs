use super::mock::*;
use crate::forwarder::{ForwardPort, PortDelta};
use proptest::prelude::*;
use std::cmp::Ordering;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashSet;
use std::hash::{Hash, Hasher};

fn port() -> impl Strategy<Value = ForwardPort> {
    (
        prop::sample::select(vec!["alpha", "beta", "gamma", "delta"]),
        prop::bool::weighted(0.1),
        prop::sample::select(vec![6u8, 17, 132]),
        4000u16..4004,
        4000u16..4004,
    )
        .prop_map(|(name, is_ip6, protocol, internal, external)| {
            ForwardPort::new(name, is_ip6, protocol, internal, external)
        })
}

fn port_set() -> impl Strategy<Value = HashSet<ForwardPort>> {
    prop::collection::hash_set(port(), 0..6)
}

fn hash_of(port: &ForwardPort) -> u64 {
    let mut hasher = DefaultHasher::new();
    port.hash(&mut hasher);
    hasher.finish()
}

/// Ports the router can actually be asked to forward
fn forwardable(ports: &HashSet<ForwardPort>) -> HashSet<ForwardPort> {
    ports
        .iter()
        .filter(|p| !p.is_ip6 && p.ip_protocol().is_some())
        .cloned()
        .collect()
}

proptest! {
    #[test]
    fn equal_ports_hash_equal(a in port(), b in port()) {
        if a == b {
            prop_assert_eq!(hash_of(&a), hash_of(&b));
        }
        prop_assert_eq!(a == b, a.cmp(&b) == Ordering::Equal);
    }

    #[test]
    fn ordering_is_a_total_order(a in port(), b in port(), c in port()) {
        prop_assert_eq!(a.cmp(&b), b.cmp(&a).reverse());
        if a <= b && b <= c {
            prop_assert!(a <= c);
        }
        if a.name < b.name {
            prop_assert_eq!(a.cmp(&b), Ordering::Less);
        }
    }

    #[test]
    fn delta_moves_previous_to_next(prev in port_set(), next in port_set()) {
        let delta = PortDelta::between(Some(&prev), &next);

        let mut applied: HashSet<ForwardPort> = prev.difference(&delta.to_dump).cloned().collect();
        applied.extend(delta.to_forward.iter().cloned());
        prop_assert_eq!(&applied, &next);

        prop_assert!(delta.to_forward.is_disjoint(&delta.to_dump));
        prop_assert!(delta.to_dump.is_subset(&prev));
        prop_assert!(delta.to_forward.is_subset(&next));
    }

    #[test]
    fn delta_from_nothing_forwards_everything(next in port_set()) {
        let delta = PortDelta::between(None, &next);
        prop_assert_eq!(delta.to_forward, next);
        prop_assert!(delta.to_dump.is_empty());
    }

    #[test]
    fn delta_of_same_set_is_empty(set in port_set()) {
        prop_assert!(PortDelta::between(Some(&set), &set).is_empty());
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn engine_tracks_desired_sets(sets in prop::collection::vec(port_set(), 1..5)) {
        let (forwarder, _cp, _router) = bound_forwarder();
        let mut previous: Option<HashSet<ForwardPort>> = None;

        for next in sets {
            let log = StatusLog::new();
            let delta = PortDelta::between(previous.as_ref(), &next);

            forwarder.on_change_public_ports_shared(next.clone(), log.clone());

            // Exactly one single-entry callback per newly added port
            let reported: Vec<ForwardPort> = log.flat().into_iter().map(|(p, _)| p).collect();
            let unique: HashSet<ForwardPort> = reported.iter().cloned().collect();
            prop_assert_eq!(reported.len(), unique.len());
            prop_assert_eq!(&unique, &delta.to_forward);
            prop_assert!(log.entries().iter().all(|m| m.len() == 1));

            prop_assert_eq!(forwarder.installed_ports(), forwardable(&next));
            previous = Some(next);
        }
    }
}
