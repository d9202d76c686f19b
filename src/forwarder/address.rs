//! WAN address classification
//!
//! The IGD reports the address it holds on its WAN side. If that address is
//! not publicly routable there is another NAT upstream (double NAT, or a
//! carrier-grade NAT) and the mappings we install cannot make us reachable.

use std::net::IpAddr;
use tracing::{debug, warn};

/// CGNAT (RFC 6598) IP range: 100.64.0.0/10
const CGNAT_RANGE_START: u32 = 0x64400000; // 100.64.0.0
const CGNAT_RANGE_END: u32 = 0x647FFFFF; // 100.127.255.255

/// Whether an IPv4 address is in the shared address space 100.64.0.0/10
pub fn detect_cgnat(external_ip: IpAddr) -> bool {
    match external_ip {
        IpAddr::V4(ipv4) => {
            let ip_u32 = u32::from(ipv4);
            (CGNAT_RANGE_START..=CGNAT_RANGE_END).contains(&ip_u32)
        }
        IpAddr::V6(_) => false,
    }
}

/// Check if an IP is a private/local address
///
/// `true` for RFC 1918, loopback, link-local and unspecified addresses (and
/// their IPv6 counterparts: ULA, link-local).
pub fn is_private_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(ipv4) => {
            ipv4.is_private() || ipv4.is_loopback() || ipv4.is_link_local() || ipv4.is_unspecified()
        }
        IpAddr::V6(ipv6) => {
            ipv6.is_loopback() || ipv6.is_unspecified() || is_ipv6_private(&ipv6)
        }
    }
}

/// Unique local (fc00::/7) or link-local (fe80::/10)
fn is_ipv6_private(ipv6: &std::net::Ipv6Addr) -> bool {
    let first = ipv6.segments()[0];
    let unique_local = first & 0xfe00 == 0xfc00;
    let link_local = first & 0xffc0 == 0xfe80;
    unique_local || link_local
}

/// Whether an address could be reached from the internet as a unicast host
///
/// Rejects private, loopback, link-local, unspecified, multicast, broadcast,
/// "this network" (0.0.0.0/8) and CGNAT addresses.
pub fn is_public_unicast(ip: IpAddr) -> bool {
    if is_private_ip(ip) || ip.is_multicast() {
        return false;
    }

    let public = match ip {
        IpAddr::V4(ipv4) => !ipv4.is_broadcast() && ipv4.octets()[0] != 0 && !detect_cgnat(ip),
        IpAddr::V6(ipv6) => ipv6
            .to_ipv4_mapped()
            .is_none_or(|v4| is_public_unicast(IpAddr::V4(v4))),
    };

    if !public {
        debug!("{} is not a public unicast address", ip);
    }
    public
}

/// Parse the text of `NewExternalIPAddress`
///
/// Routers sometimes pad the value or report an empty string when the WAN
/// link is down.
pub fn parse_external_address(text: &str) -> Option<IpAddr> {
    let trimmed = text.trim();
    match trimmed.parse::<IpAddr>() {
        Ok(ip) => Some(ip),
        Err(_) => {
            warn!("Unable to parse external address reported by IGD: {:?}", trimmed);
            None
        }
    }
}

/// Whether the WAN address betrays another NAT upstream
pub fn suggests_double_nat(wan: IpAddr) -> bool {
    let double = !is_public_unicast(wan);
    if double {
        warn!(
            "IGD reports non-public WAN address {}; assuming we are behind another NAT",
            wan
        );
    }
    double
}
