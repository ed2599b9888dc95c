use std::net::{IpAddr, Ipv4Addr};

use pnet::datalink::{self, NetworkInterface};
use tracing::debug;

/// Address other routers should dial to reach this process: the first IPv4
/// address of an up, non-loopback interface, or loopback when there is none.
pub fn discover_process_address() -> IpAddr {
    first_routable_ipv4(&datalink::interfaces())
        .map(IpAddr::V4)
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}

fn first_routable_ipv4(interfaces: &[NetworkInterface]) -> Option<Ipv4Addr> {
    for iface in interfaces {
        if !iface.is_up() || iface.is_loopback() {
            continue;
        }
        for ip_network in &iface.ips {
            if let IpAddr::V4(ip) = ip_network.ip() {
                debug!("Using {} from interface {} as process address", ip, iface.name);
                return Some(ip);
            }
        }
    }
    None
}
