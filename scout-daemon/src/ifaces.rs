//! Host interface enumeration, behind a trait so tests can fake the host.

use std::net::Ipv4Addr;

/// One qualifying host interface: IPv4 address plus broadcast address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IfaceInfo {
    pub name: String,
    pub ip: Ipv4Addr,
    pub broadcast: Ipv4Addr,
}

/// Supplies the current set of host interfaces on demand.
pub trait InterfaceSource: Send {
    fn interfaces(&mut self) -> Vec<IfaceInfo>;
}

/// Queries the OS. Interfaces without an IPv4 broadcast address (loopback,
/// point-to-point) are treated as not currently available.
pub struct SystemInterfaces;

impl InterfaceSource for SystemInterfaces {
    fn interfaces(&mut self) -> Vec<IfaceInfo> {
        let addrs = match if_addrs::get_if_addrs() {
            Ok(addrs) => addrs,
            Err(e) => {
                log::warn!("interface query failed: {}", e);
                return Vec::new();
            }
        };
        let mut out = Vec::new();
        for iface in addrs {
            if let if_addrs::IfAddr::V4(v4) = iface.addr {
                if let Some(broadcast) = v4.broadcast {
                    out.push(IfaceInfo {
                        name: iface.name,
                        ip: v4.ip,
                        broadcast,
                    });
                }
            }
        }
        out
    }
}
