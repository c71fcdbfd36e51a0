//! Per-invocation orchestrators. Both plugins share the attachment-result
//! validation and the derived [`Targets`] view; they differ only in which
//! tables, chains and rules they manage.

pub mod error;
pub mod firewall;
pub mod portmap;

#[cfg(test)]
mod tests;

use crate::cni::types::{
    AttachmentResult, BoundAddress, IpVersion, MappedPort, PortMapping, Protocol,
};
use crate::plugin::error::ValidationError;
use ipnet::IpNet;
use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;

pub use firewall::FirewallPlugin;
pub use portmap::PortmapPlugin;

/// Role tags feeding per-container chain name derivation.
pub(crate) const FORWARD_FILTER_TAG: &str = "ffw";
pub(crate) const NAT_POSTROUTING_TAG: &str = "npo";
pub(crate) const NAT_PREROUTING_TAG: &str = "npr";
pub(crate) const RAW_PREROUTING_TAG: &str = "rpr";

/// Validated view of an attachment result: which interfaces carry which
/// addresses, and which IP versions are in play. The first interface of
/// the result is the bridge.
#[derive(Debug, Clone)]
pub struct Targets {
    interface_order: Vec<String>,
    pub interfaces: BTreeMap<String, Vec<BoundAddress>>,
    pub versions: BTreeSet<IpVersion>,
}

impl Targets {
    pub fn bridge(&self) -> &str {
        &self.interface_order[0]
    }

    /// Addresses of the given version, across all target interfaces.
    pub fn addrs_of(&self, version: IpVersion) -> impl Iterator<Item = &BoundAddress> {
        self.interfaces
            .values()
            .flatten()
            .filter(move |a| a.version == version)
    }
}

/// Validates the attachment result and derives [`Targets`]. With
/// `sandbox_only` set, only interfaces living in a sandbox namespace may
/// carry addresses and an address-less target is an error (the portmap
/// contract); without it, address-less interfaces are silently dropped
/// (the firewall contract).
pub(crate) fn validate_attachment(
    result: &AttachmentResult,
    sandbox_only: bool,
) -> Result<Targets, ValidationError> {
    if result.interfaces.is_empty() {
        return Err(ValidationError::NoInterfaces);
    }

    let mut interface_order = Vec::new();
    let mut interfaces: BTreeMap<String, Vec<BoundAddress>> = BTreeMap::new();
    let mut index_map: BTreeMap<usize, String> = BTreeMap::new();

    for (i, intf) in result.interfaces.iter().enumerate() {
        if intf.name.is_empty() {
            return Err(ValidationError::MissingInterfaceName);
        }
        if interface_order.contains(&intf.name) {
            return Err(ValidationError::DuplicateInterface {
                name: intf.name.clone(),
            });
        }
        interface_order.push(intf.name.clone());
        if sandbox_only && intf.sandbox.is_empty() {
            continue;
        }
        interfaces.insert(intf.name.clone(), Vec::new());
        index_map.insert(i, intf.name.clone());
    }

    if result.ips.is_empty() {
        return Err(ValidationError::NoAddresses);
    }

    let mut versions = BTreeSet::new();
    for ip in &result.ips {
        if ip.address.is_empty() {
            return Err(ValidationError::EmptyAddress);
        }
        let index = ip.interface.ok_or_else(|| ValidationError::UnboundAddress {
            address: ip.address.clone(),
        })?;
        let name = index_map
            .get(&index)
            .ok_or_else(|| ValidationError::DanglingAddressReference {
                address: ip.address.clone(),
                index,
            })?;

        let addr = parse_bound_address(ip)?;
        versions.insert(addr.version);
        if let Some(addrs) = interfaces.get_mut(name) {
            addrs.push(addr);
        }
    }

    if sandbox_only {
        for (name, addrs) in &interfaces {
            if addrs.is_empty() {
                return Err(ValidationError::InterfaceWithoutAddresses {
                    name: name.clone(),
                });
            }
        }
    } else {
        interfaces.retain(|_, addrs| !addrs.is_empty());
    }

    Ok(Targets {
        interface_order,
        interfaces,
        versions,
    })
}

fn parse_bound_address(ip: &crate::cni::types::IpConfig) -> Result<BoundAddress, ValidationError> {
    let net: IpNet = ip
        .address
        .parse()
        .map_err(|e: ipnet::AddrParseError| ValidationError::InvalidAddress {
            input: ip.address.clone(),
            reason: e.to_string(),
        })?;
    let version = IpVersion::of(&net.addr());

    if let Some(declared) = &ip.version {
        let matches = matches!(
            (declared.as_str(), version),
            ("4", IpVersion::V4) | ("6", IpVersion::V6)
        );
        if !matches {
            return Err(ValidationError::VersionMismatch {
                address: ip.address.clone(),
                declared: declared.clone(),
                actual: version.to_string(),
            });
        }
    }

    Ok(BoundAddress {
        version,
        net,
        gateway: ip.gateway,
    })
}

/// Validates raw port mappings into their typed form. An unsupported
/// protocol or out-of-range port fails here, before any kernel I/O.
pub(crate) fn validate_port_mappings(
    mappings: &[PortMapping],
) -> Result<Vec<MappedPort>, ValidationError> {
    let mut mapped = Vec::with_capacity(mappings.len());
    for pm in mappings {
        let protocol = match pm.protocol.to_lowercase().as_str() {
            "tcp" => Protocol::Tcp,
            "udp" => Protocol::Udp,
            _ => {
                return Err(ValidationError::UnsupportedProtocol {
                    protocol: pm.protocol.clone(),
                });
            }
        };
        let host_port = port_in_range(pm.host_port, "host")?;
        let container_port = port_in_range(pm.container_port, "container")?;
        let host_ip = match pm.host_ip.as_deref() {
            None | Some("") => None,
            Some(raw) => Some(raw.parse::<IpAddr>().map_err(|e| {
                ValidationError::InvalidHostIp {
                    input: raw.to_string(),
                    reason: e.to_string(),
                }
            })?),
        };
        mapped.push(MappedPort {
            host_port,
            container_port,
            protocol,
            host_ip,
        });
    }
    Ok(mapped)
}

fn port_in_range(port: i32, kind: &'static str) -> Result<u16, ValidationError> {
    u16::try_from(port)
        .ok()
        .filter(|p| *p > 0)
        .ok_or(ValidationError::InvalidPort { kind, port })
}
