use ipnet::IpNet;
use nftables::types::NfFamily;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Address family an nftables table is scoped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum IpVersion {
    V4,
    V6,
}

impl IpVersion {
    pub fn of(addr: &IpAddr) -> Self {
        match addr {
            IpAddr::V4(_) => Self::V4,
            IpAddr::V6(_) => Self::V6,
        }
    }

    pub fn family(&self) -> NfFamily {
        match self {
            Self::V4 => NfFamily::IP,
            Self::V6 => NfFamily::IP6,
        }
    }

    /// Payload protocol name for network-header address fields.
    pub fn addr_protocol(&self) -> &'static str {
        match self {
            Self::V4 => "ip",
            Self::V6 => "ip6",
        }
    }

    pub fn loopback(&self) -> IpAddr {
        match self {
            Self::V4 => IpAddr::V4(Ipv4Addr::LOCALHOST),
            Self::V6 => IpAddr::V6(Ipv6Addr::LOCALHOST),
        }
    }
}

impl fmt::Display for IpVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::V4 => write!(f, "4"),
            Self::V6 => write!(f, "6"),
        }
    }
}

/// Attachment result produced by the upstream plugin chain. Interfaces and
/// addresses are consumed here, never created; ADD passes the document
/// through unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AttachmentResult {
    #[serde(rename = "cniVersion", default)]
    pub cni_version: String,
    #[serde(default)]
    pub interfaces: Vec<Interface>,
    #[serde(default)]
    pub ips: Vec<IpConfig>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub routes: Vec<Route>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Interface {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub mac: String,
    /// Network namespace path. Empty for host-side interfaces such as the
    /// bridge and the host end of a veth pair.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub sandbox: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Index into `AttachmentResult::interfaces`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interface: Option<usize>,
    /// CIDR literal, e.g. "10.88.0.5/16".
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway: Option<IpAddr>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Route {
    pub dst: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gw: Option<IpAddr>,
}

/// One externally published port, as delivered by the runtime in
/// `runtimeConfig.portMappings`. Raw wire form; see [`MappedPort`] for the
/// validated counterpart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortMapping {
    #[serde(rename = "hostPort")]
    pub host_port: i32,
    #[serde(rename = "containerPort")]
    pub container_port: i32,
    #[serde(default)]
    pub protocol: String,
    #[serde(rename = "hostIP", default, skip_serializing_if = "Option::is_none")]
    pub host_ip: Option<String>,
}

/// Transport protocols supported for port mapping. Anything else is
/// rejected during validation, before any kernel state is touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Tcp,
    Udp,
}

impl Protocol {
    /// IANA protocol number, matched as a one-byte immediate.
    pub fn number(&self) -> u32 {
        match self {
            Self::Tcp => 6,
            Self::Udp => 17,
        }
    }

    /// Payload protocol name for transport-header port fields.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Udp => "udp",
        }
    }
}

/// A validated port mapping entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappedPort {
    pub host_port: u16,
    pub container_port: u16,
    pub protocol: Protocol,
    pub host_ip: Option<IpAddr>,
}

/// An address bound to a container interface, parsed out of the attachment
/// result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundAddress {
    pub version: IpVersion,
    pub net: IpNet,
    pub gateway: Option<IpAddr>,
}

impl BoundAddress {
    pub fn addr(&self) -> IpAddr {
        self.net.addr()
    }
}
