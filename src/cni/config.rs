use crate::cni::error::CniError;
use crate::cni::types::{AttachmentResult, PortMapping};
use serde::Deserialize;

/// CNI spec versions this plugin pair negotiates.
pub const SUPPORTED_CNI_VERSIONS: &[&str] = &["0.3.0", "0.3.1", "0.4.0"];

/// Network configuration for the firewall plugin, as delivered on stdin.
/// Table and chain names default to the well-known kernel hook names.
#[derive(Debug, Clone, Deserialize)]
pub struct FirewallConf {
    #[serde(rename = "cniVersion", default)]
    pub cni_version: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default)]
    pub plugin_type: String,
    #[serde(rename = "filter_table_name", default = "default_filter_table")]
    pub filter_table: String,
    #[serde(rename = "forward_chain_name", default = "default_forward_chain")]
    pub forward_chain: String,
    #[serde(rename = "prevResult", default)]
    pub prev_result: Option<AttachmentResult>,
}

/// Network configuration for the portmap plugin.
#[derive(Debug, Clone, Deserialize)]
pub struct PortmapConf {
    #[serde(rename = "cniVersion", default)]
    pub cni_version: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default)]
    pub plugin_type: String,
    #[serde(rename = "nat_table_name", default = "default_nat_table")]
    pub nat_table: String,
    #[serde(rename = "postrouting_chain_name", default = "default_postrouting_chain")]
    pub postrouting_chain: String,
    #[serde(rename = "prerouting_chain_name", default = "default_prerouting_chain")]
    pub prerouting_chain: String,
    #[serde(rename = "output_chain_name", default = "default_output_chain")]
    pub output_chain: String,
    #[serde(rename = "input_chain_name", default = "default_input_chain")]
    pub input_chain: String,
    #[serde(rename = "raw_table_name", default = "default_raw_table")]
    pub raw_table: String,
    #[serde(rename = "raw_prerouting_chain_name", default = "default_prerouting_chain")]
    pub raw_prerouting_chain: String,
    #[serde(rename = "filter_table_name", default = "default_filter_table")]
    pub filter_table: String,
    #[serde(rename = "forward_chain_name", default = "default_forward_chain")]
    pub forward_chain: String,
    /// Masquerade container-sourced traffic on its way out. On by default.
    #[serde(default = "default_snat")]
    pub snat: bool,
    #[serde(rename = "runtimeConfig", default)]
    pub runtime_config: RuntimeConfig,
    #[serde(rename = "prevResult", default)]
    pub prev_result: Option<AttachmentResult>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RuntimeConfig {
    #[serde(rename = "portMappings", default)]
    pub port_mappings: Vec<PortMapping>,
}

fn default_filter_table() -> String {
    "filter".to_string()
}

fn default_forward_chain() -> String {
    "forward".to_string()
}

fn default_nat_table() -> String {
    "nat".to_string()
}

fn default_postrouting_chain() -> String {
    "postrouting".to_string()
}

fn default_prerouting_chain() -> String {
    "prerouting".to_string()
}

fn default_output_chain() -> String {
    "output".to_string()
}

fn default_input_chain() -> String {
    "input".to_string()
}

fn default_raw_table() -> String {
    "raw".to_string()
}

fn default_snat() -> bool {
    true
}

fn ensure_supported_version(version: &str) -> Result<(), CniError> {
    if SUPPORTED_CNI_VERSIONS.contains(&version) {
        Ok(())
    } else {
        Err(CniError::unsupported_version(version))
    }
}

pub fn parse_firewall_conf(data: &[u8]) -> Result<FirewallConf, CniError> {
    let conf: FirewallConf = serde_json::from_slice(data).map_err(CniError::Decode)?;
    ensure_supported_version(&conf.cni_version)?;
    Ok(conf)
}

pub fn parse_portmap_conf(data: &[u8]) -> Result<PortmapConf, CniError> {
    let conf: PortmapConf = serde_json::from_slice(data).map_err(CniError::Decode)?;
    ensure_supported_version(&conf.cni_version)?;

    // Reject out-of-range port numbers up front; the full mapping
    // validation (protocol, host IP) runs in the plugin before any
    // kernel state is touched.
    for pm in &conf.runtime_config.port_mappings {
        if pm.container_port <= 0 || pm.container_port > u16::MAX as i32 {
            return Err(CniError::invalid_port_mapping(format!(
                "invalid container port number: {}",
                pm.container_port
            )));
        }
        if pm.host_port <= 0 || pm.host_port > u16::MAX as i32 {
            return Err(CniError::invalid_port_mapping(format!(
                "invalid host port number: {}",
                pm.host_port
            )));
        }
    }

    Ok(conf)
}
