#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::cni::types::{
        AttachmentResult, Interface, IpConfig, IpVersion, PortMapping, Protocol,
    };
    use crate::plugin::error::ValidationError;

    fn interface(name: &str, sandbox: &str) -> Interface {
        Interface {
            name: name.to_string(),
            mac: String::new(),
            sandbox: sandbox.to_string(),
        }
    }

    fn ip(version: &str, interface: usize, address: &str) -> IpConfig {
        IpConfig {
            version: Some(version.to_string()),
            interface: Some(interface),
            address: address.to_string(),
            gateway: None,
        }
    }

    fn dual_stack_result() -> AttachmentResult {
        AttachmentResult {
            cni_version: "0.4.0".to_string(),
            interfaces: vec![
                interface("cni0", ""),
                interface("veth0", "/var/run/netns/cni-1234"),
            ],
            ips: vec![
                ip("4", 1, "10.0.0.5/24"),
                ip("6", 1, "fd00::5/64"),
            ],
            routes: Vec::new(),
            dns: None,
        }
    }

    #[test]
    fn test_validate_dual_stack() {
        let targets = validate_attachment(&dual_stack_result(), false).unwrap();
        assert_eq!(targets.bridge(), "cni0");
        assert_eq!(targets.versions.len(), 2);
        assert!(targets.versions.contains(&IpVersion::V4));
        assert!(targets.versions.contains(&IpVersion::V6));
        let addrs = &targets.interfaces["veth0"];
        assert_eq!(addrs.len(), 2);
        assert_eq!(addrs[0].addr().to_string(), "10.0.0.5");
        assert_eq!(addrs[1].addr().to_string(), "fd00::5");
    }

    #[test]
    fn test_validate_sandbox_only_drops_host_interfaces() {
        let targets = validate_attachment(&dual_stack_result(), true).unwrap();
        assert!(!targets.interfaces.contains_key("cni0"));
        assert!(targets.interfaces.contains_key("veth0"));
        // The bridge is still the first interface of the chain.
        assert_eq!(targets.bridge(), "cni0");
    }

    #[test]
    fn test_validate_no_interfaces() {
        let result = AttachmentResult::default();
        assert!(matches!(
            validate_attachment(&result, false),
            Err(ValidationError::NoInterfaces)
        ));
    }

    #[test]
    fn test_validate_unnamed_interface() {
        let mut result = dual_stack_result();
        result.interfaces[1].name = String::new();
        assert!(matches!(
            validate_attachment(&result, false),
            Err(ValidationError::MissingInterfaceName)
        ));
    }

    #[test]
    fn test_validate_duplicate_interface() {
        let mut result = dual_stack_result();
        result.interfaces[1].name = "cni0".to_string();
        assert!(matches!(
            validate_attachment(&result, false),
            Err(ValidationError::DuplicateInterface { name }) if name == "cni0"
        ));
    }

    #[test]
    fn test_validate_no_addresses() {
        let mut result = dual_stack_result();
        result.ips.clear();
        assert!(matches!(
            validate_attachment(&result, false),
            Err(ValidationError::NoAddresses)
        ));
    }

    #[test]
    fn test_validate_unbound_address() {
        let mut result = dual_stack_result();
        result.ips[0].interface = None;
        assert!(matches!(
            validate_attachment(&result, false),
            Err(ValidationError::UnboundAddress { .. })
        ));
    }

    #[test]
    fn test_validate_dangling_address_reference() {
        let mut result = dual_stack_result();
        result.ips[0].interface = Some(7);
        assert!(matches!(
            validate_attachment(&result, false),
            Err(ValidationError::DanglingAddressReference { index: 7, .. })
        ));
    }

    #[test]
    fn test_validate_address_on_host_interface_is_dangling_for_portmap() {
        let mut result = dual_stack_result();
        result.ips[0].interface = Some(0);
        assert!(matches!(
            validate_attachment(&result, true),
            Err(ValidationError::DanglingAddressReference { index: 0, .. })
        ));
    }

    #[test]
    fn test_validate_empty_address() {
        let mut result = dual_stack_result();
        result.ips[0].address = String::new();
        assert!(matches!(
            validate_attachment(&result, false),
            Err(ValidationError::EmptyAddress)
        ));
    }

    #[test]
    fn test_validate_malformed_address() {
        let mut result = dual_stack_result();
        result.ips[0].address = "not-an-address".to_string();
        assert!(matches!(
            validate_attachment(&result, false),
            Err(ValidationError::InvalidAddress { .. })
        ));
    }

    #[test]
    fn test_validate_version_mismatch() {
        let mut result = dual_stack_result();
        result.ips[0].version = Some("6".to_string());
        assert!(matches!(
            validate_attachment(&result, false),
            Err(ValidationError::VersionMismatch { .. })
        ));
    }

    #[test]
    fn test_validate_sandbox_interface_without_addresses() {
        let mut result = dual_stack_result();
        result
            .interfaces
            .push(interface("veth1", "/var/run/netns/cni-5678"));
        assert!(matches!(
            validate_attachment(&result, true),
            Err(ValidationError::InterfaceWithoutAddresses { name }) if name == "veth1"
        ));
    }

    #[test]
    fn test_port_mappings_happy_path() {
        let mappings = vec![
            PortMapping {
                host_port: 8080,
                container_port: 80,
                protocol: "tcp".to_string(),
                host_ip: None,
            },
            PortMapping {
                host_port: 5353,
                container_port: 53,
                protocol: "UDP".to_string(),
                host_ip: Some("192.168.1.1".to_string()),
            },
        ];
        let mapped = validate_port_mappings(&mappings).unwrap();
        assert_eq!(mapped[0].protocol, Protocol::Tcp);
        assert_eq!(mapped[0].host_port, 8080);
        assert_eq!(mapped[0].container_port, 80);
        assert_eq!(mapped[1].protocol, Protocol::Udp);
        assert_eq!(mapped[1].host_ip.unwrap().to_string(), "192.168.1.1");
    }

    #[test]
    fn test_port_mappings_reject_unsupported_protocol() {
        let mappings = vec![PortMapping {
            host_port: 8080,
            container_port: 80,
            protocol: "sctp".to_string(),
            host_ip: None,
        }];
        assert!(matches!(
            validate_port_mappings(&mappings),
            Err(ValidationError::UnsupportedProtocol { protocol }) if protocol == "sctp"
        ));
    }

    #[test]
    fn test_port_mappings_reject_bad_port_and_host_ip() {
        let bad_port = vec![PortMapping {
            host_port: 0,
            container_port: 80,
            protocol: "tcp".to_string(),
            host_ip: None,
        }];
        assert!(matches!(
            validate_port_mappings(&bad_port),
            Err(ValidationError::InvalidPort { kind: "host", .. })
        ));

        let bad_ip = vec![PortMapping {
            host_port: 8080,
            container_port: 80,
            protocol: "tcp".to_string(),
            host_ip: Some("299.0.0.1".to_string()),
        }];
        assert!(matches!(
            validate_port_mappings(&bad_ip),
            Err(ValidationError::InvalidHostIp { .. })
        ));
    }

    #[tokio::test]
    async fn test_delete_with_empty_previous_result_is_a_noop() {
        // Delete on a container that was never added must succeed without
        // touching kernel state; an empty previous result short-circuits
        // before any nftables call.
        let conf = crate::cni::config::parse_portmap_conf(
            br#"{"cniVersion": "0.4.0", "name": "p", "type": "bridgewall-portmap"}"#,
        )
        .unwrap();
        let plugin = PortmapPlugin::new(&conf, "dummy-58840a9d");
        plugin.delete(&AttachmentResult::default()).await.unwrap();

        let conf = crate::cni::config::parse_firewall_conf(
            br#"{"cniVersion": "0.4.0", "name": "p", "type": "bridgewall-firewall"}"#,
        )
        .unwrap();
        let plugin = FirewallPlugin::new(&conf, "dummy-58840a9d");
        plugin.delete(&AttachmentResult::default()).await.unwrap();
    }
}
