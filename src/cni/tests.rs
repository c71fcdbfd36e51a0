#[cfg(test)]
mod tests {
    use super::super::config::*;
    use super::super::error::CniError;
    use super::super::types::AttachmentResult;

    const PREV_RESULT: &str = r#"{
        "cniVersion": "0.4.0",
        "interfaces": [
            {"name": "cni-podman0", "mac": "c6:af:d9:de:29:82"},
            {"name": "veth73eceb2d", "mac": "da:d0:0e:3f:ef:e7"},
            {"name": "eth0", "mac": "d2:75:52:3d:30:f4", "sandbox": "/var/run/netns/cni-d459a64a"}
        ],
        "ips": [
            {"version": "4", "interface": 2, "address": "10.88.0.7/16", "gateway": "10.88.0.1"}
        ],
        "routes": [{"dst": "0.0.0.0/0"}]
    }"#;

    #[test]
    fn test_firewall_conf_defaults() {
        let data = br#"{"cniVersion": "0.4.0", "name": "podman", "type": "bridgewall-firewall"}"#;
        let conf = parse_firewall_conf(data).unwrap();
        assert_eq!(conf.filter_table, "filter");
        assert_eq!(conf.forward_chain, "forward");
        assert!(conf.prev_result.is_none());
    }

    #[test]
    fn test_firewall_conf_overrides() {
        let data = br#"{
            "cniVersion": "0.4.0",
            "name": "podman",
            "type": "bridgewall-firewall",
            "filter_table_name": "fwall",
            "forward_chain_name": "fwd"
        }"#;
        let conf = parse_firewall_conf(data).unwrap();
        assert_eq!(conf.filter_table, "fwall");
        assert_eq!(conf.forward_chain, "fwd");
    }

    #[test]
    fn test_unsupported_cni_version() {
        let data = br#"{"cniVersion": "1.1.0", "name": "podman", "type": "bridgewall-firewall"}"#;
        let err = parse_firewall_conf(data).unwrap_err();
        assert!(matches!(err, CniError::UnsupportedVersion { version } if version == "1.1.0"));
    }

    #[test]
    fn test_firewall_conf_prev_result() {
        let data = format!(
            r#"{{"cniVersion": "0.4.0", "name": "podman", "type": "bridgewall-firewall",
                "prevResult": {}}}"#,
            PREV_RESULT
        );
        let conf = parse_firewall_conf(data.as_bytes()).unwrap();
        let prev = conf.prev_result.unwrap();
        assert_eq!(prev.interfaces.len(), 3);
        assert_eq!(prev.interfaces[2].sandbox, "/var/run/netns/cni-d459a64a");
        assert_eq!(prev.ips.len(), 1);
        assert_eq!(prev.ips[0].interface, Some(2));
        assert_eq!(prev.ips[0].address, "10.88.0.7/16");
    }

    #[test]
    fn test_portmap_conf_defaults() {
        let data = br#"{
            "cniVersion": "0.4.0",
            "name": "podman",
            "type": "bridgewall-portmap",
            "runtimeConfig": {
                "portMappings": [
                    {"hostPort": 8080, "containerPort": 80, "protocol": "tcp"}
                ]
            }
        }"#;
        let conf = parse_portmap_conf(data).unwrap();
        assert_eq!(conf.nat_table, "nat");
        assert_eq!(conf.postrouting_chain, "postrouting");
        assert_eq!(conf.prerouting_chain, "prerouting");
        assert_eq!(conf.output_chain, "output");
        assert_eq!(conf.input_chain, "input");
        assert_eq!(conf.raw_table, "raw");
        assert_eq!(conf.raw_prerouting_chain, "prerouting");
        assert_eq!(conf.filter_table, "filter");
        assert_eq!(conf.forward_chain, "forward");
        assert!(conf.snat);
        assert_eq!(conf.runtime_config.port_mappings.len(), 1);
        assert_eq!(conf.runtime_config.port_mappings[0].host_port, 8080);
    }

    #[test]
    fn test_portmap_conf_rejects_bad_ports() {
        for (host, container) in [(0, 80), (8080, 0), (70000, 80), (8080, -1)] {
            let data = format!(
                r#"{{"cniVersion": "0.4.0", "name": "p", "type": "bridgewall-portmap",
                    "runtimeConfig": {{"portMappings": [
                        {{"hostPort": {}, "containerPort": {}, "protocol": "tcp"}}
                    ]}}}}"#,
                host, container
            );
            let err = parse_portmap_conf(data.as_bytes()).unwrap_err();
            assert!(matches!(err, CniError::InvalidPortMapping { .. }));
        }
    }

    #[test]
    fn test_portmap_conf_snat_disabled() {
        let data = br#"{"cniVersion": "0.4.0", "name": "p", "type": "bridgewall-portmap", "snat": false}"#;
        let conf = parse_portmap_conf(data).unwrap();
        assert!(!conf.snat);
    }

    #[test]
    fn test_attachment_result_round_trip() {
        let result: AttachmentResult = serde_json::from_str(PREV_RESULT).unwrap();
        let json = serde_json::to_string(&result).unwrap();
        let reparsed: AttachmentResult = serde_json::from_str(&json).unwrap();
        assert_eq!(reparsed.interfaces.len(), result.interfaces.len());
        assert_eq!(reparsed.ips[0].address, result.ips[0].address);
        assert_eq!(reparsed.routes.len(), 1);
    }
}
