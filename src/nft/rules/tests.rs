#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::cni::types::{BoundAddress, IpVersion, MappedPort, Protocol};
    use crate::nft::rules::{forward, nat, rewrite};
    use nftables::{
        expr::{Expression, NamedExpression, Payload},
        stmt::{Operator, Statement},
    };

    fn addr4() -> BoundAddress {
        BoundAddress {
            version: IpVersion::V4,
            net: "10.0.0.5/24".parse().unwrap(),
            gateway: None,
        }
    }

    fn addr6() -> BoundAddress {
        BoundAddress {
            version: IpVersion::V6,
            net: "fd00::5/64".parse().unwrap(),
            gateway: None,
        }
    }

    fn mapping() -> MappedPort {
        MappedPort {
            host_port: 8080,
            container_port: 80,
            protocol: Protocol::Tcp,
            host_ip: None,
        }
    }

    fn match_right<'a>(stmt: &'a Statement<'a>) -> &'a Expression<'a> {
        match stmt {
            Statement::Match(m) => &m.right,
            other => panic!("expected match statement, got {:?}", other),
        }
    }

    fn payload_field<'a>(stmt: &'a Statement<'a>) -> (&'a str, &'a str) {
        match stmt {
            Statement::Match(m) => match &m.left {
                Expression::Named(NamedExpression::Payload(Payload::PayloadField(f))) => {
                    (f.protocol.as_ref(), f.field.as_ref())
                }
                other => panic!("expected payload field, got {:?}", other),
            },
            other => panic!("expected match statement, got {:?}", other),
        }
    }

    #[test]
    fn test_forward_triple_shapes() {
        let addr = addr4();
        let p = TrafficRules::builder()
            .version(IpVersion::V4)
            .table("filter")
            .chain("ffwdummy")
            .bridge("cni0")
            .addr(&addr)
            .build();

        let inbound = forward::inbound_rule(&p);
        assert_eq!(inbound.expr.len(), 5);
        assert_eq!(payload_field(&inbound.expr[1]), ("ip", "daddr"));
        assert_eq!(
            *match_right(&inbound.expr[1]),
            Expression::String("10.0.0.5".into())
        );
        assert!(matches!(inbound.expr[3], Statement::Counter(_)));
        assert!(matches!(inbound.expr[4], Statement::Accept(_)));
        // Reply-direction rule is conditioned on established flow state.
        assert!(matches!(
            &inbound.expr[2],
            Statement::Match(m) if m.op == Operator::IN
        ));

        let outbound = forward::outbound_rule(&p);
        assert_eq!(outbound.expr.len(), 4);
        assert_eq!(payload_field(&outbound.expr[1]), ("ip", "saddr"));

        let intra = forward::intra_interface_rule(&p);
        assert_eq!(intra.expr.len(), 4);
        assert_eq!(
            *match_right(&intra.expr[0]),
            Expression::String("cni0".into())
        );
        assert_eq!(
            *match_right(&intra.expr[1]),
            Expression::String("cni0".into())
        );
    }

    #[test]
    fn test_forward_rules_are_family_correct() {
        let addr = addr6();
        let p = TrafficRules::builder()
            .version(IpVersion::V6)
            .table("filter")
            .chain("ffwdummy")
            .bridge("cni0")
            .addr(&addr)
            .build();
        let inbound = forward::inbound_rule(&p);
        assert_eq!(payload_field(&inbound.expr[1]), ("ip6", "daddr"));
        assert_eq!(
            *match_right(&inbound.expr[1]),
            Expression::String("fd00::5".into())
        );
        assert_eq!(inbound.family, nftables::types::NfFamily::IP6);
    }

    #[test]
    fn test_dest_nat_rule_rewrites_to_container() {
        let addr = addr4();
        let m = mapping();
        let p = PortMapRules::builder()
            .version(IpVersion::V4)
            .table("nat")
            .chain("nprdummy")
            .bridge("cni0")
            .addr(&addr)
            .mapping(&m)
            .build();
        let rule = nat::dest_nat_rule(&p);
        assert_eq!(rule.expr.len(), 4);

        // Ingress on anything but the container bridge.
        assert!(matches!(
            &rule.expr[0],
            Statement::Match(m) if m.op == Operator::NEQ
        ));
        // IANA protocol number immediate.
        assert_eq!(*match_right(&rule.expr[1]), Expression::Number(6));
        assert_eq!(payload_field(&rule.expr[2]), ("tcp", "dport"));
        assert_eq!(*match_right(&rule.expr[2]), Expression::Number(8080));

        match &rule.expr[3] {
            Statement::DNAT(Some(nat)) => {
                assert_eq!(nat.addr, Some(Expression::String("10.0.0.5".into())));
                assert_eq!(nat.port, Some(Expression::Number(80)));
            }
            other => panic!("expected dnat statement, got {:?}", other),
        }
    }

    #[test]
    fn test_dest_nat_rule_narrows_on_host_ip() {
        let addr = addr4();
        let m = MappedPort {
            host_ip: Some("192.168.1.1".parse().unwrap()),
            ..mapping()
        };
        let p = PortMapRules::builder()
            .version(IpVersion::V4)
            .table("nat")
            .chain("nprdummy")
            .bridge("cni0")
            .addr(&addr)
            .mapping(&m)
            .build();
        let rule = nat::dest_nat_rule(&p);
        assert_eq!(rule.expr.len(), 5);
        assert_eq!(payload_field(&rule.expr[1]), ("ip", "daddr"));
        assert_eq!(
            *match_right(&rule.expr[1]),
            Expression::String("192.168.1.1".into())
        );
    }

    #[test]
    fn test_rewrite_rule_mangles_and_returns() {
        let addr = addr4();
        let m = mapping();
        let p = PortMapRules::builder()
            .version(IpVersion::V4)
            .table("raw")
            .chain("rprdummy")
            .bridge("cni0")
            .addr(&addr)
            .mapping(&m)
            .build();
        let rule = rewrite::dest_nat_rewrite_rule(&p);

        assert!(matches!(rule.expr[0], Statement::Counter(_)));
        let mangles: Vec<_> = rule
            .expr
            .iter()
            .filter_map(|s| match s {
                Statement::Mangle(m) => Some(m),
                _ => None,
            })
            .collect();
        assert_eq!(mangles.len(), 2);
        assert_eq!(mangles[0].value, Expression::String("10.0.0.5".into()));
        assert_eq!(mangles[1].value, Expression::Number(80));
        assert!(matches!(
            rule.expr.last(),
            Some(Statement::Return(_))
        ));
    }

    #[test]
    fn test_mapped_port_allow_matches_container_port() {
        let addr = addr4();
        let m = mapping();
        // The allow rule guards post-rewrite traffic: container port, not
        // host port.
        let expected = [
            match_oifname("cni0"),
            match_daddr(IpVersion::V4, &addr.addr()),
            match_l4proto(Protocol::Tcp),
            match_dport(Protocol::Tcp, m.container_port),
        ];
        assert_eq!(*match_right(&expected[3]), Expression::Number(80));
        assert_eq!(payload_field(&expected[1]), ("ip", "daddr"));
    }

    #[test]
    fn test_multicast_rule_uses_prefix_compare() {
        let addr = addr4();
        let p = PostRoutingRules::builder()
            .version(IpVersion::V4)
            .table("nat")
            .chain("npodummy")
            .bridge("cni0")
            .addr(&addr)
            .snat(true)
            .build();
        let rule = nat::local_multicast_rule(&p);
        match match_right(&rule.expr[2]) {
            Expression::Named(NamedExpression::Prefix(prefix)) => {
                assert_eq!(prefix.len, 24);
                assert_eq!(*prefix.addr, Expression::String("224.0.0.0".into()));
            }
            other => panic!("expected prefix expression, got {:?}", other),
        }
        assert!(matches!(rule.expr.last(), Some(Statement::Return(_))));
    }

    #[test]
    fn test_masquerade_pair() {
        let addr = addr4();
        let p = PostRoutingRules::builder()
            .version(IpVersion::V4)
            .table("nat")
            .chain("npodummy")
            .bridge("cni0")
            .addr(&addr)
            .snat(true)
            .build();

        let ingress = nat::source_nat_rule(&p);
        assert!(matches!(
            ingress.expr.last(),
            Some(Statement::Masquerade(_))
        ));
        assert_eq!(payload_field(&ingress.expr[1]), ("ip", "saddr"));

        let egress = nat::egress_source_nat_rule(&p);
        assert!(matches!(egress.expr.last(), Some(Statement::Masquerade(_))));
    }

    #[test]
    fn test_match_prefix_predicate() {
        let addr = addr4();
        let full = rule(
            IpVersion::V4,
            "filter",
            "forward",
            vec![
                match_oifname("cni0"),
                match_daddr(IpVersion::V4, &addr.addr()),
                match_l4proto(Protocol::Tcp),
                match_dport(Protocol::Tcp, 80),
                counter(),
                Statement::Accept(None),
            ],
        );

        let prefix = [match_oifname("cni0"), match_daddr(IpVersion::V4, &addr.addr())];
        assert!(statements_match_prefix(&full, &prefix));

        let other = [match_oifname("cni1"), match_daddr(IpVersion::V4, &addr.addr())];
        assert!(!statements_match_prefix(&full, &other));

        let longer_than_rule = vec![counter(); 7];
        assert!(!statements_match_prefix(&full, &longer_than_rule));
    }
}
