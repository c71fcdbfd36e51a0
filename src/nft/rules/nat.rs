//! NAT rules: destination NAT for published ports and the postrouting
//! set (multicast/broadcast pass-through and source masquerading).

use crate::cni::types::IpVersion;
use crate::nft::Session;
use crate::nft::error::NftError;
use crate::nft::rules::{
    PortMapRules, PostRoutingRules, counter, match_daddr, match_dport, match_iifname,
    match_l4proto, match_not_iifname, match_oifname, match_saddr, rule,
};
use nftables::{
    expr::{Expression, NamedExpression, Payload, PayloadField, Prefix},
    schema::{NfListObject, Rule},
    stmt::{Match, NAT, NATFamily, Operator, Statement},
};
use std::borrow::Cow;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

fn nat_family(version: IpVersion) -> NATFamily {
    match version {
        IpVersion::V4 => NATFamily::IP,
        IpVersion::V6 => NATFamily::IP6,
    }
}

/// Destination prefix compare, e.g. the local-multicast block.
fn match_daddr_prefix(version: IpVersion, addr: &IpAddr, len: u32) -> Statement<'static> {
    Statement::Match(Match {
        left: Expression::Named(NamedExpression::Payload(Payload::PayloadField(
            PayloadField {
                protocol: Cow::Borrowed(version.addr_protocol()),
                field: Cow::Borrowed("daddr"),
            },
        ))),
        right: Expression::Named(NamedExpression::Prefix(Prefix {
            addr: Box::new(Expression::String(Cow::Owned(addr.to_string()))),
            len,
        })),
        op: Operator::EQ,
    })
}

/// Rewrites traffic arriving on a non-container interface for the mapped
/// host port to the container address and port. Family-correct address and
/// port immediates.
pub(crate) fn dest_nat_rule(p: &PortMapRules<'_>) -> Rule<'static> {
    let mut expr = vec![match_not_iifname(p.bridge)];
    if let Some(host_ip) = &p.mapping.host_ip {
        expr.push(match_daddr(p.version, host_ip));
    }
    expr.push(match_l4proto(p.mapping.protocol));
    expr.push(match_dport(p.mapping.protocol, p.mapping.host_port));
    expr.push(Statement::DNAT(Some(NAT {
        addr: Some(Expression::String(Cow::Owned(p.addr.addr().to_string()))),
        family: Some(nat_family(p.version)),
        port: Some(Expression::Number(p.mapping.container_port as u32)),
        flags: None,
    })));
    rule(p.version, p.table, p.chain, expr)
}

pub async fn add_dest_nat_rule(
    session: &mut Session,
    p: &PortMapRules<'_>,
) -> Result<(), NftError> {
    session.stage(NfListObject::Rule(dest_nat_rule(p)));
    session.commit().await.map_err(|e| {
        e.with_context(format!(
            "failed adding destination NAT rule for port {} in chain {} of ipv{} {} table",
            p.mapping.host_port, p.chain, p.version, p.table
        ))
    })
}

/// Exempts container-sourced traffic to local multicast from further
/// postrouting NAT. Return, not accept: later chains still see it.
pub(crate) fn local_multicast_rule(p: &PostRoutingRules<'_>) -> Rule<'static> {
    let (prefix_addr, prefix_len): (IpAddr, u32) = match p.version {
        IpVersion::V4 => (IpAddr::V4(Ipv4Addr::new(224, 0, 0, 0)), 24),
        IpVersion::V6 => (
            IpAddr::V6(Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 0, 0)),
            16,
        ),
    };
    rule(
        p.version,
        p.table,
        p.chain,
        vec![
            match_iifname(p.bridge),
            match_saddr(p.version, &p.addr.addr()),
            match_daddr_prefix(p.version, &prefix_addr, prefix_len),
            counter(),
            Statement::Return(None),
        ],
    )
}

/// Exempts container-sourced limited-broadcast traffic from NAT. IPv4 only.
pub(crate) fn broadcast_rule(p: &PostRoutingRules<'_>) -> Rule<'static> {
    rule(
        p.version,
        p.table,
        p.chain,
        vec![
            match_iifname(p.bridge),
            match_saddr(p.version, &p.addr.addr()),
            match_daddr(p.version, &IpAddr::V4(Ipv4Addr::BROADCAST)),
            counter(),
            Statement::Return(None),
        ],
    )
}

/// Masquerades container-sourced traffic entering on the bridge.
pub(crate) fn source_nat_rule(p: &PostRoutingRules<'_>) -> Rule<'static> {
    rule(
        p.version,
        p.table,
        p.chain,
        vec![
            match_iifname(p.bridge),
            match_saddr(p.version, &p.addr.addr()),
            counter(),
            Statement::Masquerade(None),
        ],
    )
}

/// Egress-direction variant: container-sourced traffic leaving through the
/// bridge (hairpin to a published port of the same bridge).
pub(crate) fn egress_source_nat_rule(p: &PostRoutingRules<'_>) -> Rule<'static> {
    rule(
        p.version,
        p.table,
        p.chain,
        vec![
            match_oifname(p.bridge),
            match_saddr(p.version, &p.addr.addr()),
            counter(),
            Statement::Masquerade(None),
        ],
    )
}

/// Appends the postrouting rule set for one address: multicast and
/// broadcast pass-through first so they escape the masquerade below them.
pub async fn add_post_routing_rules(
    session: &mut Session,
    p: &PostRoutingRules<'_>,
) -> Result<(), NftError> {
    session.stage(NfListObject::Rule(local_multicast_rule(p)));
    if p.version == IpVersion::V4 {
        session.stage(NfListObject::Rule(broadcast_rule(p)));
    }
    if p.snat {
        session.stage(NfListObject::Rule(source_nat_rule(p)));
        session.stage(NfListObject::Rule(egress_source_nat_rule(p)));
    }
    session.commit().await.map_err(|e| {
        e.with_context(format!(
            "failed adding postrouting rules in chain {} of ipv{} {} table for {}",
            p.chain,
            p.version,
            p.table,
            p.addr.addr()
        ))
    })
}
