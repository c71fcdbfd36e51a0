//! Rule expression builders. Construction is pure data: each builder
//! returns the ordered match/action statement list of one rule, and the
//! surrounding functions only stage and commit them. Parameters travel in
//! typed structs so a missing field is a compile error, not a runtime one.

pub mod forward;
pub mod nat;
pub mod rewrite;

#[cfg(test)]
mod tests;

use crate::cni::types::{BoundAddress, IpVersion, MappedPort, Protocol};
use bon::Builder;
use nftables::{
    expr::{CT, Expression, Meta, MetaKey, NamedExpression, Payload, PayloadField},
    schema::Rule,
    stmt::{Counter, Match, Operator, Statement},
};
use std::borrow::Cow;
use std::net::IpAddr;

/// Parameters for the per-address forwarding rules of the filter table.
#[derive(Builder)]
pub struct TrafficRules<'a> {
    pub version: IpVersion,
    pub table: &'a str,
    pub chain: &'a str,
    pub bridge: &'a str,
    pub addr: &'a BoundAddress,
}

/// Parameters for the rules serving one port mapping of one address.
#[derive(Builder)]
pub struct PortMapRules<'a> {
    pub version: IpVersion,
    pub table: &'a str,
    pub chain: &'a str,
    pub bridge: &'a str,
    pub addr: &'a BoundAddress,
    pub mapping: &'a MappedPort,
}

/// Parameters for locating previously committed mapped-port rules.
/// Protocol and port narrow the match; without them every mapped-port rule
/// for the address is selected.
#[derive(Builder)]
pub struct PortMapMatch<'a> {
    pub version: IpVersion,
    pub table: &'a str,
    pub chain: &'a str,
    pub bridge: &'a str,
    pub addr: &'a BoundAddress,
    pub protocol: Option<Protocol>,
    pub port: Option<u16>,
}

/// Parameters for the postrouting rule set of one address.
#[derive(Builder)]
pub struct PostRoutingRules<'a> {
    pub version: IpVersion,
    pub table: &'a str,
    pub chain: &'a str,
    pub bridge: &'a str,
    pub addr: &'a BoundAddress,
    pub snat: bool,
}

pub(crate) fn rule(
    version: IpVersion,
    table: &str,
    chain: &str,
    expr: Vec<Statement<'static>>,
) -> Rule<'static> {
    Rule {
        family: version.family(),
        table: Cow::Owned(table.to_string()),
        chain: Cow::Owned(chain.to_string()),
        expr: Cow::Owned(expr),
        handle: None,
        index: None,
        comment: None,
    }
}

fn match_ifname(key: MetaKey, name: &str, op: Operator) -> Statement<'static> {
    Statement::Match(Match {
        left: Expression::Named(NamedExpression::Meta(Meta { key })),
        right: Expression::String(Cow::Owned(name.to_string())),
        op,
    })
}

pub(crate) fn match_iifname(name: &str) -> Statement<'static> {
    match_ifname(MetaKey::Iifname, name, Operator::EQ)
}

pub(crate) fn match_not_iifname(name: &str) -> Statement<'static> {
    match_ifname(MetaKey::Iifname, name, Operator::NEQ)
}

pub(crate) fn match_oifname(name: &str) -> Statement<'static> {
    match_ifname(MetaKey::Oifname, name, Operator::EQ)
}

fn match_addr(version: IpVersion, field: &'static str, addr: &IpAddr) -> Statement<'static> {
    Statement::Match(Match {
        left: Expression::Named(NamedExpression::Payload(Payload::PayloadField(
            PayloadField {
                protocol: Cow::Borrowed(version.addr_protocol()),
                field: Cow::Borrowed(field),
            },
        ))),
        right: Expression::String(Cow::Owned(addr.to_string())),
        op: Operator::EQ,
    })
}

/// Network-header source address compare, 4 or 16 bytes wide by family.
pub(crate) fn match_saddr(version: IpVersion, addr: &IpAddr) -> Statement<'static> {
    match_addr(version, "saddr", addr)
}

/// Network-header destination address compare.
pub(crate) fn match_daddr(version: IpVersion, addr: &IpAddr) -> Statement<'static> {
    match_addr(version, "daddr", addr)
}

/// Transport protocol compare against the IANA protocol number.
pub(crate) fn match_l4proto(protocol: Protocol) -> Statement<'static> {
    Statement::Match(Match {
        left: Expression::Named(NamedExpression::Meta(Meta {
            key: MetaKey::L4proto,
        })),
        right: Expression::Number(protocol.number()),
        op: Operator::EQ,
    })
}

/// Transport-header destination port compare.
pub(crate) fn match_dport(protocol: Protocol, port: u16) -> Statement<'static> {
    Statement::Match(Match {
        left: Expression::Named(NamedExpression::Payload(Payload::PayloadField(
            PayloadField {
                protocol: Cow::Borrowed(protocol.as_str()),
                field: Cow::Borrowed("dport"),
            },
        ))),
        right: Expression::Number(port as u32),
        op: Operator::EQ,
    })
}

/// Matches reply and related traffic of established flows.
pub(crate) fn match_ct_established() -> Statement<'static> {
    Statement::Match(Match {
        left: Expression::Named(NamedExpression::CT(CT {
            key: Cow::Borrowed("state"),
            family: None,
            dir: None,
        })),
        right: Expression::List(vec![
            Expression::String(Cow::Borrowed("established")),
            Expression::String(Cow::Borrowed("related")),
        ]),
        op: Operator::IN,
    })
}

pub(crate) fn counter() -> Statement<'static> {
    Statement::Counter(Counter::Anonymous(None))
}

/// True when the committed rule starts with exactly the reconstructed
/// match statements. Each rule family supplies its own reconstruction;
/// this is the single equality check used for deletion by match.
pub(crate) fn statements_match_prefix(rule: &Rule<'_>, prefix: &[Statement<'_>]) -> bool {
    rule.expr.len() >= prefix.len()
        && rule
            .expr
            .iter()
            .zip(prefix.iter())
            .all(|(committed, expected)| committed == expected)
}
