//! Raw-table destination rewrite. Where NAT must happen before connection
//! tracking establishes state, the destination address and transport port
//! are rewritten in place; mangling the named header fields makes the
//! kernel recompute the transport checksum (pseudo-header aware) as part
//! of the payload write. The rule returns afterwards instead of accepting,
//! so the rest of the raw chain still runs.

use crate::nft::Session;
use crate::nft::error::NftError;
use crate::nft::rules::{
    PortMapRules, counter, match_daddr, match_dport, match_l4proto, match_not_iifname, rule,
};
use nftables::{
    expr::{Expression, NamedExpression, Payload, PayloadField},
    schema::{NfListObject, Rule},
    stmt::{Mangle, Statement},
};
use std::borrow::Cow;

fn mangle_daddr(p: &PortMapRules<'_>) -> Statement<'static> {
    Statement::Mangle(Mangle {
        key: Expression::Named(NamedExpression::Payload(Payload::PayloadField(
            PayloadField {
                protocol: Cow::Borrowed(p.version.addr_protocol()),
                field: Cow::Borrowed("daddr"),
            },
        ))),
        value: Expression::String(Cow::Owned(p.addr.addr().to_string())),
    })
}

fn mangle_dport(p: &PortMapRules<'_>) -> Statement<'static> {
    Statement::Mangle(Mangle {
        key: Expression::Named(NamedExpression::Payload(Payload::PayloadField(
            PayloadField {
                protocol: Cow::Borrowed(p.mapping.protocol.as_str()),
                field: Cow::Borrowed("dport"),
            },
        ))),
        value: Expression::Number(p.mapping.container_port as u32),
    })
}

/// Rewrites the destination of traffic arriving on a non-container
/// interface for the mapped host port: destination address bytes, then
/// destination port bytes, then return.
pub(crate) fn dest_nat_rewrite_rule(p: &PortMapRules<'_>) -> Rule<'static> {
    let mut expr = vec![counter(), match_not_iifname(p.bridge)];
    if let Some(host_ip) = &p.mapping.host_ip {
        expr.push(match_daddr(p.version, host_ip));
    }
    expr.push(match_l4proto(p.mapping.protocol));
    expr.push(match_dport(p.mapping.protocol, p.mapping.host_port));
    expr.push(mangle_daddr(p));
    expr.push(mangle_dport(p));
    expr.push(Statement::Return(None));
    rule(p.version, p.table, p.chain, expr)
}

pub async fn add_dest_nat_rewrite_rule(
    session: &mut Session,
    p: &PortMapRules<'_>,
) -> Result<(), NftError> {
    session.stage(NfListObject::Rule(dest_nat_rewrite_rule(p)));
    session.commit().await.map_err(|e| {
        e.with_context(format!(
            "failed adding destination rewrite rule for port {} in chain {} of ipv{} {} table",
            p.mapping.host_port, p.chain, p.version, p.table
        ))
    })
}
