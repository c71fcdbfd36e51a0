//! Forwarding rules of the filter table: the per-container accept triple
//! and the mapped-port allow rules that ride in the shared forward chain.

use crate::cni::types::{IpVersion, Protocol};
use crate::nft::error::NftError;
use crate::nft::rules::{
    PortMapMatch, PortMapRules, TrafficRules, counter, match_ct_established, match_daddr,
    match_dport, match_iifname, match_l4proto, match_oifname, match_saddr, rule,
    statements_match_prefix,
};
use crate::nft::Session;
use nftables::{
    schema::{NfListObject, Rule},
    stmt::Statement,
};
use std::borrow::Cow;
use std::net::IpAddr;
use tracing::debug;

/// Reply traffic towards the container: egress on the bridge, destination
/// is the container address, flow already established.
pub(crate) fn inbound_rule(p: &TrafficRules<'_>) -> Rule<'static> {
    rule(
        p.version,
        p.table,
        p.chain,
        vec![
            match_oifname(p.bridge),
            match_daddr(p.version, &p.addr.addr()),
            match_ct_established(),
            counter(),
            Statement::Accept(None),
        ],
    )
}

/// Container-sourced traffic leaving through the bridge.
pub(crate) fn outbound_rule(p: &TrafficRules<'_>) -> Rule<'static> {
    rule(
        p.version,
        p.table,
        p.chain,
        vec![
            match_iifname(p.bridge),
            match_saddr(p.version, &p.addr.addr()),
            counter(),
            Statement::Accept(None),
        ],
    )
}

/// Traffic hairpinning between containers on the same bridge.
pub(crate) fn intra_interface_rule(p: &TrafficRules<'_>) -> Rule<'static> {
    rule(
        p.version,
        p.table,
        p.chain,
        vec![
            match_iifname(p.bridge),
            match_oifname(p.bridge),
            counter(),
            Statement::Accept(None),
        ],
    )
}

/// Appends the inbound/outbound/intra-interface accept rules for one
/// address to the per-container chain.
pub async fn add_forward_rules(
    session: &mut Session,
    p: &TrafficRules<'_>,
) -> Result<(), NftError> {
    session.stage(NfListObject::Rule(inbound_rule(p)));
    session.stage(NfListObject::Rule(outbound_rule(p)));
    session.stage(NfListObject::Rule(intra_interface_rule(p)));
    session.commit().await.map_err(|e| {
        e.with_context(format!(
            "failed adding forwarding rules in chain {} of ipv{} {} table for {}",
            p.chain,
            p.version,
            p.table,
            p.addr.addr()
        ))
    })
}

/// Match prefix shared by the mapped-port allow rule and its deletion
/// predicate: egress interface, destination address, and optionally the
/// protocol and container port.
fn mapped_port_match(
    version: IpVersion,
    bridge: &str,
    addr: &IpAddr,
    protocol: Option<Protocol>,
    port: Option<u16>,
) -> Vec<Statement<'static>> {
    let mut expr = vec![match_oifname(bridge), match_daddr(version, addr)];
    if let Some(protocol) = protocol {
        expr.push(match_l4proto(protocol));
        if let Some(port) = port {
            expr.push(match_dport(protocol, port));
        }
    }
    expr
}

/// Allows forwarded traffic to a mapped container port. Inserted at the
/// head of the shared forward chain so the default-deny tail cannot
/// shadow it.
pub async fn add_mapped_port_rule(
    session: &mut Session,
    p: &PortMapRules<'_>,
) -> Result<(), NftError> {
    let mut expr = mapped_port_match(
        p.version,
        p.bridge,
        &p.addr.addr(),
        Some(p.mapping.protocol),
        Some(p.mapping.container_port),
    );
    expr.push(counter());
    expr.push(Statement::Accept(None));
    let allow = rule(p.version, p.table, p.chain, expr);

    let existing = session.chain_rules(p.version, p.table, p.chain).map_err(|e| {
        e.with_context(format!(
            "failed adding mapped port rule to ipv{} chain {} in {} table",
            p.version, p.chain, p.table
        ))
    })?;
    if existing.is_empty() {
        session.stage(NfListObject::Rule(allow));
    } else {
        session.stage_insert(allow);
    }
    session.commit().await.map_err(|e| {
        e.with_context(format!(
            "failed adding mapped port rule to ipv{} chain {} in {} table",
            p.version, p.chain, p.table
        ))
    })
}

/// Removes previously committed mapped-port allow rules by re-deriving
/// their match expressions and comparing against the chain's committed
/// rules. Handles are read from the listing; nothing is persisted between
/// invocations. Absent chain or rules is a no-op.
pub async fn remove_mapped_port_rules(
    session: &mut Session,
    p: &PortMapMatch<'_>,
) -> Result<(), NftError> {
    let Some(rules) = session.try_chain_rules(p.version, p.table, p.chain)? else {
        return Ok(());
    };

    let expected = mapped_port_match(p.version, p.bridge, &p.addr.addr(), p.protocol, p.port);
    let mut staged = false;
    for committed in rules {
        if !statements_match_prefix(&committed, &expected) {
            continue;
        }
        debug!(
            "removing mapped port rule (handle {:?}) from chain {} of ipv{} {} table",
            committed.handle, p.chain, p.version, p.table
        );
        session.stage_delete(NfListObject::Rule(Rule {
            family: p.version.family(),
            table: Cow::Owned(p.table.to_string()),
            chain: Cow::Owned(p.chain.to_string()),
            expr: Cow::Owned(Vec::new()),
            handle: committed.handle,
            index: None,
            comment: None,
        }));
        staged = true;
    }
    if !staged {
        return Ok(());
    }
    session.commit().await.map_err(|e| {
        e.with_context(format!(
            "error deleting rules allowing traffic to mapped ports in chain {} of {} table",
            p.chain, p.table
        ))
    })
}
