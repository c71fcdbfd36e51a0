//! Idempotent existence checks and creation for tables and chains.
//! Creation is only attempted after a negative existence probe; a positive
//! probe is never re-verified. Invocations are single-threaded against one
//! namespace, so there is no read-modify-write race to handle here.

use crate::cni::types::IpVersion;
use crate::nft::error::NftError;
use crate::nft::{FILTER_PRIORITY, Session, chain_stub};
use bon::Builder;
use nftables::{
    schema::{Chain, NfListObject, Rule, Table},
    stmt::{Counter, Log, LogLevel, Statement},
    types::{NfChainPolicy, NfChainType, NfHook},
};
use std::borrow::Cow;
use tracing::debug;

pub async fn table_exists(
    session: &Session,
    version: IpVersion,
    name: &str,
) -> Result<bool, NftError> {
    let family = version.family();
    let tables = session
        .list_tables()
        .map_err(|e| e.with_context(format!("failed listing ipv{} tables", version)))?;
    Ok(tables
        .iter()
        .any(|t| t.family == family && t.name == name))
}

pub async fn create_table(
    session: &mut Session,
    version: IpVersion,
    name: &str,
) -> Result<(), NftError> {
    debug!("creating ipv{} table {}", version, name);
    session.stage(NfListObject::Table(Table {
        family: version.family(),
        name: Cow::Owned(name.to_string()),
        handle: None,
    }));
    session
        .commit()
        .await
        .map_err(|e| e.with_context(format!("failed creating ipv{} table {}", version, name)))
}

pub async fn chain_exists(
    session: &Session,
    version: IpVersion,
    table: &str,
    name: &str,
) -> Result<bool, NftError> {
    let family = version.family();
    let chains = session.list_chains().map_err(|e| {
        e.with_context(format!(
            "failed listing chains of ipv{} table {}",
            version, table
        ))
    })?;
    Ok(chains
        .iter()
        .any(|c| c.family == family && c.table == table && c.name == name))
}

/// Attributes of a chain to create. A spec with hook and priority makes a
/// base chain the kernel invokes directly; without them the chain is
/// regular and only reachable via jump.
#[derive(Builder)]
pub struct ChainSpec<'a> {
    pub version: IpVersion,
    pub table: &'a str,
    pub name: &'a str,
    pub kind: Option<NfChainType>,
    pub hook: Option<NfHook>,
    pub priority: Option<i32>,
    pub policy: Option<NfChainPolicy>,
}

pub async fn create_chain(session: &mut Session, spec: &ChainSpec<'_>) -> Result<(), NftError> {
    debug!(
        "creating ipv{} chain {} in table {}",
        spec.version, spec.name, spec.table
    );
    session.stage(NfListObject::Chain(Chain {
        family: spec.version.family(),
        table: Cow::Owned(spec.table.to_string()),
        name: Cow::Owned(spec.name.to_string()),
        newname: None,
        handle: None,
        _type: spec.kind.clone(),
        hook: spec.hook.clone(),
        prio: spec.priority,
        dev: None,
        policy: spec.policy.clone(),
    }));
    session.commit().await.map_err(|e| {
        e.with_context(format!(
            "failed creating ipv{} chain {} in table {}",
            spec.version, spec.name, spec.table
        ))
    })
}

/// Creates a hookless chain reachable only through a jump rule.
pub async fn create_regular_chain(
    session: &mut Session,
    version: IpVersion,
    table: &str,
    name: &str,
) -> Result<(), NftError> {
    let spec = ChainSpec::builder()
        .version(version)
        .table(table)
        .name(name)
        .build();
    create_chain(session, &spec).await
}

/// Creates the forward base chain of the filter table with a drop policy
/// and seeds it with a logging rule followed by a counted drop, so that
/// anything not accepted by a per-container chain is logged and dropped.
pub async fn create_forward_chain(
    session: &mut Session,
    version: IpVersion,
    table: &str,
    name: &str,
) -> Result<(), NftError> {
    let spec = ChainSpec::builder()
        .version(version)
        .table(table)
        .name(name)
        .kind(NfChainType::Filter)
        .hook(NfHook::Forward)
        .priority(FILTER_PRIORITY)
        .policy(NfChainPolicy::Drop)
        .build();
    create_chain(session, &spec).await?;
    add_log_deny_rules(session, version, table, name).await
}

async fn add_log_deny_rules(
    session: &mut Session,
    version: IpVersion,
    table: &str,
    chain: &str,
) -> Result<(), NftError> {
    let rule = |expr: Vec<Statement<'static>>| -> Rule<'static> {
        Rule {
            family: version.family(),
            table: Cow::Owned(table.to_string()),
            chain: Cow::Owned(chain.to_string()),
            expr: Cow::Owned(expr),
            handle: None,
            index: None,
            comment: None,
        }
    };

    session.stage(NfListObject::Rule(rule(vec![Statement::Log(Some(Log {
        prefix: Some(Cow::Owned(format!("ip{} forward drop: ", version))),
        level: Some(LogLevel::Info),
        flags: None,
        group: None,
        queue_threshold: None,
        snaplen: None,
    }))])));
    session
        .commit()
        .await
        .map_err(|e| {
            e.with_context(format!(
                "failed adding default logging rule in chain {} of ipv{} {} table",
                chain, version, table
            ))
        })?;

    session.stage(NfListObject::Rule(rule(vec![
        Statement::Counter(Counter::Anonymous(None)),
        Statement::Drop(None),
    ])));
    session.commit().await.map_err(|e| {
        e.with_context(format!(
            "failed adding default deny rule in chain {} of ipv{} {} table",
            chain, version, table
        ))
    })
}

/// Flushes the chain's rule set and removes the chain. Jump rules
/// referencing the chain must already be gone.
pub async fn delete_chain(
    session: &mut Session,
    version: IpVersion,
    table: &str,
    name: &str,
) -> Result<(), NftError> {
    debug!(
        "deleting ipv{} chain {} in table {}",
        version, name, table
    );
    session.stage_flush_chain(version, table, name);
    session.stage_delete(NfListObject::Chain(chain_stub(version, table, name)));
    session.commit().await.map_err(|e| {
        e.with_context(format!(
            "error deleting {} chain in ipv{} {} table",
            name, version, table
        ))
    })
}
