//! Jump rules splicing a per-container chain into a shared base chain.
//! When the source chain already has rules the jump is inserted at the
//! head, so per-container chains are consulted before the default-deny
//! tail of the base chain; an empty source chain gets the jump appended.

use crate::cni::types::IpVersion;
use crate::nft::error::NftError;
use crate::nft::rules::match_daddr;
use crate::nft::Session;
use nftables::{
    schema::{NfListObject, Rule},
    stmt::{JumpTarget, Statement},
};
use std::borrow::Cow;
use tracing::debug;

/// Whether the rule transfers evaluation to `target`.
pub(crate) fn is_jump_to(rule: &Rule<'_>, target: &str) -> bool {
    rule.expr
        .iter()
        .any(|stmt| matches!(stmt, Statement::Jump(jump) if jump.target == target))
}

/// Returns the committed jump rule from `src` to `dst`, if one exists.
/// The source chain being absent counts as no jump.
pub async fn find_jump_rule(
    session: &Session,
    version: IpVersion,
    table: &str,
    src: &str,
    dst: &str,
) -> Result<Option<Rule<'static>>, NftError> {
    let Some(rules) = session.try_chain_rules(version, table, src)? else {
        return Ok(None);
    };
    Ok(rules.into_iter().find(|r| is_jump_to(r, dst)))
}

async fn create_jump(
    session: &mut Session,
    version: IpVersion,
    table: &str,
    src: &str,
    dst: &str,
    extra_match: Option<Statement<'static>>,
) -> Result<(), NftError> {
    if find_jump_rule(session, version, table, src, dst)
        .await?
        .is_some()
    {
        debug!(
            "jump rule from chain {} to chain {} in ipv{} {} table already exists",
            src, dst, version, table
        );
        return Ok(());
    }

    let existing = session.chain_rules(version, table, src).map_err(|e| {
        e.with_context(format!(
            "failed adding jump rule from chain {} in ipv{} {} table to chain {}",
            src, version, table, dst
        ))
    })?;

    let mut expr: Vec<Statement<'static>> = Vec::new();
    if let Some(stmt) = extra_match {
        expr.push(stmt);
    }
    expr.push(Statement::Jump(JumpTarget {
        target: Cow::Owned(dst.to_string()),
    }));

    let rule = Rule {
        family: version.family(),
        table: Cow::Owned(table.to_string()),
        chain: Cow::Owned(src.to_string()),
        expr: Cow::Owned(expr),
        handle: None,
        index: None,
        comment: None,
    };

    if existing.is_empty() {
        session.stage(NfListObject::Rule(rule));
    } else {
        session.stage_insert(rule);
    }
    session.commit().await.map_err(|e| {
        e.with_context(format!(
            "failed adding jump rule from chain {} in ipv{} {} table to chain {}",
            src, version, table, dst
        ))
    })
}

/// Creates a jump from `src` to `dst`, head-inserted when `src` already has
/// rules. A duplicate jump is detected and skipped.
pub async fn create_jump_rule(
    session: &mut Session,
    version: IpVersion,
    table: &str,
    src: &str,
    dst: &str,
) -> Result<(), NftError> {
    create_jump(session, version, table, src, dst, None).await
}

/// Like [`create_jump_rule`], but the jump only fires for traffic destined
/// to the loopback address. Splices output-hook traffic aimed at
/// loopback-mapped ports into the per-container chain before routing.
pub async fn create_loopback_jump_rule(
    session: &mut Session,
    version: IpVersion,
    table: &str,
    src: &str,
    dst: &str,
) -> Result<(), NftError> {
    let loopback = version.loopback();
    create_jump(
        session,
        version,
        table,
        src,
        dst,
        Some(match_daddr(version, &loopback)),
    )
    .await
}

/// Deletes the jump from `src` to `dst`. A no-op when no such jump (or no
/// such chain) exists, so teardown stays idempotent.
pub async fn delete_jump_rule(
    session: &mut Session,
    version: IpVersion,
    table: &str,
    src: &str,
    dst: &str,
) -> Result<(), NftError> {
    let Some(found) = find_jump_rule(session, version, table, src, dst).await? else {
        return Ok(());
    };

    session.stage_delete(NfListObject::Rule(Rule {
        family: version.family(),
        table: Cow::Owned(table.to_string()),
        chain: Cow::Owned(src.to_string()),
        expr: Cow::Owned(Vec::new()),
        handle: found.handle,
        index: None,
        comment: None,
    }));
    session.commit().await.map_err(|e| {
        e.with_context(format!(
            "error deleting jump rule to chain {} found in chain {} of ipv{} {} table",
            dst, src, version, table
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nft::rules::{counter, match_daddr};
    use std::net::{IpAddr, Ipv4Addr};

    fn rule_with(expr: Vec<Statement<'static>>) -> Rule<'static> {
        Rule {
            family: IpVersion::V4.family(),
            table: Cow::Borrowed("filter"),
            chain: Cow::Borrowed("forward"),
            expr: Cow::Owned(expr),
            handle: Some(7),
            index: None,
            comment: None,
        }
    }

    #[test]
    fn test_detects_bare_jump() {
        let rule = rule_with(vec![Statement::Jump(JumpTarget {
            target: Cow::Borrowed("ffwdummy"),
        })]);
        assert!(is_jump_to(&rule, "ffwdummy"));
        assert!(!is_jump_to(&rule, "ffwother"));
    }

    #[test]
    fn test_detects_conditioned_jump() {
        // The loopback splice carries a match ahead of the jump.
        let loopback = IpAddr::V4(Ipv4Addr::LOCALHOST);
        let rule = rule_with(vec![
            match_daddr(IpVersion::V4, &loopback),
            Statement::Jump(JumpTarget {
                target: Cow::Borrowed("nprdummy"),
            }),
        ]);
        assert!(is_jump_to(&rule, "nprdummy"));
    }

    #[test]
    fn test_ignores_non_jump_rules() {
        let rule = rule_with(vec![counter(), Statement::Accept(None)]);
        assert!(!is_jump_to(&rule, "ffwdummy"));
    }
}
