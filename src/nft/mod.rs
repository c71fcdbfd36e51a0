//! Kernel boundary. One [`Session`] per invocation stages every mutation
//! into a single batch and commits it with an explicit flush at step
//! boundaries; reads go straight to the kernel and are filtered
//! client-side by (family, table, name).

pub mod error;
pub mod jump;
mod naming;
pub mod resource;
pub mod rules;

pub use naming::{CHAIN_NAME_MAX, chain_name};

use crate::cni::types::IpVersion;
use crate::nft::error::NftError;
use bon::Builder;
use nftables::{
    batch::Batch,
    helper::{DEFAULT_NFT, apply_ruleset, get_current_ruleset_with_args},
    schema::{Chain, FlushObject, NfCmd, NfListObject, NfObject, Rule, Table},
    types::NfFamily,
};
use std::borrow::Cow;
use tracing::debug;

/// Base-chain priorities, by well-known class.
pub const FILTER_PRIORITY: i32 = 0;
pub const SRCNAT_PRIORITY: i32 = 100;
pub const DSTNAT_PRIORITY: i32 = -100;
pub const RAW_PRIORITY: i32 = -300;

/// Convert NfFamily to string for nft commands.
pub fn family_name(family: &NfFamily) -> &'static str {
    match family {
        NfFamily::IP => "ip",
        NfFamily::IP6 => "ip6",
        NfFamily::INet => "inet",
        NfFamily::ARP => "arp",
        NfFamily::Bridge => "bridge",
        NfFamily::NetDev => "netdev",
    }
}

/// A chain reference carrying no attributes, used for flush/delete commands
/// and as the base of regular (hookless) chains.
pub(crate) fn chain_stub(version: IpVersion, table: &str, name: &str) -> Chain<'static> {
    Chain {
        family: version.family(),
        table: Cow::Owned(table.to_string()),
        name: Cow::Owned(name.to_string()),
        newname: None,
        handle: None,
        _type: None,
        hook: None,
        prio: None,
        dev: None,
        policy: None,
    }
}

/// One kernel-management session. All operations of an invocation share a
/// session; mutations accumulate in its batch until [`Session::commit`]
/// flushes them. A failed commit aborts the step that issued it; earlier
/// commits stay applied, and recovery is the caller invoking Delete.
#[derive(Builder)]
pub struct Session {
    #[builder(default = Batch::new())]
    batch: Batch<'static>,
    #[builder(default = false)]
    dirty: bool,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Stage an object creation (append semantics for rules).
    pub fn stage(&mut self, obj: NfListObject<'static>) {
        self.batch.add(obj);
        self.dirty = true;
    }

    /// Stage a rule insertion at the head of its chain.
    pub fn stage_insert(&mut self, rule: Rule<'static>) {
        self.batch.add_cmd(NfCmd::Insert(NfListObject::Rule(rule)));
        self.dirty = true;
    }

    pub fn stage_delete(&mut self, obj: NfListObject<'static>) {
        self.batch.delete(obj);
        self.dirty = true;
    }

    pub fn stage_flush_chain(&mut self, version: IpVersion, table: &str, chain: &str) {
        self.batch
            .add_cmd(NfCmd::Flush(FlushObject::Chain(chain_stub(
                version, table, chain,
            ))));
        self.dirty = true;
    }

    /// Commit staged mutations. A no-op when nothing is staged.
    pub async fn commit(&mut self) -> Result<(), NftError> {
        if !self.dirty {
            return Ok(());
        }
        let batch = std::mem::replace(&mut self.batch, Batch::new());
        self.dirty = false;

        let doc = batch.to_nftables();
        if let Ok(json) = serde_json::to_string(&doc) {
            debug!("applying nftables batch: {}", json);
        }
        apply_ruleset(&doc).map_err(NftError::from)
    }

    /// All tables in the namespace, every family.
    pub fn list_tables(&self) -> Result<Vec<Table<'static>>, NftError> {
        let ruleset = get_current_ruleset_with_args(DEFAULT_NFT, vec!["list", "tables"])
            .map_err(NftError::from)?;
        Ok(ruleset
            .objects
            .iter()
            .filter_map(|obj| match obj {
                NfObject::ListObject(NfListObject::Table(table)) => Some(table.clone()),
                _ => None,
            })
            .collect())
    }

    /// All chains in the namespace, every family and table.
    pub fn list_chains(&self) -> Result<Vec<Chain<'static>>, NftError> {
        let ruleset = get_current_ruleset_with_args(DEFAULT_NFT, vec!["list", "chains"])
            .map_err(NftError::from)?;
        Ok(ruleset
            .objects
            .iter()
            .filter_map(|obj| match obj {
                NfObject::ListObject(NfListObject::Chain(chain)) => Some(chain.clone()),
                _ => None,
            })
            .collect())
    }

    /// The committed rules of one chain, in evaluation order. Fails when
    /// the chain does not exist; see [`Session::try_chain_rules`] for the
    /// absence-tolerant variant.
    pub fn chain_rules(
        &self,
        version: IpVersion,
        table: &str,
        chain: &str,
    ) -> Result<Vec<Rule<'static>>, NftError> {
        let family = version.family();
        let ruleset = get_current_ruleset_with_args(
            DEFAULT_NFT,
            vec!["list", "chain", family_name(&family), table, chain],
        )
        .map_err(NftError::from)
        .map_err(|e| {
            if e.is_not_found() {
                NftError::chain_not_found(table, chain)
            } else {
                e
            }
        })?;
        Ok(ruleset
            .objects
            .iter()
            .filter_map(|obj| match obj {
                NfObject::ListObject(NfListObject::Rule(rule))
                    if rule.family == family && rule.table == table && rule.chain == chain =>
                {
                    Some(rule.clone())
                }
                _ => None,
            })
            .collect())
    }

    /// Like [`Session::chain_rules`], but reports a missing table or chain
    /// as `None` instead of an error.
    pub fn try_chain_rules(
        &self,
        version: IpVersion,
        table: &str,
        chain: &str,
    ) -> Result<Option<Vec<Rule<'static>>>, NftError> {
        match self.chain_rules(version, table, chain) {
            Ok(rules) => Ok(Some(rules)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }
}
