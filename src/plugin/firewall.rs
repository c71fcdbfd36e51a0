//! Filtering orchestrator: builds the per-container forwarding boundary
//! in the filter table.

use crate::cni::config::FirewallConf;
use crate::cni::types::AttachmentResult;
use crate::nft::rules::{TrafficRules, forward};
use crate::nft::{Session, chain_name, jump, resource};
use crate::plugin::{FORWARD_FILTER_TAG, validate_attachment};
use crate::{Error, Result};
use tracing::{debug, info};

/// The nftables firewall/filter CNI plugin.
///
/// Add appends rules unconditionally once its ensure-steps pass, so
/// running Add twice without a Delete in between duplicates rules; a
/// failed Add leaves partial state behind, and the caller recovers by
/// invoking Delete.
pub struct FirewallPlugin {
    name: &'static str,
    filter_table: String,
    forward_chain: String,
    container_id: String,
}

impl FirewallPlugin {
    pub fn new(conf: &FirewallConf, container_id: impl Into<String>) -> Self {
        Self {
            name: "bridgewall-firewall",
            filter_table: conf.filter_table.clone(),
            forward_chain: conf.forward_chain.clone(),
            container_id: container_id.into(),
        }
    }

    /// Adds firewall rules for the attachment.
    pub async fn add(&self, result: &AttachmentResult) -> Result<()> {
        self.exec_add(result)
            .await
            .map_err(|e| Error::plugin_op(self.name, "add", e))
    }

    /// Checks whether the expected firewall resources exist. Read-only.
    pub async fn check(&self, result: &AttachmentResult) -> Result<()> {
        self.exec_check(result)
            .await
            .map_err(|e| Error::plugin_op(self.name, "check", e))
    }

    /// Deletes firewall rules, tolerating state that is already gone.
    pub async fn delete(&self, result: &AttachmentResult) -> Result<()> {
        self.exec_delete(result)
            .await
            .map_err(|e| Error::plugin_op(self.name, "delete", e))
    }

    async fn exec_add(&self, result: &AttachmentResult) -> Result<()> {
        let targets = validate_attachment(result, false)?;
        let mut session = Session::new();

        for &version in &targets.versions {
            if !resource::table_exists(&session, version, &self.filter_table).await? {
                resource::create_table(&mut session, version, &self.filter_table).await?;
            }
            if !resource::chain_exists(&session, version, &self.filter_table, &self.forward_chain)
                .await?
            {
                resource::create_forward_chain(
                    &mut session,
                    version,
                    &self.filter_table,
                    &self.forward_chain,
                )
                .await?;
            }
        }

        let bridge = targets.bridge().to_string();
        let chain = chain_name(FORWARD_FILTER_TAG, &self.container_id);
        for addrs in targets.interfaces.values() {
            for addr in addrs {
                if !resource::chain_exists(&session, addr.version, &self.filter_table, &chain)
                    .await?
                {
                    resource::create_regular_chain(
                        &mut session,
                        addr.version,
                        &self.filter_table,
                        &chain,
                    )
                    .await?;
                }
                jump::create_jump_rule(
                    &mut session,
                    addr.version,
                    &self.filter_table,
                    &self.forward_chain,
                    &chain,
                )
                .await?;

                let rules = TrafficRules::builder()
                    .version(addr.version)
                    .table(&self.filter_table)
                    .chain(&chain)
                    .bridge(&bridge)
                    .addr(addr)
                    .build();
                forward::add_forward_rules(&mut session, &rules).await?;
            }
        }

        info!(
            container_id = %self.container_id,
            chain = %chain,
            "firewall rules applied"
        );
        Ok(())
    }

    async fn exec_check(&self, result: &AttachmentResult) -> Result<()> {
        let targets = validate_attachment(result, false)?;
        let session = Session::new();

        for &version in &targets.versions {
            if !resource::table_exists(&session, version, &self.filter_table).await? {
                return Err(Error::resource_missing(format!(
                    "ipv{} filter table {}",
                    version, self.filter_table
                )));
            }
            if !resource::chain_exists(&session, version, &self.filter_table, &self.forward_chain)
                .await?
            {
                return Err(Error::resource_missing(format!(
                    "ipv{} chain {} in filter table {}",
                    version, self.forward_chain, self.filter_table
                )));
            }
        }

        let chain = chain_name(FORWARD_FILTER_TAG, &self.container_id);
        for &version in &targets.versions {
            if targets.addrs_of(version).next().is_none() {
                continue;
            }
            if !resource::chain_exists(&session, version, &self.filter_table, &chain).await? {
                return Err(Error::resource_missing(format!(
                    "ipv{} chain {} in filter table {}",
                    version, chain, self.filter_table
                )));
            }
            if jump::find_jump_rule(
                &session,
                version,
                &self.filter_table,
                &self.forward_chain,
                &chain,
            )
            .await?
            .is_none()
            {
                return Err(Error::resource_missing(format!(
                    "ipv{} jump rule from chain {} to chain {}",
                    version, self.forward_chain, chain
                )));
            }
        }
        Ok(())
    }

    async fn exec_delete(&self, result: &AttachmentResult) -> Result<()> {
        if result.interfaces.is_empty() && result.ips.is_empty() {
            debug!("empty previous result, nothing to delete");
            return Ok(());
        }
        let targets = validate_attachment(result, false)?;
        let mut session = Session::new();
        let chain = chain_name(FORWARD_FILTER_TAG, &self.container_id);

        for &version in &targets.versions {
            if !resource::table_exists(&session, version, &self.filter_table).await? {
                continue;
            }
            // The jump referencing the per-container chain goes first; the
            // chain itself is only removed once nothing points at it.
            if resource::chain_exists(&session, version, &self.filter_table, &self.forward_chain)
                .await?
            {
                jump::delete_jump_rule(
                    &mut session,
                    version,
                    &self.filter_table,
                    &self.forward_chain,
                    &chain,
                )
                .await?;
            }
            if resource::chain_exists(&session, version, &self.filter_table, &chain).await? {
                resource::delete_chain(&mut session, version, &self.filter_table, &chain).await?;
            }
        }
        Ok(())
    }
}
