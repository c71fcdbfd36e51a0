//! Port-mapping orchestrator: destination NAT, raw-table rewrite,
//! masquerading and mapped-port allow rules for published container ports.

use crate::cni::config::PortmapConf;
use crate::cni::types::{AttachmentResult, BoundAddress, IpVersion, MappedPort};
use crate::nft::rules::{PortMapMatch, PortMapRules, PostRoutingRules, forward, nat, rewrite};
use crate::nft::{DSTNAT_PRIORITY, RAW_PRIORITY, SRCNAT_PRIORITY, Session, chain_name, jump, resource};
use crate::plugin::{
    NAT_POSTROUTING_TAG, NAT_PREROUTING_TAG, RAW_PREROUTING_TAG, Targets, validate_attachment,
    validate_port_mappings,
};
use crate::{Error, Result};
use nftables::types::{NfChainType, NfHook};
use tracing::{debug, info};

/// The nftables port-mapping CNI plugin.
///
/// Add appends rules unconditionally once its ensure-steps pass; re-running
/// Add without a Delete duplicates rules, and a failed Add leaves partial
/// state for Delete to clean up.
pub struct PortmapPlugin {
    name: &'static str,
    conf: PortmapConf,
    container_id: String,
}

/// Derived per-container chain names, one per role.
struct ContainerChains {
    postrouting: String,
    prerouting: String,
    raw: String,
}

impl PortmapPlugin {
    pub fn new(conf: &PortmapConf, container_id: impl Into<String>) -> Self {
        Self {
            name: "bridgewall-portmap",
            conf: conf.clone(),
            container_id: container_id.into(),
        }
    }

    /// Adds port-mapping rules for the attachment.
    pub async fn add(&self, result: &AttachmentResult) -> Result<()> {
        self.exec_add(result)
            .await
            .map_err(|e| Error::plugin_op(self.name, "add", e))
    }

    /// Checks whether the expected port-mapping resources exist. Read-only.
    pub async fn check(&self, result: &AttachmentResult) -> Result<()> {
        self.exec_check(result)
            .await
            .map_err(|e| Error::plugin_op(self.name, "check", e))
    }

    /// Deletes port-mapping rules, tolerating state that is already gone.
    pub async fn delete(&self, result: &AttachmentResult) -> Result<()> {
        self.exec_delete(result)
            .await
            .map_err(|e| Error::plugin_op(self.name, "delete", e))
    }

    fn chains(&self) -> ContainerChains {
        ContainerChains {
            postrouting: chain_name(NAT_POSTROUTING_TAG, &self.container_id),
            prerouting: chain_name(NAT_PREROUTING_TAG, &self.container_id),
            raw: chain_name(RAW_PREROUTING_TAG, &self.container_id),
        }
    }

    async fn exec_add(&self, result: &AttachmentResult) -> Result<()> {
        let targets = validate_attachment(result, true)?;
        let mappings = validate_port_mappings(&self.conf.runtime_config.port_mappings)?;

        let mut session = Session::new();
        for &version in &targets.versions {
            self.ensure_base_resources(&mut session, version).await?;
        }

        let bridge = targets.bridge().to_string();
        let chains = self.chains();
        for addrs in targets.interfaces.values() {
            for addr in addrs {
                self.ensure_container_chains(&mut session, addr.version, &chains)
                    .await?;
                self.link_container_chains(&mut session, addr.version, &chains)
                    .await?;
                self.add_mapping_rules(&mut session, &bridge, addr, &chains, &mappings)
                    .await?;

                let postrouting = PostRoutingRules::builder()
                    .version(addr.version)
                    .table(&self.conf.nat_table)
                    .chain(&chains.postrouting)
                    .bridge(&bridge)
                    .addr(addr)
                    .snat(self.conf.snat)
                    .build();
                nat::add_post_routing_rules(&mut session, &postrouting).await?;
            }
        }

        info!(
            container_id = %self.container_id,
            mappings = mappings.len(),
            "port mapping rules applied"
        );
        Ok(())
    }

    /// Ensures the shared tables and base chains of one address family.
    async fn ensure_base_resources(
        &self,
        session: &mut Session,
        version: IpVersion,
    ) -> Result<()> {
        let conf = &self.conf;

        if !resource::table_exists(session, version, &conf.nat_table).await? {
            resource::create_table(session, version, &conf.nat_table).await?;
        }
        let nat_chains = [
            (&conf.postrouting_chain, NfHook::Postrouting, SRCNAT_PRIORITY),
            (&conf.prerouting_chain, NfHook::Prerouting, DSTNAT_PRIORITY),
            (&conf.output_chain, NfHook::Output, DSTNAT_PRIORITY),
            (&conf.input_chain, NfHook::Input, SRCNAT_PRIORITY),
        ];
        for (name, hook, priority) in nat_chains {
            if !resource::chain_exists(session, version, &conf.nat_table, name).await? {
                let spec = resource::ChainSpec::builder()
                    .version(version)
                    .table(&conf.nat_table)
                    .name(name)
                    .kind(NfChainType::NAT)
                    .hook(hook)
                    .priority(priority)
                    .build();
                resource::create_chain(session, &spec).await?;
            }
        }

        if !resource::table_exists(session, version, &conf.raw_table).await? {
            resource::create_table(session, version, &conf.raw_table).await?;
        }
        if !resource::chain_exists(session, version, &conf.raw_table, &conf.raw_prerouting_chain)
            .await?
        {
            let spec = resource::ChainSpec::builder()
                .version(version)
                .table(&conf.raw_table)
                .name(&conf.raw_prerouting_chain)
                .kind(NfChainType::Filter)
                .hook(NfHook::Prerouting)
                .priority(RAW_PRIORITY)
                .build();
            resource::create_chain(session, &spec).await?;
        }

        if !resource::table_exists(session, version, &conf.filter_table).await? {
            resource::create_table(session, version, &conf.filter_table).await?;
        }
        if !resource::chain_exists(session, version, &conf.filter_table, &conf.forward_chain)
            .await?
        {
            resource::create_forward_chain(
                session,
                version,
                &conf.filter_table,
                &conf.forward_chain,
            )
            .await?;
        }
        Ok(())
    }

    async fn ensure_container_chains(
        &self,
        session: &mut Session,
        version: IpVersion,
        chains: &ContainerChains,
    ) -> Result<()> {
        let per_table = [
            (&self.conf.nat_table, &chains.postrouting),
            (&self.conf.nat_table, &chains.prerouting),
            (&self.conf.raw_table, &chains.raw),
        ];
        for (table, chain) in per_table {
            if !resource::chain_exists(session, version, table, chain).await? {
                resource::create_regular_chain(session, version, table, chain).await?;
            }
        }
        Ok(())
    }

    /// Splices the per-container chains into the shared base chains. The
    /// output-hook jump only fires for loopback destinations, so locally
    /// originated traffic to loopback-mapped ports reaches the container's
    /// prerouting chain.
    async fn link_container_chains(
        &self,
        session: &mut Session,
        version: IpVersion,
        chains: &ContainerChains,
    ) -> Result<()> {
        let conf = &self.conf;
        jump::create_jump_rule(
            session,
            version,
            &conf.nat_table,
            &conf.postrouting_chain,
            &chains.postrouting,
        )
        .await?;
        jump::create_jump_rule(
            session,
            version,
            &conf.nat_table,
            &conf.prerouting_chain,
            &chains.prerouting,
        )
        .await?;
        jump::create_loopback_jump_rule(
            session,
            version,
            &conf.nat_table,
            &conf.output_chain,
            &chains.prerouting,
        )
        .await?;
        jump::create_jump_rule(
            session,
            version,
            &conf.raw_table,
            &conf.raw_prerouting_chain,
            &chains.raw,
        )
        .await?;
        Ok(())
    }

    async fn add_mapping_rules(
        &self,
        session: &mut Session,
        bridge: &str,
        addr: &BoundAddress,
        chains: &ContainerChains,
        mappings: &[MappedPort],
    ) -> Result<()> {
        for mapping in mappings {
            // A mapping pinned to a host address of the other family does
            // not apply to this address.
            if let Some(host_ip) = &mapping.host_ip {
                if IpVersion::of(host_ip) != addr.version {
                    debug!(
                        "skipping mapping pinned to host IP {} for ipv{} address {}",
                        host_ip,
                        addr.version,
                        addr.addr()
                    );
                    continue;
                }
            }

            let dnat = PortMapRules::builder()
                .version(addr.version)
                .table(&self.conf.nat_table)
                .chain(&chains.prerouting)
                .bridge(bridge)
                .addr(addr)
                .mapping(mapping)
                .build();
            nat::add_dest_nat_rule(session, &dnat).await?;

            let raw = PortMapRules::builder()
                .version(addr.version)
                .table(&self.conf.raw_table)
                .chain(&chains.raw)
                .bridge(bridge)
                .addr(addr)
                .mapping(mapping)
                .build();
            rewrite::add_dest_nat_rewrite_rule(session, &raw).await?;

            let allow = PortMapRules::builder()
                .version(addr.version)
                .table(&self.conf.filter_table)
                .chain(&self.conf.forward_chain)
                .bridge(bridge)
                .addr(addr)
                .mapping(mapping)
                .build();
            forward::add_mapped_port_rule(session, &allow).await?;
        }
        Ok(())
    }

    async fn exec_check(&self, result: &AttachmentResult) -> Result<()> {
        let targets = validate_attachment(result, true)?;
        validate_port_mappings(&self.conf.runtime_config.port_mappings)?;
        let session = Session::new();
        let conf = &self.conf;
        let chains = self.chains();

        for &version in &targets.versions {
            for (table, name) in [
                (&conf.nat_table, &conf.postrouting_chain),
                (&conf.nat_table, &conf.prerouting_chain),
                (&conf.nat_table, &conf.output_chain),
                (&conf.nat_table, &conf.input_chain),
                (&conf.raw_table, &conf.raw_prerouting_chain),
                (&conf.filter_table, &conf.forward_chain),
            ] {
                if !resource::table_exists(&session, version, table).await? {
                    return Err(Error::resource_missing(format!(
                        "ipv{} table {}",
                        version, table
                    )));
                }
                if !resource::chain_exists(&session, version, table, name).await? {
                    return Err(Error::resource_missing(format!(
                        "ipv{} chain {} in table {}",
                        version, name, table
                    )));
                }
            }

            for (table, chain) in [
                (&conf.nat_table, &chains.postrouting),
                (&conf.nat_table, &chains.prerouting),
                (&conf.raw_table, &chains.raw),
            ] {
                if !resource::chain_exists(&session, version, table, chain).await? {
                    return Err(Error::resource_missing(format!(
                        "ipv{} chain {} in table {}",
                        version, chain, table
                    )));
                }
            }
        }
        Ok(())
    }

    async fn exec_delete(&self, result: &AttachmentResult) -> Result<()> {
        if result.interfaces.is_empty() && result.ips.is_empty() {
            debug!("empty previous result, nothing to delete");
            return Ok(());
        }
        let targets = validate_attachment(result, true)?;
        let mut session = Session::new();
        let conf = &self.conf;
        let chains = self.chains();

        for &version in &targets.versions {
            self.unlink_container_chains(&mut session, version, &chains)
                .await?;
            self.remove_mapped_port_rules(&mut session, version, &targets)
                .await?;

            for (table, chain) in [
                (&conf.nat_table, &chains.postrouting),
                (&conf.nat_table, &chains.prerouting),
                (&conf.raw_table, &chains.raw),
            ] {
                if resource::table_exists(&session, version, table).await?
                    && resource::chain_exists(&session, version, table, chain).await?
                {
                    resource::delete_chain(&mut session, version, table, chain).await?;
                }
            }
        }
        Ok(())
    }

    /// Removes the jump rules referencing the per-container chains.
    /// Removing a still-referenced chain is never attempted; each jump
    /// delete is a no-op when the jump (or its source chain) is gone.
    async fn unlink_container_chains(
        &self,
        session: &mut Session,
        version: IpVersion,
        chains: &ContainerChains,
    ) -> Result<()> {
        let conf = &self.conf;
        if resource::table_exists(session, version, &conf.nat_table).await? {
            for (src, dst) in [
                (&conf.postrouting_chain, &chains.postrouting),
                (&conf.prerouting_chain, &chains.prerouting),
                (&conf.output_chain, &chains.prerouting),
            ] {
                jump::delete_jump_rule(session, version, &conf.nat_table, src, dst).await?;
            }
        }
        if resource::table_exists(session, version, &conf.raw_table).await? {
            jump::delete_jump_rule(
                session,
                version,
                &conf.raw_table,
                &conf.raw_prerouting_chain,
                &chains.raw,
            )
            .await?;
        }
        Ok(())
    }

    /// Removes mapped-port allow rules from the shared forward chain by
    /// re-deriving their match expressions; rule handles are not persisted
    /// across invocations.
    async fn remove_mapped_port_rules(
        &self,
        session: &mut Session,
        version: IpVersion,
        targets: &Targets,
    ) -> Result<()> {
        let conf = &self.conf;
        if !resource::table_exists(session, version, &conf.filter_table).await? {
            return Ok(());
        }
        let bridge = targets.bridge().to_string();
        for addr in targets.addrs_of(version) {
            let matcher = PortMapMatch::builder()
                .version(version)
                .table(&conf.filter_table)
                .chain(&conf.forward_chain)
                .bridge(&bridge)
                .addr(addr)
                .build();
            forward::remove_mapped_port_rules(session, &matcher).await?;
        }
        Ok(())
    }
}
