//! Node Management Agent operations: health, topology, node lifecycle

use crate::context::ExecContext;
use crate::error::{OpsError, Result};
use crate::ops::{AuthMode, Cardinality, ClusterOp, OpBase, primary_host_with_latest_catalog};
use crate::request::HttpMethod;
use crate::vdb::{NodeState, VNode};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use tracing::{debug, info};

/// NIC details reported by the NMA.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkProfile {
    pub address: String,
    pub subnet: String,
    pub netmask: String,
    #[serde(default)]
    pub broadcast: String,
}

/// One node row from the NMA `/nodes` endpoint, read from the on-disk
/// catalog rather than a running database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NmaNodeInfo {
    pub name: String,
    pub address: String,
    pub catalog_path: String,
    #[serde(default)]
    pub data_path: String,
    #[serde(default)]
    pub depot_path: String,
    #[serde(default)]
    pub subcluster: String,
    #[serde(default)]
    pub sandbox: String,
    #[serde(default)]
    pub is_primary: bool,
}

/// Per-host health check. Any host failing it fails the whole set.
#[derive(Debug)]
pub struct NmaHealthOp {
    base: OpBase,
    hosts: Vec<String>,
}

impl NmaHealthOp {
    pub fn new(hosts: Vec<String>) -> Self {
        Self {
            base: OpBase::new(
                "NMAHealthOp",
                "Check NMA service health",
                AuthMode::Nma,
                Cardinality::PerHost,
            ),
            hosts,
        }
    }
}

#[async_trait]
impl ClusterOp for NmaHealthOp {
    fn base(&self) -> &OpBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut OpBase {
        &mut self.base
    }

    async fn prepare(&mut self, _ctx: &mut ExecContext) -> Result<()> {
        let hosts = self.hosts.clone();
        self.base.setup_request_collection(&hosts);
        let request = self.base.nma_request(HttpMethod::Get, "health");
        self.base.register_on_all(|_| request.clone());
        Ok(())
    }

    async fn execute(&mut self, ctx: &mut ExecContext) -> Result<()> {
        self.base.run_execute(ctx).await?;
        self.base.check_results()?;
        debug!(hosts = self.hosts.len(), "all NMAs healthy");
        Ok(())
    }
}

/// Learn node names and catalog locations from the NMAs of a down
/// database. Each host reports its own catalog view; answers are merged
/// into the vdb under construction.
#[derive(Debug)]
pub struct NmaGetNodesInfoOp {
    base: OpBase,
    hosts: Vec<String>,
    db_name: String,
    catalog_prefix: String,
}

impl NmaGetNodesInfoOp {
    pub fn new(
        hosts: Vec<String>,
        db_name: impl Into<String>,
        catalog_prefix: impl Into<String>,
    ) -> Self {
        Self {
            base: OpBase::new(
                "NMAGetNodesInfoOp",
                "Collect node information from NMAs",
                AuthMode::Nma,
                Cardinality::PerHost,
            ),
            hosts,
            db_name: db_name.into(),
            catalog_prefix: catalog_prefix.into(),
        }
    }
}

#[async_trait]
impl ClusterOp for NmaGetNodesInfoOp {
    fn base(&self) -> &OpBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut OpBase {
        &mut self.base
    }

    async fn prepare(&mut self, _ctx: &mut ExecContext) -> Result<()> {
        let hosts = self.hosts.clone();
        self.base.setup_request_collection(&hosts);
        let mut request = self.base.nma_request(HttpMethod::Get, "nodes");
        request.query.insert("db_name".into(), self.db_name.clone());
        request
            .query
            .insert("catalog_prefix".into(), self.catalog_prefix.clone());
        self.base.register_on_all(|_| request.clone());
        Ok(())
    }

    async fn execute(&mut self, ctx: &mut ExecContext) -> Result<()> {
        self.base.run_execute(ctx).await?;
        self.base.check_results()?;

        let mut rows: Vec<(String, NmaNodeInfo)> = Vec::new();
        for (host, result) in self.base.results.iter() {
            let info: NmaNodeInfo = result.parse()?;
            rows.push((host.clone(), info));
        }
        let vdb = ctx.vdb_mut()?;
        for (contacted, row) in rows {
            // The contacted address wins over the one recorded in the
            // catalog, which may be stale after a re-IP.
            vdb.add_node(VNode {
                name: row.name,
                address: contacted,
                catalog_path: row.catalog_path,
                data_path: row.data_path,
                depot_path: row.depot_path,
                subcluster: row.subcluster,
                sandbox: row.sandbox,
                is_primary: row.is_primary,
                is_compute: false,
                state: NodeState::Down,
                version: String::new(),
            });
        }
        Ok(())
    }
}

/// Collect NIC profiles so later steps can choose the right subnet for
/// control messaging.
#[derive(Debug)]
pub struct NmaNetworkProfileOp {
    base: OpBase,
    hosts: Vec<String>,
}

impl NmaNetworkProfileOp {
    pub fn new(hosts: Vec<String>) -> Self {
        Self {
            base: OpBase::new(
                "NMANetworkProfileOp",
                "Collect network profiles",
                AuthMode::Nma,
                Cardinality::PerHost,
            ),
            hosts,
        }
    }
}

#[async_trait]
impl ClusterOp for NmaNetworkProfileOp {
    fn base(&self) -> &OpBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut OpBase {
        &mut self.base
    }

    async fn prepare(&mut self, _ctx: &mut ExecContext) -> Result<()> {
        let hosts = self.hosts.clone();
        self.base.setup_request_collection(&hosts);
        let request = self.base.nma_request(HttpMethod::Get, "network-profiles");
        self.base.register_on_all(|_| request.clone());
        Ok(())
    }

    async fn execute(&mut self, ctx: &mut ExecContext) -> Result<()> {
        self.base.run_execute(ctx).await?;
        self.base.check_results()?;

        let mut profiles: BTreeMap<String, NetworkProfile> = BTreeMap::new();
        for (host, result) in self.base.results.iter() {
            let profile: NetworkProfile = result.parse()?;
            profiles.insert(host.clone(), profile);
        }
        ctx.set_network_profiles(profiles);
        Ok(())
    }
}

/// Ask each NMA to start its local database process.
#[derive(Debug)]
pub struct NmaStartNodeOp {
    base: OpBase,
    hosts: Vec<String>,
    db_name: String,
}

impl NmaStartNodeOp {
    pub fn new(hosts: Vec<String>, db_name: impl Into<String>) -> Self {
        Self {
            base: OpBase::new(
                "NMAStartNodeOp",
                "Start database processes",
                AuthMode::Nma,
                Cardinality::PerHost,
            ),
            hosts,
            db_name: db_name.into(),
        }
    }
}

#[async_trait]
impl ClusterOp for NmaStartNodeOp {
    fn base(&self) -> &OpBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut OpBase {
        &mut self.base
    }

    async fn prepare(&mut self, ctx: &mut ExecContext) -> Result<()> {
        let hosts = self.hosts.clone();
        self.base.setup_request_collection(&hosts);
        let vdb = ctx.vdb()?;
        for host in hosts {
            let Some(node) = vdb.node(&host) else {
                return Err(OpsError::Precondition(format!(
                    "host {host} is not part of the {} catalog", self.db_name
                )));
            };
            let mut request = self.base.nma_request(HttpMethod::Post, "startup/command");
            request.body = Some(json!({
                "db_name": self.db_name,
                "node_name": node.name,
                "catalog_path": node.catalog_path,
            }));
            self.base.register(&host, request);
        }
        Ok(())
    }

    async fn execute(&mut self, ctx: &mut ExecContext) -> Result<()> {
        self.base.run_execute(ctx).await?;
        self.base.check_results()?;
        info!(hosts = self.hosts.len(), "start commands issued");
        Ok(())
    }
}

/// Rewrite node addresses in the catalog after hosts changed IPs. Runs on
/// a host carrying the latest catalog.
#[derive(Debug)]
pub struct NmaReIpOp {
    base: OpBase,
    /// (node name, new address) pairs.
    re_ip_list: Vec<(String, String)>,
}

impl NmaReIpOp {
    pub fn new(re_ip_list: Vec<(String, String)>) -> Self {
        Self {
            base: OpBase::new(
                "NMAReIPOp",
                "Update node addresses in the catalog",
                AuthMode::Nma,
                Cardinality::ClusterWide,
            ),
            re_ip_list,
        }
    }
}

#[async_trait]
impl ClusterOp for NmaReIpOp {
    fn base(&self) -> &OpBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut OpBase {
        &mut self.base
    }

    async fn prepare(&mut self, ctx: &mut ExecContext) -> Result<()> {
        let initiator = primary_host_with_latest_catalog(ctx)?;
        let hosts = vec![initiator];
        self.base.setup_request_collection(&hosts);
        let entries: Vec<serde_json::Value> = self
            .re_ip_list
            .iter()
            .map(|(name, address)| json!({ "node_name": name, "address": address }))
            .collect();
        let mut request = self.base.nma_request(HttpMethod::Post, "catalog/re-ip");
        request.body = Some(json!({ "re_ip_list": entries }));
        self.base.register_on_all(|_| request.clone());
        Ok(())
    }

    async fn execute(&mut self, ctx: &mut ExecContext) -> Result<()> {
        self.base.run_execute(ctx).await?;
        self.base.check_results()?;
        Ok(())
    }
}
