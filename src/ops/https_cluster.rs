//! Cluster-level operations against the HTTPS catalog service

use crate::context::ExecContext;
use crate::error::{OpsError, Result};
use crate::ops::{AuthMode, Cardinality, ClusterOp, OpBase};
use crate::request::HttpMethod;
use crate::vdb::{CoordinationDatabase, NodeState, VNode};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

/// One node row from the catalog service's `/nodes` endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDetails {
    pub name: String,
    pub address: String,
    pub state: NodeState,
    pub is_primary: bool,
    #[serde(default)]
    pub is_compute: bool,
    #[serde(default)]
    pub subcluster: String,
    #[serde(default)]
    pub sandbox: String,
    #[serde(default)]
    pub catalog_path: String,
    #[serde(default)]
    pub data_path: String,
    #[serde(default)]
    pub depot_path: String,
    #[serde(default)]
    pub version: String,
}

/// Response shape of `/nodes`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodesInfoResponse {
    pub node_list: Vec<NodeDetails>,
}

/// Per-package outcome of a package installation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageStatus {
    pub package_name: String,
    pub install_status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallPackagesResponse {
    pub packages: Vec<PackageStatus>,
}

/// Query `/nodes` on the given hosts; the first success wins. Publishes
/// the UP host list (optionally scoped to a sandbox) and the node rows.
#[derive(Debug)]
pub struct HttpsGetUpNodesOp {
    base: OpBase,
    hosts: Vec<String>,
    sandbox: Option<String>,
}

impl HttpsGetUpNodesOp {
    pub fn new(hosts: Vec<String>) -> Self {
        Self {
            base: OpBase::new(
                "HTTPSGetUpNodesOp",
                "Collect information about up nodes",
                AuthMode::Https,
                Cardinality::QuorumOne,
            ),
            hosts,
            sandbox: None,
        }
    }

    pub fn in_sandbox(mut self, sandbox: impl Into<String>) -> Self {
        self.sandbox = Some(sandbox.into());
        self
    }
}

#[async_trait]
impl ClusterOp for HttpsGetUpNodesOp {
    fn base(&self) -> &OpBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut OpBase {
        &mut self.base
    }

    async fn prepare(&mut self, ctx: &mut ExecContext) -> Result<()> {
        if self.sandbox.is_none() {
            self.sandbox = ctx.sandbox().map(str::to_string);
        }
        let hosts = self.hosts.clone();
        self.base.setup_request_collection(&hosts);
        let request = self.base.https_request(HttpMethod::Get, "nodes");
        self.base.register_on_all(|_| request.clone());
        Ok(())
    }

    async fn execute(&mut self, ctx: &mut ExecContext) -> Result<()> {
        self.base.run_execute(ctx).await?;
        let winner = self.base.winning_result()?;
        let parsed: NodesInfoResponse = winner.parse()?;

        let up_hosts: Vec<String> = parsed
            .node_list
            .iter()
            .filter(|n| n.state == NodeState::Up)
            .filter(|n| {
                self.sandbox
                    .as_deref()
                    .is_none_or(|sandbox| n.sandbox == sandbox)
            })
            .map(|n| n.address.clone())
            .collect();

        if up_hosts.is_empty() {
            return Err(OpsError::Precondition(
                "no up node was found in the target cluster scope".into(),
            ));
        }
        info!(count = up_hosts.len(), "found up hosts");
        ctx.set_up_hosts(up_hosts);
        if let Some(sandbox) = &self.sandbox {
            let scoped: Vec<NodeDetails> = parsed
                .node_list
                .iter()
                .filter(|n| &n.sandbox == sandbox)
                .cloned()
                .collect();
            ctx.set_sc_nodes_info(scoped);
        }
        ctx.set_nodes_details(parsed.node_list);
        Ok(())
    }
}

/// Query `/nodes` and assemble a coordination database snapshot from the
/// live answer. Used by the running-database fetch pipeline.
#[derive(Debug)]
pub struct HttpsGetNodesInfoOp {
    base: OpBase,
    db_name: String,
    hosts: Vec<String>,
}

impl HttpsGetNodesInfoOp {
    pub fn new(db_name: impl Into<String>, hosts: Vec<String>) -> Self {
        Self {
            base: OpBase::new(
                "HTTPSGetNodesInfoOp",
                "Collect cluster topology from a running database",
                AuthMode::Https,
                Cardinality::QuorumOne,
            ),
            db_name: db_name.into(),
            hosts,
        }
    }
}

#[async_trait]
impl ClusterOp for HttpsGetNodesInfoOp {
    fn base(&self) -> &OpBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut OpBase {
        &mut self.base
    }

    async fn prepare(&mut self, _ctx: &mut ExecContext) -> Result<()> {
        let hosts = self.hosts.clone();
        self.base.setup_request_collection(&hosts);
        let request = self.base.https_request(HttpMethod::Get, "nodes");
        self.base.register_on_all(|_| request.clone());
        Ok(())
    }

    async fn execute(&mut self, ctx: &mut ExecContext) -> Result<()> {
        self.base.run_execute(ctx).await?;
        let winner = self.base.winning_result()?;
        let parsed: NodesInfoResponse = winner.parse()?;

        let mut vdb = CoordinationDatabase::new(self.db_name.clone(), true);
        for row in &parsed.node_list {
            vdb.add_node(VNode {
                name: row.name.clone(),
                address: row.address.clone(),
                catalog_path: row.catalog_path.clone(),
                data_path: row.data_path.clone(),
                depot_path: row.depot_path.clone(),
                subcluster: row.subcluster.clone(),
                sandbox: row.sandbox.clone(),
                is_primary: row.is_primary,
                is_compute: row.is_compute,
                state: row.state,
                version: row.version.clone(),
            });
        }
        vdb.validate()?;
        debug!(nodes = vdb.host_list.len(), "assembled vdb from running database");
        ctx.set_vdb(vdb);
        ctx.set_nodes_details(parsed.node_list);
        Ok(())
    }
}

/// Force a catalog sync to communal storage through one initiator.
#[derive(Debug)]
pub struct HttpsSyncCatalogOp {
    base: OpBase,
    initiator: Vec<String>,
}

impl HttpsSyncCatalogOp {
    pub fn new(initiator: Vec<String>) -> Self {
        Self {
            base: OpBase::new(
                "HTTPSSyncCatalogOp",
                "Synchronize catalog to communal storage",
                AuthMode::Https,
                Cardinality::ClusterWide,
            ),
            initiator,
        }
    }
}

#[async_trait]
impl ClusterOp for HttpsSyncCatalogOp {
    fn base(&self) -> &OpBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut OpBase {
        &mut self.base
    }

    async fn prepare(&mut self, _ctx: &mut ExecContext) -> Result<()> {
        let hosts = self.initiator.clone();
        self.base.setup_request_collection(&hosts);
        let mut request = self
            .base
            .https_request(HttpMethod::Post, "cluster/catalog/sync");
        request.body = Some(json!({}));
        self.base.register_on_all(|_| request.clone());
        Ok(())
    }

    async fn execute(&mut self, ctx: &mut ExecContext) -> Result<()> {
        self.base.run_execute(ctx).await?;
        self.base.check_results()?;
        Ok(())
    }
}

/// Shut the database (or one sandbox) down through one initiator.
#[derive(Debug)]
pub struct HttpsStopDbOp {
    base: OpBase,
    initiator: Vec<String>,
    sandbox: Option<String>,
    drain_seconds: Option<u32>,
}

impl HttpsStopDbOp {
    pub fn new(initiator: Vec<String>, sandbox: Option<String>, drain_seconds: Option<u32>) -> Self {
        Self {
            base: OpBase::new(
                "HTTPSStopDBOp",
                "Stop database",
                AuthMode::Https,
                Cardinality::ClusterWide,
            ),
            initiator,
            sandbox,
            drain_seconds,
        }
    }

    pub fn with_cmd(mut self, cmd: crate::cmd::CmdType) -> Self {
        self.base.cmd = Some(cmd);
        self
    }
}

#[async_trait]
impl ClusterOp for HttpsStopDbOp {
    fn base(&self) -> &OpBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut OpBase {
        &mut self.base
    }

    async fn prepare(&mut self, _ctx: &mut ExecContext) -> Result<()> {
        let hosts = self.initiator.clone();
        self.base.setup_request_collection(&hosts);
        let mut request = self.base.https_request(HttpMethod::Post, "cluster/shutdown");
        if self.base.cmd.is_some_and(|cmd| cmd.is_sync_cat()) {
            request.query.insert("sync-catalog".into(), "true".into());
        }
        let mut body = json!({});
        if let Some(seconds) = self.drain_seconds {
            body["drain_seconds"] = json!(seconds);
        }
        if let Some(sandbox) = &self.sandbox {
            body["sandbox"] = json!(sandbox);
        }
        request.body = Some(body);
        self.base.register_on_all(|_| request.clone());
        Ok(())
    }

    async fn execute(&mut self, ctx: &mut ExecContext) -> Result<()> {
        self.base.run_execute(ctx).await?;
        self.base.check_results()?;
        Ok(())
    }
}

/// Add new nodes to a subcluster through one initiator.
#[derive(Debug)]
pub struct HttpsAddNodeOp {
    base: OpBase,
    initiator: Vec<String>,
    new_hosts: Vec<String>,
    subcluster: String,
}

impl HttpsAddNodeOp {
    pub fn new(initiator: Vec<String>, new_hosts: Vec<String>, subcluster: impl Into<String>) -> Self {
        Self {
            base: OpBase::new(
                "HTTPSAddNodeOp",
                "Add nodes to the cluster",
                AuthMode::Https,
                Cardinality::ClusterWide,
            ),
            initiator,
            new_hosts,
            subcluster: subcluster.into(),
        }
    }
}

#[async_trait]
impl ClusterOp for HttpsAddNodeOp {
    fn base(&self) -> &OpBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut OpBase {
        &mut self.base
    }

    async fn prepare(&mut self, _ctx: &mut ExecContext) -> Result<()> {
        let hosts = self.initiator.clone();
        self.base.setup_request_collection(&hosts);
        let mut request = self.base.https_request(HttpMethod::Post, "nodes");
        request.body = Some(json!({
            "hosts": self.new_hosts,
            "subcluster": self.subcluster,
        }));
        self.base.register_on_all(|_| request.clone());
        Ok(())
    }

    async fn execute(&mut self, ctx: &mut ExecContext) -> Result<()> {
        self.base.run_execute(ctx).await?;
        self.base.check_results()?;
        info!(count = self.new_hosts.len(), subcluster = %self.subcluster, "nodes added");
        Ok(())
    }
}

/// Drop nodes from the catalog through one initiator.
#[derive(Debug)]
pub struct HttpsDropNodeOp {
    base: OpBase,
    initiator: Vec<String>,
    node_names: Vec<String>,
    force: bool,
}

impl HttpsDropNodeOp {
    pub fn new(initiator: Vec<String>, node_names: Vec<String>, force: bool) -> Self {
        Self {
            base: OpBase::new(
                "HTTPSDropNodeOp",
                "Drop nodes from the cluster",
                AuthMode::Https,
                Cardinality::ClusterWide,
            ),
            initiator,
            node_names,
            force,
        }
    }
}

#[async_trait]
impl ClusterOp for HttpsDropNodeOp {
    fn base(&self) -> &OpBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut OpBase {
        &mut self.base
    }

    async fn prepare(&mut self, _ctx: &mut ExecContext) -> Result<()> {
        let hosts = self.initiator.clone();
        self.base.setup_request_collection(&hosts);
        let mut request = self.base.https_request(HttpMethod::Post, "nodes/drop");
        request.body = Some(json!({
            "node_names": self.node_names,
            "force": self.force,
        }));
        self.base.register_on_all(|_| request.clone());
        Ok(())
    }

    async fn execute(&mut self, ctx: &mut ExecContext) -> Result<()> {
        self.base.run_execute(ctx).await?;
        self.base.check_results()?;
        Ok(())
    }
}

/// Gracefully shut down a single node.
#[derive(Debug)]
pub struct HttpsStopNodeOp {
    base: OpBase,
    initiator: Vec<String>,
    node_name: String,
}

impl HttpsStopNodeOp {
    pub fn new(initiator: Vec<String>, node_name: impl Into<String>) -> Self {
        Self {
            base: OpBase::new(
                "HTTPSStopNodeOp",
                "Stop node",
                AuthMode::Https,
                Cardinality::ClusterWide,
            ),
            initiator,
            node_name: node_name.into(),
        }
    }
}

#[async_trait]
impl ClusterOp for HttpsStopNodeOp {
    fn base(&self) -> &OpBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut OpBase {
        &mut self.base
    }

    async fn prepare(&mut self, _ctx: &mut ExecContext) -> Result<()> {
        let hosts = self.initiator.clone();
        self.base.setup_request_collection(&hosts);
        let mut request = self.base.https_request(
            HttpMethod::Post,
            format!("nodes/{}/shutdown", self.node_name),
        );
        request.body = Some(json!({}));
        self.base.register_on_all(|_| request.clone());
        Ok(())
    }

    async fn execute(&mut self, ctx: &mut ExecContext) -> Result<()> {
        self.base.run_execute(ctx).await?;
        self.base.check_results()?;
        Ok(())
    }
}

/// Install or re-install packages on a running database.
#[derive(Debug)]
pub struct HttpsInstallPackagesOp {
    base: OpBase,
    initiator: Vec<String>,
    force_reinstall: bool,
}

impl HttpsInstallPackagesOp {
    pub fn new(initiator: Vec<String>, force_reinstall: bool) -> Self {
        Self {
            base: OpBase::new(
                "HTTPSInstallPackagesOp",
                "Install packages",
                AuthMode::Https,
                Cardinality::ClusterWide,
            ),
            initiator,
            force_reinstall,
        }
    }
}

#[async_trait]
impl ClusterOp for HttpsInstallPackagesOp {
    fn base(&self) -> &OpBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut OpBase {
        &mut self.base
    }

    async fn prepare(&mut self, _ctx: &mut ExecContext) -> Result<()> {
        let hosts = self.initiator.clone();
        self.base.setup_request_collection(&hosts);
        let mut request = self.base.https_request(HttpMethod::Post, "packages");
        request
            .query
            .insert("force-install".into(), self.force_reinstall.to_string());
        request.body = Some(json!({}));
        self.base.register_on_all(|_| request.clone());
        Ok(())
    }

    async fn execute(&mut self, ctx: &mut ExecContext) -> Result<()> {
        self.base.run_execute(ctx).await?;
        let winner = self.base.winning_result()?;
        let parsed: InstallPackagesResponse = winner.parse()?;
        ctx.set_package_statuses(parsed.packages);
        Ok(())
    }
}

/// Install or upgrade the database license.
#[derive(Debug)]
pub struct HttpsInstallLicenseOp {
    base: OpBase,
    initiator: Vec<String>,
    license_file: String,
    dry_run: bool,
}

impl HttpsInstallLicenseOp {
    pub fn new(initiator: Vec<String>, license_file: impl Into<String>) -> Self {
        Self {
            base: OpBase::new(
                "HTTPSInstallLicenseOp",
                "Install license",
                AuthMode::Https,
                Cardinality::ClusterWide,
            ),
            initiator,
            license_file: license_file.into(),
            dry_run: false,
        }
    }

    /// Validate the license without installing it.
    pub fn dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }
}

#[async_trait]
impl ClusterOp for HttpsInstallLicenseOp {
    fn base(&self) -> &OpBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut OpBase {
        &mut self.base
    }

    async fn prepare(&mut self, _ctx: &mut ExecContext) -> Result<()> {
        let hosts = self.initiator.clone();
        self.base.setup_request_collection(&hosts);
        let mut request = self.base.https_request(HttpMethod::Post, "license/install");
        if self.dry_run {
            request.query.insert("dry-run".into(), "true".into());
        }
        request.body = Some(json!({ "licenseFile": self.license_file }));
        self.base.register_on_all(|_| request.clone());
        Ok(())
    }

    async fn execute(&mut self, ctx: &mut ExecContext) -> Result<()> {
        self.base.run_execute(ctx).await?;
        self.base.check_results()?;
        Ok(())
    }
}

/// Set a configuration parameter through the catalog service.
#[derive(Debug)]
pub struct HttpsSetConfigParamOp {
    base: OpBase,
    initiator: Vec<String>,
    parameter: String,
    value: String,
    level: Option<String>,
    sandbox: Option<String>,
}

impl HttpsSetConfigParamOp {
    pub fn new(
        initiator: Vec<String>,
        parameter: impl Into<String>,
        value: impl Into<String>,
        level: Option<String>,
        sandbox: Option<String>,
    ) -> Self {
        Self {
            base: OpBase::new(
                "HTTPSSetConfigParamOp",
                "Set configuration parameter",
                AuthMode::Https,
                Cardinality::ClusterWide,
            ),
            initiator,
            parameter: parameter.into(),
            value: value.into(),
            level,
            sandbox,
        }
    }
}

#[async_trait]
impl ClusterOp for HttpsSetConfigParamOp {
    fn base(&self) -> &OpBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut OpBase {
        &mut self.base
    }

    async fn prepare(&mut self, ctx: &mut ExecContext) -> Result<()> {
        if self.sandbox.is_none() {
            self.sandbox = ctx.sandbox().map(str::to_string);
        }
        let hosts = self.initiator.clone();
        self.base.setup_request_collection(&hosts);
        let mut request = self.base.https_request(HttpMethod::Post, "config/parameter");
        let mut body = json!({
            "parameter": self.parameter,
            "value": self.value,
        });
        if let Some(level) = &self.level {
            body["level"] = json!(level);
        }
        if let Some(sandbox) = &self.sandbox {
            body["sandbox"] = json!(sandbox);
        }
        request.body = Some(body);
        self.base.register_on_all(|_| request.clone());
        Ok(())
    }

    async fn execute(&mut self, ctx: &mut ExecContext) -> Result<()> {
        self.base.run_execute(ctx).await?;
        self.base.check_results()?;
        Ok(())
    }
}
