//! File operations through the NMA
//!
//! The library never talks to communal storage directly; descriptions and
//! restore-point metadata are fetched through the NMA's file-download
//! endpoint, and local directories are removed through its delete
//! endpoint.

use crate::context::ExecContext;
use crate::error::Result;
use crate::ops::{AuthMode, Cardinality, ClusterOp, OpBase};
use crate::request::HttpMethod;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::warn;

/// Communal path of the cluster description for a database or sandbox.
pub fn cluster_config_path(db_or_sandbox: &str) -> String {
    format!("metadata/{db_or_sandbox}/cluster_config.json")
}

/// Communal path of a restore point's cluster description.
pub fn restore_point_config_path(db_name: &str, archive: &str, restore_point_id: &str) -> String {
    format!("metadata/{db_name}/archives/{archive}/{restore_point_id}/cluster_config.json")
}

/// One node entry in the communal cluster description.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfigNode {
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
    pub is_primary: bool,
}

/// The communal `cluster_config.json` description.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    pub database_name: String,
    #[serde(default)]
    pub communal_storage_location: String,
    pub nodes: Vec<ClusterConfigNode>,
}

/// Download one file from communal storage through any reachable NMA and
/// publish the parsed cluster description.
#[derive(Debug)]
pub struct NmaDownloadFileOp {
    base: OpBase,
    hosts: Vec<String>,
    source_path: String,
    communal_location: String,
}

impl NmaDownloadFileOp {
    pub fn new(
        hosts: Vec<String>,
        source_path: impl Into<String>,
        communal_location: impl Into<String>,
    ) -> Self {
        Self {
            base: OpBase::new(
                "NMADownloadFileOp",
                "Download cluster description from communal storage",
                AuthMode::Nma,
                Cardinality::QuorumOne,
            ),
            hosts,
            source_path: source_path.into(),
            communal_location: communal_location.into(),
        }
    }
}

#[async_trait]
impl ClusterOp for NmaDownloadFileOp {
    fn base(&self) -> &OpBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut OpBase {
        &mut self.base
    }

    async fn prepare(&mut self, _ctx: &mut ExecContext) -> Result<()> {
        let hosts = self.hosts.clone();
        self.base.setup_request_collection(&hosts);
        let mut request = self.base.nma_request(HttpMethod::Post, "files/download");
        request.body = Some(json!({
            "source_path": self.source_path,
            "communal_location": self.communal_location,
        }));
        self.base.register_on_all(|_| request.clone());
        Ok(())
    }

    async fn execute(&mut self, ctx: &mut ExecContext) -> Result<()> {
        self.base.run_execute(ctx).await?;
        let winner = self.base.winning_result()?;
        let config: ClusterConfig = winner.parse()?;
        ctx.set_cluster_config(config);
        Ok(())
    }
}

/// Delete database directories on every target host. Used by drop-db;
/// skipped entirely when the caller did not ask for data removal.
#[derive(Debug)]
pub struct NmaDeleteDirsOp {
    base: OpBase,
    hosts: Vec<String>,
    directories: Vec<String>,
    force_delete: bool,
}

impl NmaDeleteDirsOp {
    pub fn new(hosts: Vec<String>, directories: Vec<String>, force_delete: bool) -> Self {
        Self {
            base: OpBase::new(
                "NMADeleteDirsOp",
                "Delete database directories",
                AuthMode::Nma,
                Cardinality::PerHost,
            ),
            hosts,
            directories,
            force_delete,
        }
    }
}

#[async_trait]
impl ClusterOp for NmaDeleteDirsOp {
    fn base(&self) -> &OpBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut OpBase {
        &mut self.base
    }

    async fn prepare(&mut self, _ctx: &mut ExecContext) -> Result<()> {
        if self.directories.is_empty() {
            self.base.skip = true;
            return Ok(());
        }
        let hosts = self.hosts.clone();
        self.base.setup_request_collection(&hosts);
        let mut request = self.base.nma_request(HttpMethod::Post, "files/delete");
        request.body = Some(json!({
            "directories": self.directories,
            "force_delete": self.force_delete,
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn communal_paths_follow_the_metadata_layout() {
        assert_eq!(cluster_config_path("db"), "metadata/db/cluster_config.json");
        assert_eq!(cluster_config_path("sand1"), "metadata/sand1/cluster_config.json");
        assert_eq!(
            restore_point_config_path("db", "weekly", "rp-7"),
            "metadata/db/archives/weekly/rp-7/cluster_config.json"
        );
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StageDirectoryResponse {
    staging_dir: String,
}

/// Create the scrutinize staging directory on every up host and publish
/// its path for the collection steps that follow. Skips with a warning
/// when no host is up.
#[derive(Debug)]
pub struct NmaStageDirectoryOp {
    base: OpBase,
    scrutinize_id: String,
    batch: String,
}

impl NmaStageDirectoryOp {
    pub fn new(scrutinize_id: impl Into<String>, batch: impl Into<String>) -> Self {
        Self {
            base: OpBase::new(
                "NMAStageDirectoryOp",
                "Prepare diagnostics staging directory",
                AuthMode::Nma,
                Cardinality::PerHost,
            ),
            scrutinize_id: scrutinize_id.into(),
            batch: batch.into(),
        }
    }
}

#[async_trait]
impl ClusterOp for NmaStageDirectoryOp {
    fn base(&self) -> &OpBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut OpBase {
        &mut self.base
    }

    async fn prepare(&mut self, ctx: &mut ExecContext) -> Result<()> {
        let up_hosts = ctx.up_hosts()?.clone();
        if up_hosts.is_empty() {
            warn!("no up host available, skipping diagnostics staging");
            self.base.skip = true;
            return Ok(());
        }
        self.base.setup_request_collection(&up_hosts);
        let mut request = self.base.nma_request(
            HttpMethod::Post,
            format!("scrutinize/{}/{}/directory", self.scrutinize_id, self.batch),
        );
        request.body = Some(json!({}));
        self.base.register_on_all(|_| request.clone());
        Ok(())
    }

    async fn execute(&mut self, ctx: &mut ExecContext) -> Result<()> {
        self.base.run_execute(ctx).await?;
        self.base.check_results()?;
        if let Some(first) = self.base.results.first_success() {
            let parsed: StageDirectoryResponse = first.parse()?;
            ctx.set_staging_dir(parsed.staging_dir);
        }
        Ok(())
    }
}

/// Run the command-collection batch of the diagnostics pipeline in the
/// staging directory created earlier.
#[derive(Debug)]
pub struct NmaStageCommandsOp {
    base: OpBase,
    scrutinize_id: String,
    batch: String,
}

impl NmaStageCommandsOp {
    pub fn new(scrutinize_id: impl Into<String>, batch: impl Into<String>) -> Self {
        Self {
            base: OpBase::new(
                "NMAStageCommandsOp",
                "Collect diagnostics command output",
                AuthMode::Nma,
                Cardinality::PerHost,
            ),
            scrutinize_id: scrutinize_id.into(),
            batch: batch.into(),
        }
    }
}

#[async_trait]
impl ClusterOp for NmaStageCommandsOp {
    fn base(&self) -> &OpBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut OpBase {
        &mut self.base
    }

    async fn prepare(&mut self, ctx: &mut ExecContext) -> Result<()> {
        let up_hosts = ctx.up_hosts()?.clone();
        if up_hosts.is_empty() {
            self.base.skip = true;
            return Ok(());
        }
        let staging_dir = ctx.staging_dir()?.clone();
        self.base.setup_request_collection(&up_hosts);
        let mut request = self.base.nma_request(
            HttpMethod::Post,
            format!("scrutinize/{}/{}/commands", self.scrutinize_id, self.batch),
        );
        request.body = Some(json!({ "staging_dir": staging_dir }));
        self.base.register_on_all(|_| request.clone());
        Ok(())
    }

    async fn execute(&mut self, ctx: &mut ExecContext) -> Result<()> {
        self.base.run_execute(ctx).await?;
        self.base.check_results()?;
        Ok(())
    }
}
