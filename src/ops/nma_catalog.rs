//! Catalog-level NMA operations
//!
//! These read and mutate the on-disk catalog through the NMA: ranking
//! hosts by catalog epoch, rotating the spread encryption key, uploading
//! configuration files, and reading or writing configuration parameters.

use crate::context::ExecContext;
use crate::error::{OpsError, Result};
use crate::ops::{AuthMode, Cardinality, ClusterOp, OpBase, primary_host_with_latest_catalog};
use crate::request::HttpMethod;
use crate::vdb::NmaVDatabase;
use async_trait::async_trait;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

/// Spread encryption key: 2-byte identifier and 32-byte key, both carried
/// hex-encoded. The key itself must never reach a log sink; only the
/// identifier may be logged.
#[derive(Clone)]
pub struct SpreadKey {
    key_id: String,
    key: String,
}

impl SpreadKey {
    /// Generate a fresh key with a random identifier.
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let mut id_bytes = [0u8; 2];
        let mut key_bytes = [0u8; 32];
        rng.fill_bytes(&mut id_bytes);
        rng.fill_bytes(&mut key_bytes);
        Self {
            key_id: hex::encode(id_bytes),
            key: hex::encode(key_bytes),
        }
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// Wire form: `{"<keyID-hex-4>":"<key-hex-64>"}`.
    pub fn to_wire(&self) -> String {
        format!("{{\"{}\":\"{}\"}}", self.key_id, self.key)
    }
}

impl std::fmt::Debug for SpreadKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpreadKey")
            .field("key_id", &self.key_id)
            .field("key", &"<redacted>")
            .finish()
    }
}

/// Per-host answer from the catalog editor read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogSnapshot {
    pub db_name: String,
    /// Monotonic catalog epoch; higher is newer.
    pub catalog_version: u64,
    pub is_primary: bool,
}

/// Read the on-disk catalog metadata on every input host and rank hosts by
/// catalog epoch, newest first. Publishes the NMA's cluster view and the
/// latest-catalog host list.
#[derive(Debug)]
pub struct NmaReadCatalogEditorOp {
    base: OpBase,
    hosts: Vec<String>,
    db_name: String,
    catalog_prefix: String,
}

impl NmaReadCatalogEditorOp {
    pub fn new(
        hosts: Vec<String>,
        db_name: impl Into<String>,
        catalog_prefix: impl Into<String>,
    ) -> Self {
        Self {
            base: OpBase::new(
                "NMAReadCatalogEditorOp",
                "Read catalog metadata",
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
impl ClusterOp for NmaReadCatalogEditorOp {
    fn base(&self) -> &OpBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut OpBase {
        &mut self.base
    }

    async fn prepare(&mut self, _ctx: &mut ExecContext) -> Result<()> {
        let hosts = self.hosts.clone();
        self.base.setup_request_collection(&hosts);
        let mut request = self.base.nma_request(HttpMethod::Post, "catalog/database");
        request.body = Some(json!({
            "db_name": self.db_name,
            "catalog_prefix": self.catalog_prefix,
        }));
        self.base.register_on_all(|_| request.clone());
        Ok(())
    }

    async fn execute(&mut self, ctx: &mut ExecContext) -> Result<()> {
        self.base.run_execute(ctx).await?;
        self.base.check_results()?;

        let mut ranked: Vec<(String, CatalogSnapshot)> = Vec::new();
        for (host, result) in self.base.results.iter() {
            let snapshot: CatalogSnapshot = result.parse()?;
            ranked.push((host.clone(), snapshot));
        }
        ranked.sort_by(|a, b| b.1.catalog_version.cmp(&a.1.catalog_version));

        let Some(newest) = ranked.first().map(|(_, s)| s.catalog_version) else {
            return Err(OpsError::Precondition(
                "no host reported a readable catalog".into(),
            ));
        };
        let latest: Vec<String> = ranked
            .iter()
            .filter(|(_, s)| s.catalog_version == newest)
            .map(|(h, _)| h.clone())
            .collect();

        let nma_vdb = NmaVDatabase {
            name: self.db_name.clone(),
            hosts_by_catalog_epoch: ranked.iter().map(|(h, _)| h.clone()).collect(),
            primary_hosts: ranked
                .iter()
                .filter(|(_, s)| s.is_primary)
                .map(|(h, _)| h.clone())
                .collect(),
        };
        ctx.set_nma_vdatabase(nma_vdb);
        ctx.set_hosts_with_latest_catalog(latest);
        Ok(())
    }
}

/// Set the spread encryption key through a primary host holding the
/// latest catalog. The initiator is resolved at prepare time from the
/// catalog-editor ranking.
#[derive(Debug)]
pub struct NmaSpreadSecurityOp {
    base: OpBase,
    key: SpreadKey,
}

impl NmaSpreadSecurityOp {
    pub fn new(key: SpreadKey) -> Self {
        Self {
            base: OpBase::new(
                "NMASpreadSecurityOp",
                "Rotate spread encryption key",
                AuthMode::Nma,
                Cardinality::ClusterWide,
            ),
            key,
        }
    }
}

#[async_trait]
impl ClusterOp for NmaSpreadSecurityOp {
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
        let mut request = self
            .base
            .nma_request(HttpMethod::Post, "catalog/spread-security");
        request.body = Some(json!({ "spread_security_details": self.key.to_wire() }));
        self.base.register_on_all(|_| request.clone());
        Ok(())
    }

    async fn execute(&mut self, ctx: &mut ExecContext) -> Result<()> {
        self.base.run_execute(ctx).await?;
        self.base.check_results()?;
        info!(key_id = self.key.key_id(), "spread key rotated");
        Ok(())
    }
}

/// Bootstrap a fresh catalog on every new host. The first host in the
/// list becomes the bootstrap node that seeds the cluster catalog.
#[derive(Debug)]
pub struct NmaBootstrapCatalogOp {
    base: OpBase,
    hosts: Vec<String>,
    db_name: String,
    catalog_prefix: String,
    data_prefix: String,
    depot_prefix: String,
    communal_storage_location: String,
    shard_count: u32,
}

impl NmaBootstrapCatalogOp {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        hosts: Vec<String>,
        db_name: impl Into<String>,
        catalog_prefix: impl Into<String>,
        data_prefix: impl Into<String>,
        depot_prefix: impl Into<String>,
        communal_storage_location: impl Into<String>,
        shard_count: u32,
    ) -> Self {
        Self {
            base: OpBase::new(
                "NMABootstrapCatalogOp",
                "Bootstrap catalog",
                AuthMode::Nma,
                Cardinality::PerHost,
            ),
            hosts,
            db_name: db_name.into(),
            catalog_prefix: catalog_prefix.into(),
            data_prefix: data_prefix.into(),
            depot_prefix: depot_prefix.into(),
            communal_storage_location: communal_storage_location.into(),
            shard_count,
        }
    }
}

#[async_trait]
impl ClusterOp for NmaBootstrapCatalogOp {
    fn base(&self) -> &OpBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut OpBase {
        &mut self.base
    }

    async fn prepare(&mut self, ctx: &mut ExecContext) -> Result<()> {
        let vdb = ctx.vdb()?;
        let hosts = self.hosts.clone();
        self.base.setup_request_collection(&hosts);
        let bootstrap_host = self.hosts.first().cloned().unwrap_or_default();
        for host in hosts {
            let Some(node) = vdb.node(&host) else {
                return Err(OpsError::Internal(format!(
                    "host {host} missing from the planned topology"
                )));
            };
            let mut request = self.base.nma_request(HttpMethod::Post, "catalog/bootstrap");
            request.body = Some(json!({
                "db_name": self.db_name,
                "node_name": node.name,
                "catalog_prefix": self.catalog_prefix,
                "data_prefix": self.data_prefix,
                "depot_prefix": self.depot_prefix,
                "communal_storage_location": self.communal_storage_location,
                "shard_count": self.shard_count,
                "is_bootstrap_node": host == bootstrap_host,
            }));
            self.base.register(&host, request);
        }
        Ok(())
    }

    async fn execute(&mut self, ctx: &mut ExecContext) -> Result<()> {
        self.base.run_execute(ctx).await?;
        self.base.check_results()?;
        info!(db = %self.db_name, hosts = self.hosts.len(), "catalog bootstrapped");
        Ok(())
    }
}

/// Which configuration file an upload op ships.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfFile {
    VerticaConf,
    SpreadConf,
}

impl ConfFile {
    fn endpoint(&self) -> &'static str {
        match self {
            ConfFile::VerticaConf => "catalog/vertica-conf",
            ConfFile::SpreadConf => "catalog/spread-conf",
        }
    }
}

/// Upload a configuration file to the hosts that need it. Skips itself
/// when no host does.
#[derive(Debug)]
pub struct NmaUploadConfOp {
    base: OpBase,
    hosts: Vec<String>,
    file: ConfFile,
    content: String,
}

impl NmaUploadConfOp {
    pub fn new(hosts: Vec<String>, file: ConfFile, content: impl Into<String>) -> Self {
        Self {
            base: OpBase::new(
                "NMAUploadConfOp",
                "Upload configuration file",
                AuthMode::Nma,
                Cardinality::PerHost,
            ),
            hosts,
            file,
            content: content.into(),
        }
    }
}

#[async_trait]
impl ClusterOp for NmaUploadConfOp {
    fn base(&self) -> &OpBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut OpBase {
        &mut self.base
    }

    async fn prepare(&mut self, _ctx: &mut ExecContext) -> Result<()> {
        if self.hosts.is_empty() {
            warn!(op = self.base.name, "no host needs this upload");
            self.base.skip = true;
            return Ok(());
        }
        let hosts = self.hosts.clone();
        self.base.setup_request_collection(&hosts);
        let mut request = self.base.nma_request(HttpMethod::Post, self.file.endpoint());
        request.body = Some(json!({ "content": self.content }));
        self.base.register_on_all(|_| request.clone());
        Ok(())
    }

    async fn execute(&mut self, ctx: &mut ExecContext) -> Result<()> {
        self.base.run_execute(ctx).await?;
        self.base.check_results()?;
        Ok(())
    }
}

/// Read one configuration parameter through an initiator NMA.
#[derive(Debug)]
pub struct NmaGetConfigParamOp {
    base: OpBase,
    initiator: Vec<String>,
    parameter: String,
    level: Option<String>,
}

impl NmaGetConfigParamOp {
    pub fn new(initiator: Vec<String>, parameter: impl Into<String>, level: Option<String>) -> Self {
        Self {
            base: OpBase::new(
                "NMAGetConfigParamOp",
                "Get configuration parameter",
                AuthMode::Nma,
                Cardinality::ClusterWide,
            ),
            initiator,
            parameter: parameter.into(),
            level,
        }
    }
}

#[async_trait]
impl ClusterOp for NmaGetConfigParamOp {
    fn base(&self) -> &OpBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut OpBase {
        &mut self.base
    }

    async fn prepare(&mut self, _ctx: &mut ExecContext) -> Result<()> {
        let hosts = self.initiator.clone();
        self.base.setup_request_collection(&hosts);
        let mut request = self.base.nma_request(
            HttpMethod::Post,
            "configuration/get-configuration-parameter",
        );
        let mut body = json!({ "parameter": self.parameter });
        if let Some(level) = &self.level {
            body["level"] = json!(level);
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

/// Write one configuration parameter through an initiator NMA.
#[derive(Debug)]
pub struct NmaSetConfigParamOp {
    base: OpBase,
    initiator: Vec<String>,
    parameter: String,
    value: String,
    level: Option<String>,
}

impl NmaSetConfigParamOp {
    pub fn new(
        initiator: Vec<String>,
        parameter: impl Into<String>,
        value: impl Into<String>,
        level: Option<String>,
    ) -> Self {
        Self {
            base: OpBase::new(
                "NMASetConfigParamOp",
                "Set configuration parameter",
                AuthMode::Nma,
                Cardinality::ClusterWide,
            ),
            initiator,
            parameter: parameter.into(),
            value: value.into(),
            level,
        }
    }
}

#[async_trait]
impl ClusterOp for NmaSetConfigParamOp {
    fn base(&self) -> &OpBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut OpBase {
        &mut self.base
    }

    async fn prepare(&mut self, _ctx: &mut ExecContext) -> Result<()> {
        let hosts = self.initiator.clone();
        self.base.setup_request_collection(&hosts);
        let mut request = self.base.nma_request(
            HttpMethod::Post,
            "configuration/set-configuration-parameter",
        );
        let mut body = json!({
            "parameter": self.parameter,
            "value": self.value,
        });
        if let Some(level) = &self.level {
            body["level"] = json!(level);
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

/// Copy subcluster-scoped properties from one subcluster to another,
/// used when a new subcluster should inherit an existing one's settings.
#[derive(Debug)]
pub struct NmaCloneSubclusterPropsOp {
    base: OpBase,
    initiator: Vec<String>,
    source_subcluster: String,
    target_subcluster: String,
}

impl NmaCloneSubclusterPropsOp {
    pub fn new(
        initiator: Vec<String>,
        source_subcluster: impl Into<String>,
        target_subcluster: impl Into<String>,
    ) -> Self {
        Self {
            base: OpBase::new(
                "NMACloneSubclusterPropsOp",
                "Clone subcluster properties",
                AuthMode::Nma,
                Cardinality::ClusterWide,
            ),
            initiator,
            source_subcluster: source_subcluster.into(),
            target_subcluster: target_subcluster.into(),
        }
    }
}

#[async_trait]
impl ClusterOp for NmaCloneSubclusterPropsOp {
    fn base(&self) -> &OpBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut OpBase {
        &mut self.base
    }

    async fn prepare(&mut self, _ctx: &mut ExecContext) -> Result<()> {
        let hosts = self.initiator.clone();
        self.base.setup_request_collection(&hosts);
        let mut request = self.base.nma_request(
            HttpMethod::Post,
            "configuration/clone-subcluster-properties",
        );
        request.body = Some(json!({
            "source_subcluster": self.source_subcluster,
            "target_subcluster": self.target_subcluster,
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
    fn spread_key_has_wire_lengths() {
        let key = SpreadKey::generate();
        assert_eq!(key.key_id().len(), 4);
        assert_eq!(key.key.len(), 64);
        let wire = key.to_wire();
        assert!(wire.starts_with('{') && wire.ends_with('}'));
        let parsed: serde_json::Value = serde_json::from_str(&wire).unwrap();
        assert_eq!(parsed[key.key_id()].as_str().unwrap().len(), 64);
    }

    #[test]
    fn spread_key_debug_redacts_key() {
        let key = SpreadKey::generate();
        let rendered = format!("{key:?}");
        assert!(rendered.contains(key.key_id()));
        assert!(!rendered.contains(&key.key));
        assert!(rendered.contains("<redacted>"));
    }
}
