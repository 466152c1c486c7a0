//! Archive and restore-point operations

use crate::context::ExecContext;
use crate::error::Result;
use crate::ops::{AuthMode, Cardinality, ClusterOp, OpBase};
use crate::request::HttpMethod;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

/// One saved restore point inside an archive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestorePoint {
    pub archive: String,
    pub id: String,
    pub index: u64,
    /// RFC 3339 wall-clock timestamp recorded by the catalog service.
    pub timestamp: String,
    #[serde(default)]
    pub vertica_version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestorePointsResponse {
    pub restore_points: Vec<RestorePoint>,
}

/// Server-side filters for listing restore points.
#[derive(Debug, Clone, Default)]
pub struct RestorePointFilter {
    pub archive_name: Option<String>,
    pub restore_point_id: Option<String>,
    pub start_timestamp: Option<String>,
    pub end_timestamp: Option<String>,
}

/// List restore points, optionally filtered.
#[derive(Debug)]
pub struct HttpsShowRestorePointsOp {
    base: OpBase,
    initiator: Vec<String>,
    filter: RestorePointFilter,
}

impl HttpsShowRestorePointsOp {
    pub fn new(initiator: Vec<String>, filter: RestorePointFilter) -> Self {
        Self {
            base: OpBase::new(
                "HTTPSShowRestorePointsOp",
                "Show restore points",
                AuthMode::Https,
                Cardinality::QuorumOne,
            ),
            initiator,
            filter,
        }
    }
}

#[async_trait]
impl ClusterOp for HttpsShowRestorePointsOp {
    fn base(&self) -> &OpBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut OpBase {
        &mut self.base
    }

    async fn prepare(&mut self, _ctx: &mut ExecContext) -> Result<()> {
        let hosts = self.initiator.clone();
        self.base.setup_request_collection(&hosts);
        let mut request = self.base.https_request(HttpMethod::Get, "restore-points");
        if let Some(archive) = &self.filter.archive_name {
            request.query.insert("archive".into(), archive.clone());
        }
        if let Some(id) = &self.filter.restore_point_id {
            request.query.insert("id".into(), id.clone());
        }
        if let Some(start) = &self.filter.start_timestamp {
            request.query.insert("start-timestamp".into(), start.clone());
        }
        if let Some(end) = &self.filter.end_timestamp {
            request.query.insert("end-timestamp".into(), end.clone());
        }
        self.base.register_on_all(|_| request.clone());
        Ok(())
    }

    async fn execute(&mut self, ctx: &mut ExecContext) -> Result<()> {
        self.base.run_execute(ctx).await?;
        let winner = self.base.winning_result()?;
        let parsed: RestorePointsResponse = winner.parse()?;
        ctx.set_restore_points(parsed.restore_points);
        Ok(())
    }
}

/// Save a restore point into an existing archive.
#[derive(Debug)]
pub struct HttpsSaveRestorePointOp {
    base: OpBase,
    initiator: Vec<String>,
    archive: String,
    sandbox: Option<String>,
}

impl HttpsSaveRestorePointOp {
    pub fn new(initiator: Vec<String>, archive: impl Into<String>, sandbox: Option<String>) -> Self {
        Self {
            base: OpBase::new(
                "HTTPSSaveRestorePointOp",
                "Save restore point",
                AuthMode::Https,
                Cardinality::ClusterWide,
            ),
            initiator,
            archive: archive.into(),
            sandbox,
        }
    }
}

#[async_trait]
impl ClusterOp for HttpsSaveRestorePointOp {
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
            format!("archives/{}/restore-point", self.archive),
        );
        let mut body = json!({});
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

/// Create a named archive for future restore points.
#[derive(Debug)]
pub struct HttpsCreateArchiveOp {
    base: OpBase,
    initiator: Vec<String>,
    archive: String,
    num_restore_points: Option<u32>,
}

impl HttpsCreateArchiveOp {
    pub fn new(
        initiator: Vec<String>,
        archive: impl Into<String>,
        num_restore_points: Option<u32>,
    ) -> Self {
        Self {
            base: OpBase::new(
                "HTTPSCreateArchiveOp",
                "Create archive",
                AuthMode::Https,
                Cardinality::ClusterWide,
            ),
            initiator,
            archive: archive.into(),
            num_restore_points,
        }
    }
}

#[async_trait]
impl ClusterOp for HttpsCreateArchiveOp {
    fn base(&self) -> &OpBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut OpBase {
        &mut self.base
    }

    async fn prepare(&mut self, _ctx: &mut ExecContext) -> Result<()> {
        let hosts = self.initiator.clone();
        self.base.setup_request_collection(&hosts);
        let mut request = self.base.https_request(HttpMethod::Post, "archives");
        let mut body = json!({ "name": self.archive });
        if let Some(limit) = self.num_restore_points {
            body["num_restore_points"] = json!(limit);
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
