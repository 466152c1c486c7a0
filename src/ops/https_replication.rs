//! Replication operations

use crate::context::ExecContext;
use crate::error::Result;
use crate::ops::{AuthMode, Cardinality, ClusterOp, OpBase};
use crate::request::HttpMethod;
use async_trait::async_trait;
use serde_json::json;
use tracing::info;

/// Start replicating data from this cluster to a target database.
///
/// The target may be another database or a sandbox of the same database
/// (the online-upgrade data path).
#[derive(Debug)]
pub struct HttpsReplicationStartOp {
    base: OpBase,
    initiator: Vec<String>,
    target_db_name: String,
    target_hosts: Vec<String>,
    /// Sandbox receiving the data when replicating into a sandbox.
    target_sandbox: Option<String>,
    /// Restrict replication to objects matching this pattern.
    table_or_schema: Option<String>,
}

impl HttpsReplicationStartOp {
    pub fn new(
        initiator: Vec<String>,
        target_db_name: impl Into<String>,
        target_hosts: Vec<String>,
    ) -> Self {
        Self {
            base: OpBase::new(
                "HTTPSReplicationStartOp",
                "Start replication",
                AuthMode::Https,
                Cardinality::ClusterWide,
            ),
            initiator,
            target_db_name: target_db_name.into(),
            target_hosts,
            target_sandbox: None,
            table_or_schema: None,
        }
    }

    pub fn into_sandbox(mut self, sandbox: impl Into<String>) -> Self {
        self.target_sandbox = Some(sandbox.into());
        self
    }

    pub fn pattern(mut self, table_or_schema: impl Into<String>) -> Self {
        self.table_or_schema = Some(table_or_schema.into());
        self
    }
}

#[async_trait]
impl ClusterOp for HttpsReplicationStartOp {
    fn base(&self) -> &OpBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut OpBase {
        &mut self.base
    }

    async fn prepare(&mut self, _ctx: &mut ExecContext) -> Result<()> {
        let hosts = self.initiator.clone();
        self.base.setup_request_collection(&hosts);
        let mut request = self.base.https_request(HttpMethod::Post, "replicate/start");
        let mut body = json!({
            "target_db_name": self.target_db_name,
            "target_hosts": self.target_hosts,
        });
        if let Some(sandbox) = &self.target_sandbox {
            body["target_sandbox"] = json!(sandbox);
        }
        if let Some(pattern) = &self.table_or_schema {
            body["table_or_schema_name"] = json!(pattern);
        }
        request.body = Some(body);
        self.base.register_on_all(|_| request.clone());
        Ok(())
    }

    async fn execute(&mut self, ctx: &mut ExecContext) -> Result<()> {
        self.base.run_execute(ctx).await?;
        self.base.check_results()?;
        info!(target = %self.target_db_name, "replication started");
        Ok(())
    }
}
