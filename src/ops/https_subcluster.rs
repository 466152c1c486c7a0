//! Subcluster and sandbox operations against the HTTPS catalog service

use crate::context::ExecContext;
use crate::error::Result;
use crate::ops::{AuthMode, Cardinality, ClusterOp, OpBase};
use crate::request::HttpMethod;
use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

/// Sandbox a subcluster into the named sandbox.
#[derive(Debug)]
pub struct HttpsSandboxSubclusterOp {
    base: OpBase,
    initiator: Vec<String>,
    subcluster: String,
    sandbox: String,
    for_upgrade: bool,
}

impl HttpsSandboxSubclusterOp {
    pub fn new(
        initiator: Vec<String>,
        subcluster: impl Into<String>,
        sandbox: impl Into<String>,
        for_upgrade: bool,
    ) -> Self {
        Self {
            base: OpBase::new(
                "HTTPSSandboxSubclusterOp",
                "Sandbox subcluster",
                AuthMode::Https,
                Cardinality::ClusterWide,
            ),
            initiator,
            subcluster: subcluster.into(),
            sandbox: sandbox.into(),
            for_upgrade,
        }
    }
}

#[async_trait]
impl ClusterOp for HttpsSandboxSubclusterOp {
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
            format!("subclusters/{}/sandbox", self.subcluster),
        );
        request.body = Some(json!({
            "sandbox": self.sandbox,
            "forUpgrade": self.for_upgrade,
        }));
        self.base.register_on_all(|_| request.clone());
        Ok(())
    }

    async fn execute(&mut self, ctx: &mut ExecContext) -> Result<()> {
        self.base.run_execute(ctx).await?;
        self.base.check_results()?;
        info!(subcluster = %self.subcluster, sandbox = %self.sandbox, "subcluster sandboxed");
        Ok(())
    }
}

/// Move a subcluster back from its sandbox to the main cluster.
#[derive(Debug)]
pub struct HttpsUnsandboxSubclusterOp {
    base: OpBase,
    initiator: Vec<String>,
    subcluster: String,
}

impl HttpsUnsandboxSubclusterOp {
    pub fn new(initiator: Vec<String>, subcluster: impl Into<String>) -> Self {
        Self {
            base: OpBase::new(
                "HTTPSUnsandboxSubclusterOp",
                "Unsandbox subcluster",
                AuthMode::Https,
                Cardinality::ClusterWide,
            ),
            initiator,
            subcluster: subcluster.into(),
        }
    }
}

#[async_trait]
impl ClusterOp for HttpsUnsandboxSubclusterOp {
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
            format!("subclusters/{}/unsandbox", self.subcluster),
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

/// Promote a sandbox to be the main cluster.
///
/// Catalog propagation after the preceding steps is eventually consistent,
/// so this is the one operation that retries: it reissues the request
/// within a bounded wall-clock window until the promotion sticks.
#[derive(Debug)]
pub struct HttpsPromoteSandboxToMainOp {
    base: OpBase,
    initiator: Vec<String>,
    sandbox: String,
    retry_window: Duration,
    retry_interval: Duration,
}

impl HttpsPromoteSandboxToMainOp {
    pub fn new(initiator: Vec<String>, sandbox: impl Into<String>) -> Self {
        Self {
            base: OpBase::new(
                "HTTPSPromoteSandboxToMainOp",
                "Promote sandbox to main cluster",
                AuthMode::Https,
                Cardinality::ClusterWide,
            ),
            initiator,
            sandbox: sandbox.into(),
            retry_window: Duration::from_secs(300),
            retry_interval: Duration::from_secs(5),
        }
    }

    pub fn with_retry_window(mut self, window: Duration) -> Self {
        self.retry_window = window;
        self
    }

    fn register(&mut self) {
        let hosts = self.initiator.clone();
        self.base.setup_request_collection(&hosts);
        let mut request = self.base.https_request(
            HttpMethod::Post,
            format!("sandboxes/{}/promote", self.sandbox),
        );
        request.body = Some(json!({}));
        self.base.register_on_all(|_| request.clone());
    }
}

#[async_trait]
impl ClusterOp for HttpsPromoteSandboxToMainOp {
    fn base(&self) -> &OpBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut OpBase {
        &mut self.base
    }

    async fn prepare(&mut self, _ctx: &mut ExecContext) -> Result<()> {
        self.register();
        Ok(())
    }

    async fn execute(&mut self, ctx: &mut ExecContext) -> Result<()> {
        let deadline = Instant::now() + self.retry_window;
        loop {
            self.base.run_execute(ctx).await?;
            // drop the borrow on the winning result before re-registering
            let outcome = self.base.check_results().map(|_| ());
            match outcome {
                Ok(()) => {
                    info!(sandbox = %self.sandbox, "sandbox promoted to main");
                    return Ok(());
                }
                Err(err) if err.is_authentication() => return Err(err),
                Err(err) => {
                    if Instant::now() >= deadline {
                        return Err(err.with_step(
                            "fail to promote sandbox; please shut down the sandbox and retry",
                        ));
                    }
                    debug!(error = %err, "promotion not yet visible, retrying");
                    tokio::time::sleep(self.retry_interval).await;
                    self.register();
                }
            }
        }
    }
}

/// Define a new (empty) subcluster in the catalog.
#[derive(Debug)]
pub struct HttpsAddSubclusterOp {
    base: OpBase,
    initiator: Vec<String>,
    subcluster: String,
    is_primary: bool,
}

impl HttpsAddSubclusterOp {
    pub fn new(initiator: Vec<String>, subcluster: impl Into<String>, is_primary: bool) -> Self {
        Self {
            base: OpBase::new(
                "HTTPSAddSubclusterOp",
                "Add subcluster",
                AuthMode::Https,
                Cardinality::ClusterWide,
            ),
            initiator,
            subcluster: subcluster.into(),
            is_primary,
        }
    }
}

#[async_trait]
impl ClusterOp for HttpsAddSubclusterOp {
    fn base(&self) -> &OpBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut OpBase {
        &mut self.base
    }

    async fn prepare(&mut self, _ctx: &mut ExecContext) -> Result<()> {
        let hosts = self.initiator.clone();
        self.base.setup_request_collection(&hosts);
        let mut request = self.base.https_request(HttpMethod::Post, "subclusters");
        request.body = Some(json!({
            "name": self.subcluster,
            "is_primary": self.is_primary,
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

/// Remove an (already emptied) subcluster from the catalog.
#[derive(Debug)]
pub struct HttpsDropSubclusterOp {
    base: OpBase,
    initiator: Vec<String>,
    subcluster: String,
}

impl HttpsDropSubclusterOp {
    pub fn new(initiator: Vec<String>, subcluster: impl Into<String>) -> Self {
        Self {
            base: OpBase::new(
                "HTTPSDropSubclusterOp",
                "Drop subcluster",
                AuthMode::Https,
                Cardinality::ClusterWide,
            ),
            initiator,
            subcluster: subcluster.into(),
        }
    }
}

#[async_trait]
impl ClusterOp for HttpsDropSubclusterOp {
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
            format!("subclusters/{}/drop", self.subcluster),
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

/// Promote a secondary subcluster to primary or demote a primary to
/// secondary.
#[derive(Debug)]
pub struct HttpsAlterSubclusterTypeOp {
    base: OpBase,
    initiator: Vec<String>,
    subcluster: String,
    make_primary: bool,
}

impl HttpsAlterSubclusterTypeOp {
    pub fn new(initiator: Vec<String>, subcluster: impl Into<String>, make_primary: bool) -> Self {
        Self {
            base: OpBase::new(
                "HTTPSAlterSubclusterTypeOp",
                "Alter subcluster type",
                AuthMode::Https,
                Cardinality::ClusterWide,
            ),
            initiator,
            subcluster: subcluster.into(),
            make_primary,
        }
    }
}

#[async_trait]
impl ClusterOp for HttpsAlterSubclusterTypeOp {
    fn base(&self) -> &OpBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut OpBase {
        &mut self.base
    }

    async fn prepare(&mut self, _ctx: &mut ExecContext) -> Result<()> {
        let hosts = self.initiator.clone();
        self.base.setup_request_collection(&hosts);
        let action = if self.make_primary { "promote" } else { "demote" };
        let mut request = self.base.https_request(
            HttpMethod::Post,
            format!("subclusters/{}/{action}", self.subcluster),
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

/// Rename a subcluster.
#[derive(Debug)]
pub struct HttpsRenameSubclusterOp {
    base: OpBase,
    initiator: Vec<String>,
    subcluster: String,
    new_name: String,
}

impl HttpsRenameSubclusterOp {
    pub fn new(
        initiator: Vec<String>,
        subcluster: impl Into<String>,
        new_name: impl Into<String>,
    ) -> Self {
        Self {
            base: OpBase::new(
                "HTTPSRenameSubclusterOp",
                "Rename subcluster",
                AuthMode::Https,
                Cardinality::ClusterWide,
            ),
            initiator,
            subcluster: subcluster.into(),
            new_name: new_name.into(),
        }
    }
}

#[async_trait]
impl ClusterOp for HttpsRenameSubclusterOp {
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
            format!("subclusters/{}/rename", self.subcluster),
        );
        request.body = Some(json!({ "newName": self.new_name }));
        self.base.register_on_all(|_| request.clone());
        Ok(())
    }

    async fn execute(&mut self, ctx: &mut ExecContext) -> Result<()> {
        self.base.run_execute(ctx).await?;
        self.base.check_results()?;
        Ok(())
    }
}

/// Shut down one subcluster.
#[derive(Debug)]
pub struct HttpsStopSubclusterOp {
    base: OpBase,
    initiator: Vec<String>,
    subcluster: String,
    force: bool,
}

impl HttpsStopSubclusterOp {
    pub fn new(initiator: Vec<String>, subcluster: impl Into<String>, force: bool) -> Self {
        Self {
            base: OpBase::new(
                "HTTPSStopSubclusterOp",
                "Stop subcluster",
                AuthMode::Https,
                Cardinality::ClusterWide,
            ),
            initiator,
            subcluster: subcluster.into(),
            force,
        }
    }

    pub fn with_cmd(mut self, cmd: crate::cmd::CmdType) -> Self {
        self.base.cmd = Some(cmd);
        self
    }
}

#[async_trait]
impl ClusterOp for HttpsStopSubclusterOp {
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
            format!("subclusters/{}/shutdown", self.subcluster),
        );
        if self.base.cmd.is_some_and(|cmd| cmd.is_sync_cat()) {
            request.query.insert("sync-catalog".into(), "true".into());
        }
        request.body = Some(json!({ "force": self.force }));
        self.base.register_on_all(|_| request.clone());
        Ok(())
    }

    async fn execute(&mut self, ctx: &mut ExecContext) -> Result<()> {
        self.base.run_execute(ctx).await?;
        self.base.check_results()?;
        Ok(())
    }
}
