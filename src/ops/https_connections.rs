//! Client connection draining operations

use crate::context::ExecContext;
use crate::error::{OpsError, Result};
use crate::ops::poll::{self, PollingOp};
use crate::ops::{AuthMode, Cardinality, ClusterOp, OpBase};
use crate::request::HttpMethod;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// What to do with client connections on a subcluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainingAction {
    /// Stop accepting new connections.
    Pause,
    /// Send new connections to another host.
    Redirect,
    /// Accept connections again.
    Resume,
}

impl DrainingAction {
    pub const fn as_str(&self) -> &'static str {
        match self {
            DrainingAction::Pause => "pause",
            DrainingAction::Redirect => "redirect",
            DrainingAction::Resume => "resume",
        }
    }
}

impl fmt::Display for DrainingAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-subcluster drain state row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrainingStatus {
    pub subcluster_name: String,
    /// `pausing`, `redirecting`, or `default`.
    pub drain_status: String,
    /// Active client connections still attached.
    pub active_connection_count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrainingStatusResponse {
    pub draining_status_list: Vec<DrainingStatus>,
}

/// Pause, redirect, or resume client connections on one subcluster.
#[derive(Debug)]
pub struct HttpsManageConnectionDrainingOp {
    base: OpBase,
    initiator: Vec<String>,
    subcluster: String,
    action: DrainingAction,
    redirect_hostname: Option<String>,
}

impl HttpsManageConnectionDrainingOp {
    pub fn new(
        initiator: Vec<String>,
        subcluster: impl Into<String>,
        action: DrainingAction,
        redirect_hostname: Option<String>,
    ) -> Self {
        Self {
            base: OpBase::new(
                "HTTPSManageConnectionDrainingOp",
                "Manage connection draining",
                AuthMode::Https,
                Cardinality::ClusterWide,
            ),
            initiator,
            subcluster: subcluster.into(),
            action,
            redirect_hostname,
        }
    }
}

#[async_trait]
impl ClusterOp for HttpsManageConnectionDrainingOp {
    fn base(&self) -> &OpBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut OpBase {
        &mut self.base
    }

    async fn prepare(&mut self, _ctx: &mut ExecContext) -> Result<()> {
        if self.action == DrainingAction::Redirect
            && self.redirect_hostname.as_deref().unwrap_or_default().is_empty()
        {
            return Err(OpsError::Internal(
                "redirect draining requires a hostname, checked at options validation".into(),
            ));
        }
        let hosts = self.initiator.clone();
        self.base.setup_request_collection(&hosts);
        let mut request = self.base.https_request(HttpMethod::Post, "connections/drain");
        let mut body = json!({
            "action": self.action.as_str(),
            "subcluster": self.subcluster,
        });
        if let Some(hostname) = &self.redirect_hostname {
            body["redirect_hostname"] = json!(hostname);
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

/// Read per-subcluster draining status rows.
#[derive(Debug)]
pub struct HttpsGetDrainingStatusOp {
    base: OpBase,
    initiator: Vec<String>,
}

impl HttpsGetDrainingStatusOp {
    pub fn new(initiator: Vec<String>) -> Self {
        Self {
            base: OpBase::new(
                "HTTPSGetDrainingStatusOp",
                "Collect connection draining status",
                AuthMode::Https,
                Cardinality::QuorumOne,
            ),
            initiator,
        }
    }
}

#[async_trait]
impl ClusterOp for HttpsGetDrainingStatusOp {
    fn base(&self) -> &OpBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut OpBase {
        &mut self.base
    }

    async fn prepare(&mut self, _ctx: &mut ExecContext) -> Result<()> {
        let hosts = self.initiator.clone();
        self.base.setup_request_collection(&hosts);
        let request = self
            .base
            .https_request(HttpMethod::Get, "connections/drain/status");
        self.base.register_on_all(|_| request.clone());
        Ok(())
    }

    async fn execute(&mut self, ctx: &mut ExecContext) -> Result<()> {
        self.base.run_execute(ctx).await?;
        let winner = self.base.winning_result()?;
        let parsed: DrainingStatusResponse = winner.parse()?;
        ctx.set_draining_statuses(parsed.draining_status_list);
        Ok(())
    }
}

/// Poll the draining status until every tracked subcluster has fully
/// drained (no active connections left).
#[derive(Debug)]
pub struct PollDrainStatusOp {
    base: OpBase,
    initiator: Vec<String>,
    subclusters: Vec<String>,
    /// Latest connection count per tracked subcluster.
    observed: BTreeMap<String, u64>,
    timeout: Duration,
}

impl PollDrainStatusOp {
    pub fn new(initiator: Vec<String>, subclusters: Vec<String>) -> Self {
        Self {
            base: OpBase::new(
                "HTTPSPollDrainStatusOp",
                "Wait for client connections to drain",
                AuthMode::Https,
                Cardinality::QuorumOne,
            ),
            initiator,
            subclusters,
            observed: BTreeMap::new(),
            timeout: poll::state_polling_timeout(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn drained_count(&self) -> usize {
        self.subclusters
            .iter()
            .filter(|sc| self.observed.get(*sc).is_some_and(|&count| count == 0))
            .count()
    }
}

#[async_trait]
impl PollingOp for PollDrainStatusOp {
    fn base(&self) -> &OpBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut OpBase {
        &mut self.base
    }

    fn poll_timeout(&self) -> Duration {
        self.timeout
    }

    fn setup_requests(&mut self, _ctx: &ExecContext) -> Result<()> {
        let hosts = self.initiator.clone();
        self.base.setup_request_collection(&hosts);
        let request = self
            .base
            .https_request(HttpMethod::Get, "connections/drain/status");
        self.base.register_on_all(|_| request.clone());
        Ok(())
    }

    fn should_stop_polling(&mut self, _ctx: &mut ExecContext) -> Result<bool> {
        if let Some(result) = self.base.results.first_success() {
            let parsed: DrainingStatusResponse = result.parse()?;
            for row in parsed.draining_status_list {
                if self.subclusters.contains(&row.subcluster_name) {
                    self.observed
                        .insert(row.subcluster_name, row.active_connection_count);
                }
            }
        }
        Ok(self.drained_count() == self.subclusters.len())
    }

    fn progress_message(&self) -> String {
        format!(
            "{} subcluster(s) drained, expecting {}",
            self.drained_count(),
            self.subclusters.len()
        )
    }

    fn timeout_error(&self) -> OpsError {
        let pending: Vec<String> = self
            .subclusters
            .iter()
            .filter(|sc| !self.observed.get(*sc).is_some_and(|&count| count == 0))
            .map(|sc| match self.observed.get(sc) {
                Some(count) => format!("{sc} ({count} connection(s) left)"),
                None => format!("{sc} (no status seen)"),
            })
            .collect();
        OpsError::Timeout {
            host: format!(
                "[{}] subclusters did not drain in time: {}",
                self.base.name,
                pending.join(", ")
            ),
        }
    }
}

#[async_trait]
impl ClusterOp for PollDrainStatusOp {
    fn base(&self) -> &OpBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut OpBase {
        &mut self.base
    }

    async fn prepare(&mut self, _ctx: &mut ExecContext) -> Result<()> {
        if self.subclusters.is_empty() {
            self.base.skip = true;
        }
        Ok(())
    }

    async fn execute(&mut self, ctx: &mut ExecContext) -> Result<()> {
        poll::run_polling(self, ctx).await
    }
}
