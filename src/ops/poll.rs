//! State-polling framework
//!
//! Long-running loops that wrap an operation: register this iteration's
//! requests, fan out, classify, decide whether to stop. The loop survives
//! transient per-host failures, fails fast on authentication errors, and
//! honors both the per-request timeout and an overall wall-clock bound.

use crate::context::ExecContext;
use crate::error::{OpsError, Result};
use crate::ops::https_cluster::NodesInfoResponse;
use crate::ops::{AuthMode, Cardinality, ClusterOp, OpBase};
use crate::request::HttpMethod;
use crate::vdb::NodeState;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Sleep between poll iterations.
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Overall bound for node-state polling unless overridden.
pub const DEFAULT_STATE_POLLING_TIMEOUT: Duration = Duration::from_secs(300);

/// Environment override (seconds) for the overall node-state poll bound.
pub const NODE_STATE_POLLING_TIMEOUT_ENV: &str = "NODE_STATE_POLLING_TIMEOUT";

/// Well-known failure for indirect polling with no usable observer.
pub const NO_PRIMARY_UP_OBSERVER: &str =
    "indirect node-state polling requires at least one primary UP observer host";

/// Resolve the overall polling bound, honoring the environment override.
pub fn state_polling_timeout() -> Duration {
    std::env::var(NODE_STATE_POLLING_TIMEOUT_ENV)
        .ok()
        .and_then(|raw| raw.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_STATE_POLLING_TIMEOUT)
}

/// One pollable operation. The framework owns the loop; the operation owns
/// request registration and the stop decision.
#[async_trait]
pub trait PollingOp: Send {
    fn base(&self) -> &OpBase;
    fn base_mut(&mut self) -> &mut OpBase;

    /// Overall wall-clock bound for the loop.
    fn poll_timeout(&self) -> Duration;

    /// Register this iteration's requests.
    fn setup_requests(&mut self, ctx: &ExecContext) -> Result<()>;

    /// Inspect the latest result collection; `Ok(true)` ends the loop.
    fn should_stop_polling(&mut self, ctx: &mut ExecContext) -> Result<bool>;

    /// Progress line streamed to the caller between iterations.
    fn progress_message(&self) -> String;

    /// Error reported when the wall-clock bound expires.
    fn timeout_error(&self) -> OpsError;
}

/// Drive one polling operation to completion or failure.
///
/// Classification per iteration: a per-host timeout means the host is
/// unreachable and stops the loop; an authentication failure on any host
/// stops immediately without waiting out the deadline; other failures are
/// transient and the loop continues.
pub async fn run_polling<T: PollingOp + ?Sized>(op: &mut T, ctx: &mut ExecContext) -> Result<()> {
    let deadline = Instant::now() + op.poll_timeout();
    loop {
        op.setup_requests(ctx)?;
        op.base_mut().run_execute(ctx).await?;

        let name = op.base().name;
        if let Some(auth) = op.base().results.auth_failure() {
            return Err(auth
                .to_error(name)
                .unwrap_or_else(|| OpsError::Internal(format!("[{name}] missing auth error"))));
        }
        if let Some(timed_out) = op.base().results.iter().find(|(_, r)| r.is_timeout()) {
            return Err(OpsError::Unreachable {
                host: timed_out.0.clone(),
                detail: format!("[{name}] host did not answer within the request timeout"),
            });
        }

        if op.should_stop_polling(ctx)? {
            ctx.progress().finish(&op.progress_message());
            return Ok(());
        }
        ctx.progress().update(&op.progress_message());

        if Instant::now() >= deadline {
            warn!(op = name, "polling deadline expired");
            return Err(op.timeout_error());
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

/// How node states are observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollMode {
    /// GET /nodes on the target hosts themselves; used when those hosts
    /// are expected to come up.
    Direct,
    /// GET /nodes on known-up observer hosts to learn the state of hosts
    /// that cannot answer for themselves (compute or unknown-type nodes).
    Indirect,
}

/// Polls until every tracked host reaches one of the allowed states.
#[derive(Debug)]
pub struct PollNodeStateOp {
    base: OpBase,
    mode: PollMode,
    /// Hosts whose state is being tracked, by address.
    target_hosts: Vec<String>,
    /// Observer hosts queried in indirect mode.
    observer_hosts: Vec<String>,
    allowed_states: Vec<NodeState>,
    /// Latest observation per tracked address; last observation wins.
    observed: BTreeMap<String, NodeState>,
    timeout: Duration,
    /// When set, the non-compute subset of the tracked hosts is published
    /// through the context once polling completes.
    emit_permanent_subset: bool,
}

impl PollNodeStateOp {
    pub fn direct(target_hosts: Vec<String>, allowed_states: Vec<NodeState>) -> Self {
        Self {
            base: OpBase::new(
                "HTTPSPollNodeStateOp",
                "Wait for nodes to reach the expected state",
                AuthMode::Https,
                Cardinality::QuorumOne,
            ),
            mode: PollMode::Direct,
            target_hosts,
            observer_hosts: Vec::new(),
            allowed_states,
            observed: BTreeMap::new(),
            timeout: state_polling_timeout(),
            emit_permanent_subset: false,
        }
    }

    pub fn indirect(
        target_hosts: Vec<String>,
        observer_hosts: Vec<String>,
        allowed_states: Vec<NodeState>,
    ) -> Self {
        Self {
            base: OpBase::new(
                "HTTPSPollNodeStateIndirectOp",
                "Wait for nodes to reach the expected state (observed)",
                AuthMode::Https,
                Cardinality::QuorumOne,
            ),
            mode: PollMode::Indirect,
            target_hosts,
            observer_hosts,
            allowed_states,
            observed: BTreeMap::new(),
            timeout: state_polling_timeout(),
            emit_permanent_subset: false,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Publish the non-compute subset of tracked hosts when done, so the
    /// next operation can act on permanent nodes only.
    pub fn emit_permanent_subset(mut self) -> Self {
        self.emit_permanent_subset = true;
        self
    }

    fn queried_hosts(&self) -> &[String] {
        match self.mode {
            PollMode::Direct => &self.target_hosts,
            PollMode::Indirect => &self.observer_hosts,
        }
    }

    fn reached_count(&self) -> usize {
        self.target_hosts
            .iter()
            .filter(|h| {
                self.observed
                    .get(*h)
                    .is_some_and(|s| self.allowed_states.contains(s))
            })
            .count()
    }

    fn record_observations(&mut self) {
        // Read every successful body; record the state of every tracked
        // address seen, whether or not it is an allowed state yet.
        let mut seen: Vec<(String, NodeState)> = Vec::new();
        for (_, result) in self.base.results.iter() {
            if !result.is_success() {
                continue;
            }
            let Ok(parsed) = result.parse::<NodesInfoResponse>() else {
                continue;
            };
            for node in parsed.node_list {
                if self.target_hosts.contains(&node.address) {
                    seen.push((node.address, node.state));
                }
            }
        }
        for (address, state) in seen {
            self.observed.insert(address, state);
        }
    }
}

#[async_trait]
impl PollingOp for PollNodeStateOp {
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
        let hosts = self.queried_hosts().to_vec();
        self.base.setup_request_collection(&hosts);
        let request = self.base.https_request(HttpMethod::Get, "nodes");
        self.base.register_on_all(|_| request.clone());
        Ok(())
    }

    fn should_stop_polling(&mut self, _ctx: &mut ExecContext) -> Result<bool> {
        self.record_observations();
        Ok(self.reached_count() == self.target_hosts.len())
    }

    fn progress_message(&self) -> String {
        let up = self.reached_count();
        let state_names: Vec<&str> = self.allowed_states.iter().map(|s| s.display_name()).collect();
        format!(
            "{up} host(s) {}, expecting {}",
            state_names.join(" or "),
            self.target_hosts.len()
        )
    }

    fn timeout_error(&self) -> OpsError {
        let missing: Vec<&str> = self
            .target_hosts
            .iter()
            .filter(|h| {
                !self
                    .observed
                    .get(*h)
                    .is_some_and(|s| self.allowed_states.contains(s))
            })
            .map(|h| h.as_str())
            .collect();
        OpsError::Timeout {
            host: format!(
                "[{}] hosts did not reach the expected state in time: {}",
                self.base.name,
                missing.join(", ")
            ),
        }
    }
}

#[async_trait]
impl ClusterOp for PollNodeStateOp {
    fn base(&self) -> &OpBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut OpBase {
        &mut self.base
    }

    async fn prepare(&mut self, ctx: &mut ExecContext) -> Result<()> {
        if self.target_hosts.is_empty() {
            self.base.skip = true;
            return Ok(());
        }
        if self.mode == PollMode::Indirect {
            // Indirect mode is only as good as its observers.
            let vdb = ctx.vdb()?;
            let has_primary_up = self
                .observer_hosts
                .iter()
                .any(|h| vdb.node(h).is_some_and(|n| n.is_primary && n.state == NodeState::Up));
            if !has_primary_up {
                return Err(OpsError::Precondition(NO_PRIMARY_UP_OBSERVER.into()));
            }
        }
        Ok(())
    }

    async fn execute(&mut self, ctx: &mut ExecContext) -> Result<()> {
        debug!(op = self.base.name, targets = self.target_hosts.len(), "polling node state");
        run_polling(self, ctx).await?;
        if self.emit_permanent_subset {
            let permanent: Vec<String> = self
                .target_hosts
                .iter()
                .filter(|h| self.observed.get(*h) != Some(&NodeState::Compute))
                .cloned()
                .collect();
            ctx.set_permanent_hosts(permanent);
        }
        Ok(())
    }
}
