//! Cluster operations
//!
//! Every administrative step is an operation with a uniform
//! prepare/execute/finalize lifecycle. `prepare` reads the execution
//! context, decides target hosts and payloads, and registers per-host
//! requests; `execute` drives the dispatcher and interprets the result
//! collection; `finalize` is bookkeeping and must not fail the pipeline on
//! normal paths.

pub mod engine;
pub mod https_cluster;
pub mod https_connections;
pub mod https_replication;
pub mod https_restore;
pub mod https_subcluster;
pub mod nma_catalog;
pub mod nma_cluster;
pub mod nma_dc;
pub mod nma_files;
pub mod poll;

use crate::cmd::CmdType;
use crate::context::ExecContext;
use crate::credentials::CredentialSet;
use crate::error::{OpsError, Result};
use crate::request::{AgentService, HostRequest, HostResult, HostResults, HttpMethod};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::time::Duration;

/// How the operation authenticates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    /// Node Management Agent; unauthenticated over the cluster network
    /// (mTLS handled at the client level).
    Nma,
    /// HTTPS catalog service; password or client certificate injected by
    /// the engine before `prepare`.
    Https,
}

/// How many hosts an operation must reach to succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    /// Meaningful against any one reachable host; dispatched to a single
    /// initiator.
    ClusterWide,
    /// Must run on each target host; per-host errors are joined.
    PerHost,
    /// Issued to several hosts for availability; the first success wins.
    QuorumOne,
}

/// Shared fields of every operation.
#[derive(Debug)]
pub struct OpBase {
    pub name: &'static str,
    pub description: String,
    pub hosts: Vec<String>,
    pub skip: bool,
    pub auth: AuthMode,
    pub cardinality: Cardinality,
    /// Set when the HTTPS credential is a password.
    pub use_password: bool,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Some endpoints key behavior by the issuing command.
    pub cmd: Option<CmdType>,
    pub timeout: Option<Duration>,
    requests: BTreeMap<String, HostRequest>,
    pub results: HostResults,
}

impl OpBase {
    pub fn new(
        name: &'static str,
        description: impl Into<String>,
        auth: AuthMode,
        cardinality: Cardinality,
    ) -> Self {
        Self {
            name,
            description: description.into(),
            hosts: Vec::new(),
            skip: false,
            auth,
            cardinality,
            use_password: false,
            username: None,
            password: None,
            cmd: None,
            timeout: None,
            requests: BTreeMap::new(),
            results: HostResults::default(),
        }
    }

    pub fn with_cmd(mut self, cmd: CmdType) -> Self {
        self.cmd = Some(cmd);
        self
    }

    /// Initialize the request collection for the given target hosts.
    pub fn setup_request_collection(&mut self, hosts: &[String]) {
        self.hosts = hosts.to_vec();
        self.requests.clear();
        self.results = HostResults::default();
    }

    pub fn register(&mut self, host: &str, request: HostRequest) {
        self.requests.insert(host.to_string(), request);
    }

    pub fn requests(&self) -> &BTreeMap<String, HostRequest> {
        &self.requests
    }

    /// Register the same request shape on every target host.
    pub fn register_on_all(&mut self, build: impl Fn(&str) -> HostRequest) {
        for host in self.hosts.clone() {
            let request = build(&host);
            self.register(&host, request);
        }
    }

    /// Fan the registered requests out and store the result collection.
    pub async fn run_execute(&mut self, ctx: &ExecContext) -> Result<()> {
        self.results = ctx.dispatcher().fan_out(&self.requests).await;
        Ok(())
    }

    /// Interpret results according to the operation's cardinality.
    /// Returns the winning result for single-answer cardinalities.
    pub fn check_results(&self) -> Result<Option<&HostResult>> {
        match self.cardinality {
            Cardinality::PerHost => {
                self.results.require_all(self.name)?;
                Ok(None)
            }
            Cardinality::ClusterWide | Cardinality::QuorumOne => {
                let winner = self.results.require_any(self.name)?;
                Ok(Some(winner))
            }
        }
    }

    /// Winning result of a cluster-wide or quorum-one operation. The
    /// cardinality contract guarantees one exists whenever
    /// `check_results` succeeds; per-host operations have no single
    /// winner and must not call this.
    pub fn winning_result(&self) -> Result<&HostResult> {
        match self.check_results()? {
            Some(winner) => Ok(winner),
            None => Err(OpsError::Internal(format!(
                "[{}] per-host operation has no single winning result",
                self.name
            ))),
        }
    }

    /// Base request targeting the catalog service, carrying the op's
    /// basic-auth identity when a password credential was applied.
    pub fn https_request(&self, method: HttpMethod, endpoint: impl Into<String>) -> HostRequest {
        let mut request = HostRequest::builder()
            .service(AgentService::CatalogService)
            .method(method)
            .endpoint(endpoint.into())
            .build();
        request.timeout = self.timeout;
        if self.use_password {
            request.username = self.username.clone();
            request.password = self.password.clone();
        }
        request
    }

    pub fn nma_request(&self, method: HttpMethod, endpoint: impl Into<String>) -> HostRequest {
        let mut request = HostRequest::builder()
            .service(AgentService::Nma)
            .method(method)
            .endpoint(endpoint.into())
            .build();
        request.timeout = self.timeout;
        request
    }

    /// Inject the command's credential bundle. Only HTTPS operations
    /// consume a password; certificate material lives in the client.
    pub fn apply_credentials(&mut self, credentials: &CredentialSet) {
        if self.auth != AuthMode::Https {
            return;
        }
        if let CredentialSet::Password { username, password } = credentials {
            self.use_password = true;
            self.username = Some(username.clone());
            self.password = Some(password.clone());
        }
    }
}

/// The operation lifecycle contract.
#[async_trait]
pub trait ClusterOp: Send + std::fmt::Debug {
    fn base(&self) -> &OpBase;
    fn base_mut(&mut self) -> &mut OpBase;

    fn name(&self) -> &'static str {
        self.base().name
    }

    fn description(&self) -> &str {
        &self.base().description
    }

    fn skipped(&self) -> bool {
        self.base().skip
    }

    /// Read context, decide targets and payloads, register requests. May
    /// set the skip flag when there is nothing to do.
    async fn prepare(&mut self, ctx: &mut ExecContext) -> Result<()>;

    /// Issue the registered requests and interpret the result collection.
    async fn execute(&mut self, ctx: &mut ExecContext) -> Result<()>;

    /// Bookkeeping; failures here are logged, not propagated.
    async fn finalize(&mut self, _ctx: &mut ExecContext) -> Result<()> {
        Ok(())
    }
}

/// Pick the initiator for an operation that needs the freshest catalog: a
/// primary host among those ranked as carrying the latest catalog.
pub fn primary_host_with_latest_catalog(ctx: &ExecContext) -> Result<String> {
    let latest = ctx.hosts_with_latest_catalog()?;
    let vdb = ctx.vdb()?;
    latest
        .iter()
        .find(|h| vdb.node(h).is_some_and(|n| n.is_primary))
        .cloned()
        .ok_or_else(|| {
            OpsError::Precondition(
                "no primary host with the latest catalog is available".into(),
            )
        })
}
