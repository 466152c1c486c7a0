//! Per-host request and result records
//!
//! An operation registers one [`HostRequest`] per target host; the
//! dispatcher fans them out and records one [`HostResult`] per host. No
//! request is ever silently dropped: every registered host is keyed in the
//! result collection, whether it succeeded, failed, or timed out.

use crate::error::{OpsError, Result};
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::time::Duration;
use typed_builder::TypedBuilder;

/// Which per-host agent a request targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentService {
    /// Node Management Agent, unauthenticated inside the cluster network.
    Nma,
    /// Authenticated HTTPS catalog service.
    CatalogService,
}

/// Methods are restricted to GET and POST across both agents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

/// A single request bound for one host.
#[derive(Debug, Clone, TypedBuilder)]
pub struct HostRequest {
    pub service: AgentService,
    pub method: HttpMethod,
    /// Path suffix after the `v1/` prefix, e.g. `"nodes"`.
    #[builder(setter(into))]
    pub endpoint: String,
    #[builder(default)]
    pub query: BTreeMap<String, String>,
    #[builder(default, setter(strip_option))]
    pub body: Option<serde_json::Value>,
    /// Overrides the client's default per-request timeout.
    #[builder(default, setter(strip_option))]
    pub timeout: Option<Duration>,
    /// Basic-auth identity for catalog-service requests.
    #[builder(default, setter(strip_option))]
    pub username: Option<String>,
    #[builder(default, setter(strip_option))]
    pub password: Option<String>,
}

/// Transport- or protocol-level failure recorded for one host.
#[derive(Debug, Clone)]
pub enum FailureKind {
    TimedOut,
    Unreachable(String),
    /// Rejected credentials or failed certificate validation.
    Authentication(String),
    Remote { code: u16, message: String },
}

/// Outcome of one request against one host.
#[derive(Debug, Clone)]
pub struct HostResult {
    pub host: String,
    /// HTTP status; 0 when the request never produced a response.
    pub status: u16,
    pub body: String,
    pub failure: Option<FailureKind>,
}

impl HostResult {
    pub fn success(host: impl Into<String>, status: u16, body: String) -> Self {
        Self {
            host: host.into(),
            status,
            body,
            failure: None,
        }
    }

    pub fn failed(host: impl Into<String>, status: u16, body: String, failure: FailureKind) -> Self {
        Self {
            host: host.into(),
            status,
            body,
            failure: Some(failure),
        }
    }

    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self.failure, Some(FailureKind::TimedOut))
    }

    /// True when the host rejected the password or the certificate
    /// exchange failed. Polling loops abort on this without waiting out
    /// their deadline.
    pub fn is_password_and_certificate_error(&self) -> bool {
        matches!(self.failure, Some(FailureKind::Authentication(_)))
    }

    pub fn is_unreachable(&self) -> bool {
        matches!(
            self.failure,
            Some(FailureKind::TimedOut) | Some(FailureKind::Unreachable(_))
        )
    }

    /// Convert the recorded failure into an [`OpsError`] tagged with the
    /// operation name. Returns `None` for successful results.
    pub fn to_error(&self, op: &str) -> Option<OpsError> {
        match &self.failure {
            None => None,
            Some(FailureKind::TimedOut) => Some(OpsError::Timeout {
                host: self.host.clone(),
            }),
            Some(FailureKind::Unreachable(detail)) => Some(OpsError::Unreachable {
                host: self.host.clone(),
                detail: detail.clone(),
            }),
            Some(FailureKind::Authentication(detail)) => Some(OpsError::Authentication {
                host: self.host.clone(),
                detail: format!("[{op}] {detail}"),
            }),
            Some(FailureKind::Remote { code, message }) => Some(OpsError::Remote {
                op: op.to_string(),
                host: self.host.clone(),
                code: *code,
                message: message.clone(),
            }),
        }
    }

    /// Deserialize the body into a typed structure, rejecting responses
    /// with missing required fields. The error names the offending field.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T> {
        let deserializer = &mut serde_json::Deserializer::from_str(&self.body);
        serde_path_to_error::deserialize(deserializer).map_err(|err| {
            OpsError::Parse(format!(
                "host {}: failed to deserialize field '{}': {}",
                self.host,
                err.path(),
                err.inner()
            ))
        })
    }

    /// Deserialize a body shaped as a flat string map.
    pub fn parse_map(&self) -> Result<BTreeMap<String, String>> {
        self.parse()
    }
}

/// Result collection for one operation, keyed by host.
#[derive(Debug, Clone, Default)]
pub struct HostResults {
    results: BTreeMap<String, HostResult>,
}

impl HostResults {
    pub fn insert(&mut self, result: HostResult) {
        self.results.insert(result.host.clone(), result);
    }

    pub fn get(&self, host: &str) -> Option<&HostResult> {
        self.results.get(host)
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &HostResult)> {
        self.results.iter()
    }

    pub fn hosts(&self) -> impl Iterator<Item = &String> {
        self.results.keys()
    }

    /// First successful result in host order, if any.
    pub fn first_success(&self) -> Option<&HostResult> {
        self.results.values().find(|r| r.is_success())
    }

    /// The first authentication failure, if any host reported one.
    pub fn auth_failure(&self) -> Option<&HostResult> {
        self.results
            .values()
            .find(|r| r.is_password_and_certificate_error())
    }

    pub fn success_count(&self) -> usize {
        self.results.values().filter(|r| r.is_success()).count()
    }

    /// Aggregate for a per-host operation: success only when every host
    /// passed; otherwise a joined error carrying each per-host cause. An
    /// authentication failure on any host dominates the aggregate.
    pub fn require_all(&self, op: &str) -> Result<()> {
        if let Some(auth) = self.auth_failure() {
            return Err(auth.to_error(op).unwrap_or_else(|| {
                OpsError::Internal(format!("[{op}] auth failure without recorded error"))
            }));
        }
        let failed: Vec<(String, OpsError)> = self
            .results
            .values()
            .filter_map(|r| r.to_error(op).map(|e| (r.host.clone(), e)))
            .collect();
        if failed.is_empty() {
            Ok(())
        } else {
            Err(OpsError::join_hosts(op, failed, self.results.len()))
        }
    }

    /// Aggregate for a quorum-one operation: the first success wins;
    /// failures on other hosts are recorded but do not fail the op.
    pub fn require_any(&self, op: &str) -> Result<&HostResult> {
        if let Some(auth) = self.auth_failure() {
            return Err(auth.to_error(op).unwrap_or_else(|| {
                OpsError::Internal(format!("[{op}] auth failure without recorded error"))
            }));
        }
        match self.first_success() {
            Some(result) => Ok(result),
            None => {
                let failed: Vec<(String, OpsError)> = self
                    .results
                    .values()
                    .filter_map(|r| r.to_error(op).map(|e| (r.host.clone(), e)))
                    .collect();
                Err(OpsError::join_hosts(op, failed, self.results.len()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    fn ok(host: &str, body: &str) -> HostResult {
        HostResult::success(host, 200, body.to_string())
    }

    fn timed_out(host: &str) -> HostResult {
        HostResult::failed(host, 0, String::new(), FailureKind::TimedOut)
    }

    #[test]
    fn require_all_joins_every_cause() {
        let mut results = HostResults::default();
        results.insert(ok("10.0.0.1", "{}"));
        results.insert(timed_out("10.0.0.2"));
        results.insert(HostResult::failed(
            "10.0.0.3",
            500,
            String::new(),
            FailureKind::Remote {
                code: 500,
                message: "internal".into(),
            },
        ));

        let err = results.require_all("NMAHealthOp").unwrap_err();
        match err {
            OpsError::PartialFailure { summary, causes } => {
                assert!(summary.contains("2 of 3"));
                assert_eq!(causes.len(), 2);
            }
            other => panic!("expected PartialFailure, got {other}"),
        }
    }

    #[test]
    fn require_any_short_circuits_on_auth() {
        let mut results = HostResults::default();
        results.insert(ok("10.0.0.1", "{}"));
        results.insert(HostResult::failed(
            "10.0.0.2",
            401,
            String::new(),
            FailureKind::Authentication("password rejected".into()),
        ));

        let err = results.require_any("HTTPSGetUpNodesOp").unwrap_err();
        assert!(err.is_authentication());
    }

    #[test]
    fn require_any_accepts_first_passing_host() {
        let mut results = HostResults::default();
        results.insert(timed_out("10.0.0.1"));
        results.insert(ok("10.0.0.2", r#"{"node_list":[]}"#));

        let winner = results.require_any("HTTPSGetUpNodesOp").unwrap();
        assert_eq!(winner.host, "10.0.0.2");
    }

    #[test]
    fn parse_map_reads_flat_string_maps() {
        let result = ok("10.0.0.1", r#"{"EnableSandboxing":"1","DepotSize":"80%"}"#);
        let map = result.parse_map().unwrap();
        assert_eq!(map.get("DepotSize").map(String::as_str), Some("80%"));
    }

    #[test]
    fn parse_names_missing_fields() {
        #[derive(Debug, Deserialize)]
        struct NodeRow {
            #[allow(dead_code)]
            name: String,
            #[allow(dead_code)]
            state: String,
        }

        let result = ok("10.0.0.1", r#"{"name":"v_db_node0001"}"#);
        let err = result.parse::<NodeRow>().unwrap_err();
        let rendered = err.to_string();
        assert!(rendered.contains("state"), "unexpected error: {rendered}");
    }
}
