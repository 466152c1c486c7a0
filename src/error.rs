//! Error types for cluster operations

use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum OpsError {
    /// Options failed validate/analyze; nothing has been sent to the cluster.
    #[error("Validation error: {0}")]
    Validation(String),

    /// TCP/TLS/HTTP level failure reaching a host.
    #[error("Host {host} is unreachable: {detail}")]
    Unreachable { host: String, detail: String },

    /// Credential rejected (401/403) or certificate validation failed.
    /// Always fatal; polling loops must not wait out their timeout on this.
    #[error("Authentication failed on host {host}: {detail}")]
    Authentication { host: String, detail: String },

    /// Cluster state does not permit the command (wrong mode, already
    /// running, type mismatch).
    #[error("Precondition not met: {0}")]
    Precondition(String),

    /// Fewer reachable primary nodes than the quorum threshold.
    #[error("Quorum not reachable: {reachable} of {primaries} primary node(s), need {required}")]
    Quorum {
        primaries: usize,
        reachable: usize,
        required: usize,
    },

    /// Endpoint returned a structured non-2xx error body.
    #[error("[{op}] host {host} returned: {message} (code: {code})")]
    Remote {
        op: String,
        host: String,
        code: u16,
        message: String,
    },

    /// Per-host operation where some hosts succeeded and others failed.
    /// Carries every per-host cause, already rendered.
    #[error("{summary}")]
    PartialFailure { summary: String, causes: Vec<String> },

    #[error("Request to host {host} timed out")]
    Timeout { host: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Connection error: {0}")]
    Connection(String),

    /// Programming error inside the pipeline, e.g. an operation read a
    /// context slot that no earlier operation produced.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for OpsError {
    fn from(err: serde_json::Error) -> Self {
        OpsError::Parse(err.to_string())
    }
}

impl OpsError {
    /// Check if this is an authentication error
    pub fn is_authentication(&self) -> bool {
        matches!(self, OpsError::Authentication { .. })
            || matches!(self, OpsError::Remote { code, .. } if *code == 401 || *code == 403)
    }

    /// Check if this is a quorum error
    pub fn is_quorum(&self) -> bool {
        matches!(self, OpsError::Quorum { .. })
    }

    /// Check if this is a timeout error
    pub fn is_timeout(&self) -> bool {
        matches!(self, OpsError::Timeout { .. })
    }

    /// Check if this is a host-unreachable error
    pub fn is_unreachable(&self) -> bool {
        matches!(self, OpsError::Unreachable { .. }) || self.is_timeout()
    }

    /// Check if this is a validation error
    pub fn is_validation(&self) -> bool {
        matches!(self, OpsError::Validation(_))
    }

    /// Prefix the error with a verb-phrase describing the workflow step
    /// that failed, preserving the classification of the cause.
    pub fn with_step(self, step: &str) -> OpsError {
        match self {
            OpsError::Validation(msg) => OpsError::Validation(format!("{step}: {msg}")),
            OpsError::Precondition(msg) => OpsError::Precondition(format!("{step}: {msg}")),
            OpsError::Parse(msg) => OpsError::Parse(format!("{step}: {msg}")),
            OpsError::Connection(msg) => OpsError::Connection(format!("{step}: {msg}")),
            OpsError::Internal(msg) => OpsError::Internal(format!("{step}: {msg}")),
            OpsError::Unreachable { host, detail } => OpsError::Unreachable {
                host,
                detail: format!("{step}: {detail}"),
            },
            OpsError::Authentication { host, detail } => OpsError::Authentication {
                host,
                detail: format!("{step}: {detail}"),
            },
            OpsError::Remote {
                op,
                host,
                code,
                message,
            } => OpsError::Remote {
                op: format!("{step}: {op}"),
                host,
                code,
                message,
            },
            OpsError::PartialFailure { summary, causes } => OpsError::PartialFailure {
                summary: format!("{step}: {summary}"),
                causes,
            },
            other @ (OpsError::Quorum { .. } | OpsError::Timeout { .. }) => other,
        }
    }

    /// Join per-host errors into a single `PartialFailure` preserving every
    /// per-host cause.
    pub fn join_hosts(op: &str, failed: Vec<(String, OpsError)>, total: usize) -> OpsError {
        let causes: Vec<String> = failed
            .iter()
            .map(|(host, err)| format!("{host}: {err}"))
            .collect();
        OpsError::PartialFailure {
            summary: format!("[{op}] {} of {total} host(s) failed", failed.len()),
            causes,
        }
    }
}

pub type Result<T> = std::result::Result<T, OpsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authentication_classifier_covers_remote_codes() {
        let err = OpsError::Remote {
            op: "HTTPSGetUpNodesOp".into(),
            host: "10.0.0.1".into(),
            code: 401,
            message: "bad password".into(),
        };
        assert!(err.is_authentication());

        let err = OpsError::Remote {
            op: "HTTPSGetUpNodesOp".into(),
            host: "10.0.0.1".into(),
            code: 500,
            message: "boom".into(),
        };
        assert!(!err.is_authentication());
    }

    #[test]
    fn join_hosts_preserves_causes() {
        let joined = OpsError::join_hosts(
            "NMAHealthOp",
            vec![
                (
                    "10.0.0.2".into(),
                    OpsError::Timeout {
                        host: "10.0.0.2".into(),
                    },
                ),
                ("10.0.0.3".into(), OpsError::Connection("refused".into())),
            ],
            5,
        );
        match joined {
            OpsError::PartialFailure { summary, causes } => {
                assert!(summary.contains("2 of 5"));
                assert_eq!(causes.len(), 2);
                assert!(causes[0].starts_with("10.0.0.2"));
            }
            other => panic!("expected PartialFailure, got {other}"),
        }
    }

    #[test]
    fn step_prefix_keeps_quorum_classification() {
        let err = OpsError::Quorum {
            primaries: 5,
            reachable: 2,
            required: 3,
        };
        let wrapped = err.with_step("fail to start database");
        assert!(wrapped.is_quorum());
    }
}
