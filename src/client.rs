//! HTTP client pool for the per-host agents
//!
//! One [`AgentClient`] serves a whole engine run. It owns two reqwest
//! clients: one for the NMA and one for the HTTPS catalog service, each
//! built with the TLS posture the command's credential set and policy call
//! for. Requests are described by [`HostRequest`] records and produce
//! [`HostResult`] records; the client never panics on transport failures.

use crate::credentials::{CredentialSet, TlsPolicy};
use crate::error::{OpsError, Result};
use crate::request::{AgentService, FailureKind, HostRequest, HostResult, HttpMethod};
use reqwest::{Client, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

/// Default per-request timeout; polling operations override it.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Default service ports inside the cluster network.
pub const DEFAULT_NMA_PORT: u16 = 5554;
pub const DEFAULT_HTTPS_PORT: u16 = 8443;

/// Builder for [`AgentClient`]
#[derive(Debug, Clone)]
pub struct AgentClientBuilder {
    scheme: String,
    nma_port: u16,
    https_port: u16,
    timeout: Duration,
    tls_policy: TlsPolicy,
    credentials: Option<CredentialSet>,
}

impl Default for AgentClientBuilder {
    fn default() -> Self {
        Self {
            scheme: "https".to_string(),
            nma_port: DEFAULT_NMA_PORT,
            https_port: DEFAULT_HTTPS_PORT,
            timeout: DEFAULT_REQUEST_TIMEOUT,
            tls_policy: TlsPolicy::default(),
            credentials: None,
        }
    }
}

impl AgentClientBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// URL scheme for both agents. `https` in production; tests run the
    /// agents behind plain HTTP listeners.
    pub fn scheme(mut self, scheme: impl Into<String>) -> Self {
        self.scheme = scheme.into();
        self
    }

    pub fn nma_port(mut self, port: u16) -> Self {
        self.nma_port = port;
        self
    }

    pub fn https_port(mut self, port: u16) -> Self {
        self.https_port = port;
        self
    }

    /// Default per-request timeout; individual requests may override.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn tls_policy(mut self, policy: TlsPolicy) -> Self {
        self.tls_policy = policy;
        self
    }

    /// Credential set applied to outgoing requests. Certificates become a
    /// client identity on both agents; a password is only attached to
    /// catalog-service requests that carry a username.
    pub fn credentials(mut self, credentials: CredentialSet) -> Self {
        self.credentials = Some(credentials);
        self
    }

    fn build_inner(&self, verify_cert: bool) -> Result<Client> {
        let mut builder = Client::builder()
            .timeout(self.timeout)
            .danger_accept_invalid_certs(!verify_cert);

        if let Some(CredentialSet::Certificates(bundle)) = &self.credentials {
            let mut identity_pem =
                Vec::with_capacity(bundle.key_pem.len() + bundle.cert_pem.len());
            identity_pem.extend_from_slice(&bundle.key_pem);
            identity_pem.extend_from_slice(&bundle.cert_pem);
            let identity = reqwest::Identity::from_pem(&identity_pem)
                .map_err(|e| OpsError::Validation(format!("invalid client identity: {e}")))?;
            builder = builder.identity(identity);

            if !bundle.ca_cert_pem.is_empty() {
                let ca = reqwest::Certificate::from_pem(&bundle.ca_cert_pem)
                    .map_err(|e| OpsError::Validation(format!("invalid CA certificate: {e}")))?;
                builder = builder.add_root_certificate(ca);
            }
        }

        builder
            .build()
            .map_err(|e| OpsError::Connection(e.to_string()))
    }

    pub fn build(self) -> Result<AgentClient> {
        let nma = self.build_inner(self.tls_policy.verify_nma_cert)?;
        let https = self.build_inner(self.tls_policy.verify_https_cert)?;
        Ok(AgentClient {
            inner: Arc::new(AgentClientInner {
                scheme: self.scheme,
                nma_port: self.nma_port,
                https_port: self.https_port,
                timeout: self.timeout,
                nma,
                https,
            }),
        })
    }
}

struct AgentClientInner {
    scheme: String,
    nma_port: u16,
    https_port: u16,
    timeout: Duration,
    nma: Client,
    https: Client,
}

/// TLS/mTLS-capable HTTP client for both per-host agents.
#[derive(Clone)]
pub struct AgentClient {
    inner: Arc<AgentClientInner>,
}

impl AgentClient {
    pub fn builder() -> AgentClientBuilder {
        AgentClientBuilder::new()
    }

    pub fn default_timeout(&self) -> Duration {
        self.inner.timeout
    }

    fn url(&self, host: &str, service: AgentService, endpoint: &str) -> String {
        let port = match service {
            AgentService::Nma => self.inner.nma_port,
            AgentService::CatalogService => self.inner.https_port,
        };
        let endpoint = endpoint.trim_start_matches('/');
        // IPv6 addresses need bracketing in the authority.
        if host.contains(':') && !host.starts_with('[') {
            format!("{}://[{host}]:{port}/v1/{endpoint}", self.inner.scheme)
        } else {
            format!("{}://{host}:{port}/v1/{endpoint}", self.inner.scheme)
        }
    }

    /// Issue one request against one host. Transport failures and non-2xx
    /// statuses are recorded in the result, never raised.
    pub async fn issue(&self, host: &str, request: &HostRequest) -> HostResult {
        let url = self.url(host, request.service, &request.endpoint);
        debug!(%url, method = ?request.method, "issuing request");

        let client = match request.service {
            AgentService::Nma => &self.inner.nma,
            AgentService::CatalogService => &self.inner.https,
        };

        let mut builder = match request.method {
            HttpMethod::Get => client.get(&url),
            HttpMethod::Post => client.post(&url),
        };
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        if let Some(username) = &request.username {
            builder = builder.basic_auth(username, request.password.as_deref());
        }
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }

        let response = match builder.send().await {
            Ok(response) => response,
            Err(err) => return self.record_transport_failure(host, &url, err),
        };

        let status = response.status();
        trace!(%url, status = status.as_u16(), "response received");
        let body = response.text().await.unwrap_or_default();

        if status.is_success() {
            HostResult::success(host, status.as_u16(), body)
        } else if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            HostResult::failed(
                host,
                status.as_u16(),
                body,
                FailureKind::Authentication(format!("credential rejected with HTTP {status}")),
            )
        } else {
            let message = if body.is_empty() {
                format!("HTTP {status}")
            } else {
                body.clone()
            };
            HostResult::failed(
                host,
                status.as_u16(),
                body,
                FailureKind::Remote {
                    code: status.as_u16(),
                    message,
                },
            )
        }
    }

    fn record_transport_failure(&self, host: &str, url: &str, err: reqwest::Error) -> HostResult {
        let failure = if err.is_timeout() {
            FailureKind::TimedOut
        } else if err.is_connect() {
            let detail = err.to_string();
            // rustls surfaces a failed certificate exchange as a connect
            // error; callers must classify it as an auth failure.
            if detail.contains("certificate") {
                FailureKind::Authentication(detail)
            } else {
                FailureKind::Unreachable(format!("connection to {url} refused or host down"))
            }
        } else {
            FailureKind::Unreachable(format!("request to {url} failed: {err}"))
        };
        HostResult::failed(host, 0, String::new(), failure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_shapes_for_both_services() {
        let client = AgentClient::builder().build().unwrap();
        assert_eq!(
            client.url("10.0.0.1", AgentService::Nma, "health"),
            "https://10.0.0.1:5554/v1/health"
        );
        assert_eq!(
            client.url("10.0.0.1", AgentService::CatalogService, "/nodes"),
            "https://10.0.0.1:8443/v1/nodes"
        );
    }

    #[test]
    fn ipv6_hosts_are_bracketed() {
        let client = AgentClient::builder().build().unwrap();
        assert_eq!(
            client.url("fd00::1", AgentService::Nma, "health"),
            "https://[fd00::1]:5554/v1/health"
        );
    }
}
