//! Workflow composers
//!
//! One public async function per command. Each composer validates and
//! analyzes its options, optionally retrieves a coordination database
//! snapshot, produces an ordered instruction list through a pure
//! `produce_*_instructions` function, and hands the list to the engine.

pub mod config;
pub mod connections;
pub mod create_db;
pub mod drop_db;
pub mod fetch;
pub mod license;
pub mod nodes;
pub mod online_upgrade;
pub mod packages;
pub mod replication;
pub mod restore;
pub mod sandbox;
pub mod scrutinize;
pub mod start_db;
pub mod stop_db;
pub mod subclusters;

use crate::client::{AgentClient, DEFAULT_HTTPS_PORT, DEFAULT_NMA_PORT, DEFAULT_REQUEST_TIMEOUT};
use crate::cmd::CmdType;
use crate::context::ExecContext;
use crate::credentials::{CredentialSet, TlsPolicy};
use crate::dispatch::Dispatcher;
use crate::error::{OpsError, Result};
use std::collections::BTreeSet;
use std::net::{IpAddr, ToSocketAddrs};
use std::time::Duration;
use tracing::debug;
use typed_builder::TypedBuilder;

/// Connection settings for the per-host agents. Defaults match a
/// production cluster; tests point them at local listeners.
#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub scheme: String,
    pub nma_port: u16,
    pub https_port: u16,
    pub request_timeout: Duration,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            scheme: "https".to_string(),
            nma_port: DEFAULT_NMA_PORT,
            https_port: DEFAULT_HTTPS_PORT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

/// Options shared by every command. Command-specific option types embed
/// this and forward validation to it.
#[derive(Debug, Clone, TypedBuilder)]
pub struct DatabaseOptions {
    #[builder(setter(into))]
    pub db_name: String,
    /// Hostnames or addresses as supplied by the caller.
    pub raw_hosts: Vec<String>,
    #[builder(default = true)]
    pub is_eon: bool,
    #[builder(default, setter(into))]
    pub catalog_prefix: String,
    #[builder(default, setter(into))]
    pub data_prefix: String,
    #[builder(default, setter(into))]
    pub depot_prefix: String,
    #[builder(default, setter(into))]
    pub communal_storage_location: String,
    #[builder(default, setter(strip_option))]
    pub credentials: Option<CredentialSet>,
    #[builder(default)]
    pub tls_policy: TlsPolicy,
    #[builder(default)]
    pub client_settings: ClientSettings,
    /// Resolved addresses; filled by `analyze`, frozen afterwards.
    #[builder(default)]
    pub hosts: Vec<String>,
}

impl DatabaseOptions {
    /// Required/typed checks that need no network access.
    pub fn validate_parse(&self, cmd: CmdType) -> Result<()> {
        if self.db_name.is_empty() {
            return Err(OpsError::Validation(format!(
                "database name must not be empty for {cmd}"
            )));
        }
        if !self
            .db_name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(OpsError::Validation(format!(
                "database name \"{}\" contains invalid characters",
                self.db_name
            )));
        }
        if self.raw_hosts.is_empty() {
            return Err(OpsError::Validation(format!(
                "at least one host is required for {cmd}"
            )));
        }
        for prefix in [&self.catalog_prefix, &self.data_prefix, &self.depot_prefix] {
            if !prefix.is_empty() && !prefix.starts_with('/') {
                return Err(OpsError::Validation(format!(
                    "path prefix \"{prefix}\" must be an absolute path"
                )));
            }
        }
        match &self.credentials {
            Some(credentials) => credentials.validate(),
            None => Err(OpsError::Validation(
                "either a password or a certificate pair is required".into(),
            )),
        }
    }

    /// Resolve hostnames to addresses and normalize paths. Runs once;
    /// after this the options are treated as frozen.
    pub fn analyze(&mut self) -> Result<()> {
        self.hosts = resolve_raw_hosts(&self.raw_hosts)?;
        for prefix in [
            &mut self.catalog_prefix,
            &mut self.data_prefix,
            &mut self.depot_prefix,
        ] {
            while prefix.len() > 1 && prefix.ends_with('/') {
                prefix.pop();
            }
        }
        Ok(())
    }

    pub fn validate_analyze(&mut self, cmd: CmdType) -> Result<()> {
        self.validate_parse(cmd)?;
        self.analyze()
    }

    pub fn credentials(&self) -> Result<&CredentialSet> {
        self.credentials.as_ref().ok_or_else(|| {
            OpsError::Internal("credentials read before options validation".into())
        })
    }

    /// Build the HTTP client pool for one engine run.
    pub fn build_client(&self) -> Result<AgentClient> {
        let mut builder = AgentClient::builder()
            .scheme(self.client_settings.scheme.clone())
            .nma_port(self.client_settings.nma_port)
            .https_port(self.client_settings.https_port)
            .timeout(self.client_settings.request_timeout)
            .tls_policy(self.tls_policy);
        if let Some(credentials) = &self.credentials {
            builder = builder.credentials(credentials.clone());
        }
        builder.build()
    }

    /// Fresh execution context bound to this command's client pool.
    pub fn make_context(&self) -> Result<ExecContext> {
        Ok(ExecContext::new(Dispatcher::new(self.build_client()?)))
    }

    /// Database credentials for NMA endpoints that tunnel SQL. Only
    /// available with password authentication.
    pub fn sql_endpoint_data(&self) -> Result<crate::ops::nma_dc::SqlEndpointData> {
        match self.credentials()? {
            CredentialSet::Password { username, password } => {
                Ok(crate::ops::nma_dc::SqlEndpointData {
                    db_user: username.clone(),
                    db_password: password.clone(),
                    db_name: self.db_name.clone(),
                })
            }
            CredentialSet::Certificates(_) => Err(OpsError::Validation(
                "a database password is required for operations that execute SQL".into(),
            )),
        }
    }
}

/// Resolve raw host inputs to unique IP addresses, preserving order.
/// Resolving an already resolved address is the identity.
pub fn resolve_raw_hosts(raw_hosts: &[String]) -> Result<Vec<String>> {
    let mut resolved = Vec::with_capacity(raw_hosts.len());
    let mut seen = BTreeSet::new();
    for raw in raw_hosts {
        let address = resolve_one_host(raw)?;
        if seen.insert(address.clone()) {
            resolved.push(address);
        }
    }
    Ok(resolved)
}

fn resolve_one_host(raw: &str) -> Result<String> {
    if raw.is_empty() {
        return Err(OpsError::Validation("host must not be empty".into()));
    }
    if let Ok(ip) = raw.parse::<IpAddr>() {
        return Ok(ip.to_string());
    }
    let mut addrs = format!("{raw}:0").to_socket_addrs().map_err(|e| {
        OpsError::Validation(format!("cannot resolve host \"{raw}\": {e}"))
    })?;
    match addrs.next() {
        Some(addr) => {
            let ip = addr.ip().to_string();
            debug!(host = raw, %ip, "resolved host");
            Ok(ip)
        }
        None => Err(OpsError::Validation(format!(
            "host \"{raw}\" resolved to no address"
        ))),
    }
}

/// Validate a subcluster or sandbox name.
pub(crate) fn validate_object_name(name: &str, what: &str) -> Result<()> {
    if name.is_empty() {
        return Err(OpsError::Validation(format!("{what} name must not be empty")));
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(OpsError::Validation(format!(
            "{what} name \"{name}\" contains invalid characters"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_options() -> DatabaseOptions {
        DatabaseOptions::builder()
            .db_name("db")
            .raw_hosts(vec!["10.0.0.1".into(), "10.0.0.2".into()])
            .credentials(CredentialSet::password(Some("dbadmin".into()), "secret"))
            .build()
    }

    #[test]
    fn resolving_an_ip_is_identity() {
        let hosts = resolve_raw_hosts(&["10.0.0.1".to_string(), "fd00::1".to_string()]).unwrap();
        assert_eq!(hosts, vec!["10.0.0.1".to_string(), "fd00::1".to_string()]);
        // and is stable under re-resolution
        assert_eq!(resolve_raw_hosts(&hosts).unwrap(), hosts);
    }

    #[test]
    fn duplicate_hosts_are_deduplicated_in_order() {
        let hosts = resolve_raw_hosts(&[
            "10.0.0.2".to_string(),
            "10.0.0.1".to_string(),
            "10.0.0.2".to_string(),
        ])
        .unwrap();
        assert_eq!(hosts, vec!["10.0.0.2".to_string(), "10.0.0.1".to_string()]);
    }

    #[test]
    fn missing_credentials_fail_validation() {
        let mut opts = base_options();
        opts.credentials = None;
        let err = opts.validate_analyze(CmdType::StopDb).unwrap_err();
        assert!(err.is_validation());
        assert!(err.to_string().contains("password or a certificate"));
    }

    #[test]
    fn bad_db_name_fails_validation() {
        let mut opts = base_options();
        opts.db_name = "my db".into();
        assert!(opts.validate_analyze(CmdType::CreateDb).unwrap_err().is_validation());
    }

    #[test]
    fn relative_prefix_fails_validation() {
        let mut opts = base_options();
        opts.catalog_prefix = "cat/db".into();
        assert!(opts.validate_analyze(CmdType::CreateDb).unwrap_err().is_validation());
    }

    #[test]
    fn analyze_trims_trailing_slashes() {
        let mut opts = base_options();
        opts.catalog_prefix = "/cat/".into();
        opts.validate_analyze(CmdType::CreateDb).unwrap();
        assert_eq!(opts.catalog_prefix, "/cat");
        assert_eq!(opts.hosts.len(), 2);
    }

    #[test]
    fn object_name_validation() {
        validate_object_name("sc_one", "subcluster").unwrap();
        assert!(validate_object_name("", "sandbox").is_err());
        assert!(validate_object_name("bad name", "sandbox").is_err());
    }
}
