//! Execution context
//!
//! The shared, strongly typed scratchpad passed through one engine run.
//! One operation writes a slot; later operations read it to choose their
//! initiators and payloads. Reading a slot no operation has populated is a
//! programming error and surfaces as a fatal failure.

use crate::dispatch::Dispatcher;
use crate::error::{OpsError, Result};
use crate::ops::https_cluster::{NodeDetails, PackageStatus};
use crate::ops::https_connections::DrainingStatus;
use crate::ops::https_restore::RestorePoint;
use crate::ops::nma_cluster::NetworkProfile;
use crate::ops::nma_files::ClusterConfig;
use crate::progress::{SharedProgress, default_progress};
use crate::vdb::{CoordinationDatabase, NmaVDatabase};
use serde_json::Value;
use std::collections::BTreeMap;

/// Generates the read accessor / write accessor pair for one typed slot.
macro_rules! slot {
    ($(#[$meta:meta])* $name:ident, $setter:ident, $ty:ty) => {
        $(#[$meta])*
        pub fn $name(&self) -> Result<&$ty> {
            self.$name.as_ref().ok_or_else(|| {
                OpsError::Internal(format!(
                    "context slot '{}' read before any operation populated it",
                    stringify!($name)
                ))
            })
        }

        pub fn $setter(&mut self, value: $ty) {
            self.$name = Some(value);
        }
    };
}

pub struct ExecContext {
    dispatcher: Dispatcher,
    progress: SharedProgress,
    /// Sandbox scope seeded by `run_in_sandbox`; `None` means unscoped.
    sandbox: Option<String>,
    vdb: Option<CoordinationDatabase>,
    up_hosts: Option<Vec<String>>,
    hosts_with_latest_catalog: Option<Vec<String>>,
    nma_vdatabase: Option<NmaVDatabase>,
    sc_nodes_info: Option<Vec<NodeDetails>>,
    network_profiles: Option<BTreeMap<String, NetworkProfile>>,
    staging_dir: Option<String>,
    dc_session_starts: Option<Vec<Value>>,
    dc_missing_releases: Option<Vec<Value>>,
    /// Non-compute subset emitted by a poll over a mixed node set.
    permanent_hosts: Option<Vec<String>>,
    nodes_details: Option<Vec<NodeDetails>>,
    restore_points: Option<Vec<RestorePoint>>,
    draining_statuses: Option<Vec<DrainingStatus>>,
    cluster_config: Option<ClusterConfig>,
    package_statuses: Option<Vec<PackageStatus>>,
}

impl ExecContext {
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self {
            dispatcher,
            progress: default_progress(),
            sandbox: None,
            vdb: None,
            up_hosts: None,
            hosts_with_latest_catalog: None,
            nma_vdatabase: None,
            sc_nodes_info: None,
            network_profiles: None,
            staging_dir: None,
            dc_session_starts: None,
            dc_missing_releases: None,
            permanent_hosts: None,
            nodes_details: None,
            restore_points: None,
            draining_statuses: None,
            cluster_config: None,
            package_statuses: None,
        }
    }

    pub fn with_progress(mut self, progress: SharedProgress) -> Self {
        self.progress = progress;
        self
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn progress(&self) -> &SharedProgress {
        &self.progress
    }

    /// Sandbox filter for the current run; `None` when unscoped.
    pub fn sandbox(&self) -> Option<&str> {
        self.sandbox.as_deref()
    }

    pub fn set_sandbox(&mut self, sandbox: impl Into<String>) {
        self.sandbox = Some(sandbox.into());
    }

    slot!(
        /// Coordination database snapshot for this run.
        vdb, set_vdb, CoordinationDatabase
    );
    slot!(up_hosts, set_up_hosts, Vec<String>);
    slot!(
        /// Hosts ranked as carrying the most recent catalog.
        hosts_with_latest_catalog, set_hosts_with_latest_catalog, Vec<String>
    );
    slot!(nma_vdatabase, set_nma_vdatabase, NmaVDatabase);
    slot!(sc_nodes_info, set_sc_nodes_info, Vec<NodeDetails>);
    slot!(network_profiles, set_network_profiles, BTreeMap<String, NetworkProfile>);
    slot!(
        /// Staging directory created by the scrutinize prepare ops.
        staging_dir, set_staging_dir, String
    );
    slot!(dc_session_starts, set_dc_session_starts, Vec<Value>);
    slot!(dc_missing_releases, set_dc_missing_releases, Vec<Value>);
    slot!(permanent_hosts, set_permanent_hosts, Vec<String>);
    slot!(nodes_details, set_nodes_details, Vec<NodeDetails>);
    slot!(restore_points, set_restore_points, Vec<RestorePoint>);
    slot!(draining_statuses, set_draining_statuses, Vec<DrainingStatus>);
    slot!(cluster_config, set_cluster_config, ClusterConfig);
    slot!(package_statuses, set_package_statuses, Vec<PackageStatus>);

    /// Mutable access to the vdb for the fetch pipeline that builds it.
    pub fn vdb_mut(&mut self) -> Result<&mut CoordinationDatabase> {
        self.vdb.as_mut().ok_or_else(|| {
            OpsError::Internal("context slot 'vdb' read before any operation populated it".into())
        })
    }

    pub fn take_vdb(&mut self) -> Result<CoordinationDatabase> {
        self.vdb.take().ok_or_else(|| {
            OpsError::Internal("context slot 'vdb' read before any operation populated it".into())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::AgentClient;

    fn context() -> ExecContext {
        let client = AgentClient::builder().build().unwrap();
        ExecContext::new(Dispatcher::new(client))
    }

    #[test]
    fn unpopulated_slot_is_a_fatal_internal_error() {
        let ctx = context();
        let err = ctx.up_hosts().unwrap_err();
        match err {
            OpsError::Internal(msg) => assert!(msg.contains("up_hosts")),
            other => panic!("expected Internal, got {other}"),
        }
    }

    #[test]
    fn populated_slot_reads_back() {
        let mut ctx = context();
        ctx.set_up_hosts(vec!["10.0.0.1".into()]);
        assert_eq!(ctx.up_hosts().unwrap(), &vec!["10.0.0.1".to_string()]);
    }

    #[test]
    fn sandbox_scope_defaults_to_unscoped() {
        let mut ctx = context();
        assert!(ctx.sandbox().is_none());
        ctx.set_sandbox("sand1");
        assert_eq!(ctx.sandbox(), Some("sand1"));
    }
}
