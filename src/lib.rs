//! Cluster administration library for Eon-mode analytic databases
//!
//! This crate drives administrative workflows against a distributed
//! analytic database by orchestrating HTTP calls to two per-host agents:
//! the Node Management Agent (NMA) and the authenticated HTTPS catalog
//! service. Create, start, stop and drop the database; add and remove
//! nodes and subclusters; sandbox, unsandbox and promote; drain client
//! connections; replicate; manage archives, restore points, licenses and
//! configuration; run the three-phase online upgrade.
//!
//! # Architecture
//!
//! Every command is an independent workflow built from the same pieces:
//!
//! - **Operations** ([`ops`]) share a prepare/execute/finalize lifecycle.
//!   `prepare` reads the [execution context](context::ExecContext) and
//!   registers per-host requests; `execute` fans them out in parallel and
//!   interprets the per-host results; `finalize` is bookkeeping.
//! - The **engine** ([`ops::engine::ClusterOpEngine`]) runs an ordered
//!   operation list, applies credentials, honors skip flags, and stops at
//!   the first failure.
//! - **Polling operations** ([`ops::poll`]) wrap long waits (nodes coming
//!   up, connections draining) with a wall-clock bound, transient-error
//!   tolerance, and immediate failure on authentication errors.
//! - The **coordination database** ([`vdb::CoordinationDatabase`]) is the
//!   in-memory topology snapshot workflows consult to pick initiators and
//!   check invariants such as primary-node quorum.
//! - **Composers** ([`workflows`]) validate options, fetch the snapshot
//!   (from the running database or from the communal description), build
//!   the instruction list, and run the engine.
//!
//! # Quick start
//!
//! ```no_run
//! use eon_ops::{CredentialSet, DatabaseOptions, StopDbOptions, stop_database};
//!
//! # async fn example() -> eon_ops::Result<()> {
//! let mut options = StopDbOptions::builder()
//!     .db(DatabaseOptions::builder()
//!         .db_name("verticadb")
//!         .raw_hosts(vec!["10.0.0.1".into(), "10.0.0.2".into(), "10.0.0.3".into()])
//!         .credentials(CredentialSet::password(Some("dbadmin".into()), "secret"))
//!         .build())
//!     .build();
//! stop_database(&mut options).await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Errors
//!
//! Every workflow returns [`OpsError`]. Validation failures surface
//! before any network traffic; authentication failures abort immediately,
//! even inside polling loops; per-host operations join their per-host
//! causes into one [`OpsError::PartialFailure`]. Composite workflows such
//! as the online upgrade spell out the manual remediation in the error
//! message. Secrets (passwords, TLS keys, the spread key) never appear in
//! errors or logs.

pub mod client;
pub mod cmd;
pub mod context;
pub mod credentials;
pub mod dispatch;
pub mod error;
pub mod ops;
pub mod progress;
pub mod request;
pub mod vdb;
pub mod workflows;

// Core types
pub use client::{AgentClient, AgentClientBuilder};
pub use cmd::CmdType;
pub use context::ExecContext;
pub use credentials::{CertificateBundle, CredentialSet, TlsPolicy};
pub use dispatch::Dispatcher;
pub use error::{OpsError, Result};
pub use progress::{ProgressSink, SharedProgress, TracingProgress};
pub use request::{AgentService, HostRequest, HostResult, HostResults, HttpMethod};
pub use vdb::{CoordinationDatabase, NmaVDatabase, NodeState, SubclusterStatus, VNode};

// Operation framework
pub use ops::engine::ClusterOpEngine;
pub use ops::{AuthMode, Cardinality, ClusterOp, OpBase};

// Workflow entry points and their options
pub use workflows::{ClientSettings, DatabaseOptions};

pub use workflows::create_db::{CreateDbOptions, create_database};
pub use workflows::drop_db::{DropDbOptions, drop_database};
pub use workflows::start_db::{StartDbOptions, start_database};
pub use workflows::stop_db::{StopDbOptions, stop_database};

pub use workflows::nodes::{
    AddNodeOptions, FetchNodesDetailsOptions, ReIpOptions, RemoveNodeOptions, RestartNodeOptions,
    StartNodeOptions, StopNodeOptions, add_node, fetch_nodes_details, re_ip, remove_node,
    restart_node, start_node, stop_node,
};

pub use workflows::subclusters::{
    AddSubclusterOptions, AlterSubclusterTypeOptions, PollSubclusterStateOptions,
    RemoveSubclusterOptions, RenameSubclusterOptions, StartSubclusterOptions,
    StopSubclusterOptions, add_subcluster, alter_subcluster_type, poll_subcluster_state,
    remove_subcluster, rename_subcluster, start_subcluster, stop_subcluster,
};

pub use workflows::sandbox::{
    PromoteSandboxOptions, SandboxSubclusterOptions, UnsandboxSubclusterOptions,
    promote_sandbox_to_main, sandbox_subcluster, unsandbox_subcluster,
};

pub use workflows::connections::{
    GetDrainingStatusOptions, ManageConnectionDrainingOptions, get_draining_status,
    manage_connection_draining,
};

pub use workflows::config::{
    ManageConfigRecoverOptions, SetConfigParamOptions, manage_config_recover,
    set_configuration_parameter,
};

pub use workflows::replication::{ReplicationStartOptions, replication_start};

pub use workflows::restore::{
    CreateArchiveOptions, SaveRestorePointOptions, ShowRestorePointsOptions, create_archive,
    save_restore_point, show_restore_points,
};

pub use workflows::license::{UpgradeLicenseOptions, upgrade_license};
pub use workflows::packages::{InstallPackagesOptions, install_packages};
pub use workflows::scrutinize::{ScrutinizeOptions, scrutinize};

pub use workflows::online_upgrade::{
    OnlineUpgradeOptions, online_upgrade_phase1, online_upgrade_phase2, online_upgrade_phase3,
};

// Frequently used operation response types
pub use ops::https_cluster::{NodeDetails, NodesInfoResponse, PackageStatus};
pub use ops::https_connections::{DrainingAction, DrainingStatus};
pub use ops::https_restore::{RestorePoint, RestorePointFilter};
