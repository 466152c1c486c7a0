//! Start a stopped database from its communal description

use crate::cmd::CmdType;
use crate::error::{OpsError, Result};
use crate::ops::ClusterOp;
use crate::ops::engine::ClusterOpEngine;
use crate::ops::https_cluster::HttpsSyncCatalogOp;
use crate::ops::nma_catalog::NmaReadCatalogEditorOp;
use crate::ops::nma_cluster::NmaStartNodeOp;
use crate::ops::poll::PollNodeStateOp;
use crate::vdb::{CoordinationDatabase, NodeState};
use crate::workflows::{DatabaseOptions, fetch};
use tracing::info;
use typed_builder::TypedBuilder;

#[derive(Debug, Clone, TypedBuilder)]
pub struct StartDbOptions {
    pub db: DatabaseOptions,
    /// Start only this sandbox instead of the main cluster.
    #[builder(default, setter(strip_option, into))]
    pub sandbox: Option<String>,
    /// Sync the catalog once the cluster is up.
    #[builder(default)]
    pub sync_catalog: bool,
}

impl StartDbOptions {
    pub fn validate_analyze(&mut self) -> Result<()> {
        let cmd = if self.sync_catalog {
            CmdType::StartDbSyncCat
        } else {
            CmdType::StartDb
        };
        self.db.validate_analyze(cmd)?;
        if !self.db.is_eon {
            return Err(OpsError::Precondition(
                "start database from the communal description requires Eon mode".into(),
            ));
        }
        if self.db.communal_storage_location.is_empty() {
            return Err(OpsError::Validation(
                "communal storage location is required to start the database".into(),
            ));
        }
        Ok(())
    }
}

pub fn produce_start_db_instructions(
    options: &StartDbOptions,
    start_hosts: &[String],
) -> Vec<Box<dyn ClusterOp>> {
    let mut instructions: Vec<Box<dyn ClusterOp>> = vec![
        Box::new(NmaReadCatalogEditorOp::new(
            start_hosts.to_vec(),
            options.db.db_name.clone(),
            options.db.catalog_prefix.clone(),
        )),
        Box::new(NmaStartNodeOp::new(
            start_hosts.to_vec(),
            options.db.db_name.clone(),
        )),
        Box::new(PollNodeStateOp::direct(
            start_hosts.to_vec(),
            vec![NodeState::Up],
        )),
    ];
    if options.sync_catalog {
        instructions.push(Box::new(HttpsSyncCatalogOp::new(vec![
            start_hosts[0].clone(),
        ])));
    }
    instructions
}

/// Start the database. The topology is read from the communal
/// description; only primary nodes own catalog there, and quorum over
/// primaries is checked before any start instruction runs.
pub async fn start_database(options: &mut StartDbOptions) -> Result<CoordinationDatabase> {
    options.validate_analyze()?;

    let scope = options
        .sandbox
        .clone()
        .unwrap_or_else(|| options.db.db_name.clone());
    let mut vdb = fetch::fetch_vdb_from_communal(&options.db, &scope).await?;
    vdb.filter_primary_nodes();

    let start_hosts = vdb.remove_hosts_not_in_catalog(&options.db.hosts);
    vdb.check_quorum(start_hosts.len())
        .map_err(|e| e.with_step("fail to start database"))?;

    let mut instructions = produce_start_db_instructions(options, &start_hosts);
    let mut ctx = options.db.make_context()?;
    let engine = match &options.sandbox {
        Some(sandbox) => {
            ClusterOpEngine::run_in_sandbox(options.db.credentials()?.clone(), sandbox.clone())
        }
        None => ClusterOpEngine::new(options.db.credentials()?.clone()),
    };
    engine
        .run_with_vdb(&mut instructions, &mut ctx, vdb)
        .await
        .map_err(|e| e.with_step("fail to start database"))?;

    info!(db = %options.db.db_name, hosts = start_hosts.len(), "database started");
    ctx.take_vdb()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::CredentialSet;
    use crate::vdb::VNode;

    fn vdb_with_primaries(count: usize) -> CoordinationDatabase {
        let mut vdb = CoordinationDatabase::new("db", true);
        for i in 0..count {
            vdb.add_node(VNode {
                name: format!("v_db_node{:04}", i + 1),
                address: format!("10.0.0.{}", i + 1),
                catalog_path: "/cat".into(),
                data_path: "/dat".into(),
                depot_path: "/dep".into(),
                subcluster: "default_subcluster".into(),
                sandbox: String::new(),
                is_primary: true,
                is_compute: false,
                state: NodeState::Down,
                version: String::new(),
            });
        }
        vdb
    }

    #[test]
    fn below_quorum_is_rejected_before_start() {
        let vdb = vdb_with_primaries(5);
        let provided = vec!["10.0.0.1".to_string(), "10.0.0.2".to_string()];
        let reachable = vdb.remove_hosts_not_in_catalog(&provided);
        let err = vdb.check_quorum(reachable.len()).unwrap_err();
        assert!(err.is_quorum());
    }

    #[test]
    fn start_instructions_read_catalog_before_starting() {
        let mut opts = StartDbOptions::builder()
            .db(DatabaseOptions::builder()
                .db_name("db")
                .raw_hosts(vec!["10.0.0.1".into()])
                .communal_storage_location("s3://b/db")
                .catalog_prefix("/cat")
                .credentials(CredentialSet::password(None, "pw"))
                .build())
            .build();
        opts.validate_analyze().unwrap();
        let hosts = vec!["10.0.0.1".to_string()];
        let instructions = produce_start_db_instructions(&opts, &hosts);
        let names: Vec<&str> = instructions.iter().map(|op| op.name()).collect();
        assert_eq!(
            names,
            vec!["NMAReadCatalogEditorOp", "NMAStartNodeOp", "HTTPSPollNodeStateOp"]
        );
    }
}
