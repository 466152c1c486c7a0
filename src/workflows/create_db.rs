//! Create a new Eon-mode database

use crate::cmd::CmdType;
use crate::error::{OpsError, Result};
use crate::ops::ClusterOp;
use crate::ops::engine::ClusterOpEngine;
use crate::ops::https_cluster::{HttpsInstallPackagesOp, HttpsSyncCatalogOp};
use crate::ops::nma_catalog::{
    NmaBootstrapCatalogOp, NmaReadCatalogEditorOp, NmaSpreadSecurityOp, SpreadKey,
};
use crate::ops::nma_cluster::{NmaHealthOp, NmaNetworkProfileOp, NmaStartNodeOp};
use crate::ops::poll::PollNodeStateOp;
use crate::vdb::{CoordinationDatabase, NodeState, VNode};
use crate::workflows::DatabaseOptions;
use tracing::info;
use typed_builder::TypedBuilder;

#[derive(Debug, Clone, TypedBuilder)]
pub struct CreateDbOptions {
    pub db: DatabaseOptions,
    #[builder(default = 6)]
    pub shard_count: u32,
    #[builder(default)]
    pub skip_package_install: bool,
    /// Sync the new catalog to communal storage before returning.
    #[builder(default = true)]
    pub sync_catalog: bool,
}

impl CreateDbOptions {
    pub fn validate_analyze(&mut self) -> Result<()> {
        let cmd = if self.sync_catalog {
            CmdType::CreateDbSyncCat
        } else {
            CmdType::CreateDb
        };
        self.db.validate_analyze(cmd)?;
        if !self.db.is_eon {
            return Err(OpsError::Precondition(
                "create database requires Eon mode".into(),
            ));
        }
        if self.db.communal_storage_location.is_empty() {
            return Err(OpsError::Validation(
                "communal storage location is required to create an Eon database".into(),
            ));
        }
        for (what, prefix) in [
            ("catalog", &self.db.catalog_prefix),
            ("data", &self.db.data_prefix),
            ("depot", &self.db.depot_prefix),
        ] {
            if prefix.is_empty() {
                return Err(OpsError::Validation(format!(
                    "{what} prefix is required to create a database"
                )));
            }
        }
        if self.shard_count == 0 {
            return Err(OpsError::Validation("shard count must be positive".into()));
        }
        Ok(())
    }
}

/// Plan the topology of the new database: one primary node per host in
/// the default subcluster, with standard node naming.
pub fn plan_topology(options: &CreateDbOptions) -> CoordinationDatabase {
    let db = &options.db;
    let mut vdb = CoordinationDatabase::new(db.db_name.clone(), true);
    vdb.communal_storage_location = db.communal_storage_location.clone();
    for (index, host) in db.hosts.iter().enumerate() {
        let name = format!("v_{}_node{:04}", db.db_name, index + 1);
        vdb.add_node(VNode {
            catalog_path: format!("{}/{}/{}_catalog", db.catalog_prefix, db.db_name, name),
            data_path: format!("{}/{}", db.data_prefix, db.db_name),
            depot_path: format!("{}/{}", db.depot_prefix, db.db_name),
            name,
            address: host.clone(),
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

pub fn produce_create_db_instructions(options: &CreateDbOptions) -> Vec<Box<dyn ClusterOp>> {
    let db = &options.db;
    let hosts = db.hosts.clone();
    let initiator = vec![hosts[0].clone()];

    let mut instructions: Vec<Box<dyn ClusterOp>> = vec![
        Box::new(NmaHealthOp::new(hosts.clone())),
        Box::new(NmaNetworkProfileOp::new(hosts.clone())),
        Box::new(NmaBootstrapCatalogOp::new(
            hosts.clone(),
            db.db_name.clone(),
            db.catalog_prefix.clone(),
            db.data_prefix.clone(),
            db.depot_prefix.clone(),
            db.communal_storage_location.clone(),
            options.shard_count,
        )),
        // the key rotation picks its initiator from the catalog ranking
        Box::new(NmaReadCatalogEditorOp::new(
            hosts.clone(),
            db.db_name.clone(),
            db.catalog_prefix.clone(),
        )),
        Box::new(NmaSpreadSecurityOp::new(SpreadKey::generate())),
        Box::new(NmaStartNodeOp::new(hosts.clone(), db.db_name.clone())),
        Box::new(PollNodeStateOp::direct(hosts, vec![NodeState::Up])),
    ];
    if !options.skip_package_install {
        instructions.push(Box::new(HttpsInstallPackagesOp::new(initiator.clone(), false)));
    }
    if options.sync_catalog {
        instructions.push(Box::new(HttpsSyncCatalogOp::new(initiator)));
    }
    instructions
}

/// Create the database and return the planned topology snapshot.
pub async fn create_database(options: &mut CreateDbOptions) -> Result<CoordinationDatabase> {
    options.validate_analyze()?;
    let vdb = plan_topology(options);
    let mut instructions = produce_create_db_instructions(options);
    let mut ctx = options.db.make_context()?;
    let engine = ClusterOpEngine::new(options.db.credentials()?.clone());
    engine
        .run_with_vdb(&mut instructions, &mut ctx, vdb.clone())
        .await
        .map_err(|e| e.with_step("fail to create database"))?;
    info!(db = %options.db.db_name, nodes = vdb.host_list.len(), "database created");
    Ok(vdb)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::CredentialSet;

    fn options() -> CreateDbOptions {
        CreateDbOptions::builder()
            .db(DatabaseOptions::builder()
                .db_name("db")
                .raw_hosts(vec!["10.0.0.1".into(), "10.0.0.2".into(), "10.0.0.3".into()])
                .catalog_prefix("/cat")
                .data_prefix("/dat")
                .depot_prefix("/dep")
                .communal_storage_location("s3://b/db")
                .credentials(CredentialSet::password(Some("dbadmin".into()), "pw"))
                .build())
            .build()
    }

    #[test]
    fn instruction_list_starts_with_health_and_ends_with_sync() {
        let mut opts = options();
        opts.validate_analyze().unwrap();
        let instructions = produce_create_db_instructions(&opts);
        assert_eq!(instructions.first().unwrap().name(), "NMAHealthOp");
        assert_eq!(instructions.last().unwrap().name(), "HTTPSSyncCatalogOp");
    }

    #[test]
    fn spread_key_rotation_runs_between_bootstrap_and_start() {
        let mut opts = options();
        opts.validate_analyze().unwrap();
        let instructions = produce_create_db_instructions(&opts);
        let names: Vec<&str> = instructions.iter().map(|op| op.name()).collect();
        let bootstrap = names.iter().position(|n| *n == "NMABootstrapCatalogOp").unwrap();
        let ranking = names.iter().position(|n| *n == "NMAReadCatalogEditorOp").unwrap();
        let spread = names.iter().position(|n| *n == "NMASpreadSecurityOp").unwrap();
        let start = names.iter().position(|n| *n == "NMAStartNodeOp").unwrap();
        assert!(bootstrap < ranking && ranking < spread && spread < start);
    }

    #[test]
    fn planned_topology_uses_standard_node_names() {
        let mut opts = options();
        opts.validate_analyze().unwrap();
        let vdb = plan_topology(&opts);
        assert_eq!(vdb.host_list.len(), 3);
        let node = vdb.node("10.0.0.1").unwrap();
        assert_eq!(node.name, "v_db_node0001");
        assert_eq!(node.catalog_path, "/cat/db/v_db_node0001_catalog");
        assert!(node.is_primary);
        vdb.validate().unwrap();
    }

    #[test]
    fn missing_communal_location_fails() {
        let mut opts = options();
        opts.db.communal_storage_location.clear();
        assert!(opts.validate_analyze().unwrap_err().is_validation());
    }

    #[test]
    fn enterprise_mode_is_rejected() {
        let mut opts = options();
        opts.db.is_eon = false;
        match opts.validate_analyze().unwrap_err() {
            OpsError::Precondition(msg) => assert!(msg.contains("Eon")),
            other => panic!("expected Precondition, got {other}"),
        }
    }
}
