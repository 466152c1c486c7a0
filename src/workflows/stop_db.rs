//! Stop a running database or one of its sandboxes

use crate::cmd::CmdType;
use crate::error::{OpsError, Result};
use crate::ops::ClusterOp;
use crate::ops::engine::ClusterOpEngine;
use crate::ops::https_cluster::HttpsStopDbOp;
use crate::vdb::{CoordinationDatabase, MAIN_CLUSTER};
use crate::workflows::{DatabaseOptions, fetch};
use tracing::info;
use typed_builder::TypedBuilder;

#[derive(Debug, Clone, TypedBuilder)]
pub struct StopDbOptions {
    pub db: DatabaseOptions,
    /// Stop only this sandbox instead of the whole cluster.
    #[builder(default, setter(strip_option, into))]
    pub sandbox: Option<String>,
    /// Seconds to wait for active connections before shutdown.
    #[builder(default, setter(strip_option))]
    pub drain_seconds: Option<u32>,
    /// Sync the catalog as part of shutdown.
    #[builder(default)]
    pub sync_catalog: bool,
}

impl StopDbOptions {
    pub fn validate_analyze(&mut self) -> Result<()> {
        let cmd = self.cmd();
        self.db.validate_analyze(cmd)
    }

    pub fn cmd(&self) -> CmdType {
        if self.sync_catalog {
            CmdType::StopDbSyncCat
        } else {
            CmdType::StopDb
        }
    }
}

pub fn produce_stop_db_instructions(
    options: &StopDbOptions,
    vdb: &CoordinationDatabase,
) -> Result<Vec<Box<dyn ClusterOp>>> {
    let scope = options.sandbox.as_deref().unwrap_or(MAIN_CLUSTER);
    let initiators = vdb.primary_up_hosts_in_sandbox(scope);
    let Some(initiator) = initiators.first() else {
        return Err(OpsError::Precondition(format!(
            "no primary UP node is available in {} to initiate shutdown",
            if scope.is_empty() { "the main cluster" } else { scope }
        )));
    };
    Ok(vec![Box::new(
        HttpsStopDbOp::new(
            vec![initiator.clone()],
            options.sandbox.clone(),
            options.drain_seconds,
        )
        .with_cmd(options.cmd()),
    )])
}

pub async fn stop_database(options: &mut StopDbOptions) -> Result<()> {
    options.validate_analyze()?;
    let vdb = fetch::fetch_vdb_from_running_db(&options.db, options.sandbox.as_deref()).await?;
    let mut instructions = produce_stop_db_instructions(options, &vdb)?;
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
        .map_err(|e| e.with_step("fail to stop database"))?;
    info!(db = %options.db.db_name, "database stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::CredentialSet;
    use crate::vdb::{NodeState, VNode};

    fn vdb() -> CoordinationDatabase {
        let mut vdb = CoordinationDatabase::new("db", true);
        vdb.add_node(VNode {
            name: "v_db_node0001".into(),
            address: "10.0.0.1".into(),
            catalog_path: "/cat".into(),
            data_path: "/dat".into(),
            depot_path: "/dep".into(),
            subcluster: "default_subcluster".into(),
            sandbox: String::new(),
            is_primary: true,
            is_compute: false,
            state: NodeState::Up,
            version: String::new(),
        });
        vdb
    }

    fn options() -> StopDbOptions {
        StopDbOptions::builder()
            .db(DatabaseOptions::builder()
                .db_name("db")
                .raw_hosts(vec!["10.0.0.1".into()])
                .credentials(CredentialSet::password(None, "pw"))
                .build())
            .build()
    }

    #[test]
    fn initiator_is_a_primary_up_host() {
        let mut opts = options();
        opts.validate_analyze().unwrap();
        let instructions = produce_stop_db_instructions(&opts, &vdb()).unwrap();
        assert_eq!(instructions.len(), 1);
        assert_eq!(instructions[0].name(), "HTTPSStopDBOp");
    }

    #[test]
    fn missing_initiator_in_sandbox_is_a_precondition_error() {
        let mut opts = options();
        opts.sandbox = Some("sand1".into());
        opts.validate_analyze().unwrap();
        match produce_stop_db_instructions(&opts, &vdb()).unwrap_err() {
            OpsError::Precondition(msg) => assert!(msg.contains("sand1")),
            other => panic!("expected Precondition, got {other}"),
        }
    }
}
