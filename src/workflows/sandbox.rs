//! Sandbox commands: sandbox, unsandbox, promote to main

use crate::cmd::CmdType;
use crate::error::{OpsError, Result};
use crate::ops::ClusterOp;
use crate::ops::engine::ClusterOpEngine;
use crate::ops::https_subcluster::{
    HttpsPromoteSandboxToMainOp, HttpsSandboxSubclusterOp, HttpsUnsandboxSubclusterOp,
};
use crate::ops::poll::PollNodeStateOp;
use crate::vdb::{CoordinationDatabase, MAIN_CLUSTER, NodeState};
use crate::workflows::{DatabaseOptions, fetch, validate_object_name};
use tracing::info;
use typed_builder::TypedBuilder;

fn main_cluster_initiator(vdb: &CoordinationDatabase) -> Result<Vec<String>> {
    let initiators = vdb.primary_up_hosts_in_sandbox(MAIN_CLUSTER);
    match initiators.first() {
        Some(host) => Ok(vec![host.clone()]),
        None => Err(OpsError::Precondition(
            "no primary UP node is available in the main cluster".into(),
        )),
    }
}

#[derive(Debug, Clone, TypedBuilder)]
pub struct SandboxSubclusterOptions {
    pub db: DatabaseOptions,
    #[builder(setter(into))]
    pub subcluster: String,
    #[builder(setter(into))]
    pub sandbox: String,
    /// Mark the sandbox as an upgrade sandbox.
    #[builder(default)]
    pub for_upgrade: bool,
}

impl SandboxSubclusterOptions {
    pub fn validate_analyze(&mut self) -> Result<()> {
        self.db.validate_analyze(CmdType::SandboxSubcluster)?;
        validate_object_name(&self.subcluster, "subcluster")?;
        validate_object_name(&self.sandbox, "sandbox")
    }
}

pub fn produce_sandbox_instructions(
    options: &SandboxSubclusterOptions,
    vdb: &CoordinationDatabase,
) -> Result<Vec<Box<dyn ClusterOp>>> {
    let status = vdb.sc_status();
    let Some(sc) = status.iter().find(|s| s.name == options.subcluster) else {
        return Err(OpsError::Precondition(format!(
            "subcluster {} does not exist",
            options.subcluster
        )));
    };
    if sc.sandbox != MAIN_CLUSTER {
        return Err(OpsError::Precondition(format!(
            "subcluster {} is already sandboxed into {}",
            options.subcluster, sc.sandbox
        )));
    }
    if sc.is_primary {
        return Err(OpsError::Precondition(format!(
            "subcluster {} is primary; only secondary subclusters can be sandboxed",
            options.subcluster
        )));
    }
    let initiator = main_cluster_initiator(vdb)?;
    let sc_hosts = vdb.hosts_in_subcluster(&options.subcluster);
    Ok(vec![
        Box::new(HttpsSandboxSubclusterOp::new(
            initiator,
            options.subcluster.clone(),
            options.sandbox.clone(),
            options.for_upgrade,
        )),
        // the sandboxed nodes restart with their own catalog
        Box::new(PollNodeStateOp::direct(sc_hosts, vec![NodeState::Up])),
    ])
}

pub async fn sandbox_subcluster(options: &mut SandboxSubclusterOptions) -> Result<()> {
    options.validate_analyze()?;
    let vdb = fetch::fetch_vdb_from_running_db(&options.db, None).await?;
    let mut instructions = produce_sandbox_instructions(options, &vdb)?;
    let mut ctx = options.db.make_context()?;
    let engine = ClusterOpEngine::new(options.db.credentials()?.clone());
    engine
        .run_with_vdb(&mut instructions, &mut ctx, vdb)
        .await
        .map_err(|e| e.with_step("fail to sandbox subcluster"))?;
    info!(subcluster = %options.subcluster, sandbox = %options.sandbox, "subcluster sandboxed");
    Ok(())
}

#[derive(Debug, Clone, TypedBuilder)]
pub struct UnsandboxSubclusterOptions {
    pub db: DatabaseOptions,
    #[builder(setter(into))]
    pub subcluster: String,
}

impl UnsandboxSubclusterOptions {
    pub fn validate_analyze(&mut self) -> Result<()> {
        self.db.validate_analyze(CmdType::UnsandboxSubcluster)?;
        validate_object_name(&self.subcluster, "subcluster")
    }
}

pub async fn unsandbox_subcluster(options: &mut UnsandboxSubclusterOptions) -> Result<()> {
    options.validate_analyze()?;
    let vdb = fetch::fetch_vdb_from_running_db(&options.db, None).await?;
    let Some(sandbox) = vdb.sandbox_of_subcluster(&options.subcluster) else {
        return Err(OpsError::Precondition(format!(
            "subcluster {} does not exist",
            options.subcluster
        )));
    };
    if sandbox == MAIN_CLUSTER {
        return Err(OpsError::Precondition(format!(
            "subcluster {} is not sandboxed",
            options.subcluster
        )));
    }
    let initiator = main_cluster_initiator(&vdb)?;
    let mut instructions: Vec<Box<dyn ClusterOp>> = vec![Box::new(
        HttpsUnsandboxSubclusterOp::new(initiator, options.subcluster.clone()),
    )];
    let mut ctx = options.db.make_context()?;
    let engine = ClusterOpEngine::new(options.db.credentials()?.clone());
    engine
        .run_with_vdb(&mut instructions, &mut ctx, vdb)
        .await
        .map_err(|e| e.with_step("fail to unsandbox subcluster"))?;
    Ok(())
}

#[derive(Debug, Clone, TypedBuilder)]
pub struct PromoteSandboxOptions {
    pub db: DatabaseOptions,
    #[builder(setter(into))]
    pub sandbox: String,
}

impl PromoteSandboxOptions {
    pub fn validate_analyze(&mut self) -> Result<()> {
        self.db.validate_analyze(CmdType::PromoteSandboxToMain)?;
        validate_object_name(&self.sandbox, "sandbox")
    }
}

/// Promote the sandbox to be the main cluster. The promotion endpoint is
/// retried inside the operation because catalog propagation is eventually
/// consistent.
pub async fn promote_sandbox_to_main(options: &mut PromoteSandboxOptions) -> Result<()> {
    options.validate_analyze()?;
    let vdb = fetch::fetch_vdb_from_running_db(&options.db, Some(&options.sandbox)).await?;
    let initiators = vdb.primary_up_hosts_in_sandbox(&options.sandbox);
    let Some(initiator) = initiators.first() else {
        return Err(OpsError::Precondition(format!(
            "no primary UP node is available in sandbox {}",
            options.sandbox
        )));
    };
    let mut instructions: Vec<Box<dyn ClusterOp>> = vec![Box::new(
        HttpsPromoteSandboxToMainOp::new(vec![initiator.clone()], options.sandbox.clone()),
    )];
    let mut ctx = options.db.make_context()?;
    let engine =
        ClusterOpEngine::run_in_sandbox(options.db.credentials()?.clone(), options.sandbox.clone());
    engine
        .run_with_vdb(&mut instructions, &mut ctx, vdb)
        .await
        .map_err(|e| {
            e.with_step("fail to promote sandbox to main; please shut down the sandbox and retry")
        })?;
    info!(sandbox = %options.sandbox, "sandbox promoted to main");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::CredentialSet;
    use crate::vdb::VNode;

    fn vdb() -> CoordinationDatabase {
        let mut vdb = CoordinationDatabase::new("db", true);
        for (i, sc, primary) in [
            (1, "default_subcluster", true),
            (2, "sc_reader", false),
        ] {
            vdb.add_node(VNode {
                name: format!("v_db_node{i:04}"),
                address: format!("10.0.0.{i}"),
                catalog_path: "/cat".into(),
                data_path: "/dat".into(),
                depot_path: "/dep".into(),
                subcluster: sc.into(),
                sandbox: String::new(),
                is_primary: primary,
                is_compute: false,
                state: NodeState::Up,
                version: String::new(),
            });
        }
        vdb
    }

    fn options(sc: &str) -> SandboxSubclusterOptions {
        SandboxSubclusterOptions::builder()
            .db(DatabaseOptions::builder()
                .db_name("db")
                .raw_hosts(vec!["10.0.0.1".into()])
                .credentials(CredentialSet::password(None, "pw"))
                .build())
            .subcluster(sc)
            .sandbox("sand1")
            .build()
    }

    #[test]
    fn primary_subcluster_cannot_be_sandboxed() {
        let mut opts = options("default_subcluster");
        opts.validate_analyze().unwrap();
        match produce_sandbox_instructions(&opts, &vdb()).unwrap_err() {
            OpsError::Precondition(msg) => assert!(msg.contains("primary")),
            other => panic!("expected Precondition, got {other}"),
        }
    }

    #[test]
    fn sandbox_then_poll() {
        let mut opts = options("sc_reader");
        opts.validate_analyze().unwrap();
        let instructions = produce_sandbox_instructions(&opts, &vdb()).unwrap();
        let names: Vec<&str> = instructions.iter().map(|op| op.name()).collect();
        assert_eq!(names, vec!["HTTPSSandboxSubclusterOp", "HTTPSPollNodeStateOp"]);
    }
}
