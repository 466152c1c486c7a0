//! Subcluster lifecycle commands

use crate::cmd::CmdType;
use crate::error::{OpsError, Result};
use crate::ops::ClusterOp;
use crate::ops::engine::ClusterOpEngine;
use crate::ops::https_cluster::{HttpsAddNodeOp, HttpsDropNodeOp, HttpsGetNodesInfoOp};
use crate::ops::https_subcluster::{
    HttpsAddSubclusterOp, HttpsAlterSubclusterTypeOp, HttpsDropSubclusterOp,
    HttpsRenameSubclusterOp, HttpsStopSubclusterOp,
};
use crate::ops::nma_catalog::NmaCloneSubclusterPropsOp;
use crate::ops::nma_cluster::{NmaHealthOp, NmaStartNodeOp};
use crate::ops::poll::PollNodeStateOp;
use crate::vdb::{CoordinationDatabase, MAIN_CLUSTER, NodeState};
use crate::workflows::{DatabaseOptions, fetch, resolve_raw_hosts, validate_object_name};
use std::time::Duration;
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

/// Initiator for a subcluster-scoped operation: any one UP node inside
/// the subcluster.
fn subcluster_initiator(vdb: &CoordinationDatabase, subcluster: &str) -> Result<Vec<String>> {
    match vdb.first_up_host_in_subcluster(subcluster) {
        Some(host) => Ok(vec![host]),
        None => Err(OpsError::Precondition(format!(
            "no UP node is available in subcluster {subcluster}"
        ))),
    }
}

#[derive(Debug, Clone, TypedBuilder)]
pub struct AddSubclusterOptions {
    pub db: DatabaseOptions,
    #[builder(setter(into))]
    pub subcluster: String,
    #[builder(default)]
    pub is_primary: bool,
    /// Hosts to place in the new subcluster; may be empty.
    #[builder(default)]
    pub new_raw_hosts: Vec<String>,
    /// Copy properties from this existing subcluster.
    #[builder(default, setter(strip_option, into))]
    pub clone_from: Option<String>,
    #[builder(default)]
    pub new_hosts: Vec<String>,
}

impl AddSubclusterOptions {
    pub fn validate_analyze(&mut self) -> Result<()> {
        self.db.validate_analyze(CmdType::AddSubcluster)?;
        validate_object_name(&self.subcluster, "subcluster")?;
        if let Some(source) = &self.clone_from {
            validate_object_name(source, "subcluster")?;
        }
        self.new_hosts = resolve_raw_hosts(&self.new_raw_hosts)?;
        Ok(())
    }
}

pub fn produce_add_subcluster_instructions(
    options: &AddSubclusterOptions,
    vdb: &CoordinationDatabase,
) -> Result<Vec<Box<dyn ClusterOp>>> {
    if vdb.sandbox_of_subcluster(&options.subcluster).is_some() {
        return Err(OpsError::Precondition(format!(
            "subcluster {} already exists",
            options.subcluster
        )));
    }
    let initiator = main_cluster_initiator(vdb)?;
    let mut instructions: Vec<Box<dyn ClusterOp>> = vec![Box::new(HttpsAddSubclusterOp::new(
        initiator.clone(),
        options.subcluster.clone(),
        options.is_primary,
    ))];
    if let Some(source) = &options.clone_from {
        instructions.push(Box::new(NmaCloneSubclusterPropsOp::new(
            initiator.clone(),
            source.clone(),
            options.subcluster.clone(),
        )));
    }
    if !options.new_hosts.is_empty() {
        instructions.push(Box::new(NmaHealthOp::new(options.new_hosts.clone())));
        instructions.push(Box::new(HttpsAddNodeOp::new(
            initiator,
            options.new_hosts.clone(),
            options.subcluster.clone(),
        )));
        instructions.push(Box::new(HttpsGetNodesInfoOp::new(
            options.db.db_name.clone(),
            options.db.hosts.clone(),
        )));
        instructions.push(Box::new(NmaStartNodeOp::new(
            options.new_hosts.clone(),
            options.db.db_name.clone(),
        )));
        instructions.push(Box::new(PollNodeStateOp::direct(
            options.new_hosts.clone(),
            vec![NodeState::Up],
        )));
    }
    Ok(instructions)
}

pub async fn add_subcluster(options: &mut AddSubclusterOptions) -> Result<()> {
    options.validate_analyze()?;
    let vdb = fetch::fetch_vdb_from_running_db(&options.db, None).await?;
    let mut instructions = produce_add_subcluster_instructions(options, &vdb)?;
    let mut ctx = options.db.make_context()?;
    let engine = ClusterOpEngine::new(options.db.credentials()?.clone());
    engine
        .run_with_vdb(&mut instructions, &mut ctx, vdb)
        .await
        .map_err(|e| e.with_step("fail to add subcluster"))?;
    info!(subcluster = %options.subcluster, "subcluster added");
    Ok(())
}

#[derive(Debug, Clone, TypedBuilder)]
pub struct RemoveSubclusterOptions {
    pub db: DatabaseOptions,
    #[builder(setter(into))]
    pub subcluster: String,
}

impl RemoveSubclusterOptions {
    pub fn validate_analyze(&mut self) -> Result<()> {
        self.db.validate_analyze(CmdType::RemoveSubcluster)?;
        validate_object_name(&self.subcluster, "subcluster")
    }
}

pub fn produce_remove_subcluster_instructions(
    options: &RemoveSubclusterOptions,
    vdb: &CoordinationDatabase,
) -> Result<Vec<Box<dyn ClusterOp>>> {
    let Some(sandbox) = vdb.sandbox_of_subcluster(&options.subcluster) else {
        return Err(OpsError::Precondition(format!(
            "subcluster {} does not exist",
            options.subcluster
        )));
    };
    if sandbox != MAIN_CLUSTER {
        return Err(OpsError::Precondition(format!(
            "subcluster {} is sandboxed; unsandbox it first",
            options.subcluster
        )));
    }
    let initiator = main_cluster_initiator(vdb)?;
    let node_names: Vec<String> = vdb
        .nodes()
        .filter(|n| n.subcluster == options.subcluster)
        .map(|n| n.name.clone())
        .collect();
    let mut instructions: Vec<Box<dyn ClusterOp>> = Vec::new();
    if !node_names.is_empty() {
        instructions.push(Box::new(HttpsDropNodeOp::new(
            initiator.clone(),
            node_names,
            true,
        )));
    }
    instructions.push(Box::new(HttpsDropSubclusterOp::new(
        initiator,
        options.subcluster.clone(),
    )));
    Ok(instructions)
}

pub async fn remove_subcluster(options: &mut RemoveSubclusterOptions) -> Result<()> {
    options.validate_analyze()?;
    let vdb = fetch::fetch_vdb_from_running_db(&options.db, None).await?;
    let mut instructions = produce_remove_subcluster_instructions(options, &vdb)?;
    let mut ctx = options.db.make_context()?;
    let engine = ClusterOpEngine::new(options.db.credentials()?.clone());
    engine
        .run_with_vdb(&mut instructions, &mut ctx, vdb)
        .await
        .map_err(|e| e.with_step("fail to remove subcluster"))?;
    Ok(())
}

#[derive(Debug, Clone, TypedBuilder)]
pub struct StopSubclusterOptions {
    pub db: DatabaseOptions,
    #[builder(setter(into))]
    pub subcluster: String,
    #[builder(default)]
    pub force: bool,
    #[builder(default)]
    pub sync_catalog: bool,
}

impl StopSubclusterOptions {
    pub fn validate_analyze(&mut self) -> Result<()> {
        let cmd = if self.sync_catalog {
            CmdType::StopScSyncCat
        } else {
            CmdType::StopSubcluster
        };
        self.db.validate_analyze(cmd)?;
        validate_object_name(&self.subcluster, "subcluster")
    }
}

pub async fn stop_subcluster(options: &mut StopSubclusterOptions) -> Result<()> {
    options.validate_analyze()?;
    let vdb = fetch::fetch_vdb_from_running_db(&options.db, None).await?;
    let initiator = subcluster_initiator(&vdb, &options.subcluster)?;
    let cmd = if options.sync_catalog {
        CmdType::StopScSyncCat
    } else {
        CmdType::StopSubcluster
    };
    let mut instructions: Vec<Box<dyn ClusterOp>> = vec![Box::new(
        HttpsStopSubclusterOp::new(initiator, options.subcluster.clone(), options.force)
            .with_cmd(cmd),
    )];
    let mut ctx = options.db.make_context()?;
    let engine = ClusterOpEngine::new(options.db.credentials()?.clone());
    engine
        .run_with_vdb(&mut instructions, &mut ctx, vdb)
        .await
        .map_err(|e| e.with_step("fail to stop subcluster"))?;
    Ok(())
}

#[derive(Debug, Clone, TypedBuilder)]
pub struct StartSubclusterOptions {
    pub db: DatabaseOptions,
    #[builder(setter(into))]
    pub subcluster: String,
}

impl StartSubclusterOptions {
    pub fn validate_analyze(&mut self) -> Result<()> {
        self.db.validate_analyze(CmdType::StartSubcluster)?;
        validate_object_name(&self.subcluster, "subcluster")
    }
}

pub async fn start_subcluster(options: &mut StartSubclusterOptions) -> Result<()> {
    options.validate_analyze()?;
    let vdb = fetch::fetch_vdb_from_running_db(&options.db, None).await?;
    let sc_hosts = vdb.hosts_in_subcluster(&options.subcluster);
    if sc_hosts.is_empty() {
        return Err(OpsError::Precondition(format!(
            "subcluster {} does not exist",
            options.subcluster
        )));
    }
    let mut instructions: Vec<Box<dyn ClusterOp>> = vec![
        Box::new(NmaHealthOp::new(sc_hosts.clone())),
        Box::new(NmaStartNodeOp::new(sc_hosts.clone(), options.db.db_name.clone())),
        Box::new(PollNodeStateOp::direct(sc_hosts, vec![NodeState::Up])),
    ];
    let mut ctx = options.db.make_context()?;
    let engine = ClusterOpEngine::new(options.db.credentials()?.clone());
    engine
        .run_with_vdb(&mut instructions, &mut ctx, vdb)
        .await
        .map_err(|e| e.with_step("fail to start subcluster"))?;
    Ok(())
}

#[derive(Debug, Clone, TypedBuilder)]
pub struct AlterSubclusterTypeOptions {
    pub db: DatabaseOptions,
    #[builder(setter(into))]
    pub subcluster: String,
    pub make_primary: bool,
}

impl AlterSubclusterTypeOptions {
    pub fn validate_analyze(&mut self) -> Result<()> {
        self.db.validate_analyze(CmdType::AlterSubclusterType)?;
        validate_object_name(&self.subcluster, "subcluster")
    }
}

pub async fn alter_subcluster_type(options: &mut AlterSubclusterTypeOptions) -> Result<()> {
    options.validate_analyze()?;
    let vdb = fetch::fetch_vdb_from_running_db(&options.db, None).await?;
    let status = vdb.sc_status();
    let Some(sc) = status.iter().find(|s| s.name == options.subcluster) else {
        return Err(OpsError::Precondition(format!(
            "subcluster {} does not exist",
            options.subcluster
        )));
    };
    if sc.is_primary == options.make_primary {
        let kind = if sc.is_primary { "primary" } else { "secondary" };
        return Err(OpsError::Precondition(format!(
            "subcluster {} is already {kind}",
            options.subcluster
        )));
    }
    let initiator = main_cluster_initiator(&vdb)?;
    let mut instructions: Vec<Box<dyn ClusterOp>> = vec![Box::new(HttpsAlterSubclusterTypeOp::new(
        initiator,
        options.subcluster.clone(),
        options.make_primary,
    ))];
    let mut ctx = options.db.make_context()?;
    let engine = ClusterOpEngine::new(options.db.credentials()?.clone());
    engine
        .run_with_vdb(&mut instructions, &mut ctx, vdb)
        .await
        .map_err(|e| e.with_step("fail to alter subcluster type"))?;
    Ok(())
}

#[derive(Debug, Clone, TypedBuilder)]
pub struct RenameSubclusterOptions {
    pub db: DatabaseOptions,
    #[builder(setter(into))]
    pub subcluster: String,
    #[builder(setter(into))]
    pub new_name: String,
}

impl RenameSubclusterOptions {
    pub fn validate_analyze(&mut self) -> Result<()> {
        self.db.validate_analyze(CmdType::RenameSubcluster)?;
        validate_object_name(&self.subcluster, "subcluster")?;
        validate_object_name(&self.new_name, "subcluster")
    }
}

pub async fn rename_subcluster(options: &mut RenameSubclusterOptions) -> Result<()> {
    options.validate_analyze()?;
    let vdb = fetch::fetch_vdb_from_running_db(&options.db, None).await?;
    let initiator = subcluster_initiator(&vdb, &options.subcluster)?;
    let mut instructions: Vec<Box<dyn ClusterOp>> = vec![Box::new(HttpsRenameSubclusterOp::new(
        initiator,
        options.subcluster.clone(),
        options.new_name.clone(),
    ))];
    let mut ctx = options.db.make_context()?;
    let engine = ClusterOpEngine::new(options.db.credentials()?.clone());
    engine
        .run_with_vdb(&mut instructions, &mut ctx, vdb)
        .await
        .map_err(|e| e.with_step("fail to rename subcluster"))?;
    Ok(())
}

#[derive(Debug, Clone, TypedBuilder)]
pub struct PollSubclusterStateOptions {
    pub db: DatabaseOptions,
    #[builder(setter(into))]
    pub subcluster: String,
    /// Overall wall-clock bound; defaults to the environment override or
    /// the built-in polling bound.
    #[builder(default, setter(strip_option))]
    pub timeout: Option<Duration>,
}

impl PollSubclusterStateOptions {
    pub fn validate_analyze(&mut self) -> Result<()> {
        self.db.validate_analyze(CmdType::PollSubclusterState)?;
        validate_object_name(&self.subcluster, "subcluster")
    }
}

/// Wait for every node of a subcluster to come up (compute nodes count).
pub async fn poll_subcluster_state(options: &mut PollSubclusterStateOptions) -> Result<()> {
    options.validate_analyze()?;
    let vdb = fetch::fetch_vdb_from_running_db(&options.db, None).await?;
    let sc_hosts = vdb.hosts_in_subcluster(&options.subcluster);
    if sc_hosts.is_empty() {
        return Err(OpsError::Precondition(format!(
            "subcluster {} does not exist",
            options.subcluster
        )));
    }
    let mut poll = PollNodeStateOp::direct(sc_hosts, vec![NodeState::Up, NodeState::Compute]);
    if let Some(timeout) = options.timeout {
        poll = poll.with_timeout(timeout);
    }
    let mut instructions: Vec<Box<dyn ClusterOp>> = vec![Box::new(poll)];
    let mut ctx = options.db.make_context()?;
    let engine = ClusterOpEngine::new(options.db.credentials()?.clone());
    engine
        .run_with_vdb(&mut instructions, &mut ctx, vdb)
        .await
        .map_err(|e| e.with_step("fail to poll subcluster state"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::CredentialSet;
    use crate::vdb::VNode;

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
        vdb.add_node(VNode {
            name: "v_db_node0002".into(),
            address: "10.0.0.2".into(),
            catalog_path: "/cat".into(),
            data_path: "/dat".into(),
            depot_path: "/dep".into(),
            subcluster: "sc_sand".into(),
            sandbox: "sand1".into(),
            is_primary: false,
            is_compute: false,
            state: NodeState::Up,
            version: String::new(),
        });
        vdb
    }

    fn db_options() -> DatabaseOptions {
        DatabaseOptions::builder()
            .db_name("db")
            .raw_hosts(vec!["10.0.0.1".into()])
            .credentials(CredentialSet::password(None, "pw"))
            .build()
    }

    #[test]
    fn existing_subcluster_cannot_be_added_again() {
        let mut opts = AddSubclusterOptions::builder()
            .db(db_options())
            .subcluster("default_subcluster")
            .build();
        opts.validate_analyze().unwrap();
        assert!(matches!(
            produce_add_subcluster_instructions(&opts, &vdb()).unwrap_err(),
            OpsError::Precondition(_)
        ));
    }

    #[test]
    fn sandboxed_subcluster_cannot_be_removed() {
        let mut opts = RemoveSubclusterOptions::builder()
            .db(db_options())
            .subcluster("sc_sand")
            .build();
        opts.validate_analyze().unwrap();
        match produce_remove_subcluster_instructions(&opts, &vdb()).unwrap_err() {
            OpsError::Precondition(msg) => assert!(msg.contains("unsandbox")),
            other => panic!("expected Precondition, got {other}"),
        }
    }

    #[test]
    fn remove_drops_nodes_before_subcluster() {
        let mut vdb = vdb();
        // move the sandboxed subcluster into the main cluster for this case
        let node = vdb.host_to_node.get_mut("10.0.0.2").unwrap();
        node.sandbox = String::new();
        let mut opts = RemoveSubclusterOptions::builder()
            .db(db_options())
            .subcluster("sc_sand")
            .build();
        opts.validate_analyze().unwrap();
        let instructions = produce_remove_subcluster_instructions(&opts, &vdb).unwrap();
        let names: Vec<&str> = instructions.iter().map(|op| op.name()).collect();
        assert_eq!(names, vec!["HTTPSDropNodeOp", "HTTPSDropSubclusterOp"]);
    }
}
