//! Node lifecycle commands

use crate::cmd::CmdType;
use crate::error::{OpsError, Result};
use crate::ops::ClusterOp;
use crate::ops::engine::ClusterOpEngine;
use crate::ops::https_cluster::{
    HttpsAddNodeOp, HttpsDropNodeOp, HttpsGetNodesInfoOp, HttpsStopNodeOp, HttpsSyncCatalogOp,
    NodeDetails,
};
use crate::ops::nma_catalog::NmaReadCatalogEditorOp;
use crate::ops::nma_cluster::{NmaHealthOp, NmaNetworkProfileOp, NmaReIpOp, NmaStartNodeOp};
use crate::ops::poll::PollNodeStateOp;
use crate::vdb::{CoordinationDatabase, MAIN_CLUSTER, NodeState};
use crate::workflows::{DatabaseOptions, fetch, resolve_raw_hosts, validate_object_name};
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

/// Map addresses to node names, failing on addresses outside the catalog.
fn node_names_for(vdb: &CoordinationDatabase, hosts: &[String]) -> Result<Vec<String>> {
    hosts
        .iter()
        .map(|host| {
            vdb.node(host).map(|n| n.name.clone()).ok_or_else(|| {
                OpsError::Precondition(format!("host {host} is not part of the database"))
            })
        })
        .collect()
}

#[derive(Debug, Clone, TypedBuilder)]
pub struct AddNodeOptions {
    pub db: DatabaseOptions,
    /// Hosts to add, unresolved.
    pub new_raw_hosts: Vec<String>,
    #[builder(default = String::from("default_subcluster"), setter(into))]
    pub subcluster: String,
    /// Sync the catalog once the new nodes are up.
    #[builder(default)]
    pub sync_catalog: bool,
    #[builder(default)]
    pub new_hosts: Vec<String>,
}

impl AddNodeOptions {
    pub fn validate_analyze(&mut self) -> Result<()> {
        let cmd = if self.sync_catalog {
            CmdType::AddNodeSyncCat
        } else {
            CmdType::AddNode
        };
        self.db.validate_analyze(cmd)?;
        validate_object_name(&self.subcluster, "subcluster")?;
        if self.new_raw_hosts.is_empty() {
            return Err(OpsError::Validation("no host to add was provided".into()));
        }
        self.new_hosts = resolve_raw_hosts(&self.new_raw_hosts)?;
        Ok(())
    }
}

pub fn produce_add_node_instructions(
    options: &AddNodeOptions,
    vdb: &CoordinationDatabase,
) -> Result<Vec<Box<dyn ClusterOp>>> {
    let initiator = main_cluster_initiator(vdb)?;
    let mut instructions: Vec<Box<dyn ClusterOp>> = vec![
        Box::new(NmaHealthOp::new(options.new_hosts.clone())),
        Box::new(NmaNetworkProfileOp::new(options.new_hosts.clone())),
        Box::new(HttpsAddNodeOp::new(
            initiator.clone(),
            options.new_hosts.clone(),
            options.subcluster.clone(),
        )),
        // refresh the topology so the start op sees the new nodes
        Box::new(HttpsGetNodesInfoOp::new(
            options.db.db_name.clone(),
            options.db.hosts.clone(),
        )),
        Box::new(NmaStartNodeOp::new(
            options.new_hosts.clone(),
            options.db.db_name.clone(),
        )),
        Box::new(PollNodeStateOp::direct(
            options.new_hosts.clone(),
            vec![NodeState::Up],
        )),
    ];
    if options.sync_catalog {
        instructions.push(Box::new(HttpsSyncCatalogOp::new(initiator)));
    }
    Ok(instructions)
}

pub async fn add_node(options: &mut AddNodeOptions) -> Result<CoordinationDatabase> {
    options.validate_analyze()?;
    let vdb = fetch::fetch_vdb_from_running_db(&options.db, None).await?;
    let mut instructions = produce_add_node_instructions(options, &vdb)?;
    let mut ctx = options.db.make_context()?;
    let engine = ClusterOpEngine::new(options.db.credentials()?.clone());
    engine
        .run_with_vdb(&mut instructions, &mut ctx, vdb)
        .await
        .map_err(|e| e.with_step("fail to add node"))?;
    info!(count = options.new_hosts.len(), "node(s) added");
    ctx.take_vdb()
}

#[derive(Debug, Clone, TypedBuilder)]
pub struct RemoveNodeOptions {
    pub db: DatabaseOptions,
    /// Hosts to remove, unresolved.
    pub remove_raw_hosts: Vec<String>,
    #[builder(default = true)]
    pub force: bool,
    /// Sync the catalog once the nodes are gone.
    #[builder(default)]
    pub sync_catalog: bool,
    #[builder(default)]
    pub remove_hosts: Vec<String>,
}

impl RemoveNodeOptions {
    pub fn validate_analyze(&mut self) -> Result<()> {
        let cmd = if self.sync_catalog {
            CmdType::RemoveNodeSyncCat
        } else {
            CmdType::RemoveNode
        };
        self.db.validate_analyze(cmd)?;
        if self.remove_raw_hosts.is_empty() {
            return Err(OpsError::Validation("no host to remove was provided".into()));
        }
        self.remove_hosts = resolve_raw_hosts(&self.remove_raw_hosts)?;
        Ok(())
    }
}

pub fn produce_remove_node_instructions(
    options: &RemoveNodeOptions,
    vdb: &CoordinationDatabase,
) -> Result<Vec<Box<dyn ClusterOp>>> {
    let initiator = main_cluster_initiator(vdb)?;
    let names = node_names_for(vdb, &options.remove_hosts)?;
    let primaries_removed = options
        .remove_hosts
        .iter()
        .filter(|h| vdb.node(h).is_some_and(|n| n.is_primary))
        .count();
    vdb.check_quorum(vdb.primary_count() - primaries_removed)
        .map_err(|e| e.with_step("removing these nodes would break quorum"))?;
    let mut instructions: Vec<Box<dyn ClusterOp>> = vec![Box::new(HttpsDropNodeOp::new(
        initiator.clone(),
        names,
        options.force,
    ))];
    if options.sync_catalog {
        instructions.push(Box::new(HttpsSyncCatalogOp::new(initiator)));
    }
    Ok(instructions)
}

pub async fn remove_node(options: &mut RemoveNodeOptions) -> Result<CoordinationDatabase> {
    options.validate_analyze()?;
    let vdb = fetch::fetch_vdb_from_running_db(&options.db, None).await?;
    let mut instructions = produce_remove_node_instructions(options, &vdb)?;
    let mut ctx = options.db.make_context()?;
    let engine = ClusterOpEngine::new(options.db.credentials()?.clone());
    engine
        .run_with_vdb(&mut instructions, &mut ctx, vdb)
        .await
        .map_err(|e| e.with_step("fail to remove node"))?;
    // return the refreshed view
    fetch::fetch_vdb_from_running_db(&options.db, None).await
}

#[derive(Debug, Clone, TypedBuilder)]
pub struct StartNodeOptions {
    pub db: DatabaseOptions,
    /// Hosts whose nodes should start, unresolved.
    pub node_raw_hosts: Vec<String>,
    #[builder(default)]
    pub node_hosts: Vec<String>,
    #[builder(default)]
    pub sync_catalog: bool,
}

impl StartNodeOptions {
    pub fn validate_analyze(&mut self) -> Result<()> {
        let cmd = if self.sync_catalog {
            CmdType::StartNodeSyncCat
        } else {
            CmdType::StartNode
        };
        self.db.validate_analyze(cmd)?;
        if self.node_raw_hosts.is_empty() {
            return Err(OpsError::Validation("no node host was provided".into()));
        }
        self.node_hosts = resolve_raw_hosts(&self.node_raw_hosts)?;
        Ok(())
    }
}

pub fn produce_start_node_instructions(
    options: &StartNodeOptions,
    vdb: &CoordinationDatabase,
) -> Result<Vec<Box<dyn ClusterOp>>> {
    // nodes outside the catalog cannot be started
    let targets = vdb.remove_hosts_not_in_catalog(&options.node_hosts);
    if targets.is_empty() {
        return Err(OpsError::Precondition(
            "none of the given hosts belongs to the database".into(),
        ));
    }
    let has_compute = targets
        .iter()
        .any(|h| vdb.node(h).is_some_and(|n| n.is_compute));
    let poll: Box<dyn ClusterOp> = if has_compute {
        // compute nodes cannot answer /nodes themselves; observe them
        // through the up primaries and hand the permanent subset on
        let observers = vdb.primary_up_hosts_in_sandbox(MAIN_CLUSTER);
        Box::new(
            PollNodeStateOp::indirect(
                targets.clone(),
                observers,
                vec![NodeState::Up, NodeState::Compute],
            )
            .emit_permanent_subset(),
        )
    } else {
        Box::new(PollNodeStateOp::direct(targets.clone(), vec![NodeState::Up]))
    };
    let mut instructions: Vec<Box<dyn ClusterOp>> = vec![
        Box::new(NmaHealthOp::new(targets.clone())),
        Box::new(NmaStartNodeOp::new(targets.clone(), options.db.db_name.clone())),
        poll,
    ];
    if options.sync_catalog {
        instructions.push(Box::new(HttpsSyncCatalogOp::new(vec![targets[0].clone()])));
    }
    Ok(instructions)
}

pub async fn start_node(options: &mut StartNodeOptions) -> Result<()> {
    options.validate_analyze()?;
    let vdb = fetch::fetch_vdb_from_running_db(&options.db, None).await?;
    let mut instructions = produce_start_node_instructions(options, &vdb)?;
    let mut ctx = options.db.make_context()?;
    let engine = ClusterOpEngine::new(options.db.credentials()?.clone());
    engine
        .run_with_vdb(&mut instructions, &mut ctx, vdb)
        .await
        .map_err(|e| e.with_step("fail to start node"))?;
    Ok(())
}

#[derive(Debug, Clone, TypedBuilder)]
pub struct StopNodeOptions {
    pub db: DatabaseOptions,
    /// Hosts whose nodes should stop, unresolved.
    pub node_raw_hosts: Vec<String>,
    #[builder(default)]
    pub node_hosts: Vec<String>,
}

impl StopNodeOptions {
    pub fn validate_analyze(&mut self) -> Result<()> {
        self.db.validate_analyze(CmdType::StopNode)?;
        if self.node_raw_hosts.is_empty() {
            return Err(OpsError::Validation("no node host was provided".into()));
        }
        self.node_hosts = resolve_raw_hosts(&self.node_raw_hosts)?;
        Ok(())
    }
}

pub fn produce_stop_node_instructions(
    options: &StopNodeOptions,
    vdb: &CoordinationDatabase,
) -> Result<Vec<Box<dyn ClusterOp>>> {
    let initiator = main_cluster_initiator(vdb)?;
    let names = node_names_for(vdb, &options.node_hosts)?;
    Ok(names
        .into_iter()
        .map(|name| Box::new(HttpsStopNodeOp::new(initiator.clone(), name)) as Box<dyn ClusterOp>)
        .collect())
}

pub async fn stop_node(options: &mut StopNodeOptions) -> Result<()> {
    options.validate_analyze()?;
    let vdb = fetch::fetch_vdb_from_running_db(&options.db, None).await?;
    let mut instructions = produce_stop_node_instructions(options, &vdb)?;
    let mut ctx = options.db.make_context()?;
    let engine = ClusterOpEngine::new(options.db.credentials()?.clone());
    engine
        .run_with_vdb(&mut instructions, &mut ctx, vdb)
        .await
        .map_err(|e| e.with_step("fail to stop node"))?;
    Ok(())
}

#[derive(Debug, Clone, TypedBuilder)]
pub struct RestartNodeOptions {
    pub db: DatabaseOptions,
    pub node_raw_hosts: Vec<String>,
    #[builder(default)]
    pub node_hosts: Vec<String>,
}

impl RestartNodeOptions {
    pub fn validate_analyze(&mut self) -> Result<()> {
        self.db.validate_analyze(CmdType::RestartNode)?;
        if self.node_raw_hosts.is_empty() {
            return Err(OpsError::Validation("no node host was provided".into()));
        }
        self.node_hosts = resolve_raw_hosts(&self.node_raw_hosts)?;
        Ok(())
    }
}

/// Restart: stop each node, then start them and wait for UP.
pub async fn restart_node(options: &mut RestartNodeOptions) -> Result<()> {
    options.validate_analyze()?;
    let vdb = fetch::fetch_vdb_from_running_db(&options.db, None).await?;
    let initiator = main_cluster_initiator(&vdb)?;
    let names = node_names_for(&vdb, &options.node_hosts)?;

    let mut instructions: Vec<Box<dyn ClusterOp>> = names
        .into_iter()
        .map(|name| Box::new(HttpsStopNodeOp::new(initiator.clone(), name)) as Box<dyn ClusterOp>)
        .collect();
    instructions.push(Box::new(NmaStartNodeOp::new(
        options.node_hosts.clone(),
        options.db.db_name.clone(),
    )));
    instructions.push(Box::new(PollNodeStateOp::direct(
        options.node_hosts.clone(),
        vec![NodeState::Up],
    )));

    let mut ctx = options.db.make_context()?;
    let engine = ClusterOpEngine::new(options.db.credentials()?.clone());
    engine
        .run_with_vdb(&mut instructions, &mut ctx, vdb)
        .await
        .map_err(|e| e.with_step("fail to restart node"))?;
    Ok(())
}

#[derive(Debug, Clone, TypedBuilder)]
pub struct FetchNodesDetailsOptions {
    pub db: DatabaseOptions,
}

/// Return the node rows of a running database.
pub async fn fetch_nodes_details(options: &mut FetchNodesDetailsOptions) -> Result<Vec<NodeDetails>> {
    options.db.validate_analyze(CmdType::FetchNodesDetails)?;
    let mut instructions: Vec<Box<dyn ClusterOp>> = vec![Box::new(HttpsGetNodesInfoOp::new(
        options.db.db_name.clone(),
        options.db.hosts.clone(),
    ))];
    let mut ctx = options.db.make_context()?;
    let engine = ClusterOpEngine::new(options.db.credentials()?.clone());
    engine
        .run(&mut instructions, &mut ctx)
        .await
        .map_err(|e| e.with_step("fail to fetch node details"))?;
    Ok(ctx.nodes_details()?.clone())
}

#[derive(Debug, Clone, TypedBuilder)]
pub struct ReIpOptions {
    pub db: DatabaseOptions,
    /// (node name, new address) pairs, new addresses unresolved.
    pub re_ip_list: Vec<(String, String)>,
}

impl ReIpOptions {
    pub fn validate_analyze(&mut self) -> Result<()> {
        self.db.validate_analyze(CmdType::ReIp)?;
        if self.re_ip_list.is_empty() {
            return Err(OpsError::Validation("re-ip list must not be empty".into()));
        }
        for (name, address) in &mut self.re_ip_list {
            if name.is_empty() {
                return Err(OpsError::Validation("re-ip entry has an empty node name".into()));
            }
            let resolved = resolve_raw_hosts(std::slice::from_ref(address))?;
            *address = resolved[0].clone();
        }
        Ok(())
    }
}

/// Rewrite node addresses in the catalog of a down database.
pub async fn re_ip(options: &mut ReIpOptions) -> Result<()> {
    options.validate_analyze()?;
    let scope = options.db.db_name.clone();
    let vdb = fetch::fetch_vdb_from_communal(&options.db, &scope).await?;

    let mut instructions: Vec<Box<dyn ClusterOp>> = vec![
        Box::new(NmaReadCatalogEditorOp::new(
            options.db.hosts.clone(),
            options.db.db_name.clone(),
            options.db.catalog_prefix.clone(),
        )),
        Box::new(NmaReIpOp::new(options.re_ip_list.clone())),
    ];
    let mut ctx = options.db.make_context()?;
    let engine = ClusterOpEngine::new(options.db.credentials()?.clone());
    engine
        .run_with_vdb(&mut instructions, &mut ctx, vdb)
        .await
        .map_err(|e| e.with_step("fail to re-ip nodes"))?;
    info!(entries = options.re_ip_list.len(), "node addresses updated");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::CredentialSet;
    use crate::vdb::VNode;

    fn vdb() -> CoordinationDatabase {
        let mut vdb = CoordinationDatabase::new("db", true);
        for (i, primary) in [(1, true), (2, true), (3, true), (4, false)] {
            vdb.add_node(VNode {
                name: format!("v_db_node{i:04}"),
                address: format!("10.0.0.{i}"),
                catalog_path: "/cat".into(),
                data_path: "/dat".into(),
                depot_path: "/dep".into(),
                subcluster: "default_subcluster".into(),
                sandbox: String::new(),
                is_primary: primary,
                is_compute: false,
                state: NodeState::Up,
                version: String::new(),
            });
        }
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
    fn removing_too_many_primaries_breaks_quorum() {
        let mut opts = RemoveNodeOptions::builder()
            .db(db_options())
            .remove_raw_hosts(vec!["10.0.0.2".into(), "10.0.0.3".into()])
            .build();
        opts.validate_analyze().unwrap();
        let err = produce_remove_node_instructions(&opts, &vdb()).unwrap_err();
        assert!(err.is_quorum());
    }

    #[test]
    fn removing_a_secondary_keeps_quorum() {
        let mut opts = RemoveNodeOptions::builder()
            .db(db_options())
            .remove_raw_hosts(vec!["10.0.0.4".into()])
            .build();
        opts.validate_analyze().unwrap();
        let instructions = produce_remove_node_instructions(&opts, &vdb()).unwrap();
        assert_eq!(instructions[0].name(), "HTTPSDropNodeOp");
    }

    #[test]
    fn start_node_rejects_unknown_hosts() {
        let mut opts = StartNodeOptions::builder()
            .db(db_options())
            .node_raw_hosts(vec!["10.9.9.9".into()])
            .build();
        opts.validate_analyze().unwrap();
        match produce_start_node_instructions(&opts, &vdb()).unwrap_err() {
            OpsError::Precondition(_) => {}
            other => panic!("expected Precondition, got {other}"),
        }
    }

    #[test]
    fn add_node_refreshes_topology_before_start() {
        let mut opts = AddNodeOptions::builder()
            .db(db_options())
            .new_raw_hosts(vec!["10.0.0.9".into()])
            .build();
        opts.validate_analyze().unwrap();
        let instructions = produce_add_node_instructions(&opts, &vdb()).unwrap();
        let names: Vec<&str> = instructions.iter().map(|op| op.name()).collect();
        let refresh = names.iter().position(|n| *n == "HTTPSGetNodesInfoOp").unwrap();
        let start = names.iter().position(|n| *n == "NMAStartNodeOp").unwrap();
        assert!(refresh < start);
    }
}
