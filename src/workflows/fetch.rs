//! Coordination database retrieval
//!
//! Two strategies: ask a running database through the catalog service, or
//! reconstruct topology for a down database from the NMAs plus the
//! communal cluster description. In the second case the addresses of the
//! input hosts override the addresses recorded in the description, which
//! keeps the snapshot correct after a re-IP.

use crate::error::Result;
use crate::ops::ClusterOp;
use crate::ops::engine::ClusterOpEngine;
use crate::ops::https_cluster::HttpsGetNodesInfoOp;
use crate::ops::nma_cluster::{NmaGetNodesInfoOp, NmaHealthOp};
use crate::ops::nma_files::{ClusterConfig, NmaDownloadFileOp, cluster_config_path};
use crate::vdb::{CoordinationDatabase, NodeState, VNode};
use crate::workflows::DatabaseOptions;
use std::collections::BTreeMap;

/// Fetch the vdb from a running database through `/nodes`.
pub async fn fetch_vdb_from_running_db(
    options: &DatabaseOptions,
    sandbox: Option<&str>,
) -> Result<CoordinationDatabase> {
    let mut ctx = options.make_context()?;
    if let Some(sandbox) = sandbox {
        ctx.set_sandbox(sandbox);
    }
    let mut instructions: Vec<Box<dyn ClusterOp>> = vec![
        Box::new(NmaHealthOp::new(options.hosts.clone())),
        Box::new(HttpsGetNodesInfoOp::new(
            options.db_name.clone(),
            options.hosts.clone(),
        )),
    ];
    let engine = ClusterOpEngine::new(options.credentials()?.clone());
    engine
        .run(&mut instructions, &mut ctx)
        .await
        .map_err(|e| e.with_step("fail to retrieve cluster topology"))?;
    ctx.take_vdb()
}

/// Fetch the vdb for a down database: learn node names from the NMAs on
/// the input hosts, then download the communal description for the full
/// topology.
pub async fn fetch_vdb_from_communal(
    options: &DatabaseOptions,
    db_or_sandbox: &str,
) -> Result<CoordinationDatabase> {
    let mut ctx = options.make_context()?;
    let mut instructions: Vec<Box<dyn ClusterOp>> = vec![
        Box::new(NmaHealthOp::new(options.hosts.clone())),
        Box::new(NmaGetNodesInfoOp::new(
            options.hosts.clone(),
            options.db_name.clone(),
            options.catalog_prefix.clone(),
        )),
        Box::new(NmaDownloadFileOp::new(
            options.hosts.clone(),
            cluster_config_path(db_or_sandbox),
            options.communal_storage_location.clone(),
        )),
    ];
    let engine = ClusterOpEngine::new(options.credentials()?.clone());
    let seed = CoordinationDatabase::new(options.db_name.clone(), options.is_eon);
    engine
        .run_with_vdb(&mut instructions, &mut ctx, seed)
        .await
        .map_err(|e| e.with_step("fail to retrieve cluster description"))?;

    let nma_view = ctx.take_vdb()?;
    let config = ctx.cluster_config()?;
    let overrides: BTreeMap<String, String> = nma_view
        .nodes()
        .map(|n| (n.name.clone(), n.address.clone()))
        .collect();
    let vdb = build_vdb_from_config(config, &options.communal_storage_location, &overrides);
    vdb.validate()?;
    Ok(vdb)
}

/// Build a vdb from the communal description, applying address overrides
/// keyed by node name.
pub fn build_vdb_from_config(
    config: &ClusterConfig,
    communal_storage_location: &str,
    address_overrides: &BTreeMap<String, String>,
) -> CoordinationDatabase {
    let mut vdb = CoordinationDatabase::new(config.database_name.clone(), true);
    vdb.communal_storage_location = if config.communal_storage_location.is_empty() {
        communal_storage_location.to_string()
    } else {
        config.communal_storage_location.clone()
    };
    for node in &config.nodes {
        let address = address_overrides
            .get(&node.name)
            .cloned()
            .unwrap_or_else(|| node.address.clone());
        vdb.add_node(VNode {
            name: node.name.clone(),
            address,
            catalog_path: node.catalog_path.clone(),
            data_path: node.data_path.clone(),
            depot_path: node.depot_path.clone(),
            subcluster: node.subcluster.clone(),
            sandbox: node.sandbox.clone(),
            is_primary: node.is_primary,
            is_compute: false,
            state: NodeState::Down,
            version: String::new(),
        });
    }
    vdb
}
