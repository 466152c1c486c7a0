//! Operation-level tests for runtime initiator selection

use eon_ops::ops::nma_catalog::{NmaGetConfigParamOp, NmaSpreadSecurityOp, SpreadKey};
use eon_ops::{
    AgentClient, ClusterOp, CoordinationDatabase, Dispatcher, ExecContext, NodeState, OpsError,
    VNode,
};

fn context() -> ExecContext {
    let client = AgentClient::builder().build().unwrap();
    ExecContext::new(Dispatcher::new(client))
}

fn node(address: &str, is_primary: bool) -> VNode {
    VNode {
        name: format!("v_db_node_{address}"),
        address: address.to_string(),
        catalog_path: "/cat".into(),
        data_path: "/dat".into(),
        depot_path: "/dep".into(),
        subcluster: "default_subcluster".into(),
        sandbox: String::new(),
        is_primary,
        is_compute: false,
        state: NodeState::Up,
        version: String::new(),
    }
}

#[tokio::test]
async fn spread_security_targets_the_primary_with_latest_catalog() {
    let mut ctx = context();
    let mut vdb = CoordinationDatabase::new("db", true);
    vdb.add_node(node("10.0.0.1", false));
    vdb.add_node(node("10.0.0.2", true));
    ctx.set_vdb(vdb);
    // h1 is secondary, h2 is primary; both carry the latest catalog
    ctx.set_hosts_with_latest_catalog(vec!["10.0.0.1".into(), "10.0.0.2".into()]);

    let mut op = NmaSpreadSecurityOp::new(SpreadKey::generate());
    op.prepare(&mut ctx).await.unwrap();

    let hosts: Vec<&String> = op.base().requests().keys().collect();
    assert_eq!(hosts, vec!["10.0.0.2"]);
}

#[tokio::test]
async fn spread_security_without_a_primary_is_a_precondition_error() {
    let mut ctx = context();
    let mut vdb = CoordinationDatabase::new("db", true);
    vdb.add_node(node("10.0.0.1", false));
    ctx.set_vdb(vdb);
    ctx.set_hosts_with_latest_catalog(vec!["10.0.0.1".into()]);

    let mut op = NmaSpreadSecurityOp::new(SpreadKey::generate());
    match op.prepare(&mut ctx).await.unwrap_err() {
        OpsError::Precondition(msg) => assert!(msg.contains("latest catalog")),
        other => panic!("expected Precondition, got {other}"),
    }
}

#[tokio::test]
async fn spread_key_payload_is_keyed_by_the_key_id() {
    let mut ctx = context();
    let mut vdb = CoordinationDatabase::new("db", true);
    vdb.add_node(node("10.0.0.1", true));
    ctx.set_vdb(vdb);
    ctx.set_hosts_with_latest_catalog(vec!["10.0.0.1".into()]);

    let key = SpreadKey::generate();
    let key_id = key.key_id().to_string();
    let mut op = NmaSpreadSecurityOp::new(key);
    op.prepare(&mut ctx).await.unwrap();

    // the wire payload carries the key, but the op's debug form must not
    let request = op.base().requests().values().next().unwrap();
    let body = request.body.as_ref().unwrap().to_string();
    assert!(body.contains(&key_id));
}

#[tokio::test]
async fn config_parameter_reads_go_through_one_initiator() {
    let mut ctx = context();
    let mut op = NmaGetConfigParamOp::new(
        vec!["10.0.0.1".into()],
        "DepotSize",
        Some("database".into()),
    );
    op.prepare(&mut ctx).await.unwrap();

    assert_eq!(op.base().requests().len(), 1);
    let request = op.base().requests().get("10.0.0.1").unwrap();
    assert_eq!(request.endpoint, "configuration/get-configuration-parameter");
    let body = request.body.as_ref().unwrap();
    assert_eq!(body["parameter"], "DepotSize");
    assert_eq!(body["level"], "database");
}
