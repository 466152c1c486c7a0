//! End-to-end workflow tests against mock agents
//!
//! Two mock servers stand in for the per-host agents: one on the NMA
//! port, one on the catalog-service port. The test host is always
//! 127.0.0.1; the client settings point each service at its server.

use eon_ops::{
    ClientSettings, CreateDbOptions, CredentialSet, DatabaseOptions, DropDbOptions,
    GetDrainingStatusOptions, OpsError, ShowRestorePointsOptions, StopDbOptions, create_database,
    drop_database, get_draining_status, show_restore_points, stop_database,
};
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{basic_auth, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const HOST: &str = "127.0.0.1";

async fn agents() -> (MockServer, MockServer, ClientSettings) {
    let nma = MockServer::start().await;
    let https = MockServer::start().await;
    let settings = ClientSettings {
        scheme: "http".into(),
        nma_port: nma.address().port(),
        https_port: https.address().port(),
        request_timeout: Duration::from_secs(5),
    };
    (nma, https, settings)
}

fn db_options(settings: ClientSettings) -> DatabaseOptions {
    DatabaseOptions::builder()
        .db_name("db")
        .raw_hosts(vec![HOST.into()])
        .catalog_prefix("/cat")
        .data_prefix("/dat")
        .depot_prefix("/dep")
        .communal_storage_location("s3://b/db")
        .credentials(CredentialSet::password(Some("dbadmin".into()), "password"))
        .client_settings(settings)
        .build()
}

fn up_node_list() -> serde_json::Value {
    json!({
        "node_list": [{
            "name": "v_db_node0001",
            "address": HOST,
            "state": "UP",
            "is_primary": true,
            "subcluster": "default_subcluster",
            "catalog_path": "/cat/db/v_db_node0001_catalog",
        }]
    })
}

#[tokio::test]
async fn create_db_happy_path() {
    let (nma, https, settings) = agents().await;

    for endpoint in [
        "/v1/catalog/bootstrap",
        "/v1/catalog/spread-security",
        "/v1/startup/command",
    ] {
        Mock::given(method("POST"))
            .and(path(endpoint))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&nma)
            .await;
    }
    Mock::given(method("POST"))
        .and(path("/v1/catalog/database"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "db_name": "db",
            "catalog_version": 1,
            "is_primary": true,
        })))
        .expect(1)
        .mount(&nma)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/health"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&nma)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/network-profiles"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "address": HOST,
            "subnet": "127.0.0.0/8",
            "netmask": "255.0.0.0",
            "broadcast": "127.255.255.255",
        })))
        .expect(1)
        .mount(&nma)
        .await;

    Mock::given(method("GET"))
        .and(path("/v1/nodes"))
        .and(basic_auth("dbadmin", "password"))
        .respond_with(ResponseTemplate::new(200).set_body_json(up_node_list()))
        .mount(&https)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/packages"))
        .and(basic_auth("dbadmin", "password"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "packages": [{"package_name": "flextable", "install_status": "installed"}]
        })))
        .expect(1)
        .mount(&https)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/cluster/catalog/sync"))
        .and(basic_auth("dbadmin", "password"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&https)
        .await;

    let mut options = CreateDbOptions::builder().db(db_options(settings)).build();
    let vdb = create_database(&mut options).await.unwrap();
    assert_eq!(vdb.host_list, vec![HOST.to_string()]);
    assert_eq!(vdb.node(HOST).unwrap().name, "v_db_node0001");
}

#[tokio::test]
async fn drop_db_with_failing_host_touches_no_directory() {
    let (nma, _https, settings) = agents().await;

    Mock::given(method("GET"))
        .and(path("/v1/health"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({"error": "agent down"})))
        .mount(&nma)
        .await;
    // the delete endpoint must never be reached
    Mock::given(method("POST"))
        .and(path("/v1/files/delete"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(0)
        .mount(&nma)
        .await;

    let mut options = DropDbOptions::builder().db(db_options(settings)).build();
    let err = drop_database(&mut options).await.unwrap_err();
    match err {
        OpsError::PartialFailure { summary, .. } => {
            assert!(summary.contains("NMAHealthOp"), "unexpected summary: {summary}");
        }
        other => panic!("expected PartialFailure, got {other}"),
    }
}

#[tokio::test]
async fn stop_db_picks_a_primary_up_initiator() {
    let (nma, https, settings) = agents().await;

    Mock::given(method("GET"))
        .and(path("/v1/health"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&nma)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/nodes"))
        .and(basic_auth("dbadmin", "password"))
        .respond_with(ResponseTemplate::new(200).set_body_json(up_node_list()))
        .mount(&https)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/cluster/shutdown"))
        .and(basic_auth("dbadmin", "password"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&https)
        .await;

    let mut options = StopDbOptions::builder().db(db_options(settings)).build();
    stop_database(&mut options).await.unwrap();
}

#[tokio::test]
async fn draining_status_rows_come_back_typed() {
    let (nma, https, settings) = agents().await;

    Mock::given(method("GET"))
        .and(path("/v1/health"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&nma)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/nodes"))
        .respond_with(ResponseTemplate::new(200).set_body_json(up_node_list()))
        .mount(&https)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/connections/drain/status"))
        .and(basic_auth("dbadmin", "password"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "draining_status_list": [{
                "subcluster_name": "default_subcluster",
                "drain_status": "pausing",
                "active_connection_count": 3,
            }]
        })))
        .mount(&https)
        .await;

    let mut options = GetDrainingStatusOptions::builder()
        .db(db_options(settings))
        .build();
    let rows = get_draining_status(&mut options).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].subcluster_name, "default_subcluster");
    assert_eq!(rows[0].active_connection_count, 3);
}

#[tokio::test]
async fn restore_points_are_filtered_server_side() {
    let (nma, https, settings) = agents().await;

    Mock::given(method("GET"))
        .and(path("/v1/health"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&nma)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/nodes"))
        .respond_with(ResponseTemplate::new(200).set_body_json(up_node_list()))
        .mount(&https)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/restore-points"))
        .and(wiremock::matchers::query_param("archive", "weekly"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "restore_points": [{
                "archive": "weekly",
                "id": "rp-1",
                "index": 1,
                "timestamp": "2026-07-30T01:00:00Z",
            }]
        })))
        .expect(1)
        .mount(&https)
        .await;

    let mut options = ShowRestorePointsOptions::builder()
        .db(db_options(settings))
        .archive_name("weekly")
        .build();
    let points = show_restore_points(&mut options).await.unwrap();
    assert_eq!(points.len(), 1);
    assert_eq!(points[0].archive, "weekly");
}

#[tokio::test]
async fn authentication_failure_aborts_the_workflow() {
    let (nma, https, settings) = agents().await;

    Mock::given(method("GET"))
        .and(path("/v1/health"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&nma)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/nodes"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&https)
        .await;

    let mut options = StopDbOptions::builder().db(db_options(settings)).build();
    let err = stop_database(&mut options).await.unwrap_err();
    assert!(err.is_authentication(), "unexpected error: {err}");
}
