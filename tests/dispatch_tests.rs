//! Dispatcher and HTTP client tests

use eon_ops::{
    AgentClient, AgentService, CredentialSet, Dispatcher, HostRequest, HttpMethod, OpsError,
};
use serde_json::json;
use std::collections::BTreeMap;
use std::time::Duration;
use wiremock::matchers::{basic_auth, body_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client_for(server: &MockServer) -> AgentClient {
    let port = server.address().port();
    AgentClient::builder()
        .scheme("http")
        .nma_port(port)
        .https_port(port)
        .credentials(CredentialSet::password(Some("dbadmin".into()), "password"))
        .build()
        .unwrap()
}

fn nma_get(endpoint: &str) -> HostRequest {
    HostRequest::builder()
        .service(AgentService::Nma)
        .method(HttpMethod::Get)
        .endpoint(endpoint)
        .build()
}

#[tokio::test]
async fn every_host_is_keyed_in_the_result_collection() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/health"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&server)
        .await;

    let dispatcher = Dispatcher::new(client_for(&server));
    let mut requests = BTreeMap::new();
    // the second loopback address has no listener on this port
    requests.insert("127.0.0.1".to_string(), nma_get("health"));
    requests.insert("127.1.1.1".to_string(), nma_get("health"));

    let results = dispatcher.fan_out(&requests).await;
    assert_eq!(results.len(), 2);
    assert!(results.get("127.0.0.1").unwrap().is_success());
    let down = results.get("127.1.1.1").unwrap();
    assert!(!down.is_success());
    assert!(down.is_unreachable());
}

#[tokio::test]
async fn https_requests_carry_basic_auth_and_query_params() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/nodes"))
        .and(basic_auth("dbadmin", "password"))
        .and(query_param("db_name", "db"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"node_list": []})))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let mut request = HostRequest::builder()
        .service(AgentService::CatalogService)
        .method(HttpMethod::Get)
        .endpoint("nodes")
        .username("dbadmin".to_string())
        .password("password".to_string())
        .build();
    request.query.insert("db_name".into(), "db".into());

    let result = client.issue("127.0.0.1", &request).await;
    assert!(result.is_success());
    assert_eq!(result.status, 200);
}

#[tokio::test]
async fn post_bodies_are_sent_as_json() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/files/delete"))
        .and(body_json(json!({"directories": ["/cat/db"], "force_delete": true})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let request = HostRequest::builder()
        .service(AgentService::Nma)
        .method(HttpMethod::Post)
        .endpoint("files/delete")
        .body(json!({"directories": ["/cat/db"], "force_delete": true}))
        .build();
    let result = client.issue("127.0.0.1", &request).await;
    assert!(result.is_success());
}

#[tokio::test]
async fn unauthorized_is_classified_as_credential_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/nodes"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let result = client
        .issue(
            "127.0.0.1",
            &HostRequest::builder()
                .service(AgentService::CatalogService)
                .method(HttpMethod::Get)
                .endpoint("nodes")
                .build(),
        )
        .await;
    assert!(result.is_password_and_certificate_error());
    match result.to_error("HTTPSGetUpNodesOp").unwrap() {
        OpsError::Authentication { host, .. } => assert_eq!(host, "127.0.0.1"),
        other => panic!("expected Authentication, got {other}"),
    }
}

#[tokio::test]
async fn slow_responses_hit_the_per_request_timeout() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/health"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({}))
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    let client = client_for(&server);
    let request = HostRequest::builder()
        .service(AgentService::Nma)
        .method(HttpMethod::Get)
        .endpoint("health")
        .timeout(Duration::from_millis(200))
        .build();
    let result = client.issue("127.0.0.1", &request).await;
    assert!(result.is_timeout());
}

#[tokio::test]
async fn remote_errors_keep_the_body_and_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/cluster/shutdown"))
        .respond_with(
            ResponseTemplate::new(500).set_body_json(json!({"error": "nodes still up"})),
        )
        .mount(&server)
        .await;

    let client = client_for(&server);
    let result = client
        .issue(
            "127.0.0.1",
            &HostRequest::builder()
                .service(AgentService::CatalogService)
                .method(HttpMethod::Post)
                .endpoint("cluster/shutdown")
                .body(json!({}))
                .build(),
        )
        .await;
    match result.to_error("HTTPSStopDBOp").unwrap() {
        OpsError::Remote { code, message, .. } => {
            assert_eq!(code, 500);
            assert!(message.contains("nodes still up"));
        }
        other => panic!("expected Remote, got {other}"),
    }
}
