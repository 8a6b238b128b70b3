//! State-of-the-world session tests against an in-process ADS server.

mod common;

use std::time::Duration;

use common::resources::{
    eds_cluster, eds_cluster_with_service, garbage, http_listener, load_assignment,
    route_config, sotw_response, static_cluster,
};
use common::{expect_update, MockAds, WAIT};
use envoy_types::pb::google::protobuf::Any;
use flowplane_adsc::xds::type_url::{
    CLUSTER_TYPE_URL, ENDPOINT_TYPE_URL, LISTENER_TYPE_URL, ROUTE_TYPE_URL,
};
use flowplane_adsc::xds::{self, AdsClient, AdsSession};
use flowplane_adsc::{AdscError, Event, ResourceType};
use tracing_test::traced_test;

const QUIET: Duration = Duration::from_millis(300);

/// Connect and answer the initial cluster watch with `clusters`. The requests
/// that response triggers are left for the caller to read.
async fn converged_on_clusters(server: &mut MockAds, clusters: Vec<Any>) -> AdsClient {
    let client = AdsClient::connect(&server.config()).await.unwrap();
    let initial = server.next_sotw_request().await;
    assert_eq!(initial.type_url, CLUSTER_TYPE_URL);

    let response = sotw_response(CLUSTER_TYPE_URL, "1", "n1", clusters);
    server.push(response).await;
    expect_update(&client, ResourceType::Cluster).await;
    client
}

#[tokio::test]
async fn test_connect_sends_cluster_watch_with_node() {
    let mut server = MockAds::start().await;
    let client = AdsClient::connect(&server.config()).await.unwrap();

    let initial = server.next_sotw_request().await;
    assert_eq!(initial.type_url, CLUSTER_TYPE_URL);
    assert!(initial.resource_names.is_empty());
    assert!(initial.response_nonce.is_empty());
    let node = initial.node.expect("first request carries the node");
    assert_eq!(node.id, client.node_id());
    assert_eq!(
        node.id,
        "sidecar~10.0.0.1~adsc.default~default.svc.cluster.local"
    );

    // Already subscribed by connect
    client.watch().await.unwrap();
    server.expect_no_sotw_request(QUIET).await;
    client.close();
}

#[tokio::test]
async fn test_cluster_push_drives_endpoint_and_listener_watches() {
    let mut server = MockAds::start().await;
    let client = AdsClient::connect(&server.config()).await.unwrap();
    server.next_sotw_request().await;

    let clusters = vec![
        eds_cluster("b"),
        static_cluster("s"),
        eds_cluster_with_service("a", "a-eds"),
    ];
    server
        .push(sotw_response(CLUSTER_TYPE_URL, "1", "n1", clusters))
        .await;

    let eds = server.next_sotw_request().await;
    assert_eq!(eds.type_url, ENDPOINT_TYPE_URL);
    assert_eq!(eds.resource_names, vec!["a-eds", "b"]);
    assert!(eds.version_info.is_empty());
    assert!(eds.response_nonce.is_empty());
    assert!(eds.node.is_none());

    let ack = server.next_sotw_request().await;
    assert_eq!(ack.type_url, CLUSTER_TYPE_URL);
    assert_eq!(ack.version_info, "1");
    assert_eq!(ack.response_nonce, "n1");
    assert!(ack.resource_names.is_empty());

    let lds = server.next_sotw_request().await;
    assert_eq!(lds.type_url, LISTENER_TYPE_URL);
    assert!(lds.resource_names.is_empty());

    expect_update(&client, ResourceType::Cluster).await;
    let snapshot = client.responses();
    assert_eq!(snapshot.names(ResourceType::Cluster), vec!["a", "b", "s"]);
    client.close();
}

#[tokio::test]
async fn test_listener_push_subscribes_routes_once() {
    let mut server = MockAds::start().await;
    let client = converged_on_clusters(&mut server, vec![static_cluster("s")]).await;
    // ACK and listener watch; no endpoint request for static clusters
    let ack = server.next_sotw_request().await;
    assert_eq!(ack.type_url, CLUSTER_TYPE_URL);
    let lds = server.next_sotw_request().await;
    assert_eq!(lds.type_url, LISTENER_TYPE_URL);

    let listeners = vec![http_listener("l1", "r1"), http_listener("l2", "r1")];
    let response = sotw_response(LISTENER_TYPE_URL, "1", "l-1", listeners.clone());
    server.push(response).await;

    let rds = server.next_sotw_request().await;
    assert_eq!(rds.type_url, ROUTE_TYPE_URL);
    assert_eq!(rds.resource_names, vec!["r1"]);
    let ack = server.next_sotw_request().await;
    assert_eq!(ack.type_url, LISTENER_TYPE_URL);
    assert_eq!(ack.response_nonce, "l-1");

    // Same listeners again: only the ACK
    let response = sotw_response(LISTENER_TYPE_URL, "2", "l-2", listeners);
    server.push(response).await;
    let ack = server.next_sotw_request().await;
    assert_eq!(ack.type_url, LISTENER_TYPE_URL);
    assert_eq!(ack.version_info, "2");
    server.expect_no_sotw_request(QUIET).await;

    let routes = vec![route_config("r1")];
    server
        .push(sotw_response(ROUTE_TYPE_URL, "1", "r-1", routes))
        .await;
    let ack = server.next_sotw_request().await;
    assert_eq!(ack.type_url, ROUTE_TYPE_URL);
    assert_eq!(ack.resource_names, vec!["r1"]);

    expect_update(&client, ResourceType::RouteConfiguration).await;
    let stored = client.responses();
    let route = stored.resource(ResourceType::RouteConfiguration, "r1");
    assert!(route.is_some());
    client.close();
}

#[tokio::test]
async fn test_partial_endpoint_push_acks_full_set() {
    let mut server = MockAds::start().await;
    let clusters = vec![eds_cluster("x"), eds_cluster("y")];
    let client = converged_on_clusters(&mut server, clusters).await;
    let eds = server.next_sotw_request().await;
    assert_eq!(eds.resource_names, vec!["x", "y"]);
    server.next_sotw_request().await;
    server.next_sotw_request().await;

    let endpoints = vec![load_assignment("x")];
    server
        .push(sotw_response(ENDPOINT_TYPE_URL, "1", "e-1", endpoints))
        .await;
    let ack = server.next_sotw_request().await;
    assert_eq!(ack.type_url, ENDPOINT_TYPE_URL);
    assert_eq!(ack.resource_names, vec!["x", "y"]);
    assert_eq!(ack.response_nonce, "e-1");

    let watches = client.watches();
    let endpoints = &watches[&ResourceType::ClusterLoadAssignment];
    assert_eq!(endpoints.last_nonce, "e-1");
    assert_eq!(endpoints.last_version, "1");
    client.close();
}

#[tokio::test]
async fn test_cluster_removal_shrinks_endpoint_subscription() {
    let mut server = MockAds::start().await;
    let clusters = vec![eds_cluster("x"), eds_cluster("y")];
    let client = converged_on_clusters(&mut server, clusters).await;
    for _ in 0..3 {
        server.next_sotw_request().await;
    }

    let clusters = vec![eds_cluster("y")];
    server
        .push(sotw_response(CLUSTER_TYPE_URL, "2", "n2", clusters))
        .await;
    let eds = server.next_sotw_request().await;
    assert_eq!(eds.type_url, ENDPOINT_TYPE_URL);
    assert_eq!(eds.resource_names, vec!["y"]);
    let ack = server.next_sotw_request().await;
    assert_eq!(ack.type_url, CLUSTER_TYPE_URL);
    assert_eq!(ack.version_info, "2");

    // Listener watch is only sent after the first cluster response
    server.expect_no_sotw_request(QUIET).await;
    client.close();
}

#[tokio::test]
#[traced_test]
async fn test_undecodable_resources_are_skipped() {
    let mut server = MockAds::start().await;
    let clusters = vec![eds_cluster("good"), garbage(CLUSTER_TYPE_URL)];
    let client = converged_on_clusters(&mut server, clusters).await;

    let eds = server.next_sotw_request().await;
    assert_eq!(eds.resource_names, vec!["good"]);
    let ack = server.next_sotw_request().await;
    assert_eq!(ack.response_nonce, "n1");

    let stored = client.responses();
    assert_eq!(stored.names(ResourceType::Cluster), vec!["good"]);
    assert!(logs_contain("Skipping undecodable resource"));
    client.close();
}

#[tokio::test]
async fn test_stream_failure_delivers_single_close() {
    let mut server = MockAds::start().await;
    let session = xds::connect(&server.config()).await.unwrap();
    server.next_sotw_request().await;

    let status = tonic::Status::unavailable("control plane restarting");
    server.fail_sotw(status).await;

    let event = session.wait(Some(Event::Close), WAIT).await.unwrap();
    assert_eq!(event, Event::Close);
    assert!(session.is_closed());
    assert!(session.watches().is_empty());

    let after = session.wait(None, Duration::from_millis(100)).await;
    assert!(matches!(after, Err(AdscError::Closed)));
    assert!(matches!(session.watch().await, Err(AdscError::Closed)));

    session.close();
    let after = session.wait(None, Duration::from_millis(50)).await;
    assert!(after.is_err());
}

#[tokio::test]
async fn test_close_is_prompt_and_idempotent() {
    let mut server = MockAds::start().await;
    let session = xds::connect(&server.config()).await.unwrap();
    server.next_sotw_request().await;

    tokio::time::timeout(Duration::from_millis(200), async {
        session.close();
        session.close();
    })
    .await
    .unwrap();

    assert_eq!(session.wait(None, WAIT).await.unwrap(), Event::Close);
    let after = session.wait(None, Duration::from_millis(50)).await;
    assert!(after.is_err());
}

#[tokio::test]
async fn test_wait_timeout_without_updates() {
    let mut server = MockAds::start().await;
    let session = xds::connect(&server.config()).await.unwrap();
    server.next_sotw_request().await;

    let want = Event::Update(ResourceType::Listener);
    let result = session.wait(Some(want), Duration::from_millis(100)).await;
    match result {
        Err(AdscError::Timeout { operation, .. }) => assert_eq!(operation, "wait for lds"),
        other => panic!("expected timeout, got {:?}", other),
    }
    session.close();
}
