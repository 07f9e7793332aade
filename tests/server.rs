//! End-to-end tests over a real socket.

mod common;

use std::time::Duration;

use common::*;
use request_pipeline::config::Environment;
use request_pipeline::build_application;

#[tokio::test]
async fn serves_diagnostics_with_socket_addresses() {
    let (addr, shutdown, handle) = spawn_server(build_application(&config(Environment::Test))).await;

    let client = reqwest::Client::new();
    let response = client
        .get(format!("http://{addr}/"))
        .header("x-forwarded-for", "198.51.100.4")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let text = response.text().await.unwrap();

    assert!(text.contains("req.ip: 127.0.0.1"), "{text}");
    assert!(text.contains("req.socket.localAddress: 127.0.0.1"), "{text}");
    assert!(text.contains("req.socket.remoteAddress: 127.0.0.1"), "{text}");
    assert!(text.contains("request.headers[\"x-forwarded-for\"]: 198.51.100.4"), "{text}");
    drop(client);

    shutdown.trigger();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn serves_json_errors() {
    let (addr, shutdown, handle) =
        spawn_server(build_application(&config(Environment::Production))).await;

    let response = reqwest::get(format!("http://{addr}/missing")).await.unwrap();
    assert_eq!(response.status(), 404);
    assert_eq!(response.headers()["x-content-type-options"], "nosniff");
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body, serde_json::json!({ "code": 404, "message": "Not found" }));

    shutdown.trigger();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn shutdown_stops_accepting() {
    let (addr, shutdown, handle) = spawn_server(build_application(&config(Environment::Test))).await;

    assert_eq!(
        reqwest::get(format!("http://{addr}/")).await.unwrap().status(),
        200
    );

    shutdown.trigger();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("server did not stop")
        .unwrap()
        .unwrap();

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(1))
        .build()
        .unwrap();
    assert!(client.get(format!("http://{addr}/")).send().await.is_err());
}
