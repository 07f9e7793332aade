//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{Request, Response};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use request_pipeline::config::{AppConfig, Environment};
use request_pipeline::http::ConnectionMeta;
use request_pipeline::{Application, HttpServer, Shutdown};

pub const SECRET: &str = "integration-secret";

pub fn local() -> SocketAddr {
    "127.0.0.1:3000".parse().unwrap()
}

pub fn peer() -> SocketAddr {
    "10.1.2.3:54321".parse().unwrap()
}

/// Default configuration for `environment` with a known JWT secret.
pub fn config(environment: Environment) -> AppConfig {
    let mut config = AppConfig {
        environment,
        ..AppConfig::default()
    };
    config.jwt.secret = SECRET.to_string();
    config
}

/// Attach the connection addresses the server would record.
pub fn with_peer(mut request: Request<Body>) -> Request<Body> {
    request
        .extensions_mut()
        .insert(ConnectInfo(ConnectionMeta::new(local(), peer())));
    request
}

pub fn get(uri: &str) -> Request<Body> {
    with_peer(Request::get(uri).body(Body::empty()).unwrap())
}

pub fn post(uri: &str, content_type: &str, body: impl Into<Body>) -> Request<Body> {
    with_peer(
        Request::post(uri)
            .header("content-type", content_type)
            .body(body.into())
            .unwrap(),
    )
}

/// Run `request` through the application in-process.
pub async fn send(app: &Application, request: Request<Body>) -> Response<Body> {
    app.handle(request).await
}

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

pub async fn body_text(response: Response<Body>) -> String {
    String::from_utf8(body_bytes(response).await).unwrap()
}

pub async fn body_json(response: Response<Body>) -> Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

/// Serve `app` on an ephemeral port. Returns the bound address, the
/// shutdown handle and the server task.
pub async fn spawn_server(
    app: Application,
) -> (SocketAddr, Shutdown, JoinHandle<Result<(), std::io::Error>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = Shutdown::new();
    let receiver = shutdown.subscribe();
    let handle = tokio::spawn(HttpServer::from_application(app).run(listener, receiver));
    (addr, shutdown, handle)
}
