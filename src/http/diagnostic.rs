//! Root diagnostic route: echoes what the server knows about the caller.
//!
//! Debugging aid only. The forwarded header is reported verbatim and is
//! not trusted for anything else.

use axum::extract::{Request, State};

use crate::http::connection::{client_ip, connection_meta, forwarded_for};

#[derive(Debug, Clone, Copy)]
pub struct DiagnosticState {
    pub trust_forwarded: bool,
}

pub async fn connection_report(State(state): State<DiagnosticState>, request: Request) -> String {
    let meta = connection_meta(&request);
    let ip = client_ip(&request, state.trust_forwarded)
        .map(|ip| ip.to_string())
        .unwrap_or_default();
    let local = meta
        .and_then(|m| m.local_addr)
        .map(|addr| addr.ip().to_string())
        .unwrap_or_default();
    let remote = meta
        .map(|m| m.remote_addr.ip().to_string())
        .unwrap_or_default();
    let forwarded = forwarded_for(request.headers()).unwrap_or_default();

    tracing::debug!(
        ip = %ip,
        local_address = %local,
        remote_address = %remote,
        forwarded_for = %forwarded,
        "Connection report"
    );

    format!(
        "Hello world, req.ip: {ip}, req.socket.localAddress: {local}, \
         req.socket.remoteAddress: {remote}, \
         request.headers[\"x-forwarded-for\"]: {forwarded}"
    )
}
