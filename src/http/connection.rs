//! Connection metadata and client address resolution.

use std::net::{IpAddr, SocketAddr};

use axum::extract::connect_info::{ConnectInfo, Connected};
use axum::http::{HeaderMap, Request};
use axum::serve::IncomingStream;
use tokio::net::TcpListener;

pub const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// Socket addresses captured when a connection is accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionMeta {
    pub local_addr: Option<SocketAddr>,
    pub remote_addr: SocketAddr,
}

impl ConnectionMeta {
    pub fn new(local_addr: SocketAddr, remote_addr: SocketAddr) -> Self {
        Self {
            local_addr: Some(local_addr),
            remote_addr,
        }
    }
}

impl Connected<IncomingStream<'_, TcpListener>> for ConnectionMeta {
    fn connect_info(stream: IncomingStream<'_, TcpListener>) -> Self {
        Self {
            local_addr: stream.io().local_addr().ok(),
            remote_addr: *stream.remote_addr(),
        }
    }
}

/// Connection metadata of a request, if it came through a listener that
/// records it.
pub fn connection_meta<B>(request: &Request<B>) -> Option<ConnectionMeta> {
    request
        .extensions()
        .get::<ConnectInfo<ConnectionMeta>>()
        .map(|ConnectInfo(meta)| *meta)
}

/// Raw `X-Forwarded-For` value.
pub fn forwarded_for(headers: &HeaderMap) -> Option<&str> {
    headers.get(X_FORWARDED_FOR).and_then(|v| v.to_str().ok())
}

/// The caller's apparent address.
///
/// With `trust_forwarded` the leftmost parseable `X-Forwarded-For` entry
/// wins; otherwise (and as a fallback) the socket peer address is used.
/// The result is for logging and rate-limit keys only, never for
/// authorization.
pub fn client_ip<B>(request: &Request<B>, trust_forwarded: bool) -> Option<IpAddr> {
    if trust_forwarded {
        let forwarded = forwarded_for(request.headers())
            .and_then(|value| value.split(',').next())
            .and_then(|first| first.trim().parse::<IpAddr>().ok());
        if forwarded.is_some() {
            return forwarded;
        }
    }
    connection_meta(request).map(|meta| meta.remote_addr.ip())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    fn request(xff: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri("/");
        if let Some(xff) = xff {
            builder = builder.header(X_FORWARDED_FOR, xff);
        }
        let mut request = builder.body(Body::empty()).unwrap();
        request.extensions_mut().insert(ConnectInfo(ConnectionMeta::new(
            "127.0.0.1:3000".parse().unwrap(),
            "10.0.0.7:51000".parse().unwrap(),
        )));
        request
    }

    #[test]
    fn forwarded_header_ignored_unless_trusted() {
        let req = request(Some("203.0.113.9, 10.0.0.1"));
        assert_eq!(client_ip(&req, false), Some("10.0.0.7".parse().unwrap()));
        assert_eq!(client_ip(&req, true), Some("203.0.113.9".parse().unwrap()));
    }

    #[test]
    fn garbage_forwarded_header_falls_back_to_peer() {
        let req = request(Some("not-an-ip"));
        assert_eq!(client_ip(&req, true), Some("10.0.0.7".parse().unwrap()));
    }

    #[test]
    fn no_connection_info_means_unknown_peer() {
        let req = Request::builder().uri("/").body(Body::empty()).unwrap();
        assert_eq!(client_ip(&req, false), None);
    }
}
