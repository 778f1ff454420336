//! Request logging middleware: method, path, status, and latency for every
//! request except the health probe.

use std::net::SocketAddr;
use std::time::Instant;

use axum::{
    body::Body,
    extract::ConnectInfo,
    http::Request,
    middleware::Next,
    response::Response,
};
use tracing::{info, warn};

pub async fn request_logging(
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    // Health probes are noise.
    if path == "/health" {
        return next.run(request).await;
    }

    let start = Instant::now();
    let response = next.run(request).await;
    let status = response.status().as_u16();
    let latency_ms = start.elapsed().as_millis();

    if status >= 400 {
        warn!(%method, %path, status, latency_ms = latency_ms as u64, client_ip = %addr.ip(), "request failed");
    } else {
        info!(%method, %path, status, latency_ms = latency_ms as u64, client_ip = %addr.ip(), "request");
    }

    response
}
