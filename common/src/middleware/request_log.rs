//! Request header logging.
//!
//! One INFO line per request with the client address and a handful of
//! headers. Values are truncated and the bearer token is never logged.

use std::net::SocketAddr;

use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{header, HeaderMap, Request},
    middleware::Next,
    response::Response,
};

/// Longest header value logged verbatim.
const MAX_LOGGED_LEN: usize = 100;

/// Request logging middleware handler.
pub async fn request_log_middleware(req: Request<Body>, next: Next) -> Response {
    let headers = req.headers();
    let client_ip = extract_client_ip(&req).unwrap_or_else(|| "unknown".to_string());
    let auth = if headers.contains_key(header::AUTHORIZATION) {
        "Bearer ***"
    } else {
        ""
    };

    tracing::info!(
        "Request: {} {} | IP={} | Origin={} | Referer={} | User-Agent={} | Accept={} | Accept-Lang={} | Accept-Enc={} | Content-Type={} | Auth={}",
        req.method(),
        req.uri().path(),
        client_ip,
        logged(headers, header::ORIGIN),
        logged(headers, header::REFERER),
        logged(headers, header::USER_AGENT),
        logged(headers, header::ACCEPT),
        logged(headers, header::ACCEPT_LANGUAGE),
        logged(headers, header::ACCEPT_ENCODING),
        logged(headers, header::CONTENT_TYPE),
        auth,
    );

    next.run(req).await
}

/// Client address: first `X-Forwarded-For` hop, then `X-Real-IP`, then the
/// peer address.
pub fn extract_client_ip(req: &Request<Body>) -> Option<String> {
    let forwarded = req
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty());
    if let Some(ip) = forwarded {
        return Some(ip.to_string());
    }

    let real_ip = req
        .headers()
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|ip| !ip.is_empty());
    if let Some(ip) = real_ip {
        return Some(ip.to_string());
    }

    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
}

fn logged(headers: &HeaderMap, name: header::HeaderName) -> String {
    let value = headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    truncate(value, MAX_LOGGED_LEN)
}

/// Cuts `value` to `max_chars` characters, appending `...` when cut.
pub fn truncate(value: &str, max_chars: usize) -> String {
    match value.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &value[..idx]),
        None => value.to_string(),
    }
}
