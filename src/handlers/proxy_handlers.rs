//! The request dispatcher: entry point for every inbound HTTP request.
//!
//! Buffers the body, classifies the addressing, forwards to the primary in
//! the original style, and relays the primary's response verbatim. For
//! successful mutating object requests it spawns the detached inventory +
//! mirror continuation. The dispatcher never retries and never rewrites an
//! upstream response.

use crate::{
    errors::AppError,
    services::{
        addressing::{self, S3Address},
        proxy_service::{self, ProxyError, ProxyService, ReplicationJob},
    },
};
use axum::{
    body::Body,
    extract::{Request, State},
    http::{HeaderMap, HeaderName, Method, StatusCode, header, request::Parts},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use tracing::{debug, error};

/// Handle one inbound request end to end.
pub async fn dispatch(State(proxy): State<ProxyService>, request: Request) -> Response {
    let (parts, body) = request.into_parts();

    // SigV4 needs the payload hash and the mirror replay needs its own
    // copy, so the body is buffered whole.
    let body_bytes = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(err) => {
            error!("failed to read request body: {err}");
            return AppError::new(StatusCode::BAD_REQUEST, "failed to read request body")
                .into_response();
        }
    };

    let host = request_host(&parts);
    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let address = addressing::parse_address(&host, parts.uri.path(), proxy.proxy_domain());

    let upstream = match proxy
        .forward(
            parts.method.clone(),
            &address,
            path_and_query,
            &parts.headers,
            body_bytes.clone(),
        )
        .await
    {
        Ok(response) => response,
        Err(err @ ProxyError::Transport(_)) => {
            error!("{err}");
            return AppError::bad_gateway("failed to forward request to S3").into_response();
        }
        Err(err) => {
            error!("{err}");
            return AppError::internal("failed to create forward request").into_response();
        }
    };

    let status = upstream.status();
    let response_headers = upstream.headers().clone();
    let response_body = match upstream.bytes().await {
        Ok(bytes) => bytes,
        Err(err) => {
            error!("failed to read response from S3: {err}");
            return AppError::bad_gateway("failed to read response from S3").into_response();
        }
    };

    if status.is_success() && address.is_object_request() {
        debug!(
            "s3 operation: {} {}/{} - status {}",
            parts.method,
            address.bucket,
            address.key,
            status.as_u16()
        );
        spawn_async_work(
            &proxy,
            &parts.method,
            &parts.headers,
            &address,
            &body_bytes,
            &response_headers,
        );
    } else if status.as_u16() >= 400 {
        error!(
            "s3 operation failed: {} {}/{} - status {}",
            parts.method,
            address.bucket,
            address.key,
            status.as_u16()
        );
    }

    relay_response(status, &response_headers, response_body)
}

/// Detach the inventory + mirror continuation for PUT/POST/DELETE. Other
/// methods (GET, HEAD, LIST, ...) have nothing to replicate.
fn spawn_async_work(
    proxy: &ProxyService,
    method: &Method,
    inbound_headers: &HeaderMap,
    address: &S3Address,
    body: &Bytes,
    response_headers: &HeaderMap,
) {
    if *method != Method::PUT && *method != Method::POST && *method != Method::DELETE {
        return;
    }

    let body = if *method == Method::DELETE {
        Bytes::new()
    } else {
        body.clone()
    };

    proxy.spawn_replication(ReplicationJob {
        bucket: address.bucket.clone(),
        key: address.key.clone(),
        style: address.style,
        method: method.clone(),
        size: proxy_service::object_size(response_headers, &body),
        content_type: proxy_service::object_content_type(response_headers),
        forward_headers: proxy_service::forwardable_headers(inbound_headers),
        body,
    });
}

/// The inbound host: the `Host` header for HTTP/1.1, the URI authority for
/// HTTP/2-style requests.
fn request_host(parts: &Parts) -> String {
    parts
        .headers
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .or_else(|| parts.uri.authority().map(|authority| authority.to_string()))
        .unwrap_or_default()
}

/// Relay status, headers and body from the primary. Hop-by-hop headers are
/// dropped; the buffered relay re-frames the body itself.
fn relay_response(
    status: StatusCode,
    response_headers: &HeaderMap,
    response_body: Bytes,
) -> Response {
    let mut response = Response::new(Body::from(response_body));
    *response.status_mut() = status;
    for (name, value) in response_headers.iter() {
        if !is_hop_by_hop(name) {
            response.headers_mut().append(name.clone(), value.clone());
        }
    }
    response
}

fn is_hop_by_hop(name: &HeaderName) -> bool {
    matches!(
        name.as_str(),
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "te"
            | "trailer"
            | "transfer-encoding"
            | "upgrade"
    )
}
