//! Query Handlers
//!
//! Catalog listing and dynamic execution by slug.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{ConnectInfo, Path, Query},
    http::{header, HeaderMap},
    Extension, Json,
};
use tracing::error;

use crate::execution::ClientInfo;
use crate::protocol::rest::dto::{QueryEndpointDto, QueryListDto, QueryResultDto};
use crate::protocol::rest::error::RestError;
use crate::protocol::Handler;

/// List active catalog queries
pub async fn list_queries(
    Extension(handler): Extension<Arc<Handler>>,
) -> Result<Json<QueryListDto>, RestError> {
    let definitions = handler.engine().list_active().await.map_err(|e| {
        error!(error = %e, "list_queries_failed");
        RestError::internal("failed to list queries")
    })?;

    let queries: Vec<QueryEndpointDto> = definitions
        .iter()
        .map(|def| QueryEndpointDto::from(def.as_ref()))
        .collect();
    let count = queries.len();
    Ok(Json(QueryListDto { queries, count }))
}

/// Execute the query registered under `slug`
pub async fn execute_query(
    Extension(handler): Extension<Arc<Handler>>,
    Path(slug): Path<String>,
    Query(pairs): Query<Vec<(String, String)>>,
    headers: HeaderMap,
    connect_info: Option<ConnectInfo<SocketAddr>>,
) -> Result<Json<QueryResultDto>, RestError> {
    handler.increment_query_count();

    let raw = first_values(pairs);
    let client = ClientInfo {
        ip: client_ip(&headers, connect_info.map(|ConnectInfo(addr)| addr)),
        user_agent: headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
    };

    let outcome = handler.engine().execute(&slug, &raw, client).await?;
    Ok(Json(QueryResultDto::from(outcome)))
}

/// Collapse repeated keys; the first occurrence wins.
fn first_values(pairs: Vec<(String, String)>) -> HashMap<String, String> {
    let mut raw = HashMap::with_capacity(pairs.len());
    for (key, value) in pairs {
        raw.entry(key).or_insert(value);
    }
    raw
}

/// Resolve the caller address: `X-Forwarded-For` (first hop), then
/// `X-Real-IP`, then the socket peer.
fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> Option<String> {
    let header_value = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };

    if let Some(forwarded) = header_value("x-forwarded-for") {
        if let Some(first) = forwarded.split(',').map(str::trim).find(|s| !s.is_empty()) {
            return Some(first.to_string());
        }
    }
    if let Some(real_ip) = header_value("x-real-ip") {
        return Some(real_ip.to_string());
    }
    peer.map(|addr| addr.ip().to_string())
}
