//! API route handlers.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, instrument};

use quire_cache::{CoalescerStats, StoreStats};
use quire_core::types::{Fingerprint, RenderOptions};

use crate::error::ApiError;
use crate::state::AppState;

type Result<T> = std::result::Result<T, ApiError>;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Always "ok"
    pub status: &'static str,
    /// Server version
    pub version: &'static str,
}

/// Cache statistics response.
#[derive(Debug, Serialize)]
pub struct CacheStatsResponse {
    /// Entry counts
    pub store: StoreStats,
    /// Coalescer activity
    pub coalescer: CoalescerStats,
    /// Entry TTL in seconds
    pub ttl_seconds: u64,
    /// Longest a follower waits, in milliseconds
    pub wait_budget_ms: u64,
}

/// GET /health
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// GET /api/render
///
/// Renders straight away; identical GET requests are not coalesced.
#[instrument(skip_all)]
pub async fn render_get(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Response> {
    let options = RenderOptions::from_query(&query)?;
    options.validate()?;

    let start = Instant::now();
    let payload = state.renderer.render(&options).await?;
    info!(
        size = payload.len(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "Rendered direct request"
    );

    payload_response(&options, payload)
}

/// POST /api/render
///
/// A JSON body is merged over the default options. Any other body is taken
/// as the HTML to render, with options read from the query string.
/// Identical concurrent requests share one render.
#[instrument(skip_all)]
pub async fn render_post(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response> {
    let options = if is_json(&headers) {
        options_from_json_body(&body)?
    } else {
        options_from_html_body(&query, &body)?
    };
    options.validate()?;

    let fingerprint = Fingerprint::of(&options)?;
    debug!(hash = %fingerprint, "Coalescing render request");

    let start = Instant::now();
    let renderer = Arc::clone(&state.renderer);
    let job = options.clone();
    let payload = state
        .coalescer
        .execute(&fingerprint, || async move { renderer.render(&job).await })
        .await?;

    info!(
        hash = %fingerprint,
        size = payload.len(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "Served render"
    );

    payload_response(&options, payload)
}

/// GET /api/cache/stats
pub async fn cache_stats(State(state): State<Arc<AppState>>) -> Json<CacheStatsResponse> {
    let config = state.store.config();

    Json(CacheStatsResponse {
        store: state.store.stats(),
        coalescer: state.coalescer.stats(),
        ttl_seconds: config.default_ttl_seconds,
        wait_budget_ms: config.wait_budget().as_millis() as u64,
    })
}

fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.contains("application/json"))
}

fn options_from_json_body(body: &[u8]) -> Result<RenderOptions> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|e| ApiError::bad_request(format!("Invalid JSON body: {}", e)))?;

    let has_content = ["url", "html"]
        .iter()
        .any(|field| value.get(field).is_some_and(Value::is_string));
    if !has_content {
        return Err(ApiError::bad_request("Body must contain url or html"));
    }

    Ok(RenderOptions::from_json(value)?)
}

fn options_from_html_body(query: &HashMap<String, String>, body: &[u8]) -> Result<RenderOptions> {
    if query.contains_key("url") {
        return Err(ApiError::bad_request(
            "url query parameter is not allowed when body is HTML",
        ));
    }

    let html = std::str::from_utf8(body)
        .map_err(|_| ApiError::bad_request("HTML body must be valid UTF-8"))?;
    if html.trim().is_empty() {
        return Err(ApiError::bad_request("Body must contain url or html"));
    }

    let mut options = RenderOptions::from_query(query)?;
    options.html = Some(html.to_owned());
    Ok(options)
}

fn payload_response(options: &RenderOptions, payload: Bytes) -> Result<Response> {
    let mut response = (
        StatusCode::OK,
        [(header::CONTENT_TYPE, options.mime_type())],
        payload,
    )
        .into_response();

    if let Some(name) = options.attachment_name.as_deref() {
        let name: String = name.chars().filter(|c| *c != '"' && *c != '\\').collect();
        let disposition = HeaderValue::from_str(&format!("attachment; filename=\"{}\"", name))
            .map_err(|_| ApiError::bad_request("attachmentName is not a valid header value"))?;
        response
            .headers_mut()
            .insert(header::CONTENT_DISPOSITION, disposition);
    }

    Ok(response)
}
