//! The HTTP serving side: `POST /api/chat`.
//!
//! One handler runs the admission pipeline, validates content, and streams
//! the generation output straight through as the response body. Verdict
//! metadata is projected onto the rate-limit headers on 429s and on
//! successful-but-metered 200s alike.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use futures::StreamExt;
use serde_json::json;

use crate::admission::{AdmissionOracle, CounterStore, RequestMetadata, admit, validate_batch};
use crate::config::ChatbotConfig;
use crate::engine::GenerationEngine;
use crate::types::ChatRequest;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ChatbotConfig>,
    pub oracle: Arc<dyn AdmissionOracle>,
    pub counters: Arc<dyn CounterStore>,
    pub engine: Arc<dyn GenerationEngine>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/chat", post(chat))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn chat(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(request): Json<ChatRequest>,
) -> Response {
    let meta = request_metadata(&headers, addr);

    let verdict = admit(
        &meta,
        &state.config,
        state.oracle.as_ref(),
        state.counters.as_ref(),
    )
    .await;
    if !verdict.allowed {
        tracing::warn!(
            client_ip = %meta.client_ip,
            reason = ?verdict.reason,
            limiter = ?verdict.limiter,
            "request rejected by admission pipeline"
        );
        let mut response = (
            verdict.status(),
            Json(json!({ "error": "request rejected" })),
        )
            .into_response();
        verdict.apply_headers(response.headers_mut());
        return response;
    }

    if let Err(err) = validate_batch(&request.messages, &state.config.content) {
        tracing::warn!(client_ip = %meta.client_ip, %err, "content validation failed");
        return (err.status(), Json(json!({ "error": err.to_string() }))).into_response();
    }

    let stream = match state
        .engine
        .generate(&request.messages, &state.config.system_prompt)
        .await
    {
        Ok(stream) => stream,
        Err(err) => {
            tracing::error!(client_ip = %meta.client_ip, %err, "generation failed to start");
            return (err.status(), Json(json!({ "error": err.to_string() }))).into_response();
        }
    };

    tracing::info!(
        client_ip = %meta.client_ip,
        remaining = verdict.remaining,
        messages = request.messages.len(),
        "streaming generation"
    );

    let body = Body::from_stream(
        stream.map(|item| item.map(axum::body::Bytes::from).map_err(axum::BoxError::from)),
    );
    let mut response = Response::new(body);
    *response.status_mut() = StatusCode::OK;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    verdict.apply_headers(response.headers_mut());
    response
}

/// Client identity is address-based: first `X-Forwarded-For` hop when behind
/// a proxy, otherwise the peer address.
fn request_metadata(headers: &HeaderMap, addr: SocketAddr) -> RequestMetadata {
    let client_ip = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(|hop| hop.trim().to_string())
        .filter(|hop| !hop.is_empty())
        .unwrap_or_else(|| addr.ip().to_string());
    let origin = headers
        .get(header::ORIGIN)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    RequestMetadata {
        client_ip,
        origin,
        user_agent,
    }
}
