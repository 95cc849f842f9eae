//! HTTP API surface.
//!
//! One endpoint, `GET`/`POST /api/query`, guarded by an optional shared
//! token. The response body is the router's [`AnswerResult`] JSON; total
//! failure still returns 200 with `success: false`, since the caller is
//! a chat frontend that renders the failure message.

use crate::router::Router as QueryRouter;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
struct AppState {
    router: Arc<QueryRouter>,
    api_token: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct QueryParams {
    q: Option<String>,
    user_id: Option<String>,
}

/// Build the axum application.
pub fn app(router: Arc<QueryRouter>, api_token: Option<String>) -> axum::Router {
    let state = AppState { router, api_token };
    axum::Router::new()
        .route("/health", get(health))
        .route("/api/query", get(query_get).post(query_post))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Bind and serve until the process is stopped.
pub async fn serve(
    addr: SocketAddr,
    router: Arc<QueryRouter>,
    api_token: Option<String>,
) -> crate::types::Result<()> {
    let app = app(router, api_token);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "serving HTTP API");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({"status": "ok"}))
}

async fn query_get(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<QueryParams>,
) -> Response {
    answer(state, headers, params).await
}

async fn query_post(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(params): Json<QueryParams>,
) -> Response {
    answer(state, headers, params).await
}

async fn answer(state: AppState, headers: HeaderMap, params: QueryParams) -> Response {
    if !authorized(&state, &headers) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "missing or invalid API token"})),
        )
            .into_response();
    }

    let Some(q) = params.q.as_deref().map(str::trim).filter(|q| !q.is_empty()) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "parameter `q` is required"})),
        )
            .into_response();
    };
    let user_id = params.user_id.as_deref().unwrap_or("default_user");

    let result = state.router.route(q, user_id).await;
    Json(result).into_response()
}

/// Accepts `Authorization: Token <t>` or `Authorization: Bearer <t>`.
fn authorized(state: &AppState, headers: &HeaderMap) -> bool {
    let Some(expected) = state.api_token.as_deref() else {
        return true;
    };
    let Some(value) = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
    else {
        return false;
    };
    value == format!("Token {expected}") || value == format!("Bearer {expected}")
}
