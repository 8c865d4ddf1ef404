//! HTTP surface.
//!
//! Admin routes sit behind the bearer guard; consumer routes (bundles, data,
//! notifications, webhook, health) are public. The two routers never share a
//! path.

use std::convert::Infallible;
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    middleware,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tokio_stream::{wrappers::BroadcastStream, Stream, StreamExt};
use tower_http::trace::TraceLayer;

use scopehub_core::{DataSourceConfig, Scope, ScopeId};
use scopehub_git::PolicyBundle;

use crate::auth::require_scope_api_key;
use crate::error::ApiResult;
use crate::state::{blocking, AppState};
use crate::triggers::{self, SweepReport};

pub fn build_router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/scopes", post(add_scope))
        .route("/scopes/:scope_id", get(get_scope))
        .route("/scopes/periodic-check", post(periodic_check))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_scope_api_key,
        ));

    let public = Router::new()
        .route("/scopes/:scope_id/policy", get(get_policy))
        .route("/scopes/:scope_id/data", get(get_data))
        .route("/scopes/:scope_id/notifications", get(notifications))
        .route("/scopes/webhook/github/push", post(github_push))
        .route("/healthcheck", get(healthcheck));

    public
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Admin
// ---------------------------------------------------------------------------

async fn add_scope(
    State(state): State<AppState>,
    Json(scope): Json<Scope>,
) -> ApiResult<(StatusCode, Json<Scope>)> {
    let store = state.store.clone();
    let registered = scope.clone();
    blocking(move || store.add_scope(registered)).await?;
    Ok((StatusCode::CREATED, Json(scope)))
}

async fn get_scope(
    State(state): State<AppState>,
    Path(scope_id): Path<String>,
) -> ApiResult<Json<Scope>> {
    Ok(Json(state.get_scope(ScopeId(scope_id)).await?))
}

async fn periodic_check(State(state): State<AppState>) -> ApiResult<Json<SweepReport>> {
    Ok(Json(triggers::run_sweep(&state).await?))
}

// ---------------------------------------------------------------------------
// Consumers
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct PolicyQuery {
    base_hash: Option<String>,
}

async fn get_policy(
    State(state): State<AppState>,
    Path(scope_id): Path<String>,
    Query(query): Query<PolicyQuery>,
) -> ApiResult<Json<PolicyBundle>> {
    let scope_id = ScopeId(scope_id);
    let base_hash = query.base_hash.filter(|hash| !hash.trim().is_empty());
    let store = state.store.clone();
    let bundle = blocking(move || store.make_bundle(&scope_id, base_hash.as_deref())).await?;
    Ok(Json(bundle))
}

async fn get_data(
    State(state): State<AppState>,
    Path(scope_id): Path<String>,
) -> ApiResult<Json<DataSourceConfig>> {
    Ok(Json(state.get_scope(ScopeId(scope_id)).await?.data))
}

async fn notifications(
    State(state): State<AppState>,
    Path(scope_id): Path<String>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let scope = state.get_scope(ScopeId(scope_id)).await?;
    let receiver = state.hub.subscribe(&scope.scope_id);
    tracing::debug!(scope_id = %scope.scope_id, "notification subscriber attached");

    let stream = BroadcastStream::new(receiver).filter_map(|item| match item {
        Ok(notification) => Event::default()
            .event("policy")
            .json_data(&notification)
            .ok()
            .map(Ok),
        // Lagged subscribers skip what they missed and re-fetch the bundle.
        Err(_) => None,
    });

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(30))
            .text("keepalive"),
    ))
}

async fn github_push(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Response> {
    let report = triggers::handle_push_webhook(&state, &headers, body).await?;
    let status = if report.has_failures() {
        StatusCode::BAD_GATEWAY
    } else {
        StatusCode::OK
    };
    Ok((status, Json(report)).into_response())
}

async fn healthcheck() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}
