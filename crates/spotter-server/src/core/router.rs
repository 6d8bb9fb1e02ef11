//! Core Router
//!
//! Mounts the authenticated social routes behind `mw_require_auth`, plus
//! the realtime upgrade and health check which authenticate themselves.

use crate::core::auth::middleware::mw_require_auth;
use crate::core::AppState;
use crate::social;
use crate::social::handlers::realtime;
use axum::{extract::State, middleware, routing::get, Json, Router};
use serde_json::{json, Value};

pub fn router(state: AppState) -> Router {
    let protected = social::router()
        .route_layer(middleware::from_fn_with_state(state.clone(), mw_require_auth));

    Router::new()
        .merge(protected)
        .route("/ws", get(realtime::ws_handler))
        .route("/health", get(health_check))
        .with_state(state)
        .layer(tower_http::cors::CorsLayer::permissive())
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

async fn health_check(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "online": state.broker.connected_identities().len(),
    }))
}
