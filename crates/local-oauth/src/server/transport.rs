//! HTTP transport.
//!
//! Wires the OAuth handlers into an axum router with CORS and request tracing.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    middleware,
    response::IntoResponse,
    routing::{get, post},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::oauth::{AuthorizationServer, handlers};

/// Shared state for HTTP handlers.
pub struct HttpState {
    pub provider: Arc<AuthorizationServer>,
    /// Base URL for endpoint announcements.
    pub base_url: String,
}

/// Create the HTTP router.
pub fn create_router(provider: Arc<AuthorizationServer>) -> Router {
    let state = Arc::new(HttpState { base_url: provider.base_url().to_owned(), provider });

    // Routes that require a valid bearer token
    let protected = Router::new()
        .route("/userinfo", get(handlers::handle_userinfo))
        .route_layer(middleware::from_fn_with_state(Arc::clone(&state), handlers::require_bearer));

    Router::new()
        .route("/", get(health_check))
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route(
            "/.well-known/oauth-authorization-server",
            get(handlers::handle_auth_server_metadata),
        )
        .route(
            "/.well-known/oauth-protected-resource",
            get(handlers::handle_protected_resource),
        )
        .route(
            "/authorize",
            get(handlers::handle_authorize_get).post(handlers::handle_authorize_post),
        )
        .route("/login", get(handlers::handle_login_get).post(handlers::handle_login_post))
        .route("/token", post(handlers::handle_token))
        .route("/revoke", post(handlers::handle_revoke))
        .route("/register", post(handlers::handle_register))
        .merge(protected)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "local-oauth",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn readiness_check(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let counts = state.provider.store().counts().await;
    Json(serde_json::json!({
        "status": "ready",
        "service": "local-oauth",
        "version": env!("CARGO_PKG_VERSION"),
        "store": counts
    }))
}
