//! HTTP routes of the hello service.
//!
//! Every request passes through the request ID middleware so logs emitted
//! while serving it can be correlated.

pub mod health;
pub mod hello;

use axum::{middleware, routing::get, Router};
use http::header::{HeaderValue, CACHE_CONTROL};
use tower_http::set_header::SetResponseHeaderLayer;

use crate::config::CACHE_CONTROL_HELLO;
use crate::middleware::request_id_layer;
use crate::state::AppState;

/// Creates the Axum router with all routes and cache headers.
pub fn create_router(state: AppState) -> Router {
    let hello_routes = Router::new().route("/", get(hello::root)).layer(
        SetResponseHeaderLayer::if_not_present(
            CACHE_CONTROL,
            HeaderValue::from_static(CACHE_CONTROL_HELLO),
        ),
    );

    // Health check - no caching, always fresh for liveness probes
    let health_routes = Router::new().route("/health", get(health::health));

    Router::new()
        .merge(hello_routes)
        .merge(health_routes)
        .fallback(hello::not_found)
        .with_state(state)
        .layer(middleware::from_fn(request_id_layer))
}
