//! HTTP surface: routing, handlers and request middleware.

mod handlers;
mod middleware;
mod state;

pub use middleware::RequestContext;
pub use state::GatewayState;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware as axum_middleware,
    routing::{get, post},
};

use middleware::{log_responses, set_request_context};

pub const RENDER_ROUTE: &str = "/plantuml2png";
pub const HEALTH_ROUTE: &str = "/healthz";

/// Build the public router. Request bodies above `max_body_bytes` are rejected with 413.
pub fn build_router(state: GatewayState, max_body_bytes: usize) -> Router {
    Router::new()
        .route(RENDER_ROUTE, post(handlers::plantuml_to_png))
        .route(HEALTH_ROUTE, get(handlers::healthz))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .with_state(state)
        .layer(axum_middleware::from_fn(log_responses))
        .layer(axum_middleware::from_fn(set_request_context))
}
