//! JSON-over-HTTP control facade (spec.md §6): a small `axum::Router` that
//! exposes filesystem status, cache stats, and rule/config management
//! alongside the FUSE mount, grounded in the same `Router`/`CorsLayer`/
//! `TraceLayer` shape the organization's other HTTP services use.

pub mod api;
pub mod state;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub use state::ControlState;

/// Builds the control router. Callers bind it with `axum::serve` alongside
/// (not instead of) the FUSE mount loop.
pub fn router(state: ControlState) -> Router {
    Router::new()
        .route("/", get(api::index))
        .route("/status", get(api::status))
        .route("/stats", get(api::stats))
        .route("/cache/stats", get(api::cache_stats))
        .route("/cache/clear", post(api::cache_clear))
        .route("/cache/invalidate", post(api::cache_invalidate))
        .route("/config", get(api::get_config))
        .route("/config/reload", post(api::reload_config))
        .route("/rules", get(api::get_rules))
        .route("/rules/add", post(api::add_rule))
        .route("/rules/remove", post(api::remove_rule))
        .route("/layers", get(api::get_layers))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
