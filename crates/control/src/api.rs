//! Route handlers for the control facade (spec.md §6's control interface).

use axum::extract::{Json, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::{json, Value};

use stratafs_core::cache::TierId;
use stratafs_core::rules::Rule;

use crate::state::ControlState;

/// Every error response takes this shape, UTF-8 JSON, per spec.md §6.
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self { status, message: message.into() }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message, "success": false }))).into_response()
    }
}

impl From<stratafs_core::StrataError> for ApiError {
    fn from(err: stratafs_core::StrataError) -> Self {
        ApiError::bad_request(err.to_string())
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

pub async fn index() -> Json<Value> {
    Json(json!({
        "name": "stratafs",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

pub async fn status(State(state): State<ControlState>) -> Json<Value> {
    let config = state.config.read();
    Json(json!({
        "uptime_seconds": state.uptime_secs(),
        "readonly": state.handler.is_readonly(),
        "sources": state.handler.source_count(),
        "layers": state.handler.list_layers(),
        "config_version": config.version,
        "success": true,
    }))
}

pub async fn stats(State(state): State<ControlState>) -> Json<Value> {
    Json(json!({
        "files": state.handler.file_count(),
        "sources": state.handler.source_count(),
        "layers": state.handler.list_layers().len(),
        "rules": state.handler.list_rules().len(),
        "success": true,
    }))
}

pub async fn cache_stats(State(state): State<ControlState>) -> Json<Value> {
    let stats = state.handler.cache().stats();
    Json(json!({
        "tiers": stats.into_iter().map(|(name, s)| (name, s)).collect::<std::collections::BTreeMap<_, _>>(),
        "success": true,
    }))
}

pub async fn get_config(State(state): State<ControlState>) -> Json<Value> {
    let config = state.config.read();
    Json(json!({ "config": &*config, "success": true }))
}

pub async fn get_rules(State(state): State<ControlState>) -> Json<Value> {
    Json(json!({ "rules": state.handler.list_rules(), "success": true }))
}

pub async fn get_layers(State(state): State<ControlState>) -> Json<Value> {
    Json(json!({ "layers": state.handler.list_layers(), "success": true }))
}

pub async fn cache_clear(State(state): State<ControlState>) -> Json<Value> {
    state.handler.cache().clear(None::<TierId>);
    Json(json!({ "success": true }))
}

#[derive(Deserialize)]
pub struct InvalidateRequest {
    path: String,
}

pub async fn cache_invalidate(
    State(state): State<ControlState>,
    Json(req): Json<InvalidateRequest>,
) -> Json<Value> {
    state.handler.invalidate_path(&req.path);
    Json(json!({ "success": true, "path": req.path }))
}

/// Reloads the on-disk config and hot-swaps the rule set. Source list and
/// virtual layers are fixed for the life of a mount (spec.md §5 non-goals
/// exclude live remounting); rules are the one piece this can apply without
/// tearing down the kernel session.
pub async fn reload_config(State(state): State<ControlState>) -> ApiResult<Json<Value>> {
    let path = state
        .config_path
        .as_ref()
        .ok_or_else(|| ApiError::bad_request("no config file path recorded for this session"))?;
    let fresh = stratafs_core::config::Config::load(path)?;
    let rules = stratafs_core::wiring::rule_engine_from_config(&fresh)?;
    state.handler.set_rules(rules);
    *state.config.write() = fresh;
    Ok(Json(json!({ "success": true })))
}

#[derive(Deserialize)]
pub struct AddRuleRequest {
    #[serde(flatten)]
    rule: Rule,
}

pub async fn add_rule(
    State(state): State<ControlState>,
    Json(req): Json<AddRuleRequest>,
) -> ApiResult<Json<Value>> {
    state.handler.add_rule(req.rule)?;
    Ok(Json(json!({ "success": true })))
}

#[derive(Deserialize)]
pub struct RemoveRuleRequest {
    name: String,
}

pub async fn remove_rule(
    State(state): State<ControlState>,
    Json(req): Json<RemoveRuleRequest>,
) -> ApiResult<Json<Value>> {
    if state.handler.remove_rule(&req.name) {
        Ok(Json(json!({ "success": true })))
    } else {
        Err(ApiError::not_found(format!("no rule named `{}`", req.name)))
    }
}

