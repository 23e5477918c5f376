/// Admin REST API endpoints
/// 
/// Deploys and stops flows on the running runtime and exposes the plugin
/// catalog and action table. Deploys take effect immediately.

use crate::{
    comms::CommsHub,
    runtime::{FlowConfig, Runtime},
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{delete, get, post},
    Router,
};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;

/// Application state containing shared resources
#[derive(Clone)]
pub struct AppState {
    /// Runtime services and deployed flows
    pub runtime: Arc<Runtime>,
    /// Comms fan-out hub
    pub hub: Arc<CommsHub>,
}

/// Response for deploy/stop operations
#[derive(Debug, Serialize)]
pub struct FlowResponse {
    pub id: String,
    pub message: String,
}

/// Create admin routes under `prefix` (which ends with `/`)
pub fn create_admin_routes(prefix: &str) -> Router<AppState> {
    Router::new()
        .route(&format!("{}flows", prefix), get(list_flows))
        .route(&format!("{}flows", prefix), post(deploy_flow))
        .route(&format!("{}flows/{{id}}", prefix), delete(stop_flow))
        .route(&format!("{}plugins", prefix), get(list_plugins))
        .route(&format!("{}actions", prefix), get(list_actions))
        .route(&format!("{}actions/{{name}}", prefix), post(invoke_action))
}

/// List deployed flow ids
/// 
/// GET /flows
async fn list_flows(State(state): State<AppState>) -> Json<Value> {
    let flows = state.runtime.flow_ids();
    Json(json!({
        "flows": flows,
        "count": flows.len()
    }))
}

/// Deploy (or redeploy) a flow
/// 
/// POST /flows
/// Body: { "id": "...", "label": "...", "env": [...], "groups": [...], "nodes": [...] }
async fn deploy_flow(
    State(state): State<AppState>,
    Json(flow): Json<FlowConfig>,
) -> Result<Json<FlowResponse>, (StatusCode, Json<Value>)> {
    if flow.id.is_empty() {
        return Err((StatusCode::BAD_REQUEST, Json(json!({ "error": "flow id is required" }))));
    }

    match state.runtime.deploy(flow) {
        Ok(deployed) => {
            tracing::info!("✅ Flow deployed via API: {}", deployed.id());
            Ok(Json(FlowResponse {
                id: deployed.id().to_string(),
                message: "Flow deployed".to_string(),
            }))
        }
        Err(e) => {
            tracing::warn!("❌ Flow deploy rejected: {:#}", e);
            Err((StatusCode::BAD_REQUEST, Json(json!({ "error": format!("{:#}", e) }))))
        }
    }
}

/// Stop a deployed flow
/// 
/// DELETE /flows/{id}
async fn stop_flow(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<FlowResponse>, StatusCode> {
    if !state.runtime.stop_flow(&id) {
        return Err(StatusCode::NOT_FOUND);
    }
    Ok(Json(FlowResponse {
        id,
        message: "Flow stopped".to_string(),
    }))
}

/// Catalog view of contributed plugin sets
/// 
/// GET /plugins
async fn list_plugins(State(state): State<AppState>) -> Json<Value> {
    Json(json!(state.runtime.registry().get_plugin_list()))
}

/// Actions with their labels and bound shortcuts
/// 
/// GET /actions
async fn list_actions(State(state): State<AppState>) -> Json<Value> {
    Json(json!(state.runtime.actions().list()))
}

/// Invoke an action by name
/// 
/// POST /actions/{name}
/// Body (optional): [arg, ...]
async fn invoke_action(
    State(state): State<AppState>,
    Path(name): Path<String>,
    body: Option<Json<Vec<Value>>>,
) -> StatusCode {
    let args = body.map(|Json(args)| args).unwrap_or_default();
    if state.runtime.actions().invoke(&name, &args) {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}
