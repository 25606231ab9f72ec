//! Operator controls for the sandbox network: completing pairing, injecting
//! inbound messages, dropping a tenant's transport.

use axum::{
    Json,
    extract::{Path, State},
    response::IntoResponse,
};
use chrono::Utc;
use messaging_client::sandbox::SandboxClient;
use messaging_client::{Message, MessageEvent, MessageInfo};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::info;

use crate::AppState;
use crate::dispatch::normalize_phone;
use crate::error::SessionError;
use crate::tenant::TenantId;

fn sandbox_client(state: &AppState, tenant: TenantId) -> Result<Arc<SandboxClient>, SessionError> {
    state
        .sandbox
        .as_ref()
        .and_then(|network| network.client(&tenant.store_label()))
        .ok_or(SessionError::NoSession)
}

pub async fn scan_handler(
    State(state): State<AppState>,
    Path(tenant): Path<u64>,
) -> Result<impl IntoResponse, SessionError> {
    let tenant = TenantId(tenant);
    let id = sandbox_client(&state, tenant)?
        .scan()
        .map_err(|e| SessionError::Pairing {
            detail: e.to_string(),
        })?;
    info!(tenant = %tenant, device = %id, "Sandbox pairing code scanned");
    Ok(Json(json!({ "message": "Pairing completed", "jid": id.to_string() })))
}

#[derive(Deserialize)]
pub struct InboundRequest {
    from: String,
    #[serde(default)]
    text: String,
    #[serde(default)]
    push_name: String,
}

pub async fn inbound_handler(
    State(state): State<AppState>,
    Path(tenant): Path<u64>,
    Json(req): Json<InboundRequest>,
) -> Result<impl IntoResponse, SessionError> {
    let tenant = TenantId(tenant);
    let client = sandbox_client(&state, tenant)?;
    let from = normalize_phone(
        &req.from,
        state.manager.config.min_phone_digits,
        &state.manager.config.default_user_server,
    )?;

    let id = format!("SB{:016X}", rand::random::<u64>());
    client.deliver(MessageEvent {
        info: MessageInfo {
            id: id.clone(),
            chat: from.clone(),
            sender: from,
            is_from_me: false,
            push_name: req.push_name,
            timestamp: Utc::now(),
        },
        message: Some(Message::text(req.text)),
    });
    Ok(Json(json!({ "message": "Inbound message delivered", "id": id })))
}

pub async fn drop_handler(
    State(state): State<AppState>,
    Path(tenant): Path<u64>,
) -> Result<impl IntoResponse, SessionError> {
    let tenant = TenantId(tenant);
    sandbox_client(&state, tenant)?.drop_transport();
    info!(tenant = %tenant, "Sandbox transport dropped");
    Ok(Json(json!({ "message": "Transport dropped" })))
}
