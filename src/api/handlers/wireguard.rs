//! WireGuard API handlers
//!
//! Provisioning wizard, artifact rendering, config download and the
//! live roster. Every handler runs inside an operator session.

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::{
        header::{CACHE_CONTROL, CONTENT_DISPOSITION, CONTENT_TYPE},
        StatusCode,
    },
    response::{IntoResponse, Response},
    Extension, Json,
};
use serde::Deserialize;

use super::SuccessResponse;
use crate::api::session::SessionHandle;
use crate::error::{AppError, ProvisionError};
use crate::models::short_id;
use crate::provision::{NewPeerRequest, RenderOptions};
use crate::state::AppState;

// ============================================================================
// Request types
// ============================================================================

#[derive(Deserialize, Default)]
pub struct RenderRequest {
    /// Server endpoint; falls back to the session's last used endpoint
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(flatten)]
    pub options: RenderOptions,
}

#[derive(Deserialize)]
pub struct ManualKeyRequest {
    pub private_key: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(flatten)]
    pub options: RenderOptions,
}

#[derive(Deserialize, Default)]
pub struct DeletePeerQuery {
    /// Defaults to the interface the roster shows for the peer
    pub interface: Option<String>,
    /// Only drop the session copy of the key, keep the peer
    #[serde(default)]
    pub forget_only: bool,
}

// ============================================================================
// Wizard
// ============================================================================

/// GET /api/wireguard/state
pub async fn get_state(Extension(session): Extension<SessionHandle>) -> impl IntoResponse {
    Json(session.orchestrator.state().await)
}

/// POST /api/wireguard/keypair - Generate keys for a new peer
pub async fn begin_peer(
    Extension(session): Extension<SessionHandle>,
) -> Result<impl IntoResponse, AppError> {
    let pending = session.orchestrator.begin_peer().await?;
    Ok(Json(serde_json::json!({
        "ok": true,
        "public_key": pending.public_key,
        "suggested_name": pending.suggested_name,
        "suggested_address": pending.suggested_address,
    })))
}

/// GET /api/wireguard/presets - Client profiles for the registration form
pub async fn list_presets(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.config.provisioning.presets.clone())
}

/// POST /api/wireguard/peers - Register the pending key pair
pub async fn register_peer(
    Extension(session): Extension<SessionHandle>,
    body: Result<Json<NewPeerRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Json(req) = body?;
    let peer = session.orchestrator.register_peer(req).await?;
    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({
            "ok": true,
            "peer": peer,
            "state": session.orchestrator.state().await,
        })),
    ))
}

/// POST /api/wireguard/defer - Skip the artifact offer
pub async fn defer_artifact(
    Extension(session): Extension<SessionHandle>,
) -> Result<impl IntoResponse, AppError> {
    session.orchestrator.defer_artifact().await?;
    Ok(Json(SuccessResponse::new("Artifact deferred")))
}

/// POST /api/wireguard/cancel - Close the open modal
pub async fn cancel(Extension(session): Extension<SessionHandle>) -> impl IntoResponse {
    session.orchestrator.cancel().await;
    Json(SuccessResponse::new("Cancelled"))
}

// ============================================================================
// Artifacts
// ============================================================================

/// POST /api/wireguard/peers/:public_key/artifact - Render QR code + config
pub async fn render_artifact(
    Extension(session): Extension<SessionHandle>,
    Path(public_key): Path<String>,
    body: Option<Json<RenderRequest>>,
) -> Result<Response, AppError> {
    let req = body.map(|Json(r)| r).unwrap_or_default();
    let artifact = session
        .orchestrator
        .render_artifact(&public_key, req.endpoint.as_deref(), &req.options)
        .await?;

    Ok(no_store(Json(artifact)))
}

/// POST /api/wireguard/peers/:public_key/private-key - Recover with a manual key
pub async fn submit_manual_key(
    Extension(session): Extension<SessionHandle>,
    Path(public_key): Path<String>,
    body: Result<Json<ManualKeyRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let Json(req) = body?;
    let artifact = session
        .orchestrator
        .submit_manual_key(
            &public_key,
            &req.private_key,
            req.endpoint.as_deref(),
            &req.options,
        )
        .await?;

    Ok(no_store(Json(artifact)))
}

/// POST /api/wireguard/peers/:public_key/config - Download the .conf file
pub async fn download_config(
    Extension(session): Extension<SessionHandle>,
    Path(public_key): Path<String>,
    body: Option<Json<RenderRequest>>,
) -> Result<Response, AppError> {
    let req = body.map(|Json(r)| r).unwrap_or_default();
    let download = session
        .orchestrator
        .download_config(&public_key, req.endpoint.as_deref(), &req.options)
        .await?;

    Ok((
        StatusCode::OK,
        [
            (CONTENT_TYPE, "text/plain; charset=utf-8".to_string()),
            (
                CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", download.filename),
            ),
            (CACHE_CONTROL, "no-store".to_string()),
        ],
        download.config_text,
    )
        .into_response())
}

/// Responses carrying key material must not be cached
fn no_store(body: impl IntoResponse) -> Response {
    ([(CACHE_CONTROL, "no-store")], body).into_response()
}

// ============================================================================
// Peers
// ============================================================================

/// DELETE /api/wireguard/peers/:public_key - Remove a peer or forget its key
pub async fn delete_peer(
    State(state): State<AppState>,
    Extension(session): Extension<SessionHandle>,
    Path(public_key): Path<String>,
    Query(query): Query<DeletePeerQuery>,
) -> Result<impl IntoResponse, AppError> {
    if query.forget_only {
        let forgotten = session.orchestrator.forget_key(&public_key).await;
        return Ok(Json(serde_json::json!({
            "ok": true,
            "forgotten": forgotten,
        })));
    }

    let interface = match query.interface.filter(|i| !i.trim().is_empty()) {
        Some(iface) => iface,
        None => state
            .roster
            .read()
            .await
            .rows()
            .iter()
            .find(|p| p.public_key == public_key)
            .map(|p| p.interface_name.clone())
            .ok_or_else(|| ProvisionError::UnknownPeer(short_id(&public_key)))?,
    };

    let message = session
        .orchestrator
        .remove_peer(&interface, &public_key)
        .await?;

    // Reflect the removal without waiting for the next poll
    if let Err(e) = state.refresher.refresh_once().await {
        tracing::debug!("[Roster] Refresh after removal failed: {}", e);
    }

    Ok(Json(serde_json::json!({
        "ok": true,
        "message": message,
    })))
}

/// GET /api/wireguard/peers - Live roster
pub async fn list_peers(State(state): State<AppState>) -> impl IntoResponse {
    let pins = state.pins.snapshot();
    Json(state.roster.read().await.view(&pins))
}

/// GET /api/wireguard/interfaces
pub async fn list_interfaces(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let interfaces = state
        .directory
        .list_interfaces()
        .await
        .map_err(|e| ProvisionError::from_capability(e, ProvisionError::NetworkError))?;

    Ok(Json(serde_json::json!({ "interfaces": interfaces })))
}
