//! Session handlers

use axum::{
    extract::State,
    http::{header::SET_COOKIE, StatusCode},
    response::IntoResponse,
    Extension, Json,
};

use crate::api::session::{session_cookie, SessionHandle};
use crate::state::AppState;

/// GET /api/session/endpoint - Last endpoint used in this session
pub async fn get_endpoint(Extension(session): Extension<SessionHandle>) -> impl IntoResponse {
    Json(serde_json::json!({
        "endpoint": session.endpoint.get().await,
        "session_started": session.created_at,
        "vaulted_keys": session.vaulted_keys().await,
    }))
}

/// POST /api/session/end - Destroy the session and every key it holds
pub async fn end_session(
    State(state): State<AppState>,
    Extension(session): Extension<SessionHandle>,
) -> impl IntoResponse {
    let ended = state.sessions.end(session.id).await;
    let cookie = session_cookie(&state.config.session.cookie_name, "", 0);

    (
        StatusCode::OK,
        [(SET_COOKIE, cookie)],
        Json(serde_json::json!({ "ok": true, "ended": ended })),
    )
}
