//! HTTP handlers module

mod session;
mod wireguard;

pub use self::session::*;
pub use self::wireguard::*;

use axum::{response::IntoResponse, Json};
use serde::Serialize;

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

/// Health check handler
pub async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        service: "wg-peer-provisioner".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Generic success response
#[derive(Serialize)]
pub struct SuccessResponse {
    pub ok: bool,
    pub message: String,
}

impl SuccessResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            ok: true,
            message: message.into(),
        }
    }
}
