//! Error handling module
//!
//! `ProvisionError` is the provisioning taxonomy surfaced to the operator.
//! `AppError` wraps it for the HTTP layer.

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::backend::{CapabilityError, CapabilityErrorKind};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProvisionError {
    #[error("Key generation failed: {0}")]
    KeyGenerationFailed(String),

    #[error("Peer registration failed: {0}")]
    RegistrationFailed(String),

    #[error("Invalid server endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("Server public key is missing for this interface")]
    MissingServerKey,

    #[error("Invalid private key: {0}")]
    InvalidKeyFormat(String),

    #[error("Configuration too large for a QR code ({len} bytes)")]
    PayloadTooLarge { len: usize },

    #[error("QR rendering unavailable: {0}")]
    RenderingUnavailable(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Invalid peer field: {0}")]
    InvalidPeerField(String),

    #[error("Unknown interface: {0}")]
    UnknownInterface(String),

    #[error("Unknown peer: {0}")]
    UnknownPeer(String),

    #[error("Action not allowed while {0}")]
    InvalidTransition(String),

    #[error("A render is already in progress for peer {0}")]
    RenderInProgress(String),

    #[error("Peer removal failed: {0}")]
    DeregistrationFailed(String),
}

impl ProvisionError {
    /// Stable identifier for API consumers
    pub fn kind(&self) -> &'static str {
        match self {
            ProvisionError::KeyGenerationFailed(_) => "key_generation_failed",
            ProvisionError::RegistrationFailed(_) => "registration_failed",
            ProvisionError::InvalidEndpoint(_) => "invalid_endpoint",
            ProvisionError::MissingServerKey => "missing_server_key",
            ProvisionError::InvalidKeyFormat(_) => "invalid_key_format",
            ProvisionError::PayloadTooLarge { .. } => "payload_too_large",
            ProvisionError::RenderingUnavailable(_) => "rendering_unavailable",
            ProvisionError::NetworkError(_) => "network_error",
            ProvisionError::InvalidPeerField(_) => "invalid_peer_field",
            ProvisionError::UnknownInterface(_) => "unknown_interface",
            ProvisionError::UnknownPeer(_) => "unknown_peer",
            ProvisionError::InvalidTransition(_) => "invalid_transition",
            ProvisionError::RenderInProgress(_) => "render_in_progress",
            ProvisionError::DeregistrationFailed(_) => "deregistration_failed",
        }
    }

    /// Validation errors are raised before any capability is contacted
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            ProvisionError::InvalidEndpoint(_)
                | ProvisionError::MissingServerKey
                | ProvisionError::InvalidKeyFormat(_)
                | ProvisionError::InvalidPeerField(_)
        )
    }

    /// Map a capability failure, keeping transport problems as `NetworkError`
    pub fn from_capability(
        err: CapabilityError,
        rejected: impl FnOnce(String) -> ProvisionError,
    ) -> ProvisionError {
        match err.kind {
            CapabilityErrorKind::Transport => ProvisionError::NetworkError(err.message),
            CapabilityErrorKind::Rejected => rejected(err.message),
        }
    }
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Provision(#[from] ProvisionError),

    #[error("Bad request: {0}")]
    BadRequest(String),
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            AppError::Provision(e) if e.is_validation() => StatusCode::BAD_REQUEST,
            AppError::Provision(e) => match e {
                ProvisionError::UnknownInterface(_) | ProvisionError::UnknownPeer(_) => {
                    StatusCode::NOT_FOUND
                }
                ProvisionError::InvalidTransition(_) | ProvisionError::RenderInProgress(_) => {
                    StatusCode::CONFLICT
                }
                ProvisionError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
                ProvisionError::RenderingUnavailable(_) => StatusCode::FAILED_DEPENDENCY,
                ProvisionError::KeyGenerationFailed(_)
                | ProvisionError::RegistrationFailed(_)
                | ProvisionError::DeregistrationFailed(_)
                | ProvisionError::NetworkError(_) => StatusCode::BAD_GATEWAY,
                _ => StatusCode::BAD_REQUEST,
            },
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            AppError::Provision(e) => e.kind(),
            AppError::BadRequest(_) => "bad_request",
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!("Request failed: {}", self);
        }

        let body = Json(serde_json::json!({
            "error": self.to_string(),
            "kind": self.kind(),
            "status": status.as_u16()
        }));

        (status, body).into_response()
    }
}
