//! Router backend capabilities
//!
//! - `client`: ubus JSON-RPC client implementing every capability
//!
//! Each capability is a trait so the orchestrator can be driven by the
//! router backend, the local key generator, or test doubles.

pub mod client;
#[cfg(test)]
pub mod testing;

pub use client::RpcClient;

use async_trait::async_trait;
use ipnetwork::IpNetwork;
use thiserror::Error;

use crate::models::{InterfaceInfo, RosterPeer};
use crate::wireguard::{SecretKey, WgKeyPair};

/// How a capability call failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapabilityErrorKind {
    /// The call never produced an answer (connection, HTTP, decoding)
    Transport,
    /// The backend answered with an explicit error
    Rejected,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct CapabilityError {
    pub kind: CapabilityErrorKind,
    pub message: String,
}

impl CapabilityError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            kind: CapabilityErrorKind::Transport,
            message: message.into(),
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            kind: CapabilityErrorKind::Rejected,
            message: message.into(),
        }
    }
}

/// Arguments for peer registration
#[derive(Debug, Clone)]
pub struct RegisterPeerRequest {
    pub interface_name: String,
    pub name: String,
    pub allowed_ips: Vec<IpNetwork>,
    pub public_key: String,
    pub preshared_key: Option<SecretKey>,
    pub endpoint: Option<String>,
    pub keepalive: u16,
    /// Only sent when the backend is trusted to persist keys itself
    pub private_key_hint: Option<SecretKey>,
}

/// Artifact rendered by the backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteArtifact {
    /// Raster image as a data URL
    pub code: String,
    /// Config text the backend actually encoded
    pub config_text: String,
}

#[async_trait]
pub trait KeyGenerator: Send + Sync {
    async fn generate_keypair(&self) -> Result<WgKeyPair, CapabilityError>;
}

#[async_trait]
pub trait PeerRegistry: Send + Sync {
    /// Register a peer; returns the backend's confirmation message
    async fn register_peer(&self, req: &RegisterPeerRequest) -> Result<String, CapabilityError>;

    async fn remove_peer(
        &self,
        interface_name: &str,
        public_key: &str,
    ) -> Result<String, CapabilityError>;
}

#[async_trait]
pub trait RemoteRenderer: Send + Sync {
    /// Render config + QR code. With no private key the backend looks up its own copy.
    async fn render_remote(
        &self,
        interface_name: &str,
        public_key: &str,
        private_key: Option<&SecretKey>,
        endpoint: &str,
    ) -> Result<RemoteArtifact, CapabilityError>;

    async fn render_config_text(
        &self,
        interface_name: &str,
        public_key: &str,
        private_key: Option<&SecretKey>,
        endpoint: &str,
    ) -> Result<String, CapabilityError>;
}

#[async_trait]
pub trait RosterSource: Send + Sync {
    async fn list_peers(&self) -> Result<Vec<RosterPeer>, CapabilityError>;

    async fn list_interfaces(&self) -> Result<Vec<InterfaceInfo>, CapabilityError>;
}
