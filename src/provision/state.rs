//! Provisioning state machine states

use ipnetwork::IpNetwork;
use serde::Serialize;

use crate::models::{default_peer_name, ArtifactSource, PeerIdentity, PeerNetworkConfig};
use crate::wireguard::WgKeyPair;

/// Orchestrator state. Only `KeyGenerated` holds key material, and only
/// until registration either vaults or drops it.
#[derive(Debug, Default)]
pub enum ProvisionState {
    #[default]
    Idle,
    KeyGenerated {
        pending: WgKeyPair,
        /// First free host in the peer network when the key was generated
        suggested_address: Option<IpNetwork>,
    },
    PeerRegistered {
        peer: PeerIdentity,
        net: PeerNetworkConfig,
    },
    ArtifactOffered {
        peer: PeerIdentity,
        net: PeerNetworkConfig,
        default_endpoint: Option<String>,
    },
    ArtifactRendered {
        peer: PeerIdentity,
        net: PeerNetworkConfig,
        source: ArtifactSource,
        endpoint: String,
    },
    KeyMissing {
        peer: PeerIdentity,
        net: PeerNetworkConfig,
        endpoint: String,
    },
}

impl ProvisionState {
    pub fn name(&self) -> &'static str {
        match self {
            ProvisionState::Idle => "idle",
            ProvisionState::KeyGenerated { .. } => "key_generated",
            ProvisionState::PeerRegistered { .. } => "peer_registered",
            ProvisionState::ArtifactOffered { .. } => "artifact_offered",
            ProvisionState::ArtifactRendered { .. } => "artifact_rendered",
            ProvisionState::KeyMissing { .. } => "key_missing",
        }
    }

    /// Peer shown in the open modal, if any. Its roster row stays pinned.
    pub fn peer(&self) -> Option<&PeerIdentity> {
        match self {
            ProvisionState::Idle | ProvisionState::KeyGenerated { .. } => None,
            ProvisionState::PeerRegistered { peer, .. }
            | ProvisionState::ArtifactOffered { peer, .. }
            | ProvisionState::ArtifactRendered { peer, .. }
            | ProvisionState::KeyMissing { peer, .. } => Some(peer),
        }
    }

    /// Identity and network config remembered for `public_key`
    pub fn known_peer(&self, public_key: &str) -> Option<(PeerIdentity, PeerNetworkConfig)> {
        match self {
            ProvisionState::PeerRegistered { peer, net }
            | ProvisionState::ArtifactOffered { peer, net, .. }
            | ProvisionState::ArtifactRendered { peer, net, .. }
            | ProvisionState::KeyMissing { peer, net, .. }
                if peer.public_key == public_key =>
            {
                Some((peer.clone(), net.clone()))
            }
            _ => None,
        }
    }

    /// Endpoint a retry should reuse when the request names none
    pub fn retry_endpoint(&self, public_key: &str) -> Option<&str> {
        match self {
            ProvisionState::KeyMissing { peer, endpoint, .. }
            | ProvisionState::ArtifactRendered { peer, endpoint, .. }
                if peer.public_key == public_key =>
            {
                Some(endpoint.as_str())
            }
            _ => None,
        }
    }

    pub fn view(&self) -> StateView {
        match self {
            ProvisionState::Idle => StateView::Idle,
            ProvisionState::KeyGenerated {
                pending,
                suggested_address,
            } => StateView::KeyGenerated {
                public_key: pending.public_key.clone(),
                suggested_name: default_peer_name(&pending.public_key),
                suggested_address: suggested_address.as_ref().map(|a| a.to_string()),
            },
            ProvisionState::PeerRegistered { peer, .. } => {
                StateView::PeerRegistered { peer: peer.clone() }
            }
            ProvisionState::ArtifactOffered {
                peer,
                default_endpoint,
                ..
            } => StateView::ArtifactOffered {
                peer: peer.clone(),
                default_endpoint: default_endpoint.clone(),
            },
            ProvisionState::ArtifactRendered {
                peer,
                source,
                endpoint,
                ..
            } => StateView::ArtifactRendered {
                peer: peer.clone(),
                source: *source,
                endpoint: endpoint.clone(),
            },
            ProvisionState::KeyMissing { peer, endpoint, .. } => StateView::KeyMissing {
                peer: peer.clone(),
                endpoint: endpoint.clone(),
            },
        }
    }
}

/// Secret-free snapshot of the state for the UI
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum StateView {
    Idle,
    KeyGenerated {
        public_key: String,
        suggested_name: String,
        suggested_address: Option<String>,
    },
    PeerRegistered {
        peer: PeerIdentity,
    },
    ArtifactOffered {
        peer: PeerIdentity,
        default_endpoint: Option<String>,
    },
    ArtifactRendered {
        peer: PeerIdentity,
        source: ArtifactSource,
        endpoint: String,
    },
    KeyMissing {
        peer: PeerIdentity,
        endpoint: String,
    },
}
