//! Data models for wg-peer-provisioner

use std::net::IpAddr;

use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};

// ============================================================================
// Peer identity and network configuration
// ============================================================================

/// Length of the display-only key prefix
pub const SHORT_ID_LEN: usize = 8;

/// Public identity of a registered peer. `public_key` is the vault lookup key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerIdentity {
    pub interface_name: String,
    pub public_key: String,
    pub short_id: String,
}

/// Display prefix of a public key, safe for logs
pub fn short_id(public_key: &str) -> String {
    public_key.chars().take(SHORT_ID_LEN).collect()
}

/// Name offered for a new peer until the operator picks one
pub fn default_peer_name(public_key: &str) -> String {
    format!("peer_{}", short_id(public_key))
}

impl PeerIdentity {
    pub fn new(interface_name: impl Into<String>, public_key: impl Into<String>) -> Self {
        let public_key = public_key.into();
        let short_id = short_id(&public_key);
        Self {
            interface_name: interface_name.into(),
            public_key,
            short_id,
        }
    }
}

/// Network settings of a peer, read-only input to config synthesis
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PeerNetworkConfig {
    pub allowed_ips: Vec<IpNetwork>,
    pub endpoint_host: Option<String>,
    pub endpoint_port: Option<u16>,
    pub persistent_keepalive: u16,
    pub preshared_key: Option<String>,
    /// Client profile chosen at registration
    pub preset: Option<String>,
}

/// Server-side counterpart the client config points at
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerIdentity {
    pub public_key: String,
    pub listen_port: u16,
}

/// Route set placed in the client's `[Peer] AllowedIPs`
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum TunnelMode {
    #[default]
    Full,
    Split {
        #[serde(default)]
        routes: Vec<IpNetwork>,
    },
}

/// Parse a comma- or whitespace-separated CIDR list ("10.0.0.2/32, fd00::2/128")
pub fn parse_cidr_list(raw: &str) -> Result<Vec<IpNetwork>, String> {
    let nets = raw
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<IpNetwork>()
                .map_err(|e| format!("'{}' is not a valid CIDR: {}", s, e))
        })
        .collect::<Result<Vec<_>, _>>()?;

    if nets.is_empty() {
        return Err("at least one CIDR is required".to_string());
    }
    Ok(nets)
}

/// Join networks the way WireGuard configs list them
pub fn join_networks(nets: &[IpNetwork]) -> String {
    nets.iter()
        .map(|n| n.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Upper bound on addresses scanned in large (IPv6) peer networks
const MAX_ADDRESS_SCAN: usize = 65_536;

/// Lowest free host address in `network`, as a host route.
///
/// The network address and the first host (the server) are never handed
/// out, nor is the IPv4 broadcast address. Only entries of `taken` that lie
/// inside `network` count as used.
pub fn next_free_address(network: IpNetwork, taken: &[IpNetwork]) -> Option<IpNetwork> {
    let (host_prefix, broadcast) = match network {
        IpNetwork::V4(n) => (32, Some(IpAddr::V4(n.broadcast()))),
        IpNetwork::V6(_) => (128, None),
    };
    let used: Vec<&IpNetwork> = taken
        .iter()
        .filter(|t| t.prefix() >= network.prefix() && network.contains(t.network()))
        .collect();

    network
        .iter()
        .skip(2)
        .take(MAX_ADDRESS_SCAN)
        .filter(|ip| Some(*ip) != broadcast)
        .find(|ip| !used.iter().any(|t| t.contains(*ip)))
        .and_then(|ip| IpNetwork::new(ip, host_prefix).ok())
}

// ============================================================================
// Artifact
// ============================================================================

/// Which rendering path produced an artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactSource {
    Remote,
    Local,
}

/// Scannable code payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "format", content = "data", rename_all = "lowercase")]
pub enum RenderedCode {
    /// Raster image from the backend, as a data URL
    Image(String),
    /// Locally encoded SVG markup
    Svg(String),
}

/// Distribution artifact. Built per request, never cached.
#[derive(Debug, Clone, Serialize)]
pub struct ProvisioningArtifact {
    pub peer: PeerIdentity,
    pub config_text: String,
    pub code: RenderedCode,
    pub source: ArtifactSource,
    pub filename: String,
}

/// Plain config download
#[derive(Debug, Clone, Serialize)]
pub struct ConfigDownload {
    pub filename: String,
    pub config_text: String,
}

// ============================================================================
// Roster
// ============================================================================

/// Seconds since the last handshake below which a peer counts as active
pub const ACTIVE_HANDSHAKE_SECS: u64 = 180;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerState {
    Active,
    Idle,
    Inactive,
}

impl PeerState {
    pub fn from_handshake_age(age: Option<u64>) -> Self {
        match age {
            Some(secs) if secs <= ACTIVE_HANDSHAKE_SECS => PeerState::Active,
            Some(_) => PeerState::Idle,
            None => PeerState::Inactive,
        }
    }
}

/// Observable peer status from the roster query. Contains no key material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RosterPeer {
    pub public_key: String,
    pub interface_name: String,
    pub allowed_ips: String,
    pub endpoint: Option<String>,
    pub keepalive: u16,
    pub has_preshared_key: bool,
    pub state: PeerState,
    pub bytes_rx: u64,
    pub bytes_tx: u64,
    pub last_handshake_age_seconds: Option<u64>,
}

impl RosterPeer {
    pub fn identity(&self) -> PeerIdentity {
        PeerIdentity::new(&self.interface_name, &self.public_key)
    }

    /// Network config as far as the roster exposes it. Unparseable entries are skipped.
    pub fn network_config(&self) -> PeerNetworkConfig {
        let allowed_ips = self
            .allowed_ips
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter_map(|s| s.parse::<IpNetwork>().ok())
            .collect();

        let (endpoint_host, endpoint_port) = match self.endpoint.as_deref() {
            Some(ep) => match ep.rsplit_once(':') {
                Some((host, port)) => (
                    Some(host.trim_matches(|c| c == '[' || c == ']').to_string()),
                    port.parse().ok(),
                ),
                None => (Some(ep.to_string()), None),
            },
            None => (None, None),
        };

        PeerNetworkConfig {
            allowed_ips,
            endpoint_host,
            endpoint_port,
            persistent_keepalive: self.keepalive,
            preshared_key: None,
            preset: None,
        }
    }
}

/// WireGuard interface as reported by the interface registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InterfaceInfo {
    pub name: String,
    pub public_key: String,
    pub listen_port: Option<u16>,
}

impl InterfaceInfo {
    pub fn server_identity(&self, default_port: u16) -> ServerIdentity {
        ServerIdentity {
            public_key: self.public_key.clone(),
            listen_port: self.listen_port.unwrap_or(default_port),
        }
    }
}
