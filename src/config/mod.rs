//! Configuration module
//!
//! Sources: optional `config/default.{toml,yaml,json}` then `WGPROV__*`
//! environment variables (e.g. `WGPROV__BACKEND__BASE_URL`).

use std::collections::BTreeMap;
use std::net::IpAddr;

use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};

use crate::models::TunnelMode;
use crate::wireguard::ClientConfigOptions;

/// DNS entry in a preset that stands for the server's tunnel address
pub const SERVER_DNS_PLACEHOLDER: &str = "${SERVER_IP}";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub provisioning: ProvisioningConfig,
    #[serde(default)]
    pub render: RenderConfig,
    #[serde(default)]
    pub roster: RosterConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    /// Router base URL; requests go to `<base_url>/ubus`
    #[serde(default = "default_backend_url")]
    pub base_url: String,
    #[serde(default = "default_rpc_object")]
    pub rpc_object: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Routers commonly serve self-signed certificates
    #[serde(default)]
    pub accept_invalid_certs: bool,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: default_backend_url(),
            rpc_object: default_rpc_object(),
            username: None,
            password: None,
            timeout_secs: default_timeout_secs(),
            accept_invalid_certs: false,
        }
    }
}

/// Where new key pairs come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeySource {
    #[default]
    Backend,
    Local,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProvisioningConfig {
    #[serde(default)]
    pub key_source: KeySource,
    #[serde(default = "default_dns")]
    pub dns: Vec<String>,
    #[serde(default)]
    pub mtu: Option<u16>,
    #[serde(default = "default_keepalive")]
    pub persistent_keepalive: u16,
    #[serde(default = "default_listen_port")]
    pub default_listen_port: u16,
    #[serde(default = "default_client_address")]
    pub default_client_address: String,
    #[serde(default)]
    pub tunnel: TunnelMode,
    /// Pass the private key along on registration for backends that persist it
    #[serde(default)]
    pub send_private_key_hint: bool,
    /// Tunnel network peers are numbered from (server takes the first host)
    #[serde(default = "default_peer_network")]
    pub peer_network: String,
    /// Client profiles selectable on registration and rendering
    #[serde(default = "default_presets")]
    pub presets: BTreeMap<String, PeerPreset>,
}

/// Client profile: resolver, MTU, keepalive and route set for a class of device.
///
/// A `split` tunnel without routes sends only the peer network through the
/// tunnel. `${SERVER_IP}` in `dns` resolves to the server's tunnel address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerPreset {
    pub label: String,
    #[serde(default)]
    pub dns: Vec<String>,
    #[serde(default)]
    pub mtu: Option<u16>,
    #[serde(default = "default_keepalive")]
    pub keepalive: u16,
    #[serde(default)]
    pub tunnel: TunnelMode,
}

impl Default for ProvisioningConfig {
    fn default() -> Self {
        Self {
            key_source: KeySource::default(),
            dns: default_dns(),
            mtu: None,
            persistent_keepalive: default_keepalive(),
            default_listen_port: default_listen_port(),
            default_client_address: default_client_address(),
            tunnel: TunnelMode::default(),
            send_private_key_hint: false,
            peer_network: default_peer_network(),
            presets: default_presets(),
        }
    }
}

impl ProvisioningConfig {
    pub fn client_options(&self) -> ClientConfigOptions {
        ClientConfigOptions {
            address: None,
            default_address: self.default_client_address.clone(),
            dns: self.dns.clone(),
            mtu: self.mtu,
            tunnel: self.tunnel.clone(),
        }
    }

    pub fn preset(&self, name: &str) -> Option<&PeerPreset> {
        self.presets.get(name)
    }

    pub fn peer_network(&self) -> Option<IpNetwork> {
        self.peer_network.trim().parse().ok()
    }

    /// First host of the peer network
    pub fn server_address(&self) -> Option<IpAddr> {
        self.peer_network().and_then(|net| net.iter().nth(1))
    }
}

/// Order in which the two rendering paths are tried
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderPolicy {
    #[default]
    RemoteFirst,
    LocalFirst,
    RemoteOnly,
    LocalOnly,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RenderConfig {
    #[serde(default)]
    pub policy: RenderPolicy,
    /// QR error correction level: L, M, Q or H
    #[serde(default = "default_ec_level")]
    pub ec_level: String,
    #[serde(default = "default_qr_size")]
    pub min_dimension: u32,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            policy: RenderPolicy::default(),
            ec_level: default_ec_level(),
            min_dimension: default_qr_size(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RosterConfig {
    #[serde(default = "default_poll_secs")]
    pub poll_interval_secs: u64,
}

impl Default for RosterConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,
    #[serde(default = "default_idle_minutes")]
    pub idle_timeout_minutes: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_name: default_cookie_name(),
            idle_timeout_minutes: default_idle_minutes(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8082
}

fn default_backend_url() -> String {
    "http://192.168.1.1".to_string()
}

fn default_rpc_object() -> String {
    "luci.wireguard-dashboard".to_string()
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_dns() -> Vec<String> {
    vec!["1.1.1.1".to_string(), "1.0.0.1".to_string()]
}

fn default_keepalive() -> u16 {
    25
}

fn default_listen_port() -> u16 {
    51820
}

fn default_client_address() -> String {
    "10.0.0.2/32".to_string()
}

fn default_peer_network() -> String {
    "10.0.0.0/24".to_string()
}

fn default_presets() -> BTreeMap<String, PeerPreset> {
    let cloudflare = vec!["1.1.1.1".to_string(), "1.0.0.1".to_string()];
    let server_dns = vec![SERVER_DNS_PLACEHOLDER.to_string()];
    let lan_routes: Vec<IpNetwork> = ["10.0.0.0/8", "172.16.0.0/12", "192.168.0.0/16"]
        .iter()
        .filter_map(|r| r.parse::<IpNetwork>().ok())
        .collect();
    let vpn_only = TunnelMode::Split { routes: Vec::new() };

    let preset = |label: &str, dns: Vec<String>, mtu: u16, keepalive: u16, tunnel: TunnelMode| {
        PeerPreset {
            label: label.to_string(),
            dns,
            mtu: Some(mtu),
            keepalive,
            tunnel,
        }
    };

    BTreeMap::from([
        (
            "home-user".to_string(),
            preset("Home User", cloudflare.clone(), 1420, 25, TunnelMode::Full),
        ),
        (
            "remote-worker".to_string(),
            preset(
                "Remote Worker",
                server_dns.clone(),
                1420,
                25,
                TunnelMode::Split { routes: lan_routes },
            ),
        ),
        (
            "mobile-device".to_string(),
            preset("Mobile Device", cloudflare, 1280, 25, TunnelMode::Full),
        ),
        (
            "iot-device".to_string(),
            preset("IoT Device", server_dns, 1420, 60, vpn_only.clone()),
        ),
        (
            "guest".to_string(),
            preset("Guest", vec!["1.1.1.1".to_string()], 1420, 25, TunnelMode::Full),
        ),
        (
            "server".to_string(),
            preset("Server/Site", Vec::new(), 1420, 25, vpn_only),
        ),
    ])
}

fn default_ec_level() -> String {
    "L".to_string()
}

fn default_qr_size() -> u32 {
    250
}

fn default_poll_secs() -> u64 {
    5
}

fn default_cookie_name() -> String {
    "wgp_session".to_string()
}

fn default_idle_minutes() -> u64 {
    30
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(
                config::Environment::with_prefix("WGPROV")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("provisioning.dns")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        let url = url::Url::parse(&self.backend.base_url)
            .map_err(|e| anyhow::anyhow!("backend.base_url '{}': {}", self.backend.base_url, e))?;
        if !matches!(url.scheme(), "http" | "https") {
            anyhow::bail!("backend.base_url must use http or https");
        }
        if !matches!(self.render.ec_level.as_str(), "L" | "M" | "Q" | "H") {
            anyhow::bail!("render.ec_level must be one of L, M, Q, H");
        }
        if self.roster.poll_interval_secs == 0 {
            anyhow::bail!("roster.poll_interval_secs must be positive");
        }
        if self.session.idle_timeout_minutes == 0 {
            anyhow::bail!("session.idle_timeout_minutes must be positive");
        }
        if self.provisioning.peer_network().is_none() {
            anyhow::bail!(
                "provisioning.peer_network '{}' is not a CIDR network",
                self.provisioning.peer_network
            );
        }
        Ok(())
    }
}
