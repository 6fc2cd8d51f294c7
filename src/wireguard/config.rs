//! WireGuard client configuration file generator
//!
//! Pure functions: no I/O, identical inputs give byte-identical output.

use std::net::{IpAddr, Ipv6Addr};
use std::sync::OnceLock;

use regex::Regex;

use crate::error::ProvisionError;
use crate::models::{join_networks, PeerIdentity, PeerNetworkConfig, ServerIdentity, TunnelMode};

/// Routes used by full-tunnel client configs
pub const FULL_TUNNEL_ROUTES: &str = "0.0.0.0/0, ::/0";

/// Per-render settings that are not part of the peer's own identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfigOptions {
    /// Overrides the client address derived from `allowed_ips`
    pub address: Option<String>,
    /// Used when neither `address` nor `allowed_ips` yield one
    pub default_address: String,
    pub dns: Vec<String>,
    pub mtu: Option<u16>,
    pub tunnel: TunnelMode,
}

impl Default for ClientConfigOptions {
    fn default() -> Self {
        Self {
            address: None,
            default_address: "10.0.0.2/32".to_string(),
            dns: vec!["1.1.1.1".to_string(), "1.0.0.1".to_string()],
            mtu: None,
            tunnel: TunnelMode::Full,
        }
    }
}

/// Fully resolved client config, one field per emitted line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WgClientConfig<'a> {
    pub private_key: &'a str,
    pub address: String,
    pub dns: String,
    pub mtu: Option<u16>,
    pub server_public_key: &'a str,
    pub preshared_key: Option<&'a str>,
    pub endpoint: String,
    pub allowed_ips: String,
    pub persistent_keepalive: u16,
}

/// Render a WireGuard client configuration string (.conf format)
pub fn generate_config(params: &WgClientConfig<'_>) -> String {
    let mut out = String::with_capacity(320);

    out.push_str("[Interface]\n");
    out.push_str(&format!("PrivateKey = {}\n", params.private_key));
    out.push_str(&format!("Address = {}\n", params.address));
    if !params.dns.is_empty() {
        out.push_str(&format!("DNS = {}\n", params.dns));
    }
    if let Some(mtu) = params.mtu {
        out.push_str(&format!("MTU = {}\n", mtu));
    }

    out.push_str("\n[Peer]\n");
    out.push_str(&format!("PublicKey = {}\n", params.server_public_key));
    if let Some(psk) = params.preshared_key {
        out.push_str(&format!("PresharedKey = {}\n", psk));
    }
    out.push_str(&format!("Endpoint = {}\n", params.endpoint));
    out.push_str(&format!("AllowedIPs = {}\n", params.allowed_ips));
    if params.persistent_keepalive > 0 {
        out.push_str(&format!(
            "PersistentKeepalive = {}\n",
            params.persistent_keepalive
        ));
    }

    out
}

/// Build the canonical client config for a peer
pub fn synthesize(
    peer: &PeerIdentity,
    net: &PeerNetworkConfig,
    server: &ServerIdentity,
    private_key: &str,
    endpoint: &str,
    opts: &ClientConfigOptions,
) -> Result<String, ProvisionError> {
    let endpoint = ServerEndpoint::parse(endpoint, server.listen_port)?;

    if server.public_key.trim().is_empty() {
        return Err(ProvisionError::MissingServerKey);
    }

    let address = opts
        .address
        .clone()
        .filter(|a| !a.trim().is_empty())
        .or_else(|| net.allowed_ips.first().map(|n| n.to_string()))
        .unwrap_or_else(|| opts.default_address.clone());

    let allowed_ips = match &opts.tunnel {
        TunnelMode::Full => FULL_TUNNEL_ROUTES.to_string(),
        TunnelMode::Split { routes } if !routes.is_empty() => join_networks(routes),
        TunnelMode::Split { .. } => join_networks(&net.allowed_ips),
    };

    tracing::debug!(
        "[Config] Synthesizing client config for {}/{}",
        peer.interface_name,
        peer.short_id
    );

    Ok(generate_config(&WgClientConfig {
        private_key,
        address,
        dns: opts.dns.join(", "),
        mtu: opts.mtu,
        server_public_key: server.public_key.trim(),
        preshared_key: net.preshared_key.as_deref(),
        endpoint: endpoint.to_string(),
        allowed_ips,
        persistent_keepalive: net.persistent_keepalive,
    }))
}

/// Download filename: `<interface>-<short_id>.conf`
pub fn config_filename(peer: &PeerIdentity) -> String {
    let sanitize = |s: &str| -> String {
        s.chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect()
    };

    let short = if peer.short_id.is_empty() {
        "peer".to_string()
    } else {
        sanitize(&peer.short_id)
    };

    format!("{}-{}.conf", sanitize(&peer.interface_name), short)
}

// ============================================================================
// Endpoint parsing
// ============================================================================

/// Server endpoint as written to `[Peer] Endpoint`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerEndpoint {
    pub host: String,
    pub port: u16,
}

fn hostname_label_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9]([A-Za-z0-9-]{0,61}[A-Za-z0-9])?$")
            .expect("hostname label regex is valid")
    })
}

fn is_valid_hostname(host: &str) -> bool {
    let host = host.strip_suffix('.').unwrap_or(host);
    !host.is_empty()
        && host.len() <= 253
        && host.split('.').all(|label| hostname_label_regex().is_match(label))
}

fn parse_port(raw: &str, original: &str) -> Result<u16, ProvisionError> {
    match raw.parse::<u16>() {
        Ok(0) | Err(_) => Err(ProvisionError::InvalidEndpoint(format!(
            "'{}' has an invalid port",
            original
        ))),
        Ok(port) => Ok(port),
    }
}

impl ServerEndpoint {
    /// Accepts `host`, `host:port`, `[v6]:port` and bare IPv6 literals
    pub fn parse(raw: &str, default_port: u16) -> Result<Self, ProvisionError> {
        let input = raw.trim();
        if input.is_empty() {
            return Err(ProvisionError::InvalidEndpoint(
                "endpoint is empty".to_string(),
            ));
        }

        let (host, port) = if let Some(rest) = input.strip_prefix('[') {
            let (host, after) = rest.split_once(']').ok_or_else(|| {
                ProvisionError::InvalidEndpoint(format!("'{}' has an unclosed bracket", input))
            })?;
            if host.parse::<Ipv6Addr>().is_err() {
                return Err(ProvisionError::InvalidEndpoint(format!(
                    "'{}' is not an IPv6 address",
                    host
                )));
            }
            let port = match after {
                "" => default_port,
                p => match p.strip_prefix(':') {
                    Some(p) => parse_port(p, input)?,
                    None => {
                        return Err(ProvisionError::InvalidEndpoint(format!(
                            "unexpected '{}' after address",
                            p
                        )))
                    }
                },
            };
            (host.to_string(), port)
        } else if input.parse::<Ipv6Addr>().is_ok() {
            (input.to_string(), default_port)
        } else {
            match input.split_once(':') {
                Some((host, port)) => (host.to_string(), parse_port(port, input)?),
                None => (input.to_string(), default_port),
            }
        };

        let valid = match host.parse::<IpAddr>() {
            Ok(_) => true,
            Err(_) => is_valid_hostname(&host),
        };
        if !valid {
            return Err(ProvisionError::InvalidEndpoint(format!(
                "'{}' is not a valid host",
                host
            )));
        }
        if port == 0 {
            return Err(ProvisionError::InvalidEndpoint(
                "port must be non-zero".to_string(),
            ));
        }

        Ok(Self { host, port })
    }
}

impl std::fmt::Display for ServerEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}
