//! ubus JSON-RPC client for the router's WireGuard dashboard backend
//!
//! Every call is `POST <base_url>/ubus` with
//! `{"jsonrpc":"2.0","id":n,"method":"call","params":[session, object, method, args]}`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::RwLock;

use super::{
    CapabilityError, KeyGenerator, PeerRegistry, RegisterPeerRequest, RemoteArtifact,
    RemoteRenderer, RosterSource,
};
use crate::config::BackendConfig;
use crate::models::{join_networks, InterfaceInfo, PeerState, RosterPeer};
use crate::wireguard::{SecretKey, WgKeyPair};

/// Session id rpcd grants to unauthenticated callers
pub const ANONYMOUS_SESSION: &str = "00000000000000000000000000000000";

/// JSON-RPC error code rpcd returns for expired or unknown sessions
const ACCESS_DENIED: i64 = -32002;

#[derive(Debug, Clone)]
struct SessionToken {
    token: String,
    expires_at: Instant,
}

pub struct RpcClient {
    config: BackendConfig,
    http_client: Client,
    session: RwLock<Option<SessionToken>>,
    next_id: AtomicU64,
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Deserialize)]
struct UbusError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct UbusResponse {
    #[serde(default)]
    result: Option<Vec<Value>>,
    #[serde(default)]
    error: Option<UbusError>,
}

#[derive(Debug, Deserialize)]
struct LoginResult {
    ubus_rpc_session: String,
    #[serde(default)]
    expires: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ActionReply {
    #[serde(default)]
    success: Option<bool>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct KeysReply {
    #[serde(default)]
    private_key: Option<String>,
    #[serde(default)]
    public_key: Option<String>,
    #[serde(default)]
    preshared_key: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QrReply {
    #[serde(default)]
    qrcode: Option<String>,
    #[serde(default)]
    config: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ConfigReply {
    #[serde(default)]
    config: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WirePeer {
    public_key: String,
    #[serde(default)]
    interface: String,
    #[serde(default)]
    allowed_ips: Option<String>,
    #[serde(default)]
    endpoint: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    rx_bytes: Option<Value>,
    #[serde(default)]
    tx_bytes: Option<Value>,
    #[serde(default)]
    handshake_ago: Option<Value>,
    #[serde(default)]
    keepalive: Option<Value>,
    #[serde(default)]
    preshared_key: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct PeersReply {
    #[serde(default)]
    peers: Vec<WirePeer>,
}

#[derive(Debug, Deserialize)]
struct WireInterface {
    name: String,
    #[serde(default)]
    public_key: Option<String>,
    #[serde(default)]
    listen_port: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct InterfacesReply {
    #[serde(default)]
    interfaces: Vec<WireInterface>,
}

// ============================================================================
// Response decoding
// ============================================================================

fn ubus_status_name(code: i64) -> &'static str {
    match code {
        1 => "invalid command",
        2 => "invalid argument",
        3 => "method not found",
        4 => "not found",
        5 => "no data",
        6 => "permission denied",
        7 => "timeout",
        8 => "not supported",
        9 => "unknown error",
        10 => "connection failed",
        _ => "unexpected status",
    }
}

/// Unwrap `{"result":[status, data]}` into `data`
fn unwrap_response(resp: UbusResponse) -> Result<Value, CapabilityError> {
    if let Some(err) = resp.error {
        return Err(CapabilityError::rejected(format!(
            "{} ({})",
            err.message, err.code
        )));
    }

    let mut result = resp
        .result
        .ok_or_else(|| CapabilityError::transport("ubus response without result"))?
        .into_iter();

    let status = result.next().and_then(|v| v.as_i64()).unwrap_or(-1);
    if status != 0 {
        return Err(CapabilityError::rejected(format!(
            "ubus status {}: {}",
            status,
            ubus_status_name(status)
        )));
    }

    Ok(result.next().unwrap_or_else(|| Value::Object(Default::default())))
}

fn decode<T: DeserializeOwned>(method: &str, value: Value) -> Result<T, CapabilityError> {
    serde_json::from_value(value)
        .map_err(|e| CapabilityError::transport(format!("{} reply parse failed: {}", method, e)))
}

/// rpcd shell scripts emit numbers as strings as often as not
fn lenient_u64(value: Option<&Value>) -> Option<u64> {
    match value? {
        Value::Number(n) => n.as_u64().or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn truthy(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => !s.is_empty() && s != "(none)" && s != "0",
        Some(Value::Number(n)) => n.as_u64().unwrap_or(0) != 0,
        _ => false,
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| {
        let s = s.trim();
        !s.is_empty() && s != "(none)"
    })
}

fn action_result(method: &str, value: Value) -> Result<String, CapabilityError> {
    let reply: ActionReply = decode(method, value)?;
    match (reply.success, reply.error) {
        (_, Some(error)) => Err(CapabilityError::rejected(error)),
        (Some(true), None) => Ok(reply.message.unwrap_or_else(|| "ok".to_string())),
        _ => Err(CapabilityError::rejected(
            reply
                .message
                .unwrap_or_else(|| format!("{} failed", method)),
        )),
    }
}

fn peers_from_value(value: Value) -> Result<Vec<RosterPeer>, CapabilityError> {
    // Some backend versions return the bare array instead of {"peers": [...]}
    let reply: PeersReply = match value {
        Value::Array(_) => PeersReply {
            peers: decode("peers", value)?,
        },
        other => decode("peers", other)?,
    };

    Ok(reply
        .peers
        .into_iter()
        .map(|p| {
            let age = match p.handshake_ago.as_ref() {
                Some(Value::Number(n)) if n.as_i64().map_or(false, |v| v < 0) => None,
                other => lenient_u64(other),
            };
            let state = match p.status.as_deref() {
                Some("active") => PeerState::Active,
                Some("idle") => PeerState::Idle,
                Some(_) => PeerState::Inactive,
                None => PeerState::from_handshake_age(age),
            };
            RosterPeer {
                public_key: p.public_key,
                interface_name: p.interface,
                allowed_ips: p.allowed_ips.unwrap_or_default(),
                endpoint: non_empty(p.endpoint),
                keepalive: lenient_u64(p.keepalive.as_ref())
                    .and_then(|k| u16::try_from(k).ok())
                    .unwrap_or(0),
                has_preshared_key: truthy(p.preshared_key.as_ref()),
                state,
                bytes_rx: lenient_u64(p.rx_bytes.as_ref()).unwrap_or(0),
                bytes_tx: lenient_u64(p.tx_bytes.as_ref()).unwrap_or(0),
                last_handshake_age_seconds: age,
            }
        })
        .collect())
}

fn interfaces_from_value(value: Value) -> Result<Vec<InterfaceInfo>, CapabilityError> {
    let reply: InterfacesReply = match value {
        Value::Array(_) => InterfacesReply {
            interfaces: decode("interfaces", value)?,
        },
        other => decode("interfaces", other)?,
    };

    Ok(reply
        .interfaces
        .into_iter()
        .map(|i| InterfaceInfo {
            name: i.name,
            public_key: i.public_key.unwrap_or_default(),
            listen_port: lenient_u64(i.listen_port.as_ref()).and_then(|p| u16::try_from(p).ok()),
        })
        .collect())
}

// ============================================================================
// Client
// ============================================================================

impl RpcClient {
    pub fn new(config: BackendConfig) -> anyhow::Result<Self> {
        let http_client = Client::builder()
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            config,
            http_client,
            session: RwLock::new(None),
            next_id: AtomicU64::new(1),
        })
    }

    fn endpoint_url(&self) -> String {
        format!("{}/ubus", self.config.base_url.trim_end_matches('/'))
    }

    async fn call_raw(
        &self,
        session: &str,
        object: &str,
        method: &str,
        args: Value,
    ) -> Result<Value, CapabilityError> {
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "id": self.next_id.fetch_add(1, Ordering::Relaxed),
            "method": "call",
            "params": [session, object, method, args],
        });

        let resp = self
            .http_client
            .post(self.endpoint_url())
            .json(&body)
            .send()
            .await
            .map_err(|e| CapabilityError::transport(format!("{} request failed: {}", method, e)))?;

        if !resp.status().is_success() {
            return Err(CapabilityError::transport(format!(
                "{} returned HTTP {}",
                method,
                resp.status()
            )));
        }

        let parsed: UbusResponse = resp
            .json()
            .await
            .map_err(|e| CapabilityError::transport(format!("{} parse failed: {}", method, e)))?;

        if parsed.error.as_ref().map(|e| e.code) == Some(ACCESS_DENIED) {
            self.session.write().await.take();
        }

        unwrap_response(parsed)
    }

    /// Cached ubus session, logging in when credentials are configured
    async fn ensure_session(&self) -> Result<String, CapabilityError> {
        let (username, password) = match (&self.config.username, &self.config.password) {
            (Some(u), Some(p)) => (u, p),
            _ => return Ok(ANONYMOUS_SESSION.to_string()),
        };

        {
            let session = self.session.read().await;
            if let Some(ref s) = *session {
                if s.expires_at > Instant::now() {
                    return Ok(s.token.clone());
                }
            }
        }

        let value = self
            .call_raw(
                ANONYMOUS_SESSION,
                "session",
                "login",
                serde_json::json!({ "username": username, "password": password }),
            )
            .await?;
        let login: LoginResult = decode("login", value)?;
        let expires = login.expires.unwrap_or(300);

        {
            let mut session = self.session.write().await;
            *session = Some(SessionToken {
                token: login.ubus_rpc_session.clone(),
                expires_at: Instant::now() + Duration::from_secs(expires.saturating_sub(30)),
            });
        }

        tracing::info!("[Rpc] Session acquired, expires in {} sec", expires);
        Ok(login.ubus_rpc_session)
    }

    async fn call(&self, method: &str, args: Value) -> Result<Value, CapabilityError> {
        let session = self.ensure_session().await?;
        let result = self
            .call_raw(&session, &self.config.rpc_object, method, args)
            .await;

        if let Err(ref e) = result {
            tracing::debug!("[Rpc] {}.{} failed: {}", self.config.rpc_object, method, e);
        }
        result
    }
}

#[async_trait]
impl KeyGenerator for RpcClient {
    async fn generate_keypair(&self) -> Result<WgKeyPair, CapabilityError> {
        let value = self.call("generate_keys", serde_json::json!({})).await?;
        let reply: KeysReply = decode("generate_keys", value)?;

        if let Some(error) = reply.error {
            return Err(CapabilityError::rejected(error));
        }
        match (non_empty(reply.private_key), non_empty(reply.public_key)) {
            (Some(private_key), Some(public_key)) => Ok(WgKeyPair {
                private_key: SecretKey::new(private_key),
                public_key,
                preshared_key: non_empty(reply.preshared_key).map(SecretKey::new),
            }),
            _ => Err(CapabilityError::rejected("backend returned an incomplete key pair")),
        }
    }
}

#[async_trait]
impl PeerRegistry for RpcClient {
    async fn register_peer(&self, req: &RegisterPeerRequest) -> Result<String, CapabilityError> {
        let args = serde_json::json!({
            "interface": req.interface_name,
            "name": req.name,
            "allowed_ips": join_networks(&req.allowed_ips),
            "public_key": req.public_key,
            "preshared_key": req.preshared_key.as_ref().map(|k| k.expose()).unwrap_or(""),
            "endpoint": req.endpoint.as_deref().unwrap_or(""),
            "persistent_keepalive": req.keepalive.to_string(),
            "private_key": req.private_key_hint.as_ref().map(|k| k.expose()).unwrap_or(""),
        });

        let value = self.call("add_peer", args).await?;
        action_result("add_peer", value)
    }

    async fn remove_peer(
        &self,
        interface_name: &str,
        public_key: &str,
    ) -> Result<String, CapabilityError> {
        let value = self
            .call(
                "remove_peer",
                serde_json::json!({ "interface": interface_name, "public_key": public_key }),
            )
            .await?;
        action_result("remove_peer", value)
    }
}

#[async_trait]
impl RemoteRenderer for RpcClient {
    async fn render_remote(
        &self,
        interface_name: &str,
        public_key: &str,
        private_key: Option<&SecretKey>,
        endpoint: &str,
    ) -> Result<RemoteArtifact, CapabilityError> {
        let args = serde_json::json!({
            "interface": interface_name,
            "public_key": public_key,
            "private_key": private_key.map(|k| k.expose()).unwrap_or(""),
            "endpoint": endpoint,
        });

        let value = self.call("generate_qr", args).await?;
        let reply: QrReply = decode("generate_qr", value)?;

        if let Some(error) = reply.error {
            return Err(CapabilityError::rejected(error));
        }
        match (non_empty(reply.qrcode), non_empty(reply.config)) {
            (Some(code), Some(config_text)) => Ok(RemoteArtifact { code, config_text }),
            (None, _) => Err(CapabilityError::rejected("backend returned no QR code")),
            (_, None) => Err(CapabilityError::rejected("backend returned no config")),
        }
    }

    async fn render_config_text(
        &self,
        interface_name: &str,
        public_key: &str,
        private_key: Option<&SecretKey>,
        endpoint: &str,
    ) -> Result<String, CapabilityError> {
        let args = serde_json::json!({
            "interface": interface_name,
            "public_key": public_key,
            "private_key": private_key.map(|k| k.expose()).unwrap_or(""),
            "endpoint": endpoint,
        });

        let value = self.call("generate_config", args).await?;
        let reply: ConfigReply = decode("generate_config", value)?;

        if let Some(error) = reply.error {
            return Err(CapabilityError::rejected(error));
        }
        non_empty(reply.config)
            .ok_or_else(|| CapabilityError::rejected("backend returned no config"))
    }
}

#[async_trait]
impl RosterSource for RpcClient {
    async fn list_peers(&self) -> Result<Vec<RosterPeer>, CapabilityError> {
        let value = self.call("peers", serde_json::json!({})).await?;
        peers_from_value(value)
    }

    async fn list_interfaces(&self) -> Result<Vec<InterfaceInfo>, CapabilityError> {
        let value = self.call("interfaces", serde_json::json!({})).await?;
        interfaces_from_value(value)
    }
}
