//! In-memory backend for tests
//!
//! Implements every capability trait, records calls by ubus method name
//! and lets tests script failures per method.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::{
    CapabilityError, KeyGenerator, PeerRegistry, RegisterPeerRequest, RemoteArtifact,
    RemoteRenderer, RosterSource,
};
use crate::models::{join_networks, InterfaceInfo, PeerIdentity, PeerState, RosterPeer};
use crate::wireguard::{keygen, synthesize, ClientConfigOptions, SecretKey, WgKeyPair};

pub const SERVER_KEY: &str = "SRVKEY";

#[derive(Default)]
pub struct MockBackend {
    interfaces: Mutex<Vec<InterfaceInfo>>,
    peers: Mutex<Vec<RosterPeer>>,
    /// Private keys the backend persisted from registration hints
    stored_keys: Mutex<HashMap<String, String>>,
    failures: Mutex<HashMap<&'static str, CapabilityError>>,
    calls: Mutex<Vec<&'static str>>,
    /// Held by `generate_qr` before answering
    render_delay: Mutex<Option<Duration>>,
}

impl MockBackend {
    /// Backend with a single `wg0` interface listening on 51820
    pub fn new() -> Self {
        let backend = Self::default();
        backend.interfaces.lock().unwrap().push(InterfaceInfo {
            name: "wg0".to_string(),
            public_key: SERVER_KEY.to_string(),
            listen_port: Some(51820),
        });
        backend
    }

    pub fn fail_on(&self, method: &'static str, err: CapabilityError) {
        self.failures.lock().unwrap().insert(method, err);
    }

    pub fn set_peers(&self, peers: Vec<RosterPeer>) {
        *self.peers.lock().unwrap() = peers;
    }

    pub fn set_interfaces(&self, interfaces: Vec<InterfaceInfo>) {
        *self.interfaces.lock().unwrap() = interfaces;
    }

    pub fn set_render_delay(&self, delay: Duration) {
        *self.render_delay.lock().unwrap() = Some(delay);
    }

    pub fn store_key(&self, public_key: &str, private_key: &str) {
        self.stored_keys
            .lock()
            .unwrap()
            .insert(public_key.to_string(), private_key.to_string());
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self, method: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|m| **m == method).count()
    }

    fn record(&self, method: &'static str) -> Result<(), CapabilityError> {
        self.calls.lock().unwrap().push(method);
        match self.failures.lock().unwrap().get(method) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    fn config_text(
        &self,
        interface_name: &str,
        public_key: &str,
        private_key: Option<&SecretKey>,
        endpoint: &str,
    ) -> Result<String, CapabilityError> {
        let private_key = match private_key.filter(|k| !k.expose().is_empty()) {
            Some(k) => k.expose().to_string(),
            None => self
                .stored_keys
                .lock()
                .unwrap()
                .get(public_key)
                .cloned()
                .ok_or_else(|| CapabilityError::rejected("Private key not available"))?,
        };

        let server = self
            .interfaces
            .lock()
            .unwrap()
            .iter()
            .find(|i| i.name == interface_name)
            .map(|i| i.server_identity(51820))
            .ok_or_else(|| CapabilityError::rejected("Interface not found"))?;

        let net = self
            .peers
            .lock()
            .unwrap()
            .iter()
            .find(|p| p.public_key == public_key)
            .map(|p| p.network_config())
            .unwrap_or_default();

        synthesize(
            &PeerIdentity::new(interface_name, public_key),
            &net,
            &server,
            &private_key,
            endpoint,
            &ClientConfigOptions::default(),
        )
        .map_err(|e| CapabilityError::rejected(e.to_string()))
    }
}

#[async_trait]
impl KeyGenerator for MockBackend {
    async fn generate_keypair(&self) -> Result<WgKeyPair, CapabilityError> {
        self.record("generate_keys")?;
        Ok(keygen::generate_keypair())
    }
}

#[async_trait]
impl PeerRegistry for MockBackend {
    async fn register_peer(&self, req: &RegisterPeerRequest) -> Result<String, CapabilityError> {
        self.record("add_peer")?;

        let mut peers = self.peers.lock().unwrap();
        if peers.iter().any(|p| p.public_key == req.public_key) {
            return Err(CapabilityError::rejected("Peer already exists"));
        }
        peers.push(RosterPeer {
            public_key: req.public_key.clone(),
            interface_name: req.interface_name.clone(),
            allowed_ips: join_networks(&req.allowed_ips),
            endpoint: req.endpoint.clone(),
            keepalive: req.keepalive,
            has_preshared_key: req.preshared_key.is_some(),
            state: PeerState::Inactive,
            bytes_rx: 0,
            bytes_tx: 0,
            last_handshake_age_seconds: None,
        });
        drop(peers);

        if let Some(ref hint) = req.private_key_hint {
            self.store_key(&req.public_key, hint.expose());
        }
        Ok("Peer added successfully".to_string())
    }

    async fn remove_peer(
        &self,
        _interface_name: &str,
        public_key: &str,
    ) -> Result<String, CapabilityError> {
        self.record("remove_peer")?;

        let mut peers = self.peers.lock().unwrap();
        let before = peers.len();
        peers.retain(|p| p.public_key != public_key);
        if peers.len() == before {
            return Err(CapabilityError::rejected("Peer not found"));
        }
        Ok("Peer removed successfully".to_string())
    }
}

#[async_trait]
impl RemoteRenderer for MockBackend {
    async fn render_remote(
        &self,
        interface_name: &str,
        public_key: &str,
        private_key: Option<&SecretKey>,
        endpoint: &str,
    ) -> Result<RemoteArtifact, CapabilityError> {
        self.record("generate_qr")?;
        let delay = *self.render_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let config_text = self.config_text(interface_name, public_key, private_key, endpoint)?;
        Ok(RemoteArtifact {
            code: format!("data:image/png;base64,{}", config_text.len()),
            config_text,
        })
    }

    async fn render_config_text(
        &self,
        interface_name: &str,
        public_key: &str,
        private_key: Option<&SecretKey>,
        endpoint: &str,
    ) -> Result<String, CapabilityError> {
        self.record("generate_config")?;
        self.config_text(interface_name, public_key, private_key, endpoint)
    }
}

#[async_trait]
impl RosterSource for MockBackend {
    async fn list_peers(&self) -> Result<Vec<RosterPeer>, CapabilityError> {
        self.record("peers")?;
        Ok(self.peers.lock().unwrap().clone())
    }

    async fn list_interfaces(&self) -> Result<Vec<InterfaceInfo>, CapabilityError> {
        self.record("interfaces")?;
        Ok(self.interfaces.lock().unwrap().clone())
    }
}

/// Roster row fixture
pub fn roster_peer(public_key: &str, bytes_rx: u64, age: Option<u64>) -> RosterPeer {
    RosterPeer {
        public_key: public_key.to_string(),
        interface_name: "wg0".to_string(),
        allowed_ips: "10.0.0.2/32".to_string(),
        endpoint: None,
        keepalive: 25,
        has_preshared_key: false,
        state: PeerState::from_handshake_age(age),
        bytes_rx,
        bytes_tx: 0,
        last_handshake_age_seconds: age,
    }
}
