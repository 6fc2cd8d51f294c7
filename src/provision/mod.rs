//! Provisioning Orchestrator
//!
//! Drives one operator session through key generation, peer registration
//! and artifact rendering:
//!
//! ```text
//! Idle -> KeyGenerated -> PeerRegistered -> ArtifactOffered -> ArtifactRendered
//!                                                  \-> KeyMissing -> (manual key) -> ArtifactRendered
//! ```
//!
//! The private key enters the session vault only after the backend has
//! confirmed registration, or after a manually supplied key has rendered.
//! Generation and registration failures end the attempt; render failures
//! can be retried without re-registering.
//!
//! Every return to `Idle` bumps a generation counter. A render that started
//! under an older generation still returns its artifact but leaves the
//! state (and the roster pin) alone.

pub mod state;

pub use state::{ProvisionState, StateView};

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use zeroize::{Zeroize, Zeroizing};

use crate::backend::{KeyGenerator, PeerRegistry, RegisterPeerRequest, RosterSource};
use crate::config::{PeerPreset, ProvisioningConfig, SERVER_DNS_PLACEHOLDER};
use crate::error::ProvisionError;
use crate::models::{
    default_peer_name, next_free_address, parse_cidr_list, short_id, ConfigDownload, PeerIdentity,
    PeerNetworkConfig, ProvisioningArtifact, TunnelMode,
};
use crate::render::{CodeRenderer, RenderJob};
use crate::roster::PinSet;
use crate::session::{EndpointMemory, SessionKeyVault, SessionSecret};
use crate::wireguard::keygen::public_key_for;
use crate::wireguard::{
    config_filename, synthesize, validate_private_key, ClientConfigOptions, ServerEndpoint,
};

const MAX_PEER_NAME_LEN: usize = 64;

/// Capabilities and settings shared by every session's orchestrator
pub struct ProvisionContext {
    pub keys: Arc<dyn KeyGenerator>,
    pub registry: Arc<dyn PeerRegistry>,
    pub directory: Arc<dyn RosterSource>,
    pub renderer: CodeRenderer,
    pub settings: ProvisioningConfig,
    pub pins: Arc<PinSet>,
}

/// Peer registration form
#[derive(Debug, Clone, Deserialize)]
pub struct NewPeerRequest {
    pub interface_name: String,
    /// Blank means `peer_<short id>`
    #[serde(default)]
    pub name: String,
    /// Comma-separated CIDR list. Blank takes the suggested address.
    #[serde(default)]
    pub allowed_ips: String,
    /// Client's own endpoint, rarely known for roaming devices
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub persistent_keepalive: Option<u16>,
    /// Client profile from `provisioning.presets`
    #[serde(default)]
    pub preset: Option<String>,
}

/// Returned by `begin_peer` so the form can be prefilled
#[derive(Debug, Clone, Serialize)]
pub struct PendingPeer {
    pub public_key: String,
    pub suggested_name: String,
    pub suggested_address: Option<String>,
}

/// Per-render overrides of the configured client options
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RenderOptions {
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub dns: Option<Vec<String>>,
    #[serde(default)]
    pub mtu: Option<u16>,
    #[serde(default)]
    pub tunnel: Option<TunnelMode>,
    /// Replaces the preset recorded at registration
    #[serde(default)]
    pub preset: Option<String>,
}

/// Client options after the preset and explicit overrides are applied
struct ResolvedOptions {
    client: ClientConfigOptions,
    keepalive: Option<u16>,
}

impl RenderOptions {
    /// Whether the config would differ from what the backend renders on its own
    pub fn is_customized(&self) -> bool {
        non_blank(self.address.as_deref()).is_some()
            || self.dns.is_some()
            || self.mtu.is_some()
            || self.tunnel.is_some()
            || non_blank(self.preset.as_deref()).is_some()
    }

    fn resolve(
        &self,
        settings: &ProvisioningConfig,
        registered_preset: Option<&str>,
    ) -> Result<ResolvedOptions, ProvisionError> {
        let mut client = settings.client_options();
        let mut keepalive = None;

        if let Some(name) = non_blank(self.preset.as_deref()).or(registered_preset) {
            let preset = lookup_preset(settings, name)?;
            apply_preset(settings, preset, &mut client);
            keepalive = Some(preset.keepalive);
        }

        if let Some(address) = non_blank(self.address.as_deref()) {
            address.parse::<IpNetwork>().map_err(|e| {
                ProvisionError::InvalidPeerField(format!("address '{}': {}", address, e))
            })?;
            client.address = Some(address.to_string());
        }
        if let Some(ref dns) = self.dns {
            client.dns = dns
                .iter()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if self.mtu.is_some() {
            client.mtu = self.mtu;
        }
        if let Some(ref tunnel) = self.tunnel {
            client.tunnel = tunnel.clone();
        }
        Ok(ResolvedOptions { client, keepalive })
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|s| !s.is_empty())
}

fn lookup_preset<'a>(
    settings: &'a ProvisioningConfig,
    name: &str,
) -> Result<&'a PeerPreset, ProvisionError> {
    settings
        .preset(name)
        .ok_or_else(|| ProvisionError::InvalidPeerField(format!("unknown preset '{}'", name)))
}

/// Preset DNS may name the server's tunnel address; a split tunnel
/// without routes covers the peer network.
fn apply_preset(settings: &ProvisioningConfig, preset: &PeerPreset, client: &mut ClientConfigOptions) {
    client.dns = preset
        .dns
        .iter()
        .filter_map(|d| {
            if d == SERVER_DNS_PLACEHOLDER {
                settings.server_address().map(|a| a.to_string())
            } else {
                Some(d.clone())
            }
        })
        .collect();
    if preset.mtu.is_some() {
        client.mtu = preset.mtu;
    }
    client.tunnel = match preset.tunnel {
        TunnelMode::Split { ref routes } if routes.is_empty() => TunnelMode::Split {
            routes: settings.peer_network().into_iter().collect(),
        },
        ref other => other.clone(),
    };
}

/// Marks a peer as mid-render for the lifetime of the guard
struct InFlightGuard<'a> {
    set: &'a StdMutex<HashSet<String>>,
    public_key: String,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.set
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.public_key);
    }
}

/// What a render may start from, read under the state lock
struct Prepared {
    remembered: Option<(PeerIdentity, PeerNetworkConfig)>,
    retry_endpoint: Option<String>,
    generation: u64,
}

pub struct Orchestrator {
    ctx: Arc<ProvisionContext>,
    vault: Arc<dyn SessionKeyVault>,
    endpoint: Arc<dyn EndpointMemory>,
    state: Mutex<ProvisionState>,
    generation: AtomicU64,
    in_flight: StdMutex<HashSet<String>>,
}

impl Orchestrator {
    pub fn new(
        ctx: Arc<ProvisionContext>,
        vault: Arc<dyn SessionKeyVault>,
        endpoint: Arc<dyn EndpointMemory>,
    ) -> Self {
        Self {
            ctx,
            vault,
            endpoint,
            state: Mutex::new(ProvisionState::Idle),
            generation: AtomicU64::new(0),
            in_flight: StdMutex::new(HashSet::new()),
        }
    }

    pub async fn state(&self) -> StateView {
        self.state.lock().await.view()
    }

    // ========================================================================
    // Wizard: generate -> register
    // ========================================================================

    /// Generate a key pair for a new peer. The private key stays pending
    /// until registration succeeds.
    pub async fn begin_peer(&self) -> Result<PendingPeer, ProvisionError> {
        let mut state = self.state.lock().await;
        // Any pending pair or open modal is discarded
        self.transition(&mut state, ProvisionState::Idle);

        let pair = self
            .ctx
            .keys
            .generate_keypair()
            .await
            .map_err(|e| ProvisionError::KeyGenerationFailed(e.message))?;

        if let Err(e) = validate_private_key(pair.private_key.expose()) {
            return Err(ProvisionError::KeyGenerationFailed(e.to_string()));
        }
        if pair.public_key.trim().is_empty() {
            return Err(ProvisionError::KeyGenerationFailed(
                "empty public key".to_string(),
            ));
        }

        let suggested_address = self.suggest_address().await;
        let pending = PendingPeer {
            public_key: pair.public_key.clone(),
            suggested_name: default_peer_name(&pair.public_key),
            suggested_address: suggested_address.map(|a| a.to_string()),
        };
        tracing::info!(
            "[Provision] Key pair generated ({})",
            short_id(&pending.public_key)
        );
        self.transition(
            &mut state,
            ProvisionState::KeyGenerated {
                pending: pair,
                suggested_address,
            },
        );
        Ok(pending)
    }

    /// Register the pending key pair with the backend
    pub async fn register_peer(&self, req: NewPeerRequest) -> Result<PeerIdentity, ProvisionError> {
        let mut state = self.state.lock().await;
        let (public_key, suggested_address) = match *state {
            ProvisionState::KeyGenerated {
                ref pending,
                suggested_address,
            } => (pending.public_key.clone(), suggested_address),
            ref other => return Err(ProvisionError::InvalidTransition(other.name().to_string())),
        };

        // Validation: failures leave the pending keys in place
        let name = match req.name.trim() {
            "" => default_peer_name(&public_key),
            n => n.to_string(),
        };
        if name.chars().count() > MAX_PEER_NAME_LEN || name.chars().any(char::is_control) {
            return Err(ProvisionError::InvalidPeerField(format!(
                "name must be at most {} printable characters",
                MAX_PEER_NAME_LEN
            )));
        }
        let interface_name = req.interface_name.trim();
        if interface_name.is_empty() {
            return Err(ProvisionError::InvalidPeerField(
                "interface is required".to_string(),
            ));
        }
        let allowed_ips = if req.allowed_ips.trim().is_empty() {
            match suggested_address {
                Some(address) => vec![address],
                None => {
                    return Err(ProvisionError::InvalidPeerField(
                        "allowed_ips is required, no free address in the peer network".to_string(),
                    ))
                }
            }
        } else {
            parse_cidr_list(&req.allowed_ips)
                .map_err(|e| ProvisionError::InvalidPeerField(format!("allowed_ips: {}", e)))?
        };
        let preset = match non_blank(req.preset.as_deref()) {
            Some(n) => Some((n.to_string(), lookup_preset(&self.ctx.settings, n)?)),
            None => None,
        };

        let interfaces = self
            .ctx
            .directory
            .list_interfaces()
            .await
            .map_err(|e| ProvisionError::from_capability(e, ProvisionError::RegistrationFailed))?;
        if !interfaces.iter().any(|i| i.name == interface_name) {
            return Err(ProvisionError::UnknownInterface(interface_name.to_string()));
        }

        let pending = match std::mem::take(&mut *state) {
            ProvisionState::KeyGenerated { pending, .. } => pending,
            other => {
                *state = other;
                return Err(ProvisionError::InvalidTransition(state.name().to_string()));
            }
        };

        let keepalive = req
            .persistent_keepalive
            .or(preset.as_ref().map(|(_, p)| p.keepalive))
            .unwrap_or(self.ctx.settings.persistent_keepalive);
        let request = RegisterPeerRequest {
            interface_name: interface_name.to_string(),
            name: name.clone(),
            allowed_ips: allowed_ips.clone(),
            public_key: pending.public_key.clone(),
            preshared_key: pending.preshared_key.clone(),
            endpoint: req
                .endpoint
                .map(|e| e.trim().to_string())
                .filter(|e| !e.is_empty()),
            keepalive,
            private_key_hint: self
                .ctx
                .settings
                .send_private_key_hint
                .then(|| pending.private_key.clone()),
        };

        let peer = PeerIdentity::new(interface_name, &pending.public_key);
        match self.ctx.registry.register_peer(&request).await {
            Ok(message) => {
                // Vault first: the key must be recoverable once the backend knows the peer
                self.vault
                    .put(
                        &pending.public_key,
                        SessionSecret {
                            private_key: pending.private_key,
                            preshared_key: pending.preshared_key,
                        },
                    )
                    .await;

                let net = PeerNetworkConfig {
                    allowed_ips,
                    endpoint_host: None,
                    endpoint_port: None,
                    persistent_keepalive: keepalive,
                    preshared_key: None,
                    preset: preset.map(|(n, _)| n),
                };
                tracing::info!(
                    "[Provision] Peer {} ({}) registered on {}: {}",
                    peer.short_id,
                    name,
                    peer.interface_name,
                    message
                );

                self.transition(
                    &mut state,
                    ProvisionState::PeerRegistered {
                        peer: peer.clone(),
                        net: net.clone(),
                    },
                );
                let default_endpoint = self.endpoint.get().await;
                self.transition(
                    &mut state,
                    ProvisionState::ArtifactOffered {
                        peer: peer.clone(),
                        net,
                        default_endpoint,
                    },
                );
                Ok(peer)
            }
            Err(e) => {
                // `pending` drops here and its secrets are wiped
                tracing::warn!(
                    "[Provision] Registration of {} failed: {}",
                    peer.short_id,
                    e
                );
                Err(ProvisionError::from_capability(
                    e,
                    ProvisionError::RegistrationFailed,
                ))
            }
        }
    }

    /// Skip the artifact for now; the key stays in the vault
    pub async fn defer_artifact(&self) -> Result<(), ProvisionError> {
        let mut state = self.state.lock().await;
        if !matches!(*state, ProvisionState::ArtifactOffered { .. }) {
            return Err(ProvisionError::InvalidTransition(state.name().to_string()));
        }
        self.transition(&mut state, ProvisionState::Idle);
        Ok(())
    }

    /// Close whatever is open. Pending keys are dropped.
    pub async fn cancel(&self) {
        let mut state = self.state.lock().await;
        self.transition(&mut state, ProvisionState::Idle);
    }

    // ========================================================================
    // Rendering
    // ========================================================================

    pub async fn render_artifact(
        &self,
        public_key: &str,
        endpoint: Option<&str>,
        options: &RenderOptions,
    ) -> Result<ProvisioningArtifact, ProvisionError> {
        let _guard = self.acquire(public_key)?;
        self.render_locked(public_key, endpoint, options, None).await
    }

    /// Recover from `KeyMissing` with a key the operator kept. The key is
    /// vaulted only once it has rendered.
    pub async fn submit_manual_key(
        &self,
        public_key: &str,
        private_key: &str,
        endpoint: Option<&str>,
        options: &RenderOptions,
    ) -> Result<ProvisioningArtifact, ProvisionError> {
        let _guard = self.acquire(public_key)?;

        let key = validate_private_key(private_key)?;
        match public_key_for(&key) {
            Ok(derived) if derived != public_key => tracing::warn!(
                "[Provision] Manual key for {} derives a different public key ({})",
                short_id(public_key),
                short_id(&derived)
            ),
            _ => {}
        }

        self.render_locked(public_key, endpoint, options, Some(SessionSecret::new(key)))
            .await
    }

    /// Config file download. Uses the vaulted key when present, otherwise
    /// asks the backend to fill in its own copy.
    pub async fn download_config(
        &self,
        public_key: &str,
        endpoint: Option<&str>,
        options: &RenderOptions,
    ) -> Result<ConfigDownload, ProvisionError> {
        let _guard = self.acquire(public_key)?;
        let prepared = self.prepare(public_key).await?;

        let endpoint = self
            .resolve_endpoint(endpoint.or(prepared.retry_endpoint.as_deref()))
            .await?;
        options.resolve(&self.ctx.settings, None)?;
        let (peer, net) = match prepared.remembered {
            Some(known) => known,
            None => self.lookup_peer(public_key).await?,
        };
        let resolved = options.resolve(&self.ctx.settings, net.preset.as_deref())?;
        let customized = options.is_customized() || net.preset.is_some();

        let config_text = match self.vault.get(public_key).await {
            Some(secret) => {
                self.synthesize_local(&peer, &net, &secret, &endpoint, &resolved)
                    .await?
            }
            None => {
                let fetched = if customized {
                    Err("config overrides need the peer's private key".to_string())
                } else {
                    self.ctx
                        .renderer
                        .config_text(&peer, None, &endpoint)
                        .await
                        .map_err(|e| e.message)
                };
                match fetched {
                    Ok(text) => Zeroizing::new(text),
                    Err(message) => {
                        let mut state = self.state.lock().await;
                        if self.is_current(prepared.generation) {
                            self.transition(
                                &mut state,
                                ProvisionState::KeyMissing {
                                    peer,
                                    net,
                                    endpoint,
                                },
                            );
                        }
                        return Err(ProvisionError::RenderingUnavailable(message));
                    }
                }
            }
        };

        self.endpoint.set(endpoint).await;
        Ok(ConfigDownload {
            filename: config_filename(&peer),
            config_text: config_text.to_string(),
        })
    }

    async fn render_locked(
        &self,
        public_key: &str,
        endpoint: Option<&str>,
        options: &RenderOptions,
        manual: Option<SessionSecret>,
    ) -> Result<ProvisioningArtifact, ProvisionError> {
        let prepared = self.prepare(public_key).await?;

        // Endpoint and overrides are validated before any capability is contacted
        let endpoint = self
            .resolve_endpoint(endpoint.or(prepared.retry_endpoint.as_deref()))
            .await?;
        options.resolve(&self.ctx.settings, None)?;
        let (peer, net) = match prepared.remembered {
            Some(known) => known,
            None => self.lookup_peer(public_key).await?,
        };
        let resolved = options.resolve(&self.ctx.settings, net.preset.as_deref())?;
        let customized = options.is_customized() || net.preset.is_some();

        let manual_key = manual.is_some();
        let secret = match manual {
            Some(secret) => Some(secret),
            None => self.vault.get(public_key).await,
        };
        let local_config = match secret {
            Some(ref secret) => {
                match self
                    .synthesize_local(&peer, &net, secret, &endpoint, &resolved)
                    .await
                {
                    Ok(text) => Some(text),
                    Err(ProvisionError::NetworkError(msg)) => {
                        tracing::warn!(
                            "[Provision] Interface lookup failed, no local config for {}: {}",
                            peer.short_id,
                            msg
                        );
                        None
                    }
                    Err(e) => return Err(e),
                }
            }
            None => None,
        };

        let result = self
            .ctx
            .renderer
            .render(RenderJob {
                peer: &peer,
                private_key: secret.as_ref().map(|s| &s.private_key),
                endpoint: &endpoint,
                local_config: local_config.as_ref().map(|t| t.as_str()),
                customized,
            })
            .await;

        let mut state = self.state.lock().await;
        let current = self.is_current(prepared.generation);
        if !current {
            tracing::debug!(
                "[Provision] Modal for {} closed during render, state left as {}",
                peer.short_id,
                state.name()
            );
        }

        match result {
            Ok(artifact) => {
                self.endpoint.set(endpoint.clone()).await;
                tracing::info!(
                    "[Provision] Artifact rendered for {} ({:?})",
                    peer.short_id,
                    artifact.source
                );
                if current {
                    if let (true, Some(secret)) = (manual_key, secret) {
                        self.vault.put(public_key, secret).await;
                        tracing::info!(
                            "[Provision] Manual key stored for {}",
                            peer.short_id
                        );
                    }
                    self.transition(
                        &mut state,
                        ProvisionState::ArtifactRendered {
                            peer,
                            net,
                            source: artifact.source,
                            endpoint,
                        },
                    );
                }
                Ok(artifact)
            }
            Err(e @ ProvisionError::RenderingUnavailable(_)) if secret.is_none() => {
                tracing::info!(
                    "[Provision] No session key for {}, manual key required",
                    peer.short_id
                );
                if current {
                    self.transition(
                        &mut state,
                        ProvisionState::KeyMissing {
                            peer,
                            net,
                            endpoint,
                        },
                    );
                }
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    // ========================================================================
    // Peer lifecycle
    // ========================================================================

    /// Remove the peer from the backend and forget its key
    pub async fn remove_peer(
        &self,
        interface_name: &str,
        public_key: &str,
    ) -> Result<String, ProvisionError> {
        let _guard = self.acquire(public_key)?;

        let message = self
            .ctx
            .registry
            .remove_peer(interface_name, public_key)
            .await
            .map_err(|e| {
                ProvisionError::from_capability(e, ProvisionError::DeregistrationFailed)
            })?;

        self.vault.forget(public_key).await;

        let mut state = self.state.lock().await;
        if state.peer().map(|p| p.public_key.as_str()) == Some(public_key) {
            self.transition(&mut state, ProvisionState::Idle);
        }

        tracing::info!(
            "[Provision] Peer {} removed from {}",
            short_id(public_key),
            interface_name
        );
        Ok(message)
    }

    /// Destroy the session copy of a key early. Returns whether one existed.
    pub async fn forget_key(&self, public_key: &str) -> bool {
        let forgotten = self.vault.forget(public_key).await;
        if forgotten {
            tracing::info!(
                "[Provision] Key for {} forgotten",
                short_id(public_key)
            );
        }
        forgotten
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    /// Move to `next`, keeping the pin set in step with the open modal
    fn transition(&self, state: &mut ProvisionState, next: ProvisionState) {
        if let Some(peer) = state.peer() {
            self.ctx.pins.unpin(&peer.public_key);
        }
        if let Some(peer) = next.peer() {
            self.ctx.pins.pin(&peer.public_key);
        }
        if matches!(next, ProvisionState::Idle) {
            self.generation.fetch_add(1, Ordering::SeqCst);
        }
        if state.name() != next.name() {
            tracing::debug!("[Provision] {} -> {}", state.name(), next.name());
        }
        *state = next;
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    fn acquire(&self, public_key: &str) -> Result<InFlightGuard<'_>, ProvisionError> {
        let mut set = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        if !set.insert(public_key.to_string()) {
            return Err(ProvisionError::RenderInProgress(
                short_id(public_key),
            ));
        }
        Ok(InFlightGuard {
            set: &self.in_flight,
            public_key: public_key.to_string(),
        })
    }

    /// Check the state allows rendering and pull what it remembers about the peer
    async fn prepare(&self, public_key: &str) -> Result<Prepared, ProvisionError> {
        let state = self.state.lock().await;
        if matches!(*state, ProvisionState::KeyGenerated { .. }) {
            return Err(ProvisionError::InvalidTransition(state.name().to_string()));
        }
        Ok(Prepared {
            remembered: state.known_peer(public_key),
            retry_endpoint: state.retry_endpoint(public_key).map(str::to_string),
            generation: self.generation.load(Ordering::SeqCst),
        })
    }

    async fn resolve_endpoint(&self, requested: Option<&str>) -> Result<String, ProvisionError> {
        let raw = match non_blank(requested) {
            Some(s) => s.to_string(),
            None => self.endpoint.get().await.unwrap_or_default(),
        };
        ServerEndpoint::parse(&raw, self.ctx.settings.default_listen_port)?;
        Ok(raw.trim().to_string())
    }

    /// First free host of the peer network, skipping addresses the roster uses
    async fn suggest_address(&self) -> Option<IpNetwork> {
        let network = self.ctx.settings.peer_network()?;
        match self.ctx.directory.list_peers().await {
            Ok(peers) => {
                let taken: Vec<IpNetwork> = peers
                    .iter()
                    .flat_map(|p| p.network_config().allowed_ips)
                    .collect();
                next_free_address(network, &taken)
            }
            Err(e) => {
                tracing::debug!("[Provision] No address suggestion, roster unavailable: {}", e);
                None
            }
        }
    }

    async fn lookup_peer(
        &self,
        public_key: &str,
    ) -> Result<(PeerIdentity, PeerNetworkConfig), ProvisionError> {
        let peers = self
            .ctx
            .directory
            .list_peers()
            .await
            .map_err(|e| ProvisionError::from_capability(e, ProvisionError::NetworkError))?;

        peers
            .iter()
            .find(|p| p.public_key == public_key)
            .map(|p| (p.identity(), p.network_config()))
            .ok_or_else(|| {
                ProvisionError::UnknownPeer(short_id(public_key))
            })
    }

    async fn synthesize_local(
        &self,
        peer: &PeerIdentity,
        net: &PeerNetworkConfig,
        secret: &SessionSecret,
        endpoint: &str,
        resolved: &ResolvedOptions,
    ) -> Result<Zeroizing<String>, ProvisionError> {
        let interfaces = self
            .ctx
            .directory
            .list_interfaces()
            .await
            .map_err(|e| ProvisionError::from_capability(e, ProvisionError::NetworkError))?;
        let server = interfaces
            .iter()
            .find(|i| i.name == peer.interface_name)
            .map(|i| i.server_identity(self.ctx.settings.default_listen_port))
            .ok_or_else(|| ProvisionError::UnknownInterface(peer.interface_name.clone()))?;

        let mut net = net.clone();
        if let Some(keepalive) = resolved.keepalive {
            net.persistent_keepalive = keepalive;
        }
        net.preshared_key = secret
            .preshared_key
            .as_ref()
            .map(|k| k.expose().to_string());

        let text = synthesize(
            peer,
            &net,
            &server,
            secret.private_key.expose(),
            endpoint,
            &resolved.client,
        );
        net.preshared_key.zeroize();
        Ok(Zeroizing::new(text?))
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        // The roster must not keep a row pinned for a session that is gone
        if let Some(peer) = self.state.get_mut().peer() {
            self.ctx.pins.unpin(&peer.public_key);
        }
    }
}
