//! Shared application state handed to every handler

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;

use crate::backend::{KeyGenerator, PeerRegistry, RemoteRenderer, RosterSource, RpcClient};
use crate::config::{Config, KeySource};
use crate::provision::ProvisionContext;
use crate::render::{CodeRenderer, LocalQrEncoder};
use crate::roster::{PinSet, Roster, RosterRefresher};
use crate::session::SessionStore;
use crate::wireguard::keygen::LocalKeyGenerator;

/// Capability implementations the service runs against
pub struct Capabilities {
    pub keys: Arc<dyn KeyGenerator>,
    pub registry: Arc<dyn PeerRegistry>,
    pub remote: Arc<dyn RemoteRenderer>,
    pub directory: Arc<dyn RosterSource>,
}

impl Capabilities {
    /// Everything from the router's RPC backend, keys per `provisioning.key_source`
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let client = Arc::new(RpcClient::new(config.backend.clone())?);
        let keys: Arc<dyn KeyGenerator> = match config.provisioning.key_source {
            KeySource::Backend => client.clone(),
            KeySource::Local => Arc::new(LocalKeyGenerator),
        };

        Ok(Self {
            keys,
            registry: client.clone(),
            remote: client.clone(),
            directory: client,
        })
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub sessions: Arc<SessionStore>,
    pub roster: Arc<RwLock<Roster>>,
    pub pins: Arc<PinSet>,
    pub directory: Arc<dyn RosterSource>,
    pub refresher: Arc<RosterRefresher>,
}

impl AppState {
    pub fn new(config: Config, caps: Capabilities) -> Self {
        let pins = Arc::new(PinSet::new());
        let roster = Arc::new(RwLock::new(Roster::new()));

        let renderer = CodeRenderer::new(
            caps.remote,
            LocalQrEncoder::from_config(&config.render),
            config.render.policy,
        );
        let ctx = Arc::new(ProvisionContext {
            keys: caps.keys,
            registry: caps.registry,
            directory: caps.directory.clone(),
            renderer,
            settings: config.provisioning.clone(),
            pins: pins.clone(),
        });

        let sessions = Arc::new(SessionStore::new(
            ctx,
            Duration::from_secs(config.session.idle_timeout_minutes * 60),
        ));
        let refresher = Arc::new(RosterRefresher::new(
            caps.directory.clone(),
            roster.clone(),
            pins.clone(),
            Duration::from_secs(config.roster.poll_interval_secs),
        ));

        Self {
            config: Arc::new(config),
            sessions,
            roster,
            pins,
            directory: caps.directory,
            refresher,
        }
    }

    /// Spawn the roster refresher and the session sweeper
    pub fn start_background_tasks(&self) {
        let refresher = self.refresher.clone();
        tokio::spawn(async move {
            refresher.start().await;
        });

        let sessions = self.sessions.clone();
        tokio::spawn(async move {
            sessions.start().await;
        });

        tracing::info!("Background tasks started");
    }
}
