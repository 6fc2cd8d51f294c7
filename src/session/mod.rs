//! Operator sessions
//!
//! - `vault`: Session Key Vault and Endpoint Memory
//!
//! Each session owns its vault, its endpoint memory and its orchestrator.
//! Ending a session (explicitly or by idling out) clears the vault.

pub mod vault;

pub use vault::{
    EndpointMemory, MemoryEndpointMemory, MemoryKeyVault, SessionKeyVault, SessionSecret,
};

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::future::join_all;
use tokio::sync::RwLock;
use tokio::time::interval;
use uuid::Uuid;

use crate::provision::{Orchestrator, ProvisionContext};

pub struct Session {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub orchestrator: Orchestrator,
    pub endpoint: Arc<dyn EndpointMemory>,
    vault: Arc<dyn SessionKeyVault>,
    last_seen: StdMutex<Instant>,
}

impl Session {
    fn new(ctx: Arc<ProvisionContext>) -> Self {
        let vault: Arc<dyn SessionKeyVault> = Arc::new(MemoryKeyVault::new());
        let endpoint: Arc<dyn EndpointMemory> = Arc::new(MemoryEndpointMemory::new());
        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            orchestrator: Orchestrator::new(ctx, vault.clone(), endpoint.clone()),
            endpoint,
            vault,
            last_seen: StdMutex::new(Instant::now()),
        }
    }

    fn touch(&self) {
        *self.last_seen.lock().unwrap_or_else(|e| e.into_inner()) = Instant::now();
    }

    fn idle_for(&self) -> Duration {
        self.last_seen
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .elapsed()
    }

    pub async fn vaulted_keys(&self) -> usize {
        self.vault.len().await
    }

    /// Close the modal and destroy every vaulted key
    async fn end(&self) {
        self.orchestrator.cancel().await;
        self.vault.clear().await;
    }
}

pub struct SessionStore {
    ctx: Arc<ProvisionContext>,
    sessions: RwLock<HashMap<Uuid, Arc<Session>>>,
    idle_timeout: Duration,
}

impl SessionStore {
    pub fn new(ctx: Arc<ProvisionContext>, idle_timeout: Duration) -> Self {
        Self {
            ctx,
            sessions: RwLock::new(HashMap::new()),
            idle_timeout,
        }
    }

    /// Session for the cookie id, or a fresh one. The flag is true when a
    /// session was stored. Without `create` an unknown id gets a detached
    /// session that lives only as long as the request.
    pub async fn resolve(&self, id: Option<Uuid>, create: bool) -> (Arc<Session>, bool) {
        if let Some(id) = id {
            if let Some(session) = self.sessions.read().await.get(&id) {
                session.touch();
                return (session.clone(), false);
            }
        }

        let session = Arc::new(Session::new(self.ctx.clone()));
        if !create {
            return (session, false);
        }
        self.sessions
            .write()
            .await
            .insert(session.id, session.clone());
        tracing::info!("[Session] Started {}", session.id);
        (session, true)
    }

    pub async fn end(&self, id: Uuid) -> bool {
        let removed = self.sessions.write().await.remove(&id);
        match removed {
            Some(session) => {
                session.end().await;
                tracing::info!("[Session] Ended {}", id);
                true
            }
            None => false,
        }
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// End sessions idle longer than the timeout. Returns how many ended.
    pub async fn sweep_idle(&self) -> usize {
        let expired: Vec<Arc<Session>> = {
            let mut sessions = self.sessions.write().await;
            let ids: Vec<Uuid> = sessions
                .values()
                .filter(|s| s.idle_for() >= self.idle_timeout)
                .map(|s| s.id)
                .collect();
            ids.iter().filter_map(|id| sessions.remove(id)).collect()
        };

        join_all(expired.iter().map(|session| async move {
            session.end().await;
            tracing::info!("[Session] Expired {} after inactivity", session.id);
        }))
        .await;
        expired.len()
    }

    /// Start the idle sweeper (runs forever)
    pub async fn start(self: Arc<Self>) {
        let period = (self.idle_timeout / 4).clamp(Duration::from_secs(1), Duration::from_secs(60));
        tracing::info!(
            "[Session] Starting idle sweeper (timeout: {}s)",
            self.idle_timeout.as_secs()
        );

        let mut timer = interval(period);
        loop {
            timer.tick().await;
            let expired = self.sweep_idle().await;
            if expired > 0 {
                tracing::debug!("[Session] {} sessions remain", self.len().await);
            }
        }
    }
}
