//! Session Key Vault and Endpoint Memory
//!
//! Both are in-memory only and scoped to one operator session. Nothing
//! here is ever written to disk or logged.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::wireguard::SecretKey;

/// Key material retained for re-rendering a peer's artifact
#[derive(Debug, Clone)]
pub struct SessionSecret {
    pub private_key: SecretKey,
    pub preshared_key: Option<SecretKey>,
}

impl SessionSecret {
    pub fn new(private_key: SecretKey) -> Self {
        Self {
            private_key,
            preshared_key: None,
        }
    }
}

#[async_trait]
pub trait SessionKeyVault: Send + Sync {
    async fn put(&self, public_key: &str, secret: SessionSecret);

    async fn get(&self, public_key: &str) -> Option<SessionSecret>;

    /// Returns whether an entry was removed
    async fn forget(&self, public_key: &str) -> bool;

    async fn clear(&self);

    async fn len(&self) -> usize;
}

#[derive(Default)]
pub struct MemoryKeyVault {
    entries: RwLock<HashMap<String, SessionSecret>>,
}

impl MemoryKeyVault {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionKeyVault for MemoryKeyVault {
    async fn put(&self, public_key: &str, secret: SessionSecret) {
        self.entries
            .write()
            .await
            .insert(public_key.to_string(), secret);
    }

    async fn get(&self, public_key: &str) -> Option<SessionSecret> {
        self.entries.read().await.get(public_key).cloned()
    }

    async fn forget(&self, public_key: &str) -> bool {
        self.entries.write().await.remove(public_key).is_some()
    }

    async fn clear(&self) {
        self.entries.write().await.clear();
    }

    async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

/// Last server endpoint the operator rendered with
#[async_trait]
pub trait EndpointMemory: Send + Sync {
    async fn get(&self) -> Option<String>;

    async fn set(&self, endpoint: String);
}

#[derive(Default)]
pub struct MemoryEndpointMemory {
    value: RwLock<Option<String>>,
}

impl MemoryEndpointMemory {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EndpointMemory for MemoryEndpointMemory {
    async fn get(&self) -> Option<String> {
        self.value.read().await.clone()
    }

    async fn set(&self, endpoint: String) {
        *self.value.write().await = Some(endpoint);
    }
}
