//! Live peer roster
//!
//! - `refresher`: background task polling `list_peers`
//!
//! The roster holds no key material. Its only link to provisioning is the
//! pin set: rows pinned by an open provisioning modal are left untouched.

pub mod refresher;

pub use refresher::RosterRefresher;

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::{PeerState, RosterPeer};

// ============================================================================
// Pins
// ============================================================================

/// Public keys currently shown in a provisioning modal, reference counted
/// across sessions
#[derive(Debug, Default)]
pub struct PinSet {
    counts: Mutex<HashMap<String, usize>>,
}

impl PinSet {
    pub fn new() -> Self {
        Self::default()
    }

    fn counts(&self) -> std::sync::MutexGuard<'_, HashMap<String, usize>> {
        self.counts.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn pin(&self, public_key: &str) {
        *self.counts().entry(public_key.to_string()).or_insert(0) += 1;
    }

    pub fn unpin(&self, public_key: &str) {
        let mut counts = self.counts();
        if let Some(count) = counts.get_mut(public_key) {
            *count -= 1;
            if *count == 0 {
                counts.remove(public_key);
            }
        }
    }

    #[cfg(test)]
    pub fn is_pinned(&self, public_key: &str) -> bool {
        self.counts().contains_key(public_key)
    }

    pub fn snapshot(&self) -> HashSet<String> {
        self.counts().keys().cloned().collect()
    }
}

// ============================================================================
// Roster
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplySummary {
    pub added: usize,
    pub updated: usize,
    pub removed: usize,
    /// Rows left as they were because they are pinned
    pub pinned: usize,
}

#[derive(Debug, Default)]
pub struct Roster {
    rows: Vec<RosterPeer>,
    last_refresh: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rows(&self) -> &[RosterPeer] {
        &self.rows
    }

    /// Merge a fresh snapshot keyed by public key. Display order of
    /// surviving rows is kept; new peers are appended in snapshot order.
    pub fn apply(&mut self, snapshot: Vec<RosterPeer>, pins: &HashSet<String>) -> ApplySummary {
        let mut summary = ApplySummary::default();

        let mut order = Vec::with_capacity(snapshot.len());
        let mut incoming: HashMap<String, RosterPeer> = HashMap::with_capacity(snapshot.len());
        for peer in snapshot {
            if !incoming.contains_key(&peer.public_key) {
                order.push(peer.public_key.clone());
                incoming.insert(peer.public_key.clone(), peer);
            }
        }

        self.rows.retain_mut(|row| {
            if pins.contains(&row.public_key) {
                incoming.remove(&row.public_key);
                summary.pinned += 1;
                return true;
            }
            match incoming.remove(&row.public_key) {
                Some(fresh) => {
                    if *row != fresh {
                        *row = fresh;
                        summary.updated += 1;
                    }
                    true
                }
                None => {
                    summary.removed += 1;
                    false
                }
            }
        });

        for key in order {
            if let Some(peer) = incoming.remove(&key) {
                self.rows.push(peer);
                summary.added += 1;
            }
        }

        self.last_refresh = Some(Utc::now());
        self.last_error = None;
        summary
    }

    pub fn record_error(&mut self, error: String) {
        self.last_error = Some(error);
    }

    pub fn view(&self, pins: &HashSet<String>) -> RosterView {
        let peers: Vec<RosterRow> = self
            .rows
            .iter()
            .map(|peer| RosterRow {
                short_id: peer.identity().short_id,
                rx: format_bytes(peer.bytes_rx),
                tx: format_bytes(peer.bytes_tx),
                handshake: format_handshake(peer.last_handshake_age_seconds),
                pinned: pins.contains(&peer.public_key),
                peer: peer.clone(),
            })
            .collect();

        RosterView {
            active: peers
                .iter()
                .filter(|r| r.peer.state == PeerState::Active)
                .count(),
            total: peers.len(),
            peers,
            last_refresh: self.last_refresh,
            last_error: self.last_error.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RosterRow {
    #[serde(flatten)]
    pub peer: RosterPeer,
    pub short_id: String,
    pub rx: String,
    pub tx: String,
    pub handshake: String,
    pub pinned: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RosterView {
    pub peers: Vec<RosterRow>,
    pub active: usize,
    pub total: usize,
    pub last_refresh: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

// ============================================================================
// Formatting
// ============================================================================

const BYTE_UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

pub fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        return format!("{} B", bytes);
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < BYTE_UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.2} {}", value, BYTE_UNITS[unit])
}

pub fn format_handshake(age_seconds: Option<u64>) -> String {
    match age_seconds {
        None => "Never".to_string(),
        Some(s) if s < 60 => format!("{}s ago", s),
        Some(s) if s < 3600 => format!("{}m ago", s / 60),
        Some(s) if s < 86400 => format!("{}h ago", s / 3600),
        Some(s) => format!("{}d ago", s / 86400),
    }
}
