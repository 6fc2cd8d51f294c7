//! RosterRefresher: periodic `list_peers` poll
//!
//! Runs in a background tokio task and merges each snapshot into the
//! shared roster. A failed poll keeps the previous rows.

use std::sync::Arc;

use tokio::sync::RwLock;
use tokio::time::{interval, Duration, MissedTickBehavior};

use super::{ApplySummary, PinSet, Roster};
use crate::backend::{CapabilityError, RosterSource};

pub struct RosterRefresher {
    source: Arc<dyn RosterSource>,
    roster: Arc<RwLock<Roster>>,
    pins: Arc<PinSet>,
    poll_interval: Duration,
}

impl RosterRefresher {
    pub fn new(
        source: Arc<dyn RosterSource>,
        roster: Arc<RwLock<Roster>>,
        pins: Arc<PinSet>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            source,
            roster,
            pins,
            poll_interval,
        }
    }

    /// Start the refresh loop (runs forever)
    pub async fn start(self: Arc<Self>) {
        tracing::info!(
            "[Roster] Starting background refresh (interval: {}s)",
            self.poll_interval.as_secs()
        );

        let mut timer = interval(self.poll_interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            timer.tick().await;

            if let Err(e) = self.refresh_once().await {
                tracing::warn!("[Roster] Refresh failed: {}", e);
            }
        }
    }

    pub async fn refresh_once(&self) -> Result<ApplySummary, CapabilityError> {
        let snapshot = match self.source.list_peers().await {
            Ok(peers) => peers,
            Err(e) => {
                self.roster.write().await.record_error(e.message.clone());
                return Err(e);
            }
        };

        let pins = self.pins.snapshot();
        let summary = self.roster.write().await.apply(snapshot, &pins);

        if summary.added + summary.removed + summary.updated > 0 {
            tracing::debug!(
                "[Roster] +{} ~{} -{} ({} pinned)",
                summary.added,
                summary.updated,
                summary.removed,
                summary.pinned
            );
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::backend::testing::{roster_peer, MockBackend};

    fn refresher(backend: Arc<MockBackend>, pins: Arc<PinSet>) -> RosterRefresher {
        RosterRefresher::new(
            backend,
            Arc::new(RwLock::new(Roster::new())),
            pins,
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn test_refresh_once_applies_snapshot() {
        let backend = Arc::new(MockBackend::new());
        let refresher = refresher(backend.clone(), Arc::new(PinSet::new()));

        backend.set_peers(vec![roster_peer("P1", 10, Some(5)), roster_peer("P2", 5, None)]);
        refresher.refresh_once().await.unwrap();

        backend.set_peers(vec![roster_peer("P2", 9, None), roster_peer("P3", 1, None)]);
        let summary = refresher.refresh_once().await.unwrap();
        assert_eq!((summary.added, summary.updated, summary.removed), (1, 1, 1));

        let roster = refresher.roster.read().await;
        let view = roster.view(&HashSet::new());
        assert_eq!(view.total, 2);
        assert_eq!(view.peers[0].peer.public_key, "P2");
    }

    #[tokio::test]
    async fn test_failed_poll_keeps_rows() {
        let backend = Arc::new(MockBackend::new());
        let refresher = refresher(backend.clone(), Arc::new(PinSet::new()));

        backend.set_peers(vec![roster_peer("P1", 10, Some(5))]);
        refresher.refresh_once().await.unwrap();

        backend.fail_on("peers", CapabilityError::transport("connection refused"));
        assert!(refresher.refresh_once().await.is_err());

        let roster = refresher.roster.read().await;
        assert_eq!(roster.rows().len(), 1);
        assert_eq!(
            roster.view(&HashSet::new()).last_error.as_deref(),
            Some("connection refused")
        );
    }

    #[tokio::test]
    async fn test_pins_respected() {
        let backend = Arc::new(MockBackend::new());
        let pins = Arc::new(PinSet::new());
        let refresher = refresher(backend.clone(), pins.clone());

        backend.set_peers(vec![roster_peer("P1", 10, Some(5))]);
        refresher.refresh_once().await.unwrap();

        pins.pin("P1");
        backend.set_peers(vec![]);
        refresher.refresh_once().await.unwrap();
        assert_eq!(refresher.roster.read().await.rows().len(), 1);

        pins.unpin("P1");
        refresher.refresh_once().await.unwrap();
        assert!(refresher.roster.read().await.rows().is_empty());
    }
}
