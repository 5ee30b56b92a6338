//! One refresh cycle: run the enabled sources, merge their quotes into the base rate set and
//! decide whether the result replaces the cached snapshot.

use crate::core::source::priority;
use crate::core::{Rate, RateSource, RefreshMeta, Snapshot, SourceHealth};
use crate::providers::remote::RemoteSnapshotSource;
use crate::store::SnapshotStore;
use anyhow::Result;
use chrono::Utc;
use futures::future::join_all;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// What a cycle did to the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    Committed { succeeded: usize, failed: usize },
    /// No remote base and every source failed: the cache was left as it was.
    Unchanged { failed: usize },
}

pub struct Refresher {
    store: Arc<SnapshotStore>,
    sources: Vec<Arc<dyn RateSource>>,
    enabled: Vec<String>,
    remote: Option<RemoteSnapshotSource>,
    // Serializes whole cycles so the base read and the commit see the same cache.
    cycle: Mutex<()>,
}

impl Refresher {
    /// `enabled` lists the published ids; sources whose id is not in it are never run.
    pub fn new(
        store: Arc<SnapshotStore>,
        sources: Vec<Arc<dyn RateSource>>,
        enabled: Vec<String>,
        remote: Option<RemoteSnapshotSource>,
    ) -> Self {
        Self {
            store,
            sources,
            enabled,
            remote,
            cycle: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &Arc<SnapshotStore> {
        &self.store
    }

    /// Runs a cycle and logs, rather than returns, a cycle-level failure.
    pub async fn refresh_now(&self) {
        match self.run_cycle().await {
            Ok(outcome) => debug!(?outcome, "Refresh cycle finished"),
            Err(e) => {
                let message = format!("{e:#}");
                warn!(error = %message, "Refresh failed, keeping last snapshot");
            }
        }
    }

    /// Runs one cycle. An error means nothing in the store was touched.
    pub async fn run_cycle(&self) -> Result<CycleOutcome> {
        let _guard = self.cycle.lock().await;
        let attempt_at = Utc::now();

        let mut rates = match &self.remote {
            Some(remote) => remote.load().await?.rates,
            None => self.store.snapshot().rates.clone(),
        };
        dedup_by_id(&mut rates);
        let now = Utc::now();

        let active: Vec<&Arc<dyn RateSource>> = self
            .sources
            .iter()
            .filter(|s| self.is_enabled(s.id().as_str()))
            .collect();
        let results = join_all(active.iter().map(|source| async move {
            (source.id(), source.fetch_rate().await)
        }))
        .await;

        let mut health = self.store.health();
        let mut succeeded = 0;
        let mut failed = 0;
        for (id, result) in results {
            match result {
                Ok(value) => {
                    succeeded += 1;
                    upsert(&mut rates, Rate::new(id.as_str(), id.display_name(), value));
                    health.insert(id.to_string(), SourceHealth::succeeded(now));
                }
                Err(e) => {
                    failed += 1;
                    let message = format!("{e:#}");
                    warn!(source = %id, error = %message, "Source refresh failed");
                    health.insert(id.to_string(), SourceHealth::failed(message));
                }
            }
        }
        health.retain(|id, _| self.is_enabled(id));

        rates.retain(|r| self.is_enabled(&r.id));
        rates.sort_by_key(|r| priority(&r.id));

        if self.remote.is_none() && succeeded == 0 {
            self.store.apply(health, None);
            info!(failed, "No source refreshed, keeping previous snapshot");
            return Ok(CycleOutcome::Unchanged { failed });
        }

        let snapshot = Snapshot {
            updated_at: now,
            rates,
            meta: Some(RefreshMeta {
                last_attempt_at: attempt_at,
                last_success_at: Some(now),
                sources: health.clone(),
            }),
        };
        self.store.apply(health, Some(snapshot));
        info!(succeeded, failed, "Committed refreshed snapshot");
        Ok(CycleOutcome::Committed { succeeded, failed })
    }

    fn is_enabled(&self, id: &str) -> bool {
        self.enabled.iter().any(|e| e == id)
    }
}

/// Keeps the first rate for each id.
fn dedup_by_id(rates: &mut Vec<Rate>) {
    let mut seen = HashSet::new();
    rates.retain(|r| seen.insert(r.id.clone()));
}

/// Replaces the value of the rate with the same id, or appends it.
fn upsert(rates: &mut Vec<Rate>, rate: Rate) {
    match rates.iter_mut().find(|r| r.id == rate.id) {
        Some(existing) => existing.value = rate.value,
        None => rates.push(rate),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::SourceId;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::{Barrier, Notify};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct FixedSource {
        id: SourceId,
        value: Option<f64>,
    }

    #[async_trait]
    impl RateSource for FixedSource {
        fn id(&self) -> SourceId {
            self.id
        }

        async fn fetch_rate(&self) -> Result<f64> {
            self.value
                .ok_or_else(|| anyhow!("{} HTTP 503", self.id.display_name()))
        }
    }

    fn ok(id: SourceId, value: f64) -> Arc<dyn RateSource> {
        Arc::new(FixedSource {
            id,
            value: Some(value),
        })
    }

    fn failing(id: SourceId) -> Arc<dyn RateSource> {
        Arc::new(FixedSource { id, value: None })
    }

    fn enabled(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    fn seed() -> Snapshot {
        Snapshot {
            updated_at: "2025-01-06T12:00:00Z".parse().unwrap(),
            rates: vec![
                Rate::new("bybit", "Bybit", 66.0),
                Rate::new("bcv", "Dólar BCV", 52.0),
                Rate::new("binance", "Binance / Kontigo", 67.0),
            ],
            meta: None,
        }
    }

    fn ids(snapshot: &Snapshot) -> Vec<&str> {
        snapshot.rates.iter().map(|r| r.id.as_str()).collect()
    }

    #[tokio::test]
    async fn test_all_sources_succeed() {
        let store = Arc::new(SnapshotStore::new(seed()));
        let refresher = Refresher::new(
            store.clone(),
            vec![
                ok(SourceId::Bybit, 70.0),
                ok(SourceId::Bcv, 53.0),
                ok(SourceId::Paralelo, 68.0),
                ok(SourceId::Binance, 69.0),
            ],
            enabled(&["bcv", "binance", "bybit", "paralelo"]),
            None,
        );

        let outcome = refresher.run_cycle().await.unwrap();
        assert_eq!(
            outcome,
            CycleOutcome::Committed {
                succeeded: 4,
                failed: 0
            }
        );

        let snapshot = store.snapshot();
        assert_eq!(ids(&snapshot), vec!["bcv", "paralelo", "binance", "bybit"]);
        assert_eq!(snapshot.rate("paralelo").unwrap().name, "Dólar Paralelo");
        assert_eq!(snapshot.rate("bcv").unwrap().value, 53.0);

        let meta = snapshot.meta.as_ref().unwrap();
        assert_eq!(meta.sources.len(), 4);
        assert!(meta.sources.values().all(|h| h.ok && h.updated_at.is_some()));
        assert_eq!(meta.last_success_at, Some(snapshot.updated_at));
        assert!(meta.last_attempt_at <= snapshot.updated_at);
    }

    #[tokio::test]
    async fn test_partial_failure_keeps_prior_value() {
        let store = Arc::new(SnapshotStore::new(seed()));
        let refresher = Refresher::new(
            store.clone(),
            vec![
                ok(SourceId::Bcv, 53.0),
                ok(SourceId::Binance, 69.0),
                ok(SourceId::Paralelo, 68.0),
                failing(SourceId::Bybit),
            ],
            enabled(&["bcv", "binance", "bybit", "paralelo"]),
            None,
        );

        let outcome = refresher.run_cycle().await.unwrap();
        assert_eq!(
            outcome,
            CycleOutcome::Committed {
                succeeded: 3,
                failed: 1
            }
        );

        let snapshot = store.snapshot();
        assert_eq!(snapshot.rate("bybit").unwrap().value, 66.0);
        let bybit = &snapshot.meta.as_ref().unwrap().sources["bybit"];
        assert!(!bybit.ok);
        assert!(bybit.updated_at.is_none());
        assert_eq!(bybit.error.as_deref(), Some("Bybit HTTP 503"));
    }

    #[tokio::test]
    async fn test_failed_source_without_prior_value_is_omitted() {
        let store = Arc::new(SnapshotStore::new(seed()));
        let refresher = Refresher::new(
            store.clone(),
            vec![ok(SourceId::Bcv, 53.0), failing(SourceId::Paralelo)],
            enabled(&["bcv", "paralelo"]),
            None,
        );

        refresher.run_cycle().await.unwrap();
        assert_eq!(ids(&store.snapshot()), vec!["bcv"]);
    }

    #[tokio::test]
    async fn test_total_failure_leaves_cache_untouched() {
        let store = Arc::new(SnapshotStore::new(seed()));
        let before = store.snapshot();
        let refresher = Refresher::new(
            store.clone(),
            vec![failing(SourceId::Bcv), failing(SourceId::Binance)],
            enabled(&["bcv", "binance"]),
            None,
        );

        let outcome = refresher.run_cycle().await.unwrap();
        assert_eq!(outcome, CycleOutcome::Unchanged { failed: 2 });

        let after = store.snapshot();
        assert!(Arc::ptr_eq(&before, &after));
        assert_eq!(*before, *after);
        assert!(store.last_refresh().is_none());
        assert!(!store.health()["bcv"].ok);
    }

    #[tokio::test]
    async fn test_health_survives_into_next_commit() {
        let store = Arc::new(SnapshotStore::new(seed()));
        let failing_refresher = Refresher::new(
            store.clone(),
            vec![failing(SourceId::Bybit)],
            enabled(&["bcv", "bybit"]),
            None,
        );
        failing_refresher.run_cycle().await.unwrap();

        let refresher = Refresher::new(
            store.clone(),
            vec![ok(SourceId::Bcv, 53.0)],
            enabled(&["bcv", "bybit"]),
            None,
        );
        refresher.run_cycle().await.unwrap();

        let sources = store.snapshot().meta.clone().unwrap().sources;
        assert!(sources["bcv"].ok);
        assert!(!sources["bybit"].ok);
    }

    #[tokio::test]
    async fn test_disabled_ids_are_pruned() {
        let store = Arc::new(SnapshotStore::new(seed()));
        let first = Refresher::new(
            store.clone(),
            vec![ok(SourceId::Bybit, 70.0), ok(SourceId::Bcv, 53.0)],
            enabled(&["bcv", "bybit"]),
            None,
        );
        first.run_cycle().await.unwrap();

        let second = Refresher::new(
            store.clone(),
            vec![ok(SourceId::Bybit, 71.0), ok(SourceId::Bcv, 54.0)],
            enabled(&["bcv"]),
            None,
        );
        second.run_cycle().await.unwrap();

        let snapshot = store.snapshot();
        assert_eq!(ids(&snapshot), vec!["bcv"]);
        let sources = &snapshot.meta.as_ref().unwrap().sources;
        assert_eq!(sources.keys().collect::<Vec<_>>(), vec!["bcv"]);
    }

    #[tokio::test]
    async fn test_ordering_for_every_subset() {
        let all = ["bcv", "paralelo", "binance", "bybit"];
        for mask in 1u8..16 {
            let subset: Vec<&str> = all
                .iter()
                .enumerate()
                .filter(|(i, _)| mask & (1 << i) != 0)
                .map(|(_, id)| *id)
                .collect();

            let store = Arc::new(SnapshotStore::new(seed()));
            let sources = SourceId::ALL.iter().rev().map(|id| ok(*id, 60.0)).collect();
            let refresher = Refresher::new(store.clone(), sources, enabled(&subset), None);
            refresher.run_cycle().await.unwrap();

            assert_eq!(ids(&store.snapshot()), subset, "mask {mask:04b}");
        }
    }

    async fn remote_server(body: &str) -> MockServer {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rates.json"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&mock_server)
            .await;
        mock_server
    }

    fn remote(mock_server: &MockServer) -> Option<RemoteSnapshotSource> {
        Some(
            RemoteSnapshotSource::new(
                &format!("{}/rates.json", mock_server.uri()),
                Duration::from_secs(5),
            )
            .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_remote_base_commits_even_when_sources_fail() {
        let mock_server = remote_server(
            r#"{"updatedAt": "2025-02-01T00:00:00Z", "rates": [
                {"id": "yadio", "name": "Yadio", "value": 70.5},
                {"id": "bybit", "name": "Bybit", "value": 71.0},
                {"id": "bcv", "name": "BCV remoto", "value": 55.0}
            ]}"#,
        )
        .await;
        let store = Arc::new(SnapshotStore::new(seed()));
        let refresher = Refresher::new(
            store.clone(),
            vec![failing(SourceId::Bcv)],
            enabled(&["bcv", "bybit", "yadio"]),
            remote(&mock_server),
        );

        let outcome = refresher.run_cycle().await.unwrap();
        assert_eq!(
            outcome,
            CycleOutcome::Committed {
                succeeded: 0,
                failed: 1
            }
        );

        let snapshot = store.snapshot();
        assert_eq!(ids(&snapshot), vec!["bcv", "bybit", "yadio"]);
        assert_eq!(snapshot.rate("bcv").unwrap().value, 55.0);
        assert_eq!(snapshot.rate("bcv").unwrap().name, "BCV remoto");
        assert!(snapshot.rate("binance").is_none());
    }

    #[tokio::test]
    async fn test_remote_base_is_updated_by_sources() {
        let mock_server = remote_server(
            r#"{"updatedAt": "x", "rates": [{"id": "bcv", "name": "BCV remoto", "value": 55.0}]}"#,
        )
        .await;
        let store = Arc::new(SnapshotStore::new(seed()));
        let refresher = Refresher::new(
            store.clone(),
            vec![ok(SourceId::Bcv, 56.0)],
            enabled(&["bcv"]),
            remote(&mock_server),
        );

        refresher.run_cycle().await.unwrap();
        let bcv = store.snapshot().rate("bcv").cloned().unwrap();
        assert_eq!(bcv, Rate::new("bcv", "BCV remoto", 56.0));
    }

    #[tokio::test]
    async fn test_malformed_remote_aborts_cycle() {
        let mock_server =
            remote_server(r#"{"updatedAt": "x", "rates": [{"id": "bcv", "name": "BCV", "value": "55"}]}"#)
                .await;
        let store = Arc::new(SnapshotStore::new(seed()));
        let before = store.snapshot();
        let refresher = Refresher::new(
            store.clone(),
            vec![ok(SourceId::Bcv, 56.0)],
            enabled(&["bcv"]),
            remote(&mock_server),
        );

        assert!(refresher.run_cycle().await.is_err());
        refresher.refresh_now().await;

        assert!(Arc::ptr_eq(&before, &store.snapshot()));
        assert!(store.health().is_empty());
    }

    #[tokio::test]
    async fn test_remote_duplicate_ids_keep_first() {
        let mock_server = remote_server(
            r#"{"updatedAt": "2025-02-01T00:00:00Z", "rates": [
                {"id": "bcv", "name": "BCV", "value": 1.0},
                {"id": "bcv", "name": "BCV", "value": 2.0}
            ]}"#,
        )
        .await;
        let store = Arc::new(SnapshotStore::new(seed()));
        let refresher = Refresher::new(
            store.clone(),
            Vec::new(),
            enabled(&["bcv"]),
            remote(&mock_server),
        );

        refresher.run_cycle().await.unwrap();

        let snapshot = store.snapshot();
        assert_eq!(ids(&snapshot), vec!["bcv"]);
        assert_eq!(snapshot.rate("bcv").unwrap().value, 1.0);
    }

    #[test]
    fn test_dedup_by_id() {
        let mut rates = vec![
            Rate::new("bcv", "Dólar BCV", 1.0),
            Rate::new("bybit", "Bybit", 3.0),
            Rate::new("bcv", "Dólar BCV", 2.0),
        ];
        dedup_by_id(&mut rates);
        assert_eq!(
            rates,
            vec![Rate::new("bcv", "Dólar BCV", 1.0), Rate::new("bybit", "Bybit", 3.0)]
        );
    }

    struct BarrierSource {
        id: SourceId,
        barrier: Arc<Barrier>,
    }

    #[async_trait]
    impl RateSource for BarrierSource {
        fn id(&self) -> SourceId {
            self.id
        }

        async fn fetch_rate(&self) -> Result<f64> {
            self.barrier.wait().await;
            Ok(60.0)
        }
    }

    #[tokio::test]
    async fn test_sources_run_concurrently() {
        // Each source waits for the other, so the cycle only finishes if both are in flight.
        let barrier = Arc::new(Barrier::new(2));
        let sources: Vec<Arc<dyn RateSource>> = [SourceId::Bcv, SourceId::Binance]
            .into_iter()
            .map(|id| {
                Arc::new(BarrierSource {
                    id,
                    barrier: barrier.clone(),
                }) as Arc<dyn RateSource>
            })
            .collect();
        let store = Arc::new(SnapshotStore::new(seed()));
        let refresher = Refresher::new(store.clone(), sources, enabled(&["bcv", "binance"]), None);

        let outcome = tokio::time::timeout(Duration::from_secs(5), refresher.run_cycle())
            .await
            .expect("cycle did not finish")
            .unwrap();
        assert_eq!(
            outcome,
            CycleOutcome::Committed {
                succeeded: 2,
                failed: 0
            }
        );
    }

    struct GatedSource {
        calls: AtomicUsize,
        active: AtomicUsize,
        max_active: AtomicUsize,
        gate: Notify,
    }

    #[async_trait]
    impl RateSource for GatedSource {
        fn id(&self) -> SourceId {
            SourceId::Bcv
        }

        async fn fetch_rate(&self) -> Result<f64> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(active, Ordering::SeqCst);
            self.gate.notified().await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(50.0 + call as f64)
        }
    }

    #[tokio::test]
    async fn test_overlapping_cycles_are_serialized() {
        let source = Arc::new(GatedSource {
            calls: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
            gate: Notify::new(),
        });
        let store = Arc::new(SnapshotStore::new(seed()));
        let refresher = Refresher::new(
            store.clone(),
            vec![source.clone() as Arc<dyn RateSource>],
            enabled(&["bcv"]),
            None,
        );

        let release = async {
            for expected in 1..=2 {
                while source.calls.load(Ordering::SeqCst) < expected {
                    tokio::task::yield_now().await;
                }
                source.gate.notify_one();
            }
        };
        let (first, second, _) = tokio::time::timeout(Duration::from_secs(5), async {
            tokio::join!(refresher.run_cycle(), refresher.run_cycle(), release)
        })
        .await
        .expect("cycles did not finish");

        assert!(matches!(first.unwrap(), CycleOutcome::Committed { .. }));
        assert!(matches!(second.unwrap(), CycleOutcome::Committed { .. }));
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
        assert_eq!(source.max_active.load(Ordering::SeqCst), 1);

        let snapshot = store.snapshot();
        assert_eq!(snapshot.rate("bcv").unwrap().value, 52.0);
        assert_eq!(snapshot.meta.as_ref().unwrap().sources, store.health());
    }

    #[test]
    fn test_upsert() {
        let mut rates = vec![Rate::new("bcv", "Custom", 1.0)];
        upsert(&mut rates, Rate::new("bcv", "Dólar BCV", 2.0));
        upsert(&mut rates, Rate::new("bybit", "Bybit", 3.0));
        assert_eq!(
            rates,
            vec![Rate::new("bcv", "Custom", 2.0), Rate::new("bybit", "Bybit", 3.0)]
        );
    }
}
