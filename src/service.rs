//! Handle shared by everything that reads or refreshes rates.

use crate::core::Snapshot;
use crate::core::config::AppConfig;
use crate::providers::{build_sources, remote::RemoteSnapshotSource};
use crate::refresh::Refresher;
use crate::store::SnapshotStore;
use anyhow::Result;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

struct Inner {
    refresher: Refresher,
    interval: Duration,
    on_demand_in_flight: AtomicBool,
}

/// Cheap to clone; all clones share one store and one refresher.
#[derive(Clone)]
pub struct RatesService {
    inner: Arc<Inner>,
}

impl RatesService {
    pub fn new(refresher: Refresher, interval: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                refresher,
                interval,
                on_demand_in_flight: AtomicBool::new(false),
            }),
        }
    }

    /// Seeds the store with the bundled snapshot and wires the configured sources.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let store = Arc::new(SnapshotStore::new(Snapshot::bundled()?));
        let remote = config
            .remote_rates_url
            .as_deref()
            .map(|url| RemoteSnapshotSource::new(url, config.request_timeout()))
            .transpose()?;
        let refresher = Refresher::new(
            store,
            build_sources(config)?,
            config.sources.clone(),
            remote,
        );
        Ok(Self::new(refresher, config.refresh_interval()))
    }

    pub fn store(&self) -> &Arc<SnapshotStore> {
        self.inner.refresher.store()
    }

    /// Returns the current snapshot immediately. When it is older than twice the refresh
    /// interval a background refresh is dispatched, at most one at a time.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        if self.is_stale(Instant::now()) {
            self.trigger_background_refresh();
        }
        self.store().snapshot()
    }

    /// Runs one refresh cycle. Failures are logged, never returned.
    pub async fn refresh_now(&self) {
        self.inner.refresher.refresh_now().await;
    }

    /// Refreshes now and then every interval for as long as the returned task lives.
    pub fn start_background_refresh(&self) -> JoinHandle<()> {
        let service = self.clone();
        let period = self.inner.interval;
        info!(?period, "Starting background refresh");
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                service.refresh_now().await;
            }
        })
    }

    fn is_stale(&self, now: Instant) -> bool {
        match self.store().last_refresh() {
            None => true,
            Some(at) => now.saturating_duration_since(at) > self.inner.interval * 2,
        }
    }

    fn trigger_background_refresh(&self) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            debug!("No runtime available, skipping on-demand refresh");
            return;
        };
        if self
            .inner
            .on_demand_in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("On-demand refresh already in flight");
            return;
        }

        debug!("Snapshot is stale, dispatching on-demand refresh");
        let service = self.clone();
        handle.spawn(async move {
            service.refresh_now().await;
            service
                .inner
                .on_demand_in_flight
                .store(false, Ordering::Release);
        });
    }
}
