//! Three independent periodic timers: catalog refresh, tick poll (subject to
//! blackout windows), and a heartbeat. Grounded on the teacher's
//! `MarketRefresher`/`PinnedMarketWatcher` pattern of one `tokio::time::interval`
//! loop per background concern, each spawned as its own task.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::interval;
use tracing::{error, info};

use crate::api::health::HealthState;
use crate::collector::Collector;
use crate::config::{Config, CATALOG_REFRESH_INTERVAL_SECS, HEARTBEAT_INTERVAL_SECS, TICK_POLL_INTERVAL_SECS};
use crate::error::Result;
use crate::store::Store;
use crate::upstream::UpstreamClient;
use crate::walker::Walker;

pub struct Scheduler {
    client: Arc<dyn UpstreamClient>,
    store: Store,
    cfg: Config,
    collector: Arc<Collector>,
    health: Arc<HealthState>,
    started_at: Instant,
}

impl Scheduler {
    pub fn new(
        client: Arc<dyn UpstreamClient>,
        store: Store,
        cfg: Config,
        collector: Arc<Collector>,
        health: Arc<HealthState>,
    ) -> Self {
        Self { client, store, cfg, collector, health, started_at: Instant::now() }
    }

    /// Startup sequence: one catalog refresh to completion, then one
    /// immediate tick poll, before any timer starts.
    pub async fn bootstrap(&self) -> Result<()> {
        self.refresh_catalog().await?;
        self.collector.poll_ticks().await?;
        Ok(())
    }

    pub async fn run_catalog_refresh_loop(self: Arc<Self>) {
        let mut ticker = interval(Duration::from_secs(CATALOG_REFRESH_INTERVAL_SECS));
        ticker.tick().await; // bootstrap already ran one refresh
        loop {
            ticker.tick().await;
            if let Err(e) = self.refresh_catalog().await {
                error!("catalog refresh failed: {e}");
            }
        }
    }

    pub async fn run_tick_poll_loop(self: Arc<Self>) {
        let mut ticker = interval(Duration::from_secs(TICK_POLL_INTERVAL_SECS));
        ticker.tick().await; // bootstrap already ran one poll
        loop {
            ticker.tick().await;
            if self.in_blackout() {
                continue;
            }
            if let Err(e) = self.collector.poll_ticks().await {
                error!("tick poll failed: {e}");
            }
        }
    }

    pub async fn run_heartbeat_loop(self: Arc<Self>) {
        let mut ticker = interval(Duration::from_secs(HEARTBEAT_INTERVAL_SECS));
        loop {
            ticker.tick().await;
            info!(
                uptime_secs = self.started_at.elapsed().as_secs(),
                tracked_markets = self.health.tracked_markets(),
                last_ticked = self.health.last_ticked(),
                last_skipped_no_payload = self.health.last_skipped_no_payload(),
                last_skipped_filters = self.health.last_skipped_filters(),
                last_triggered = self.health.last_triggered(),
                "heartbeat: service alive",
            );
        }
    }

    async fn refresh_catalog(&self) -> Result<()> {
        let walker = Walker::new(self.client.as_ref(), &self.cfg);
        let descriptors = walker.walk().await;
        let count = descriptors.len();
        for descriptor in descriptors {
            self.store.upsert_stream(&descriptor).await?;
        }
        info!(count, "catalog refresh complete: {count} descriptors reconciled");
        Ok(())
    }

    fn in_blackout(&self) -> bool {
        let minute = current_minute_of_hour();
        self.cfg
            .blackout_minute_ranges
            .iter()
            .any(|(start, end)| minute >= *start && minute < *end)
    }
}

fn current_minute_of_hour() -> u32 {
    use std::time::{SystemTime, UNIX_EPOCH};
    let secs = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs();
    ((secs / 60) % 60) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blackout_range_is_half_open() {
        let cfg = Config {
            venue_api_url: String::new(),
            log_level: "info".into(),
            db_path: ":memory:".into(),
            api_port: 0,
            min_total_volume: 0.0,
            min_delta_volume: 0.0,
            z_threshold: 0.0,
            use_adaptive_thresholds: true,
            deep_extreme_min_change: 0.0,
            near_extreme_min_change: 0.0,
            middle_min_change: 0.0,
            min_abs_price_change: 0.0,
            volume_boost_factor: 0.0,
            page_size: 1,
            page_workers: 1,
            detail_not_found_stop: 1,
            multi_not_found_stop: 1,
            alert_title_blocklist: vec![],
            alert_title_blocklist_regex: None,
            blackout_minute_ranges: vec![(56, 60), (26, 32)],
        };
        let in_range = |m: u32| cfg.blackout_minute_ranges.iter().any(|(s, e)| m >= *s && m < *e);
        assert!(in_range(56));
        assert!(!in_range(60));
        assert!(in_range(26));
        assert!(!in_range(32));
        assert!(!in_range(40));
    }
}
