//! Per-minute tick collection: price + volume fan-out over all tracked
//! markets, delta-volume computation, acceptance filtering, and handoff to
//! the detector. Grounded on the teacher's `market_refresh.rs` batching and
//! the bounded fan-out style of `ws/connection.rs`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::stream::{self, StreamExt};
use serde_json::Value;
use tracing::{info, warn};

use crate::api::health::HealthState;
use crate::config::{Config, COLLECTOR_BATCH_SIZE};
use crate::detector::Detector;
use crate::error::Result;
use crate::store::Store;
use crate::types::{MarketDescriptor, Tick, TickOutcome};
use crate::upstream::payload::{coerce_ms_timestamp, error_code, get_numeric, unwrap_envelope};
use crate::upstream::UpstreamClient;

const PATH_ORDERBOOK: &str = "/orderbook";
const PATH_PRIVATE_DETAIL: &str = "/market";
const PATH_PRIVATE_LIST: &str = "/market";

pub struct Collector {
    client: Arc<dyn UpstreamClient>,
    store: Store,
    cfg: Config,
    detector: Detector,
    health: Arc<HealthState>,
    running: Arc<AtomicBool>,
}

impl Collector {
    pub fn new(
        client: Arc<dyn UpstreamClient>,
        store: Store,
        cfg: Config,
        detector: Detector,
        health: Arc<HealthState>,
    ) -> Self {
        Self { client, store, cfg, detector, health, running: Arc::new(AtomicBool::new(false)) }
    }

    /// Non-reentrant: a poll already in flight causes this call to return
    /// immediately with no work done.
    pub async fn poll_ticks(&self) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("tick poll already in progress, skipping this invocation");
            return Ok(());
        }
        let result = self.poll_ticks_inner().await;
        self.running.store(false, Ordering::SeqCst);
        self.health.record_poll_outcome(result.is_ok(), now_ms());
        result
    }

    async fn poll_ticks_inner(&self) -> Result<()> {
        let markets = self.store.list_streams().await?;
        if markets.is_empty() {
            self.health.record_tick_counts(0, 0, 0, 0, 0);
            return Ok(());
        }

        let mut ticked = 0u32;
        let mut skipped_no_payload = 0u32;
        let mut skipped_filters = 0u32;
        let mut triggered = 0u32;

        for batch in markets.chunks(COLLECTOR_BATCH_SIZE) {
            let outcomes: Vec<Result<TickOutcome>> = stream::iter(batch.iter())
                .map(|market| self.collect_tick(market))
                .buffer_unordered(COLLECTOR_BATCH_SIZE)
                .collect()
                .await;

            for outcome in outcomes {
                match outcome {
                    Ok(TickOutcome::Ticked) => ticked += 1,
                    Ok(TickOutcome::SkippedNoPayload) => skipped_no_payload += 1,
                    Ok(TickOutcome::SkippedFilters) => skipped_filters += 1,
                    Ok(TickOutcome::Triggered) => triggered += 1,
                    Err(e) => warn!("collectTick failed: {e}"),
                }
            }
        }

        self.health.record_tick_counts(
            markets.len() as i64,
            ticked as i64,
            skipped_no_payload as i64,
            skipped_filters as i64,
            triggered as i64,
        );

        info!(
            ticked, skipped_no_payload, skipped_filters, triggered,
            "tick poll complete: {ticked} ticked, {skipped_no_payload} no-payload, \
             {skipped_filters} filtered, {triggered} triggered",
        );
        Ok(())
    }

    async fn collect_tick(&self, market: &MarketDescriptor) -> Result<TickOutcome> {
        let Some((price, ts)) = self.fetch_price(market).await else {
            return Ok(TickOutcome::SkippedNoPayload);
        };
        let Some(volume) = self.fetch_private_volume(market).await else {
            return Ok(TickOutcome::SkippedNoPayload);
        };

        let last_volume = self
            .store
            .latest_raw_tick(market.market_id)
            .await?
            .map(|t| t.volume)
            .unwrap_or(0.0);
        let raw_delta = volume - last_volume;
        if raw_delta < 0.0 {
            warn!(
                market_id = market.market_id,
                raw_delta, "negative volume delta observed, clamping to zero"
            );
        }
        let delta_volume = raw_delta.max(0.0);

        let tick = Tick { market_id: market.market_id, ts, yes_price: price, volume, delta_volume };

        if volume < self.cfg.min_total_volume && delta_volume < self.cfg.min_delta_volume {
            self.store.insert_tick(&tick, false).await?;
            return Ok(TickOutcome::SkippedFilters);
        }

        let parent = match market.parent_market_id {
            Some(pid) => self.store.get_stream(pid).await?,
            None => None,
        };
        let outcome = self.detector.evaluate(market, &tick, parent.as_ref()).await?;
        self.store.insert_tick(&tick, true).await?;
        Ok(outcome)
    }

    async fn fetch_price(&self, market: &MarketDescriptor) -> Option<(f64, i64)> {
        let chain_id = market.chain_id.map(|c| c.to_string()).unwrap_or_default();
        let params = [
            ("symbol", market.yes_token_id.clone()),
            ("question_id", market.topic_id.clone()),
            ("chainId", chain_id),
            ("symbol_types", "0".to_string()),
        ];
        let v = self.client.get(PATH_ORDERBOOK, &params).await.ok()?;
        if error_code(&v) != 0 {
            return None;
        }
        let payload = unwrap_envelope(&v);

        let price = get_numeric(payload, &["last_price"])
            .or_else(|| first_level_price(payload, "ask"))
            .or_else(|| first_level_price(payload, "bid"))?;
        let ts_raw = get_numeric(payload, &["timestamp", "time", "ts"])?;
        Some((price, coerce_ms_timestamp(ts_raw)))
    }

    async fn fetch_private_volume(&self, market: &MarketDescriptor) -> Option<f64> {
        let detail_path = format!("{PATH_PRIVATE_DETAIL}/{}", market.market_id);
        if let Ok(v) = self.client.get(&detail_path, &[]).await {
            if error_code(&v) == 0 {
                let payload = unwrap_envelope(&v);
                if let Some(volume) = get_numeric(payload, &["volume", "privateVolume"]) {
                    return Some(volume);
                }
            }
        }

        let params = [("marketId", market.market_id.to_string())];
        let v = self.client.get(PATH_PRIVATE_LIST, &params).await.ok()?;
        if error_code(&v) != 0 {
            return None;
        }
        let payload = unwrap_envelope(&v);
        get_numeric(payload, &["volume", "privateVolume"])
    }
}

fn first_level_price(payload: &Value, side: &str) -> Option<f64> {
    payload
        .get(side)
        .and_then(|a| a.as_array())
        .and_then(|a| a.first())
        .and_then(|level| get_numeric(level, &["price"]))
}

fn now_ms() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as i64
}
