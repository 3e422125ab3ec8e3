//! Shared health state for the `/health` endpoint. Updated by the collector
//! after every tick poll, read by the API — grounded on the teacher's
//! atomics-in-a-shared-struct habit (`HealthState` updated by `WsManager`,
//! `window_consumer`, `DbWriter`, read by the API).

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::Instant;

#[derive(Default)]
pub struct HealthState {
    started_at: Option<Instant>,
    /// True if the most recently completed tick poll finished without error.
    last_poll_ok: AtomicBool,
    /// Millisecond epoch of the most recently completed tick poll (0 = none yet).
    last_poll_at_ms: AtomicI64,
    /// Snapshot of the most recent `pollTicks` pass, read by the heartbeat.
    tracked_markets: AtomicI64,
    last_ticked: AtomicI64,
    last_skipped_no_payload: AtomicI64,
    last_skipped_filters: AtomicI64,
    last_triggered: AtomicI64,
}

impl HealthState {
    pub fn new() -> Self {
        Self {
            started_at: Some(Instant::now()),
            last_poll_ok: AtomicBool::new(true),
            last_poll_at_ms: AtomicI64::new(0),
            tracked_markets: AtomicI64::new(0),
            last_ticked: AtomicI64::new(0),
            last_skipped_no_payload: AtomicI64::new(0),
            last_skipped_filters: AtomicI64::new(0),
            last_triggered: AtomicI64::new(0),
        }
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.map(|t| t.elapsed().as_secs()).unwrap_or(0)
    }

    pub fn record_poll_outcome(&self, ok: bool, at_ms: i64) {
        self.last_poll_ok.store(ok, Ordering::Relaxed);
        self.last_poll_at_ms.store(at_ms, Ordering::Relaxed);
    }

    pub fn last_poll_ok(&self) -> bool {
        self.last_poll_ok.load(Ordering::Relaxed)
    }

    pub fn last_poll_at_ms(&self) -> Option<i64> {
        match self.last_poll_at_ms.load(Ordering::Relaxed) {
            0 => None,
            ms => Some(ms),
        }
    }

    /// Records the per-category counts from one `pollTicks` pass, so the
    /// heartbeat can report the last poll's shape without recomputing it.
    pub fn record_tick_counts(
        &self,
        tracked_markets: i64,
        ticked: i64,
        skipped_no_payload: i64,
        skipped_filters: i64,
        triggered: i64,
    ) {
        self.tracked_markets.store(tracked_markets, Ordering::Relaxed);
        self.last_ticked.store(ticked, Ordering::Relaxed);
        self.last_skipped_no_payload.store(skipped_no_payload, Ordering::Relaxed);
        self.last_skipped_filters.store(skipped_filters, Ordering::Relaxed);
        self.last_triggered.store(triggered, Ordering::Relaxed);
    }

    pub fn tracked_markets(&self) -> i64 {
        self.tracked_markets.load(Ordering::Relaxed)
    }

    pub fn last_ticked(&self) -> i64 {
        self.last_ticked.load(Ordering::Relaxed)
    }

    pub fn last_skipped_no_payload(&self) -> i64 {
        self.last_skipped_no_payload.load(Ordering::Relaxed)
    }

    pub fn last_skipped_filters(&self) -> i64 {
        self.last_skipped_filters.load(Ordering::Relaxed)
    }

    pub fn last_triggered(&self) -> i64 {
        self.last_triggered.load(Ordering::Relaxed)
    }
}
