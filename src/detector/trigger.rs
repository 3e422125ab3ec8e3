//! The decision sequence: cold-start / update / gate / blocklist / cooldown,
//! ending in a notifier call on trigger. Grounded on the teacher's
//! `detector/spread.rs` decision-stage shape, generalized from spread-window
//! classification to EWMA anomaly scoring.

use std::sync::Arc;

use regex::{Regex, RegexBuilder};
use tracing::error;

use crate::config::{
    price_zones, Config, MIN_STD_PRICE, MIN_STD_VOLUME, MIN_TICKS_FOR_DETECTION,
};
use crate::detector::ewma;
use crate::error::Result;
use crate::notifier::Notifier;
use crate::store::Store;
use crate::types::{Detection, MarketDescriptor, Tick, TickOutcome};

pub struct Detector {
    store: Store,
    cfg: Config,
    notifier: Arc<dyn Notifier>,
    blocklist_regex: Option<Regex>,
}

impl Detector {
    pub fn new(store: Store, cfg: Config, notifier: Arc<dyn Notifier>) -> Self {
        let blocklist_regex = cfg
            .alert_title_blocklist_regex
            .as_deref()
            .and_then(|pattern| RegexBuilder::new(pattern).case_insensitive(true).build().ok());
        Self { store, cfg, notifier, blocklist_regex }
    }

    /// Runs the full decision sequence for one accepted tick. `parent` is the
    /// market's multi-outcome parent, when one exists on the same chain —
    /// its title also participates in the blocklist check.
    pub async fn evaluate(
        &self,
        market: &MarketDescriptor,
        tick: &Tick,
        parent: Option<&MarketDescriptor>,
    ) -> Result<TickOutcome> {
        let state = match self.store.get_ewma_state(market.market_id).await? {
            Some(s) => s,
            None => {
                let history = self
                    .store
                    .recent_filtered_ticks(market.market_id, crate::config::FILTERED_TICK_RETENTION)
                    .await?;
                ewma::seed(&history)
            }
        };

        if state.tick_count < MIN_TICKS_FOR_DETECTION {
            let next = ewma::update(state, tick.yes_price, tick.delta_volume);
            self.store.put_ewma_state(market.market_id, &next).await?;
            return Ok(TickOutcome::Ticked);
        }

        let price_z = ewma::z_score(state.price_mean, state.price_var, MIN_STD_PRICE, tick.yes_price);
        let volume_z =
            ewma::z_score(state.volume_mean, state.volume_var, MIN_STD_VOLUME, tick.delta_volume);
        let adjusted_score = ewma::adjusted_score(price_z, volume_z, self.cfg.volume_boost_factor);
        let price_change = tick.yes_price - state.last_price;
        let prev_price_valid = state.last_price > 0.0;
        let prev_price = state.last_price;

        let next = ewma::update(state, tick.yes_price, tick.delta_volume);
        self.store.put_ewma_state(market.market_id, &next).await?;

        // Design note: this guard intentionally suppresses the decision on
        // the first post-cold-start tick even if it is a genuine jump — kept
        // as specified rather than patched (see DESIGN.md).
        if !prev_price_valid {
            return Ok(TickOutcome::Ticked);
        }

        let min_change = adaptive_min_change(&self.cfg, tick.yes_price);
        if price_change.abs() < min_change {
            return Ok(TickOutcome::Ticked);
        }

        if adjusted_score < self.cfg.z_threshold {
            return Ok(TickOutcome::Ticked);
        }

        let parent_chain_matches = parent
            .map(|p| p.chain_id.is_some() && p.chain_id == market.chain_id)
            .unwrap_or(false);
        let parent_title = if parent_chain_matches { parent.map(|p| p.title.as_str()) } else { None };
        if self.title_blocked(&market.title) || parent_title.map(|t| self.title_blocked(t)).unwrap_or(false) {
            return Ok(TickOutcome::Ticked);
        }

        let hash = format!("{}:{:.2}:{:.3}", market.market_id, adjusted_score, price_change.abs());

        let mut alert_state = self.store.get_alert_state(market.market_id).await?;
        if let Some(last_at) = alert_state.last_alert_at {
            if tick.ts - last_at < crate::config::ALERT_COOLDOWN_SECS * 1000 {
                return Ok(TickOutcome::Ticked);
            }
        }
        if alert_state.last_alert_hash.as_deref() == Some(hash.as_str()) {
            if let Some(last_at) = alert_state.last_alert_at {
                if tick.ts - last_at < crate::config::DUPLICATE_ALERT_WINDOW_SECS * 1000 {
                    return Ok(TickOutcome::Ticked);
                }
            }
        }

        let detection = Detection {
            price_z,
            volume_z,
            adjusted_score,
            price_change,
            prev_price,
            adaptive_threshold: min_change,
        };

        if let Err(e) = self.notifier.notify(market, tick, &detection).await {
            error!(market_id = market.market_id, "notifier failed: {e}");
            return Ok(TickOutcome::Ticked);
        }

        alert_state.last_alert_at = Some(tick.ts);
        alert_state.last_alert_hash = Some(hash);
        self.store.put_alert_state(market.market_id, &alert_state).await?;

        Ok(TickOutcome::Triggered)
    }

    fn title_blocked(&self, title: &str) -> bool {
        let lower = title.to_lowercase();
        if self
            .cfg
            .alert_title_blocklist
            .iter()
            .any(|needle| lower.contains(&needle.to_lowercase()))
        {
            return true;
        }
        if let Some(re) = &self.blocklist_regex {
            if re.is_match(title) {
                return true;
            }
        }
        false
    }
}

/// Zone-adaptive minimum `|Δ|` gate, or the flat fallback when adaptive
/// thresholds are disabled.
pub fn adaptive_min_change(cfg: &Config, price: f64) -> f64 {
    if !cfg.use_adaptive_thresholds {
        return cfg.min_abs_price_change;
    }
    if price < price_zones::DEEP_EXTREME_LOW || price > price_zones::DEEP_EXTREME_HIGH {
        cfg.deep_extreme_min_change
    } else if price < price_zones::NEAR_EXTREME_LOW || price > price_zones::NEAR_EXTREME_HIGH {
        cfg.near_extreme_min_change
    } else {
        cfg.middle_min_change
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> Config {
        Config {
            venue_api_url: String::new(),
            log_level: "info".into(),
            db_path: ":memory:".into(),
            api_port: 0,
            min_total_volume: 3000.0,
            min_delta_volume: 80.0,
            z_threshold: 2.5,
            use_adaptive_thresholds: true,
            deep_extreme_min_change: 0.07,
            near_extreme_min_change: 0.10,
            middle_min_change: 0.15,
            min_abs_price_change: 0.03,
            volume_boost_factor: 0.25,
            page_size: 100,
            page_workers: 16,
            detail_not_found_stop: 5,
            multi_not_found_stop: 5,
            alert_title_blocklist: vec![],
            alert_title_blocklist_regex: None,
            blackout_minute_ranges: vec![(56, 60), (26, 32)],
        }
    }

    #[test]
    fn adaptive_gate_picks_deep_extreme_zone() {
        let c = cfg();
        assert_eq!(adaptive_min_change(&c, 0.005), 0.07);
        assert_eq!(adaptive_min_change(&c, 0.995), 0.07);
    }

    #[test]
    fn adaptive_gate_picks_near_extreme_zone() {
        let c = cfg();
        assert_eq!(adaptive_min_change(&c, 0.02), 0.10);
    }

    #[test]
    fn adaptive_gate_picks_middle_zone() {
        let c = cfg();
        assert_eq!(adaptive_min_change(&c, 0.5), 0.15);
    }

    #[test]
    fn flat_fallback_ignores_zone_when_disabled() {
        let mut c = cfg();
        c.use_adaptive_thresholds = false;
        assert_eq!(adaptive_min_change(&c, 0.005), 0.03);
        assert_eq!(adaptive_min_change(&c, 0.5), 0.03);
    }
}
