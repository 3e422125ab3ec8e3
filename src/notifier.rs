//! Alert delivery is an external collaborator — this module only defines the
//! seam (`Notifier`) and a logging default so the service is runnable
//! without a real transport wired up.

use async_trait::async_trait;
use tracing::info;

use crate::error::Result;
use crate::types::{Detection, MarketDescriptor, Tick};

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, market: &MarketDescriptor, tick: &Tick, detection: &Detection) -> Result<()>;
}

/// Renders the alert to the log, with a small ASCII sparkline over the
/// magnitude of the triggering move. Stands in for a real chart-rendering
/// notifier, which is out of scope for the core.
pub struct LoggingNotifier;

#[async_trait]
impl Notifier for LoggingNotifier {
    async fn notify(&self, market: &MarketDescriptor, tick: &Tick, detection: &Detection) -> Result<()> {
        info!(
            market_id = market.market_id,
            title = %market.title,
            price = tick.yes_price,
            price_change = detection.price_change,
            score = detection.adjusted_score,
            price_z = detection.price_z,
            volume_z = detection.volume_z,
            "ALERT {} | {} → {:.4} (Δ{:+.3}) | score {:.2} {}",
            market.market_id,
            market.title,
            tick.yes_price,
            detection.price_change,
            detection.adjusted_score,
            sparkline(detection.prev_price, tick.yes_price),
        );
        Ok(())
    }
}

/// Eight-level bar scaled to the move between `from` and `to`, clamped to
/// the [0,1] price range the venue operates in.
fn sparkline(from: f64, to: f64) -> String {
    const LEVELS: &[char] = &['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];
    let steps = 12;
    let mut bar = String::with_capacity(steps);
    for i in 0..steps {
        let t = i as f64 / (steps - 1) as f64;
        let p = from + (to - from) * t;
        let idx = ((p.clamp(0.0, 1.0)) * (LEVELS.len() - 1) as f64).round() as usize;
        bar.push(LEVELS[idx.min(LEVELS.len() - 1)]);
    }
    bar
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sparkline_has_fixed_width() {
        assert_eq!(sparkline(0.2, 0.8).chars().count(), 12);
    }
}
