use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Market descriptor
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketType {
    /// A multi-outcome topic's parent row. Carries the synthetic placeholder
    /// token `multi-parent-<marketId>` when the venue has no real one.
    MultiParent,
    Single,
}

impl std::fmt::Display for MarketType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MarketType::MultiParent => write!(f, "multi_parent"),
            MarketType::Single => write!(f, "single"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketDescriptor {
    pub market_id: i64,
    pub yes_token_id: String,
    pub title: String,
    pub parent_market_id: Option<i64>,
    pub topic_id: String,
    pub market_type: Option<MarketType>,
    pub chain_id: Option<i64>,
    pub cutoff_at: Option<i64>,
    /// Millisecond epoch of last catalog reconcile.
    pub updated_at: i64,
}

impl MarketDescriptor {
    /// `(yesTokenId non-empty) OR (marketType = MULTI_PARENT)`.
    pub fn is_valid(&self) -> bool {
        !self.yes_token_id.is_empty() || matches!(self.market_type, Some(MarketType::MultiParent))
    }

    pub fn placeholder_token(market_id: i64) -> String {
        format!("multi-parent-{market_id}")
    }
}

// ---------------------------------------------------------------------------
// Tick
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Tick {
    pub market_id: i64,
    /// Millisecond epoch.
    pub ts: i64,
    pub yes_price: f64,
    /// Cumulative traded volume as reported upstream.
    pub volume: f64,
    /// Non-negative increment since the immediately preceding raw tick.
    pub delta_volume: f64,
}

// ---------------------------------------------------------------------------
// EWMA state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EwmaState {
    pub price_mean: f64,
    pub price_var: f64,
    pub volume_mean: f64,
    pub volume_var: f64,
    /// The price of the most recently consumed tick, not the mean.
    pub last_price: f64,
    pub tick_count: u32,
}

impl EwmaState {
    /// The zero-initialized sentinel: no row exists yet for this market.
    pub const ZERO: EwmaState = EwmaState {
        price_mean: 0.0,
        price_var: 0.0,
        volume_mean: 0.0,
        volume_var: 0.0,
        last_price: 0.0,
        tick_count: 0,
    };
}

impl Default for EwmaState {
    fn default() -> Self {
        Self::ZERO
    }
}

// ---------------------------------------------------------------------------
// Alert state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct AlertState {
    pub last_alert_at: Option<i64>,
    pub last_alert_hash: Option<String>,
}

// ---------------------------------------------------------------------------
// Detector output
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct Detection {
    pub price_z: f64,
    pub volume_z: f64,
    pub adjusted_score: f64,
    pub price_change: f64,
    pub prev_price: f64,
    pub adaptive_threshold: f64,
}

/// Outcome of one `collectTick`/detector pass, used for heartbeat diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Ticked,
    SkippedNoPayload,
    SkippedFilters,
    Triggered,
}
