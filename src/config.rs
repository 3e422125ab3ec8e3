use crate::error::{AppError, Result};

pub const VENUE_API_URL: &str = "https://venue-api.example.com";

/// EWMA smoothing span. α = 2 / (span + 1).
pub const EWMA_SPAN: f64 = 20.0;

/// Minimum accepted ticks before the detector will evaluate a trigger.
pub const MIN_TICKS_FOR_DETECTION: u32 = 20;

/// Per-market alert cooldown.
pub const ALERT_COOLDOWN_SECS: i64 = 6 * 3600;

/// Duplicate-hash suppression window. Same length as the cooldown today,
/// kept separate because the spec treats them as independent knobs.
pub const DUPLICATE_ALERT_WINDOW_SECS: i64 = 6 * 3600;

/// Bounded per-market tick retention.
pub const RAW_TICK_RETENTION: i64 = 400;
pub const FILTERED_TICK_RETENTION: i64 = 120;

/// Tick collector batch size (markets fetched concurrently per batch).
pub const COLLECTOR_BATCH_SIZE: usize = 60;

/// Upstream token-bucket: sustained rate and max concurrency.
pub const RATE_LIMIT_PER_SEC: u32 = 12;
pub const RATE_LIMIT_MAX_CONCURRENCY: usize = 6;
pub const RATE_LIMIT_MIN_SPACING_MS: u64 = 85;

/// Client retry policy: at most one retry, only for timeouts / 5xx.
pub const RETRY_BACKOFF_MS: u64 = 300;

/// Upstream "topic not found" application error code.
pub const TOPIC_NOT_FOUND_CODE: i64 = 10200;

/// Noise floors for the EWMA Z-score denominators.
pub const MIN_STD_PRICE: f64 = 0.005;
pub const MIN_STD_VOLUME: f64 = 20.0;

/// Catalog refresh / tick poll / heartbeat cadences.
pub const CATALOG_REFRESH_INTERVAL_SECS: u64 = 3600;
pub const TICK_POLL_INTERVAL_SECS: u64 = 60;
pub const HEARTBEAT_INTERVAL_SECS: u64 = 300;

/// Price-change zone thresholds (fractions of [0,1]).
pub mod price_zones {
    pub const DEEP_EXTREME_LOW: f64 = 0.01;
    pub const DEEP_EXTREME_HIGH: f64 = 0.99;
    pub const NEAR_EXTREME_LOW: f64 = 0.03;
    pub const NEAR_EXTREME_HIGH: f64 = 0.97;
}

#[derive(Debug, Clone)]
pub struct Config {
    pub venue_api_url: String,
    pub log_level: String,
    pub db_path: String,
    pub api_port: u16,

    /// Acceptance gate (MIN_TOTAL_VOLUME)
    pub min_total_volume: f64,
    /// Acceptance gate (MIN_DELTA_VOLUME)
    pub min_delta_volume: f64,

    /// Trigger score threshold (Z_THRESHOLD)
    pub z_threshold: f64,
    /// Whether the zone-adaptive gate table is used (USE_ADAPTIVE_THRESHOLDS)
    pub use_adaptive_thresholds: bool,
    pub deep_extreme_min_change: f64,
    pub near_extreme_min_change: f64,
    pub middle_min_change: f64,
    /// Flat fallback gate when adaptive thresholds are disabled (MIN_ABS_PRICE_CHANGE)
    pub min_abs_price_change: f64,

    /// Volume-boost coefficient β (VOLUME_BOOST_FACTOR)
    pub volume_boost_factor: f64,

    /// Catalog walker pagination (PAGE_SIZE, PAGE_WORKERS)
    pub page_size: u32,
    pub page_workers: usize,
    /// Circuit breaker thresholds (DETAIL_NOT_FOUND_STOP, MULTI_NOT_FOUND_STOP)
    pub detail_not_found_stop: u32,
    pub multi_not_found_stop: u32,

    /// Case-insensitive literal substrings that suppress a trigger (ALERT_TITLE_BLOCKLIST)
    pub alert_title_blocklist: Vec<String>,
    /// Single case-insensitive regex, also suppressing a trigger (ALERT_TITLE_BLOCKLIST_REGEX)
    pub alert_title_blocklist_regex: Option<String>,

    /// Poll blackout windows, expressed as inclusive [start, end) minute-of-hour ranges.
    /// Canonical default resolves spec.md open question (ii): `:56–:00` and `:26–:32`
    /// (see DESIGN.md).
    pub blackout_minute_ranges: Vec<(u32, u32)>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            venue_api_url: std::env::var("VENUE_API_URL")
                .unwrap_or_else(|_| VENUE_API_URL.to_string()),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            db_path: std::env::var("DB_PATH").unwrap_or_else(|_| "monitor.db".to_string()),
            api_port: std::env::var("API_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse::<u16>()
                .map_err(|_| AppError::Config("API_PORT must be a valid port number".to_string()))?,

            min_total_volume: parse_env_or("MIN_TOTAL_VOLUME", 3000.0),
            min_delta_volume: parse_env_or("MIN_DELTA_VOLUME", 80.0),

            z_threshold: parse_env_or("Z_THRESHOLD", 2.5),
            use_adaptive_thresholds: std::env::var("USE_ADAPTIVE_THRESHOLDS")
                .map(|v| v != "false" && v != "0")
                .unwrap_or(true),
            deep_extreme_min_change: parse_env_or("DEEP_EXTREME_MIN_CHANGE", 0.07),
            near_extreme_min_change: parse_env_or("NEAR_EXTREME_MIN_CHANGE", 0.10),
            middle_min_change: parse_env_or("MIDDLE_MIN_CHANGE", 0.15),
            min_abs_price_change: parse_env_or("MIN_ABS_PRICE_CHANGE", 0.03),

            volume_boost_factor: parse_env_or("VOLUME_BOOST_FACTOR", 0.25),

            page_size: parse_env_or("PAGE_SIZE", 100.0) as u32,
            page_workers: parse_env_or("PAGE_WORKERS", 16.0) as usize,
            detail_not_found_stop: parse_env_or("DETAIL_NOT_FOUND_STOP", 5.0) as u32,
            multi_not_found_stop: parse_env_or("MULTI_NOT_FOUND_STOP", 5.0) as u32,

            alert_title_blocklist: std::env::var("ALERT_TITLE_BLOCKLIST")
                .unwrap_or_default()
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            alert_title_blocklist_regex: std::env::var("ALERT_TITLE_BLOCKLIST_REGEX").ok(),

            blackout_minute_ranges: vec![(56, 60), (26, 32)],
        })
    }
}

fn parse_env_or(key: &str, default: f64) -> f64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<f64>().ok())
        .unwrap_or(default)
}
