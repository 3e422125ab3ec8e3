//! Paginated catalog walker: reconciles multi-outcome parent topics with
//! their children, enriches activation status via detail lookups, and yields
//! a normalized stream of market descriptors for one catalog refresh.
//!
//! Grounded on the teacher's `market_refresh.rs` fan-out and `fetcher.rs`
//! permissive-parsing habits, generalized to the parent/child reconciliation
//! this venue's topic model requires.

use std::collections::{HashMap, HashSet};
use std::time::{SystemTime, UNIX_EPOCH};

use futures_util::stream::{self, StreamExt};
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::{Config, TOPIC_NOT_FOUND_CODE};
use crate::types::{MarketDescriptor, MarketType};
use crate::upstream::UpstreamClient;
use crate::upstream::payload::{error_code, get_numeric, get_str, unwrap_envelope};

const PATH_LIST: &str = "/markets";
const PATH_DETAIL: &str = "/markets/detail";
const PATH_MULTI: &str = "/markets/multi";
const PATH_SERVER_TIME: &str = "/time";

#[derive(Default)]
struct CircuitBreaker {
    detail_not_found: u32,
    multi_not_found: u32,
    detail_tripped: bool,
    multi_tripped: bool,
}

impl CircuitBreaker {
    fn record_detail(&mut self, ok: bool, threshold: u32) {
        if ok {
            self.detail_not_found = 0;
        } else {
            self.detail_not_found += 1;
            if self.detail_not_found >= threshold {
                self.detail_tripped = true;
            }
        }
    }

    fn record_multi(&mut self, ok: bool, threshold: u32) {
        if ok {
            self.multi_not_found = 0;
        } else {
            self.multi_not_found += 1;
            if self.multi_not_found >= threshold {
                self.multi_tripped = true;
            }
        }
    }
}

/// Outcome of a detail/multi lookup, distinguishing an explicit "topic not
/// found" (counts toward the circuit breaker) from other errors (logged,
/// does not contribute to the counter, per spec).
#[derive(Clone)]
enum LookupOutcome {
    Found(Value),
    NotFound,
    Other,
}

/// Per-walk memoization: `(endpoint, topicId) -> cached outcome`.
#[derive(Default)]
struct LookupCache {
    detail: HashMap<String, LookupOutcome>,
    multi: HashMap<String, LookupOutcome>,
}

pub struct Walker<'a> {
    client: &'a dyn UpstreamClient,
    cfg: &'a Config,
}

impl<'a> Walker<'a> {
    pub fn new(client: &'a dyn UpstreamClient, cfg: &'a Config) -> Self {
        Self { client, cfg }
    }

    /// Runs one full catalog walk to completion. Never aborts on a bad page;
    /// returns whatever descriptors were reconciled successfully.
    pub async fn walk(&self) -> Vec<MarketDescriptor> {
        let now_ms = self.server_time().await;

        let mut breaker = CircuitBreaker::default();
        let mut cache = LookupCache::default();
        let mut seen_topics: HashSet<String> = HashSet::new();
        let mut out = Vec::new();

        let mut page = 1u32;
        let mut total_pages: Option<u32> = None;
        let workers = self.cfg.page_workers.max(1);

        'outer: loop {
            let batch: Vec<u32> = (page..page + workers as u32)
                .take_while(|p| total_pages.map(|t| *p <= t).unwrap_or(true))
                .collect();
            if batch.is_empty() {
                break;
            }

            let fetched: Vec<(u32, Result<Value, ()>)> = stream::iter(batch.clone())
                .map(|p| async move {
                    let params = [
                        ("statusEnum", "Activated".to_string()),
                        ("page", p.to_string()),
                        ("limit", self.cfg.page_size.to_string()),
                    ];
                    let res = self.client.get(PATH_LIST, &params).await;
                    (p, res.map_err(|e| warn!(page = p, "catalog page fetch failed: {e}")))
                })
                .buffer_unordered(workers)
                .collect()
                .await;

            let mut ordered = fetched;
            ordered.sort_by_key(|(p, _)| *p);

            let mut stop = false;
            for (p, result) in ordered {
                let value = match result {
                    Ok(v) => v,
                    Err(()) => continue,
                };
                let payload = unwrap_envelope(&value);
                if error_code(&value) != 0 {
                    warn!(page = p, "catalog page reported non-zero error code");
                    continue;
                }

                let items = payload.get("list").and_then(|v| v.as_array()).cloned().unwrap_or_default();
                if let Some(t) = get_numeric(payload, &["total"]) {
                    let total = t as u32;
                    let computed = total.div_ceil(self.cfg.page_size.max(1));
                    total_pages = Some(total_pages.map_or(computed, |prev| prev.min(computed)));
                }

                if items.is_empty() {
                    stop = true;
                    break;
                }

                for entry in &items {
                    self.reconcile_entry(entry, now_ms, &mut breaker, &mut cache, &mut seen_topics, &mut out)
                        .await;
                }

                if (items.len() as u32) < self.cfg.page_size {
                    stop = true;
                }
            }

            if stop {
                break 'outer;
            }
            page += workers as u32;
        }

        out
    }

    async fn server_time(&self) -> i64 {
        match self.client.get(PATH_SERVER_TIME, &[]).await {
            Ok(v) => {
                let payload = unwrap_envelope(&v);
                if let Some(raw) =
                    get_numeric(payload, &["serverTime", "server_time", "timestamp", "time", "ts"])
                {
                    return crate::upstream::payload::coerce_ms_timestamp(raw);
                }
                now_ms()
            }
            Err(e) => {
                warn!("server time fetch failed, falling back to wall clock: {e}");
                now_ms()
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn reconcile_entry(
        &self,
        entry: &Value,
        now_ms: i64,
        breaker: &mut CircuitBreaker,
        cache: &mut LookupCache,
        seen_topics: &mut HashSet<String>,
        out: &mut Vec<MarketDescriptor>,
    ) {
        let topic_id = get_str(entry, &["topicId"]).unwrap_or("").to_string();

        let mut child_list: Vec<Value> = entry
            .get("childList")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();

        let mut authoritative = entry.clone();
        // Set only when the multi endpoint's payload carries a different
        // `chainId` than the list entry — the venue reuses `topicId` across
        // chains, so that payload is a *second*, alternate-chain parent, not
        // a reconciliation of `entry`. `alt_children` is its own child list;
        // it must never be attributed to `entry`/`authoritative`.
        let mut alt_chain_parent: Option<Value> = None;
        let mut alt_children: Vec<Value> = Vec::new();

        if child_list.is_empty() && !topic_id.is_empty() && !breaker.multi_tripped {
            match self.lookup(PATH_MULTI, &topic_id, cache, |c| &mut c.multi).await {
                LookupOutcome::Found(multi) => {
                    breaker.record_multi(true, self.cfg.multi_not_found_stop);
                    let payload = unwrap_envelope(&multi).clone();
                    let children = payload
                        .get("childList")
                        .and_then(|v| v.as_array())
                        .cloned()
                        .unwrap_or_default();
                    if !children.is_empty() {
                        let entry_chain = get_numeric(entry, &["chainId"]);
                        let parent_chain = get_numeric(&payload, &["chainId"]);
                        if entry_chain.is_some() && parent_chain.is_some() && entry_chain != parent_chain {
                            alt_chain_parent = Some(payload);
                            alt_children = children;
                        } else {
                            authoritative = payload;
                            child_list = children;
                        }
                    }
                }
                LookupOutcome::NotFound => breaker.record_multi(false, self.cfg.multi_not_found_stop),
                LookupOutcome::Other => {}
            }
        }

        let fallback_status = authoritative.get("statusEnum").cloned();

        let mut active = status_decision(&authoritative, now_ms);
        if active.is_none() && !topic_id.is_empty() && !breaker.detail_tripped {
            match self.lookup(PATH_DETAIL, &topic_id, cache, |c| &mut c.detail).await {
                LookupOutcome::Found(detail) => {
                    breaker.record_detail(true, self.cfg.detail_not_found_stop);
                    let payload = unwrap_envelope(&detail).clone();
                    active = status_decision(&payload, now_ms);
                    authoritative = payload;
                }
                LookupOutcome::NotFound => breaker.record_detail(false, self.cfg.detail_not_found_stop),
                LookupOutcome::Other => {}
            }
        }

        // `entry`/`authoritative` is emitted as a multi-parent only when
        // *it* structurally owns children (the same-chain reconciliation
        // case); otherwise it is a plain single market, gated on activity
        // alone.
        let is_multi_parent = !child_list.is_empty();
        if is_multi_parent || active.unwrap_or(false) {
            if let Some(desc) = normalize(&authoritative, None, now_ms) {
                if seen_topics.insert(format!("{}#{}", desc.topic_id, desc.market_id)) {
                    out.push(desc.clone());
                    emit_children(&child_list, &desc, now_ms, &fallback_status, seen_topics, out);
                }
            }
        }

        // The alternate-chain parent is a second, independent emission: it
        // always has children (that is the only way this branch is
        // populated), so it is emitted unconditionally per spec §4.1 step 4,
        // with its own child list attached to its own `marketId`.
        if let Some(alt) = alt_chain_parent {
            let alt_fallback_status = alt.get("statusEnum").cloned();
            if let Some(alt_desc) = normalize(&alt, None, now_ms) {
                if seen_topics.insert(format!("{}#{}", alt_desc.topic_id, alt_desc.market_id)) {
                    out.push(alt_desc.clone());
                    emit_children(&alt_children, &alt_desc, now_ms, &alt_fallback_status, seen_topics, out);
                }
            }
        }
    }

    async fn lookup(
        &self,
        path: &str,
        topic_id: &str,
        cache: &mut LookupCache,
        select: impl Fn(&mut LookupCache) -> &mut HashMap<String, LookupOutcome>,
    ) -> LookupOutcome {
        if let Some(cached) = select(cache).get(topic_id) {
            return cached.clone();
        }

        let full_path = format!("{path}/{topic_id}");
        let result = match self.client.get(&full_path, &[]).await {
            Ok(v) if error_code(&v) == 0 => LookupOutcome::Found(v),
            Ok(v) if error_code(&v) == TOPIC_NOT_FOUND_CODE => LookupOutcome::NotFound,
            Ok(v) => {
                debug!(path = %full_path, code = error_code(&v), "lookup returned non-zero code");
                LookupOutcome::Other
            }
            Err(e) => {
                warn!(path = %full_path, "lookup fetch failed: {e}");
                LookupOutcome::Other
            }
        };
        select(cache).insert(topic_id.to_string(), result.clone());
        result
    }
}

fn emit_children(
    children: &[Value],
    parent: &MarketDescriptor,
    now_ms: i64,
    fallback_status: &Option<Value>,
    seen_topics: &mut HashSet<String>,
    out: &mut Vec<MarketDescriptor>,
) {
    for child in children {
        let active = status_decision(child, now_ms)
            .or_else(|| fallback_status.as_ref().and_then(|s| status_decision_from_status(s, child, now_ms)))
            .unwrap_or(false);
        if !active {
            continue;
        }
        if let Some(desc) = normalize(child, Some(parent.market_id), now_ms) {
            if seen_topics.insert(format!("{}#{}", desc.topic_id, desc.market_id)) {
                out.push(desc);
            }
        }
    }
}

/// `Some(bool)` if activation could be decided from `v` alone; `None` if no
/// status field is present at all.
fn status_decision(v: &Value, now_ms: i64) -> Option<bool> {
    let status_ok = raw_status_ok(v)?;
    Some(resolve_activity(v, status_ok, now_ms))
}

fn status_decision_from_status(status_source: &Value, v: &Value, now_ms: i64) -> Option<bool> {
    let wrapper = serde_json::json!({ "statusEnum": status_source });
    let status_ok = raw_status_ok(&wrapper)?;
    Some(resolve_activity(v, status_ok, now_ms))
}

fn raw_status_ok(v: &Value) -> Option<bool> {
    if let Some(s) = get_str(v, &["statusEnum"]) {
        return Some(s == "Activated");
    }
    get_numeric(v, &["status"]).map(|n| n as i64 == 2)
}

fn resolve_activity(v: &Value, status_ok: bool, now_ms: i64) -> bool {
    if !status_ok {
        return false;
    }
    let resolved_at = get_numeric(v, &["resolvedAt"]).unwrap_or(0.0) as i64;
    if resolved_at > 0 && resolved_at <= now_ms {
        return false;
    }
    let cutoff_at = get_numeric(v, &["cutoffAt"]).unwrap_or(0.0) as i64;
    if cutoff_at > 0 && cutoff_at <= now_ms {
        return false;
    }
    true
}

fn normalize(v: &Value, parent_market_id: Option<i64>, now_ms: i64) -> Option<MarketDescriptor> {
    let market_id = get_numeric(v, &["marketId", "topicId"])? as i64;
    let topic_id = get_str(v, &["topicId"]).unwrap_or_default().to_string();

    let has_children = v
        .get("childList")
        .and_then(|c| c.as_array())
        .map(|a| !a.is_empty())
        .unwrap_or(false);

    let market_type = if has_children {
        Some(MarketType::MultiParent)
    } else {
        match get_numeric(v, &["marketType", "topicType"]) {
            Some(n) if n as i64 == 1 => Some(MarketType::MultiParent),
            Some(_) => Some(MarketType::Single),
            None => None,
        }
    };

    let yes_token_id = get_str(v, &["yesTokenId", "yesPos"])
        .map(|s| s.to_string())
        .unwrap_or_else(|| {
            if market_type == Some(MarketType::MultiParent) {
                MarketDescriptor::placeholder_token(market_id)
            } else {
                String::new()
            }
        });

    let title = get_str(v, &["marketTitle", "title"])
        .map(|s| s.to_string())
        .unwrap_or_else(|| format!("market-{market_id}"));

    let chain_id = get_numeric(v, &["chainId"]).map(|n| n as i64);
    let cutoff_at = get_numeric(v, &["cutoffAt"]).map(|n| n as i64);

    let desc = MarketDescriptor {
        market_id,
        yes_token_id,
        title,
        parent_market_id,
        topic_id,
        market_type,
        chain_id,
        cutoff_at,
        updated_at: now_ms,
    };

    if desc.is_valid() {
        Some(desc)
    } else {
        None
    }
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;

    use crate::error::Result as AppResult;

    fn cfg() -> Config {
        Config {
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
            page_size: 100,
            page_workers: 16,
            detail_not_found_stop: 5,
            multi_not_found_stop: 5,
            alert_title_blocklist: vec![],
            alert_title_blocklist_regex: None,
            blackout_minute_ranges: vec![(56, 60), (26, 32)],
        }
    }

    /// Serves a canned response for the multi-outcome endpoint and a bare
    /// "not found" for everything else (detail lookups are never reached in
    /// the scenario below since the entry's own `statusEnum` already decides
    /// activation).
    struct MultiOnlyClient {
        multi: Value,
    }

    #[async_trait]
    impl UpstreamClient for MultiOnlyClient {
        async fn get(&self, path: &str, _params: &[(&str, String)]) -> AppResult<Value> {
            if path.starts_with(PATH_MULTI) {
                Ok(self.multi.clone())
            } else {
                Ok(json!({"errno": TOPIC_NOT_FOUND_CODE}))
            }
        }
    }

    /// Spec §8 scenario 5: a list entry on chain A with no children, whose
    /// `topicId` the multi endpoint resolves to a *different* chain (B) that
    /// does have children. Both the chain-A entry and the chain-B parent must
    /// be emitted, and the children must be attached to the chain-B parent —
    /// never to the chain-A entry.
    #[tokio::test]
    async fn multi_parent_on_different_chain_emits_both_and_attaches_children_to_alt_parent() {
        let entry = json!({
            "marketId": 100,
            "topicId": "T",
            "chainId": 1,
            "statusEnum": "Activated",
            "yesTokenId": "tok100",
        });
        let multi = json!({
            "marketId": 200,
            "topicId": "T",
            "chainId": 2,
            "statusEnum": "Activated",
            "childList": [
                {"marketId": 101, "topicId": "T", "statusEnum": "Activated", "yesTokenId": "tok101"},
                {"marketId": 102, "topicId": "T", "statusEnum": "Activated", "yesTokenId": "tok102"},
            ],
        });

        let client = MultiOnlyClient { multi };
        let config = cfg();
        let walker = Walker::new(&client, &config);

        let mut breaker = CircuitBreaker::default();
        let mut cache = LookupCache::default();
        let mut seen_topics = HashSet::new();
        let mut out = Vec::new();

        walker
            .reconcile_entry(&entry, 1000, &mut breaker, &mut cache, &mut seen_topics, &mut out)
            .await;

        let by_id = |id: i64| out.iter().find(|d| d.market_id == id);

        let original = by_id(100).expect("chain-A entry emitted");
        assert_eq!(original.parent_market_id, None);
        assert_eq!(original.chain_id, Some(1));

        let alt_parent = by_id(200).expect("chain-B multi-parent emitted");
        assert_eq!(alt_parent.parent_market_id, None);
        assert_eq!(alt_parent.chain_id, Some(2));
        assert_eq!(alt_parent.market_type, Some(MarketType::MultiParent));

        let child1 = by_id(101).expect("child 101 emitted");
        let child2 = by_id(102).expect("child 102 emitted");
        assert_eq!(child1.parent_market_id, Some(200));
        assert_eq!(child2.parent_market_id, Some(200));

        assert_eq!(out.len(), 4);
    }

    #[test]
    fn normalize_falls_back_to_placeholder_token_for_multi_parent() {
        let v = json!({"marketId": 7, "topicId": "T7", "childList": [{"marketId": 71}]});
        let desc = normalize(&v, None, 0).unwrap();
        assert_eq!(desc.yes_token_id, "multi-parent-7");
        assert_eq!(desc.market_type, Some(MarketType::MultiParent));
    }

    #[test]
    fn normalize_rejects_single_market_with_no_token() {
        let v = json!({"marketId": 8, "topicId": "T8"});
        assert!(normalize(&v, None, 0).is_none());
    }

    #[test]
    fn status_decision_honors_numeric_fallback() {
        let v = json!({"status": 2});
        assert_eq!(status_decision(&v, 1000), Some(true));
    }

    #[test]
    fn status_decision_none_without_any_status_field() {
        let v = json!({"marketId": 1});
        assert_eq!(status_decision(&v, 1000), None);
    }

    #[test]
    fn resolved_before_now_is_inactive() {
        let v = json!({"statusEnum": "Activated", "resolvedAt": 500});
        assert_eq!(status_decision(&v, 1000), Some(false));
    }

    #[test]
    fn cutoff_in_future_is_active() {
        let v = json!({"statusEnum": "Activated", "cutoffAt": 5000});
        assert_eq!(status_decision(&v, 1000), Some(true));
    }
}
