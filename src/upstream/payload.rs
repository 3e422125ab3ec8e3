//! Permissive extraction helpers for the venue's polymorphic JSON envelopes.
//!
//! Responses nest the real payload under an optional `result` or `data` key,
//! numeric fields sometimes arrive as strings, and field names vary between
//! snake_case and camelCase across endpoints. These helpers centralize the
//! coercion so callers never hand-roll a `.get().and_then()` chain twice.

use serde_json::Value;

/// Peel off up to two levels of `result` / `data` envelope wrapping and
/// return the innermost value. Falls back to the input unchanged if neither
/// key is present.
pub fn unwrap_envelope(v: &Value) -> &Value {
    let mut cur = v;
    for _ in 0..2 {
        if let Some(inner) = cur.get("result").or_else(|| cur.get("data")) {
            cur = inner;
        } else {
            break;
        }
    }
    cur
}

/// Application-level error code, `errno` or `code`. 0 = success, absent = success.
pub fn error_code(v: &Value) -> i64 {
    v.get("errno")
        .or_else(|| v.get("code"))
        .and_then(numeric_of)
        .unwrap_or(0) as i64
}

/// First present key among `keys`, coerced to f64 whether it arrived as a
/// JSON number or a numeric string.
pub fn get_numeric(v: &Value, keys: &[&str]) -> Option<f64> {
    keys.iter().find_map(|k| v.get(k).and_then(numeric_of))
}

/// First present key among `keys`, as a borrowed string.
pub fn get_str<'a>(v: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter().find_map(|k| v.get(k).and_then(|x| x.as_str()))
}

fn numeric_of(v: &Value) -> Option<f64> {
    v.as_f64().or_else(|| v.as_str().and_then(|s| s.parse::<f64>().ok()))
}

/// Centralized timestamp coercion: any value `< 10^12` is seconds since
/// epoch and is multiplied by 1000. Applies uniformly to server time,
/// orderbook timestamps, and persisted tick timestamps (design note: this
/// rule previously diverged per call site — see DESIGN.md).
pub fn coerce_ms_timestamp(raw: f64) -> i64 {
    if raw < 1e12 {
        (raw * 1000.0) as i64
    } else {
        raw as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unwraps_result_then_data() {
        let v = json!({"result": {"data": {"x": 1}}});
        assert_eq!(unwrap_envelope(&v), &json!({"x": 1}));
    }

    #[test]
    fn unwraps_bare_data() {
        let v = json!({"data": {"x": 1}});
        assert_eq!(unwrap_envelope(&v), &json!({"x": 1}));
    }

    #[test]
    fn passes_through_when_no_envelope() {
        let v = json!({"x": 1});
        assert_eq!(unwrap_envelope(&v), &json!({"x": 1}));
    }

    #[test]
    fn error_code_prefers_errno() {
        let v = json!({"errno": 10200, "code": 1});
        assert_eq!(error_code(&v), 10200);
    }

    #[test]
    fn error_code_defaults_zero() {
        assert_eq!(error_code(&json!({})), 0);
    }

    #[test]
    fn numeric_coerces_string() {
        let v = json!({"last_price": "0.42"});
        assert_eq!(get_numeric(&v, &["last_price"]), Some(0.42));
    }

    #[test]
    fn numeric_falls_back_through_keys() {
        let v = json!({"time": 123});
        assert_eq!(get_numeric(&v, &["timestamp", "time", "ts"]), Some(123.0));
    }

    #[test]
    fn seconds_are_multiplied_to_millis() {
        assert_eq!(coerce_ms_timestamp(1_700_000_000.0), 1_700_000_000_000);
    }

    #[test]
    fn millis_pass_through() {
        assert_eq!(coerce_ms_timestamp(1_700_000_000_000.0), 1_700_000_000_000);
    }
}
