//! Online exponentially-weighted moving average estimator. No allocation, no
//! I/O — pure state transitions over `EwmaState`, so the decision logic in
//! `trigger.rs` can unit test it without a store.

use crate::config::EWMA_SPAN;
use crate::types::{EwmaState, Tick};

pub fn alpha() -> f64 {
    2.0 / (EWMA_SPAN + 1.0)
}

/// `d := x - mean; mean' := mean + a*d; var' := (1-a)*(var + a*d^2)`.
fn update_scalar(mean: f64, var: f64, x: f64, a: f64) -> (f64, f64) {
    let d = x - mean;
    let mean_next = mean + a * d;
    let var_next = (1.0 - a) * (var + a * d * d);
    (mean_next, var_next)
}

/// Applies one online update to both price and delta-volume tracks.
/// `lastPrice` is overwritten to the observation, not to the new mean.
pub fn update(state: EwmaState, price: f64, delta_volume: f64) -> EwmaState {
    let a = alpha();
    let (price_mean, price_var) = update_scalar(state.price_mean, state.price_var, price, a);
    let (volume_mean, volume_var) =
        update_scalar(state.volume_mean, state.volume_var, delta_volume, a);
    EwmaState {
        price_mean,
        price_var,
        volume_mean,
        volume_var,
        last_price: price,
        tick_count: state.tick_count + 1,
    }
}

/// Seeds a fresh estimator from filtered-tick history, oldest first. The
/// first observation initializes the mean with zero variance; every
/// subsequent observation applies the ordinary online update.
pub fn seed(ticks: &[Tick]) -> EwmaState {
    let mut iter = ticks.iter();
    let Some(first) = iter.next() else {
        return EwmaState::ZERO;
    };
    let mut state = EwmaState {
        price_mean: first.yes_price,
        price_var: 0.0,
        volume_mean: first.delta_volume,
        volume_var: 0.0,
        last_price: first.yes_price,
        tick_count: 1,
    };
    for tick in iter {
        state = update(state, tick.yes_price, tick.delta_volume);
    }
    state
}

/// Z-score of `x` against pre-update `(mean, var)`, with a noise floor on
/// the standard deviation to avoid blowing up on near-constant series.
pub fn z_score(mean: f64, var: f64, min_std: f64, x: f64) -> f64 {
    let sigma = var.sqrt().max(min_std);
    (x - mean) / sigma
}

/// `score := |z_price| * (1 + max(0, z_vol - 1) * beta)`.
pub fn adjusted_score(price_z: f64, volume_z: f64, beta: f64) -> f64 {
    let boost = 1.0 + (volume_z - 1.0).max(0.0) * beta;
    price_z.abs() * boost
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tick(price: f64, delta_volume: f64) -> Tick {
        Tick { market_id: 1, ts: 0, yes_price: price, volume: delta_volume, delta_volume }
    }

    #[test]
    fn seed_initializes_mean_with_zero_variance_then_updates() {
        let ticks = vec![tick(0.5, 5.0), tick(0.5, 5.0), tick(0.51, 6.0)];
        let state = seed(&ticks);
        assert_eq!(state.tick_count, 3);
        assert_eq!(state.last_price, 0.51);
        assert!(state.price_var >= 0.0);
    }

    #[test]
    fn update_is_deterministic_and_counts_ticks() {
        let s0 = EwmaState::ZERO;
        let s1 = update(s0, 0.5, 10.0);
        let s2 = update(s1, 0.5, 10.0);
        assert_eq!(s1.tick_count, 1);
        assert_eq!(s2.tick_count, 2);
        assert_eq!(s1.last_price, 0.5);
    }

    #[test]
    fn z_score_applies_noise_floor() {
        let z = z_score(0.5, 0.0, 0.005, 0.51);
        assert!((z - 2.0).abs() < 1e-9);
    }

    #[test]
    fn adjusted_score_boosts_only_above_unit_volume_z() {
        let base = adjusted_score(3.0, 0.5, 0.25);
        assert!((base - 3.0).abs() < 1e-9);
        let boosted = adjusted_score(3.0, 2.0, 0.25);
        assert!(boosted > base);
    }
}
