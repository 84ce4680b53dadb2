use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

use crate::domain::candle::Candle;

/// Result of one ordinary-least-squares fit over a window of closes
/// (`spec.md` §4.3). `std_dev` is the *population* standard deviation of
/// the residuals (divisor `L`, not `L-1` — pinned per §9's open question).
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RegressionResult {
    pub slope: f64,
    pub intercept: f64,
    pub r_value: f64,
    pub std_dev: f64,
    pub timestamp: f64,
}

/// Fits `y = close(candles[i])` against `x = 0..len-1` (ascending-time
/// order expected from the caller). Returns `None` for degenerate input
/// (`L < 2` or `L > 1000`), in which case the caller skips this lookback.
pub fn fit(candles_ascending: &[Candle]) -> Option<RegressionResult> {
    let l = candles_ascending.len();
    if l < 2 || l > 1000 {
        return None;
    }
    let n = l as f64;

    let xs: Vec<f64> = (0..l).map(|i| i as f64).collect();
    let ys: Vec<f64> = candles_ascending.iter().map(|c| c.close).collect();

    let sum_x: f64 = xs.iter().sum();
    let sum_y: f64 = ys.iter().sum();
    let sum_xy: f64 = xs.iter().zip(&ys).map(|(x, y)| x * y).sum();
    let sum_xx: f64 = xs.iter().map(|x| x * x).sum();
    let sum_yy: f64 = ys.iter().map(|y| y * y).sum();

    let denom = n * sum_xx - sum_x * sum_x;
    let slope = if denom.abs() < f64::EPSILON { 0.0 } else { (n * sum_xy - sum_x * sum_y) / denom };
    let intercept = (sum_y - slope * sum_x) / n;

    let r_denom = ((n * sum_xx - sum_x * sum_x) * (n * sum_yy - sum_y * sum_y)).sqrt();
    let r_value = if r_denom.abs() < f64::EPSILON {
        0.0
    } else {
        (n * sum_xy - sum_x * sum_y) / r_denom
    };

    let residual_sum_sq: f64 = xs
        .iter()
        .zip(&ys)
        .map(|(x, y)| {
            let e = y - (intercept + slope * x);
            e * e
        })
        .sum();
    let std_dev = (residual_sum_sq / n).sqrt();

    Some(RegressionResult {
        slope,
        intercept,
        r_value,
        std_dev,
        timestamp: now_seconds(),
    })
}

fn now_seconds() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is after the epoch")
        .as_secs_f64()
}

/// Selects lookback `k`'s window from a newest-first candle series, then
/// fits the kernel over it in ascending order (`spec.md` §4.6's
/// "reversing to ascending for the kernel"). Returns `None` if the window
/// would exceed the available candles — that lookback is silently omitted.
pub fn fit_lookback(all_newest_first: &[Candle], k: u32, length: u32) -> Option<RegressionResult> {
    let k = k as usize;
    let length = length as usize;
    if k + length > all_newest_first.len() {
        return None;
    }
    let window_newest_first = &all_newest_first[k..k + length];
    let ascending: Vec<Candle> = window_newest_first.iter().rev().copied().collect();
    fit(&ascending)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candle_close(c: f64) -> Candle {
        Candle { open: c, high: c, low: c, close: c, volume: 0, unix_timestamp: 0.0 }
    }

    #[test]
    fn scenario_4_perfectly_linear_series() {
        let candles: Vec<Candle> = [1.0, 2.0, 3.0, 4.0, 5.0].iter().map(|&c| candle_close(c)).collect();
        let result = fit(&candles).unwrap();
        assert!((result.slope - 1.0).abs() < 1e-9);
        assert!((result.intercept - 1.0).abs() < 1e-9);
        assert!((result.r_value - 1.0).abs() < 1e-9);
        assert!(result.std_dev.abs() < 1e-9);
    }

    #[test]
    fn constant_series_has_zero_slope_and_zero_r() {
        let candles: Vec<Candle> = std::iter::repeat(candle_close(42.0)).take(5).collect();
        let result = fit(&candles).unwrap();
        assert_eq!(result.slope, 0.0);
        assert_eq!(result.r_value, 0.0);
        assert_eq!(result.std_dev, 0.0);
    }

    #[test]
    fn degenerate_lengths_are_skipped() {
        assert!(fit(&[candle_close(1.0)]).is_none());
        let too_long: Vec<Candle> = std::iter::repeat(candle_close(1.0)).take(1001).collect();
        assert!(fit(&too_long).is_none());
    }

    #[test]
    fn lookback_out_of_range_is_omitted() {
        let candles: Vec<Candle> = (0..10).map(|i| candle_close(i as f64)).collect();
        assert!(fit_lookback(&candles, 5, 10).is_none());
        assert!(fit_lookback(&candles, 0, 10).is_some());
    }

    #[test]
    fn scenario_6_lookback_0_and_5_both_present() {
        let candles: Vec<Candle> = (0..30).map(|i| candle_close(100.0 + i as f64)).collect();
        assert!(fit_lookback(&candles, 0, 20).is_some());
        assert!(fit_lookback(&candles, 5, 20).is_some());
    }
}
