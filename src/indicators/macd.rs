// =============================================================================
// Moving Average Convergence Divergence (MACD)
// =============================================================================
//
// MACD line = EMA(fast) - EMA(slow), aligned on their common tail.
// Signal line = EMA(signal_period) of the MACD line.
// Histogram = MACD line - signal line.

use super::ema::calculate_ema;

/// One point of the MACD series.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MacdPoint {
    pub macd: f64,
    pub signal: f64,
    pub histogram: f64,
}

/// Compute the full MACD series for `closes`.
///
/// Returns an empty `Vec` when there isn't enough data to produce at least
/// one signal-line value (i.e. fewer than `slow_period + signal_period - 1`
/// usable closes), or when any period is zero.
pub fn calculate_macd(
    closes: &[f64],
    fast_period: usize,
    slow_period: usize,
    signal_period: usize,
) -> Vec<MacdPoint> {
    if fast_period == 0 || slow_period == 0 || signal_period == 0 || fast_period >= slow_period {
        return Vec::new();
    }

    let fast_ema = calculate_ema(closes, fast_period);
    let slow_ema = calculate_ema(closes, slow_period);
    if slow_ema.is_empty() {
        return Vec::new();
    }

    // fast_ema starts `slow_period - fast_period` bars earlier than slow_ema;
    // align both series on their common tail before differencing.
    let offset = fast_ema.len() - slow_ema.len();
    let macd_line: Vec<f64> = fast_ema[offset..]
        .iter()
        .zip(slow_ema.iter())
        .map(|(f, s)| f - s)
        .collect();

    let signal_line = calculate_ema(&macd_line, signal_period);
    if signal_line.is_empty() {
        return Vec::new();
    }

    let macd_offset = macd_line.len() - signal_line.len();
    macd_line[macd_offset..]
        .iter()
        .zip(signal_line.iter())
        .map(|(m, s)| MacdPoint {
            macd: *m,
            signal: *s,
            histogram: m - s,
        })
        .collect()
}

/// Most recent MACD point, or `None` if there isn't enough data.
pub fn current_macd(
    closes: &[f64],
    fast_period: usize,
    slow_period: usize,
    signal_period: usize,
) -> Option<MacdPoint> {
    calculate_macd(closes, fast_period, slow_period, signal_period)
        .last()
        .copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn macd_insufficient_data() {
        let closes: Vec<f64> = (1..=10).map(|x| x as f64).collect();
        assert!(calculate_macd(&closes, 12, 26, 9).is_empty());
    }

    #[test]
    fn macd_fast_must_be_less_than_slow() {
        let closes: Vec<f64> = (1..=50).map(|x| x as f64).collect();
        assert!(calculate_macd(&closes, 26, 12, 9).is_empty());
    }

    #[test]
    fn macd_produces_points_with_enough_data() {
        let closes: Vec<f64> = (1..=60).map(|x| x as f64).collect();
        let macd = calculate_macd(&closes, 12, 26, 9);
        assert!(!macd.is_empty());
        for p in &macd {
            assert!((p.histogram - (p.macd - p.signal)).abs() < 1e-9);
        }
    }

    #[test]
    fn macd_on_strict_uptrend_is_positive() {
        // a steady uptrend keeps the fast EMA above the slow EMA throughout.
        let closes: Vec<f64> = (1..=60).map(|x| x as f64).collect();
        let last = current_macd(&closes, 12, 26, 9).unwrap();
        assert!(last.macd > 0.0);
    }
}
