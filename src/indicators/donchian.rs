// =============================================================================
// Donchian Channel
// =============================================================================
//
// Donchian high/low are the rolling extremes of price over a lookback
// window: upper = max(high) over the window, lower = min(low) over the
// window, middle = (upper + lower) / 2. The Breakout strategy compares the
// latest close against the *prior* window's upper band (i.e. excluding the
// current bar) to detect a genuine breakout rather than the bar that simply
// contains its own extreme.

use crate::market_data::Candle;

/// Result of a Donchian channel calculation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DonchianResult {
    pub upper: f64,
    pub lower: f64,
    pub middle: f64,
}

/// Compute the Donchian channel over the trailing `period` candles
/// (inclusive of the most recent one).
///
/// Returns `None` when there are fewer than `period` candles or `period == 0`.
pub fn calculate_donchian(candles: &[Candle], period: usize) -> Option<DonchianResult> {
    if period == 0 || candles.len() < period {
        return None;
    }

    let window = &candles[candles.len() - period..];
    let upper = window.iter().map(|c| c.high).fold(f64::MIN, f64::max);
    let lower = window.iter().map(|c| c.low).fold(f64::MAX, f64::min);

    if !upper.is_finite() || !lower.is_finite() {
        return None;
    }

    Some(DonchianResult {
        upper,
        lower,
        middle: (upper + lower) / 2.0,
    })
}

/// Compute the Donchian channel using the `period` candles *prior* to the
/// most recent one — the reference band a breakout must clear.
///
/// Returns `None` when there are fewer than `period + 1` candles.
pub fn prior_donchian(candles: &[Candle], period: usize) -> Option<DonchianResult> {
    if period == 0 || candles.len() < period + 1 {
        return None;
    }
    calculate_donchian(&candles[..candles.len() - 1], period)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candle(high: f64, low: f64, close: f64) -> Candle {
        Candle {
            open_time: 0,
            close_time: 0,
            open: close,
            high,
            low,
            close,
            volume: 1.0,
            quote_volume: 1.0,
            trades_count: 1,
            taker_buy_volume: 0.5,
            taker_buy_quote_volume: 0.5,
            is_closed: true,
        }
    }

    #[test]
    fn donchian_insufficient_data() {
        let candles = vec![candle(10.0, 9.0, 9.5); 3];
        assert!(calculate_donchian(&candles, 5).is_none());
    }

    #[test]
    fn donchian_tracks_extremes() {
        let candles = vec![
            candle(10.0, 8.0, 9.0),
            candle(12.0, 9.0, 11.0),
            candle(11.0, 7.0, 9.0),
        ];
        let dc = calculate_donchian(&candles, 3).unwrap();
        assert_eq!(dc.upper, 12.0);
        assert_eq!(dc.lower, 7.0);
        assert_eq!(dc.middle, 9.5);
    }

    #[test]
    fn prior_donchian_excludes_latest_bar() {
        let candles = vec![
            candle(10.0, 8.0, 9.0),
            candle(12.0, 9.0, 11.0),
            candle(20.0, 15.0, 19.0), // breakout bar, must not count toward its own reference band
        ];
        let prior = prior_donchian(&candles, 2).unwrap();
        assert_eq!(prior.upper, 12.0);
        assert_eq!(prior.lower, 8.0);
    }
}
