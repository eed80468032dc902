// =============================================================================
// On-Balance Volume (OBV)
// =============================================================================
//
// Running total of volume: add the bar's volume when close > prior close,
// subtract it when close < prior close, carry forward unchanged on a tie.
// The first bar contributes no direction and seeds the running total at 0.

use crate::market_data::Candle;

/// Compute the OBV series for `candles`, one value per candle.
///
/// Returns an empty `Vec` if `candles` is empty.
pub fn calculate_obv(candles: &[Candle]) -> Vec<f64> {
    if candles.is_empty() {
        return Vec::new();
    }

    let mut result = Vec::with_capacity(candles.len());
    let mut obv = 0.0;
    result.push(obv);

    for pair in candles.windows(2) {
        let (prev, cur) = (&pair[0], &pair[1]);
        if cur.close > prev.close {
            obv += cur.volume;
        } else if cur.close < prev.close {
            obv -= cur.volume;
        }
        result.push(obv);
    }

    result
}

/// Most recent OBV value, or `None` for empty input.
pub fn current_obv(candles: &[Candle]) -> Option<f64> {
    calculate_obv(candles).last().copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candle(close: f64, volume: f64) -> Candle {
        Candle {
            open_time: 0,
            close_time: 0,
            open: close,
            high: close,
            low: close,
            close,
            volume,
            quote_volume: volume * close,
            trades_count: 1,
            taker_buy_volume: volume / 2.0,
            taker_buy_quote_volume: volume * close / 2.0,
            is_closed: true,
        }
    }

    #[test]
    fn obv_empty_input() {
        assert!(calculate_obv(&[]).is_empty());
    }

    #[test]
    fn obv_single_candle_is_zero() {
        let candles = vec![candle(10.0, 100.0)];
        assert_eq!(calculate_obv(&candles), vec![0.0]);
    }

    #[test]
    fn obv_accumulates_direction() {
        let candles = vec![
            candle(10.0, 100.0), // seed, obv = 0
            candle(11.0, 50.0),  // up, obv = 50
            candle(9.0, 30.0),   // down, obv = 20
            candle(9.0, 40.0),   // flat, obv = 20
        ];
        assert_eq!(calculate_obv(&candles), vec![0.0, 50.0, 20.0, 20.0]);
    }

    #[test]
    fn current_obv_matches_last() {
        let candles = vec![candle(10.0, 100.0), candle(11.0, 50.0)];
        assert_eq!(current_obv(&candles), Some(50.0));
    }
}
