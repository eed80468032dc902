// =============================================================================
// Volume Weighted Average Price (VWAP)
// =============================================================================
//
// VWAP weights each bar's typical price ((high+low+close)/3) by its volume,
// accumulated from the start of the supplied candle slice. Callers are
// responsible for passing only the candles belonging to the session/window
// they want VWAP anchored to (e.g. the current UTC day) — this function does
// not itself perform any session reset.

use crate::market_data::Candle;

/// Compute the running VWAP series over `candles`, one value per input candle.
///
/// Returns an empty `Vec` if `candles` is empty or cumulative volume never
/// becomes positive (all-zero-volume input).
pub fn calculate_vwap(candles: &[Candle]) -> Vec<f64> {
    if candles.is_empty() {
        return Vec::new();
    }

    let mut result = Vec::with_capacity(candles.len());
    let mut cum_pv = 0.0;
    let mut cum_vol = 0.0;

    for c in candles {
        let typical = (c.high + c.low + c.close) / 3.0;
        cum_pv += typical * c.volume;
        cum_vol += c.volume;

        if cum_vol <= 0.0 {
            break;
        }
        let vwap = cum_pv / cum_vol;
        if !vwap.is_finite() {
            break;
        }
        result.push(vwap);
    }

    result
}

/// Most recent VWAP value anchored to the start of `candles`, or `None` if
/// it cannot be computed (empty input or zero cumulative volume).
pub fn current_vwap(candles: &[Candle]) -> Option<f64> {
    calculate_vwap(candles).last().copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candle(high: f64, low: f64, close: f64, volume: f64) -> Candle {
        Candle {
            open_time: 0,
            close_time: 0,
            open: close,
            high,
            low,
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
    fn vwap_empty_input() {
        assert!(calculate_vwap(&[]).is_empty());
    }

    #[test]
    fn vwap_zero_volume_yields_nothing() {
        let candles = vec![candle(10.0, 9.0, 9.5, 0.0); 3];
        assert!(calculate_vwap(&candles).is_empty());
    }

    #[test]
    fn vwap_known_values() {
        // bar 1: typical = (11+9+10)/3 = 10.0, volume 2 -> cum_pv=20, cum_vol=2 -> vwap=10.0
        // bar 2: typical = (13+11+12)/3 = 12.0, volume 1 -> cum_pv=32, cum_vol=3 -> vwap=32/3
        let candles = vec![candle(11.0, 9.0, 10.0, 2.0), candle(13.0, 11.0, 12.0, 1.0)];
        let vwap = calculate_vwap(&candles);
        assert_eq!(vwap.len(), 2);
        assert!((vwap[0] - 10.0).abs() < 1e-10);
        assert!((vwap[1] - 32.0 / 3.0).abs() < 1e-10);
    }

    #[test]
    fn current_vwap_matches_last() {
        let candles = vec![candle(11.0, 9.0, 10.0, 2.0), candle(13.0, 11.0, 12.0, 1.0)];
        assert_eq!(current_vwap(&candles), calculate_vwap(&candles).last().copied());
    }
}
