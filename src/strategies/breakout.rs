// =============================================================================
// Breakout strategy — close clears the prior Donchian upper band on volume
// =============================================================================

use std::collections::HashMap;

use crate::config::StrategiesConfig;
use crate::indicators::atr::calculate_atr;
use crate::indicators::donchian::prior_donchian;
use crate::market_data::Candle;

use super::{StrategyOutput, StrategySignal};

pub const STRATEGY_ID: &str = "breakout";

const ATR_PERIOD: usize = 14;
const STOP_ATR_MULTIPLE: f64 = 1.5;
const TAKE_PROFIT_ATR_MULTIPLE: f64 = 2.5;
/// Breakout volume must exceed the lookback window's average volume by this
/// factor, otherwise a thin-volume poke through the band is ignored.
const VOLUME_CONFIRMATION_MULTIPLE: f64 = 1.2;

/// Enter long when the latest close clears the Donchian upper band computed
/// from the `breakout_lookback` candles *prior* to it (see
/// `indicators::donchian::prior_donchian` — excluding the breakout bar from
/// its own reference band), confirmed by above-average volume on the
/// breakout bar so a low-conviction wick-through is not treated as a signal.
pub fn evaluate(candles: &[Candle], symbol: &str, timeframe: &str, config: &StrategiesConfig) -> StrategyOutput {
    let lookback = config.breakout_lookback;
    let min_candles = (lookback + 1).max(ATR_PERIOD + 1);
    if candles.len() < min_candles {
        return StrategyOutput::insufficient_data(STRATEGY_ID, symbol, timeframe);
    }

    let donchian = match prior_donchian(candles, lookback) {
        Some(v) => v,
        None => return StrategyOutput::insufficient_data(STRATEGY_ID, symbol, timeframe),
    };
    let atr = match calculate_atr(candles, ATR_PERIOD) {
        Some(v) => v,
        None => return StrategyOutput::insufficient_data(STRATEGY_ID, symbol, timeframe),
    };

    let last = &candles[candles.len() - 1];
    let window = &candles[candles.len() - 1 - lookback..candles.len() - 1];
    let avg_volume: f64 = window.iter().map(|c| c.volume).sum::<f64>() / lookback as f64;

    let mut rationale = HashMap::new();
    rationale.insert("donchian_upper".to_string(), donchian.upper);
    rationale.insert("avg_volume".to_string(), avg_volume);
    rationale.insert("breakout_volume".to_string(), last.volume);
    rationale.insert("atr".to_string(), atr);

    let cleared_band = last.close > donchian.upper;
    let volume_confirmed = avg_volume > 0.0 && last.volume >= avg_volume * VOLUME_CONFIRMATION_MULTIPLE;

    if cleared_band && volume_confirmed {
        let clearance = ((last.close - donchian.upper) / donchian.upper).abs();
        let confidence = (clearance * 20.0).clamp(0.3, 1.0);
        StrategyOutput {
            strategy_id: STRATEGY_ID,
            symbol: symbol.to_string(),
            timeframes_used: vec![timeframe.to_string()],
            signal: StrategySignal::EnterLong,
            confidence,
            suggested_entry: Some(last.close),
            suggested_stop: Some(last.close - atr * STOP_ATR_MULTIPLE),
            suggested_take_profit: Some(last.close + atr * TAKE_PROFIT_ATR_MULTIPLE),
            rationale,
        }
    } else {
        StrategyOutput {
            strategy_id: STRATEGY_ID,
            symbol: symbol.to_string(),
            timeframes_used: vec![timeframe.to_string()],
            signal: StrategySignal::NoTrade,
            confidence: 0.0,
            suggested_entry: None,
            suggested_stop: None,
            suggested_take_profit: None,
            rationale,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> StrategiesConfig {
        StrategiesConfig {
            trend_adx_threshold: 25.0,
            mean_reversion_rsi_oversold: 30.0,
            breakout_lookback: 20,
        }
    }

    fn candle(close: f64, volume: f64) -> Candle {
        Candle {
            open_time: 0,
            close_time: 0,
            open: close,
            high: close + 0.5,
            low: close - 0.5,
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
    fn insufficient_data_is_no_trade() {
        let candles = vec![candle(100.0, 10.0); 5];
        let out = evaluate(&candles, "BTCUSDT", "5m", &config());
        assert_eq!(out.signal, StrategySignal::NoTrade);
    }

    #[test]
    fn range_bound_then_volume_breakout_enters_long() {
        let mut candles: Vec<Candle> = (0..30).map(|_| candle(100.0, 10.0)).collect();
        candles.push(candle(110.0, 30.0));
        let out = evaluate(&candles, "BTCUSDT", "5m", &config());
        assert_eq!(out.signal, StrategySignal::EnterLong);
    }

    #[test]
    fn breakout_without_volume_confirmation_is_no_trade() {
        let mut candles: Vec<Candle> = (0..30).map(|_| candle(100.0, 10.0)).collect();
        candles.push(candle(110.0, 10.0));
        let out = evaluate(&candles, "BTCUSDT", "5m", &config());
        assert_eq!(out.signal, StrategySignal::NoTrade);
    }
}
