// =============================================================================
// Trend strategy — EMA crossover confirmed by ADX trend strength
// =============================================================================
//
// New strategy module; no direct teacher analogue (`strategy.rs` inlines one
// monolithic scorer rather than per-strategy modules) but reuses the
// teacher's indicator layer wholesale. Shape follows `StrategyOutput`'s
// contract in `strategies/mod.rs`.

use std::collections::HashMap;

use crate::config::StrategiesConfig;
use crate::indicators::adx::calculate_adx;
use crate::indicators::atr::calculate_atr;
use crate::indicators::ema::calculate_ema;
use crate::market_data::Candle;

use super::{StrategyOutput, StrategySignal};

pub const STRATEGY_ID: &str = "trend";

const FAST_PERIOD: usize = 12;
const SLOW_PERIOD: usize = 26;
const ADX_PERIOD: usize = 14;
const ATR_PERIOD: usize = 14;
const STOP_ATR_MULTIPLE: f64 = 1.5;
const TAKE_PROFIT_ATR_MULTIPLE: f64 = 3.0;

/// Enter long when the fast EMA is above the slow EMA (an established
/// uptrend) and ADX confirms the trend is strong enough to be worth riding,
/// not just noise. Stop and take-profit are sized off ATR so both scale with
/// the symbol's current volatility.
pub fn evaluate(candles: &[Candle], symbol: &str, timeframe: &str, config: &StrategiesConfig) -> StrategyOutput {
    let min_candles = SLOW_PERIOD.max(2 * ADX_PERIOD + 1).max(ATR_PERIOD + 1);
    if candles.len() < min_candles {
        return StrategyOutput::insufficient_data(STRATEGY_ID, symbol, timeframe);
    }

    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();

    let fast_ema = match calculate_ema(&closes, FAST_PERIOD).last().copied() {
        Some(v) => v,
        None => return StrategyOutput::insufficient_data(STRATEGY_ID, symbol, timeframe),
    };
    let slow_ema = match calculate_ema(&closes, SLOW_PERIOD).last().copied() {
        Some(v) => v,
        None => return StrategyOutput::insufficient_data(STRATEGY_ID, symbol, timeframe),
    };
    let adx = match calculate_adx(candles, ADX_PERIOD) {
        Some(v) => v,
        None => return StrategyOutput::insufficient_data(STRATEGY_ID, symbol, timeframe),
    };
    let atr = match calculate_atr(candles, ATR_PERIOD) {
        Some(v) => v,
        None => return StrategyOutput::insufficient_data(STRATEGY_ID, symbol, timeframe),
    };

    let last_close = candles[candles.len() - 1].close;
    let mut rationale = HashMap::new();
    rationale.insert("fast_ema".to_string(), fast_ema);
    rationale.insert("slow_ema".to_string(), slow_ema);
    rationale.insert("adx".to_string(), adx);
    rationale.insert("atr".to_string(), atr);

    let trending_up = fast_ema > slow_ema;
    let strong_enough = adx >= config.trend_adx_threshold;

    if trending_up && strong_enough {
        let separation = ((fast_ema - slow_ema) / slow_ema).abs();
        let confidence = (separation * 10.0 + (adx / 100.0)).min(1.0);
        StrategyOutput {
            strategy_id: STRATEGY_ID,
            symbol: symbol.to_string(),
            timeframes_used: vec![timeframe.to_string()],
            signal: StrategySignal::EnterLong,
            confidence,
            suggested_entry: Some(last_close),
            suggested_stop: Some(last_close - atr * STOP_ATR_MULTIPLE),
            suggested_take_profit: Some(last_close + atr * TAKE_PROFIT_ATR_MULTIPLE),
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

    fn candle(close: f64) -> Candle {
        Candle {
            open_time: 0,
            close_time: 0,
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: 10.0,
            quote_volume: 10.0,
            trades_count: 1,
            taker_buy_volume: 5.0,
            taker_buy_quote_volume: 5.0,
            is_closed: true,
        }
    }

    #[test]
    fn insufficient_data_is_no_trade() {
        let candles = vec![candle(100.0); 10];
        let out = evaluate(&candles, "BTCUSDT", "5m", &config());
        assert_eq!(out.signal, StrategySignal::NoTrade);
    }

    #[test]
    fn strong_uptrend_enters_long() {
        let candles: Vec<Candle> = (0..80)
            .map(|i| candle(100.0 + i as f64 * 2.0))
            .collect();
        let out = evaluate(&candles, "BTCUSDT", "5m", &config());
        assert_eq!(out.signal, StrategySignal::EnterLong);
        assert!(out.suggested_stop.unwrap() < out.suggested_entry.unwrap());
        assert!(out.suggested_take_profit.unwrap() > out.suggested_entry.unwrap());
    }

    #[test]
    fn flat_market_is_no_trade() {
        let candles = vec![candle(100.0); 80];
        let out = evaluate(&candles, "BTCUSDT", "5m", &config());
        assert_eq!(out.signal, StrategySignal::NoTrade);
    }
}
