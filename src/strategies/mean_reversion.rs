// =============================================================================
// Mean-reversion strategy — RSI oversold confirmed by a lower Bollinger touch
// =============================================================================

use std::collections::HashMap;

use crate::config::StrategiesConfig;
use crate::indicators::atr::calculate_atr;
use crate::indicators::bollinger::calculate_bollinger;
use crate::indicators::rsi::calculate_rsi;
use crate::market_data::Candle;

use super::{StrategyOutput, StrategySignal};

pub const STRATEGY_ID: &str = "mean_reversion";

const RSI_PERIOD: usize = 14;
const BOLLINGER_PERIOD: usize = 20;
const BOLLINGER_STD: f64 = 2.0;
const ATR_PERIOD: usize = 14;
const STOP_ATR_MULTIPLE: f64 = 1.0;

/// Enter long when price has touched or pierced the lower Bollinger band
/// while RSI confirms oversold conditions — the two together are a much
/// weaker false-positive rate than either alone. Take profit targets the
/// band's middle (the mean being reverted to); stop sits one ATR below
/// entry in case the "reversion" keeps falling.
pub fn evaluate(candles: &[Candle], symbol: &str, timeframe: &str, config: &StrategiesConfig) -> StrategyOutput {
    let min_candles = BOLLINGER_PERIOD.max(RSI_PERIOD + 1).max(ATR_PERIOD + 1);
    if candles.len() < min_candles {
        return StrategyOutput::insufficient_data(STRATEGY_ID, symbol, timeframe);
    }

    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();

    let bb = match calculate_bollinger(&closes, BOLLINGER_PERIOD, BOLLINGER_STD) {
        Some(v) => v,
        None => return StrategyOutput::insufficient_data(STRATEGY_ID, symbol, timeframe),
    };
    let rsi = match calculate_rsi(&closes, RSI_PERIOD).last().copied() {
        Some(v) => v,
        None => return StrategyOutput::insufficient_data(STRATEGY_ID, symbol, timeframe),
    };
    let atr = match calculate_atr(candles, ATR_PERIOD) {
        Some(v) => v,
        None => return StrategyOutput::insufficient_data(STRATEGY_ID, symbol, timeframe),
    };

    let last_close = candles[candles.len() - 1].close;
    let mut rationale = HashMap::new();
    rationale.insert("rsi".to_string(), rsi);
    rationale.insert("bollinger_lower".to_string(), bb.lower);
    rationale.insert("bollinger_middle".to_string(), bb.middle);
    rationale.insert("atr".to_string(), atr);

    let oversold = rsi <= config.mean_reversion_rsi_oversold;
    let below_lower_band = last_close <= bb.lower;

    if oversold && below_lower_band && bb.middle > last_close {
        let depth = (config.mean_reversion_rsi_oversold - rsi).max(0.0) / config.mean_reversion_rsi_oversold;
        let confidence = depth.clamp(0.0, 1.0).max(0.3);
        StrategyOutput {
            strategy_id: STRATEGY_ID,
            symbol: symbol.to_string(),
            timeframes_used: vec![timeframe.to_string()],
            signal: StrategySignal::EnterLong,
            confidence,
            suggested_entry: Some(last_close),
            suggested_stop: Some(last_close - atr * STOP_ATR_MULTIPLE),
            suggested_take_profit: Some(bb.middle),
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
            high: close + 0.5,
            low: close - 0.5,
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
        let candles = vec![candle(100.0); 5];
        let out = evaluate(&candles, "BTCUSDT", "5m", &config());
        assert_eq!(out.signal, StrategySignal::NoTrade);
    }

    #[test]
    fn sharp_drop_into_oversold_enters_long() {
        let mut candles: Vec<Candle> = (0..25).map(|_| candle(100.0)).collect();
        for i in 0..10 {
            candles.push(candle(100.0 - i as f64 * 3.0));
        }
        let out = evaluate(&candles, "BTCUSDT", "5m", &config());
        assert_eq!(out.signal, StrategySignal::EnterLong);
        assert!(out.suggested_take_profit.unwrap() > out.suggested_entry.unwrap());
    }

    #[test]
    fn flat_market_is_no_trade() {
        let candles = vec![candle(100.0); 40];
        let out = evaluate(&candles, "BTCUSDT", "5m", &config());
        assert_eq!(out.signal, StrategySignal::NoTrade);
    }
}
