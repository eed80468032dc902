// =============================================================================
// Strategies (C2)
// =============================================================================
//
// Each strategy is a pure, deterministic function of a candle window (plus
// an optional orderbook snapshot for context) that emits a StrategyOutput.
// Strategies never read or write shared engine state — the ensemble
// combiner (see `crate::ensemble`) is the only component that sees more
// than one strategy's output at a time.

pub mod breakout;
pub mod mean_reversion;
pub mod trend;

use std::collections::HashMap;

use serde::Serialize;

/// The decision a single strategy reaches for one symbol at one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StrategySignal {
    EnterLong,
    Hold,
    Exit,
    NoTrade,
}

impl std::fmt::Display for StrategySignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EnterLong => write!(f, "ENTER_LONG"),
            Self::Hold => write!(f, "HOLD"),
            Self::Exit => write!(f, "EXIT"),
            Self::NoTrade => write!(f, "NO_TRADE"),
        }
    }
}

/// A strategy's verdict for one symbol at one tick. Deterministic function
/// of `timeframes_used`'s candle data — identical input produces identical
/// output.
#[derive(Debug, Clone, Serialize)]
pub struct StrategyOutput {
    pub strategy_id: &'static str,
    pub symbol: String,
    pub timeframes_used: Vec<String>,
    pub signal: StrategySignal,
    pub confidence: f64,
    pub suggested_entry: Option<f64>,
    pub suggested_stop: Option<f64>,
    pub suggested_take_profit: Option<f64>,
    pub rationale: HashMap<String, f64>,
}

impl StrategyOutput {
    /// Build the canonical NO_TRADE output for insufficient data. Every
    /// strategy funnels its early-return path through this constructor so
    /// the "insufficient data" rationale key is spelled consistently.
    pub fn insufficient_data(strategy_id: &'static str, symbol: &str, timeframe: &str) -> Self {
        let mut rationale = HashMap::new();
        rationale.insert("insufficient_data".to_string(), 1.0);
        Self {
            strategy_id,
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
