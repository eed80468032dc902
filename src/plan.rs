// =============================================================================
// TradePlan — a sized, costed candidate entry, pre-gates
// =============================================================================

use serde::Serialize;

use crate::cost::CostBreakdown;

/// A candidate LONG entry built by the trading loop from an `EnsembleDecision`
/// plus risk-based sizing, before it has passed any gate. Invariant:
/// `stop < entry < take_profit`, `qty > 0`, `notional >= min_notional`,
/// `expected_net = expected_gross - fee - slippage - spread`.
#[derive(Debug, Clone, Serialize)]
pub struct TradePlan {
    pub symbol: String,
    pub entry: f64,
    pub stop: f64,
    pub take_profit: f64,
    pub qty: f64,
    pub notional: f64,
    pub cost: CostBreakdown,
    pub expected_gross: f64,
    pub expected_net: f64,
}

impl TradePlan {
    pub fn new(
        symbol: impl Into<String>,
        entry: f64,
        stop: f64,
        take_profit: f64,
        qty: f64,
        cost: CostBreakdown,
    ) -> Self {
        let notional = entry * qty;
        let expected_gross = (take_profit - entry) * qty;
        let expected_net = expected_gross - cost.total();
        Self {
            symbol: symbol.into(),
            entry,
            stop,
            take_profit,
            qty,
            notional,
            cost,
            expected_gross,
            expected_net,
        }
    }

    /// `true` iff the LONG ordering invariant `stop < entry < take_profit`,
    /// plus the positive-size invariants, hold. The trading loop checks this
    /// immediately after sizing, before any gate runs.
    pub fn is_well_formed(&self, min_notional: f64) -> bool {
        self.stop < self.entry
            && self.entry < self.take_profit
            && self.qty > 0.0
            && self.notional >= min_notional
    }
}
