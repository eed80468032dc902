// =============================================================================
// Profitability gate (C5)
// =============================================================================
//
// New, pure function module. No direct teacher analogue — `strategy.rs`
// inlines a much looser profit check as part of its monolithic scorer; this
// is shaped like the other gate-style pure functions in `risk.rs::can_trade`
// (consult only the inputs handed to it, never ambient state).

use serde::Serialize;

use crate::config::GatesConfig;
use crate::plan::TradePlan;

#[derive(Debug, Clone, Serialize)]
pub struct ProfitabilityVerdict {
    pub passed: bool,
    pub expected_net: f64,
    pub min_profit_usd: f64,
}

/// Pass iff `expected_net >= min_profit_usd`. Consults nothing but the
/// candidate plan and the config snapshot — never breaker state, never the
/// daily lock, never open positions.
pub fn check(gates: &GatesConfig, plan: &TradePlan) -> ProfitabilityVerdict {
    ProfitabilityVerdict {
        passed: plan.expected_net >= gates.min_profit_usd,
        expected_net: plan.expected_net,
        min_profit_usd: gates.min_profit_usd,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cost::CostBreakdown;

    fn plan_with_net(expected_net_target: f64) -> TradePlan {
        let cost = CostBreakdown {
            fee_usd: 0.0,
            spread_cost_usd: 0.0,
            slippage_usd: 0.0,
            avg_fill_price: 30_000.0,
        };
        // gross = (tp - entry) * qty; pick qty=1 so gross == tp-entry.
        let entry = 30_000.0;
        let tp = entry + expected_net_target;
        TradePlan::new("BTCUSDT", entry, entry - 100.0, tp, 1.0, cost)
    }

    #[test]
    fn passes_when_net_meets_floor() {
        let gates = GatesConfig {
            min_profit_usd: 0.10,
            min_agreement: 2,
            confidence_threshold: 0.6,
        };
        let verdict = check(&gates, &plan_with_net(0.10));
        assert!(verdict.passed);
    }

    #[test]
    fn rejects_when_net_below_floor() {
        let gates = GatesConfig {
            min_profit_usd: 0.10,
            min_agreement: 2,
            confidence_threshold: 0.6,
        };
        let verdict = check(&gates, &plan_with_net(0.05));
        assert!(!verdict.passed);
    }
}
