// =============================================================================
// Ensemble combiner (C3) — count-based vote aggregation across strategies
// =============================================================================
//
// New module. The teacher's `strategy.rs` combines signals with a single
// weighted scorer; spec §4.3 asks for simple count-based agreement instead
// (at least `min_agreement` strategies must independently vote EnterLong
// with confidence at or above `confidence_threshold`), so this is a fresh
// function rather than an adaptation of the teacher's scorer.

use std::collections::HashMap;

use serde::Serialize;

use crate::config::GatesConfig;
use crate::strategies::{StrategyOutput, StrategySignal};

/// The ensemble's verdict for one symbol at one tick — either a converged
/// long entry (averaged across the agreeing strategies) or no trade.
#[derive(Debug, Clone, Serialize)]
pub struct EnsembleDecision {
    pub symbol: String,
    pub should_enter: bool,
    pub agreement_count: usize,
    pub contributing_strategies: Vec<&'static str>,
    pub confidence: f64,
    pub entry: Option<f64>,
    pub stop: Option<f64>,
    pub take_profit: Option<f64>,
    pub rationale: HashMap<String, f64>,
}

/// The three-way label spec §4.3 gives a non-entering decision: `decide`
/// itself never sees symbol state (it stays pure), so a `should_enter: false`
/// decision is always `NoTrade` until the caller — which does know whether
/// the symbol already has an open position — resolves it via [`EnsembleDecision::action`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EnsembleAction {
    EnterLong,
    Hold,
    NoTrade,
}

impl EnsembleDecision {
    /// Resolve the three-way action label. `has_open_position` is the only
    /// piece of symbol state this needs — everything else already lives on
    /// `self`.
    pub fn action(&self, has_open_position: bool) -> EnsembleAction {
        if self.should_enter {
            EnsembleAction::EnterLong
        } else if has_open_position {
            EnsembleAction::Hold
        } else {
            EnsembleAction::NoTrade
        }
    }
}

/// Combine every strategy's output for one symbol into a single decision.
///
/// A strategy "votes" EnterLong only if its signal is `EnterLong` *and* its
/// confidence clears `gates.confidence_threshold` — a low-confidence
/// EnterLong does not count toward agreement. If at least `min_agreement`
/// strategies vote, the ensemble enters using the mean of the voting
/// strategies' suggested entry/stop/take-profit (never a non-voter's); the
/// confidence reported is the mean of the voters' confidences.
pub fn decide(gates: &GatesConfig, outputs: &[StrategyOutput]) -> EnsembleDecision {
    let symbol = outputs
        .first()
        .map(|o| o.symbol.clone())
        .unwrap_or_default();

    let voters: Vec<&StrategyOutput> = outputs
        .iter()
        .filter(|o| o.signal == StrategySignal::EnterLong && o.confidence >= gates.confidence_threshold)
        .collect();

    let mut rationale = HashMap::new();
    for output in outputs {
        rationale.insert(format!("{}_signal", output.strategy_id), signal_code(output.signal));
        rationale.insert(format!("{}_confidence", output.strategy_id), output.confidence);
    }

    if voters.len() < gates.min_agreement {
        return EnsembleDecision {
            symbol,
            should_enter: false,
            agreement_count: voters.len(),
            contributing_strategies: voters.iter().map(|v| v.strategy_id).collect(),
            confidence: 0.0,
            entry: None,
            stop: None,
            take_profit: None,
            rationale,
        };
    }

    let n = voters.len() as f64;
    let mean = |f: fn(&StrategyOutput) -> Option<f64>| -> Option<f64> {
        let sum: f64 = voters.iter().filter_map(|v| f(v)).sum();
        let count = voters.iter().filter(|v| f(v).is_some()).count();
        if count == voters.len() && count > 0 {
            Some(sum / count as f64)
        } else {
            None
        }
    };

    let entry = mean(|o| o.suggested_entry);
    let stop = mean(|o| o.suggested_stop);
    let take_profit = mean(|o| o.suggested_take_profit);
    let confidence = voters.iter().map(|v| v.confidence).sum::<f64>() / n;

    let well_formed = matches!((entry, stop, take_profit), (Some(e), Some(s), Some(t)) if s < e && e < t);

    EnsembleDecision {
        symbol,
        should_enter: well_formed,
        agreement_count: voters.len(),
        contributing_strategies: voters.iter().map(|v| v.strategy_id).collect(),
        confidence,
        entry: if well_formed { entry } else { None },
        stop: if well_formed { stop } else { None },
        take_profit: if well_formed { take_profit } else { None },
        rationale,
    }
}

fn signal_code(signal: StrategySignal) -> f64 {
    match signal {
        StrategySignal::EnterLong => 1.0,
        StrategySignal::Hold => 0.5,
        StrategySignal::Exit => -1.0,
        StrategySignal::NoTrade => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gates(min_agreement: usize, confidence_threshold: f64) -> GatesConfig {
        GatesConfig {
            min_profit_usd: 0.10,
            min_agreement,
            confidence_threshold,
        }
    }

    fn voting_output(id: &'static str, confidence: f64) -> StrategyOutput {
        StrategyOutput {
            strategy_id: id,
            symbol: "BTCUSDT".to_string(),
            timeframes_used: vec!["5m".to_string()],
            signal: StrategySignal::EnterLong,
            confidence,
            suggested_entry: Some(100.0),
            suggested_stop: Some(98.0),
            suggested_take_profit: Some(106.0),
            rationale: HashMap::new(),
        }
    }

    #[test]
    fn enters_when_enough_strategies_agree() {
        let outputs = vec![voting_output("trend", 0.8), voting_output("breakout", 0.7)];
        let decision = decide(&gates(2, 0.6), &outputs);
        assert!(decision.should_enter);
        assert_eq!(decision.agreement_count, 2);
        assert_eq!(decision.entry, Some(100.0));
    }

    #[test]
    fn low_confidence_vote_does_not_count() {
        let outputs = vec![voting_output("trend", 0.8), voting_output("breakout", 0.2)];
        let decision = decide(&gates(2, 0.6), &outputs);
        assert!(!decision.should_enter);
        assert_eq!(decision.agreement_count, 1);
    }

    #[test]
    fn below_min_agreement_is_no_trade() {
        let outputs = vec![voting_output("trend", 0.9)];
        let decision = decide(&gates(2, 0.6), &outputs);
        assert!(!decision.should_enter);
    }
}
