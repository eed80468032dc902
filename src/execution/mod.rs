// =============================================================================
// Executor (C8) — turns a well-formed, gate-passed TradePlan into a Trade
// =============================================================================
//
// Grounded on the teacher's `execution.rs` (`execute_demo`/`execute_live`
// split) and `position_engine.rs`'s stop-before-take-profit exit check, but
// restructured: the teacher mutates a shared `PositionManager` directly from
// `main.rs`'s loop body, while here `dry_run`/`live` are pure-ish modules the
// trading loop (`loop_engine`) calls explicitly, and every outcome is
// persisted through `Repository` rather than held only in memory.

pub mod dry_run;
pub mod live;
pub mod reconcile;

use crate::types::{ExecutionMode, Trade};

/// What the exit check found for an open trade at the current price. Spec
/// §4.8's same-bar priority decision (`stop_first`) is applied by the caller
/// before this is constructed — by the time `ExitDecision::StopHit` or
/// `::TakeProfitHit` is returned, the ordering question is already settled.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ExitReason {
    StopHit,
    TakeProfitHit,
}

impl ExitReason {
    pub fn as_str(self) -> &'static str {
        match self {
            ExitReason::StopHit => "stop_hit",
            ExitReason::TakeProfitHit => "take_profit_hit",
        }
    }
}

/// Check whether `last_price` has crossed either exit level. Returns the
/// side that triggers, applying `stop_first` to break same-bar ties (both
/// levels crossed within one price update) — the default and spec's
/// documented "safer" choice checks the stop first, see DESIGN.md Open
/// Question 1.
pub fn check_exit(trade: &Trade, last_price: f64, stop_first: bool) -> Option<ExitReason> {
    let stop_hit = last_price <= trade.stop_price;
    let tp_hit = last_price >= trade.take_profit_price;

    if stop_first {
        if stop_hit {
            return Some(ExitReason::StopHit);
        }
        if tp_hit {
            return Some(ExitReason::TakeProfitHit);
        }
    } else {
        if tp_hit {
            return Some(ExitReason::TakeProfitHit);
        }
        if stop_hit {
            return Some(ExitReason::StopHit);
        }
    }
    None
}

/// The engine-chosen idempotency key persisted with an `Order` before any
/// network call that could place it — format fixed by spec §4.8.
pub fn idempotency_key(trade_id: &str, seq: u32) -> String {
    format!("QS-{trade_id}-{seq}")
}

pub fn mode_for_config(execution_mode: &str) -> ExecutionMode {
    if execution_mode == "live" {
        ExecutionMode::Live
    } else {
        ExecutionMode::DryRun
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ExecutionMode, TradeSide, TradeStatus};

    fn trade() -> Trade {
        Trade {
            id: "t1".to_string(),
            symbol: "BTCUSDT".to_string(),
            side: TradeSide::Long,
            status: TradeStatus::Open,
            mode: ExecutionMode::DryRun,
            opened_at: "2026-07-26T00:00:00Z".to_string(),
            closed_at: None,
            entry_price: 100.0,
            entry_qty: 1.0,
            entry_notional_usd: 100.0,
            stop_price: 95.0,
            take_profit_price: 110.0,
            trailing_enabled: false,
            trailing_offset: None,
            exit_price: None,
            realized_pnl_usd: None,
            fees_paid_usd: None,
            slippage_est_usd: None,
            notes: None,
        }
    }

    #[test]
    fn stop_first_prefers_stop_on_same_bar_cross() {
        let t = trade();
        // Price update implausibly straddles both levels at once; with
        // stop_first the stop wins.
        let reason = check_exit(&t, 94.0, true);
        assert_eq!(reason, Some(ExitReason::StopHit));
    }

    #[test]
    fn neither_level_crossed_is_none() {
        let t = trade();
        assert_eq!(check_exit(&t, 102.0, true), None);
    }

    #[test]
    fn take_profit_only_cross_reports_take_profit() {
        let t = trade();
        assert_eq!(check_exit(&t, 111.0, true), Some(ExitReason::TakeProfitHit));
    }

    #[test]
    fn idempotency_key_matches_fixed_format() {
        assert_eq!(idempotency_key("t1", 2), "QS-t1-2");
    }
}
