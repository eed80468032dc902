// =============================================================================
// Dry-run executor — simulated fills, no network calls
// =============================================================================
//
// Grounded on `execution.rs::execute_demo` (fills instantly at the planned
// price, no exchange round trip) and `position_engine.rs::close_position`
// for the PnL arithmetic. A dry-run open persists three orders atomically:
// the entry fills immediately (`OrderStatus::Filled`), and the stop/take-
// profit levels are recorded as resting `OrderStatus::Simulated` orders so
// the trade's full bracket is visible in the order history exactly as it
// would be for a live trade. None carry an `exchange_order_id`/
// `idempotency_key` — a dry-run fill never touches the idempotency table,
// since there is nothing to deduplicate against.

use chrono::Utc;

use crate::events::EventSink;
use crate::plan::TradePlan;
use crate::repository::{new_id, Repository};
use crate::types::{
    ExecutionMode, Order, OrderSide, OrderStatus, OrderType, Trade, TradeSide, TradeStatus,
};

use super::ExitReason;

/// Open a simulated position at the plan's entry price and persist it.
/// Fills instantly and completely — a dry-run never models partial fills or
/// rejects, since there is no exchange to reject it.
pub fn open(repository: &Repository, events: &EventSink, plan: &TradePlan) -> anyhow::Result<Trade> {
    let now = Utc::now().to_rfc3339();
    let trade = Trade {
        id: new_id(),
        symbol: plan.symbol.clone(),
        side: TradeSide::Long,
        status: TradeStatus::Open,
        mode: ExecutionMode::DryRun,
        opened_at: now.clone(),
        closed_at: None,
        entry_price: plan.entry,
        entry_qty: plan.qty,
        entry_notional_usd: plan.notional,
        stop_price: plan.stop,
        take_profit_price: plan.take_profit,
        trailing_enabled: false,
        trailing_offset: None,
        exit_price: None,
        realized_pnl_usd: None,
        fees_paid_usd: None,
        slippage_est_usd: None,
        notes: None,
    };

    let entry_order = Order {
        id: new_id(),
        trade_id: trade.id.clone(),
        symbol: plan.symbol.clone(),
        side: OrderSide::Buy,
        order_type: OrderType::Market,
        qty: plan.qty,
        price: Some(plan.entry),
        status: OrderStatus::Filled,
        exchange_order_id: None,
        idempotency_key: None,
        created_at: now.clone(),
        updated_at: now.clone(),
    };
    let stop_order = Order {
        id: new_id(),
        trade_id: trade.id.clone(),
        symbol: plan.symbol.clone(),
        side: OrderSide::Sell,
        order_type: OrderType::Limit,
        qty: plan.qty,
        price: Some(plan.stop),
        status: OrderStatus::Simulated,
        exchange_order_id: None,
        idempotency_key: None,
        created_at: now.clone(),
        updated_at: now.clone(),
    };
    let take_profit_order = Order {
        id: new_id(),
        trade_id: trade.id.clone(),
        symbol: plan.symbol.clone(),
        side: OrderSide::Sell,
        order_type: OrderType::Limit,
        qty: plan.qty,
        price: Some(plan.take_profit),
        status: OrderStatus::Simulated,
        exchange_order_id: None,
        idempotency_key: None,
        created_at: now.clone(),
        updated_at: now,
    };

    repository.open_trade(&trade, &[entry_order.clone(), stop_order.clone(), take_profit_order.clone()])?;

    for order in [&entry_order, &stop_order, &take_profit_order] {
        events.info(
            "order.placed",
            Some(&trade.symbol),
            serde_json::json!({
                "trade_id": trade.id,
                "order_id": order.id,
                "side": order.side,
                "order_type": order.order_type,
                "qty": order.qty,
                "price": order.price,
            }),
        )?;
    }
    // The entry order fills instantly in dry-run; the stop/take-profit
    // brackets stay resting (`Simulated`) until price trades through them.
    events.info(
        "order.filled",
        Some(&trade.symbol),
        serde_json::json!({
            "trade_id": trade.id,
            "order_id": entry_order.id,
            "price": entry_order.price,
            "qty": entry_order.qty,
        }),
    )?;

    events.info(
        "trade.opened",
        Some(&trade.symbol),
        serde_json::json!({
            "trade_id": trade.id,
            "mode": "DRY_RUN",
            "entry": trade.entry_price,
            "qty": trade.entry_qty,
            "stop": trade.stop_price,
            "take_profit": trade.take_profit_price,
            "expected_net": plan.expected_net,
        }),
    )?;
    Ok(trade)
}

/// Close a simulated position at `exit_price`, computing realised PnL from
/// the entry/exit spread on `entry_qty` minus the plan's estimated costs
/// (slippage on exit is not modelled separately — dry-run exits always fill
/// at the requested price).
pub fn close(
    repository: &Repository,
    events: &EventSink,
    trade: &Trade,
    exit_price: f64,
    reason: ExitReason,
) -> anyhow::Result<()> {
    let now = Utc::now().to_rfc3339();
    let gross = (exit_price - trade.entry_price) * trade.entry_qty;
    let fees = trade.fees_paid_usd.unwrap_or(0.0);
    let realized_pnl = gross - fees;

    repository.close_trade(
        &trade.id,
        exit_price,
        realized_pnl,
        fees,
        trade.slippage_est_usd.unwrap_or(0.0),
        &now,
        TradeStatus::Closed,
    )?;

    events.info(
        "trade.closed",
        Some(&trade.symbol),
        serde_json::json!({
            "trade_id": trade.id,
            "mode": "DRY_RUN",
            "exit_price": exit_price,
            "reason": reason.as_str(),
            "realized_pnl_usd": realized_pnl,
        }),
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cost::CostBreakdown;

    fn sample_plan() -> TradePlan {
        let cost = CostBreakdown {
            fee_usd: 0.05,
            spread_cost_usd: 0.02,
            slippage_usd: 0.01,
            avg_fill_price: 100.0,
        };
        TradePlan::new("BTCUSDT", 100.0, 95.0, 110.0, 1.0, cost)
    }

    #[test]
    fn open_persists_trade_and_simulated_order() {
        let repo = Repository::open_in_memory().unwrap();
        let events = EventSink::new(repo.clone());
        let plan = sample_plan();

        let trade = open(&repo, &events, &plan).unwrap();
        assert_eq!(trade.status, TradeStatus::Open);
        assert_eq!(trade.mode, ExecutionMode::DryRun);

        let orders = repo.get_orders_for_trade(&trade.id).unwrap();
        assert_eq!(orders.len(), 3);
        assert_eq!(orders[0].status, OrderStatus::Filled);
        assert_eq!(orders[1].status, OrderStatus::Simulated);
        assert_eq!(orders[2].status, OrderStatus::Simulated);
        assert!(orders.iter().all(|o| o.exchange_order_id.is_none()));
    }

    #[test]
    fn close_computes_realized_pnl_from_entry_spread() {
        let repo = Repository::open_in_memory().unwrap();
        let events = EventSink::new(repo.clone());
        let plan = sample_plan();
        let trade = open(&repo, &events, &plan).unwrap();

        close(&repo, &events, &trade, 110.0, ExitReason::TakeProfitHit).unwrap();
        let open_trades = repo.get_open_trades().unwrap();
        assert!(open_trades.is_empty());
    }
}
