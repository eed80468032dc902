// =============================================================================
// Live executor — real orders, persist-before-send idempotency
// =============================================================================
//
// Grounded on `execution.rs::execute_live` and `binance/client.rs::place_order`'s
// `client_order_id` plumbing, extended with spec §4.8's idempotency
// contract: the `Order` row (status `Placed`, its `QS-{trade_id}-{seq}` key)
// is written to the repository *before* the network call, so a crash
// between the write and the response is always recoverable — `reconcile`
// looks the key up on the exchange on the next startup rather than losing
// track of it. A `ExchangeDuplicate` response (the exchange already has an
// order under this key from a previous crashed attempt) is treated as
// success, not failure: the entry already happened.

use chrono::Utc;

use crate::error::EngineError;
use crate::events::EventSink;
use crate::exchange::BinanceClient;
use crate::plan::TradePlan;
use crate::repository::{new_id, Repository};
use crate::types::{
    ExecutionMode, Order, OrderSide, OrderStatus, OrderType, Trade, TradeSide, TradeStatus,
};

use super::{idempotency_key, ExitReason};

/// Place the entry order for `plan` and open the corresponding `Trade`.
/// The trade/order pair is persisted *before* the exchange call; on any
/// exchange rejection the trade is marked `Canceled` rather than left
/// dangling `Open` with nothing behind it.
pub async fn open(
    client: &BinanceClient,
    repository: &Repository,
    events: &EventSink,
    plan: &TradePlan,
) -> Result<Trade, EngineError> {
    let now = Utc::now().to_rfc3339();
    let trade_id = new_id();
    let key = idempotency_key(&trade_id, 1);

    let trade = Trade {
        id: trade_id.clone(),
        symbol: plan.symbol.clone(),
        side: TradeSide::Long,
        status: TradeStatus::Open,
        mode: ExecutionMode::Live,
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

    let order = Order {
        id: new_id(),
        trade_id: trade_id.clone(),
        symbol: plan.symbol.clone(),
        side: OrderSide::Buy,
        order_type: OrderType::Market,
        qty: plan.qty,
        price: Some(plan.entry),
        status: OrderStatus::Placed,
        exchange_order_id: None,
        idempotency_key: Some(key.clone()),
        created_at: now.clone(),
        updated_at: now.clone(),
    };

    repository
        .open_trade(&trade, std::slice::from_ref(&order))
        .map_err(EngineError::PersistenceFailure)?;
    events
        .info(
            "order.placed",
            Some(&trade.symbol),
            serde_json::json!({
                "trade_id": trade.id,
                "order_id": order.id,
                "side": order.side,
                "order_type": order.order_type,
                "qty": order.qty,
                "idempotency_key": key,
            }),
        )
        .map_err(EngineError::PersistenceFailure)?;

    match client
        .place_order(&plan.symbol, "BUY", "MARKET", plan.qty, None, None, &key)
        .await
    {
        Ok(ack) => {
            let mut filled = order;
            filled.status = if ack.status == "FILLED" {
                OrderStatus::Filled
            } else {
                OrderStatus::Placed
            };
            filled.exchange_order_id = Some(ack.exchange_order_id);
            filled.updated_at = Utc::now().to_rfc3339();
            repository.upsert_order(&filled).map_err(EngineError::PersistenceFailure)?;

            if filled.status == OrderStatus::Filled {
                events
                    .info(
                        "order.filled",
                        Some(&trade.symbol),
                        serde_json::json!({
                            "trade_id": trade.id,
                            "order_id": filled.id,
                            "exchange_order_id": filled.exchange_order_id,
                        }),
                    )
                    .map_err(EngineError::PersistenceFailure)?;
            }

            events
                .info(
                    "trade.opened",
                    Some(&trade.symbol),
                    serde_json::json!({
                        "trade_id": trade.id,
                        "mode": "LIVE",
                        "entry": trade.entry_price,
                        "qty": trade.entry_qty,
                        "idempotency_key": key,
                        "exchange_status": filled.status.to_string(),
                    }),
                )
                .map_err(EngineError::PersistenceFailure)?;
            Ok(trade)
        }
        Err(EngineError::ExchangeDuplicate(msg)) => {
            events
                .warn(
                    "execution.duplicate_order_detected",
                    Some(&trade.symbol),
                    serde_json::json!({ "trade_id": trade.id, "idempotency_key": key, "detail": msg }),
                )
                .map_err(EngineError::PersistenceFailure)?;
            Ok(trade)
        }
        Err(err) => {
            repository
                .close_trade(&trade_id, plan.entry, 0.0, 0.0, 0.0, &Utc::now().to_rfc3339(), TradeStatus::Canceled)
                .map_err(EngineError::PersistenceFailure)?;
            events
                .error(
                    "trade.entry_failed",
                    Some(&trade.symbol),
                    serde_json::json!({ "trade_id": trade.id, "idempotency_key": key, "error": err.to_string() }),
                )
                .map_err(EngineError::PersistenceFailure)?;
            Err(err)
        }
    }
}

/// Place the exit order for an open live trade. The seq is derived from how
/// many orders the trade already has (the entry order is always seq 1), so
/// a retried close after a crash reuses the same idempotency key rather than
/// minting a new one.
pub async fn close(
    client: &BinanceClient,
    repository: &Repository,
    events: &EventSink,
    trade: &Trade,
    exit_price_hint: f64,
    reason: ExitReason,
) -> Result<(), EngineError> {
    let existing_orders = repository
        .get_orders_for_trade(&trade.id)
        .map_err(EngineError::PersistenceFailure)?;
    let seq = existing_orders.len() as u32 + 1;
    let key = idempotency_key(&trade.id, seq);
    let now = Utc::now().to_rfc3339();

    let order = Order {
        id: new_id(),
        trade_id: trade.id.clone(),
        symbol: trade.symbol.clone(),
        side: OrderSide::Sell,
        order_type: OrderType::Market,
        qty: trade.entry_qty,
        price: Some(exit_price_hint),
        status: OrderStatus::Placed,
        exchange_order_id: None,
        idempotency_key: Some(key.clone()),
        created_at: now.clone(),
        updated_at: now.clone(),
    };
    repository.upsert_order(&order).map_err(EngineError::PersistenceFailure)?;
    events
        .info(
            "order.placed",
            Some(&trade.symbol),
            serde_json::json!({
                "trade_id": trade.id,
                "order_id": order.id,
                "side": order.side,
                "order_type": order.order_type,
                "qty": order.qty,
                "idempotency_key": key,
            }),
        )
        .map_err(EngineError::PersistenceFailure)?;

    let ack = match client
        .place_order(&trade.symbol, "SELL", "MARKET", trade.entry_qty, None, None, &key)
        .await
    {
        Ok(ack) => ack,
        Err(EngineError::ExchangeDuplicate(_)) => {
            // Already placed by a previous crashed attempt; reconcile will
            // confirm the fill. Don't re-raise as a failure.
            return Ok(());
        }
        Err(err) => {
            events
                .error(
                    "trade.exit_failed",
                    Some(&trade.symbol),
                    serde_json::json!({ "trade_id": trade.id, "idempotency_key": key, "error": err.to_string() }),
                )
                .map_err(EngineError::PersistenceFailure)?;
            return Err(err);
        }
    };

    let mut filled = order;
    filled.status = OrderStatus::Filled;
    filled.exchange_order_id = Some(ack.exchange_order_id);
    filled.updated_at = Utc::now().to_rfc3339();
    repository.upsert_order(&filled).map_err(EngineError::PersistenceFailure)?;
    events
        .info(
            "order.filled",
            Some(&trade.symbol),
            serde_json::json!({
                "trade_id": trade.id,
                "order_id": filled.id,
                "exchange_order_id": filled.exchange_order_id,
            }),
        )
        .map_err(EngineError::PersistenceFailure)?;

    let exit_price = ack.avg_price.unwrap_or(exit_price_hint);
    let gross = (exit_price - trade.entry_price) * trade.entry_qty;
    let fees = trade.fees_paid_usd.unwrap_or(0.0);
    let realized_pnl = gross - fees;

    repository
        .close_trade(&trade.id, exit_price, realized_pnl, fees, trade.slippage_est_usd.unwrap_or(0.0), &Utc::now().to_rfc3339(), TradeStatus::Closed)
        .map_err(EngineError::PersistenceFailure)?;

    events
        .info(
            "trade.closed",
            Some(&trade.symbol),
            serde_json::json!({
                "trade_id": trade.id,
                "mode": "LIVE",
                "exit_price": exit_price,
                "reason": reason.as_str(),
                "realized_pnl_usd": realized_pnl,
            }),
        )
        .map_err(EngineError::PersistenceFailure)?;
    Ok(())
}
