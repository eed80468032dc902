// =============================================================================
// Cost estimator (C4) — fee, spread, and depth-walked slippage
// =============================================================================
//
// New module; grounded on `market_data/orderbook.rs`'s `OrderBookSnapshot`
// shape (which already stores the full sorted level ladder, not just an
// aggregate depth figure, specifically so this module could depth-walk it).

use serde::Serialize;
use thiserror::Error;

use crate::config::ExchangeConfig;
use crate::market_data::{BookSide, OrderBookSnapshot};
use crate::types::OrderType;

/// Full cost breakdown for a candidate trade size. Nothing here is floored
/// or clamped — a negative or zero slippage estimate is passed through as-is
/// so callers see the real number.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct CostBreakdown {
    pub fee_usd: f64,
    pub spread_cost_usd: f64,
    pub slippage_usd: f64,
    pub avg_fill_price: f64,
}

impl CostBreakdown {
    pub fn total(&self) -> f64 {
        self.fee_usd + self.spread_cost_usd + self.slippage_usd
    }
}

#[derive(Debug, Error)]
pub enum CostError {
    #[error("insufficient order book depth: requested {requested}, available {available}")]
    InsufficientDepth { requested: f64, available: f64 },
    #[error("order book has no usable best price on the {0:?} side")]
    NoQuote(BookSide),
}

/// Estimate the full cost of buying `qty` of `symbol` against `book`.
///
/// * **Fee** — `notional * fee_bps / 10_000`, using `taker_bps` for market
///   orders and `maker_bps` for limit orders.
/// * **Spread cost** — `notional * spread_bps / 10_000`; the full spread is
///   charged for market orders, only half for passive limit orders.
/// * **Slippage** — the book is walked on the ask side (this engine only
///   ever buys to enter) consuming size until `qty` is satisfied;
///   `avg_fill = sum(price*size) / qty`, `slippage = |avg_fill - best_ask| * qty`.
///   If the book cannot satisfy `qty`, this returns `InsufficientDepth`
///   rather than silently accepting a partial fill.
pub fn estimate_entry_cost(
    exchange: &ExchangeConfig,
    order_type: OrderType,
    book: &OrderBookSnapshot,
    qty: f64,
) -> Result<CostBreakdown, CostError> {
    let best_ask = book.best_ask().ok_or(CostError::NoQuote(BookSide::Ask))?;
    let spread_bps = book.spread_bps().unwrap_or(0.0);

    let (avg_fill, filled_qty) = book.walk(BookSide::Ask, qty);
    if filled_qty + 1e-12 < qty {
        return Err(CostError::InsufficientDepth {
            requested: qty,
            available: filled_qty,
        });
    }

    let notional = avg_fill * qty;
    let fee_bps = match order_type {
        OrderType::Market => exchange.taker_bps,
        OrderType::Limit => exchange.maker_bps,
    };
    let fee_usd = notional * fee_bps / 10_000.0;

    let spread_fraction = match order_type {
        OrderType::Market => 1.0,
        OrderType::Limit => 0.5,
    };
    let spread_cost_usd = notional * spread_bps / 10_000.0 * spread_fraction;

    let slippage_usd = (avg_fill - best_ask).abs() * qty;

    Ok(CostBreakdown {
        fee_usd,
        spread_cost_usd,
        slippage_usd,
        avg_fill_price: avg_fill,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exchange() -> ExchangeConfig {
        ExchangeConfig {
            quote_asset: "USDT".to_string(),
            taker_bps: 10.0,
            maker_bps: 2.0,
        }
    }

    fn book(asks: Vec<(f64, f64)>) -> OrderBookSnapshot {
        OrderBookSnapshot {
            symbol: "BTCUSDT".to_string(),
            bids: vec![(29_990.0, 1.0)],
            asks,
            last_update_id: 1,
        }
    }

    #[test]
    fn sufficient_depth_computes_full_breakdown() {
        let b = book(vec![(30_000.0, 0.02)]);
        let cost = estimate_entry_cost(&exchange(), OrderType::Market, &b, 0.01).unwrap();
        assert!((cost.avg_fill_price - 30_000.0).abs() < 1e-9);
        assert!(cost.fee_usd > 0.0);
    }

    #[test]
    fn insufficient_depth_is_rejected() {
        let b = book(vec![(30_000.0, 0.001)]);
        let err = estimate_entry_cost(&exchange(), OrderType::Market, &b, 0.01).unwrap_err();
        assert!(matches!(err, CostError::InsufficientDepth { .. }));
    }

    #[test]
    fn limit_orders_pay_half_spread_and_maker_fee() {
        let b = book(vec![(30_000.0, 1.0)]);
        let market = estimate_entry_cost(&exchange(), OrderType::Market, &b, 0.01).unwrap();
        let limit = estimate_entry_cost(&exchange(), OrderType::Limit, &b, 0.01).unwrap();
        assert!(limit.spread_cost_usd < market.spread_cost_usd);
        assert!(limit.fee_usd < market.fee_usd);
    }

    #[test]
    fn walk_across_multiple_levels_averages_price() {
        let b = book(vec![(30_000.0, 0.005), (30_010.0, 0.01)]);
        let cost = estimate_entry_cost(&exchange(), OrderType::Market, &b, 0.01).unwrap();
        // 0.005 @ 30000 + 0.005 @ 30010 = 300.05 / 0.01 = 30005
        assert!((cost.avg_fill_price - 30_005.0).abs() < 1e-6);
    }
}
