// =============================================================================
// Order Book Manager — Real-time orderbook aggregation
// =============================================================================
//
// Stores the full sorted depth per symbol (not just best bid/ask and a
// summed total) so downstream consumers — the cost estimator walking the
// book for slippage, strategies computing imbalance at a chosen depth — can
// work from the actual level ladder rather than an aggregate.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use futures_util::StreamExt;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio_tungstenite::connect_async;
use tracing::{error, info, warn};

/// A point-in-time orderbook snapshot. Never mutated after construction —
/// a new update replaces the whole snapshot rather than patching levels.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderBookSnapshot {
    pub symbol: String,
    /// Bid levels (price, size), sorted best-first (descending price).
    pub bids: Vec<(f64, f64)>,
    /// Ask levels (price, size), sorted best-first (ascending price).
    pub asks: Vec<(f64, f64)>,
    pub last_update_id: u64,
}

impl OrderBookSnapshot {
    pub fn best_bid(&self) -> Option<f64> {
        self.bids.first().map(|(p, _)| *p)
    }

    pub fn best_ask(&self) -> Option<f64> {
        self.asks.first().map(|(p, _)| *p)
    }

    pub fn mid(&self) -> Option<f64> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) if bid > 0.0 && ask > 0.0 => Some((bid + ask) / 2.0),
            _ => None,
        }
    }

    pub fn spread_bps(&self) -> Option<f64> {
        let (bid, ask, mid) = (self.best_bid()?, self.best_ask()?, self.mid()?);
        if mid <= 0.0 {
            return None;
        }
        Some((ask - bid) / mid * 10_000.0)
    }

    /// Bid/ask size imbalance over the top `levels`, in `[-1, 1]`.
    /// Positive means bid-heavy.
    pub fn imbalance(&self, levels: usize) -> Option<f64> {
        let bid_depth: f64 = self.bids.iter().take(levels).map(|(_, s)| s).sum();
        let ask_depth: f64 = self.asks.iter().take(levels).map(|(_, s)| s).sum();
        let total = bid_depth + ask_depth;
        if total <= 0.0 {
            return None;
        }
        Some((bid_depth - ask_depth) / total)
    }

    /// Walk the book on `side` consuming size until `qty` is filled.
    ///
    /// Returns `(avg_fill_price, filled_qty)`. `filled_qty < qty` signals
    /// the book did not have enough depth — callers must treat this as
    /// insufficient liquidity rather than silently accepting a partial fill.
    pub fn walk(&self, side: BookSide, qty: f64) -> (f64, f64) {
        let levels = match side {
            BookSide::Bid => &self.bids,
            BookSide::Ask => &self.asks,
        };

        let mut remaining = qty;
        let mut notional = 0.0;
        let mut filled = 0.0;

        for &(price, size) in levels {
            if remaining <= 0.0 {
                break;
            }
            let take = size.min(remaining);
            notional += price * take;
            filled += take;
            remaining -= take;
        }

        let avg = if filled > 0.0 { notional / filled } else { 0.0 };
        (avg, filled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookSide {
    Bid,
    Ask,
}

/// Manages orderbook snapshots for multiple symbols.
pub struct OrderBookManager {
    books: RwLock<HashMap<String, OrderBookSnapshot>>,
}

impl OrderBookManager {
    pub fn new() -> Self {
        Self {
            books: RwLock::new(HashMap::new()),
        }
    }

    /// Replace the stored snapshot for a symbol. `bids`/`asks` are sorted
    /// defensively (best-first) in case the feed does not guarantee order.
    pub fn update(&self, symbol: &str, mut bids: Vec<(f64, f64)>, mut asks: Vec<(f64, f64)>, update_id: u64) {
        bids.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        asks.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

        let snapshot = OrderBookSnapshot {
            symbol: symbol.to_string(),
            bids,
            asks,
            last_update_id: update_id,
        };

        self.books.write().insert(symbol.to_string(), snapshot);
    }

    /// Get the current orderbook snapshot for a symbol.
    pub fn get(&self, symbol: &str) -> Option<OrderBookSnapshot> {
        self.books.read().get(symbol).cloned()
    }

    /// Get the spread in basis points for a symbol.
    pub fn spread_bps(&self, symbol: &str) -> Option<f64> {
        self.books.read().get(symbol).and_then(|s| s.spread_bps())
    }

    /// Get the top-of-book imbalance for a symbol, in `[-1, 1]`.
    pub fn imbalance(&self, symbol: &str) -> Option<f64> {
        self.books.read().get(symbol).and_then(|s| s.imbalance(5))
    }

    /// Get all tracked symbols.
    pub fn symbols(&self) -> Vec<String> {
        self.books.read().keys().cloned().collect()
    }
}

impl Default for OrderBookManager {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Depth WebSocket stream
// ---------------------------------------------------------------------------

/// Connect to the Binance partial depth WebSocket stream for a single symbol
/// and feed orderbook updates into `manager`.
///
/// Uses the `@depth20@100ms` stream which provides the top 20 levels of the
/// orderbook at 100ms update intervals.
///
/// Runs until the stream disconnects or an error occurs, then returns so that
/// the caller can handle reconnection.
pub async fn run_depth_stream(symbol: &str, manager: &Arc<OrderBookManager>) -> Result<()> {
    let lower = symbol.to_lowercase();
    let url = format!("wss://stream.binance.com:9443/ws/{lower}@depth20@100ms");
    info!(url = %url, symbol = %symbol, "connecting to depth WebSocket");

    let (ws_stream, _response) = connect_async(&url)
        .await
        .context("failed to connect to depth WebSocket")?;

    info!(symbol = %symbol, "depth WebSocket connected");
    let (_write, mut read) = ws_stream.split();

    loop {
        match read.next().await {
            Some(Ok(msg)) => {
                if let tokio_tungstenite::tungstenite::Message::Text(text) = msg {
                    match parse_depth_message(&text) {
                        Ok((bids, asks, update_id)) => {
                            manager.update(symbol, bids, asks, update_id);
                        }
                        Err(e) => {
                            warn!(error = %e, "failed to parse depth message");
                        }
                    }
                }
            }
            Some(Err(e)) => {
                error!(symbol = %symbol, error = %e, "depth WebSocket read error");
                return Err(e.into());
            }
            None => {
                warn!(symbol = %symbol, "depth WebSocket stream ended");
                return Ok(());
            }
        }
    }
}

/// Parse a Binance partial-depth message.
///
/// Expected shape:
/// ```json
/// {
///   "lastUpdateId": 12345,
///   "bids": [["37000.00", "1.5"], ...],
///   "asks": [["37001.00", "1.2"], ...]
/// }
/// ```
fn parse_depth_message(text: &str) -> Result<(Vec<(f64, f64)>, Vec<(f64, f64)>, u64)> {
    let root: serde_json::Value =
        serde_json::from_str(text).context("failed to parse depth JSON")?;

    let update_id = root["lastUpdateId"]
        .as_u64()
        .context("missing field lastUpdateId")?;

    let bids = parse_levels(root["bids"].as_array().context("missing field bids")?);
    let asks = parse_levels(root["asks"].as_array().context("missing field asks")?);

    Ok((bids, asks, update_id))
}

fn parse_levels(raw: &[serde_json::Value]) -> Vec<(f64, f64)> {
    raw.iter()
        .filter_map(|level| {
            let price: f64 = level.get(0)?.as_str()?.parse().ok()?;
            let size: f64 = level.get(1)?.as_str()?.parse().ok()?;
            Some((price, size))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(bids: Vec<(f64, f64)>, asks: Vec<(f64, f64)>) -> OrderBookSnapshot {
        OrderBookSnapshot {
            symbol: "BTCUSDT".to_string(),
            bids,
            asks,
            last_update_id: 1,
        }
    }

    #[test]
    fn spread_and_mid() {
        let book = snapshot(vec![(100.0, 1.0)], vec![(101.0, 1.0)]);
        assert_eq!(book.mid(), Some(100.5));
        assert!((book.spread_bps().unwrap() - 99.502_487).abs() < 1e-3);
    }

    #[test]
    fn imbalance_bid_heavy() {
        let book = snapshot(vec![(100.0, 9.0)], vec![(101.0, 1.0)]);
        assert_eq!(book.imbalance(5), Some(0.8));
    }

    #[test]
    fn walk_consumes_levels_in_order() {
        let book = snapshot(vec![], vec![(100.0, 1.0), (101.0, 2.0), (102.0, 5.0)]);
        let (avg, filled) = book.walk(BookSide::Ask, 2.5);
        // 1.0 @ 100 + 1.5 @ 101 = 251.5 / 2.5 = 100.6
        assert!((avg - 100.6).abs() < 1e-9);
        assert_eq!(filled, 2.5);
    }

    #[test]
    fn walk_reports_insufficient_depth() {
        let book = snapshot(vec![], vec![(100.0, 1.0)]);
        let (_, filled) = book.walk(BookSide::Ask, 5.0);
        assert!(filled < 5.0);
    }

    #[test]
    fn manager_update_sorts_levels_defensively() {
        let mgr = OrderBookManager::new();
        mgr.update("BTCUSDT", vec![(99.0, 1.0), (100.0, 1.0)], vec![(102.0, 1.0), (101.0, 1.0)], 1);
        let book = mgr.get("BTCUSDT").unwrap();
        assert_eq!(book.bids[0].0, 100.0);
        assert_eq!(book.asks[0].0, 101.0);
    }

    #[test]
    fn parse_levels_handles_binance_shape() {
        let json = r#"{"lastUpdateId": 42, "bids": [["100.00","1.5"]], "asks": [["101.00","2.0"]]}"#;
        let (bids, asks, id) = parse_depth_message(json).expect("should parse");
        assert_eq!(id, 42);
        assert_eq!(bids, vec![(100.0, 1.5)]);
        assert_eq!(asks, vec![(101.0, 2.0)]);
    }
}
