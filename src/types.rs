// =============================================================================
// Shared domain types used across the engine
// =============================================================================
//
// These mirror the persisted schema: the `trades`, `orders`,
// `equity_snapshots`, and `events` tables are bit-exact contracts consumed
// by external dashboards, so field names here track the repository's column
// list (see `repository::schema`).

use serde::{Deserialize, Serialize};

/// Balance snapshot for a single asset from the exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceInfo {
    pub asset: String,
    #[serde(default)]
    pub free: f64,
    #[serde(default)]
    pub locked: f64,
}

/// LONG is the only side the engine trades — spot-only, no shorting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeSide {
    Long,
}

impl std::fmt::Display for TradeSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "LONG")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeStatus {
    Open,
    Closed,
    Canceled,
}

impl std::fmt::Display for TradeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open => write!(f, "OPEN"),
            Self::Closed => write!(f, "CLOSED"),
            Self::Canceled => write!(f, "CANCELED"),
        }
    }
}

/// Whether a trade was taken against the real exchange or simulated locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionMode {
    DryRun,
    Live,
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DryRun => write!(f, "DRY_RUN"),
            Self::Live => write!(f, "LIVE"),
        }
    }
}

/// A position the engine opened, tracked from entry to close.
///
/// Created on entry; mutated only by the owning symbol's trading-loop worker
/// (see `loop_engine`), and closed exactly once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub id: String,
    pub symbol: String,
    pub side: TradeSide,
    pub status: TradeStatus,
    pub mode: ExecutionMode,
    pub opened_at: String,
    #[serde(default)]
    pub closed_at: Option<String>,
    pub entry_price: f64,
    pub entry_qty: f64,
    pub entry_notional_usd: f64,
    pub stop_price: f64,
    pub take_profit_price: f64,
    #[serde(default)]
    pub trailing_enabled: bool,
    #[serde(default)]
    pub trailing_offset: Option<f64>,
    #[serde(default)]
    pub exit_price: Option<f64>,
    #[serde(default)]
    pub realized_pnl_usd: Option<f64>,
    #[serde(default)]
    pub fees_paid_usd: Option<f64>,
    #[serde(default)]
    pub slippage_est_usd: Option<f64>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Market,
    Limit,
}

impl std::fmt::Display for OrderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Market => write!(f, "MARKET"),
            Self::Limit => write!(f, "LIMIT"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Placed,
    Filled,
    Canceled,
    Failed,
    Simulated,
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Placed => write!(f, "PLACED"),
            Self::Filled => write!(f, "FILLED"),
            Self::Canceled => write!(f, "CANCELED"),
            Self::Failed => write!(f, "FAILED"),
            Self::Simulated => write!(f, "SIMULATED"),
        }
    }
}

/// One leg of a trade's order lifecycle (entry, stop, or take-profit).
///
/// Live orders carry an engine-chosen idempotency key of the form
/// `QS-{trade_id}-{seq}`, persisted with the row *before* the network call
/// that places it. Dry-run orders never contact the exchange and carry
/// `status = Simulated` with no `exchange_order_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub trade_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub qty: f64,
    #[serde(default)]
    pub price: Option<f64>,
    pub status: OrderStatus,
    #[serde(default)]
    pub exchange_order_id: Option<String>,
    #[serde(default)]
    pub idempotency_key: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Point-in-time account snapshot, written at least once per tick boundary
/// and on every position change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EquitySnapshot {
    pub ts: String,
    pub equity_usd: f64,
    pub cash_usd: f64,
    pub unrealized_pnl_usd: f64,
    pub realized_pnl_today_usd: f64,
    pub open_positions: u32,
    #[serde(default)]
    pub meta: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventLevel {
    Info,
    Warn,
    Error,
}

impl std::fmt::Display for EventLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Info => write!(f, "INFO"),
            Self::Warn => write!(f, "WARN"),
            Self::Error => write!(f, "ERROR"),
        }
    }
}

/// An append-only record of a single engine decision or state change.
///
/// `seq` is allocated by the repository's sequence allocator — callers
/// never supply it. `public_safe` marks whether the row may be shown on a
/// sanitised external surface (no secrets, no exchange order ids).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub seq: i64,
    pub ts: String,
    pub level: EventLevel,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default)]
    pub trade_id: Option<String>,
    pub payload: serde_json::Value,
    pub public_safe: bool,
}
