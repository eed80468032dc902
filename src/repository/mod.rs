// =============================================================================
// Repository (C10) — transactional persistence for trades/orders/events
// =============================================================================
//
// Grounded on `cooprefr-bettersys/rust-backend/src/signals/db_storage.rs`:
// a single `rusqlite::Connection` behind a `parking_lot::Mutex`, WAL mode,
// explicit `BEGIN IMMEDIATE` / `COMMIT` transactions for multi-row atomic
// writes, and `ON CONFLICT` upserts. The teacher (`orc2626-tech-sBot9999`)
// has no persistence layer at all beyond the `runtime_config.json` file, so
// this module has no direct teacher analogue — it is grounded on the
// sibling repo instead.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use crate::types::{
    EquitySnapshot, Event, EventLevel, ExecutionMode, Order, OrderSide, OrderStatus, OrderType,
    Trade, TradeSide, TradeStatus,
};

const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS trades (
    id TEXT PRIMARY KEY,
    symbol TEXT NOT NULL,
    side TEXT NOT NULL,
    status TEXT NOT NULL,
    mode TEXT NOT NULL,
    opened_at TEXT NOT NULL,
    closed_at TEXT,
    entry_price REAL NOT NULL,
    entry_qty REAL NOT NULL,
    entry_notional_usd REAL NOT NULL,
    stop_price REAL NOT NULL,
    take_profit_price REAL NOT NULL,
    trailing_enabled INTEGER NOT NULL DEFAULT 0,
    trailing_offset REAL,
    exit_price REAL,
    realized_pnl_usd REAL,
    fees_paid_usd REAL,
    slippage_est_usd REAL,
    notes TEXT
);

CREATE TABLE IF NOT EXISTS orders (
    id TEXT PRIMARY KEY,
    trade_id TEXT NOT NULL REFERENCES trades(id),
    symbol TEXT NOT NULL,
    side TEXT NOT NULL,
    order_type TEXT NOT NULL,
    qty REAL NOT NULL,
    price REAL,
    status TEXT NOT NULL,
    exchange_order_id TEXT,
    idempotency_key TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_orders_trade ON orders(trade_id);
CREATE UNIQUE INDEX IF NOT EXISTS idx_orders_idempotency
    ON orders(idempotency_key) WHERE idempotency_key IS NOT NULL;

CREATE TABLE IF NOT EXISTS equity_snapshots (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    ts TEXT NOT NULL,
    equity_usd REAL NOT NULL,
    cash_usd REAL NOT NULL,
    unrealized_pnl_usd REAL NOT NULL,
    realized_pnl_today_usd REAL NOT NULL,
    open_positions INTEGER NOT NULL,
    meta TEXT
);

CREATE TABLE IF NOT EXISTS events (
    id TEXT PRIMARY KEY,
    seq INTEGER NOT NULL UNIQUE,
    ts TEXT NOT NULL,
    level TEXT NOT NULL,
    type TEXT NOT NULL,
    symbol TEXT,
    trade_id TEXT,
    payload TEXT NOT NULL,
    public_safe INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_events_seq ON events(seq);

CREATE TABLE IF NOT EXISTS event_seq (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    next_seq INTEGER NOT NULL
);
INSERT OR IGNORE INTO event_seq (id, next_seq) VALUES (1, 1);
"#;

/// Thread-safe SQLite-backed repository. One `Connection` behind a single
/// `Mutex` — WAL mode lets external read-only tools (a dashboard) tail the
/// file concurrently without contending with this lock.
pub struct Repository {
    conn: Arc<Mutex<Connection>>,
}

impl Repository {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path).context("failed to open sqlite database")?;
        conn.execute_batch(SCHEMA_SQL)
            .context("failed to apply repository schema")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    // -------------------------------------------------------------------------
    // Atomic multi-row writes
    // -------------------------------------------------------------------------

    /// Persist a newly-opened trade plus its associated orders in one
    /// serialisable transaction — spec §4.10 requires `open_trade` to be
    /// atomic so a crash mid-write never leaves a trade without its orders.
    pub fn open_trade(&self, trade: &Trade, orders: &[Order]) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        insert_trade(&tx, trade)?;
        for order in orders {
            insert_order(&tx, order)?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Close a trade and record its realised PnL atomically.
    pub fn close_trade(
        &self,
        trade_id: &str,
        exit_price: f64,
        realized_pnl_usd: f64,
        fees_paid_usd: f64,
        slippage_est_usd: f64,
        closed_at: &str,
        status: TradeStatus,
    ) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE trades SET status = ?1, closed_at = ?2, exit_price = ?3, \
             realized_pnl_usd = ?4, fees_paid_usd = ?5, slippage_est_usd = ?6 \
             WHERE id = ?7",
            params![
                status_str(status),
                closed_at,
                exit_price,
                realized_pnl_usd,
                fees_paid_usd,
                slippage_est_usd,
                trade_id,
            ],
        )?;
        Ok(())
    }

    /// Insert or update a single order row (e.g. transition PLACED → FILLED).
    pub fn upsert_order(&self, order: &Order) -> Result<()> {
        let conn = self.conn.lock();
        insert_order(&conn, order)?;
        Ok(())
    }

    pub fn append_equity(&self, snapshot: &EquitySnapshot) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO equity_snapshots \
             (ts, equity_usd, cash_usd, unrealized_pnl_usd, realized_pnl_today_usd, open_positions, meta) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                snapshot.ts,
                snapshot.equity_usd,
                snapshot.cash_usd,
                snapshot.unrealized_pnl_usd,
                snapshot.realized_pnl_today_usd,
                snapshot.open_positions,
                snapshot.meta.as_ref().map(|v| v.to_string()),
            ],
        )?;
        Ok(())
    }

    /// Append an event, allocating its `seq` in the same atomic step so two
    /// events can never share a sequence number and no gaps appear.
    pub fn append_event(&self, mut event: Event) -> Result<Event> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let seq: i64 = tx.query_row(
            "UPDATE event_seq SET next_seq = next_seq + 1 WHERE id = 1 RETURNING next_seq - 1",
            [],
            |row| row.get(0),
        )?;
        event.seq = seq;
        tx.execute(
            "INSERT INTO events (id, seq, ts, level, type, symbol, trade_id, payload, public_safe) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                event.id,
                event.seq,
                event.ts,
                level_str(event.level),
                event.event_type,
                event.symbol,
                event.trade_id,
                event.payload.to_string(),
                event.public_safe as i64,
            ],
        )?;
        tx.commit()?;
        Ok(event)
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    /// Closed trades whose `closed_at` falls on `day_key` (an opaque caller-
    /// supplied date string — the daily lock manager is the one that knows
    /// how to compute it in the configured timezone).
    pub fn get_today_closed_trades(&self, day_key: &str) -> Result<Vec<Trade>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, symbol, side, status, mode, opened_at, closed_at, entry_price, entry_qty, \
             entry_notional_usd, stop_price, take_profit_price, trailing_enabled, trailing_offset, \
             exit_price, realized_pnl_usd, fees_paid_usd, slippage_est_usd, notes \
             FROM trades WHERE status = 'CLOSED' AND closed_at LIKE ?1 || '%'",
        )?;
        let rows = stmt.query_map(params![day_key], row_to_trade)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("failed to read today's closed trades")
    }

    pub fn get_open_trades(&self) -> Result<Vec<Trade>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, symbol, side, status, mode, opened_at, closed_at, entry_price, entry_qty, \
             entry_notional_usd, stop_price, take_profit_price, trailing_enabled, trailing_offset, \
             exit_price, realized_pnl_usd, fees_paid_usd, slippage_est_usd, notes \
             FROM trades WHERE status = 'OPEN'",
        )?;
        let rows = stmt.query_map([], row_to_trade)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("failed to read open trades")
    }

    pub fn get_orders_for_trade(&self, trade_id: &str) -> Result<Vec<Order>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, trade_id, symbol, side, order_type, qty, price, status, \
             exchange_order_id, idempotency_key, created_at, updated_at \
             FROM orders WHERE trade_id = ?1",
        )?;
        let rows = stmt.query_map(params![trade_id], row_to_order)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("failed to read orders for trade")
    }

    pub fn get_events_after(&self, seq: i64, limit: usize) -> Result<Vec<Event>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, seq, ts, level, type, symbol, trade_id, payload, public_safe \
             FROM events WHERE seq > ?1 ORDER BY seq ASC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![seq, limit as i64], row_to_event)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("failed to read events after seq")
    }

    pub fn get_order_by_idempotency_key(&self, key: &str) -> Result<Option<Order>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT id, trade_id, symbol, side, order_type, qty, price, status, \
             exchange_order_id, idempotency_key, created_at, updated_at \
             FROM orders WHERE idempotency_key = ?1",
            params![key],
            row_to_order,
        )
        .optional()
        .context("failed to look up order by idempotency key")
    }
}

impl Clone for Repository {
    fn clone(&self) -> Self {
        Self {
            conn: self.conn.clone(),
        }
    }
}

impl std::fmt::Debug for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository").finish()
    }
}

// ---------------------------------------------------------------------------
// Row <-> domain conversions
// ---------------------------------------------------------------------------

fn status_str(status: TradeStatus) -> &'static str {
    match status {
        TradeStatus::Open => "OPEN",
        TradeStatus::Closed => "CLOSED",
        TradeStatus::Canceled => "CANCELED",
    }
}

fn level_str(level: EventLevel) -> &'static str {
    match level {
        EventLevel::Info => "INFO",
        EventLevel::Warn => "WARN",
        EventLevel::Error => "ERROR",
    }
}

fn insert_trade(conn: &Connection, trade: &Trade) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO trades (id, symbol, side, status, mode, opened_at, closed_at, entry_price, \
         entry_qty, entry_notional_usd, stop_price, take_profit_price, trailing_enabled, \
         trailing_offset, exit_price, realized_pnl_usd, fees_paid_usd, slippage_est_usd, notes) \
         VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19) \
         ON CONFLICT(id) DO UPDATE SET status=excluded.status, closed_at=excluded.closed_at, \
         exit_price=excluded.exit_price, realized_pnl_usd=excluded.realized_pnl_usd, \
         fees_paid_usd=excluded.fees_paid_usd, slippage_est_usd=excluded.slippage_est_usd",
        params![
            trade.id,
            trade.symbol,
            trade.side.to_string(),
            status_str(trade.status),
            trade.mode.to_string(),
            trade.opened_at,
            trade.closed_at,
            trade.entry_price,
            trade.entry_qty,
            trade.entry_notional_usd,
            trade.stop_price,
            trade.take_profit_price,
            trade.trailing_enabled as i64,
            trade.trailing_offset,
            trade.exit_price,
            trade.realized_pnl_usd,
            trade.fees_paid_usd,
            trade.slippage_est_usd,
            trade.notes,
        ],
    )?;
    Ok(())
}

fn insert_order(conn: &Connection, order: &Order) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO orders (id, trade_id, symbol, side, order_type, qty, price, status, \
         exchange_order_id, idempotency_key, created_at, updated_at) \
         VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12) \
         ON CONFLICT(id) DO UPDATE SET status=excluded.status, \
         exchange_order_id=excluded.exchange_order_id, updated_at=excluded.updated_at",
        params![
            order.id,
            order.trade_id,
            order.symbol,
            order.side.to_string(),
            order.order_type.to_string(),
            order.qty,
            order.price,
            order.status.to_string(),
            order.exchange_order_id,
            order.idempotency_key,
            order.created_at,
            order.updated_at,
        ],
    )?;
    Ok(())
}

fn row_to_trade(row: &rusqlite::Row) -> rusqlite::Result<Trade> {
    let side: String = row.get(2)?;
    let status: String = row.get(3)?;
    let mode: String = row.get(4)?;
    Ok(Trade {
        id: row.get(0)?,
        symbol: row.get(1)?,
        side: parse_side(&side),
        status: parse_status(&status),
        mode: parse_mode(&mode),
        opened_at: row.get(5)?,
        closed_at: row.get(6)?,
        entry_price: row.get(7)?,
        entry_qty: row.get(8)?,
        entry_notional_usd: row.get(9)?,
        stop_price: row.get(10)?,
        take_profit_price: row.get(11)?,
        trailing_enabled: row.get::<_, i64>(12)? != 0,
        trailing_offset: row.get(13)?,
        exit_price: row.get(14)?,
        realized_pnl_usd: row.get(15)?,
        fees_paid_usd: row.get(16)?,
        slippage_est_usd: row.get(17)?,
        notes: row.get(18)?,
    })
}

fn row_to_order(row: &rusqlite::Row) -> rusqlite::Result<Order> {
    let side: String = row.get(3)?;
    let order_type: String = row.get(4)?;
    let status: String = row.get(7)?;
    Ok(Order {
        id: row.get(0)?,
        trade_id: row.get(1)?,
        symbol: row.get(2)?,
        side: if side == "BUY" { OrderSide::Buy } else { OrderSide::Sell },
        order_type: if order_type == "MARKET" { OrderType::Market } else { OrderType::Limit },
        qty: row.get(5)?,
        price: row.get(6)?,
        status: parse_order_status(&status),
        exchange_order_id: row.get(8)?,
        idempotency_key: row.get(9)?,
        created_at: row.get(10)?,
        updated_at: row.get(11)?,
    })
}

fn row_to_event(row: &rusqlite::Row) -> rusqlite::Result<Event> {
    let level: String = row.get(3)?;
    let payload_str: String = row.get(7)?;
    Ok(Event {
        id: row.get(0)?,
        seq: row.get(1)?,
        ts: row.get(2)?,
        level: match level.as_str() {
            "WARN" => EventLevel::Warn,
            "ERROR" => EventLevel::Error,
            _ => EventLevel::Info,
        },
        event_type: row.get(4)?,
        symbol: row.get(5)?,
        trade_id: row.get(6)?,
        payload: serde_json::from_str(&payload_str).unwrap_or(serde_json::Value::Null),
        public_safe: row.get::<_, i64>(8)? != 0,
    })
}

fn parse_side(s: &str) -> TradeSide {
    match s {
        _ => TradeSide::Long,
    }
}
fn parse_status(s: &str) -> TradeStatus {
    match s {
        "CLOSED" => TradeStatus::Closed,
        "CANCELED" => TradeStatus::Canceled,
        _ => TradeStatus::Open,
    }
}
fn parse_mode(s: &str) -> ExecutionMode {
    match s {
        "LIVE" => ExecutionMode::Live,
        _ => ExecutionMode::DryRun,
    }
}
fn parse_order_status(s: &str) -> OrderStatus {
    match s {
        "FILLED" => OrderStatus::Filled,
        "CANCELED" => OrderStatus::Canceled,
        "FAILED" => OrderStatus::Failed,
        "SIMULATED" => OrderStatus::Simulated,
        _ => OrderStatus::Placed,
    }
}

/// Build a fresh UUID-keyed id. Thin wrapper so callers don't import `uuid`
/// directly — matches the teacher's `Uuid::new_v4().to_string()` idiom used
/// throughout `position_engine.rs`/`execution.rs`.
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sample_trade(id: &str) -> Trade {
        Trade {
            id: id.to_string(),
            symbol: "BTCUSDT".to_string(),
            side: TradeSide::Long,
            status: TradeStatus::Open,
            mode: ExecutionMode::DryRun,
            opened_at: Utc::now().to_rfc3339(),
            closed_at: None,
            entry_price: 30_000.0,
            entry_qty: 0.01,
            entry_notional_usd: 300.0,
            stop_price: 29_500.0,
            take_profit_price: 31_000.0,
            trailing_enabled: false,
            trailing_offset: None,
            exit_price: None,
            realized_pnl_usd: None,
            fees_paid_usd: None,
            slippage_est_usd: None,
            notes: None,
        }
    }

    fn sample_order(id: &str, trade_id: &str) -> Order {
        Order {
            id: id.to_string(),
            trade_id: trade_id.to_string(),
            symbol: "BTCUSDT".to_string(),
            side: OrderSide::Buy,
            order_type: OrderType::Market,
            qty: 0.01,
            price: Some(30_000.0),
            status: OrderStatus::Filled,
            exchange_order_id: None,
            idempotency_key: None,
            created_at: Utc::now().to_rfc3339(),
            updated_at: Utc::now().to_rfc3339(),
        }
    }

    #[test]
    fn open_trade_is_atomic_and_queryable() {
        let repo = Repository::open_in_memory().unwrap();
        let trade = sample_trade("t1");
        let orders = vec![sample_order("o1", "t1")];
        repo.open_trade(&trade, &orders).unwrap();

        let open = repo.get_open_trades().unwrap();
        assert_eq!(open.len(), 1);
        let fetched_orders = repo.get_orders_for_trade("t1").unwrap();
        assert_eq!(fetched_orders.len(), 1);
    }

    #[test]
    fn close_trade_updates_status_and_pnl() {
        let repo = Repository::open_in_memory().unwrap();
        repo.open_trade(&sample_trade("t1"), &[]).unwrap();
        repo.close_trade("t1", 31_000.0, 10.0, 0.3, 0.1, &Utc::now().to_rfc3339(), TradeStatus::Closed)
            .unwrap();
        assert!(repo.get_open_trades().unwrap().is_empty());
    }

    #[test]
    fn event_sequence_is_monotonic_and_gapless() {
        let repo = Repository::open_in_memory().unwrap();
        let mut last = 0;
        for i in 0..5 {
            let ev = Event {
                id: new_id(),
                seq: 0,
                ts: Utc::now().to_rfc3339(),
                level: EventLevel::Info,
                event_type: format!("test.event.{i}"),
                symbol: None,
                trade_id: None,
                payload: serde_json::json!({}),
                public_safe: true,
            };
            let appended = repo.append_event(ev).unwrap();
            assert!(appended.seq > last);
            last = appended.seq;
        }
        let events = repo.get_events_after(0, 100).unwrap();
        assert_eq!(events.len(), 5);
        for w in events.windows(2) {
            assert!(w[0].seq < w[1].seq);
        }
    }

    #[test]
    fn idempotency_key_is_unique() {
        let repo = Repository::open_in_memory().unwrap();
        repo.open_trade(&sample_trade("t1"), &[]).unwrap();
        let mut o1 = sample_order("o1", "t1");
        o1.idempotency_key = Some("QS-t1-1".to_string());
        repo.upsert_order(&o1).unwrap();

        let found = repo.get_order_by_idempotency_key("QS-t1-1").unwrap();
        assert!(found.is_some());
        assert_eq!(found.unwrap().id, "o1");
    }
}
