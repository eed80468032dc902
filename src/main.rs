// =============================================================================
// Quantsail Engine — Main Entry Point
// =============================================================================
//
// The engine starts in dry-run mode unless `execution.mode` in the config
// file says otherwise, and even then live order placement additionally
// requires the two-step `arm()`/`start_live()` protocol (see `arming.rs`) —
// a config flag alone is never enough to risk real money. There is no
// dashboard or API surface here; that outer layer is an explicit non-goal,
// the event journal is the only interface to what the engine is doing.
// =============================================================================

mod arming;
mod breakers;
mod config;
mod cost;
mod daily_lock;
mod ensemble;
mod error;
mod events;
mod exchange;
mod execution;
mod gates;
mod indicators;
mod loop_engine;
mod market_data;
mod plan;
mod repository;
mod strategies;
mod types;

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::arming::ArmingController;
use crate::breakers::BreakerManager;
use crate::config::ConfigSnapshot;
use crate::daily_lock::DailyLockManager;
use crate::events::EventSink;
use crate::exchange::BinanceClient;
use crate::execution::reconcile::reconcile_symbol;
use crate::loop_engine::SymbolWorker;
use crate::market_data::{CandleBuffer, OrderBookManager};
use crate::repository::Repository;

const CONFIG_PATH: &str = "config.json";
const DB_PATH: &str = "quantsail.db";
const TICK_CADENCE: std::time::Duration = std::time::Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenv::dotenv();

    // ── 1. Config ─────────────────────────────────────────────────────────
    // A missing file falls back to documented defaults (always dry-run); a
    // file that exists but is malformed or fails validation is fatal, spec
    // §4.12 — the engine must never start on a config it half-understood.
    let config = match ConfigSnapshot::load(CONFIG_PATH) {
        Ok(c) => c,
        Err(crate::error::ConfigError::Read { .. }) => {
            let symbols = std::env::var("QUANTSAIL_SYMBOLS")
                .ok()
                .map(|s| {
                    s.split(',')
                        .map(|sym| sym.trim().to_uppercase())
                        .filter(|sym| !sym.is_empty())
                        .collect::<Vec<_>>()
                })
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| vec!["BTCUSDT".to_string(), "ETHUSDT".to_string()]);
            ConfigSnapshot::default_for_symbols(symbols)
        }
        Err(e) => {
            // Init a bare fallback logger so this fatal error is actually visible.
            tracing_subscriber::fmt().with_env_filter("info").init();
            error!(error = %e, "config failed to load/validate — refusing to start");
            return Err(e.into());
        }
    };
    let config = Arc::new(config);

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_new(&config.observability.log_filter)
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!(symbols = ?config.symbols, mode = %config.execution.mode, "quantsail-engine starting");

    // ── 2. Shared infrastructure ──────────────────────────────────────────
    let repository = Repository::open(DB_PATH)?;
    let events = EventSink::new(repository.clone());
    let _ = events.info(
        "config.activated",
        None,
        serde_json::json!({
            "version": config.version,
            "symbols": config.symbols,
            "mode": config.execution.mode,
        }),
    );
    let breakers = Arc::new(BreakerManager::new(events.clone()));
    let daily_lock = Arc::new(DailyLockManager::rebuild_from_storage(
        &repository,
        events.clone(),
        &config.daily_lock,
        chrono::Utc::now(),
    )?);
    let arming = Arc::new(ArmingController::new(events.clone()));
    let equity = Arc::new(RwLock::new(config.risk.starting_capital_usd));

    let exchange = if config.execution.mode == "live" {
        let api_key = std::env::var("BINANCE_API_KEY").unwrap_or_default();
        let api_secret = std::env::var("BINANCE_API_SECRET").unwrap_or_default();
        if api_key.is_empty() || api_secret.is_empty() {
            warn!("execution.mode=live but BINANCE_API_KEY/BINANCE_API_SECRET are unset");
        }
        Some(Arc::new(BinanceClient::new(api_key, api_secret)))
    } else {
        None
    };

    let candles = Arc::new(CandleBuffer::new(2000));
    let orderbook = Arc::new(OrderBookManager::new());

    let _ = events.info(
        "system.started",
        None,
        serde_json::json!({ "symbols": config.symbols, "mode": config.execution.mode }),
    );

    // ── 3. Reconciliation — converge local state with the exchange before
    // the first tick, live mode only. Dry-run has nothing on the exchange
    // to reconcile against.
    if let Some(client) = &exchange {
        for symbol in &config.symbols {
            match reconcile_symbol(client, &repository, &events, symbol).await {
                Ok(report) => {
                    info!(symbol = %symbol, ?report, "reconciliation complete");
                    let _ = events.info(
                        "reconcile.completed",
                        Some(symbol.as_str()),
                        serde_json::json!({
                            "orders_confirmed_filled": report.orders_confirmed_filled,
                            "orders_confirmed_failed": report.orders_confirmed_failed,
                            "orphan_orders_canceled": report.orphan_orders_canceled,
                            "trades_closed_on_confirmed_fill": report.trades_closed_on_confirmed_fill,
                        }),
                    );
                }
                Err(e) => error!(symbol = %symbol, error = %e, "reconciliation failed"),
            }
        }
    }

    // ── 4. Market data streams, one set per symbol ───────────────────────
    for symbol in &config.symbols {
        let cb = candles.clone();
        let sym = symbol.clone();
        tokio::spawn(async move {
            loop {
                if let Err(e) =
                    market_data::candle_buffer::run_kline_stream(&sym, "5m", &cb).await
                {
                    error!(symbol = %sym, error = %e, "kline stream error — reconnecting in 5s");
                }
                tokio::time::sleep(std::time::Duration::from_secs(5)).await;
            }
        });

        let ob = orderbook.clone();
        let sym = symbol.clone();
        tokio::spawn(async move {
            loop {
                if let Err(e) = market_data::orderbook::run_depth_stream(&sym, &ob).await {
                    error!(symbol = %sym, error = %e, "depth stream error — reconnecting in 5s");
                }
                tokio::time::sleep(std::time::Duration::from_secs(5)).await;
            }
        });
    }

    info!(count = config.symbols.len(), "market data streams launched");

    // Give the streams a moment to populate candles/orderbook before the
    // first tick, matching the teacher's own warm-up delay.
    tokio::time::sleep(std::time::Duration::from_secs(30)).await;

    // ── 5. One worker task per symbol, shutdown coordinated by a single
    // watch channel every worker observes.
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let mut worker_handles = Vec::new();
    for symbol in &config.symbols {
        let mut worker = SymbolWorker::new(
            symbol.clone(),
            config.clone(),
            candles.clone(),
            orderbook.clone(),
            repository.clone(),
            events.clone(),
            breakers.clone(),
            daily_lock.clone(),
            exchange.clone(),
            arming.clone(),
            equity.clone(),
        );
        let rx = shutdown_rx.clone();
        worker_handles.push(tokio::spawn(async move {
            worker.run(TICK_CADENCE, rx).await;
        }));
    }

    info!("all symbol workers running, awaiting shutdown signal");

    // ── 6. Graceful shutdown ──────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("shutdown signal received, stopping workers");
    let _ = shutdown_tx.send(true);

    for handle in worker_handles {
        let _ = handle.await;
    }

    let _ = events.info("system.stopped", None, serde_json::json!({}));
    info!("quantsail-engine shut down complete");
    Ok(())
}
