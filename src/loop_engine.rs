// =============================================================================
// Trading loop (C9) — per-symbol IDLE/EVAL/ENTRY_PENDING/IN_POSITION/EXIT_PENDING
// =============================================================================
//
// Grounded on `main.rs`'s per-symbol spawn-and-reconnect shape and
// `strategy.rs`'s per-tick pipeline (gather candles -> indicators -> signal
// -> act), reassembled into the explicit state machine spec §4.9 requires.
// The teacher has no state enum at all — `PositionManager`/`RiskEngine` are
// called directly from `main.rs`'s loop body with the "state" implicit in
// whether a position map entry exists. Here the state is first-class so a
// tick's behaviour (and the events it emits) is determined entirely by
// `SymbolState`, not by incidentally-present data.
//
// The spec's PAUSED_ENTRIES overlay is realised through the existing gate
// sequence rather than a separate state variant: breakers and the daily
// lock are both full members of the gate sequence (step 3), so a breaker-
// triggered or daily-lock-engaged period is observable as repeated
// `gate.breaker.rejected`/`gate.daily_lock.rejected` events keeping the
// symbol at IDLE, with no need for a state the rest of the engine would have
// to special-case.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::RwLock;
use tracing::{info, warn};

use crate::arming::ArmingController;
use crate::breakers::{BreakerKind, BreakerManager};
use crate::config::ConfigSnapshot;
use crate::cost::estimate_entry_cost;
use crate::daily_lock::DailyLockManager;
use crate::ensemble;
use crate::events::EventSink;
use crate::exchange::BinanceClient;
use crate::execution::{check_exit, dry_run, live, ExitReason};
use crate::gates::{profitability, GateKind};
use crate::indicators::atr::calculate_atr;
use crate::market_data::{CandleBuffer, CandleKey, OrderBookManager};
use crate::plan::TradePlan;
use crate::repository::Repository;
use crate::strategies::{breakout, mean_reversion, trend, StrategyOutput};
use crate::types::{OrderType, Trade};

/// Candle history length every strategy is handed. Generous enough for the
/// longest indicator window any of the three strategies uses (Bollinger(20),
/// Donchian(20)+1, ADX(14)) with headroom.
const CANDLE_WINDOW: usize = 120;
const PRIMARY_TIMEFRAME: &str = "5m";
const ATR_PERIOD: usize = 14;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolState {
    Idle,
    Eval,
    EntryPending,
    InPosition,
    ExitPending,
}

/// Everything one symbol's worker needs, shared with every other symbol's
/// worker except where noted. `BreakerManager`/`DailyLockManager`/
/// `ArmingController` are the genuinely cross-symbol shared state (per spec
/// §5's concurrency model and §4.8's arm/start-live protocol, which is a
/// process-wide switch, not a per-symbol one); everything else here is
/// per-symbol or read-only.
pub struct SymbolWorker {
    symbol: String,
    config: Arc<ConfigSnapshot>,
    candles: Arc<CandleBuffer>,
    orderbook: Arc<OrderBookManager>,
    repository: Repository,
    events: EventSink,
    breakers: Arc<BreakerManager>,
    daily_lock: Arc<DailyLockManager>,
    exchange: Option<Arc<BinanceClient>>,
    arming: Arc<ArmingController>,
    equity: Arc<RwLock<f64>>,
    state: SymbolState,
    current_trade: Option<Trade>,
    consecutive_losses: u32,
}

impl SymbolWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        symbol: impl Into<String>,
        config: Arc<ConfigSnapshot>,
        candles: Arc<CandleBuffer>,
        orderbook: Arc<OrderBookManager>,
        repository: Repository,
        events: EventSink,
        breakers: Arc<BreakerManager>,
        daily_lock: Arc<DailyLockManager>,
        exchange: Option<Arc<BinanceClient>>,
        arming: Arc<ArmingController>,
        equity: Arc<RwLock<f64>>,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            config,
            candles,
            orderbook,
            repository,
            events,
            breakers,
            daily_lock,
            exchange,
            arming,
            equity,
            state: SymbolState::Idle,
            current_trade: None,
            consecutive_losses: 0,
        }
    }

    pub fn state(&self) -> SymbolState {
        self.state
    }

    /// Run forever at `cadence`, stopping only when `shutdown` fires. Each
    /// iteration is one tick; a tick error never kills the worker, it only
    /// aborts that tick (spec §5: "on timeout the call fails ... the symbol
    /// returns to IDLE").
    pub async fn run(&mut self, cadence: Duration, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(cadence);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.tick().await {
                        warn!(symbol = %self.symbol, error = %e, "tick aborted");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!(symbol = %self.symbol, "shutdown signal received, worker stopping");
                        break;
                    }
                }
            }
        }
    }

    /// One full IDLE/EVAL/.../IDLE cycle. Ordering within a symbol is
    /// strictly sequential per spec §5: fetch -> evaluate -> gate -> execute
    /// -> persist -> emit.
    pub async fn tick(&mut self) -> anyhow::Result<()> {
        match self.state {
            SymbolState::InPosition => self.tick_in_position().await?,
            _ => self.tick_idle_or_eval().await?,
        }
        self.append_equity_snapshot()?;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // IDLE -> EVAL -> ENTRY_PENDING -> IN_POSITION
    // -------------------------------------------------------------------------

    async fn tick_idle_or_eval(&mut self) -> anyhow::Result<()> {
        self.state = SymbolState::Idle;

        let key = CandleKey {
            symbol: self.symbol.clone(),
            interval: PRIMARY_TIMEFRAME.to_string(),
        };
        let candles = self.candles.get_closed_candles(&key, CANDLE_WINDOW);
        if candles.len() < 30 {
            let _ = self.events.warn(
                "market.tick",
                Some(&self.symbol),
                serde_json::json!({ "reason": "insufficient candle history", "have": candles.len() }),
            );
            return Ok(());
        }
        let Some(book) = self.orderbook.get(&self.symbol) else {
            let _ = self.events.warn(
                "market.tick",
                Some(&self.symbol),
                serde_json::json!({ "reason": "no orderbook snapshot available" }),
            );
            return Ok(());
        };

        self.state = SymbolState::Eval;
        self.check_volatility_breaker(&candles);

        let outputs: Vec<StrategyOutput> = vec![
            trend::evaluate(&candles, &self.symbol, PRIMARY_TIMEFRAME, &self.config.strategies),
            mean_reversion::evaluate(&candles, &self.symbol, PRIMARY_TIMEFRAME, &self.config.strategies),
            breakout::evaluate(&candles, &self.symbol, PRIMARY_TIMEFRAME, &self.config.strategies),
        ];
        for output in &outputs {
            let _ = self.events.info("signal.generated", Some(&self.symbol), serde_json::json!(output));
        }

        let decision = ensemble::decide(&self.config.gates, &outputs);
        let action = decision.action(self.current_trade.is_some());
        let _ = self.events.info(
            "ensemble.decision",
            Some(&self.symbol),
            serde_json::json!({ "action": action, "decision": &decision }),
        );
        if !decision.should_enter {
            self.state = SymbolState::Idle;
            return Ok(());
        }

        let (Some(entry), Some(stop), Some(take_profit)) = (decision.entry, decision.stop, decision.take_profit) else {
            self.state = SymbolState::Idle;
            return Ok(());
        };

        let equity = *self.equity.read();
        let price_risk_pct = ((entry - stop) / entry).max(1e-9);
        let risk_usd = equity * self.config.risk.risk_per_trade_pct / 100.0;
        let mut qty = risk_usd / (entry * price_risk_pct);

        let max_notional = equity * self.config.risk.max_position_pct_equity / 100.0;
        if qty * entry > max_notional {
            qty = max_notional / entry;
        }

        let _ = self.events.info(
            "risk.position_sized",
            Some(&self.symbol),
            serde_json::json!({
                "equity": equity,
                "risk_usd": risk_usd,
                "qty": qty,
                "notional": qty * entry,
                "max_notional": max_notional,
            }),
        );

        let cost = match estimate_entry_cost(&self.config.exchange, OrderType::Market, &book, qty) {
            Ok(c) => c,
            Err(e) => {
                let _ = self.events.warn(
                    GateKind::Liquidity.event_type(),
                    Some(&self.symbol),
                    serde_json::json!({ "reason": e.to_string(), "requested_qty": qty }),
                );
                self.state = SymbolState::Idle;
                return Ok(());
            }
        };

        let plan = TradePlan::new(self.symbol.clone(), entry, stop, take_profit, qty, cost);
        if !plan.is_well_formed(self.config.risk.min_notional) {
            let _ = self.events.warn(
                GateKind::Liquidity.event_type(),
                Some(&self.symbol),
                serde_json::json!({ "reason": "plan failed well-formed check", "notional": plan.notional }),
            );
            self.state = SymbolState::Idle;
            return Ok(());
        }

        let _ = self.events.info(
            "trade.candidate.created",
            Some(&self.symbol),
            serde_json::json!({ "plan": &plan }),
        );

        if let Some(rejection) = self.run_gate_sequence(&plan)? {
            let _ = self.events.info(rejection, Some(&self.symbol), serde_json::json!({ "plan": &plan }));
            self.state = SymbolState::Idle;
            return Ok(());
        }

        if self.config.execution.mode == "live" && !self.arming.is_live_active() {
            let _ = self.events.warn(
                "execution.live_not_armed",
                Some(&self.symbol),
                serde_json::json!({ "reason": "live execution requires arm()+start_live() before order placement" }),
            );
            self.state = SymbolState::Idle;
            return Ok(());
        }

        self.state = SymbolState::EntryPending;
        let trade = self.open_trade(&plan).await?;
        self.current_trade = Some(trade);
        self.state = SymbolState::InPosition;
        Ok(())
    }

    /// Strict order, short-circuit on first rejection: liquidity is already
    /// handled by the caller (the cost estimate + well-formed check above),
    /// so this covers profitability -> breakers -> daily lock ->
    /// max_concurrent_positions. Returns the rejected gate's event type, if
    /// any.
    fn run_gate_sequence(&self, plan: &TradePlan) -> anyhow::Result<Option<&'static str>> {
        let verdict = profitability::check(&self.config.gates, plan);
        if !verdict.passed {
            return Ok(Some(GateKind::Profitability.event_type()));
        }

        let _ = self.events.info(
            "gate.profitability.passed",
            Some(&self.symbol),
            serde_json::json!({ "expected_net": verdict.expected_net, "min_profit_usd": verdict.min_profit_usd }),
        );

        let now = Utc::now();
        let (breakers_ok, breaker_kind, _) = self.breakers.entries_allowed(now);
        if !breakers_ok {
            let gate_kind = if breaker_kind == Some(BreakerKind::News) {
                GateKind::News
            } else {
                GateKind::Breaker
            };
            return Ok(Some(gate_kind.event_type()));
        }

        let (daily_ok, _) = self.daily_lock.entries_allowed(&self.config.daily_lock, now);
        if !daily_ok {
            return Ok(Some(GateKind::DailyLock.event_type()));
        }

        let open_count = self
            .repository
            .get_open_trades()?
            .len() as u32;
        if open_count >= self.config.risk.max_concurrent_positions {
            return Ok(Some(GateKind::MaxConcurrentPositions.event_type()));
        }

        Ok(None)
    }

    async fn open_trade(&self, plan: &TradePlan) -> anyhow::Result<Trade> {
        if self.config.execution.mode == "live" {
            let client = self
                .exchange
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("live execution mode requires an exchange client"))?;
            Ok(live::open(client, &self.repository, &self.events, plan).await?)
        } else {
            dry_run::open(&self.repository, &self.events, plan)
        }
    }

    // -------------------------------------------------------------------------
    // IN_POSITION -> EXIT_PENDING -> IDLE
    // -------------------------------------------------------------------------

    async fn tick_in_position(&mut self) -> anyhow::Result<()> {
        let Some(trade) = self.current_trade.clone() else {
            self.state = SymbolState::Idle;
            return Ok(());
        };

        let key = CandleKey {
            symbol: self.symbol.clone(),
            interval: PRIMARY_TIMEFRAME.to_string(),
        };
        let Some(last_price) = self.candles.last_close(&key) else {
            // Market data unavailable: exits always retry, the symbol stays
            // IN_POSITION rather than drifting back to IDLE.
            return Ok(());
        };

        let Some(reason) = check_exit(&trade, last_price, self.config.execution.stop_first) else {
            return Ok(());
        };

        self.state = SymbolState::ExitPending;
        self.close_trade(&trade, last_price, reason).await?;
        self.record_outcome(&trade);
        self.current_trade = None;
        self.state = SymbolState::Idle;
        Ok(())
    }

    async fn close_trade(&self, trade: &Trade, last_price: f64, reason: ExitReason) -> anyhow::Result<()> {
        if trade.mode == crate::types::ExecutionMode::Live {
            let client = self
                .exchange
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("live trade with no exchange client"))?;
            live::close(client, &self.repository, &self.events, trade, last_price, reason).await?;
        } else {
            dry_run::close(&self.repository, &self.events, trade, last_price, reason)?;
        }
        Ok(())
    }

    /// Feed the just-closed trade's realized PnL to the daily lock, and bump
    /// (or reset) the in-process consecutive-loss counter the volatility-
    /// adjacent breaker check below consults.
    fn record_outcome(&mut self, trade: &Trade) {
        // The repository's close_trade already persisted realized_pnl_usd;
        // re-read it rather than recompute so the daily lock's figure always
        // matches what is durably stored.
        if let Ok(today_closed) = self
            .repository
            .get_today_closed_trades(&current_day_key(&self.config.daily_lock.timezone))
        {
            if let Some(just_closed) = today_closed.iter().find(|t| t.id == trade.id) {
                let realized = just_closed.realized_pnl_usd.unwrap_or(0.0);
                *self.equity.write() += realized;
                self.daily_lock.record_realized_pnl(&self.config.daily_lock, Utc::now(), realized);

                if realized < 0.0 {
                    self.consecutive_losses += 1;
                } else {
                    self.consecutive_losses = 0;
                }
                if self.consecutive_losses >= self.config.breakers.consecutive_losses_n as u32 {
                    self.breakers.trigger(
                        BreakerKind::ConsecutiveLosses,
                        Utc::now(),
                        self.config.breakers.consecutive_losses_pause_minutes,
                        format!("{} consecutive losing trades", self.consecutive_losses),
                        Some(&self.symbol),
                    );
                    self.consecutive_losses = 0;
                }
            }
        }
    }

    /// Volatility breaker: current ATR vs. a baseline ATR computed from the
    /// window immediately preceding it. Trips when current exceeds baseline
    /// by the configured multiple — a sudden vol expansion, not an
    /// absolute threshold, since "normal" ATR varies per symbol.
    fn check_volatility_breaker(&self, candles: &[crate::market_data::Candle]) {
        if candles.len() < ATR_PERIOD * 2 + 1 {
            return;
        }
        let current = calculate_atr(candles, ATR_PERIOD);
        let baseline_window = &candles[..candles.len() - ATR_PERIOD];
        let baseline = calculate_atr(baseline_window, ATR_PERIOD);

        if let (Some(current), Some(baseline)) = (current, baseline) {
            if baseline > 0.0 && current > baseline * self.config.breakers.volatility_atr_multiple {
                self.breakers.trigger(
                    BreakerKind::Volatility,
                    Utc::now(),
                    self.config.breakers.volatility_pause_minutes,
                    format!("ATR {current:.4} exceeds baseline {baseline:.4} x{}", self.config.breakers.volatility_atr_multiple),
                    Some(&self.symbol),
                );
            }
        }

        if let Some(spread_bps) = self.orderbook.spread_bps(&self.symbol) {
            if spread_bps > self.config.breakers.spread_cap_bps {
                self.breakers.trigger(
                    BreakerKind::Spread,
                    Utc::now(),
                    self.config.breakers.spread_pause_minutes,
                    format!("spread {spread_bps:.1}bps exceeds cap {}bps", self.config.breakers.spread_cap_bps),
                    Some(&self.symbol),
                );
            }
        }
    }

    fn append_equity_snapshot(&self) -> anyhow::Result<()> {
        let equity = *self.equity.read();
        let open_positions = if self.current_trade.is_some() { 1 } else { 0 };
        let unrealized = self
            .current_trade
            .as_ref()
            .and_then(|t| {
                let key = CandleKey { symbol: self.symbol.clone(), interval: PRIMARY_TIMEFRAME.to_string() };
                self.candles.last_close(&key).map(|last| (last - t.entry_price) * t.entry_qty)
            })
            .unwrap_or(0.0);

        self.repository.append_equity(&crate::types::EquitySnapshot {
            ts: Utc::now().to_rfc3339(),
            equity_usd: equity + unrealized,
            cash_usd: equity,
            unrealized_pnl_usd: unrealized,
            realized_pnl_today_usd: self.daily_lock.realized_pnl_today(),
            open_positions,
            meta: Some(serde_json::json!({ "symbol": self.symbol, "state": format!("{:?}", self.state) })),
        })
    }
}

fn current_day_key(tz_name: &str) -> String {
    use chrono::TimeZone;
    let tz: chrono_tz::Tz = tz_name.parse().unwrap_or(chrono_tz::UTC);
    tz.from_utc_datetime(&Utc::now().naive_utc()).format("%Y-%m-%d").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_volatility_breaker_needs_enough_candles_to_not_panic() {
        // Regression guard: fewer than 2*ATR_PERIOD+1 candles must be a
        // silent no-op, not a slice-index panic.
        let repo = Repository::open_in_memory().unwrap();
        let events = EventSink::new(repo.clone());
        let breakers = Arc::new(BreakerManager::new(events.clone()));
        let daily_lock = Arc::new(
            DailyLockManager::rebuild_from_storage(&repo, events.clone(), &default_daily_lock_config(), Utc::now()).unwrap(),
        );
        let arming = Arc::new(ArmingController::new(events.clone()));
        let worker = SymbolWorker::new(
            "BTCUSDT",
            Arc::new(default_config()),
            Arc::new(CandleBuffer::new(500)),
            Arc::new(OrderBookManager::new()),
            repo,
            events,
            breakers,
            daily_lock,
            None,
            arming,
            Arc::new(RwLock::new(1000.0)),
        );
        worker.check_volatility_breaker(&[]);
    }

    fn default_daily_lock_config() -> crate::config::DailyLockConfig {
        crate::config::DailyLockConfig::default()
    }

    fn default_config() -> ConfigSnapshot {
        ConfigSnapshot {
            version: 1,
            exchange: crate::config::ExchangeConfig {
                quote_asset: "USDT".to_string(),
                taker_bps: 10.0,
                maker_bps: 2.0,
            },
            symbols: vec!["BTCUSDT".to_string()],
            execution: Default::default(),
            risk: Default::default(),
            strategies: Default::default(),
            gates: Default::default(),
            breakers: Default::default(),
            daily_lock: Default::default(),
            news: Default::default(),
            transparency: Default::default(),
            observability: Default::default(),
        }
    }
}
