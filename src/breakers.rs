// =============================================================================
// Breaker manager (C6) — time-bounded entry pauses, never touches exits
// =============================================================================
//
// Grounded on `risk.rs`'s `RwLock<Inner>` + date-rollover (`maybe_reset_daily`)
// idiom for the concurrency shape, but the breaker *kinds* and expiry
// semantics are new, built to spec §4.6 — the teacher's four breakers
// (daily loss / consecutive losses / max drawdown / trade limit) measure
// different things and live on in `daily_lock.rs` (daily loss) and here
// (consecutive losses), not as a direct port.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

use crate::events::EventSink;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum BreakerKind {
    Volatility,
    Spread,
    ConsecutiveLosses,
    ExchangeInstability,
    News,
}

impl BreakerKind {
    pub fn as_str(self) -> &'static str {
        match self {
            BreakerKind::Volatility => "volatility",
            BreakerKind::Spread => "spread",
            BreakerKind::ConsecutiveLosses => "consecutive_losses",
            BreakerKind::ExchangeInstability => "exchange_instability",
            BreakerKind::News => "news",
        }
    }
}

#[derive(Debug, Clone)]
struct ActivePause {
    active_until: DateTime<Utc>,
    reason: String,
    context: serde_json::Value,
}

/// Mapping from breaker kind to its active pause, if any. Entry is blocked
/// while any breaker's `active_until` is in the future; exits are never
/// consulted against this state anywhere in the engine — see
/// `exits_allowed`, which is a hard-coded `true`.
pub struct BreakerManager {
    state: RwLock<HashMap<BreakerKind, ActivePause>>,
    events: EventSink,
}

impl BreakerManager {
    pub fn new(events: EventSink) -> Self {
        Self {
            state: RwLock::new(HashMap::new()),
            events,
        }
    }

    /// Activate (or extend) a breaker. Emits `breaker.triggered`.
    pub fn trigger(
        &self,
        kind: BreakerKind,
        now: DateTime<Utc>,
        pause_minutes: i64,
        reason: impl Into<String>,
        symbol: Option<&str>,
    ) {
        let reason = reason.into();
        let active_until = now + chrono::Duration::minutes(pause_minutes);
        let context = serde_json::json!({
            "kind": kind.as_str(),
            "active_until": active_until.to_rfc3339(),
            "pause_minutes": pause_minutes,
        });
        self.state.write().insert(
            kind,
            ActivePause {
                active_until,
                reason: reason.clone(),
                context: context.clone(),
            },
        );
        let _ = self.events.warn("breaker.triggered", symbol, context);
        let _ = reason;
    }

    /// Sweep expired breakers, emitting `breaker.expired` for each one that
    /// just lapsed, then report whether entries are currently allowed. The
    /// triggering `BreakerKind` is returned alongside the verdict so callers
    /// can tell a `News` pause from every other kind — they map to distinct
    /// `gate.*.rejected` event types.
    pub fn entries_allowed(&self, now: DateTime<Utc>) -> (bool, Option<BreakerKind>, Option<String>) {
        let mut expired_kinds = Vec::new();
        {
            let mut state = self.state.write();
            state.retain(|kind, pause| {
                if pause.active_until <= now {
                    expired_kinds.push(*kind);
                    false
                } else {
                    true
                }
            });
        }
        for kind in expired_kinds {
            let _ = self.events.info(
                "breaker.expired",
                None,
                serde_json::json!({ "kind": kind.as_str() }),
            );
        }

        let state = self.state.read();
        if let Some((kind, pause)) = state.iter().find(|(_, p)| p.active_until > now) {
            let remaining = (pause.active_until - now).num_seconds().max(0);
            return (
                false,
                Some(*kind),
                Some(format!(
                    "{} breaker active, reason={}, remaining={}s",
                    kind.as_str(),
                    pause.reason,
                    remaining
                )),
            );
        }
        (true, None, None)
    }

    /// Exits are never inhibited by any breaker. This is a contract, not a
    /// lookup: no code path in the engine may consult breaker state for an
    /// exit decision, so this simply returns `true` unconditionally.
    pub const fn exits_allowed(&self) -> bool {
        true
    }

    pub fn active_breakers(&self) -> Vec<(BreakerKind, DateTime<Utc>, String)> {
        self.state
            .read()
            .iter()
            .map(|(k, p)| (*k, p.active_until, p.reason.clone()))
            .collect()
    }
}

impl std::fmt::Debug for BreakerManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BreakerManager")
            .field("active", &self.state.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::Repository;

    fn manager() -> BreakerManager {
        let repo = Repository::open_in_memory().unwrap();
        BreakerManager::new(EventSink::new(repo))
    }

    #[test]
    fn trigger_blocks_entries_until_expiry() {
        let mgr = manager();
        let t0 = Utc::now();
        mgr.trigger(BreakerKind::Spread, t0, 30, "spread too wide", Some("BTCUSDT"));

        let (allowed, kind, _) = mgr.entries_allowed(t0 + chrono::Duration::minutes(15));
        assert!(!allowed);
        assert_eq!(kind, Some(BreakerKind::Spread));

        let (allowed, kind, _) = mgr.entries_allowed(t0 + chrono::Duration::minutes(31));
        assert!(allowed);
        assert_eq!(kind, None);
    }

    #[test]
    fn exits_always_allowed_even_while_triggered() {
        let mgr = manager();
        mgr.trigger(BreakerKind::Volatility, Utc::now(), 60, "atr spike", None);
        assert!(mgr.exits_allowed());
    }

    #[test]
    fn pause_minutes_boundary_exactly_at_expiry_reopens() {
        let mgr = manager();
        let t0 = Utc::now();
        mgr.trigger(BreakerKind::News, t0, 30, "negative news", None);
        let (allowed, kind, _) = mgr.entries_allowed(t0 + chrono::Duration::minutes(30));
        assert!(allowed);
        assert_eq!(kind, None);
    }

    #[test]
    fn news_breaker_is_distinguishable_from_other_kinds() {
        let mgr = manager();
        let t0 = Utc::now();
        mgr.trigger(BreakerKind::News, t0, 30, "negative news", None);
        let (allowed, kind, _) = mgr.entries_allowed(t0 + chrono::Duration::minutes(1));
        assert!(!allowed);
        assert_eq!(kind, Some(BreakerKind::News));
    }
}
