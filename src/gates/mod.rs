// =============================================================================
// Gate sequence (C5/C6/C7 glue) — strict order, short-circuit on first reject
// =============================================================================
//
// Spec §4.9 step 3: liquidity -> profitability -> breakers -> daily lock ->
// max_concurrent_positions. Liquidity itself is checked by `cost::estimate_entry_cost`
// (an `InsufficientDepth` there is the liquidity gate's rejection); this
// module covers the pure profitability check plus the typed verdict the
// trading loop matches on to pick an event type.

pub mod profitability;

/// Which named gate rejected a candidate — used only to select the right
/// `gate.*.rejected` event type; the gates themselves stay decoupled (no
/// gate calls another).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateKind {
    Liquidity,
    Profitability,
    Breaker,
    News,
    DailyLock,
    MaxConcurrentPositions,
}

impl GateKind {
    pub fn event_type(self) -> &'static str {
        match self {
            GateKind::Liquidity => "gate.liquidity.rejected",
            GateKind::Profitability => "gate.profitability.rejected",
            GateKind::Breaker => "gate.breaker.rejected",
            GateKind::News => "gate.news.rejected",
            GateKind::DailyLock => "gate.daily_lock.rejected",
            GateKind::MaxConcurrentPositions => "gate.max_concurrent_positions.rejected",
        }
    }
}
