// =============================================================================
// Error taxonomy — typed domain errors for the engine's tick pipeline
// =============================================================================
//
// The teacher repo leans entirely on `anyhow::Result` with no typed domain
// errors, which is fine for a dashboard backend that mostly logs and moves
// on. The trading loop needs to branch on *kind* (retry vs. abort vs. fatal),
// so the tick-facing surface gets a `thiserror` enum instead; `anyhow` is
// still used underneath for "this bubbled from an external call" contexts.

use thiserror::Error;

/// Errors that can occur while evaluating or executing a single tick for one
/// symbol. Every variant maps to one of the taxonomy entries in the engine's
/// error-handling design: some are recovered locally (the tick aborts, the
/// symbol stays where it was), others are `Fatal` and halt new entries
/// globally without touching exits.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("market data unavailable for {symbol}: {reason}")]
    DataUnavailable { symbol: String, reason: String },

    #[error("insufficient order book depth for {symbol}: requested {requested}, available {available}")]
    InsufficientDepth {
        symbol: String,
        requested: f64,
        available: f64,
    },

    #[error("gate rejected: {kind}: {reason}")]
    GateRejected { kind: &'static str, reason: String },

    #[error("exchange call failed transiently: {0}")]
    ExchangeTransient(String),

    #[error("exchange reported a duplicate order: {0}")]
    ExchangeDuplicate(String),

    #[error("exchange permanently rejected the order: {0}")]
    ExchangePermanent(String),

    #[error("persistence operation failed: {0}")]
    PersistenceFailure(#[from] anyhow::Error),

    #[error("reconciliation conflict: {0}")]
    ReconciliationConflict(String),
}

impl EngineError {
    /// Whether this error implies the engine must stop accepting new
    /// entries until an operator resolves it. Exits are never inhibited by
    /// this classification — see the breaker manager's `exits_allowed`
    /// contract, which `EngineError` has no bearing on.
    pub fn halts_new_entries(&self) -> bool {
        matches!(
            self,
            EngineError::PersistenceFailure(_) | EngineError::ReconciliationConflict(_)
        )
    }
}

/// Errors raised while materialising or validating a [`crate::config::ConfigSnapshot`].
/// Always fatal at startup; a running engine never sees one because
/// snapshots, once activated, are immutable.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{field}: {reason}")]
    Invalid { field: String, reason: String },

    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}
