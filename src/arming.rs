// =============================================================================
// Arming (C8 adjacent) — two-step control gate for entering live mode
// =============================================================================
//
// New module; no teacher analogue (the teacher's `AccountMode`/`TradingMode`
// pair in `runtime_config.rs` is set once at startup and never changed by an
// in-process control surface — the dashboard API mutated `runtime_config.json`
// directly). Spec §4.8's live-mode safety requirement is a two-step protocol
// so a single mistaken flag flip can never put real money at risk: an
// operator must first `arm()` (a no-op safety acknowledgement, logged), then
// `start_live()` within the arming window, or the window lapses and both
// steps must be repeated. State is process-scoped only — a restart always
// comes back disarmed, live trading is never "sticky" across a crash.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::events::EventSink;

/// How long an `arm()` call stays valid before `start_live()` must be called
/// or the window lapses and arming must be repeated.
const ARM_WINDOW: Duration = Duration::from_secs(60);

struct ArmState {
    armed_at: Option<Instant>,
}

/// Tracks whether the engine is currently permitted to place live orders.
/// `live_active` is the single bit the executor consults per tick; everything
/// else here exists only to make flipping it deliberate.
pub struct ArmingController {
    live_active: AtomicBool,
    arm: Mutex<ArmState>,
    events: EventSink,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArmError {
    NotArmed,
    ArmWindowExpired,
}

impl ArmingController {
    pub fn new(events: EventSink) -> Self {
        Self {
            live_active: AtomicBool::new(false),
            arm: Mutex::new(ArmState { armed_at: None }),
            events,
        }
    }

    /// Step 1. Acknowledges intent to trade live; does not itself enable
    /// anything. Re-arming resets the window, so calling `arm()` twice in a
    /// row is harmless.
    pub fn arm(&self) {
        let mut state = self.arm.lock();
        state.armed_at = Some(Instant::now());
        let _ = self.events.warn(
            "arming.armed",
            None,
            serde_json::json!({ "window_secs": ARM_WINDOW.as_secs() }),
        );
    }

    /// Step 2. Only succeeds if `arm()` was called within the last
    /// `ARM_WINDOW`. On success, flips `live_active` true; on failure,
    /// `live_active` is left exactly as it was (never toggled off by a
    /// failed attempt, only ever turned on by a successful one).
    pub fn start_live(&self) -> Result<(), ArmError> {
        let mut state = self.arm.lock();
        let Some(armed_at) = state.armed_at else {
            return Err(ArmError::NotArmed);
        };
        if armed_at.elapsed() > ARM_WINDOW {
            state.armed_at = None;
            return Err(ArmError::ArmWindowExpired);
        }
        state.armed_at = None;
        self.live_active.store(true, Ordering::SeqCst);
        let _ = self.events.warn("arming.live_started", None, serde_json::json!({}));
        Ok(())
    }

    /// Immediately revoke live permission. Idempotent, always succeeds, and
    /// carries no arming precondition — stopping live trading must never be
    /// harder than starting it.
    pub fn stop_live(&self) {
        self.live_active.store(false, Ordering::SeqCst);
        let _ = self.events.warn("arming.live_stopped", None, serde_json::json!({}));
    }

    pub fn is_live_active(&self) -> bool {
        self.live_active.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for ArmingController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArmingController")
            .field("live_active", &self.is_live_active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::Repository;

    fn controller() -> ArmingController {
        let repo = Repository::open_in_memory().unwrap();
        ArmingController::new(EventSink::new(repo))
    }

    #[test]
    fn start_live_without_arm_fails() {
        let c = controller();
        assert_eq!(c.start_live(), Err(ArmError::NotArmed));
        assert!(!c.is_live_active());
    }

    #[test]
    fn arm_then_start_live_succeeds() {
        let c = controller();
        c.arm();
        assert!(c.start_live().is_ok());
        assert!(c.is_live_active());
    }

    #[test]
    fn stop_live_always_succeeds_and_clears_flag() {
        let c = controller();
        c.arm();
        c.start_live().unwrap();
        c.stop_live();
        assert!(!c.is_live_active());
    }

    #[test]
    fn start_live_consumes_the_arm_window() {
        let c = controller();
        c.arm();
        c.start_live().unwrap();
        c.stop_live();
        // Calling start_live again without re-arming must fail: the window
        // was consumed by the first successful call.
        assert_eq!(c.start_live(), Err(ArmError::NotArmed));
    }
}
