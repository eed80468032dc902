// =============================================================================
// Daily profit lock (C7) — STOP / OVERDRIVE, rebuilt from storage on start
// =============================================================================
//
// Grounded on `risk.rs`'s `Inner` + `maybe_reset_daily()` double-checked-lock
// rollover idiom (read lock to check the day key cheaply, drop it, take the
// write lock only when a rollover is actually due). The STOP/OVERDRIVE modes
// and trailing-floor math are new, built to spec §4.7; the teacher's risk
// engine only ever has one daily-loss breaker, not a target-then-trail one.

use chrono::{DateTime, TimeZone, Utc};
use chrono_tz::Tz;
use parking_lot::RwLock;

use crate::config::DailyLockConfig;
use crate::events::EventSink;
use crate::repository::Repository;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Stop,
    Overdrive,
}

impl LockMode {
    fn parse(s: &str) -> Self {
        if s == "OVERDRIVE" {
            LockMode::Overdrive
        } else {
            LockMode::Stop
        }
    }
}

struct Inner {
    day_key: String,
    realized_pnl_today: f64,
    peak_pnl_today: f64,
    /// Whether `daily_lock.engaged` has already fired for today's first
    /// crossing of `daily_target_usd`. Reset on day rollover so the event
    /// can fire again tomorrow.
    target_engaged: bool,
    /// Last verdict `entries_allowed` returned, so a transition into
    /// blocked can be detected and `daily_lock.entries_paused` emitted only
    /// once per transition, not on every tick while still blocked.
    last_entries_allowed: bool,
}

/// Tracks today's realized PnL against `daily_target_usd` and, in OVERDRIVE,
/// a trailing floor below the session's peak. The day boundary is resolved
/// in the configured IANA timezone; on an ambiguous local hour (a DST
/// fall-back) `chrono`'s `LocalResult::Ambiguous` resolves to the *earlier*
/// candidate, matching `chrono`'s own default and avoiding a day key that
/// jumps backwards mid-session.
pub struct DailyLockManager {
    state: RwLock<Inner>,
    events: EventSink,
}

impl DailyLockManager {
    /// Rebuild today's realized PnL from the repository so a restart mid-day
    /// does not forget progress toward the target.
    pub fn rebuild_from_storage(
        repository: &Repository,
        events: EventSink,
        config: &DailyLockConfig,
        now: DateTime<Utc>,
    ) -> anyhow::Result<Self> {
        let day_key = compute_day_key(now, &config.timezone);
        let closed = repository.get_today_closed_trades(&day_key)?;
        let realized: f64 = closed.iter().filter_map(|t| t.realized_pnl_usd).sum();
        Ok(Self {
            state: RwLock::new(Inner {
                day_key,
                realized_pnl_today: realized,
                peak_pnl_today: realized,
                target_engaged: realized >= config.daily_target_usd,
                last_entries_allowed: true,
            }),
            events,
        })
    }

    /// Roll `day_key` over to `now`'s date if it has changed, resetting
    /// today's accumulators. Cheap read-check, write only on actual rollover.
    fn maybe_reset_day(&self, config: &DailyLockConfig, now: DateTime<Utc>) {
        let current_key = compute_day_key(now, &config.timezone);
        if self.state.read().day_key == current_key {
            return;
        }
        let mut inner = self.state.write();
        if inner.day_key == current_key {
            return;
        }
        inner.day_key = current_key;
        inner.realized_pnl_today = 0.0;
        inner.peak_pnl_today = 0.0;
        inner.target_engaged = false;
        inner.last_entries_allowed = true;
        let _ = self.events.info(
            "daily_lock.reset",
            None,
            serde_json::json!({ "day_key": inner.day_key }),
        );
    }

    /// Record a just-closed trade's realized PnL against today's total.
    /// Emits `daily_lock.engaged` the first time today's realized PnL
    /// crosses `daily_target_usd` (STOP or OVERDRIVE alike), and, in
    /// OVERDRIVE, `daily_lock.floor_updated` whenever the trailing floor
    /// moves because a new peak was set.
    pub fn record_realized_pnl(&self, config: &DailyLockConfig, now: DateTime<Utc>, pnl_usd: f64) {
        self.maybe_reset_day(config, now);
        let mut inner = self.state.write();
        inner.realized_pnl_today += pnl_usd;

        if !inner.target_engaged && inner.realized_pnl_today >= config.daily_target_usd {
            inner.target_engaged = true;
            let _ = self.events.info(
                "daily_lock.engaged",
                None,
                serde_json::json!({
                    "mode": config.mode,
                    "daily_target_usd": config.daily_target_usd,
                    "realized_pnl_today": inner.realized_pnl_today,
                }),
            );
        }

        if LockMode::parse(&config.mode) == LockMode::Overdrive {
            let old_peak = inner.peak_pnl_today;
            inner.peak_pnl_today = inner.peak_pnl_today.max(inner.realized_pnl_today);
            if inner.peak_pnl_today != old_peak {
                let floor = overdrive_floor(config, inner.peak_pnl_today);
                let _ = self.events.info(
                    "daily_lock.floor_updated",
                    None,
                    serde_json::json!({
                        "peak_pnl_today": inner.peak_pnl_today,
                        "floor": floor,
                    }),
                );
            }
        }
    }

    /// Whether new entries may be opened right now. Never consulted for
    /// exits — closing an existing position is always allowed regardless of
    /// lock state (see `exits_allowed`). Emits `daily_lock.entries_paused`
    /// the moment the verdict transitions from allowed to blocked; it is not
    /// re-emitted on every subsequent tick while the block persists.
    pub fn entries_allowed(
        &self,
        config: &DailyLockConfig,
        now: DateTime<Utc>,
    ) -> (bool, Option<String>) {
        self.maybe_reset_day(config, now);
        let mut inner = self.state.write();
        let target_reached = inner.realized_pnl_today >= config.daily_target_usd;

        let verdict = match LockMode::parse(&config.mode) {
            LockMode::Stop => {
                if target_reached {
                    (
                        false,
                        Some(format!(
                            "daily target {:.2} reached ({:.2}), STOP mode halts new entries",
                            config.daily_target_usd, inner.realized_pnl_today
                        )),
                    )
                } else {
                    (true, None)
                }
            }
            LockMode::Overdrive => {
                if !target_reached {
                    (true, None)
                } else {
                    let floor = overdrive_floor(config, inner.peak_pnl_today);
                    if inner.realized_pnl_today <= floor {
                        if config.force_close_on_floor {
                            let _ = self.events.warn(
                                "daily_lock.floor_breached",
                                None,
                                serde_json::json!({
                                    "realized_pnl_today": inner.realized_pnl_today,
                                    "floor": floor,
                                    "peak": inner.peak_pnl_today,
                                }),
                            );
                        }
                        (
                            false,
                            Some(format!(
                                "OVERDRIVE trailing floor {:.2} breached (pnl {:.2}, peak {:.2})",
                                floor, inner.realized_pnl_today, inner.peak_pnl_today
                            )),
                        )
                    } else {
                        (true, None)
                    }
                }
            }
        };

        if inner.last_entries_allowed && !verdict.0 {
            let _ = self.events.warn(
                "daily_lock.entries_paused",
                None,
                serde_json::json!({
                    "mode": config.mode,
                    "realized_pnl_today": inner.realized_pnl_today,
                    "reason": verdict.1,
                }),
            );
        }
        inner.last_entries_allowed = verdict.0;
        verdict
    }

    /// The daily lock never blocks exits, in STOP or OVERDRIVE alike.
    pub const fn exits_allowed(&self) -> bool {
        true
    }

    pub fn realized_pnl_today(&self) -> f64 {
        self.state.read().realized_pnl_today
    }
}

impl std::fmt::Debug for DailyLockManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.state.read();
        f.debug_struct("DailyLockManager")
            .field("day_key", &inner.day_key)
            .field("realized_pnl_today", &inner.realized_pnl_today)
            .finish()
    }
}

/// `max(daily_target, peak_pnl_today - trailing_buffer)` — the floor never
/// drops below the daily target itself, even when `trailing_buffer_usd` is
/// large enough that `peak - trailing_buffer` would otherwise fall below it.
fn overdrive_floor(config: &DailyLockConfig, peak_pnl_today: f64) -> f64 {
    (peak_pnl_today - config.trailing_buffer_usd).max(config.daily_target_usd)
}

/// Resolve `now` to a `YYYY-MM-DD` key in `tz_name`. An invalid timezone name
/// cannot reach here — `ConfigSnapshot::validate` rejects it at load time —
/// so this falls back to UTC only as a defensive last resort.
fn compute_day_key(now: DateTime<Utc>, tz_name: &str) -> String {
    let tz: Tz = tz_name.parse().unwrap_or(chrono_tz::UTC);
    let local = tz.from_utc_datetime(&now.naive_utc());
    local.format("%Y-%m-%d").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone as _;

    fn config(mode: &str) -> DailyLockConfig {
        DailyLockConfig {
            mode: mode.to_string(),
            daily_target_usd: 2.0,
            trailing_buffer_usd: 1.0,
            timezone: "UTC".to_string(),
            force_close_on_floor: false,
        }
    }

    fn manager() -> DailyLockManager {
        let repo = Repository::open_in_memory().unwrap();
        let events = EventSink::new(repo.clone());
        DailyLockManager::rebuild_from_storage(&repo, events, &config("STOP"), Utc::now()).unwrap()
    }

    #[test]
    fn stop_mode_blocks_once_target_reached() {
        let mgr = manager();
        let cfg = config("STOP");
        let now = Utc::now();
        let (allowed, _) = mgr.entries_allowed(&cfg, now);
        assert!(allowed);

        mgr.record_realized_pnl(&cfg, now, 2.5);
        let (allowed, reason) = mgr.entries_allowed(&cfg, now);
        assert!(!allowed);
        assert!(reason.unwrap().contains("STOP"));
    }

    #[test]
    fn overdrive_keeps_trading_above_floor_then_blocks_below_it() {
        let mgr = manager();
        let cfg = config("OVERDRIVE");
        let now = Utc::now();

        mgr.record_realized_pnl(&cfg, now, 3.0);
        let (allowed, _) = mgr.entries_allowed(&cfg, now);
        assert!(allowed, "above target but at peak, still within floor");

        mgr.record_realized_pnl(&cfg, now, -2.5); // pnl now 0.5, peak 3.0, floor 2.0
        let (allowed, reason) = mgr.entries_allowed(&cfg, now);
        assert!(!allowed);
        assert!(reason.unwrap().contains("floor"));
    }

    #[test]
    fn day_rollover_resets_accumulators() {
        let mgr = manager();
        let cfg = config("STOP");
        let day1 = Utc.with_ymd_and_hms(2026, 7, 26, 12, 0, 0).unwrap();
        mgr.record_realized_pnl(&cfg, day1, 5.0);
        assert!((mgr.realized_pnl_today() - 5.0).abs() < 1e-9);

        let day2 = Utc.with_ymd_and_hms(2026, 7, 27, 0, 30, 0).unwrap();
        let (allowed, _) = mgr.entries_allowed(&cfg, day2);
        assert!(allowed);
        assert!(mgr.realized_pnl_today().abs() < 1e-9);
    }

    #[test]
    fn overdrive_floor_never_drops_below_daily_target() {
        // daily_target=2.0, peak=3.0, trailing_buffer=3.0: a naive
        // peak - trailing_buffer would be 0.0, but the floor must clamp to
        // the daily target.
        let mgr = manager();
        let cfg = DailyLockConfig {
            mode: "OVERDRIVE".to_string(),
            daily_target_usd: 2.0,
            trailing_buffer_usd: 3.0,
            timezone: "UTC".to_string(),
            force_close_on_floor: false,
        };
        let now = Utc::now();

        mgr.record_realized_pnl(&cfg, now, 3.0);
        let (allowed, _) = mgr.entries_allowed(&cfg, now);
        assert!(allowed, "pnl 3.0 is above the clamped floor of 2.0");

        mgr.record_realized_pnl(&cfg, now, -1.5); // pnl now 1.5, below the 2.0 floor
        let (allowed, reason) = mgr.entries_allowed(&cfg, now);
        assert!(!allowed);
        assert!(reason.unwrap().contains("2.00"));
    }

    #[test]
    fn blocks_entries_at_exactly_the_floor_not_only_below_it() {
        let mgr = manager();
        let cfg = config("OVERDRIVE");
        let now = Utc::now();

        mgr.record_realized_pnl(&cfg, now, 3.0); // peak 3.0, floor 2.0
        mgr.record_realized_pnl(&cfg, now, -1.0); // pnl now 2.0, exactly at the floor
        let (allowed, _) = mgr.entries_allowed(&cfg, now);
        assert!(!allowed, "pnl exactly at the floor must block, not just below it");
    }

    #[test]
    fn engaged_fires_once_on_first_target_crossing() {
        let mgr = manager();
        let cfg = config("STOP");
        let now = Utc::now();
        let mut rx = mgr.events.subscribe();

        mgr.record_realized_pnl(&cfg, now, 2.5);
        let first = rx.try_recv().expect("daily_lock.engaged should fire");
        assert_eq!(first.event_type, "daily_lock.engaged");

        mgr.record_realized_pnl(&cfg, now, 0.1);
        assert!(
            rx.try_recv().is_err(),
            "engaged must not re-fire once already engaged today"
        );
    }

    #[test]
    fn floor_updated_fires_only_when_peak_changes() {
        let mgr = manager();
        let cfg = config("OVERDRIVE");
        let now = Utc::now();
        let mut rx = mgr.events.subscribe();

        mgr.record_realized_pnl(&cfg, now, 3.0); // crosses target and sets a new peak
        let types: Vec<String> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|e| e.event_type.clone())
            .collect();
        assert!(types.contains(&"daily_lock.floor_updated".to_string()));

        // pnl moves but stays below the existing peak: no new floor_updated.
        mgr.record_realized_pnl(&cfg, now, -0.5);
        let types: Vec<String> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|e| e.event_type.clone())
            .collect();
        assert!(!types.contains(&"daily_lock.floor_updated".to_string()));
    }

    #[test]
    fn entries_paused_fires_only_on_the_allowed_to_blocked_transition() {
        let mgr = manager();
        let cfg = config("STOP");
        let now = Utc::now();
        let mut rx = mgr.events.subscribe();

        mgr.record_realized_pnl(&cfg, now, 2.5);
        let (allowed, _) = mgr.entries_allowed(&cfg, now);
        assert!(!allowed);
        let types: Vec<String> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|e| e.event_type.clone())
            .collect();
        assert!(types.contains(&"daily_lock.entries_paused".to_string()));

        // Still blocked on the next check: must not re-fire.
        let (allowed, _) = mgr.entries_allowed(&cfg, now);
        assert!(!allowed);
        let types: Vec<String> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|e| e.event_type.clone())
            .collect();
        assert!(!types.contains(&"daily_lock.entries_paused".to_string()));
    }
}
