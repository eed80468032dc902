// =============================================================================
// Event sink (C11) — append-to-repository + live broadcast fan-out
// =============================================================================
//
// Grounded structurally on `decision_envelope.rs`'s envelope-construction
// style (named constructors per outcome) for the payload shape, extended
// with `seq`/`level`/`type`/`public_safe` per spec §3's Event entity. The
// fan-out itself rides on `tokio::sync::broadcast`, already a teacher
// dependency via `tokio = { features = ["full"] }` — no pack file shows a
// concrete broadcast-channel precedent beyond the dependency itself.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::repository::{new_id, Repository};
use crate::types::{Event, EventLevel};

/// Depth of the live broadcast channel. A subscriber slower than this falls
/// behind and is dropped — the spec requires a slow subscriber never block
/// the producer, so this is a `broadcast` channel (which drops the oldest
/// unread message for lagging receivers) rather than an unbounded `mpsc`.
const CHANNEL_CAPACITY: usize = 4096;

/// Fans out every appended event to persistent storage and to any live
/// subscriber. Subscribers receive events strictly in `seq` order; if a
/// subscriber lags past `CHANNEL_CAPACITY` it is signalled via
/// `RecvError::Lagged` and must backfill from the repository using
/// `get_events_after`.
#[derive(Clone)]
pub struct EventSink {
    repository: Repository,
    tx: broadcast::Sender<Arc<Event>>,
}

impl EventSink {
    pub fn new(repository: Repository) -> Self {
        let (tx, _rx) = broadcast::channel(CHANNEL_CAPACITY);
        Self { repository, tx }
    }

    /// Subscribe to the live event stream. Callers that need events from
    /// before this call should first read `get_events_after(last_seen_seq, ...)`
    /// from the repository, then subscribe to avoid missing the gap.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Event>> {
        self.tx.subscribe()
    }

    /// Build, persist, and broadcast one event. Returns the event with its
    /// allocated `seq` filled in.
    pub fn emit(
        &self,
        level: EventLevel,
        event_type: impl Into<String>,
        symbol: Option<String>,
        trade_id: Option<String>,
        payload: serde_json::Value,
        public_safe: bool,
    ) -> anyhow::Result<Event> {
        let draft = Event {
            id: new_id(),
            seq: 0,
            ts: Utc::now().to_rfc3339(),
            level,
            event_type: event_type.into(),
            symbol,
            trade_id,
            payload,
            public_safe,
        };
        let appended = self.repository.append_event(draft)?;

        // A broadcast send error just means there are currently no
        // subscribers — not a failure; the event is already durable.
        if self.tx.send(Arc::new(appended.clone())).is_err() {
            debug!(event_type = %appended.event_type, "no live subscribers for event");
        }
        Ok(appended)
    }

    pub fn info(
        &self,
        event_type: impl Into<String>,
        symbol: Option<&str>,
        payload: serde_json::Value,
    ) -> anyhow::Result<Event> {
        self.emit(
            EventLevel::Info,
            event_type,
            symbol.map(str::to_string),
            None,
            payload,
            true,
        )
    }

    pub fn warn(
        &self,
        event_type: impl Into<String>,
        symbol: Option<&str>,
        payload: serde_json::Value,
    ) -> anyhow::Result<Event> {
        let et = event_type.into();
        warn!(event_type = %et, symbol = ?symbol, "{}", et);
        self.emit(
            EventLevel::Warn,
            et,
            symbol.map(str::to_string),
            None,
            payload,
            true,
        )
    }

    pub fn error(
        &self,
        event_type: impl Into<String>,
        symbol: Option<&str>,
        payload: serde_json::Value,
    ) -> anyhow::Result<Event> {
        self.emit(
            EventLevel::Error,
            event_type,
            symbol.map(str::to_string),
            None,
            payload,
            false,
        )
    }

    pub fn repository(&self) -> &Repository {
        &self.repository
    }
}

impl std::fmt::Debug for EventSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSink")
            .field("subscribers", &self.tx.receiver_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::Repository;

    #[test]
    fn emit_assigns_monotonic_seq_and_broadcasts() {
        let repo = Repository::open_in_memory().unwrap();
        let sink = EventSink::new(repo);
        let mut rx = sink.subscribe();

        let e1 = sink.info("system.started", None, serde_json::json!({})).unwrap();
        let e2 = sink.info("market.tick", Some("BTCUSDT"), serde_json::json!({})).unwrap();
        assert!(e1.seq < e2.seq);

        let received = rx.try_recv().unwrap();
        assert_eq!(received.event_type, "system.started");
    }

    #[test]
    fn error_events_are_not_public_safe() {
        let repo = Repository::open_in_memory().unwrap();
        let sink = EventSink::new(repo);
        let e = sink.error("reconcile.conflict", None, serde_json::json!({})).unwrap();
        assert!(!e.public_safe);
    }
}
