//! Backfillable event cursors.
//!
//! A cursor is a lazy, restartable sequence over the log: all delivery
//! comes from the retained record store, in sequence order, so nothing is
//! ever skipped; the broadcast channel only wakes the cursor when new
//! records land. Late subscribers see everything, and a subscriber that
//! lags the channel loses wakeups, never records.

use crate::EventLog;
use bedrock::{EventFilter, KernelEvent};
use std::sync::Arc;
use tokio::sync::broadcast;

/// How many records one history read pulls at a time.
const READ_BATCH: usize = 64;

/// A filtered, resumable position in the event log.
pub struct EventCursor {
    log: Arc<EventLog>,
    filter: EventFilter,
    /// The next sequence number this cursor has not yet examined.
    next_seq: u64,
    rx: broadcast::Receiver<KernelEvent>,
}

impl EventCursor {
    pub(crate) fn new(
        log: Arc<EventLog>,
        filter: EventFilter,
        start_seq: u64,
        rx: broadcast::Receiver<KernelEvent>,
    ) -> Self {
        Self {
            log,
            filter,
            next_seq: start_seq.max(1),
            rx,
        }
    }

    /// The sequence number of the next event this cursor will examine.
    #[must_use]
    pub fn position(&self) -> u64 {
        self.next_seq
    }

    /// Matching events already in the log, without waiting. Advances the
    /// cursor past everything it examined.
    pub async fn drain_backlog(&mut self, limit: usize) -> Vec<KernelEvent> {
        let mut out = Vec::new();
        loop {
            let batch = self
                .log
                .read_since(self.next_seq, &EventFilter::default(), READ_BATCH)
                .await;
            if batch.is_empty() {
                return out;
            }
            for event in batch {
                self.next_seq = event.seq + 1;
                if self.filter.matches(&event) {
                    out.push(event);
                    if out.len() == limit {
                        return out;
                    }
                }
            }
        }
    }

    /// The next matching event, waiting for a live append if the backlog
    /// is exhausted. Returns `None` when the log has shut down.
    pub async fn next(&mut self) -> Option<KernelEvent> {
        loop {
            let batch = self
                .log
                .read_since(self.next_seq, &EventFilter::default(), READ_BATCH)
                .await;
            if !batch.is_empty() {
                for event in batch {
                    self.next_seq = event.seq + 1;
                    if self.filter.matches(&event) {
                        return Some(event);
                    }
                }
                continue;
            }

            match self.rx.recv().await {
                // Only a wakeup — the record itself is read from history
                // so that gaps and lag cannot drop anything.
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::debug!(missed, "event cursor lagged, backfilling");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bedrock::{EventDraft, EventKind};

    fn draft(kind: EventKind, principal: &str) -> EventDraft {
        EventDraft::new(kind, principal, serde_json::json!({}))
    }

    #[tokio::test]
    async fn late_subscriber_backfills_history() {
        let log = Arc::new(EventLog::in_memory());
        log.append(draft(EventKind::Action, "a")).await.unwrap();
        log.append(draft(EventKind::Thinking, "a")).await.unwrap();

        let mut cursor = log.subscribe(EventFilter::default());
        assert_eq!(cursor.next().await.unwrap().seq, 1);
        assert_eq!(cursor.next().await.unwrap().seq, 2);
    }

    #[tokio::test]
    async fn cursor_follows_live_appends() {
        let log = Arc::new(EventLog::in_memory());
        let mut cursor = log.subscribe(EventFilter::default());

        let writer = Arc::clone(&log);
        let handle = tokio::spawn(async move {
            writer.append(draft(EventKind::Action, "a")).await.unwrap();
        });

        let event = cursor.next().await.unwrap();
        assert_eq!(event.seq, 1);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn filter_skips_unmatched_events() {
        let log = Arc::new(EventLog::in_memory());
        log.append(draft(EventKind::Action, "a")).await.unwrap();
        log.append(draft(EventKind::AgentFrozen, "b")).await.unwrap();
        log.append(draft(EventKind::Action, "b")).await.unwrap();

        let filter = EventFilter {
            principal_id: Some("b".into()),
            ..Default::default()
        };
        let mut cursor = log.subscribe(filter);
        assert_eq!(cursor.next().await.unwrap().kind, EventKind::AgentFrozen);
        assert_eq!(cursor.next().await.unwrap().kind, EventKind::Action);
    }

    #[tokio::test]
    async fn drain_backlog_returns_at_most_limit() {
        let log = Arc::new(EventLog::in_memory());
        for _ in 0..5 {
            log.append(draft(EventKind::Action, "a")).await.unwrap();
        }
        let mut cursor = log.subscribe(EventFilter::default());
        assert_eq!(cursor.drain_backlog(3).await.len(), 3);
        assert_eq!(cursor.drain_backlog(10).await.len(), 2);
        assert!(cursor.drain_backlog(10).await.is_empty());
    }

    #[tokio::test]
    async fn subscribe_from_starts_mid_stream() {
        let log = Arc::new(EventLog::in_memory());
        for _ in 0..4 {
            log.append(draft(EventKind::Action, "a")).await.unwrap();
        }
        let mut cursor = log.subscribe_from(EventFilter::default(), 3);
        assert_eq!(cursor.next().await.unwrap().seq, 3);
        assert_eq!(cursor.next().await.unwrap().seq, 4);
    }
}
