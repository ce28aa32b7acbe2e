#![deny(missing_docs)]
//! The append-only event log for the agora kernel.
//!
//! Every record carries a monotonic sequence number assigned at append
//! time; `seq` is the total order of the world. Records are retained in
//! memory for queries and backfill, optionally mirrored to a line-delimited
//! JSON file sink rotated by hour, and fanned out to subscribers through a
//! broadcast channel. Subscriptions are cursors over the log, not callback
//! lists — a late subscriber can start from any sequence number.

pub mod cursor;
pub mod sink;

pub use cursor::EventCursor;
pub use sink::JsonlSink;

use bedrock::{EventDraft, EventFilter, EventLogError, KernelEvent};
use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};

/// Capacity of the live fan-out channel. Slow subscribers that overrun it
/// fall back to backfill from retained history.
const BROADCAST_CAPACITY: usize = 256;

/// The append-only, totally ordered event log.
pub struct EventLog {
    seq: AtomicU64,
    tick: AtomicU64,
    debug_ticks: bool,
    retained: RwLock<Vec<KernelEvent>>,
    sink: Option<JsonlSink>,
    live: broadcast::Sender<KernelEvent>,
}

impl EventLog {
    /// A log that retains records in memory only.
    #[must_use]
    pub fn in_memory() -> Self {
        let (live, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            seq: AtomicU64::new(0),
            tick: AtomicU64::new(0),
            debug_ticks: false,
            retained: RwLock::new(Vec::new()),
            sink: None,
            live,
        }
    }

    /// A log that also mirrors every record to a JSONL sink.
    #[must_use]
    pub fn with_sink(sink: JsonlSink) -> Self {
        let mut log = Self::in_memory();
        log.sink = Some(sink);
        log
    }

    /// Stamp records with the debug tick counter.
    #[must_use]
    pub fn with_debug_ticks(mut self) -> Self {
        self.debug_ticks = true;
        self
    }

    /// Advance the debug tick counter. A tick is an ordering aid for
    /// replay, never a scheduling primitive.
    pub fn advance_tick(&self) -> u64 {
        self.tick.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// The sequence number the next append will receive. A cursor started
    /// here sees only future events.
    pub fn head_seq(&self) -> u64 {
        self.seq.load(Ordering::SeqCst) + 1
    }

    /// Append one record, assigning `seq` and `ts`.
    pub async fn append(&self, draft: EventDraft) -> Result<KernelEvent, EventLogError> {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        let event = KernelEvent {
            seq,
            ts: Utc::now(),
            kind: draft.kind,
            principal_id: draft.principal_id,
            data: draft.data,
            tick: self
                .debug_ticks
                .then(|| self.tick.load(Ordering::SeqCst)),
        };

        {
            let mut retained = self.retained.write().await;
            retained.push(event.clone());
        }
        if let Some(sink) = &self.sink {
            sink.append(&event).await?;
        }
        // Nobody listening is fine.
        let _ = self.live.send(event.clone());
        Ok(event)
    }

    /// Matching events with `seq >= since_seq`, at most `limit`.
    pub async fn read_since(
        &self,
        since_seq: u64,
        filter: &EventFilter,
        limit: usize,
    ) -> Vec<KernelEvent> {
        let retained = self.retained.read().await;
        // seq is 1-based and dense, so the start index is directly computable.
        let start = since_seq.saturating_sub(1) as usize;
        retained
            .iter()
            .skip(start)
            .filter(|e| filter.matches(e))
            .take(limit)
            .cloned()
            .collect()
    }

    /// Total number of retained records.
    pub async fn len(&self) -> usize {
        self.retained.read().await.len()
    }

    /// Whether nothing has been logged yet.
    pub async fn is_empty(&self) -> bool {
        self.retained.read().await.is_empty()
    }

    /// A cursor starting at the first record, following live appends after
    /// the backlog is drained.
    pub fn subscribe(self: &Arc<Self>, filter: EventFilter) -> EventCursor {
        self.subscribe_from(filter, 1)
    }

    /// A cursor starting at `start_seq`.
    pub fn subscribe_from(self: &Arc<Self>, filter: EventFilter, start_seq: u64) -> EventCursor {
        EventCursor::new(Arc::clone(self), filter, start_seq, self.live.subscribe())
    }

    /// Flush the sink, if any. Called at shutdown.
    pub async fn flush(&self) -> Result<(), EventLogError> {
        if let Some(sink) = &self.sink {
            sink.flush().await?;
        }
        Ok(())
    }
}
