//! Event records — the append-only, totally ordered history of the world.

use crate::action::ActionResult;
use crate::id::PrincipalId;
use crate::intent::Intent;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The closed set of event types.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// One dispatcher call: nests intent and result.
    Action,
    /// Summary of an LLM call made on a principal's behalf.
    Thinking,
    /// A resource was metered outside a dispatch (e.g. gateway settlement).
    ResourceConsumed,
    /// An artifact came into existence.
    ArtifactCreated,
    /// A sandboxed invocation completed.
    InvokeSuccess,
    /// A sandboxed invocation failed.
    InvokeFailure,
    /// An agent loop hibernated.
    AgentFrozen,
    /// An agent loop woke up.
    AgentUnfrozen,
}

/// One record in the event log.
///
/// `seq` is the monotonic total order; `ts` is wall-clock; `tick` is an
/// optional debug counter — never a scheduling primitive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KernelEvent {
    /// Monotonic sequence number, assigned by the log on append.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub ts: DateTime<Utc>,
    /// Event type.
    #[serde(rename = "type")]
    pub kind: EventKind,
    /// The principal the event concerns.
    pub principal_id: PrincipalId,
    /// Type-specific payload.
    #[serde(default)]
    pub data: serde_json::Value,
    /// Optional debug tick counter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tick: Option<u64>,
}

/// Payload builders for the event kinds the kernel emits. The log assigns
/// `seq` and `ts` at append time; callers construct [`EventDraft`]s.
#[derive(Debug, Clone, PartialEq)]
pub struct EventDraft {
    /// Event type.
    pub kind: EventKind,
    /// The principal the event concerns.
    pub principal_id: PrincipalId,
    /// Type-specific payload.
    pub data: serde_json::Value,
}

impl EventDraft {
    /// An `action` event nesting the intent and its result, so that a
    /// single dispatch never produces duplicate logging.
    #[must_use]
    pub fn action(intent: &Intent, result: &ActionResult) -> Self {
        Self {
            kind: EventKind::Action,
            principal_id: intent.principal().clone(),
            data: serde_json::json!({
                "intent": intent,
                "result": result,
            }),
        }
    }

    /// A freeform event of the given kind.
    pub fn new(kind: EventKind, principal_id: impl Into<PrincipalId>, data: serde_json::Value) -> Self {
        Self {
            kind,
            principal_id: principal_id.into(),
            data,
        }
    }
}

/// A declarative filter over future (and past) events.
///
/// Trigger artifacts serialize one of these in their content; subscribers
/// use them to narrow cursors. Empty fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventFilter {
    /// Match any of these kinds (empty = all kinds).
    #[serde(default)]
    pub kinds: Vec<EventKind>,
    /// Match only events concerning this principal.
    #[serde(default)]
    pub principal_id: Option<PrincipalId>,
    /// Match only events whose data contains this key.
    #[serde(default)]
    pub data_key: Option<String>,
}

impl EventFilter {
    /// Whether the filter matches an event.
    #[must_use]
    pub fn matches(&self, event: &KernelEvent) -> bool {
        if !self.kinds.is_empty() && !self.kinds.contains(&event.kind) {
            return false;
        }
        if let Some(ref principal) = self.principal_id
            && &event.principal_id != principal
        {
            return false;
        }
        if let Some(ref key) = self.data_key
            && event.data.get(key).is_none()
        {
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(kind: EventKind, principal: &str) -> KernelEvent {
        KernelEvent {
            seq: 1,
            ts: Utc::now(),
            kind,
            principal_id: principal.into(),
            data: serde_json::json!({"amount": 3}),
            tick: None,
        }
    }

    #[test]
    fn kind_serializes_as_type_field() {
        let json = serde_json::to_value(event(EventKind::AgentFrozen, "p1")).unwrap();
        assert_eq!(json["type"], "agent_frozen");
        assert_eq!(json["principal_id"], "p1");
        assert!(json.get("tick").is_none());
    }

    #[test]
    fn empty_filter_matches_everything() {
        assert!(EventFilter::default().matches(&event(EventKind::Action, "x")));
    }

    #[test]
    fn filter_narrows_by_kind_and_principal() {
        let filter = EventFilter {
            kinds: vec![EventKind::Action, EventKind::InvokeFailure],
            principal_id: Some("alice".into()),
            data_key: None,
        };
        assert!(filter.matches(&event(EventKind::Action, "alice")));
        assert!(!filter.matches(&event(EventKind::Action, "bob")));
        assert!(!filter.matches(&event(EventKind::Thinking, "alice")));
    }

    #[test]
    fn filter_narrows_by_data_key() {
        let filter = EventFilter {
            data_key: Some("amount".into()),
            ..Default::default()
        };
        assert!(filter.matches(&event(EventKind::Action, "x")));
        let filter = EventFilter {
            data_key: Some("missing".into()),
            ..Default::default()
        };
        assert!(!filter.matches(&event(EventKind::Action, "x")));
    }

    #[test]
    fn action_draft_nests_intent_and_result() {
        let intent = Intent::Noop {
            principal_id: "alice".into(),
            reason: None,
        };
        let result = ActionResult::ok("noop");
        let draft = EventDraft::action(&intent, &result);
        assert_eq!(draft.kind, EventKind::Action);
        assert_eq!(draft.data["intent"]["action_type"], "noop");
        assert_eq!(draft.data["result"]["success"], true);
    }
}
