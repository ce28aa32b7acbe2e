//! Per-agent persistent state — the loop's long-term memory.

use bedrock::ActionResult;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};

/// One remembered turn: what the loop dispatched and what came back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnRecord {
    /// The dispatched intent's operation name.
    pub operation: String,
    /// Whether it succeeded.
    pub success: bool,
    /// The result message.
    pub message: String,
    /// The wire error code, on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
}

/// The state an agent's loop persists between iterations, stored as the
/// content of the agent's state artifact.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentState {
    /// Current workflow state-machine state, if a workflow is attached.
    #[serde(default)]
    pub current_state: Option<String>,
    /// Free-form scratch space the workflow context is seeded from.
    #[serde(default)]
    pub working_memory: serde_json::Value,
    /// Bounded history of recent turns, newest last.
    #[serde(default)]
    pub turn_history: VecDeque<TurnRecord>,
    /// How many times each operation was dispatched.
    #[serde(default)]
    pub action_counts: BTreeMap<String, u64>,
}

impl AgentState {
    /// Parse from a state artifact's content; empty or malformed content
    /// yields a fresh state.
    #[must_use]
    pub fn from_content(content: &str) -> Self {
        serde_json::from_str(content).unwrap_or_default()
    }

    /// Serialize for the state artifact.
    #[must_use]
    pub fn to_content(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }

    /// Record a dispatched turn, trimming history to `max_history`.
    pub fn record_turn(&mut self, operation: &str, result: &ActionResult, max_history: usize) {
        self.turn_history.push_back(TurnRecord {
            operation: operation.to_string(),
            success: result.success,
            message: result.message.clone(),
            error_code: result
                .error_code()
                .and_then(|c| serde_json::to_value(c).ok())
                .and_then(|v| v.as_str().map(str::to_owned)),
        });
        while self.turn_history.len() > max_history {
            self.turn_history.pop_front();
        }
        *self.action_counts.entry(operation.to_string()).or_insert(0) += 1;
    }
}
