//! Event triggers — declarative "when X happens, invoke Y".
//!
//! A trigger artifact's content is a JSON [`TriggerDef`]: an event filter
//! plus a callback artifact. The queue consumes the event stream through a
//! cursor (never synchronously inside event logging), enqueues matches,
//! and dispatches the callback *as the trigger's creator* — a trigger can
//! never lend its owner authority the owner does not already hold.

use agora_kernel::Kernel;
use bedrock::{ArtifactId, ArtifactKind, EventFilter, Intent, KernelEvent, PrincipalId};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// The content of a trigger artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerDef {
    /// Which events fire the trigger.
    pub filter: EventFilter,
    /// The artifact to invoke on a match.
    pub callback: ArtifactId,
    /// Optional method on the callback.
    #[serde(default)]
    pub method: Option<String>,
}

/// A pending callback invocation.
#[derive(Debug, Clone)]
struct Pending {
    owner: PrincipalId,
    trigger: ArtifactId,
    callback: ArtifactId,
    method: Option<String>,
    event: KernelEvent,
}

/// Consumes the event stream and fires trigger callbacks.
pub struct TriggerQueue {
    kernel: Arc<Kernel>,
    cancel: CancellationToken,
}

impl TriggerQueue {
    /// A queue over the kernel's event log.
    #[must_use]
    pub fn new(kernel: Arc<Kernel>, cancel: CancellationToken) -> Self {
        Self { kernel, cancel }
    }

    /// Run until cancelled. Starts at the current head of the log —
    /// triggers react to the future, not to boot history.
    pub async fn run(self) {
        let start = self.kernel.events().head_seq();
        let mut cursor = self
            .kernel
            .events()
            .subscribe_from(EventFilter::default(), start);
        let mut pending: VecDeque<Pending> = VecDeque::new();

        loop {
            let event = tokio::select! {
                () = self.cancel.cancelled() => break,
                event = cursor.next() => event,
            };
            let Some(event) = event else { break };

            self.enqueue_matches(&event, &mut pending).await;

            // Fire after enqueueing, decoupled from the append that
            // produced the event.
            while let Some(job) = pending.pop_front() {
                if self.cancel.is_cancelled() {
                    return;
                }
                self.fire(job).await;
            }
        }
    }

    /// Scan live trigger artifacts for filters matching this event.
    async fn enqueue_matches(&self, event: &KernelEvent, pending: &mut VecDeque<Pending>) {
        let triggers = self
            .kernel
            .store()
            .select(|a| a.kind == ArtifactKind::Trigger && !a.deleted)
            .await;
        for trigger in triggers {
            let def: TriggerDef = match serde_json::from_str(&trigger.content) {
                Ok(def) => def,
                Err(err) => {
                    tracing::debug!(trigger = %trigger.id, %err, "malformed trigger, skipping");
                    continue;
                }
            };
            if !def.filter.matches(event) {
                continue;
            }
            // A trigger matching the action event of its own firing would
            // loop forever; the firing invoke is marked with the trigger id.
            if event.data["intent"]["args"]["trigger"] == json!(trigger.id.as_str()) {
                continue;
            }
            pending.push_back(Pending {
                owner: trigger.created_by.clone(),
                trigger: trigger.id.clone(),
                callback: def.callback.clone(),
                method: def.method.clone(),
                event: event.clone(),
            });
        }
    }

    /// Dispatch one callback as the trigger's owner.
    async fn fire(&self, job: Pending) {
        tracing::debug!(trigger = %job.trigger, callback = %job.callback, seq = job.event.seq,
            "firing trigger");
        let result = self
            .kernel
            .dispatch(Intent::Invoke {
                principal_id: job.owner,
                artifact_id: job.callback,
                method: job.method,
                args: json!({
                    "trigger": job.trigger,
                    "event": job.event,
                }),
            })
            .await;
        if !result.success {
            tracing::debug!(trigger = %job.trigger, message = %result.message,
                "trigger callback failed");
        }
    }
}
