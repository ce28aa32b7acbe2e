//! The loop manager — creation, pacing, and clean cancellation of agent
//! loops.

use crate::loop_impl::{AgentLoop, LoopConfig};
use agora_kernel::Kernel;
use bedrock::{EventFilter, EventKind, PrincipalId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Manager configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopManagerConfig {
    /// Grace period a loop gets to finish its iteration on shutdown.
    #[serde(default = "default_stop_grace_secs")]
    pub stop_grace_secs: u64,
    /// Configuration shared by every loop.
    #[serde(default, rename = "loop")]
    pub loop_config: LoopConfig,
}

fn default_stop_grace_secs() -> u64 {
    5
}

impl Default for LoopManagerConfig {
    fn default() -> Self {
        Self {
            stop_grace_secs: default_stop_grace_secs(),
            loop_config: LoopConfig::default(),
        }
    }
}

struct LoopHandle {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Owns the lifetime of every autonomous loop.
///
/// Each `has_loop` artifact gets one independent tokio task pinned to its
/// principal. Loops never block each other: all cross-loop communication
/// goes through the event log and state artifacts.
pub struct LoopManager {
    kernel: Arc<Kernel>,
    config: LoopManagerConfig,
    root: CancellationToken,
    loops: tokio::sync::Mutex<HashMap<PrincipalId, LoopHandle>>,
}

impl LoopManager {
    /// A manager driving loops on the given kernel.
    #[must_use]
    pub fn new(kernel: Arc<Kernel>, config: LoopManagerConfig) -> Arc<Self> {
        Arc::new(Self {
            kernel,
            config,
            root: CancellationToken::new(),
            loops: tokio::sync::Mutex::new(HashMap::new()),
        })
    }

    /// Spawn a loop for one agent. Returns false if one is already
    /// running (a finished loop is replaced).
    pub async fn spawn(&self, agent: PrincipalId) -> bool {
        let mut loops = self.loops.lock().await;
        if let Some(existing) = loops.get(&agent) {
            if !existing.handle.is_finished() {
                return false;
            }
            loops.remove(&agent);
        }
        let cancel = self.root.child_token();
        let agent_loop = AgentLoop::new(
            Arc::clone(&self.kernel),
            agent.clone(),
            self.config.loop_config.clone(),
            cancel.clone(),
        );
        let handle = tokio::spawn(agent_loop.run());
        loops.insert(agent, LoopHandle { cancel, handle });
        true
    }

    /// Spawn loops for every live `has_loop` artifact already in the
    /// store. Returns how many were started.
    pub async fn spawn_for_existing(&self) -> usize {
        let agents = self
            .kernel
            .store()
            .select(|a| a.has_loop && !a.deleted)
            .await;
        let mut started = 0;
        for artifact in agents {
            if self.spawn(PrincipalId::from(&artifact.id)).await {
                started += 1;
            }
        }
        started
    }

    /// Watch `artifact_created` events and spawn loops for new agents.
    /// Runs until shutdown; call from a spawned task.
    pub async fn watch(self: Arc<Self>) {
        let filter = EventFilter {
            kinds: vec![EventKind::ArtifactCreated],
            ..Default::default()
        };
        let mut cursor = self.kernel.events().subscribe(filter);
        loop {
            let event = tokio::select! {
                () = self.root.cancelled() => break,
                event = cursor.next() => event,
            };
            let Some(event) = event else { break };
            if event.data["has_loop"] == serde_json::json!(true)
                && let Some(id) = event.data["artifact_id"].as_str()
            {
                tracing::info!(agent = id, "scheduling new agent loop");
                self.spawn(PrincipalId::new(id)).await;
            }
        }
    }

    /// Principals with a running loop.
    pub async fn running(&self) -> Vec<PrincipalId> {
        let loops = self.loops.lock().await;
        loops
            .iter()
            .filter(|(_, h)| !h.handle.is_finished())
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Cancel one loop and wait for it within the grace period.
    pub async fn stop(&self, agent: &PrincipalId) -> bool {
        let handle = {
            let mut loops = self.loops.lock().await;
            loops.remove(agent)
        };
        let Some(mut handle) = handle else {
            return false;
        };
        handle.cancel.cancel();
        let grace = Duration::from_secs(self.config.stop_grace_secs);
        if tokio::time::timeout(grace, &mut handle.handle).await.is_err() {
            tracing::warn!(agent = %agent, "loop did not stop in time, aborting");
            handle.handle.abort();
        }
        true
    }

    /// Shut everything down: signal every loop, wait up to the grace
    /// period, force-terminate stragglers, flush the event log.
    pub async fn shutdown(&self) {
        self.root.cancel();
        let handles: Vec<(PrincipalId, LoopHandle)> = {
            let mut loops = self.loops.lock().await;
            loops.drain().collect()
        };
        let grace = Duration::from_secs(self.config.stop_grace_secs);
        for (agent, mut handle) in handles {
            if tokio::time::timeout(grace, &mut handle.handle).await.is_err() {
                tracing::warn!(agent = %agent, "loop exceeded shutdown grace, aborting");
                handle.handle.abort();
            }
        }
        if let Err(err) = self.kernel.events().flush().await {
            tracing::warn!(%err, "failed to flush event log at shutdown");
        }
    }
}
