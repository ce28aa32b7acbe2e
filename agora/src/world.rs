//! Booting, running, and shutting down a world.

use crate::checkpoint::{Checkpoint, CheckpointError};
use crate::config::KernelConfig;
use crate::genesis::{self, GenesisError, GenesisManifest};
use agora_agent::{LoopManager, TriggerQueue};
use agora_events::JsonlSink;
use agora_gateway::LlmProvider;
use agora_kernel::Kernel;
use bedrock::{ActionResult, Balances, Intent, PrincipalId};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// The seeded first citizen's id.
pub const ALPHA_PRIME: &str = "alpha-prime";

/// Errors from boot.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum BootError {
    /// The genesis manifest failed to apply.
    #[error("genesis: {0}")]
    Genesis(#[from] GenesisError),

    /// Seeding boot principals failed.
    #[error("seed: {0}")]
    Seed(String),
}

/// A running world: the kernel plus its background machinery (loop
/// manager, agent watcher, trigger queue).
pub struct Agora {
    kernel: Arc<Kernel>,
    manager: Arc<LoopManager>,
    trigger_cancel: CancellationToken,
    background: Vec<JoinHandle<()>>,
    config: KernelConfig,
}

impl Agora {
    /// Boot a world: build the kernel, apply genesis, seed alpha-prime
    /// when enabled, start loops for existing agents, and begin watching
    /// for new ones.
    pub async fn boot(
        config: KernelConfig,
        provider: Arc<dyn LlmProvider>,
        manifest: GenesisManifest,
    ) -> Result<Self, BootError> {
        Self::boot_with_programs(config, provider, manifest, Vec::new()).await
    }

    /// [`boot`](Self::boot), registering extra programs the manifest's
    /// artifacts (mint, escrow, agent behaviors…) bind as code.
    pub async fn boot_with_programs(
        config: KernelConfig,
        provider: Arc<dyn LlmProvider>,
        manifest: GenesisManifest,
        programs: Vec<Arc<dyn agora_kernel::Program>>,
    ) -> Result<Self, BootError> {
        let mut builder = Kernel::builder(provider)
            .executor(config.executor_config())
            .prompt(config.agent.system_prompt.clone())
            .gateway(config.gateway_config())
            .debug_ticks(config.events.debug_ticks);
        for (resource, limit) in config.rate_limiting.to_limits() {
            builder = builder.rate_limit(resource, limit);
        }
        for program in programs {
            builder = builder.program(program);
        }
        if let Some(dir) = &config.events.dir {
            builder = builder.sink(JsonlSink::new(dir));
        }
        let kernel = builder.build();

        genesis::load(&kernel, &manifest).await?;

        if config.alpha_prime.enabled {
            // Ledger-only: the registry entry appears when alpha-prime
            // writes its own artifact body, and only alpha-prime may.
            let alpha = PrincipalId::new(ALPHA_PRIME);
            if !kernel.ledger().contains(&alpha).await {
                kernel
                    .ledger()
                    .register(
                        alpha,
                        Balances::starting(
                            config.alpha_prime.starting_scrip,
                            config.alpha_prime.starting_llm_budget,
                            config.alpha_prime.starting_disk_quota,
                        ),
                    )
                    .await
                    .map_err(|e| BootError::Seed(e.to_string()))?;
                tracing::info!(
                    scrip = config.alpha_prime.starting_scrip,
                    "alpha-prime seeded"
                );
            }
        }

        let manager = LoopManager::new(Arc::clone(&kernel), config.manager_config());
        let started = manager.spawn_for_existing().await;
        tracing::info!(loops = started, "world booted");

        let mut background = Vec::new();
        background.push(tokio::spawn(Arc::clone(&manager).watch()));

        let trigger_cancel = CancellationToken::new();
        let queue = TriggerQueue::new(Arc::clone(&kernel), trigger_cancel.clone());
        background.push(tokio::spawn(queue.run()));

        Ok(Self {
            kernel,
            manager,
            trigger_cancel,
            background,
            config,
        })
    }

    /// The kernel (dispatcher, containers, gateway).
    #[must_use]
    pub fn kernel(&self) -> &Arc<Kernel> {
        &self.kernel
    }

    /// The loop manager.
    #[must_use]
    pub fn manager(&self) -> &Arc<LoopManager> {
        &self.manager
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    /// Dispatch an intent.
    pub async fn dispatch(&self, intent: Intent) -> ActionResult {
        self.kernel.dispatch(intent).await
    }

    /// Capture a checkpoint, bounded by the state-lock timeout.
    pub async fn checkpoint(
        &self,
        reason: impl Into<String>,
    ) -> Result<Checkpoint, CheckpointError> {
        let budget = Duration::from_secs(self.config.timeouts.state_store_lock_secs);
        match tokio::time::timeout(budget, Checkpoint::capture(&self.kernel, reason)).await {
            Ok(result) => result,
            Err(_) => Err(CheckpointError::SnapshotTimeout),
        }
    }

    /// Restore a checkpoint into this world. Loops keep running and pick
    /// up the restored state on their next iteration.
    pub async fn restore(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        checkpoint.restore(&self.kernel).await
    }

    /// Shut the world down: stop every loop within its grace period,
    /// stop the trigger queue and watcher, flush the event log. Bounded
    /// by the overall shutdown budget.
    pub async fn shutdown(mut self) {
        let budget = Duration::from_secs(self.config.timeouts.shutdown_secs);
        let work = async {
            self.manager.shutdown().await;
            self.trigger_cancel.cancel();
            for task in &mut self.background {
                let _ = task.await;
            }
        };
        if tokio::time::timeout(budget, work).await.is_err() {
            tracing::warn!("shutdown exceeded its budget, aborting background tasks");
            for task in &self.background {
                task.abort();
            }
        }
        if let Err(err) = self.kernel.events().flush().await {
            tracing::warn!(%err, "failed to flush event log at shutdown");
        }
        tracing::info!("world stopped");
    }
}
