#![deny(missing_docs)]
//! # agora — a multi-agent economic simulation kernel
//!
//! Agora hosts autonomous agents, mediates every action they take, meters
//! every resource they consume, and records an auditable event stream. It
//! is the physics layer for an emergent economy: a small set of
//! primitives — artifacts, principals, a ledger, a sandboxed executor, a
//! rate tracker, an event log — on top of which trading, credit, and
//! coordination are built by ordinary artifacts using the same interfaces
//! any agent would.
//!
//! ## Layers
//!
//! | Crate | What it holds |
//! |-------|---------------|
//! | `bedrock` | The protocol vocabulary: IDs, artifacts, intents, results, errors, events |
//! | `agora-world` | Ledger, artifact store, ID registry, rate tracker |
//! | `agora-events` | The append-only event log and its cursors |
//! | `agora-gateway` | The capability-gated LLM syscall with caller-pays billing |
//! | `agora-kernel` | The dispatcher, permission layer, and sandboxed executor |
//! | `agora-agent` | Autonomous loops, workflows, and event triggers |
//! | `agora` | This facade: configuration, genesis, checkpoints, boot |
//!
//! ## Example
//!
//! ```no_run
//! use agora::{Agora, GenesisManifest, KernelConfig};
//! use agora_gateway::Anthropic;
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let provider = Arc::new(Anthropic::new(std::env::var("ANTHROPIC_API_KEY")?));
//! let world = Agora::boot(
//!     KernelConfig::default(),
//!     provider,
//!     GenesisManifest::builtin(),
//! )
//! .await?;
//! // ... dispatch intents, let agents run ...
//! let checkpoint = world.checkpoint("operator snapshot").await?;
//! checkpoint.save_to(std::path::Path::new("world.json")).await?;
//! world.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod checkpoint;
pub mod config;
pub mod genesis;
pub mod world;

pub use checkpoint::{Checkpoint, CheckpointError, CHECKPOINT_VERSION};
pub use config::{
    AgentSection, AlphaPrimeConfig, ContractsConfig, EventsConfig, KernelConfig, RateLimitEntry,
    RateLimitingConfig, TimeoutsConfig,
};
pub use genesis::{GenesisEntry, GenesisError, GenesisManifest, BOOT_PRINCIPAL};
pub use world::{Agora, BootError, ALPHA_PRIME};

pub use agora_agent::{LoopConfig, LoopManager, LoopManagerConfig, WorkflowDef, WorkflowRunner};
pub use agora_gateway::{ChatMessage, ChatRequest, LlmProvider, LlmResponse};
pub use agora_kernel::{Kernel, Program, ProgramFuture, Sandbox};
pub use bedrock::{
    ActionResult, Artifact, ArtifactId, ArtifactKind, Capability, ErrorCode, Intent, Interface,
    PrincipalId, ResourceKind,
};
