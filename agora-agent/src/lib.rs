#![deny(missing_docs)]
//! Autonomous loops for agora agents.
//!
//! Every artifact with `has_loop` gets an independent task driving an
//! OODA-style iteration: observe a ledger/event snapshot, think through
//! the gateway (when the agent holds `can_call_llm`), decide on an intent
//! — via an attached workflow or direct structured tool-calling — act
//! through the dispatcher, and pace. Rate pressure backs off; budget
//! starvation hibernates until a transfer arrives; shutdown is graceful
//! with a bounded grace period.
//!
//! The [`WorkflowRunner`] executes workflow artifacts: ordered code / LLM
//! / emit steps over a shared JSON context, guarded by a small expression
//! DSL, with an optional state machine advancing one state per iteration.
//! [`TriggerQueue`] turns declarative event filters into callback
//! invocations, consuming the log through a cursor.

pub mod expr;
pub mod loop_impl;
pub mod manager;
pub mod state;
pub mod trigger;
pub mod workflow;

pub use expr::{CompareOp, ComputeOp, EvalError, Expression, ValueExpr};
pub use loop_impl::{intent_tools, AgentLoop, LoopConfig};
pub use manager::{LoopManager, LoopManagerConfig};
pub use state::{AgentState, TurnRecord};
pub use trigger::{TriggerDef, TriggerQueue};
pub use workflow::{
    IterationOutcome, OnError, Step, StepKind, Thinker, Transition, WorkflowDef, WorkflowError,
    WorkflowRunner,
};
