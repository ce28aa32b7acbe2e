//! Error taxonomy and per-layer error types.
//!
//! Two levels live here. [`ErrorCode`] is the wire-level taxonomy every
//! failed [`ActionResult`](crate::action::ActionResult) carries — agents
//! parse these codes, not prose. The per-layer enums below
//! ([`WorldError`], [`EventLogError`], [`GatewayError`], [`ExecError`])
//! are what implementation crates return internally; the dispatcher folds
//! them into an `ActionResult` at the boundary.

use crate::id::{ArtifactId, PrincipalId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Wire-level error codes. Fixed strings; agents branch on these.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// The access handler denied the action.
    NotAuthorized,
    /// The target artifact or principal does not exist.
    NotFound,
    /// The target artifact is a soft-delete tombstone.
    Deleted,
    /// The payer's scrip balance cannot cover the cost.
    InsufficientFunds,
    /// A rolling-window rate limit is exhausted right now.
    QuotaExceeded,
    /// A depletable budget (LLM dollars, disk) is spent.
    BudgetExhausted,
    /// The intent failed schema validation.
    InvalidArgument,
    /// A field had the wrong type.
    InvalidType,
    /// The ID is already registered in the shared namespace.
    IdCollision,
    /// Artifact code raised an error at runtime.
    RuntimeError,
    /// A sandboxed invocation exceeded its time limit.
    Timeout,
    /// The invoke chain exceeded the configured depth cap.
    InvokeTooDeep,
}

/// Coarse grouping of [`ErrorCode`]s.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Denied by an access handler.
    Permission,
    /// A resource was missing, deleted, or exhausted.
    Resource,
    /// The request itself was malformed.
    Validation,
    /// Failure while executing artifact code.
    Execution,
}

impl ErrorCode {
    /// The category this code belongs to.
    #[must_use]
    pub fn category(self) -> ErrorCategory {
        match self {
            Self::NotAuthorized => ErrorCategory::Permission,
            Self::NotFound
            | Self::Deleted
            | Self::InsufficientFunds
            | Self::QuotaExceeded
            | Self::BudgetExhausted => ErrorCategory::Resource,
            Self::InvalidArgument | Self::InvalidType | Self::IdCollision => {
                ErrorCategory::Validation
            }
            Self::RuntimeError | Self::Timeout | Self::InvokeTooDeep => ErrorCategory::Execution,
        }
    }

    /// Whether the same call may succeed later without a different request.
    ///
    /// `QuotaExceeded` clears when the rate window rolls over; `Timeout`
    /// may clear on retry. Everything else demands a different call or an
    /// external action (e.g. a budget top-up).
    #[must_use]
    pub fn retriable(self) -> bool {
        matches!(self, Self::QuotaExceeded | Self::Timeout)
    }
}

/// Errors from the world-state containers (ledger, store, registry, rates).
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum WorldError {
    /// No such principal in the ledger.
    #[error("unknown principal: {0}")]
    UnknownPrincipal(PrincipalId),

    /// No such artifact in the store.
    #[error("unknown artifact: {0}")]
    UnknownArtifact(ArtifactId),

    /// The artifact is a tombstone.
    #[error("artifact deleted: {0}")]
    ArtifactDeleted(ArtifactId),

    /// The ID already exists in the shared namespace.
    #[error("id collision: {0}")]
    IdCollision(String),

    /// A depletable balance cannot cover the requested amount.
    #[error("insufficient {resource}: have {available}, need {requested}")]
    Insufficient {
        /// Which balance fell short.
        resource: String,
        /// What is currently available.
        available: String,
        /// What the operation needed.
        requested: String,
    },

    /// A rolling-window rate limit has no capacity left.
    #[error("rate limit exceeded for {resource}, retry in {retry_after_secs}s")]
    RateExceeded {
        /// Which rate resource was exhausted.
        resource: String,
        /// Seconds until the window frees enough capacity.
        retry_after_secs: u64,
    },

    /// An invariant-violating request (negative amount, self-transfer…).
    #[error("invalid operation: {0}")]
    InvalidOperation(String),
}

impl WorldError {
    /// Map to the wire-level error code.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::UnknownPrincipal(_) | Self::UnknownArtifact(_) => ErrorCode::NotFound,
            Self::ArtifactDeleted(_) => ErrorCode::Deleted,
            Self::IdCollision(_) => ErrorCode::IdCollision,
            Self::Insufficient { resource, .. } if resource == "scrip" => {
                ErrorCode::InsufficientFunds
            }
            Self::Insufficient { .. } => ErrorCode::BudgetExhausted,
            Self::RateExceeded { .. } => ErrorCode::QuotaExceeded,
            Self::InvalidOperation(_) => ErrorCode::InvalidArgument,
        }
    }
}

/// Errors from the event log.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum EventLogError {
    /// Appending or flushing to the sink failed.
    #[error("write failed: {0}")]
    WriteFailed(String),

    /// A record could not be serialized.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Catch-all.
    #[error("{0}")]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

/// Errors from the LLM gateway.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The caller lacks the `can_call_llm` capability.
    #[error("capability missing: {0}")]
    CapabilityMissing(PrincipalId),

    /// The caller's dollar budget cannot cover the estimated cost.
    #[error("budget exhausted for {0}")]
    BudgetExhausted(PrincipalId),

    /// A call or token rate window is out of capacity.
    #[error("rate limited ({resource}), retry in {retry_after_secs}s")]
    RateLimited {
        /// Which rate resource was exhausted.
        resource: String,
        /// Seconds until capacity returns.
        retry_after_secs: u64,
    },

    /// The upstream provider failed.
    #[error("provider error: {0}")]
    Provider(String),

    /// The provider's response could not be parsed.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Catch-all.
    #[error("{0}")]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl GatewayError {
    /// Whether retrying the same call might succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::Provider(_))
    }

    /// Map to the wire-level error code.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::CapabilityMissing(_) => ErrorCode::NotAuthorized,
            Self::BudgetExhausted(_) => ErrorCode::BudgetExhausted,
            Self::RateLimited { .. } => ErrorCode::QuotaExceeded,
            Self::Provider(_) | Self::InvalidResponse(_) | Self::Other(_) => {
                ErrorCode::RuntimeError
            }
        }
    }
}

/// Errors from sandboxed execution.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum ExecError {
    /// No program registered under the artifact's code reference.
    #[error("program not found: {0}")]
    ProgramNotFound(String),

    /// The invoke chain exceeded the depth cap.
    #[error("invoke too deep: depth {depth} exceeds cap {cap}")]
    TooDeep {
        /// Depth the chain reached.
        depth: u32,
        /// The configured cap.
        cap: u32,
    },

    /// The invocation ran past its time limit.
    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Arguments failed validation against the method's input schema.
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    /// Artifact code raised an error.
    #[error("runtime error: {0}")]
    Runtime(String),

    /// A structured failure forwarded from a nested dispatch, keeping the
    /// original wire code intact across sandbox frames.
    #[error("{message}")]
    Forwarded {
        /// The nested failure's code.
        code: ErrorCode,
        /// The nested failure's message.
        message: String,
    },

    /// A gateway syscall failed inside the sandbox.
    #[error("gateway: {0}")]
    Gateway(#[from] GatewayError),

    /// Catch-all; unknown failures are wrapped so sandbox internals
    /// never leak to callers.
    #[error("{0}")]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl ExecError {
    /// Map to the wire-level error code.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::ProgramNotFound(_) => ErrorCode::NotFound,
            Self::TooDeep { .. } => ErrorCode::InvokeTooDeep,
            Self::Timeout(_) => ErrorCode::Timeout,
            Self::InvalidArguments(_) => ErrorCode::InvalidArgument,
            Self::Gateway(g) => g.code(),
            Self::Forwarded { code, .. } => *code,
            Self::Runtime(_) | Self::Other(_) => ErrorCode::RuntimeError,
        }
    }
}
