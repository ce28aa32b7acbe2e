//! The permission vocabulary — what access handlers decide.
//!
//! Handlers themselves are ordinary artifacts: their code is a registered
//! program the kernel runs in the sandbox, and this verdict shape is what
//! that code returns. Only the data lives here; the execution seam is the
//! kernel's program registry.

use crate::id::PrincipalId;
use serde::{Deserialize, Serialize};

/// What an access handler decides about one operation on its target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PermissionResult {
    /// The decision.
    pub allowed: bool,
    /// Human-readable explanation.
    pub reason: String,
    /// Scrip charged for performing the action.
    #[serde(default)]
    pub cost: i64,
    /// Who is charged; `None` means the caller.
    #[serde(default)]
    pub payer: Option<PrincipalId>,
    /// Opaque map returned to the effect for its own use.
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub conditions: serde_json::Value,
}

impl PermissionResult {
    /// Allow at no cost.
    pub fn allow(reason: impl Into<String>) -> Self {
        Self {
            allowed: true,
            reason: reason.into(),
            cost: 0,
            payer: None,
            conditions: serde_json::Value::Null,
        }
    }

    /// Allow, charging the caller `cost` scrip.
    pub fn allow_at_cost(reason: impl Into<String>, cost: i64) -> Self {
        Self {
            cost,
            ..Self::allow(reason)
        }
    }

    /// Deny.
    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: reason.into(),
            cost: 0,
            payer: None,
            conditions: serde_json::Value::Null,
        }
    }
}
