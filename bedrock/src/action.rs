//! Action results — what every dispatcher call returns.

use crate::error::{ErrorCategory, ErrorCode};
use crate::id::PrincipalId;
use crate::resource::ResourceUsage;
use serde::{Deserialize, Serialize};

/// Structured failure attached to an [`ActionResult`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionError {
    /// Machine-parseable code. Agents branch on this, not on prose.
    pub error_code: ErrorCode,
    /// Coarse grouping.
    pub error_category: ErrorCategory,
    /// Whether the same call may succeed later without external action.
    pub retriable: bool,
    /// Optional structured details (e.g. `retry_after` seconds).
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub error_details: serde_json::Value,
}

impl ActionError {
    /// Build an error from a code, deriving category and retriability.
    #[must_use]
    pub fn new(code: ErrorCode) -> Self {
        Self {
            error_code: code,
            error_category: code.category(),
            retriable: code.retriable(),
            error_details: serde_json::Value::Null,
        }
    }

    /// Attach structured details.
    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.error_details = details;
        self
    }
}

/// The dispatcher's reply. `success` and `message` are always populated;
/// error fields are populated on failure. Errors are data — the dispatch
/// call itself never fails.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    /// Whether the effect was applied.
    pub success: bool,
    /// Human-readable summary.
    pub message: String,
    /// Effect-specific payload (read content, query rows, new balances…).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    /// What this action consumed.
    #[serde(default)]
    pub resources_consumed: ResourceUsage,
    /// Who was charged (the payer the permission layer named, or the caller).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub charged_to: Option<PrincipalId>,
    /// Failure taxonomy, present iff `success == false`.
    #[serde(default, flatten, skip_serializing_if = "Option::is_none")]
    pub error: Option<ActionError>,
}

impl ActionResult {
    /// A successful result with a message.
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: None,
            resources_consumed: ResourceUsage::default(),
            charged_to: None,
            error: None,
        }
    }

    /// A successful result carrying a payload.
    pub fn ok_with(message: impl Into<String>, data: serde_json::Value) -> Self {
        let mut result = Self::ok(message);
        result.data = Some(data);
        result
    }

    /// A failed result with the given code.
    pub fn fail(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: None,
            resources_consumed: ResourceUsage::default(),
            charged_to: None,
            error: Some(ActionError::new(code)),
        }
    }

    /// A failed result with structured details.
    pub fn fail_with(
        code: ErrorCode,
        message: impl Into<String>,
        details: serde_json::Value,
    ) -> Self {
        let mut result = Self::fail(code, message);
        result.error = Some(ActionError::new(code).with_details(details));
        result
    }

    /// Record what was consumed and who paid.
    #[must_use]
    pub fn charged(mut self, usage: ResourceUsage, payer: PrincipalId) -> Self {
        self.resources_consumed = usage;
        self.charged_to = Some(payer);
        self
    }

    /// The error code, if this result is a failure.
    #[must_use]
    pub fn error_code(&self) -> Option<ErrorCode> {
        self.error.as_ref().map(|e| e.error_code)
    }

    /// Whether a failed result is worth retrying unchanged.
    #[must_use]
    pub fn retriable(&self) -> bool {
        self.error.as_ref().is_some_and(|e| e.retriable)
    }

    /// Fold a failure into an [`ExecError`](crate::error::ExecError) so a
    /// program can propagate a nested dispatch's code unchanged.
    #[must_use]
    pub fn to_exec_error(&self) -> Option<crate::error::ExecError> {
        self.error
            .as_ref()
            .map(|e| crate::error::ExecError::Forwarded {
                code: e.error_code,
                message: self.message.clone(),
            })
    }
}
