//! Kernel configuration sections.

use serde::{Deserialize, Serialize};

/// How strictly invoke arguments are validated against the target's
/// declared input schema.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterfaceValidation {
    /// Skip validation entirely.
    None,
    /// Log a warning and proceed.
    #[default]
    Warn,
    /// Refuse with `invalid_argument`.
    Strict,
}

/// What happens when an action targets an artifact with no access handler.
///
/// Deliberately a boot-time knob with no baked-in bias — deployments set
/// it explicitly. `Default` is `Allow` only so `ExecutorConfig::default()`
/// is usable in tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContractDefault {
    /// Fail open: missing handler means anyone may act.
    #[default]
    Allow,
    /// Fail closed: missing handler means nobody may act.
    Deny,
}

/// Executor section of the kernel configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Maximum nested `invoke` depth inside the sandbox.
    #[serde(default = "default_max_invoke_depth")]
    pub max_invoke_depth: u32,
    /// Argument validation mode.
    #[serde(default)]
    pub interface_validation: InterfaceValidation,
    /// Wall-clock cap on one sandboxed invocation, in seconds.
    #[serde(default = "default_invoke_timeout_secs")]
    pub invoke_timeout_secs: u64,
    /// Missing-handler policy.
    #[serde(default)]
    pub default_on_missing: ContractDefault,
}

fn default_max_invoke_depth() -> u32 {
    5
}

fn default_invoke_timeout_secs() -> u64 {
    30
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_invoke_depth: default_max_invoke_depth(),
            interface_validation: InterfaceValidation::default(),
            invoke_timeout_secs: default_invoke_timeout_secs(),
            default_on_missing: ContractDefault::default(),
        }
    }
}

/// System-prompt editing limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptConfig {
    /// Hard cap on the prompt artifact's content size.
    #[serde(default = "default_max_size_bytes")]
    pub max_size_bytes: usize,
    /// Leading character count no edit may touch.
    #[serde(default = "default_protected_prefix_chars")]
    pub protected_prefix_chars: usize,
}

fn default_max_size_bytes() -> usize {
    16 * 1024
}

fn default_protected_prefix_chars() -> usize {
    0
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            max_size_bytes: default_max_size_bytes(),
            protected_prefix_chars: default_protected_prefix_chars(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_values() {
        let config = ExecutorConfig::default();
        assert_eq!(config.max_invoke_depth, 5);
        assert_eq!(config.interface_validation, InterfaceValidation::Warn);
        assert_eq!(config.invoke_timeout_secs, 30);
    }

    #[test]
    fn sections_deserialize_with_partial_fields() {
        let config: ExecutorConfig =
            serde_json::from_str(r#"{"max_invoke_depth": 3, "default_on_missing": "deny"}"#)
                .unwrap();
        assert_eq!(config.max_invoke_depth, 3);
        assert_eq!(config.default_on_missing, ContractDefault::Deny);
        assert_eq!(config.invoke_timeout_secs, 30);
    }
}
