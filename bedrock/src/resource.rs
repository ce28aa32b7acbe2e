//! Resource vocabulary — balances, rate resources, and usage records.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Every meterable resource a principal can hold or consume.
///
/// Stocks (`scrip`, `llm_budget`, `disk_quota`) are depletable — spent is
/// spent until someone transfers more in. Rates (`llm_token_rate`,
/// `llm_call_rate`, `cpu_rate`) are renewable capacity in a rolling window.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// Integer internal currency.
    Scrip,
    /// Depletable dollar budget for external LLM calls.
    LlmBudget,
    /// Allocatable disk bytes.
    DiskQuota,
    /// Renewable: LLM tokens per window.
    LlmTokenRate,
    /// Renewable: LLM calls per window.
    LlmCallRate,
    /// Renewable: CPU milliseconds per window.
    CpuRate,
}

impl ResourceKind {
    /// Whether this resource renews with the rate window (as opposed to
    /// being a depletable stock on the ledger).
    #[must_use]
    pub fn is_rate(self) -> bool {
        matches!(self, Self::LlmTokenRate | Self::LlmCallRate | Self::CpuRate)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Scrip => "scrip",
            Self::LlmBudget => "llm_budget",
            Self::DiskQuota => "disk_quota",
            Self::LlmTokenRate => "llm_token_rate",
            Self::LlmCallRate => "llm_call_rate",
            Self::CpuRate => "cpu_rate",
        };
        f.write_str(s)
    }
}

/// The depletable stocks one principal holds.
///
/// Invariant: no field ever goes negative. Overdraft is represented by a
/// separate debt artifact at the application layer, never by the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Balances {
    /// Non-negative integer currency.
    pub scrip: i64,
    /// Non-negative dollar budget for LLM calls.
    pub llm_dollar_budget: Decimal,
    /// Non-negative allocatable disk bytes.
    pub disk_quota: i64,
}

impl Balances {
    /// All-zero balances.
    #[must_use]
    pub fn zero() -> Self {
        Self {
            scrip: 0,
            llm_dollar_budget: Decimal::ZERO,
            disk_quota: 0,
        }
    }

    /// Starting balances for a spawned principal.
    #[must_use]
    pub fn starting(scrip: i64, llm_dollar_budget: Decimal, disk_quota: i64) -> Self {
        Self {
            scrip,
            llm_dollar_budget,
            disk_quota,
        }
    }
}

impl Default for Balances {
    fn default() -> Self {
        Self::zero()
    }
}

/// What one action consumed, reported back on every [`ActionResult`].
///
/// [`ActionResult`]: crate::action::ActionResult
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceUsage {
    /// Scrip charged by the permission layer.
    #[serde(default)]
    pub scrip: i64,
    /// Dollars debited for LLM calls.
    #[serde(default)]
    pub llm_dollars: Decimal,
    /// Tokens counted against the token rate window.
    #[serde(default)]
    pub llm_tokens: u64,
    /// Disk bytes charged against quota.
    #[serde(default)]
    pub disk_bytes: i64,
}

impl ResourceUsage {
    /// Whether nothing was consumed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_kinds_split_into_stocks_and_rates() {
        assert!(!ResourceKind::Scrip.is_rate());
        assert!(!ResourceKind::LlmBudget.is_rate());
        assert!(ResourceKind::LlmCallRate.is_rate());
        assert!(ResourceKind::CpuRate.is_rate());
    }

    #[test]
    fn display_matches_wire_strings() {
        assert_eq!(ResourceKind::LlmBudget.to_string(), "llm_budget");
        assert_eq!(
            serde_json::to_string(&ResourceKind::LlmBudget).unwrap(),
            "\"llm_budget\""
        );
    }

    #[test]
    fn balances_default_to_zero() {
        let b = Balances::default();
        assert_eq!(b.scrip, 0);
        assert_eq!(b.llm_dollar_budget, Decimal::ZERO);
    }
}
