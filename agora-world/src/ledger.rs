//! The ledger — depletable stocks per principal.
//!
//! Each principal's balances live in their own cell behind a `tokio::sync::Mutex`.
//! Two-party operations take both cells in ascending principal-ID order, which
//! is the global deadlock-avoidance rule. No lock is ever held across an await
//! on anything but the cell mutexes themselves.

use bedrock::{Balances, PrincipalId, ResourceKind, WorldError};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// Per-principal balance cells.
///
/// Invariants:
/// - no balance ever goes negative;
/// - transfers are atomic — observers never see the debit without the credit;
/// - Σ scrip is invariant under `transfer` (conservation).
pub struct Ledger {
    accounts: RwLock<BTreeMap<PrincipalId, Arc<Mutex<Balances>>>>,
}

impl Ledger {
    /// An empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self {
            accounts: RwLock::new(BTreeMap::new()),
        }
    }

    /// Register a principal with starting balances.
    ///
    /// # Errors
    ///
    /// `InvalidOperation` if the principal already has an account — the ID
    /// registry should have refused the spawn before we get here.
    pub async fn register(
        &self,
        principal: PrincipalId,
        initial: Balances,
    ) -> Result<(), WorldError> {
        let mut accounts = self.accounts.write().await;
        if accounts.contains_key(&principal) {
            return Err(WorldError::InvalidOperation(format!(
                "principal {principal} already has an account"
            )));
        }
        accounts.insert(principal, Arc::new(Mutex::new(initial)));
        Ok(())
    }

    /// Whether the principal has an account.
    pub async fn contains(&self, principal: &PrincipalId) -> bool {
        self.accounts.read().await.contains_key(principal)
    }

    /// Create an account with zero balances if the principal has none.
    /// Boot-seeded principals keep their balances when their artifact is
    /// written later. Returns whether an account was created.
    pub async fn ensure_account(&self, principal: &PrincipalId) -> bool {
        let mut accounts = self.accounts.write().await;
        if accounts.contains_key(principal) {
            return false;
        }
        accounts.insert(principal.clone(), Arc::new(Mutex::new(Balances::zero())));
        true
    }

    async fn cell(&self, principal: &PrincipalId) -> Result<Arc<Mutex<Balances>>, WorldError> {
        self.accounts
            .read()
            .await
            .get(principal)
            .cloned()
            .ok_or_else(|| WorldError::UnknownPrincipal(principal.clone()))
    }

    /// Current balances of a principal.
    pub async fn balances(&self, principal: &PrincipalId) -> Result<Balances, WorldError> {
        let cell = self.cell(principal).await?;
        let guard = cell.lock().await;
        Ok(guard.clone())
    }

    /// Debit scrip from a principal. Fails without mutating if the balance
    /// cannot cover the amount.
    pub async fn debit_scrip(
        &self,
        principal: &PrincipalId,
        amount: i64,
    ) -> Result<(), WorldError> {
        if amount < 0 {
            return Err(WorldError::InvalidOperation(
                "negative scrip amount".into(),
            ));
        }
        let cell = self.cell(principal).await?;
        let mut guard = cell.lock().await;
        if guard.scrip < amount {
            return Err(WorldError::Insufficient {
                resource: "scrip".into(),
                available: guard.scrip.to_string(),
                requested: amount.to_string(),
            });
        }
        guard.scrip -= amount;
        Ok(())
    }

    /// Credit scrip to a principal. Used when new principals are spawned
    /// with initial balances or by the settlement of permission costs.
    pub async fn credit_scrip(
        &self,
        principal: &PrincipalId,
        amount: i64,
    ) -> Result<(), WorldError> {
        if amount < 0 {
            return Err(WorldError::InvalidOperation(
                "negative scrip amount".into(),
            ));
        }
        let cell = self.cell(principal).await?;
        let mut guard = cell.lock().await;
        guard.scrip += amount;
        Ok(())
    }

    /// Charge disk bytes against a principal's quota.
    pub async fn charge_disk(
        &self,
        principal: &PrincipalId,
        bytes: i64,
    ) -> Result<(), WorldError> {
        if bytes < 0 {
            return Err(WorldError::InvalidOperation("negative disk charge".into()));
        }
        let cell = self.cell(principal).await?;
        let mut guard = cell.lock().await;
        if guard.disk_quota < bytes {
            return Err(WorldError::Insufficient {
                resource: "disk_quota".into(),
                available: guard.disk_quota.to_string(),
                requested: bytes.to_string(),
            });
        }
        guard.disk_quota -= bytes;
        Ok(())
    }

    /// Return disk bytes to a principal's quota. Used when a creation is
    /// rolled back after its charge.
    pub async fn credit_disk(
        &self,
        principal: &PrincipalId,
        bytes: i64,
    ) -> Result<(), WorldError> {
        if bytes < 0 {
            return Err(WorldError::InvalidOperation("negative disk credit".into()));
        }
        let cell = self.cell(principal).await?;
        let mut guard = cell.lock().await;
        guard.disk_quota += bytes;
        Ok(())
    }

    /// Whether the principal's dollar budget covers an estimate. The
    /// gateway refuses the external call when this is false.
    pub async fn covers_llm_estimate(
        &self,
        principal: &PrincipalId,
        estimate: Decimal,
    ) -> Result<bool, WorldError> {
        let cell = self.cell(principal).await?;
        let guard = cell.lock().await;
        Ok(guard.llm_dollar_budget >= estimate && guard.llm_dollar_budget > Decimal::ZERO)
    }

    /// Settle an LLM call at its actual cost, clamped so the budget never
    /// goes negative. Returns what was actually debited.
    pub async fn settle_llm(
        &self,
        principal: &PrincipalId,
        actual_cost: Decimal,
    ) -> Result<Decimal, WorldError> {
        if actual_cost < Decimal::ZERO {
            return Err(WorldError::InvalidOperation("negative llm cost".into()));
        }
        let cell = self.cell(principal).await?;
        let mut guard = cell.lock().await;
        let debited = actual_cost.min(guard.llm_dollar_budget);
        guard.llm_dollar_budget -= debited;
        Ok(debited)
    }

    /// Move a depletable stock between two principals atomically.
    ///
    /// Both cells are locked in ascending principal-ID order; the debit and
    /// credit happen under both locks so no observer sees an in-flight state.
    pub async fn transfer(
        &self,
        from: &PrincipalId,
        to: &PrincipalId,
        resource: ResourceKind,
        amount: bedrock::Amount,
    ) -> Result<(Balances, Balances), WorldError> {
        if from == to {
            return Err(WorldError::InvalidOperation(
                "transfer to self".into(),
            ));
        }
        if !amount.is_positive() {
            return Err(WorldError::InvalidOperation(
                "transfer amount must be positive".into(),
            ));
        }
        if resource.is_rate() {
            return Err(WorldError::InvalidOperation(format!(
                "{resource} is a rate, not a transferable stock"
            )));
        }

        let from_cell = self.cell(from).await?;
        let to_cell = self.cell(to).await?;

        // Ascending-ID lock order prevents deadlock with a crossing transfer.
        let (mut from_guard, mut to_guard) = if from < to {
            let f = from_cell.lock().await;
            let t = to_cell.lock().await;
            (f, t)
        } else {
            let t = to_cell.lock().await;
            let f = from_cell.lock().await;
            (f, t)
        };

        match resource {
            ResourceKind::Scrip => {
                let units = match amount {
                    bedrock::Amount::Units(n) => n,
                    bedrock::Amount::Dollars(_) => {
                        return Err(WorldError::InvalidOperation(
                            "scrip amounts are integers".into(),
                        ))
                    }
                };
                if from_guard.scrip < units {
                    return Err(WorldError::Insufficient {
                        resource: "scrip".into(),
                        available: from_guard.scrip.to_string(),
                        requested: units.to_string(),
                    });
                }
                from_guard.scrip -= units;
                to_guard.scrip += units;
            }
            ResourceKind::LlmBudget => {
                let dollars = amount.as_decimal();
                if from_guard.llm_dollar_budget < dollars {
                    return Err(WorldError::Insufficient {
                        resource: "llm_budget".into(),
                        available: from_guard.llm_dollar_budget.to_string(),
                        requested: dollars.to_string(),
                    });
                }
                from_guard.llm_dollar_budget -= dollars;
                to_guard.llm_dollar_budget += dollars;
            }
            ResourceKind::DiskQuota => {
                let bytes = match amount {
                    bedrock::Amount::Units(n) => n,
                    bedrock::Amount::Dollars(_) => {
                        return Err(WorldError::InvalidOperation(
                            "disk amounts are integers".into(),
                        ))
                    }
                };
                if from_guard.disk_quota < bytes {
                    return Err(WorldError::Insufficient {
                        resource: "disk_quota".into(),
                        available: from_guard.disk_quota.to_string(),
                        requested: bytes.to_string(),
                    });
                }
                from_guard.disk_quota -= bytes;
                to_guard.disk_quota += bytes;
            }
            other => {
                return Err(WorldError::InvalidOperation(format!(
                    "{other} is not transferable"
                )))
            }
        }

        Ok((from_guard.clone(), to_guard.clone()))
    }

    /// Snapshot every account for checkpointing.
    pub async fn snapshot(&self) -> BTreeMap<PrincipalId, Balances> {
        let accounts = self.accounts.read().await;
        let mut out = BTreeMap::new();
        for (id, cell) in accounts.iter() {
            out.insert(id.clone(), cell.lock().await.clone());
        }
        out
    }

    /// Replace all accounts from a checkpoint snapshot.
    pub async fn restore(&self, snapshot: BTreeMap<PrincipalId, Balances>) {
        let mut accounts = self.accounts.write().await;
        accounts.clear();
        for (id, balances) in snapshot {
            accounts.insert(id, Arc::new(Mutex::new(balances)));
        }
    }

    /// Σ scrip across all principals. Conservation checks in tests.
    pub async fn total_scrip(&self) -> i64 {
        let accounts = self.accounts.read().await;
        let mut total = 0;
        for cell in accounts.values() {
            total += cell.lock().await.scrip;
        }
        total
    }

    /// IDs of all registered principals.
    pub async fn principals(&self) -> Vec<PrincipalId> {
        self.accounts.read().await.keys().cloned().collect()
    }
}

impl Default for Ledger {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bedrock::Amount;
    use rust_decimal::Decimal;

    async fn ledger_with(pairs: &[(&str, i64)]) -> Ledger {
        let ledger = Ledger::new();
        for (id, scrip) in pairs {
            ledger
                .register(
                    PrincipalId::new(*id),
                    Balances::starting(*scrip, Decimal::ZERO, 0),
                )
                .await
                .unwrap();
        }
        ledger
    }

    #[tokio::test]
    async fn transfer_moves_scrip_and_conserves_total() {
        let ledger = ledger_with(&[("alice", 100), ("bob", 0)]).await;
        let (from, to) = ledger
            .transfer(
                &"alice".into(),
                &"bob".into(),
                ResourceKind::Scrip,
                Amount::Units(40),
            )
            .await
            .unwrap();
        assert_eq!(from.scrip, 60);
        assert_eq!(to.scrip, 40);
        assert_eq!(ledger.total_scrip().await, 100);
    }

    #[tokio::test]
    async fn exact_balance_transfers_but_one_more_fails() {
        let ledger = ledger_with(&[("alice", 100), ("bob", 0)]).await;
        ledger
            .transfer(
                &"alice".into(),
                &"bob".into(),
                ResourceKind::Scrip,
                Amount::Units(100),
            )
            .await
            .unwrap();
        assert_eq!(ledger.balances(&"alice".into()).await.unwrap().scrip, 0);

        let err = ledger
            .transfer(
                &"bob".into(),
                &"alice".into(),
                ResourceKind::Scrip,
                Amount::Units(101),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), bedrock::ErrorCode::InsufficientFunds);
        // Nothing moved.
        assert_eq!(ledger.balances(&"bob".into()).await.unwrap().scrip, 100);
    }

    #[tokio::test]
    async fn self_transfer_is_rejected() {
        let ledger = ledger_with(&[("alice", 100)]).await;
        let err = ledger
            .transfer(
                &"alice".into(),
                &"alice".into(),
                ResourceKind::Scrip,
                Amount::Units(1),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, WorldError::InvalidOperation(_)));
    }

    #[tokio::test]
    async fn llm_settlement_clamps_at_zero() {
        let ledger = Ledger::new();
        ledger
            .register(
                "p1".into(),
                Balances::starting(0, Decimal::new(1, 3), 0), // $0.001
            )
            .await
            .unwrap();
        let debited = ledger
            .settle_llm(&"p1".into(), Decimal::new(15, 4)) // $0.0015
            .await
            .unwrap();
        assert_eq!(debited, Decimal::new(1, 3));
        let balances = ledger.balances(&"p1".into()).await.unwrap();
        assert_eq!(balances.llm_dollar_budget, Decimal::ZERO);
    }

    #[tokio::test]
    async fn estimate_check_refuses_before_spending() {
        let ledger = Ledger::new();
        ledger
            .register("p1".into(), Balances::starting(0, Decimal::new(1, 3), 0))
            .await
            .unwrap();
        assert!(
            !ledger
                .covers_llm_estimate(&"p1".into(), Decimal::new(15, 4))
                .await
                .unwrap()
        );
        assert!(
            ledger
                .covers_llm_estimate(&"p1".into(), Decimal::new(5, 4))
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn crossing_transfers_conserve_scrip() {
        let ledger = Arc::new(ledger_with(&[("alice", 50), ("bob", 50)]).await);
        let mut handles = Vec::new();
        for _ in 0..20 {
            let l = Arc::clone(&ledger);
            handles.push(tokio::spawn(async move {
                let _ = l
                    .transfer(
                        &"alice".into(),
                        &"bob".into(),
                        ResourceKind::Scrip,
                        Amount::Units(3),
                    )
                    .await;
            }));
            let l = Arc::clone(&ledger);
            handles.push(tokio::spawn(async move {
                let _ = l
                    .transfer(
                        &"bob".into(),
                        &"alice".into(),
                        ResourceKind::Scrip,
                        Amount::Units(2),
                    )
                    .await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(ledger.total_scrip().await, 100);
    }

    #[tokio::test]
    async fn rates_are_not_transferable() {
        let ledger = ledger_with(&[("alice", 10), ("bob", 0)]).await;
        let err = ledger
            .transfer(
                &"alice".into(),
                &"bob".into(),
                ResourceKind::LlmCallRate,
                Amount::Units(1),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, WorldError::InvalidOperation(_)));
    }
}
