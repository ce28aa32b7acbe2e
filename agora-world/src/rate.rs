//! The rate tracker — renewable capacity in rolling time windows.
//!
//! Purely additive: each consumption appends an `(Instant, amount)` record
//! to the principal's list for that resource, and old records expire by
//! falling out of the window. There is no per-tick refresh and no reset.
//! `now` is always passed in explicitly so tests control time.

use bedrock::{PrincipalId, ResourceKind, WorldError};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Limit for one rate resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    /// Length of the rolling window.
    pub window: Duration,
    /// Maximum total amount inside one window.
    pub max_per_window: u64,
}

impl RateLimit {
    /// A limit of `max_per_window` per `window_seconds`.
    #[must_use]
    pub fn per_seconds(max_per_window: u64, window_seconds: u64) -> Self {
        Self {
            window: Duration::from_secs(window_seconds),
            max_per_window,
        }
    }
}

type Key = (PrincipalId, ResourceKind);

/// Rolling-window rate accounting per `(principal, resource)` pair.
///
/// Records for different pairs are independent; the interior mutex guards
/// only short, non-awaiting bookkeeping.
pub struct RateTracker {
    limits: HashMap<ResourceKind, RateLimit>,
    records: Mutex<HashMap<Key, Vec<(Instant, u64)>>>,
}

/// The tracker's verdict on one consumption attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateVerdict {
    /// The amount was recorded.
    Ok,
    /// Over capacity; retry after the embedded duration.
    OverCapacity(Duration),
}

impl RateTracker {
    /// A tracker with the given per-resource limits. Resources without a
    /// limit are unmetered.
    #[must_use]
    pub fn new(limits: HashMap<ResourceKind, RateLimit>) -> Self {
        Self {
            limits,
            records: Mutex::new(HashMap::new()),
        }
    }

    /// The configured limit for a resource, if any.
    #[must_use]
    pub fn limit(&self, resource: ResourceKind) -> Option<RateLimit> {
        self.limits.get(&resource).copied()
    }

    /// Remaining capacity for the pair at `now`.
    ///
    /// `capacity(now) = max_per_window − Σ amounts within window(now)`.
    /// Unmetered resources report `u64::MAX`.
    pub fn capacity(&self, principal: &PrincipalId, resource: ResourceKind, now: Instant) -> u64 {
        let Some(limit) = self.limits.get(&resource) else {
            return u64::MAX;
        };
        let mut records = self.records.lock().expect("rate tracker poisoned");
        let used = match records.get_mut(&(principal.clone(), resource)) {
            Some(list) => {
                expire(list, limit.window, now);
                list.iter().map(|(_, amount)| amount).sum::<u64>()
            }
            None => 0,
        };
        limit.max_per_window.saturating_sub(used)
    }

    /// Try to consume `amount` of `resource` for `principal` at `now`.
    ///
    /// On success the record is appended. Over capacity, nothing is
    /// recorded and the verdict carries how long until enough old records
    /// expire for the same amount to fit.
    pub fn consume(
        &self,
        principal: &PrincipalId,
        resource: ResourceKind,
        amount: u64,
        now: Instant,
    ) -> RateVerdict {
        let Some(limit) = self.limits.get(&resource) else {
            return RateVerdict::Ok;
        };
        let mut records = self.records.lock().expect("rate tracker poisoned");
        let list = records.entry((principal.clone(), resource)).or_default();
        expire(list, limit.window, now);

        let used: u64 = list.iter().map(|(_, amount)| amount).sum();
        if used + amount <= limit.max_per_window {
            list.push((now, amount));
            return RateVerdict::Ok;
        }

        RateVerdict::OverCapacity(retry_after(list, limit, used, amount, now))
    }

    /// Like [`consume`](Self::consume) but returning the world error used
    /// at the dispatcher boundary.
    pub fn consume_or_err(
        &self,
        principal: &PrincipalId,
        resource: ResourceKind,
        amount: u64,
        now: Instant,
    ) -> Result<(), WorldError> {
        match self.consume(principal, resource, amount, now) {
            RateVerdict::Ok => Ok(()),
            RateVerdict::OverCapacity(wait) => Err(WorldError::RateExceeded {
                resource: resource.to_string(),
                retry_after_secs: wait.as_secs().max(1),
            }),
        }
    }
}

/// Drop records older than the window.
fn expire(list: &mut Vec<(Instant, u64)>, window: Duration, now: Instant) {
    let cutoff = now.checked_sub(window);
    if let Some(cutoff) = cutoff {
        list.retain(|(at, _)| *at > cutoff);
    }
}

/// How long until enough of the oldest records expire that `amount` fits.
fn retry_after(
    list: &[(Instant, u64)],
    limit: &RateLimit,
    used: u64,
    amount: u64,
    now: Instant,
) -> Duration {
    if amount > limit.max_per_window {
        // Will never fit; report a full window.
        return limit.window;
    }
    let need_to_free = used + amount - limit.max_per_window;
    let mut freed = 0u64;
    for (at, recorded) in list {
        freed += recorded;
        if freed >= need_to_free {
            let expires_at = *at + limit.window;
            return expires_at.saturating_duration_since(now);
        }
    }
    limit.window
}
