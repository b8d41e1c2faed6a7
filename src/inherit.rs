//! Priority inheritance protocol
//!
//! While a resource is held, the holder runs at the highest tier among its own base tier and the
//! base tiers of every worker blocked on the resource. The bookkeeping lives inside the resource
//! lock, so ownership, the waiter set and effective tiers always change together.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use crate::{
    port::{self, PriorityPort},
    tier::PriorityTier,
    worker::Worker,
};

/// Whether a scenario run uses priority inheritance. Fixed for the duration of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InheritancePolicy {
    Disabled,
    Enabled,
}

impl InheritancePolicy {
    pub const fn is_enabled(self) -> bool {
        matches!(self, InheritancePolicy::Enabled)
    }
}

impl From<bool> for InheritancePolicy {
    fn from(enabled: bool) -> Self {
        if enabled {
            InheritancePolicy::Enabled
        } else {
            InheritancePolicy::Disabled
        }
    }
}

/// Tiers of the workers currently blocked on a resource
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Waiters {
    counts: [usize; 3],
}

impl Waiters {
    pub fn push(&mut self, tier: PriorityTier) {
        self.counts[tier.index()] += 1;
    }

    pub fn remove(&mut self, tier: PriorityTier) {
        let count = &mut self.counts[tier.index()];
        debug_assert!(*count > 0, "removing a {} waiter that was never added", tier);
        *count = count.saturating_sub(1);
    }

    /// Highest tier with at least one waiter
    pub fn highest(&self) -> Option<PriorityTier> {
        PriorityTier::ALL
            .iter()
            .rev()
            .copied()
            .find(|tier| self.counts[tier.index()] > 0)
    }

    pub fn len(&self) -> usize {
        self.counts.iter().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Raises and restores holder tiers. Only attached to a resource when the policy is enabled,
/// otherwise effective tiers never move.
pub struct InheritanceController {
    port: Arc<dyn PriorityPort>,
    boosts: AtomicUsize,
}

impl InheritanceController {
    pub fn new(port: Arc<dyn PriorityPort>) -> Self {
        Self {
            port,
            boosts: AtomicUsize::new(0),
        }
    }

    /// Number of times a holder was raised above its previous effective tier
    pub fn boosts(&self) -> usize {
        self.boosts.load(Ordering::Relaxed)
    }

    /// Brings the holder to `max(base, highest waiter)` and applies the change immediately.
    ///
    /// Must be called with the resource lock held, after any change to the holder or the waiter
    /// set. A raise has to reach the scheduler before the holder can release, so it is applied
    /// here rather than deferred.
    pub(crate) fn reconcile(&self, holder: &Worker, waiters: &Waiters) {
        let target = waiters
            .highest()
            .map_or(holder.base_tier(), |tier| tier.max(holder.base_tier()));
        let current = holder.effective_tier();

        if target == current {
            return;
        }

        holder.set_effective_tier(target);
        if target > current {
            self.boosts.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(worker = %holder.name(), from = %current, to = %target, "holder boosted");
        } else {
            tracing::debug!(worker = %holder.name(), from = %current, to = %target, "holder lowered");
        }

        port::apply(&*self.port, holder, target);
    }

    /// Returns the holder to its base tier on release.
    ///
    /// Must be called with the resource lock held. Returns the tier that still has to be pushed
    /// to the scheduler with [`apply_restore`](Self::apply_restore) once the lock is dropped.
    #[must_use]
    pub(crate) fn restore(&self, holder: &Worker) -> Option<PriorityTier> {
        let base = holder.base_tier();
        let current = holder.effective_tier();

        if current == base {
            return None;
        }

        holder.set_effective_tier(base);
        tracing::debug!(worker = %holder.name(), from = %current, to = %base, "holder restored");
        Some(base)
    }

    /// Lowers the scheduler priority of a released holder. The releasing thread calls this itself,
    /// so it cannot race with a new raise for the same worker.
    pub(crate) fn apply_restore(&self, holder: &Worker, tier: PriorityTier) {
        port::apply(&*self.port, holder, tier);
    }
}
