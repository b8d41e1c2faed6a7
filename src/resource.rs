//! Exclusive resource with optional priority inheritance

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use crate::{
    error::ReleaseError,
    inherit::{InheritanceController, InheritancePolicy, Waiters},
    port::PriorityPort,
    worker::{Worker, WorkerId},
};

struct State {
    owner: Option<Arc<Worker>>,
    waiters: Waiters,
    acquisitions: u64,
}

/// A lock with at most one owner.
///
/// Which waiter gets the resource after a release is left to the scheduler; there is no fairness
/// queue. With an [`InheritanceController`] attached the holder is raised while higher tier
/// workers wait.
pub struct ExclusiveResource {
    state: Mutex<State>,
    released: Condvar,
    controller: Option<InheritanceController>,
}

impl ExclusiveResource {
    /// Plain exclusive lock, effective tiers never change
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                owner: None,
                waiters: Waiters::default(),
                acquisitions: 0,
            }),
            released: Condvar::new(),
            controller: None,
        }
    }

    pub fn with_inheritance(controller: InheritanceController) -> Self {
        Self {
            controller: Some(controller),
            ..Self::new()
        }
    }

    pub fn for_policy(policy: InheritancePolicy, port: Arc<dyn PriorityPort>) -> Self {
        if policy.is_enabled() {
            Self::with_inheritance(InheritanceController::new(port))
        } else {
            Self::new()
        }
    }

    // Poisoning only means a holder panicked; the state is updated in single steps and stays valid
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Blocks until `worker` is the sole owner.
    ///
    /// The resource is not reentrant; acquiring it again from the holder deadlocks.
    pub fn acquire(&self, worker: &Arc<Worker>) -> ResourceGuard<'_> {
        let mut state = self.lock();
        debug_assert!(
            state.owner.as_ref().map(|o| o.id()) != Some(worker.id()),
            "{} acquired the resource twice",
            worker.name()
        );

        if state.owner.is_some() {
            state.waiters.push(worker.base_tier());
            tracing::trace!(worker = %worker.name(), waiters = state.waiters.len(), "blocked");

            if let (Some(controller), Some(holder)) = (&self.controller, &state.owner) {
                controller.reconcile(holder, &state.waiters);
            }

            while state.owner.is_some() {
                state = self
                    .released
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner);
            }

            state.waiters.remove(worker.base_tier());
        }

        state.owner = Some(worker.clone());
        state.acquisitions += 1;

        // Remaining waiters now block on the new holder
        if let Some(controller) = &self.controller {
            controller.reconcile(worker, &state.waiters);
        }

        ResourceGuard {
            resource: self,
            worker: worker.clone(),
        }
    }

    /// Releases the resource if `worker` holds it and wakes one waiter.
    ///
    /// Releasing an unheld resource or releasing from a non-owner is rejected and leaves the
    /// ownership untouched.
    pub fn try_release(&self, worker: &Worker) -> Result<(), ReleaseError> {
        let (holder, restore) = {
            let mut state = self.lock();

            match &state.owner {
                None => return Err(ReleaseError::NotHeld),
                Some(owner) if owner.id() != worker.id() => return Err(ReleaseError::NotOwner),
                Some(_) => {}
            }

            let holder = state.owner.take().ok_or(ReleaseError::NotHeld)?;
            let restore = self
                .controller
                .as_ref()
                .and_then(|controller| controller.restore(&holder));

            self.released.notify_one();
            (holder, restore)
        };

        tracing::trace!(worker = %holder.name(), "released");

        // Lowering ourselves while still inside the lock would let a medium tier thread preempt
        // us with the lock taken, blocking the woken waiter behind it.
        if let (Some(controller), Some(tier)) = (&self.controller, restore) {
            controller.apply_restore(&holder, tier);
        }

        Ok(())
    }

    /// Current holder, if any
    pub fn holder(&self) -> Option<WorkerId> {
        self.lock().owner.as_ref().map(|o| o.id())
    }

    pub fn is_held(&self) -> bool {
        self.lock().owner.is_some()
    }

    /// Number of workers blocked in [`acquire`](Self::acquire)
    pub fn waiting(&self) -> usize {
        self.lock().waiters.len()
    }

    /// Completed acquisitions since creation
    pub fn acquisitions(&self) -> u64 {
        self.lock().acquisitions
    }

    /// Holder boosts performed, always zero without inheritance
    pub fn boosts(&self) -> usize {
        self.controller.as_ref().map_or(0, |c| c.boosts())
    }

    pub fn inheritance(&self) -> InheritancePolicy {
        self.controller.is_some().into()
    }
}

impl Default for ExclusiveResource {
    fn default() -> Self {
        Self::new()
    }
}

/// Ownership of an [`ExclusiveResource`]. Released on drop, including during unwinding.
#[must_use = "the resource is released as soon as the guard is dropped"]
pub struct ResourceGuard<'a> {
    resource: &'a ExclusiveResource,
    worker: Arc<Worker>,
}

impl<'a> ResourceGuard<'a> {
    pub fn worker(&self) -> &Worker {
        &self.worker
    }

    /// Releases explicitly, same as dropping the guard
    pub fn release(self) {}
}

impl<'a> Drop for ResourceGuard<'a> {
    fn drop(&mut self) {
        // Someone may have released on our behalf through `try_release`
        if let Err(e) = self.resource.try_release(&self.worker) {
            tracing::trace!(worker = %self.worker.name(), "guard release ignored: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{port::RecordingPort, tier::PriorityTier};
    use std::{
        panic::{self, AssertUnwindSafe},
        sync::atomic::{AtomicUsize, Ordering},
        thread,
        time::{Duration, Instant},
    };

    fn wait_until(what: &str, cond: impl Fn() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !cond() {
            assert!(Instant::now() < deadline, "timed out waiting for {}", what);
            thread::sleep(Duration::from_millis(1));
        }
    }

    fn inheriting() -> (Arc<RecordingPort>, Arc<ExclusiveResource>) {
        let port = Arc::new(RecordingPort::new());
        let resource = ExclusiveResource::for_policy(InheritancePolicy::Enabled, port.clone());
        (port, Arc::new(resource))
    }

    #[test]
    fn at_most_one_owner_under_contention() {
        let resource = Arc::new(ExclusiveResource::new());
        let inside = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..6)
            .map(|i| {
                let resource = resource.clone();
                let inside = inside.clone();
                let tier = PriorityTier::ALL[i % 3];
                thread::spawn(move || {
                    let worker = Arc::new(Worker::new(format!("w{}", i), tier));
                    for _ in 0..50 {
                        let _guard = resource.acquire(&worker);
                        assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                        thread::yield_now();
                        inside.fetch_sub(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(resource.acquisitions(), 300);
        assert!(!resource.is_held());
    }

    #[test]
    fn holder_is_boosted_while_higher_tier_waits() {
        let (port, resource) = inheriting();
        let low = Arc::new(Worker::new("low", PriorityTier::Low));
        let high = Arc::new(Worker::new("high", PriorityTier::High));

        let guard = resource.acquire(&low);
        assert_eq!(low.effective_tier(), PriorityTier::Low);

        let waiter = {
            let resource = resource.clone();
            let high = high.clone();
            thread::spawn(move || {
                let guard = resource.acquire(&high);
                assert_eq!(guard.worker().id(), high.id());
            })
        };

        wait_until("high to block", || resource.waiting() == 1);
        assert_eq!(low.effective_tier(), PriorityTier::High);
        assert_eq!(resource.holder(), Some(low.id()));

        // Still boosted for the rest of the hold
        thread::sleep(Duration::from_millis(20));
        assert_eq!(low.effective_tier(), PriorityTier::High);

        drop(guard);
        assert_eq!(low.effective_tier(), PriorityTier::Low);
        waiter.join().unwrap();

        assert_eq!(
            port.tiers_for(low.id()),
            vec![PriorityTier::High, PriorityTier::Low]
        );
        assert!(port.tiers_for(high.id()).is_empty());
        assert_eq!(resource.boosts(), 1);
    }

    #[test]
    fn next_holder_inherits_from_remaining_waiters() {
        let (_port, resource) = inheriting();
        let low = Arc::new(Worker::new("low", PriorityTier::Low));
        let medium = Arc::new(Worker::new("medium", PriorityTier::Medium));
        let high = Arc::new(Worker::new("high", PriorityTier::High));

        let guard = resource.acquire(&low);

        let spawn_waiter = |worker: &Arc<Worker>| {
            let resource = resource.clone();
            let worker = worker.clone();
            thread::spawn(move || {
                let guard = resource.acquire(&worker);
                // Whoever holds must be at least as urgent as everyone still waiting
                let floor = if resource.waiting() > 0 {
                    PriorityTier::Medium
                } else {
                    worker.base_tier()
                };
                assert!(guard.worker().effective_tier() >= floor);
                thread::sleep(Duration::from_millis(20));
            })
        };

        let medium_waiter = spawn_waiter(&medium);
        wait_until("medium to block", || resource.waiting() == 1);
        assert_eq!(low.effective_tier(), PriorityTier::Medium);

        let high_waiter = spawn_waiter(&high);
        wait_until("high to block", || resource.waiting() == 2);
        assert_eq!(low.effective_tier(), PriorityTier::High);

        drop(guard);
        assert_eq!(low.effective_tier(), PriorityTier::Low);

        medium_waiter.join().unwrap();
        high_waiter.join().unwrap();
        assert_eq!(medium.effective_tier(), PriorityTier::Medium);
        assert_eq!(high.effective_tier(), PriorityTier::High);
    }

    #[test]
    fn disabled_policy_never_changes_tiers() {
        let port = Arc::new(RecordingPort::new());
        let resource = Arc::new(ExclusiveResource::for_policy(
            InheritancePolicy::Disabled,
            port.clone(),
        ));
        let low = Arc::new(Worker::new("low", PriorityTier::Low));
        let high = Arc::new(Worker::new("high", PriorityTier::High));

        let guard = resource.acquire(&low);
        let waiter = {
            let resource = resource.clone();
            let high = high.clone();
            thread::spawn(move || drop(resource.acquire(&high)))
        };

        wait_until("high to block", || resource.waiting() == 1);
        assert_eq!(low.effective_tier(), PriorityTier::Low);

        drop(guard);
        waiter.join().unwrap();
        assert!(port.requests().is_empty());
        assert_eq!(resource.boosts(), 0);
        assert_eq!(resource.inheritance(), InheritancePolicy::Disabled);
    }

    #[test]
    fn release_is_idempotent_and_owner_checked() {
        let resource = ExclusiveResource::new();
        let low = Arc::new(Worker::new("low", PriorityTier::Low));
        let high = Arc::new(Worker::new("high", PriorityTier::High));

        assert_eq!(resource.try_release(&low), Err(ReleaseError::NotHeld));

        let guard = resource.acquire(&low);
        assert_eq!(resource.try_release(&high), Err(ReleaseError::NotOwner));
        assert_eq!(resource.holder(), Some(low.id()));

        assert_eq!(resource.try_release(&low), Ok(()));
        assert_eq!(resource.try_release(&low), Err(ReleaseError::NotHeld));

        // The stale guard must not steal a later owner's hold
        let high_guard = resource.acquire(&high);
        drop(guard);
        assert_eq!(resource.holder(), Some(high.id()));
        high_guard.release();
        assert!(!resource.is_held());
    }

    #[test]
    fn guard_releases_on_unwind() {
        let (_port, resource) = inheriting();
        let low = Arc::new(Worker::new("low", PriorityTier::Low));

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            let _guard = resource.acquire(&low);
            panic!("holder failed mid critical section");
        }));

        assert!(result.is_err());
        assert!(!resource.is_held());
        assert_eq!(low.effective_tier(), PriorityTier::Low);
    }

    #[test]
    fn uncontended_acquisition_does_not_boost() {
        let (port, resource) = inheriting();
        let low = Arc::new(Worker::new("low", PriorityTier::Low));

        for _ in 0..3 {
            resource.acquire(&low).release();
        }

        assert!(port.requests().is_empty());
        assert_eq!(resource.acquisitions(), 3);
    }
}
