//! Priority ports: mapping abstract tiers onto OS scheduling priorities
//!
//! Every request is best effort. Callers go through [`apply`], which logs a failed request and
//! carries on with whatever priority the thread already has.

use std::{
    io, mem,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, PoisonError,
    },
};

use crate::{
    error::PortError,
    tier::PriorityTier,
    worker::{Worker, WorkerId},
};

/// Capability to change the scheduling priority of a worker's thread.
pub trait PriorityPort: Send + Sync {
    fn set_tier(&self, worker: &Worker, tier: PriorityTier) -> Result<(), PortError>;
}

/// Requests `tier` for `worker`, logging instead of failing.
pub fn apply(port: &dyn PriorityPort, worker: &Worker, tier: PriorityTier) {
    match port.set_tier(worker, tier) {
        Ok(()) => tracing::trace!(worker = %worker.name(), %tier, "tier applied"),
        Err(e) => tracing::warn!(worker = %worker.name(), %tier, "{}", e),
    }
}

/// Port used by [`ScenarioRunner::default`](crate::ScenarioRunner): [`FifoPort`] with the `rt`
/// feature, [`NoopPort`] otherwise.
pub fn default_port() -> Arc<dyn PriorityPort> {
    #[cfg(feature = "rt")]
    return Arc::new(FifoPort::new());

    #[cfg(not(feature = "rt"))]
    return Arc::new(NoopPort);
}

fn set_sched_param(
    thread: libc::pthread_t,
    policy: libc::c_int,
    priority: libc::c_int,
) -> io::Result<()> {
    // zeroed, musl carries extra sporadic server fields
    let mut param: libc::sched_param = unsafe { mem::zeroed() };
    param.sched_priority = priority;

    // returns the error number instead of setting errno
    match unsafe { libc::pthread_setschedparam(thread, policy, &param) } {
        0 => Ok(()),
        errno => Err(io::Error::from_raw_os_error(errno)),
    }
}

/// Whether this process may put threads into `SCHED_FIFO`.
///
/// Checked on a short-lived thread so the caller's own scheduling is left alone.
pub fn fifo_available() -> bool {
    std::thread::spawn(|| {
        set_sched_param(unsafe { libc::pthread_self() }, libc::SCHED_FIFO, 1).is_ok()
    })
    .join()
    .unwrap_or(false)
}

/// Linux real-time port. Uses `SCHED_FIFO` and falls back to `SCHED_OTHER` when the kernel
/// declines, which is what happens without `CAP_SYS_NICE`.
#[derive(Debug, Default)]
pub struct FifoPort {
    fallback_reported: AtomicBool,
}

impl FifoPort {
    pub const fn new() -> Self {
        Self {
            fallback_reported: AtomicBool::new(false),
        }
    }
}

impl PriorityPort for FifoPort {
    fn set_tier(&self, worker: &Worker, tier: PriorityTier) -> Result<(), PortError> {
        let unit = worker.unit().ok_or_else(|| PortError::Unregistered {
            worker: worker.name().to_owned(),
        })?;

        let fifo_err = match set_sched_param(unit.pthread(), libc::SCHED_FIFO, tier.fifo_priority())
        {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };

        set_sched_param(unit.pthread(), libc::SCHED_OTHER, 0).map_err(|source| {
            PortError::SetSchedParam {
                worker: worker.name().to_owned(),
                tier,
                source,
            }
        })?;

        if !self.fallback_reported.swap(true, Ordering::Relaxed) {
            tracing::warn!(
                "SCHED_FIFO unavailable ({}), threads run under SCHED_OTHER and tiers have no effect",
                fifo_err
            );
        } else {
            tracing::debug!(worker = %worker.name(), %tier, "SCHED_FIFO declined");
        }

        Ok(())
    }
}

/// Accepts every request without touching the scheduler.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopPort;

impl PriorityPort for NoopPort {
    fn set_tier(&self, worker: &Worker, tier: PriorityTier) -> Result<(), PortError> {
        tracing::trace!(worker = %worker.name(), %tier, "noop priority request");
        Ok(())
    }
}

/// Remembers every request in order. Can be switched to rejecting them.
#[derive(Debug, Default)]
pub struct RecordingPort {
    requests: Mutex<Vec<(WorkerId, PriorityTier)>>,
    reject: AtomicBool,
}

impl RecordingPort {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes subsequent requests fail after being recorded
    pub fn reject_requests(&self, reject: bool) {
        self.reject.store(reject, Ordering::SeqCst);
    }

    pub fn requests(&self) -> Vec<(WorkerId, PriorityTier)> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Tiers requested for one worker, oldest first
    pub fn tiers_for(&self, worker: WorkerId) -> Vec<PriorityTier> {
        self.requests()
            .into_iter()
            .filter(|(id, _)| *id == worker)
            .map(|(_, tier)| tier)
            .collect()
    }
}

impl PriorityPort for RecordingPort {
    fn set_tier(&self, worker: &Worker, tier: PriorityTier) -> Result<(), PortError> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((worker.id(), tier));

        if self.reject.load(Ordering::SeqCst) {
            return Err(PortError::Rejected {
                worker: worker.name().to_owned(),
                reason: "recording port set to reject".into(),
            });
        }

        Ok(())
    }
}
