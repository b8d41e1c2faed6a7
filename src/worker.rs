//! Workers and their per-role work loops

use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering},
        Arc, OnceLock,
    },
    time::Instant,
};

use crate::{
    load::Load,
    report::WaitSample,
    resource::ExclusiveResource,
    scenario::Timings,
    thread::ExecUnit,
    tier::PriorityTier,
};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique worker identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WorkerId(u64);

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One unit of work with a fixed base tier and an effective tier that inheritance may raise.
pub struct Worker {
    id: WorkerId,
    name: String,
    base: PriorityTier,
    /// Only written with the resource lock held
    effective: AtomicU8,
    unit: OnceLock<ExecUnit>,
}

impl Worker {
    pub fn new(name: impl Into<String>, base: PriorityTier) -> Self {
        Self {
            id: WorkerId(NEXT_ID.fetch_add(1, Ordering::Relaxed)),
            name: name.into(),
            base,
            effective: AtomicU8::new(base.level()),
            unit: OnceLock::new(),
        }
    }

    /// Worker named after its tier
    pub fn for_role(role: PriorityTier) -> Self {
        Self::new(role.name(), role)
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn base_tier(&self) -> PriorityTier {
        self.base
    }

    pub fn effective_tier(&self) -> PriorityTier {
        PriorityTier::try_from(self.effective.load(Ordering::SeqCst)).unwrap_or(self.base)
    }

    pub(crate) fn set_effective_tier(&self, tier: PriorityTier) {
        self.effective.store(tier.level(), Ordering::SeqCst);
    }

    pub fn is_boosted(&self) -> bool {
        self.effective_tier() > self.base
    }

    /// Thread this worker runs on, once registered
    pub fn unit(&self) -> Option<&ExecUnit> {
        self.unit.get()
    }

    /// Binds the worker to the calling thread. Later calls are ignored.
    pub fn register_current_thread(&self) {
        let unit = ExecUnit::current();
        if self.unit.set(unit).is_err() {
            tracing::debug!(worker = %self.name, "thread already registered");
        } else {
            tracing::trace!(worker = %self.name, tid = unit.tid(), "thread registered");
        }
    }
}

impl fmt::Debug for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("base", &self.base)
            .field("effective", &self.effective_tier())
            .finish()
    }
}

/// Everything a role loop borrows from the runner
pub struct RoleContext<'a> {
    pub worker: &'a Arc<Worker>,
    pub resource: &'a ExclusiveResource,
    pub load: &'a dyn Load,
    pub timings: &'a Timings,
    /// Cleared by the runner to start draining
    pub active: &'a AtomicBool,
}

impl<'a> RoleContext<'a> {
    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

/// What a role loop produced by the time it drained
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoleOutput {
    /// Wait samples of the high role, one per acquisition
    Samples(Vec<WaitSample>),
    /// Busy bursts completed by the medium role
    Bursts(u64),
    /// Hold cycles completed by the low role
    Cycles(u64),
}

/// Runs the loop matching the worker's base tier until the run stops
pub fn run_role(cx: &RoleContext<'_>) -> RoleOutput {
    match cx.worker.base_tier() {
        PriorityTier::High => RoleOutput::Samples(run_high(cx)),
        PriorityTier::Medium => RoleOutput::Bursts(run_medium(cx)),
        PriorityTier::Low => RoleOutput::Cycles(run_low(cx)),
    }
}

/// Urgent periodic work on the shared resource. Measures how long each acquisition blocks.
pub fn run_high(cx: &RoleContext<'_>) -> Vec<WaitSample> {
    let mut samples = Vec::new();

    while cx.is_active() {
        #[cfg(feature = "profiling")]
        let _span = tracing::span!(tracing::Level::TRACE, "high_cycle").entered();

        let start = Instant::now();
        let guard = cx.resource.acquire(cx.worker);
        let sample = WaitSample::from(start.elapsed());
        samples.push(sample);

        tracing::info!(wait_ms = sample.duration_ms, "high: waited for resource");

        cx.load.work(cx.timings.high_hold);
        drop(guard);

        if !cx.is_active() {
            break;
        }
        cx.load.idle(cx.timings.high_period);
    }

    samples
}

/// CPU hog that never touches the resource. Its bursts do not yield.
pub fn run_medium(cx: &RoleContext<'_>) -> u64 {
    let mut bursts = 0;

    while cx.is_active() {
        #[cfg(feature = "profiling")]
        let _span = tracing::span!(tracing::Level::TRACE, "medium_burst").entered();

        tracing::info!("medium: running background task");
        cx.load.work(cx.timings.medium_burst);
        bursts += 1;

        if !cx.is_active() {
            break;
        }
        cx.load.idle(cx.timings.medium_idle);
    }

    bursts
}

/// Long holds of the shared resource at the lowest tier. Any elevation is imposed by the
/// resource, the loop itself never asks for one.
pub fn run_low(cx: &RoleContext<'_>) -> u64 {
    let mut cycles = 0;

    while cx.is_active() {
        #[cfg(feature = "profiling")]
        let _span = tracing::span!(tracing::Level::TRACE, "low_cycle").entered();

        let guard = cx.resource.acquire(cx.worker);
        tracing::info!("low: got resource");

        cx.load.work(cx.timings.low_hold);

        let boosted = cx.worker.is_boosted();
        drop(guard);
        cycles += 1;
        tracing::info!(boosted, "low: released resource");

        if !cx.is_active() {
            break;
        }
        cx.load.idle(cx.timings.low_period);
    }

    cycles
}
