//! Scenario runner
//!
//! A run goes `Idle -> Running -> Draining -> Stopped`. Starting a run builds a fresh resource
//! under the requested policy, spawns one thread per role and applies the base tiers. After the
//! run window (or an early shutdown request) the active flag is cleared, every worker finishes
//! its current cycle and the runner collects what they produced.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use crossbeam::{
    channel::{self, Receiver, RecvTimeoutError, Sender},
    sync::WaitGroup,
};

use crate::{
    inherit::InheritancePolicy,
    load::{Load, SpinLoad},
    port::{self, PriorityPort},
    report::{ScenarioReport, WaitSample},
    resource::ExclusiveResource,
    thread::pin_to_cpu,
    tier::PriorityTier,
    worker::{run_role, RoleContext, RoleOutput, Worker},
};

/// Durations of every phase of the three role loops
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timings {
    /// High role critical section
    pub high_hold: Duration,
    /// High role pause between acquisitions
    pub high_period: Duration,
    /// Medium role CPU burst
    pub medium_burst: Duration,
    /// Medium role pause between bursts
    pub medium_idle: Duration,
    /// Low role critical section
    pub low_hold: Duration,
    /// Low role pause between acquisitions
    pub low_period: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            high_hold: Duration::from_millis(50),
            high_period: Duration::from_millis(200),
            medium_burst: Duration::from_millis(150),
            medium_idle: Duration::from_millis(100),
            low_hold: Duration::from_millis(200),
            low_period: Duration::from_millis(400),
        }
    }
}

impl Timings {
    /// Every duration divided by `factor`, for quick runs with the same proportions
    pub fn scaled(self, factor: u32) -> Self {
        let factor = factor.max(1);
        Self {
            high_hold: self.high_hold / factor,
            high_period: self.high_period / factor,
            medium_burst: self.medium_burst / factor,
            medium_idle: self.medium_idle / factor,
            low_hold: self.low_hold / factor,
            low_period: self.low_period / factor,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScenarioConfig {
    pub timings: Timings,
    /// Pin all workers to this CPU. Inversion needs the workers to share a core.
    pub cpu: Option<usize>,
}

/// Lifecycle of a scenario run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Running,
    Draining,
    Stopped,
}

/// Runs the three role workers against one shared resource.
pub struct ScenarioRunner {
    config: ScenarioConfig,
    port: Arc<dyn PriorityPort>,
    load: Box<dyn Load>,
    state: RunState,
    shutdown_tx: Sender<()>,
    shutdown_rx: Receiver<()>,
}

impl ScenarioRunner {
    pub fn new(
        config: ScenarioConfig,
        port: Arc<dyn PriorityPort>,
        load: impl Load + 'static,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = channel::bounded(1);

        Self {
            config,
            port,
            load: Box::new(load),
            state: RunState::Idle,
            shutdown_tx,
            shutdown_rx,
        }
    }

    pub fn config(&self) -> &ScenarioConfig {
        &self.config
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Sending on this ends the current (or next) run window early. Draining still completes.
    pub fn shutdown_handle(&self) -> Sender<()> {
        self.shutdown_tx.clone()
    }

    /// Runs one scenario for `duration` and blocks until every worker has drained.
    pub fn run(&mut self, policy: InheritancePolicy, duration: Duration) -> ScenarioReport {
        debug_assert!(matches!(self.state, RunState::Idle | RunState::Stopped));

        let Self {
            config,
            port,
            load,
            state,
            shutdown_rx,
            ..
        } = self;
        let resource = ExclusiveResource::for_policy(policy, Arc::clone(port));
        let port: &dyn PriorityPort = &**port;
        let load: &dyn Load = &**load;
        let timings = &config.timings;
        let cpu = config.cpu;

        let started = Instant::now();
        let workers: Vec<Arc<Worker>> = [PriorityTier::High, PriorityTier::Medium, PriorityTier::Low]
            .iter()
            .map(|&role| Arc::new(Worker::for_role(role)))
            .collect();
        let active = AtomicBool::new(true);
        let gate = StartGate::new();

        let mut report = ScenarioReport {
            policy,
            samples: Vec::new(),
            medium_bursts: 0,
            low_cycles: 0,
            boosts: 0,
            elapsed: Duration::ZERO,
        };

        tracing::info!(inheritance = policy.is_enabled(), ?duration, "starting scenario");

        let scope = crossbeam::scope(|s| {
            let spawned: Result<Vec<_>, _> = workers
                .iter()
                .map(|worker| {
                    let (resource, active) = (&resource, &active);
                    let ticket = gate.ticket();

                    s.builder()
                        .name(format!("pathfinder-{}", worker.name()))
                        .spawn(move |_| {
                            worker.register_current_thread();

                            if let Some(cpu) = cpu {
                                if let Err(e) = pin_to_cpu(cpu) {
                                    tracing::warn!(worker = %worker.name(), cpu, "failed to pin: {}", e);
                                }
                            }

                            ticket.arrive();

                            run_role(&RoleContext {
                                worker,
                                resource,
                                load,
                                timings,
                                active,
                            })
                        })
                })
                .collect();

            let handles = match spawned {
                Ok(handles) => handles,
                Err(e) => {
                    tracing::error!("failed to spawn worker thread: {}", e);
                    // Workers that did start see the gate close with nothing left to do
                    active.store(false, Ordering::SeqCst);
                    drop(gate);
                    return;
                }
            };

            let open = gate.wait_registered();
            for worker in &workers {
                port::apply(port, worker, worker.base_tier());
            }
            drop(open);

            transition(state, RunState::Running);

            match shutdown_rx.recv_timeout(duration) {
                Ok(()) => tracing::info!("shutdown requested, ending run early"),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    tracing::debug!("shutdown channel closed")
                }
            }

            active.store(false, Ordering::SeqCst);
            transition(state, RunState::Draining);

            for (worker, handle) in workers.iter().zip(handles) {
                match handle.join() {
                    Ok(RoleOutput::Samples(samples)) => report.samples = samples,
                    Ok(RoleOutput::Bursts(bursts)) => report.medium_bursts = bursts,
                    Ok(RoleOutput::Cycles(cycles)) => report.low_cycles = cycles,
                    Err(_) => {
                        tracing::error!(worker = %worker.name(), "worker panicked, its output is lost")
                    }
                }
            }
        });

        if scope.is_err() {
            tracing::error!("scenario scope ended with a panicked worker");
        }

        for worker in &workers {
            debug_assert_eq!(worker.effective_tier(), worker.base_tier());
        }

        report.boosts = resource.boosts();
        report.elapsed = started.elapsed();
        transition(state, RunState::Stopped);
        tracing::info!(%report, "scenario finished");

        report
    }
}

impl Default for ScenarioRunner {
    fn default() -> Self {
        Self::new(ScenarioConfig::default(), port::default_port(), SpinLoad::new())
    }
}

/// Two-phase start of the worker threads: every worker registers, then waits until the runner
/// has applied the base tiers. Dropping the gate (or the sender returned by
/// [`wait_registered`](Self::wait_registered)) lets every waiting worker through.
struct StartGate {
    registered: WaitGroup,
    open_tx: Sender<()>,
    open_rx: Receiver<()>,
}

struct Ticket {
    registered: WaitGroup,
    open_rx: Receiver<()>,
}

impl StartGate {
    fn new() -> Self {
        let (open_tx, open_rx) = channel::bounded(0);
        Self {
            registered: WaitGroup::new(),
            open_tx,
            open_rx,
        }
    }

    fn ticket(&self) -> Ticket {
        Ticket {
            registered: self.registered.clone(),
            open_rx: self.open_rx.clone(),
        }
    }

    /// Blocks until every ticket has arrived or been dropped. The gate opens when the returned
    /// sender is dropped.
    fn wait_registered(self) -> Sender<()> {
        let StartGate {
            registered,
            open_tx,
            ..
        } = self;
        registered.wait();
        open_tx
    }
}

impl Ticket {
    fn arrive(self) {
        let Ticket {
            registered,
            open_rx,
        } = self;
        drop(registered);
        // nothing is ever sent, disconnection is the signal
        let _ = open_rx.recv();
    }
}

fn transition(state: &mut RunState, next: RunState) {
    tracing::debug!(from = ?*state, to = ?next, "scenario state");
    *state = next;
}

/// Runs one scenario with the default configuration and returns the high role's wait samples.
pub fn run_scenario(inheritance_enabled: bool, duration_secs: u64) -> Vec<WaitSample> {
    ScenarioRunner::default()
        .run(
            inheritance_enabled.into(),
            Duration::from_secs(duration_secs),
        )
        .samples
}
