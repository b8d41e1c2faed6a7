//! Simulated load
//!
//! Workers never burn time directly, they go through a [`Load`] so that the CPU hog can be swapped
//! for plain sleeps when real preemption is not what is being tested.

use std::{
    hint::black_box,
    thread,
    time::{Duration, Instant},
};

/// How a worker occupies its thread.
pub trait Load: Send + Sync {
    /// Keeps the thread busy for `duration` of its own CPU time, so a preempted worker takes
    /// longer in wall time. Must not yield voluntarily when simulating CPU work.
    fn work(&self, duration: Duration);

    /// Suspends the thread for `duration`.
    fn idle(&self, duration: Duration);
}

/// Busy-spins through `work`, the way a CPU bound task competes for a core.
///
/// The amount of work is measured on the thread CPU clock: time spent preempted by another
/// worker does not count towards it.
#[derive(Debug, Clone, Copy)]
pub struct SpinLoad {
    /// Accumulator iterations between two clock reads
    pub round: u32,
}

impl SpinLoad {
    pub const fn new() -> Self {
        Self { round: 50_000 }
    }

    fn spin_until(&self, mut done: impl FnMut() -> bool) {
        while !done() {
            let mut acc: u64 = 0;
            for i in 0..u64::from(self.round) {
                acc = black_box(acc.wrapping_add(i.wrapping_mul(i)));
            }
            black_box(acc);
        }
    }
}

impl Default for SpinLoad {
    fn default() -> Self {
        Self::new()
    }
}

impl Load for SpinLoad {
    fn work(&self, duration: Duration) {
        let start = match crate::thread::cpu_time() {
            Ok(start) => start,
            Err(e) => {
                tracing::warn!("thread CPU clock unavailable ({}), spinning on wall time", e);
                let start = Instant::now();
                return self.spin_until(|| start.elapsed() >= duration);
            }
        };

        self.spin_until(|| match crate::thread::cpu_time() {
            Ok(now) => now.saturating_sub(start) >= duration,
            Err(_) => true,
        });
    }

    fn idle(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

/// Sleeps through both work and idle periods. Deterministic stand-in for [`SpinLoad`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SleepLoad;

impl Load for SleepLoad {
    fn work(&self, duration: Duration) {
        thread::sleep(duration);
    }

    fn idle(&self, duration: Duration) {
        thread::sleep(duration);
    }
}
