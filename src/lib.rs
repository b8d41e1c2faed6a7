//! Priority inversion and priority inheritance on real-time Linux threads
//!
//! **IMPORTANT**: This crate is published as [`linux-pathfinder`] on crates.io but the name of the
//! library is `pathfinder`.
//!
//! Reproduces the Mars Pathfinder bug: a high tier worker and a low tier worker share one
//! [`ExclusiveResource`] while an unrelated medium tier worker hogs the CPU. Without inheritance
//! the medium worker preempts the low worker in the middle of its hold, and the high worker waits
//! far longer than the hold itself. With inheritance the holder runs at the tier of its most
//! urgent waiter until it releases.
//!
//! Tiers are applied through a [`PriorityPort`]. With the default `rt` feature that is
//! `SCHED_FIFO`, which requires root privileges (or `CAP_SYS_NICE`). For the inversion to show
//! on a multi-core machine the workers must share a CPU, see [`ScenarioConfig::cpu`].
//!
//! [`linux-pathfinder`]: https://crates.io/crates/linux-pathfinder
//!

pub use ctrlc;
pub use tracing;

#[cfg(feature = "profiling")]
pub use tracing_chrome;
#[cfg(feature = "profiling")]
pub use tracing_subscriber;

pub mod error;
pub mod inherit;
pub mod load;
pub mod port;
pub mod report;
pub mod resource;
pub mod scenario;
pub mod thread;
pub mod tier;
pub mod worker;

pub use error::{PortError, ReleaseError};
pub use inherit::{InheritanceController, InheritancePolicy};
pub use load::{Load, SleepLoad, SpinLoad};
pub use port::{FifoPort, NoopPort, PriorityPort, RecordingPort};
pub use report::{ScenarioReport, WaitSample};
pub use resource::{ExclusiveResource, ResourceGuard};
pub use scenario::{run_scenario, RunState, ScenarioConfig, ScenarioRunner, Timings};
pub use tier::PriorityTier;
pub use worker::{Worker, WorkerId};
