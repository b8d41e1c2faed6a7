// Runs the Mars Pathfinder scenario twice, without and then with priority inheritance, and
// compares how long the high tier worker waited for the shared resource.
//
// Real preemption needs SCHED_FIFO, so run as root and pin the workers to one CPU:
//   sudo cargo run --release --example mars_pathfinder -- --cpu 0

use std::{
    io::{self, BufRead},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use clap::{Parser, ValueEnum};
use pathfinder::{
    port, InheritancePolicy, ScenarioConfig, ScenarioReport, ScenarioRunner, SleepLoad, SpinLoad,
    Timings,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Scenario {
    Problem,
    Solution,
    Both,
}

/// Mars Pathfinder priority inversion simulation
#[derive(Debug, Parser)]
struct Opts {
    /// Length of each scenario run in seconds.
    #[clap(short = 'd', long, env = "PATHFINDER_DURATION", default_value = "3")]
    duration: u64,

    /// Pin all workers to this CPU so that they compete for a single core.
    #[clap(short = 'c', long, env = "PATHFINDER_CPU")]
    cpu: Option<usize>,

    /// Which scenario to run.
    #[clap(short = 's', long, value_enum, default_value = "both")]
    scenario: Scenario,

    /// Sleep through work periods instead of spinning the CPU.
    #[clap(long, action = clap::ArgAction::SetTrue)]
    sleep_load: bool,

    /// Divide every role timing by this factor.
    #[clap(long, default_value = "1")]
    scale: u32,

    /// Wait for Enter between the two scenarios.
    #[clap(long, action = clap::ArgAction::SetTrue)]
    pause: bool,

    /// Enable verbose output, including per-cycle events. Specify multiple times to increase
    /// verbosity.
    #[clap(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[cfg(not(feature = "profiling"))]
fn init_tracing(verbose: u8) {
    use pathfinder::tracing::Level;

    let level = match verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_thread_names(true)
        .init();
}

// Chrome trace written to the working directory when the guard drops
#[cfg(feature = "profiling")]
fn init_tracing(_verbose: u8) -> pathfinder::tracing_chrome::FlushGuard {
    use pathfinder::tracing_subscriber::prelude::*;

    let (chrome_layer, guard) = pathfinder::tracing_chrome::ChromeLayerBuilder::new().build();
    pathfinder::tracing_subscriber::registry()
        .with(chrome_layer)
        .init();
    guard
}

fn banner(title: &str, policy: InheritancePolicy) {
    let suffix = match policy {
        InheritancePolicy::Disabled => " (priority inversion problem)",
        InheritancePolicy::Enabled => " (with priority inheritance)",
    };
    println!("\n{}", "=".repeat(50));
    println!("{}{}", title, suffix);
    println!("{}", "=".repeat(50));
}

fn main() {
    let opts = Opts::parse();

    let _guard = init_tracing(opts.verbose);

    let config = ScenarioConfig {
        timings: Timings::default().scaled(opts.scale),
        cpu: opts.cpu,
    };
    let mut runner = if opts.sleep_load {
        ScenarioRunner::new(config, port::default_port(), SleepLoad)
    } else {
        ScenarioRunner::new(config, port::default_port(), SpinLoad::new())
    };

    let interrupted = Arc::new(AtomicBool::new(false));
    let shutdown = runner.shutdown_handle();
    {
        let interrupted = interrupted.clone();
        ctrlc::set_handler(move || {
            interrupted.store(true, Ordering::SeqCst);
            let _ = shutdown.try_send(());
        })
        .expect("Error setting Ctrl-C handler");
    }

    println!("Mars Pathfinder Priority Inversion Simulation");
    println!("==============================================");
    println!("Watch the HIGH thread wait times!");
    if !port::fifo_available() {
        println!("SCHED_FIFO is not available, workers run under SCHED_OTHER and may not preempt each other");
    }

    let duration = Duration::from_secs(opts.duration);
    let mut reports: Vec<ScenarioReport> = Vec::new();

    if matches!(opts.scenario, Scenario::Problem | Scenario::Both) {
        banner("PROBLEM", InheritancePolicy::Disabled);
        let report = runner.run(InheritancePolicy::Disabled, duration);
        println!("{}", report);
        reports.push(report);
    }

    if matches!(opts.scenario, Scenario::Both) && opts.pause && !interrupted.load(Ordering::SeqCst)
    {
        println!("Press Enter to see the solution...");
        let _ = io::stdin().lock().lines().next();
    }

    if matches!(opts.scenario, Scenario::Solution | Scenario::Both)
        && !interrupted.load(Ordering::SeqCst)
    {
        banner("SOLUTION", InheritancePolicy::Enabled);
        let report = runner.run(InheritancePolicy::Enabled, duration);
        println!("{}", report);
        reports.push(report);
    }

    if let [problem, solution] = reports.as_slice() {
        println!("\nKEY OBSERVATION:");
        match (problem.mean_wait(), solution.mean_wait()) {
            (Some(without), Some(with)) => {
                println!("Without priority inheritance: HIGH thread waits {:.1}ms on average", without);
                println!("With priority inheritance: HIGH thread waits {:.1}ms on average", with);
                if with >= without {
                    println!(
                        "No improvement measured. Are the workers sharing a CPU (--cpu) and is SCHED_FIFO available?"
                    );
                }
            }
            _ => println!("HIGH thread never acquired the resource in one of the runs"),
        }
    }
}
