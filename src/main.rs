//! Symbolic-regression orchestrator CLI - Run a simulated search from JSON configuration.

#[cfg(feature = "dhat-heap")]
#[global_allocator]
static ALLOC: dhat::Alloc = dhat::Alloc;

use std::fs;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use symreg_orchestrator::{
    schema::RunConfig,
    search::{Orchestrator, SimulatedBackend, spawn},
};

const POLL_INTERVAL: Duration = Duration::from_millis(200);

fn main() {
    #[cfg(feature = "dhat-heap")]
    let _profiler = dhat::Profiler::new_heap();

    env_logger::init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        eprintln!("Usage: {} <run.json> [seed]", args[0]);
        eprintln!();
        eprintln!("Run an orchestrated symbolic-regression search from JSON configuration.");
        eprintln!();
        eprintln!("Arguments:");
        eprintln!("  run.json  Path to run configuration file");
        eprintln!("  seed      Seed for the simulated backend (default: 42)");
        eprintln!();
        eprintln!("Example configuration is generated with --example flag.");
        std::process::exit(1);
    }

    if args[1] == "--example" {
        print_example_config();
        return;
    }

    let config_path = PathBuf::from(&args[1]);
    let seed: u64 = args.get(2).and_then(|s| s.parse().ok()).unwrap_or(42);

    // Load configuration
    let config_str = fs::read_to_string(&config_path).unwrap_or_else(|e| {
        eprintln!("Error reading config file: {}", e);
        std::process::exit(1);
    });

    let config: RunConfig = serde_json::from_str(&config_str).unwrap_or_else(|e| {
        eprintln!("Error parsing config: {}", e);
        std::process::exit(1);
    });

    println!("Symbolic Regression Search");
    println!("==========================");
    println!(
        "Cycles: {} x {} epochs ({} islands)",
        config.cycles, config.epochs_per_cycle, config.island_count
    );
    println!("Shutdown score: {}", config.shutdown_score);
    println!("Model: {}", config.backend.primary_model());
    println!("Seed: {}", seed);
    println!();

    let orchestrator = Orchestrator::new(config, SimulatedBackend::new(seed));
    let handle = spawn(orchestrator).unwrap_or_else(|e| {
        eprintln!("Error starting run: {}", e);
        std::process::exit(1);
    });
    let monitor = handle.monitor().clone();

    // Poll progress deltas until the run thread exits
    let mut cursor = None;
    loop {
        let finished = handle.is_finished();
        for frame in monitor.get_progress_since(cursor) {
            println!("  [cycle {}] {}", frame.cycle, frame.log_message);
            cursor = Some(frame.version);
        }
        if finished {
            break;
        }
        thread::sleep(POLL_INTERVAL);
    }

    let result = handle.join().unwrap_or_else(|e| {
        eprintln!("Run failed: {}", e);
        std::process::exit(1);
    });
    let state = monitor.get_state();

    println!();
    println!("Final result ({:?}):", result.reason);
    println!("  Best score: {:.4}", result.score);
    println!("  Expression: {}", result.expression);
    println!("  API calls: {}", result.total_api_calls);
    println!(
        "  Cycles: {}/{} in {:.2}s",
        state.current_cycle, result.total_cycles, state.elapsed_seconds
    );
    if !result.pareto_frontier.is_empty() {
        println!();
        println!("Pareto frontier:");
        for entry in &result.pareto_frontier {
            println!(
                "  {:>2} terms  {:>8.4}  {}",
                entry.complexity, entry.score, entry.expression
            );
        }
    }
}

fn print_example_config() {
    let config = RunConfig::default();

    println!("Example configuration (run.json):");
    match serde_json::to_string_pretty(&config) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Error serializing example: {}", e),
    }
}
