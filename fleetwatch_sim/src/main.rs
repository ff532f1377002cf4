//! FleetWatch Simulator CLI
//!
//! Run deterministic fleet scenarios against the simulated store.

use clap::Parser;
use fleetwatch_core::FleetConfig;
use fleetwatch_sim::scenarios::ScenarioId;
use fleetwatch_sim::{ScenarioResult, ScenarioRunner};
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// FleetWatch Deterministic Simulation CLI
#[derive(Parser, Debug)]
#[command(name = "fleetwatch-sim")]
#[command(about = "Run deterministic fleet monitoring scenarios", long_about = None)]
struct Args {
    /// Master seed for determinism (0 = random from time)
    #[arg(short, long, default_value = "42")]
    seed: u64,

    /// Number of simulated vehicles
    #[arg(short = 'n', long, default_value = "4")]
    vehicles: usize,

    /// Scenario to run (patrol, breakout, speeding, glitchy_telemetry, shutdown_drill, flaky_uplink, all)
    #[arg(short = 'S', long, default_value = "all")]
    scenario: String,

    /// Number of consecutive seeds to test (for CI mode)
    #[arg(long, default_value = "1")]
    seeds: usize,

    /// Simulated duration in seconds
    #[arg(short, long, default_value = "600")]
    duration: f64,

    /// Seconds between telemetry pushes
    #[arg(short, long, default_value = "5")]
    interval: f64,

    /// JSON configuration file (admin reference, palette, H3 resolution)
    #[arg(short, long)]
    config: Option<String>,

    /// Override the geofence radius in kilometers
    #[arg(long)]
    radius_km: Option<f64>,

    /// Override the speed limit in km/h
    #[arg(long)]
    speed_limit: Option<f64>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// JSON output for CI parsing
    #[arg(long)]
    json: bool,

    /// Export per-tick fleet views to a JSON file
    #[arg(long)]
    export: Option<String>,
}

fn load_config(args: &Args) -> Result<FleetConfig, String> {
    let mut config = match &args.config {
        Some(path) => FleetConfig::from_path(path).map_err(|e| format!("{}: {}", path, e))?,
        None => FleetConfig::default(),
    };

    if let Some(radius_km) = args.radius_km {
        config.reference = config.reference.with_radius_km(radius_km);
    }
    if let Some(limit) = args.speed_limit {
        config.reference.speed_limit_kmh = limit;
    }

    config.validate().map_err(|e| e.to_string())?;
    Ok(config)
}

fn print_json(results: &[ScenarioResult], failed: usize) {
    let summary = serde_json::json!({
        "total": results.len(),
        "passed": results.len() - failed,
        "failed": failed,
        "results": results.iter().map(|r| {
            serde_json::json!({
                "scenario": r.scenario.name(),
                "seed": r.seed,
                "passed": r.passed,
                "ticks": r.total_ticks,
                "time_secs": r.final_time_secs,
                "vehicles": r.final_vehicle_count,
                "metrics": r.metrics,
                "failure_reason": r.failure_reason,
            })
        }).collect::<Vec<_>>(),
    });

    match serde_json::to_string_pretty(&summary) {
        Ok(json) => println!("{}", json),
        Err(e) => error!("Failed to encode summary: {}", e),
    }
}

fn main() -> ExitCode {
    let args = Args::parse();

    // Initialize logging (RUST_LOG wins over --verbose). Logs go to stderr;
    // stdout carries only the --json summary.
    let level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .expect("Failed to set tracing subscriber");

    if !args.json {
        info!("FleetWatch Simulator v{}", env!("CARGO_PKG_VERSION"));
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    }

    let scenarios: Vec<ScenarioId> = if args.scenario == "all" {
        ScenarioId::all()
    } else {
        match args.scenario.parse() {
            Ok(scenario) => vec![scenario],
            Err(e) => {
                eprintln!("Error: {}", e);
                eprintln!("Available scenarios: patrol, breakout, speeding, glitchy_telemetry, shutdown_drill, flaky_uplink, all");
                return ExitCode::from(2);
            }
        }
    };

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: invalid configuration: {}", e);
            return ExitCode::from(2);
        }
    };

    let base_seed = if args.seed == 0 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(42)
    } else {
        args.seed
    };

    let runner_for = |seed: u64| {
        ScenarioRunner::new(seed, args.vehicles)
            .with_duration(args.duration)
            .with_interval(args.interval)
            .with_config(config.clone())
    };

    // Handle --export mode
    if let Some(export_path) = &args.export {
        if scenarios.len() > 1 {
            eprintln!("Error: --export only supports a single scenario, not 'all'");
            return ExitCode::from(2);
        }

        let (result, export) = runner_for(base_seed).run_with_export(scenarios[0]);
        if let Err(e) = export.write_to_file(export_path) {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
        info!("Exported {} frames to {}", export.frames.len(), export_path);

        if result.passed {
            info!("✓ {} (seed={}) PASSED", scenarios[0].name(), base_seed);
            return ExitCode::SUCCESS;
        }
        error!(
            "✗ {} FAILED: {}",
            scenarios[0].name(),
            result.failure_reason.as_deref().unwrap_or("unknown")
        );
        return ExitCode::FAILURE;
    }

    let mut all_results: Vec<ScenarioResult> = Vec::new();
    let mut failed_count = 0;

    for seed_offset in 0..args.seeds {
        let seed = base_seed.wrapping_add(seed_offset as u64);
        let runner = runner_for(seed);

        for scenario in &scenarios {
            let result = runner.run(*scenario);

            if !args.json {
                if result.passed {
                    info!(
                        "✓ {} (seed={}) PASSED | snapshots={} alerts={}",
                        scenario.name(),
                        seed,
                        result.metrics.snapshots,
                        result.metrics.notifications
                    );
                } else {
                    error!(
                        "✗ {} (seed={}) FAILED: {}",
                        scenario.name(),
                        seed,
                        result.failure_reason.as_deref().unwrap_or("unknown")
                    );
                }
            }

            if !result.passed {
                failed_count += 1;
            }
            all_results.push(result);
        }
    }

    if args.json {
        print_json(&all_results, failed_count);
    } else {
        let total = all_results.len();
        info!("");
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
        if failed_count == 0 {
            info!("✅ All {} scenario runs passed!", total);
        } else {
            error!("❌ {}/{} scenario runs failed!", failed_count, total);
            for result in all_results.iter().filter(|r| !r.passed) {
                error!(
                    "  - {} seed={}: {}",
                    result.scenario.name(),
                    result.seed,
                    result.failure_reason.as_deref().unwrap_or("unknown")
                );
            }
        }
    }

    if failed_count > 0 {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
