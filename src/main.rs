use std::process::ExitCode;

use aloha_sim::simulation::{self, SimulationConfig, SimulationOutcome};
use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use indicatif::ProgressBar;
use rayon::prelude::*;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(about = "Pure ALOHA channel simulator")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a single simulation and print the channel report
    Run {
        /// Number of users sharing the channel
        #[arg(long, default_value_t = 100)]
        users: usize,
        /// Packets per second generated by each user
        #[arg(long, default_value_t = 0.001)]
        arrival_rate: f64,
        /// Packet duration in seconds
        #[arg(long, default_value_t = 1.0)]
        packet_duration: f64,
        /// Simulation horizon in seconds
        #[arg(long, default_value_t = 500_000.0)]
        horizon: f64,
        /// Base RNG seed
        #[arg(long, default_value_t = 0)]
        seed: u64,
    },
    /// Sweep the user count and print utilization vs. throughput as CSV
    Sweep {
        /// Smallest user count
        #[arg(long, default_value_t = 50)]
        min_users: usize,
        /// Largest user count (inclusive)
        #[arg(long, default_value_t = 2000)]
        max_users: usize,
        /// User count increment between points
        #[arg(long, default_value_t = 50)]
        step: usize,
        /// Packets per second generated by each user
        #[arg(long, default_value_t = 0.001)]
        arrival_rate: f64,
        /// Packet duration in seconds
        #[arg(long, default_value_t = 1.0)]
        packet_duration: f64,
        /// Simulation horizon in seconds per point
        #[arg(long, default_value_t = 50_000.0)]
        horizon: f64,
        /// Base RNG seed
        #[arg(long, default_value_t = 0)]
        seed: u64,
    },
}

fn main() -> ExitCode {
    dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("{}=error", env!("CARGO_CRATE_NAME")).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match Cli::parse().command {
        Command::Run {
            users,
            arrival_rate,
            packet_duration,
            horizon,
            seed,
        } => run_once(SimulationConfig {
            num_users: users,
            arrival_rate_per_user: arrival_rate,
            packet_duration,
            simulation_duration: horizon,
            seed,
        }),
        Command::Sweep {
            min_users,
            max_users,
            step,
            arrival_rate,
            packet_duration,
            horizon,
            seed,
        } => sweep(min_users, max_users, step, SimulationConfig {
            num_users: min_users,
            arrival_rate_per_user: arrival_rate,
            packet_duration,
            simulation_duration: horizon,
            seed,
        }),
    }
}

fn run_once(config: SimulationConfig) -> ExitCode {
    match simulation::run(&config) {
        Ok(SimulationOutcome::Report(report)) => {
            println!("{report}");
            ExitCode::SUCCESS
        }
        Ok(SimulationOutcome::NoTraffic) => {
            println!("no transmissions completed within the horizon");
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("invalid configuration: {err}");
            ExitCode::FAILURE
        }
    }
}

fn sweep(min_users: usize, max_users: usize, step: usize, base: SimulationConfig) -> ExitCode {
    if step == 0 {
        eprintln!("invalid configuration: step must be positive");
        return ExitCode::FAILURE;
    }
    if let Err(err) = base.validate() {
        eprintln!("invalid configuration: {err}");
        return ExitCode::FAILURE;
    }

    let points: Vec<usize> = (min_users..=max_users).step_by(step).collect();
    let progress = ProgressBar::new(points.len() as u64);

    let rows: Vec<(SimulationConfig, SimulationOutcome)> = points
        .par_iter()
        .map(|&num_users| {
            let config = SimulationConfig {
                num_users,
                ..base.clone()
            };
            // Validated above; only the user count varies per point.
            let outcome = simulation::run(&config).unwrap_or(SimulationOutcome::NoTraffic);
            progress.inc(1);
            (config, outcome)
        })
        .collect();
    progress.finish_and_clear();

    println!("users,utilization,throughput,collision_ratio,idle_ratio");
    for (config, outcome) in rows {
        match outcome {
            SimulationOutcome::Report(report) => println!(
                "{},{:.6},{:.6},{:.6},{:.6}",
                config.num_users,
                report.total_utilization,
                report.success_ratio,
                report.collision_ratio,
                report.idle_ratio
            ),
            SimulationOutcome::NoTraffic => {
                println!("{},{:.6},,,", config.num_users, config.offered_load())
            }
        }
    }

    ExitCode::SUCCESS
}
