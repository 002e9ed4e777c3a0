//! Simulation driver and result assembly.

use std::fmt;
use std::rc::Rc;

use thiserror::Error;
use tracing::debug;

use crate::{channel::AlohaChannel, event_loop::EventLoop, user::User};

/// Parameters of one simulation run.
#[derive(Clone, Debug)]
pub struct SimulationConfig {
    /// Number of independent traffic sources.
    pub num_users: usize,
    /// Packets per second generated by each user.
    pub arrival_rate_per_user: f64,
    /// Fixed packet duration in seconds.
    pub packet_duration: f64,
    /// Simulation horizon in seconds.
    pub simulation_duration: f64,
    /// Base seed; user `k` draws from a stream seeded with `seed + k`.
    pub seed: u64,
}

/// A fatal configuration problem, rejected before the run starts.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum ConfigError {
    /// Packet duration must be a positive, finite number of seconds.
    #[error("packet duration must be positive, got {0}")]
    PacketDuration(f64),
    /// Arrival rate must be a non-negative, finite rate. Zero is a valid
    /// degenerate load that produces no traffic.
    #[error("arrival rate must not be negative, got {0}")]
    ArrivalRate(f64),
    /// The horizon must be a positive, finite number of seconds.
    #[error("simulation horizon must be positive, got {0}")]
    Horizon(f64),
}

impl SimulationConfig {
    /// Checks the configuration preconditions.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.packet_duration.is_finite() || self.packet_duration <= 0.0 {
            return Err(ConfigError::PacketDuration(self.packet_duration));
        }
        if !self.arrival_rate_per_user.is_finite() || self.arrival_rate_per_user < 0.0 {
            return Err(ConfigError::ArrivalRate(self.arrival_rate_per_user));
        }
        if !self.simulation_duration.is_finite() || self.simulation_duration <= 0.0 {
            return Err(ConfigError::Horizon(self.simulation_duration));
        }

        Ok(())
    }

    /// Offered load: the fraction of channel capacity requested, independent
    /// of collisions.
    pub fn offered_load(&self) -> f64 {
        self.num_users as f64 * self.arrival_rate_per_user * self.packet_duration
    }
}

/// Outcome of a simulation run.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SimulationOutcome {
    /// At least one transmission completed; channel ratios are meaningful.
    Report(SimulationReport),
    /// The horizon elapsed before any transmission completed, so there is no
    /// observed channel time to divide by.
    NoTraffic,
}

/// Channel statistics derived after a run, using the end time of the last
/// completed transmission (not the nominal horizon) as the denominator.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SimulationReport {
    /// Transmissions that ran to completion.
    pub num_transmissions: u64,
    /// Offered load `num_users * arrival_rate_per_user * packet_duration`.
    pub total_utilization: f64,
    /// Completed transmissions with no overlap.
    pub num_successful: u64,
    /// Completed transmissions lost to overlap.
    pub num_collisions: u64,
    /// Fraction of channel time spent in successful transmissions.
    pub success_ratio: f64,
    /// Fraction of channel time with no active transmission.
    pub idle_ratio: f64,
    /// Remaining fraction, `1 - success_ratio - idle_ratio`.
    pub collision_ratio: f64,
    /// End time of the last completed transmission.
    pub end_time: f64,
}

impl fmt::Display for SimulationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "-----------------------------------------------------")?;
        writeln!(f, "Packet transmission statistics:")?;
        writeln!(f, "  Total packets:                     {}", self.num_transmissions)?;
        writeln!(f, "  Offered utilization:               {:.1}%", self.total_utilization * 100.0)?;
        writeln!(f, "  Successful transmissions:          {}", self.num_successful)?;
        writeln!(f, "  Collisions:                        {}", self.num_collisions)?;
        writeln!(f, "-----------------------------------------------------")?;
        writeln!(f, "Channel statistics:")?;
        writeln!(f, "  Total time:                        {:.0} seconds", self.end_time)?;
        writeln!(f, "  Time in successful transmissions:  {:.1}%", self.success_ratio * 100.0)?;
        writeln!(f, "  Time in collisions:                {:.1}%", self.collision_ratio * 100.0)?;
        write!(f, "  Time idle:                         {:.1}%", self.idle_ratio * 100.0)
    }
}

/// Runs one simulation: `num_users` traffic sources contending on a single
/// ALOHA channel until the horizon, abandoning any transmissions still in
/// flight at that point.
pub fn run(config: &SimulationConfig) -> Result<SimulationOutcome, ConfigError> {
    config.validate()?;

    let mut event_loop = EventLoop::new();
    let handle = event_loop.handle();
    let channel = Rc::new(AlohaChannel::new(handle.clone()));

    for k in 0..config.num_users {
        let user = User::new(
            config.arrival_rate_per_user,
            config.packet_duration,
            config.seed.wrapping_add(k as u64),
        );
        event_loop.spawn(user.run(handle.clone(), channel.clone()));
    }

    event_loop.run_until(config.simulation_duration);

    let stats = channel.stats();
    if stats.num_transmissions == 0 {
        debug!(num_users = config.num_users, "no transmissions completed");
        return Ok(SimulationOutcome::NoTraffic);
    }

    let end_time = stats.last_end_time;
    let success_ratio = stats.time_successful / end_time;
    let idle_ratio = stats.time_idle / end_time;

    let report = SimulationReport {
        num_transmissions: stats.num_transmissions,
        total_utilization: config.offered_load(),
        num_successful: stats.num_successful,
        num_collisions: stats.num_collisions,
        success_ratio,
        idle_ratio,
        collision_ratio: 1.0 - success_ratio - idle_ratio,
        end_time,
    };
    debug!(?report, "simulation finished");

    Ok(SimulationOutcome::Report(report))
}
