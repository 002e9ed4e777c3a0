use std::rc::Rc;

use rand::{SeedableRng, rngs::StdRng};
use rand_distr::{Distribution, Exp};
use tracing::trace;

use crate::{channel::AlohaChannel, event_loop::SimHandle};

/// A user that generates packets and sends them over the shared channel.
///
/// Packet generation is memoryless: inter-arrival times are exponentially
/// distributed with rate `packets_per_second`, so each user is a Poisson
/// source. A user waits for its transmission to finish before drawing the
/// next inter-arrival time and therefore never has more than one packet in
/// flight.
pub struct User {
    packets_per_second: f64,
    packet_duration: f64,
    rng: StdRng,
}

impl User {
    /// Creates a user with its own seeded random stream.
    ///
    /// The arrival rate must be non-negative and the packet duration
    /// positive; both are checked by the simulation configuration before any
    /// user is constructed.
    pub fn new(packets_per_second: f64, packet_duration: f64, seed: u64) -> Self {
        Self {
            packets_per_second,
            packet_duration,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Generates packets forever: wait an exponential inter-arrival delay,
    /// transmit, wait for the transmission to complete, repeat. Terminated
    /// only by the simulation horizon.
    pub async fn run(mut self, sim: SimHandle, channel: Rc<AlohaChannel>) {
        if self.packets_per_second == 0.0 {
            // Degenerate zero load: this user never transmits.
            return;
        }

        let inter_arrival =
            Exp::new(self.packets_per_second).expect("arrival rate is checked positive");

        loop {
            let delay = inter_arrival.sample(&mut self.rng);
            sim.sleep(delay).await;

            trace!(now = sim.now(), delay, "packet generated");
            channel.transmit(self.packet_duration).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_loop::EventLoop;

    #[test_log::test]
    fn test_zero_rate_user_never_transmits() {
        let mut event_loop = EventLoop::new();
        let channel = Rc::new(AlohaChannel::new(event_loop.handle()));

        let user = User::new(0.0, 1.0, 7);
        event_loop.spawn(user.run(event_loop.handle(), channel.clone()));

        event_loop.run_until(10_000.0);

        assert_eq!(channel.stats().num_transmissions, 0);
    }

    #[test_log::test]
    fn test_single_user_never_collides_with_itself() {
        let mut event_loop = EventLoop::new();
        let channel = Rc::new(AlohaChannel::new(event_loop.handle()));

        // High load for one user; completions gate the next arrival, so no
        // self-overlap is possible.
        let user = User::new(0.5, 1.0, 42);
        event_loop.spawn(user.run(event_loop.handle(), channel.clone()));

        event_loop.run_until(5_000.0);
        let stats = channel.stats();

        assert!(stats.num_transmissions > 0);
        assert_eq!(stats.num_collisions, 0);
        assert_eq!(stats.num_successful, stats.num_transmissions);
    }
}
