use std::{cell::RefCell, collections::HashMap};

use tracing::{instrument, trace};

use crate::event_loop::SimHandle;

/// One packet occupying the channel. Owned by the channel while in flight;
/// `collided` is the only field that changes after registration and it never
/// resets to false.
#[derive(Clone, Copy, Debug)]
struct Transmission {
    start_time: f64,
    end_time: f64,
    collided: bool,
}

/// Cumulative channel statistics for one simulation run.
///
/// All counters are non-decreasing over the run, and at every completion
/// point `num_successful + num_collisions == num_transmissions`.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ChannelStats {
    /// Transmissions that ran to completion, successful or not.
    pub num_transmissions: u64,
    /// Completed transmissions that never overlapped another.
    pub num_successful: u64,
    /// Completed transmissions that overlapped at least one other.
    pub num_collisions: u64,
    /// Channel time spent in successful transmissions.
    pub time_successful: f64,
    /// Channel time with no active transmission.
    pub time_idle: f64,
    /// End time of the most recently completed transmission.
    pub last_end_time: f64,
}

struct ChannelState {
    active: HashMap<u64, Transmission>,
    next_id: u64,
    stats: ChannelStats,
}

/// The shared ALOHA transmission medium.
///
/// Users send packets with [`AlohaChannel::transmit`]. Whenever two or more
/// transmissions are in flight at once, all of them are lost; the channel
/// records successes, collisions, and idle gaps in its [`ChannelStats`].
pub struct AlohaChannel {
    sim: SimHandle,
    state: RefCell<ChannelState>,
}

impl AlohaChannel {
    /// Creates an idle channel on the given event loop.
    pub fn new(sim: SimHandle) -> Self {
        Self {
            sim,
            state: RefCell::new(ChannelState {
                active: HashMap::new(),
                next_id: 0,
                stats: ChannelStats::default(),
            }),
        }
    }

    /// Returns a copy of the cumulative statistics.
    pub fn stats(&self) -> ChannelStats {
        self.state.borrow().stats
    }

    /// Attempts to send a packet of `duration` seconds starting now, holding
    /// the channel for the full duration regardless of collisions.
    ///
    /// A transmission ending at the current instant vacates the channel
    /// before this one registers, so an arrival exactly at another's end
    /// boundary does not collide with it. Outcomes are only reflected in the
    /// aggregate statistics, not returned to the caller.
    #[instrument(skip(self))]
    pub async fn transmit(&self, duration: f64) {
        debug_assert!(duration > 0.0, "non-positive packet duration: {duration}");

        // Let transmissions ending at this instant finish processing first.
        self.sim.yield_now().await;

        let id = self.begin(duration);
        self.sim.sleep(duration).await;
        self.finish(id, duration);
    }

    fn begin(&self, duration: f64) -> u64 {
        let now = self.sim.now();
        let mut state = self.state.borrow_mut();

        let id = state.next_id;
        state.next_id += 1;
        state.active.insert(
            id,
            Transmission {
                start_time: now,
                end_time: now + duration,
                collided: false,
            },
        );

        if state.active.len() == 1 {
            // The channel was idle since the previous transmission ended.
            let gap = now - state.stats.last_end_time;
            state.stats.time_idle += gap;
            trace!(now, gap, "transmission started on idle channel");
        } else {
            // Every overlapping transmission is lost, including ones that
            // were succeeding until now.
            for transmission in state.active.values_mut() {
                transmission.collided = true;
            }
            trace!(now, active = state.active.len(), "collision");
        }

        id
    }

    fn finish(&self, id: u64, duration: f64) {
        let now = self.sim.now();
        let mut state = self.state.borrow_mut();

        let transmission = state
            .active
            .remove(&id)
            .expect("finishing transmission is active");

        state.stats.num_transmissions += 1;
        if transmission.collided {
            state.stats.num_collisions += 1;
        } else {
            state.stats.num_successful += 1;
            state.stats.time_successful += duration;
        }
        state.stats.last_end_time = now;

        trace!(
            now,
            start = transmission.start_time,
            end = transmission.end_time,
            collided = transmission.collided,
            "transmission complete"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_loop::EventLoop;
    use std::rc::Rc;

    /// Runs scripted `(start, duration)` transmissions to completion and
    /// returns the channel statistics.
    fn run_script(script: &[(f64, f64)]) -> ChannelStats {
        let mut event_loop = EventLoop::new();
        let channel = Rc::new(AlohaChannel::new(event_loop.handle()));

        for &(start, duration) in script {
            let handle = event_loop.handle();
            let channel = channel.clone();
            event_loop.spawn(async move {
                handle.sleep(start).await;
                channel.transmit(duration).await;
            });
        }

        event_loop.run_until(1e9);
        channel.stats()
    }

    #[test_log::test]
    fn test_back_to_back_transmissions_do_not_collide() {
        // The second starts exactly when the first ends.
        let stats = run_script(&[(0.0, 1.0), (1.0, 1.0)]);

        assert_eq!(stats.num_transmissions, 2);
        assert_eq!(stats.num_successful, 2);
        assert_eq!(stats.num_collisions, 0);
        assert_eq!(stats.time_successful, 2.0);
        assert_eq!(stats.time_idle, 0.0);
        assert_eq!(stats.last_end_time, 2.0);
    }

    #[test_log::test]
    fn test_simultaneous_starts_both_collide() {
        let stats = run_script(&[(0.0, 1.0), (0.0, 1.0)]);

        assert_eq!(stats.num_transmissions, 2);
        assert_eq!(stats.num_successful, 0);
        assert_eq!(stats.num_collisions, 2);
        assert_eq!(stats.time_successful, 0.0);
    }

    #[test_log::test]
    fn test_late_arrival_retroactively_collides_in_flight_transmission() {
        // The first transmission is alone (and succeeding) for 5 seconds
        // before the second overlaps it.
        let stats = run_script(&[(0.0, 10.0), (5.0, 1.0)]);

        assert_eq!(stats.num_successful, 0);
        assert_eq!(stats.num_collisions, 2);
    }

    #[test_log::test]
    fn test_partial_overlap_keeps_both_marked() {
        // The interferer ends before the first does; the mark must persist.
        let stats = run_script(&[(0.0, 2.0), (1.0, 2.0)]);

        assert_eq!(stats.num_successful, 0);
        assert_eq!(stats.num_collisions, 2);
        assert_eq!(stats.last_end_time, 3.0);
    }

    #[test_log::test]
    fn test_idle_successful_and_collided_time_partition_the_run() {
        // 0.5-1.5 success, 3.0-4.0 and 3.2-4.2 collide, 7.0-9.0 success.
        let stats = run_script(&[(0.5, 1.0), (3.0, 1.0), (3.2, 1.0), (7.0, 2.0)]);

        assert_eq!(stats.num_transmissions, 4);
        assert_eq!(stats.num_successful, 2);
        assert_eq!(stats.num_collisions, 2);
        assert!((stats.time_successful - 3.0).abs() < 1e-9);
        // Idle gaps: [0, 0.5), [1.5, 3.0), [4.2, 7.0).
        assert!((stats.time_idle - 4.8).abs() < 1e-9);
        assert_eq!(stats.last_end_time, 9.0);

        // Conservation: collided time is whatever the other two leave over.
        let collided = stats.last_end_time - stats.time_idle - stats.time_successful;
        assert!((collided - 1.2).abs() < 1e-9);
    }

    #[test_log::test]
    fn test_completion_counts_add_up() {
        let stats = run_script(&[(0.0, 1.0), (0.5, 1.0), (4.0, 1.0), (10.0, 2.0), (10.1, 0.5)]);

        assert_eq!(
            stats.num_successful + stats.num_collisions,
            stats.num_transmissions
        );
        assert_eq!(stats.num_transmissions, 5);
    }

    #[test_log::test]
    fn test_three_way_collision_marks_every_member() {
        let stats = run_script(&[(0.0, 3.0), (1.0, 3.0), (2.0, 3.0)]);

        assert_eq!(stats.num_collisions, 3);
        assert_eq!(stats.num_successful, 0);
    }

    #[test_log::test]
    fn test_unfinished_transmission_at_horizon_is_not_counted() {
        let mut event_loop = EventLoop::new();
        let channel = Rc::new(AlohaChannel::new(event_loop.handle()));

        let handle = event_loop.handle();
        let sender = channel.clone();
        event_loop.spawn(async move {
            handle.sleep(1.0).await;
            sender.transmit(10.0).await;
        });

        event_loop.run_until(5.0);
        let stats = channel.stats();

        assert_eq!(stats.num_transmissions, 0);
        assert_eq!(stats.last_end_time, 0.0);
    }
}
