use std::{
    cell::RefCell,
    cmp::Ordering,
    collections::{BinaryHeap, HashMap},
    future::Future,
    pin::Pin,
    rc::Rc,
    task::{Context, Poll, Waker},
};
use tracing::trace;

/// A future type that runs as a logical process on the event loop.
type ProcessFuture = Pin<Box<dyn Future<Output = ()>>>;

type TaskId = u64;

struct TimerEntry {
    time: f64,
    seq: u64,
    task: TaskId,
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time && self.seq == other.seq
    }
}

impl Eq for TimerEntry {}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed so the max-heap pops the earliest time first; equal times
        // resume in scheduling order.
        other
            .time
            .total_cmp(&self.time)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

struct Inner {
    now: f64,
    next_seq: u64,
    next_task: TaskId,
    current_task: Option<TaskId>,
    timers: BinaryHeap<TimerEntry>,
}

/// An event loop implementation for discrete time simulation.
///
/// Spawned futures run as cooperating logical processes multiplexed onto the
/// caller's thread. A process suspends only at [`SimHandle::sleep`] and
/// [`SimHandle::yield_now`] points; the loop resumes it when the simulation
/// clock reaches its wake time. Awaiting any other future inside a process is
/// unsupported, since a process is only ever polled when one of its timers
/// fires.
pub struct EventLoop {
    handle: SimHandle,
    tasks: HashMap<TaskId, ProcessFuture>,
}

impl Default for EventLoop {
    fn default() -> Self {
        Self {
            handle: SimHandle {
                inner: Rc::new(RefCell::new(Inner {
                    now: 0.0,
                    next_seq: 0,
                    next_task: 0,
                    current_task: None,
                    timers: BinaryHeap::new(),
                })),
            },
            tasks: HashMap::new(),
        }
    }
}

impl EventLoop {
    /// Creates a new event loop at time 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a cheap handle for querying the clock and suspending.
    pub fn handle(&self) -> SimHandle {
        self.handle.clone()
    }

    /// Spawns a logical process. It receives its first poll at the current
    /// simulation time, after everything already scheduled at that instant,
    /// in spawn order.
    pub fn spawn<F>(&mut self, process: F)
    where
        F: Future<Output = ()> + 'static,
    {
        let (task, now) = {
            let mut inner = self.handle.inner.borrow_mut();
            let task = inner.next_task;
            inner.next_task += 1;
            (task, inner.now)
        };

        self.tasks.insert(task, Box::pin(process));
        self.handle.schedule(task, now);
    }

    /// Runs scheduled processes in (time, scheduling order) until the next
    /// wake time reaches `horizon`, then abandons every still-suspended
    /// process without running its remaining logic. The clock ends at
    /// `horizon`.
    pub fn run_until(&mut self, horizon: f64) {
        loop {
            let entry = {
                let mut inner = self.handle.inner.borrow_mut();

                if !inner.timers.peek().is_some_and(|next| next.time < horizon) {
                    break;
                }
                let Some(entry) = inner.timers.pop() else {
                    break;
                };

                inner.now = entry.time;
                inner.current_task = Some(entry.task);
                entry
            };

            if let Some(mut process) = self.tasks.remove(&entry.task) {
                let mut cx = Context::from_waker(Waker::noop());

                if process.as_mut().poll(&mut cx).is_pending() {
                    self.tasks.insert(entry.task, process);
                } else {
                    trace!(task = entry.task, time = entry.time, "process finished");
                }
            }

            self.handle.inner.borrow_mut().current_task = None;
        }

        let mut inner = self.handle.inner.borrow_mut();
        if horizon > inner.now {
            inner.now = horizon;
        }
        inner.current_task = None;
    }

    /// Returns the number of suspended processes still owned by the loop.
    pub fn pending_count(&self) -> usize {
        self.tasks.len()
    }
}

/// Shared access to the event loop's clock and timer queue. Cloning is cheap
/// and every clone refers to the same loop.
#[derive(Clone)]
pub struct SimHandle {
    inner: Rc<RefCell<Inner>>,
}

impl SimHandle {
    /// Current simulation time in seconds.
    pub fn now(&self) -> f64 {
        self.inner.borrow().now
    }

    /// Suspends the calling process for a relative delay (seconds, >= 0).
    /// Processes with equal wake times resume in scheduling order.
    pub fn sleep(&self, delay: f64) -> Sleep {
        debug_assert!(delay >= 0.0, "negative sleep delay: {delay}");

        Sleep {
            handle: self.clone(),
            delay,
            scheduled: false,
        }
    }

    /// Zero-delay suspension that defers to every process already scheduled
    /// at the current instant.
    pub fn yield_now(&self) -> Sleep {
        self.sleep(0.0)
    }

    fn schedule(&self, task: TaskId, time: f64) {
        let mut inner = self.inner.borrow_mut();
        let seq = inner.next_seq;
        inner.next_seq += 1;

        inner.timers.push(TimerEntry { time, seq, task });
    }
}

/// Future returned by [`SimHandle::sleep`] and [`SimHandle::yield_now`].
///
/// The first poll registers a wake time for the calling process and suspends;
/// the next poll (which only happens once that time is reached) completes.
pub struct Sleep {
    handle: SimHandle,
    delay: f64,
    scheduled: bool,
}

impl Future for Sleep {
    type Output = ();

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<()> {
        let this = self.get_mut();

        if this.scheduled {
            return Poll::Ready(());
        }

        let (task, wake_at) = {
            let inner = this.handle.inner.borrow();
            let Some(task) = inner.current_task else {
                panic!("sleep polled outside of a spawned process");
            };
            (task, inner.now + this.delay)
        };

        this.handle.schedule(task, wake_at);
        this.scheduled = true;
        Poll::Pending
    }
}
