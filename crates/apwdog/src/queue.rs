//! Dedicated task queue for the pet tick and the disable handoff.
//!
//! One named worker thread runs both the recurring tick and submitted
//! jobs, so a job never overlaps a tick. A job that cancels the tick
//! therefore also waits for any tick in flight.

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::error::{WatchdogError, WatchdogResult};
use crate::liveness::CoreId;

/// Capacity of the job channel.
const JOB_CAPACITY: usize = 16;

/// Result of one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Run again one period later.
    Rescheduled,
    /// Do not run again.
    Stopped,
}

/// View of the queue handed to jobs.
#[derive(Debug)]
pub struct QueueContext {
    next_tick: Option<Instant>,
    period: Duration,
}

impl QueueContext {
    /// Drop the pending tick, if any.
    pub fn cancel_tick(&mut self) {
        self.next_tick = None;
    }

    /// Run the tick after `delay`, replacing any pending one.
    pub fn schedule_tick(&mut self, delay: Duration) {
        self.next_tick = Some(Instant::now() + delay);
    }

    /// Whether a tick is pending.
    #[must_use]
    pub fn has_pending_tick(&self) -> bool {
        self.next_tick.is_some()
    }

    /// Tick period.
    #[must_use]
    pub fn period(&self) -> Duration {
        self.period
    }
}

type Job = Box<dyn FnOnce(&mut QueueContext) + Send>;

enum Command {
    Run(Job),
    Stop,
}

#[derive(Debug, Default)]
struct QueueShared {
    tick_pending: AtomicBool,
    ticks: AtomicU64,
}

/// Single-threaded task queue with one recurring tick.
pub struct TaskQueue {
    sender: Sender<Command>,
    worker: Option<JoinHandle<()>>,
    shared: Arc<QueueShared>,
    core: CoreId,
}

impl TaskQueue {
    /// Start the worker with the first tick `period` from now.
    ///
    /// The worker is meant to be bound to `core`; on hosts without
    /// affinity control the id only names the thread.
    ///
    /// # Errors
    ///
    /// Returns [`WatchdogError::TaskQueue`] if the worker thread cannot be spawned.
    pub fn start<F>(name: &str, core: CoreId, period: Duration, tick: F) -> WatchdogResult<Self>
    where
        F: FnMut() -> TickOutcome + Send + 'static,
    {
        let (sender, receiver) = channel::bounded(JOB_CAPACITY);
        let shared = Arc::new(QueueShared::default());
        shared.tick_pending.store(true, Ordering::Release);
        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name(format!("{name}/{}", core.get()))
            .spawn(move || run_worker(&receiver, &worker_shared, period, tick))
            .map_err(|e| WatchdogError::task_queue(format!("cannot spawn worker: {e}")))?;

        debug!(core = core.get(), period_ms = period.as_millis(), "Task queue started");
        Ok(Self {
            sender,
            worker: Some(worker),
            shared,
            core,
        })
    }

    /// Run `job` on the worker and wait for its result.
    ///
    /// Must not be called from the worker itself.
    ///
    /// # Errors
    ///
    /// Returns [`WatchdogError::TaskQueue`] if the worker has stopped.
    pub fn run_sync<T, F>(&self, job: F) -> WatchdogResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut QueueContext) -> T + Send + 'static,
    {
        let (reply_tx, reply_rx) = channel::bounded(1);
        let job: Job = Box::new(move |ctx| {
            if reply_tx.send(job(ctx)).is_err() {
                debug!("Job caller went away");
            }
        });
        self.sender
            .send(Command::Run(job))
            .map_err(|e| WatchdogError::task_queue(format!("worker stopped: {e}")))?;
        reply_rx
            .recv()
            .map_err(|e| WatchdogError::task_queue(format!("job dropped: {e}")))
    }

    /// Whether a tick is pending.
    #[must_use]
    pub fn has_pending_tick(&self) -> bool {
        self.shared.tick_pending.load(Ordering::Acquire)
    }

    /// Number of ticks run so far.
    #[must_use]
    pub fn tick_count(&self) -> u64 {
        self.shared.ticks.load(Ordering::Acquire)
    }

    /// Core the queue is bound to.
    #[must_use]
    pub fn core(&self) -> CoreId {
        self.core
    }

    /// Stop the worker and wait for it to exit.
    pub fn stop(&mut self) {
        if let Some(worker) = self.worker.take() {
            if self.sender.send(Command::Stop).is_err() {
                debug!("Task queue worker already gone");
            }
            if worker.join().is_err() {
                warn!("Task queue worker panicked");
            }
            self.shared.tick_pending.store(false, Ordering::Release);
        }
    }
}

impl Drop for TaskQueue {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskQueue")
            .field("core", &self.core)
            .field("running", &self.worker.is_some())
            .field("tick_pending", &self.has_pending_tick())
            .field("ticks", &self.tick_count())
            .finish()
    }
}

fn run_worker<F>(receiver: &Receiver<Command>, shared: &QueueShared, period: Duration, mut tick: F)
where
    F: FnMut() -> TickOutcome,
{
    let mut ctx = QueueContext {
        next_tick: Some(Instant::now() + period),
        period,
    };
    loop {
        let command = match ctx.next_tick {
            Some(deadline) => receiver.recv_deadline(deadline),
            None => receiver
                .recv()
                .or(Err(RecvTimeoutError::Disconnected)),
        };
        match command {
            Ok(Command::Run(job)) => job(&mut ctx),
            Ok(Command::Stop) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {
                ctx.next_tick = None;
                shared.ticks.fetch_add(1, Ordering::AcqRel);
                if tick() == TickOutcome::Rescheduled {
                    ctx.schedule_tick(period);
                }
            }
        }
        shared
            .tick_pending
            .store(ctx.has_pending_tick(), Ordering::Release);
    }
}
