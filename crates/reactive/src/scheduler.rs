//! Flush scheduling for batched emission.
//!
//! An observer never notifies followers from inside `emit`. It opens a batch
//! and hands a flush task to its `Scheduler`, which decides when the end of
//! the current turn is. Three backends are provided:
//!
//! - `ManualScheduler`: tasks wait for an explicit `flush_now()`. Used by tests.
//! - `TurnScheduler`: tasks run when the outermost `Turn` guard drops.
//! - `MicrotaskScheduler` (feature `wasm`): tasks run on the host microtask queue.
//!
//! All of them drain through a `FlushQueue`, which runs tasks strictly in
//! FIFO order and never re-enters itself.

use alloc::boxed::Box;
use alloc::collections::VecDeque;
use core::cell::{Cell, RefCell};

/// A deferred flush of one observer's open batch.
pub type FlushTask = Box<dyn FnOnce()>;

/// Deferred-execution primitive used to coalesce emissions.
pub trait Scheduler {
    /// Queues a flush to run at the end of the current turn.
    fn schedule_flush(&self, task: FlushTask);

    /// Runs every queued flush immediately.
    fn flush_now(&self);
}

/// Configuration shared by the scheduler backends.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Maximum number of tasks a single drain may run before giving up.
    ///
    /// Effects that keep writing to each other would otherwise spin forever.
    pub max_passes: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { max_passes: 10_000 }
    }
}

impl SchedulerConfig {
    /// Creates the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the per-drain task limit.
    pub fn with_max_passes(mut self, max_passes: usize) -> Self {
        self.max_passes = max_passes;
        self
    }
}

/// FIFO queue of flush tasks.
pub struct FlushQueue {
    tasks: RefCell<VecDeque<FlushTask>>,
    draining: Cell<bool>,
    config: SchedulerConfig,
}

impl Default for FlushQueue {
    fn default() -> Self {
        Self::new(SchedulerConfig::default())
    }
}

impl FlushQueue {
    /// Creates an empty queue.
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            tasks: RefCell::new(VecDeque::new()),
            draining: Cell::new(false),
            config,
        }
    }

    /// Appends a task.
    pub fn push(&self, task: FlushTask) {
        self.tasks.borrow_mut().push_back(task);
    }

    /// Returns the number of queued tasks.
    #[inline]
    pub fn len(&self) -> usize {
        self.tasks.borrow().len()
    }

    /// Returns true if no task is queued.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.tasks.borrow().is_empty()
    }

    /// Returns true while a drain is in progress.
    #[inline]
    pub fn is_draining(&self) -> bool {
        self.draining.get()
    }

    /// Runs queued tasks until the queue is empty.
    ///
    /// Tasks queued by running tasks are picked up by the same drain. A drain
    /// requested while one is already running returns immediately; the outer
    /// drain will reach the new tasks. Returns the number of tasks run.
    pub fn drain(&self) -> usize {
        if self.draining.replace(true) {
            return 0;
        }
        let _reset = DrainGuard(&self.draining);

        let mut ran = 0;
        loop {
            if ran >= self.config.max_passes {
                tracing::error!(
                    ran,
                    remaining = self.len(),
                    "flush limit reached; remaining updates stay queued"
                );
                break;
            }
            let task = self.tasks.borrow_mut().pop_front();
            match task {
                Some(task) => {
                    task();
                    ran += 1;
                }
                None => break,
            }
        }
        ran
    }
}

struct DrainGuard<'a>(&'a Cell<bool>);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

/// Scheduler whose flushes only run on `flush_now()`.
#[derive(Default)]
pub struct ManualScheduler {
    queue: FlushQueue,
}

impl ManualScheduler {
    /// Creates a manual scheduler with default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a manual scheduler with the given configuration.
    pub fn with_config(config: SchedulerConfig) -> Self {
        Self {
            queue: FlushQueue::new(config),
        }
    }

    /// Returns the number of flushes waiting to run.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }
}

impl Scheduler for ManualScheduler {
    fn schedule_flush(&self, task: FlushTask) {
        self.queue.push(task);
    }

    fn flush_now(&self) {
        self.queue.drain();
    }
}

/// Scheduler that flushes when the outermost turn ends.
///
/// ```
/// use std::rc::Rc;
/// use deepstate_reactive::{Scheduler, TurnScheduler};
///
/// let scheduler = Rc::new(TurnScheduler::new());
/// let ran = Rc::new(std::cell::Cell::new(false));
/// let flag = ran.clone();
///
/// scheduler.run(|| {
///     scheduler.schedule_flush(Box::new(move || flag.set(true)));
///     assert!(!ran.get());
/// });
/// assert!(ran.get());
/// ```
#[derive(Default)]
pub struct TurnScheduler {
    queue: FlushQueue,
    depth: Cell<usize>,
}

impl TurnScheduler {
    /// Creates a turn scheduler with default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a turn scheduler with the given configuration.
    pub fn with_config(config: SchedulerConfig) -> Self {
        Self {
            queue: FlushQueue::new(config),
            depth: Cell::new(0),
        }
    }

    /// Opens a turn. Queued flushes run when the outermost guard drops.
    pub fn turn(&self) -> Turn<'_> {
        self.depth.set(self.depth.get() + 1);
        Turn { scheduler: self }
    }

    /// Runs `f` inside a turn and flushes afterwards.
    pub fn run<R>(&self, f: impl FnOnce() -> R) -> R {
        let _turn = self.turn();
        f()
    }

    /// Returns true while at least one turn is open.
    pub fn in_turn(&self) -> bool {
        self.depth.get() > 0
    }

    /// Returns the number of flushes waiting to run.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }
}

impl Scheduler for TurnScheduler {
    fn schedule_flush(&self, task: FlushTask) {
        self.queue.push(task);
    }

    fn flush_now(&self) {
        self.queue.drain();
    }
}

/// RAII guard for an open turn of a [`TurnScheduler`].
#[must_use = "dropping the turn immediately flushes"]
pub struct Turn<'a> {
    scheduler: &'a TurnScheduler,
}

impl Drop for Turn<'_> {
    fn drop(&mut self) {
        let depth = self.scheduler.depth.get().saturating_sub(1);
        self.scheduler.depth.set(depth);
        if depth == 0 {
            self.scheduler.queue.drain();
        }
    }
}

#[cfg(feature = "wasm")]
pub use self::microtask::MicrotaskScheduler;

#[cfg(feature = "wasm")]
mod microtask {
    use super::{FlushQueue, FlushTask, Scheduler, SchedulerConfig};
    use alloc::rc::Rc;
    use core::cell::Cell;

    /// Scheduler that flushes on the host microtask queue.
    #[derive(Default)]
    pub struct MicrotaskScheduler {
        queue: Rc<FlushQueue>,
        scheduled: Rc<Cell<bool>>,
    }

    impl MicrotaskScheduler {
        /// Creates a microtask scheduler with default configuration.
        pub fn new() -> Self {
            Self::default()
        }

        /// Creates a microtask scheduler with the given configuration.
        pub fn with_config(config: SchedulerConfig) -> Self {
            Self {
                queue: Rc::new(FlushQueue::new(config)),
                scheduled: Rc::new(Cell::new(false)),
            }
        }
    }

    impl Scheduler for MicrotaskScheduler {
        fn schedule_flush(&self, task: FlushTask) {
            self.queue.push(task);
            if self.scheduled.replace(true) {
                return;
            }
            let queue = Rc::clone(&self.queue);
            let scheduled = Rc::clone(&self.scheduled);
            wasm_bindgen_futures::spawn_local(async move {
                scheduled.set(false);
                queue.drain();
            });
        }

        fn flush_now(&self) {
            self.queue.drain();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::rc::Rc;
    use alloc::vec::Vec;

    fn recorder() -> (Rc<RefCell<Vec<u32>>>, impl Fn(u32) -> FlushTask) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let log_clone = log.clone();
        let make = move |n: u32| -> FlushTask {
            let log = log_clone.clone();
            Box::new(move || log.borrow_mut().push(n))
        };
        (log, make)
    }

    #[test]
    fn test_manual_scheduler_waits_for_flush() {
        let scheduler = ManualScheduler::new();
        let (log, task) = recorder();

        scheduler.schedule_flush(task(1));
        scheduler.schedule_flush(task(2));
        assert_eq!(scheduler.pending(), 2);
        assert!(log.borrow().is_empty());

        scheduler.flush_now();
        assert_eq!(*log.borrow(), [1, 2]);
        assert_eq!(scheduler.pending(), 0);
    }

    #[test]
    fn test_drain_picks_up_nested_tasks() {
        let scheduler = Rc::new(ManualScheduler::new());
        let (log, task) = recorder();
        let inner = task(2);

        let sched = scheduler.clone();
        let log_clone = log.clone();
        scheduler.schedule_flush(Box::new(move || {
            log_clone.borrow_mut().push(1);
            sched.schedule_flush(inner);
            // Re-entrant flush is a no-op; the outer drain runs the task.
            sched.flush_now();
            assert_eq!(log_clone.borrow().len(), 1);
        }));

        scheduler.flush_now();
        assert_eq!(*log.borrow(), [1, 2]);
    }

    #[test]
    fn test_drain_limit_leaves_remaining_queued() {
        let queue = FlushQueue::new(SchedulerConfig::new().with_max_passes(2));
        let (log, task) = recorder();
        for n in 0..5 {
            queue.push(task(n));
        }

        assert_eq!(queue.drain(), 2);
        assert_eq!(queue.len(), 3);
        assert!(!queue.is_draining());

        assert_eq!(queue.drain(), 2);
        assert_eq!(*log.borrow(), [0, 1, 2, 3]);
    }

    #[test]
    fn test_turn_flushes_on_outermost_drop() {
        let scheduler = TurnScheduler::new();
        let (log, task) = recorder();

        {
            let _outer = scheduler.turn();
            {
                let _inner = scheduler.turn();
                scheduler.schedule_flush(task(1));
            }
            assert!(log.borrow().is_empty());
            assert!(scheduler.in_turn());
        }

        assert_eq!(*log.borrow(), [1]);
        assert!(!scheduler.in_turn());
    }

    #[test]
    fn test_turn_scheduler_outside_turn_waits() {
        let scheduler = TurnScheduler::new();
        let (log, task) = recorder();

        scheduler.schedule_flush(task(7));
        assert_eq!(scheduler.pending(), 1);

        scheduler.run(|| {});
        assert_eq!(*log.borrow(), [7]);
    }

    #[test]
    fn test_scheduler_config_default() {
        assert_eq!(SchedulerConfig::default().max_passes, 10_000);
        assert_eq!(SchedulerConfig::new().with_max_passes(3).max_passes, 3);
    }
}
