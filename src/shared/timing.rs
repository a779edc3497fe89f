// ============================================================================
// weft - Timer Scheduling
// Cancellable deferred callbacks for the time-based combinators
// ============================================================================
//
// The graph never blocks; debounce and throttle suspend only through a
// scheduler supplied by the host. `VirtualScheduler` is a deterministic
// implementation driven by explicit `advance()` calls - tests use it, and
// hosts without a real timer source can embed it behind their own tick.
// ============================================================================

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

// =============================================================================
// SCHEDULER CONTRACT
// =============================================================================

/// A source of cancellable one-shot timers.
pub trait TimerScheduler {
    /// Run `callback` once after `delay`. The returned handle cancels the
    /// timer; cancellation is idempotent and a no-op once the timer fired.
    fn schedule(&self, delay: Duration, callback: Box<dyn FnOnce()>) -> TimerHandle;
}

/// Cancellation handle for a scheduled timer.
///
/// Dropping the handle does *not* cancel the timer; combinators cancel
/// explicitly on teardown.
#[derive(Clone)]
pub struct TimerHandle {
    cancelled: Rc<Cell<bool>>,
}

impl TimerHandle {
    pub fn new(cancelled: Rc<Cell<bool>>) -> Self {
        Self { cancelled }
    }

    /// Cancel the timer. Safe to call any number of times, before or after
    /// the timer fired.
    pub fn cancel(&self) {
        self.cancelled.set(true);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.get()
    }
}

// =============================================================================
// VIRTUAL SCHEDULER
// =============================================================================

struct QueuedTimer {
    deadline: Duration,
    seq: u64,
    cancelled: Rc<Cell<bool>>,
    callback: Box<dyn FnOnce()>,
}

struct VirtualSchedulerInner {
    now: Cell<Duration>,
    next_seq: Cell<u64>,
    queue: RefCell<Vec<QueuedTimer>>,
}

/// A scheduler with a manually driven clock.
///
/// Timers fire during `advance()`, in deadline order (FIFO among equal
/// deadlines), on the calling thread. Callbacks may schedule further timers;
/// those fire in the same `advance()` call if they fall inside the advanced
/// window.
///
/// # Example
///
/// ```
/// use weft::VirtualScheduler;
/// use weft::TimerScheduler;
/// use std::cell::Cell;
/// use std::rc::Rc;
/// use std::time::Duration;
///
/// let scheduler = VirtualScheduler::new();
/// let fired = Rc::new(Cell::new(false));
/// let fired_clone = fired.clone();
///
/// scheduler.schedule(Duration::from_millis(10), Box::new(move || fired_clone.set(true)));
///
/// scheduler.advance(Duration::from_millis(5));
/// assert!(!fired.get());
///
/// scheduler.advance(Duration::from_millis(5));
/// assert!(fired.get());
/// ```
#[derive(Clone)]
pub struct VirtualScheduler {
    inner: Rc<VirtualSchedulerInner>,
}

impl VirtualScheduler {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(VirtualSchedulerInner {
                now: Cell::new(Duration::ZERO),
                next_seq: Cell::new(0),
                queue: RefCell::new(Vec::new()),
            }),
        }
    }

    /// Time elapsed since the scheduler was created.
    pub fn now(&self) -> Duration {
        self.inner.now.get()
    }

    /// Number of timers that are queued and not cancelled.
    pub fn pending(&self) -> usize {
        self.inner
            .queue
            .borrow()
            .iter()
            .filter(|t| !t.cancelled.get())
            .count()
    }

    /// Move the clock forward by `delta`, firing every due timer.
    pub fn advance(&self, delta: Duration) {
        let target = self.inner.now.get() + delta;

        loop {
            // Pick the earliest due timer; re-scan every iteration because
            // callbacks may enqueue new timers.
            let next = {
                let queue = self.inner.queue.borrow();
                queue
                    .iter()
                    .enumerate()
                    .filter(|(_, t)| t.deadline <= target)
                    .min_by_key(|(_, t)| (t.deadline, t.seq))
                    .map(|(idx, _)| idx)
            };

            let Some(idx) = next else { break };
            let timer = self.inner.queue.borrow_mut().swap_remove(idx);
            if timer.deadline > self.inner.now.get() {
                self.inner.now.set(timer.deadline);
            }
            if !timer.cancelled.get() {
                (timer.callback)();
            }
        }

        self.inner.now.set(target);
    }
}

impl Default for VirtualScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl TimerScheduler for VirtualScheduler {
    fn schedule(&self, delay: Duration, callback: Box<dyn FnOnce()>) -> TimerHandle {
        let cancelled = Rc::new(Cell::new(false));
        let seq = self.inner.next_seq.get();
        self.inner.next_seq.set(seq + 1);
        self.inner.queue.borrow_mut().push(QueuedTimer {
            deadline: self.inner.now.get() + delay,
            seq,
            cancelled: cancelled.clone(),
            callback,
        });
        TimerHandle::new(cancelled)
    }
}

// =============================================================================
// TESTS
// =============================================================================
