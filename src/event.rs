//! Events and the per-loop event queue.
//!
//! An [`Event`] is a unit of work waiting to run on its event loop. The
//! queue is ordered, with an *insert point* marking where newly armed
//! preempting events splice in: just after the event that is currently
//! firing, so that work spawned while handling an event stays grouped with
//! it instead of losing its turn to unrelated queued work.
//!
//! # Invariants
//!
//! - An event is armed iff it is linked into its queue.
//! - Only the owning loop's thread pops and fires events.
//! - `arm` and `disarm` are safe from any thread.
//! - `disarm` round-trips the event's fire lock, so it cannot return while
//!   a `fire` is still in progress on the loop thread.

use crate::park::Park;
use core::fmt;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Where an event lands in the queue when armed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    /// Insert at the front of the queue (before the insert point), so the
    /// event runs right after the currently firing one. Preempting arms
    /// made in sequence stay in arming order. Use only when arming from
    /// the loop's own thread.
    Preempt,
    /// Append at the tail, after everything already queued. Cross-thread
    /// arms always yield so that producers observe FIFO delivery.
    Yield,
}

/// Shared handle to an event, used wherever a node stores "what to do when
/// I become ready".
pub type EventRef = Arc<EventCore>;

/// The action run when an event fires. Receives the event's own handle so
/// state machines can re-register themselves on their dependency.
pub type FireFn = Box<dyn Fn(&EventRef) + Send + Sync>;

fn lock_recover<'a, T>(mutex: &'a Mutex<T>) -> MutexGuard<'a, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Shared state of one event.
pub struct EventCore {
    queue: Arc<EventQueue>,
    /// Set while linked into the queue. Written only under the queue lock.
    armed: AtomicBool,
    /// Set once the owning [`Event`] handle is dropped; a retired event
    /// ignores further arms, so a racing ready-signal cannot revive it.
    retired: AtomicBool,
    /// Held for the duration of `fire`; `disarm` round-trips it.
    fire_lock: Mutex<()>,
    action: FireFn,
}

impl EventCore {
    /// Enqueues this event on its loop. Does nothing if already armed or
    /// retired.
    pub fn arm(self: &Arc<Self>, schedule: Schedule) {
        let queue = Arc::clone(&self.queue);
        queue.arm(self, schedule);
    }

    /// The queue this event fires on.
    #[must_use]
    pub fn queue(&self) -> &Arc<EventQueue> {
        &self.queue
    }

    /// Unlinks the event and permanently retires it, then waits out any
    /// `fire` already in progress on the loop thread.
    pub fn disarm(self: &Arc<Self>) {
        let queue = Arc::clone(&self.queue);
        queue.retire(self);
        drop(lock_recover(&self.fire_lock));
    }
}

impl fmt::Debug for EventCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventCore")
            .field("armed", &self.armed.load(Ordering::Relaxed))
            .field("retired", &self.retired.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl Drop for EventCore {
    fn drop(&mut self) {
        debug_assert!(
            !self.armed.load(Ordering::Relaxed) || std::thread::panicking(),
            "event state dropped while still armed"
        );
    }
}

/// Owning handle to an event. Dropping it disarms the event, blocking
/// until any in-progress fire on the loop thread has completed, so the
/// action's captured state is never touched after the owner is gone.
#[derive(Debug)]
pub struct Event {
    core: EventRef,
}

impl Event {
    /// Creates an event owned by `queue` with the given fire action.
    #[must_use]
    pub fn new(queue: Arc<EventQueue>, action: FireFn) -> Self {
        Self {
            core: Arc::new(EventCore {
                queue,
                armed: AtomicBool::new(false),
                retired: AtomicBool::new(false),
                fire_lock: Mutex::new(()),
                action,
            }),
        }
    }

    /// The shareable handle for ready-slot registration.
    #[must_use]
    pub fn core(&self) -> &EventRef {
        &self.core
    }

    /// Arms the event. See [`EventCore::arm`].
    pub fn arm(&self, schedule: Schedule) {
        self.core.arm(schedule);
    }
}

impl Drop for Event {
    fn drop(&mut self) {
        self.core.disarm();
    }
}

struct QueueInner {
    events: VecDeque<EventRef>,
    /// Index of the insert point. Preempting arms insert here; the value
    /// `events.len()` is the tail sentinel. Must never exceed the length.
    insert_idx: usize,
}

/// An event loop's queue: ordered pending events plus the parker used when
/// the queue drains.
pub struct EventQueue {
    inner: Mutex<QueueInner>,
    park: Box<dyn Park>,
}

impl EventQueue {
    /// Creates an empty queue using the given parker.
    #[must_use]
    pub fn new(park: Box<dyn Park>) -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                events: VecDeque::new(),
                insert_idx: 0,
            }),
            park,
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueInner> {
        lock_recover(&self.inner)
    }

    /// Number of events currently armed on this queue.
    #[must_use]
    pub fn pending_events(&self) -> usize {
        self.lock().events.len()
    }

    fn arm(&self, event: &EventRef, schedule: Schedule) {
        let mut q = self.lock();
        if event.retired.load(Ordering::Acquire) || event.armed.load(Ordering::Relaxed) {
            return;
        }
        event.armed.store(true, Ordering::Relaxed);

        let was_empty = q.events.is_empty();
        match schedule {
            Schedule::Preempt => {
                let idx = q.insert_idx;
                q.events.insert(idx, Arc::clone(event));
                // Keep the insert point on the same element so successive
                // preempting arms land in arming order.
                q.insert_idx += 1;
            }
            Schedule::Yield => {
                // When the insert point is at the tail sentinel, it now
                // denotes this event: later preempting arms run first.
                q.events.push_back(Arc::clone(event));
            }
        }

        if was_empty {
            self.park.wake();
        }
    }

    fn retire(&self, event: &EventRef) {
        let mut q = self.lock();
        event.retired.store(true, Ordering::Release);
        if event.armed.swap(false, Ordering::Relaxed) {
            if let Some(pos) = q.events.iter().position(|e| Arc::ptr_eq(e, event)) {
                q.events.remove(pos);
                if q.insert_idx > pos {
                    q.insert_idx -= 1;
                }
            }
        }
    }

    /// Pops and fires the next event. Returns false if the queue was
    /// empty, in which case the parker has been prepared and the caller
    /// should [`EventQueue::sleep`].
    pub(crate) fn run_one(&self) -> bool {
        let mut q = self.lock();
        let Some(event) = q.events.pop_front() else {
            tracing::trace!("event queue drained; preparing to park");
            self.park.prepare_to_sleep();
            return false;
        };
        event.armed.store(false, Ordering::Relaxed);
        // Events armed during this fire splice in at the front, in order.
        q.insert_idx = 0;

        // Take the fire lock before releasing the queue so a concurrent
        // disarm cannot slip between pop and fire.
        let fire_guard = lock_recover(&event.fire_lock);
        drop(q);
        (event.action)(&event);
        drop(fire_guard);
        true
    }

    /// Blocks until an arm wakes the queue. Must follow a `run_one` that
    /// returned false.
    pub(crate) fn sleep(&self) {
        self.park.sleep();
    }
}

impl fmt::Debug for EventQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let q = self.lock();
        f.debug_struct("EventQueue")
            .field("pending", &q.events.len())
            .field("insert_idx", &q.insert_idx)
            .finish_non_exhaustive()
    }
}
