//! The event loop: a cooperative, single-threaded queue driver with a
//! blocking `wait`.
//!
//! Each loop runs on exactly one thread; multiple loops may coexist in a
//! process, each pinned to its own thread. While `wait` runs, the loop is
//! installed as the thread's current loop so combinators constructed from
//! inside event handlers bind to it. Events fire in queue order and run
//! to completion; the only suspension point is the park when the queue
//! drains.

use crate::chain::ChainNode;
use crate::cross_thread::{make_safe_for_loop, CrossThreadNode};
use crate::error::{ErrorOr, Result};
use crate::event::{Event, EventQueue, Schedule};
use crate::fork::{ForkHub, ForkedPromise};
use crate::node::{ImmediateNode, LoopRef, NodeBox};
use crate::park::{FutexPark, Park};
use crate::promise::Promise;
use crate::transform::{propagate, TransformNode};
use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

thread_local! {
    static CURRENT_LOOP: RefCell<Option<LoopRef>> = const { RefCell::new(None) };
}

/// The loop currently driving this thread, if any. Set for the duration
/// of [`EventLoop::wait`].
pub(crate) fn current_loop() -> Option<LoopRef> {
    CURRENT_LOOP.with(|slot| slot.borrow().clone())
}

/// Restores the previous current loop on drop, so nesting and unwinding
/// both leave the slot consistent.
struct CurrentLoopGuard {
    previous: Option<LoopRef>,
}

impl CurrentLoopGuard {
    fn enter(queue: LoopRef) -> Self {
        let previous = CURRENT_LOOP.with(|slot| slot.borrow_mut().replace(queue));
        Self { previous }
    }
}

impl Drop for CurrentLoopGuard {
    fn drop(&mut self) {
        let previous = self.previous.take();
        CURRENT_LOOP.with(|slot| *slot.borrow_mut() = previous);
    }
}

/// A queue of events executed in a loop on a single thread.
///
/// The default construction parks on [`FutexPark`]; [`EventLoop::with_park`]
/// accepts any [`Park`] implementation.
#[derive(Debug)]
pub struct EventLoop {
    queue: LoopRef,
}

impl EventLoop {
    /// Creates a loop with the default parker.
    #[must_use]
    pub fn new() -> Self {
        Self::with_park(Box::new(FutexPark::new()))
    }

    /// Creates a loop with a custom parker.
    #[must_use]
    pub fn with_park(park: Box<dyn Park>) -> Self {
        Self {
            queue: Arc::new(EventQueue::new(park)),
        }
    }

    /// The shared queue handle nodes and events bind to.
    #[must_use]
    pub fn queue(&self) -> LoopRef {
        Arc::clone(&self.queue)
    }

    /// Returns true if this loop is the thread's current loop.
    #[must_use]
    pub fn is_current(&self) -> bool {
        current_loop().is_some_and(|queue| Arc::ptr_eq(&queue, &self.queue))
    }

    /// Runs the loop until `promise` is ready, then returns its result.
    ///
    /// Must be called from the loop's owning thread. While waiting, the
    /// loop fires whatever events are queued, including events unrelated
    /// to `promise`.
    pub fn wait<T: Send + 'static>(&self, promise: Promise<T>) -> Result<T> {
        let node = make_safe_for_loop(promise.into_node(), &self.queue);
        let mut result = ErrorOr::new();
        self.wait_impl(node, &mut result);
        result.into_result()
    }

    fn wait_impl<T: Send + 'static>(&self, mut node: NodeBox<T>, result: &mut ErrorOr<T>) {
        let _guard = CurrentLoopGuard::enter(Arc::clone(&self.queue));

        let fired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fired);
        let done = Event::new(
            Arc::clone(&self.queue),
            Box::new(move |_| flag.store(true, Ordering::SeqCst)),
        );

        if node.on_ready(done.core()) {
            fired.store(true, Ordering::SeqCst);
        }

        while !fired.load(Ordering::SeqCst) {
            if !self.queue.run_one() {
                self.queue.sleep();
            }
        }

        node.get(result);
    }

    /// Schedules `func` to run on this loop in the near future and
    /// returns a promise for its result. Successive calls run in order,
    /// and evaluation does not wait for a consumer.
    pub fn eval_later<U, F>(&self, func: F) -> Promise<U>
    where
        U: Send + 'static,
        F: FnOnce() -> U + Send + 'static,
    {
        let transform = TransformNode::new(
            Some(self.queue()),
            Box::new(ImmediateNode::from_value(())) as NodeBox<()>,
            move |()| Ok(func()),
            propagate,
        );
        Promise::from_node(Box::new(CrossThreadNode::new(
            self.queue(),
            Box::new(transform),
        )))
    }

    /// Like [`EventLoop::eval_later`], for a `func` that returns a
    /// promise; the result is flattened.
    pub fn eval_later_promise<U, F>(&self, func: F) -> Promise<U>
    where
        U: Send + 'static,
        F: FnOnce() -> Promise<U> + Send + 'static,
    {
        let transform = TransformNode::new(
            Some(self.queue()),
            Box::new(ImmediateNode::from_value(())) as NodeBox<()>,
            move |()| Ok(func()),
            propagate,
        );
        let chain = ChainNode::new(Some(self.queue()), Box::new(transform), Schedule::Yield);
        Promise::from_node(Box::new(CrossThreadNode::new(self.queue(), Box::new(chain))))
    }

    /// Forces evaluation of `promise` to begin on this loop as soon as
    /// possible, even with no one waiting on it yet.
    pub fn eagerly_evaluate<T: Send + 'static>(&self, promise: Promise<T>) -> Promise<T> {
        let node = make_safe_for_loop(promise.into_node(), &self.queue);
        Promise::from_node(Box::new(CrossThreadNode::new(self.queue(), node)))
    }

    /// Forks `promise` with the hub managed on this loop. See
    /// [`Promise::fork`] for the current-loop variant.
    pub fn fork_on<T: Clone + Send + 'static>(&self, promise: Promise<T>) -> ForkedPromise<T> {
        let hub = ForkHub::new(promise.into_node());
        hub.ensure_armed(&self.queue);
        ForkedPromise::new(hub)
    }
}

impl Default for EventLoop {
    fn default() -> Self {
        Self::new()
    }
}
