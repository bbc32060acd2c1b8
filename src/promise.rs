//! The user-facing promise type and its combinators.
//!
//! A `Promise<T>` owns the root of a node graph. Promises are move-only:
//! every combinator and `wait` consumes the promise, and dropping one
//! cancels the pipeline behind it. Dependencies are released
//! recursively, and any armed event disarms with the fire barrier, so
//! once the drop returns no continuation of this pipeline can run.

use crate::adapter::{AdapterNode, Fulfiller};
use crate::chain::ChainNode;
use crate::cross_thread::make_safe_for_loop;
use crate::error::{Error, Result};
use crate::event::Schedule;
use crate::event_loop::{current_loop, EventLoop};
use crate::fork::{ForkHub, ForkedPromise};
use crate::node::{ImmediateBrokenNode, ImmediateNode, NodeBox};
use crate::transform::{propagate, TransformNode};
use core::fmt;

/// A promise to produce a value of type `T`, or an [`Error`], some time
/// in the future.
pub struct Promise<T: Send + 'static> {
    node: NodeBox<T>,
}

impl<T: Send + 'static> Promise<T> {
    /// Creates an already-fulfilled promise.
    #[must_use]
    pub fn resolved(value: T) -> Self {
        Self::from_node(Box::new(ImmediateNode::from_value(value)))
    }

    /// Creates an already-broken promise.
    #[must_use]
    pub fn rejected(error: Error) -> Self {
        Self::from_node(Box::new(ImmediateBrokenNode::new(error)))
    }

    /// Creates a promise completed from outside the graph: `ctor`
    /// receives the fulfiller and returns an adapter object that is
    /// dropped when the promise is, cancelling the external operation.
    #[must_use]
    pub fn adapted<A: Send + 'static>(ctor: impl FnOnce(Fulfiller<T>) -> A) -> Self {
        Self::from_node(Box::new(AdapterNode::new(ctor)))
    }

    pub(crate) fn from_node(node: NodeBox<T>) -> Self {
        Self { node }
    }

    pub(crate) fn into_node(self) -> NodeBox<T> {
        self.node
    }

    fn transformed<U, F, E>(self, on_value: F, on_error: E) -> NodeBox<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> Result<U> + Send + 'static,
        E: FnOnce(Error) -> Result<U> + Send + 'static,
    {
        let bound = current_loop();
        let dependency = match &bound {
            Some(queue) => make_safe_for_loop(self.node, queue),
            None => self.node,
        };
        Box::new(TransformNode::new(bound, dependency, on_value, on_error))
    }

    /// Registers a continuation for the value; an error passes through
    /// unchanged. Returns a promise for the continuation's result.
    ///
    /// The continuation runs on the event loop that consumes this
    /// promise, so it needs no synchronization with the surrounding
    /// scope. If it panics, the returned promise is broken.
    #[must_use]
    pub fn then<U, F>(self, func: F) -> Promise<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        Promise::from_node(self.transformed(move |value| Ok(func(value)), propagate))
    }

    /// Like [`Promise::then`], with an error continuation that may
    /// recover (by returning `Ok`) or re-propagate.
    #[must_use]
    pub fn then_catch<U, F, E>(self, func: F, error_handler: E) -> Promise<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> Result<U> + Send + 'static,
        E: FnOnce(Error) -> Result<U> + Send + 'static,
    {
        Promise::from_node(self.transformed(func, error_handler))
    }

    /// Registers an error continuation only; a value passes through.
    #[must_use]
    pub fn or_else<E>(self, error_handler: E) -> Promise<T>
    where
        E: FnOnce(Error) -> Result<T> + Send + 'static,
    {
        Promise::from_node(self.transformed(Ok, error_handler))
    }

    /// Registers a continuation that returns another promise; the result
    /// is flattened, so chaining never produces a promise of a promise.
    /// Evaluation of the continuation is eager once the loop reaches it.
    #[must_use]
    pub fn then_promise<U, F>(self, func: F) -> Promise<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> Promise<U> + Send + 'static,
    {
        let outer = self.transformed(move |value| Ok(func(value)), propagate);
        Promise::from_node(Box::new(ChainNode::new(
            current_loop(),
            outer,
            Schedule::Preempt,
        )))
    }

    /// Like [`Promise::then_promise`], with an error continuation that
    /// must produce a replacement promise.
    #[must_use]
    pub fn then_promise_catch<U, F, E>(self, func: F, error_handler: E) -> Promise<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> Promise<U> + Send + 'static,
        E: FnOnce(Error) -> Promise<U> + Send + 'static,
    {
        let outer = self.transformed(
            move |value| Ok(func(value)),
            move |error| Ok(error_handler(error)),
        );
        Promise::from_node(Box::new(ChainNode::new(
            current_loop(),
            outer,
            Schedule::Preempt,
        )))
    }

    /// Forks the promise so multiple clients can independently await the
    /// result. Requires `T: Clone`: each branch gets a clone.
    #[must_use]
    pub fn fork(self) -> ForkedPromise<T>
    where
        T: Clone,
    {
        let hub = ForkHub::new(self.node);
        if let Some(queue) = current_loop() {
            hub.ensure_armed(&queue);
        }
        ForkedPromise::new(hub)
    }

    /// Runs `event_loop` until this promise resolves. Shorthand for
    /// [`EventLoop::wait`].
    pub fn wait(self, event_loop: &EventLoop) -> Result<T> {
        event_loop.wait(self)
    }
}

impl<T: Send + 'static> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Promise").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn then_transforms_the_value() {
        let event_loop = EventLoop::new();
        let promise = Promise::resolved(7).then(|x| x * 2);
        assert_eq!(event_loop.wait(promise).expect("value"), 14);
    }

    #[test]
    fn then_propagates_errors_past_the_continuation() {
        let event_loop = EventLoop::new();
        let promise = Promise::<i32>::rejected(Error::failed("broken")).then(|x| x * 2);
        assert!(event_loop.wait(promise).is_err());
    }

    #[test]
    fn then_catch_recovers_from_an_error() {
        let event_loop = EventLoop::new();
        let promise =
            Promise::<i32>::rejected(Error::failed("broken")).then_catch(Ok, |_err| Ok(0));
        assert_eq!(event_loop.wait(promise).expect("recovered"), 0);
    }

    #[test]
    fn or_else_leaves_values_alone() {
        let event_loop = EventLoop::new();
        let promise = Promise::resolved(3).or_else(|_err| Ok(0));
        assert_eq!(event_loop.wait(promise).expect("value"), 3);
    }

    #[test]
    fn then_promise_flattens() {
        let event_loop = EventLoop::new();
        let promise = Promise::resolved(1)
            .then_promise(|x| Promise::resolved(x + 1))
            .then(|x| x + 1);
        assert_eq!(event_loop.wait(promise).expect("value"), 3);
    }

    #[test]
    fn then_promise_catch_replaces_a_broken_promise() {
        let event_loop = EventLoop::new();
        let promise = Promise::<i32>::rejected(Error::failed("broken"))
            .then_promise_catch(|x| Promise::resolved(x), |_err| Promise::resolved(42));
        assert_eq!(event_loop.wait(promise).expect("replacement"), 42);
    }

    #[test]
    fn panicking_continuation_breaks_the_promise() {
        let event_loop = EventLoop::new();
        let promise = Promise::resolved(7).then(|_x| -> i32 { panic!("kaboom") });
        let err = event_loop.wait(promise).expect_err("expected error");
        assert!(err.description().contains("kaboom"));
    }

    #[test]
    fn dropping_a_pending_pipeline_never_runs_its_continuation() {
        let (promise, fulfiller) = crate::adapter::promise_and_fulfiller::<i32>();
        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        let transformed = promise.then(move |x| {
            flag.store(true, Ordering::SeqCst);
            x
        });

        drop(transformed);
        fulfiller.fulfill(5);
        assert!(!ran.load(Ordering::SeqCst));
    }
}
