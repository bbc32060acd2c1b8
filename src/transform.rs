//! The transform node behind `then`: apply a continuation to a
//! dependency's result.
//!
//! Transforms are passive. They carry no event of their own; readiness
//! simply delegates to the dependency, and the continuation runs lazily
//! inside `get`, on whichever thread consumes the result. A chain of
//! transforms therefore collapses into a single pass with no trips
//! through the event queue.

use crate::error::{Error, ErrorOr, Result};
use crate::event::EventRef;
use crate::node::{LoopRef, NodeBox, PromiseNode};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

/// A node that transforms the result of its dependency through
/// user-provided continuations (implements `then`).
pub struct TransformNode<D, U, F, E> {
    // The dependency is declared (and therefore dropped) before the
    // continuations: continuations commonly own objects that the
    // dependency still references.
    dependency: Option<NodeBox<D>>,
    on_value: Option<F>,
    on_error: Option<E>,
    bound: Option<LoopRef>,
    _marker: std::marker::PhantomData<fn() -> U>,
}

impl<D, U, F, E> TransformNode<D, U, F, E>
where
    D: Send + 'static,
    U: Send + 'static,
    F: FnOnce(D) -> Result<U> + Send + 'static,
    E: FnOnce(Error) -> Result<U> + Send + 'static,
{
    /// Creates a transform over `dependency`, optionally bound to a loop.
    #[must_use]
    pub fn new(bound: Option<LoopRef>, dependency: NodeBox<D>, on_value: F, on_error: E) -> Self {
        Self {
            dependency: Some(dependency),
            on_value: Some(on_value),
            on_error: Some(on_error),
            bound,
            _marker: std::marker::PhantomData,
        }
    }
}

impl<D, U, F, E> PromiseNode for TransformNode<D, U, F, E>
where
    D: Send + 'static,
    U: Send + 'static,
    F: FnOnce(D) -> Result<U> + Send + 'static,
    E: FnOnce(Error) -> Result<U> + Send + 'static,
{
    type Output = U;

    fn on_ready(&mut self, event: &EventRef) -> bool {
        self.dependency
            .as_mut()
            .expect("transform dependency already released")
            .on_ready(event)
    }

    fn get(&mut self, output: &mut ErrorOr<U>) {
        let mut dependency = self
            .dependency
            .take()
            .expect("transform result already delivered");
        let mut dep_result = ErrorOr::new();
        dependency.get(&mut dep_result);

        let on_value = self.on_value.take().expect("continuation already consumed");
        let on_error = self.on_error.take().expect("continuation already consumed");

        // Exactly one continuation runs, under a panic guard so a failing
        // continuation breaks this promise instead of unwinding the loop.
        let outcome = catch_unwind(AssertUnwindSafe(move || {
            if let Some(error) = dep_result.error.take() {
                on_error(error)
            } else if let Some(value) = dep_result.value.take() {
                on_value(value)
            } else {
                unreachable!("dependency delivered neither a value nor an error")
            }
        }));

        match outcome {
            Ok(Ok(value)) => output.value = Some(value),
            Ok(Err(error)) => output.add_error(error),
            Err(payload) => output.add_error(Error::from_panic(payload)),
        }

        // The dependency is released only now that the result is in hand.
        drop(dependency);
    }

    fn safe_event_loop(&self) -> Option<LoopRef> {
        self.bound.as_ref().map_or_else(
            || {
                self.dependency
                    .as_ref()
                    .and_then(|dep| dep.safe_event_loop())
            },
            |queue| Some(Arc::clone(queue)),
        )
    }
}

/// The default error continuation: pass the error through unchanged.
pub fn propagate<U>(error: Error) -> Result<U> {
    Err(error)
}
