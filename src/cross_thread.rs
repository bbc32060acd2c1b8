//! The cross-thread node: imports a promise from one event loop into
//! another, and doubles as the eager-evaluation wrapper.
//!
//! The node is an event on the loop that owns the dependency. It arms
//! itself with [`Schedule::Yield`] at construction: construction may
//! happen on any thread, and yielding keeps multiple cross-thread arms in
//! FIFO order where preempting would interleave them nondeterministically.
//! Once the dependency delivers, the result is published through the
//! ready cell, which is safe to consume from any thread.

use crate::error::ErrorOr;
use crate::event::{Event, EventRef, Schedule};
use crate::node::{LoopRef, NodeBox, PromiseNode, ReadyCell};
use std::sync::{Arc, Mutex};

struct CrossThreadState<T> {
    dependency: Option<NodeBox<T>>,
    waiting: bool,
    result: ErrorOr<T>,
}

struct CrossThreadShared<T> {
    state: Mutex<CrossThreadState<T>>,
    ready: ReadyCell,
}

/// A node that evaluates its dependency on the dependency's own loop and
/// hands the result to a consumer on any thread.
pub struct CrossThreadNode<T: Send + 'static> {
    // Declared first so the fire barrier runs before the state drops.
    _event: Event,
    shared: Arc<CrossThreadShared<T>>,
}

impl<T: Send + 'static> CrossThreadNode<T> {
    /// Creates the adapter on `queue`, which must be the loop the
    /// dependency is safe on. Evaluation begins on that loop's next turn
    /// whether or not anyone is waiting yet.
    #[must_use]
    pub fn new(queue: LoopRef, dependency: NodeBox<T>) -> Self {
        debug_assert!(dependency.is_safe_event_loop(&queue));
        let shared = Arc::new(CrossThreadShared {
            state: Mutex::new(CrossThreadState {
                dependency: Some(dependency),
                waiting: false,
                result: ErrorOr::new(),
            }),
            ready: ReadyCell::new(),
        });
        let fire_shared = Arc::clone(&shared);
        let event = Event::new(
            queue,
            Box::new(move |self_ref| fire(&fire_shared, self_ref)),
        );
        event.arm(Schedule::Yield);
        Self { _event: event, shared }
    }
}

fn fire<T: Send + 'static>(shared: &Arc<CrossThreadShared<T>>, self_ref: &EventRef) {
    let mut state = shared.state.lock().expect("cross-thread state poisoned");
    if !state.waiting {
        let ready = state
            .dependency
            .as_mut()
            .expect("cross-thread dependency already released")
            .on_ready(self_ref);
        if !ready {
            state.waiting = true;
            return;
        }
    }

    let mut dependency = state
        .dependency
        .take()
        .expect("cross-thread dependency already released");
    let mut result = ErrorOr::new();
    dependency.get(&mut result);
    drop(dependency);
    state.result = result;
    drop(state);

    // The consumer may be parked on another loop; yield keeps deliveries
    // from one producer in order.
    shared.ready.signal(Schedule::Yield);
}

impl<T: Send + 'static> PromiseNode for CrossThreadNode<T> {
    type Output = T;

    fn on_ready(&mut self, event: &EventRef) -> bool {
        self.shared.ready.register(event)
    }

    fn get(&mut self, output: &mut ErrorOr<T>) {
        let mut state = self.shared.state.lock().expect("cross-thread state poisoned");
        *output = std::mem::take(&mut state.result);
    }

    fn safe_event_loop(&self) -> Option<LoopRef> {
        // All shared mutation is behind the state mutex and the ready
        // cell, so any thread may consume.
        None
    }
}

/// Wraps `node` in a [`CrossThreadNode`] when it is not already safe to
/// evaluate from `queue`.
pub(crate) fn make_safe_for_loop<T: Send + 'static>(node: NodeBox<T>, queue: &LoopRef) -> NodeBox<T> {
    match node.safe_event_loop() {
        Some(preferred) if !Arc::ptr_eq(&preferred, queue) => {
            Box::new(CrossThreadNode::new(preferred, node))
        }
        _ => node,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::event_loop::EventLoop;
    use crate::node::{ImmediateBrokenNode, ImmediateNode};
    use crate::promise::Promise;

    #[test]
    fn delivers_value_through_one_loop_turn() {
        let event_loop = EventLoop::new();
        let node = CrossThreadNode::new(
            event_loop.queue(),
            Box::new(ImmediateNode::from_value(11)) as NodeBox<i32>,
        );
        let value = event_loop
            .wait(Promise::from_node(Box::new(node)))
            .expect("value expected");
        assert_eq!(value, 11);
    }

    #[test]
    fn delivers_error_through_one_loop_turn() {
        let event_loop = EventLoop::new();
        let node = CrossThreadNode::new(
            event_loop.queue(),
            Box::new(ImmediateBrokenNode::new(Error::disconnected("gone"))) as NodeBox<i32>,
        );
        let err = event_loop
            .wait(Promise::from_node(Box::new(node)))
            .expect_err("error expected");
        assert!(err.is_disconnected());
    }
}
