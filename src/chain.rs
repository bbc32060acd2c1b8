//! The chain node: flattens a promise whose value is itself a promise.
//!
//! A continuation that returns a promise produces `Promise<Promise<U>>`.
//! The chain node adopts the outer node, waits for it to deliver the
//! inner promise, then swaps that inner promise's node into place and
//! behaves as a passthrough from then on. Errors never get lost along the
//! way: a broken outer promise is replaced by an immediately broken
//! inner.

use crate::cross_thread::make_safe_for_loop;
use crate::error::ErrorOr;
use crate::event::{Event, EventRef, Schedule};
use crate::event_loop::current_loop;
use crate::node::{ImmediateBrokenNode, LoopRef, NodeBox, PromiseNode};
use crate::promise::Promise;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    /// Constructed outside any loop; arming is deferred until a consumer
    /// registers from a loop thread.
    Idle,
    /// Armed, but the first fire has not happened yet.
    PreStep1,
    /// The outer promise has our event registered and will arm it.
    Step1,
    /// The inner promise has been adopted; pure passthrough.
    Step2,
}

struct ChainState<T: Send + 'static> {
    stage: Stage,
    /// The outer node (delivers a `Promise<T>`). Present through Step1.
    outer: Option<NodeBox<Promise<T>>>,
    /// The adopted inner node. Present from Step2 on.
    inner: Option<NodeBox<T>>,
    /// Continuation registered before the inner promise was adopted.
    ready_event: Option<EventRef>,
    bound: Option<LoopRef>,
}

/// A node that waits for an outer promise and then stands in for the
/// promise it delivered.
pub struct ChainNode<T: Send + 'static> {
    // Declared first: dropping the event waits out any in-flight fire, so
    // the state below is never torn down mid-fire.
    _event: Option<Event>,
    shared: Arc<Mutex<ChainState<T>>>,
}

impl<T: Send + 'static> ChainNode<T> {
    /// Creates a chain over `outer`. When `bound` is given the node arms
    /// itself immediately with `schedule`; otherwise it stays idle until
    /// the first consumer registration binds it to that thread's loop.
    #[must_use]
    pub fn new(bound: Option<LoopRef>, outer: NodeBox<Promise<T>>, schedule: Schedule) -> Self {
        let mut node = Self {
            _event: None,
            shared: Arc::new(Mutex::new(ChainState {
                stage: Stage::Idle,
                outer: Some(outer),
                inner: None,
                ready_event: None,
                bound: None,
            })),
        };
        if let Some(queue) = bound {
            node.bind(queue, schedule, None);
        }
        node
    }

    /// Binds the chain to `queue` and arms it. `pending` is a continuation
    /// registered in the same breath, stashed before the event can fire.
    fn bind(&mut self, queue: LoopRef, schedule: Schedule, pending: Option<EventRef>) {
        {
            let mut state = self.shared.lock().expect("chain state poisoned");
            debug_assert_eq!(state.stage, Stage::Idle);
            let outer = state.outer.take().expect("chain outer node missing");
            state.outer = Some(make_safe_for_loop(outer, &queue));
            state.bound = Some(Arc::clone(&queue));
            state.ready_event = pending;
            state.stage = Stage::PreStep1;
        }

        let shared = Arc::clone(&self.shared);
        let event = Event::new(queue, Box::new(move |self_ref| fire(&shared, self_ref)));
        event.arm(schedule);
        self._event = Some(event);
    }
}

fn fire<T: Send + 'static>(shared: &Arc<Mutex<ChainState<T>>>, self_ref: &EventRef) {
    let mut state = shared.lock().expect("chain state poisoned");

    if state.stage == Stage::PreStep1 {
        let ready = state
            .outer
            .as_mut()
            .expect("chain outer node missing")
            .on_ready(self_ref);
        if !ready {
            state.stage = Stage::Step1;
            return;
        }
    }
    assert_ne!(
        state.stage,
        Stage::Step2,
        "chain fired after adopting its inner promise"
    );

    let mut outer = state.outer.take().expect("chain outer node missing");
    let mut intermediate: ErrorOr<Promise<T>> = ErrorOr::new();
    outer.get(&mut intermediate);
    drop(outer);

    let inner: NodeBox<T> = if let Some(error) = intermediate.error.take() {
        // The error wins; a value produced alongside it is dropped.
        drop(intermediate.value.take());
        Box::new(ImmediateBrokenNode::new(error))
    } else if let Some(promise) = intermediate.value.take() {
        promise.into_node()
    } else {
        unreachable!("outer promise delivered neither a value nor an error")
    };

    state.inner = Some(inner);
    state.stage = Stage::Step2;

    // Re-drive a continuation that registered before the handoff. If the
    // adopted node is already ready, run the continuation on this turn.
    if let Some(waiting) = state.ready_event.take() {
        let ready = state
            .inner
            .as_mut()
            .expect("chain inner node missing")
            .on_ready(&waiting);
        if ready {
            waiting.arm(Schedule::Preempt);
        }
    }
}

impl<T: Send + 'static> PromiseNode for ChainNode<T> {
    type Output = T;

    fn on_ready(&mut self, event: &EventRef) -> bool {
        let stage = {
            let state = self.shared.lock().expect("chain state poisoned");
            state.stage
        };
        match stage {
            Stage::Idle => {
                let queue = current_loop()
                    .expect("chaining a promise-returning continuation requires an event loop");
                self.bind(queue, Schedule::Preempt, Some(Arc::clone(event)));
                false
            }
            Stage::PreStep1 | Stage::Step1 => {
                let mut state = self.shared.lock().expect("chain state poisoned");
                if state.stage == Stage::Step2 {
                    // The fire slipped in between the two locks.
                    return state
                        .inner
                        .as_mut()
                        .expect("chain inner node missing")
                        .on_ready(event);
                }
                assert!(
                    state.ready_event.is_none(),
                    "on_ready may only be called once per promise node"
                );
                state.ready_event = Some(Arc::clone(event));
                false
            }
            Stage::Step2 => {
                let mut state = self.shared.lock().expect("chain state poisoned");
                state
                    .inner
                    .as_mut()
                    .expect("chain inner node missing")
                    .on_ready(event)
            }
        }
    }

    fn get(&mut self, output: &mut ErrorOr<T>) {
        let mut state = self.shared.lock().expect("chain state poisoned");
        assert_eq!(
            state.stage,
            Stage::Step2,
            "chain result requested before the inner promise was adopted"
        );
        state
            .inner
            .as_mut()
            .expect("chain inner node missing")
            .get(output);
    }

    fn safe_event_loop(&self) -> Option<LoopRef> {
        let state = self.shared.lock().expect("chain state poisoned");
        state.bound.as_ref().map_or_else(
            || state.outer.as_ref().and_then(|o| o.safe_event_loop()),
            |queue| Some(Arc::clone(queue)),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_loop::EventLoop;
    use crate::node::ImmediateNode;

    #[test]
    fn flattens_an_immediate_promise_of_a_promise() {
        let event_loop = EventLoop::new();
        let outer: NodeBox<Promise<i32>> =
            Box::new(ImmediateNode::from_value(Promise::resolved(5)));
        let chain = ChainNode::new(Some(event_loop.queue()), outer, Schedule::Preempt);
        let value = event_loop
            .wait(Promise::from_node(Box::new(chain)))
            .expect("chain should resolve");
        assert_eq!(value, 5);
    }

    #[test]
    fn broken_outer_breaks_the_chain() {
        let event_loop = EventLoop::new();
        let outer: NodeBox<Promise<i32>> =
            Box::new(ImmediateBrokenNode::new(crate::error::Error::failed("outer broke")));
        let chain = ChainNode::new(Some(event_loop.queue()), outer, Schedule::Preempt);
        let err = event_loop
            .wait(Promise::from_node(Box::new(chain)))
            .expect_err("chain should break");
        assert!(err.description().contains("outer broke"));
    }
}
