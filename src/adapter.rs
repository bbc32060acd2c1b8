//! Externally-driven promises: the adapter node and its fulfiller handle.
//!
//! An adapter promise completes when outside code (an I/O callback or
//! another thread) calls into its [`Fulfiller`]. Only the first
//! `fulfill`/`reject` counts. The fulfiller holds a weak reference: once
//! the promise is dropped, fulfilling becomes a logged no-op, which is
//! how cancellation reaches the outside world.

use crate::error::{Error, ErrorOr};
use crate::event::{EventRef, Schedule};
use crate::node::{LoopRef, PromiseNode, ReadyCell};
use std::sync::{Arc, Mutex, Weak};

struct AdapterShared<T> {
    result: Mutex<ErrorOr<T>>,
    ready: ReadyCell,
}

/// Handle used by external code to complete an adapter promise. Safe to
/// call from any thread.
pub struct Fulfiller<T: Send + 'static> {
    shared: Weak<AdapterShared<T>>,
}

impl<T: Send + 'static> Fulfiller<T> {
    /// Fulfills the promise with `value`. Ignored if the promise was
    /// already settled or has been dropped.
    pub fn fulfill(&self, value: T) {
        self.settle(ErrorOr::from_value(value));
    }

    /// Rejects the promise with `error`. Ignored if the promise was
    /// already settled or has been dropped.
    pub fn reject(&self, error: Error) {
        self.settle(ErrorOr::from_error(error));
    }

    /// Returns true while the promise is unsettled and someone may still
    /// observe the result.
    #[must_use]
    pub fn is_waiting(&self) -> bool {
        self.shared.upgrade().is_some_and(|shared| {
            shared
                .result
                .lock()
                .expect("adapter result poisoned")
                .is_empty()
        })
    }

    fn settle(&self, outcome: ErrorOr<T>) {
        let Some(shared) = self.shared.upgrade() else {
            tracing::trace!("fulfiller invoked after its promise was dropped");
            return;
        };
        {
            let mut result = shared.result.lock().expect("adapter result poisoned");
            if !result.is_empty() {
                tracing::trace!("fulfiller invoked more than once; keeping the first result");
                return;
            }
            *result = outcome;
        }
        shared.ready.signal(Schedule::Preempt);
    }
}

/// A node whose completion is driven from outside the promise graph.
pub struct AdapterNode<T: Send + 'static, A> {
    shared: Arc<AdapterShared<T>>,
    /// The user's adapter object. Dropped together with the node, which
    /// is the cancellation hook for the external operation.
    _adapter: A,
}

impl<T: Send + 'static, A: Send + 'static> AdapterNode<T, A> {
    /// Builds the adapter object with a fulfiller wired to this node.
    #[must_use]
    pub fn new(ctor: impl FnOnce(Fulfiller<T>) -> A) -> Self {
        let shared = Arc::new(AdapterShared {
            result: Mutex::new(ErrorOr::new()),
            ready: ReadyCell::new(),
        });
        let fulfiller = Fulfiller {
            shared: Arc::downgrade(&shared),
        };
        let adapter = ctor(fulfiller);
        Self {
            shared,
            _adapter: adapter,
        }
    }
}

impl<T: Send + 'static, A: Send> PromiseNode for AdapterNode<T, A> {
    type Output = T;

    fn on_ready(&mut self, event: &EventRef) -> bool {
        self.shared.ready.register(event)
    }

    fn get(&mut self, output: &mut ErrorOr<T>) {
        let mut result = self
            .shared
            .result
            .lock()
            .expect("adapter result poisoned");
        *output = std::mem::take(&mut *result);
    }

    fn safe_event_loop(&self) -> Option<LoopRef> {
        None
    }
}

/// Creates an unresolved promise plus the fulfiller that settles it.
#[must_use]
pub fn promise_and_fulfiller<T: Send + 'static>() -> (crate::promise::Promise<T>, Fulfiller<T>) {
    let mut handle = None;
    let node: AdapterNode<T, ()> = AdapterNode::new(|fulfiller| {
        handle = Some(fulfiller);
    });
    let fulfiller = handle.expect("adapter constructor always runs");
    (crate::promise::Promise::from_node(Box::new(node)), fulfiller)
}
