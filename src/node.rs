//! The promise-node abstraction and its leaf implementations.
//!
//! A promise is a chain (a DAG, once forked) of nodes tracking pending
//! transformations. Each node can be asked when it is ready, can deliver
//! its result exactly once, and declares which event loop may safely
//! evaluate it.

use crate::error::{Error, ErrorOr};
use crate::event::{EventQueue, EventRef, Schedule};
use std::sync::{Arc, Mutex};

/// Reference to the event loop a node is bound to.
pub type LoopRef = Arc<EventQueue>;

/// A node in the promise graph.
///
/// Ownership runs strictly downward: every non-leaf node exclusively owns
/// its dependency until `get` has executed, and releases it promptly
/// afterwards.
pub trait PromiseNode: Send {
    /// The value this node resolves to.
    type Output;

    /// Returns true if the node is already ready. Otherwise stores `event`
    /// as the single continuation to arm on readiness and returns false.
    ///
    /// # Panics
    ///
    /// Calling this twice on the same node is a contract violation inside
    /// the runtime and panics.
    fn on_ready(&mut self, event: &EventRef) -> bool;

    /// Moves the result out. May only be called after readiness has been
    /// observed, and only once.
    fn get(&mut self, output: &mut ErrorOr<Self::Output>);

    /// The loop from which `on_ready` and `get` may safely be called, or
    /// `None` if any thread is fine.
    fn safe_event_loop(&self) -> Option<LoopRef>;

    /// Returns true if the node may be evaluated on `queue`.
    fn is_safe_event_loop(&self, queue: &LoopRef) -> bool {
        self.safe_event_loop()
            .map_or(true, |preferred| Arc::ptr_eq(&preferred, queue))
    }
}

/// Boxed node, the currency of the promise graph.
pub type NodeBox<T> = Box<dyn PromiseNode<Output = T>>;

/// State of a [`ReadyCell`].
#[derive(Debug, Default)]
enum ReadySlot {
    /// No continuation registered and not ready.
    #[default]
    Empty,
    /// A continuation is waiting to be armed on readiness.
    Registered(EventRef),
    /// Readiness was signalled (possibly before anyone registered).
    Ready,
}

/// One-shot rendezvous between a node becoming ready and the single
/// continuation interested in that.
///
/// This is the shared protocol behind every node whose completion can race
/// with its consumer: the consumer registers exactly one event, the
/// producer signals exactly once, and whichever side arrives second
/// completes the handshake. The original implementation runs this protocol
/// over a compare-and-swap on a tagged pointer; here the two transitions
/// sit behind a small mutex instead.
#[derive(Debug, Default)]
pub struct ReadyCell {
    slot: Mutex<ReadySlot>,
}

impl ReadyCell {
    /// Creates an empty cell.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a cell that is already ready, for results that were
    /// published before any consumer existed.
    #[must_use]
    pub fn ready() -> Self {
        Self {
            slot: Mutex::new(ReadySlot::Ready),
        }
    }

    /// The consumer half: returns true if already ready, otherwise stores
    /// `event` for the producer to arm.
    ///
    /// # Panics
    ///
    /// Panics if a continuation is already registered.
    pub fn register(&self, event: &EventRef) -> bool {
        let mut slot = self.slot.lock().expect("ready slot poisoned");
        match &*slot {
            ReadySlot::Empty => {
                *slot = ReadySlot::Registered(Arc::clone(event));
                false
            }
            ReadySlot::Ready => true,
            ReadySlot::Registered(_) => {
                panic!("on_ready may only be called once per promise node")
            }
        }
    }

    /// The producer half: marks the cell ready, arming the registered
    /// continuation (if any) with `schedule`.
    pub fn signal(&self, schedule: Schedule) {
        let mut slot = self.slot.lock().expect("ready slot poisoned");
        if let ReadySlot::Registered(event) = std::mem::replace(&mut *slot, ReadySlot::Ready) {
            drop(slot);
            event.arm(schedule);
        }
    }

    /// Returns true if readiness has been signalled.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        matches!(
            &*self.slot.lock().expect("ready slot poisoned"),
            ReadySlot::Ready
        )
    }
}

/// A node that resolved before it was even constructed.
#[derive(Debug)]
pub struct ImmediateNode<T> {
    result: ErrorOr<T>,
}

impl<T> ImmediateNode<T> {
    /// Wraps a precomputed result.
    #[must_use]
    pub fn new(result: ErrorOr<T>) -> Self {
        Self { result }
    }

    /// Wraps a value.
    #[must_use]
    pub fn from_value(value: T) -> Self {
        Self::new(ErrorOr::from_value(value))
    }
}

impl<T: Send> PromiseNode for ImmediateNode<T> {
    type Output = T;

    fn on_ready(&mut self, _event: &EventRef) -> bool {
        true
    }

    fn get(&mut self, output: &mut ErrorOr<T>) {
        *output = std::mem::take(&mut self.result);
    }

    fn safe_event_loop(&self) -> Option<LoopRef> {
        None
    }
}

/// A node that was broken before it was even constructed.
#[derive(Debug)]
pub struct ImmediateBrokenNode<T> {
    error: Option<Error>,
    _marker: std::marker::PhantomData<fn() -> T>,
}

impl<T> ImmediateBrokenNode<T> {
    /// Wraps the error every consumer will observe.
    #[must_use]
    pub fn new(error: Error) -> Self {
        Self {
            error: Some(error),
            _marker: std::marker::PhantomData,
        }
    }
}

impl<T: Send> PromiseNode for ImmediateBrokenNode<T> {
    type Output = T;

    fn on_ready(&mut self, _event: &EventRef) -> bool {
        true
    }

    fn get(&mut self, output: &mut ErrorOr<T>) {
        let error = self
            .error
            .take()
            .unwrap_or_else(|| Error::failed("broken promise already consumed"));
        output.add_error(error);
    }

    fn safe_event_loop(&self) -> Option<LoopRef> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Event;
    use crate::park::FutexPark;

    fn noop_event(queue: &Arc<EventQueue>) -> Event {
        Event::new(Arc::clone(queue), Box::new(|_| {}))
    }

    fn test_queue() -> Arc<EventQueue> {
        Arc::new(EventQueue::new(Box::new(FutexPark::new())))
    }

    #[test]
    fn immediate_node_is_ready_and_delivers() {
        let queue = test_queue();
        let event = noop_event(&queue);
        let mut node = ImmediateNode::from_value(42);
        assert!(node.on_ready(event.core()));
        let mut out = ErrorOr::new();
        node.get(&mut out);
        assert_eq!(out.into_result().expect("expected value"), 42);
    }

    #[test]
    fn broken_node_delivers_error() {
        let queue = test_queue();
        let event = noop_event(&queue);
        let mut node: ImmediateBrokenNode<u32> = ImmediateBrokenNode::new(Error::failed("nope"));
        assert!(node.on_ready(event.core()));
        let mut out = ErrorOr::new();
        node.get(&mut out);
        assert!(out.into_result().is_err());
    }

    #[test]
    fn ready_cell_signal_then_register() {
        let queue = test_queue();
        let event = noop_event(&queue);
        let cell = ReadyCell::new();
        cell.signal(Schedule::Yield);
        assert!(cell.register(event.core()));
    }

    #[test]
    fn ready_cell_register_then_signal_arms() {
        let queue = test_queue();
        let event = noop_event(&queue);
        let cell = ReadyCell::new();
        assert!(!cell.register(event.core()));
        assert_eq!(queue.pending_events(), 0);
        cell.signal(Schedule::Yield);
        assert_eq!(queue.pending_events(), 1);
    }

    #[test]
    #[should_panic(expected = "on_ready may only be called once")]
    fn ready_cell_rejects_second_registration() {
        let queue = test_queue();
        let e1 = noop_event(&queue);
        let e2 = noop_event(&queue);
        let cell = ReadyCell::new();
        let _ = cell.register(e1.core());
        let _ = cell.register(e2.core());
    }
}
