//! Fork: one-to-many fan-out of a promise's result.
//!
//! A fork routes one inner promise to any number of branches. The hub is
//! an event on the loop; its first fire registers on the inner node, its
//! second pulls the result and hands readiness to every branch that has
//! registered so far, in registration order. The hub then closes its
//! branch list, so branches created after distribution are born ready.
//!
//! The hub lives as long as its longest-lived branch (shared ownership,
//! no cycles). Branch values are clones of the hub's single result, so
//! `T: Clone` is required; an error fans out as clones of one error.

use crate::cross_thread::make_safe_for_loop;
use crate::error::ErrorOr;
use crate::event::{Event, EventRef, Schedule};
use crate::event_loop::current_loop;
use crate::node::{LoopRef, NodeBox, PromiseNode, ReadyCell};
use crate::promise::Promise;
use std::sync::{Arc, Mutex};

struct HubState<T> {
    inner: Option<NodeBox<T>>,
    waiting: bool,
    result: ErrorOr<T>,
    /// Open branch list, in registration order. `None` once the hub has
    /// distributed: the fork is closed and late branches start ready.
    branches: Option<Vec<Arc<ReadyCell>>>,
}

/// Shared completion state of a forked promise.
pub struct ForkHub<T: Clone + Send + 'static> {
    // Declared first: dropping the event waits out an in-flight fire
    // before the shared state goes away.
    event: Mutex<Option<Event>>,
    shared: Arc<Mutex<HubState<T>>>,
}

impl<T: Clone + Send + 'static> ForkHub<T> {
    /// Creates a hub over `inner`, not yet bound to any loop.
    #[must_use]
    pub fn new(inner: NodeBox<T>) -> Arc<Self> {
        Arc::new(Self {
            event: Mutex::new(None),
            shared: Arc::new(Mutex::new(HubState {
                inner: Some(inner),
                waiting: false,
                result: ErrorOr::new(),
                branches: Some(Vec::new()),
            })),
        })
    }

    /// Binds the hub to `queue` and arms it, once. Yielding (rather than
    /// preempting) guarantees distribution happens via a full loop turn
    /// even when the inner promise is already ready, which keeps branch
    /// delivery deterministic and avoids reentrancy.
    pub fn ensure_armed(&self, queue: &LoopRef) {
        let mut slot = self.event.lock().expect("fork hub event slot poisoned");
        if slot.is_some() {
            return;
        }

        {
            let mut state = self.shared.lock().expect("fork hub state poisoned");
            let inner = state.inner.take().expect("fork hub inner node missing");
            state.inner = Some(make_safe_for_loop(inner, queue));
        }

        let shared = Arc::clone(&self.shared);
        let event = Event::new(
            Arc::clone(queue),
            Box::new(move |self_ref| fire(&shared, self_ref)),
        );
        event.arm(Schedule::Yield);
        *slot = Some(event);
    }

    fn ensure_armed_current(&self) {
        {
            let slot = self.event.lock().expect("fork hub event slot poisoned");
            if slot.is_some() {
                return;
            }
        }
        let queue =
            current_loop().expect("waiting on a forked promise requires a running event loop");
        self.ensure_armed(&queue);
    }
}

fn fire<T: Clone + Send + 'static>(shared: &Arc<Mutex<HubState<T>>>, self_ref: &EventRef) {
    let mut state = shared.lock().expect("fork hub state poisoned");

    if !state.waiting {
        let ready = state
            .inner
            .as_mut()
            .expect("fork hub inner node missing")
            .on_ready(self_ref);
        if !ready {
            state.waiting = true;
            return;
        }
    }

    // The inner promise is ready: pull its result and release it.
    let mut inner = state.inner.take().expect("fork hub inner node missing");
    inner.get(&mut state.result);
    drop(inner);

    // Distribute readiness in registration order, then close the list.
    let branches = state.branches.take().unwrap_or_default();
    for cell in &branches {
        cell.signal(Schedule::Yield);
    }
}

/// One subscriber to a [`ForkHub`].
pub struct ForkBranch<T: Clone + Send + 'static> {
    hub: Option<Arc<ForkHub<T>>>,
    cell: Arc<ReadyCell>,
}

impl<T: Clone + Send + 'static> ForkBranch<T> {
    /// Registers a new branch on `hub`. If the hub has already
    /// distributed, the branch starts ready.
    #[must_use]
    pub fn new(hub: Arc<ForkHub<T>>) -> Self {
        let cell = {
            let mut state = hub.shared.lock().expect("fork hub state poisoned");
            match &mut state.branches {
                Some(list) => {
                    let cell = Arc::new(ReadyCell::new());
                    list.push(Arc::clone(&cell));
                    cell
                }
                None => Arc::new(ReadyCell::ready()),
            }
        };
        Self {
            hub: Some(hub),
            cell,
        }
    }
}

impl<T: Clone + Send + 'static> PromiseNode for ForkBranch<T> {
    type Output = T;

    fn on_ready(&mut self, event: &EventRef) -> bool {
        if let Some(hub) = &self.hub {
            hub.ensure_armed_current();
        }
        self.cell.register(event)
    }

    fn get(&mut self, output: &mut ErrorOr<T>) {
        let hub = self.hub.take().expect("branch result already delivered");
        {
            let state = hub.shared.lock().expect("fork hub state poisoned");
            if let Some(value) = &state.result.value {
                output.value = Some(value.clone());
            }
            if let Some(error) = &state.result.error {
                output.add_error(error.clone());
            }
        }
        // Release our hold on the hub; the hub's lifetime is the
        // longest-lived branch.
        drop(hub);
    }

    fn safe_event_loop(&self) -> Option<LoopRef> {
        // Reading the distributed result is safe from any thread.
        None
    }
}

impl<T: Clone + Send + 'static> Drop for ForkBranch<T> {
    fn drop(&mut self) {
        let Some(hub) = &self.hub else { return };
        // Unlink from a still-open list. Recover a poisoned lock: this
        // runs on unwind paths and must not panic again.
        let mut state = match hub.shared.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(list) = &mut state.branches {
            list.retain(|cell| !Arc::ptr_eq(cell, &self.cell));
        }
    }
}

/// The result of forking a promise. Hands out any number of branches,
/// each an independent promise for (a clone of) the same result.
pub struct ForkedPromise<T: Clone + Send + 'static> {
    hub: Arc<ForkHub<T>>,
}

impl<T: Clone + Send + 'static> ForkedPromise<T> {
    pub(crate) fn new(hub: Arc<ForkHub<T>>) -> Self {
        Self { hub }
    }

    /// Adds a branch equivalent to the original promise.
    #[must_use]
    pub fn add_branch(&self) -> Promise<T> {
        Promise::from_node(Box::new(ForkBranch::new(Arc::clone(&self.hub))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::event_loop::EventLoop;
    use crate::promise::Promise;

    #[test]
    fn two_branches_observe_the_same_value() {
        let event_loop = EventLoop::new();
        let forked = event_loop.fork_on(Promise::resolved(3));
        let a = forked.add_branch();
        let b = forked.add_branch();
        assert_eq!(event_loop.wait(a).expect("branch a"), 3);
        assert_eq!(event_loop.wait(b).expect("branch b"), 3);
    }

    #[test]
    fn late_branch_is_born_ready() {
        let event_loop = EventLoop::new();
        let forked = event_loop.fork_on(Promise::resolved(9));
        let early = forked.add_branch();
        assert_eq!(event_loop.wait(early).expect("early branch"), 9);
        // The hub has distributed and closed; this branch starts ready.
        let late = forked.add_branch();
        assert_eq!(event_loop.wait(late).expect("late branch"), 9);
    }

    #[test]
    fn error_fans_out_to_every_branch() {
        let event_loop = EventLoop::new();
        let forked = event_loop.fork_on(Promise::<u32>::rejected(Error::overloaded("shed")));
        let a = forked.add_branch();
        let b = forked.add_branch();
        assert!(event_loop.wait(a).expect_err("branch a").is_overloaded());
        assert!(event_loop.wait(b).expect_err("branch b").is_overloaded());
    }

    #[test]
    fn dropped_branch_unlinks_without_disturbing_the_rest() {
        let event_loop = EventLoop::new();
        let forked = event_loop.fork_on(Promise::resolved(5));
        let keep = forked.add_branch();
        let discard = forked.add_branch();
        drop(discard);
        assert_eq!(event_loop.wait(keep).expect("kept branch"), 5);
    }
}
