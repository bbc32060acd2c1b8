//! Eventide: a promise-graph execution core on a cooperative event loop.
//!
//! # Overview
//!
//! Eventide evaluates graphs of deferred computations. Client code builds
//! a tree (a DAG, once forked) of promise nodes; an [`EventLoop`] drives
//! the graph on a single thread, firing queued events in causally
//! meaningful order until the awaited promise is ready. Completions may
//! arrive from other threads, such as another loop or an I/O callback,
//! and are funnelled in through cross-thread and adapter nodes without
//! disturbing the loop's deterministic ordering.
//!
//! # Core Guarantees
//!
//! - **Deterministic ordering**: events armed while another event fires
//!   run next, in arming order; yielded and cross-thread events are FIFO
//! - **Safe cancellation**: dropping a promise tears down its pipeline,
//!   and destruction races safely with a concurrent fire
//! - **No lost failures**: continuation panics become errors, secondary
//!   errors are logged, and a fork delivers its error to every branch
//! - **Single-threaded execution**: each loop runs on exactly one thread;
//!   there is no work stealing
//!
//! # Module Structure
//!
//! - [`error`]: Error type and the value-or-error result slot
//! - [`node`]: The promise-node abstraction and immediate nodes
//! - [`event`]: Events and the per-loop event queue
//! - [`park`]: Park/unpark primitives for a sleeping loop
//! - [`event_loop`]: The loop itself: `wait`, `eval_later`, eager evaluation
//! - [`transform`]: The node behind `then`
//! - [`chain`]: Flattening for continuations that return promises
//! - [`fork`]: One-to-many fan-out
//! - [`cross_thread`]: Importing promises across loops
//! - [`adapter`]: Externally-driven promises and the fulfiller handle
//! - [`promise`]: The user-facing `Promise` type
//! - [`test_utils`]: Logging bootstrap and assertion macros for tests
//!
//! # Example
//!
//! ```
//! use eventide::{EventLoop, Promise};
//!
//! let event_loop = EventLoop::new();
//! let promise = Promise::resolved(7).then(|x| x * 2);
//! assert_eq!(event_loop.wait(promise).unwrap(), 14);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::doc_markdown)]

pub mod adapter;
pub mod chain;
pub mod cross_thread;
pub mod error;
pub mod event;
pub mod event_loop;
pub mod fork;
pub mod node;
pub mod park;
pub mod promise;
pub mod test_utils;
pub mod transform;

pub use adapter::{promise_and_fulfiller, Fulfiller};
pub use error::{Error, ErrorKind, ErrorOr, Result};
pub use event::{Event, EventQueue, EventRef, Schedule};
pub use event_loop::EventLoop;
pub use fork::ForkedPromise;
pub use node::{LoopRef, NodeBox, PromiseNode};
pub use park::{CondvarPark, FutexPark, Park};
pub use promise::Promise;
