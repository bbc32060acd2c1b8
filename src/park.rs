//! Park/unpark primitives for a sleeping event loop.
//!
//! The loop parks in two steps: `prepare_to_sleep` is called while the
//! queue lock is still held, then `sleep` after it is released. A `wake`
//! that lands between the two must make the subsequent `sleep` return
//! immediately; a `wake` with no prepared sleeper is a cheap no-op.

/// Blocking primitive used by an event loop when its queue drains.
///
/// `prepare_to_sleep` is always followed by exactly one `sleep`. `wake`
/// may be called from any thread, any number of times.
pub trait Park: Send + Sync {
    /// Announces that the owning thread is about to sleep.
    fn prepare_to_sleep(&self);

    /// Blocks until a `wake` that happened after the last
    /// `prepare_to_sleep`.
    fn sleep(&self);

    /// Cancels a prepared or in-progress sleep. No-op otherwise.
    fn wake(&self);
}

/// The default parker, built on `parking_lot` (futex-backed on Linux).
#[derive(Debug, Default)]
pub struct FutexPark {
    prepared: parking_lot::Mutex<bool>,
    condvar: parking_lot::Condvar,
}

impl FutexPark {
    /// Creates a new parker in the awake state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Park for FutexPark {
    fn prepare_to_sleep(&self) {
        *self.prepared.lock() = true;
    }

    fn sleep(&self) {
        let mut prepared = self.prepared.lock();
        while *prepared {
            self.condvar.wait(&mut prepared);
        }
    }

    fn wake(&self) {
        let mut prepared = self.prepared.lock();
        if *prepared {
            // A sleep is prepared or in progress on the owning thread.
            *prepared = false;
            self.condvar.notify_one();
        }
    }
}

/// Portable parker built on `std::sync::{Mutex, Condvar}`.
#[derive(Debug, Default)]
pub struct CondvarPark {
    prepared: std::sync::Mutex<bool>,
    condvar: std::sync::Condvar,
}

impl CondvarPark {
    /// Creates a new parker in the awake state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, bool> {
        match self.prepared.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Park for CondvarPark {
    fn prepare_to_sleep(&self) {
        *self.lock() = true;
    }

    fn sleep(&self) {
        let mut prepared = self.lock();
        while *prepared {
            prepared = match self.condvar.wait(prepared) {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
        }
    }

    fn wake(&self) {
        let mut prepared = self.lock();
        if *prepared {
            *prepared = false;
            self.condvar.notify_one();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn exercise(park: Arc<dyn Park>) {
        // Wake before prepare is a no-op; sleep after prepare still blocks
        // until the next wake.
        park.wake();
        park.prepare_to_sleep();

        let waker = Arc::clone(&park);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            waker.wake();
        });

        park.sleep();
        handle.join().expect("waker thread panicked");
    }

    #[test]
    fn futex_park_wakes_sleeper() {
        exercise(Arc::new(FutexPark::new()));
    }

    #[test]
    fn condvar_park_wakes_sleeper() {
        exercise(Arc::new(CondvarPark::new()));
    }

    #[test]
    fn wake_between_prepare_and_sleep_is_not_lost() {
        let park = FutexPark::new();
        park.prepare_to_sleep();
        park.wake();
        // Must return immediately instead of blocking.
        park.sleep();
    }
}
