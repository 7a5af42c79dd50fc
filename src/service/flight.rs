//! Single-flight coordination.
//!
//! Concurrent cache misses for the same request key must not each fetch and
//! transform the source. The first caller becomes the *leader* and does the
//! work; later callers become *waiters* and receive a clone of the leader's
//! result.
//!
//! If a leader is dropped without completing (its request was cancelled),
//! its waiters are woken with no result and join again, so one of them takes
//! over.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;

/// Shared state of one in-flight generation.
struct FlightState<T> {
    /// Notification for waiters
    notify: Notify,
    /// Result of the generation (set before `done`)
    result: Mutex<Option<T>>,
    /// Set once the leader finished or gave up
    done: AtomicBool,
}

impl<T: Clone> FlightState<T> {
    fn new() -> Self {
        Self {
            notify: Notify::new(),
            result: Mutex::new(None),
            done: AtomicBool::new(false),
        }
    }

    fn result(&self) -> Option<T> {
        lock(&self.result).clone()
    }
}

fn lock<V>(mutex: &Mutex<V>) -> MutexGuard<'_, V> {
    // state stays consistent even if a holder panicked
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Table of in-flight generations keyed by request key.
pub struct SingleFlight<T> {
    in_flight: Mutex<HashMap<String, Arc<FlightState<T>>>>,
}

/// What a caller of [`SingleFlight::join`] should do.
pub enum Role<'a, T: Clone> {
    /// Do the work, then call [`Leader::complete`]
    Leader(Leader<'a, T>),
    /// Wait for the current leader
    Waiter(Waiter<T>),
}

impl<T: Clone> SingleFlight<T> {
    pub fn new() -> Self {
        Self {
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Join the flight for `key`, becoming its leader if none is running.
    pub fn join(&self, key: &str) -> Role<'_, T> {
        let mut in_flight = lock(&self.in_flight);
        if let Some(state) = in_flight.get(key) {
            return Role::Waiter(Waiter {
                state: state.clone(),
            });
        }

        let state = Arc::new(FlightState::new());
        in_flight.insert(key.to_string(), state.clone());
        Role::Leader(Leader {
            flights: self,
            key: key.to_string(),
            state,
        })
    }

    /// Number of keys currently being generated.
    pub fn in_flight(&self) -> usize {
        lock(&self.in_flight).len()
    }
}

impl<T: Clone> Default for SingleFlight<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Leadership of one flight. Dropping it releases the key.
pub struct Leader<'a, T: Clone> {
    flights: &'a SingleFlight<T>,
    key: String,
    state: Arc<FlightState<T>>,
}

impl<T: Clone> Leader<'_, T> {
    /// Publish the result to every waiter and release the key.
    pub fn complete(self, value: T) {
        *lock(&self.state.result) = Some(value);
        // Drop wakes the waiters
    }
}

impl<T: Clone> Drop for Leader<'_, T> {
    fn drop(&mut self) {
        self.state.done.store(true, Ordering::Release);
        {
            let mut in_flight = lock(&self.flights.in_flight);
            if in_flight
                .get(&self.key)
                .is_some_and(|s| Arc::ptr_eq(s, &self.state))
            {
                in_flight.remove(&self.key);
            }
        }
        self.state.notify.notify_waiters();
    }
}

/// Handle for waiting on another caller's flight.
pub struct Waiter<T> {
    state: Arc<FlightState<T>>,
}

impl<T: Clone> Waiter<T> {
    /// Wait for the leader.
    ///
    /// Returns `None` when the leader gave up without a result; the caller
    /// should join again.
    pub async fn wait(self) -> Option<T> {
        let notified = self.state.notify.notified();
        tokio::pin!(notified);
        // register before checking `done` so a completion in between is not lost
        notified.as_mut().enable();

        if !self.state.done.load(Ordering::Acquire) {
            notified.await;
        }
        self.state.result()
    }
}
