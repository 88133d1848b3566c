//! Pipeline lifecycle — Created → Started → Stopping → Stopped.
//!
//! The state lives in one atomic. Every transition is a compare-and-set,
//! so each edge is taken at most once no matter how many callers race.
//! `Stopping` is the only signal the network sender looks at from outside
//! its own task.

use std::sync::atomic::{AtomicU8, Ordering};

use tokio::sync::Notify;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum State {
    Created = 0,
    Started = 1,
    Stopping = 2,
    Stopped = 3,
}

impl State {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => State::Created,
            1 => State::Started,
            2 => State::Stopping,
            _ => State::Stopped,
        }
    }
}

#[derive(Debug)]
pub struct Lifecycle {
    state: AtomicU8,
    changed: Notify,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(State::Created as u8),
            changed: Notify::new(),
        }
    }

    pub fn state(&self) -> State {
        State::from_u8(self.state.load(Ordering::Acquire))
    }

    /// True once a stop has been requested.
    pub fn is_stopping(&self) -> bool {
        self.state() >= State::Stopping
    }

    /// Created → Started. False if the pipeline was already started or stopped.
    pub fn start(&self) -> bool {
        self.transition(State::Created, State::Started)
    }

    /// Move to Stopping from Created or Started.
    ///
    /// Returns the state this caller moved away from, or `None` if another
    /// caller already requested the stop.
    pub fn stop(&self) -> Option<State> {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            let from = State::from_u8(current);
            if from >= State::Stopping {
                return None;
            }
            match self.state.compare_exchange_weak(
                current,
                State::Stopping as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    self.changed.notify_waiters();
                    return Some(from);
                }
                Err(actual) => current = actual,
            }
        }
    }

    /// Stopping → Stopped, once every worker has exited.
    pub fn mark_stopped(&self) -> bool {
        self.transition(State::Stopping, State::Stopped)
    }

    /// Resolve once the state is at least `target`.
    pub async fn reached(&self, target: State) {
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            // Register before checking so a transition in between is not lost
            notified.as_mut().enable();
            if self.state() >= target {
                return;
            }
            notified.await;
        }
    }

    /// Resolve once a stop has been requested.
    pub async fn stopping(&self) {
        self.reached(State::Stopping).await
    }

    fn transition(&self, from: State, to: State) -> bool {
        let moved = self
            .state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if moved {
            self.changed.notify_waiters();
        }
        moved
    }
}
