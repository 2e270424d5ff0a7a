//! Bounded row channel between two steps.
//!
//! A [`RowSet`] is the only state shared between step threads. `put` blocks
//! while the buffer is full (backpressure) and `get` blocks while it is
//! empty and not done. End of stream is `None`, never an error.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::row::Row;

/// Result of a `put` attempt that may give up.
#[derive(Debug, PartialEq)]
pub enum PutOutcome {
    /// The row is queued.
    Accepted,
    /// Still full when the timeout expired; the row is handed back.
    Full(Row),
    /// The set is done or aborted; the row was not queued.
    Closed,
}

/// Result of a `get` attempt that may give up.
#[derive(Debug, PartialEq)]
pub enum RowPoll {
    Row(Row),
    /// Nothing arrived before the timeout; the producer is still active.
    Empty,
    /// Done and drained.
    EndOfStream,
}

#[derive(Debug, Default)]
struct State {
    queue: VecDeque<Row>,
    done: bool,
    error: bool,
}

#[derive(Debug)]
struct Inner {
    origin: String,
    destination: String,
    capacity: usize,
    state: Mutex<State>,
    not_empty: Condvar,
    not_full: Condvar,
}

/// Shared handle to one producer → consumer buffer. Cloning shares the
/// same channel.
#[derive(Debug, Clone)]
pub struct RowSet {
    inner: Arc<Inner>,
}

impl RowSet {
    /// Create a channel holding at most `capacity` rows (minimum 1).
    pub fn new(origin: impl Into<String>, destination: impl Into<String>, capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                origin: origin.into(),
                destination: destination.into(),
                capacity: capacity.max(1),
                state: Mutex::new(State::default()),
                not_empty: Condvar::new(),
                not_full: Condvar::new(),
            }),
        }
    }

    pub fn origin(&self) -> &str {
        &self.inner.origin
    }

    pub fn destination(&self) -> &str {
        &self.inner.destination
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // A panicking step thread must not take the channel down with it.
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Queue a row, blocking while the buffer is full.
    ///
    /// Returns false when the set is done or aborted.
    pub fn put(&self, row: Row) -> bool {
        let mut state = self.lock();
        loop {
            if state.done || state.error {
                return false;
            }
            if state.queue.len() < self.inner.capacity {
                state.queue.push_back(row);
                self.inner.not_empty.notify_one();
                return true;
            }
            state = self
                .inner
                .not_full
                .wait(state)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }

    /// Queue a row, waiting at most `timeout` for space.
    pub fn put_timeout(&self, row: Row, timeout: Duration) -> PutOutcome {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        loop {
            if state.done || state.error {
                return PutOutcome::Closed;
            }
            if state.queue.len() < self.inner.capacity {
                state.queue.push_back(row);
                self.inner.not_empty.notify_one();
                return PutOutcome::Accepted;
            }
            let now = Instant::now();
            if now >= deadline {
                return PutOutcome::Full(row);
            }
            state = self
                .inner
                .not_full
                .wait_timeout(state, deadline - now)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|poisoned| poisoned.into_inner().0);
        }
    }

    /// Take the next row, blocking while empty and not done.
    pub fn get(&self) -> Option<Row> {
        let mut state = self.lock();
        loop {
            if state.error {
                return None;
            }
            if let Some(row) = state.queue.pop_front() {
                self.inner.not_full.notify_one();
                return Some(row);
            }
            if state.done {
                return None;
            }
            state = self
                .inner
                .not_empty
                .wait(state)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }

    /// Take the next row, waiting at most `timeout`.
    pub fn get_timeout(&self, timeout: Duration) -> RowPoll {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        loop {
            if state.error {
                return RowPoll::EndOfStream;
            }
            if let Some(row) = state.queue.pop_front() {
                self.inner.not_full.notify_one();
                return RowPoll::Row(row);
            }
            if state.done {
                return RowPoll::EndOfStream;
            }
            let now = Instant::now();
            if now >= deadline {
                return RowPoll::Empty;
            }
            state = self
                .inner
                .not_empty
                .wait_timeout(state, deadline - now)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|poisoned| poisoned.into_inner().0);
        }
    }

    /// Take a buffered row without waiting.
    pub fn get_immediate(&self) -> RowPoll {
        self.get_timeout(Duration::ZERO)
    }

    /// Signal that no more rows will be put. Idempotent.
    pub fn set_done(&self) {
        let mut state = self.lock();
        state.done = true;
        drop(state);
        self.inner.not_empty.notify_all();
        self.inner.not_full.notify_all();
    }

    /// Consumer side: stop reading and discard buffered rows. Blocked and
    /// future puts return false.
    pub fn close(&self) {
        let mut state = self.lock();
        state.done = true;
        state.queue.clear();
        drop(state);
        self.inner.not_empty.notify_all();
        self.inner.not_full.notify_all();
    }

    /// Mark the set as failed and release everyone waiting on it.
    pub fn abort(&self) {
        let mut state = self.lock();
        state.error = true;
        state.done = true;
        state.queue.clear();
        drop(state);
        self.inner.not_empty.notify_all();
        self.inner.not_full.notify_all();
    }

    pub fn size(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn is_done(&self) -> bool {
        self.lock().done
    }

    pub fn is_error(&self) -> bool {
        self.lock().error
    }
}
