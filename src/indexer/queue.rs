//! A bounded-free, blocking single-producer/single-consumer queue with a
//! broadcastable stop signal, matching the queue semantics in §4.3/§5.

use crate::types::Timestamp;
use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

struct QueueState<T> {
    items: VecDeque<T>,
    stopped: bool,
}

pub struct ConcurrentQueue<T> {
    state: Mutex<QueueState<T>>,
    cond: Condvar,
}

impl<T> Default for ConcurrentQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ConcurrentQueue<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                stopped: false,
            }),
            cond: Condvar::new(),
        }
    }

    pub fn push(&self, item: T) {
        let mut state = self.state.lock().unwrap();
        state.items.push_back(item);
        self.cond.notify_one();
    }

    /// Blocks until an item is available or the queue is stopped. Returns
    /// `false` if it woke up because of a stop with nothing left to drain.
    pub fn wait_for_element(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        loop {
            if !state.items.is_empty() {
                return true;
            }
            if state.stopped {
                return false;
            }
            state = self.cond.wait(state).unwrap();
        }
    }

    /// Blocking pop. Returns `None` once the queue is stopped and drained.
    pub fn pop(&self) -> Option<T> {
        let mut state = self.state.lock().unwrap();
        loop {
            if let Some(item) = state.items.pop_front() {
                return Some(item);
            }
            if state.stopped {
                return None;
            }
            state = self.cond.wait(state).unwrap();
        }
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().unwrap().items.is_empty()
    }

    pub fn is_stopped(&self) -> bool {
        self.state.lock().unwrap().stopped
    }

    pub fn stop(&self) {
        let mut state = self.state.lock().unwrap();
        state.stopped = true;
        self.cond.notify_all();
    }
}

/// Anything the sorter mesh needs to order by — kept separate from
/// `IndexerItem` so the queue and sorter don't need to know about
/// `Packet` directly.
pub trait Timestamped {
    fn timestamp(&self) -> Timestamp;
}

impl<T> ConcurrentQueue<T>
where
    T: Timestamped,
{
    /// Reads the timestamp of the front element without removing it.
    /// Valid only when there is a single consumer (true for every queue
    /// in the mesh: each is owned by exactly one sorter or indexer node).
    pub fn front_timestamp(&self) -> Option<Timestamp> {
        let state = self.state.lock().unwrap();
        state.items.front().map(|i| i.timestamp())
    }
}
