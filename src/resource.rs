//! Counting slot semaphore gating concurrent tape drive use.
//!
//! A `Resource` hands out 0-based slot numbers; the engine indexes its drive
//! table with the slot it reserved, which guarantees at most one tape per
//! drive. `reserve` blocks until a slot is free.

use std::sync::{Condvar, Mutex};
use tracing::debug;

pub struct Resource {
    slots: Mutex<ResourceState>,
    available: Condvar,
}

struct ResourceState {
    in_use: Vec<bool>,
    stopped: bool,
}

impl Resource {
    pub fn new(concurrent: usize) -> Self {
        Self {
            slots: Mutex::new(ResourceState {
                in_use: vec![false; concurrent],
                stopped: false,
            }),
            available: Condvar::new(),
        }
    }

    /// Block until a slot is free and return its number.
    pub fn reserve(&self) -> usize {
        let mut state = self.slots.lock().unwrap();
        loop {
            if state.stopped {
                panic!("reserve on a stopped resource manager");
            }
            if let Some(slot) = state.in_use.iter().position(|used| !used) {
                state.in_use[slot] = true;
                debug!("reserved drive slot {}", slot);
                return slot;
            }
            state = self.available.wait(state).unwrap();
        }
    }

    /// Return a slot obtained from `reserve`.
    pub fn release(&self, slot: usize) {
        let mut state = self.slots.lock().unwrap();
        assert!(state.in_use[slot], "releasing a slot that is not reserved");
        state.in_use[slot] = false;
        debug!("released drive slot {}", slot);
        self.available.notify_one();
    }

    /// Tear the manager down; any later reserve is a programming error.
    pub fn stop(&self) {
        let mut state = self.slots.lock().unwrap();
        state.stopped = true;
        self.available.notify_all();
    }
}
