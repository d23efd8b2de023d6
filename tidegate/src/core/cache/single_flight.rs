//! Miss collapsing
//!
//! Concurrent cache misses for one key run the computation once: the first
//! caller becomes the leader and computes; everyone else blocks on the slot
//! until the leader publishes the serialized result or its error.

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex};

pub(crate) struct SingleFlight {
    slots: Mutex<HashMap<String, Arc<Slot>>>,
}

pub(crate) struct Slot {
    result: Mutex<Option<Result<Vec<u8>, String>>>,
    ready: Condvar,
}

pub(crate) enum Flight {
    /// This caller computes and must call [`SingleFlight::complete`].
    Leader(Arc<Slot>),
    /// Another caller is computing; wait on the slot.
    Follower(Arc<Slot>),
}

impl SingleFlight {
    pub(crate) fn new() -> Self {
        SingleFlight {
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Join the in-flight computation for a key, creating it if absent.
    pub(crate) fn join(&self, key: &str) -> Flight {
        let mut slots = lock_unpoisoned(&self.slots);
        if let Some(slot) = slots.get(key) {
            return Flight::Follower(Arc::clone(slot));
        }
        let slot = Arc::new(Slot {
            result: Mutex::new(None),
            ready: Condvar::new(),
        });
        slots.insert(key.to_string(), Arc::clone(&slot));
        Flight::Leader(slot)
    }

    /// Publish the leader's result and release followers.
    ///
    /// The compute closure is expected to return rather than panic; a leader
    /// that unwinds without completing leaves followers blocked, which is why
    /// cancellation and timeouts belong to the caller of the computation.
    pub(crate) fn complete(&self, key: &str, slot: &Arc<Slot>, result: Result<Vec<u8>, String>) {
        {
            let mut guard = lock_unpoisoned(&slot.result);
            *guard = Some(result);
        }
        slot.ready.notify_all();
        lock_unpoisoned(&self.slots).remove(key);
    }
}

impl Slot {
    /// Block until the leader publishes, then take a copy of the result.
    pub(crate) fn wait(&self) -> Result<Vec<u8>, String> {
        let mut guard = lock_unpoisoned(&self.result);
        loop {
            if let Some(result) = guard.as_ref() {
                return result.clone();
            }
            guard = match self.ready.wait(guard) {
                Ok(next) => next,
                Err(poisoned) => poisoned.into_inner(),
            };
        }
    }
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
