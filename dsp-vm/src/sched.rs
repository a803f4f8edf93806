//! Cycle-based event scheduler.
//!
//! A deterministic timer wheel stand-in: callers register one pending
//! callback per event id at an absolute cycle deadline. Scheduling an id
//! that is already pending replaces the previous entry. During catch-up,
//! due events fire in the order they were scheduled.

use serde::{Deserialize, Serialize};

/// Event identities known to the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventId {
    /// A ucode command completion (the delay models hardware execution time).
    HleFinish,
    /// One I2S sample-clock period elapsed.
    I2sTick,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Entry {
    id: EventId,
    due: u64,
    seq: u64,
    param: u32,
}

#[derive(Debug, Clone, Default)]
pub struct Scheduler {
    now: u64,
    seq: u64,
    entries: Vec<Entry>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current cycle timestamp.
    pub fn now(&self) -> u64 {
        self.now
    }

    /// Register `id` to fire `delay` cycles from now, replacing any
    /// pending entry for the same id.
    pub fn schedule(&mut self, id: EventId, delay: u64, param: u32) {
        self.cancel(id);
        let entry = Entry {
            id,
            due: self.now + delay,
            seq: self.seq,
            param,
        };
        self.seq += 1;
        self.entries.push(entry);
    }

    pub fn cancel(&mut self, id: EventId) {
        self.entries.retain(|e| e.id != id);
    }

    pub fn is_scheduled(&self, id: EventId) -> bool {
        self.entries.iter().any(|e| e.id == id)
    }

    /// Remove and return the next event due at or before `target`,
    /// advancing the clock to its deadline. Ties fire in scheduling order.
    pub fn pop_due(&mut self, target: u64) -> Option<(EventId, u32)> {
        let idx = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.due <= target)
            .min_by_key(|(_, e)| (e.due, e.seq))
            .map(|(i, _)| i)?;
        let entry = self.entries.remove(idx);
        if entry.due > self.now {
            self.now = entry.due;
        }
        Some((entry.id, entry.param))
    }

    /// Advance the clock to `target` once all due events are drained.
    pub fn advance(&mut self, target: u64) {
        if target > self.now {
            self.now = target;
        }
    }

    // Snapshot support

    pub fn snapshot_entries(&self) -> Vec<(EventId, u64, u64, u32)> {
        self.entries
            .iter()
            .map(|e| (e.id, e.due, e.seq, e.param))
            .collect()
    }

    pub fn restore(&mut self, now: u64, seq: u64, entries: &[(EventId, u64, u64, u32)]) {
        self.now = now;
        self.seq = seq;
        self.entries = entries
            .iter()
            .map(|&(id, due, seq, param)| Entry { id, due, seq, param })
            .collect();
    }

    pub fn snapshot_seq(&self) -> u64 {
        self.seq
    }
}
