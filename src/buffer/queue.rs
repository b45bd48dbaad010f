use crate::domain::Event;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

/// Lock-protected FIFO of built events awaiting dispatch.
#[derive(Debug, Default)]
pub struct EventQueue {
    events: Mutex<VecDeque<Event>>,
    pushed: AtomicU64,
    drained: AtomicU64,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends at the tail and returns the length after the push.
    pub fn push(&self, event: Event) -> usize {
        let mut events = self.events.lock();
        events.push_back(event);
        self.pushed.fetch_add(1, Ordering::Relaxed);
        events.len()
    }

    /// Removes up to `max` events from the head in insertion order.
    pub fn drain_up_to(&self, max: usize) -> Vec<Event> {
        let mut events = self.events.lock();
        let count = max.min(events.len());
        let batch: Vec<Event> = events.drain(..count).collect();
        self.drained.fetch_add(batch.len() as u64, Ordering::Relaxed);
        batch
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    pub fn pushed(&self) -> u64 {
        self.pushed.load(Ordering::Relaxed)
    }

    pub fn drained(&self) -> u64 {
        self.drained.load(Ordering::Relaxed)
    }
}
