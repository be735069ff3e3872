//! Bounded in-memory event queue
//!
//! The queue is append-only between flushes. A flush swaps the whole
//! contents out with [`EventQueue::drain`]; a failed flush hands the batch
//! back through [`EventQueue::requeue`], which puts it in front of anything
//! recorded while the batch was in flight.
//!
//! The queue never holds more than its capacity. When an append or a requeue
//! overflows, the oldest events are dropped and the count is returned so
//! the caller can log it.

use std::collections::VecDeque;

use crate::types::Event;

#[derive(Debug)]
pub struct EventQueue {
    events: VecDeque<Event>,
    capacity: usize,
}

impl EventQueue {
    /// Create an empty queue holding at most `capacity` events (min 1)
    pub fn new(capacity: usize) -> Self {
        Self {
            events: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// Append an event, returning how many old events were dropped to make room.
    pub fn push(&mut self, event: Event) -> usize {
        self.events.push_back(event);
        self.enforce_capacity()
    }

    /// Take every queued event, leaving the queue empty.
    pub fn drain(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.events).into()
    }

    /// Put an undelivered batch back in front of the events queued since it
    /// was drained. Returns the number of events dropped by the bound.
    pub fn requeue(&mut self, batch: Vec<Event>) -> usize {
        if batch.is_empty() {
            return 0;
        }
        let newer = std::mem::take(&mut self.events);
        let mut restored: VecDeque<Event> = batch.into();
        restored.extend(newer);
        self.events = restored;
        self.enforce_capacity()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn iter(&self) -> impl Iterator<Item = &Event> {
        self.events.iter()
    }

    fn enforce_capacity(&mut self) -> usize {
        let overflow = self.events.len().saturating_sub(self.capacity);
        if overflow > 0 {
            self.events.drain(..overflow);
        }
        overflow
    }
}
