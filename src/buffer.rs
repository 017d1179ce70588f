//! Bounded, insertion-ordered view of recent detections.

use std::collections::VecDeque;

use crate::event::DetectionEvent;

/// Default number of detections kept for the operator.
pub const DEFAULT_CAPACITY: usize = 15;

/// FIFO-evicting buffer of the most recent detection events.
#[derive(Debug, Clone)]
pub struct DetectionBuffer {
    entries: VecDeque<DetectionEvent>,
    capacity: usize,
}

impl DetectionBuffer {
    /// Create a buffer holding at most `capacity` events (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append at the tail, evicting from the head past capacity.
    pub fn push(&mut self, event: DetectionEvent) {
        self.entries.push_back(event);
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Point-in-time copy, oldest first.
    pub fn snapshot(&self) -> Vec<DetectionEvent> {
        self.entries.iter().cloned().collect()
    }

    /// Texts only, oldest first.
    pub fn texts(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.text.clone()).collect()
    }

    pub fn get(&self, index: usize) -> Option<&DetectionEvent> {
        self.entries.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &DetectionEvent> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for DetectionBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
