//! Captured loop history
//!
//! A bounded stack of captured loops. The most recently pushed loop is the
//! active one; undo pops it and re-activates the one below.

use std::collections::VecDeque;

use crate::note::NoteEvent;

/// Default number of loops remembered for undo.
pub const DEFAULT_HISTORY_CAPACITY: usize = 10;

/// A captured loop: notes ordered by onset, the first at 0.0.
pub type Loop = Vec<NoteEvent>;

/// Bounded FIFO of captured loops.
#[derive(Debug, Clone)]
pub struct LoopHistory {
    loops: VecDeque<Loop>,
    capacity: usize,
}

impl Default for LoopHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

impl LoopHistory {
    /// Create an empty history holding at most `capacity` loops (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            loops: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Push a loop and make it active, evicting the oldest one when full.
    pub fn push(&mut self, captured: Loop) {
        if self.loops.len() == self.capacity {
            self.loops.pop_front();
        }
        self.loops.push_back(captured);
    }

    /// Remove the active loop. Returns it, or `None` if the history was empty.
    pub fn pop(&mut self) -> Option<Loop> {
        self.loops.pop_back()
    }

    /// The active loop, if any.
    pub fn active(&self) -> Option<&[NoteEvent]> {
        self.loops.back().map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.loops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loops.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.loops.clear();
    }
}
