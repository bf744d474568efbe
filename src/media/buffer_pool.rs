// SPDX-License-Identifier: MPL-2.0

//! Pool of encoder input slots
//!
//! The codec backend announces free input slots on its callback thread;
//! the submitting thread takes one per sample. Both sides never block:
//! an empty pool means the sample is dropped.

use crate::media::codec::InputSlot;
use crossbeam_queue::SegQueue;

/// Lock-free FIFO of available [`InputSlot`]s
#[derive(Debug, Default)]
pub struct BufferIndexPool {
    slots: SegQueue<InputSlot>,
}

impl BufferIndexPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return a slot announced by the backend. Never blocks.
    pub fn offer(&self, slot: InputSlot) {
        self.slots.push(slot);
    }

    /// Take the oldest available slot, or `None` if the backend has none free
    pub fn try_acquire(&self) -> Option<InputSlot> {
        self.slots.pop()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Discard every pending slot, returning how many were dropped
    pub fn drain(&self) -> usize {
        let mut drained = 0;
        while self.slots.pop().is_some() {
            drained += 1;
        }
        drained
    }
}
