use std::collections::VecDeque;

use miette::Diagnostic;
use thiserror::Error;

/// Allocates monotonic 8-bit sequence numbers, wrapping mod 256.
#[derive(Debug, Clone)]
pub struct SequenceCounter {
    next: u8,
}

impl SequenceCounter {
    /// Creates a counter starting at `seed`.
    ///
    /// Callers usually seed this from [`rand::random`] so that stale
    /// responses from a previous session are unlikely to pair up.
    pub fn new(seed: u8) -> Self {
        Self { next: seed }
    }

    /// Returns the current sequence number and advances the counter.
    pub fn next_seq(&mut self) -> u8 {
        let seq = self.next;
        self.next = self.next.wrapping_add(1);
        seq
    }

    /// The sequence number the next [`next_seq`](Self::next_seq) call will
    /// return, without advancing the counter.
    pub fn peek(&self) -> u8 {
        self.next
    }
}

/// Errors of the re-order buffer.
#[derive(Error, Debug, Diagnostic)]
pub enum RobError {
    /// A sequence number outside the currently expected window was seen
    #[error("sequence number {sequence} is outside the expected window")]
    #[diagnostic(code(smp_client::rob::out_of_window))]
    OutOfWindow {
        /// the offending sequence number
        sequence: u8,
    },
}

#[derive(Debug)]
enum Slot<T> {
    Expected,
    Arrived(T),
}

/// Re-order buffer for pipelined SMP responses.
///
/// Requests may complete on the transport in any order; this buffer holds
/// completions back until every earlier request has completed, so that
/// [`drain`](ReorderBuffer::drain) hands results to the caller strictly in
/// dispatch order.
#[derive(Debug)]
pub struct ReorderBuffer<T> {
    /// sequence number of the oldest expected slot
    base: u8,
    slots: VecDeque<Slot<T>>,
}

impl<T> Default for ReorderBuffer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ReorderBuffer<T> {
    /// Creates an empty buffer.
    pub fn new() -> Self {
        Self {
            base: 0,
            slots: VecDeque::new(),
        }
    }

    /// Whether no slot is currently expected or buffered.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Number of slots still waiting for their result.
    pub fn outstanding(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| matches!(slot, Slot::Expected))
            .count()
    }

    /// Marks `sequence` as expected, before the request is dispatched.
    ///
    /// Slots must be registered contiguously; the window may not grow past
    /// 255 entries as that would make sequence numbers ambiguous.
    pub fn expecting(&mut self, sequence: u8) -> Result<(), RobError> {
        let next = self.base.wrapping_add(self.slots.len() as u8);
        if self.slots.len() >= u8::MAX as usize || sequence != next {
            return Err(RobError::OutOfWindow { sequence });
        }
        self.slots.push_back(Slot::Expected);
        Ok(())
    }

    /// Stores the result for `sequence`.
    ///
    /// Returns whether deliveries can now run, i.e. whether the oldest
    /// expected slot has its result.
    pub fn receive(&mut self, sequence: u8, value: T) -> Result<bool, RobError> {
        let index = usize::from(sequence.wrapping_sub(self.base));
        match self.slots.get_mut(index) {
            Some(slot @ Slot::Expected) => *slot = Slot::Arrived(value),
            // Unknown or duplicate sequence numbers both land here.
            _ => return Err(RobError::OutOfWindow { sequence }),
        }
        Ok(matches!(self.slots.front(), Some(Slot::Arrived(_))))
    }

    /// Delivers every contiguous arrived result starting at the oldest
    /// expected slot, in sequence order, and retires the delivered slots.
    ///
    /// Returns the number of delivered results.
    pub fn drain(&mut self, mut deliver: impl FnMut(u8, T)) -> usize {
        let mut delivered = 0;
        while matches!(self.slots.front(), Some(Slot::Arrived(_))) {
            let Some(Slot::Arrived(value)) = self.slots.pop_front() else {
                unreachable!()
            };
            deliver(self.base, value);
            self.base = self.base.wrapping_add(1);
            delivered += 1;
        }
        delivered
    }

    /// Drops all expected and buffered slots and restarts the window at
    /// `sequence`. Used when a transfer is abandoned.
    pub fn reset(&mut self, sequence: u8) {
        self.slots.clear();
        self.base = sequence;
    }
}
