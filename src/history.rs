use crate::instr::DecodedOperation;

use ringbuffer::{AllocRingBuffer, RingBuffer, RingBufferExt, RingBufferWrite};
use std::fmt;

///
/// One executed operation, recorded for post-mortem debugging.
///
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct HistoryEntry {
    pub pc: u32,
    pub opcode: Vec<u8>,
    pub text: String,
    pub cycles: u32,
}

impl HistoryEntry {
    pub fn new(op: &DecodedOperation, cycles: u32) -> HistoryEntry {
        HistoryEntry {
            pc: op.base_address(),
            opcode: op.opcode().to_vec(),
            text: op.display().to_owned(),
            cycles,
        }
    }
}

impl fmt::Display for HistoryEntry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let bytes: Vec<String> = self.opcode.iter().map(|b| format!("{:02x}", b)).collect();
        write!(
            f,
            "{:08x}:\t{:<20}\t{:<24}\t({})",
            self.pc,
            bytes.join(" "),
            self.text,
            self.cycles
        )
    }
}

/// A bounded trace of the most recent operations, oldest first.
pub struct History {
    entries: AllocRingBuffer<HistoryEntry>,
}

impl History {
    /// The ring buffer wants a power-of-two capacity, so `capacity` is
    /// rounded up to the next one.
    pub fn new(capacity: usize) -> History {
        History {
            entries: AllocRingBuffer::with_capacity(capacity.max(1).next_power_of_two()),
        }
    }

    pub fn push(&mut self, entry: HistoryEntry) {
        self.entries.push(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.entries.capacity()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.entries.iter()
    }

    pub fn last(&self) -> Option<&HistoryEntry> {
        self.entries.back()
    }
}

impl fmt::Debug for History {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}
