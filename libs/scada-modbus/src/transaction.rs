//! Transaction identifier allocation

/// Source of MBAP transaction identifiers
///
/// Implementations must never hand out 0. Identifiers only need to be unique
/// among the transactions still waiting for a confirmation, so a client may
/// plug in any allocation policy (random, per-device ranges, scripted ids in
/// tests) as long as that holds.
pub trait TransactionIdGenerator: Send {
    /// Return the current identifier and advance
    fn next_id(&mut self) -> u16;

    /// Restart the sequence
    fn reset(&mut self);
}

/// Cyclic sequence `start, start + 1, ..., 0xFFFF, start, ...`
#[derive(Debug, Clone)]
pub struct SequenceGenerator {
    start: u16,
    sequence: u16,
}

impl SequenceGenerator {
    /// A `start` of 0 is bumped to 1 since 0 is never issued
    pub fn new(start: u16) -> Self {
        let start = start.max(1);
        Self {
            start,
            sequence: start,
        }
    }

    pub fn start(&self) -> u16 {
        self.start
    }
}

impl Default for SequenceGenerator {
    fn default() -> Self {
        Self::new(1)
    }
}

impl TransactionIdGenerator for SequenceGenerator {
    fn next_id(&mut self) -> u16 {
        let id = self.sequence;

        if self.sequence == u16::MAX {
            self.reset();
        } else {
            self.sequence += 1;
        }

        id
    }

    fn reset(&mut self) {
        self.sequence = self.start;
    }
}
