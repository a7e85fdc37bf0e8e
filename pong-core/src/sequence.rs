//! Per-kind sequence counters stamped on outgoing packets.

use crate::protocol::PacketKind;

/// Two independent wrapping counters, one per [`PacketKind`].
/// Sequence numbers are for logging only; nothing deduplicates on them.
#[derive(Debug, Default, Clone)]
pub struct SequenceAllocator {
    counters: [u16; 2],
}

impl SequenceAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the current value for `kind` and advance it (wrapping at `u16::MAX`).
    pub fn next(&mut self, kind: PacketKind) -> u16 {
        let slot = &mut self.counters[kind.index()];
        let value = *slot;
        *slot = value.wrapping_add(1);
        value
    }
}
