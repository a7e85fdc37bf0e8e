//! Known-peer table: every device heard broadcasting during this session.

use std::collections::HashMap;

use crate::protocol::PeerId;

/// What the session remembers about one peer. Records are never removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerRecord {
    pub id: PeerId,
    /// Packets decoded from this peer so far.
    pub packets: u64,
}

/// Tracks known peers. Owned by the negotiation engine; not shared across threads.
#[derive(Debug, Default)]
pub struct PeerTable {
    records: HashMap<PeerId, PeerRecord>,
}

impl PeerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a peer. Returns true only the first time a given id is seen.
    /// The broadcast address is never a peer.
    pub fn insert(&mut self, id: PeerId) -> bool {
        if id.is_broadcast() || self.records.contains_key(&id) {
            return false;
        }
        self.records.insert(id, PeerRecord { id, packets: 0 });
        true
    }

    /// Count a decoded packet from a known peer. Unknown peers are ignored.
    pub fn record_packet(&mut self, id: &PeerId) {
        if let Some(r) = self.records.get_mut(id) {
            r.packets = r.packets.saturating_add(1);
        }
    }

    pub fn contains(&self, id: &PeerId) -> bool {
        self.records.contains_key(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PeerRecord> {
        self.records.values()
    }

    /// Decoded packets across every known peer.
    pub fn total_packets(&self) -> u64 {
        self.records.values().map(|r| r.packets).sum()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
