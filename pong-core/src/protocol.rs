//! Negotiation wire protocol: link addresses, packet kinds, role state, header fields.

use std::fmt;

use rand::RngCore;

/// Fixed header size: kind(1) + role_state(1) + sequence(2) + checksum(2) + session_magic(4).
pub const HEADER_LEN: usize = 10;

/// Largest packet the datagram transport will carry.
pub const MAX_PACKET_LEN: usize = 250;

/// Link-layer address of a device (6 bytes, same shape as a radio MAC).
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct PeerId([u8; 6]);

impl PeerId {
    /// All-ones address; packets sent here reach every device on the channel.
    pub const BROADCAST: PeerId = PeerId([0xff; 6]);

    pub const fn from_bytes(bytes: [u8; 6]) -> Self {
        PeerId(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }

    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }

    /// Random locally-administered unicast address.
    pub fn random() -> Self {
        let mut bytes = [0u8; 6];
        rand::thread_rng().fill_bytes(&mut bytes);
        bytes[0] = (bytes[0] | 0x02) & !0x01;
        PeerId(bytes)
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

/// Packet class. Chosen by the sender from the destination address.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum PacketKind {
    Broadcast,
    Unicast,
}

impl PacketKind {
    pub fn for_dest(dest: PeerId) -> Self {
        if dest.is_broadcast() {
            PacketKind::Broadcast
        } else {
            PacketKind::Unicast
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            PacketKind::Broadcast => 0,
            PacketKind::Unicast => 1,
        }
    }

    pub fn from_u8(b: u8) -> Option<Self> {
        match b {
            0 => Some(PacketKind::Broadcast),
            1 => Some(PacketKind::Unicast),
            _ => None,
        }
    }

    pub(crate) fn index(self) -> usize {
        self.as_u8() as usize
    }
}

/// Whether a device has seen another device's broadcast yet.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Default)]
pub enum RoleState {
    #[default]
    NoPeerSeen,
    PeerSeen,
}

impl RoleState {
    pub fn as_u8(self) -> u8 {
        match self {
            RoleState::NoPeerSeen => 0,
            RoleState::PeerSeen => 1,
        }
    }

    pub fn from_u8(b: u8) -> Option<Self> {
        match b {
            0 => Some(RoleState::NoPeerSeen),
            1 => Some(RoleState::PeerSeen),
            _ => None,
        }
    }
}

/// Header fields carried by every packet. The checksum and filler are codec details.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct PacketHeader {
    pub kind: PacketKind,
    pub role_state: RoleState,
    pub sequence: u16,
    /// Per-session tie-break key. Not a credential.
    pub session_magic: u32,
}
