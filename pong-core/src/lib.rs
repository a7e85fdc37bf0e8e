//! Broadcast discovery and sender/receiver negotiation, reference implementation.
//! Host-driven: no I/O; host passes transport events and receives actions.

pub mod config;
pub mod link;
pub mod peers;
pub mod protocol;
pub mod sequence;
pub mod wire;

pub use config::{ConfigError, SessionConfig};
pub use crate::core::{Action, Event, Mode, NegotiationEngine, Outbound};
pub use peers::{PeerRecord, PeerTable};
pub use protocol::{PacketHeader, PacketKind, PeerId, RoleState, HEADER_LEN, MAX_PACKET_LEN};
pub use sequence::SequenceAllocator;
pub use wire::{decode_packet, encode_packet, EncodeError, ParseError};

pub mod core;
