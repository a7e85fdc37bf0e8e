//! Framing: fixed 10-byte little-endian header, random filler up to the session packet
//! length, CRC-16 over the whole packet with the checksum field zeroed.

use rand::RngCore;

use crate::protocol::{PacketHeader, PacketKind, RoleState, HEADER_LEN, MAX_PACKET_LEN};

const KIND_OFFSET: usize = 0;
const ROLE_OFFSET: usize = 1;
const SEQ_OFFSET: usize = 2;
const CRC_OFFSET: usize = 4;
const MAGIC_OFFSET: usize = 6;

/// Seed passed to [`crc16_le`] for every packet.
pub const CRC_SEED: u16 = u16::MAX;

/// Reflected CRC-16/CCITT (poly 0x1021, processed LSB first as 0x8408).
/// The seed is inverted on entry and the result inverted on exit, so a previous
/// result can be passed back in as the seed to continue a running checksum.
pub fn crc16_le(seed: u16, bytes: &[u8]) -> u16 {
    let mut crc = !seed;
    for &b in bytes {
        crc ^= b as u16;
        for _ in 0..8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ 0x8408;
            } else {
                crc >>= 1;
            }
        }
    }
    !crc
}

/// Encode a packet of exactly `len` bytes. Filler after the header is drawn from `rng`.
pub fn encode_packet<R: RngCore + ?Sized>(
    header: &PacketHeader,
    len: usize,
    rng: &mut R,
) -> Result<Vec<u8>, EncodeError> {
    if !(HEADER_LEN..=MAX_PACKET_LEN).contains(&len) {
        return Err(EncodeError::LengthOutOfRange(len));
    }
    let mut out = vec![0u8; len];
    out[KIND_OFFSET] = header.kind.as_u8();
    out[ROLE_OFFSET] = header.role_state.as_u8();
    out[SEQ_OFFSET..SEQ_OFFSET + 2].copy_from_slice(&header.sequence.to_le_bytes());
    out[MAGIC_OFFSET..MAGIC_OFFSET + 4].copy_from_slice(&header.session_magic.to_le_bytes());
    rng.fill_bytes(&mut out[HEADER_LEN..]);
    let crc = crc16_le(CRC_SEED, &out);
    out[CRC_OFFSET..CRC_OFFSET + 2].copy_from_slice(&crc.to_le_bytes());
    Ok(out)
}

/// Error encoding a packet.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EncodeError {
    #[error("packet length {0} outside 10..=250")]
    LengthOutOfRange(usize),
}

/// Decode and verify a packet. The filler is checksummed but not returned.
pub fn decode_packet(bytes: &[u8]) -> Result<PacketHeader, ParseError> {
    if bytes.len() < HEADER_LEN {
        return Err(ParseError::TooShort(bytes.len()));
    }
    let embedded = u16::from_le_bytes([bytes[CRC_OFFSET], bytes[CRC_OFFSET + 1]]);
    let mut scratch = bytes.to_vec();
    scratch[CRC_OFFSET] = 0;
    scratch[CRC_OFFSET + 1] = 0;
    let computed = crc16_le(CRC_SEED, &scratch);
    if computed != embedded {
        return Err(ParseError::ChecksumMismatch { embedded, computed });
    }

    let kind = PacketKind::from_u8(bytes[KIND_OFFSET])
        .ok_or(ParseError::UnknownKind(bytes[KIND_OFFSET]))?;
    let role_state = RoleState::from_u8(bytes[ROLE_OFFSET])
        .ok_or(ParseError::InvalidRoleState(bytes[ROLE_OFFSET]))?;
    let sequence = u16::from_le_bytes([bytes[SEQ_OFFSET], bytes[SEQ_OFFSET + 1]]);
    let session_magic = u32::from_le_bytes([
        bytes[MAGIC_OFFSET],
        bytes[MAGIC_OFFSET + 1],
        bytes[MAGIC_OFFSET + 2],
        bytes[MAGIC_OFFSET + 3],
    ]);
    Ok(PacketHeader {
        kind,
        role_state,
        sequence,
        session_magic,
    })
}

/// Error decoding a received packet. Always non-fatal: the packet is discarded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("packet too short ({0} bytes)")]
    TooShort(usize),
    #[error("checksum mismatch (embedded {embedded:#06x}, computed {computed:#06x})")]
    ChecksumMismatch { embedded: u16, computed: u16 },
    #[error("unknown packet kind {0}")]
    UnknownKind(u8),
    #[error("invalid role state {0}")]
    InvalidRoleState(u8),
}
