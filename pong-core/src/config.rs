//! Session parameters. Built once by the host and passed in; the core reads no globals.

use std::time::Duration;

use serde::Deserialize;

use crate::protocol::{HEADER_LEN, MAX_PACKET_LEN};

/// Immutable per-session configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionConfig {
    /// Total length of every packet sent this session (header + filler).
    pub packet_len: usize,
    /// Unicast packets to send after election before stopping.
    pub send_count: u32,
    /// Pause before each follow-up send, in milliseconds.
    pub send_delay_ms: u64,
    /// Pause before the first broadcast, in milliseconds.
    pub start_delay_ms: u64,
    /// Event bridge capacity.
    pub queue_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            packet_len: HEADER_LEN,
            send_count: 100,
            send_delay_ms: 1000,
            start_delay_ms: 5000,
            queue_capacity: 6,
        }
    }
}

impl SessionConfig {
    pub fn send_delay(&self) -> Duration {
        Duration::from_millis(self.send_delay_ms)
    }

    pub fn start_delay(&self) -> Duration {
        Duration::from_millis(self.start_delay_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(HEADER_LEN..=MAX_PACKET_LEN).contains(&self.packet_len) {
            return Err(ConfigError::PacketLen(self.packet_len));
        }
        if self.send_count == 0 {
            return Err(ConfigError::ZeroSendCount);
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::ZeroQueueCapacity);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("packet_len {0} outside 10..=250")]
    PacketLen(usize),
    #[error("send_count must be at least 1")]
    ZeroSendCount,
    #[error("queue_capacity must be at least 1")]
    ZeroQueueCapacity,
}
