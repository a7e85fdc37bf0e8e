//! Send scheduler: executes engine actions against the transport, stamping each packet
//! with the next per-kind sequence number. Paced sends are queued with a deadline instead
//! of being slept on, so the session keeps draining events while they wait.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use pong_core::{encode_packet, Action, EncodeError, Outbound, SequenceAllocator, SessionConfig};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::transport::{Transport, TransportError};

/// Whether the session should keep consuming events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stop,
}

pub struct SendScheduler<T: Transport> {
    transport: Arc<T>,
    sequences: SequenceAllocator,
    packet_len: usize,
    send_delay: Duration,
    // FIFO; deadlines are non-decreasing.
    pending: VecDeque<(Instant, Outbound)>,
    rng: StdRng,
    sent: u64,
}

impl<T: Transport> SendScheduler<T> {
    pub fn new(transport: Arc<T>, config: &SessionConfig) -> Self {
        Self {
            transport,
            sequences: SequenceAllocator::new(),
            packet_len: config.packet_len,
            send_delay: config.send_delay(),
            pending: VecDeque::new(),
            rng: StdRng::from_entropy(),
            sent: 0,
        }
    }

    /// Packets handed to the transport so far.
    pub fn sent(&self) -> u64 {
        self.sent
    }

    /// When the oldest paced send becomes due, if any is waiting.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.front().map(|(deadline, _)| *deadline)
    }

    /// Perform `actions` in order. Paced sends are queued for `send_delay`; everything
    /// else goes out now. Stops at the first fatal error.
    pub fn execute(&mut self, actions: Vec<Action>) -> Result<Flow, ScheduleError> {
        for action in actions {
            match action {
                Action::RegisterPeer(peer) => self.transport.ensure_known(peer)?,
                Action::Send(out) if out.paced && !self.send_delay.is_zero() => {
                    let deadline = Instant::now() + self.send_delay;
                    trace!(dest = %out.dest, "send paced");
                    self.pending.push_back((deadline, out));
                }
                Action::Send(out) => self.transmit(out)?,
                Action::Stop => {
                    self.pending.clear();
                    return Ok(Flow::Stop);
                }
            }
        }
        Ok(Flow::Continue)
    }

    /// Send every queued packet whose deadline has passed.
    pub fn send_due(&mut self) -> Result<(), ScheduleError> {
        let now = Instant::now();
        while let Some((deadline, _)) = self.pending.front() {
            if *deadline > now {
                break;
            }
            if let Some((_, out)) = self.pending.pop_front() {
                self.transmit(out)?;
            }
        }
        Ok(())
    }

    fn transmit(&mut self, out: Outbound) -> Result<(), ScheduleError> {
        let sequence = self.sequences.next(out.kind());
        let bytes = encode_packet(&out.header(sequence), self.packet_len, &mut self.rng)?;
        debug!(dest = %out.dest, kind = ?out.kind(), seq = sequence, "send data");
        self.transport.send(out.dest, bytes)?;
        self.sent += 1;
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ScheduleError {
    #[error("transport: {0}")]
    Transport(#[from] TransportError),
    #[error("encode: {0}")]
    Encode(#[from] EncodeError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use pong_core::{decode_packet, PacketKind, PeerId, RoleState};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        sent: Mutex<Vec<(PeerId, Vec<u8>)>>,
        known: Mutex<Vec<PeerId>>,
    }

    impl Transport for Recorder {
        fn send(&self, peer: PeerId, bytes: Vec<u8>) -> Result<(), TransportError> {
            if !peer.is_broadcast() && !self.known.lock().unwrap().contains(&peer) {
                return Err(TransportError::UnknownPeer(peer));
            }
            self.sent.lock().unwrap().push((peer, bytes));
            Ok(())
        }

        fn ensure_known(&self, peer: PeerId) -> Result<(), TransportError> {
            self.known.lock().unwrap().push(peer);
            Ok(())
        }
    }

    fn config() -> SessionConfig {
        SessionConfig {
            packet_len: 20,
            send_delay_ms: 0,
            ..SessionConfig::default()
        }
    }

    fn send(dest: PeerId, paced: bool) -> Action {
        Action::Send(Outbound {
            dest,
            role_state: RoleState::PeerSeen,
            session_magic: 77,
            paced,
        })
    }

    #[tokio::test]
    async fn stamps_per_kind_sequences() {
        let transport = Arc::new(Recorder::default());
        let mut scheduler = SendScheduler::new(transport.clone(), &config());
        let peer = PeerId::from_bytes([0x02, 0, 0, 0, 0, 1]);
        let flow = scheduler
            .execute(vec![
                send(PeerId::BROADCAST, false),
                send(PeerId::BROADCAST, true),
                Action::RegisterPeer(peer),
                send(peer, false),
                send(PeerId::BROADCAST, true),
            ])
            .unwrap();
        assert_eq!(flow, Flow::Continue);
        assert_eq!(scheduler.sent(), 4);

        let sent = transport.sent.lock().unwrap();
        let headers: Vec<_> = sent
            .iter()
            .map(|(_, b)| {
                assert_eq!(b.len(), 20);
                decode_packet(b).unwrap()
            })
            .collect();
        let seqs: Vec<_> = headers.iter().map(|h| (h.kind, h.sequence)).collect();
        assert_eq!(
            seqs,
            vec![
                (PacketKind::Broadcast, 0),
                (PacketKind::Broadcast, 1),
                (PacketKind::Unicast, 0),
                (PacketKind::Broadcast, 2),
            ]
        );
        assert!(headers.iter().all(|h| h.session_magic == 77));
    }

    #[tokio::test]
    async fn stop_halts_remaining_actions() {
        let transport = Arc::new(Recorder::default());
        let mut scheduler = SendScheduler::new(transport.clone(), &config());
        let flow = scheduler
            .execute(vec![Action::Stop, send(PeerId::BROADCAST, false)])
            .unwrap();
        assert_eq!(flow, Flow::Stop);
        assert!(transport.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn transport_failure_is_surfaced() {
        let transport = Arc::new(Recorder::default());
        let mut scheduler = SendScheduler::new(transport, &config());
        let stranger = PeerId::from_bytes([0x02, 0, 0, 0, 0, 9]);
        let err = scheduler
            .execute(vec![send(stranger, false)])
            .unwrap_err();
        assert!(matches!(
            err,
            ScheduleError::Transport(TransportError::UnknownPeer(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn paced_sends_wait_for_delay() {
        let transport = Arc::new(Recorder::default());
        let cfg = SessionConfig {
            send_delay_ms: 250,
            ..config()
        };
        let mut scheduler = SendScheduler::new(transport.clone(), &cfg);
        let start = Instant::now();
        scheduler.execute(vec![send(PeerId::BROADCAST, false)]).unwrap();
        assert_eq!(transport.sent.lock().unwrap().len(), 1);
        assert_eq!(scheduler.next_deadline(), None);

        scheduler.execute(vec![send(PeerId::BROADCAST, true)]).unwrap();
        assert_eq!(scheduler.next_deadline(), Some(start + Duration::from_millis(250)));
        scheduler.send_due().unwrap();
        assert_eq!(transport.sent.lock().unwrap().len(), 1);

        tokio::time::advance(Duration::from_millis(250)).await;
        scheduler.send_due().unwrap();
        assert_eq!(transport.sent.lock().unwrap().len(), 2);
        assert_eq!(scheduler.next_deadline(), None);
        assert_eq!(scheduler.sent(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_discards_waiting_sends() {
        let transport = Arc::new(Recorder::default());
        let cfg = SessionConfig {
            send_delay_ms: 100,
            ..config()
        };
        let mut scheduler = SendScheduler::new(transport.clone(), &cfg);
        scheduler.execute(vec![send(PeerId::BROADCAST, true)]).unwrap();
        assert!(scheduler.next_deadline().is_some());
        assert_eq!(scheduler.execute(vec![Action::Stop]).unwrap(), Flow::Stop);
        assert_eq!(scheduler.next_deadline(), None);
        tokio::time::advance(Duration::from_millis(100)).await;
        scheduler.send_due().unwrap();
        assert!(transport.sent.lock().unwrap().is_empty());
    }
}
