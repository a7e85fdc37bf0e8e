//! Negotiation session: the single consumer task. Owns the engine, the scheduler
//! (and its sequence counters) and the consumer end of the event bridge. It waits only
//! on the bridge, raced against the deadline of the next paced send.

use std::sync::Arc;
use std::time::Duration;

use pong_core::{Mode, NegotiationEngine, PeerId, SessionConfig};
use tracing::{debug, error, info};

use crate::bridge::EventConsumer;
use crate::scheduler::{Flow, ScheduleError, SendScheduler};
use crate::transport::Transport;

/// Summary returned when a session reaches `Stopped`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionReport {
    pub session_magic: u32,
    pub final_mode: Mode,
    pub packets_sent: u64,
    pub peers_known: usize,
    /// Packets decoded from known peers.
    pub packets_received: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("send failed: {0}")]
    Send(#[from] ScheduleError),
    #[error("event bridge closed")]
    BridgeClosed,
}

pub struct Session<T: Transport> {
    engine: NegotiationEngine,
    scheduler: SendScheduler<T>,
    events: EventConsumer,
    start_delay: Duration,
}

impl<T: Transport> Session<T> {
    pub fn new(
        config: &SessionConfig,
        local_id: PeerId,
        transport: Arc<T>,
        events: EventConsumer,
    ) -> Self {
        Self::with_engine(
            NegotiationEngine::with_random_magic(config, local_id),
            config,
            transport,
            events,
        )
    }

    pub fn with_engine(
        engine: NegotiationEngine,
        config: &SessionConfig,
        transport: Arc<T>,
        events: EventConsumer,
    ) -> Self {
        Self {
            engine,
            scheduler: SendScheduler::new(transport, config),
            events,
            start_delay: config.start_delay(),
        }
    }

    /// Drive the session until it stops or hits a fatal error. Consumes the session,
    /// so engine state, peer table and bridge are released on return.
    pub async fn run(mut self) -> Result<SessionReport, SessionError> {
        info!(
            local = %self.engine.local_id(),
            magic = self.engine.session_magic(),
            "session started"
        );
        if !self.start_delay.is_zero() {
            tokio::time::sleep(self.start_delay).await;
        }
        let result = self.drive().await;
        match &result {
            Ok(()) => info!(sent = self.scheduler.sent(), "session stopped"),
            Err(e) => error!(error = %e, mode = ?self.engine.mode(), "session aborted"),
        }
        for peer in self.engine.peers().iter() {
            debug!(peer = %peer.id, packets = peer.packets, "peer summary");
        }
        result.map(|()| SessionReport {
            session_magic: self.engine.session_magic(),
            final_mode: self.engine.mode(),
            packets_sent: self.scheduler.sent(),
            peers_known: self.engine.peers().len(),
            packets_received: self.engine.peers().total_packets(),
        })
    }

    async fn drive(&mut self) -> Result<(), SessionError> {
        if self.scheduler.execute(self.engine.start())? == Flow::Stop {
            return Ok(());
        }
        loop {
            let event = match self.scheduler.next_deadline() {
                Some(deadline) => tokio::select! {
                    _ = tokio::time::sleep_until(deadline) => {
                        self.scheduler.send_due()?;
                        continue;
                    }
                    event = self.events.pop() => event,
                },
                None => self.events.pop().await,
            };
            let event = event.ok_or(SessionError::BridgeClosed)?;
            let actions = self.engine.on_event(event);
            if self.scheduler.execute(actions)? == Flow::Stop {
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::{event_bridge, EventProducer};
    use crate::transport::TransportError;
    use pong_core::{decode_packet, Event, PacketKind};
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;

    /// In-memory medium: every send is delivered to the other endpoints' bridges and
    /// completes immediately on the sender's own bridge.
    #[derive(Default)]
    struct Medium {
        endpoints: Mutex<HashMap<PeerId, EventProducer>>,
        log: Mutex<Vec<(PeerId, PeerId, PacketKind)>>,
    }

    struct Loopback {
        id: PeerId,
        medium: Arc<Medium>,
        known: Mutex<HashSet<PeerId>>,
    }

    impl Transport for Loopback {
        fn send(&self, peer: PeerId, bytes: Vec<u8>) -> Result<(), TransportError> {
            if !peer.is_broadcast() && !self.known.lock().unwrap().contains(&peer) {
                return Err(TransportError::UnknownPeer(peer));
            }
            let kind = decode_packet(&bytes).unwrap().kind;
            self.medium.log.lock().unwrap().push((self.id, peer, kind));
            let endpoints = self.medium.endpoints.lock().unwrap();
            for (id, tx) in endpoints.iter() {
                if *id != self.id && (peer.is_broadcast() || *id == peer) {
                    let _ = tx.push(Event::Received {
                        peer: self.id,
                        bytes: bytes.clone(),
                    });
                }
            }
            if let Some(own) = endpoints.get(&self.id) {
                let _ = own.push(Event::SendCompleted { peer, ok: true });
            }
            Ok(())
        }

        fn ensure_known(&self, peer: PeerId) -> Result<(), TransportError> {
            self.known.lock().unwrap().insert(peer);
            Ok(())
        }
    }

    fn config() -> SessionConfig {
        SessionConfig {
            packet_len: 16,
            send_count: 4,
            send_delay_ms: 1,
            start_delay_ms: 0,
            queue_capacity: 256,
        }
    }

    fn endpoint(
        medium: &Arc<Medium>,
        id: PeerId,
        magic: u32,
    ) -> Session<Loopback> {
        let cfg = config();
        let (tx, rx) = event_bridge(cfg.queue_capacity);
        medium.endpoints.lock().unwrap().insert(id, tx);
        let transport = Arc::new(Loopback {
            id,
            medium: medium.clone(),
            known: Mutex::new(HashSet::new()),
        });
        Session::with_engine(NegotiationEngine::new(&cfg, id, magic), &cfg, transport, rx)
    }

    #[tokio::test]
    async fn pair_elects_exactly_one_sender() {
        let medium = Arc::new(Medium::default());
        let high = PeerId::from_bytes([0x02, 0, 0, 0, 0, 1]);
        let low = PeerId::from_bytes([0x02, 0, 0, 0, 0, 2]);
        let a = tokio::spawn(endpoint(&medium, high, 1000).run());
        let b = tokio::spawn(endpoint(&medium, low, 500).run());

        let report = tokio::time::timeout(Duration::from_secs(10), a)
            .await
            .expect("sender should stop")
            .unwrap()
            .unwrap();
        assert_eq!(report.final_mode, Mode::Stopped);
        assert_eq!(report.session_magic, 1000);
        assert_eq!(report.peers_known, 1);
        assert!(report.packets_received >= 1);

        // The receiver never stops on its own.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!b.is_finished());
        b.abort();

        let log = medium.log.lock().unwrap();
        let unicasts_from = |id| {
            log.iter()
                .filter(|(from, _, kind)| *from == id && *kind == PacketKind::Unicast)
                .count()
        };
        assert_eq!(unicasts_from(high), 4);
        assert_eq!(unicasts_from(low), 0);
        assert!(log
            .iter()
            .filter(|(from, _, _)| *from == high)
            .all(|(_, to, kind)| *kind == PacketKind::Broadcast || *to == low));
    }

    #[tokio::test]
    async fn bridge_closed_is_reported() {
        let cfg = config();
        let (tx, rx) = event_bridge(4);
        let medium = Arc::new(Medium::default());
        let id = PeerId::from_bytes([0x02, 0, 0, 0, 0, 3]);
        let transport = Arc::new(Loopback {
            id,
            medium: medium.clone(),
            known: Mutex::new(HashSet::new()),
        });
        medium.endpoints.lock().unwrap().insert(id, tx);
        let session = Session::with_engine(NegotiationEngine::new(&cfg, id, 1), &cfg, transport, rx);
        // First broadcast completes into the bridge; then every producer goes away.
        let handle = tokio::spawn(session.run());
        tokio::time::sleep(Duration::from_millis(20)).await;
        medium.endpoints.lock().unwrap().clear();
        let result = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(SessionError::BridgeClosed)));
    }

    #[tokio::test]
    async fn send_failure_ends_session() {
        struct Broken;
        impl Transport for Broken {
            fn send(&self, _: PeerId, _: Vec<u8>) -> Result<(), TransportError> {
                Err(TransportError::Io(std::io::Error::other("radio down")))
            }
            fn ensure_known(&self, _: PeerId) -> Result<(), TransportError> {
                Ok(())
            }
        }
        let cfg = config();
        let (_tx, rx) = event_bridge(4);
        let session = Session::new(&cfg, PeerId::random(), Arc::new(Broken), rx);
        let result = session.run().await;
        assert!(matches!(
            result,
            Err(SessionError::Send(ScheduleError::Transport(TransportError::Io(_))))
        ));
    }

    #[tokio::test]
    async fn pacing_does_not_stall_the_queue() {
        let cfg = SessionConfig {
            send_delay_ms: 200,
            queue_capacity: 4,
            ..config()
        };
        let medium = Arc::new(Medium::default());
        let id = PeerId::from_bytes([0x02, 0, 0, 0, 0, 4]);
        let (tx, rx) = event_bridge(cfg.queue_capacity);
        let neighbour = tx.clone();
        medium.endpoints.lock().unwrap().insert(id, tx);
        let transport = Arc::new(Loopback {
            id,
            medium: medium.clone(),
            known: Mutex::new(HashSet::new()),
        });
        let session = Session::with_engine(NegotiationEngine::new(&cfg, id, 1), &cfg, transport, rx);
        let handle = tokio::spawn(session.run());

        // While the second broadcast waits out its delay, a chatty neighbour floods the
        // queue well past its capacity. The consumer must keep up.
        tokio::time::sleep(Duration::from_millis(10)).await;
        let stranger = PeerId::from_bytes([0x02, 0, 0, 0, 0, 5]);
        for _ in 0..20 {
            let _ = neighbour.push(Event::Received {
                peer: stranger,
                bytes: vec![0u8; 3],
            });
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        assert_eq!(neighbour.dropped(), 0);

        // The paced broadcast still goes out once its delay has passed.
        tokio::time::timeout(Duration::from_secs(5), async {
            while medium.log.lock().unwrap().len() < 2 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("second broadcast");
        assert!(!handle.is_finished());
        handle.abort();
    }
}
