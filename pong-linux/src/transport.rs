//! Datagram transport: UDP broadcast on the LAN standing in for the radio link.
//! Frame: source PeerId (6 bytes) + flags (1 byte) + body. Unicast bodies are sealed
//! with the link key; broadcasts are plain.

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::{Arc, Mutex, MutexGuard};

use pong_core::link;
use pong_core::{decode_packet, Event, PacketKind, PeerId, MAX_PACKET_LEN};
use tokio::net::UdpSocket;
use tracing::{debug, trace, warn};

use crate::bridge::{EventProducer, PushError};

const ID_LEN: usize = 6;
const FRAME_HEADER_LEN: usize = ID_LEN + 1;
const FLAG_SEALED: u8 = 0x01;

/// What the session needs from a transport. Sends complete asynchronously: the
/// outcome arrives later as [`Event::SendCompleted`] on the bridge.
pub trait Transport: Send + Sync + 'static {
    /// Queue `bytes` for `peer`. An error here is fatal for the session.
    fn send(&self, peer: PeerId, bytes: Vec<u8>) -> Result<(), TransportError>;

    /// Make `peer` a valid unicast destination. Idempotent.
    fn ensure_known(&self, peer: PeerId) -> Result<(), TransportError>;
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("peer {0} not registered")]
    UnknownPeer(PeerId),
    #[error("packet of {0} bytes exceeds transport limit")]
    Oversize(usize),
    #[error("link encryption failed: {0}")]
    Crypto(#[from] link::LinkCryptoError),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

struct Route {
    addr: SocketAddr,
    registered: bool,
}

/// UDP implementation. Peers are learned from received frames and registered on demand.
pub struct UdpTransport {
    socket: Arc<UdpSocket>,
    local_id: PeerId,
    broadcast: SocketAddr,
    link_key: [u8; 32],
    routes: Arc<Mutex<HashMap<PeerId, Route>>>,
    completions: EventProducer,
}

impl UdpTransport {
    /// Bind `0.0.0.0:port` with broadcast enabled. Completions are pushed to `completions`.
    pub async fn bind(
        port: u16,
        broadcast_ip: Ipv4Addr,
        local_id: PeerId,
        link_key: [u8; 32],
        completions: EventProducer,
    ) -> std::io::Result<Self> {
        let socket = UdpSocket::bind(("0.0.0.0", port)).await?;
        socket.set_broadcast(true)?;
        Ok(Self {
            socket: Arc::new(socket),
            local_id,
            broadcast: SocketAddr::V4(SocketAddrV4::new(broadcast_ip, port)),
            link_key,
            routes: Arc::new(Mutex::new(HashMap::new())),
            completions,
        })
    }

    /// Run the receive side until the socket fails or the session's consumer is gone.
    /// Each datagram becomes an owned [`Event::Received`] pushed to `events`.
    pub async fn run_receiver(&self, events: EventProducer) -> std::io::Result<()> {
        let mut buf = vec![0u8; 2048];
        loop {
            let (n, from) = self.socket.recv_from(&mut buf).await?;
            let Some((peer, body)) = self.accept_frame(&buf[..n], from)? else {
                continue;
            };
            // Full is already logged by the bridge.
            if let Err(PushError::Closed) = events.push(Event::Received { peer, bytes: body }) {
                debug!("event queue closed; receiver exiting");
                return Ok(());
            }
        }
    }

    fn routes(&self) -> std::io::Result<MutexGuard<'_, HashMap<PeerId, Route>>> {
        self.routes
            .lock()
            .map_err(|_| std::io::Error::other("route table poisoned"))
    }

    /// Parse one datagram and unseal if needed. The sender's address is learned only
    /// from a body that decodes: a new route needs a broadcast, a known one is refreshed
    /// by any valid packet.
    fn accept_frame(
        &self,
        frame: &[u8],
        from: SocketAddr,
    ) -> std::io::Result<Option<(PeerId, Vec<u8>)>> {
        if frame.len() < FRAME_HEADER_LEN {
            trace!(%from, len = frame.len(), "runt frame");
            return Ok(None);
        }
        let mut id = [0u8; ID_LEN];
        id.copy_from_slice(&frame[..ID_LEN]);
        let peer = PeerId::from_bytes(id);
        if peer == self.local_id || peer.is_broadcast() {
            return Ok(None);
        }
        let body = &frame[FRAME_HEADER_LEN..];
        let body = if frame[ID_LEN] & FLAG_SEALED == 0 {
            body.to_vec()
        } else {
            match link::open(&self.link_key, body) {
                Ok(plain) => plain,
                Err(e) => {
                    warn!(%peer, error = %e, "dropping unicast that failed to open");
                    return Ok(None);
                }
            }
        };
        if let Ok(header) = decode_packet(&body) {
            let mut routes = self.routes()?;
            match routes.get_mut(&peer) {
                Some(route) => route.addr = from,
                None if header.kind == PacketKind::Broadcast => {
                    routes.insert(
                        peer,
                        Route {
                            addr: from,
                            registered: false,
                        },
                    );
                }
                None => {}
            }
        }
        Ok(Some((peer, body)))
    }

    fn frame(&self, sealed: bool, body: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(FRAME_HEADER_LEN + body.len());
        out.extend_from_slice(self.local_id.as_bytes());
        out.push(if sealed { FLAG_SEALED } else { 0 });
        out.extend_from_slice(body);
        out
    }
}

impl Transport for UdpTransport {
    fn send(&self, peer: PeerId, bytes: Vec<u8>) -> Result<(), TransportError> {
        if bytes.len() > MAX_PACKET_LEN {
            return Err(TransportError::Oversize(bytes.len()));
        }
        let (addr, frame) = if peer.is_broadcast() {
            (self.broadcast, self.frame(false, &bytes))
        } else {
            let addr = {
                let routes = self.routes()?;
                match routes.get(&peer) {
                    Some(r) if r.registered => r.addr,
                    _ => return Err(TransportError::UnknownPeer(peer)),
                }
            };
            let sealed = link::seal(&self.link_key, &bytes)?;
            (addr, self.frame(true, &sealed))
        };

        let socket = self.socket.clone();
        let completions = self.completions.clone();
        tokio::spawn(async move {
            let ok = match socket.send_to(&frame, addr).await {
                Ok(_) => true,
                Err(e) => {
                    warn!(%peer, %addr, error = %e, "send failed");
                    false
                }
            };
            let _ = completions.push(Event::SendCompleted { peer, ok });
        });
        Ok(())
    }

    fn ensure_known(&self, peer: PeerId) -> Result<(), TransportError> {
        let mut routes = self.routes()?;
        match routes.get_mut(&peer) {
            Some(r) => {
                if !r.registered {
                    debug!(%peer, addr = %r.addr, "peer registered");
                    r.registered = true;
                }
                Ok(())
            }
            None => Err(TransportError::UnknownPeer(peer)),
        }
    }
}
