//! Host-driven API: NegotiationEngine receives transport events from the host, returns actions.

use tracing::{debug, info, trace, warn};

use crate::config::SessionConfig;
use crate::peers::PeerTable;
use crate::protocol::{PacketHeader, PacketKind, PeerId, RoleState};
use crate::wire;

/// Transmission mode of the local device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Discovery: sending broadcasts after every completion.
    Broadcasting,
    /// Elected sender: sending unicasts to `target_peer`.
    Unicast,
    /// Passive side of a pair: a unicast arrived, so this device stopped broadcasting
    /// and only listens.
    Receiving,
    /// Terminal. No more sends; events are discarded.
    Stopped,
}

/// Negotiation progress of one session. Mutated only by [`NegotiationEngine`].
#[derive(Debug, Clone)]
struct NegotiationState {
    mode: Mode,
    role_state: RoleState,
    session_magic: u32,
    remaining_sends: u32,
    // Some iff mode == Unicast.
    target_peer: Option<PeerId>,
}

/// Notification from the transport, already copied out of the callback context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A previous send finished. `peer` is the destination it was sent to.
    SendCompleted { peer: PeerId, ok: bool },
    /// A datagram arrived from `peer`.
    Received { peer: PeerId, bytes: Vec<u8> },
}

/// A send the host should perform. The host stamps the sequence number and encodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Outbound {
    pub dest: PeerId,
    pub role_state: RoleState,
    pub session_magic: u32,
    /// Apply the inter-send delay before sending.
    pub paced: bool,
}

impl Outbound {
    pub fn kind(&self) -> PacketKind {
        PacketKind::for_dest(self.dest)
    }

    /// Header for this send with the given sequence number.
    pub fn header(&self, sequence: u16) -> PacketHeader {
        PacketHeader {
            kind: self.kind(),
            role_state: self.role_state,
            sequence,
            session_magic: self.session_magic,
        }
    }
}

/// Action for host to perform, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Make `peer` reachable for unicast (idempotent on the transport side).
    RegisterPeer(PeerId),
    Send(Outbound),
    /// Session finished; tear down.
    Stop,
}

/// Main coordinator. Host passes events; engine returns actions.
pub struct NegotiationEngine {
    local_id: PeerId,
    state: NegotiationState,
    peers: PeerTable,
}

impl NegotiationEngine {
    pub fn new(config: &SessionConfig, local_id: PeerId, session_magic: u32) -> Self {
        Self {
            local_id,
            state: NegotiationState {
                mode: Mode::Broadcasting,
                role_state: RoleState::NoPeerSeen,
                session_magic,
                remaining_sends: config.send_count,
                target_peer: None,
            },
            peers: PeerTable::new(),
        }
    }

    pub fn with_random_magic(config: &SessionConfig, local_id: PeerId) -> Self {
        Self::new(config, local_id, rand::random())
    }

    pub fn mode(&self) -> Mode {
        self.state.mode
    }

    pub fn role_state(&self) -> RoleState {
        self.state.role_state
    }

    pub fn session_magic(&self) -> u32 {
        self.state.session_magic
    }

    pub fn remaining_sends(&self) -> u32 {
        self.state.remaining_sends
    }

    pub fn target_peer(&self) -> Option<PeerId> {
        self.state.target_peer
    }

    pub fn local_id(&self) -> PeerId {
        self.local_id
    }

    pub fn peers(&self) -> &PeerTable {
        &self.peers
    }

    /// First broadcast of the session.
    pub fn start(&self) -> Vec<Action> {
        if self.state.mode != Mode::Broadcasting {
            return vec![];
        }
        info!(magic = self.state.session_magic, "start sending broadcast data");
        vec![Action::Send(self.outbound(PeerId::BROADCAST, false))]
    }

    /// Consume one event and decide what to do next.
    pub fn on_event(&mut self, event: Event) -> Vec<Action> {
        if self.state.mode == Mode::Stopped {
            trace!(?event, "session stopped; discarding event");
            return vec![];
        }
        match event {
            Event::SendCompleted { peer, ok } => self.on_send_completed(peer, ok),
            Event::Received { peer, bytes } => self.on_received(peer, &bytes),
        }
    }

    fn on_send_completed(&mut self, peer: PeerId, ok: bool) -> Vec<Action> {
        debug!(%peer, ok, "send completed");
        if !ok {
            warn!(%peer, "send completed without delivery confirmation");
        }
        match PacketKind::for_dest(peer) {
            PacketKind::Broadcast => {
                if self.state.mode != Mode::Broadcasting {
                    return vec![];
                }
                vec![Action::Send(self.outbound(PeerId::BROADCAST, true))]
            }
            PacketKind::Unicast => {
                let target = match (self.state.mode, self.state.target_peer) {
                    (Mode::Unicast, Some(t)) if t == peer => t,
                    _ => {
                        debug!(%peer, "ignoring unicast completion outside unicast mode");
                        return vec![];
                    }
                };
                self.state.remaining_sends = self.state.remaining_sends.saturating_sub(1);
                if self.state.remaining_sends == 0 {
                    info!(%target, "send done");
                    self.state.mode = Mode::Stopped;
                    self.state.target_peer = None;
                    return vec![Action::Stop];
                }
                vec![Action::Send(self.outbound(target, true))]
            }
        }
    }

    fn on_received(&mut self, peer: PeerId, bytes: &[u8]) -> Vec<Action> {
        if peer == self.local_id || peer.is_broadcast() {
            trace!(%peer, "ignoring packet from own or broadcast address");
            return vec![];
        }
        let header = match wire::decode_packet(bytes) {
            Ok(h) => h,
            Err(e) => {
                warn!(%peer, len = bytes.len(), error = %e, "receive error data");
                return vec![];
            }
        };
        match header.kind {
            PacketKind::Broadcast => self.on_broadcast(peer, &header, bytes.len()),
            PacketKind::Unicast => self.on_unicast(peer, &header, bytes.len()),
        }
    }

    fn on_broadcast(&mut self, peer: PeerId, header: &PacketHeader, len: usize) -> Vec<Action> {
        debug!(seq = header.sequence, %peer, len, "receive broadcast data");
        let mut actions = Vec::new();

        if self.peers.insert(peer) {
            info!(%peer, known = self.peers.len(), "new peer");
            actions.push(Action::RegisterPeer(peer));
        }
        self.peers.record_packet(&peer);

        if self.state.role_state == RoleState::NoPeerSeen {
            self.state.role_state = RoleState::PeerSeen;
        }

        // Tie-break: the side with the higher-or-equal magic becomes the sender.
        if header.role_state == RoleState::PeerSeen
            && self.state.mode == Mode::Broadcasting
            && self.state.session_magic >= header.session_magic
        {
            info!(
                %peer,
                local_magic = self.state.session_magic,
                remote_magic = header.session_magic,
                "elected sender; start sending unicast data"
            );
            self.state.mode = Mode::Unicast;
            self.state.target_peer = Some(peer);
            actions.push(Action::Send(self.outbound(peer, false)));
        }
        actions
    }

    fn on_unicast(&mut self, peer: PeerId, header: &PacketHeader, len: usize) -> Vec<Action> {
        debug!(seq = header.sequence, %peer, len, "receive unicast data");
        self.peers.record_packet(&peer);
        match self.state.mode {
            Mode::Broadcasting => {
                info!(%peer, "unicast received; stop sending broadcast data");
                self.state.mode = Mode::Receiving;
            }
            Mode::Unicast
                if self.state.target_peer == Some(peer)
                    && self.yields_to(peer, header.session_magic) =>
            {
                info!(%peer, "both sides elected; yielding sender role");
                self.state.mode = Mode::Receiving;
                self.state.target_peer = None;
            }
            _ => {}
        }
        vec![]
    }

    /// Both sides elected themselves. Keep the larger (magic, id) as sender.
    fn yields_to(&self, peer: PeerId, remote_magic: u32) -> bool {
        (remote_magic, peer) > (self.state.session_magic, self.local_id)
    }

    fn outbound(&self, dest: PeerId, paced: bool) -> Outbound {
        Outbound {
            dest,
            role_state: self.state.role_state,
            session_magic: self.state.session_magic,
            paced,
        }
    }
}
