//! The state machine for a single peer connection: handshake, the
//! choked/interested flags in both directions, keepalive timers, and
//! translating wire messages into [`PeerEvent`]s the scheduler actor
//! reacts to. One of these runs per connected peer; request pipelining
//! and piece-buffer stall detection are the scheduler's job, since they
//! need cross-peer state this type deliberately doesn't have.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use swarmcore_core::{Bitfield, Id20, RttEstimator, SpeedEstimator, SwarmConfig};
use swarmcore_wire::{Handshake, Message, PeerCodec, Request, WireError};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::codec::Framed;
use tracing::{debug, trace, warn};

use crate::clock::Clock;
use crate::error::SwarmError;

/// Per-block request deadline floor, regardless of how fast the adaptive
/// RTT estimate says this peer usually is.
const MIN_REQUEST_DEADLINE: std::time::Duration = std::time::Duration::from_secs(10);
/// Consecutive per-block timeouts (no intervening successful block) before
/// the connection is dropped outright.
const MAX_CONSECUTIVE_TIMEOUTS: u32 = 3;

struct OutstandingRequest {
    request: Request,
    sent_millis: u64,
}

/// Commands the scheduler sends down to a peer connection.
#[derive(Debug, Clone)]
pub enum PeerCommand {
    SetAmChoking(bool),
    SetAmInterested(bool),
    SendHave(u32),
    SendBitfield(Bitfield),
    Request(Request),
    Cancel(Request),
    SendBlock { index: u32, begin: u32, block: Bytes },
    Disconnect,
}

/// Events a peer connection reports up to the scheduler.
#[derive(Debug, Clone)]
pub enum PeerEvent {
    HandshakeCompleted { peer_id: Id20, supports_extended: bool },
    ExtendedHandshake(std::collections::BTreeMap<String, u8>),
    BitfieldReceived(Bitfield),
    Have(u32),
    PeerChoking(bool),
    PeerInterested(bool),
    BlockReceived { piece: u32, offset: u32, data: Bytes },
    BlockRequested(Request),
    CancelReceived(Request),
    /// A block we requested didn't arrive within this connection's
    /// adaptive per-block deadline. The scheduler should free the
    /// assignment so another peer can pick it up.
    RequestTimedOut(Request),
    Disconnected { reason: String },
}

/// Per-direction choke/interest flags, tracked independently of any
/// specific transport so the state machine is unit-testable on its own.
#[derive(Debug, Clone, Copy, Default)]
pub struct InterestState {
    pub am_choking: bool,
    pub am_interested: bool,
    pub peer_choking: bool,
    pub peer_interested: bool,
}

impl InterestState {
    /// A fresh connection starts choked in both directions and
    /// uninterested in both directions, per the base protocol.
    pub fn initial() -> Self {
        Self {
            am_choking: true,
            am_interested: false,
            peer_choking: true,
            peer_interested: false,
        }
    }
}

/// Tracks whether the peer has sent its one allowed `Bitfield` message as
/// the very first post-handshake message. A `Bitfield` arriving later, or
/// a second one ever, is a protocol violation.
#[derive(Debug, Default)]
struct BitfieldGuard {
    seen_any_message: bool,
    seen_bitfield: bool,
}

impl BitfieldGuard {
    fn observe(&mut self, msg: &Message) -> Result<(), SwarmError> {
        if let Message::Bitfield(_) = msg {
            if self.seen_bitfield {
                return Err(SwarmError::Protocol("duplicate Bitfield message".into()));
            }
            if self.seen_any_message {
                return Err(SwarmError::Protocol("Bitfield must be the first message after the handshake".into()));
            }
            self.seen_bitfield = true;
        }
        self.seen_any_message = true;
        Ok(())
    }
}

pub struct PeerConnection {
    pub addr: SocketAddr,
    pub config: SwarmConfig,
    pub clock: Arc<dyn Clock>,
    pub download_speed: SpeedEstimator,
    pub upload_speed: SpeedEstimator,
    pub interest: InterestState,
    bitfield_guard: BitfieldGuard,
    last_received_millis: u64,
    last_sent_millis: u64,
    rtt: RttEstimator,
    outstanding_requests: Vec<OutstandingRequest>,
    consecutive_timeouts: u32,
}

impl PeerConnection {
    pub fn new(addr: SocketAddr, config: SwarmConfig, clock: Arc<dyn Clock>) -> Self {
        let now = clock.now_millis();
        Self {
            addr,
            config,
            clock,
            download_speed: SpeedEstimator::new(),
            upload_speed: SpeedEstimator::new(),
            interest: InterestState::initial(),
            bitfield_guard: BitfieldGuard::default(),
            last_received_millis: now,
            last_sent_millis: now,
            rtt: RttEstimator::new(),
            outstanding_requests: Vec::new(),
            consecutive_timeouts: 0,
        }
    }

    fn needs_keepalive(&self, now_millis: u64) -> bool {
        now_millis.saturating_sub(self.last_sent_millis) >= self.config.keepalive_send_interval.as_millis() as u64
    }

    fn timed_out(&self, now_millis: u64) -> bool {
        now_millis.saturating_sub(self.last_received_millis) >= self.config.keepalive_timeout.as_millis() as u64
    }

    /// `max(10s, 3x current adaptive RTT estimate)`.
    fn request_deadline(&self) -> std::time::Duration {
        std::cmp::max(MIN_REQUEST_DEADLINE, self.rtt.estimate().saturating_mul(3))
    }

    fn record_request_sent(&mut self, request: Request) {
        self.outstanding_requests.push(OutstandingRequest { request, sent_millis: self.clock.now_millis() });
    }

    fn forget_request(&mut self, index: u32, begin: u32) -> Option<OutstandingRequest> {
        let pos = self.outstanding_requests.iter().position(|o| o.request.index == index && o.request.begin == begin)?;
        Some(self.outstanding_requests.remove(pos))
    }

    /// Drain any outstanding request whose deadline has elapsed, updating
    /// the consecutive-timeout counter. Each returned request should be
    /// reported to the scheduler as [`PeerEvent::RequestTimedOut`].
    fn drain_timed_out_requests(&mut self, now_millis: u64) -> Vec<Request> {
        let deadline_millis = self.request_deadline().as_millis() as u64;
        let mut timed_out = Vec::new();
        self.outstanding_requests.retain(|o| {
            if now_millis.saturating_sub(o.sent_millis) >= deadline_millis {
                timed_out.push(o.request);
                false
            } else {
                true
            }
        });
        if !timed_out.is_empty() {
            self.consecutive_timeouts += timed_out.len() as u32;
        }
        timed_out
    }

    /// Apply one inbound wire message to local state, returning the
    /// [`PeerEvent`] the scheduler should be told about, if any.
    fn apply_inbound(&mut self, msg: Message) -> Result<Option<PeerEvent>, SwarmError> {
        self.bitfield_guard.observe(&msg)?;
        self.last_received_millis = self.clock.now_millis();

        Ok(match msg {
            Message::KeepAlive => None,
            Message::Choke => {
                self.interest.peer_choking = true;
                Some(PeerEvent::PeerChoking(true))
            }
            Message::Unchoke => {
                self.interest.peer_choking = false;
                Some(PeerEvent::PeerChoking(false))
            }
            Message::Interested => {
                self.interest.peer_interested = true;
                Some(PeerEvent::PeerInterested(true))
            }
            Message::NotInterested => {
                self.interest.peer_interested = false;
                Some(PeerEvent::PeerInterested(false))
            }
            Message::Have(piece) => Some(PeerEvent::Have(piece)),
            Message::Bitfield(bytes) => {
                // Piece count is validated by the caller, which knows the
                // torrent's length; we only guard ordering here.
                Some(PeerEvent::BitfieldReceived(bitfield_from_raw(&bytes)?))
            }
            Message::Request(req) => Some(PeerEvent::BlockRequested(req)),
            Message::Piece { index, begin, block } => {
                self.download_speed.add_bytes(self.last_received_millis, block.len() as u64);
                if let Some(sent) = self.forget_request(index, begin) {
                    let elapsed = self.last_received_millis.saturating_sub(sent.sent_millis);
                    self.rtt.record_sample(std::time::Duration::from_millis(elapsed));
                    self.consecutive_timeouts = 0;
                }
                Some(PeerEvent::BlockReceived { piece: index, offset: begin, data: block })
            }
            Message::Cancel(req) => Some(PeerEvent::CancelReceived(req)),
            Message::Port(_) => None,
            Message::ExtendedHandshake(h) => Some(PeerEvent::ExtendedHandshake(h.m)),
            Message::ExtendedOther { .. } => None,
        })
    }
}

/// A `Bitfield`'s piece count isn't carried on the wire; the caller fills
/// it in once the peer connection learns the torrent's piece count from
/// the handshake's associated swarm. Until then we stash the raw bytes.
fn bitfield_from_raw(bytes: &Bytes) -> Result<Bitfield, SwarmError> {
    // Piece count unknown here: store the maximum bit count the raw bytes
    // could represent and let the scheduler re-validate/truncate against
    // the torrent's actual piece count.
    Bitfield::from_wire_bytes(bytes, bytes.len() as u32 * 8)
        .map_err(|e| SwarmError::Protocol(format!("bad bitfield: {e}")))
}

/// Drive the connection's read/write loop: send our handshake, read and
/// validate theirs, then pump messages between the wire and the two
/// channels until disconnect. `outgoing` carries commands from the
/// scheduler; `events` reports back to it.
pub async fn run<S>(
    mut stream: S,
    mut conn: PeerConnection,
    our_handshake: Handshake,
    mut outgoing: mpsc::Receiver<PeerCommand>,
    events: mpsc::Sender<PeerEvent>,
) -> Result<(), SwarmError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    stream.write_all(&our_handshake.serialize()).await.map_err(SwarmError::Transport)?;

    let mut hs_buf = [0u8; swarmcore_wire::HANDSHAKE_LEN];
    stream.read_exact(&mut hs_buf).await.map_err(SwarmError::Transport)?;
    let (their_handshake, _) = Handshake::deserialize(&hs_buf)?;
    if their_handshake.info_hash != our_handshake.info_hash {
        return Err(SwarmError::Protocol("info_hash mismatch on handshake".into()));
    }

    events
        .send(PeerEvent::HandshakeCompleted {
            peer_id: their_handshake.peer_id,
            supports_extended: their_handshake.supports_extended(),
        })
        .await
        .ok();

    let mut framed = Framed::new(stream, PeerCodec::default());
    let mut keepalive_tick = tokio::time::interval(std::time::Duration::from_secs(5));

    loop {
        tokio::select! {
            incoming = framed.next() => {
                match incoming {
                    Some(Ok(msg)) => {
                        trace!(peer = %conn.addr, ?msg, "received message");
                        if let Some(event) = conn.apply_inbound(msg)? {
                            if events.send(event).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Err(e)) => return Err(translate_wire_error(e)),
                    None => {
                        events.send(PeerEvent::Disconnected { reason: "peer closed connection".into() }).await.ok();
                        break;
                    }
                }
            }
            cmd = outgoing.recv() => {
                match cmd {
                    Some(cmd) => {
                        if !send_command(&mut framed, &mut conn, cmd).await? {
                            break;
                        }
                    }
                    None => break,
                }
            }
            _ = keepalive_tick.tick() => {
                let now = conn.clock.now_millis();
                if conn.timed_out(now) {
                    debug!(peer = %conn.addr, "peer timed out");
                    return Err(SwarmError::Timeout);
                }
                if conn.needs_keepalive(now) {
                    framed.send(Message::KeepAlive).await.map_err(translate_wire_error)?;
                    conn.last_sent_millis = now;
                }
                for request in conn.drain_timed_out_requests(now) {
                    events.send(PeerEvent::RequestTimedOut(request)).await.ok();
                }
                if conn.consecutive_timeouts >= MAX_CONSECUTIVE_TIMEOUTS {
                    warn!(peer = %conn.addr, "dropping peer after consecutive block request timeouts");
                    return Err(SwarmError::Timeout);
                }
            }
        }
    }
    Ok(())
}

async fn send_command<S>(
    framed: &mut Framed<S, PeerCodec>,
    conn: &mut PeerConnection,
    cmd: PeerCommand,
) -> Result<bool, SwarmError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let msg = match cmd {
        PeerCommand::SetAmChoking(choking) => {
            conn.interest.am_choking = choking;
            if choking { Message::Choke } else { Message::Unchoke }
        }
        PeerCommand::SetAmInterested(interested) => {
            conn.interest.am_interested = interested;
            if interested { Message::Interested } else { Message::NotInterested }
        }
        PeerCommand::SendHave(piece) => Message::Have(piece),
        PeerCommand::SendBitfield(bf) => Message::Bitfield(Bytes::from(bf.to_wire_bytes())),
        PeerCommand::Request(req) => {
            conn.record_request_sent(req);
            Message::Request(req)
        }
        PeerCommand::Cancel(req) => {
            conn.forget_request(req.index, req.begin);
            Message::Cancel(req)
        }
        PeerCommand::SendBlock { index, begin, block } => {
            conn.upload_speed.add_bytes(conn.clock.now_millis(), block.len() as u64);
            Message::Piece { index, begin, block }
        }
        PeerCommand::Disconnect => return Ok(false),
    };
    framed.send(msg).await.map_err(translate_wire_error)?;
    conn.last_sent_millis = conn.clock.now_millis();
    Ok(true)
}

fn translate_wire_error(e: WireError) -> SwarmError {
    match e {
        WireError::NotEnoughData { .. } => SwarmError::Protocol("truncated message".into()),
        other => SwarmError::Wire(other),
    }
}
