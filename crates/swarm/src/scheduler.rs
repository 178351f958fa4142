//! The scheduler actor: sole owner of piece-selection and choking state.
//! Peer connections never touch this state directly — they send
//! [`SchedulerMessage`]s over an `mpsc` channel and receive
//! [`crate::peer_connection::PeerCommand`]s back, per the single-owner
//! design that avoids locking a shared piece map from many peer tasks.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;
use swarmcore_core::{Bitfield, Id20, Lengths, SwarmConfig};
use swarmcore_sha1::Hasher;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::choke::{ChokeManager, PeerSnapshot};
use crate::clock::Clock;
use crate::disk_manager::DiskManager;
use crate::error::SwarmError;
use crate::events::SwarmEvent;
use crate::peer_connection::{PeerCommand, PeerEvent};
use crate::piece_manager::PieceManager;

/// Largest block length we'll honor in an inbound `Request`, per the base
/// protocol's conventional 16 KiB block size times a safety margin (2^17).
/// Anything bigger is dropped rather than read off disk and echoed back.
const MAX_REQUEST_LENGTH: u32 = 1 << 17;

/// Regular (non-optimistic) unchoke slots. Fixed rather than derived from
/// `max_peers`: the choking algorithm's fairness properties depend on this
/// staying small regardless of how many peers we're willing to hold open.
const REGULAR_UNCHOKE_SLOTS: usize = 4;

struct PeerHandle {
    cmd_tx: mpsc::Sender<PeerCommand>,
    download_speed_snapshot: f64,
    upload_speed_snapshot: f64,
    peer_interested: bool,
    peer_choking: bool,
    am_choking: bool,
    am_interested: bool,
    in_flight_requests: usize,
}

pub enum SchedulerMessage {
    PeerConnected {
        addr: SocketAddr,
        cmd_tx: mpsc::Sender<PeerCommand>,
    },
    PeerEvent {
        addr: SocketAddr,
        event: PeerEvent,
    },
    PeerSpeedSample {
        addr: SocketAddr,
        download_bps: f64,
        upload_bps: f64,
    },
    PeerDisconnected {
        addr: SocketAddr,
    },
    Tick,
}

pub struct Scheduler {
    lengths: Lengths,
    piece_hashes: Vec<Id20>,
    piece_manager: PieceManager,
    disk: Arc<DiskManager>,
    hasher: Arc<dyn Hasher>,
    config: SwarmConfig,
    clock: Arc<dyn Clock>,
    choke: ChokeManager<SocketAddr>,
    peers: HashMap<SocketAddr, PeerHandle>,
    events_tx: mpsc::Sender<SwarmEvent>,
    rng: StdRng,
    complete_announced: bool,
}

impl Scheduler {
    pub fn new(
        lengths: Lengths,
        piece_hashes: Vec<Id20>,
        have: Bitfield,
        disk: Arc<DiskManager>,
        hasher: Arc<dyn Hasher>,
        config: SwarmConfig,
        clock: Arc<dyn Clock>,
        events_tx: mpsc::Sender<SwarmEvent>,
    ) -> Self {
        let choke = ChokeManager::new(
            REGULAR_UNCHOKE_SLOTS,
            (config.optimistic_unchoke_interval.as_secs() / config.choke_interval.as_secs().max(1)) as u32,
        );
        let complete_announced = have.is_complete();
        Self {
            piece_manager: PieceManager::new(lengths, have, config.max_piece_buffers),
            lengths,
            piece_hashes,
            disk,
            hasher,
            config,
            clock,
            choke,
            peers: HashMap::new(),
            events_tx,
            rng: StdRng::from_entropy(),
            complete_announced,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.piece_manager.is_complete()
    }

    /// Drive the actor for the life of the torrent: processes messages from
    /// `rx` until the channel closes. Completion doesn't stop the actor —
    /// per the choking algorithm, a complete torrent keeps running and
    /// seeds the peers still interested in it, ranking unchoke slots by
    /// upload rate instead of download rate.
    pub async fn run(mut self, mut rx: mpsc::Receiver<SchedulerMessage>) {
        while let Some(msg) = rx.recv().await {
            self.handle(msg).await;
            if self.is_complete() && !self.complete_announced {
                self.complete_announced = true;
                self.events_tx.send(SwarmEvent::Complete).await.ok();
            }
        }
    }

    async fn handle(&mut self, msg: SchedulerMessage) {
        match msg {
            SchedulerMessage::PeerConnected { addr, cmd_tx } => {
                if self.peers.len() >= self.config.max_peers {
                    let err = SwarmError::ResourceExhausted(format!(
                        "max_peers ({}) reached, rejecting {addr}",
                        self.config.max_peers
                    ));
                    warn!(peer = %addr, "{err}");
                    cmd_tx.send(PeerCommand::Disconnect).await.ok();
                    self.events_tx.send(SwarmEvent::NonFatalError { message: err.to_string() }).await.ok();
                    return;
                }
                self.peers.insert(
                    addr,
                    PeerHandle {
                        cmd_tx,
                        download_speed_snapshot: 0.0,
                        upload_speed_snapshot: 0.0,
                        peer_interested: false,
                        peer_choking: true,
                        am_choking: true,
                        am_interested: false,
                        in_flight_requests: 0,
                    },
                );
                self.events_tx.send(SwarmEvent::Connected { peer: addr }).await.ok();
                let bf = self.piece_manager.have().clone();
                self.send(addr, PeerCommand::SendBitfield(bf)).await;
            }
            SchedulerMessage::PeerDisconnected { addr } => {
                self.peers.remove(&addr);
                self.piece_manager.peer_disconnected(&addr);
                self.events_tx.send(SwarmEvent::Disconnected { peer: addr }).await.ok();
            }
            SchedulerMessage::PeerSpeedSample { addr, download_bps, upload_bps } => {
                if let Some(handle) = self.peers.get_mut(&addr) {
                    handle.download_speed_snapshot = download_bps;
                    handle.upload_speed_snapshot = upload_bps;
                }
            }
            SchedulerMessage::PeerEvent { addr, event } => self.handle_peer_event(addr, event).await,
            SchedulerMessage::Tick => {
                let revoked = self.piece_manager.revoke_stalled(
                    self.clock.now_millis(),
                    self.config.stall_threshold.as_millis() as u64,
                );
                for piece in revoked {
                    warn!(piece, "piece buffer stalled, revoking outstanding requests");
                }
                self.run_choke_cycle().await;
                self.fill_pipelines().await;
                self.report_progress().await;
            }
        }
    }

    async fn handle_peer_event(&mut self, addr: SocketAddr, event: PeerEvent) {
        match event {
            PeerEvent::BitfieldReceived(raw) => {
                let bf = reinterpret_bitfield(&raw, self.lengths.total_pieces());
                self.piece_manager.peer_connected(addr, bf);
                self.update_interest(addr).await;
            }
            PeerEvent::Have(piece) => {
                self.piece_manager.peer_have(addr, piece);
                self.update_interest(addr).await;
            }
            PeerEvent::PeerChoking(choking) => {
                if let Some(h) = self.peers.get_mut(&addr) {
                    h.peer_choking = choking;
                    if choking {
                        h.in_flight_requests = 0;
                    }
                }
                if choking {
                    self.piece_manager.peer_choked(&addr);
                }
            }
            PeerEvent::PeerInterested(interested) => {
                if let Some(h) = self.peers.get_mut(&addr) {
                    h.peer_interested = interested;
                }
            }
            PeerEvent::BlockRequested(req) => {
                if req.length > MAX_REQUEST_LENGTH {
                    warn!(peer = %addr, length = req.length, "dropping request over max allowed length");
                    return;
                }
                if self.peers.get(&addr).is_some_and(|h| !h.am_choking) {
                    match self.disk.read_chunk(req.index, req.begin, req.length) {
                        Ok(block) => {
                            self.send(
                                addr,
                                PeerCommand::SendBlock { index: req.index, begin: req.begin, block: block.into() },
                            )
                            .await;
                        }
                        Err(e) => warn!(peer = %addr, error = %e, "failed to read requested chunk from disk"),
                    }
                }
            }
            PeerEvent::BlockReceived { piece, offset, data } => {
                if let Some(h) = self.peers.get_mut(&addr) {
                    h.in_flight_requests = h.in_flight_requests.saturating_sub(1);
                }
                let now = self.clock.now_millis();
                let outcome = self.piece_manager.block_received(addr, piece, offset, &data, now);
                for (loser, assignment) in outcome.cancel {
                    let req = swarmcore_wire::Request::new(assignment.piece, assignment.chunk.offset, assignment.chunk.size);
                    if let Some(h) = self.peers.get_mut(&loser) {
                        h.in_flight_requests = h.in_flight_requests.saturating_sub(1);
                    }
                    self.send(loser, PeerCommand::Cancel(req)).await;
                }
                if let Some(piece_data) = outcome.piece_data {
                    self.verify_and_commit(piece, piece_data).await;
                }
            }
            PeerEvent::RequestTimedOut(req) => {
                if let Some(h) = self.peers.get_mut(&addr) {
                    h.in_flight_requests = h.in_flight_requests.saturating_sub(1);
                }
                self.piece_manager.request_timed_out(&addr, req.index, req.begin);
                warn!(peer = %addr, piece = req.index, offset = req.begin, "block request timed out");
            }
            PeerEvent::HandshakeCompleted { .. }
            | PeerEvent::ExtendedHandshake(_)
            | PeerEvent::CancelReceived(_)
            | PeerEvent::Disconnected { .. } => {}
        }
    }

    /// Declare or withdraw interest in `addr` based on whether they still
    /// have anything we're missing. A real peer only unchokes peers that
    /// have told it they're interested, so this must run whenever our view
    /// of `addr`'s availability changes.
    async fn update_interest(&mut self, addr: SocketAddr) {
        let wants = self.piece_manager.wants_from(&addr);
        let already = self.peers.get(&addr).map(|h| h.am_interested).unwrap_or(wants);
        if wants != already {
            if let Some(h) = self.peers.get_mut(&addr) {
                h.am_interested = wants;
            }
            self.send(addr, PeerCommand::SetAmInterested(wants)).await;
        }
    }

    /// Re-check interest in every connected peer; called after a piece is
    /// verified, since that can only shrink what we still want from them.
    async fn refresh_all_interest(&mut self) {
        let addrs: Vec<SocketAddr> = self.peers.keys().copied().collect();
        for addr in addrs {
            self.update_interest(addr).await;
        }
    }

    async fn verify_and_commit(&mut self, piece: u32, data: Vec<u8>) {
        let expected = self.piece_hashes.get(piece as usize).copied();
        let actual = Id20::new(self.hasher.sha1(&data));
        if Some(actual) == expected {
            if let Err(e) = self.disk.write_chunk(piece, 0, &data) {
                warn!(piece, error = %e, "failed writing verified piece to disk");
                self.events_tx
                    .send(SwarmEvent::NonFatalError { message: format!("disk write failed for piece {piece}: {e}") })
                    .await
                    .ok();
                self.piece_manager.piece_failed(piece);
                return;
            }
            self.piece_manager.piece_verified(piece);
            self.events_tx.send(SwarmEvent::PieceVerified { piece }).await.ok();
            let addrs: Vec<SocketAddr> = self.peers.keys().copied().collect();
            for addr in addrs {
                self.send(addr, PeerCommand::SendHave(piece)).await;
            }
            self.refresh_all_interest().await;
        } else {
            warn!(piece, "piece failed hash verification, discarding");
            let strikeout = self.piece_manager.piece_corrupted(piece);
            self.events_tx.send(SwarmEvent::PieceHashMismatch { piece }).await.ok();
            for addr in strikeout {
                warn!(peer = %addr, "peer hit max failure strikes, disconnecting");
                self.send(addr, PeerCommand::Disconnect).await;
                self.piece_manager.peer_disconnected(&addr);
                self.peers.remove(&addr);
                self.events_tx.send(SwarmEvent::Disconnected { peer: addr }).await.ok();
            }
        }
    }

    async fn run_choke_cycle(&mut self) {
        let seeding = self.is_complete();
        let snapshots: Vec<PeerSnapshot<SocketAddr>> = self
            .peers
            .iter()
            .map(|(addr, h)| PeerSnapshot {
                id: *addr,
                download_rate: if seeding { h.upload_speed_snapshot } else { h.download_speed_snapshot },
                interested: h.peer_interested,
            })
            .collect();
        let unchoked = self.choke.tick(&snapshots, &mut self.rng);
        let addrs: Vec<SocketAddr> = self.peers.keys().copied().collect();
        for addr in addrs {
            let should_unchoke = unchoked.contains(&addr);
            let currently_choking = self.peers.get(&addr).map(|h| h.am_choking).unwrap_or(true);
            if should_unchoke == currently_choking {
                if let Some(h) = self.peers.get_mut(&addr) {
                    h.am_choking = !should_unchoke;
                }
                self.send(addr, PeerCommand::SetAmChoking(!should_unchoke)).await;
            }
        }
    }

    /// For every peer we're not choked by, top up outstanding requests to
    /// its pipeline depth: `clamp(ceil(download_rate / block_size) + 2, 2,
    /// 256)`, so a fast peer earns a deeper pipeline and a fresh or slow
    /// one stays near the floor.
    async fn fill_pipelines(&mut self) {
        let now = self.clock.now_millis();
        let block_size = self.lengths.block_size() as f64;
        let addrs: Vec<SocketAddr> = self.peers.keys().copied().collect();
        for addr in addrs {
            let want = match self.peers.get(&addr) {
                Some(h) if h.am_interested && !h.peer_choking => {
                    let depth = self
                        .config
                        .clamp_pipeline_depth((h.download_speed_snapshot / block_size).ceil() as usize + 2);
                    depth.saturating_sub(h.in_flight_requests)
                }
                _ => continue,
            };
            if want == 0 {
                continue;
            }
            let assignments = self.piece_manager.assign_blocks(addr, want, now);
            if assignments.is_empty() {
                continue;
            }
            if let Some(h) = self.peers.get_mut(&addr) {
                h.in_flight_requests += assignments.len();
            }
            for a in assignments {
                let req = swarmcore_wire::Request::new(a.piece, a.chunk.offset, a.chunk.size);
                self.send(addr, PeerCommand::Request(req)).await;
            }
        }
    }

    async fn report_progress(&mut self) {
        let have = self.piece_manager.have();
        let download_rate: f64 = self.peers.values().map(|h| h.download_speed_snapshot).sum();
        let upload_rate: f64 = self.peers.values().map(|h| h.upload_speed_snapshot).sum();
        self.events_tx
            .send(SwarmEvent::Progress {
                have_pieces: have.count_have(),
                total_pieces: self.lengths.total_pieces() as usize,
                download_rate,
                upload_rate,
            })
            .await
            .ok();
    }

    async fn send(&self, addr: SocketAddr, cmd: PeerCommand) {
        if let Some(handle) = self.peers.get(&addr) {
            if handle.cmd_tx.send(cmd).await.is_err() {
                info!(peer = %addr, "peer command channel closed");
            }
        }
    }
}

/// A `Bitfield` received over the wire is parsed without knowing the
/// torrent's real piece count (see [`crate::peer_connection`]); re-parse
/// its raw bytes against the known count here.
fn reinterpret_bitfield(raw: &Bitfield, total_pieces: u32) -> Bitfield {
    let wire = raw.to_wire_bytes();
    Bitfield::from_wire_bytes(&wire, total_pieces).unwrap_or_else(|_| Bitfield::new(total_pieces))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FakeClock;
    use crate::filesystem::InMemoryFilesystem;
    use std::path::Path;
    use swarmcore_core::metainfo::{FileEntry, Info};
    use swarmcore_sha1::RealHasher;

    fn setup() -> (Scheduler, Lengths) {
        let info = Info {
            name: "t".into(),
            piece_length: 4,
            pieces: vec![],
            files: vec![FileEntry { path: "t".into(), length: 8 }],
        };
        let lengths = Lengths::with_block_size(8, 4, 4).unwrap();
        let fs: Arc<dyn crate::filesystem::Filesystem> = Arc::new(InMemoryFilesystem::new());
        let disk = Arc::new(DiskManager::new(fs, &info, lengths, Path::new("/tmp")).unwrap());
        let piece_a = [0u8; 4];
        let piece_b = [1u8; 4];
        let hashes = vec![
            Id20::new(swarmcore_sha1::hash_one_shot(&piece_a)),
            Id20::new(swarmcore_sha1::hash_one_shot(&piece_b)),
        ];
        let (tx, _rx) = mpsc::channel(16);
        let scheduler = Scheduler::new(
            lengths,
            hashes,
            Bitfield::new(2),
            disk,
            Arc::new(RealHasher),
            SwarmConfig::default(),
            Arc::new(FakeClock::new(0)),
            tx,
        );
        (scheduler, lengths)
    }

    #[tokio::test]
    async fn verified_piece_marks_have_and_writes_disk() {
        let (mut scheduler, _lengths) = setup();
        scheduler.verify_and_commit(0, vec![0u8; 4]).await;
        assert!(scheduler.piece_manager.have().has(0));
    }

    #[tokio::test]
    async fn hash_mismatch_does_not_mark_have() {
        let (mut scheduler, _lengths) = setup();
        scheduler.verify_and_commit(0, vec![0xFFu8; 4]).await;
        assert!(!scheduler.piece_manager.have().has(0));
    }

    #[tokio::test]
    async fn bitfield_with_wanted_piece_declares_interest() {
        let (mut scheduler, _lengths) = setup();
        let addr: SocketAddr = "127.0.0.1:1".parse().unwrap();
        let (cmd_tx, mut cmd_rx) = mpsc::channel(16);
        scheduler.handle(SchedulerMessage::PeerConnected { addr, cmd_tx }).await;
        assert!(matches!(cmd_rx.recv().await, Some(PeerCommand::SendBitfield(_))));

        let mut bf = Bitfield::new(2);
        bf.set_have(0);
        bf.set_have(1);
        scheduler.handle_peer_event(addr, PeerEvent::BitfieldReceived(bf)).await;
        assert!(matches!(cmd_rx.recv().await, Some(PeerCommand::SetAmInterested(true))));
        assert!(scheduler.peers.get(&addr).unwrap().am_interested);
    }

    #[tokio::test]
    async fn peer_connect_and_disconnect_updates_registry() {
        let (mut scheduler, _lengths) = setup();
        let (cmd_tx, mut cmd_rx) = mpsc::channel(16);
        scheduler.handle(SchedulerMessage::PeerConnected { addr: "127.0.0.1:1".parse().unwrap(), cmd_tx }).await;
        assert_eq!(scheduler.peers.len(), 1);
        assert!(matches!(cmd_rx.recv().await, Some(PeerCommand::SendBitfield(_))));
        scheduler.handle(SchedulerMessage::PeerDisconnected { addr: "127.0.0.1:1".parse().unwrap() }).await;
        assert!(scheduler.peers.is_empty());
    }
}
