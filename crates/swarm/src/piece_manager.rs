//! Rarest-first piece selection with an endgame mode, kept as a plain
//! synchronous struct so it can be unit tested without any async
//! machinery. The [`crate::scheduler`] actor owns one of these and is the
//! only thing that ever calls it.

use std::collections::HashMap;
use std::net::SocketAddr;

use swarmcore_core::{Bitfield, ChunkInfo, Lengths};

use crate::piece_buffer::PieceBuffer;

/// A block assignment handed to a peer connection to request over the
/// wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Assignment {
    pub piece: u32,
    pub chunk: ChunkInfo,
}

/// Result of feeding a just-arrived block into [`PieceManager::block_received`].
#[derive(Debug, Default)]
pub struct BlockOutcome {
    /// `Some` once every chunk of the piece has arrived.
    pub piece_data: Option<Vec<u8>>,
    /// Peers that had redundantly requested this exact block (endgame
    /// mode) and should now be sent `Cancel` for it, since another peer's
    /// copy already won.
    pub cancel: Vec<(SocketAddr, Assignment)>,
}

pub struct PieceManager {
    lengths: Lengths,
    have: Bitfield,
    /// Number of known peers that have each piece; drives rarest-first.
    availability: Vec<u32>,
    peer_bitfields: HashMap<SocketAddr, Bitfield>,
    in_flight: HashMap<u32, PieceBuffer>,
    /// Which peer(s) a given (piece, offset) is currently assigned to.
    /// More than one entry means endgame mode requested it redundantly.
    assigned: HashMap<(u32, u32), Vec<SocketAddr>>,
    /// When a piece last had a block assigned or received, for stall
    /// detection: a piece that hasn't moved in `stall_threshold` is
    /// revoked so other peers can pick up its outstanding requests.
    last_activity: HashMap<u32, u64>,
    /// `max(1% of total pieces, 4)`, rounded up. Fixed at construction
    /// since total piece count never changes for a torrent's lifetime.
    endgame_threshold: usize,
    /// Resource bound (§5): refuse to open a new piece buffer past this
    /// many concurrently in-flight pieces, except in endgame where the
    /// remaining set is already below it by construction.
    max_in_flight_buffers: usize,
    /// Failed-hash-check count per peer. A peer reaching 3 is reported back
    /// to the caller for disconnection; counts are never reset, since a
    /// peer that occasionally completes a good piece between bad ones is
    /// still worth dropping once it's sent three corrupt contributions.
    failure_strikes: HashMap<SocketAddr, u32>,
}

const MAX_FAILURE_STRIKES: u32 = 3;

impl PieceManager {
    pub fn new(lengths: Lengths, have: Bitfield, max_in_flight_buffers: usize) -> Self {
        let total_pieces = lengths.total_pieces() as usize;
        let endgame_threshold = total_pieces.div_ceil(100).max(4);
        Self {
            lengths,
            have,
            availability: vec![0; total_pieces],
            peer_bitfields: HashMap::new(),
            in_flight: HashMap::new(),
            assigned: HashMap::new(),
            last_activity: HashMap::new(),
            endgame_threshold,
            max_in_flight_buffers,
            failure_strikes: HashMap::new(),
        }
    }

    pub fn have(&self) -> &Bitfield {
        &self.have
    }

    pub fn is_complete(&self) -> bool {
        self.have.is_complete()
    }

    fn missing_piece_count(&self) -> usize {
        self.have.missing_pieces().count()
    }

    pub fn is_endgame(&self) -> bool {
        self.missing_piece_count() <= self.endgame_threshold && self.missing_piece_count() > 0
    }

    pub fn peer_connected(&mut self, peer: SocketAddr, bitfield: Bitfield) {
        for piece in 0..bitfield.num_pieces() {
            if bitfield.has(piece) {
                self.availability[piece as usize] += 1;
            }
        }
        self.peer_bitfields.insert(peer, bitfield);
    }

    pub fn peer_have(&mut self, peer: SocketAddr, piece: u32) {
        if let Some(bf) = self.peer_bitfields.get_mut(&peer) {
            if !bf.has(piece) {
                bf.set_have(piece);
                self.availability[piece as usize] += 1;
            }
        }
    }

    pub fn peer_disconnected(&mut self, peer: &SocketAddr) {
        if let Some(bf) = self.peer_bitfields.remove(peer) {
            for piece in 0..bf.num_pieces() {
                if bf.has(piece) {
                    self.availability[piece as usize] = self.availability[piece as usize].saturating_sub(1);
                }
            }
        }
        for peers in self.assigned.values_mut() {
            peers.retain(|p| p != peer);
        }
    }

    /// The peer choked us: any requests we'd sent them are never coming.
    /// Free those block assignments so other peers may claim them; leaves
    /// the peer's known bitfield and the partial piece buffer untouched.
    pub fn peer_choked(&mut self, peer: &SocketAddr) {
        for peers in self.assigned.values_mut() {
            peers.retain(|p| p != peer);
        }
    }

    /// Pieces that haven't seen a block assigned or received in more than
    /// `threshold_millis`: free their outstanding assignments so other
    /// peers can pick them up. Returns the revoked piece indices.
    pub fn revoke_stalled(&mut self, now_millis: u64, threshold_millis: u64) -> Vec<u32> {
        let stalled: Vec<u32> = self
            .last_activity
            .iter()
            .filter(|(_, &last)| now_millis.saturating_sub(last) > threshold_millis)
            .map(|(&piece, _)| piece)
            .collect();
        for &piece in &stalled {
            self.assigned.retain(|(p, _), _| *p != piece);
            self.last_activity.remove(&piece);
        }
        stalled
    }

    /// Whether `peer` has any piece we're still missing — the condition
    /// under which we should declare ourselves interested to them.
    pub fn wants_from(&self, peer: &SocketAddr) -> bool {
        let Some(bf) = self.peer_bitfields.get(peer) else {
            return false;
        };
        (0..self.lengths.total_pieces()).any(|p| bf.has(p) && !self.have.has(p))
    }

    /// Rarest pieces this peer has that we're missing, ordered rarest
    /// first, ties broken by piece index for determinism.
    fn candidate_pieces(&self, peer: &SocketAddr) -> Vec<u32> {
        let Some(bf) = self.peer_bitfields.get(peer) else {
            return Vec::new();
        };
        let mut candidates: Vec<u32> = (0..self.lengths.total_pieces())
            .filter(|&p| bf.has(p) && !self.have.has(p))
            .collect();
        candidates.sort_by_key(|&p| (self.availability[p as usize], p));
        candidates
    }

    /// Assign up to `want` blocks to `peer`, preferring to fill out pieces
    /// already in flight before starting new ones. In endgame mode, the
    /// same block may be assigned to more than one peer.
    pub fn assign_blocks(&mut self, peer: SocketAddr, want: usize, now_millis: u64) -> Vec<Assignment> {
        let mut out = Vec::with_capacity(want);
        let endgame = self.is_endgame();

        // First, fill gaps in pieces already being assembled.
        let in_flight_pieces: Vec<u32> = self.in_flight.keys().copied().collect();
        for piece in in_flight_pieces {
            if out.len() >= want {
                break;
            }
            let Some(bf) = self.peer_bitfields.get(&peer) else { break };
            if !bf.has(piece) {
                continue;
            }
            let buffer = &self.in_flight[&piece];
            for chunk in buffer.missing_chunks() {
                if out.len() >= want {
                    break;
                }
                let key = (piece, chunk.offset);
                let assignees = self.assigned.entry(key).or_default();
                if assignees.contains(&peer) {
                    continue;
                }
                if !assignees.is_empty() && !endgame {
                    continue;
                }
                assignees.push(peer);
                out.push(Assignment { piece, chunk });
                self.last_activity.insert(piece, now_millis);
            }
        }

        // Then start new pieces, rarest first, bounded by max_in_flight_buffers
        // outside endgame (endgame never needs more buffers than are
        // already missing, which is already at or below the bound).
        for piece in self.candidate_pieces(&peer) {
            if out.len() >= want {
                break;
            }
            if self.in_flight.contains_key(&piece) {
                continue;
            }
            if !endgame && self.in_flight.len() >= self.max_in_flight_buffers {
                break;
            }
            let buffer = PieceBuffer::new(piece, &self.lengths);
            for chunk in buffer.missing_chunks() {
                if out.len() >= want {
                    break;
                }
                self.assigned.entry((piece, chunk.offset)).or_default().push(peer);
                out.push(Assignment { piece, chunk });
                self.last_activity.insert(piece, now_millis);
            }
            self.in_flight.insert(piece, buffer);
        }

        out
    }

    /// Record a block arriving from `peer`. `piece_data` is `Some` once
    /// every chunk of the piece has arrived — the caller is responsible
    /// for hashing and, on success, calling [`PieceManager::piece_verified`].
    /// `cancel` lists every other peer that was also asked for this exact
    /// block (endgame mode's redundant requests); the caller should send
    /// each one a `Cancel` so the loser stops wasting bandwidth on it.
    pub fn block_received(&mut self, peer: SocketAddr, piece: u32, offset: u32, data: &[u8], now_millis: u64) -> BlockOutcome {
        let size = data.len() as u32;
        let Some(buffer) = self.in_flight.get_mut(&piece) else {
            return BlockOutcome::default();
        };
        let result = buffer.add_block(peer, offset, data);

        let cancel = if result.is_ok() {
            self.assigned
                .remove(&(piece, offset))
                .into_iter()
                .flatten()
                .filter(|&other| other != peer)
                .map(|other| (other, Assignment { piece, chunk: ChunkInfo { piece, offset, size } }))
                .collect()
        } else {
            Vec::new()
        };

        match result {
            Ok(true) => {
                let buffer = self.in_flight.remove(&piece).expect("just confirmed present above");
                self.last_activity.remove(&piece);
                BlockOutcome { piece_data: Some(buffer.into_data()), cancel }
            }
            Ok(false) => {
                self.last_activity.insert(piece, now_millis);
                BlockOutcome { piece_data: None, cancel }
            }
            Err(_) => BlockOutcome::default(),
        }
    }

    pub fn piece_verified(&mut self, piece: u32) {
        self.have.set_have(piece);
        self.assigned.retain(|(p, _), _| *p != piece);
        self.last_activity.remove(&piece);
    }

    /// A per-block request deadline elapsed without the block arriving:
    /// free just that one (piece, offset) assignment so another peer can
    /// pick it up, leaving the rest of the piece's assignments untouched.
    pub fn request_timed_out(&mut self, peer: &SocketAddr, piece: u32, offset: u32) {
        if let Some(assignees) = self.assigned.get_mut(&(piece, offset)) {
            assignees.retain(|p| p != peer);
        }
    }

    /// Drop the in-flight buffer and any assignment bookkeeping for `piece`
    /// so it gets re-requested from scratch, without attributing blame to
    /// any peer (used for local failures like a disk write error).
    pub fn piece_failed(&mut self, piece: u32) {
        self.in_flight.remove(&piece);
        self.assigned.retain(|(p, _), _| *p != piece);
        self.last_activity.remove(&piece);
    }

    /// A piece failed its hash check: every peer that contributed a block
    /// to it gets a failure strike. Returns the peers that have now hit
    /// `MAX_FAILURE_STRIKES` and should be disconnected.
    pub fn piece_corrupted(&mut self, piece: u32) -> Vec<SocketAddr> {
        let mut dropped = Vec::new();
        if let Some(buffer) = self.in_flight.get(&piece) {
            for &peer in buffer.contributors() {
                let strikes = self.failure_strikes.entry(peer).or_insert(0);
                *strikes += 1;
                if *strikes >= MAX_FAILURE_STRIKES {
                    dropped.push(peer);
                }
            }
        }
        self.piece_failed(piece);
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        format!("127.0.0.1:{port}").parse().unwrap()
    }

    fn full_bitfield(n: u32) -> Bitfield {
        let mut bf = Bitfield::new(n);
        for i in 0..n {
            bf.set_have(i);
        }
        bf
    }

    #[test]
    fn assigns_rarest_piece_first() {
        let lengths = Lengths::with_block_size(32, 8, 8).unwrap();
        let mut pm = PieceManager::new(lengths, Bitfield::new(4), 16);

        let mut bf_common = Bitfield::new(4);
        bf_common.set_have(0);
        bf_common.set_have(1);
        pm.peer_connected(addr(1), bf_common.clone());
        pm.peer_connected(addr(2), bf_common);

        let mut bf_rare = Bitfield::new(4);
        bf_rare.set_have(0);
        bf_rare.set_have(2);
        pm.peer_connected(addr(3), bf_rare);

        let assignments = pm.assign_blocks(addr(3), 1, 0);
        assert_eq!(assignments.len(), 1);
        assert_eq!(assignments[0].piece, 2);
    }

    #[test]
    fn piece_completes_and_is_marked_have() {
        let lengths = Lengths::with_block_size(8, 8, 4).unwrap();
        let mut pm = PieceManager::new(lengths, Bitfield::new(1), 16);
        pm.peer_connected(addr(1), full_bitfield(1));
        let assignments = pm.assign_blocks(addr(1), 10, 0);
        assert_eq!(assignments.len(), 2);

        let mut completed = None;
        for a in &assignments {
            let data = vec![0xAB; a.chunk.size as usize];
            let outcome = pm.block_received(addr(1), a.piece, a.chunk.offset, &data, 0);
            if let Some(piece_data) = outcome.piece_data {
                completed = Some(piece_data);
            }
        }
        assert!(completed.is_some());
        pm.piece_verified(0);
        assert!(pm.have().has(0));
        assert!(pm.is_complete());
    }

    #[test]
    fn endgame_allows_redundant_assignment() {
        let lengths = Lengths::with_block_size(4, 4, 4).unwrap();
        let mut pm = PieceManager::new(lengths, Bitfield::new(1), 16);
        pm.peer_connected(addr(1), full_bitfield(1));
        pm.peer_connected(addr(2), full_bitfield(1));
        assert!(pm.is_endgame());

        let a1 = pm.assign_blocks(addr(1), 1, 0);
        let a2 = pm.assign_blocks(addr(2), 1, 0);
        assert_eq!(a1.len(), 1);
        assert_eq!(a2.len(), 1);
        assert_eq!(a1[0].piece, a2[0].piece);
    }

    #[test]
    fn endgame_winner_cancels_the_loser() {
        let lengths = Lengths::with_block_size(4, 4, 4).unwrap();
        let mut pm = PieceManager::new(lengths, Bitfield::new(1), 16);
        pm.peer_connected(addr(1), full_bitfield(1));
        pm.peer_connected(addr(2), full_bitfield(1));
        assert!(pm.is_endgame());

        let a1 = pm.assign_blocks(addr(1), 1, 0);
        let a2 = pm.assign_blocks(addr(2), 1, 0);
        assert_eq!(a1[0].piece, a2[0].piece);
        assert_eq!(a1[0].chunk.offset, a2[0].chunk.offset);

        let data = vec![0xCD; a1[0].chunk.size as usize];
        let outcome = pm.block_received(addr(1), a1[0].piece, a1[0].chunk.offset, &data, 0);
        assert!(outcome.piece_data.is_some());
        assert_eq!(outcome.cancel.len(), 1);
        assert_eq!(outcome.cancel[0].0, addr(2));
        assert_eq!(outcome.cancel[0].1.piece, a1[0].piece);
        assert_eq!(outcome.cancel[0].1.chunk.offset, a1[0].chunk.offset);

        // A later, now-redundant delivery from the loser cancels nobody.
        let late = pm.block_received(addr(2), a1[0].piece, a1[0].chunk.offset, &data, 0);
        assert!(late.cancel.is_empty());
    }

    #[test]
    fn endgame_threshold_scales_with_piece_count() {
        let lengths = Lengths::with_block_size(4_000, 4, 4).unwrap();
        let pm = PieceManager::new(lengths, Bitfield::new(1_000), 16);
        assert_eq!(pm.endgame_threshold, 10, "1% of 1000 pieces, not the flat floor of 4");
    }

    #[test]
    fn peer_disconnect_reduces_availability_and_frees_assignment() {
        let lengths = Lengths::with_block_size(8, 8, 8).unwrap();
        let mut pm = PieceManager::new(lengths, Bitfield::new(1), 16);
        pm.peer_connected(addr(1), full_bitfield(1));
        let _ = pm.assign_blocks(addr(1), 1, 0);
        pm.peer_disconnected(&addr(1));
        assert_eq!(pm.availability[0], 0);
    }

    #[test]
    fn new_piece_buffers_are_capped_outside_endgame() {
        // 10 pieces, cap of 1 in-flight buffer: the second piece can't
        // open a new buffer while the first is still outstanding, even
        // though the peer has plenty of other pieces to offer.
        let lengths = Lengths::with_block_size(40, 4, 4).unwrap();
        let mut pm = PieceManager::new(lengths, Bitfield::new(10), 1);
        pm.peer_connected(addr(1), full_bitfield(10));
        assert!(!pm.is_endgame());

        let first = pm.assign_blocks(addr(1), 10, 0);
        assert_eq!(first.len(), 1, "only one block of one piece, bounded by the buffer cap");
        assert_eq!(pm.in_flight.len(), 1);

        let second = pm.assign_blocks(addr(1), 10, 0);
        assert!(second.is_empty(), "no room for a second piece buffer while the first is still open");
    }

    #[test]
    fn wants_from_reflects_missing_pieces_only() {
        let lengths = Lengths::with_block_size(8, 4, 4).unwrap();
        let mut pm = PieceManager::new(lengths, Bitfield::new(2), 16);
        pm.peer_connected(addr(1), full_bitfield(2));
        assert!(pm.wants_from(&addr(1)));

        pm.piece_verified(0);
        pm.piece_verified(1);
        assert!(!pm.wants_from(&addr(1)));
    }

    #[test]
    fn third_corrupt_contribution_drops_the_peer() {
        let lengths = Lengths::with_block_size(8, 8, 4).unwrap();
        let mut pm = PieceManager::new(lengths, Bitfield::new(1), 16);
        pm.peer_connected(addr(1), full_bitfield(1));

        for _ in 0..2 {
            pm.assign_blocks(addr(1), 10, 0);
            let dropped = pm.piece_corrupted(0);
            assert!(dropped.is_empty());
        }
        pm.assign_blocks(addr(1), 10, 0);
        let dropped = pm.piece_corrupted(0);
        assert_eq!(dropped, vec![addr(1)]);
    }

    #[test]
    fn piece_failed_clears_in_flight_buffer() {
        let lengths = Lengths::with_block_size(8, 8, 4).unwrap();
        let mut pm = PieceManager::new(lengths, Bitfield::new(1), 16);
        pm.peer_connected(addr(1), full_bitfield(1));
        pm.assign_blocks(addr(1), 1, 0);
        pm.piece_failed(0);
        // Re-assigning from scratch should work without panicking, and
        // starts a fresh PieceBuffer (no stale partial data lingers).
        let assignments = pm.assign_blocks(addr(1), 10, 0);
        assert_eq!(assignments.len(), 2);
    }

    #[test]
    fn choke_frees_assignment_for_other_peers() {
        // Five missing pieces keeps this out of endgame mode, so a block
        // already assigned to one peer is normally off-limits to another.
        let lengths = Lengths::with_block_size(20, 4, 4).unwrap();
        let mut pm = PieceManager::new(lengths, Bitfield::new(5), 16);
        pm.peer_connected(addr(1), full_bitfield(5));
        pm.peer_connected(addr(2), full_bitfield(5));
        assert!(!pm.is_endgame());

        let a1 = pm.assign_blocks(addr(1), 1, 0);
        assert_eq!(a1[0].piece, 0);
        let a2_before = pm.assign_blocks(addr(2), 1, 0);
        assert_eq!(a2_before[0].piece, 1, "piece 0 is already spoken for outside endgame");

        pm.peer_choked(&addr(1));
        let a2_after = pm.assign_blocks(addr(2), 1, 0);
        assert_eq!(a2_after[0].piece, 0, "freed once addr(1) no longer holds the request");
    }

    #[test]
    fn timed_out_request_frees_just_that_block() {
        // Five missing pieces keeps this out of endgame mode, so freeing
        // one block shouldn't make the rest up for grabs too.
        let lengths = Lengths::with_block_size(40, 8, 4).unwrap();
        let mut pm = PieceManager::new(lengths, Bitfield::new(5), 16);
        pm.peer_connected(addr(1), full_bitfield(5));
        pm.peer_connected(addr(2), full_bitfield(5));
        assert!(!pm.is_endgame());

        let assignments = pm.assign_blocks(addr(1), 10, 0);
        assert_eq!(assignments.len(), 10, "two blocks each for five pieces");

        pm.request_timed_out(&addr(1), assignments[0].piece, assignments[0].chunk.offset);
        let reassigned = pm.assign_blocks(addr(2), 10, 0);
        assert_eq!(reassigned.len(), 1, "only the timed-out block is up for grabs");
        assert_eq!(reassigned[0].piece, assignments[0].piece);
        assert_eq!(reassigned[0].chunk.offset, assignments[0].chunk.offset);
    }

    #[test]
    fn stalled_piece_is_revoked_after_threshold() {
        let lengths = Lengths::with_block_size(4, 4, 4).unwrap();
        let mut pm = PieceManager::new(lengths, Bitfield::new(1), 16);
        pm.peer_connected(addr(1), full_bitfield(1));
        pm.assign_blocks(addr(1), 1, 1_000);

        assert!(pm.revoke_stalled(1_001, 30_000).is_empty());
        let revoked = pm.revoke_stalled(40_000, 30_000);
        assert_eq!(revoked, vec![0]);

        // Freed for reassignment even to the same peer, since the buffer
        // itself (and any blocks it already received) is untouched.
        let reassigned = pm.assign_blocks(addr(1), 1, 40_000);
        assert_eq!(reassigned.len(), 1);
    }
}
