//! Accumulates blocks for one in-flight piece until every chunk has
//! arrived, then hands the assembled bytes off for SHA-1 verification.
//! A block that arrives twice (the endgame mode requests the same block
//! from several peers at once) is accepted idempotently rather than
//! treated as an error.

use std::collections::HashSet;
use std::net::SocketAddr;

use swarmcore_core::lengths::ChunkInfo;
use swarmcore_core::Lengths;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PieceBufferError {
    #[error("block at offset {offset} length {length} does not match any expected chunk of piece {piece}")]
    UnknownChunk { piece: u32, offset: u32, length: u32 },
}

pub struct PieceBuffer {
    piece: u32,
    data: Vec<u8>,
    have: Vec<bool>,
    chunks: Vec<ChunkInfo>,
    received_count: usize,
    /// Every peer that has sent a block accepted into this piece, kept so a
    /// failed hash check can be attributed back to whoever contributed data.
    contributors: HashSet<SocketAddr>,
}

impl PieceBuffer {
    pub fn new(piece: u32, lengths: &Lengths) -> Self {
        let chunks = lengths.chunks_for_piece(piece);
        let piece_len = lengths.piece_length_for(piece) as usize;
        Self {
            piece,
            data: vec![0u8; piece_len],
            have: vec![false; chunks.len()],
            chunks,
            received_count: 0,
            contributors: HashSet::new(),
        }
    }

    pub fn piece(&self) -> u32 {
        self.piece
    }

    pub fn contributors(&self) -> &HashSet<SocketAddr> {
        &self.contributors
    }

    /// Add a block from `peer`. Returns whether the piece is now fully
    /// assembled.
    pub fn add_block(&mut self, peer: SocketAddr, offset: u32, block: &[u8]) -> Result<bool, PieceBufferError> {
        let idx = self
            .chunks
            .iter()
            .position(|c| c.offset == offset && c.size as usize == block.len())
            .ok_or(PieceBufferError::UnknownChunk {
                piece: self.piece,
                offset,
                length: block.len() as u32,
            })?;

        self.contributors.insert(peer);
        if !self.have[idx] {
            let start = offset as usize;
            self.data[start..start + block.len()].copy_from_slice(block);
            self.have[idx] = true;
            self.received_count += 1;
        }
        Ok(self.is_complete())
    }

    pub fn is_complete(&self) -> bool {
        self.received_count == self.chunks.len()
    }

    pub fn missing_chunks(&self) -> impl Iterator<Item = ChunkInfo> + '_ {
        self.chunks
            .iter()
            .zip(self.have.iter())
            .filter(|(_, have)| !**have)
            .map(|(c, _)| *c)
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }
}
