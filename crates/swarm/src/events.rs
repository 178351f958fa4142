//! Events the swarm surfaces to its caller (the CLI, or any other thin
//! external collaborator): progress updates, completion, and non-fatal
//! errors worth telling a user about.

use std::net::SocketAddr;

use swarmcore_core::Id20;

#[derive(Debug, Clone, PartialEq)]
pub enum SwarmEvent {
    /// A piece passed SHA-1 verification and was written to disk.
    PieceVerified { piece: u32 },
    /// A piece failed SHA-1 verification; its blocks are discarded and
    /// re-requested.
    PieceHashMismatch { piece: u32 },
    /// Periodic progress: bytes downloaded/uploaded this tick and current
    /// estimated rates.
    Progress {
        have_pieces: usize,
        total_pieces: usize,
        download_rate: f64,
        upload_rate: f64,
    },
    Connected { peer: SocketAddr },
    Disconnected { peer: SocketAddr },
    /// All pieces verified; the torrent is complete.
    Complete,
    /// Something went wrong with a single peer or tracker; the torrent
    /// keeps running.
    NonFatalError { message: String },
    /// The torrent itself can no longer make progress.
    Fatal { message: String },
}

impl SwarmEvent {
    pub fn piece_verified(piece: u32) -> Self {
        Self::PieceVerified { piece }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TorrentIdentity {
    pub info_hash: Id20,
}
