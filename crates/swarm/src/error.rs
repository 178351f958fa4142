//! The top-level error taxonomy (§7): every peer-local, torrent-fatal, and
//! user-surfaced-but-non-fatal failure funnels through one of these kinds.

use thiserror::Error;

use crate::filesystem::DiskError;
use crate::piece_buffer::PieceBufferError;

#[derive(Debug, Error)]
pub enum SwarmError {
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),
    #[error("protocol violation: {0}")]
    Protocol(String),
    #[error(transparent)]
    Wire(#[from] swarmcore_wire::WireError),
    #[error("piece {piece} failed hash verification")]
    HashMismatch { piece: u32 },
    #[error("disk integrity error: {0}")]
    Integrity(#[from] DiskError),
    #[error("operation timed out")]
    Timeout,
    #[error("tracker error: {0}")]
    Tracker(#[from] swarmcore_tracker::TrackerError),
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),
    #[error("operation cancelled")]
    Cancelled,
    #[error(transparent)]
    PieceBuffer(#[from] PieceBufferError),
    #[error("metainfo error: {0}")]
    Metainfo(#[from] swarmcore_core::metainfo::MetainfoError),
}

/// Where an error should propagate to, per §7's policy: a peer connection
/// failure drops only that peer, a torrent-fatal error stops the whole
/// swarm, and a non-fatal error is only surfaced to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorScope {
    PeerLocal,
    TorrentFatal,
    UserSurfacedNonFatal,
}

impl SwarmError {
    pub fn scope(&self) -> ErrorScope {
        match self {
            SwarmError::Transport(_) | SwarmError::Wire(_) | SwarmError::Protocol(_) | SwarmError::Timeout => {
                ErrorScope::PeerLocal
            }
            SwarmError::Integrity(_) | SwarmError::ResourceExhausted(_) | SwarmError::Metainfo(_) => {
                ErrorScope::TorrentFatal
            }
            SwarmError::HashMismatch { .. } | SwarmError::PieceBuffer(_) => ErrorScope::PeerLocal,
            SwarmError::Tracker(_) => ErrorScope::UserSurfacedNonFatal,
            SwarmError::Cancelled => ErrorScope::UserSurfacedNonFatal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_mismatch_is_peer_local() {
        assert_eq!(SwarmError::HashMismatch { piece: 0 }.scope(), ErrorScope::PeerLocal);
    }

    #[test]
    fn disk_integrity_is_torrent_fatal() {
        let e = SwarmError::Integrity(DiskError::UnknownFileId(1));
        assert_eq!(e.scope(), ErrorScope::TorrentFatal);
    }

    #[test]
    fn tracker_failure_is_user_surfaced_non_fatal() {
        let e = SwarmError::Tracker(swarmcore_tracker::TrackerError::UnsupportedScheme("ftp".into()));
        assert_eq!(e.scope(), ErrorScope::UserSurfacedNonFatal);
    }
}
