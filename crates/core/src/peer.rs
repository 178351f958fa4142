//! Peer addressing: parsing the compact peer list format (BEP 23) trackers
//! return, alongside a plain `SocketAddr` for the non-compact case.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PeerAddrError {
    #[error("compact peer list length {0} is not a multiple of 6")]
    BadCompactLength(usize),
}

/// Parse a BEP 23 compact peer list: each peer is 4 bytes of IPv4 address
/// followed by 2 bytes of big-endian port.
pub fn parse_compact_peers(bytes: &[u8]) -> Result<Vec<SocketAddr>, PeerAddrError> {
    if bytes.len() % 6 != 0 {
        return Err(PeerAddrError::BadCompactLength(bytes.len()));
    }
    Ok(bytes
        .chunks_exact(6)
        .map(|chunk| {
            let ip = Ipv4Addr::new(chunk[0], chunk[1], chunk[2], chunk[3]);
            let port = u16::from_be_bytes([chunk[4], chunk[5]]);
            SocketAddr::V4(SocketAddrV4::new(ip, port))
        })
        .collect())
}

/// Inverse of [`parse_compact_peers`], for tests and for UDP tracker
/// announces that may need to re-serialize a peer list.
pub fn encode_compact_peers(peers: &[SocketAddr]) -> Vec<u8> {
    let mut out = Vec::with_capacity(peers.len() * 6);
    for peer in peers {
        if let SocketAddr::V4(v4) = peer {
            out.extend_from_slice(&v4.ip().octets());
            out.extend_from_slice(&v4.port().to_be_bytes());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_compact_peer_list() {
        let peers = vec![
            SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::new(1, 2, 3, 4), 8080)),
            SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::new(255, 255, 255, 255), 1)),
        ];
        let compact = encode_compact_peers(&peers);
        assert_eq!(compact.len(), 12);
        assert_eq!(parse_compact_peers(&compact).unwrap(), peers);
    }

    #[test]
    fn rejects_length_not_multiple_of_six() {
        assert_eq!(parse_compact_peers(&[0u8; 7]), Err(PeerAddrError::BadCompactLength(7)));
    }

    #[test]
    fn known_scenario_from_spec() {
        // 1.2.3.4:8080
        let bytes = [0x01, 0x02, 0x03, 0x04, 0x1f, 0x90];
        let peers = parse_compact_peers(&bytes).unwrap();
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].to_string(), "1.2.3.4:8080");
    }
}
