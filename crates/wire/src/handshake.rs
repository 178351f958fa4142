//! The 68-byte BitTorrent handshake that precedes all message traffic.

use swarmcore_core::Id20;

use crate::error::WireError;

const PSTR: &str = "BitTorrent protocol";
pub const HANDSHAKE_LEN: usize = 1 + 19 + 8 + 20 + 20;

/// Bit 20 (counting from the low end of the 8-byte reserved field, byte 5
/// from the left) advertises BEP 10 extension protocol support.
const EXTENDED_RESERVED_BIT: u64 = 1 << 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handshake {
    pub reserved: u64,
    pub info_hash: Id20,
    pub peer_id: Id20,
}

impl Handshake {
    pub fn new(info_hash: Id20, peer_id: Id20) -> Self {
        Self {
            reserved: EXTENDED_RESERVED_BIT,
            info_hash,
            peer_id,
        }
    }

    pub fn supports_extended(&self) -> bool {
        self.reserved & EXTENDED_RESERVED_BIT != 0
    }

    pub fn serialize(&self) -> [u8; HANDSHAKE_LEN] {
        let mut buf = [0u8; HANDSHAKE_LEN];
        buf[0] = PSTR.len() as u8;
        buf[1..20].copy_from_slice(PSTR.as_bytes());
        buf[20..28].copy_from_slice(&self.reserved.to_be_bytes());
        buf[28..48].copy_from_slice(self.info_hash.as_bytes());
        buf[48..68].copy_from_slice(self.peer_id.as_bytes());
        buf
    }

    /// Returns the parsed handshake and the number of bytes consumed
    /// (always [`HANDSHAKE_LEN`] on success).
    pub fn deserialize(buf: &[u8]) -> Result<(Self, usize), WireError> {
        if buf.len() < HANDSHAKE_LEN {
            return Err(WireError::NotEnoughData {
                needed: HANDSHAKE_LEN - buf.len(),
            });
        }
        if buf[0] as usize != PSTR.len() {
            return Err(WireError::HandshakePstrWrongLength(buf[0]));
        }
        if &buf[1..20] != PSTR.as_bytes() {
            return Err(WireError::HandshakePstrWrongContent);
        }
        let reserved = u64::from_be_bytes(buf[20..28].try_into().unwrap());
        let info_hash = Id20::from_slice(&buf[28..48]).expect("exactly 20 bytes");
        let peer_id = Id20::from_slice(&buf[48..68]).expect("exactly 20 bytes");
        Ok((
            Self {
                reserved,
                info_hash,
                peer_id,
            },
            HANDSHAKE_LEN,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_exactly_68_bytes() {
        let hs = Handshake::new(Id20::new([1u8; 20]), Id20::new([2u8; 20]));
        let bytes = hs.serialize();
        assert_eq!(bytes.len(), HANDSHAKE_LEN);
        let (back, len) = Handshake::deserialize(&bytes).unwrap();
        assert_eq!(len, HANDSHAKE_LEN);
        assert_eq!(hs, back);
        assert!(back.supports_extended());
    }

    #[test]
    fn rejects_short_buffer() {
        let hs = Handshake::new(Id20::new([1u8; 20]), Id20::new([2u8; 20]));
        let bytes = hs.serialize();
        assert!(matches!(
            Handshake::deserialize(&bytes[..10]),
            Err(WireError::NotEnoughData { .. })
        ));
    }

    #[test]
    fn rejects_wrong_pstr() {
        let mut bytes = Handshake::new(Id20::new([0u8; 20]), Id20::new([0u8; 20])).serialize();
        bytes[1] = b'X';
        assert!(matches!(
            Handshake::deserialize(&bytes),
            Err(WireError::HandshakePstrWrongContent)
        ));
    }
}
