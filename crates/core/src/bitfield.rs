//! A peer's or our own record of which pieces are held. Once a bit is set
//! it is never cleared: there is no public way to "unhave" a piece, which
//! is the monotonicity invariant §3 requires of this type.

use bitvec::prelude::*;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitfield {
    bits: BitVec<u8, Msb0>,
}

impl Bitfield {
    pub fn new(num_pieces: u32) -> Self {
        Self {
            bits: BitVec::repeat(false, num_pieces as usize),
        }
    }

    /// Parse a wire-format Bitfield payload: one bit per piece, MSB-first
    /// within each byte, zero-padded to a byte boundary. Rejects payloads
    /// whose length doesn't match the expected byte count or whose padding
    /// bits are set.
    pub fn from_wire_bytes(bytes: &[u8], num_pieces: u32) -> Result<Self, BitfieldError> {
        let expected_bytes = (num_pieces as usize).div_ceil(8);
        if bytes.len() != expected_bytes {
            return Err(BitfieldError::WrongLength {
                expected: expected_bytes,
                got: bytes.len(),
            });
        }
        let mut bits: BitVec<u8, Msb0> = BitVec::from_slice(bytes);
        bits.truncate(num_pieces as usize);
        // Any bits beyond num_pieces were padding: re-check the discarded
        // tail of the last byte was all zero.
        let total_bits_in_bytes = expected_bytes * 8;
        if total_bits_in_bytes > num_pieces as usize {
            let full: BitVec<u8, Msb0> = BitVec::from_slice(bytes);
            if full[num_pieces as usize..].any() {
                return Err(BitfieldError::NonZeroPadding);
            }
        }
        Ok(Self { bits })
    }

    pub fn to_wire_bytes(&self) -> Vec<u8> {
        let mut bits = self.bits.clone();
        let pad = (8 - bits.len() % 8) % 8;
        bits.extend(std::iter::repeat(false).take(pad));
        bits.into_vec()
    }

    pub fn num_pieces(&self) -> u32 {
        self.bits.len() as u32
    }

    pub fn has(&self, piece: u32) -> bool {
        self.bits.get(piece as usize).map(|b| *b).unwrap_or(false)
    }

    /// Mark `piece` as held. Idempotent; never clears an existing bit.
    pub fn set_have(&mut self, piece: u32) {
        if let Some(mut bit) = self.bits.get_mut(piece as usize) {
            *bit = true;
        }
    }

    pub fn count_have(&self) -> usize {
        self.bits.count_ones()
    }

    pub fn is_complete(&self) -> bool {
        self.bits.all()
    }

    pub fn missing_pieces(&self) -> impl Iterator<Item = u32> + '_ {
        self.bits
            .iter()
            .enumerate()
            .filter(|(_, bit)| !**bit)
            .map(|(i, _)| i as u32)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum BitfieldError {
    #[error("expected {expected} bytes for bitfield, got {got}")]
    WrongLength { expected: usize, got: usize },
    #[error("bitfield has non-zero padding bits beyond the piece count")]
    NonZeroPadding,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_bitfield_has_nothing() {
        let bf = Bitfield::new(10);
        assert_eq!(bf.count_have(), 0);
        assert!(!bf.is_complete());
        assert_eq!(bf.missing_pieces().count(), 10);
    }

    #[test]
    fn set_have_is_monotonic_and_idempotent() {
        let mut bf = Bitfield::new(3);
        bf.set_have(1);
        bf.set_have(1);
        assert!(bf.has(1));
        assert!(!bf.has(0));
        assert_eq!(bf.count_have(), 1);
    }

    #[test]
    fn wire_round_trip_with_padding() {
        let mut bf = Bitfield::new(10);
        bf.set_have(0);
        bf.set_have(9);
        let wire = bf.to_wire_bytes();
        assert_eq!(wire.len(), 2);
        let back = Bitfield::from_wire_bytes(&wire, 10).unwrap();
        assert_eq!(back, bf);
    }

    #[test]
    fn rejects_wrong_length_and_nonzero_padding() {
        assert!(Bitfield::from_wire_bytes(&[0u8; 1], 10).is_err());
        // 10 bits needs 2 bytes; set a padding bit (bit index 10..16) in
        // the second byte.
        assert!(Bitfield::from_wire_bytes(&[0xFF, 0xFF], 10).is_err());
    }

    #[test]
    fn all_set_is_complete() {
        let mut bf = Bitfield::new(4);
        for i in 0..4 {
            bf.set_have(i);
        }
        assert!(bf.is_complete());
    }
}
