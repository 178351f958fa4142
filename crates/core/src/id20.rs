//! A 20-byte identifier: infohashes and peer ids are both `Id20`s.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Id20(pub [u8; 20]);

impl Id20 {
    pub const LENGTH: usize = 20;

    pub fn new(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    pub fn from_slice(s: &[u8]) -> Option<Self> {
        if s.len() != Self::LENGTH {
            return None;
        }
        let mut buf = [0u8; 20];
        buf.copy_from_slice(s);
        Some(Self(buf))
    }

    pub fn from_hex(s: &str) -> Option<Self> {
        if s.len() != 40 {
            return None;
        }
        let mut buf = [0u8; 20];
        hex::decode_to_slice(s, &mut buf).ok()?;
        Some(Self(buf))
    }

    pub fn as_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for Id20 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Id20({})", self.as_hex())
    }
}

impl fmt::Display for Id20 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_hex())
    }
}

impl FromStr for Id20 {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s).ok_or("expected 40 hex characters")
    }
}

impl From<[u8; 20]> for Id20 {
    fn from(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for Id20 {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_round_trip() {
        let id = Id20::new([7u8; 20]);
        let hex = id.as_hex();
        assert_eq!(hex.len(), 40);
        assert_eq!(Id20::from_hex(&hex).unwrap(), id);
    }

    #[test]
    fn rejects_wrong_length() {
        assert!(Id20::from_hex("abcd").is_none());
        assert!(Id20::from_slice(&[0u8; 19]).is_none());
    }
}
