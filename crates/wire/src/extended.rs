//! BEP 10 extension protocol: just enough of the handshake (message id 20,
//! extended message id 0) to read the peer's `m` dictionary of supported
//! extension names. No specific extension (ut_metadata, ut_pex) is
//! implemented on top of this.

use std::collections::BTreeMap;

use bytes::Bytes;
use swarmcore_bencode::{Mode, Value};

use crate::error::WireError;

pub const EXTENDED_HANDSHAKE_ID: u8 = 0;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExtendedHandshake {
    /// Extension name -> the id the peer wants it sent with.
    pub m: BTreeMap<String, u8>,
    pub v: Option<String>,
    pub reqq: Option<i64>,
}

impl ExtendedHandshake {
    pub fn supported_extension(&self, name: &str) -> Option<u8> {
        self.m.get(name).copied()
    }

    pub fn parse(payload: &[u8]) -> Result<Self, WireError> {
        let value = swarmcore_bencode::decode(payload, Mode::Lenient)?;
        let dict = value.as_dict().ok_or(WireError::ExtendedHandshakeMissingM)?;

        let m_value = dict
            .get(&Bytes::from_static(b"m"))
            .and_then(Value::as_dict)
            .ok_or(WireError::ExtendedHandshakeMissingM)?;
        let mut m = BTreeMap::new();
        for (key, value) in m_value {
            if let (Ok(name), Some(id)) = (std::str::from_utf8(key), value.as_int()) {
                m.insert(name.to_owned(), id as u8);
            }
        }

        let v = dict
            .get(&Bytes::from_static(b"v"))
            .and_then(Value::as_str)
            .map(str::to_owned);
        let reqq = dict.get(&Bytes::from_static(b"reqq")).and_then(Value::as_int);

        Ok(Self { m, v, reqq })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut m = BTreeMap::new();
        for (name, id) in &self.m {
            m.insert(
                Bytes::copy_from_slice(name.as_bytes()),
                Value::Int(*id as i64),
            );
        }
        let mut top = BTreeMap::new();
        top.insert(Bytes::from_static(b"m"), Value::Dict(m));
        if let Some(v) = &self.v {
            top.insert(Bytes::from_static(b"v"), Value::Bytes(Bytes::copy_from_slice(v.as_bytes())));
        }
        if let Some(reqq) = self.reqq {
            top.insert(Bytes::from_static(b"reqq"), Value::Int(reqq));
        }
        swarmcore_bencode::encode(&Value::Dict(top))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_m_dict() {
        let mut hs = ExtendedHandshake::default();
        hs.m.insert("ut_metadata".to_owned(), 3);
        hs.v = Some("swarmcore/0.1".to_owned());
        let bytes = hs.encode();
        let parsed = ExtendedHandshake::parse(&bytes).unwrap();
        assert_eq!(parsed.supported_extension("ut_metadata"), Some(3));
        assert_eq!(parsed.v.as_deref(), Some("swarmcore/0.1"));
    }

    #[test]
    fn missing_m_is_an_error() {
        let bytes = swarmcore_bencode::encode(&Value::Dict(Default::default()));
        assert!(ExtendedHandshake::parse(&bytes).is_err());
    }
}
