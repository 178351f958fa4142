//! Magnet URI parsing: `magnet:?xt=urn:btih:<infohash>&dn=<name>&tr=<tracker>...`.
//!
//! Metadata exchange (fetching the `info` dict itself over the wire, BEP 9)
//! is out of scope here; this only extracts what a magnet link states up
//! front.

use thiserror::Error;

use crate::id20::Id20;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Magnet {
    pub info_hash: Id20,
    pub display_name: Option<String>,
    pub trackers: Vec<String>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MagnetError {
    #[error("not a valid URI: {0}")]
    InvalidUrl(String),
    #[error("expected scheme 'magnet'")]
    WrongScheme,
    #[error("missing 'xt' parameter with a btih infohash")]
    MissingInfoHash,
    #[error("'xt' infohash is not 40 hex characters")]
    MalformedInfoHash,
}

impl Magnet {
    pub fn parse(uri: &str) -> Result<Magnet, MagnetError> {
        let url = url::Url::parse(uri).map_err(|e| MagnetError::InvalidUrl(e.to_string()))?;
        if url.scheme() != "magnet" {
            return Err(MagnetError::WrongScheme);
        }

        let mut info_hash = None;
        let mut display_name = None;
        let mut trackers = Vec::new();

        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "xt" => {
                    let hex = value
                        .strip_prefix("urn:btih:")
                        .ok_or(MagnetError::MissingInfoHash)?;
                    info_hash = Some(Id20::from_hex(hex).ok_or(MagnetError::MalformedInfoHash)?);
                }
                "dn" => display_name = Some(value.into_owned()),
                "tr" => trackers.push(value.into_owned()),
                _ => {}
            }
        }

        Ok(Magnet {
            info_hash: info_hash.ok_or(MagnetError::MissingInfoHash)?,
            display_name,
            trackers,
        })
    }
}

impl std::fmt::Display for Magnet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "magnet:?xt=urn:btih:{}", self.info_hash.as_hex())?;
        if let Some(name) = &self.display_name {
            write!(f, "&dn={name}")?;
        }
        for tracker in &self.trackers {
            write!(f, "&tr={tracker}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_magnet_link() {
        let uri = "magnet:?xt=urn:btih:a621779b5e3d486e127c3efbca9b6f8d135f52e5&dn=example&tr=udp://tracker.example:1337&tr=http://tracker2.example/announce";
        let m = Magnet::parse(uri).unwrap();
        assert_eq!(m.info_hash.as_hex(), "a621779b5e3d486e127c3efbca9b6f8d135f52e5");
        assert_eq!(m.display_name.as_deref(), Some("example"));
        assert_eq!(m.trackers.len(), 2);
    }

    #[test]
    fn rejects_missing_infohash() {
        assert_eq!(Magnet::parse("magnet:?dn=example"), Err(MagnetError::MissingInfoHash));
    }

    #[test]
    fn rejects_wrong_scheme() {
        assert_eq!(
            Magnet::parse("http://example.com"),
            Err(MagnetError::WrongScheme)
        );
    }

    #[test]
    fn rejects_malformed_infohash() {
        assert_eq!(
            Magnet::parse("magnet:?xt=urn:btih:tooshort"),
            Err(MagnetError::MalformedInfoHash)
        );
    }

    #[test]
    fn display_round_trips_through_parse() {
        let m = Magnet::parse("magnet:?xt=urn:btih:a621779b5e3d486e127c3efbca9b6f8d135f52e5&tr=udp://t:1").unwrap();
        let s = m.to_string();
        let reparsed = Magnet::parse(&s).unwrap();
        assert_eq!(m, reparsed);
    }
}
