use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("unsupported tracker URL scheme '{0}'")]
    UnsupportedScheme(String),
    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("tracker reply is not valid bencode: {0}")]
    Bencode(#[from] swarmcore_bencode::DecodeError),
    #[error("tracker reply is not a dictionary")]
    NotADict,
    #[error("tracker returned failure reason: {0}")]
    Failure(String),
    #[error("tracker reply is missing required field '{0}'")]
    MissingField(&'static str),
    #[error("compact peers field has invalid length: {0}")]
    BadCompactPeers(#[from] swarmcore_core::peer::PeerAddrError),
    #[error("UDP transport error: {0}")]
    Udp(#[from] std::io::Error),
    #[error("UDP tracker response transaction id mismatch")]
    TransactionIdMismatch,
    #[error("UDP tracker response too short")]
    UdpResponseTooShort,
    #[error("UDP tracker returned an unexpected action {0}")]
    UnexpectedAction(u32),
    #[error("UDP tracker announce was attempted before a connect handshake")]
    NotConnected,
}
