use thiserror::Error;

#[derive(Debug, Error)]
pub enum WireError {
    #[error("not enough data: need {needed} more bytes")]
    NotEnoughData { needed: usize },
    #[error("pstr should be 19 bytes long but got {0}")]
    HandshakePstrWrongLength(u8),
    #[error("pstr doesn't match \"BitTorrent protocol\"")]
    HandshakePstrWrongContent,
    #[error("unsupported message id {0}")]
    UnsupportedMessageId(u8),
    #[error("incorrect message length for msg_id={msg_id}: expected {expected}, got {received}")]
    IncorrectMessageLength {
        msg_id: u8,
        expected: u32,
        received: u32,
    },
    #[error("extended handshake is not valid bencode: {0}")]
    ExtendedHandshakeBencode(#[from] swarmcore_bencode::DecodeError),
    #[error("extended handshake is missing the 'm' dictionary")]
    ExtendedHandshakeMissingM,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
