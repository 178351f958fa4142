//! Message framing after the handshake: a 4-byte big-endian length prefix
//! followed by a 1-byte message id and an id-specific payload. Zero length
//! means keep-alive, with no id byte at all.

use byteorder::{ByteOrder, BE};
use bytes::Bytes;

use crate::error::WireError;
use crate::extended::ExtendedHandshake;

const LEN_PREFIX: usize = 4;
const MSGID_LEN: usize = 1;
const PREAMBLE_LEN: usize = LEN_PREFIX + MSGID_LEN;

const MSGID_CHOKE: u8 = 0;
const MSGID_UNCHOKE: u8 = 1;
const MSGID_INTERESTED: u8 = 2;
const MSGID_NOT_INTERESTED: u8 = 3;
const MSGID_HAVE: u8 = 4;
const MSGID_BITFIELD: u8 = 5;
const MSGID_REQUEST: u8 = 6;
const MSGID_PIECE: u8 = 7;
const MSGID_CANCEL: u8 = 8;
const MSGID_PORT: u8 = 9;
const MSGID_EXTENDED: u8 = 20;

/// Whether an unrecognized message id is a hard protocol error or gets
/// skipped. Extensions and future message types show up as unknown ids
/// in the wild, so the lenient default drops them and keeps the
/// connection alive; strict mode is for contexts that want to fail loudly
/// instead (mirrors `swarmcore_bencode::Mode`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    Strict,
    #[default]
    Lenient,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Request {
    pub index: u32,
    pub begin: u32,
    pub length: u32,
}

impl Request {
    pub fn new(index: u32, begin: u32, length: u32) -> Self {
        Self { index, begin, length }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    KeepAlive,
    Choke,
    Unchoke,
    Interested,
    NotInterested,
    Have(u32),
    Bitfield(Bytes),
    Request(Request),
    Piece { index: u32, begin: u32, block: Bytes },
    Cancel(Request),
    /// DHT port announcement (BEP 5). DHT itself is out of scope; this
    /// variant exists so the message can be parsed and ignored rather than
    /// rejected as unknown.
    Port(u16),
    ExtendedHandshake(ExtendedHandshake),
    /// Any other extended message id: payload is handed back unparsed
    /// since no specific extension is implemented.
    ExtendedOther { id: u8, payload: Bytes },
}

impl Message {
    /// Serialize into a freshly allocated buffer.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::new();
        match self {
            Message::KeepAlive => out.extend_from_slice(&0u32.to_be_bytes()),
            Message::Choke | Message::Unchoke | Message::Interested | Message::NotInterested => {
                let id = match self {
                    Message::Choke => MSGID_CHOKE,
                    Message::Unchoke => MSGID_UNCHOKE,
                    Message::Interested => MSGID_INTERESTED,
                    Message::NotInterested => MSGID_NOT_INTERESTED,
                    _ => unreachable!(),
                };
                write_preamble(&mut out, 0, id);
            }
            Message::Have(piece) => {
                write_preamble(&mut out, 4, MSGID_HAVE);
                out.extend_from_slice(&piece.to_be_bytes());
            }
            Message::Bitfield(b) => {
                write_preamble(&mut out, b.len() as u32, MSGID_BITFIELD);
                out.extend_from_slice(b);
            }
            Message::Request(r) | Message::Cancel(r) => {
                let id = if matches!(self, Message::Request(_)) {
                    MSGID_REQUEST
                } else {
                    MSGID_CANCEL
                };
                write_preamble(&mut out, 12, id);
                out.extend_from_slice(&r.index.to_be_bytes());
                out.extend_from_slice(&r.begin.to_be_bytes());
                out.extend_from_slice(&r.length.to_be_bytes());
            }
            Message::Piece { index, begin, block } => {
                write_preamble(&mut out, 8 + block.len() as u32, MSGID_PIECE);
                out.extend_from_slice(&index.to_be_bytes());
                out.extend_from_slice(&begin.to_be_bytes());
                out.extend_from_slice(block);
            }
            Message::Port(port) => {
                write_preamble(&mut out, 2, MSGID_PORT);
                out.extend_from_slice(&port.to_be_bytes());
            }
            Message::ExtendedHandshake(hs) => {
                let payload = hs.encode();
                write_preamble(&mut out, 1 + payload.len() as u32, MSGID_EXTENDED);
                out.push(0);
                out.extend_from_slice(&payload);
            }
            Message::ExtendedOther { id, payload } => {
                write_preamble(&mut out, 1 + payload.len() as u32, MSGID_EXTENDED);
                out.push(*id);
                out.extend_from_slice(payload);
            }
        }
        out
    }

    /// Try to decode one message from the front of `buf`. Returns `Ok(None)`
    /// when `buf` doesn't yet contain a full message (the caller should
    /// read more bytes and retry), and `Ok(Some((message, consumed)))`
    /// otherwise, where `message` is `None` when `mode` is [`Mode::Lenient`]
    /// and the frame held an unrecognized message id — the frame is still
    /// fully consumed (`consumed` accounts for it), there's just nothing to
    /// hand back. `buf` must be a single contiguous buffer.
    pub fn deserialize(buf: &[u8], mode: Mode) -> Result<Option<(Option<Message>, usize)>, WireError> {
        if buf.len() < LEN_PREFIX {
            return Ok(None);
        }
        let len_prefix = BE::read_u32(&buf[0..4]);
        let total_len = LEN_PREFIX + len_prefix as usize;
        if len_prefix == 0 {
            return Ok(Some((Some(Message::KeepAlive), LEN_PREFIX)));
        }
        if buf.len() < total_len {
            return Ok(None);
        }
        let msg_id = buf[4];
        let payload = &buf[PREAMBLE_LEN..total_len];
        let msg_len = len_prefix - 1;

        let message = match msg_id {
            MSGID_CHOKE => expect_empty(payload, msg_id, msg_len).map(|_| Message::Choke)?,
            MSGID_UNCHOKE => expect_empty(payload, msg_id, msg_len).map(|_| Message::Unchoke)?,
            MSGID_INTERESTED => expect_empty(payload, msg_id, msg_len).map(|_| Message::Interested)?,
            MSGID_NOT_INTERESTED => {
                expect_empty(payload, msg_id, msg_len).map(|_| Message::NotInterested)?
            }
            MSGID_HAVE => {
                expect_len(payload, msg_id, msg_len, 4)?;
                Message::Have(BE::read_u32(payload))
            }
            MSGID_BITFIELD => {
                if payload.is_empty() {
                    return Err(WireError::IncorrectMessageLength {
                        msg_id,
                        expected: 1,
                        received: msg_len,
                    });
                }
                Message::Bitfield(Bytes::copy_from_slice(payload))
            }
            MSGID_REQUEST | MSGID_CANCEL => {
                expect_len(payload, msg_id, msg_len, 12)?;
                let req = Request {
                    index: BE::read_u32(&payload[0..4]),
                    begin: BE::read_u32(&payload[4..8]),
                    length: BE::read_u32(&payload[8..12]),
                };
                if msg_id == MSGID_REQUEST {
                    Message::Request(req)
                } else {
                    Message::Cancel(req)
                }
            }
            MSGID_PIECE => {
                if payload.len() < 8 {
                    return Err(WireError::IncorrectMessageLength {
                        msg_id,
                        expected: 9,
                        received: msg_len,
                    });
                }
                Message::Piece {
                    index: BE::read_u32(&payload[0..4]),
                    begin: BE::read_u32(&payload[4..8]),
                    block: Bytes::copy_from_slice(&payload[8..]),
                }
            }
            MSGID_PORT => {
                expect_len(payload, msg_id, msg_len, 2)?;
                Message::Port(BE::read_u16(payload))
            }
            MSGID_EXTENDED => {
                if payload.is_empty() {
                    return Err(WireError::IncorrectMessageLength {
                        msg_id,
                        expected: 1,
                        received: msg_len,
                    });
                }
                let ext_id = payload[0];
                let ext_payload = &payload[1..];
                if ext_id == crate::extended::EXTENDED_HANDSHAKE_ID {
                    Message::ExtendedHandshake(ExtendedHandshake::parse(ext_payload)?)
                } else {
                    Message::ExtendedOther {
                        id: ext_id,
                        payload: Bytes::copy_from_slice(ext_payload),
                    }
                }
            }
            other => {
                if mode == Mode::Strict {
                    return Err(WireError::UnsupportedMessageId(other));
                }
                return Ok(Some((None, total_len)));
            }
        };
        Ok(Some((Some(message), total_len)))
    }
}

fn write_preamble(out: &mut Vec<u8>, payload_len: u32, msg_id: u8) {
    out.extend_from_slice(&(payload_len + 1).to_be_bytes());
    out.push(msg_id);
}

fn expect_empty(payload: &[u8], msg_id: u8, msg_len: u32) -> Result<(), WireError> {
    expect_len(payload, msg_id, msg_len, 0)
}

fn expect_len(payload: &[u8], msg_id: u8, msg_len: u32, expected: u32) -> Result<(), WireError> {
    if payload.len() != expected as usize {
        return Err(WireError::IncorrectMessageLength {
            msg_id,
            expected,
            received: msg_len,
        });
    }
    Ok(())
}
