//! Frames [`Message`]s on top of a `tokio_util::codec::Framed` stream.

use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::WireError;
use crate::message::{Message, Mode};

#[derive(Debug, Default)]
pub struct PeerCodec {
    mode: Mode,
}

impl PeerCodec {
    pub fn new(mode: Mode) -> Self {
        Self { mode }
    }
}

impl Decoder for PeerCodec {
    type Item = Message;
    type Error = WireError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Message>, WireError> {
        loop {
            match Message::deserialize(src, self.mode)? {
                Some((Some(message), consumed)) => {
                    src.advance(consumed);
                    return Ok(Some(message));
                }
                // Lenient mode: the frame was a full, well-formed message
                // with an id we don't recognize. Drop it and keep reading
                // rather than treating it as a protocol error.
                Some((None, consumed)) => {
                    src.advance(consumed);
                    continue;
                }
                None => return Ok(None),
            }
        }
    }
}

impl Encoder<Message> for PeerCodec {
    type Error = WireError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), WireError> {
        dst.extend_from_slice(&item.serialize());
        Ok(())
    }
}
