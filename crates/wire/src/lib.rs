pub mod codec;
pub mod error;
pub mod extended;
pub mod handshake;
pub mod message;

pub use codec::PeerCodec;
pub use error::WireError;
pub use extended::ExtendedHandshake;
pub use handshake::{Handshake, HANDSHAKE_LEN};
pub use message::{Message, Mode, Request};
