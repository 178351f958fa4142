//! Generation of our own peer id, sent in the handshake.

use rand::Rng;

use crate::id20::Id20;

/// Azureus-style peer id prefix: `-`, two letters, four-digit version,
/// `-`, followed by 12 random bytes.
const PREFIX: &[u8; 8] = b"-SC0001-";

pub fn generate_peer_id() -> Id20 {
    let mut id = [0u8; 20];
    id[..8].copy_from_slice(PREFIX);
    rand::thread_rng().fill(&mut id[8..]);
    Id20::new(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_with_client_prefix() {
        let id = generate_peer_id();
        assert_eq!(&id.as_bytes()[..8], PREFIX);
    }

    #[test]
    fn successive_ids_are_not_identical() {
        assert_ne!(generate_peer_id(), generate_peer_id());
    }
}
