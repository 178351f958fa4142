//! SHA-1 hashing, injected as a capability so the swarm's piece-verification
//! path can be driven by a fake in tests without linking a real crypto
//! backend.

use sha1::{Digest, Sha1 as RustSha1};

/// Incremental SHA-1 state. Pieces are hashed block-by-block as they arrive
/// rather than copied into one contiguous buffer first.
pub trait ISha1: Send {
    fn new() -> Self
    where
        Self: Sized;
    fn update(&mut self, buf: &[u8]);
    fn finish(self) -> [u8; 20];
}

#[derive(Default)]
pub struct Sha1(RustSha1);

impl ISha1 for Sha1 {
    fn new() -> Self {
        Self(RustSha1::new())
    }

    fn update(&mut self, buf: &[u8]) {
        self.0.update(buf);
    }

    fn finish(self) -> [u8; 20] {
        self.0.finalize().into()
    }
}

/// One-shot hash of a single contiguous buffer, for the common case (a
/// piece already assembled in memory).
pub fn hash_one_shot(data: &[u8]) -> [u8; 20] {
    let mut h = Sha1::new();
    h.update(data);
    h.finish()
}

/// Injected hashing capability, mirroring the `Filesystem`/`Socket`/`Clock`
/// capability objects in `swarmcore-core`: production code takes `&dyn
/// Hasher`, tests supply a fake that can assert on what was hashed or
/// return canned digests.
pub trait Hasher: Send + Sync {
    fn sha1(&self, data: &[u8]) -> [u8; 20];
}

#[derive(Default, Clone, Copy)]
pub struct RealHasher;

impl Hasher for RealHasher {
    fn sha1(&self, data: &[u8]) -> [u8; 20] {
        hash_one_shot(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_matches_known_digest() {
        // SHA-1("") = da39a3ee5e6b4b0d3255bfef95601890afd80709
        let got = hash_one_shot(b"");
        assert_eq!(
            hex::encode(got),
            "da39a3ee5e6b4b0d3255bfef95601890afd80709"
        );
    }

    #[test]
    fn incremental_matches_one_shot() {
        let mut h = Sha1::new();
        h.update(b"hello, ");
        h.update(b"world");
        let incremental = h.finish();
        assert_eq!(incremental, hash_one_shot(b"hello, world"));
    }

    #[test]
    fn real_hasher_matches_free_function() {
        let hasher = RealHasher;
        assert_eq!(hasher.sha1(b"abc"), hash_one_shot(b"abc"));
    }
}
