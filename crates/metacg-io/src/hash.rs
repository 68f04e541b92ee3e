//! Deterministic node hashing for the v3 format using blake3.
//!
//! A v3 node id is derived from the function name and origin, so the same
//! function gets the same id in every file produced for a program. The
//! digest is truncated to its first eight bytes read little-endian.
//!
//! Two distinct nodes may still hash to the same id (same name and origin in
//! different graphs merged together, or a genuine collision). [`IdAllocator`]
//! resolves that by linear probing in the order nodes are encountered.

use std::collections::HashSet;

pub use metacg_core::node::UNKNOWN_ORIGIN;

/// Raw 64-bit hash of `name` combined with `origin`.
pub fn node_hash(name: &str, origin: Option<&str>) -> u64 {
    let mut hasher = blake3::Hasher::new();
    hasher.update(name.as_bytes());
    hasher.update(origin.unwrap_or(UNKNOWN_ORIGIN).as_bytes());
    let digest = hasher.finalize();
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest.as_bytes()[..8]);
    u64::from_le_bytes(bytes)
}

/// Hands out unique hash ids, probing upward on collision.
#[derive(Debug, Default)]
pub struct IdAllocator {
    taken: HashSet<u64>,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates the id for the next node named `name`.
    pub fn allocate(&mut self, name: &str, origin: Option<&str>) -> u64 {
        let mut id = node_hash(name, origin);
        if self.taken.contains(&id) {
            tracing::warn!(name, origin, hash = id, "hash collision, probing for a free id");
            while self.taken.contains(&id) {
                id = id.wrapping_add(1);
            }
        }
        self.taken.insert(id);
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_deterministic() {
        assert_eq!(node_hash("main", Some("a.c")), node_hash("main", Some("a.c")));
        assert_ne!(node_hash("main", Some("a.c")), node_hash("main", Some("b.c")));
        assert_ne!(node_hash("main", None), node_hash("foo", None));
    }

    #[test]
    fn absent_origin_hashes_like_the_sentinel() {
        assert_eq!(node_hash("f", None), node_hash("f", Some(UNKNOWN_ORIGIN)));
    }

    #[test]
    fn allocator_steps_past_collisions() {
        let mut ids = IdAllocator::new();
        let first = ids.allocate("f", None);
        let second = ids.allocate("f", None);
        assert_eq!(first, node_hash("f", None));
        assert_eq!(second, first.wrapping_add(1));
        assert_ne!(ids.allocate("f", None), second);
    }
}
