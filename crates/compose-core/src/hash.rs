//! Key hashing used for group identity.
//!
//! Group keys are plain `u64`s. Call sites derive them from their source
//! location, explicit `key(..)` overrides hash arbitrary values, and the
//! compound key hash folds every enclosing group key together.

use core::hash::Hash;
use std::hash::Hasher;

use crate::Key;

#[cfg(feature = "std-hash")]
pub mod default {
    pub use std::collections::hash_map::DefaultHasher;

    #[inline]
    pub fn new() -> DefaultHasher {
        DefaultHasher::new()
    }
}

#[cfg(not(feature = "std-hash"))]
pub mod default {
    pub use ahash::AHasher as DefaultHasher;
    use std::hash::BuildHasher;

    #[inline]
    pub fn new() -> DefaultHasher {
        // Fixed seeds keep location keys stable across runs and threads.
        ahash::RandomState::with_seeds(0x5137, 0x0c0d, 0xe5f1, 0x7a3b).build_hasher()
    }
}

/// convenience: hash a single value with whichever default is active
#[inline]
pub fn hash_one<T: Hash + ?Sized>(v: &T) -> u64 {
    let mut h = default::new();
    v.hash(&mut h);
    h.finish()
}

/// Key for a call site, as produced by `#[composable]`.
pub fn location_key(file: &str, line: u32, column: u32) -> Key {
    let mut hasher = default::new();
    file.hash(&mut hasher);
    line.hash(&mut hasher);
    column.hash(&mut hasher);
    hasher.finish()
}

/// Hashes an explicit identity value into a data key.
pub fn hash_key<K: Hash + ?Sized>(key: &K) -> Key {
    hash_one(key)
}

/// Folds `key` into the compound hash when entering a group.
#[inline]
pub(crate) fn enter_compound(hash: Key, key: Key) -> Key {
    hash.rotate_left(3) ^ key
}

/// Exact inverse of [`enter_compound`].
#[inline]
pub(crate) fn exit_compound(hash: Key, key: Key) -> Key {
    (hash ^ key).rotate_right(3)
}
