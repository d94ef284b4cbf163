#[cfg(feature = "std-hash")]
pub mod map {
    pub use std::collections::{HashMap, HashSet};

    pub type BuildHasher = std::collections::hash_map::RandomState;
}

#[cfg(not(feature = "std-hash"))]
pub mod map {
    pub use hashbrown::{HashMap, HashSet};

    pub type BuildHasher = hashbrown::DefaultHashBuilder;
}

/// Insertion-ordered set used where de-duplication must keep arrival order.
pub type OrderedSet<T> = indexmap::IndexSet<T, map::BuildHasher>;
