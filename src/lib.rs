#![warn(missing_docs)]
#![doc = include_str!("../README.md")]
#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

pub mod hash_map;
pub mod hash_set;
pub mod hash_table;
pub mod occupancy;
mod probe;
pub mod slot;

pub use hash_map::Entry;
pub use hash_map::HashMap;
pub use hash_set::HashSet;
pub use hash_table::Builder;
pub use hash_table::Eager;
pub use hash_table::HashTable;
pub use hash_table::Incremental;
pub use occupancy::Bitmap;
pub use occupancy::OccupancyMap;
pub use occupancy::ShortHash1;
pub use occupancy::ShortHash2;
pub use slot::KeyOnly;
pub use slot::KeyValue;
pub use slot::Slot;

cfg_if::cfg_if! {
    if #[cfg(feature = "foldhash")] {
        /// Default `BuildHasher`: foldhash's fast, DoS-resistant hasher.
        ///
        /// Integer keys get a cheap mixing hash and byte/string keys a
        /// general-purpose one, both from the same builder.
        pub type DefaultHashBuilder = foldhash::fast::RandomState;
    } else {
        /// Placeholder hasher builder used when the `foldhash` feature is
        /// disabled.
        ///
        /// `()` does not implement `BuildHasher`; construct tables with
        /// `with_hasher` and an explicit builder instead.
        pub type DefaultHashBuilder = ();
    }
}
