//! Slot layouts: how a key (and optional value) are packed into a table cell.
//!
//! The table stores fixed-size cells and never interprets them beyond the
//! [`Slot`] contract: every cell can hand out a reference to its key. Two
//! built-in layouts cover the common cases ([`KeyOnly`] for set semantics,
//! [`KeyValue`] for map semantics); anything else is a custom slot type
//! implementing [`Slot`] directly, which allows specialized packing such as
//! embedding the key inside a larger record.

use core::fmt::Debug;

/// A fixed-size table cell that a key can be extracted from.
///
/// Implementations must be pure data accessors: `key` has no side effects and
/// always returns the same key for the same cell contents. Hashing and
/// equality of the extracted key are supplied separately (by the table's
/// `BuildHasher` and the key's `Eq` impl), so a slot type never needs to know
/// how it is indexed.
///
/// # Examples
///
/// A record that keeps its key inline with other payload fields:
///
/// ```rust
/// use shadow_hash::slot::Slot;
///
/// struct Session {
///     id: u64,
///     opaque: usize,
/// }
///
/// impl Slot for Session {
///     type Key = u64;
///
///     fn key(&self) -> &u64 {
///         &self.id
///     }
/// }
/// ```
pub trait Slot {
    /// The key type embedded in the cell.
    type Key;

    /// Returns a reference to the cell's key.
    fn key(&self) -> &Self::Key;
}

/// A key-only slot: the cell *is* the key. This is the layout behind set
/// semantics.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
#[repr(transparent)]
pub struct KeyOnly<K>(pub K);

impl<K> Slot for KeyOnly<K> {
    type Key = K;

    #[inline(always)]
    fn key(&self) -> &K {
        &self.0
    }
}

impl<K: Debug> Debug for KeyOnly<K> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        self.0.fmt(f)
    }
}

/// A key plus value slot: the layout behind map semantics.
///
/// The fields are public so callers handed a slot reference (or an index-based
/// accessor result) can reach the value without another lookup.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct KeyValue<K, V> {
    /// The cell's key.
    pub key: K,
    /// The cell's value.
    pub value: V,
}

impl<K, V> KeyValue<K, V> {
    /// Packs a key and value into a cell.
    #[inline(always)]
    pub fn new(key: K, value: V) -> Self {
        KeyValue { key, value }
    }
}

impl<K, V> Slot for KeyValue<K, V> {
    type Key = K;

    #[inline(always)]
    fn key(&self) -> &K {
        &self.key
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_only_is_transparent() {
        let slot = KeyOnly(42u32);
        assert_eq!(*slot.key(), 42);
        assert_eq!(core::mem::size_of::<KeyOnly<u32>>(), 4);
    }

    #[test]
    fn test_key_value_accessors() {
        let slot = KeyValue::new(7u64, "seven");
        assert_eq!(*slot.key(), 7);
        assert_eq!(slot.value, "seven");
    }

    #[test]
    fn test_custom_slot() {
        struct Wide {
            payload: [u8; 8],
            id: u32,
        }

        impl Slot for Wide {
            type Key = u32;

            fn key(&self) -> &u32 {
                &self.id
            }
        }

        let slot = Wide {
            payload: [0xff; 8],
            id: 9,
        };
        assert_eq!(*slot.key(), 9);
        assert_eq!(slot.payload[0], 0xff);
    }
}
