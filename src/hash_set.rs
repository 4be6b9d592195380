//! A set facade over the raw [`HashTable`].
//!
//! [`HashSet`] pairs the table with the [`KeyOnly`] slot layout: the cell is
//! the element itself, with no per-entry overhead beyond the occupancy
//! metadata. Occupancy encoding and resize strategy stay selectable through
//! the `M` and `R` type parameters.

use core::fmt::Debug;
use core::hash::BuildHasher;
use core::hash::Hash;

use crate::DefaultHashBuilder;
use crate::hash_table;
use crate::hash_table::Eager;
use crate::hash_table::HashTable;
use crate::hash_table::ResizeMode;
use crate::occupancy::Bitmap;
use crate::occupancy::OccupancyMap;
use crate::slot::KeyOnly;

/// A hash set backed by the cluster-probing [`HashTable`].
///
/// # Examples
///
/// ```rust
/// use shadow_hash::HashSet;
///
/// let mut set: HashSet<u32> = HashSet::new();
/// assert!(set.insert(1));
/// assert!(!set.insert(1));
/// assert!(set.contains(&1));
/// assert!(set.remove(&1));
/// assert!(set.is_empty());
/// ```
#[derive(Clone)]
pub struct HashSet<T, H = DefaultHashBuilder, M: OccupancyMap = Bitmap, R = Eager> {
    table: HashTable<KeyOnly<T>, H, M, R>,
}

impl<T, H, M, R> Debug for HashSet<T, H, M, R>
where
    T: Debug,
    M: OccupancyMap,
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl<T, H, M, R> Default for HashSet<T, H, M, R>
where
    H: Default,
    M: OccupancyMap,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T, H, M, R> HashSet<T, H, M, R>
where
    M: OccupancyMap,
{
    /// Creates an empty set with the default hasher.
    pub fn new() -> Self
    where
        H: Default,
    {
        Self::with_hasher(H::default())
    }

    /// Creates an empty set with the given hasher.
    pub fn with_hasher(hash_builder: H) -> Self {
        HashSet {
            table: HashTable::with_hasher(hash_builder),
        }
    }

    /// Creates a set that can hold at least `capacity` elements without
    /// growing.
    pub fn with_capacity(capacity: usize) -> Self
    where
        H: Default,
    {
        Self::with_capacity_and_hasher(capacity, H::default())
    }

    /// Creates a set pre-sized for `capacity` elements with the given
    /// hasher.
    pub fn with_capacity_and_hasher(capacity: usize, hash_builder: H) -> Self {
        HashSet {
            table: HashTable::with_capacity_and_hasher(capacity, hash_builder),
        }
    }

    /// Returns the number of elements.
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// Returns `true` if the set holds no elements.
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Returns the number of elements the set can hold before the next
    /// growth triggers.
    pub fn capacity(&self) -> usize {
        self.table.growth_threshold()
    }

    /// Returns the memory footprint in bytes, including any in-progress
    /// shadow generation.
    pub fn bytes(&self) -> usize {
        self.table.bytes()
    }

    /// Removes all elements and resets the set to its baseline capacity.
    pub fn clear(&mut self) {
        self.table.clear();
    }

    /// Returns an iterator over the elements in slot-index order.
    ///
    /// The order is unspecified and changes across resizes.
    pub fn iter(&self) -> Iter<'_, T, H, M, R> {
        Iter {
            inner: self.table.iter(),
        }
    }
}

impl<T, H, M, R> HashSet<T, H, M, R>
where
    T: Hash + Eq,
    H: BuildHasher,
    M: OccupancyMap,
{
    /// Returns `true` if the set holds `value`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use shadow_hash::HashSet;
    ///
    /// let mut set: HashSet<u32> = HashSet::new();
    /// set.insert(3);
    /// assert!(set.contains(&3));
    /// assert!(!set.contains(&4));
    /// ```
    #[inline]
    pub fn contains(&self, value: &T) -> bool {
        self.table.contains(value)
    }

    /// Returns a reference to the stored element equal to `value`.
    #[inline]
    pub fn get(&self, value: &T) -> Option<&T> {
        self.table.get(value).map(|slot| &slot.0)
    }
}

impl<T, H, M, R> HashSet<T, H, M, R>
where
    T: Hash + Eq,
    H: BuildHasher,
    M: OccupancyMap,
    R: ResizeMode<KeyOnly<T>, H, M, 4>,
{
    /// Adds `value` to the set. Returns `true` if it was not already
    /// present.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use shadow_hash::HashSet;
    ///
    /// let mut set: HashSet<u32> = HashSet::new();
    /// assert!(set.insert(7));
    /// assert!(!set.insert(7));
    /// assert_eq!(set.len(), 1);
    /// ```
    pub fn insert(&mut self, value: T) -> bool {
        let (_, existed) = self.table.get_or_insert_with(value, KeyOnly);
        !existed
    }

    /// Adds `value`, returning the previously stored equal element if one
    /// was present.
    pub fn replace(&mut self, value: T) -> Option<T> {
        self.table.insert(KeyOnly(value)).map(|slot| slot.0)
    }

    /// Removes `value`. Returns `true` if it was present.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use shadow_hash::HashSet;
    ///
    /// let mut set: HashSet<u32> = HashSet::new();
    /// set.insert(2);
    /// assert!(set.remove(&2));
    /// assert!(!set.remove(&2));
    /// ```
    pub fn remove(&mut self, value: &T) -> bool {
        self.table.remove(value).is_some()
    }

    /// Removes and returns the stored element equal to `value`.
    pub fn take(&mut self, value: &T) -> Option<T> {
        self.table.remove(value).map(|slot| slot.0)
    }

    /// Ensures the set can take `additional` more elements without growing
    /// mid-insert.
    pub fn reserve(&mut self, additional: usize) {
        self.table.reserve(additional);
    }
}

impl<T, H, M, R> PartialEq for HashSet<T, H, M, R>
where
    T: Hash + Eq,
    H: BuildHasher,
    M: OccupancyMap,
{
    fn eq(&self, other: &Self) -> bool {
        if self.len() != other.len() {
            return false;
        }
        self.iter().all(|v| other.contains(v))
    }
}

impl<T, H, M, R> Eq for HashSet<T, H, M, R>
where
    T: Hash + Eq,
    H: BuildHasher,
    M: OccupancyMap,
{
}

impl<T, H, M> FromIterator<T> for HashSet<T, H, M, Eager>
where
    T: Hash + Eq,
    H: BuildHasher + Clone + Default,
    M: OccupancyMap,
{
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut set = Self::new();
        set.extend(iter);
        set
    }
}

impl<T, H, M> Extend<T> for HashSet<T, H, M, Eager>
where
    T: Hash + Eq,
    H: BuildHasher + Clone,
    M: OccupancyMap,
{
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        let iter = iter.into_iter();
        self.reserve(iter.size_hint().0);
        for value in iter {
            self.insert(value);
        }
    }
}

/// Iterator over a set's elements. Created by [`HashSet::iter`].
pub struct Iter<'a, T, H = DefaultHashBuilder, M: OccupancyMap = Bitmap, R = Eager> {
    inner: hash_table::Iter<'a, KeyOnly<T>, H, M, R, 4>,
}

impl<'a, T, H, M: OccupancyMap, R> Iterator for Iter<'a, T, H, M, R> {
    type Item = &'a T;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|slot| &slot.0)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<T, H, M: OccupancyMap, R> ExactSizeIterator for Iter<'_, T, H, M, R> {}

impl<'a, T, H, M: OccupancyMap, R> IntoIterator for &'a HashSet<T, H, M, R> {
    type Item = &'a T;
    type IntoIter = Iter<'a, T, H, M, R>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
