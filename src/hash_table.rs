//! The core open-addressing table: find/mark engine and resize engine.
//!
//! [`HashTable`] is the raw layer everything else is built on. It stores
//! opaque [`Slot`] cells, keeps per-slot occupancy metadata in an
//! [`OccupancyMap`], walks candidate slots with the cluster-probing
//! sequence, and grows through a shadow table that is either
//! migrated in one pass ([`Eager`]) or in bounded batches amortized across
//! mutating calls ([`Incremental`]).
//!
//! Most users want the [`crate::HashMap`] and [`crate::HashSet`] facades;
//! reach for the raw table when you need custom slot packing, short-hash
//! tags, incremental resize, or index-based access.

use alloc::boxed::Box;
use core::fmt::Debug;
use core::hash::BuildHasher;
use core::hash::Hash;
use core::marker::PhantomData;
use core::mem;
use core::mem::MaybeUninit;

use crate::DefaultHashBuilder;
use crate::occupancy::Bitmap;
use crate::occupancy::OccupancyMap;
use crate::probe::ProbeSeq;
use crate::slot::Slot;

/// Default probe-cluster size (`N`): slots scanned linearly before the
/// sequence jumps to the next cluster.
pub const DEFAULT_NEIGHBORS: usize = 4;

/// Default target ratio of touched slots to capacity before growth triggers.
pub const DEFAULT_LOAD_FACTOR: f64 = 0.73;

/// Default number of slots migrated per mutating call in incremental mode.
pub const DEFAULT_RESIZE_BATCH: u32 = 64;

mod sealed {
    pub trait Sealed {}
    impl Sealed for super::Eager {}
    impl Sealed for super::Incremental {}
}

/// Resize strategy marker, implemented by [`Eager`] and [`Incremental`].
///
/// This trait is sealed and its methods are implementation details; it exists
/// so the two strategies can hang mode-specific behavior off one set of
/// public table operations. The bounds differ on purpose: incremental mode
/// requires `S: Clone`, because mutations below the migration cursor have to
/// be mirrored into the shadow generation by copy.
pub trait ResizeMode<S, H, M: OccupancyMap, const N: usize>: sealed::Sealed + Sized {
    /// `true` for [`Incremental`].
    const INCREMENTAL: bool;

    #[doc(hidden)]
    fn resize_if_need(table: &mut HashTable<S, H, M, Self, N>);

    #[doc(hidden)]
    fn grow_to(table: &mut HashTable<S, H, M, Self, N>, want_size: u32);

    #[doc(hidden)]
    fn mirror_put(table: &mut HashTable<S, H, M, Self, N>, index: u32, existed: bool);

    #[doc(hidden)]
    fn mirror_remove(table: &mut HashTable<S, H, M, Self, N>, index: u32, slot: &S);
}

/// Single-pass resize: the whole table migrates inside the call that crossed
/// the growth threshold.
///
/// This is the default. It is also the only mode that hands out `&mut`
/// access to stored slots ([`HashTable::find_mut`], [`HashTable::slot_mut`]):
/// with no shadow generation alive between calls, in-place mutation cannot
/// diverge anything.
#[derive(Clone, Copy, Debug, Default)]
pub struct Eager;

/// Amortized resize: every mutating call migrates a bounded batch of slots,
/// so no single insert pays for a full-table migration.
///
/// While a resize is in progress the old generation stays authoritative for
/// reads, and every mutation landing below the migration cursor is mirrored
/// into the shadow. That mirroring is why this mode requires `S: Clone` and
/// never exposes live `&mut` references to slots — an unmirrored in-place
/// write would silently diverge the two generations.
#[derive(Clone, Copy, Debug, Default)]
pub struct Incremental;

/// Configures and builds a [`HashTable`].
///
/// # Examples
///
/// ```rust
/// use shadow_hash::DefaultHashBuilder;
/// use shadow_hash::hash_table::Builder;
/// use shadow_hash::hash_table::Incremental;
/// use shadow_hash::occupancy::Bitmap;
/// use shadow_hash::slot::KeyValue;
///
/// let mut table = Builder::<KeyValue<u32, u64>, DefaultHashBuilder, Bitmap, Incremental>::new()
///     .capacity(100)
///     .load_factor(0.8)
///     .resize_batch(16)
///     .build();
///
/// assert!(table.insert(KeyValue::new(1, 10)).is_none());
/// assert_eq!(table.get(&1).map(|s| s.value), Some(10));
/// ```
pub struct Builder<S, H = DefaultHashBuilder, M = Bitmap, R = Eager, const N: usize = 4> {
    capacity: usize,
    load_factor: f64,
    resize_batch: u32,
    hash_builder: H,
    _marker: PhantomData<(S, M, R)>,
}

impl<S, H, M, R, const N: usize> Builder<S, H, M, R, N>
where
    M: OccupancyMap,
{
    /// Creates a builder with the default hasher.
    pub fn new() -> Self
    where
        H: Default,
    {
        Self::with_hasher(H::default())
    }

    /// Creates a builder with an explicit hasher.
    pub fn with_hasher(hash_builder: H) -> Self {
        Builder {
            capacity: 0,
            load_factor: DEFAULT_LOAD_FACTOR,
            resize_batch: DEFAULT_RESIZE_BATCH,
            hash_builder,
            _marker: PhantomData,
        }
    }

    /// Pre-sizes the table to hold at least `capacity` entries without
    /// growing.
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Sets the load factor. Must be strictly between 0 and 1.
    pub fn load_factor(mut self, load_factor: f64) -> Self {
        assert!(
            load_factor > 0.0 && load_factor < 1.0,
            "load factor must be in (0, 1)"
        );
        self.load_factor = load_factor;
        self
    }

    /// Sets how many slots each mutating call migrates while an incremental
    /// resize is in progress. Must be at least 1. Ignored in eager mode.
    pub fn resize_batch(mut self, resize_batch: u32) -> Self {
        assert!(resize_batch >= 1, "resize batch must be at least 1");
        self.resize_batch = resize_batch;
        self
    }

    /// Builds the table.
    pub fn build(self) -> HashTable<S, H, M, R, N> {
        let want = self.capacity.min(u32::MAX as usize) as u32;
        let (capacity, upper_bound) =
            HashTable::<S, H, M, R, N>::capacity_for(want, self.load_factor, 0);
        HashTable::with_parts(
            capacity,
            upper_bound,
            self.load_factor,
            self.resize_batch,
            self.hash_builder,
        )
    }
}

impl<S, H, M, R, const N: usize> Default for Builder<S, H, M, R, N>
where
    H: Default,
    M: OccupancyMap,
{
    fn default() -> Self {
        Self::new()
    }
}

/// A generic open-addressing hash table with cluster probing, dirty-slot
/// tombstones, and shadow-table resize.
///
/// `HashTable` stores [`Slot`] cells of type `S` and derives hashes from the
/// cell key with the `BuildHasher` `H`. The occupancy encoding `M` is either
/// the 2-bit-per-slot [`Bitmap`] (default) or a short-hash tag array
/// ([`ShortHash1`](crate::occupancy::ShortHash1) /
/// [`ShortHash2`](crate::occupancy::ShortHash2)); the resize strategy `R` is
/// [`Eager`] (default) or [`Incremental`]; `N` is the probe-cluster size and
/// must be a power of two.
///
/// Capacity is always a power of two, starting at `4 * N` slots, and growth
/// is monotonic — the table never shrinks. A lookup of an absent key
/// terminates at the first slot no probe has ever crossed, so even after
/// heavy delete/insert churn the probe length stays governed by the load
/// factor, not by the table's history.
///
/// # Examples
///
/// ```rust
/// use shadow_hash::hash_table::HashTable;
/// use shadow_hash::slot::KeyValue;
///
/// let mut table: HashTable<KeyValue<u32, &str>> = HashTable::new();
///
/// assert!(table.insert(KeyValue::new(1, "one")).is_none());
/// assert!(table.insert(KeyValue::new(2, "two")).is_none());
///
/// assert_eq!(table.get(&1).map(|s| s.value), Some("one"));
/// assert_eq!(table.remove(&2).map(|s| s.value), Some("two"));
/// assert_eq!(table.len(), 1);
/// ```
pub struct HashTable<
    S,
    H = DefaultHashBuilder,
    M: OccupancyMap = Bitmap,
    R = Eager,
    const N: usize = 4,
> {
    slots: Box<[MaybeUninit<S>]>,
    map: M,

    size: u32,
    n_occupied: u32,
    upper_bound: u32,
    load_factor: f64,

    resize_position: u32,
    resize_batch: u32,
    shadow: Option<Box<HashTable<S, H, M, R, N>>>,

    hash_builder: H,
    _mode: PhantomData<R>,
}

impl<S, H, M, R, const N: usize> Debug for HashTable<S, H, M, R, N>
where
    M: OccupancyMap,
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("HashTable")
            .field("len", &self.size)
            .field("capacity", &self.slots.len())
            .field("touched", &self.n_occupied)
            .field("growth_threshold", &self.upper_bound)
            .field("growing", &(self.resize_position > 0))
            .finish()
    }
}

impl<S, H, M, R, const N: usize> Clone for HashTable<S, H, M, R, N>
where
    S: Clone,
    H: Clone,
    M: OccupancyMap + Clone,
{
    fn clone(&self) -> Self {
        let mut slots = Box::<[S]>::new_uninit_slice(self.slots.len());
        for i in 0..self.slots.len() {
            if self.map.exists(i) {
                // SAFETY: the exist bit guarantees the source slot is
                // initialized.
                slots[i].write(unsafe { self.slots.get_unchecked(i).assume_init_ref() }.clone());
            }
        }
        HashTable {
            slots,
            map: self.map.clone(),
            size: self.size,
            n_occupied: self.n_occupied,
            upper_bound: self.upper_bound,
            load_factor: self.load_factor,
            resize_position: self.resize_position,
            resize_batch: self.resize_batch,
            shadow: self.shadow.clone(),
            hash_builder: self.hash_builder.clone(),
            _mode: PhantomData,
        }
    }
}

impl<S, H, M, R, const N: usize> Drop for HashTable<S, H, M, R, N>
where
    M: OccupancyMap,
{
    fn drop(&mut self) {
        self.drop_occupied();
    }
}

impl<S, H, M, R, const N: usize> Default for HashTable<S, H, M, R, N>
where
    H: Default,
    M: OccupancyMap,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<S, H, M, R, const N: usize> HashTable<S, H, M, R, N>
where
    M: OccupancyMap,
{
    /// Creates an empty table at the baseline capacity of `4 * N` slots.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use shadow_hash::hash_table::HashTable;
    /// use shadow_hash::slot::KeyOnly;
    ///
    /// let table: HashTable<KeyOnly<u64>> = HashTable::new();
    /// assert!(table.is_empty());
    /// assert_eq!(table.capacity(), 16);
    /// ```
    pub fn new() -> Self
    where
        H: Default,
    {
        Self::with_hasher(H::default())
    }

    /// Creates an empty table with the given hasher.
    pub fn with_hasher(hash_builder: H) -> Self {
        Self::with_capacity_and_hasher(0, hash_builder)
    }

    /// Creates a table pre-sized to hold at least `capacity` entries without
    /// growing.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use shadow_hash::hash_table::HashTable;
    /// use shadow_hash::slot::KeyOnly;
    ///
    /// let table: HashTable<KeyOnly<u64>> = HashTable::with_capacity(100);
    /// assert!(table.growth_threshold() >= 100);
    /// ```
    pub fn with_capacity(capacity: usize) -> Self
    where
        H: Default,
    {
        Self::with_capacity_and_hasher(capacity, H::default())
    }

    /// Creates a table pre-sized for `capacity` entries with the given
    /// hasher.
    pub fn with_capacity_and_hasher(capacity: usize, hash_builder: H) -> Self {
        let want = capacity.min(u32::MAX as usize) as u32;
        let (slots, upper_bound) = Self::capacity_for(want, DEFAULT_LOAD_FACTOR, 0);
        Self::with_parts(
            slots,
            upper_bound,
            DEFAULT_LOAD_FACTOR,
            DEFAULT_RESIZE_BATCH,
            hash_builder,
        )
    }

    /// Returns a [`Builder`] for non-default load factor, batch size, or
    /// pre-sizing.
    pub fn builder() -> Builder<S, H, M, R, N>
    where
        H: Default,
    {
        Builder::new()
    }

    fn with_parts(
        capacity: u32,
        upper_bound: u32,
        load_factor: f64,
        resize_batch: u32,
        hash_builder: H,
    ) -> Self {
        HashTable {
            slots: Box::new_uninit_slice(capacity as usize),
            map: M::with_slots(capacity as usize),
            size: 0,
            n_occupied: 0,
            upper_bound,
            load_factor,
            resize_position: 0,
            resize_batch,
            shadow: None,
            hash_builder,
            _mode: PhantomData,
        }
    }

    /// Sizing policy shared by construction and growth: headroom over the
    /// load factor, rounded up to a power of two of at least four clusters.
    /// Near the representable maximum the growth threshold falls back to
    /// additive increases instead of overflowing.
    fn capacity_for(want_size: u32, load_factor: f64, prev_upper_bound: u32) -> (u32, u32) {
        debug_assert!(N.is_power_of_two());

        let mut want = want_size;
        if (want as f64) < (1u64 << 31) as f64 * (load_factor * 0.84) {
            want = (want as f64 / (load_factor * 0.85)) as u32 + 1;
        } else if want < 1 << 31 {
            want = 1 << 31;
        } else {
            panic!("hash table capacity exhausted");
        }

        let mut capacity = (N as u32) * 4;
        while capacity < want {
            capacity *= 2;
        }

        let upper_bound = if capacity < 1 << 31 {
            (capacity as f64 * load_factor) as u32
        } else {
            prev_upper_bound + (want - prev_upper_bound) / 2
        };
        (capacity, upper_bound)
    }

    /// Returns the number of live entries.
    pub fn len(&self) -> usize {
        self.size as usize
    }

    /// Returns `true` if the table holds no entries.
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Returns the number of slots. Always a power of two.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Returns the number of entries the table can index before the next
    /// growth triggers (assuming no deletions have dirtied extra slots).
    pub fn growth_threshold(&self) -> usize {
        self.upper_bound as usize
    }

    /// Returns the configured load factor.
    pub fn load_factor(&self) -> f64 {
        self.load_factor
    }

    /// Returns `true` while an incremental migration is in progress.
    ///
    /// Eager tables never observe `true`: their migrations start and finish
    /// inside a single call.
    pub fn is_growing(&self) -> bool {
        self.resize_position > 0
    }

    /// Returns the memory footprint in bytes: the table struct, the slot
    /// array, the occupancy metadata, and (while growing) the shadow
    /// generation.
    pub fn bytes(&self) -> usize {
        let own =
            mem::size_of::<Self>() + self.slots.len() * mem::size_of::<S>() + self.map.bytes();
        own + self.shadow.as_deref().map_or(0, |shadow| shadow.bytes())
    }

    /// Returns the occupied slot at `index`, or `None` if the index is out
    /// of range or the slot is empty.
    ///
    /// Indices come from [`index_of`](Self::index_of) or
    /// [`get_or_insert_with`](Self::get_or_insert_with) and are invalidated
    /// by any mutating call.
    pub fn slot(&self, index: usize) -> Option<&S> {
        if index < self.slots.len() && self.map.exists(index) {
            // SAFETY: the exist bit guarantees the slot is initialized.
            Some(unsafe { self.slots.get_unchecked(index).assume_init_ref() })
        } else {
            None
        }
    }

    /// Returns an iterator over occupied slots in index order.
    ///
    /// The order is capacity-dependent and changes across resizes. The
    /// iterator borrows the table, so no structural mutation can interleave
    /// with a traversal; re-create the iterator to restart a scan.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use shadow_hash::hash_table::HashTable;
    /// use shadow_hash::slot::KeyOnly;
    ///
    /// let mut table: HashTable<KeyOnly<u32>> = HashTable::new();
    /// for k in [3u32, 1, 2] {
    ///     table.insert(KeyOnly(k));
    /// }
    ///
    /// let mut seen: Vec<u32> = table.iter().map(|s| s.0).collect();
    /// seen.sort_unstable();
    /// assert_eq!(seen, [1, 2, 3]);
    /// ```
    pub fn iter(&self) -> Iter<'_, S, H, M, R, N> {
        Iter {
            table: self,
            index: 0,
            remaining: self.size as usize,
        }
    }

    /// Removes all entries and resets the table to its baseline capacity.
    ///
    /// Any in-progress incremental migration is abandoned along with the
    /// shadow generation.
    pub fn clear(&mut self) {
        self.drop_occupied();
        let (capacity, upper_bound) = Self::capacity_for(0, self.load_factor, 0);
        self.slots = Box::new_uninit_slice(capacity as usize);
        self.map = M::with_slots(capacity as usize);
        self.size = 0;
        self.n_occupied = 0;
        self.upper_bound = upper_bound;
        self.resize_position = 0;
        self.shadow = None;
    }

    fn drop_occupied(&mut self) {
        if mem::needs_drop::<S>() && self.size > 0 {
            for i in 0..self.slots.len() {
                if self.map.exists(i) {
                    // SAFETY: the exist bit guarantees the slot is
                    // initialized, and it is never read again.
                    unsafe { self.slots.get_unchecked_mut(i).assume_init_drop() };
                }
            }
        }
    }

    #[inline(always)]
    fn mask(&self) -> u32 {
        self.slots.len() as u32 - 1
    }
}

impl<S, H, M, R, const N: usize> HashTable<S, H, M, R, N>
where
    S: Slot,
    S::Key: Hash + Eq,
    H: BuildHasher,
    M: OccupancyMap,
{
    #[inline(always)]
    fn hash_of(&self, key: &S::Key) -> u64 {
        self.hash_builder.hash_one(key)
    }

    /// Walks the probe sequence for `key`, returning the index of the slot
    /// holding it. Terminates at the first slot no probe has ever crossed:
    /// insertion dirties every slot it scans past, so a clean slot proves
    /// the key cannot live further along the sequence.
    fn probe_find(&self, hash: u64, key: &S::Key) -> Option<u32> {
        if self.size == 0 {
            return None;
        }

        let mask = self.mask();
        let tag = M::tag(hash);
        let mut probe = ProbeSeq::<N>::new(hash, mask);
        loop {
            let i = probe.index();
            if self.map.may_equal(i as usize, tag)
                // SAFETY: may_equal implies the slot is occupied and
                // therefore initialized.
                && unsafe { self.slots.get_unchecked(i as usize).assume_init_ref() }.key() == key
            {
                return Some(i);
            }
            if !self.map.dirty(i as usize) {
                return None;
            }
            probe.advance(mask);
        }
    }

    /// Finds or claims a slot for `key`, compacting the probe chain where a
    /// delete has opened a gap.
    ///
    /// The walk records the first dirty-empty slot as relocation candidate
    /// `p`. If the key turns up occupied later in the sequence, its cell is
    /// pulled back into `p`; if the key is absent, `p` is claimed in
    /// preference to extending into clean territory. Returns the slot index
    /// and whether the key already existed. A newly claimed cell is NOT
    /// written; the caller does that.
    fn mark(&mut self, hash: u64, key: &S::Key) -> (u32, bool) {
        let mask = self.mask();
        let tag = M::tag(hash);
        let mut probe = ProbeSeq::<N>::new(hash, mask);

        let p: u32;
        loop {
            let i = probe.index();
            if self.map.may_equal(i as usize, tag)
                // SAFETY: may_equal implies the slot is occupied and
                // therefore initialized.
                && unsafe { self.slots.get_unchecked(i as usize).assume_init_ref() }.key() == key
            {
                return (i, true);
            }
            if self.map.exists(i as usize) {
                self.map.set_dirty(i as usize);
            } else if !self.map.dirty(i as usize) {
                self.size += 1;
                self.n_occupied += 1;
                self.map.set_exists(i as usize, tag);
                return (i, false);
            } else {
                p = i;
                break;
            }
            probe.advance(mask);
        }

        // A reusable gap is recorded; keep walking for the key itself.
        loop {
            probe.advance(mask);
            let i = probe.index();
            if self.map.may_equal(i as usize, tag)
                // SAFETY: as above.
                && unsafe { self.slots.get_unchecked(i as usize).assume_init_ref() }.key() == key
            {
                if self.resize_position > 0 {
                    // Relocating would move the entry without updating the
                    // shadow mirror; leave the chain as-is mid-migration.
                    return (i, true);
                }
                // SAFETY: `i` is occupied and initialized; `p` is empty, so
                // writing it cannot leak a live value.
                unsafe {
                    let cell = self.slots.get_unchecked(i as usize).assume_init_read();
                    self.slots.get_unchecked_mut(p as usize).write(cell);
                }
                self.map.clear_exists(i as usize);
                if !self.map.dirty(i as usize) {
                    // The vacated slot was never probed past, so it reverts
                    // to clean-empty and leaves the touched count.
                    self.n_occupied -= 1;
                }
                self.map.set_exists(p as usize, tag);
                return (p, true);
            }
            if !self.map.dirty(i as usize) {
                // Clean terminator: the key is absent. The recorded slot is
                // already counted in n_occupied, so only `size` moves.
                self.size += 1;
                self.map.set_exists(p as usize, tag);
                return (p, false);
            }
        }
    }

    /// Claims the first free slot for a key known to be absent. Used to fill
    /// a fresh shadow generation, where no equality checks are needed.
    fn short_mark(&mut self, hash: u64) -> u32 {
        let mask = self.mask();
        let tag = M::tag(hash);
        let mut probe = ProbeSeq::<N>::new(hash, mask);
        loop {
            let i = probe.index();
            if self.map.exists(i as usize) {
                self.map.set_dirty(i as usize);
            } else {
                if !self.map.dirty(i as usize) {
                    self.n_occupied += 1;
                }
                self.map.set_exists(i as usize, tag);
                self.size += 1;
                return i;
            }
            probe.advance(mask);
        }
    }

    /// Returns a reference to the slot holding `key`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use shadow_hash::hash_table::HashTable;
    /// use shadow_hash::slot::KeyValue;
    ///
    /// let mut table: HashTable<KeyValue<u32, u64>> = HashTable::new();
    /// table.insert(KeyValue::new(7, 49));
    ///
    /// assert_eq!(table.get(&7).map(|s| s.value), Some(49));
    /// assert!(table.get(&8).is_none());
    /// ```
    #[inline]
    pub fn get(&self, key: &S::Key) -> Option<&S> {
        let hash = self.hash_of(key);
        let x = self.probe_find(hash, key)?;
        // SAFETY: probe_find only returns occupied indices.
        Some(unsafe { self.slots.get_unchecked(x as usize).assume_init_ref() })
    }

    /// Returns the slot index holding `key`, usable with
    /// [`slot`](Self::slot) / [`remove_at`](Self::remove_at) until the next
    /// mutating call.
    #[inline]
    pub fn index_of(&self, key: &S::Key) -> Option<usize> {
        let hash = self.hash_of(key);
        self.probe_find(hash, key).map(|x| x as usize)
    }

    /// Returns `true` if the table holds `key`.
    #[inline]
    pub fn contains(&self, key: &S::Key) -> bool {
        let hash = self.hash_of(key);
        self.probe_find(hash, key).is_some()
    }
}

impl<S, H, M, R, const N: usize> HashTable<S, H, M, R, N>
where
    S: Slot,
    S::Key: Hash + Eq,
    H: BuildHasher,
    M: OccupancyMap,
    R: ResizeMode<S, H, M, N>,
{
    /// Inserts a slot, returning the previously stored slot if the key was
    /// already present.
    ///
    /// Growth (or an incremental migration batch) is serviced before the
    /// insert, so the amortized cost is O(1) in both resize modes.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use shadow_hash::hash_table::HashTable;
    /// use shadow_hash::slot::KeyValue;
    ///
    /// let mut table: HashTable<KeyValue<u32, &str>> = HashTable::new();
    ///
    /// assert!(table.insert(KeyValue::new(1, "first")).is_none());
    /// let prev = table.insert(KeyValue::new(1, "second"));
    /// assert_eq!(prev.map(|s| s.value), Some("first"));
    /// assert_eq!(table.len(), 1);
    /// ```
    pub fn insert(&mut self, slot: S) -> Option<S> {
        R::resize_if_need(self);
        let hash = self.hash_of(slot.key());
        let (x, existed) = self.mark(hash, slot.key());
        let prev = if existed {
            // SAFETY: mark returned an occupied, initialized slot.
            Some(unsafe {
                mem::replace(
                    self.slots.get_unchecked_mut(x as usize).assume_init_mut(),
                    slot,
                )
            })
        } else {
            // SAFETY: mark claimed an empty cell for us to fill.
            unsafe { self.slots.get_unchecked_mut(x as usize).write(slot) };
            None
        };
        R::mirror_put(self, x, existed);
        prev
    }

    /// Looks up `key`, inserting `make(key)` if absent, and returns the slot
    /// index plus whether the key already existed.
    ///
    /// The hash is computed once; `make` runs only on a miss and must
    /// produce a slot whose key equals the one it is given. The returned
    /// index is valid until the next mutating call.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use shadow_hash::hash_table::HashTable;
    /// use shadow_hash::slot::KeyValue;
    ///
    /// let mut table: HashTable<KeyValue<u32, u64>> = HashTable::new();
    ///
    /// let (index, existed) = table.get_or_insert_with(5, |k| KeyValue::new(k, 0));
    /// assert!(!existed);
    /// assert_eq!(table.slot(index).map(|s| s.value), Some(0));
    ///
    /// let (_, existed) = table.get_or_insert_with(5, |k| KeyValue::new(k, 99));
    /// assert!(existed);
    /// assert_eq!(table.get(&5).map(|s| s.value), Some(0));
    /// ```
    pub fn get_or_insert_with(
        &mut self,
        key: S::Key,
        make: impl FnOnce(S::Key) -> S,
    ) -> (usize, bool) {
        R::resize_if_need(self);
        let hash = self.hash_of(&key);
        let (x, existed) = self.mark(hash, &key);
        if !existed {
            // SAFETY: mark claimed an empty cell for us to fill.
            unsafe { self.slots.get_unchecked_mut(x as usize).write(make(key)) };
            R::mirror_put(self, x, false);
        }
        (x as usize, existed)
    }

    /// Removes `key`, returning its slot.
    ///
    /// The vacated cell is marked dirty-empty: it keeps carrying the probe
    /// chains of other keys and may be reclaimed by a later insert.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use shadow_hash::hash_table::HashTable;
    /// use shadow_hash::slot::KeyOnly;
    ///
    /// let mut table: HashTable<KeyOnly<u32>> = HashTable::new();
    /// table.insert(KeyOnly(3));
    ///
    /// assert_eq!(table.remove(&3), Some(KeyOnly(3)));
    /// assert_eq!(table.remove(&3), None);
    /// assert!(table.is_empty());
    /// ```
    pub fn remove(&mut self, key: &S::Key) -> Option<S> {
        let hash = self.hash_of(key);
        let x = self.probe_find(hash, key)?;
        Some(self.take_at(x))
    }

    /// Removes the entry at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range or not an occupied slot. Indices
    /// must come from [`index_of`](Self::index_of) or
    /// [`get_or_insert_with`](Self::get_or_insert_with) with no intervening
    /// mutation.
    pub fn remove_at(&mut self, index: usize) -> S {
        assert!(
            index < self.slots.len() && self.map.exists(index),
            "remove_at: index {index} is not an occupied slot"
        );
        self.take_at(index as u32)
    }

    fn take_at(&mut self, x: u32) -> S {
        // SAFETY: callers verified the slot is occupied and initialized.
        let slot = unsafe { self.slots.get_unchecked(x as usize).assume_init_read() };
        self.map.clear_exists(x as usize);
        self.size -= 1;
        if !self.map.dirty(x as usize) {
            self.n_occupied -= 1;
        }
        R::mirror_remove(self, x, &slot);
        slot
    }

    /// Ensures the table can take `additional` more entries without growing
    /// mid-insert.
    ///
    /// In eager mode the growth happens here; in incremental mode this
    /// starts the migration, which subsequent mutating calls advance.
    pub fn reserve(&mut self, additional: usize) {
        let want = (self.size as usize)
            .saturating_add(additional)
            .min(u32::MAX as usize) as u32;
        if want > self.upper_bound {
            R::grow_to(self, want);
        }
    }
}

impl<S, H, M, const N: usize> HashTable<S, H, M, Eager, N>
where
    S: Slot,
    S::Key: Hash + Eq,
    H: BuildHasher + Clone,
    M: OccupancyMap,
{
    /// Builds the shadow generation and migrates every entry in one pass.
    #[cold]
    fn grow(&mut self, want_size: u32) {
        let mut shadow = self.shadow_for(want_size);
        for i in 0..self.slots.len() {
            if self.map.exists(i) {
                // SAFETY: the exist bit guarantees the slot is initialized.
                // The bit is cleared as soon as the value is moved out, so an
                // unwinding hash call cannot see it as live.
                let cell = unsafe { self.slots.get_unchecked(i).assume_init_read() };
                self.map.clear_exists(i);
                let hash = shadow.hash_of(cell.key());
                let x = shadow.short_mark(hash);
                // SAFETY: short_mark claimed an empty cell.
                unsafe { shadow.slots.get_unchecked_mut(x as usize).write(cell) };
            }
        }
        debug_assert_eq!(shadow.size, self.size);
        *self = *shadow;
    }

    /// Returns a mutable reference to the slot holding `key`.
    ///
    /// Only eager tables offer this: see [`Incremental`] for why.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use shadow_hash::hash_table::HashTable;
    /// use shadow_hash::slot::KeyValue;
    ///
    /// let mut table: HashTable<KeyValue<u32, u64>> = HashTable::new();
    /// table.insert(KeyValue::new(1, 10));
    ///
    /// if let Some(slot) = table.find_mut(&1) {
    ///     slot.value += 1;
    /// }
    /// assert_eq!(table.get(&1).map(|s| s.value), Some(11));
    /// ```
    #[inline]
    pub fn find_mut(&mut self, key: &S::Key) -> Option<&mut S> {
        let hash = self.hash_of(key);
        let x = self.probe_find(hash, key)?;
        // SAFETY: probe_find only returns occupied indices.
        Some(unsafe { self.slots.get_unchecked_mut(x as usize).assume_init_mut() })
    }

    /// Returns a mutable reference to the occupied slot at `index`, or
    /// `None` if the index is out of range or the slot is empty.
    ///
    /// Mutating the slot's key is a contract violation (the same one as a
    /// hash/equality mismatch) and leaves the entry unfindable.
    pub fn slot_mut(&mut self, index: usize) -> Option<&mut S> {
        if index < self.slots.len() && self.map.exists(index) {
            // SAFETY: the exist bit guarantees the slot is initialized.
            Some(unsafe { self.slots.get_unchecked_mut(index).assume_init_mut() })
        } else {
            None
        }
    }
}

impl<S, H, M, R, const N: usize> HashTable<S, H, M, R, N>
where
    S: Slot,
    S::Key: Hash + Eq,
    H: BuildHasher + Clone,
    M: OccupancyMap,
{
    fn shadow_for(&self, want_size: u32) -> Box<Self> {
        let want = want_size.max(self.size + 1);
        let (mut capacity, mut upper_bound) =
            Self::capacity_for(want, self.load_factor, self.upper_bound);
        if capacity < self.slots.len() as u32 {
            // Growth is monotonic. A table whose touched count is dominated
            // by dirty slots would otherwise size its shadow below the
            // current capacity; rehashing at the same size still sheds the
            // accumulated dirt.
            capacity = self.slots.len() as u32;
            upper_bound = self.upper_bound;
        }
        Box::new(Self::with_parts(
            capacity,
            upper_bound,
            self.load_factor,
            self.resize_batch,
            self.hash_builder.clone(),
        ))
    }
}

impl<S, H, M, const N: usize> HashTable<S, H, M, Incremental, N>
where
    S: Slot + Clone,
    S::Key: Hash + Eq,
    H: BuildHasher + Clone,
    M: OccupancyMap,
{
    #[cold]
    fn start_resize(&mut self, want_size: u32) {
        if self.resize_position > 0 {
            return;
        }
        self.shadow = Some(self.shadow_for(want_size));
        self.resize_step();
    }

    /// Migrates one batch of slots into the shadow generation, completing
    /// the resize when the cursor reaches the end of the table.
    ///
    /// Entries are cloned, not moved: the old generation stays authoritative
    /// for every read until the final swap.
    fn resize_step(&mut self) {
        let Some(mut shadow) = self.shadow.take() else {
            return;
        };
        let total = self.slots.len() as u32;
        let start = self.resize_position;
        let end = start.saturating_add(self.resize_batch).min(total);
        self.resize_position = start.saturating_add(self.resize_batch);

        for i in start..end {
            if self.map.exists(i as usize) {
                // SAFETY: the exist bit guarantees the slot is initialized.
                let cell =
                    unsafe { self.slots.get_unchecked(i as usize).assume_init_ref() }.clone();
                let hash = shadow.hash_of(cell.key());
                let x = shadow.short_mark(hash);
                // SAFETY: short_mark claimed an empty cell.
                unsafe { shadow.slots.get_unchecked_mut(x as usize).write(cell) };
                if shadow.resize_position > 0 && x < shadow.resize_position {
                    // The shadow is itself mid-resize (it outgrew its bound
                    // from inserts mirrored during a long migration); keep
                    // its generations consistent too.
                    shadow.mirror_put_inner(x, false);
                }
            }
        }

        if end == total {
            debug_assert_eq!(shadow.size, self.size);
            *self = *shadow;
        } else {
            self.shadow = Some(shadow);
        }
    }

    /// Mirrors the mutation at `index` into the shadow generation.
    fn mirror_put_inner(&mut self, index: u32, existed: bool) {
        // SAFETY: the caller just wrote this slot; it is occupied.
        let cell = unsafe { self.slots.get_unchecked(index as usize).assume_init_ref() }.clone();
        let Some(shadow) = self.shadow.as_mut() else {
            return;
        };
        if existed {
            let hash = shadow.hash_of(cell.key());
            if let Some(y) = shadow.probe_find(hash, cell.key()) {
                // SAFETY: probe_find only returns occupied indices; plain
                // assignment drops the stale mirrored value.
                unsafe { *shadow.slots.get_unchecked_mut(y as usize).assume_init_mut() = cell };
            } else {
                debug_assert!(false, "mirrored entry missing from shadow");
            }
        } else {
            shadow.insert(cell);
        }
    }
}

impl<S, H, M, const N: usize> ResizeMode<S, H, M, N> for Eager
where
    S: Slot,
    S::Key: Hash + Eq,
    H: BuildHasher + Clone,
    M: OccupancyMap,
{
    const INCREMENTAL: bool = false;

    #[inline]
    fn resize_if_need(table: &mut HashTable<S, H, M, Self, N>) {
        if table.n_occupied >= table.upper_bound {
            table.grow(0);
        }
    }

    fn grow_to(table: &mut HashTable<S, H, M, Self, N>, want_size: u32) {
        table.grow(want_size);
    }

    #[inline(always)]
    fn mirror_put(_table: &mut HashTable<S, H, M, Self, N>, _index: u32, _existed: bool) {}

    #[inline(always)]
    fn mirror_remove(_table: &mut HashTable<S, H, M, Self, N>, _index: u32, _slot: &S) {}
}

impl<S, H, M, const N: usize> ResizeMode<S, H, M, N> for Incremental
where
    S: Slot + Clone,
    S::Key: Hash + Eq,
    H: BuildHasher + Clone,
    M: OccupancyMap,
{
    const INCREMENTAL: bool = true;

    #[inline]
    fn resize_if_need(table: &mut HashTable<S, H, M, Self, N>) {
        if table.resize_position > 0 {
            table.resize_step();
            // A small batch must never let the old generation fill solid:
            // probe walks terminate only at clean slots. Drain the migration
            // once fewer than two clean slots would remain.
            while table.resize_position > 0
                && table.n_occupied + 2 >= table.slots.len() as u32
            {
                table.resize_step();
            }
        } else if table.n_occupied >= table.upper_bound {
            table.start_resize(0);
        }
    }

    fn grow_to(table: &mut HashTable<S, H, M, Self, N>, want_size: u32) {
        table.start_resize(want_size);
    }

    #[inline]
    fn mirror_put(table: &mut HashTable<S, H, M, Self, N>, index: u32, existed: bool) {
        if table.resize_position > 0 && index < table.resize_position {
            table.mirror_put_inner(index, existed);
        }
    }

    #[inline]
    fn mirror_remove(table: &mut HashTable<S, H, M, Self, N>, index: u32, slot: &S) {
        if table.resize_position > 0 && index < table.resize_position {
            if let Some(shadow) = table.shadow.as_mut() {
                let removed = shadow.remove(slot.key());
                debug_assert!(removed.is_some(), "mirrored entry missing from shadow");
            }
            table.resize_step();
        }
    }
}

/// Iterator over a table's occupied slots in index order.
///
/// Created by [`HashTable::iter`].
pub struct Iter<'a, S, H, M: OccupancyMap, R, const N: usize> {
    table: &'a HashTable<S, H, M, R, N>,
    index: usize,
    remaining: usize,
}

impl<'a, S, H, M: OccupancyMap, R, const N: usize> Iterator for Iter<'a, S, H, M, R, N> {
    type Item = &'a S;

    fn next(&mut self) -> Option<Self::Item> {
        while self.index < self.table.slots.len() {
            let i = self.index;
            self.index += 1;
            if self.table.map.exists(i) {
                self.remaining -= 1;
                // SAFETY: the exist bit guarantees the slot is initialized.
                return Some(unsafe { self.table.slots.get_unchecked(i).assume_init_ref() });
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<S, H, M: OccupancyMap, R, const N: usize> ExactSizeIterator for Iter<'_, S, H, M, R, N> {}

impl<S, H, M: OccupancyMap, R, const N: usize> core::iter::FusedIterator
    for Iter<'_, S, H, M, R, N>
{
}

impl<'a, S, H, M: OccupancyMap, R, const N: usize> IntoIterator for &'a HashTable<S, H, M, R, N> {
    type Item = &'a S;
    type IntoIter = Iter<'a, S, H, M, R, N>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Point-in-time occupancy counters, for capacity analysis.
#[cfg(any(test, feature = "stats"))]
#[derive(Debug, Clone)]
pub struct Stats {
    /// Live entries.
    pub len: usize,
    /// Total slots.
    pub capacity: usize,
    /// Slots that are occupied or dirty-empty.
    pub touched: usize,
    /// Touched-slot count that triggers the next growth.
    pub growth_threshold: usize,
    /// Memory footprint in bytes, shadow generation included.
    pub bytes: usize,
}

#[cfg(any(test, feature = "stats"))]
impl<S, H, M, R, const N: usize> HashTable<S, H, M, R, N>
where
    S: Slot,
    S::Key: Hash + Eq,
    H: BuildHasher,
    M: OccupancyMap,
{
    /// Returns the current occupancy counters.
    pub fn stats(&self) -> Stats {
        Stats {
            len: self.size as usize,
            capacity: self.slots.len(),
            touched: self.n_occupied as usize,
            growth_threshold: self.upper_bound as usize,
            bytes: self.bytes(),
        }
    }

    /// Computes a histogram of probe lengths over the current entries.
    ///
    /// Bin `i` counts entries found after `i` probe steps; the final bin
    /// collects everything at or beyond `4 * N` steps. At or below the load
    /// factor the mass concentrates in the first cluster.
    pub fn probe_histogram(&self) -> alloc::vec::Vec<usize> {
        let bins = 4 * N + 1;
        let mut hist = alloc::vec![0usize; bins];
        let mask = self.mask();
        for i in 0..self.slots.len() {
            if !self.map.exists(i) {
                continue;
            }
            // SAFETY: the exist bit guarantees the slot is initialized.
            let key = unsafe { self.slots.get_unchecked(i).assume_init_ref() }.key();
            let hash = self.hash_of(key);
            let mut probe = ProbeSeq::<N>::new(hash, mask);
            let mut length = 0usize;
            while probe.index() != i as u32 {
                probe.advance(mask);
                length += 1;
            }
            hist[length.min(bins - 1)] += 1;
        }
        hist
    }
}

#[cfg(test)]
mod tests {
    use alloc::rc::Rc;
    use alloc::string::String;
    use alloc::string::ToString;
    use alloc::vec::Vec;
    use core::hash::BuildHasher;

    use rand::Rng;
    use rand::SeedableRng;
    use rand::TryRngCore;
    use rand::rngs::OsRng;
    use rand::rngs::SmallRng;
    use siphasher::sip::SipHasher;

    use super::*;
    use crate::occupancy::ShortHash1;
    use crate::occupancy::ShortHash2;
    use crate::slot::KeyOnly;
    use crate::slot::KeyValue;

    #[derive(Clone)]
    struct SipHashBuilder {
        k1: u64,
        k2: u64,
    }

    impl BuildHasher for SipHashBuilder {
        type Hasher = SipHasher;

        fn build_hasher(&self) -> Self::Hasher {
            SipHasher::new_with_keys(self.k1, self.k2)
        }
    }

    impl Default for SipHashBuilder {
        fn default() -> Self {
            let mut rng = OsRng;
            Self {
                k1: rng.try_next_u64().unwrap_or(0),
                k2: rng.try_next_u64().unwrap_or(0),
            }
        }
    }

    type IntMap = HashTable<KeyValue<u32, u64>, SipHashBuilder>;
    type IntSet = HashTable<KeyOnly<u32>, SipHashBuilder>;

    #[test]
    fn test_new_starts_at_baseline() {
        let table = IntMap::new();
        assert!(table.is_empty());
        assert_eq!(table.len(), 0);
        assert_eq!(table.capacity(), 16);
        assert_eq!(table.growth_threshold(), 11);
        assert!(!table.is_growing());
    }

    #[test]
    fn test_round_trip() {
        let mut table = IntMap::new();
        for k in 0..64u32 {
            assert!(table.insert(KeyValue::new(k, u64::from(k) * 3)).is_none());
            assert_eq!(table.get(&k).map(|s| s.value), Some(u64::from(k) * 3));
        }
        assert_eq!(table.len(), 64);
        for k in 0..64u32 {
            assert_eq!(table.get(&k).map(|s| s.value), Some(u64::from(k) * 3));
        }
    }

    #[test]
    fn test_overwrite_reports_previous() {
        let mut table = IntMap::new();
        assert!(table.insert(KeyValue::new(9, 1)).is_none());
        let prev = table.insert(KeyValue::new(9, 2));
        assert_eq!(prev.map(|s| s.value), Some(1));
        assert_eq!(table.len(), 1);
        assert_eq!(table.get(&9).map(|s| s.value), Some(2));
    }

    #[test]
    fn test_remove() {
        let mut table = IntMap::new();
        for k in 0..32u32 {
            table.insert(KeyValue::new(k, u64::from(k)));
        }
        assert_eq!(table.remove(&7).map(|s| s.value), Some(7));
        assert_eq!(table.len(), 31);
        assert!(table.get(&7).is_none());
        assert!(table.remove(&7).is_none());
        assert_eq!(table.len(), 31);
        for k in (0..32u32).filter(|&k| k != 7) {
            assert!(table.contains(&k));
        }
    }

    #[test]
    fn test_grow_scenario_keys_1_to_1000() {
        let mut table = IntMap::new();
        assert_eq!(table.capacity(), 16);

        let mut last_capacity = table.capacity();
        for k in 1..=1000u32 {
            table.insert(KeyValue::new(k, u64::from(k) * 7));
            let capacity = table.capacity();
            assert!(capacity.is_power_of_two());
            assert!(capacity >= last_capacity, "capacity must grow monotonically");
            last_capacity = capacity;
        }

        assert_eq!(table.len(), 1000);
        for k in 1..=1000u32 {
            assert_eq!(table.get(&k).map(|s| s.value), Some(u64::from(k) * 7));
        }

        for k in (2..=1000u32).step_by(2) {
            assert!(table.remove(&k).is_some());
        }
        assert_eq!(table.len(), 500);
        for k in 1..=1000u32 {
            if k % 2 == 0 {
                assert!(table.get(&k).is_none());
            } else {
                assert_eq!(table.get(&k).map(|s| s.value), Some(u64::from(k) * 7));
            }
        }
    }

    #[test]
    fn test_load_factor_invariant_under_churn() {
        let mut rng = SmallRng::seed_from_u64(0x5eed);
        let mut table = IntSet::new();
        for _ in 0..20_000 {
            let k = rng.random_range(0..2000u32);
            if rng.random_bool(0.4) {
                table.remove(&k);
            } else {
                table.insert(KeyOnly(k));
            }
            assert!(
                table.n_occupied <= table.upper_bound,
                "touched {} exceeds threshold {} at capacity {}",
                table.n_occupied,
                table.upper_bound,
                table.capacity()
            );
            assert!(table.size <= table.n_occupied);
        }
    }

    #[test]
    fn test_same_key_churn_reclaims_tombstones() {
        let mut rng = SmallRng::seed_from_u64(42);
        let mut table = IntMap::new();
        for k in 0..100u32 {
            table.insert(KeyValue::new(k, 0));
        }
        let capacity = table.capacity();

        // Deleting and reinserting keys from a fixed set reclaims the dirty
        // slots instead of consuming fresh ones, so the table never grows.
        for round in 0..10_000u64 {
            let k = rng.random_range(0..100u32);
            assert!(table.remove(&k).is_some());
            assert!(table.insert(KeyValue::new(k, round)).is_none());
            assert_eq!(table.capacity(), capacity);
            assert_eq!(table.len(), 100);
        }
        for k in 0..100u32 {
            assert!(table.contains(&k));
        }
    }

    #[test]
    fn test_relocation_compacts_probe_chains() {
        let mut table = IntSet::with_capacity(500);
        for k in 0..300u32 {
            table.insert(KeyOnly(k));
        }
        // Punch holes, then re-look-up every survivor through insert: each
        // re-insert that walks over a reusable gap pulls the entry forward.
        for k in (0..300u32).step_by(3) {
            table.remove(&k);
        }
        for k in 0..300u32 {
            if k % 3 != 0 {
                assert!(table.insert(KeyOnly(k)).is_some());
            }
        }
        for k in 0..300u32 {
            assert_eq!(table.contains(&k), k % 3 != 0);
        }
        assert_eq!(table.len(), 200);
    }

    #[test]
    fn test_get_or_insert_with() {
        let mut table = IntMap::new();
        let (index, existed) = table.get_or_insert_with(3, |k| KeyValue::new(k, 30));
        assert!(!existed);
        assert_eq!(table.slot(index).map(|s| s.value), Some(30));

        let (index2, existed) = table.get_or_insert_with(3, |k| KeyValue::new(k, 99));
        assert!(existed);
        assert_eq!(index, index2);
        assert_eq!(table.len(), 1);
        assert_eq!(table.get(&3).map(|s| s.value), Some(30));
    }

    #[test]
    fn test_index_based_access() {
        let mut table = IntMap::new();
        table.insert(KeyValue::new(11, 110));
        let index = table.index_of(&11).unwrap();
        assert_eq!(table.slot(index).map(|s| s.key), Some(11));

        let removed = table.remove_at(index);
        assert_eq!(removed.value, 110);
        assert!(table.is_empty());
        assert!(table.slot(index).is_none());
        assert!(table.index_of(&11).is_none());
    }

    #[test]
    #[should_panic(expected = "not an occupied slot")]
    fn test_remove_at_panics_on_empty_slot() {
        let mut table = IntMap::new();
        table.insert(KeyValue::new(1, 1));
        let index = table.index_of(&1).unwrap();
        table.remove_at(index);
        table.remove_at(index);
    }

    #[test]
    fn test_find_mut_in_place_update() {
        let mut table = IntMap::new();
        table.insert(KeyValue::new(5, 50));
        table.find_mut(&5).unwrap().value = 51;
        assert_eq!(table.get(&5).map(|s| s.value), Some(51));

        let index = table.index_of(&5).unwrap();
        table.slot_mut(index).unwrap().value = 52;
        assert_eq!(table.get(&5).map(|s| s.value), Some(52));
    }

    #[test]
    fn test_clear_resets_to_baseline() {
        let mut table = IntMap::new();
        for k in 0..500u32 {
            table.insert(KeyValue::new(k, 0));
        }
        assert!(table.capacity() > 16);

        table.clear();
        assert!(table.is_empty());
        assert_eq!(table.capacity(), 16);
        assert!(table.get(&3).is_none());

        table.insert(KeyValue::new(3, 3));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_iter_visits_occupied_in_index_order() {
        let mut table = IntSet::new();
        for k in 0..200u32 {
            table.insert(KeyOnly(k));
        }
        let from_iter: Vec<u32> = table.iter().map(|s| s.0).collect();
        let mut by_index = Vec::new();
        for i in 0..table.capacity() {
            if let Some(slot) = table.slot(i) {
                by_index.push(slot.0);
            }
        }
        assert_eq!(from_iter, by_index);
        assert_eq!(from_iter.len(), 200);

        let mut sorted = from_iter;
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), 200);
    }

    #[test]
    fn test_clone_is_independent() {
        let mut table = IntMap::new();
        for k in 0..100u32 {
            table.insert(KeyValue::new(k, u64::from(k)));
        }
        let mut copy = table.clone();
        copy.remove(&7);
        copy.insert(KeyValue::new(1000, 1));

        assert!(table.contains(&7));
        assert!(!table.contains(&1000));
        assert_eq!(copy.len(), 100);
        assert_eq!(table.len(), 100);
    }

    #[test]
    fn test_bytes_accounts_for_growth() {
        let mut table = IntMap::new();
        let before = table.bytes();
        for k in 0..1000u32 {
            table.insert(KeyValue::new(k, 0));
        }
        assert!(table.bytes() > before);
    }

    #[test]
    fn test_values_drop_exactly_once() {
        let marker = Rc::new(());
        {
            let mut table: HashTable<KeyValue<u32, Rc<()>>, SipHashBuilder> = HashTable::new();
            for k in 0..50u32 {
                table.insert(KeyValue::new(k, Rc::clone(&marker)));
            }
            assert_eq!(Rc::strong_count(&marker), 51);

            // Overwrite drops the replaced value, remove hands it back.
            table.insert(KeyValue::new(0, Rc::clone(&marker)));
            assert_eq!(Rc::strong_count(&marker), 51);
            drop(table.remove(&1));
            assert_eq!(Rc::strong_count(&marker), 50);
        }
        assert_eq!(Rc::strong_count(&marker), 1);
    }

    #[test]
    fn test_string_keys() {
        let mut table: HashTable<KeyValue<String, usize>, SipHashBuilder> = HashTable::new();
        for i in 0..200usize {
            let key = alloc::format!("key-{i}");
            table.insert(KeyValue::new(key, i));
        }
        for i in 0..200usize {
            let key = alloc::format!("key-{i}");
            assert_eq!(table.get(&key).map(|s| s.value), Some(i));
        }
        assert!(table.get(&"key-200".to_string()).is_none());
    }

    #[test]
    fn test_custom_slot_type() {
        #[derive(Clone)]
        struct Handle {
            id: u64,
            generation: u16,
        }

        impl Slot for Handle {
            type Key = u64;

            fn key(&self) -> &u64 {
                &self.id
            }
        }

        let mut table: HashTable<Handle, SipHashBuilder> = HashTable::new();
        for id in 0..100u64 {
            table.insert(Handle {
                id,
                generation: (id % 7) as u16,
            });
        }
        assert_eq!(table.get(&42).map(|h| h.generation), Some(0));
        assert_eq!(table.get(&43).map(|h| h.generation), Some(1));
        assert_eq!(table.remove(&42).map(|h| h.id), Some(42));
        assert!(table.get(&42).is_none());
    }

    fn exercise_encoding<M: OccupancyMap>() {
        let mut table: HashTable<KeyValue<u64, u64>, SipHashBuilder, M> = HashTable::new();
        for k in 0..2000u64 {
            table.insert(KeyValue::new(k, k ^ 0xff));
        }
        for k in (0..2000u64).step_by(2) {
            assert!(table.remove(&k).is_some());
        }
        for k in 0..2000u64 {
            assert_eq!(table.contains(&k), k % 2 == 1);
        }
        assert_eq!(table.len(), 1000);
    }

    #[test]
    fn test_short_hash_encodings_match_bitmap_behavior() {
        exercise_encoding::<Bitmap>();
        exercise_encoding::<ShortHash1>();
        exercise_encoding::<ShortHash2>();
    }

    #[test]
    fn test_single_slot_clusters() {
        let mut table: HashTable<KeyOnly<u32>, SipHashBuilder, Bitmap, Eager, 1> =
            HashTable::new();
        assert_eq!(table.capacity(), 4);
        for k in 0..500u32 {
            table.insert(KeyOnly(k));
        }
        for k in 0..500u32 {
            assert!(table.contains(&k));
        }
        assert_eq!(table.len(), 500);
    }

    #[test]
    fn test_reserve_prevents_growth() {
        let mut table = IntSet::new();
        table.reserve(1000);
        let capacity = table.capacity();
        assert!(table.growth_threshold() >= 1000);
        for k in 0..1000u32 {
            table.insert(KeyOnly(k));
        }
        assert_eq!(table.capacity(), capacity);
    }

    #[test]
    fn test_incremental_resize_transparency() {
        let mut table: HashTable<KeyValue<u32, u64>, SipHashBuilder, Bitmap, Incremental> =
            Builder::with_hasher(SipHashBuilder::default())
                .resize_batch(1)
                .build();

        let mut saw_growing = false;
        for k in 0..5000u32 {
            table.insert(KeyValue::new(k, u64::from(k) + 1));
            saw_growing |= table.is_growing();
            // Reads stay coherent mid-migration.
            assert_eq!(table.get(&k).map(|s| s.value), Some(u64::from(k) + 1));
        }
        assert!(saw_growing, "batch=1 must leave migrations in progress");
        assert_eq!(table.len(), 5000);
        for k in 0..5000u32 {
            assert_eq!(table.get(&k).map(|s| s.value), Some(u64::from(k) + 1));
        }
    }

    #[test]
    fn test_incremental_mirrors_mutations_below_cursor() {
        let mut table: HashTable<KeyValue<u32, u64>, SipHashBuilder, Bitmap, Incremental> =
            Builder::with_hasher(SipHashBuilder::default())
                .resize_batch(1)
                .build();

        // Fill until a migration is in flight.
        let mut k = 0u32;
        while !table.is_growing() {
            table.insert(KeyValue::new(k, u64::from(k)));
            k += 1;
        }

        // Mutate while the migration is live: overwrite, delete, and insert.
        // Every one of these must land in whichever generation survives.
        table.insert(KeyValue::new(0, 999));
        let deleted = k - 1;
        assert!(table.remove(&deleted).is_some());
        table.insert(KeyValue::new(100_000, 1));

        // Drive the migration to completion.
        while table.is_growing() {
            table.insert(KeyValue::new(k, u64::from(k)));
            k += 1;
        }

        assert_eq!(table.get(&0).map(|s| s.value), Some(999));
        assert!(table.get(&deleted).is_none());
        assert_eq!(table.get(&100_000).map(|s| s.value), Some(1));
        for i in 1..deleted {
            assert_eq!(table.get(&i).map(|s| s.value), Some(u64::from(i)));
        }
    }

    #[test]
    fn test_incremental_heavy_churn_stays_consistent() {
        let mut rng = SmallRng::seed_from_u64(0xc0ffee);
        let mut table: HashTable<KeyValue<u32, u64>, SipHashBuilder, ShortHash1, Incremental> =
            Builder::with_hasher(SipHashBuilder::default())
                .resize_batch(2)
                .build();
        let mut model = std::collections::HashMap::new();

        for round in 0..30_000u64 {
            let k = rng.random_range(0..3000u32);
            match rng.random_range(0..3u8) {
                0 => {
                    let prev = table.insert(KeyValue::new(k, round)).map(|s| s.value);
                    assert_eq!(prev, model.insert(k, round));
                }
                1 => {
                    let removed = table.remove(&k).map(|s| s.value);
                    assert_eq!(removed, model.remove(&k));
                }
                _ => {
                    assert_eq!(table.get(&k).map(|s| s.value), model.get(&k).copied());
                }
            }
            assert_eq!(table.len(), model.len());
        }
        for (k, v) in &model {
            assert_eq!(table.get(k).map(|s| s.value), Some(*v));
        }
    }

    #[test]
    fn test_probe_length_stays_clustered() {
        let mut table: HashTable<KeyOnly<u64>, SipHashBuilder> = HashTable::with_capacity(10_000);
        let capacity = table.capacity();
        // Fill right up to the growth threshold without crossing it.
        for k in 0..table.growth_threshold() as u64 - 1 {
            table.insert(KeyOnly(k));
        }
        assert_eq!(table.capacity(), capacity, "fill must not trigger growth");

        let hist = table.probe_histogram();
        let total: usize = hist.iter().sum();
        let weighted: usize = hist.iter().enumerate().map(|(len, n)| len * n).sum();
        let mean = weighted as f64 / total as f64;
        assert!(
            mean < 2.0 * DEFAULT_NEIGHBORS as f64,
            "mean probe length {mean} too long at load factor {}",
            table.load_factor()
        );
        // The first cluster resolves the majority of lookups.
        let first_cluster: usize = hist[..DEFAULT_NEIGHBORS].iter().sum();
        assert!(first_cluster * 2 > total);
    }

    #[test]
    fn test_stats_reflect_occupancy() {
        let mut table = IntSet::new();
        for k in 0..10u32 {
            table.insert(KeyOnly(k));
        }
        let stats = table.stats();
        assert_eq!(stats.len, 10);
        assert_eq!(stats.capacity, 16);
        assert!(stats.touched >= stats.len);
        assert!(stats.bytes > 0);
    }
}
