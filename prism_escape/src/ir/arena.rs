//! Index-addressed storage shared by the IR and the connection graph.
//!
//! Both graphs in this crate are cyclic (IR use-def chains, points-to
//! edges and their reverse uses), so neither stores references. Nodes
//! live in an [`Arena`] and refer to each other through typed [`Id`]s:
//!
//! - **Dense ids**: an id is its allocation order, usable as a table key
//! - **Side tables**: [`SecondaryMap`] attaches per-node data without
//!   touching the node type
//! - **Membership sets**: [`BitSet`] tracks visited/queued nodes in
//!   worklist algorithms
//!
//! Arenas never free individual items. A pass drops the whole arena when
//! it finishes.

use std::marker::PhantomData;
use std::ops::{Index, IndexMut};

// =============================================================================
// Typed ID
// =============================================================================

/// A dense index into an [`Arena<T>`].
///
/// The type parameter keeps IR node ids and points-to node ids apart.
/// Trait impls are written by hand so `Id<T>` is `Copy + Eq + Hash` for
/// every `T`.
pub struct Id<T> {
    index: u32,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Copy for Id<T> {}

impl<T> Clone for Id<T> {
    #[inline]
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> PartialEq for Id<T> {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
    }
}

impl<T> Eq for Id<T> {}

impl<T> PartialOrd for Id<T> {
    #[inline]
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Id<T> {
    #[inline]
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.index.cmp(&other.index)
    }
}

impl<T> std::hash::Hash for Id<T> {
    #[inline]
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.index.hash(state);
    }
}

impl<T> Id<T> {
    /// Sentinel for "no node".
    pub const INVALID: Self = Id {
        index: u32::MAX,
        _marker: PhantomData,
    };

    /// Wrap a raw index.
    #[inline]
    pub const fn new(index: u32) -> Self {
        Id {
            index,
            _marker: PhantomData,
        }
    }

    /// The raw index.
    #[inline]
    pub const fn index(self) -> u32 {
        self.index
    }

    /// The index as a table offset.
    #[inline]
    pub const fn as_usize(self) -> usize {
        self.index as usize
    }

    /// False only for [`Id::INVALID`].
    #[inline]
    pub const fn is_valid(self) -> bool {
        self.index != u32::MAX
    }
}

impl<T> std::fmt::Debug for Id<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_valid() {
            write!(f, "#{}", self.index)
        } else {
            write!(f, "#INVALID")
        }
    }
}

impl<T> std::fmt::Display for Id<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.index)
    }
}

impl<T> Default for Id<T> {
    fn default() -> Self {
        Self::INVALID
    }
}

// =============================================================================
// Arena
// =============================================================================

/// Append-only storage; the arena owns every item and ids never dangle.
#[derive(Debug, Clone)]
pub struct Arena<T> {
    items: Vec<T>,
}

impl<T> Arena<T> {
    pub fn new() -> Self {
        Arena { items: Vec::new() }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Arena {
            items: Vec::with_capacity(capacity),
        }
    }

    /// Store `item` and return its id.
    #[inline]
    pub fn alloc(&mut self, item: T) -> Id<T> {
        let index = self.items.len() as u32;
        self.items.push(item);
        Id::new(index)
    }

    #[inline]
    pub fn get(&self, id: Id<T>) -> Option<&T> {
        self.items.get(id.as_usize())
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Whether `id` was handed out by this arena.
    #[inline]
    pub fn contains(&self, id: Id<T>) -> bool {
        id.as_usize() < self.items.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Id<T>, &T)> {
        self.items
            .iter()
            .enumerate()
            .map(|(i, item)| (Id::new(i as u32), item))
    }

    pub fn ids(&self) -> impl Iterator<Item = Id<T>> + use<T> {
        (0..self.items.len() as u32).map(Id::new)
    }
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Index<Id<T>> for Arena<T> {
    type Output = T;

    #[inline]
    fn index(&self, id: Id<T>) -> &Self::Output {
        &self.items[id.as_usize()]
    }
}

impl<T> IndexMut<Id<T>> for Arena<T> {
    #[inline]
    fn index_mut(&mut self, id: Id<T>) -> &mut Self::Output {
        &mut self.items[id.as_usize()]
    }
}

// =============================================================================
// Secondary Map
// =============================================================================

/// Per-node data keyed by the ids of another arena.
///
/// Unset slots read as `V::default()`. The map grows on `set`, so it can
/// be created before the keyed arena reaches its final size.
#[derive(Debug, Clone)]
pub struct SecondaryMap<K, V> {
    values: Vec<V>,
    _marker: PhantomData<K>,
}

impl<K, V: Default + Clone> SecondaryMap<K, V> {
    pub fn new() -> Self {
        SecondaryMap {
            values: Vec::new(),
            _marker: PhantomData,
        }
    }

    /// Pre-size for an arena of `capacity` items.
    pub fn with_capacity(capacity: usize) -> Self {
        SecondaryMap {
            values: vec![V::default(); capacity],
            _marker: PhantomData,
        }
    }

    /// Grow so that ids below `len` are addressable.
    pub fn resize(&mut self, len: usize) {
        if len > self.values.len() {
            self.values.resize(len, V::default());
        }
    }

    pub fn get(&self, id: Id<K>) -> Option<&V> {
        self.values.get(id.as_usize())
    }

    pub fn get_mut(&mut self, id: Id<K>) -> Option<&mut V> {
        self.values.get_mut(id.as_usize())
    }

    pub fn set(&mut self, id: Id<K>, value: V) {
        let idx = id.as_usize();
        if idx >= self.values.len() {
            self.values.resize(idx + 1, V::default());
        }
        self.values[idx] = value;
    }
}

impl<K, V: Default + Clone> Default for SecondaryMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V: Default + Clone> Index<Id<K>> for SecondaryMap<K, V> {
    type Output = V;

    fn index(&self, id: Id<K>) -> &Self::Output {
        &self.values[id.as_usize()]
    }
}

// =============================================================================
// Bit Set
// =============================================================================

/// Growable membership set over dense indices.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BitSet {
    bits: Vec<u64>,
}

impl BitSet {
    pub fn new() -> Self {
        BitSet { bits: Vec::new() }
    }

    pub fn with_capacity(n: usize) -> Self {
        BitSet {
            bits: vec![0; n.div_ceil(64)],
        }
    }

    fn ensure_capacity(&mut self, n: usize) {
        let words = n.div_ceil(64);
        if words > self.bits.len() {
            self.bits.resize(words, 0);
        }
    }

    /// Set `index`; returns true if it was not already set.
    #[inline]
    pub fn insert(&mut self, index: usize) -> bool {
        self.ensure_capacity(index + 1);
        let (word, bit) = (index / 64, index % 64);
        let was_set = self.bits[word] & (1 << bit) != 0;
        self.bits[word] |= 1 << bit;
        !was_set
    }

    #[inline]
    pub fn remove(&mut self, index: usize) {
        let (word, bit) = (index / 64, index % 64);
        if let Some(w) = self.bits.get_mut(word) {
            *w &= !(1 << bit);
        }
    }

    #[inline]
    pub fn contains(&self, index: usize) -> bool {
        let (word, bit) = (index / 64, index % 64);
        self.bits
            .get(word)
            .is_some_and(|w| w & (1 << bit) != 0)
    }

    pub fn clear(&mut self) {
        self.bits.iter_mut().for_each(|w| *w = 0);
    }

    pub fn count(&self) -> usize {
        self.bits.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Set indices in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.bits.iter().enumerate().flat_map(|(word_idx, &word)| {
            (0..64)
                .filter(move |bit| word & (1u64 << bit) != 0)
                .map(move |bit| word_idx * 64 + bit)
        })
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    struct Slot(u32);

    #[test]
    fn test_arena_ids_are_dense() {
        let mut arena: Arena<Slot> = Arena::new();
        let a = arena.alloc(Slot(7));
        let b = arena.alloc(Slot(9));

        assert_eq!(a.index(), 0);
        assert_eq!(b.index(), 1);
        assert_eq!(arena[b].0, 9);
        assert!(arena.contains(b));
        assert!(!arena.contains(Id::new(2)));

        arena[a].0 = 70;
        assert_eq!(arena[a].0, 70);
        assert_eq!(arena.ids().collect::<Vec<_>>(), vec![a, b]);
    }

    #[test]
    fn test_secondary_map_defaults_to_invalid_id() {
        let mut map: SecondaryMap<Slot, Id<u8>> = SecondaryMap::new();
        let key = Id::<Slot>::new(3);
        assert!(map.get(key).is_none());

        map.set(key, Id::new(42));
        assert_eq!(map[key], Id::new(42));
        assert!(!map[Id::new(1)].is_valid());
    }

    #[test]
    fn test_bit_set_insert_reports_novelty() {
        let mut set = BitSet::with_capacity(10);
        assert!(set.insert(5));
        assert!(!set.insert(5));
        assert!(set.insert(130));
        assert!(set.contains(130));
        assert!(!set.contains(64));
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![5, 130]);

        set.remove(5);
        assert_eq!(set.count(), 1);
        set.clear();
        assert_eq!(set.count(), 0);
    }

    #[test]
    fn test_id_invalid() {
        let id: Id<Slot> = Id::default();
        assert!(!id.is_valid());
        assert_eq!(format!("{:?}", id), "#INVALID");
        assert_eq!(format!("{:?}", Id::<Slot>::new(4)), "#4");
    }
}
