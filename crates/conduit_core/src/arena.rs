//! Generational arena allocation for Conduit.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

/// A typed handle into an [`Arena`].
///
/// Handles remember the arena generation they were allocated in, so a handle
/// kept across [`Arena::reset`] no longer resolves.
pub struct Id<T> {
    index: u32,
    generation: u32,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Id<T> {
    #[inline]
    const fn new(index: u32, generation: u32) -> Self {
        Self {
            index,
            generation,
            _marker: PhantomData,
        }
    }

    /// Returns the slot index of this handle.
    #[must_use]
    #[inline]
    pub const fn index(self) -> usize {
        self.index as usize
    }

    /// Returns the arena generation this handle belongs to.
    #[must_use]
    #[inline]
    pub const fn generation(self) -> u32 {
        self.generation
    }
}

impl<T> Clone for Id<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Id<T> {}

impl<T> PartialEq for Id<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index && self.generation == other.generation
    }
}

impl<T> Eq for Id<T> {}

impl<T> Hash for Id<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.index.hash(state);
        self.generation.hash(state);
    }
}

impl<T> fmt::Debug for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Id({}@{})", self.index, self.generation)
    }
}

/// An arena that hands out generation-checked [`Id`]s.
///
/// Slots are never freed individually; the whole arena is reset at once,
/// which keeps the backing storage around for reuse.
#[derive(Debug)]
pub struct Arena<T> {
    items: Vec<T>,
    generation: u32,
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Arena<T> {
    /// Creates a new arena.
    #[must_use]
    pub fn new() -> Self {
        Self {
            items: Vec::new(),
            generation: 0,
        }
    }

    /// Creates a new arena with pre-allocated capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            items: Vec::with_capacity(capacity),
            generation: 0,
        }
    }

    /// Allocates a value in the arena.
    #[allow(clippy::cast_possible_truncation)]
    pub fn alloc(&mut self, value: T) -> Id<T> {
        let index = self.items.len() as u32;
        self.items.push(value);
        Id::new(index, self.generation)
    }

    /// Returns true if the handle belongs to the current generation.
    #[must_use]
    #[inline]
    pub fn contains(&self, id: Id<T>) -> bool {
        id.generation == self.generation && id.index() < self.items.len()
    }

    /// Gets a value by handle.
    #[must_use]
    pub fn get(&self, id: Id<T>) -> Option<&T> {
        if self.contains(id) {
            self.items.get(id.index())
        } else {
            None
        }
    }

    /// Gets a mutable value by handle.
    pub fn get_mut(&mut self, id: Id<T>) -> Option<&mut T> {
        if self.contains(id) {
            self.items.get_mut(id.index())
        } else {
            None
        }
    }

    /// Returns the number of live values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns true if nothing was allocated since the last reset.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Returns the current generation.
    #[must_use]
    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Drops all values and invalidates every handle handed out so far.
    pub fn reset(&mut self) {
        self.items.clear();
        self.generation = self.generation.wrapping_add(1);
    }

    /// Iterates over all live values with their handles.
    #[allow(clippy::cast_possible_truncation)]
    pub fn iter(&self) -> impl Iterator<Item = (Id<T>, &T)> {
        let generation = self.generation;
        self.items
            .iter()
            .enumerate()
            .map(move |(index, item)| (Id::new(index as u32, generation), item))
    }
}
