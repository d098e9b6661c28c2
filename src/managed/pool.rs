use super::Slice;

/// A fixed-capacity pool of slots addressed by generational keys.
///
/// The pool provides a `Vec`-like interface where each live entry is
/// associated with a stable index-like key. A key is invalidated when its
/// entry is released; looking it up afterwards returns `None` even if the
/// slot has since been reused for another entry.
pub struct Pool<'a, T> {
    slots: Slice<'a, Slot<T>>,
}

/// One slot of a [`Pool`].
///
/// Separate from the pool so that callers on allocation-free targets can
/// provide the backing storage themselves.
///
/// [`Pool`]: struct.Pool.html
pub struct Slot<T> {
    /// Incremented on each release, so that stale keys miss.
    generation: u32,
    entry: Option<T>,
}

/// An index into a pool.
///
/// Remains valid until the entry it was created for is released.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Key {
    idx: usize,
    generation: u32,
}

impl<'a, T> Pool<'a, T> {
    pub fn new(slots: Slice<'a, Slot<T>>) -> Self {
        Pool { slots }
    }

    /// Construct a pool owning its storage.
    #[cfg(feature = "std")]
    pub fn with_capacity(capacity: usize) -> Self {
        let slots = (0..capacity)
            .map(|_| Slot::default())
            .collect::<Vec<_>>();
        Pool::new(Slice::Owned(slots))
    }

    /// The fixed number of slots, free or not.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// The number of live entries.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.entry.is_some()).count()
    }

    /// Store a value in a free slot.
    ///
    /// Returns `None` when every slot is occupied. This is a resource limit,
    /// not a transient condition.
    pub fn insert(&mut self, value: T) -> Option<Key> {
        let (idx, slot) = self.slots.iter_mut()
            .enumerate()
            .find(|(_, slot)| slot.entry.is_none())?;
        slot.entry = Some(value);
        Some(Key { idx, generation: slot.generation })
    }

    /// Retrieve an entry by key.
    pub fn get(&self, key: Key) -> Option<&T> {
        let slot = self.slots.get(key.idx)?;
        if slot.generation != key.generation {
            return None;
        }
        slot.entry.as_ref()
    }

    /// Retrieve an entry mutably by key.
    pub fn get_mut(&mut self, key: Key) -> Option<&mut T> {
        let slot = self.slots.get_mut(key.idx)?;
        if slot.generation != key.generation {
            return None;
        }
        slot.entry.as_mut()
    }

    /// Remove an entry, invalidating its key.
    ///
    /// Returns the removed value so the caller can run its teardown. Returns
    /// `None` if the key did not refer to a live entry.
    pub fn release(&mut self, key: Key) -> Option<T> {
        let slot = self.slots.get_mut(key.idx)?;
        if slot.generation != key.generation || slot.entry.is_none() {
            return None;
        }
        slot.generation = slot.generation.wrapping_add(1);
        slot.entry.take()
    }

    /// The key of the live entry in slot `idx`, if any.
    ///
    /// Allows index-based walks over the pool without holding a borrow.
    pub fn key_at(&self, idx: usize) -> Option<Key> {
        let slot = self.slots.get(idx)?;
        slot.entry.as_ref()?;
        Some(Key { idx, generation: slot.generation })
    }

    /// Iterate over all live entries.
    pub fn iter(&self) -> impl Iterator<Item=(Key, &T)> + '_ {
        self.slots.iter()
            .enumerate()
            .filter_map(|(idx, slot)| {
                let entry = slot.entry.as_ref()?;
                Some((Key { idx, generation: slot.generation }, entry))
            })
    }
}

impl<T> Default for Slot<T> {
    fn default() -> Self {
        Slot {
            generation: 0,
            entry: None,
        }
    }
}
