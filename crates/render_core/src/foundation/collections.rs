//! Specialized collection types

use std::fmt;

/// Index of one entry in a [`FrameRing`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FrameSlotId(usize);

impl FrameSlotId {
    /// Position of the slot in its ring
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for FrameSlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "slot {}", self.0)
    }
}

/// Fixed-size ring of per-slot state with an explicit cursor
///
/// The number of entries is chosen at construction and never changes.
/// [`advance`](Self::advance) is the only way the cursor moves, so call
/// sites never do their own modular arithmetic.
pub struct FrameRing<T> {
    slots: Box<[T]>,
    current: usize,
}

impl<T> FrameRing<T> {
    /// Build a ring of `len` entries, constructing each one from its id
    ///
    /// # Panics
    ///
    /// Panics if `len` is zero.
    pub fn try_new<E>(len: usize, mut make: impl FnMut(FrameSlotId) -> Result<T, E>) -> Result<Self, E> {
        assert!(len > 0, "a frame ring needs at least one slot");
        let slots = (0..len).map(|i| make(FrameSlotId(i))).collect::<Result<Vec<_>, E>>()?;
        Ok(Self { slots: slots.into_boxed_slice(), current: 0 })
    }

    /// Build a ring of `len` entries from an infallible constructor
    pub fn new(len: usize, mut make: impl FnMut(FrameSlotId) -> T) -> Self {
        match Self::try_new::<std::convert::Infallible>(len, |id| Ok(make(id))) {
            Ok(ring) => ring,
            Err(never) => match never {},
        }
    }

    /// Number of entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Always false; rings hold at least one entry
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Id of the entry under the cursor
    #[must_use]
    pub const fn current_id(&self) -> FrameSlotId {
        FrameSlotId(self.current)
    }

    /// Entry under the cursor
    #[must_use]
    pub fn current(&self) -> &T {
        &self.slots[self.current]
    }

    /// Mutable entry under the cursor
    pub fn current_mut(&mut self) -> &mut T {
        &mut self.slots[self.current]
    }

    /// Entry by id
    #[must_use]
    pub fn get(&self, id: FrameSlotId) -> &T {
        &self.slots[id.0]
    }

    /// Mutable entry by id
    pub fn get_mut(&mut self, id: FrameSlotId) -> &mut T {
        &mut self.slots[id.0]
    }

    /// Move the cursor to the next entry, wrapping at the end, and return the
    /// new current id
    pub fn advance(&mut self) -> FrameSlotId {
        self.current = (self.current + 1) % self.slots.len();
        self.current_id()
    }

    /// Iterate over every entry with its id
    pub fn iter(&self) -> impl Iterator<Item = (FrameSlotId, &T)> {
        self.slots.iter().enumerate().map(|(i, slot)| (FrameSlotId(i), slot))
    }

    /// Iterate mutably over every entry with its id
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (FrameSlotId, &mut T)> {
        self.slots.iter_mut().enumerate().map(|(i, slot)| (FrameSlotId(i), slot))
    }
}

impl<T: fmt::Debug> fmt::Debug for FrameRing<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameRing").field("current", &self.current).field("slots", &self.slots).finish()
    }
}
