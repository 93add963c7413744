//! Generational arena holding a root's units
//!
//! Parent/child links are [`UnitId`] handles rather than references. A handle
//! to a removed unit stays invalid even after its slot is reused.

use std::fmt;

/// Generational handle into an [`Arena`]
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UnitId {
    index: u32,
    generation: u32,
}

impl fmt::Debug for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UnitId({}v{})", self.index, self.generation)
    }
}

struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// Slot storage with generation-checked handles
pub struct Arena<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    len: usize,
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Arena<T> {
    /// Create an empty arena
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            len: 0,
        }
    }

    /// Store a value and return its handle
    pub fn insert(&mut self, value: T) -> UnitId {
        self.len += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.value = Some(value);
            return UnitId {
                index,
                generation: slot.generation,
            };
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            value: Some(value),
        });
        UnitId {
            index,
            generation: 0,
        }
    }

    /// Remove a value; stale handles return `None`
    pub fn remove(&mut self, id: UnitId) -> Option<T> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        let value = slot.value.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        self.len -= 1;
        Some(value)
    }

    /// Borrow a value
    pub fn get(&self, id: UnitId) -> Option<&T> {
        let slot = self.slots.get(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.value.as_ref()
    }

    /// Mutably borrow a value
    pub fn get_mut(&mut self, id: UnitId) -> Option<&mut T> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.value.as_mut()
    }

    /// Whether the handle is live
    pub fn contains(&self, id: UnitId) -> bool {
        self.get(id).is_some()
    }

    /// Number of live values
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the arena is empty
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}
