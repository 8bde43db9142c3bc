//! Generational slab for connection pairs.
//!
//! Slots are recycled through a free list. Every removal bumps the slot's
//! generation, so a `PairId` handed out before the removal no longer
//! resolves, even after the slot has been reused.

/// Handle to a live pair: slot index plus the generation it was issued at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PairId {
    index: u32,
    generation: u16,
}

impl PairId {
    pub(crate) fn from_parts(index: u32, generation: u16) -> Self {
        Self { index, generation }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn generation(&self) -> u16 {
        self.generation
    }
}

impl std::fmt::Display for PairId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}

#[derive(Debug)]
struct Slot<T> {
    generation: u16,
    value: Option<T>,
}

#[derive(Debug)]
pub struct Arena<T> {
    slots: Vec<Slot<T>>,
    free: Vec<usize>,
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Arena<T> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
        }
    }

    pub fn insert(&mut self, value: T) -> PairId {
        if let Some(idx) = self.free.pop() {
            let slot = &mut self.slots[idx];
            slot.value = Some(value);
            return PairId::from_parts(idx as u32, slot.generation);
        }
        let idx = self.slots.len();
        self.slots.push(Slot {
            generation: 0,
            value: Some(value),
        });
        PairId::from_parts(idx as u32, 0)
    }

    fn slot(&self, id: PairId) -> Option<&Slot<T>> {
        self.slots
            .get(id.index as usize)
            .filter(|s| s.generation == id.generation)
    }

    pub fn get(&self, id: PairId) -> Option<&T> {
        self.slot(id)?.value.as_ref()
    }

    pub fn get_mut(&mut self, id: PairId) -> Option<&mut T> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|s| s.generation == id.generation)?
            .value
            .as_mut()
    }

    /// Take the value out. A stale or already-removed id yields `None`.
    pub fn remove(&mut self, id: PairId) -> Option<T> {
        let idx = id.index as usize;
        let slot = self
            .slots
            .get_mut(idx)
            .filter(|s| s.generation == id.generation)?;
        let value = slot.value.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(idx);
        Some(value)
    }

    /// Ids of every live entry, in slot order.
    pub fn ids(&self) -> Vec<PairId> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.value.is_some())
            .map(|(i, s)| PairId::from_parts(i as u32, s.generation))
            .collect()
    }
}
