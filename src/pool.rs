//! Fixed-capacity object pool with generation-checked identities
//!
//! The pool hands out 1-based slot indices that double as wire TEIDs, so a
//! single allocator produces both the storage handle and the outbound
//! protocol field. Index 0 is reserved as "no identity". Every `free` bumps
//! the slot's generation, so a stale handle retained across a free can never
//! resolve to a newly allocated, unrelated entity.

use thiserror::Error;

/// Pool error type
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    /// No free slot left; capacity is fixed at construction
    #[error("Pool exhausted: capacity [{0}] reached")]
    Exhausted(usize),

    /// Index 0 or beyond capacity
    #[error("Invalid pool index [0x{0:x}]")]
    InvalidIndex(u32),
}

/// Pool identity: a 1-based slot index paired with the slot's generation
/// at allocation time.
///
/// The index alone is what goes on the wire as a TEID; the generation is
/// local bookkeeping that invalidates the handle once the slot is freed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PoolId {
    index: u32,
    generation: u32,
}

impl PoolId {
    /// 1-based slot index
    pub fn index(&self) -> u32 {
        self.index
    }

    /// The identity as it appears in the wire protocol (equals the index)
    pub fn teid(&self) -> u32 {
        self.index
    }

    /// Generation of the slot when this identity was allocated
    pub fn generation(&self) -> u32 {
        self.generation
    }
}

struct Slot<T> {
    generation: u32,
    entry: Option<T>,
}

/// Fixed-capacity slot allocator
pub struct Pool<T> {
    slots: Vec<Slot<T>>,
    /// LIFO free-list of 1-based indices
    free: Vec<u32>,
}

impl<T> Pool<T> {
    /// Create a pool with a fixed capacity of `capacity` slots
    pub fn new(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        for _ in 0..capacity {
            slots.push(Slot {
                generation: 0,
                entry: None,
            });
        }
        // Reversed so the first alloc hands out index 1.
        let free: Vec<u32> = (1..=capacity as u32).rev().collect();
        Self { slots, free }
    }

    /// Return a freshly allocated identity whose slot holds `T::default()`.
    ///
    /// Fails with `PoolError::Exhausted` when all slots are live; this is a
    /// reported error for the caller to act on, never a panic.
    pub fn alloc(&mut self) -> Result<PoolId, PoolError>
    where
        T: Default,
    {
        let index = self
            .free
            .pop()
            .ok_or(PoolError::Exhausted(self.slots.len()))?;
        let slot = &mut self.slots[(index - 1) as usize];
        slot.entry = Some(T::default());
        Ok(PoolId {
            index,
            generation: slot.generation,
        })
    }

    /// Release a slot back to the free list, returning its contents.
    ///
    /// A stale or already-freed identity is a safe no-op returning `None`,
    /// so a double free cannot corrupt the free list.
    pub fn free(&mut self, id: PoolId) -> Option<T> {
        let slot = self.slots.get_mut(id.index.checked_sub(1)? as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        let entry = slot.entry.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        Some(entry)
    }

    /// Generation-checked lookup; a stale identity yields `None`
    pub fn find(&self, id: PoolId) -> Option<&T> {
        let slot = self.slots.get(id.index.checked_sub(1)? as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.entry.as_ref()
    }

    /// Generation-checked mutable lookup
    pub fn find_mut(&mut self, id: PoolId) -> Option<&mut T> {
        let slot = self.slots.get_mut(id.index.checked_sub(1)? as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.entry.as_mut()
    }

    fn check_index(&self, index: u32) -> Result<(), PoolError> {
        if index == 0 || index as usize > self.slots.len() {
            return Err(PoolError::InvalidIndex(index));
        }
        Ok(())
    }

    /// Wire-TEID lookup: index 0 and out-of-range indices are rejected,
    /// an in-range but unallocated index is "not found".
    pub fn find_by_index(&self, index: u32) -> Result<Option<&T>, PoolError> {
        self.check_index(index)?;
        Ok(self.slots[(index - 1) as usize].entry.as_ref())
    }

    /// Mutable wire-TEID lookup
    pub fn find_by_index_mut(&mut self, index: u32) -> Result<Option<&mut T>, PoolError> {
        self.check_index(index)?;
        Ok(self.slots[(index - 1) as usize].entry.as_mut())
    }

    /// Recover the full identity of a currently live index
    pub fn id_of_index(&self, index: u32) -> Result<Option<PoolId>, PoolError> {
        self.check_index(index)?;
        let slot = &self.slots[(index - 1) as usize];
        Ok(slot.entry.as_ref().map(|_| PoolId {
            index,
            generation: slot.generation,
        }))
    }

    /// Fixed capacity
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of live slots
    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    /// True when no slot is live
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of free slots
    pub fn available(&self) -> usize {
        self.free.len()
    }
}

// ============================================================================
// Tests
// ============================================================================
