//! Per-instance node memory.
//!
//! Every subtree instance owns an [`InstanceMemory`] arena. The slot layout is
//! fixed when the tree is built: each node may own one engine-managed slot
//! (composite child bookkeeping, aux tick timers) and one slot for its own
//! state. Nodes reach their state through typed [`MemoryHandle`]s.

use std::any::Any;
use std::fmt;
use std::marker::PhantomData;

use crate::index::ChildSlot;

/// State a node keeps per agent and per subtree instance.
///
/// Implemented for every `Clone + Debug + 'static` type; the arena needs to
/// clone blocks when it snapshots memory for rollback and persistence.
pub trait MemoryBlock: Any + fmt::Debug {
    fn clone_block(&self) -> Box<dyn MemoryBlock>;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any + Clone + fmt::Debug> MemoryBlock for T {
    fn clone_block(&self) -> Box<dyn MemoryBlock> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Typed handle to one slot of an [`InstanceMemory`] arena.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct MemoryHandle<T: 'static> {
    slot: u32,
    _marker: PhantomData<fn() -> T>,
}

impl<T: 'static> Copy for MemoryHandle<T> {}

impl<T: 'static> Clone for MemoryHandle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: 'static> MemoryHandle<T> {
    pub(crate) const fn new(slot: u32) -> Self {
        Self {
            slot,
            _marker: PhantomData,
        }
    }

    pub fn slot(self) -> u32 {
        self.slot
    }
}

#[derive(Debug, Default)]
pub struct InstanceMemory {
    slots: Vec<Box<dyn MemoryBlock>>,
}

impl Clone for InstanceMemory {
    fn clone(&self) -> Self {
        Self {
            slots: self.slots.iter().map(|block| (**block).clone_block()).collect(),
        }
    }
}

impl InstanceMemory {
    pub(crate) fn push(&mut self, block: Box<dyn MemoryBlock>) -> u32 {
        self.slots.push(block);
        (self.slots.len() - 1) as u32
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// `None` when the slot holds another type.
    pub fn get<T: 'static>(&self, handle: MemoryHandle<T>) -> Option<&T> {
        self.block(handle.slot)?.as_any().downcast_ref::<T>()
    }

    pub fn get_mut<T: 'static>(&mut self, handle: MemoryHandle<T>) -> Option<&mut T> {
        debug_assert!(
            (handle.slot as usize) < self.slots.len(),
            "memory slot {} out of bounds ({} slots)",
            handle.slot,
            self.slots.len()
        );
        let block: &mut dyn MemoryBlock = &mut **self.slots.get_mut(handle.slot as usize)?;
        block.as_any_mut().downcast_mut::<T>()
    }

    pub(crate) fn block(&self, slot: u32) -> Option<&dyn MemoryBlock> {
        debug_assert!(
            (slot as usize) < self.slots.len(),
            "memory slot {} out of bounds ({} slots)",
            slot,
            self.slots.len()
        );
        self.slots.get(slot as usize).map(|block| &**block)
    }

    /// Overwrites one slot with a copy of the same slot in `source`.
    pub(crate) fn copy_slot_from(&mut self, source: &InstanceMemory, slot: u32) {
        let Some(block) = source.block(slot) else {
            return;
        };
        if let Some(target) = self.slots.get_mut(slot as usize) {
            *target = block.clone_block();
        }
    }
}

/// Engine-owned bookkeeping of a composite.
#[derive(Debug, Clone, Default)]
pub(crate) struct CompositeMemory {
    pub current_child: ChildSlot,
    pub override_child: ChildSlot,
}

/// Engine-owned tick timer of a decorator or service.
#[derive(Debug, Clone, Default)]
pub(crate) struct AuxMemory {
    pub next_tick_remaining: f32,
    pub accumulated_dt: f32,
}
