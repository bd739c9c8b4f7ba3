use serde::{Deserialize, Serialize};
use tilexr_common::TileCoord;

use crate::occupant::Occupant;

/// Stable identity of an occupant stored in an [`OccupantArena`].
///
/// The generation guards against a handle outliving its slot: once an
/// occupant is removed, stale handles to the reused slot resolve to `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OccupantHandle {
    index: u32,
    generation: u32,
}

impl OccupantHandle {
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

#[derive(Debug, Clone)]
struct Slot {
    generation: u32,
    entry: Option<Entry>,
}

#[derive(Debug, Clone)]
struct Entry {
    occupant: Occupant,
    anchor: TileCoord,
}

/// Flat table of occupants indexed by handle.
///
/// Tiles hold handles into this table and never own occupants, so there are
/// no references from an occupant back to its tile other than the anchor
/// coordinate.
#[derive(Debug, Clone, Default)]
pub struct OccupantArena {
    slots: Vec<Slot>,
    free: Vec<u32>,
    len: usize,
}

impl OccupantArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Store an occupant anchored at `anchor`, reusing a free slot when one exists.
    pub fn insert(&mut self, anchor: TileCoord, occupant: Occupant) -> OccupantHandle {
        let entry = Some(Entry { occupant, anchor });
        self.len += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.entry = entry;
            return OccupantHandle {
                index,
                generation: slot.generation,
            };
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            entry,
        });
        OccupantHandle {
            index,
            generation: 0,
        }
    }

    pub fn get(&self, handle: OccupantHandle) -> Option<&Occupant> {
        self.entry(handle).map(|e| &e.occupant)
    }

    /// Tile the occupant is anchored on.
    pub fn anchor(&self, handle: OccupantHandle) -> Option<TileCoord> {
        self.entry(handle).map(|e| e.anchor)
    }

    /// Replace the descriptor behind a live handle. Returns the old descriptor.
    pub fn replace(&mut self, handle: OccupantHandle, occupant: Occupant) -> Option<Occupant> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        let entry = slot.entry.as_mut()?;
        Some(std::mem::replace(&mut entry.occupant, occupant))
    }

    /// Remove an occupant, invalidating every outstanding copy of its handle.
    pub fn remove(&mut self, handle: OccupantHandle) -> Option<(TileCoord, Occupant)> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        let entry = slot.entry.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.index);
        self.len -= 1;
        Some((entry.anchor, entry.occupant))
    }

    fn entry(&self, handle: OccupantHandle) -> Option<&Entry> {
        let slot = self.slots.get(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.entry.as_ref()
    }
}
