use std::fmt;

use tilexr_common::{ZONE_COUNT, ZoneCoord};

const WORDS: usize = ZONE_COUNT.div_ceil(64);

/// Set of zones, stored as one bit per zone.
///
/// Copying or clearing the whole set is a fixed-size operation, which keeps
/// the dirty-set handoff O(1) regardless of how many zones changed.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct DirtyZones {
    bits: [u64; WORDS],
}

impl DirtyZones {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every zone of the grid.
    pub fn all() -> Self {
        let mut set = Self::new();
        for zone in ZoneCoord::all() {
            set.insert(zone);
        }
        set
    }

    /// Add a zone. Returns `false` if it was already present or is out of bounds.
    pub fn insert(&mut self, zone: ZoneCoord) -> bool {
        let Some(index) = zone.index() else {
            return false;
        };
        let (word, bit) = (index / 64, 1u64 << (index % 64));
        let fresh = self.bits[word] & bit == 0;
        self.bits[word] |= bit;
        fresh
    }

    pub fn remove(&mut self, zone: ZoneCoord) -> bool {
        let Some(index) = zone.index() else {
            return false;
        };
        let (word, bit) = (index / 64, 1u64 << (index % 64));
        let present = self.bits[word] & bit != 0;
        self.bits[word] &= !bit;
        present
    }

    pub fn contains(&self, zone: ZoneCoord) -> bool {
        zone.index()
            .is_some_and(|i| self.bits[i / 64] & (1u64 << (i % 64)) != 0)
    }

    pub fn len(&self) -> usize {
        self.bits.iter().map(|w| w.count_ones() as usize).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.bits.iter().all(|w| *w == 0)
    }

    pub fn union(&self, other: &DirtyZones) -> DirtyZones {
        let mut bits = self.bits;
        for (a, b) in bits.iter_mut().zip(other.bits.iter()) {
            *a |= *b;
        }
        DirtyZones { bits }
    }

    /// Zones in ascending index order (row-major, `y` then `x`).
    pub fn iter(&self) -> impl Iterator<Item = ZoneCoord> + '_ {
        (0..ZONE_COUNT)
            .filter(|i| self.bits[i / 64] & (1u64 << (i % 64)) != 0)
            .filter_map(ZoneCoord::from_index)
    }
}

impl FromIterator<ZoneCoord> for DirtyZones {
    fn from_iter<I: IntoIterator<Item = ZoneCoord>>(iter: I) -> Self {
        let mut set = DirtyZones::new();
        for zone in iter {
            set.insert(zone);
        }
        set
    }
}

impl fmt::Debug for DirtyZones {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set()
            .entries(self.iter().map(|z| (z.x, z.y)))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_contains_remove() {
        let mut set = DirtyZones::new();
        let z = ZoneCoord::new(12, 12);
        assert!(set.insert(z));
        assert!(!set.insert(z));
        assert!(set.contains(z));
        assert_eq!(set.len(), 1);
        assert!(set.remove(z));
        assert!(set.is_empty());
    }

    #[test]
    fn out_of_bounds_zone_is_ignored() {
        let mut set = DirtyZones::new();
        assert!(!set.insert(ZoneCoord::new(13, 0)));
        assert!(set.is_empty());
        assert!(!set.contains(ZoneCoord::new(13, 0)));
    }

    #[test]
    fn all_contains_every_zone() {
        let set = DirtyZones::all();
        assert_eq!(set.len(), ZONE_COUNT);
        assert_eq!(set.iter().count(), ZONE_COUNT);
    }

    #[test]
    fn iteration_is_ordered_and_union_merges() {
        let a: DirtyZones = [ZoneCoord::new(3, 1), ZoneCoord::new(0, 0)]
            .into_iter()
            .collect();
        let b: DirtyZones = [ZoneCoord::new(1, 0)].into_iter().collect();
        let zones: Vec<_> = a.union(&b).iter().collect();
        assert_eq!(
            zones,
            vec![ZoneCoord::new(0, 0), ZoneCoord::new(1, 0), ZoneCoord::new(3, 1)]
        );
    }
}
