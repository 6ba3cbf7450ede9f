//! Spatial protection index.
//!
//! A set of protected points and axis-aligned rectangles over chunk
//! coordinates, backed by an R*-tree. Bounds are inclusive on both ends.
//!
//! The index is a value: [`ProtectionIndex::add_point`] and
//! [`ProtectionIndex::add_rect`] consume `self` and return the extended
//! index. It is two trees behind [`Arc`]s: a large base and a small overlay
//! that takes new areas. Clones share both. An `add` on a shared value only
//! copies the overlay; the base stays shared. The overlay is folded into the
//! base once it grows past [`OVERLAY_LIMIT`] or a quarter of the base.
//! Once a run starts the index is handed to workers read-only.

use std::fmt;
use std::sync::Arc;

use rstar::{RTree, RTreeObject, AABB};

pub mod ledger;

pub use ledger::{parse_protected_list, read_protected_list};

/// One protected area. A point is a rectangle with `min == max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtectedArea {
    pub min: [i32; 2],
    pub max: [i32; 2],
}

impl ProtectedArea {
    pub fn contains(&self, x: i32, z: i32) -> bool {
        (self.min[0]..=self.max[0]).contains(&x) && (self.min[1]..=self.max[1]).contains(&z)
    }
}

impl RTreeObject for ProtectedArea {
    // f64 keeps the tree's area arithmetic clear of i32 overflow for
    // unbounded ranges.
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_corners(
            [self.min[0] as f64, self.min[1] as f64],
            [self.max[0] as f64, self.max[1] as f64],
        )
    }
}

/// Overlay size at which it is folded into the base tree.
pub const OVERLAY_LIMIT: usize = 64;

#[derive(Clone)]
pub struct ProtectionIndex {
    base:    Arc<RTree<ProtectedArea>>,
    overlay: Arc<RTree<ProtectedArea>>,
}

impl Default for ProtectionIndex {
    fn default() -> Self {
        Self { base: Arc::new(RTree::new()), overlay: Arc::new(RTree::new()) }
    }
}

impl fmt::Debug for ProtectionIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProtectionIndex").field("areas", &self.len()).finish()
    }
}

impl ProtectionIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Protect the single chunk `(x, z)`.
    pub fn add_point(self, x: i32, z: i32) -> Self {
        self.insert(ProtectedArea { min: [x, z], max: [x, z] })
    }

    /// Protect every chunk in the rectangle spanned by the two corners.
    /// Corners may be given in any order.
    pub fn add_rect(self, x1: i32, z1: i32, x2: i32, z2: i32) -> Self {
        self.insert(ProtectedArea {
            min: [x1.min(x2), z1.min(z2)],
            max: [x1.max(x2), z1.max(z2)],
        })
    }

    fn insert(mut self, area: ProtectedArea) -> Self {
        match Arc::get_mut(&mut self.overlay) {
            Some(overlay) => overlay.insert(area),
            None => {
                let areas = self.overlay.iter().copied().chain(std::iter::once(area)).collect();
                self.overlay = Arc::new(RTree::bulk_load(areas));
            }
        }
        if self.overlay.size() >= OVERLAY_LIMIT.max(self.base.size() / 4) {
            self.fold_overlay();
        }
        self
    }

    fn fold_overlay(&mut self) {
        let overlay = std::mem::replace(&mut self.overlay, Arc::new(RTree::new()));
        match Arc::get_mut(&mut self.base) {
            Some(base) => overlay.iter().for_each(|area| base.insert(*area)),
            None => {
                let areas = self.base.iter().chain(overlay.iter()).copied().collect();
                self.base = Arc::new(RTree::bulk_load(areas));
            }
        }
    }

    pub fn contains(&self, x: i32, z: i32) -> bool {
        let probe = AABB::from_point([x as f64, z as f64]);
        [&self.base, &self.overlay].into_iter().any(|tree| {
            tree.locate_in_envelope_intersecting(&probe)
                .any(|area| area.contains(x, z))
        })
    }

    /// Number of registered points and rectangles.
    pub fn len(&self) -> usize {
        self.base.size() + self.overlay.size()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn areas(&self) -> impl Iterator<Item = &ProtectedArea> {
        self.base.iter().chain(self.overlay.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn points_and_rectangles() {
        let index = ProtectionIndex::new()
            .add_point(3, -2)
            .add_rect(10, 10, 0, 5);
        assert!(index.contains(3, -2));
        assert!(!index.contains(3, -3));
        assert!(index.contains(0, 5));
        assert!(index.contains(10, 10));
        assert!(index.contains(4, 7));
        assert!(!index.contains(11, 7));
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn unbounded_ranges() {
        let index = ProtectionIndex::new().add_rect(i32::MIN, 0, i32::MAX, 0);
        assert!(index.contains(i32::MIN, 0));
        assert!(index.contains(i32::MAX, 0));
        assert!(!index.contains(0, 1));
    }

    #[test]
    fn earlier_values_are_unaffected_by_later_adds() {
        let base = ProtectionIndex::new().add_point(1, 1);
        let extended = base.clone().add_point(2, 2);
        assert!(base.contains(1, 1));
        assert!(!base.contains(2, 2));
        assert!(extended.contains(1, 1));
        assert!(extended.contains(2, 2));
        assert_eq!(base.len(), 1);
        assert_eq!(extended.len(), 2);
    }

    #[test]
    fn add_on_shared_value_keeps_base_shared() {
        let base = (0..200).fold(ProtectionIndex::new(), |index, i| index.add_point(i, 0));
        assert!(base.base.size() > base.overlay.size());
        let extended = base.clone().add_rect(-5, -5, -1, -1);
        assert!(Arc::ptr_eq(&base.base, &extended.base));
        assert!(!base.contains(-3, -3));
        assert!(extended.contains(-3, -3));
        assert!(extended.contains(199, 0));
        assert_eq!(extended.len(), 201);
        assert_eq!(extended.areas().count(), 201);
    }

    proptest! {
        #[test]
        fn agrees_with_linear_scan(
            rects in proptest::collection::vec((-50i32..50, -50i32..50, -50i32..50, -50i32..50), 0..40),
            probes in proptest::collection::vec((-60i32..60, -60i32..60), 1..60),
        ) {
            let mut index = ProtectionIndex::new();
            let mut areas = Vec::new();
            for &(x1, z1, x2, z2) in &rects {
                index = index.add_rect(x1, z1, x2, z2);
                areas.push(ProtectedArea {
                    min: [x1.min(x2), z1.min(z2)],
                    max: [x1.max(x2), z1.max(z2)],
                });
            }
            for (x, z) in probes {
                let expected = areas.iter().any(|a| a.contains(x, z));
                prop_assert_eq!(index.contains(x, z), expected);
            }
        }
    }
}
