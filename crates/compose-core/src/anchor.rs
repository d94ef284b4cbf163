//! Relocation-aware references into a [`SlotTable`](crate::SlotTable).
//!
//! An [`Anchor`] names a group start. The table keeps every outstanding
//! anchor sorted by location and adjusts it on each structural edit, so a
//! resolved location is never stale. Removing the group an anchor targets
//! invalidates it for good.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

const INVALID: isize = -1;
const MIN_PRUNE_LEN: usize = 32;

/// Shared handle to a group location.
#[derive(Clone)]
pub struct Anchor {
    location: Rc<Cell<isize>>, // FUTURE(no_std): replace Rc with arena-managed anchor handles.
}

impl Anchor {
    fn new(location: usize) -> Self {
        Self {
            location: Rc::new(Cell::new(location as isize)),
        }
    }

    /// Current location of the anchored group, or `None` once it was removed.
    pub fn location(&self) -> Option<usize> {
        let location = self.location.get();
        (location >= 0).then_some(location as usize)
    }

    pub fn is_valid(&self) -> bool {
        self.location.get() != INVALID
    }

    /// Location for an edit through this anchor. Panics when the group is gone.
    pub(crate) fn expect_location(&self) -> usize {
        match self.location() {
            Some(location) => location,
            None => panic!("cannot dereference an invalidated anchor"),
        }
    }

    fn raw(&self) -> isize {
        self.location.get()
    }

    fn set(&self, location: isize) {
        self.location.set(location);
    }

    fn is_shared(&self) -> bool {
        Rc::strong_count(&self.location) > 1
    }
}

impl PartialEq for Anchor {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.location, &other.location)
    }
}

impl Eq for Anchor {}

impl fmt::Debug for Anchor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.location() {
            Some(location) => write!(f, "Anchor({location})"),
            None => f.write_str("Anchor(invalid)"),
        }
    }
}

/// Anchor taken out of the table while its group is relocated.
pub(crate) struct DetachedAnchor {
    offset: usize,
    anchor: Anchor,
}

impl DetachedAnchor {
    pub(crate) fn anchor(&self) -> &Anchor {
        &self.anchor
    }
}

/// Sorted index of live anchors.
///
/// Anchors nobody holds any more are dropped lazily, once the table has
/// doubled since the last sweep, so edits only touch the anchors they move.
pub(crate) struct AnchorTable {
    entries: Vec<Anchor>, // FUTURE(no_std): replace Vec with fixed-capacity sorted storage.
    prune_at: usize,
}

impl AnchorTable {
    pub(crate) fn new() -> Self {
        Self {
            entries: Vec::new(),
            prune_at: MIN_PRUNE_LEN,
        }
    }

    fn search(&self, location: usize) -> Result<usize, usize> {
        self.entries
            .binary_search_by(|entry| entry.raw().cmp(&(location as isize)))
    }

    /// Returns the anchor for `location`, creating it on first request.
    pub(crate) fn anchor(&mut self, location: usize) -> Anchor {
        match self.search(location) {
            Ok(index) => self.entries[index].clone(),
            Err(index) => {
                let anchor = Anchor::new(location);
                self.entries.insert(index, anchor.clone());
                self.prune_if_grown();
                anchor
            }
        }
    }

    pub(crate) fn find(&self, location: usize) -> Option<Anchor> {
        self.search(location)
            .ok()
            .map(|index| self.entries[index].clone())
    }

    /// Moves every anchor at or after `from` by `delta` slots.
    pub(crate) fn shift(&mut self, from: usize, delta: usize) {
        let start = self.first_at_or_after(from);
        for entry in &self.entries[start..] {
            entry.set(entry.raw() + delta as isize);
        }
    }

    /// Invalidates anchors inside `[start, start + len)` and pulls later ones back.
    /// Returns whether any anchor was invalidated.
    pub(crate) fn remove_range(&mut self, start: usize, len: usize) -> bool {
        let first = self.first_at_or_after(start);
        let last = self.first_at_or_after(start + len);
        let removed: Vec<Anchor> = self.entries.drain(first..last).collect();
        for entry in &removed {
            entry.set(INVALID);
        }
        for entry in &self.entries[first..] {
            entry.set(entry.raw() - len as isize);
        }
        removed.iter().any(Anchor::is_shared)
    }

    /// Detaches anchors inside `[start, start + len)` without invalidating them.
    pub(crate) fn take_range(&mut self, start: usize, len: usize) -> Vec<DetachedAnchor> {
        let first = self.first_at_or_after(start);
        let last = self.first_at_or_after(start + len);
        self.entries
            .drain(first..last)
            .map(|anchor| DetachedAnchor {
                offset: anchor.expect_location() - start,
                anchor,
            })
            .collect()
    }

    /// Re-registers detached anchors relative to `base`.
    pub(crate) fn restore(&mut self, detached: &[DetachedAnchor], base: usize) {
        if detached.is_empty() {
            return;
        }
        for entry in detached {
            entry.anchor.set((base + entry.offset) as isize);
        }
        let index = self.first_at_or_after(base);
        self.entries
            .splice(index..index, detached.iter().map(|entry| entry.anchor.clone()));
        self.prune_if_grown();
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &Anchor> {
        self.entries.iter()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    fn first_at_or_after(&self, location: usize) -> usize {
        self.entries
            .partition_point(|entry| entry.raw() < location as isize)
    }

    fn prune_if_grown(&mut self) {
        if self.entries.len() >= self.prune_at {
            self.prune();
        }
    }

    fn prune(&mut self) {
        self.entries.retain(Anchor::is_shared);
        self.prune_at = (self.entries.len() * 2).max(MIN_PRUNE_LEN);
    }
}

impl Default for AnchorTable {
    fn default() -> Self {
        Self::new()
    }
}
