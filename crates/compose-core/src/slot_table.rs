//! Gap-buffered group store.
//!
//! The table is a flat sequence of slots. A group is an inline header slot
//! followed by `size` content slots, so the tree of groups is implied by span
//! lengths alone. Insertions and removals happen at a moving cursor; the gap
//! follows the cursor so repeated edits at one place stay cheap.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::mem;
use std::rc::Rc;

use crate::anchor::{Anchor, AnchorTable, DetachedAnchor};
use crate::lifecycle::LifecycleObserver;
use crate::reader::SlotReader;
use crate::writer::SlotWriter;
use crate::Key;

const MIN_GROWTH: usize = 128;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct GroupHeader {
    pub(crate) key: Key,
    pub(crate) data_key: Option<Key>,
    pub(crate) is_node: bool,
    /// Slots after the header that belong to this group.
    pub(crate) size: usize,
    /// Sum of the node contributions of the direct children.
    pub(crate) nodes: usize,
}

impl GroupHeader {
    pub(crate) fn new(key: Key, data_key: Option<Key>, is_node: bool) -> Self {
        Self {
            key,
            data_key,
            is_node,
            size: 0,
            nodes: 0,
        }
    }

    /// Nodes this group adds to its parent.
    pub(crate) fn contribution(&self) -> usize {
        if self.is_node {
            1
        } else {
            self.nodes
        }
    }

    pub(crate) fn span(&self) -> usize {
        1 + self.size
    }

    pub(crate) fn matches(&self, key: Key, data_key: Option<Key>) -> bool {
        self.key == key && self.data_key == data_key
    }
}

pub(crate) struct SlotValue {
    pub(crate) value: Box<dyn Any>,
    pub(crate) observer: Option<Rc<dyn LifecycleObserver>>,
}

impl SlotValue {
    pub(crate) fn plain(value: Box<dyn Any>) -> Self {
        Self {
            value,
            observer: None,
        }
    }
}

#[derive(Default)]
pub(crate) enum Slot {
    #[default]
    Empty,
    Group(GroupHeader),
    Value(SlotValue),
}

impl Slot {
    fn view(&self) -> SlotRef<'_> {
        match self {
            Slot::Empty => SlotRef::Empty,
            Slot::Group(header) => SlotRef::Group {
                key: header.key,
                data_key: header.data_key,
                is_node: header.is_node,
                size: header.size,
                nodes: header.nodes,
            },
            Slot::Value(value) => SlotRef::Value(value.value.as_ref()),
        }
    }

    fn observer(&self) -> Option<&Rc<dyn LifecycleObserver>> {
        match self {
            Slot::Value(SlotValue {
                observer: Some(observer),
                ..
            }) => Some(observer),
            _ => None,
        }
    }
}

/// Borrowed view of one slot.
#[derive(Clone, Copy)]
pub enum SlotRef<'a> {
    Empty,
    Group {
        key: Key,
        data_key: Option<Key>,
        is_node: bool,
        size: usize,
        nodes: usize,
    },
    Value(&'a dyn Any),
}

impl<'a> SlotRef<'a> {
    pub fn downcast_ref<T: 'static>(&self) -> Option<&'a T> {
        match *self {
            SlotRef::Value(value) => value.downcast_ref::<T>(),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, SlotRef::Empty)
    }

    pub fn is_group(&self) -> bool {
        matches!(self, SlotRef::Group { .. })
    }
}

impl fmt::Debug for SlotRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SlotRef::Empty => f.write_str("Empty"),
            SlotRef::Group {
                key,
                data_key,
                is_node,
                size,
                nodes,
            } => f
                .debug_struct("Group")
                .field("key", key)
                .field("data_key", data_key)
                .field("is_node", is_node)
                .field("size", size)
                .field("nodes", nodes)
                .finish(),
            SlotRef::Value(_) => f.write_str("Value(..)"),
        }
    }
}

/// Lookahead entry describing one sibling group.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KeyInfo {
    pub key: Key,
    pub data_key: Option<Key>,
    pub is_node: bool,
    /// Location of the group header.
    pub location: usize,
    /// Nodes the group contributes to its parent.
    pub nodes: usize,
    /// Ordinal among the scanned siblings.
    pub index: usize,
}

/// Summary of a removed range.
#[derive(Default)]
pub struct Removed {
    /// Nodes the removed groups contributed to their parent.
    pub nodes: usize,
    /// Whether an anchor that was still referenced got invalidated.
    pub invalidated_anchors: bool,
    /// Lifecycle observers held by the removed slots, in slot order.
    pub observers: Vec<Rc<dyn LifecycleObserver>>,
}

/// Group lifted out of one table for insertion into another.
pub(crate) struct DetachedGroup {
    pub(crate) slots: Vec<Slot>,
    pub(crate) anchors: Vec<DetachedAnchor>,
    pub(crate) nodes: usize,
}

pub(crate) struct SlotStorage {
    slots: Vec<Slot>, // FUTURE(no_std): replace Vec with a fixed arena.
    gap_start: usize,
    gap_len: usize,
    pub(crate) anchors: AnchorTable,
}

impl SlotStorage {
    fn with_capacity(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, Slot::default);
        Self {
            slots,
            gap_start: 0,
            gap_len: capacity,
            anchors: AnchorTable::new(),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len() - self.gap_len
    }

    fn physical(&self, index: usize) -> usize {
        if index < self.gap_start {
            index
        } else {
            index + self.gap_len
        }
    }

    pub(crate) fn slot(&self, index: usize) -> &Slot {
        assert!(index < self.len(), "slot {index} out of bounds");
        &self.slots[self.physical(index)]
    }

    pub(crate) fn view(&self, index: usize) -> SlotRef<'_> {
        self.slot(index).view()
    }

    pub(crate) fn replace(&mut self, index: usize, slot: Slot) -> Slot {
        assert!(index < self.len(), "slot {index} out of bounds");
        let physical = self.physical(index);
        mem::replace(&mut self.slots[physical], slot)
    }

    pub(crate) fn header(&self, index: usize) -> &GroupHeader {
        match self.slot(index) {
            Slot::Group(header) => header,
            _ => panic!("expected a group start at {index}"),
        }
    }

    pub(crate) fn header_mut(&mut self, index: usize) -> &mut GroupHeader {
        assert!(index < self.len(), "slot {index} out of bounds");
        let physical = self.physical(index);
        match &mut self.slots[physical] {
            Slot::Group(header) => header,
            _ => panic!("expected a group start at {index}"),
        }
    }

    pub(crate) fn is_group(&self, index: usize) -> bool {
        index < self.len() && matches!(self.slot(index), Slot::Group(_))
    }

    pub(crate) fn group_end(&self, index: usize) -> usize {
        index + self.header(index).span()
    }

    fn move_gap_to(&mut self, index: usize) {
        if self.gap_len == 0 {
            self.gap_start = index;
            return;
        }
        if index < self.gap_start {
            for i in (index..self.gap_start).rev() {
                self.slots.swap(i, i + self.gap_len);
            }
        } else {
            for i in self.gap_start..index {
                self.slots.swap(i + self.gap_len, i);
            }
        }
        self.gap_start = index;
    }

    fn ensure_gap(&mut self, needed: usize) {
        if self.gap_len >= needed {
            return;
        }
        let capacity = self.slots.len();
        let new_capacity = (capacity * 2).max(capacity + needed).max(MIN_GROWTH);
        let extra = new_capacity - capacity;
        let at = self.gap_start + self.gap_len;
        self.slots
            .splice(at..at, std::iter::repeat_with(Slot::default).take(extra));
        self.gap_len += extra;
    }

    fn open_slots(&mut self, at: usize, count: usize) {
        assert!(at <= self.len(), "insert location {at} out of bounds");
        self.move_gap_to(at);
        self.ensure_gap(count);
        self.gap_start += count;
        self.gap_len -= count;
    }

    fn close_slots(&mut self, at: usize, count: usize) -> Vec<Slot> {
        assert!(at + count <= self.len(), "remove range out of bounds");
        self.move_gap_to(at);
        let start = at + self.gap_len;
        let removed = self.slots[start..start + count]
            .iter_mut()
            .map(mem::take)
            .collect();
        self.gap_len += count;
        removed
    }

    /// Opens `count` empty slots at `at`, shifting anchors behind it.
    pub(crate) fn insert_empty(&mut self, at: usize, count: usize) {
        self.open_slots(at, count);
        self.anchors.shift(at, count);
    }

    pub(crate) fn insert_slots(&mut self, at: usize, slots: Vec<Slot>) {
        let count = slots.len();
        self.insert_empty(at, count);
        for (offset, slot) in slots.into_iter().enumerate() {
            let physical = self.physical(at + offset);
            self.slots[physical] = slot;
        }
    }

    /// Removes `[at, at + count)`, invalidating anchors inside the range.
    pub(crate) fn remove_slots(&mut self, at: usize, count: usize) -> (Vec<Slot>, bool) {
        let removed = self.close_slots(at, count);
        let invalidated = self.anchors.remove_range(at, count);
        (removed, invalidated)
    }

    /// Moves `[from, from + count)` so that it starts at `to`, keeping anchors.
    pub(crate) fn relocate(&mut self, from: usize, count: usize, to: usize) {
        assert!(to <= from, "groups only move towards the cursor");
        if to == from {
            return;
        }
        let detached = self.anchors.take_range(from, count);
        let slots = self.close_slots(from, count);
        self.anchors.remove_range(from, count);
        self.insert_slots(to, slots);
        self.anchors.restore(&detached, to);
    }

    /// Applies a size and node delta to a chain of enclosing groups, innermost last.
    pub(crate) fn adjust_ancestors(
        &mut self,
        ancestors: &[usize],
        slot_delta: isize,
        node_delta: isize,
    ) {
        let mut propagate_nodes = node_delta != 0;
        for &parent in ancestors.iter().rev() {
            let header = self.header_mut(parent);
            header.size = (header.size as isize + slot_delta) as usize;
            if propagate_nodes {
                header.nodes = (header.nodes as isize + node_delta) as usize;
                propagate_nodes = !header.is_node;
            }
        }
    }

    /// Walks the groups in `[start, end)`, returning their node contribution.
    pub(crate) fn range_contribution(&self, start: usize, end: usize) -> usize {
        let mut nodes = 0;
        let mut location = start;
        while location < end {
            match self.slot(location) {
                Slot::Group(header) => {
                    nodes += header.contribution();
                    location += header.span();
                }
                _ => location += 1,
            }
        }
        assert!(location == end, "range [{start}, {end}) splits a group");
        nodes
    }

    pub(crate) fn observers_in(&self, start: usize, end: usize) -> Vec<Rc<dyn LifecycleObserver>> {
        (start..end)
            .filter_map(|index| self.slot(index).observer().cloned())
            .collect()
    }

    pub(crate) fn sibling_keys(&self, start: usize, end: usize) -> Vec<KeyInfo> {
        let mut keys = Vec::new();
        let mut location = start;
        while location < end {
            match self.slot(location) {
                Slot::Group(header) => {
                    keys.push(KeyInfo {
                        key: header.key,
                        data_key: header.data_key,
                        is_node: header.is_node,
                        location,
                        nodes: header.contribution(),
                        index: keys.len(),
                    });
                    location += header.span();
                }
                _ => location += 1,
            }
        }
        keys
    }

    pub(crate) fn group_path_to(&self, location: usize) -> Vec<usize> {
        let mut path = Vec::new();
        let mut current = 0;
        let mut end = self.len();
        while current < end && current <= location {
            match self.slot(current) {
                Slot::Group(header) => {
                    let group_end = current + header.span();
                    if location < group_end {
                        path.push(current);
                        if current == location {
                            break;
                        }
                        end = group_end;
                        current += 1;
                    } else {
                        current = group_end;
                    }
                }
                _ => current += 1,
            }
        }
        path
    }

    /// Lifts the group at `location` out, fixing up its former ancestors.
    pub(crate) fn detach_group(&mut self, location: usize) -> DetachedGroup {
        let path = self.group_path_to(location);
        assert!(
            path.last() == Some(&location),
            "no group starts at {location}"
        );
        let header = *self.header(location);
        let span = header.span();
        let nodes = header.contribution();
        let anchors = self.anchors.take_range(location, span);
        let slots = self.close_slots(location, span);
        self.anchors.remove_range(location, span);
        self.adjust_ancestors(
            &path[..path.len() - 1],
            -(span as isize),
            -(nodes as isize),
        );
        DetachedGroup {
            slots,
            anchors,
            nodes,
        }
    }

    fn verify(&self) {
        for physical in self.gap_start..self.gap_start + self.gap_len {
            assert!(
                matches!(self.slots[physical], Slot::Empty),
                "gap slot {physical} holds data"
            );
        }
        self.verify_range(0, self.len());

        let mut previous: Option<usize> = None;
        for anchor in self.anchors.iter() {
            let location = match anchor.location() {
                Some(location) => location,
                None => panic!("invalid anchor still registered"),
            };
            assert!(location < self.len(), "anchor {location} out of bounds");
            if let Some(previous) = previous {
                assert!(previous < location, "anchors out of order at {location}");
            }
            assert!(
                self.is_group(location),
                "anchor {location} does not point at a group"
            );
            previous = Some(location);
        }
    }

    fn verify_range(&self, start: usize, end: usize) -> usize {
        let mut nodes = 0;
        let mut location = start;
        while location < end {
            match self.slot(location) {
                Slot::Group(header) => {
                    let group_end = location + header.span();
                    assert!(
                        group_end <= end,
                        "group at {location} overruns its parent ({group_end} > {end})"
                    );
                    if header.is_node {
                        assert!(
                            header.size >= 1
                                && matches!(self.slot(location + 1), Slot::Value(_)),
                            "node group at {location} is missing its node"
                        );
                    }
                    let counted = self.verify_range(location + 1, group_end);
                    assert_eq!(
                        header.nodes, counted,
                        "group at {location} records {} nodes but holds {counted}",
                        header.nodes
                    );
                    nodes += header.contribution();
                    location = group_end;
                }
                _ => location += 1,
            }
        }
        nodes
    }

    fn dump(
        &self,
        f: &mut fmt::Formatter<'_>,
        start: usize,
        end: usize,
        depth: usize,
    ) -> fmt::Result {
        let mut location = start;
        while location < end {
            let indent = "  ".repeat(depth);
            match self.slot(location) {
                Slot::Group(header) => {
                    writeln!(
                        f,
                        "{indent}{location}: {}(key={:#x}, data={:?}, size={}, nodes={})",
                        if header.is_node { "Node" } else { "Group" },
                        header.key,
                        header.data_key,
                        header.size,
                        header.nodes
                    )?;
                    let group_end = location + header.span();
                    self.dump(f, location + 1, group_end, depth + 1)?;
                    location = group_end;
                }
                Slot::Value(_) => {
                    writeln!(f, "{indent}{location}: value")?;
                    location += 1;
                }
                Slot::Empty => {
                    writeln!(f, "{indent}{location}: empty")?;
                    location += 1;
                }
            }
        }
        Ok(())
    }
}

/// The persistent record of a composition.
pub struct SlotTable {
    storage: RefCell<SlotStorage>,
    readers: Cell<usize>,
    writer: Cell<bool>,
}

impl SlotTable {
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            storage: RefCell::new(SlotStorage::with_capacity(capacity)),
            readers: Cell::new(0),
            writer: Cell::new(false),
        }
    }

    /// Number of occupied slots.
    pub fn len(&self) -> usize {
        self.storage.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn open_reader(&self) -> SlotReader<'_> {
        self.ensure_readable();
        self.readers.set(self.readers.get() + 1);
        SlotReader::new(self, self.storage.borrow())
    }

    pub fn open_writer(&self) -> SlotWriter<'_> {
        if self.writer.get() {
            panic!("cannot start a writer when another writer is pending");
        }
        if self.readers.get() > 0 {
            panic!("cannot start a writer when a reader is pending");
        }
        self.writer.set(true);
        SlotWriter::new(self, self.storage.borrow_mut())
    }

    pub fn read<R>(&self, f: impl FnOnce(&mut SlotReader<'_>) -> R) -> R {
        let mut reader = self.open_reader();
        f(&mut reader)
    }

    pub fn write<R>(&self, f: impl FnOnce(&mut SlotWriter<'_>) -> R) -> R {
        let mut writer = self.open_writer();
        let result = f(&mut writer);
        writer.close();
        result
    }

    pub(crate) fn close_reader(&self) {
        self.readers.set(self.readers.get() - 1);
    }

    pub(crate) fn close_writer(&self) {
        self.writer.set(false);
    }

    /// Locations of the groups enclosing `location`, outermost first.
    pub fn group_path_to(&self, location: usize) -> Vec<usize> {
        self.ensure_readable();
        self.storage.borrow().group_path_to(location)
    }

    /// Location of `anchor` in this table; `None` when it was invalidated or
    /// belongs to another table.
    pub fn anchor_location(&self, anchor: &Anchor) -> Option<usize> {
        self.owns_anchor(anchor).then(|| anchor.location()).flatten()
    }

    /// Visits every occupied slot in order.
    pub fn for_each_slot(&self, mut f: impl FnMut(usize, SlotRef<'_>)) {
        let reader = self.open_reader();
        let storage = &reader.storage;
        for index in 0..storage.len() {
            f(index, storage.view(index));
        }
    }

    /// Whether `anchor` is registered with this table.
    pub fn owns_anchor(&self, anchor: &Anchor) -> bool {
        self.ensure_readable();
        anchor
            .location()
            .and_then(|location| self.storage.borrow().anchors.find(location))
            .is_some_and(|found| found == *anchor)
    }

    /// Checks every structural invariant, panicking on the first violation.
    pub fn verify_well_formed(&self) {
        self.ensure_readable();
        self.storage.borrow().verify();
    }

    fn ensure_readable(&self) {
        if self.writer.get() {
            panic!("cannot read while a writer is pending");
        }
    }
}

impl Default for SlotTable {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SlotTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.storage.try_borrow() {
            Ok(storage) => {
                writeln!(
                    f,
                    "SlotTable(len={}, anchors={})",
                    storage.len(),
                    storage.anchors.len()
                )?;
                storage.dump(f, 0, storage.len(), 1)
            }
            Err(_) => f.write_str("SlotTable(<writing>)"),
        }
    }
}

#[cfg(test)]
#[path = "tests/slot_table_tests.rs"]
mod tests;
