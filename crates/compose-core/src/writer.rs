//! Mutating cursor over a [`SlotTable`].

use std::any::Any;
use std::cell::RefMut;
use std::thread;

use crate::anchor::Anchor;
use crate::slot_table::{
    GroupHeader, KeyInfo, Removed, Slot, SlotRef, SlotStorage, SlotTable, SlotValue,
};
use crate::Key;

/// Exclusive editing cursor.
///
/// Every structural edit updates the enclosing group sizes, node counts and
/// anchors before returning.
pub struct SlotWriter<'a> {
    table: &'a SlotTable,
    storage: RefMut<'a, SlotStorage>,
    current: usize,
    parents: Vec<usize>, // FUTURE(no_std): replace Vec with fixed-capacity stack.
    insert_count: usize,
}

impl<'a> SlotWriter<'a> {
    pub(crate) fn new(table: &'a SlotTable, storage: RefMut<'a, SlotStorage>) -> Self {
        Self {
            table,
            storage,
            current: 0,
            parents: Vec::new(),
            insert_count: 0,
        }
    }

    pub fn current(&self) -> usize {
        self.current
    }

    /// Location of the innermost open group.
    pub fn parent(&self) -> Option<usize> {
        self.parents.last().copied()
    }

    pub fn inserting(&self) -> bool {
        self.insert_count > 0
    }

    pub fn len(&self) -> usize {
        self.storage.len()
    }

    pub fn is_empty(&self) -> bool {
        self.storage.len() == 0
    }

    /// End of the innermost open group, or of the table at the root.
    pub fn group_end_of_parent(&self) -> usize {
        match self.parents.last() {
            Some(&parent) => self.storage.group_end(parent),
            None => self.storage.len(),
        }
    }

    pub(crate) fn header(&self) -> GroupHeader {
        *self.storage.header(self.current)
    }

    pub fn is_group(&self) -> bool {
        self.current < self.group_end_of_parent() && self.storage.is_group(self.current)
    }

    pub fn is_node(&self) -> bool {
        self.is_group() && self.header().is_node
    }

    pub fn group_key(&self) -> Key {
        self.header().key
    }

    pub fn group_data_key(&self) -> Option<Key> {
        self.header().data_key
    }

    pub fn group_size(&self) -> usize {
        self.header().size
    }

    pub fn group_end(&self) -> usize {
        self.storage.group_end(self.current)
    }

    /// End of the group whose header sits at `location`.
    pub(crate) fn end_of(&self, location: usize) -> usize {
        self.storage.group_end(location)
    }

    /// The slot under the cursor, without moving.
    pub fn peek(&self) -> SlotRef<'_> {
        if self.current >= self.group_end_of_parent() {
            return SlotRef::Empty;
        }
        self.storage.view(self.current)
    }

    fn grow(&mut self, count: usize, nodes: usize) {
        self.storage.insert_empty(self.current, count);
        self.storage
            .adjust_ancestors(&self.parents, count as isize, nodes as isize);
    }

    fn start(&mut self, key: Key, data_key: Option<Key>, is_node: bool) {
        if self.inserting() {
            self.grow(1, usize::from(is_node));
            self.storage.replace(
                self.current,
                Slot::Group(GroupHeader::new(key, data_key, is_node)),
            );
        } else {
            assert!(
                self.is_group(),
                "expected a group start at {}",
                self.current
            );
            let header = self.header();
            assert!(
                header.matches(key, data_key) && header.is_node == is_node,
                "group at {} has key {:#x} but {:#x} was started",
                self.current,
                header.key,
                key
            );
        }
        self.parents.push(self.current);
        self.current += 1;
    }

    pub fn start_group(&mut self, key: Key, data_key: Option<Key>) {
        self.start(key, data_key, false);
    }

    /// Starts a node group. The first [`update`](Self::update) inside it stores the node.
    pub fn start_node(&mut self, key: Key, data_key: Option<Key>) {
        self.start(key, data_key, true);
    }

    /// Enters whatever group is at the cursor without checking its key.
    pub(crate) fn enter_group(&mut self) -> GroupHeader {
        assert!(
            !self.inserting(),
            "cannot enter an existing group while inserting"
        );
        assert!(
            self.is_group(),
            "expected a group start at {}",
            self.current
        );
        let header = self.header();
        self.parents.push(self.current);
        self.current += 1;
        header
    }

    /// Closes the innermost group, returning the nodes it contributes to its parent.
    pub fn end_group(&mut self) -> usize {
        let parent = match self.parents.last() {
            Some(&parent) => parent,
            None => panic!("end_group called without a matching start_group"),
        };
        let end = self.storage.group_end(parent);
        assert!(
            self.current == end,
            "end_group at {} but the group ends at {end}",
            self.current
        );
        self.parents.pop();
        self.storage.header(parent).contribution()
    }

    pub fn end_node(&mut self) -> usize {
        if let Some(&parent) = self.parents.last() {
            assert!(
                self.storage.header(parent).is_node,
                "end_node closes a group that is not a node"
            );
        }
        self.end_group()
    }

    pub(crate) fn update_slot(&mut self, value: SlotValue) -> Option<SlotValue> {
        if self.inserting() {
            self.grow(1, 0);
            self.storage.replace(self.current, Slot::Value(value));
            self.current += 1;
            return None;
        }
        assert!(
            self.current < self.group_end_of_parent(),
            "cannot update past the end of a group"
        );
        let previous = match self.storage.replace(self.current, Slot::Value(value)) {
            Slot::Value(previous) => Some(previous),
            Slot::Empty => None,
            Slot::Group(_) => panic!("cannot overwrite the group start at {}", self.current),
        };
        self.current += 1;
        previous
    }

    /// Writes `value` at the cursor and advances, returning the value it replaced.
    pub fn update<T: Any>(&mut self, value: T) -> Option<Box<dyn Any>> {
        self.update_slot(SlotValue::plain(Box::new(value)))
            .map(|previous| previous.value)
    }

    /// Advances past one slot, returning it.
    pub fn skip(&mut self) -> SlotRef<'_> {
        assert!(
            self.current < self.group_end_of_parent(),
            "cannot skip past the end of a group"
        );
        self.current += 1;
        self.storage.view(self.current - 1)
    }

    pub fn skip_n(&mut self, count: usize) {
        assert!(
            self.current + count <= self.group_end_of_parent(),
            "cannot skip past the end of a group"
        );
        self.current += count;
    }

    /// Steps over the group at the cursor, returning its node contribution.
    pub fn skip_group(&mut self) -> usize {
        assert!(
            self.is_group(),
            "expected a group start at {}",
            self.current
        );
        let header = self.header();
        self.current += header.span();
        header.contribution()
    }

    pub fn skip_to_group_end(&mut self) {
        self.current = self.group_end_of_parent();
    }

    /// Moves forward to `location`, which must lie inside the current group.
    pub fn advance_to(&mut self, location: usize) {
        assert!(
            location >= self.current && location <= self.group_end_of_parent(),
            "cannot advance to {location} from {}",
            self.current
        );
        self.current = location;
    }

    pub fn begin_insert(&mut self) {
        self.insert_count += 1;
    }

    pub fn end_insert(&mut self) {
        assert!(self.insert_count > 0, "end_insert without begin_insert");
        self.insert_count -= 1;
    }

    /// Sibling groups from the cursor to the end of the enclosing group.
    pub fn extract_keys(&self) -> Vec<KeyInfo> {
        self.storage
            .sibling_keys(self.current, self.group_end_of_parent())
    }

    /// Deletes the group at the cursor and everything it holds.
    pub fn remove_group(&mut self) -> Removed {
        assert!(!self.inserting(), "cannot remove a group while inserting");
        assert!(
            self.is_group(),
            "expected a group start at {}",
            self.current
        );
        let span = self.header().span();
        self.remove(self.current, span)
    }

    /// Deletes `[start, start + len)`. The range must cover whole groups of the
    /// current group and lie at or after the cursor.
    pub fn remove(&mut self, start: usize, len: usize) -> Removed {
        let end = start + len;
        assert!(
            start >= self.current && end <= self.group_end_of_parent(),
            "remove range [{start}, {end}) is outside the editable region"
        );
        let nodes = self.storage.range_contribution(start, end);
        let observers = self.storage.observers_in(start, end);
        let (removed, invalidated_anchors) = self.storage.remove_slots(start, len);
        self.storage
            .adjust_ancestors(&self.parents, -(len as isize), -(nodes as isize));
        drop(removed);
        Removed {
            nodes,
            invalidated_anchors,
            observers,
        }
    }

    /// Moves the `offset`-th sibling group after the cursor to the cursor.
    /// Loose value slots in between are not counted.
    pub fn move_group(&mut self, offset: usize) {
        assert!(!self.inserting(), "cannot move a group while inserting");
        let end = self.group_end_of_parent();
        let mut location = self.current;
        let mut seen = 0;
        loop {
            assert!(location < end, "no group at offset {offset}");
            if !self.storage.is_group(location) {
                location += 1;
                continue;
            }
            if seen == offset {
                break;
            }
            seen += 1;
            location = self.storage.group_end(location);
        }
        let span = self.storage.header(location).span();
        self.storage.relocate(location, span, self.current);
    }

    /// Transplants the group at `location` of `source` to the cursor. Must be
    /// inserting. Returns the anchors that now resolve into this table.
    pub fn move_from(&mut self, source: &SlotTable, location: usize) -> Vec<Anchor> {
        assert!(self.inserting(), "move_from requires insert mode");
        let detached = {
            let mut source_writer = source.open_writer();
            let detached = source_writer.storage.detach_group(location);
            source_writer.close();
            detached
        };
        let count = detached.slots.len();
        let base = self.current;
        self.storage.insert_slots(base, detached.slots);
        self.storage
            .adjust_ancestors(&self.parents, count as isize, detached.nodes as isize);
        self.storage.anchors.restore(&detached.anchors, base);
        self.current += count;
        detached
            .anchors
            .iter()
            .map(|entry| entry.anchor().clone())
            .collect()
    }

    /// Returns the shared anchor for the group at `location`.
    pub fn anchor(&mut self, location: usize) -> Anchor {
        assert!(
            self.storage.is_group(location),
            "anchors must target a group start ({location})"
        );
        self.storage.anchors.anchor(location)
    }

    /// Closes the writer, checking that every group it opened was ended.
    pub fn close(mut self) {
        self.check_balanced();
        self.parents.clear();
    }

    fn check_balanced(&mut self) {
        assert!(
            self.parents.is_empty() && self.insert_count == 0,
            "writer closed with {} open groups",
            self.parents.len()
        );
    }
}

impl Drop for SlotWriter<'_> {
    fn drop(&mut self) {
        self.table.close_writer();
        if !thread::panicking() {
            self.check_balanced();
        }
    }
}
