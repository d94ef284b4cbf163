//! Read-only cursor over a [`SlotTable`].

use std::cell::Ref;

use crate::slot_table::{GroupHeader, KeyInfo, SlotRef, SlotStorage, SlotTable};
use crate::Key;

/// Sequential, restartable view of a slot table.
///
/// Any number of readers may be open at once; none may be open while a
/// writer is.
pub struct SlotReader<'a> {
    table: &'a SlotTable,
    pub(crate) storage: Ref<'a, SlotStorage>,
    current: usize,
    parents: Vec<usize>, // FUTURE(no_std): replace Vec with fixed-capacity stack.
    empty_count: usize,
}

impl<'a> SlotReader<'a> {
    pub(crate) fn new(table: &'a SlotTable, storage: Ref<'a, SlotStorage>) -> Self {
        Self {
            table,
            storage,
            current: 0,
            parents: Vec::new(),
            empty_count: 0,
        }
    }

    pub fn current(&self) -> usize {
        self.current
    }

    /// End of the group the cursor is in, or of the table at the root.
    pub fn group_end_of_parent(&self) -> usize {
        match self.parents.last() {
            Some(&parent) => self.storage.group_end(parent),
            None => self.storage.len(),
        }
    }

    pub fn in_empty(&self) -> bool {
        self.empty_count > 0
    }

    fn header(&self) -> &GroupHeader {
        self.storage.header(self.current)
    }

    /// Yields the slot at the cursor and advances.
    pub fn next(&mut self) -> SlotRef<'_> {
        if self.in_empty() {
            return SlotRef::Empty;
        }
        assert!(
            self.current < self.group_end_of_parent(),
            "cannot read past the end of a group"
        );
        let index = self.current;
        self.current += 1;
        self.storage.view(index)
    }

    pub fn is_group(&self) -> bool {
        !self.in_empty()
            && self.current < self.group_end_of_parent()
            && self.storage.is_group(self.current)
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

    pub fn group_nodes(&self) -> usize {
        self.header().nodes
    }

    pub fn group_end(&self) -> usize {
        self.storage.group_end(self.current)
    }

    /// The node emitted by the node group at the cursor.
    pub fn node(&self) -> SlotRef<'_> {
        assert!(self.is_node(), "expected a node group at {}", self.current);
        self.storage.view(self.current + 1)
    }

    pub fn start_group(&mut self) {
        if self.in_empty() {
            return;
        }
        assert!(
            self.is_group(),
            "expected a group start at {}",
            self.current
        );
        self.parents.push(self.current);
        self.current += 1;
    }

    /// Enters the node group at the cursor, stepping over its node slot.
    pub fn start_node(&mut self) {
        if self.in_empty() {
            return;
        }
        assert!(self.is_node(), "expected a node group at {}", self.current);
        self.start_group();
        self.current += 1;
    }

    /// Leaves the current group, returning the nodes it contributes to its parent.
    pub fn end_group(&mut self) -> usize {
        if self.in_empty() {
            return 0;
        }
        let parent = match self.parents.last() {
            Some(&parent) => parent,
            None => panic!("end_group called without a matching start_group"),
        };
        assert!(
            self.current == self.storage.group_end(parent),
            "end_group called before the end of the group"
        );
        self.parents.pop();
        self.storage.header(parent).contribution()
    }

    pub fn end_node(&mut self) -> usize {
        self.end_group()
    }

    /// Steps over the group at the cursor, returning its node contribution.
    pub fn skip_group(&mut self) -> usize {
        if self.in_empty() {
            return 0;
        }
        assert!(
            self.is_group(),
            "expected a group start at {}",
            self.current
        );
        let header = *self.header();
        self.current += header.span();
        header.contribution()
    }

    pub fn skip_node(&mut self) -> usize {
        if self.in_empty() {
            return 0;
        }
        assert!(self.is_node(), "expected a node group at {}", self.current);
        self.skip_group()
    }

    pub fn skip_to_group_end(&mut self) {
        self.current = self.group_end_of_parent();
    }

    /// Sibling groups from the cursor to the end of the enclosing group.
    pub fn extract_keys(&self) -> Vec<KeyInfo> {
        if self.in_empty() {
            return Vec::new();
        }
        self.storage
            .sibling_keys(self.current, self.group_end_of_parent())
    }

    pub fn begin_empty(&mut self) {
        self.empty_count += 1;
    }

    pub fn end_empty(&mut self) {
        assert!(self.empty_count > 0, "end_empty without begin_empty");
        self.empty_count -= 1;
    }

    /// Moves the cursor to `location` within the current group.
    pub fn reposition(&mut self, location: usize) {
        let start = self.parents.last().map_or(0, |parent| parent + 1);
        assert!(
            (start..=self.group_end_of_parent()).contains(&location),
            "cannot reposition outside the current group"
        );
        self.current = location;
    }

    /// Restarts reading from the beginning of the table.
    pub fn reset(&mut self) {
        self.current = 0;
        self.parents.clear();
        self.empty_count = 0;
    }
}

impl Drop for SlotReader<'_> {
    fn drop(&mut self) {
        self.table.close_reader();
    }
}
