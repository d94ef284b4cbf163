//! Deferred applier operations produced by a pass.

use std::fmt;

use crate::applier::{Applier, NodeError, NodeRef};

pub(crate) type NodeUpdate = Box<dyn FnOnce(&NodeRef) -> Result<(), NodeError> + 'static>;

pub enum Change {
    Down(NodeRef),
    Up,
    InsertNode { index: usize, node: NodeRef },
    RemoveNode { index: usize, count: usize },
    MoveNode { from: usize, to: usize, count: usize },
    UpdateNode { node: NodeRef, update: NodeUpdate },
}

impl fmt::Debug for Change {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Change::Down(_) => f.write_str("Down"),
            Change::Up => f.write_str("Up"),
            Change::InsertNode { index, .. } => write!(f, "InsertNode({index})"),
            Change::RemoveNode { index, count } => write!(f, "RemoveNode({index}, {count})"),
            Change::MoveNode { from, to, count } => {
                write!(f, "MoveNode({from} -> {to}, {count})")
            }
            Change::UpdateNode { .. } => f.write_str("UpdateNode"),
        }
    }
}

/// Ordered batch of applier operations.
#[derive(Default, Debug)]
pub struct ChangeList {
    changes: Vec<Change>, // FUTURE(no_std): replace Vec with ring buffer.
}

impl ChangeList {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, change: Change) {
        self.changes.push(change);
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Change> {
        self.changes.iter()
    }

    /// Replays every change against `applier`, stopping at the first failure.
    pub fn apply(self, applier: &mut dyn Applier) -> Result<(), NodeError> {
        for change in self.changes {
            match change {
                Change::Down(node) => applier.down(node)?,
                Change::Up => applier.up()?,
                Change::InsertNode { index, node } => applier.insert_node(index, node)?,
                Change::RemoveNode { index, count } => applier.remove_node(index, count)?,
                Change::MoveNode { from, to, count } => applier.move_node(from, to, count)?,
                Change::UpdateNode { node, update } => update(&node)?,
            }
        }
        Ok(())
    }
}
