//! Output tree collaborator.

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// Node emitted by a node group. Appliers downcast it to their own node type.
pub type NodeRef = Rc<dyn Any>; // FUTURE(no_std): replace Rc with arena-managed node handles.

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeError {
    IndexOutOfBounds { index: usize, len: usize },
    TypeMismatch { expected: &'static str },
    UnbalancedUp,
}

impl fmt::Display for NodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeError::IndexOutOfBounds { index, len } => {
                write!(f, "node index {index} out of bounds for {len} children")
            }
            NodeError::TypeMismatch { expected } => {
                write!(f, "node type mismatch; expected {expected}")
            }
            NodeError::UnbalancedUp => write!(f, "up() called at the root node"),
        }
    }
}

impl std::error::Error for NodeError {}

/// Materializes structural changes into a concrete tree.
///
/// Calls arrive only while a change list is applied after a pass. `down` and
/// `up` move the applier between parents; the index arguments are positions
/// among the current parent's children.
pub trait Applier {
    fn down(&mut self, node: NodeRef) -> Result<(), NodeError>;
    fn up(&mut self) -> Result<(), NodeError>;
    fn insert_node(&mut self, index: usize, node: NodeRef) -> Result<(), NodeError>;
    fn remove_node(&mut self, index: usize, count: usize) -> Result<(), NodeError>;
    /// Removes `count` children at `from` and reinserts them at `to`, where `to < from`.
    fn move_node(&mut self, from: usize, to: usize, count: usize) -> Result<(), NodeError>;
    fn clear(&mut self) -> Result<(), NodeError>;
}

/// Node type for [`MemoryApplier`].
pub struct MemoryNode {
    pub name: RefCell<String>,
    children: RefCell<Vec<NodeRef>>,
}

impl MemoryNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: RefCell::new(name.into()),
            children: RefCell::new(Vec::new()),
        }
    }

    pub fn name(&self) -> String {
        self.name.borrow().clone()
    }

    pub fn children(&self) -> Vec<NodeRef> {
        self.children.borrow().clone()
    }
}

/// Applier over an in-memory tree of [`MemoryNode`]s.
pub struct MemoryApplier {
    root: Rc<MemoryNode>,
    stack: Vec<Rc<MemoryNode>>, // FUTURE(no_std): replace Vec with fixed-capacity stack.
}

impl MemoryApplier {
    pub fn new() -> Self {
        let root = Rc::new(MemoryNode::new("root"));
        Self {
            stack: vec![root.clone()],
            root,
        }
    }

    pub fn root(&self) -> Rc<MemoryNode> {
        self.root.clone()
    }

    fn current(&self) -> &Rc<MemoryNode> {
        self.stack.last().unwrap_or(&self.root)
    }

    fn downcast(node: NodeRef) -> Result<Rc<MemoryNode>, NodeError> {
        node.downcast::<MemoryNode>()
            .map_err(|_| NodeError::TypeMismatch {
                expected: std::any::type_name::<MemoryNode>(),
            })
    }

    pub fn dump_tree(&self) -> String {
        let mut output = String::new();
        Self::dump_node(&mut output, &self.root, 0);
        output
    }

    fn dump_node(output: &mut String, node: &MemoryNode, depth: usize) {
        output.push_str(&"  ".repeat(depth));
        output.push_str(&node.name.borrow());
        output.push('\n');
        for child in node.children.borrow().iter() {
            if let Some(child) = child.downcast_ref::<MemoryNode>() {
                Self::dump_node(output, child, depth + 1);
            }
        }
    }
}

impl Default for MemoryApplier {
    fn default() -> Self {
        Self::new()
    }
}

impl Applier for MemoryApplier {
    fn down(&mut self, node: NodeRef) -> Result<(), NodeError> {
        let node = Self::downcast(node)?;
        self.stack.push(node);
        Ok(())
    }

    fn up(&mut self) -> Result<(), NodeError> {
        if self.stack.len() <= 1 {
            return Err(NodeError::UnbalancedUp);
        }
        self.stack.pop();
        Ok(())
    }

    fn insert_node(&mut self, index: usize, node: NodeRef) -> Result<(), NodeError> {
        Self::downcast(node.clone())?;
        let mut children = self.current().children.borrow_mut();
        if index > children.len() {
            return Err(NodeError::IndexOutOfBounds {
                index,
                len: children.len(),
            });
        }
        children.insert(index, node);
        Ok(())
    }

    fn remove_node(&mut self, index: usize, count: usize) -> Result<(), NodeError> {
        let mut children = self.current().children.borrow_mut();
        if index + count > children.len() {
            return Err(NodeError::IndexOutOfBounds {
                index: index + count,
                len: children.len(),
            });
        }
        drop(children.drain(index..index + count));
        Ok(())
    }

    fn move_node(&mut self, from: usize, to: usize, count: usize) -> Result<(), NodeError> {
        let mut children = self.current().children.borrow_mut();
        if from + count > children.len() {
            return Err(NodeError::IndexOutOfBounds {
                index: from + count,
                len: children.len(),
            });
        }
        let moved: Vec<NodeRef> = children.drain(from..from + count).collect();
        children.splice(to..to, moved);
        Ok(())
    }

    fn clear(&mut self) -> Result<(), NodeError> {
        self.root.children.borrow_mut().clear();
        self.stack.truncate(1);
        Ok(())
    }
}
