use std::cell::{Cell, RefCell};
use std::fmt::{self, Write as _};
use std::rc::Rc;
use std::sync::Arc;

use compose_core::{
    emit_node, update_node, Applier, Composition, DefaultScheduler, LifecycleObserver, NodeError,
    NodeRef, PassStats, Recomposer, Runtime, RuntimeHandle, RuntimeScheduler,
};
use compose_macros::composable;

/// Node type produced by the testing composables.
pub struct TestNode {
    tag: String,
    text: RefCell<String>,
    children: RefCell<Vec<Rc<TestNode>>>,
}

impl TestNode {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            text: RefCell::new(String::new()),
            children: RefCell::new(Vec::new()),
        }
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn text(&self) -> String {
        self.text.borrow().clone()
    }

    pub fn set_text(&self, text: &str) {
        text.clone_into(&mut self.text.borrow_mut());
    }

    pub fn children(&self) -> Vec<Rc<TestNode>> {
        self.children.borrow().clone()
    }

    fn label(&self) -> String {
        let text = self.text.borrow();
        if text.is_empty() {
            self.tag.clone()
        } else {
            format!("{}({})", self.tag, text)
        }
    }
}

impl fmt::Debug for TestNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

/// One call the [`RecordingApplier`] received, with nodes named by their label.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AppliedOp {
    Down(String),
    Up,
    Insert { index: usize, node: String },
    Remove { index: usize, count: usize },
    Move { from: usize, to: usize, count: usize },
    Clear,
}

/// Applier over [`TestNode`]s that logs every call it receives.
pub struct RecordingApplier {
    root: Rc<TestNode>,
    stack: Vec<Rc<TestNode>>,
    ops: Vec<AppliedOp>,
}

impl RecordingApplier {
    pub fn new() -> Self {
        let root = Rc::new(TestNode::new("root"));
        Self {
            stack: vec![root.clone()],
            root,
            ops: Vec::new(),
        }
    }

    pub fn root(&self) -> Rc<TestNode> {
        self.root.clone()
    }

    pub fn ops(&self) -> &[AppliedOp] {
        &self.ops
    }

    /// Returns the recorded calls and starts a fresh log.
    pub fn take_ops(&mut self) -> Vec<AppliedOp> {
        std::mem::take(&mut self.ops)
    }

    /// Labels of the root's children, in order.
    pub fn root_labels(&self) -> Vec<String> {
        self.root
            .children
            .borrow()
            .iter()
            .map(|child| child.label())
            .collect()
    }

    /// Indented tree dump, one node per line.
    pub fn dump(&self) -> String {
        let mut output = String::new();
        Self::dump_node(&mut output, &self.root, 0);
        output
    }

    fn dump_node(output: &mut String, node: &TestNode, depth: usize) {
        let _ = writeln!(output, "{}{}", "  ".repeat(depth), node.label());
        for child in node.children.borrow().iter() {
            Self::dump_node(output, child, depth + 1);
        }
    }

    fn current(&self) -> &Rc<TestNode> {
        self.stack.last().unwrap_or(&self.root)
    }

    fn downcast(node: NodeRef) -> Result<Rc<TestNode>, NodeError> {
        node.downcast::<TestNode>()
            .map_err(|_| NodeError::TypeMismatch {
                expected: std::any::type_name::<TestNode>(),
            })
    }

    fn check_range(&self, end: usize) -> Result<(), NodeError> {
        let len = self.current().children.borrow().len();
        if end > len {
            return Err(NodeError::IndexOutOfBounds { index: end, len });
        }
        Ok(())
    }
}

impl Default for RecordingApplier {
    fn default() -> Self {
        Self::new()
    }
}

impl Applier for RecordingApplier {
    fn down(&mut self, node: NodeRef) -> Result<(), NodeError> {
        let node = Self::downcast(node)?;
        self.ops.push(AppliedOp::Down(node.label()));
        self.stack.push(node);
        Ok(())
    }

    fn up(&mut self) -> Result<(), NodeError> {
        if self.stack.len() <= 1 {
            return Err(NodeError::UnbalancedUp);
        }
        self.stack.pop();
        self.ops.push(AppliedOp::Up);
        Ok(())
    }

    fn insert_node(&mut self, index: usize, node: NodeRef) -> Result<(), NodeError> {
        let node = Self::downcast(node)?;
        self.check_range(index)?;
        self.ops.push(AppliedOp::Insert {
            index,
            node: node.tag.clone(),
        });
        self.current().children.borrow_mut().insert(index, node);
        Ok(())
    }

    fn remove_node(&mut self, index: usize, count: usize) -> Result<(), NodeError> {
        self.check_range(index + count)?;
        self.ops.push(AppliedOp::Remove { index, count });
        drop(
            self.current()
                .children
                .borrow_mut()
                .drain(index..index + count),
        );
        Ok(())
    }

    fn move_node(&mut self, from: usize, to: usize, count: usize) -> Result<(), NodeError> {
        self.check_range(from + count)?;
        self.ops.push(AppliedOp::Move { from, to, count });
        let mut children = self.current().children.borrow_mut();
        let moved: Vec<Rc<TestNode>> = children.drain(from..from + count).collect();
        children.splice(to..to, moved);
        Ok(())
    }

    fn clear(&mut self) -> Result<(), NodeError> {
        self.ops.push(AppliedOp::Clear);
        self.root.children.borrow_mut().clear();
        self.stack.truncate(1);
        Ok(())
    }
}

/// Headless harness for exercising compositions in tests.
///
/// Owns a runtime, a [`Recomposer`] and one composition over a
/// [`RecordingApplier`]. Frames are stepped explicitly with
/// [`advance_frame`](Self::advance_frame).
pub struct ComposeTestRule {
    runtime: Runtime,
    recomposer: Recomposer,
    composition: Rc<RefCell<Composition<RecordingApplier>>>,
    frame_time: Cell<u64>,
}

/// Nominal frame length used by [`ComposeTestRule::next_frame`].
pub const FRAME_NANOS: u64 = 16_000_000;

impl ComposeTestRule {
    pub fn new() -> Self {
        Self::with_scheduler(Arc::new(DefaultScheduler))
    }

    pub fn with_scheduler(scheduler: Arc<dyn RuntimeScheduler>) -> Self {
        let runtime = Runtime::new(scheduler);
        let recomposer = Recomposer::new(&runtime);
        let composition = Rc::new(RefCell::new(Composition::new(
            RecordingApplier::new(),
            &runtime,
        )));
        recomposer.register(&composition);
        Self {
            runtime,
            recomposer,
            composition,
            frame_time: Cell::new(0),
        }
    }

    /// Install the provided content and perform the initial composition.
    pub fn set_content(&self, content: impl FnMut() + 'static) -> Result<(), NodeError> {
        self.composition.borrow_mut().set_content(content)
    }

    /// Re-runs the whole content, as a parent recomposition would.
    pub fn recomposition(&self) -> Result<(), NodeError> {
        self.composition.borrow_mut().compose()
    }

    /// Runs one frame at `frame_time_nanos`: UI tasks, frame callbacks, then
    /// one recomposition of everything invalidated so far. Returns the number
    /// of scopes restarted.
    pub fn advance_frame(&self, frame_time_nanos: u64) -> Result<usize, NodeError> {
        self.frame_time.set(frame_time_nanos);
        self.runtime.drain_ui();
        self.runtime.drain_frame_callbacks(frame_time_nanos);
        self.runtime.drain_ui();
        self.recomposer.recompose_now()
    }

    /// Advances by [`FRAME_NANOS`].
    pub fn next_frame(&self) -> Result<usize, NodeError> {
        self.advance_frame(self.frame_time.get() + FRAME_NANOS)
    }

    /// Steps frames until no invalidation or frame callback is pending.
    /// Returns the number of frames run.
    pub fn pump_until_idle(&self) -> Result<usize, NodeError> {
        const MAX_FRAMES: usize = 64;
        let mut frames = 0;
        while self.is_busy() {
            assert!(
                frames < MAX_FRAMES,
                "composition still busy after {MAX_FRAMES} frames"
            );
            self.next_frame()?;
            frames += 1;
        }
        Ok(frames)
    }

    fn is_busy(&self) -> bool {
        self.runtime.has_invalidations() || self.runtime.handle().has_frame_callbacks()
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    pub fn runtime_handle(&self) -> RuntimeHandle {
        self.runtime.handle()
    }

    pub fn recomposer(&self) -> &Recomposer {
        &self.recomposer
    }

    pub fn frame_time(&self) -> u64 {
        self.frame_time.get()
    }

    pub fn last_pass(&self) -> PassStats {
        self.composition.borrow().last_pass()
    }

    pub fn dump(&self) -> String {
        self.composition.borrow().applier().dump()
    }

    pub fn root_labels(&self) -> Vec<String> {
        self.composition.borrow().applier().root_labels()
    }

    pub fn take_ops(&self) -> Vec<AppliedOp> {
        self.composition.borrow_mut().applier_mut().take_ops()
    }

    /// Checks the slot table's structural invariants.
    pub fn verify(&self) {
        self.composition.borrow().slot_table().verify_well_formed();
    }

    pub fn dispose(&self) -> Result<(), NodeError> {
        self.composition.borrow_mut().dispose()
    }

    /// Runs `f` against the composition, for assertions the rule does not cover.
    pub fn with_composition<R>(&self, f: impl FnOnce(&mut Composition<RecordingApplier>) -> R) -> R {
        f(&mut self.composition.borrow_mut())
    }
}

impl Default for ComposeTestRule {
    fn default() -> Self {
        Self::new()
    }
}

/// Convenience helper for tests that only need temporary access to a
/// `ComposeTestRule`.
pub fn run_test_composition<R>(f: impl FnOnce(&mut ComposeTestRule) -> R) -> R {
    let mut rule = ComposeTestRule::new();
    f(&mut rule)
}

/// Shared log of lifecycle callbacks.
#[derive(Clone, Default)]
pub struct LifecycleRecorder {
    events: Rc<RefCell<Vec<String>>>,
}

impl LifecycleRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// An observer that logs `enter NAME` and `leave NAME` here.
    pub fn observer(&self, name: impl Into<String>) -> RecordedObserver {
        RecordedObserver {
            name: name.into(),
            events: self.events.clone(),
        }
    }

    pub fn events(&self) -> Vec<String> {
        self.events.borrow().clone()
    }

    pub fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.events.borrow_mut())
    }
}

impl PartialEq for LifecycleRecorder {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.events, &other.events)
    }
}

pub struct RecordedObserver {
    name: String,
    events: Rc<RefCell<Vec<String>>>,
}

impl RecordedObserver {
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl LifecycleObserver for RecordedObserver {
    fn on_enter(&self) {
        self.events.borrow_mut().push(format!("enter {}", self.name));
    }

    fn on_leave(&self) {
        self.events.borrow_mut().push(format!("leave {}", self.name));
    }
}

/// Emits a [`TestNode`] tagged `tag`, keeping its text in sync with `text`.
#[track_caller]
pub fn Node(tag: &str, text: &str, content: impl FnOnce()) {
    let text = text.to_string();
    emit_node(
        || TestNode::new(tag),
        move || {
            update_node(text, |node: &TestNode, text: &String| node.set_text(text));
            content();
        },
    );
}

/// A leaf showing `value`.
#[composable]
pub fn Text(value: String) {
    Node("text", &value, || {});
}

/// A container node.
#[composable]
pub fn Column(content: impl FnOnce()) {
    Node("column", "", content);
}

#[cfg(test)]
#[path = "tests/testing_tests.rs"]
mod tests;
