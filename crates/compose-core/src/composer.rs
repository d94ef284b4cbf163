//! One composition pass: keyed reconciliation of emitted groups against the
//! slot table, producing a deferred change list.
//!
//! The composer writes the table eagerly through a [`SlotWriter`] and records
//! the matching output-tree edits in a [`ChangeList`] that the caller applies
//! once the pass closed every group. Node indices are tracked per parent node;
//! the applier is only told to descend into a node when a change inside it
//! actually needs recording.

use std::any::Any;
use std::mem;
use std::rc::Rc;

use crate::applier::{NodeError, NodeRef};
use crate::changes::{Change, ChangeList};
use crate::hash::{enter_compound, exit_compound};
use crate::lifecycle::{LifecycleEvents, LifecycleObserver};
use crate::local::{LocalContext, LocalKey, ProvidedValue};
use crate::owned::Owned;
use crate::runtime::{InvalidationSink, RuntimeHandle};
use crate::scope::{RecomposeScope, RestartFn};
use crate::slot_table::{KeyInfo, SlotTable, SlotValue};
use crate::writer::SlotWriter;
use crate::{next_scope_id, CompositionId, Key};

struct GroupFrame {
    /// Header location, `None` for the table root.
    location: Option<usize>,
    is_node: bool,
    has_node_frame: bool,
    /// Value folded into the compound key on entry.
    folded: Key,
    start_node_index: usize,
    /// Siblings not yet claimed, in table order, extracted on first mismatch.
    pending: Option<Vec<KeyInfo>>,
    began_insert: bool,
    /// Entered only to reach an invalidated scope; trailing content is kept.
    navigating: bool,
}

impl GroupFrame {
    fn root(navigating: bool) -> Self {
        Self {
            location: None,
            is_node: false,
            has_node_frame: false,
            folded: 0,
            start_node_index: 0,
            pending: None,
            began_insert: false,
            navigating,
        }
    }
}

struct ProviderFrame {
    parent: LocalContext,
    forcing: bool,
}

struct NodeFrame {
    node: NodeRef,
    /// Whether the applier has been sent `Down` into this node.
    realized: bool,
}

/// What a finished pass hands back to its composition.
pub(crate) struct PassOutput {
    pub(crate) changes: ChangeList,
    pub(crate) lifecycle: LifecycleEvents,
    /// Invalidated scopes the pass never reached.
    pub(crate) leftover: Vec<RecomposeScope>,
    pub(crate) restarted: usize,
}

pub struct Composer<'a> {
    writer: SlotWriter<'a>,
    runtime: RuntimeHandle,
    sink: InvalidationSink,
    owner: CompositionId,
    changes: ChangeList,
    lifecycle: LifecycleEvents,
    frames: Vec<GroupFrame>, // FUTURE(no_std): replace Vec with fixed-capacity stack.
    node_frames: Vec<NodeFrame>,
    node_index: usize,
    compound_key: Key,
    scopes: Vec<RecomposeScope>,
    invalidations: Vec<RecomposeScope>,
    restarted: usize,
    locals: LocalContext,
    providers: Vec<ProviderFrame>,
    navigation_locals: Vec<LocalContext>,
    /// Open providers whose values changed; restart groups below them run.
    forcing: usize,
}

impl<'a> Composer<'a> {
    /// Opens a writer on `table`. A navigating composer only visits the
    /// groups of `invalidations`; otherwise the whole table is reconciled.
    pub(crate) fn new(
        table: &'a SlotTable,
        runtime: RuntimeHandle,
        sink: InvalidationSink,
        owner: CompositionId,
        invalidations: Vec<RecomposeScope>,
        navigating: bool,
    ) -> Self {
        Self {
            writer: table.open_writer(),
            runtime,
            sink,
            owner,
            changes: ChangeList::new(),
            lifecycle: LifecycleEvents::default(),
            frames: vec![GroupFrame::root(navigating)],
            node_frames: Vec::new(),
            node_index: 0,
            compound_key: 0,
            scopes: Vec::new(),
            invalidations,
            restarted: 0,
            locals: LocalContext::default(),
            providers: Vec::new(),
            navigation_locals: Vec::new(),
            forcing: 0,
        }
    }

    /// Makes this composer the target of the free composition functions while `f` runs.
    pub fn install<R>(&mut self, f: impl FnOnce() -> R) -> R {
        crate::push_composer(self);
        struct Guard;
        impl Drop for Guard {
            fn drop(&mut self) {
                crate::pop_composer();
            }
        }
        let guard = Guard;
        let result = f();
        drop(guard);
        result
    }

    pub fn runtime_handle(&self) -> RuntimeHandle {
        self.runtime.clone()
    }

    pub fn inserting(&self) -> bool {
        self.writer.inserting()
    }

    pub fn current_compound_key_hash(&self) -> Key {
        self.compound_key
    }

    pub fn current_recompose_scope(&self) -> Option<RecomposeScope> {
        self.scopes.last().cloned()
    }

    fn realize(&mut self) {
        for frame in &mut self.node_frames {
            if !frame.realized {
                frame.realized = true;
                self.changes.push(Change::Down(frame.node.clone()));
            }
        }
    }

    fn push_node_change(&mut self, change: Change) {
        self.realize();
        self.changes.push(change);
    }

    fn start(&mut self, key: Key, data_key: Option<Key>, is_node: bool) {
        let start_node_index = self.node_index;
        let mut began_insert = false;
        if !self.writer.inserting() {
            let in_place = self.writer.is_group() && {
                let header = self.writer.header();
                header.matches(key, data_key) && header.is_node == is_node
            };
            if in_place {
                if let Some(pending) = self.frames.last_mut().and_then(|f| f.pending.as_mut()) {
                    if !pending.is_empty() {
                        pending.remove(0);
                    }
                }
            } else {
                began_insert = !self.claim_moved(key, data_key, is_node);
                if began_insert {
                    self.writer.begin_insert();
                }
            }
        }

        let location = self.writer.current();
        if is_node {
            self.writer.start_node(key, data_key);
        } else {
            self.writer.start_group(key, data_key);
        }
        let folded = data_key.unwrap_or(key);
        self.compound_key = enter_compound(self.compound_key, folded);
        self.frames.push(GroupFrame {
            location: Some(location),
            is_node,
            has_node_frame: false,
            folded,
            start_node_index,
            pending: None,
            began_insert,
            navigating: false,
        });
    }

    /// Looks for a later sibling with the same identity and moves it to the
    /// cursor. First match wins.
    fn claim_moved(&mut self, key: Key, data_key: Option<Key>, is_node: bool) -> bool {
        let writer = &self.writer;
        let Some(frame) = self.frames.last_mut() else {
            return false;
        };
        let pending = frame.pending.get_or_insert_with(|| writer.extract_keys());
        let Some(offset) = pending
            .iter()
            .position(|info| info.key == key && info.data_key == data_key && info.is_node == is_node)
        else {
            return false;
        };
        let claimed = pending.remove(offset);
        let nodes_before: usize = pending[..offset].iter().map(|info| info.nodes).sum();
        self.writer.move_group(offset);
        if claimed.nodes > 0 && nodes_before > 0 {
            self.push_node_change(Change::MoveNode {
                from: self.node_index + nodes_before,
                to: self.node_index,
                count: claimed.nodes,
            });
        }
        true
    }

    pub fn start_group(&mut self, key: Key) {
        self.start(key, None, false);
    }

    /// Starts a group whose identity is `key` plus an explicit `data_key`.
    pub fn start_keyed_group(&mut self, key: Key, data_key: Key) {
        self.start(key, Some(data_key), false);
    }

    pub fn end_group(&mut self) {
        if self.frames.len() <= 1 {
            panic!("end_group called without a matching start_group");
        }
        let navigating = self.frames.last().is_some_and(|frame| frame.navigating);
        if !navigating && !self.writer.inserting() {
            self.remove_trailing();
        }
        let contribution = self.writer.end_group();
        let Some(frame) = self.frames.pop() else {
            return;
        };
        if frame.began_insert {
            self.writer.end_insert();
        }
        if frame.has_node_frame {
            if let Some(node_frame) = self.node_frames.pop() {
                if node_frame.realized {
                    self.changes.push(Change::Up);
                }
            }
        }
        self.node_index = frame.start_node_index + contribution;
        self.compound_key = exit_compound(self.compound_key, frame.folded);
    }

    /// Removes every unclaimed slot between the cursor and the end of the current group.
    fn remove_trailing(&mut self) {
        let current = self.writer.current();
        let end = self.writer.group_end_of_parent();
        if current >= end {
            return;
        }
        let removed = self.writer.remove(current, end - current);
        if removed.nodes > 0 {
            self.push_node_change(Change::RemoveNode {
                index: self.node_index,
                count: removed.nodes,
            });
        }
        self.lifecycle.leave_all(removed.observers);
        log::trace!(
            "removed {} trailing slots ({} nodes)",
            end - current,
            removed.nodes
        );
    }

    pub fn start_node(&mut self, key: Key, data_key: Option<Key>) {
        self.start(key, data_key, true);
    }

    fn enter_node(&mut self, node: NodeRef) {
        if let Some(frame) = self.frames.last_mut() {
            frame.has_node_frame = true;
        }
        self.node_frames.push(NodeFrame {
            node,
            realized: false,
        });
        self.node_index = 0;
    }

    /// Stores a freshly created node in the node group being inserted.
    pub fn create_node(&mut self, node: NodeRef) {
        assert!(
            self.writer.inserting(),
            "create_node requires a node group being inserted"
        );
        self.writer
            .update_slot(SlotValue::plain(Box::new(node.clone())));
        self.push_node_change(Change::InsertNode {
            index: self.node_index,
            node: node.clone(),
        });
        self.enter_node(node);
    }

    /// Reuses the node stored in the node group at the cursor.
    pub fn use_node(&mut self) -> NodeRef {
        let node = self.writer.peek().downcast_ref::<NodeRef>().cloned();
        let Some(node) = node else {
            panic!("node group at {} holds no node", self.writer.current());
        };
        self.writer.skip_n(1);
        self.enter_node(node.clone());
        node
    }

    pub fn end_node(&mut self) {
        assert!(
            self.frames.last().is_some_and(|frame| frame.is_node),
            "end_node closes a group that is not a node"
        );
        self.end_group();
    }

    /// Records a deferred update of the current node when `value` changed.
    pub fn update_node<V: PartialEq + Clone + 'static>(
        &mut self,
        value: V,
        apply: impl FnOnce(&NodeRef, &V) -> Result<(), NodeError> + 'static,
    ) {
        let node = match self.node_frames.last() {
            Some(frame) if self.frames.last().is_some_and(|f| f.has_node_frame) => {
                frame.node.clone()
            }
            _ => panic!("update_node called outside a node group"),
        };
        if self.changed(&value) {
            self.changes.push(Change::UpdateNode {
                node,
                update: Box::new(move |node| apply(node, &value)),
            });
        }
    }

    /// Compares `value` with the one stored at the cursor, storing it when it differs.
    pub fn changed<T: PartialEq + Clone + 'static>(&mut self, value: &T) -> bool {
        if !self.writer.inserting() {
            let same = self
                .writer
                .peek()
                .downcast_ref::<T>()
                .is_some_and(|previous| previous == value);
            if same {
                self.writer.skip_n(1);
                return false;
            }
        }
        self.write_value(SlotValue::plain(Box::new(value.clone())));
        true
    }

    fn at_value(&self) -> bool {
        self.writer.current() < self.writer.group_end_of_parent() && !self.writer.is_group()
    }

    /// Stores `value` at the cursor, overwriting a loose value or inserting a new slot.
    pub(crate) fn write_value(&mut self, value: SlotValue) {
        let entering = value.observer.clone();
        let previous = if self.writer.inserting() || self.at_value() {
            self.writer.update_slot(value)
        } else {
            self.writer.begin_insert();
            let previous = self.writer.update_slot(value);
            self.writer.end_insert();
            previous
        };
        if let Some(observer) = previous.and_then(|previous| previous.observer) {
            self.lifecycle.leave(observer);
        }
        if let Some(observer) = entering {
            self.lifecycle.enter(observer);
        }
    }

    /// Takes the value at the cursor when it has type `T`.
    pub fn remembered<T: Clone + 'static>(&mut self) -> Option<T> {
        if self.writer.inserting() {
            return None;
        }
        let value = self.writer.peek().downcast_ref::<T>().cloned();
        if value.is_some() {
            self.writer.skip_n(1);
        }
        value
    }

    pub fn store_remembered<T: 'static>(&mut self, value: T) -> Owned<T> {
        let owned = Owned::new(value);
        self.write_value(SlotValue::plain(Box::new(owned.clone())));
        owned
    }

    pub(crate) fn store_observer<T: LifecycleObserver + 'static>(&mut self, value: Rc<T>) {
        let observer: Rc<dyn LifecycleObserver> = value.clone();
        self.write_value(SlotValue {
            value: Box::new(value),
            observer: Some(observer),
        });
    }

    /// Single-borrow `remember`; `init` must not touch the composer.
    pub fn remember<T: 'static>(&mut self, init: impl FnOnce() -> T) -> Owned<T> {
        match self.remembered::<Owned<T>>() {
            Some(owned) => owned,
            None => self.store_remembered(init()),
        }
    }

    pub fn remember_with_keys<K, T>(&mut self, keys: &K, init: impl FnOnce() -> T) -> Owned<T>
    where
        K: PartialEq + Clone + 'static,
        T: 'static,
    {
        if self.changed(keys) {
            return self.store_remembered(init());
        }
        self.remember(init)
    }

    /// Single-borrow `remember_observer`; `init` must not touch the composer.
    pub fn remember_observer<T: LifecycleObserver + 'static>(
        &mut self,
        init: impl FnOnce() -> T,
    ) -> Rc<T> {
        if let Some(value) = self.remembered::<Rc<T>>() {
            return value;
        }
        let value = Rc::new(init());
        self.store_observer(value.clone());
        value
    }

    /// Starts a restart group and returns whether its body must run.
    pub fn start_restart_group(&mut self, key: Key) -> bool {
        self.start(key, None, false);
        let existing = self.remembered::<RecomposeScope>();
        let (scope, dirty) = match existing {
            Some(scope) => {
                let dirty = scope.is_invalid() || self.forcing > 0;
                if dirty {
                    self.restarted += 1;
                }
                (scope, dirty)
            }
            None => {
                let scope = RecomposeScope::new(next_scope_id(), self.owner, self.sink.clone());
                self.runtime.register_scope(&scope);
                self.write_value(SlotValue::plain(Box::new(scope.clone())));
                if let Some(location) = self.frames.last().and_then(|frame| frame.location) {
                    scope.set_anchor(self.writer.anchor(location));
                }
                (scope, true)
            }
        };
        self.invalidations
            .retain(|pending| !pending.ptr_eq(&scope));
        if dirty {
            scope.reset_observations();
        }
        scope.set_locals(self.locals.clone());
        self.scopes.push(scope);
        dirty
    }

    pub fn end_restart_group(&mut self, restart: RestartFn) {
        let Some(scope) = self.scopes.pop() else {
            panic!("end_restart_group called without a matching start_restart_group");
        };
        scope.set_restart(restart);
        scope.mark_valid();
        self.end_group();
    }

    /// Steps over the group at the cursor, keeping its output.
    pub fn skip_current_group(&mut self) {
        self.node_index += self.writer.skip_group();
    }

    /// Opens a navigation region over the rest of the current group.
    pub fn begin_navigation(&mut self) -> usize {
        self.navigation_locals.push(self.locals.clone());
        self.frames.len()
    }

    fn region_end(&self, floor: usize) -> usize {
        match self.frames[floor - 1].location {
            Some(location) => self.writer.end_of(location),
            None => self.writer.len(),
        }
    }

    /// Moves the cursor onto the next invalidated scope inside the region
    /// opened at `floor` and returns it, or `None` when none is left there.
    pub fn navigate_to_next(&mut self, floor: usize) -> Option<RecomposeScope> {
        if self.writer.inserting() {
            return None;
        }
        self.invalidations
            .retain(|scope| scope.location().is_some());
        let current = self.writer.current();
        let region_end = self.region_end(floor);
        let (index, target) = self
            .invalidations
            .iter()
            .enumerate()
            .filter_map(|(index, scope)| scope.location().map(|location| (index, location)))
            .filter(|&(_, location)| location >= current && location < region_end)
            .min_by_key(|&(_, location)| location)?;

        while self.frames.len() > floor {
            let Some(location) = self.frames.last().and_then(|frame| frame.location) else {
                break;
            };
            if target < self.writer.end_of(location) {
                break;
            }
            self.close_navigation_frame();
        }
        while self.writer.current() != target {
            if !self.writer.is_group() {
                self.writer.skip_n(1);
            } else if target < self.writer.group_end() {
                self.enter_navigation_frame();
            } else {
                self.skip_current_group();
            }
        }
        let scope = self.invalidations.swap_remove(index);
        self.locals = scope.locals();
        Some(scope)
    }

    fn enter_navigation_frame(&mut self) {
        let location = self.writer.current();
        let start_node_index = self.node_index;
        let header = self.writer.enter_group();
        let folded = header.data_key.unwrap_or(header.key);
        self.compound_key = enter_compound(self.compound_key, folded);
        self.frames.push(GroupFrame {
            location: Some(location),
            is_node: header.is_node,
            has_node_frame: false,
            folded,
            start_node_index,
            pending: None,
            began_insert: false,
            navigating: true,
        });
        if header.is_node {
            self.use_node();
        }
    }

    fn close_navigation_frame(&mut self) {
        self.writer.skip_to_group_end();
        self.end_group();
    }

    /// Leaves every frame entered since `floor` and moves to the end of the region.
    pub fn finish_navigation(&mut self, floor: usize) {
        while self.frames.len() > floor {
            self.close_navigation_frame();
        }
        self.writer.skip_to_group_end();
        if let Some(locals) = self.navigation_locals.pop() {
            self.locals = locals;
        }
    }

    /// Queues `effect` to run after this pass is applied.
    pub fn record_side_effect(&mut self, effect: impl FnOnce() + 'static) {
        self.lifecycle.side_effect(Box::new(effect));
    }

    /// Opens a group binding `values` for everything composed until the
    /// matching [`end_providers`](Self::end_providers).
    pub fn start_providers(&mut self, key: Key, values: Vec<ProvidedValue>) {
        self.start_group(key);
        let mut changed = false;
        let mut entries = Vec::with_capacity(values.len());
        for provided in values {
            let (local, value, differs) = provided.record(self);
            changed |= differs;
            entries.push((local, value));
        }
        let forcing = changed && !self.writer.inserting();
        if forcing {
            log::trace!("provided values changed; recomposing the provider's content");
            self.forcing += 1;
        }
        let inner = self.locals.extended(entries);
        let parent = mem::replace(&mut self.locals, inner);
        self.providers.push(ProviderFrame { parent, forcing });
    }

    pub fn end_providers(&mut self) {
        let Some(frame) = self.providers.pop() else {
            panic!("end_providers called without a matching start_providers");
        };
        if frame.forcing {
            self.forcing -= 1;
        }
        self.locals = frame.parent;
        self.end_group();
    }

    pub(crate) fn local_value(&self, key: LocalKey) -> Option<Rc<dyn Any>> {
        self.locals.get(key)
    }

    /// Closes every open group after user code unwound, keeping existing content.
    pub(crate) fn abandon(&mut self) {
        self.scopes.clear();
        self.providers.clear();
        self.forcing = 0;
        self.lifecycle.discard_side_effects();
        for frame in &mut self.frames {
            frame.navigating = true;
        }
        while self.frames.len() > 1 {
            self.close_navigation_frame();
        }
    }

    pub(crate) fn finish(mut self) -> PassOutput {
        assert!(
            self.frames.len() == 1,
            "composition pass ended with {} open groups",
            self.frames.len() - 1
        );
        let navigating = self.frames.pop().is_some_and(|root| root.navigating);
        if !navigating {
            self.remove_trailing();
        }
        let Composer {
            writer,
            changes,
            lifecycle,
            invalidations,
            restarted,
            ..
        } = self;
        writer.close();
        PassOutput {
            changes,
            lifecycle,
            leftover: invalidations,
            restarted,
        }
    }
}

pub(crate) fn downcast_node<N: Any>(node: &NodeRef) -> Result<&N, NodeError> {
    node.downcast_ref::<N>().ok_or(NodeError::TypeMismatch {
        expected: std::any::type_name::<N>(),
    })
}
