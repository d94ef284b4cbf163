use std::cell::RefCell;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use crate::applier::{Applier, NodeError};
use crate::composer::Composer;
use crate::lifecycle::LifecycleEvents;
use crate::recomposer::Recompose;
use crate::runtime::{InvalidationSink, Runtime, RuntimeHandle};
use crate::scope::RecomposeScope;
use crate::slot_table::SlotTable;
use crate::{compose_root, next_composition_id, skip_to_group_end, CompositionId};

/// Counters describing the most recent pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PassStats {
    /// Entries in the change list handed to the applier.
    pub changes: usize,
    /// Existing scopes whose bodies ran again.
    pub restarted: usize,
}

/// A slot table, the applier it drives and the root content.
pub struct Composition<A: Applier> {
    id: CompositionId,
    table: SlotTable,
    applier: A,
    runtime: RuntimeHandle,
    sink: InvalidationSink,
    content: Option<Rc<RefCell<dyn FnMut()>>>,
    last_pass: PassStats,
}

impl<A: Applier> Composition<A> {
    pub fn new(applier: A, runtime: &Runtime) -> Self {
        Self {
            id: next_composition_id(),
            table: SlotTable::new(),
            applier,
            runtime: runtime.handle(),
            sink: runtime.invalidation_sink(),
            content: None,
            last_pass: PassStats::default(),
        }
    }

    pub fn id(&self) -> CompositionId {
        self.id
    }

    /// Replaces the root content and composes it.
    pub fn set_content(&mut self, content: impl FnMut() + 'static) -> Result<(), NodeError> {
        self.content = Some(Rc::new(RefCell::new(content)));
        self.compose()
    }

    /// Runs the root content against the whole table.
    pub fn compose(&mut self) -> Result<(), NodeError> {
        let scopes = self.take_own_scopes();
        self.run_pass(scopes, false)
    }

    /// Restarts only the invalidated scopes that belong to this composition.
    pub fn recompose(&mut self) -> Result<(), NodeError> {
        let scopes = self.take_own_scopes();
        self.recompose_scopes(scopes)
    }

    pub fn recompose_scopes(&mut self, scopes: Vec<RecomposeScope>) -> Result<(), NodeError> {
        if scopes.is_empty() {
            self.last_pass = PassStats::default();
            return Ok(());
        }
        self.run_pass(scopes, true)
    }

    fn take_own_scopes(&self) -> Vec<RecomposeScope> {
        let (own, others): (Vec<_>, Vec<_>) = self
            .runtime
            .take_invalid_scopes()
            .into_iter()
            .partition(|scope| scope.owner() == self.id);
        self.runtime.requeue(&others);
        own
    }

    pub fn has_invalidations(&self) -> bool {
        self.runtime.has_invalidations()
    }

    fn run_pass(&mut self, scopes: Vec<RecomposeScope>, navigating: bool) -> Result<(), NodeError> {
        log::trace!(
            "composition {} pass: {} invalid scopes, navigating={navigating}",
            self.id,
            scopes.len()
        );
        let content = self.content.clone();
        let mut composer = Composer::new(
            &self.table,
            self.runtime.clone(),
            self.sink.clone(),
            self.id,
            scopes,
            navigating,
        );
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            composer.install(|| {
                if navigating {
                    skip_to_group_end();
                } else if let Some(content) = content {
                    compose_root(content);
                }
            })
        }));
        if outcome.is_err() {
            log::warn!("composition {} pass unwound; closing open groups", self.id);
            composer.abandon();
        }
        let mut output = composer.finish();

        output.leftover.retain(|scope| scope.location().is_some());
        self.runtime.requeue(&output.leftover);
        let stats = PassStats {
            changes: output.changes.len(),
            restarted: output.restarted,
        };
        let applied = output.changes.apply(&mut self.applier);
        if !output.lifecycle.is_empty() {
            log::trace!("composition {} dispatching lifecycle events", self.id);
            output.lifecycle.dispatch();
        }
        #[cfg(feature = "verify-slots")]
        self.table.verify_well_formed();
        self.last_pass = stats;
        log::debug!(
            "composition {} pass: {} changes, {} scopes restarted",
            self.id,
            stats.changes,
            stats.restarted
        );

        if let Err(payload) = outcome {
            panic::resume_unwind(payload);
        }
        applied
    }

    /// Removes everything, notifying remembered observers and clearing the applier.
    pub fn dispose(&mut self) -> Result<(), NodeError> {
        let removed = self.table.write(|writer| {
            let len = writer.len();
            writer.remove(0, len)
        });
        let mut lifecycle = LifecycleEvents::default();
        lifecycle.leave_all(removed.observers);
        let cleared = self.applier.clear();
        lifecycle.dispatch();
        self.content = None;
        self.last_pass = PassStats::default();
        cleared
    }

    pub fn last_pass(&self) -> PassStats {
        self.last_pass
    }

    pub fn applier(&self) -> &A {
        &self.applier
    }

    pub fn applier_mut(&mut self) -> &mut A {
        &mut self.applier
    }

    pub fn slot_table(&self) -> &SlotTable {
        &self.table
    }
}

impl<A: Applier> Recompose for Composition<A> {
    fn composition_id(&self) -> CompositionId {
        self.id
    }

    fn recompose_scopes(&mut self, scopes: Vec<RecomposeScope>) -> Result<(), NodeError> {
        Composition::recompose_scopes(self, scopes)
    }
}
