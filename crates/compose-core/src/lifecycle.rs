use std::rc::Rc;

/// Capability of a remembered value to hear when it enters or leaves a composition.
///
/// `on_enter` runs once after the value is first placed into a live group,
/// `on_leave` once after that group is permanently removed. Moving the group
/// triggers neither.
pub trait LifecycleObserver {
    fn on_enter(&self) {}
    fn on_leave(&self) {}
}

/// Lifecycle notifications and side effects collected during a pass and
/// dispatched after apply.
#[derive(Default)]
pub(crate) struct LifecycleEvents {
    entering: Vec<Rc<dyn LifecycleObserver>>, // FUTURE(no_std): replace Vec with ring buffer.
    leaving: Vec<Rc<dyn LifecycleObserver>>,
    side_effects: Vec<Box<dyn FnOnce()>>,
}

impl LifecycleEvents {
    pub(crate) fn enter(&mut self, observer: Rc<dyn LifecycleObserver>) {
        self.entering.push(observer);
    }

    pub(crate) fn leave(&mut self, observer: Rc<dyn LifecycleObserver>) {
        self.leaving.push(observer);
    }

    pub(crate) fn leave_all(&mut self, observers: Vec<Rc<dyn LifecycleObserver>>) {
        self.leaving.extend(observers);
    }

    pub(crate) fn side_effect(&mut self, effect: Box<dyn FnOnce()>) {
        self.side_effects.push(effect);
    }

    /// Drops queued side effects; a pass that unwound never commits them.
    pub(crate) fn discard_side_effects(&mut self) {
        self.side_effects.clear();
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entering.is_empty() && self.leaving.is_empty() && self.side_effects.is_empty()
    }

    /// Leaves run first, newest placement first; enters follow in placement
    /// order, then side effects in the order they were recorded.
    pub(crate) fn dispatch(self) {
        for observer in self.leaving.iter().rev() {
            observer.on_leave();
        }
        for observer in &self.entering {
            observer.on_enter();
        }
        for effect in self.side_effects {
            effect();
        }
    }
}
