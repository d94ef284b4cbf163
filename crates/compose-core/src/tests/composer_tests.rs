use super::*;
use crate::collections::map::HashMap;
use compose_macros::composable;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

fn new_composition() -> (Runtime, Composition<MemoryApplier>) {
    let runtime = Runtime::new(Arc::new(DefaultScheduler));
    let composition = Composition::new(MemoryApplier::new(), &runtime);
    (runtime, composition)
}

#[track_caller]
fn node(name: &str, content: impl FnOnce()) {
    let label = name.to_string();
    emit_node(
        || MemoryNode::new(name),
        move || {
            update_node(label, |node: &MemoryNode, label: &String| {
                *node.name.borrow_mut() = label.clone();
            });
            content();
        },
    );
}

#[track_caller]
fn text(name: &str) {
    node(name, || {});
}

/// Shared pass counter that always compares equal, so it never forces a restart.
#[derive(Clone, Default)]
struct Runs(Rc<Cell<usize>>);

impl Runs {
    fn bump(&self) {
        self.0.set(self.0.get() + 1);
    }

    fn get(&self) -> usize {
        self.0.get()
    }
}

impl PartialEq for Runs {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

struct Tracker {
    name: &'static str,
    events: Rc<RefCell<Vec<String>>>,
}

impl LifecycleObserver for Tracker {
    fn on_enter(&self) {
        self.events.borrow_mut().push(format!("enter {}", self.name));
    }

    fn on_leave(&self) {
        self.events.borrow_mut().push(format!("leave {}", self.name));
    }
}

#[derive(Clone, Default)]
struct ContactProbe {
    names: Rc<RefCell<Vec<&'static str>>>,
    events: Rc<RefCell<Vec<String>>>,
    serials: Rc<RefCell<HashMap<&'static str, usize>>>,
    compound_keys: Rc<RefCell<HashMap<&'static str, Key>>>,
    next_serial: Rc<Cell<usize>>,
}

impl ContactProbe {
    fn with_names(names: &[&'static str]) -> Self {
        let probe = Self::default();
        probe.set_names(names);
        probe
    }

    fn set_names(&self, names: &[&'static str]) {
        *self.names.borrow_mut() = names.to_vec();
    }

    fn content(&self) -> impl FnMut() + 'static {
        let probe = self.clone();
        move || {
            node("list", || {
                let names = probe.names.borrow().clone();
                for name in names {
                    with_key(name, || probe.contact(name));
                }
            });
        }
    }

    fn contact(&self, name: &'static str) {
        let events = self.events.clone();
        remember_observer(move || Tracker { name, events });
        let next_serial = self.next_serial.clone();
        let serial = remember(move || {
            next_serial.set(next_serial.get() + 1);
            next_serial.get()
        })
        .get();
        self.serials.borrow_mut().insert(name, serial);
        self.compound_keys
            .borrow_mut()
            .insert(name, current_compound_key_hash());
        text(name);
    }

    fn take_events(&self) -> Vec<String> {
        std::mem::take(&mut *self.events.borrow_mut())
    }
}

fn list_dump(names: &[&str]) -> String {
    let mut dump = String::from("root\n  list\n");
    for name in names {
        dump.push_str(&format!("    {name}\n"));
    }
    dump
}

#[test]
fn first_pass_inserts_the_whole_tree() {
    let (_runtime, mut composition) = new_composition();
    composition
        .set_content(|| {
            node("column", || {
                text("a");
                text("b");
            });
        })
        .unwrap();

    assert_eq!(
        composition.applier().dump_tree(),
        "root\n  column\n    a\n    b\n"
    );
    assert!(composition.last_pass().changes > 0);
    composition.slot_table().verify_well_formed();
}

#[test]
fn unchanged_content_records_no_changes() {
    let (_runtime, mut composition) = new_composition();
    composition
        .set_content(|| {
            node("column", || {
                text("a");
                text("b");
            });
        })
        .unwrap();
    let len = composition.slot_table().len();

    composition.compose().unwrap();

    assert_eq!(composition.last_pass().changes, 0);
    assert_eq!(composition.slot_table().len(), len);
    assert_eq!(
        composition.applier().dump_tree(),
        "root\n  column\n    a\n    b\n"
    );
}

#[test]
fn changed_node_values_are_applied_in_place() {
    let (_runtime, mut composition) = new_composition();
    let label = Rc::new(RefCell::new(String::from("hello")));
    let content_label = label.clone();
    composition
        .set_content(move || {
            let current = content_label.borrow().clone();
            text(&current);
        })
        .unwrap();

    *label.borrow_mut() = String::from("world");
    composition.compose().unwrap();

    assert_eq!(composition.applier().dump_tree(), "root\n  world\n");
    assert_eq!(composition.last_pass().changes, 1);
}

#[test]
fn keyed_reorder_moves_nodes_and_keeps_remembered_values() {
    let (_runtime, mut composition) = new_composition();
    let probe = ContactProbe::with_names(&["a", "b", "c"]);
    composition.set_content(probe.content()).unwrap();
    let serials = probe.serials.borrow().clone();
    assert_eq!(
        probe.take_events(),
        vec!["enter a", "enter b", "enter c"]
    );

    probe.set_names(&["c", "a", "b"]);
    composition.compose().unwrap();

    assert_eq!(composition.applier().dump_tree(), list_dump(&["c", "a", "b"]));
    // Down into the list, one move, back up.
    assert_eq!(composition.last_pass().changes, 3);
    assert_eq!(*probe.serials.borrow(), serials);
    assert!(probe.take_events().is_empty());
    composition.slot_table().verify_well_formed();
}

#[test]
fn removing_a_keyed_child_drops_only_that_child() {
    let (_runtime, mut composition) = new_composition();
    let probe = ContactProbe::with_names(&["c", "a", "b"]);
    composition.set_content(probe.content()).unwrap();
    probe.take_events();
    let serial_b = probe.serials.borrow()["b"];

    probe.set_names(&["c", "b"]);
    composition.compose().unwrap();

    assert_eq!(composition.applier().dump_tree(), list_dump(&["c", "b"]));
    assert_eq!(probe.take_events(), vec!["leave a"]);
    assert_eq!(probe.serials.borrow()["b"], serial_b);
    composition.slot_table().verify_well_formed();
}

#[test]
fn inserting_a_keyed_child_keeps_existing_state() {
    let (_runtime, mut composition) = new_composition();
    let probe = ContactProbe::with_names(&["c", "b"]);
    composition.set_content(probe.content()).unwrap();
    probe.take_events();
    let before = probe.serials.borrow().clone();

    probe.set_names(&["c", "d", "b"]);
    composition.compose().unwrap();

    assert_eq!(composition.applier().dump_tree(), list_dump(&["c", "d", "b"]));
    assert_eq!(probe.take_events(), vec!["enter d"]);
    let after = probe.serials.borrow();
    assert_eq!(after["c"], before["c"]);
    assert_eq!(after["b"], before["b"]);
    assert!(after["d"] > before["b"].max(before["c"]));
}

#[test]
fn leaves_run_newest_first_when_everything_goes() {
    let (_runtime, mut composition) = new_composition();
    let probe = ContactProbe::with_names(&["a", "b", "c"]);
    composition.set_content(probe.content()).unwrap();
    probe.take_events();

    probe.set_names(&[]);
    composition.compose().unwrap();

    assert_eq!(
        probe.take_events(),
        vec!["leave c", "leave b", "leave a"]
    );
    assert_eq!(composition.applier().dump_tree(), "root\n  list\n");
}

#[test]
fn compound_keys_follow_identity_not_position() {
    let (_runtime, mut composition) = new_composition();
    let probe = ContactProbe::with_names(&["a", "b", "c"]);
    composition.set_content(probe.content()).unwrap();
    let first = probe.compound_keys.borrow().clone();
    assert_ne!(first["a"], first["b"]);
    assert_ne!(first["b"], first["c"]);

    probe.set_names(&["b", "c", "a"]);
    composition.compose().unwrap();

    assert_eq!(*probe.compound_keys.borrow(), first);
}

#[composable]
fn pair(prefix: String, runs: Runs) {
    runs.bump();
    text(&format!("{prefix}1"));
    text(&format!("{prefix}2"));
}

#[test]
fn skipped_restartable_keeps_following_node_indices() {
    let (_runtime, mut composition) = new_composition();
    let runs = Runs::default();
    let extra = Rc::new(Cell::new(false));
    {
        let runs = runs.clone();
        let extra = extra.clone();
        composition
            .set_content(move || {
                node("list", || {
                    pair(String::from("x"), runs.clone());
                    if extra.get() {
                        text("extra");
                    }
                });
            })
            .unwrap();
    }
    assert_eq!(runs.get(), 1);

    extra.set(true);
    composition.compose().unwrap();

    assert_eq!(runs.get(), 1);
    assert_eq!(
        composition.applier().dump_tree(),
        "root\n  list\n    x1\n    x2\n    extra\n"
    );
}

#[test]
fn restartable_reruns_when_an_argument_changes() {
    let (_runtime, mut composition) = new_composition();
    let runs = Runs::default();
    let prefix = Rc::new(RefCell::new(String::from("x")));
    {
        let runs = runs.clone();
        let prefix = prefix.clone();
        composition
            .set_content(move || pair(prefix.borrow().clone(), runs.clone()))
            .unwrap();
    }

    *prefix.borrow_mut() = String::from("y");
    composition.compose().unwrap();

    assert_eq!(runs.get(), 2);
    assert_eq!(composition.applier().dump_tree(), "root\n  y1\n  y2\n");
}

#[composable]
fn doubled(value: i32) -> i32 {
    remember(move || value * 2).get()
}

#[test]
fn value_returning_composables_run_in_their_own_group() {
    let (_runtime, mut composition) = new_composition();
    let input = Rc::new(Cell::new(4));
    let seen = Rc::new(RefCell::new(Vec::new()));
    {
        let input = input.clone();
        let seen = seen.clone();
        composition
            .set_content(move || seen.borrow_mut().push(doubled(input.get())))
            .unwrap();
    }

    input.set(5);
    composition.compose().unwrap();

    // `remember` ignores the new input; only the first value is kept.
    assert_eq!(*seen.borrow(), vec![8, 8]);
}

#[test]
fn remember_with_keys_recomputes_when_keys_change() {
    let (_runtime, mut composition) = new_composition();
    let key = Rc::new(Cell::new(1u32));
    let computed = Rc::new(Cell::new(0));
    let values = Rc::new(RefCell::new(Vec::new()));
    {
        let key = key.clone();
        let computed = computed.clone();
        let values = values.clone();
        composition
            .set_content(move || {
                let current = key.get();
                let computed = computed.clone();
                let value = remember_with_keys(current, move || {
                    computed.set(computed.get() + 1);
                    current * 10
                });
                values.borrow_mut().push(value.get());
            })
            .unwrap();
    }

    composition.compose().unwrap();
    key.set(2);
    composition.compose().unwrap();

    assert_eq!(computed.get(), 2);
    assert_eq!(*values.borrow(), vec![10, 10, 20]);
}

#[test]
fn panicking_content_closes_open_groups() {
    let (_runtime, mut composition) = new_composition();
    let explode = Rc::new(Cell::new(false));
    {
        let explode = explode.clone();
        composition
            .set_content(move || {
                node("column", || {
                    text("a");
                    if explode.get() {
                        panic!("content failed");
                    }
                    text("b");
                });
            })
            .unwrap();
    }

    explode.set(true);
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| composition.compose()));
    assert!(outcome.is_err());
    assert!(try_with_current_composer(|_| ()).is_none());
    composition.slot_table().verify_well_formed();

    explode.set(false);
    composition.compose().unwrap();
    assert_eq!(composition.last_pass().changes, 0);
    assert_eq!(
        composition.applier().dump_tree(),
        "root\n  column\n    a\n    b\n"
    );
}

#[test]
fn dispose_notifies_remembered_observers() {
    let (_runtime, mut composition) = new_composition();
    let probe = ContactProbe::with_names(&["a", "b"]);
    composition.set_content(probe.content()).unwrap();
    probe.take_events();

    composition.dispose().unwrap();

    assert_eq!(probe.take_events(), vec!["leave b", "leave a"]);
    assert!(composition.slot_table().is_empty());
    assert_eq!(composition.applier().dump_tree(), "root\n");
}

#[test]
fn composer_is_only_reachable_during_a_pass() {
    assert!(try_with_current_composer(|composer| composer.inserting()).is_none());
    let (_runtime, mut composition) = new_composition();
    let inserting = Rc::new(RefCell::new(Vec::new()));
    {
        let inserting = inserting.clone();
        composition
            .set_content(move || {
                let flag = with_current_composer(|composer| composer.inserting());
                inserting.borrow_mut().push(flag);
            })
            .unwrap();
    }
    composition.compose().unwrap();

    assert_eq!(*inserting.borrow(), vec![true, false]);
}

#[test]
#[should_panic(expected = "no composer installed")]
fn remember_outside_a_composition_panics() {
    remember(|| 1);
}
