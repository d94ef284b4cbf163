use std::cell::RefCell;
use std::rc::Rc;

use compose_core::{remember_observer, with_key, DisposableEffect, MutableState};
use compose_testing::prelude::*;

fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|name| name.to_string()).collect()
}

fn contact_list(rule: &ComposeTestRule, initial: &[&str]) -> MutableState<Vec<String>> {
    let contacts = MutableState::new(names(initial), &rule.runtime_handle());
    {
        let contacts = contacts.clone();
        rule.set_content(move || {
            let list = contacts.get();
            Column(move || {
                for name in list {
                    with_key(&name, || Text(name.clone()));
                }
            });
        })
        .unwrap();
    }
    rule.take_ops();
    contacts
}

#[test]
fn first_frame_builds_the_list() {
    let rule = ComposeTestRule::new();
    let contacts = MutableState::new(names(&["ada", "bob"]), &rule.runtime_handle());
    {
        let contacts = contacts.clone();
        rule.set_content(move || {
            let list = contacts.get();
            Column(move || {
                for name in list {
                    with_key(&name, || Text(name.clone()));
                }
            });
        })
        .unwrap();
    }

    assert_eq!(
        rule.take_ops(),
        vec![
            AppliedOp::Insert {
                index: 0,
                node: "column".into()
            },
            AppliedOp::Down("column".into()),
            AppliedOp::Insert {
                index: 0,
                node: "text".into()
            },
            AppliedOp::Insert {
                index: 1,
                node: "text".into()
            },
            AppliedOp::Up,
        ]
    );
    assert_eq!(rule.dump(), "root\n  column\n    text(ada)\n    text(bob)\n");
    assert_eq!(contacts.observer_count(), 1);
}

#[test]
fn moving_the_last_contact_to_the_front_is_one_move() {
    let rule = ComposeTestRule::new();
    let contacts = contact_list(&rule, &["ada", "bob", "cy"]);

    contacts.set(names(&["cy", "ada", "bob"]));
    assert_eq!(rule.next_frame().unwrap(), 1);

    assert_eq!(
        rule.take_ops(),
        vec![
            AppliedOp::Down("column".into()),
            AppliedOp::Move {
                from: 2,
                to: 0,
                count: 1
            },
            AppliedOp::Up,
        ]
    );
    assert_eq!(
        rule.dump(),
        "root\n  column\n    text(cy)\n    text(ada)\n    text(bob)\n"
    );
    rule.verify();
}

#[test]
fn dropping_the_tail_removes_one_node() {
    let rule = ComposeTestRule::new();
    let contacts = contact_list(&rule, &["ada", "bob", "cy"]);

    contacts.set(names(&["ada", "bob"]));
    rule.next_frame().unwrap();

    assert_eq!(
        rule.take_ops(),
        vec![
            AppliedOp::Down("column".into()),
            AppliedOp::Remove { index: 2, count: 1 },
            AppliedOp::Up,
        ]
    );
    assert_eq!(rule.dump(), "root\n  column\n    text(ada)\n    text(bob)\n");
    rule.verify();
}

#[test]
fn shuffles_keep_every_node_instance() {
    let rule = ComposeTestRule::new();
    let contacts = contact_list(&rule, &["ada", "bob", "cy", "dee"]);
    let column = rule.with_composition(|composition| composition.applier().root().children()[0].clone());
    let before = column.children();

    contacts.set(names(&["dee", "bob", "ada", "cy"]));
    rule.next_frame().unwrap();

    let after = column.children();
    let texts: Vec<String> = after.iter().map(|node| node.text()).collect();
    assert_eq!(texts, names(&["dee", "bob", "ada", "cy"]));
    for node in &after {
        assert!(before.iter().any(|old| Rc::ptr_eq(old, node)));
    }
    assert!(rule
        .take_ops()
        .iter()
        .all(|op| !matches!(op, AppliedOp::Insert { .. } | AppliedOp::Remove { .. })));
    rule.verify();
}

#[test]
fn removed_contacts_leave_newest_first() {
    let rule = ComposeTestRule::new();
    let recorder = LifecycleRecorder::new();
    let shown = MutableState::new(names(&["ada", "bob", "cy"]), &rule.runtime_handle());
    {
        let shown = shown.clone();
        let recorder = recorder.clone();
        rule.set_content(move || {
            for name in shown.get() {
                let recorder = recorder.clone();
                with_key(&name, || {
                    remember_observer(|| recorder.observer(name.clone()));
                    Text(name.clone());
                });
            }
        })
        .unwrap();
    }
    assert_eq!(recorder.take(), vec!["enter ada", "enter bob", "enter cy"]);

    shown.set(names(&["bob"]));
    rule.next_frame().unwrap();
    let mut left = recorder.take();
    left.sort();
    assert_eq!(left, vec!["leave ada", "leave cy"]);

    shown.set(Vec::new());
    rule.next_frame().unwrap();
    assert_eq!(recorder.take(), vec!["leave bob"]);
    assert!(rule.root_labels().is_empty());
}

#[test]
fn dispose_clears_the_tree() {
    let rule = ComposeTestRule::new();
    let recorder = LifecycleRecorder::new();
    {
        let recorder = recorder.clone();
        rule.set_content(move || {
            remember_observer(|| recorder.observer("screen"));
            Column(|| Text("hello".to_string()));
        })
        .unwrap();
    }
    assert_eq!(recorder.take(), vec!["enter screen"]);

    rule.dispose().unwrap();

    assert_eq!(recorder.take(), vec!["leave screen"]);
    assert_eq!(rule.dump(), "root\n");
}

#[test]
fn row_effects_follow_their_rows_through_a_reorder() {
    let rule = ComposeTestRule::new();
    let contacts = MutableState::new(names(&["ada", "bob", "cy"]), &rule.runtime_handle());
    let log: Rc<RefCell<Vec<String>>> = Rc::default();
    {
        let contacts = contacts.clone();
        let log = log.clone();
        rule.set_content(move || {
            let list = contacts.get();
            let log = log.clone();
            Column(move || {
                for name in list {
                    let log = log.clone();
                    with_key(&name, || {
                        Text(name.clone());
                        let row = name.clone();
                        DisposableEffect(&name, move |scope| {
                            log.borrow_mut().push(format!("open {row}"));
                            scope.on_dispose(move || log.borrow_mut().push(format!("close {row}")))
                        });
                    });
                }
            });
        })
        .unwrap();
    }
    assert_eq!(
        log.borrow_mut().drain(..).collect::<Vec<_>>(),
        ["open ada", "open bob", "open cy"]
    );

    contacts.set(names(&["cy", "ada"]));
    rule.next_frame().unwrap();

    assert_eq!(rule.dump(), "root\n  column\n    text(cy)\n    text(ada)\n");
    assert_eq!(log.borrow_mut().drain(..).collect::<Vec<_>>(), ["close bob"]);
    rule.verify();
}
