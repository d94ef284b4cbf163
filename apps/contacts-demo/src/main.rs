#![allow(non_snake_case)]

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::mpsc;
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use compose_core::{
    emit_node, remember_observer, update_node, with_key, Composition, LifecycleObserver,
    MemoryApplier, MemoryNode, MutableState, Recomposer,
};
use compose_macros::composable;
use compose_runtime_std::StdRuntime;

const UPDATES: usize = 6;

#[derive(Clone, Debug, PartialEq)]
struct Contact {
    id: u32,
    name: String,
}

fn contact(id: u32, name: &str) -> Contact {
    Contact {
        id,
        name: name.to_string(),
    }
}

struct RowLifecycle {
    id: u32,
}

impl LifecycleObserver for RowLifecycle {
    fn on_enter(&self) {
        log::info!("row {} entered", self.id);
    }

    fn on_leave(&self) {
        log::info!("row {} left", self.id);
    }
}

#[track_caller]
fn Label(text: String) {
    emit_node(
        || MemoryNode::new(text.clone()),
        || {
            update_node(text.clone(), |node: &MemoryNode, text: &String| {
                *node.name.borrow_mut() = text.clone();
            });
        },
    );
}

#[composable]
fn ContactRow(contact: Contact) {
    let id = contact.id;
    remember_observer(move || RowLifecycle { id });
    Label(format!("#{} {}", contact.id, contact.name));
}

#[composable]
fn ContactList(contacts: MutableState<Vec<Contact>>) {
    let contacts = contacts.get();
    emit_node(
        || MemoryNode::new("contacts"),
        || {
            for contact in contacts {
                with_key(&contact.id, || ContactRow(contact.clone()));
            }
        },
    );
}

/// Rotates, renames and trims the list from a producer thread.
fn edit(step: usize, contacts: &mut Vec<Contact>) {
    match step % 3 {
        0 => contacts.rotate_right(1),
        1 => {
            if let Some(first) = contacts.first_mut() {
                first.name.push('!');
            }
        }
        _ => {
            if contacts.len() > 2 {
                contacts.pop();
            } else {
                let id = contacts.iter().map(|c| c.id).max().unwrap_or(0) + 1;
                contacts.push(contact(id, "newcomer"));
            }
        }
    }
}

fn main() {
    env_logger::init();

    let runtime = StdRuntime::new();
    let (frame_tx, frame_rx) = mpsc::channel();
    let frame_tx = Mutex::new(frame_tx);
    runtime.set_frame_waker(move || {
        if let Ok(sender) = frame_tx.lock() {
            let _ = sender.send(());
        }
    });

    let recomposer = Recomposer::new(&runtime.runtime());
    let composition = Rc::new(RefCell::new(Composition::new(
        MemoryApplier::new(),
        &runtime.runtime(),
    )));
    recomposer.register(&composition);
    let Some(task) = recomposer.launch() else {
        log::error!("runtime dropped before the recomposer started");
        return;
    };

    let contacts = MutableState::new(
        vec![
            contact(1, "Ada"),
            contact(2, "Grace"),
            contact(3, "Linus"),
            contact(4, "Barbara"),
        ],
        &runtime.runtime_handle(),
    );
    {
        let contacts = contacts.clone();
        if let Err(err) = composition
            .borrow_mut()
            .set_content(move || ContactList(contacts.clone()))
        {
            log::error!("initial composition failed: {err}");
            return;
        }
    }
    log::info!("initial tree:\n{}", composition.borrow().applier().dump_tree());

    let producer = {
        let contacts = contacts.clone();
        thread::spawn(move || {
            for step in 0..UPDATES {
                thread::sleep(Duration::from_millis(30));
                contacts.update(|list| edit(step, list));
            }
        })
    };

    let mut frames = 0;
    loop {
        match frame_rx.recv_timeout(Duration::from_millis(200)) {
            Ok(()) => {
                while frame_rx.try_recv().is_ok() {}
            }
            Err(mpsc::RecvTimeoutError::Timeout) if producer.is_finished() => break,
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
        if runtime.pump_until_idle(4) == 0 {
            continue;
        }
        frames += 1;
        let composition = composition.borrow();
        log::info!(
            "frame {frames}: {:?}\n{}",
            composition.last_pass(),
            composition.applier().dump_tree()
        );
    }

    if producer.join().is_err() {
        log::error!("producer thread panicked");
    }
    task.cancel();
    runtime.clear_frame_waker();
    if let Err(err) = composition.borrow_mut().dispose() {
        log::error!("dispose failed: {err}");
    };
}
