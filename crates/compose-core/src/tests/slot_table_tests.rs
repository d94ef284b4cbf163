use super::*;
use crate::applier::NodeRef;

/// Writes `keys` as sibling groups at the root, each holding one value.
fn sibling_table(keys: &[Key]) -> SlotTable {
    let table = SlotTable::new();
    table.write(|writer| {
        writer.begin_insert();
        for &key in keys {
            writer.start_group(key, None);
            writer.update(key as i32);
            writer.end_group();
        }
        writer.end_insert();
    });
    table
}

fn root_keys(table: &SlotTable) -> Vec<Key> {
    table.read(|reader| {
        let mut keys = Vec::new();
        while reader.current() < reader.group_end_of_parent() {
            keys.push(reader.group_key());
            reader.skip_group();
        }
        keys
    })
}

#[test]
fn inserted_values_read_back_in_order() {
    let table = SlotTable::new();
    table.write(|writer| {
        writer.begin_insert();
        for value in 0..100 {
            writer.update(value);
        }
        writer.end_insert();
    });

    assert_eq!(table.len(), 100);
    let values: Vec<i32> = table.read(|reader| {
        (0..100)
            .map(|_| *reader.next().downcast_ref::<i32>().unwrap())
            .collect()
    });
    assert_eq!(values, (0..100).collect::<Vec<_>>());
    table.verify_well_formed();
}

#[test]
fn single_group_is_well_formed() {
    let table = SlotTable::new();
    table.write(|writer| {
        writer.begin_insert();
        writer.start_group(37, None);
        writer.end_group();
        writer.end_insert();
    });

    table.verify_well_formed();
    table.read(|reader| {
        assert!(reader.is_group());
        assert_eq!(reader.group_key(), 37);
        assert_eq!(reader.group_size(), 0);
    });
}

#[test]
fn removing_an_anchored_group_invalidates_only_its_anchor() {
    let table = sibling_table(&[1, 2, 3, 4, 5, 6, 7]);
    let (fourth, later) = table.write(|writer| {
        let later: Vec<Anchor> = [8, 10, 12].iter().map(|&loc| writer.anchor(loc)).collect();
        (writer.anchor(6), later)
    });
    assert_eq!(fourth.location(), Some(6));

    table.write(|writer| {
        writer.skip_n(6);
        let removed = writer.remove(6, 2);
        assert!(removed.invalidated_anchors);
        writer.skip_to_group_end();
    });

    assert_eq!(fourth.location(), None);
    assert!(!fourth.is_valid());
    let locations: Vec<Option<usize>> = later.iter().map(Anchor::location).collect();
    assert_eq!(locations, vec![Some(6), Some(8), Some(10)]);
    table.read(|reader| {
        for (anchor, key) in later.iter().zip([5, 6, 7]) {
            reader.reposition(anchor.location().unwrap());
            assert_eq!(reader.group_key(), key);
        }
    });
    assert_eq!(root_keys(&table), vec![1, 2, 3, 5, 6, 7]);
    table.verify_well_formed();
}

#[test]
fn anchors_at_one_location_are_shared() {
    let table = sibling_table(&[1, 2]);
    table.write(|writer| {
        let first = writer.anchor(2);
        let second = writer.anchor(2);
        assert_eq!(first, second);
        assert_ne!(first, writer.anchor(0));
    });
    let outside = table.write(|writer| writer.anchor(2));
    let again = table.write(|writer| writer.anchor(2));
    assert_eq!(outside, again);
    assert!(table.owns_anchor(&outside));
}

#[test]
fn anchors_follow_insertions_before_them() {
    let table = sibling_table(&[1, 2]);
    let anchor = table.write(|writer| writer.anchor(2));

    table.write(|writer| {
        writer.begin_insert();
        writer.start_group(9, None);
        writer.update("inserted");
        writer.update("twice");
        writer.end_group();
        writer.end_insert();
        writer.skip_to_group_end();
    });

    assert_eq!(anchor.location(), Some(5));
    assert_eq!(root_keys(&table), vec![9, 1, 2]);
    table.verify_well_formed();
}

#[test]
fn move_group_keeps_anchor_and_contents() {
    let table = sibling_table(&[1, 2, 3]);
    let third = table.write(|writer| writer.anchor(4));

    table.write(|writer| {
        writer.move_group(2);
        assert_eq!(writer.group_key(), 3);
        writer.skip_to_group_end();
    });

    assert_eq!(third.location(), Some(0));
    assert_eq!(root_keys(&table), vec![3, 1, 2]);
    table.read(|reader| {
        reader.start_group();
        assert_eq!(reader.next().downcast_ref::<i32>(), Some(&3));
        reader.end_group();
    });
    table.verify_well_formed();
}

#[test]
fn move_group_steps_over_loose_values() {
    let table = SlotTable::new();
    table.write(|writer| {
        writer.begin_insert();
        writer.update("loose");
        writer.start_group(1, None);
        writer.end_group();
        writer.start_group(2, None);
        writer.end_group();
        writer.end_insert();
    });

    table.write(|writer| {
        writer.move_group(1);
        writer.skip_to_group_end();
    });

    table.read(|reader| {
        assert_eq!(reader.group_key(), 2);
        reader.skip_group();
        assert_eq!(reader.next().downcast_ref::<&str>(), Some(&"loose"));
        assert_eq!(reader.group_key(), 1);
    });
}

#[test]
fn move_from_transfers_group_and_anchors() {
    let source = SlotTable::new();
    source.write(|writer| {
        writer.begin_insert();
        writer.start_group(1, None);
        writer.start_group(2, None);
        writer.start_node(3, None);
        writer.update(Rc::new(()) as NodeRef);
        writer.end_node();
        writer.end_group();
        writer.end_group();
        writer.end_insert();
    });
    let inner = source.write(|writer| writer.anchor(1));

    let destination = sibling_table(&[7]);
    let moved = destination.write(|writer| {
        writer.skip_group();
        writer.begin_insert();
        let moved = writer.move_from(&source, 1);
        writer.end_insert();
        moved
    });

    assert_eq!(moved, vec![inner.clone()]);
    assert_eq!(inner.location(), Some(2));
    assert!(destination.owns_anchor(&inner));
    assert!(!source.owns_anchor(&inner));
    assert_eq!(root_keys(&destination), vec![7, 2]);
    destination.read(|reader| {
        reader.reposition(2);
        assert_eq!(reader.group_nodes(), 1);
    });
    source.read(|reader| {
        assert_eq!(reader.group_key(), 1);
        assert_eq!(reader.group_size(), 0);
        assert_eq!(reader.group_nodes(), 0);
    });
    source.verify_well_formed();
    destination.verify_well_formed();
}

#[test]
fn node_counts_propagate_to_the_nearest_node() {
    let table = SlotTable::new();
    table.write(|writer| {
        writer.begin_insert();
        writer.start_group(1, None);
        writer.start_node(2, None);
        writer.update(Rc::new(()) as NodeRef);
        writer.start_group(3, None);
        for key in 4..7 {
            writer.start_node(key, None);
            writer.update(Rc::new(()) as NodeRef);
            writer.end_node();
        }
        writer.end_group();
        writer.end_node();
        writer.end_group();
        writer.end_insert();
    });

    table.read(|reader| {
        assert_eq!(reader.group_nodes(), 1);
        reader.start_group();
        assert!(reader.is_node());
        assert_eq!(reader.group_nodes(), 3);
        reader.start_node();
        assert_eq!(reader.group_nodes(), 3);
        assert_eq!(reader.skip_group(), 3);
        assert_eq!(reader.end_node(), 1);
        assert_eq!(reader.end_group(), 1);
    });

    table.write(|writer| {
        writer.start_group(1, None);
        writer.start_node(2, None);
        writer.skip_n(1);
        writer.start_group(3, None);
        writer.skip_group();
        let removed = writer.remove_group();
        assert_eq!(removed.nodes, 1);
        writer.skip_to_group_end();
        writer.end_group();
        writer.end_node();
        writer.end_group();
    });

    table.read(|reader| {
        reader.start_group();
        assert_eq!(reader.group_nodes(), 2);
    });
    table.verify_well_formed();
}

#[test]
fn group_path_lists_enclosing_groups() {
    let table = SlotTable::new();
    table.write(|writer| {
        writer.begin_insert();
        writer.start_group(1, None);
        writer.update(0);
        writer.start_group(2, None);
        writer.start_group(3, None);
        writer.update(0);
        writer.end_group();
        writer.end_group();
        writer.end_group();
        writer.start_group(4, None);
        writer.end_group();
        writer.end_insert();
    });

    assert_eq!(table.group_path_to(4), vec![0, 2, 3]);
    assert_eq!(table.group_path_to(3), vec![0, 2, 3]);
    assert_eq!(table.group_path_to(1), vec![0]);
    assert_eq!(table.group_path_to(5), vec![5]);
}

#[test]
fn extract_keys_lists_siblings_from_the_cursor() {
    let table = SlotTable::new();
    table.write(|writer| {
        writer.begin_insert();
        writer.start_group(1, Some(10));
        writer.end_group();
        writer.update("value");
        writer.start_node(2, None);
        writer.update(Rc::new(()) as NodeRef);
        writer.end_node();
        writer.end_insert();
    });

    let keys = table.read(|reader| reader.extract_keys());
    assert_eq!(keys.len(), 2);
    assert_eq!((keys[0].key, keys[0].data_key, keys[0].location), (1, Some(10), 0));
    assert_eq!((keys[1].key, keys[1].location, keys[1].nodes), (2, 2, 1));
    assert!(keys[1].is_node);
    assert_eq!(keys[1].index, 1);
}

#[test]
fn empty_mode_yields_sentinels() {
    let table = sibling_table(&[1]);
    table.read(|reader| {
        reader.begin_empty();
        assert!(reader.next().is_empty());
        assert!(!reader.is_group());
        reader.start_group();
        assert_eq!(reader.end_group(), 0);
        assert!(reader.extract_keys().is_empty());
        reader.end_empty();
        assert_eq!(reader.group_key(), 1);
    });
}

#[test]
fn removing_random_groups_keeps_table_well_formed() {
    let table = SlotTable::new();
    table.write(|writer| {
        writer.begin_insert();
        for outer in 0..20u64 {
            writer.start_group(outer, None);
            for inner in 0..(outer % 4) {
                writer.start_node(100 + inner, None);
                writer.update(Rc::new(()) as NodeRef);
                writer.update(inner);
                writer.end_node();
            }
            writer.end_group();
        }
        writer.end_insert();
    });

    let mut seed = 0x2545_f491_u64;
    for _ in 0..10 {
        seed ^= seed << 13;
        seed ^= seed >> 7;
        seed ^= seed << 17;
        let remaining = root_keys(&table).len();
        let victim = (seed % remaining as u64) as usize;
        table.write(|writer| {
            for _ in 0..victim {
                writer.skip_group();
            }
            writer.remove_group();
            writer.skip_to_group_end();
        });
        table.verify_well_formed();
    }
    assert_eq!(root_keys(&table).len(), 10);
}

#[test]
fn table_grows_past_its_initial_capacity() {
    let table = SlotTable::with_capacity(4);
    table.write(|writer| {
        writer.begin_insert();
        for key in 0..300u64 {
            writer.start_group(key, None);
            writer.update(key);
            writer.end_group();
        }
        writer.end_insert();
    });
    assert_eq!(table.len(), 600);
    assert_eq!(root_keys(&table).len(), 300);

    // Editing in the middle moves the gap there and back.
    table.write(|writer| {
        for _ in 0..150 {
            writer.skip_group();
        }
        writer.remove_group();
        writer.begin_insert();
        writer.start_group(999, None);
        writer.end_group();
        writer.end_insert();
        writer.skip_to_group_end();
    });
    let keys = root_keys(&table);
    assert_eq!(keys[150], 999);
    assert_eq!(keys[151], 151);
    table.verify_well_formed();
}

#[test]
fn remembered_observers_are_reported_on_removal() {
    struct Probe(Rc<Cell<usize>>);
    impl LifecycleObserver for Probe {
        fn on_leave(&self) {
            self.0.set(self.0.get() + 1);
        }
    }

    let left = Rc::new(Cell::new(0));
    let table = SlotTable::new();
    table.write(|writer| {
        writer.begin_insert();
        writer.start_group(1, None);
        let probe: Rc<dyn LifecycleObserver> = Rc::new(Probe(left.clone()));
        writer.update_slot(SlotValue {
            value: Box::new(()),
            observer: Some(probe),
        });
        writer.end_group();
        writer.end_insert();
    });

    let removed = table.write(|writer| writer.remove_group());
    assert_eq!(removed.observers.len(), 1);
    for observer in removed.observers {
        observer.on_leave();
    }
    assert_eq!(left.get(), 1);
    assert!(table.is_empty());
}

#[test]
fn anchor_location_ignores_foreign_anchors() {
    let first = sibling_table(&[1, 2]);
    let second = sibling_table(&[1, 2]);
    let anchor = first.write(|writer| writer.anchor(2));

    assert_eq!(first.anchor_location(&anchor), Some(2));
    assert_eq!(second.anchor_location(&anchor), None);
}

#[test]
fn for_each_slot_visits_headers_and_values() {
    let table = sibling_table(&[5, 6]);
    let mut seen = Vec::new();
    table.for_each_slot(|index, slot| {
        let kind = if slot.is_group() {
            "group"
        } else if slot.downcast_ref::<i32>().is_some() {
            "value"
        } else {
            "other"
        };
        seen.push((index, kind));
    });
    assert_eq!(
        seen,
        vec![(0, "group"), (1, "value"), (2, "group"), (3, "value")]
    );
}

#[test]
fn readers_may_overlap() {
    let table = sibling_table(&[1]);
    let first = table.open_reader();
    let second = table.open_reader();
    assert_eq!(first.current(), second.current());
}

#[test]
#[should_panic(expected = "cannot start a writer when a reader is pending")]
fn writer_rejected_while_reading() {
    let table = SlotTable::new();
    let _reader = table.open_reader();
    let _writer = table.open_writer();
}

#[test]
#[should_panic(expected = "cannot start a writer when another writer is pending")]
fn second_writer_rejected() {
    let table = SlotTable::new();
    let _first = table.open_writer();
    let _second = table.open_writer();
}

#[test]
#[should_panic(expected = "cannot read while a writer is pending")]
fn reader_rejected_while_writing() {
    let table = SlotTable::new();
    let _writer = table.open_writer();
    let _reader = table.open_reader();
}

#[test]
#[should_panic(expected = "writer closed with 1 open groups")]
fn unbalanced_writer_is_fatal() {
    let table = SlotTable::new();
    table.write(|writer| {
        writer.begin_insert();
        writer.start_group(1, None);
        writer.end_insert();
    });
}

#[test]
#[should_panic(expected = "end_group at")]
fn ending_a_group_early_is_fatal() {
    let table = sibling_table(&[1]);
    table.write(|writer| {
        writer.start_group(1, None);
        writer.end_group();
    });
}

#[test]
#[should_panic(expected = "cannot skip past the end of a group")]
fn skipping_past_group_end_is_fatal() {
    let table = sibling_table(&[1]);
    table.write(|writer| {
        writer.start_group(1, None);
        writer.skip_n(2);
    });
}

#[test]
#[should_panic(expected = "cannot dereference an invalidated anchor")]
fn dereferencing_a_removed_anchor_is_fatal() {
    let table = sibling_table(&[1, 2]);
    let anchor = table.write(|writer| writer.anchor(0));
    table.write(|writer| {
        writer.remove_group();
        writer.skip_to_group_end();
    });
    anchor.expect_location();
}

#[test]
#[should_panic(expected = "cannot read while a writer is pending")]
fn anchor_lookup_rejected_while_writing() {
    let table = sibling_table(&[1, 2]);
    let anchor = table.write(|writer| writer.anchor(2));
    let _writer = table.open_writer();
    table.anchor_location(&anchor);
}

#[test]
#[should_panic(expected = "cannot read while a writer is pending")]
fn group_path_rejected_while_writing() {
    let table = sibling_table(&[1, 2]);
    let _writer = table.open_writer();
    table.group_path_to(0);
}
