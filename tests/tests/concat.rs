mod support;

use std::sync::Arc;

use changeset::{apply, concat, ConflictAction, Op, Value};

use support::MockConnection;

fn record(table_setup: impl FnOnce(&Arc<MockConnection>, &changeset::SessionRegistry<MockConnection>)) -> Vec<u8> {
    let conn = MockConnection::new();
    conn.create_table("t", &["id", "val"], &[true, false]);
    let registry = changeset::SessionRegistry::new();
    let session = registry.create(Arc::clone(&conn), "main");
    session.attach("t");
    table_setup(&conn, &registry);
    session.changeset().unwrap()
}

#[test]
fn concat_keeps_both_inserts_for_distinct_keys() {
    let a = record(|conn, registry| {
        conn.do_insert(registry, "t", vec![Value::Int64(1), Value::Text("a".into())]);
    });
    let b = record(|conn, registry| {
        conn.do_insert(registry, "t", vec![Value::Int64(2), Value::Text("b".into())]);
    });

    let merged = concat(&a, &b).unwrap();

    let target = MockConnection::new();
    target.create_table("t", &["id", "val"], &[true, false]);
    apply(&*target, &merged, |_, _, _: Op, _| ConflictAction::Omit, || false).unwrap();

    assert_eq!(target.row_count("t"), 2);
    assert_eq!(target.row("t", 1), Some(vec![Value::Int64(1), Value::Text("a".into())]));
    assert_eq!(target.row("t", 2), Some(vec![Value::Int64(2), Value::Text("b".into())]));
}

#[test]
fn concat_lets_the_later_changeset_win_for_a_shared_key() {
    let a = record(|conn, registry| {
        conn.do_insert(registry, "t", vec![Value::Int64(1), Value::Text("first".into())]);
    });
    let b = record(|conn, registry| {
        conn.do_insert(registry, "t", vec![Value::Int64(1), Value::Text("second".into())]);
    });

    let merged = concat(&a, &b).unwrap();

    let target = MockConnection::new();
    target.create_table("t", &["id", "val"], &[true, false]);
    apply(&*target, &merged, |_, _, _: Op, _| ConflictAction::Omit, || false).unwrap();

    assert_eq!(target.row_count("t"), 1);
    assert_eq!(
        target.row("t", 1),
        Some(vec![Value::Int64(1), Value::Text("second".into())])
    );
}
