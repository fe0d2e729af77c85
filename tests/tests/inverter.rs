mod support;

use std::sync::Arc;

use changeset::{apply, invert, ChangesetIter, ConflictAction, IterOutcome, Op, Value};
use common::err::CsError;

use support::MockConnection;

fn record_insert(conn: &Arc<MockConnection>, id: i64, val: &str) -> Vec<u8> {
    conn.create_table("t", &["id", "val"], &[true, false]);
    let registry = changeset::SessionRegistry::new();
    let session = registry.create(Arc::clone(conn), "main");
    session.attach("t");
    conn.do_insert(&registry, "t", vec![Value::Int64(id), Value::Text(val.to_string())]);
    session.changeset().unwrap()
}

#[test]
fn inverted_delete_undoes_an_applied_insert() {
    let source = MockConnection::new();
    let cs = record_insert(&source, 1, "a");
    let inverted = invert(&cs).unwrap();

    let target = MockConnection::new();
    target.create_table("t", &["id", "val"], &[true, false]);

    apply(&*target, &cs, |_, _, _: Op, _| ConflictAction::Omit, || false).unwrap();
    assert_eq!(target.row_count("t"), 1);

    apply(&*target, &inverted, |_, _, _: Op, _| ConflictAction::Omit, || false).unwrap();
    assert_eq!(target.row_count("t"), 0);
}

#[test]
fn double_inversion_is_identity() {
    let source = MockConnection::new();
    let cs = record_insert(&source, 1, "a");
    let once = invert(&cs).unwrap();
    let twice = invert(&once).unwrap();
    assert_eq!(twice, cs);
}

#[test]
fn invert_changes_op_but_not_the_row_shape() {
    let source = MockConnection::new();
    let cs = record_insert(&source, 7, "x");
    let inverted = invert(&cs).unwrap();

    let mut it = ChangesetIter::start(&inverted);
    assert_eq!(it.next().unwrap(), IterOutcome::Row);
    assert_eq!(it.op().unwrap(), Op::Delete);
    assert_eq!(*it.old(0).unwrap(), Value::Int64(7));
    assert_eq!(*it.old(1).unwrap(), Value::Text("x".into()));
}

#[test]
fn truncated_record_is_rejected_as_corrupt() {
    let source = MockConnection::new();
    let cs = record_insert(&source, 1, "a");
    let truncated = &cs[..cs.len() - 1];
    let err = ChangesetIter::start(truncated).next().unwrap_err();
    assert!(matches!(err, CsError::CorruptFormat(_)));
}

#[test]
fn unknown_op_byte_is_rejected_as_corrupt() {
    let source = MockConnection::new();
    let mut cs = record_insert(&source, 1, "a");
    // Table header for a single-char table name "t" with 2 columns is
    // exactly 6 bytes ('T', varint(2), 2 pk flags, "t\0"); the op byte
    // immediately follows it.
    const OP_BYTE_POS: usize = 6;
    cs[OP_BYTE_POS] = 0x99;
    let err = ChangesetIter::start(&cs).next().unwrap_err();
    assert!(matches!(err, CsError::CorruptFormat(_)));
}
