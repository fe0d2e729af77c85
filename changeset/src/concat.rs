//! Changeset concatenation, modeled on the documented behavior of
//! `sqlite3changeset_concat`: groups for the same table are merged,
//! with `b`'s record winning over `a`'s for a shared PK; groups
//! present in only one input are carried through unchanged.

use common::err::CsResult;

use crate::fuzz::{parse, serialize, ParsedRecord, TableGroup};

/// Concatenates `a` then `b` into a single well-formed changeset.
pub fn concat(a: &[u8], b: &[u8]) -> CsResult<Vec<u8>> {
    let groups_a = parse(a)?;
    let groups_b = parse(b)?;

    let mut merged: Vec<TableGroup> = groups_a;
    for group_b in groups_b {
        match merged.iter_mut().find(|g| g.name == group_b.name) {
            Some(existing) => merge_group(existing, group_b),
            None => merged.push(group_b),
        }
    }
    serialize(&merged)
}

fn merge_group(existing: &mut TableGroup, incoming: TableGroup) {
    for record in incoming.records {
        let pk_match = |r: &ParsedRecord| pk_of(r, &existing.pk) == pk_of(&record, &existing.pk);
        if let Some(slot) = existing.records.iter().position(pk_match) {
            existing.records[slot] = record;
        } else {
            existing.records.push(record);
        }
    }
}

/// The PK-column values carried by a record, read from whichever
/// image (OLD or NEW) the op actually populates -- used only to
/// identify which existing record a later one supersedes.
fn pk_of(record: &ParsedRecord, pk: &[bool]) -> Vec<crate::value::Value> {
    let image = if !record.old.is_empty() {
        &record.old
    } else {
        &record.new
    };
    pk.iter()
        .enumerate()
        .filter(|(_, &is_pk)| is_pk)
        .map(|(i, _)| image[i].clone())
        .collect()
}
