//! The structural fuzzer: a well-formedness-preserving random mutator
//! over a parsed changeset, plus the human-readable dump format used
//! by the single-argument fuzzer CLI mode.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use common::err::{CsError, CsResult};
use memory::Buffer;

use crate::encoder::write_table_header;
use crate::iterator::{ChangesetIter, IterOutcome};
use crate::op::Op;
use crate::value::Value;

const MAX_TRANSFORM_ATTEMPTS: usize = 64;
const TRANSFORM_COUNT: u32 = 7;

#[derive(Debug, Clone)]
pub(crate) struct ParsedRecord {
    pub op: Op,
    pub indirect: bool,
    pub old: Vec<Value>,
    pub new: Vec<Value>,
}

#[derive(Debug, Clone)]
pub(crate) struct TableGroup {
    pub name: String,
    pub pk: Vec<bool>,
    pub records: Vec<ParsedRecord>,
}

pub(crate) fn parse(changeset: &[u8]) -> CsResult<Vec<TableGroup>> {
    let mut groups: Vec<TableGroup> = Vec::new();
    let mut iter = ChangesetIter::start(changeset);
    loop {
        match iter.next()? {
            IterOutcome::Done => break,
            IterOutcome::Row => {
                let table = iter.table()?.clone();
                if groups.last().map(|g| g.name.as_str()) != Some(table.name.as_str()) {
                    groups.push(TableGroup {
                        name: table.name.clone(),
                        pk: table.pk.clone(),
                        records: Vec::new(),
                    });
                }
                let op = iter.op()?;
                let old = if op.has_old() {
                    (0..table.n_col)
                        .map(|i| iter.old(i).map(|v| v.clone()))
                        .collect::<CsResult<Vec<_>>>()?
                } else {
                    Vec::new()
                };
                let new = if op.has_new() {
                    (0..table.n_col)
                        .map(|i| iter.new_value(i).map(|v| v.clone()))
                        .collect::<CsResult<Vec<_>>>()?
                } else {
                    Vec::new()
                };
                groups.last_mut().unwrap().records.push(ParsedRecord {
                    op,
                    indirect: iter.indirect(),
                    old,
                    new,
                });
            }
        }
    }
    Ok(groups)
}

pub(crate) fn serialize(groups: &[TableGroup]) -> CsResult<Vec<u8>> {
    let mut out = Buffer::new();
    for group in groups {
        if group.records.is_empty() {
            continue;
        }
        write_table_header(&mut out, &group.name, group.pk.len(), &group.pk)?;
        for record in &group.records {
            out.append_u8(record.op.wire_byte())?;
            out.append_u8(record.indirect as u8)?;
            for v in &record.old {
                v.serialize(&mut out)?;
            }
            for v in &record.new {
                v.serialize(&mut out)?;
            }
        }
    }
    out.into_vec()
}

/// Produces one well-formedness-preserving variant of `changeset`.
pub fn generate_variant(changeset: &[u8], seed: u64) -> CsResult<Vec<u8>> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut groups = parse(changeset)?;
    apply_one_transform(&mut groups, &mut rng)?;
    serialize(&groups)
}

/// Produces `n` variants from one seed, each derived by applying one
/// more transform to the previous variant's parse tree.
pub fn generate_variants(changeset: &[u8], seed: u64, n: u32) -> CsResult<Vec<Vec<u8>>> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut groups = parse(changeset)?;
    let mut out = Vec::with_capacity(n as usize);
    for _ in 0..n {
        apply_one_transform(&mut groups, &mut rng)?;
        out.push(serialize(&groups)?);
    }
    Ok(out)
}

fn apply_one_transform(groups: &mut Vec<TableGroup>, rng: &mut StdRng) -> CsResult<()> {
    for _ in 0..MAX_TRANSFORM_ATTEMPTS {
        let applied = match rng.gen_range(0..TRANSFORM_COUNT) {
            0 => try_swap_values(groups, rng),
            1 => try_mutate_value(groups, rng),
            2 => try_randomize_value(groups, rng),
            3 => try_duplicate_record(groups, rng),
            4 => try_delete_record(groups, rng),
            5 => try_change_op_type(groups, rng),
            6 => try_drop_update_field(groups, rng),
            _ => unreachable!(),
        };
        if applied {
            return Ok(());
        }
    }
    Err(CsError::Misuse(
        "fuzzer found no applicable transform within its retry budget".into(),
    ))
}

type Slot = (usize, usize, bool, usize);

fn enumerate_value_slots(groups: &[TableGroup]) -> Vec<Slot> {
    let mut slots = Vec::new();
    for (gi, g) in groups.iter().enumerate() {
        for (ri, r) in g.records.iter().enumerate() {
            for ci in 0..r.old.len() {
                slots.push((gi, ri, false, ci));
            }
            for ci in 0..r.new.len() {
                slots.push((gi, ri, true, ci));
            }
        }
    }
    slots
}

fn get_value<'a>(groups: &'a [TableGroup], slot: Slot) -> &'a Value {
    let (gi, ri, is_new, ci) = slot;
    let r = &groups[gi].records[ri];
    if is_new {
        &r.new[ci]
    } else {
        &r.old[ci]
    }
}

fn get_value_mut<'a>(groups: &'a mut [TableGroup], slot: Slot) -> &'a mut Value {
    let (gi, ri, is_new, ci) = slot;
    let r = &mut groups[gi].records[ri];
    if is_new {
        &mut r.new[ci]
    } else {
        &mut r.old[ci]
    }
}

fn is_pk_slot(groups: &[TableGroup], slot: Slot) -> bool {
    let (gi, _, _, ci) = slot;
    groups[gi].pk.get(ci).copied().unwrap_or(false)
}

/// UNDEF is only legal in a non-PK column of an UPDATE record.
fn undef_allowed(groups: &[TableGroup], slot: Slot) -> bool {
    let (gi, ri, _, _) = slot;
    !is_pk_slot(groups, slot) && groups[gi].records[ri].op == Op::Update
}

fn would_be_illegal_undef(groups: &[TableGroup], slot: Slot, incoming: &Value) -> bool {
    incoming.is_undef() && !undef_allowed(groups, slot)
}

fn try_swap_values(groups: &mut Vec<TableGroup>, rng: &mut StdRng) -> bool {
    let slots = enumerate_value_slots(groups);
    if slots.len() < 2 {
        return false;
    }
    let a = slots[rng.gen_range(0..slots.len())];
    let b = slots[rng.gen_range(0..slots.len())];
    if a == b {
        return false;
    }
    let va = get_value(groups, a).clone();
    let vb = get_value(groups, b).clone();
    if va.serialized_len() != vb.serialized_len() {
        return false;
    }
    if is_pk_slot(groups, a) && (vb.is_undef() || vb == Value::Null) {
        return false;
    }
    if is_pk_slot(groups, b) && (va.is_undef() || va == Value::Null) {
        return false;
    }
    if would_be_illegal_undef(groups, a, &vb) || would_be_illegal_undef(groups, b, &va) {
        return false;
    }
    *get_value_mut(groups, a) = vb;
    *get_value_mut(groups, b) = va;
    true
}

fn try_mutate_value(groups: &mut Vec<TableGroup>, rng: &mut StdRng) -> bool {
    let slots: Vec<Slot> = enumerate_value_slots(groups)
        .into_iter()
        .filter(|&s| !matches!(get_value(groups, s), Value::Undef | Value::Null))
        .collect();
    if slots.is_empty() {
        return false;
    }
    let slot = slots[rng.gen_range(0..slots.len())];
    match get_value_mut(groups, slot) {
        Value::Int64(n) => {
            *n ^= 1i64 << rng.gen_range(0..64);
            true
        }
        Value::Float64(f) => {
            *f = f64::from_bits(f.to_bits() ^ (1u64 << rng.gen_range(0..64)));
            true
        }
        Value::Text(s) => {
            if s.is_empty() {
                return false;
            }
            let mut bytes = std::mem::take(s).into_bytes();
            let byte_idx = rng.gen_range(0..bytes.len());
            bytes[byte_idx] ^= 1 << rng.gen_range(0..7); // never set the high bit
            match String::from_utf8(bytes) {
                Ok(mutated) => {
                    *s = mutated;
                    true
                }
                Err(_) => false,
            }
        }
        Value::Blob(b) => {
            if b.is_empty() {
                return false;
            }
            let byte_idx = rng.gen_range(0..b.len());
            b[byte_idx] ^= 1 << rng.gen_range(0..8);
            true
        }
        Value::Undef | Value::Null => unreachable!("filtered out above"),
    }
}

fn random_value(rng: &mut StdRng, is_pk: bool, allow_undef: bool) -> Value {
    let mut choices: Vec<u8> = vec![1, 2, 3, 4];
    if !is_pk {
        choices.push(5);
        if allow_undef {
            choices.push(0);
        }
    }
    match choices[rng.gen_range(0..choices.len())] {
        0 => Value::Undef,
        1 => Value::Int64(rng.gen()),
        2 => Value::Float64(rng.gen()),
        3 => Value::Text(random_ascii_string(rng)),
        4 => {
            let len = rng.gen_range(0..8);
            Value::Blob((0..len).map(|_| rng.gen()).collect())
        }
        5 => Value::Null,
        _ => unreachable!(),
    }
}

fn random_ascii_string(rng: &mut StdRng) -> String {
    let len = rng.gen_range(0..8);
    (0..len).map(|_| rng.gen_range(0x20u8..0x7f) as char).collect()
}

fn try_randomize_value(groups: &mut Vec<TableGroup>, rng: &mut StdRng) -> bool {
    let slots = enumerate_value_slots(groups);
    if slots.is_empty() {
        return false;
    }
    let slot = slots[rng.gen_range(0..slots.len())];
    let is_pk = is_pk_slot(groups, slot);
    let allow_undef = !is_pk && undef_allowed(groups, slot);
    let value = random_value(rng, is_pk, allow_undef);
    *get_value_mut(groups, slot) = value;
    true
}

fn try_duplicate_record(groups: &mut [TableGroup], rng: &mut StdRng) -> bool {
    let candidates: Vec<usize> = (0..groups.len())
        .filter(|&gi| !groups[gi].records.is_empty())
        .collect();
    if candidates.is_empty() {
        return false;
    }
    let gi = candidates[rng.gen_range(0..candidates.len())];
    let ri = rng.gen_range(0..groups[gi].records.len());
    let duplicate = groups[gi].records[ri].clone();
    groups[gi].records.insert(ri + 1, duplicate);
    true
}

fn try_delete_record(groups: &mut [TableGroup], rng: &mut StdRng) -> bool {
    let candidates: Vec<usize> = (0..groups.len())
        .filter(|&gi| groups[gi].records.len() >= 2)
        .collect();
    if candidates.is_empty() {
        return false;
    }
    let gi = candidates[rng.gen_range(0..candidates.len())];
    let ri = rng.gen_range(0..groups[gi].records.len());
    groups[gi].records.remove(ri);
    true
}

fn fill_undef(row: &mut [Value], pk: &[bool], rng: &mut StdRng) {
    for (i, v) in row.iter_mut().enumerate() {
        if v.is_undef() {
            let is_pk = pk.get(i).copied().unwrap_or(false);
            *v = random_value(rng, is_pk, false);
        }
    }
}

fn try_change_op_type(groups: &mut [TableGroup], rng: &mut StdRng) -> bool {
    let candidates: Vec<(usize, usize)> = groups
        .iter()
        .enumerate()
        .flat_map(|(gi, g)| (0..g.records.len()).map(move |ri| (gi, ri)))
        .collect();
    if candidates.is_empty() {
        return false;
    }
    let (gi, ri) = candidates[rng.gen_range(0..candidates.len())];
    let pk = groups[gi].pk.clone();
    let record = groups[gi].records[ri].clone();

    let new_record = match record.op {
        Op::Insert if rng.gen_bool(0.5) => ParsedRecord {
            op: Op::Delete,
            indirect: record.indirect,
            old: record.new.clone(),
            new: Vec::new(),
        },
        Op::Insert => ParsedRecord {
            op: Op::Update,
            indirect: record.indirect,
            old: record.new.clone(),
            new: record.new.clone(),
        },
        Op::Delete if rng.gen_bool(0.5) => ParsedRecord {
            op: Op::Insert,
            indirect: record.indirect,
            old: Vec::new(),
            new: record.old.clone(),
        },
        Op::Delete => ParsedRecord {
            op: Op::Update,
            indirect: record.indirect,
            old: record.old.clone(),
            new: record.old.clone(),
        },
        Op::Update if rng.gen_bool(0.5) => {
            let mut row = record.new.clone();
            fill_undef(&mut row, &pk, rng);
            ParsedRecord {
                op: Op::Insert,
                indirect: record.indirect,
                old: Vec::new(),
                new: row,
            }
        }
        Op::Update => {
            let mut row = record.old.clone();
            fill_undef(&mut row, &pk, rng);
            ParsedRecord {
                op: Op::Delete,
                indirect: record.indirect,
                old: row,
                new: Vec::new(),
            }
        }
    };
    groups[gi].records[ri] = new_record;
    true
}

fn try_drop_update_field(groups: &mut [TableGroup], rng: &mut StdRng) -> bool {
    let candidates: Vec<(usize, usize)> = groups
        .iter()
        .enumerate()
        .flat_map(|(gi, g)| {
            let pk = g.pk.clone();
            (0..g.records.len())
                .filter(move |&ri| {
                    let r = &g.records[ri];
                    r.op == Op::Update
                        && (0..r.old.len())
                            .filter(|&i| !pk.get(i).copied().unwrap_or(false) && !r.old[i].is_undef())
                            .count()
                            >= 2
                })
                .map(move |ri| (gi, ri))
        })
        .collect();
    if candidates.is_empty() {
        return false;
    }
    let (gi, ri) = candidates[rng.gen_range(0..candidates.len())];
    let pk = groups[gi].pk.clone();
    let record = &mut groups[gi].records[ri];
    let eligible: Vec<usize> = (0..record.old.len())
        .filter(|&i| !pk.get(i).copied().unwrap_or(false) && !record.old[i].is_undef())
        .collect();
    let col = eligible[rng.gen_range(0..eligible.len())];
    record.old[col] = Value::Undef;
    record.new[col] = Value::Undef;
    true
}

/// Renders a changeset as one line per table header and one per
/// record, for the fuzzer CLI's single-argument dump mode.
pub fn dump(changeset: &[u8]) -> CsResult<String> {
    let groups = parse(changeset)?;
    let mut out = String::new();
    for group in &groups {
        let bitmap: String = group.pk.iter().map(|&b| if b { '1' } else { '0' }).collect();
        out.push_str(&format!(
            "TABLE {} ({} cols, pk={})\n",
            group.name,
            group.pk.len(),
            bitmap
        ));
        for record in &group.records {
            let op_name = match record.op {
                Op::Insert => "INSERT",
                Op::Update => "UPDATE",
                Op::Delete => "DELETE",
            };
            out.push_str(&format!(
                "  {} indirect={} old=[{}] new=[{}]\n",
                op_name,
                record.indirect as u8,
                render_row(&record.old),
                render_row(&record.new)
            ));
        }
    }
    Ok(out)
}

fn render_row(row: &[Value]) -> String {
    row.iter().map(render_value).collect::<Vec<_>>().join(", ")
}

fn render_value(v: &Value) -> String {
    match v {
        Value::Undef => "UNDEF".to_string(),
        Value::Null => "NULL".to_string(),
        Value::Int64(n) => n.to_string(),
        Value::Float64(f) => f.to_string(),
        Value::Text(s) => format!("{s:?}"),
        Value::Blob(b) => format!("BLOB({} bytes)", b.len()),
    }
}
