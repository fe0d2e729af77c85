//! The changeset applier: a savepoint-wrapped driver that replays a
//! decoded changeset against a target connection, resolving
//! divergence through a caller-supplied conflict callback.

use std::num::NonZeroUsize;

use lru::LruCache;
use tracing::warn;
use uuid::Uuid;

use common::err::{CsError, CsResult};

use crate::engine::{HostConnection, PreparedStatement, StepResult};
use crate::iterator::{ChangesetIter, IterOutcome};
use crate::op::Op;
use crate::table::TableDescriptor;
use crate::value::Value;

const DEFAULT_SCHEMA: &str = "main";
const STATEMENT_CACHE_SIZE: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictKind {
    Data,
    NotFound,
    Conflict,
    Constraint,
}

/// A conflict callback's reply. An out-of-enum reply is
/// unrepresentable -- the type system rules out a `Misuse`-style
/// fourth case entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictAction {
    Omit,
    Replace,
    Abort,
}

/// Replays `changeset` against `connection` inside one savepoint.
/// `on_conflict` is invoked with the conflicting record still current
/// on `iter`, so it can read `old`/`new`/`conflict` columns; `cancel`
/// is polled once per record and, if it returns `true`, is treated
/// exactly like an `Abort` reply.
pub fn apply<C, F, Cancel>(
    connection: &C,
    changeset: &[u8],
    mut on_conflict: F,
    mut cancel: Cancel,
) -> CsResult<()>
where
    C: HostConnection,
    F: FnMut(ConflictKind, &str, Op, &mut ChangesetIter) -> ConflictAction,
    Cancel: FnMut() -> bool,
{
    let savepoint = format!("cs_apply_{}", Uuid::new_v4().simple());
    connection.savepoint(&savepoint)?;

    let outcome = run(connection, changeset, &mut on_conflict, &mut cancel, &savepoint);

    match outcome {
        Ok(()) => {
            connection.release_savepoint(&savepoint)?;
            Ok(())
        }
        Err(e) => {
            if let Err(rollback_err) = connection.rollback_to_savepoint(&savepoint) {
                warn!(error = %rollback_err, "rollback to savepoint failed during error unwind");
            }
            let _ = connection.release_savepoint(&savepoint);
            Err(e)
        }
    }
}

fn run<C, F, Cancel>(
    connection: &C,
    changeset: &[u8],
    on_conflict: &mut F,
    cancel: &mut Cancel,
    savepoint: &str,
) -> CsResult<()>
where
    C: HostConnection,
    F: FnMut(ConflictKind, &str, Op, &mut ChangesetIter) -> ConflictAction,
    Cancel: FnMut() -> bool,
{
    let mut iter = ChangesetIter::start(changeset);
    let mut table: Option<TableDescriptor> = None;
    let mut cache: LruCache<Op, C::Statement> =
        LruCache::new(NonZeroUsize::new(STATEMENT_CACHE_SIZE).unwrap());

    loop {
        match iter.next()? {
            IterOutcome::Done => return Ok(()),
            IterOutcome::Row => {
                let table_name = iter.table_name()?.to_string();
                if table.as_ref().map(|t| t.name.as_str()) != Some(table_name.as_str()) {
                    table = Some(connection.catalog().table_info(DEFAULT_SCHEMA, &table_name)?);
                    cache.clear();
                }
                if cancel() {
                    return Err(CsError::Abort);
                }

                let desc = table.as_ref().unwrap().clone();
                if desc.columns.len() != desc.n_col {
                    return Err(CsError::SchemaChanged {
                        table: desc.name.clone(),
                        expected: desc.n_col,
                        found: desc.columns.len(),
                    });
                }

                let action = apply_record(connection, &mut iter, &desc, &mut cache, on_conflict)?;
                if action == ConflictAction::Abort {
                    warn!(table = %desc.name, savepoint, "applier aborted by conflict callback");
                    return Err(CsError::Abort);
                }
            }
        }
    }
}

fn apply_record<C, F>(
    connection: &C,
    iter: &mut ChangesetIter,
    table: &TableDescriptor,
    cache: &mut LruCache<Op, C::Statement>,
    on_conflict: &mut F,
) -> CsResult<ConflictAction>
where
    C: HostConnection,
    F: FnMut(ConflictKind, &str, Op, &mut ChangesetIter) -> ConflictAction,
{
    match iter.op()? {
        Op::Delete => apply_delete(connection, iter, table, cache, on_conflict),
        Op::Insert => apply_insert(connection, iter, table, cache, on_conflict),
        Op::Update => apply_update(connection, iter, table, cache, on_conflict),
    }
}

fn pk_indices(table: &TableDescriptor) -> Vec<usize> {
    table.pk_columns().collect()
}

fn pk_predicate(table: &TableDescriptor) -> String {
    pk_indices(table)
        .iter()
        .map(|&i| format!("{} = ?", table.column_name(i).unwrap_or("?")))
        .collect::<Vec<_>>()
        .join(" AND ")
}

fn pk_values<'a>(table: &TableDescriptor, image: &'a [Value]) -> Vec<&'a Value> {
    pk_indices(table).iter().map(|&i| &image[i]).collect()
}

fn select_by_pk<C: HostConnection>(
    connection: &C,
    table: &TableDescriptor,
    pks: &[&Value],
) -> CsResult<Option<Vec<Value>>> {
    let sql = format!("SELECT * FROM {} WHERE {}", table.name, pk_predicate(table));
    let mut stmt = connection.prepare(&sql)?;
    for (i, v) in pks.iter().enumerate() {
        stmt.bind(i, v)?;
    }
    match stmt.step()? {
        StepResult::Row => {
            let mut row = Vec::with_capacity(table.n_col);
            for i in 0..table.n_col {
                row.push(stmt.column(i)?);
            }
            Ok(Some(row))
        }
        StepResult::Done => Ok(None),
    }
}

/// `DELETE FROM t WHERE pk = ? AND (?fallback OR non_pk conjunction)`.
/// `fallback = true` on a `REPLACE` retry suppresses the non-PK
/// comparison so only the PK match governs the delete.
fn apply_delete<C, F>(
    connection: &C,
    iter: &mut ChangesetIter,
    table: &TableDescriptor,
    cache: &mut LruCache<Op, C::Statement>,
    on_conflict: &mut F,
) -> CsResult<ConflictAction>
where
    C: HostConnection,
    F: FnMut(ConflictKind, &str, Op, &mut ChangesetIter) -> ConflictAction,
{
    let old: Vec<Value> = (0..table.n_col)
        .map(|i| iter.old(i).map(|v| v.clone()))
        .collect::<CsResult<_>>()?;

    let affected = execute_delete(connection, table, cache, &old, false)?;
    if affected >= 1 {
        return Ok(ConflictAction::Omit); // success, not a conflict; caller proceeds regardless
    }

    let pks = pk_values(table, &old);
    let current = select_by_pk(connection, table, &pks)?;
    let kind = match &current {
        Some(_) => ConflictKind::Data,
        None => ConflictKind::NotFound,
    };
    iter.set_conflict_row(current.clone());
    let action = on_conflict(kind, &table.name, Op::Delete, iter);
    iter.set_conflict_row(None);

    match (kind, action) {
        (_, ConflictAction::Omit) => Ok(ConflictAction::Omit),
        (ConflictKind::Data, ConflictAction::Replace) => {
            execute_delete(connection, table, cache, &old, true)?;
            Ok(ConflictAction::Omit)
        }
        (_, ConflictAction::Replace) => Err(CsError::Misuse(
            "REPLACE is not legal for this conflict kind".into(),
        )),
        (_, ConflictAction::Abort) => Ok(ConflictAction::Abort),
    }
}

fn execute_delete<C: HostConnection>(
    connection: &C,
    table: &TableDescriptor,
    cache: &mut LruCache<Op, C::Statement>,
    old: &[Value],
    fallback: bool,
) -> CsResult<u64> {
    if !cache.contains(&Op::Delete) {
        let pk_clause = pk_predicate(table);
        let non_pk_clause = non_pk_conjunction(table);
        let sql = format!(
            "DELETE FROM {} WHERE {} AND (? OR ({}))",
            table.name, pk_clause, non_pk_clause
        );
        cache.put(Op::Delete, connection.prepare(&sql)?);
    }
    let stmt = cache.get_mut(&Op::Delete).unwrap();
    stmt.reset()?;

    let mut idx = 0;
    for &i in &pk_indices(table) {
        stmt.bind(idx, &old[i])?;
        idx += 1;
    }
    stmt.bind(idx, &Value::Int64(fallback as i64))?;
    idx += 1;
    for i in 0..table.n_col {
        if table.is_pk(i) {
            continue;
        }
        stmt.bind(idx, &old[i])?;
        idx += 1;
    }
    exhaust(stmt)?;
    Ok(connection.changes())
}

fn non_pk_conjunction(table: &TableDescriptor) -> String {
    let clauses: Vec<String> = (0..table.n_col)
        .filter(|&i| !table.is_pk(i))
        .map(|i| format!("{} IS ?", table.column_name(i).unwrap_or("?")))
        .collect();
    if clauses.is_empty() {
        "1 = 1".to_string()
    } else {
        clauses.join(" AND ")
    }
}

fn apply_insert<C, F>(
    connection: &C,
    iter: &mut ChangesetIter,
    table: &TableDescriptor,
    cache: &mut LruCache<Op, C::Statement>,
    on_conflict: &mut F,
) -> CsResult<ConflictAction>
where
    C: HostConnection,
    F: FnMut(ConflictKind, &str, Op, &mut ChangesetIter) -> ConflictAction,
{
    let new: Vec<Value> = (0..table.n_col)
        .map(|i| iter.new_value(i).map(|v| v.clone()))
        .collect::<CsResult<_>>()?;

    match execute_insert(connection, table, cache, &new) {
        Ok(()) => Ok(ConflictAction::Omit),
        Err(CsError::UniqueConflict(_)) => {
            let pks = pk_values(table, &new);
            let current = select_by_pk(connection, table, &pks)?;
            iter.set_conflict_row(current.clone());
            let action = on_conflict(ConflictKind::Conflict, &table.name, Op::Insert, iter);
            iter.set_conflict_row(None);
            resolve_insert_conflict(connection, table, cache, &new, current, action)
        }
        Err(CsError::OtherConstraint(_)) => {
            iter.set_conflict_row(None);
            let action = on_conflict(ConflictKind::Constraint, &table.name, Op::Insert, iter);
            match action {
                ConflictAction::Omit => Ok(ConflictAction::Omit),
                ConflictAction::Abort => Ok(ConflictAction::Abort),
                ConflictAction::Replace => Err(CsError::Misuse(
                    "REPLACE is not legal for CONSTRAINT conflicts".into(),
                )),
            }
        }
        Err(e) => Err(e),
    }
}

fn resolve_insert_conflict<C: HostConnection>(
    connection: &C,
    table: &TableDescriptor,
    cache: &mut LruCache<Op, C::Statement>,
    new: &[Value],
    colliding_row: Option<Vec<Value>>,
    action: ConflictAction,
) -> CsResult<ConflictAction> {
    match action {
        ConflictAction::Omit => Ok(ConflictAction::Omit),
        ConflictAction::Abort => Ok(ConflictAction::Abort),
        ConflictAction::Replace => {
            let Some(colliding_row) = colliding_row else {
                return Err(CsError::Misuse(
                    "REPLACE requested but no colliding row was found".into(),
                ));
            };
            execute_delete(connection, table, cache, &colliding_row, true)?;
            match execute_insert(connection, table, cache, new) {
                Ok(()) => Ok(ConflictAction::Omit),
                Err(retry_err) => {
                    warn!(table = %table.name, error = %retry_err, "REPLACE retry failed, restoring original row");
                    execute_insert(connection, table, cache, &colliding_row)?;
                    Ok(ConflictAction::Omit)
                }
            }
        }
    }
}

fn execute_insert<C: HostConnection>(
    connection: &C,
    table: &TableDescriptor,
    cache: &mut LruCache<Op, C::Statement>,
    values: &[Value],
) -> CsResult<()> {
    if !cache.contains(&Op::Insert) {
        let placeholders = vec!["?"; table.n_col].join(", ");
        let sql = format!("INSERT INTO {} VALUES ({placeholders})", table.name);
        cache.put(Op::Insert, connection.prepare(&sql)?);
    }
    let stmt = cache.get_mut(&Op::Insert).unwrap();
    stmt.reset()?;
    for (i, v) in values.iter().enumerate() {
        stmt.bind(i, v)?;
    }
    exhaust(stmt)
}

fn apply_update<C, F>(
    connection: &C,
    iter: &mut ChangesetIter,
    table: &TableDescriptor,
    cache: &mut LruCache<Op, C::Statement>,
    on_conflict: &mut F,
) -> CsResult<ConflictAction>
where
    C: HostConnection,
    F: FnMut(ConflictKind, &str, Op, &mut ChangesetIter) -> ConflictAction,
{
    let old: Vec<Value> = (0..table.n_col)
        .map(|i| iter.old(i).map(|v| v.clone()))
        .collect::<CsResult<_>>()?;
    let new: Vec<Value> = (0..table.n_col)
        .map(|i| iter.new_value(i).map(|v| v.clone()))
        .collect::<CsResult<_>>()?;

    match execute_update(connection, table, cache, &old, &new, false) {
        Ok(affected) if affected >= 1 => Ok(ConflictAction::Omit),
        Ok(_) => {
            let pks = pk_values(table, &old);
            let current = select_by_pk(connection, table, &pks)?;
            let kind = match &current {
                Some(_) => ConflictKind::Data,
                None => ConflictKind::NotFound,
            };
            iter.set_conflict_row(current.clone());
            let action = on_conflict(kind, &table.name, Op::Update, iter);
            iter.set_conflict_row(None);
            match (kind, action) {
                (_, ConflictAction::Omit) => Ok(ConflictAction::Omit),
                (ConflictKind::Data, ConflictAction::Replace) => {
                    execute_update(connection, table, cache, &old, &new, true)?;
                    Ok(ConflictAction::Omit)
                }
                (_, ConflictAction::Replace) => Err(CsError::Misuse(
                    "REPLACE is not legal for this conflict kind".into(),
                )),
                (_, ConflictAction::Abort) => Ok(ConflictAction::Abort),
            }
        }
        Err(CsError::UniqueConflict(_)) => {
            let pks = pk_values(table, &new);
            let current = select_by_pk(connection, table, &pks)?;
            iter.set_conflict_row(current.clone());
            let action = on_conflict(ConflictKind::Conflict, &table.name, Op::Update, iter);
            iter.set_conflict_row(None);
            match action {
                ConflictAction::Omit => Ok(ConflictAction::Omit),
                ConflictAction::Abort => Ok(ConflictAction::Abort),
                ConflictAction::Replace => {
                    let Some(colliding_row) = current else {
                        return Err(CsError::Misuse(
                            "REPLACE requested but no colliding row was found".into(),
                        ));
                    };
                    execute_delete(connection, table, cache, &colliding_row, true)?;
                    match execute_update(connection, table, cache, &old, &new, true) {
                        Ok(_) => Ok(ConflictAction::Omit),
                        Err(retry_err) => {
                            warn!(table = %table.name, error = %retry_err, "REPLACE retry failed, restoring original row");
                            execute_insert(connection, table, cache, &colliding_row)?;
                            Ok(ConflictAction::Omit)
                        }
                    }
                }
            }
        }
        Err(CsError::OtherConstraint(_)) => {
            iter.set_conflict_row(None);
            match on_conflict(ConflictKind::Constraint, &table.name, Op::Update, iter) {
                ConflictAction::Omit => Ok(ConflictAction::Omit),
                ConflictAction::Abort => Ok(ConflictAction::Abort),
                ConflictAction::Replace => Err(CsError::Misuse(
                    "REPLACE is not legal for CONSTRAINT conflicts".into(),
                )),
            }
        }
        Err(e) => Err(e),
    }
}

/// `UPDATE t SET c_i = CASE WHEN ?set_i THEN ?new_i ELSE c_i END ...
/// WHERE pk = ?old_pk AND (?fallback OR non-pk-unchanged conjunction)`.
fn execute_update<C: HostConnection>(
    connection: &C,
    table: &TableDescriptor,
    cache: &mut LruCache<Op, C::Statement>,
    old: &[Value],
    new: &[Value],
    fallback: bool,
) -> CsResult<u64> {
    if !cache.contains(&Op::Update) {
        let set_clause: Vec<String> = (0..table.n_col)
            .map(|i| {
                let col = table.column_name(i).unwrap_or("?");
                format!("{col} = CASE WHEN ? THEN ? ELSE {col} END")
            })
            .collect();
        let pk_clause = pk_predicate(table);
        let non_pk_clause: Vec<String> = (0..table.n_col)
            .filter(|&i| !table.is_pk(i))
            .map(|i| format!("(? = 0 OR {} IS ?)", table.column_name(i).unwrap_or("?")))
            .collect();
        let non_pk_clause = if non_pk_clause.is_empty() {
            "1 = 1".to_string()
        } else {
            non_pk_clause.join(" AND ")
        };
        let sql = format!(
            "UPDATE {} SET {} WHERE {} AND (? OR ({}))",
            table.name,
            set_clause.join(", "),
            pk_clause,
            non_pk_clause
        );
        cache.put(Op::Update, connection.prepare(&sql)?);
    }
    let stmt = cache.get_mut(&Op::Update).unwrap();
    stmt.reset()?;

    let mut idx = 0;
    for i in 0..table.n_col {
        let set_i = !old[i].is_undef();
        stmt.bind(idx, &Value::Int64(set_i as i64))?;
        idx += 1;
        stmt.bind(idx, &new[i])?;
        idx += 1;
    }
    for &i in &pk_indices(table) {
        stmt.bind(idx, &old[i])?;
        idx += 1;
    }
    stmt.bind(idx, &Value::Int64(fallback as i64))?;
    idx += 1;
    for i in 0..table.n_col {
        if table.is_pk(i) {
            continue;
        }
        let set_i = !old[i].is_undef();
        stmt.bind(idx, &Value::Int64(set_i as i64))?;
        idx += 1;
        stmt.bind(idx, &old[i])?;
        idx += 1;
    }
    exhaust(stmt)?;
    Ok(connection.changes())
}

fn exhaust<S: PreparedStatement>(stmt: &mut S) -> CsResult<()> {
    loop {
        match stmt.step()? {
            StepResult::Row => continue,
            StepResult::Done => return Ok(()),
        }
    }
}
