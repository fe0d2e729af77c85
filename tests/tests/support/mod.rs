//! An in-memory stand-in for the host SQL engine, built only on the
//! public collaborator traits (`HostConnection`, `PreparedStatement`,
//! `Catalog`, `PreUpdateSource`). Good enough to drive the recorder,
//! encoder, applier, and inverter end to end without a real database.
//!
//! Every table here is a rowid table with a single-column integer
//! primary key, matching the common case the wire format assumes:
//! the PK value *is* the rowid.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;

use changeset::{Catalog, HostConnection, PreUpdateSource, PreparedStatement, StepResult};
use changeset::{Op, SessionRegistry, TableDescriptor, Value};
use common::err::{CsError, CsResult};

pub const SCHEMA: &str = "main";

/// A value that, when present anywhere in an INSERT or UPDATE's new
/// row, makes the mock reject the write with `OtherConstraint` --
/// stands in for a CHECK/NOT NULL violation so tests can exercise the
/// applier's CONSTRAINT conflict path without a real constraint
/// system.
pub fn constraint_violation() -> Value {
    Value::Text("__constraint_violation__".to_string())
}

struct MockTable {
    descriptor: TableDescriptor,
    rows: Vec<Vec<Value>>,
}

impl MockTable {
    fn pk_index(&self) -> usize {
        self.descriptor
            .pk_columns()
            .next()
            .expect("mock tables are single-column PK only")
    }

    fn find_by_pk(&self, pk_values: &[Value]) -> Option<usize> {
        let indices: Vec<usize> = self.descriptor.pk_columns().collect();
        self.rows.iter().position(|row| {
            indices
                .iter()
                .zip(pk_values.iter())
                .all(|(&i, v)| &row[i] == v)
        })
    }

    fn find_by_rowid(&self, rowid: i64) -> Option<usize> {
        let pk_index = self.pk_index();
        self.rows
            .iter()
            .position(|row| row[pk_index] == Value::Int64(rowid))
    }
}

#[derive(Clone)]
enum StatementKind {
    SelectByRowid,
    SelectByPk,
    Insert,
    Delete,
    Update,
}

pub struct MockStatement {
    kind: StatementKind,
    table: String,
    descriptor: TableDescriptor,
    tables: Rc<RefCell<HashMap<String, MockTable>>>,
    changes: Rc<Cell<u64>>,
    params: Vec<Option<Value>>,
    executed: bool,
    result_row: Option<Vec<Value>>,
}

impl MockStatement {
    fn set(&mut self, index: usize, value: Value) {
        if self.params.len() <= index {
            self.params.resize(index + 1, None);
        }
        self.params[index] = Some(value);
    }

    fn param(&self, index: usize) -> CsResult<&Value> {
        self.params
            .get(index)
            .and_then(|v| v.as_ref())
            .ok_or_else(|| CsError::Misuse(format!("unbound parameter {index}")))
    }

    fn param_i64(&self, index: usize) -> CsResult<i64> {
        match self.param(index)? {
            Value::Int64(v) => Ok(*v),
            other => Err(CsError::Misuse(format!("expected int64, got {other:?}"))),
        }
    }

    fn execute(&mut self) -> CsResult<()> {
        let mut tables = self.tables.borrow_mut();
        let table = tables
            .get_mut(&self.table)
            .ok_or_else(|| CsError::NotFound(self.table.clone()))?;
        let n_col = self.descriptor.n_col;
        let pk_indices: Vec<usize> = self.descriptor.pk_columns().collect();
        let non_pk_indices: Vec<usize> = (0..n_col).filter(|i| !self.descriptor.is_pk(*i)).collect();

        match self.kind {
            StatementKind::SelectByRowid => {
                let rowid = self.param_i64(0)?;
                self.result_row = table.find_by_rowid(rowid).map(|i| table.rows[i].clone());
            }
            StatementKind::SelectByPk => {
                let pk_values: Vec<Value> = (0..pk_indices.len())
                    .map(|i| self.param(i).cloned())
                    .collect::<CsResult<_>>()?;
                self.result_row = table.find_by_pk(&pk_values).map(|i| table.rows[i].clone());
            }
            StatementKind::Insert => {
                let new: Vec<Value> = (0..n_col)
                    .map(|i| self.param(i).cloned())
                    .collect::<CsResult<_>>()?;
                if new.iter().any(|v| *v == constraint_violation()) {
                    return Err(CsError::OtherConstraint(self.table.clone()));
                }
                let pk_values: Vec<Value> = pk_indices.iter().map(|&i| new[i].clone()).collect();
                if table.find_by_pk(&pk_values).is_some() {
                    return Err(CsError::UniqueConflict(self.table.clone()));
                }
                table.rows.push(new);
                self.changes.set(1);
            }
            StatementKind::Delete => {
                let pk_values: Vec<Value> = (0..pk_indices.len())
                    .map(|i| self.param(i).cloned())
                    .collect::<CsResult<_>>()?;
                let fallback = self.param_i64(pk_indices.len())? != 0;
                let non_pk_values: Vec<Value> = (0..non_pk_indices.len())
                    .map(|i| self.param(pk_indices.len() + 1 + i).cloned())
                    .collect::<CsResult<_>>()?;

                self.changes.set(0);
                if let Some(row_idx) = table.find_by_pk(&pk_values) {
                    let matches = fallback
                        || non_pk_indices
                            .iter()
                            .zip(non_pk_values.iter())
                            .all(|(&i, v)| &table.rows[row_idx][i] == v);
                    if matches {
                        table.rows.remove(row_idx);
                        self.changes.set(1);
                    }
                }
            }
            StatementKind::Update => {
                // bind order: (set_i, new_i) for i in 0..n_col, then
                // old pk values, then fallback, then (set_i, old_i)
                // for each non-pk column -- mirrors execute_update.
                let mut set_flags = Vec::with_capacity(n_col);
                let mut new_values = Vec::with_capacity(n_col);
                for i in 0..n_col {
                    set_flags.push(self.param_i64(2 * i)? != 0);
                    new_values.push(self.param(2 * i + 1)?.clone());
                }
                let base = 2 * n_col;
                let old_pk: Vec<Value> = (0..pk_indices.len())
                    .map(|i| self.param(base + i).cloned())
                    .collect::<CsResult<_>>()?;
                let fallback = self.param_i64(base + pk_indices.len())? != 0;
                let guard_base = base + pk_indices.len() + 1;

                self.changes.set(0);
                let Some(row_idx) = table.find_by_pk(&old_pk) else {
                    return Ok(());
                };

                if !fallback {
                    for (slot, &i) in non_pk_indices.iter().enumerate() {
                        let guard_set = self.param_i64(guard_base + 2 * slot)? != 0;
                        if guard_set {
                            let guard_old = self.param(guard_base + 2 * slot + 1)?;
                            if &table.rows[row_idx][i] != guard_old {
                                return Ok(());
                            }
                        }
                    }
                }

                if new_values
                    .iter()
                    .enumerate()
                    .any(|(i, v)| set_flags[i] && *v == constraint_violation())
                {
                    return Err(CsError::OtherConstraint(self.table.clone()));
                }

                // A changed PK would collide with uniqueness in a
                // real engine; the mock's tests never change PKs, so
                // this path doesn't re-check it.
                for i in 0..n_col {
                    if set_flags[i] {
                        table.rows[row_idx][i] = new_values[i].clone();
                    }
                }
                self.changes.set(1);
            }
        }
        Ok(())
    }
}

impl PreparedStatement for MockStatement {
    fn bind(&mut self, index: usize, value: &Value) -> CsResult<()> {
        self.set(index, value.clone());
        Ok(())
    }

    fn step(&mut self) -> CsResult<StepResult> {
        if !self.executed {
            self.executed = true;
            self.execute()?;
            return match &self.result_row {
                Some(_) => Ok(StepResult::Row),
                None => Ok(StepResult::Done),
            };
        }
        // Second call for a statement that already surfaced its one
        // row (selects only ever produce at most one).
        self.result_row = None;
        Ok(StepResult::Done)
    }

    fn reset(&mut self) -> CsResult<()> {
        self.executed = false;
        self.result_row = None;
        Ok(())
    }

    fn column(&self, index: usize) -> CsResult<Value> {
        self.result_row
            .as_ref()
            .and_then(|row| row.get(index))
            .cloned()
            .ok_or_else(|| CsError::Range { index: index as i64, len: 0 })
    }

    fn column_count(&self) -> usize {
        self.descriptor.n_col
    }
}

struct RowSource {
    old: Vec<Value>,
}

impl PreUpdateSource for RowSource {
    fn count(&self) -> usize {
        self.old.len()
    }

    fn old(&self, index: usize) -> CsResult<Value> {
        self.old
            .get(index)
            .cloned()
            .ok_or_else(|| CsError::Range { index: index as i64, len: self.old.len() })
    }
}

pub struct MockConnection {
    tables: Rc<RefCell<HashMap<String, MockTable>>>,
    changes: Rc<Cell<u64>>,
}

impl MockConnection {
    pub fn new() -> Arc<Self> {
        Arc::new(MockConnection {
            tables: Rc::new(RefCell::new(HashMap::new())),
            changes: Rc::new(Cell::new(0)),
        })
    }

    pub fn create_table(&self, name: &str, columns: &[&str], pk: &[bool]) {
        let descriptor = TableDescriptor::with_columns(
            name,
            pk.to_vec(),
            columns.iter().map(|s| s.to_string()).collect(),
        );
        self.tables.borrow_mut().insert(
            name.to_string(),
            MockTable {
                descriptor,
                rows: Vec::new(),
            },
        );
    }

    pub fn row(&self, table: &str, pk: i64) -> Option<Vec<Value>> {
        let tables = self.tables.borrow();
        let t = tables.get(table)?;
        t.find_by_rowid(pk).map(|i| t.rows[i].clone())
    }

    pub fn row_count(&self, table: &str) -> usize {
        self.tables.borrow().get(table).map(|t| t.rows.len()).unwrap_or(0)
    }

    /// Seeds a row directly, bypassing the pre-update hook -- for
    /// setting up pre-existing target state before replaying a
    /// changeset against it.
    pub fn seed_row(&self, table: &str, values: Vec<Value>) {
        self.tables
            .borrow_mut()
            .get_mut(table)
            .expect("table must exist")
            .rows
            .push(values);
    }

    /// Applies an INSERT and fires the pre-update hook first, as a
    /// real engine's trigger point would.
    pub fn do_insert(
        &self,
        registry: &SessionRegistry<MockConnection>,
        table: &str,
        values: Vec<Value>,
    ) {
        let pk_index = self
            .tables
            .borrow()
            .get(table)
            .unwrap()
            .pk_index();
        let rowid = match &values[pk_index] {
            Value::Int64(v) => *v,
            _ => panic!("mock PK column must be Int64"),
        };
        let src = RowSource { old: Vec::new() };
        registry.pre_update_hook(SCHEMA, table, Op::Insert, rowid, &src);
        self.tables.borrow_mut().get_mut(table).unwrap().rows.push(values);
    }

    /// Applies an UPDATE and fires the pre-update hook with the row's
    /// current values as OLD, before the new values land.
    pub fn do_update(
        &self,
        registry: &SessionRegistry<MockConnection>,
        table: &str,
        rowid: i64,
        new_values: Vec<Value>,
    ) {
        let old = self.row(table, rowid).expect("row must exist to update");
        let src = RowSource { old: old.clone() };
        registry.pre_update_hook(SCHEMA, table, Op::Update, rowid, &src);
        let mut tables = self.tables.borrow_mut();
        let t = tables.get_mut(table).unwrap();
        let idx = t.find_by_rowid(rowid).unwrap();
        t.rows[idx] = new_values;
    }

    pub fn do_delete(&self, registry: &SessionRegistry<MockConnection>, table: &str, rowid: i64) {
        let old = self.row(table, rowid).expect("row must exist to delete");
        let src = RowSource { old };
        registry.pre_update_hook(SCHEMA, table, Op::Delete, rowid, &src);
        let mut tables = self.tables.borrow_mut();
        let t = tables.get_mut(table).unwrap();
        let idx = t.find_by_rowid(rowid).unwrap();
        t.rows.remove(idx);
    }
}

impl Catalog for MockConnection {
    fn table_info(&self, _schema: &str, table: &str) -> CsResult<TableDescriptor> {
        self.tables
            .borrow()
            .get(table)
            .map(|t| t.descriptor.clone())
            .ok_or_else(|| CsError::NotFound(table.to_string()))
    }
}

impl HostConnection for MockConnection {
    type Statement = MockStatement;

    fn prepare(&self, sql: &str) -> CsResult<Self::Statement> {
        let table = extract_table_name(sql)?;
        let descriptor = self
            .tables
            .borrow()
            .get(&table)
            .ok_or_else(|| CsError::NotFound(table.clone()))?
            .descriptor
            .clone();

        let kind = if sql.starts_with("SELECT") && sql.contains("rowid") {
            StatementKind::SelectByRowid
        } else if sql.starts_with("SELECT") {
            StatementKind::SelectByPk
        } else if sql.starts_with("INSERT") {
            StatementKind::Insert
        } else if sql.starts_with("DELETE") {
            StatementKind::Delete
        } else if sql.starts_with("UPDATE") {
            StatementKind::Update
        } else {
            return Err(CsError::Misuse(format!("unrecognized statement: {sql}")));
        };

        Ok(MockStatement {
            kind,
            table,
            descriptor,
            tables: Rc::clone(&self.tables),
            changes: Rc::clone(&self.changes),
            params: Vec::new(),
            executed: false,
            result_row: None,
        })
    }

    fn changes(&self) -> u64 {
        self.changes.get()
    }

    fn savepoint(&self, _name: &str) -> CsResult<()> {
        Ok(())
    }

    fn release_savepoint(&self, _name: &str) -> CsResult<()> {
        Ok(())
    }

    fn rollback_to_savepoint(&self, _name: &str) -> CsResult<()> {
        Ok(())
    }

    fn catalog(&self) -> &dyn Catalog {
        self
    }
}

/// Pulls the table name out of one of the applier/encoder's generated
/// statement shapes. Good enough because the mock only ever sees SQL
/// this crate itself generated.
fn extract_table_name(sql: &str) -> CsResult<String> {
    let markers = ["FROM main.", "FROM ", "INTO ", "UPDATE "];
    for marker in markers {
        if let Some(pos) = sql.find(marker) {
            let rest = &sql[pos + marker.len()..];
            let name: String = rest
                .chars()
                .take_while(|c| c.is_alphanumeric() || *c == '_')
                .collect();
            if !name.is_empty() {
                return Ok(name);
            }
        }
    }
    Err(CsError::Misuse(format!("could not find table name in: {sql}")))
}
