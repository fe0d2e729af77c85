//! The session recorder: a pre-update interceptor that materializes
//! the OLD row image exactly once per primary key per session,
//! deferring schema introspection until first mutation.

use std::sync::{Arc, Mutex};

use common::err::{CsError, CsResult};
use memory::Buffer;
use tracing::debug;

use crate::change::RowChange;
use crate::encoder;
use crate::engine::{HostConnection, PreUpdateSource};
use crate::hashtable::ChangeTable;
use crate::op::Op;
use crate::table::TableDescriptor;

type TableFilter = Box<dyn Fn(&str) -> bool + Send + Sync>;

pub(crate) struct AttachedTable {
    pub name: String,
    pub descriptor: Option<TableDescriptor>,
    pub changes: ChangeTable,
}

impl AttachedTable {
    fn new(name: impl Into<String>) -> Self {
        AttachedTable {
            name: name.into(),
            descriptor: None,
            changes: ChangeTable::new(),
        }
    }
}

struct SessionState {
    tables: Vec<AttachedTable>,
    error: Option<CsError>,
    enabled: bool,
    indirect: bool,
    table_filter: Option<TableFilter>,
}

/// A session attached to zero or more tables on one connection,
/// recording row mutations into per-table change hash tables until
/// encoded into a changeset.
pub struct Session<C: HostConnection> {
    connection: Arc<C>,
    schema_name: String,
    state: Mutex<SessionState>,
}

impl<C: HostConnection> Session<C> {
    pub fn schema_name(&self) -> &str {
        &self.schema_name
    }

    pub fn connection(&self) -> &Arc<C> {
        &self.connection
    }

    /// Attaches `table_name`. Idempotent: re-attaching an already
    /// attached name is a no-op success. Schema introspection is
    /// deferred to the first mutation on the table.
    pub fn attach(&self, table_name: &str) {
        let mut state = self.state.lock().unwrap();
        if state.tables.iter().any(|t| t.name == table_name) {
            return;
        }
        state.tables.push(AttachedTable::new(table_name));
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.state.lock().unwrap().enabled = enabled;
    }

    pub fn is_enabled(&self) -> bool {
        self.state.lock().unwrap().enabled
    }

    pub fn set_indirect(&self, indirect: bool) {
        self.state.lock().unwrap().indirect = indirect;
    }

    pub fn is_indirect(&self) -> bool {
        self.state.lock().unwrap().indirect
    }

    pub fn set_table_filter(&self, filter: Option<TableFilter>) {
        self.state.lock().unwrap().table_filter = filter;
    }

    /// True iff every attached table has zero recorded entries
    /// (mirrors `sqlite3session_isempty`).
    pub fn is_empty(&self) -> bool {
        self.state
            .lock()
            .unwrap()
            .tables
            .iter()
            .all(|t| t.changes.is_empty())
    }

    /// Returns the session's latched error, if any, without clearing
    /// it -- once fatal, a session stays fatal for its lifetime.
    pub fn error(&self) -> Option<CsError> {
        self.state.lock().unwrap().error.clone()
    }

    /// Encodes the session's recorded changes into a changeset byte
    /// stream. Returns the latched error, if the session is poisoned.
    pub fn changeset(&self) -> CsResult<Vec<u8>> {
        let mut state = self.state.lock().unwrap();
        if let Some(e) = &state.error {
            return Err(e.clone());
        }
        encoder::encode_session(self.connection.as_ref(), &self.schema_name, &mut state.tables)
    }

    /// Invoked by the connection's pre-update hook for every row
    /// write. A session in a latched-error state, a disabled
    /// session, or a session whose schema name doesn't match
    /// `db_name` skips recording entirely.
    pub(crate) fn handle_pre_update(
        &self,
        db_name: &str,
        table_name: &str,
        op: Op,
        new_rowid: i64,
        src: &dyn PreUpdateSource,
    ) {
        if !db_name.eq_ignore_ascii_case(&self.schema_name) {
            return;
        }

        let mut state = self.state.lock().unwrap();
        if state.error.is_some() || !state.enabled {
            return;
        }
        if let Some(filter) = &state.table_filter {
            if !filter(table_name) {
                return;
            }
        }

        let indirect = state.indirect;
        let connection = Arc::clone(&self.connection);
        let schema_name = self.schema_name.clone();

        let Some(table) = state
            .tables
            .iter_mut()
            .find(|t| t.name.eq_ignore_ascii_case(table_name))
        else {
            return;
        };

        let preupdate_count = src.count();
        match &table.descriptor {
            None => match connection.catalog().table_info(&schema_name, table_name) {
                Ok(desc) => {
                    if desc.n_col != preupdate_count {
                        state.error = Some(CsError::SchemaChanged {
                            table: table_name.to_string(),
                            expected: desc.n_col,
                            found: preupdate_count,
                        });
                        return;
                    }
                    if desc.pk_columns().next().is_none() {
                        state.error = Some(CsError::Misuse(format!(
                            "table {table_name} has no primary key"
                        )));
                        return;
                    }
                    debug!(table = %table_name, n_col = desc.n_col, "table descriptor populated");
                    table.descriptor = Some(desc);
                }
                Err(e) => {
                    state.error = Some(e);
                    return;
                }
            },
            Some(desc) => {
                if desc.n_col != preupdate_count {
                    state.error = Some(CsError::SchemaChanged {
                        table: table_name.to_string(),
                        expected: desc.n_col,
                        found: preupdate_count,
                    });
                    return;
                }
            }
        }

        table.changes.maybe_rehash();

        if table.changes.get(new_rowid).is_some() {
            // Earliest pre-image wins; ignore this later mutation.
            return;
        }

        let row_change = match op {
            Op::Insert => RowChange::insert(new_rowid, indirect),
            Op::Update | Op::Delete => {
                let n_col = table.descriptor.as_ref().unwrap().n_col;
                let mut values = Vec::with_capacity(n_col);
                for i in 0..n_col {
                    match src.old(i) {
                        Ok(v) => values.push(v),
                        Err(e) => {
                            state.error = Some(e);
                            return;
                        }
                    }
                }
                let total: usize = values.iter().map(|v| v.serialized_len()).sum();
                let mut buf = Buffer::with_capacity(total);
                for v in &values {
                    if let Err(e) = v.serialize(&mut buf) {
                        state.error = Some(e);
                        return;
                    }
                }
                let bytes = match buf.into_vec() {
                    Ok(b) => b,
                    Err(e) => {
                        state.error = Some(e);
                        return;
                    }
                };
                RowChange::with_pre_image(new_rowid, bytes, indirect)
            }
        };

        if let Err(e) = table.changes.insert(row_change) {
            state.error = Some(e);
        }
    }
}

/// Owns the connection-wide list of sessions a pre-update hook walks:
/// creation, destruction, and the hook walk all acquire this
/// registry's own mutex in a short critical section that never calls
/// back into the host engine.
pub struct SessionRegistry<C: HostConnection> {
    sessions: Mutex<Vec<Arc<Session<C>>>>,
}

impl<C: HostConnection> Default for SessionRegistry<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: HostConnection> SessionRegistry<C> {
    pub fn new() -> Self {
        SessionRegistry {
            sessions: Mutex::new(Vec::new()),
        }
    }

    pub fn create(&self, connection: Arc<C>, schema_name: impl Into<String>) -> Arc<Session<C>> {
        let session = Arc::new(Session {
            connection,
            schema_name: schema_name.into(),
            state: Mutex::new(SessionState {
                tables: Vec::new(),
                error: None,
                enabled: true,
                indirect: false,
                table_filter: None,
            }),
        });
        self.sessions.lock().unwrap().push(Arc::clone(&session));
        session
    }

    pub fn delete(&self, session: &Arc<Session<C>>) {
        let mut sessions = self.sessions.lock().unwrap();
        if let Some(pos) = sessions.iter().position(|s| Arc::ptr_eq(s, session)) {
            sessions.remove(pos);
        }
    }

    /// The pre-update hook entry point: walks every registered
    /// session and lets each decide independently whether to record.
    pub fn pre_update_hook(
        &self,
        db_name: &str,
        table_name: &str,
        op: Op,
        new_rowid: i64,
        src: &dyn PreUpdateSource,
    ) {
        let snapshot: Vec<Arc<Session<C>>> = self.sessions.lock().unwrap().clone();
        for session in &snapshot {
            session.handle_pre_update(db_name, table_name, op, new_rowid, src);
        }
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }
}
