//! Host-engine collaborator contracts.
//!
//! The host SQL engine itself -- statement compilation, row
//! iteration, transactions, savepoints, catalog introspection -- is
//! out of scope for this crate. These traits pin down the interface
//! the core consumes so `changeset` compiles standalone; a real
//! embedding provides the implementation, and the `tests` crate
//! supplies an in-memory one for exercising the engine.

use common::err::CsResult;

use crate::table::TableDescriptor;
use crate::value::Value;

/// What a statement's most recent `step()` produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepResult {
    /// A result row is available; read it with `column`.
    Row,
    /// The statement has no more rows (for DML, this means it ran to
    /// completion; see `HostConnection::changes`).
    Done,
}

/// Column-wise OLD-value access during a pre-update hook invocation
/// (the `preupdate_count`/`preupdate_old` pair). The recorder must
/// copy every value out before the hook returns -- the engine may
/// invalidate its internal buffers as soon as control returns to it.
pub trait PreUpdateSource {
    fn count(&self) -> usize;
    fn old(&self, index: usize) -> CsResult<Value>;
}

/// Catalog introspection, roughly `PRAGMA table_info(<name>)`. The
/// returned descriptor's `columns` must be populated (one name per
/// column, in declared order) -- the applier generates SQL text from
/// them, unlike the recorder and encoder, which only need shape.
pub trait Catalog {
    fn table_info(&self, schema: &str, table: &str) -> CsResult<TableDescriptor>;
}

/// One parameterized, preparable statement against the target
/// connection.
pub trait PreparedStatement {
    fn bind(&mut self, index: usize, value: &Value) -> CsResult<()>;
    fn step(&mut self) -> CsResult<StepResult>;
    fn reset(&mut self) -> CsResult<()>;
    fn column(&self, index: usize) -> CsResult<Value>;
    fn column_count(&self) -> usize;
}

/// The target (or source) connection the core drives.
///
/// `prepare`/`bind`/`step`/`reset` stand in for the engine's own
/// prepared-statement lifecycle; `Statement::drop` stands in for
/// `finalize` -- RAII in place of an explicit lifecycle call.
pub trait HostConnection {
    type Statement: PreparedStatement;

    fn prepare(&self, sql: &str) -> CsResult<Self::Statement>;

    /// Number of rows affected by the most recently completed DML
    /// statement on this connection (mirrors `sqlite3_changes`).
    fn changes(&self) -> u64;

    fn savepoint(&self, name: &str) -> CsResult<()>;
    fn release_savepoint(&self, name: &str) -> CsResult<()>;
    fn rollback_to_savepoint(&self, name: &str) -> CsResult<()>;

    fn catalog(&self) -> &dyn Catalog;
}
