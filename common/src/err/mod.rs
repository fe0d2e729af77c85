use thiserror::Error;

/// The kinds a core operation can fail with.
///
/// Conflict kinds (`DataConflict`, `NotFound`, `UniqueConflict`,
/// `OtherConstraint`) are only ever surfaced through the applier's
/// conflict callback (see `changeset::applier`); they are never
/// returned directly from a public call unless the callback itself
/// replies with something other than `Omit`/`Replace`.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CsError {
    #[error("out of memory")]
    OutOfMemory,

    #[error("corrupt changeset: {0}")]
    CorruptFormat(String),

    #[error("schema changed for table {table}: expected {expected} columns, found {found}")]
    SchemaChanged {
        table: String,
        expected: usize,
        found: usize,
    },

    #[error("data conflict on table {0}")]
    DataConflict(String),

    #[error("row not found in table {0}")]
    NotFound(String),

    #[error("unique constraint conflict on table {0}")]
    UniqueConflict(String),

    #[error("constraint violation on table {0}")]
    OtherConstraint(String),

    #[error("misuse: {0}")]
    Misuse(String),

    #[error("index {index} out of range [0, {len})")]
    Range { index: i64, len: usize },

    #[error("applier aborted by conflict callback")]
    Abort,

    #[error("iterator exhausted")]
    Done,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Utf8(#[from] std::string::FromUtf8Error),
}

impl CsError {
    /// True for the conflict-kind variants that may only be reported
    /// through the applier's conflict callback.
    pub fn is_conflict_kind(&self) -> bool {
        matches!(
            self,
            CsError::DataConflict(_)
                | CsError::NotFound(_)
                | CsError::UniqueConflict(_)
                | CsError::OtherConstraint(_)
        )
    }
}

pub type CsResult<T> = Result<T, CsError>;
