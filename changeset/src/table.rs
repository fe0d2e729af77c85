//! The table descriptor: name, column count, and a primary-key
//! bitmap, obtained lazily from the host engine's catalog on first
//! mutation and immutable for the life of the session once
//! populated.

/// Describes one table's shape as seen by a session or an iterator.
#[derive(Debug, Clone, PartialEq)]
pub struct TableDescriptor {
    pub name: String,
    pub n_col: usize,
    /// `pk[i]` is true iff column `i` is part of the primary key.
    pub pk: Vec<bool>,
    /// Column names in declared order. Empty when the descriptor was
    /// derived from wire bytes alone (the changeset format carries no
    /// column names, only a PK bitmap) rather than from the host
    /// engine's catalog -- the applier is the only consumer that
    /// needs these, to build its generated SQL.
    pub columns: Vec<String>,
}

impl TableDescriptor {
    pub fn new(name: impl Into<String>, pk: Vec<bool>) -> Self {
        let n_col = pk.len();
        TableDescriptor {
            name: name.into(),
            n_col,
            pk,
            columns: Vec::new(),
        }
    }

    pub fn with_columns(name: impl Into<String>, pk: Vec<bool>, columns: Vec<String>) -> Self {
        let mut desc = Self::new(name, pk);
        desc.columns = columns;
        desc
    }

    #[inline]
    pub fn is_pk(&self, column: usize) -> bool {
        self.pk.get(column).copied().unwrap_or(false)
    }

    pub fn pk_columns(&self) -> impl Iterator<Item = usize> + '_ {
        self.pk
            .iter()
            .enumerate()
            .filter(|(_, is_pk)| **is_pk)
            .map(|(i, _)| i)
    }

    pub fn column_name(&self, index: usize) -> Option<&str> {
        self.columns.get(index).map(|s| s.as_str())
    }
}
