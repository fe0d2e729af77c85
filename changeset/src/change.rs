//! `RowChange`: the per-row capture keyed by `rowid`.
//!
//! A hash table entry stores its record bytes immediately after its
//! header in one allocation, so a single free releases the whole row.
//! A `Vec<u8>` gives the same property for free in safe Rust: dropping
//! the `RowChange` drops its one heap allocation, there is nothing
//! extra to release.

/// The captured state of one row mutated at most once per session.
#[derive(Debug, Clone)]
pub struct RowChange {
    pub rowid: i64,
    /// Absent for a row whose first recorded mutation was an INSERT.
    /// When present, a densely packed sequence of `n_col` serialized
    /// `Value`s in table column order -- the exact byte layout of one
    /// DELETE record body.
    pub pre_image: Option<Vec<u8>>,
    /// The session's indirect flag at the time this row was first
    /// recorded, carried to the wire verbatim.
    pub indirect: bool,
}

impl RowChange {
    pub fn insert(rowid: i64, indirect: bool) -> Self {
        RowChange {
            rowid,
            pre_image: None,
            indirect,
        }
    }

    pub fn with_pre_image(rowid: i64, pre_image: Vec<u8>, indirect: bool) -> Self {
        RowChange {
            rowid,
            pre_image: Some(pre_image),
            indirect,
        }
    }

    #[inline]
    pub fn is_insert(&self) -> bool {
        self.pre_image.is_none()
    }
}
