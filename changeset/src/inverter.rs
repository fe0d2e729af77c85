//! The changeset inverter: a structural, one-pass transform. Table headers are copied verbatim; INSERT and DELETE
//! bodies swap roles; UPDATE swaps its old/new halves. Any record
//! this process cannot make sense of fails the whole transform and
//! the partial output is discarded, never returned.

use common::err::CsResult;
use memory::Buffer;

use crate::encoder::write_table_header;
use crate::iterator::{ChangesetIter, IterOutcome};
use crate::op::Op;

/// Inverts a well-formed changeset: applying the result undoes
/// applying the input, and vice versa.
pub fn invert(changeset: &[u8]) -> CsResult<Vec<u8>> {
    let mut out = Buffer::new();
    let mut iter = ChangesetIter::start(changeset);
    let mut current_group: Option<String> = None;

    loop {
        match iter.next()? {
            IterOutcome::Done => break,
            IterOutcome::Row => {
                let table = iter.table()?.clone();
                if current_group.as_deref() != Some(table.name.as_str()) {
                    write_table_header(&mut out, &table.name, table.n_col, &table.pk)?;
                    current_group = Some(table.name.clone());
                }

                let op = iter.op()?;
                out.append_u8(op.inverted().wire_byte())?;
                out.append_u8(iter.indirect() as u8)?;

                match op {
                    Op::Insert => {
                        for i in 0..table.n_col {
                            iter.new_value(i)?.serialize(&mut out)?;
                        }
                    }
                    Op::Delete => {
                        for i in 0..table.n_col {
                            iter.old(i)?.serialize(&mut out)?;
                        }
                    }
                    Op::Update => {
                        for i in 0..table.n_col {
                            iter.new_value(i)?.serialize(&mut out)?;
                        }
                        for i in 0..table.n_col {
                            iter.old(i)?.serialize(&mut out)?;
                        }
                    }
                }
            }
        }
    }

    out.into_vec()
}
