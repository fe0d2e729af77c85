//! The changeset encoder: joins captured pre-images with current row
//! state to emit INSERT/UPDATE/DELETE records, suppressing no-op
//! updates and empty table groups.

use common::err::{CsError, CsResult};
use memory::Buffer;
use tracing::debug;

use crate::engine::{HostConnection, PreparedStatement, StepResult};
use crate::op::Op;
use crate::session::AttachedTable;
use crate::value::Value;

const TABLE_HEADER_TAG: u8 = b'T';

pub(crate) fn encode_session<C: HostConnection>(
    connection: &C,
    schema_name: &str,
    tables: &mut [AttachedTable],
) -> CsResult<Vec<u8>> {
    let mut out = Buffer::new();

    for table in tables.iter_mut() {
        if table.changes.is_empty() {
            continue;
        }
        // The descriptor is immutable for the life of the session
        // once populated; it was already derived from the catalog
        // the first time this table was mutated, so the encoder
        // reuses it rather than re-querying.
        let desc = table
            .descriptor
            .as_ref()
            .expect("non-empty change table implies a populated descriptor")
            .clone();

        let group_start = out.len();
        write_table_header(&mut out, &desc.name, desc.n_col, &desc.pk)?;

        let select_sql = format!(
            "SELECT * FROM {schema_name}.{} WHERE rowid = ?",
            desc.name
        );
        let mut select = connection.prepare(&select_sql)?;
        if select.column_count() != desc.n_col {
            return Err(CsError::SchemaChanged {
                table: desc.name.clone(),
                expected: desc.n_col,
                found: select.column_count(),
            });
        }

        let mut emitted = 0usize;
        for change in table.changes.iter() {
            select.reset()?;
            select.bind(0, &Value::Int64(change.rowid))?;
            let found = matches!(select.step()?, StepResult::Row);

            if found {
                match &change.pre_image {
                    None => {
                        write_insert(&mut out, &mut select, desc.n_col, change.indirect)?;
                        emitted += 1;
                    }
                    Some(pre_image) => {
                        if write_update(&mut out, &mut select, &desc, pre_image, change.indirect)?
                        {
                            emitted += 1;
                        }
                    }
                }
            } else if let Some(pre_image) = &change.pre_image {
                write_delete(&mut out, pre_image, change.indirect)?;
                emitted += 1;
            }
            // Row absent from the target and no pre-image: an
            // in-session INSERT of a row that no longer exists and
            // was never actually committed. Nothing to emit.
        }

        if emitted == 0 {
            out.truncate(group_start);
        } else {
            debug!(table = %desc.name, records = emitted, "encoded table group");
        }
    }

    out.into_vec()
}

pub(crate) fn write_table_header(
    out: &mut Buffer,
    name: &str,
    n_col: usize,
    pk: &[bool],
) -> CsResult<()> {
    out.append_u8(TABLE_HEADER_TAG)?;
    out.append_varint(n_col as u32)?;
    for &is_pk in pk {
        out.append_u8(is_pk as u8)?;
    }
    out.append_bytes(name.as_bytes())?;
    out.append_u8(0)?;
    Ok(())
}

fn write_insert<S: PreparedStatement>(
    out: &mut Buffer,
    row: &mut S,
    n_col: usize,
    indirect: bool,
) -> CsResult<()> {
    out.append_u8(Op::Insert.wire_byte())?;
    out.append_u8(indirect as u8)?;
    for i in 0..n_col {
        row.column(i)?.serialize(out)?;
    }
    Ok(())
}

fn write_delete(out: &mut Buffer, pre_image: &[u8], indirect: bool) -> CsResult<()> {
    out.append_u8(Op::Delete.wire_byte())?;
    out.append_u8(indirect as u8)?;
    out.append_bytes(pre_image)?;
    Ok(())
}

/// Returns `true` if a (non-no-op) UPDATE record was written.
fn write_update<S: PreparedStatement>(
    out: &mut Buffer,
    row: &mut S,
    desc: &crate::table::TableDescriptor,
    pre_image: &[u8],
    indirect: bool,
) -> CsResult<bool> {
    let mut old_half = Buffer::new();
    let mut new_half = Buffer::new();
    let mut carried_any = false;

    let mut pos = 0usize;
    for i in 0..desc.n_col {
        let n_advance = Value::size_at(&pre_image[pos..])?;
        let old_slice = &pre_image[pos..pos + n_advance];
        pos += n_advance;

        let current = row.column(i)?;
        let mut current_bytes = Buffer::new();
        current.serialize(&mut current_bytes)?;
        let current_bytes = current_bytes.into_vec()?;

        let must_carry = desc.is_pk(i) || current_bytes.as_slice() != old_slice;

        if must_carry {
            carried_any = true;
            old_half.append_bytes(old_slice)?;
            new_half.append_bytes(&current_bytes)?;
        } else {
            old_half.append_u8(crate::value::TAG_UNDEF)?;
            new_half.append_u8(crate::value::TAG_UNDEF)?;
        }
    }

    if !carried_any {
        return Ok(false);
    }

    out.append_u8(Op::Update.wire_byte())?;
    out.append_u8(indirect as u8)?;
    out.append_bytes(old_half.as_slice())?;
    out.append_bytes(new_half.as_slice())?;
    Ok(true)
}
