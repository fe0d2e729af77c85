//! The growable buffer backing every byte stream the core produces
//! (changesets, table groups, row records). Reworked from the
//! teacher's `memory::Buffer`, which relied on the nightly
//! `allocator_api`/`slice_ptr_get` features to manage raw,
//! fixed-length segments directly. This version keeps the same
//! externally observable contract -- amortized-O(1) append,
//! doubling growth starting at 128 bytes, a poisoned state after an
//! allocation failure -- on top of a single `Vec<u8>`, which is the
//! idiomatic and stable way to get the same guarantees.

pub mod varint;

use common::err::{CsError, CsResult};

const INITIAL_CAPACITY: usize = 128;

/// An append-only byte buffer. Once poisoned by an allocation
/// failure, every further append is a no-op that returns the
/// original error.
#[derive(Debug)]
pub struct Buffer {
    data: Vec<u8>,
    poison: Option<CsError>,
}

impl Default for Buffer {
    fn default() -> Self {
        Self::new()
    }
}

impl Buffer {
    pub fn new() -> Self {
        Buffer {
            data: Vec::new(),
            poison: None,
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Buffer {
            data: Vec::with_capacity(capacity),
            poison: None,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Hands back ownership of the accumulated bytes, consuming the
    /// buffer. Returns the latched error instead, if poisoned.
    pub fn into_vec(self) -> CsResult<Vec<u8>> {
        match self.poison {
            Some(e) => Err(e),
            None => Ok(self.data),
        }
    }

    /// Truncates the buffer back to `len` bytes. Used by the encoder
    /// to rewind a table group or an UPDATE record that turned out
    /// to be a no-op.
    pub fn truncate(&mut self, len: usize) {
        self.data.truncate(len);
    }

    fn reserve(&mut self, extra: usize) -> CsResult<()> {
        if let Some(e) = &self.poison {
            return Err(e.clone());
        }
        if self.data.capacity() - self.data.len() >= extra {
            return Ok(());
        }
        let mut target = self.data.capacity().max(INITIAL_CAPACITY);
        while target - self.data.len() < extra {
            target = target.saturating_mul(2);
        }
        if self
            .data
            .try_reserve(target - self.data.capacity())
            .is_err()
        {
            self.poison = Some(CsError::OutOfMemory);
            return Err(CsError::OutOfMemory);
        }
        Ok(())
    }

    pub fn append_u8(&mut self, byte: u8) -> CsResult<()> {
        self.reserve(1)?;
        self.data.push(byte);
        Ok(())
    }

    pub fn append_bytes(&mut self, bytes: &[u8]) -> CsResult<()> {
        self.reserve(bytes.len())?;
        self.data.extend_from_slice(bytes);
        Ok(())
    }

    /// Appends a fixed 8-byte big-endian integer, used for the
    /// INT64/FLOAT64 value payloads.
    pub fn append_fixed8_be(&mut self, bytes: [u8; 8]) -> CsResult<()> {
        self.append_bytes(&bytes)
    }

    /// Appends `value` as a varint.
    pub fn append_varint(&mut self, value: u32) -> CsResult<usize> {
        self.reserve(5)?;
        let before = self.data.len();
        varint::encode_varint(value, &mut self.data);
        Ok(self.data.len() - before)
    }
}
