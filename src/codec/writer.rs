//! Bounded cursor writer.
//!
//! ```text
//! buf: ┌───────────── written ─────────────┬──── free ────┬─ reserved ─┐
//!      0                                  pos           limit     buf.len()
//! ```
//!
//! Every write either fits entirely below `limit` or is refused without
//! touching the buffer. Bytes can be reserved up front (e.g. for a closing
//! bracket) and released just before the trailer is written.

use crate::error::CodecError;

pub struct BoundedWriter<'a> {
    buf: &'a mut [u8],
    pos: usize,
    limit: usize,
}

impl<'a> BoundedWriter<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        let limit = buf.len();
        Self { buf, pos: 0, limit }
    }

    /// Bytes written so far.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes still writable before the reserved tail.
    pub fn remaining(&self) -> usize {
        self.limit - self.pos
    }

    /// Hold back `n` bytes at the end of the buffer.
    pub fn reserve(&mut self, n: usize) -> Result<(), CodecError> {
        if self.remaining() < n {
            return Err(CodecError::BufferTooSmall);
        }
        self.limit -= n;
        Ok(())
    }

    /// Give back `n` previously reserved bytes.
    pub fn release(&mut self, n: usize) {
        self.limit = (self.limit + n).min(self.buf.len());
    }

    pub fn write(&mut self, bytes: &[u8]) -> Result<(), CodecError> {
        if bytes.len() > self.remaining() {
            return Err(CodecError::BufferTooSmall);
        }
        self.buf[self.pos..self.pos + bytes.len()].copy_from_slice(bytes);
        self.pos += bytes.len();
        Ok(())
    }

    /// Roll back to an earlier position.
    pub fn truncate(&mut self, pos: usize) {
        self.pos = self.pos.min(pos);
    }

    /// The writable region between the cursor and the reserved tail.
    pub fn unwritten_mut(&mut self) -> &mut [u8] {
        &mut self.buf[self.pos..self.limit]
    }

    /// Commit `n` bytes written directly into [`Self::unwritten_mut`].
    pub fn advance(&mut self, n: usize) {
        self.pos = (self.pos + n).min(self.limit);
    }
}
