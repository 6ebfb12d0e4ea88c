//! Growable byte buffer with a cursor, used as the payload container of
//! every batched message.

mod codec;

use std::{marker::PhantomData, ops::Range};

use thiserror::Error;

pub use codec::Serial;

/// Default size of a freshly created buffer
pub const DEFAULT_CAPACITY: usize = 32 * 1024;
/// Extra bytes allocated whenever the buffer has to grow
pub const GROW_SLACK: usize = 4 * 1024;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SerialError {
    #[error("buffer underrun: requested {requested} bytes, {available} available")]
    BufferUnderrun { requested: usize, available: usize },
    #[error("invalid utf-8 in serialized string")]
    InvalidString,
}

/// Owned byte vector with a read/write cursor.
///
/// The whole backing store is addressable, `index <= len` always holds.
/// Writing past the end grows the store, reading past the end fails.
#[derive(Debug, Clone)]
pub struct SerialBuffer {
    buffer: Vec<u8>,
    index: usize,
}

/// Reserved, typed slot in a [`SerialBuffer`], filled in later.
/// Used for headers whose values are known only after the payload is written.
#[derive(Debug)]
pub struct Placeholder<T> {
    offset: usize,
    _marker: PhantomData<T>,
}

impl<T> Clone for Placeholder<T> {
    fn clone(&self) -> Self {
        Self {
            offset: self.offset,
            _marker: PhantomData,
        }
    }
}

impl<T> Copy for Placeholder<T> {}

impl SerialBuffer {
    pub fn new(size: usize) -> Self {
        Self {
            buffer: vec![0; size],
            index: 0,
        }
    }

    /// Current cursor position
    pub fn index(&self) -> usize {
        self.index
    }

    /// Move the cursor, growing the store if `index` lies past its end
    pub fn set_index(&mut self, index: usize) {
        if index > self.buffer.len() {
            self.buffer.resize(index, 0);
        }
        self.index = index;
    }

    /// Size of the backing store
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Bytes between the cursor and the end of the store
    pub fn remaining(&self) -> usize {
        self.buffer.len() - self.index
    }

    /// Make sure `size` bytes are addressable from the cursor on. Cursor does not move.
    pub fn reserve(&mut self, size: usize) {
        let needed = self.index + size;
        if needed > self.buffer.len() {
            self.buffer.resize(needed, 0);
        }
    }

    /// Copy `data` at the cursor and advance it.
    pub fn write(&mut self, data: &[u8]) {
        let end = self.index + data.len();
        if end > self.buffer.len() {
            self.buffer.resize(end + GROW_SLACK, 0);
        }
        self.buffer[self.index..end].copy_from_slice(data);
        self.index = end;
    }

    /// Fill `data` from the cursor and advance it.
    pub fn read(&mut self, data: &mut [u8]) -> Result<(), SerialError> {
        let available = self.remaining();
        if data.len() > available {
            return Err(SerialError::BufferUnderrun {
                requested: data.len(),
                available,
            });
        }
        let end = self.index + data.len();
        data.copy_from_slice(&self.buffer[self.index..end]);
        self.index = end;
        Ok(())
    }

    /// Borrow `len` bytes at the cursor and advance it.
    pub fn take(&mut self, len: usize) -> Result<&[u8], SerialError> {
        let available = self.remaining();
        if len > available {
            return Err(SerialError::BufferUnderrun {
                requested: len,
                available,
            });
        }
        let start = self.index;
        self.index += len;
        Ok(&self.buffer[start..self.index])
    }

    /// Resets the cursor, keeps the memory.
    pub fn clear(&mut self) {
        self.index = 0;
    }

    /// Write a typed value at the cursor
    pub fn put<T: Serial>(&mut self, value: &T) {
        value.write_to(self);
    }

    /// Read a typed value at the cursor
    pub fn get<T: Serial>(&mut self) -> Result<T, SerialError> {
        T::read_from(self)
    }

    /// Reserve a slot of `T`'s encoded size at the cursor
    pub fn placeholder<T: Serial + Default>(&mut self) -> Placeholder<T> {
        let offset = self.index;
        T::default().write_to(self);
        Placeholder {
            offset,
            _marker: PhantomData,
        }
    }

    /// Write `value` into a slot reserved earlier, cursor stays where it was
    pub fn fill<T: Serial>(&mut self, slot: Placeholder<T>, value: &T) {
        let cursor = self.index;
        self.index = slot.offset;
        value.write_to(self);
        debug_assert!(self.index <= cursor, "placeholder value outgrew its slot");
        self.index = cursor;
    }

    /// Bytes in `range`, the store grows if needed
    pub fn chunk(&mut self, range: Range<usize>) -> &[u8] {
        if range.end > self.buffer.len() {
            self.buffer.resize(range.end, 0);
        }
        &self.buffer[range]
    }

    /// Mutable bytes in `range`, the store grows if needed
    pub fn chunk_mut(&mut self, range: Range<usize>) -> &mut [u8] {
        if range.end > self.buffer.len() {
            self.buffer.resize(range.end, 0);
        }
        &mut self.buffer[range]
    }

    /// Everything written so far
    pub fn written(&self) -> &[u8] {
        &self.buffer[..self.index]
    }
}

impl Default for SerialBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
