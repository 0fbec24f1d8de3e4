use std::fmt;

use miette::Diagnostic;
use thiserror::Error;

/// Size of the 16-bit address space.
pub const ADDRESS_SPACE: usize = 0x10000;

/// Direction of a failed buffer access.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Access {
    Get,
    Put,
}

impl fmt::Display for Access {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Access::Get => write!(f, "get"),
            Access::Put => write!(f, "put"),
        }
    }
}

/// Access outside the stored bytes or past the buffer's size limit.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Error, Diagnostic)]
#[error("Attempted to {access} in buffer (pos: {pos} size: {size}) value with size: {requested}")]
#[diagnostic(code(buffer::out_of_range))]
pub struct BoundsError {
    pub access: Access,
    pub pos: usize,
    pub requested: usize,
    pub size: usize,
}

impl BoundsError {
    fn get(pos: usize, requested: usize, size: usize) -> Self {
        BoundsError {
            access: Access::Get,
            pos,
            requested,
            size,
        }
    }

    fn put(pos: usize, requested: usize, size: usize) -> Self {
        BoundsError {
            access: Access::Put,
            pos,
            requested,
            size,
        }
    }
}

/// Fixed-width little-endian values that can be moved in and out of a [`Buffer`].
pub trait Scalar: Copy {
    const SIZE: usize;

    /// `bytes` is exactly `SIZE` long.
    fn from_le(bytes: &[u8]) -> Self;
    fn write_le(self, out: &mut [u8]);
}

macro_rules! impl_scalar {
    ( $( $ty:ty ),* ) => {
        $(
            impl Scalar for $ty {
                const SIZE: usize = std::mem::size_of::<$ty>();

                fn from_le(bytes: &[u8]) -> Self {
                    let mut raw = [0u8; std::mem::size_of::<$ty>()];
                    raw.copy_from_slice(bytes);
                    <$ty>::from_le_bytes(raw)
                }

                fn write_le(self, out: &mut [u8]) {
                    out.copy_from_slice(&self.to_le_bytes());
                }
            }
        )*
    };
}

impl_scalar!(u8, i8, u16, i16, u32, i32);

/// Position inside a [`Buffer`].
///
/// A buffer owns one cursor; extra cursors can walk the same bytes through
/// [`Buffer::read_with`].
#[derive(Clone, Copy, PartialEq, Eq, Default, Debug)]
pub struct Cursor {
    pos: usize,
}

impl Cursor {
    pub fn new(pos: usize) -> Self {
        Cursor { pos }
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn set(&mut self, pos: usize) -> usize {
        self.pos = pos;
        self.pos
    }

    /// Move forward, stopping at `end`.
    pub fn advance(&mut self, len: usize, end: usize) {
        self.pos = self.pos.saturating_add(len);
        if self.pos > end {
            self.pos = end;
        }
    }

    /// Move backward, stopping at zero.
    pub fn backtrack(&mut self, len: usize) {
        self.pos = self.pos.saturating_sub(len);
    }
}

/// Growable byte store with a cursor, bounded by a size limit.
///
/// Used both as the object-code output stream (grows up to the address
/// space) and as emulator memory (fixed size, zero filled).
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Buffer {
    storage: Vec<u8>,
    cursor: Cursor,
    limit: usize,
}

impl Default for Buffer {
    fn default() -> Self {
        Self::new()
    }
}

impl Buffer {
    /// Empty buffer limited to the 16-bit address space.
    pub fn new() -> Self {
        Buffer {
            storage: Vec::new(),
            cursor: Cursor::default(),
            limit: ADDRESS_SPACE,
        }
    }

    /// Zero-filled buffer of exactly `size` bytes that never grows.
    pub fn fixed(size: usize) -> Self {
        Buffer {
            storage: vec![0; size],
            cursor: Cursor::default(),
            limit: size,
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, BoundsError> {
        let mut buf = Buffer::new();
        buf.append(bytes)?;
        buf.to_begin();
        Ok(buf)
    }

    pub fn contents(&self) -> &[u8] {
        &self.storage
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.storage
    }

    pub fn len(&self) -> usize {
        self.storage.len()
    }

    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn remaining(&self) -> usize {
        self.len().saturating_sub(self.pos())
    }

    pub fn clear(&mut self) {
        self.storage.clear();
        self.cursor.set(0);
    }

    // Cursor

    pub fn pos(&self) -> usize {
        self.cursor.pos()
    }

    pub fn set_pos(&mut self, pos: usize) -> usize {
        self.cursor.set(pos)
    }

    pub fn advance(&mut self, len: usize) {
        let end = self.len();
        self.cursor.advance(len, end);
    }

    pub fn backtrack(&mut self, len: usize) {
        self.cursor.backtrack(len);
    }

    pub fn to_begin(&mut self) {
        self.cursor.set(0);
    }

    pub fn to_end(&mut self) {
        let end = self.len();
        self.cursor.set(end);
    }

    // Writing

    /// Write `bytes` at the cursor, growing storage as needed, and advance.
    pub fn append(&mut self, bytes: &[u8]) -> Result<(), BoundsError> {
        if bytes.is_empty() {
            return Ok(());
        }
        let pos = self.pos();
        let end = pos
            .checked_add(bytes.len())
            .filter(|end| *end <= self.limit)
            .ok_or_else(|| BoundsError::put(pos, bytes.len(), self.len()))?;

        if self.storage.len() < end {
            self.storage.resize(end, 0);
        }
        self.storage[pos..end].copy_from_slice(bytes);
        self.cursor.set(end);
        Ok(())
    }

    /// Check that `len` more bytes fit at the cursor without writing them.
    pub fn ensure_room(&self, len: usize) -> Result<(), BoundsError> {
        let pos = self.pos();
        match pos.checked_add(len) {
            Some(end) if end <= self.limit => Ok(()),
            _ => Err(BoundsError::put(pos, len, self.len())),
        }
    }

    pub fn append_value<T: Scalar>(&mut self, value: T) -> Result<(), BoundsError> {
        let mut raw = [0u8; 8];
        value.write_le(&mut raw[..T::SIZE]);
        self.append(&raw[..T::SIZE])
    }

    /// Overwrite bytes in place. Never grows the buffer or moves the cursor.
    pub fn put(&mut self, pos: usize, bytes: &[u8]) -> Result<(), BoundsError> {
        let range = self
            .range(pos, bytes.len())
            .ok_or_else(|| BoundsError::put(pos, bytes.len(), self.len()))?;
        self.storage[range].copy_from_slice(bytes);
        Ok(())
    }

    pub fn put_value<T: Scalar>(&mut self, pos: usize, value: T) -> Result<(), BoundsError> {
        let range = self
            .range(pos, T::SIZE)
            .ok_or_else(|| BoundsError::put(pos, T::SIZE, self.len()))?;
        value.write_le(&mut self.storage[range]);
        Ok(())
    }

    // Reading

    /// Read at the cursor and advance past the value.
    pub fn read<T: Scalar>(&mut self) -> Result<T, BoundsError> {
        let mut cursor = self.cursor;
        let value = self.read_with(&mut cursor)?;
        self.cursor = cursor;
        Ok(value)
    }

    /// Read at `pos` without touching the cursor.
    pub fn read_at<T: Scalar>(&self, pos: usize) -> Result<T, BoundsError> {
        let range = self
            .range(pos, T::SIZE)
            .ok_or_else(|| BoundsError::get(pos, T::SIZE, self.len()))?;
        Ok(T::from_le(&self.storage[range]))
    }

    /// Read at an external cursor and advance it past the value.
    pub fn read_with<T: Scalar>(&self, cursor: &mut Cursor) -> Result<T, BoundsError> {
        let value = self.read_at(cursor.pos())?;
        cursor.set(cursor.pos() + T::SIZE);
        Ok(value)
    }

    /// Skip `len` bytes, failing if they are not all present.
    pub fn skip(&mut self, len: usize) -> Result<(), BoundsError> {
        let pos = self.pos();
        self.range(pos, len)
            .ok_or_else(|| BoundsError::get(pos, len, self.len()))?;
        self.cursor.set(pos + len);
        Ok(())
    }

    pub fn get(&self, pos: usize) -> Result<u8, BoundsError> {
        self.read_at(pos)
    }

    fn range(&self, pos: usize, len: usize) -> Option<std::ops::Range<usize>> {
        let end = pos.checked_add(len)?;
        (end <= self.len()).then_some(pos..end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_grows_and_advances() {
        let mut buf = Buffer::new();
        buf.append(&[1, 2, 3]).unwrap();
        buf.append_value(0xBEEFu16).unwrap();
        assert_eq!(buf.pos(), 5);
        assert_eq!(buf.contents(), &[1, 2, 3, 0xEF, 0xBE]);
    }

    #[test]
    fn append_overwrites_from_cursor() {
        let mut buf = Buffer::new();
        buf.append(&[1, 2, 3, 4]).unwrap();
        buf.set_pos(1);
        buf.append(&[9]).unwrap();
        assert_eq!(buf.contents(), &[1, 9, 3, 4]);
        assert_eq!(buf.pos(), 2);
    }

    #[test]
    fn append_respects_address_space() {
        let mut buf = Buffer::new();
        buf.append(&vec![0; ADDRESS_SPACE - 1]).unwrap();
        buf.append(&[0]).unwrap();
        let err = buf.append(&[0]).unwrap_err();
        assert_eq!(
            err,
            BoundsError {
                access: Access::Put,
                pos: ADDRESS_SPACE,
                requested: 1,
                size: ADDRESS_SPACE,
            }
        );
    }

    #[test]
    fn room_check_leaves_buffer_alone() {
        let mut buf = Buffer::fixed(4);
        buf.append(&[1, 2]).unwrap();
        assert_eq!(buf.ensure_room(2), Ok(()));
        assert_eq!(
            buf.ensure_room(3),
            Err(BoundsError {
                access: Access::Put,
                pos: 2,
                requested: 3,
                size: 4,
            })
        );
        assert!(buf.ensure_room(usize::MAX).is_err());
        assert_eq!(buf.pos(), 2);
    }

    #[test]
    fn fixed_buffer_never_grows() {
        let mut buf = Buffer::fixed(4);
        buf.append(&[1, 2, 3]).unwrap();
        assert!(buf.append(&[4, 5]).is_err());
        assert_eq!(buf.len(), 4);
    }

    #[test]
    fn read_checks_bounds() {
        let mut buf = Buffer::from_bytes(&[0x34, 0x12, 0xFF]).unwrap();
        assert_eq!(buf.read::<u16>().unwrap(), 0x1234);
        assert_eq!(buf.read_at::<i8>(2).unwrap(), -1);
        let err = buf.read::<u16>().unwrap_err();
        assert_eq!(err.access, Access::Get);
        assert_eq!((err.pos, err.requested, err.size), (2, 2, 3));
        // Failed read leaves the cursor alone
        assert_eq!(buf.pos(), 2);
    }

    #[test]
    fn put_does_not_grow() {
        let mut buf = Buffer::from_bytes(&[0, 0, 0]).unwrap();
        buf.put_value(1, 0x0102u16).unwrap();
        assert_eq!(buf.contents(), &[0, 2, 1]);
        assert!(buf.put(2, &[1, 1]).is_err());
        assert_eq!(buf.pos(), 0);
    }

    #[test]
    fn cursor_movement_is_clamped() {
        let mut buf = Buffer::from_bytes(&[0; 8]).unwrap();
        buf.advance(5);
        assert_eq!(buf.pos(), 5);
        buf.advance(10);
        assert_eq!(buf.pos(), 8);
        buf.backtrack(3);
        assert_eq!(buf.pos(), 5);
        buf.backtrack(30);
        assert_eq!(buf.pos(), 0);
        buf.to_end();
        assert_eq!(buf.remaining(), 0);
    }

    #[test]
    fn external_cursor_shares_bytes() {
        let mut buf = Buffer::fixed(8);
        buf.put_value(6, 0x4242u16).unwrap();
        let mut sp = Cursor::new(6);
        assert_eq!(buf.read_with::<u16>(&mut sp).unwrap(), 0x4242);
        assert_eq!(sp.pos(), 8);
        assert_eq!(buf.pos(), 0);
        assert!(buf.read_with::<u16>(&mut sp).is_err());
    }

    #[test]
    fn skip_requires_bytes() {
        let mut buf = Buffer::from_bytes(&[0; 3]).unwrap();
        buf.skip(2).unwrap();
        assert!(buf.skip(2).is_err());
        assert_eq!(buf.pos(), 2);
    }
}
