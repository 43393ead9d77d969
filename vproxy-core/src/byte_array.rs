//! Bounds-checked byte views
//!
//! [`ByteArray`] is the byte container every codec reads from and writes
//! into. It wraps [`bytes::Bytes`] so that sub views are zero-copy, and
//! switches to an owned [`bytes::BytesMut`] the first time it is written,
//! so repeated in-place patches of a cached packet do not copy again.
//!
//! All integer accessors come in network byte order (the default) and in
//! reversed (little-endian) order with an `_le` suffix. Every access is
//! checked against the view boundary and reports [`Error::OutOfBounds`]
//! instead of panicking.

use crate::error::{Error, Result};
use bytes::{Bytes, BytesMut};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Deref;

#[derive(Clone)]
enum Repr {
    Shared(Bytes),
    Owned(BytesMut),
}

/// A bounds-checked view over a byte region
#[derive(Clone)]
pub struct ByteArray {
    repr: Repr,
}

impl ByteArray {
    /// Create an empty byte array
    pub fn new() -> Self {
        ByteArray {
            repr: Repr::Shared(Bytes::new()),
        }
    }

    /// Allocate `len` zero bytes
    pub fn allocate(len: usize) -> Self {
        ByteArray {
            repr: Repr::Owned(BytesMut::zeroed(len)),
        }
    }

    /// Wrap a static byte slice without copying
    pub fn from_static(bytes: &'static [u8]) -> Self {
        ByteArray {
            repr: Repr::Shared(Bytes::from_static(bytes)),
        }
    }

    /// Copy a byte slice into a new array
    pub fn copy_from_slice(bytes: &[u8]) -> Self {
        ByteArray {
            repr: Repr::Shared(Bytes::copy_from_slice(bytes)),
        }
    }

    /// Number of bytes in the view
    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    /// Check if the view is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Borrow the bytes of this view
    pub fn as_slice(&self) -> &[u8] {
        match &self.repr {
            Repr::Shared(b) => b,
            Repr::Owned(b) => b,
        }
    }

    fn check(&self, offset: usize, width: usize) -> Result<()> {
        let len = self.len();
        match offset.checked_add(width) {
            Some(end) if end <= len => Ok(()),
            _ => Err(Error::OutOfBounds { offset, width, len }),
        }
    }

    fn read<const N: usize>(&self, offset: usize) -> Result<[u8; N]> {
        self.check(offset, N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(&self.as_slice()[offset..offset + N]);
        Ok(out)
    }

    fn make_mut(&mut self) -> &mut BytesMut {
        if let Repr::Shared(b) = &self.repr {
            self.repr = Repr::Owned(BytesMut::from(&b[..]));
        }
        match &mut self.repr {
            Repr::Owned(b) => b,
            Repr::Shared(_) => unreachable!("shared bytes converted to owned above"),
        }
    }

    /// Read one byte
    pub fn get(&self, offset: usize) -> Result<u8> {
        Ok(self.read::<1>(offset)?[0])
    }

    /// Read one byte (alias of [`ByteArray::get`])
    pub fn uint8(&self, offset: usize) -> Result<u8> {
        self.get(offset)
    }

    pub fn uint16(&self, offset: usize) -> Result<u16> {
        Ok(u16::from_be_bytes(self.read(offset)?))
    }

    pub fn uint24(&self, offset: usize) -> Result<u32> {
        let b = self.read::<3>(offset)?;
        Ok(u32::from_be_bytes([0, b[0], b[1], b[2]]))
    }

    pub fn uint32(&self, offset: usize) -> Result<u32> {
        Ok(u32::from_be_bytes(self.read(offset)?))
    }

    pub fn uint64(&self, offset: usize) -> Result<u64> {
        Ok(u64::from_be_bytes(self.read(offset)?))
    }

    pub fn uint16_le(&self, offset: usize) -> Result<u16> {
        Ok(u16::from_le_bytes(self.read(offset)?))
    }

    pub fn uint24_le(&self, offset: usize) -> Result<u32> {
        let b = self.read::<3>(offset)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], 0]))
    }

    pub fn uint32_le(&self, offset: usize) -> Result<u32> {
        Ok(u32::from_le_bytes(self.read(offset)?))
    }

    pub fn uint64_le(&self, offset: usize) -> Result<u64> {
        Ok(u64::from_le_bytes(self.read(offset)?))
    }

    pub fn int16(&self, offset: usize) -> Result<i16> {
        Ok(i16::from_be_bytes(self.read(offset)?))
    }

    pub fn int32(&self, offset: usize) -> Result<i32> {
        Ok(i32::from_be_bytes(self.read(offset)?))
    }

    pub fn int64(&self, offset: usize) -> Result<i64> {
        Ok(i64::from_be_bytes(self.read(offset)?))
    }

    pub fn int16_le(&self, offset: usize) -> Result<i16> {
        Ok(i16::from_le_bytes(self.read(offset)?))
    }

    pub fn int32_le(&self, offset: usize) -> Result<i32> {
        Ok(i32::from_le_bytes(self.read(offset)?))
    }

    pub fn int64_le(&self, offset: usize) -> Result<i64> {
        Ok(i64::from_le_bytes(self.read(offset)?))
    }

    /// Overwrite bytes starting at `offset`
    pub fn write_slice(&mut self, offset: usize, bytes: &[u8]) -> Result<()> {
        self.check(offset, bytes.len())?;
        self.make_mut()[offset..offset + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    /// Write one byte
    pub fn set(&mut self, offset: usize, value: u8) -> Result<()> {
        self.write_slice(offset, &[value])
    }

    pub fn set_u16(&mut self, offset: usize, value: u16) -> Result<()> {
        self.write_slice(offset, &value.to_be_bytes())
    }

    /// Write the low 24 bits of `value`
    pub fn set_u24(&mut self, offset: usize, value: u32) -> Result<()> {
        self.write_slice(offset, &value.to_be_bytes()[1..])
    }

    pub fn set_u32(&mut self, offset: usize, value: u32) -> Result<()> {
        self.write_slice(offset, &value.to_be_bytes())
    }

    pub fn set_u64(&mut self, offset: usize, value: u64) -> Result<()> {
        self.write_slice(offset, &value.to_be_bytes())
    }

    pub fn set_u16_le(&mut self, offset: usize, value: u16) -> Result<()> {
        self.write_slice(offset, &value.to_le_bytes())
    }

    /// Write the low 24 bits of `value` in reversed order
    pub fn set_u24_le(&mut self, offset: usize, value: u32) -> Result<()> {
        self.write_slice(offset, &value.to_le_bytes()[..3])
    }

    pub fn set_u32_le(&mut self, offset: usize, value: u32) -> Result<()> {
        self.write_slice(offset, &value.to_le_bytes())
    }

    pub fn set_u64_le(&mut self, offset: usize, value: u64) -> Result<()> {
        self.write_slice(offset, &value.to_le_bytes())
    }

    /// View of `len` bytes starting at `offset`
    ///
    /// Shared storage is sliced without copying. An array that has been
    /// written to since its last [`ByteArray::freeze`] is copied.
    pub fn sub(&self, offset: usize, len: usize) -> Result<ByteArray> {
        self.check(offset, len)?;
        let bytes = match &self.repr {
            Repr::Shared(b) => b.slice(offset..offset + len),
            Repr::Owned(b) => Bytes::copy_from_slice(&b[offset..offset + len]),
        };
        Ok(ByteArray {
            repr: Repr::Shared(bytes),
        })
    }

    /// View from `offset` to the end
    pub fn sub_from(&self, offset: usize) -> Result<ByteArray> {
        let len = self.len().checked_sub(offset).ok_or(Error::OutOfBounds {
            offset,
            width: 0,
            len: self.len(),
        })?;
        self.sub(offset, len)
    }

    /// Copying concatenation
    pub fn concat(&self, other: &ByteArray) -> ByteArray {
        let mut buf = BytesMut::with_capacity(self.len() + other.len());
        buf.extend_from_slice(self.as_slice());
        buf.extend_from_slice(other.as_slice());
        ByteArray {
            repr: Repr::Owned(buf),
        }
    }

    /// Move owned storage into shared storage so clones are cheap
    pub fn freeze(&mut self) {
        if let Repr::Owned(b) = &mut self.repr {
            let owned = std::mem::take(b);
            self.repr = Repr::Shared(owned.freeze());
        }
    }

    /// Export as an immutable [`Bytes`] handle
    pub fn into_bytes(self) -> Bytes {
        match self.repr {
            Repr::Shared(b) => b,
            Repr::Owned(b) => b.freeze(),
        }
    }

    /// Copy the bytes out
    pub fn to_vec(&self) -> Vec<u8> {
        self.as_slice().to_vec()
    }

    /// Lower-case hex rendering without separators
    pub fn to_hex_string(&self) -> String {
        hex::encode(self.as_slice())
    }
}

impl Default for ByteArray {
    fn default() -> Self {
        ByteArray::new()
    }
}

impl Deref for ByteArray {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl AsRef<[u8]> for ByteArray {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl PartialEq for ByteArray {
    fn eq(&self, other: &Self) -> bool {
        self.as_slice() == other.as_slice()
    }
}

impl Eq for ByteArray {}

impl Hash for ByteArray {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.as_slice().hash(state)
    }
}

impl fmt::Debug for ByteArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ByteArray({})", self.to_hex_string())
    }
}

impl From<Vec<u8>> for ByteArray {
    fn from(v: Vec<u8>) -> Self {
        ByteArray {
            repr: Repr::Shared(Bytes::from(v)),
        }
    }
}

impl From<&[u8]> for ByteArray {
    fn from(v: &[u8]) -> Self {
        ByteArray::copy_from_slice(v)
    }
}

impl<const N: usize> From<[u8; N]> for ByteArray {
    fn from(v: [u8; N]) -> Self {
        ByteArray::copy_from_slice(&v)
    }
}

impl From<Bytes> for ByteArray {
    fn from(b: Bytes) -> Self {
        ByteArray {
            repr: Repr::Shared(b),
        }
    }
}

impl From<BytesMut> for ByteArray {
    fn from(b: BytesMut) -> Self {
        ByteArray {
            repr: Repr::Owned(b),
        }
    }
}
