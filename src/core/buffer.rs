//! # ByteBuffer
//!
//! Growable, single-owner byte block that holds packet payloads.
//!
//! Every sized access is validated against the current length before any byte
//! moves: `offset + size` past the end is a [`ProtocolError::OutOfBounds`],
//! never a silent clamp. Negative offsets count back from the end, so
//! `-4` addresses the last four bytes.
//!
//! Buffers are moved between owners rather than shared; cloning copies.

use std::ops::Deref;

use bytes::{Bytes, BytesMut};

use crate::error::{ProtocolError, Result};

/// Fixed-width big-endian scalar that can live inside a [`ByteBuffer`].
pub trait Scalar: Sized + Copy {
    const SIZE: usize;
    fn read_be(src: &[u8]) -> Self;
    fn write_be(self, dst: &mut [u8]);
}

macro_rules! impl_scalar {
    ($($t:ty),*) => {$(
        impl Scalar for $t {
            const SIZE: usize = std::mem::size_of::<$t>();

            fn read_be(src: &[u8]) -> Self {
                let mut raw = [0u8; std::mem::size_of::<$t>()];
                raw.copy_from_slice(&src[..Self::SIZE]);
                <$t>::from_be_bytes(raw)
            }

            fn write_be(self, dst: &mut [u8]) {
                dst[..Self::SIZE].copy_from_slice(&self.to_be_bytes());
            }
        }
    )*};
}

impl_scalar!(u8, u16, u32, u64, i8, i32, i64);

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ByteBuffer {
    data: BytesMut,
}

impl ByteBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Zero-filled buffer of `len` bytes.
    pub fn alloc(len: usize) -> Self {
        Self {
            data: BytesMut::zeroed(len),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Grow (zero-filling the tail) or truncate. Resizing to zero releases the block.
    pub fn resize(&mut self, len: usize) {
        if len == 0 {
            self.data = BytesMut::new();
        } else {
            self.data.resize(len, 0);
        }
    }

    /// Resolve `offset` against the current length and check `size` fits after it.
    fn span(&self, offset: isize, size: usize) -> Result<usize> {
        let len = self.len();
        let out_of_bounds = || ProtocolError::OutOfBounds { offset, size, len };

        let start = if offset < 0 {
            len.checked_sub(offset.unsigned_abs()).ok_or_else(out_of_bounds)?
        } else {
            offset as usize
        };
        match start.checked_add(size) {
            Some(end) if end <= len => Ok(start),
            _ => Err(out_of_bounds()),
        }
    }

    /// Copy all of `src` into the buffer at `offset`.
    pub fn assign_from(&mut self, src: &[u8], offset: isize) -> Result<()> {
        let start = self.span(offset, src.len())?;
        self.data[start..start + src.len()].copy_from_slice(src);
        Ok(())
    }

    /// Fill all of `dst` from the buffer starting at `offset`.
    pub fn assign_to(&self, dst: &mut [u8], offset: isize) -> Result<()> {
        let start = self.span(offset, dst.len())?;
        dst.copy_from_slice(&self.data[start..start + dst.len()]);
        Ok(())
    }

    /// Overlap-safe move of `size` bytes from `src_offset` to `dst_offset`.
    pub fn move_within(&mut self, src_offset: isize, dst_offset: isize, size: usize) -> Result<()> {
        let src = self.span(src_offset, size)?;
        let dst = self.span(dst_offset, size)?;
        self.data.copy_within(src..src + size, dst);
        Ok(())
    }

    /// Insert `head` in front of the current contents, in place.
    pub fn prepend(&mut self, head: &[u8]) -> Result<()> {
        let body = self.len();
        self.resize(body + head.len());
        self.move_within(0, head.len() as isize, body)?;
        self.assign_from(head, 0)
    }

    pub fn extend_from_slice(&mut self, tail: &[u8]) {
        self.data.extend_from_slice(tail);
    }

    /// Borrow `size` bytes at `offset`.
    pub fn slice(&self, offset: isize, size: usize) -> Result<&[u8]> {
        let start = self.span(offset, size)?;
        Ok(&self.data[start..start + size])
    }

    /// Typed big-endian read at `offset`.
    pub fn read<T: Scalar>(&self, offset: isize) -> Result<T> {
        let start = self.span(offset, T::SIZE)?;
        Ok(T::read_be(&self.data[start..]))
    }

    /// Typed big-endian write at `offset`.
    pub fn write<T: Scalar>(&mut self, offset: isize, value: T) -> Result<()> {
        let start = self.span(offset, T::SIZE)?;
        value.write_be(&mut self.data[start..]);
        Ok(())
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.data.to_vec()
    }

    pub fn freeze(self) -> Bytes {
        self.data.freeze()
    }
}

impl Deref for ByteBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.data
    }
}

impl AsRef<[u8]> for ByteBuffer {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

impl From<Vec<u8>> for ByteBuffer {
    fn from(v: Vec<u8>) -> Self {
        Self {
            data: BytesMut::from(&v[..]),
        }
    }
}

impl From<&[u8]> for ByteBuffer {
    fn from(v: &[u8]) -> Self {
        Self {
            data: BytesMut::from(v),
        }
    }
}

impl From<BytesMut> for ByteBuffer {
    fn from(data: BytesMut) -> Self {
        Self { data }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    #[test]
    fn alloc_is_zeroed_and_resize_zero_fills() {
        let mut buf = ByteBuffer::alloc(4);
        assert_eq!(buf.as_slice(), &[0, 0, 0, 0]);
        buf.assign_from(&[1, 2, 3, 4], 0).unwrap();
        buf.resize(6);
        assert_eq!(buf.as_slice(), &[1, 2, 3, 4, 0, 0]);
        buf.resize(2);
        assert_eq!(buf.as_slice(), &[1, 2]);
        buf.resize(0);
        assert!(buf.is_empty());
    }

    #[test]
    fn negative_offsets_address_the_tail() {
        let mut buf = ByteBuffer::from(vec![0u8; 8]);
        buf.assign_from(&[9, 9], -2).unwrap();
        assert_eq!(&buf[6..], &[9, 9]);

        let mut out = [0u8; 3];
        buf.assign_to(&mut out, -3).unwrap();
        assert_eq!(out, [0, 9, 9]);

        assert!(buf.assign_from(&[1, 2, 3], -2).is_err());
        assert!(buf.assign_from(&[1], -9).is_err());
    }

    #[test]
    fn out_of_bounds_never_clamps() {
        let mut buf = ByteBuffer::alloc(4);
        let err = buf.assign_from(&[1, 2, 3], 2).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::OutOfBounds {
                offset: 2,
                size: 3,
                len: 4
            }
        ));
        assert_eq!(buf.as_slice(), &[0, 0, 0, 0]);

        let mut dst = [7u8; 5];
        assert!(buf.assign_to(&mut dst, 0).is_err());
        assert_eq!(dst, [7u8; 5]);
        assert!(buf.read::<u64>(0).is_err());
        assert!(buf.slice(isize::MAX, 1).is_err());
    }

    #[test]
    fn move_within_handles_overlap() {
        let mut buf = ByteBuffer::from(vec![1, 2, 3, 4, 5, 0, 0]);
        buf.move_within(0, 2, 5).unwrap();
        assert_eq!(&buf[2..], &[1, 2, 3, 4, 5]);
        assert!(buf.move_within(0, 3, 5).is_err());
    }

    #[test]
    fn prepend_shifts_payload_in_place() {
        let mut buf = ByteBuffer::from(vec![0xAA, 0xBB]);
        buf.prepend(&[1, 2, 3]).unwrap();
        assert_eq!(buf.as_slice(), &[1, 2, 3, 0xAA, 0xBB]);
    }

    #[test]
    fn typed_access_is_big_endian() {
        let mut buf = ByteBuffer::alloc(12);
        buf.write::<i32>(0, -2).unwrap();
        buf.write::<u64>(4, 0x0102_0304_0506_0708).unwrap();
        assert_eq!(&buf[..4], &[0xFF, 0xFF, 0xFF, 0xFE]);
        assert_eq!(buf[4], 0x01);
        assert_eq!(buf.read::<i32>(0).unwrap(), -2);
        assert_eq!(buf.read::<u64>(-8).unwrap(), 0x0102_0304_0506_0708);
    }

    #[test]
    fn equality_compares_length_then_content() {
        assert_eq!(ByteBuffer::from(vec![1, 2]), ByteBuffer::from(&[1u8, 2][..]));
        assert_ne!(ByteBuffer::from(vec![1, 2]), ByteBuffer::from(vec![1, 2, 0]));
        assert_ne!(ByteBuffer::from(vec![1, 2]), ByteBuffer::from(vec![1, 3]));
    }
}
