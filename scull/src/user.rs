//! Caller-supplied memory
//!
//! Transfers never touch caller memory directly. They go through these
//! traits, which is where [`DeviceError::Fault`] comes from. Byte slices and
//! arrays are always accessible; other implementations (memory-mapped
//! regions, test doubles) may refuse.

use crate::error::DeviceError;

/// Direction of a caller-memory access
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// The device reads from caller memory
    Read,
    /// The device writes into caller memory
    Write,
}

/// Destination of a read transfer
pub trait UserSink {
    /// Bytes the caller can receive
    fn capacity(&self) -> usize;

    /// Copy `src` into caller memory at `at`
    fn copy_to_user(&mut self, at: usize, src: &[u8]) -> Result<(), DeviceError>;
}

/// Source of a write transfer
pub trait UserSource {
    /// Bytes the caller offers
    fn len(&self) -> usize;

    #[must_use]
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy caller memory at `at` into `dst`
    fn copy_from_user(&self, at: usize, dst: &mut [u8]) -> Result<(), DeviceError>;
}

/// A single `int` in caller memory, as passed to control verbs
pub trait UserWord {
    /// Whether the word may be accessed in the given direction
    fn access_ok(&self, access: Access) -> bool;

    fn get_user(&self) -> Result<i32, DeviceError>;

    fn put_user(&mut self, value: i32) -> Result<(), DeviceError>;
}

fn range(at: usize, n: usize, len: usize) -> Result<std::ops::Range<usize>, DeviceError> {
    let end = at.checked_add(n).ok_or(DeviceError::Fault)?;
    if end > len {
        return Err(DeviceError::Fault);
    }
    Ok(at..end)
}

impl UserSink for [u8] {
    fn capacity(&self) -> usize {
        self.len()
    }

    fn copy_to_user(&mut self, at: usize, src: &[u8]) -> Result<(), DeviceError> {
        let r = range(at, src.len(), self.len())?;
        #[allow(clippy::indexing_slicing)]
        self[r].copy_from_slice(src);
        Ok(())
    }
}

impl<const N: usize> UserSink for [u8; N] {
    fn capacity(&self) -> usize {
        N
    }

    fn copy_to_user(&mut self, at: usize, src: &[u8]) -> Result<(), DeviceError> {
        self.as_mut_slice().copy_to_user(at, src)
    }
}

impl UserSource for [u8] {
    fn len(&self) -> usize {
        <[u8]>::len(self)
    }

    fn copy_from_user(&self, at: usize, dst: &mut [u8]) -> Result<(), DeviceError> {
        let r = range(at, dst.len(), <[u8]>::len(self))?;
        #[allow(clippy::indexing_slicing)]
        dst.copy_from_slice(&self[r]);
        Ok(())
    }
}

impl<const N: usize> UserSource for [u8; N] {
    fn len(&self) -> usize {
        N
    }

    fn copy_from_user(&self, at: usize, dst: &mut [u8]) -> Result<(), DeviceError> {
        self.as_slice().copy_from_user(at, dst)
    }
}

impl UserWord for i32 {
    fn access_ok(&self, _access: Access) -> bool {
        true
    }

    fn get_user(&self) -> Result<i32, DeviceError> {
        Ok(*self)
    }

    fn put_user(&mut self, value: i32) -> Result<(), DeviceError> {
        *self = value;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slice_copies_are_bounds_checked() {
        let mut buf = [0u8; 4];
        buf.copy_to_user(1, b"ab").unwrap();
        assert_eq!(&buf, b"\0ab\0");
        assert_eq!(buf.copy_to_user(3, b"ab"), Err(DeviceError::Fault));

        let src: &[u8] = b"hello";
        let mut dst = [0u8; 3];
        src.copy_from_user(2, &mut dst).unwrap();
        assert_eq!(&dst, b"llo");
        assert_eq!(src.copy_from_user(4, &mut dst), Err(DeviceError::Fault));
    }
}
