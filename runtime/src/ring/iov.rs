//! Scatter/gather write and read helpers over a byte-offset address space.
//!
//! An IOV is an `(offset, len)` pair into the owning region's data area
//! (spec.md §3 glossary). A payload that spans multiple IOVs is split across
//! them in order (spec.md §8, "IOV split" boundary behavior).

use shared::errors::RingError;

/// Anything addressable by absolute byte offset that SCSI emulation and
/// handlers can scatter/gather into. Implemented by [`crate::ring::mailbox::MappedRegion`]
/// for production use and by a plain buffer in tests.
pub trait IovTarget {
    fn read_at(&self, offset: u64, dst: &mut [u8]) -> Result<(), RingError>;
    fn write_at(&self, offset: u64, src: &[u8]) -> Result<(), RingError>;
}

/// Write `data` across `iovs` in order, splitting at IOV boundaries.
///
/// Returns an error if `data` is longer than the combined IOV capacity or if
/// any IOV offset is out of range.
pub fn write_scattered(
    target: &dyn IovTarget,
    iovs: &[(u64, u64)],
    mut data: &[u8],
) -> Result<(), RingError> {
    for &(off, len) in iovs {
        if data.is_empty() {
            break;
        }
        let take = (len as usize).min(data.len());
        target.write_at(off, &data[..take])?;
        data = &data[take..];
    }
    Ok(())
}

/// Read `len` bytes gathered from `iovs` in order.
pub fn read_gathered(
    target: &dyn IovTarget,
    iovs: &[(u64, u64)],
    len: usize,
) -> Result<Vec<u8>, RingError> {
    let mut out = Vec::with_capacity(len);
    for &(off, iov_len) in iovs {
        if out.len() >= len {
            break;
        }
        let remaining = len - out.len();
        let take = (iov_len as usize).min(remaining);
        let mut buf = vec![0u8; take];
        target.read_at(off, &mut buf)?;
        out.extend_from_slice(&buf);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    struct ByteBuf(RefCell<Vec<u8>>);

    impl IovTarget for ByteBuf {
        fn read_at(&self, offset: u64, dst: &mut [u8]) -> Result<(), RingError> {
            let buf = self.0.borrow();
            let off = offset as usize;
            dst.copy_from_slice(&buf[off..off + dst.len()]);
            Ok(())
        }
        fn write_at(&self, offset: u64, src: &[u8]) -> Result<(), RingError> {
            let mut buf = self.0.borrow_mut();
            let off = offset as usize;
            buf[off..off + src.len()].copy_from_slice(src);
            Ok(())
        }
    }

    #[test]
    fn write_splits_across_iovs() {
        let buf = ByteBuf(RefCell::new(vec![0u8; 32]));
        let iovs = [(0u64, 4u64), (4u64, 4u64), (8u64, 4u64)];
        write_scattered(&buf, &iovs, &[0xA5; 10]).unwrap();
        let data = buf.0.borrow();
        assert_eq!(&data[0..10], &[0xA5; 10]);
        assert_eq!(&data[10..12], &[0, 0]);
    }

    #[test]
    fn read_gathers_across_iovs() {
        let mut init = vec![0u8; 32];
        init[0..4].copy_from_slice(&[1, 2, 3, 4]);
        init[4..8].copy_from_slice(&[5, 6, 7, 8]);
        let buf = ByteBuf(RefCell::new(init));
        let iovs = [(0u64, 4u64), (4u64, 4u64)];
        let out = read_gathered(&buf, &iovs, 8).unwrap();
        assert_eq!(out, vec![1, 2, 3, 4, 5, 6, 7, 8]);
    }
}
