//! The mapped mailbox region: header accessors over the `memmap2`-backed
//! shared-memory segment a UIO device exposes, plus the ring-entry
//! header/body view layered on top of it.
//!
//! Grounded on the RAII-mapping pattern in
//! `examples/N10h0ggr-Gladix/user-agent/src/communications/memory_ring.rs`
//! (map once, wrap in a `Send + Sync` newtype, expose atomic cursor
//! accessors) and the mailbox/`cmd_head`/`cmd_tail`/`cmdr_off`/`cmdr_size`
//! field semantics of `examples/original_source/main.c`'s `tcmu_mailbox`.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use memmap2::MmapRaw;
use shared::constants::mailbox as mb;
use shared::errors::RingError;

use crate::ring::iov::IovTarget;

/// A `mmap`-backed mailbox + command ring, owned for the lifetime of one
/// attached device.
///
/// The kernel and this runtime both write into the mapping, so every access
/// goes through the atomic/copy accessors below rather than ordinary slice
/// indexing. `MmapRaw` is `!Sync` only because of its use of raw pointers,
/// not because concurrent access is unsound here: the mailbox protocol
/// itself (spec.md §6) is what keeps head/tail accesses race-free.
pub struct MappedRegion {
    mmap: MmapRaw,
    len: u64,
}

unsafe impl Send for MappedRegion {}
unsafe impl Sync for MappedRegion {}

impl MappedRegion {
    pub fn new(mmap: MmapRaw) -> Result<Self, RingError> {
        let len = mmap.len() as u64;
        if (len as usize) < mb::HEADER_LEN {
            return Err(RingError::MapTooSmall(len));
        }
        Ok(Self { mmap, len })
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    fn base(&self) -> *mut u8 {
        self.mmap.as_mut_ptr()
    }

    pub fn check_range(&self, offset: u64, len: u64) -> Result<(), RingError> {
        let end = offset.checked_add(len).ok_or(RingError::OutOfRange {
            offset,
            len,
            map_len: self.len,
        })?;
        if end > self.len {
            return Err(RingError::OutOfRange {
                offset,
                len,
                map_len: self.len,
            });
        }
        Ok(())
    }

    fn field_u32(&self, off: usize) -> &AtomicU32 {
        unsafe { &*(self.base().add(off) as *const AtomicU32) }
    }

    fn field_u64(&self, off: usize) -> &AtomicU64 {
        unsafe { &*(self.base().add(off) as *const AtomicU64) }
    }

    pub fn version(&self) -> u32 {
        self.field_u32(mb::VERSION_OFF).load(Ordering::Relaxed)
    }

    pub fn cmdr_off(&self) -> u32 {
        self.field_u32(mb::CMDR_OFF_OFF).load(Ordering::Relaxed)
    }

    pub fn cmdr_size(&self) -> Result<u32, RingError> {
        let size = self.field_u32(mb::CMDR_SIZE_OFF).load(Ordering::Relaxed);
        if size == 0 || (size & (size - 1)) != 0 {
            return Err(RingError::BadRingSize(size));
        }
        Ok(size)
    }

    /// The next entry offset (relative to `cmdr_off`) the kernel will write,
    /// written by the kernel and read by this runtime.
    pub fn cmd_head(&self) -> u64 {
        self.field_u64(mb::CMD_HEAD_OFF).load(Ordering::Acquire)
    }

    /// The oldest not-yet-completed entry offset, written by this runtime
    /// and read by the kernel.
    pub fn cmd_tail(&self) -> u64 {
        self.field_u64(mb::CMD_TAIL_OFF).load(Ordering::Acquire)
    }

    pub fn set_cmd_tail(&self, value: u64) {
        self.field_u64(mb::CMD_TAIL_OFF).store(value, Ordering::Release);
    }
}

impl IovTarget for MappedRegion {
    fn read_at(&self, offset: u64, dst: &mut [u8]) -> Result<(), RingError> {
        self.check_range(offset, dst.len() as u64)?;
        unsafe {
            std::ptr::copy_nonoverlapping(self.base().add(offset as usize), dst.as_mut_ptr(), dst.len());
        }
        Ok(())
    }

    fn write_at(&self, offset: u64, src: &[u8]) -> Result<(), RingError> {
        self.check_range(offset, src.len() as u64)?;
        unsafe {
            std::ptr::copy_nonoverlapping(src.as_ptr(), self.base().add(offset as usize), src.len());
        }
        Ok(())
    }
}

/// Ring-entry header: 8 bytes, little-endian `u32` packing a 4-bit opcode in
/// the low bits and a 28-bit entry length (including this header) in the
/// high bits, followed by 4 reserved bytes (spec.md §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryHeader {
    pub opcode: u8,
    pub length: u32,
}

pub const ENTRY_HEADER_LEN: u64 = 8;

/// Body layout for an `OP_CMD` entry, immediately after the header:
/// `cdb_off: u32` (@ +8), `iov_cnt: u32` (@ +12), then `iov_cnt` inline
/// `(base: u64, len: u64)` pairs (@ +16, 16 bytes each), followed by
/// `scsi_status: u8` and a 96-byte `sense_buffer`.
pub const CMD_CDB_OFF_OFF: u64 = 8;
pub const CMD_IOV_CNT_OFF: u64 = 12;
pub const CMD_IOV_ARRAY_OFF: u64 = 16;
pub const IOV_ENTRY_LEN: u64 = 16;

impl EntryHeader {
    pub fn encode(opcode: u8, length: u32) -> Result<[u8; 8], RingError> {
        if length == 0 || length % 8 != 0 {
            return Err(RingError::BadEntryLength(length));
        }
        let packed = (opcode as u32 & 0x0F) | (length << 4);
        let mut buf = [0u8; 8];
        buf[0..4].copy_from_slice(&packed.to_le_bytes());
        Ok(buf)
    }

    pub fn decode(raw: &[u8; 8]) -> Result<Self, RingError> {
        let packed = u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]);
        let opcode = (packed & 0x0F) as u8;
        let length = packed >> 4;
        if length == 0 || length % 8 != 0 {
            return Err(RingError::BadEntryLength(length));
        }
        Ok(Self { opcode, length })
    }

    pub fn read_from<T: IovTarget>(target: &T, off: u64) -> Result<Self, RingError> {
        let mut raw = [0u8; 8];
        target.read_at(off, &mut raw)?;
        Self::decode(&raw)
    }

    pub fn write_to<T: IovTarget>(target: &T, off: u64, opcode: u8, length: u32) -> Result<(), RingError> {
        let raw = Self::encode(opcode, length)?;
        target.write_at(off, &raw)
    }
}

/// Read the inline IOV array of an `OP_CMD` entry at ring offset `entry_off`.
pub fn read_iovs<T: IovTarget>(target: &T, entry_off: u64, iov_cnt: u32) -> Result<Vec<(u64, u64)>, RingError> {
    let mut out = Vec::with_capacity(iov_cnt as usize);
    for i in 0..iov_cnt as u64 {
        let base_off = entry_off + CMD_IOV_ARRAY_OFF + i * IOV_ENTRY_LEN;
        let mut raw = [0u8; 16];
        target.read_at(base_off, &mut raw)?;
        let base = u64::from_le_bytes(raw[0..8].try_into().unwrap());
        let len = u64::from_le_bytes(raw[8..16].try_into().unwrap());
        out.push((base, len));
    }
    Ok(out)
}

pub fn read_cdb_off<T: IovTarget>(target: &T, entry_off: u64) -> Result<u32, RingError> {
    let mut raw = [0u8; 4];
    target.read_at(entry_off + CMD_CDB_OFF_OFF, &mut raw)?;
    Ok(u32::from_le_bytes(raw))
}

pub fn read_iov_cnt<T: IovTarget>(target: &T, entry_off: u64) -> Result<u32, RingError> {
    let mut raw = [0u8; 4];
    target.read_at(entry_off + CMD_IOV_CNT_OFF, &mut raw)?;
    Ok(u32::from_le_bytes(raw))
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
    fn entry_header_round_trip() {
        let buf = ByteBuf(RefCell::new(vec![0u8; 64]));
        EntryHeader::write_to(&buf, 0, 1, 64).unwrap();
        let decoded = EntryHeader::read_from(&buf, 0).unwrap();
        assert_eq!(decoded.opcode, 1);
        assert_eq!(decoded.length, 64);
    }

    #[test]
    fn entry_header_rejects_misaligned_length() {
        assert!(EntryHeader::encode(1, 3).is_err());
        assert!(EntryHeader::encode(1, 0).is_err());
    }

    #[test]
    fn iov_array_round_trip() {
        let buf = ByteBuf(RefCell::new(vec![0u8; 128]));
        let entry_off = 0u64;
        buf.write_at(entry_off + CMD_IOV_ARRAY_OFF, &100u64.to_le_bytes()).unwrap();
        buf.write_at(entry_off + CMD_IOV_ARRAY_OFF + 8, &32u64.to_le_bytes()).unwrap();
        let iovs = read_iovs(&buf, entry_off, 1).unwrap();
        assert_eq!(iovs, vec![(100, 32)]);
    }
}
