use thiserror::Error;

/// Ring-protocol faults. Every variant here is a spec.md §7 "device-fatal"
/// error: the entry or mailbox is corrupt in a way that makes further
/// progress on this device unsafe, so the device is torn down.
#[derive(Error, Debug)]
pub enum RingError {
    #[error("offset {offset} + len {len} exceeds mapped region of {map_len} bytes")]
    OutOfRange {
        offset: u64,
        len: u64,
        map_len: u64,
    },

    #[error("cmdr_size {0} is not a power of two")]
    BadRingSize(u32),

    #[error("entry length {0} is not a positive multiple of 8")]
    BadEntryLength(u32),

    #[error("mapped region ({0} bytes) too small to hold a mailbox header")]
    MapTooSmall(u64),

    #[error("cmd_tail {0} lies outside [0, cmdr_size)")]
    TailOutOfBounds(u64),
}
