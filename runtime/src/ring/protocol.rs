//! The drain loop: walks new ring entries up to `cmd_head`, dispatches each
//! `OP_CMD` entry, skips `OP_PAD` padding, and advances `cmd_tail`
//! contiguously from the oldest incomplete entry (spec.md §9, Open Question
//! 1: async completions may finish out of order, but `cmd_tail` must never
//! skip ahead of an entry still in flight).
//!
//! Grounded on the head/tail walk in `examples/original_source/main.c`'s
//! `tcmu_handle_device_events`, generalized with an explicit pending queue
//! so `HANDLED_ASYNC` completions (spec.md §4.5) can land out of order.

use std::collections::VecDeque;
use std::sync::Mutex;

use shared::constants::{entry, ring_op};
use shared::errors::RingError;

use crate::ring::iov::IovTarget;
use crate::ring::mailbox::{
    read_iov_cnt, EntryHeader, MappedRegion, CMD_IOV_ARRAY_OFF, IOV_ENTRY_LEN,
};

/// What a dispatch callback decided for one `OP_CMD` entry.
pub enum DispatchOutcome {
    /// Completed inline; status/sense are written immediately and the entry
    /// is eligible to advance `cmd_tail` as soon as it reaches the front.
    Sync {
        status: u8,
        sense: [u8; entry::SENSE_LEN],
    },
    /// Handed off to a worker; some later `complete_async` call will supply
    /// status/sense for this entry.
    Async,
}

struct PendingEntry {
    off: u64,
    len: u64,
    done: bool,
}

struct CompletionState {
    /// Ring-relative offset (wrapped into `[0, cmdr_size)`) of the next
    /// entry this driver has not yet examined.
    next_unseen: u64,
    pending: VecDeque<PendingEntry>,
}

/// Drives one device's command ring: walks new entries, dispatches them,
/// and tracks which have completed so `cmd_tail` only ever advances past a
/// contiguous run of done entries.
pub struct RingDriver {
    region: MappedRegion,
    cmdr_off: u64,
    cmdr_size: u64,
    state: Mutex<CompletionState>,
}

impl RingDriver {
    pub fn new(region: MappedRegion) -> Result<Self, RingError> {
        let cmdr_off = region.cmdr_off() as u64;
        let cmdr_size = region.cmdr_size()? as u64;
        let next_unseen = region.cmd_tail();
        Ok(Self {
            region,
            cmdr_off,
            cmdr_size,
            state: Mutex::new(CompletionState {
                next_unseen,
                pending: VecDeque::new(),
            }),
        })
    }

    pub fn region(&self) -> &MappedRegion {
        &self.region
    }

    /// Walk every entry between the last-seen position and `cmd_head`,
    /// dispatching `OP_CMD` entries and skipping `OP_PAD` ones. Returns
    /// `true` iff `cmd_tail` advanced, in which case the caller must write
    /// exactly one kernel-wake byte (spec.md §8).
    pub fn drain<F>(&self, mut dispatch: F) -> Result<bool, RingError>
    where
        F: FnMut(&MappedRegion, u64, EntryHeader) -> Result<DispatchOutcome, RingError>,
    {
        let head = self.region.cmd_head() % self.cmdr_size;
        let mut state = self.state.lock().unwrap();
        while state.next_unseen != head {
            let abs = self.cmdr_off + state.next_unseen;
            let header = EntryHeader::read_from(&self.region, abs)?;
            let entry_len = header.length as u64;
            let off = state.next_unseen;
            state.next_unseen = (state.next_unseen + entry_len) % self.cmdr_size;

            if header.opcode == ring_op::OP_PAD {
                continue;
            }

            let outcome = dispatch(&self.region, abs, header)?;
            let done = match &outcome {
                DispatchOutcome::Sync { status, sense } => {
                    write_status_sense(&self.region, abs, *status, sense)?;
                    true
                }
                DispatchOutcome::Async => false,
            };
            state.pending.push_back(PendingEntry {
                off,
                len: entry_len,
                done,
            });
        }
        Ok(self.try_advance_locked(&mut state))
    }

    /// Record the result of an asynchronous completion and advance/wake if
    /// it unblocks the front of the pending queue.
    pub fn complete_async(
        &self,
        entry_off: u64,
        status: u8,
        sense: &[u8; entry::SENSE_LEN],
    ) -> Result<bool, RingError> {
        write_status_sense(&self.region, entry_off, status, sense)?;
        let mut state = self.state.lock().unwrap();
        let rel = entry_off - self.cmdr_off;
        if let Some(e) = state.pending.iter_mut().find(|e| e.off == rel) {
            e.done = true;
        }
        Ok(self.try_advance_locked(&mut state))
    }

    fn try_advance_locked(&self, state: &mut CompletionState) -> bool {
        let mut advanced = false;
        while matches!(state.pending.front(), Some(e) if e.done) {
            let front = state.pending.pop_front().unwrap();
            let new_tail = (front.off + front.len) % self.cmdr_size;
            self.region.set_cmd_tail(new_tail);
            advanced = true;
        }
        advanced
    }
}

fn write_status_sense(
    region: &MappedRegion,
    entry_off: u64,
    status: u8,
    sense: &[u8; entry::SENSE_LEN],
) -> Result<(), RingError> {
    let iov_cnt = read_iov_cnt(region, entry_off)?;
    let status_off = entry_off + CMD_IOV_ARRAY_OFF + (iov_cnt as u64) * IOV_ENTRY_LEN;
    region.write_at(status_off, &[status])?;
    region.write_at(status_off + 1, sense)
}

#[cfg(test)]
mod tests {
    use super::*;
    use memmap2::MmapOptions;
    use shared::constants::{mailbox as mb, scsi_status};

    fn make_region(cmdr_size: u32) -> MappedRegion {
        let total = mb::HEADER_LEN + cmdr_size as usize;
        let mmap = MmapOptions::new().len(total).map_anon().unwrap();
        let raw = memmap2::MmapRaw::from(mmap);
        let region = MappedRegion::new(raw).unwrap();
        region.write_at(mb::CMDR_OFF_OFF as u64, &(mb::HEADER_LEN as u32).to_le_bytes()).unwrap();
        region.write_at(mb::CMDR_SIZE_OFF as u64, &cmdr_size.to_le_bytes()).unwrap();
        region
    }

    fn write_cmd_entry(region: &MappedRegion, cmdr_off: u64, rel: u64, len: u32) {
        EntryHeader::write_to(region, cmdr_off + rel, ring_op::OP_CMD, len).unwrap();
        region.write_at(cmdr_off + rel + 12, &0u32.to_le_bytes()).unwrap(); // iov_cnt = 0
    }

    #[test]
    fn empty_drain_does_not_advance() {
        let region = make_region(4096);
        let driver = RingDriver::new(region).unwrap();
        let advanced = driver.drain(|_, _, _| unreachable!()).unwrap();
        assert!(!advanced);
    }

    #[test]
    fn sync_completion_advances_tail_and_wakes() {
        let region = make_region(4096);
        let cmdr_off = region.cmdr_off() as u64;
        write_cmd_entry(&region, cmdr_off, 0, 32);
        region.write_at(mb::CMD_HEAD_OFF as u64, &32u64.to_le_bytes()).unwrap();

        let driver = RingDriver::new(region).unwrap();
        let advanced = driver
            .drain(|_, _, header| {
                assert_eq!(header.opcode, ring_op::OP_CMD);
                Ok(DispatchOutcome::Sync {
                    status: scsi_status::GOOD,
                    sense: [0u8; entry::SENSE_LEN],
                })
            })
            .unwrap();
        assert!(advanced);
        assert_eq!(driver.region().cmd_tail(), 32);
    }

    #[test]
    fn pad_entry_is_skipped_without_dispatch() {
        let region = make_region(4096);
        let cmdr_off = region.cmdr_off() as u64;
        EntryHeader::write_to(&region, cmdr_off, ring_op::OP_PAD, 16).unwrap();
        write_cmd_entry(&region, cmdr_off, 16, 32);
        region.write_at(mb::CMD_HEAD_OFF as u64, &48u64.to_le_bytes()).unwrap();

        let driver = RingDriver::new(region).unwrap();
        let mut dispatched = 0;
        driver
            .drain(|_, _, header| {
                dispatched += 1;
                assert_eq!(header.opcode, ring_op::OP_CMD);
                Ok(DispatchOutcome::Sync {
                    status: scsi_status::GOOD,
                    sense: [0u8; entry::SENSE_LEN],
                })
            })
            .unwrap();
        assert_eq!(dispatched, 1);
        assert_eq!(driver.region().cmd_tail(), 48);
    }

    #[test]
    fn async_completion_out_of_order_does_not_advance_past_pending() {
        let region = make_region(4096);
        let cmdr_off = region.cmdr_off() as u64;
        write_cmd_entry(&region, cmdr_off, 0, 32);
        write_cmd_entry(&region, cmdr_off, 32, 32);
        region.write_at(mb::CMD_HEAD_OFF as u64, &64u64.to_le_bytes()).unwrap();

        let driver = RingDriver::new(region).unwrap();
        let mut seen_offsets = Vec::new();
        let advanced = driver
            .drain(|_, off, _| {
                seen_offsets.push(off);
                Ok(DispatchOutcome::Async)
            })
            .unwrap();
        assert!(!advanced);
        assert_eq!(driver.region().cmd_tail(), 0);

        // Complete the second entry first; tail must not move yet.
        let second_off = seen_offsets[1];
        let advanced = driver
            .complete_async(second_off, scsi_status::GOOD, &[0u8; entry::SENSE_LEN])
            .unwrap();
        assert!(!advanced);
        assert_eq!(driver.region().cmd_tail(), 0);

        // Completing the first unblocks both.
        let first_off = seen_offsets[0];
        let advanced = driver
            .complete_async(first_off, scsi_status::GOOD, &[0u8; entry::SENSE_LEN])
            .unwrap();
        assert!(advanced);
        assert_eq!(driver.region().cmd_tail(), 64);
    }
}
