//! Per-device worker pool: every `OP_CMD` entry the drain loop sees is
//! executed on a worker thread rather than inline, so one slow command
//! (e.g. a large synchronous file write) cannot stall the event loop for
//! every other attached device (spec.md §4.6).
//!
//! Grounded on the named-thread-per-worker pattern in
//! `examples/N10h0ggr-Gladix/user-agent/src/scanning/worker_pool.rs`
//! (`thread::Builder::new().name(...)`, a bounded channel per worker,
//! round-robin dispatch, explicit shutdown sentinel) adapted from file
//! scanning to SCSI command execution.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{bounded, Sender};
use log::{error, trace};
use shared::constants::{entry, scsi_status};

use crate::handler::{HandledOutcome, OpenHandler};
use crate::ring::protocol::RingDriver;

pub struct Command {
    pub entry_off: u64,
    pub opcode: u8,
    pub cdb: Vec<u8>,
    pub iovs: Vec<(u64, u64)>,
}

enum WorkItem {
    Run(Command),
    Shutdown,
}

/// A bounded set of worker threads shared by one device. Commands are
/// handed out round-robin; completion order across workers is therefore
/// unconstrained, which is exactly what [`RingDriver::complete_async`] is
/// built to tolerate.
pub struct WorkerPool {
    senders: Vec<Sender<WorkItem>>,
    next: AtomicUsize,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn spawn(
        device_name: &str,
        num_workers: usize,
        queue_depth: usize,
        driver: Arc<RingDriver>,
        handler: Arc<dyn OpenHandler>,
    ) -> Self {
        let mut senders = Vec::with_capacity(num_workers);
        let mut handles = Vec::with_capacity(num_workers);
        for idx in 0..num_workers.max(1) {
            let (tx, rx) = bounded::<WorkItem>(queue_depth.max(1));
            let driver = Arc::clone(&driver);
            let handler = Arc::clone(&handler);
            let name = format!("tcmu-worker-{device_name}-{idx}");
            let handle = thread::Builder::new()
                .name(name.clone())
                .spawn(move || {
                    for item in rx.iter() {
                        match item {
                            WorkItem::Shutdown => break,
                            WorkItem::Run(cmd) => run_command(&driver, handler.as_ref(), cmd),
                        }
                    }
                    trace!("{name} exiting");
                })
                .expect("spawning worker thread");
            senders.push(tx);
            handles.push(handle);
        }
        Self {
            senders,
            next: AtomicUsize::new(0),
            handles,
        }
    }

    /// Hand a command to the next worker in round-robin order.
    pub fn dispatch(&self, cmd: Command) {
        let idx = self.next.fetch_add(1, Ordering::Relaxed) % self.senders.len();
        if self.senders[idx].send(WorkItem::Run(cmd)).is_err() {
            error!("worker {idx} channel closed; dropping command");
        }
    }

    /// Signal every worker to exit and join them. Consumes the pool.
    pub fn shutdown(mut self) {
        for sender in &self.senders {
            let _ = sender.send(WorkItem::Shutdown);
        }
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

fn run_command(driver: &RingDriver, handler: &dyn OpenHandler, cmd: Command) {
    let outcome = handler.handle_command(cmd.opcode, &cmd.cdb, &cmd.iovs, driver.region());
    let (status, sense) = match outcome {
        HandledOutcome::Sync { status, sense } => (status, sense),
        HandledOutcome::Async => return, // handler will complete this entry itself
        HandledOutcome::NotHandled => (
            scsi_status::CHECK_CONDITION,
            crate::scsi::emulate::build_sense(
                shared::constants::sense::KEY_ILLEGAL_REQUEST,
                shared::constants::sense::ASC_INVALID_COMMAND_OPERATION_CODE,
                0,
            ),
        ),
    };
    if let Err(err) = driver.complete_async(cmd.entry_off, status, &sense) {
        error!("completing entry at {:#x}: {err}", cmd.entry_off);
    }
    let _: [u8; entry::SENSE_LEN] = sense;
}

#[cfg(test)]
mod tests {
    use super::*;
    use memmap2::MmapOptions;
    use shared::constants::{mailbox as mb, opcode, ring_op};
    use std::sync::atomic::AtomicUsize as StdAtomicUsize;
    use std::sync::Mutex;

    use crate::handler::HandledOutcome as Outcome;
    use crate::ring::iov::IovTarget;
    use crate::ring::mailbox::{EntryHeader, MappedRegion};

    struct EchoHandler(StdAtomicUsize);
    impl OpenHandler for EchoHandler {
        fn handle_command(&self, _op: u8, _cdb: &[u8], _iovs: &[(u64, u64)], _region: &dyn IovTarget) -> Outcome {
            self.0.fetch_add(1, Ordering::SeqCst);
            Outcome::Sync {
                status: scsi_status::GOOD,
                sense: [0u8; entry::SENSE_LEN],
            }
        }
        fn close(&self) {}
    }

    fn make_driver() -> Arc<RingDriver> {
        let cmdr_size = 4096u32;
        let total = mb::HEADER_LEN + cmdr_size as usize;
        let mmap = MmapOptions::new().len(total).map_anon().unwrap();
        let region = MappedRegion::new(memmap2::MmapRaw::from(mmap)).unwrap();
        region.write_at(mb::CMDR_OFF_OFF as u64, &(mb::HEADER_LEN as u32).to_le_bytes()).unwrap();
        region.write_at(mb::CMDR_SIZE_OFF as u64, &cmdr_size.to_le_bytes()).unwrap();
        let cmdr_off = region.cmdr_off() as u64;
        EntryHeader::write_to(&region, cmdr_off, ring_op::OP_CMD, 32).unwrap();
        region.write_at(cmdr_off + 12, &0u32.to_le_bytes()).unwrap();
        region.write_at(mb::CMD_HEAD_OFF as u64, &32u64.to_le_bytes()).unwrap();
        Arc::new(RingDriver::new(region).unwrap())
    }

    #[test]
    fn dispatch_round_robins_across_worker_senders() {
        let driver = make_driver();
        let pool = WorkerPool::spawn(
            "t",
            4,
            8,
            Arc::clone(&driver),
            Arc::new(EchoHandler(StdAtomicUsize::new(0))),
        );
        let counts = Arc::new(Mutex::new(vec![0usize; pool.senders.len()]));
        for _ in 0..8 {
            let idx = pool.next.load(Ordering::Relaxed) % pool.senders.len();
            counts.lock().unwrap()[idx] += 1;
            pool.dispatch(Command {
                entry_off: driver.region().cmdr_off() as u64,
                opcode: opcode::TEST_UNIT_READY,
                cdb: vec![opcode::TEST_UNIT_READY],
                iovs: vec![],
            });
        }
        pool.shutdown();
        let counts = counts.lock().unwrap();
        assert!(counts.iter().all(|&c| (1..=3).contains(&c)));
    }
}
