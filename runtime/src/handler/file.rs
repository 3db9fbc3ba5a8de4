//! File-backed example handler: stores device blocks in a regular file on
//! the handler host's filesystem. Grounded directly on
//! `examples/original_source/file_example.c` (`file_open`, `file_handle_cmd`,
//! `file_close`), translated from the C synchronous-dispatch switch into a
//! `HandlerModule`/`OpenHandler` pair.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::sync::Mutex;

use log::{debug, warn};
use shared::constants::{entry, opcode, scsi_status, sense};
use shared::errors::HandlerError;

use crate::ring::iov::{read_gathered, write_scattered, IovTarget};
use crate::scsi::cdb::{self, CdbForm};
use crate::scsi::emulate::{self, DeviceGeometry};

use super::{HandledOutcome, HandlerModule, OpenHandler};

const SUBTYPE: &str = "file";

pub struct FileHandler;

impl FileHandler {
    pub fn new() -> Self {
        FileHandler
    }
}

impl Default for FileHandler {
    fn default() -> Self {
        Self::new()
    }
}

/// `file/<path>` — `<path>` is opened (created if absent) and truncated to
/// the device's advertised size if shorter.
fn parse_cfgstring(cfgstring: &str) -> Result<&str, HandlerError> {
    cfgstring
        .strip_prefix("file/")
        .filter(|path| !path.is_empty())
        .ok_or_else(|| HandlerError::Rejected(format!("malformed file config string: {cfgstring}")))
}

impl HandlerModule for FileHandler {
    fn subtype(&self) -> &str {
        SUBTYPE
    }

    fn check_config(&self, cfgstring: &str) -> Result<(), HandlerError> {
        parse_cfgstring(cfgstring)?;
        Ok(())
    }

    fn open(
        &self,
        cfgstring: &str,
        geometry: DeviceGeometry,
    ) -> Result<Box<dyn OpenHandler>, HandlerError> {
        let path = parse_cfgstring(cfgstring)?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;
        let want_len = geometry.block_size as u64 * geometry.num_lbas;
        file.set_len(want_len)?;
        debug!("file handler opened backing store {path} ({want_len} bytes)");
        Ok(Box::new(FileOpenHandler {
            file: Mutex::new(file),
            geometry,
        }))
    }
}

struct FileOpenHandler {
    file: Mutex<File>,
    geometry: DeviceGeometry,
}

fn io_error_outcome(asc: u8) -> HandledOutcome {
    HandledOutcome::Sync {
        status: scsi_status::CHECK_CONDITION,
        sense: emulate::build_sense(sense::KEY_MEDIUM_ERROR, asc, 0),
    }
}

fn unsupported_opcode() -> HandledOutcome {
    HandledOutcome::Sync {
        status: scsi_status::CHECK_CONDITION,
        sense: emulate::build_sense(
            sense::KEY_ILLEGAL_REQUEST,
            sense::ASC_INVALID_COMMAND_OPERATION_CODE,
            0,
        ),
    }
}

impl FileOpenHandler {
    fn do_read(&self, lba: u64, nblocks: u32, iovs: &[(u64, u64)], region: &dyn IovTarget) -> HandledOutcome {
        let block_size = self.geometry.block_size as usize;
        let len = block_size * nblocks as usize;
        let mut buf = vec![0u8; len];
        let mut file = self.file.lock().unwrap();
        let offset = lba * block_size as u64;
        if file.seek(SeekFrom::Start(offset)).and_then(|_| file.read_exact(&mut buf)).is_err() {
            return io_error_outcome(sense::ASC_READ_ERROR);
        }
        drop(file);
        match write_scattered(region, iovs, &buf) {
            Ok(()) => HandledOutcome::Sync {
                status: scsi_status::GOOD,
                sense: [0u8; entry::SENSE_LEN],
            },
            Err(_) => io_error_outcome(sense::ASC_READ_ERROR),
        }
    }

    fn do_write(&self, lba: u64, nblocks: u32, iovs: &[(u64, u64)], region: &dyn IovTarget) -> HandledOutcome {
        let block_size = self.geometry.block_size as usize;
        let len = block_size * nblocks as usize;
        let data = match read_gathered(region, iovs, len) {
            Ok(d) => d,
            Err(_) => return io_error_outcome(sense::ASC_WRITE_ERROR),
        };
        let mut file = self.file.lock().unwrap();
        let offset = lba * block_size as u64;
        if file.seek(SeekFrom::Start(offset)).and_then(|_| file.write_all(&data)).is_err() {
            return io_error_outcome(sense::ASC_WRITE_ERROR);
        }
        HandledOutcome::Sync {
            status: scsi_status::GOOD,
            sense: [0u8; entry::SENSE_LEN],
        }
    }
}

impl OpenHandler for FileOpenHandler {
    fn handle_command(
        &self,
        op: u8,
        cdb_bytes: &[u8],
        iovs: &[(u64, u64)],
        region: &dyn IovTarget,
    ) -> HandledOutcome {
        match op {
            opcode::TEST_UNIT_READY => {
                let r = emulate::test_unit_ready();
                HandledOutcome::Sync { status: r.status, sense: r.sense }
            }
            opcode::INQUIRY => {
                let r = emulate::inquiry(iovs, region);
                HandledOutcome::Sync { status: r.status, sense: r.sense }
            }
            opcode::MODE_SENSE | opcode::MODE_SENSE_10 => {
                let r = emulate::mode_sense(iovs, region);
                HandledOutcome::Sync { status: r.status, sense: r.sense }
            }
            opcode::MODE_SELECT | opcode::MODE_SELECT_10 => {
                let r = emulate::mode_select();
                HandledOutcome::Sync { status: r.status, sense: r.sense }
            }
            opcode::SERVICE_ACTION_IN_16 => {
                if cdb_bytes.get(1).map(|b| b & 0x1F) != Some(opcode::READ_CAPACITY_16) {
                    return unsupported_opcode();
                }
                let r = emulate::read_capacity_16(self.geometry, iovs, region);
                HandledOutcome::Sync { status: r.status, sense: r.sense }
            }
            opcode::READ_6 | opcode::READ_10 | opcode::READ_12 | opcode::READ_16 => {
                let form = match CdbForm::for_opcode(op) {
                    Some(f) => f,
                    None => return unsupported_opcode(),
                };
                match (cdb::lba(cdb_bytes, form), cdb::transfer_length(cdb_bytes, form)) {
                    (Some(lba), Some(n)) => self.do_read(lba, n, iovs, region),
                    _ => unsupported_opcode(),
                }
            }
            opcode::WRITE_6 | opcode::WRITE_10 | opcode::WRITE_12 | opcode::WRITE_16 => {
                let form = match CdbForm::for_opcode(op) {
                    Some(f) => f,
                    None => return unsupported_opcode(),
                };
                match (cdb::lba(cdb_bytes, form), cdb::transfer_length(cdb_bytes, form)) {
                    (Some(lba), Some(n)) => self.do_write(lba, n, iovs, region),
                    _ => unsupported_opcode(),
                }
            }
            _ => {
                warn!("file handler: opcode 0x{op:02x} not handled");
                HandledOutcome::NotHandled
            }
        }
    }

    fn close(&self) {
        if let Ok(file) = self.file.lock() {
            let _ = file.sync_all();
        }
    }
}
