//! Stateless responders for the control-plane SCSI opcodes spec.md §4.3
//! requires: INQUIRY, TEST UNIT READY, READ CAPACITY (16), MODE SENSE,
//! MODE SELECT, plus descriptor-format sense construction.
//!
//! Grounded on the call sites in `examples/original_source/file_example.c`
//! (`tcmu_emulate_inquiry`, `tcmu_emulate_test_unit_ready`,
//! `tcmu_emulate_read_capacity_16`, `tcmu_emulate_mode_sense`,
//! `tcmu_emulate_mode_select`) and the response-struct shapes in
//! `examples/other_examples/0f006dc0_mcbridet-rising-sun__common-src-scsi.rs.rs`
//! (`InquiryData`, `ReadCapacityData`, `SenseData`), adapted from fixed to
//! descriptor sense format per spec.md §4.3.

use shared::constants::{entry, scsi_status, sense};

use crate::ring::iov::{write_scattered, IovTarget};

/// Geometry a handler/device exposes to the emulation helpers (block size
/// and LBA count), read from the device object per spec.md §4.3.
#[derive(Debug, Clone, Copy)]
pub struct DeviceGeometry {
    pub block_size: u32,
    pub num_lbas: u64,
}

/// Build a 96-byte descriptor-format sense buffer (spec.md §4.3, §6).
///
/// Layout: response code (`0x72`, current-descriptor), sense key, ASC, ASCQ,
/// additional sense length, then zero padding to the fixed 96-byte field.
pub fn build_sense(key: u8, asc: u8, ascq: u8) -> [u8; entry::SENSE_LEN] {
    let mut buf = [0u8; entry::SENSE_LEN];
    buf[0] = sense::RESPONSE_CODE_CURRENT_DESCRIPTOR;
    buf[1] = key;
    buf[2] = asc;
    buf[3] = ascq;
    buf[7] = 0; // additional sense length of the descriptor block that follows; none here
    buf
}

/// Result of a synchronous SCSI emulation call: SCSI status plus sense
/// bytes (all-zero sense on `GOOD`).
pub struct EmulateResult {
    pub status: u8,
    pub sense: [u8; entry::SENSE_LEN],
}

impl EmulateResult {
    fn good() -> Self {
        Self {
            status: scsi_status::GOOD,
            sense: [0u8; entry::SENSE_LEN],
        }
    }

    fn check_condition(key: u8, asc: u8, ascq: u8) -> Self {
        Self {
            status: scsi_status::CHECK_CONDITION,
            sense: build_sense(key, asc, ascq),
        }
    }
}

/// INQUIRY (standard 36-byte response): peripheral device type 0x00 (direct
/// access block device), vendor/product/revision identification.
pub fn inquiry(iovs: &[(u64, u64)], target: &dyn IovTarget) -> EmulateResult {
    let mut data = [0u8; 36];
    data[0] = 0x00; // direct-access block device
    data[2] = 0x05; // SPC-3 version
    data[3] = 0x02; // response data format
    data[4] = 31; // additional length
    data[8..16].copy_from_slice(b"TCMURS  ");
    data[16..32].copy_from_slice(b"FILE BACKED STORE  ");
    data[32..36].copy_from_slice(b"1.0 ");
    match write_scattered(target, iovs, &data) {
        Ok(()) => EmulateResult::good(),
        Err(_) => EmulateResult::check_condition(
            sense::KEY_ILLEGAL_REQUEST,
            sense::ASC_INVALID_COMMAND_OPERATION_CODE,
            0,
        ),
    }
}

/// TEST UNIT READY: always reports ready in this runtime (no medium-removal
/// model, spec.md §1 non-goals).
pub fn test_unit_ready() -> EmulateResult {
    EmulateResult::good()
}

/// SERVICE ACTION IN (16) / READ CAPACITY (16): last LBA and block length.
pub fn read_capacity_16(
    geometry: DeviceGeometry,
    iovs: &[(u64, u64)],
    target: &dyn IovTarget,
) -> EmulateResult {
    let mut data = [0u8; 32];
    let last_lba = geometry.num_lbas.saturating_sub(1);
    data[0..8].copy_from_slice(&last_lba.to_be_bytes());
    data[8..12].copy_from_slice(&geometry.block_size.to_be_bytes());
    match write_scattered(target, iovs, &data) {
        Ok(()) => EmulateResult::good(),
        Err(_) => EmulateResult::check_condition(
            sense::KEY_ILLEGAL_REQUEST,
            sense::ASC_INVALID_COMMAND_OPERATION_CODE,
            0,
        ),
    }
}

/// MODE SENSE (6/10): returns an empty mode parameter list (no pages
/// supported; spec.md §1 scopes full SCSI conformance out).
pub fn mode_sense(iovs: &[(u64, u64)], target: &dyn IovTarget) -> EmulateResult {
    let data = [0u8; 4];
    match write_scattered(target, iovs, &data) {
        Ok(()) => EmulateResult::good(),
        Err(_) => EmulateResult::check_condition(
            sense::KEY_ILLEGAL_REQUEST,
            sense::ASC_INVALID_COMMAND_OPERATION_CODE,
            0,
        ),
    }
}

/// MODE SELECT (6/10): accepted and ignored (no mode pages are writable).
pub fn mode_select() -> EmulateResult {
    EmulateResult::good()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    struct ByteBuf(RefCell<Vec<u8>>);
    impl IovTarget for ByteBuf {
        fn read_at(&self, offset: u64, dst: &mut [u8]) -> Result<(), shared::errors::RingError> {
            let buf = self.0.borrow();
            let off = offset as usize;
            dst.copy_from_slice(&buf[off..off + dst.len()]);
            Ok(())
        }
        fn write_at(&self, offset: u64, src: &[u8]) -> Result<(), shared::errors::RingError> {
            let mut buf = self.0.borrow_mut();
            let off = offset as usize;
            buf[off..off + src.len()].copy_from_slice(src);
            Ok(())
        }
    }

    #[test]
    fn sense_descriptor_layout() {
        let sense = build_sense(sense::KEY_ILLEGAL_REQUEST, sense::ASC_INVALID_COMMAND_OPERATION_CODE, 0);
        assert_eq!(sense[0], sense::RESPONSE_CODE_CURRENT_DESCRIPTOR);
        assert_eq!(sense[1], sense::KEY_ILLEGAL_REQUEST);
        assert_eq!(sense[2], sense::ASC_INVALID_COMMAND_OPERATION_CODE);
        assert_eq!(sense.len(), entry::SENSE_LEN);
    }

    #[test]
    fn read_capacity_16_encodes_last_lba_and_block_size() {
        let buf = ByteBuf(RefCell::new(vec![0u8; 64]));
        let geometry = DeviceGeometry { block_size: 4096, num_lbas: 256 };
        let iovs = [(0u64, 64u64)];
        let result = read_capacity_16(geometry, &iovs, &buf);
        assert_eq!(result.status, scsi_status::GOOD);
        let data = buf.0.borrow();
        assert_eq!(u64::from_be_bytes(data[0..8].try_into().unwrap()), 255);
        assert_eq!(u32::from_be_bytes(data[8..12].try_into().unwrap()), 4096);
    }

    #[test]
    fn inquiry_reports_direct_access_block_device() {
        let buf = ByteBuf(RefCell::new(vec![0u8; 64]));
        let iovs = [(0u64, 64u64)];
        let result = inquiry(&iovs, &buf);
        assert_eq!(result.status, scsi_status::GOOD);
        assert_eq!(buf.0.borrow()[0], 0x00);
    }
}
