//! Wire-level constants shared between the ring protocol, the netlink intake,
//! and the device manager. Values come from spec.md §6 (the mailbox layout,
//! ring entry header, and netlink contract), mirroring the `target_core_user.h`
//! field names used throughout `examples/original_source/main.c`.

/// Sysfs prefix a `uio*` device's `name` file must begin with before this
/// runtime will attach to it. `examples/original_source/main.c`'s `is_uio`
/// hardcodes `"srv"` as the server name; we keep that as the default and let
/// config override it.
pub const DEFAULT_TCMU_SRV: &str = "srv";

/// Directory under `/dev` scanned for candidate devices.
pub const DEV_DIR: &str = "/dev";

/// Sysfs root for uio device metadata.
pub const SYSFS_UIO_ROOT: &str = "/sys/class/uio";

/// Mailbox field byte offsets (spec.md §6).
pub mod mailbox {
    pub const VERSION_OFF: usize = 0;
    pub const CMDR_OFF_OFF: usize = 4;
    pub const CMDR_SIZE_OFF: usize = 8;
    pub const CMD_HEAD_OFF: usize = 16;
    pub const CMD_TAIL_OFF: usize = 24;
    /// Total header size through `cmd_tail` (next field would start at 32).
    pub const HEADER_LEN: usize = 32;
}

/// Ring entry header opcode discriminants (spec.md §6, bits [0..3] of the
/// 8-byte header).
pub mod ring_op {
    pub const OP_PAD: u8 = 0;
    pub const OP_CMD: u8 = 1;
}

/// Fixed sizes within a command ring entry body.
pub mod entry {
    /// Size of the `sense_buffer` field, spec.md §6.
    pub const SENSE_LEN: usize = 96;
}

/// Generic-netlink contract (spec.md §4.7, §6), grounded on
/// `examples/original_source/main.c`'s `tcmu_ops`/`tcmu_cmds`/`tcmu_attr_policy`.
pub mod netlink {
    pub const FAMILY_NAME: &str = "TCM-USER";
    pub const MCAST_GROUP: &str = "config";

    pub const CMD_ADDED_DEVICE: u8 = 1;
    pub const CMD_REMOVED_DEVICE: u8 = 2;

    /// Netlink attribute IDs, matching `TCMU_ATTR_DEVICE`/`TCMU_ATTR_MINOR`.
    pub const ATTR_DEVICE: u16 = 1;
    pub const ATTR_MINOR: u16 = 2;
}

/// SCSI status codes (spec.md §6, §4.3).
pub mod scsi_status {
    pub const GOOD: u8 = 0x00;
    pub const CHECK_CONDITION: u8 = 0x02;
}

/// SCSI opcodes this runtime recognizes (spec.md §6).
pub mod opcode {
    pub const TEST_UNIT_READY: u8 = 0x00;
    pub const READ_6: u8 = 0x08;
    pub const WRITE_6: u8 = 0x0A;
    pub const INQUIRY: u8 = 0x12;
    pub const MODE_SELECT: u8 = 0x15;
    pub const MODE_SENSE: u8 = 0x1A;
    pub const READ_10: u8 = 0x28;
    pub const WRITE_10: u8 = 0x2A;
    pub const MODE_SELECT_10: u8 = 0x55;
    pub const MODE_SENSE_10: u8 = 0x5A;
    pub const WRITE_12: u8 = 0xAA;
    pub const READ_12: u8 = 0xA8;
    pub const READ_16: u8 = 0x88;
    pub const WRITE_16: u8 = 0x8A;
    pub const SERVICE_ACTION_IN_16: u8 = 0x9E;

    /// Service action byte (cdb[1] & 0x1F) for SERVICE_ACTION_IN_16.
    pub const READ_CAPACITY_16: u8 = 0x10;
}

/// Sense key / ASC values this runtime emits (spec.md §4.3, §6).
pub mod sense {
    pub const KEY_ILLEGAL_REQUEST: u8 = 0x05;
    pub const KEY_MEDIUM_ERROR: u8 = 0x03;

    pub const ASC_INVALID_COMMAND_OPERATION_CODE: u8 = 0x20;
    pub const ASC_READ_ERROR: u8 = 0x11;
    pub const ASC_WRITE_ERROR: u8 = 0x0C;

    /// Descriptor-format response code (spec.md §4.3 mandates descriptor
    /// format, not fixed format).
    pub const RESPONSE_CODE_CURRENT_DESCRIPTOR: u8 = 0x72;
}
