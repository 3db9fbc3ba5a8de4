//! Handler contract: pluggable storage backends keyed by config-string
//! subtype (spec.md §4.4), grounded on the `tcmu_handler_ops` vtable in
//! `examples/original_source/main.c` and the single concrete handler in
//! `examples/original_source/file_example.c`.

pub mod file;
pub mod registry;

use shared::constants::entry;
use shared::errors::HandlerError;

use crate::ring::iov::IovTarget;
use crate::scsi::emulate::DeviceGeometry;

/// Outcome of handing one SCSI command to an open handler instance
/// (spec.md §4.4/§4.5): `HANDLED_SYNC`, `HANDLED_ASYNC`, or `NOT_HANDLED`.
pub enum HandledOutcome {
    Sync {
        status: u8,
        sense: [u8; entry::SENSE_LEN],
    },
    Async,
    NotHandled,
}

/// A storage backend, identified by the subtype prefix of a device's
/// config string (e.g. `file/path/to/backing`).
pub trait HandlerModule: Send + Sync {
    /// The subtype this module registers under (spec.md §4.4).
    fn subtype(&self) -> &str;

    /// Validate a config string before the device manager commits to
    /// attaching it (spec.md §4.4 `check_config`).
    fn check_config(&self, cfgstring: &str) -> Result<(), HandlerError>;

    /// Open a backend instance for one device.
    fn open(
        &self,
        cfgstring: &str,
        geometry: DeviceGeometry,
    ) -> Result<Box<dyn OpenHandler>, HandlerError>;
}

/// A handler instance bound to one open device.
pub trait OpenHandler: Send + Sync {
    /// Service one SCSI command. `region` is the mapped ring used to
    /// scatter/gather READ/WRITE payloads via the command's IOVs.
    fn handle_command(
        &self,
        opcode: u8,
        cdb: &[u8],
        iovs: &[(u64, u64)],
        region: &dyn IovTarget,
    ) -> HandledOutcome;

    /// Release backend resources (spec.md §4.4 `close`).
    fn close(&self);
}
