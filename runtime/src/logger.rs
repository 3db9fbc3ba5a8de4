//! `flexi_logger` setup with a custom line format, mirroring
//! `examples/N10h0ggr-Gladix/user-agent/src/logger.rs` almost verbatim:
//! same timestamp-thread-level-target format function, adapted to log to
//! stderr plus a rotating file under the runtime's state directory instead
//! of the EDR agent's install directory.

use flexi_logger::{DeferredNow, FileSpec, Logger, LoggerHandle, Record, WriteMode};
use std::path::Path;

fn format_line(
    w: &mut dyn std::io::Write,
    now: &mut DeferredNow,
    record: &Record,
) -> Result<(), std::io::Error> {
    write!(
        w,
        "[{}] {:5} {:>20} | {}",
        now.format("%Y-%m-%d %H:%M:%S%.3f"),
        record.level(),
        record.target(),
        &record.args()
    )
}

/// Initialize logging. `log_dir` holds rotated log files; the level comes
/// from `RUST_LOG` if set, otherwise `info`.
pub fn init(log_dir: &Path) -> Result<LoggerHandle, flexi_logger::FlexiLoggerError> {
    Logger::try_with_env_or_str("info")?
        .log_to_file(FileSpec::default().directory(log_dir).basename("tcmu-runtime"))
        .duplicate_to_stderr(flexi_logger::Duplicate::All)
        .format(format_line)
        .write_mode(WriteMode::BufferAndFlush)
        .start()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_succeeds_against_a_writable_directory() {
        let dir = tempfile::tempdir().unwrap();
        let handle = init(dir.path());
        assert!(handle.is_ok());
    }
}
