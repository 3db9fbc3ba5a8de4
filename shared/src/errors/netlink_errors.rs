use thiserror::Error;

/// Netlink bring-up and per-message errors (spec.md §4.7, §7).
///
/// `Setup*` variants are setup-fatal (spec.md §7): the process cannot run
/// without a working netlink socket. `MissingMinor`/`UnknownCommand` are
/// ignorable: log and drop the message.
#[derive(Error, Debug)]
pub enum NetlinkError {
    #[error("could not open generic netlink socket: {0}")]
    SetupSocket(String),

    #[error("could not resolve family `{0}`: {1}")]
    SetupFamily(String, String),

    #[error("could not join multicast group `{0}`: {1}")]
    SetupGroup(String, String),

    #[error("receive failed: {0}")]
    Recv(String),

    #[error("message missing required MINOR attribute")]
    MissingMinor,

    #[error("unknown notification command {0}")]
    UnknownCommand(u8),
}
