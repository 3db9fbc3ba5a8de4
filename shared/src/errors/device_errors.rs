use std::path::PathBuf;
use thiserror::Error;

use crate::errors::{HandlerError, RingError};

/// Errors raised while attaching, detaching, or running a device
/// (spec.md §4.5, §7).
#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("could not open `{path}`: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not read sysfs attribute `{path}`: {source}")]
    Sysfs {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not parse map size from `{path}`: {value:?}")]
    BadMapSize { path: PathBuf, value: String },

    #[error("mmap of `{path}` failed: {source}")]
    Mmap {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("config string `{0}` has no `<subtype>/` prefix")]
    MalformedConfigString(String),

    #[error("no handler registered for subtype `{0}`")]
    UnknownSubtype(String),

    #[error("handler open failed: {0}")]
    HandlerOpen(#[from] HandlerError),

    #[error(transparent)]
    Ring(#[from] RingError),
}
