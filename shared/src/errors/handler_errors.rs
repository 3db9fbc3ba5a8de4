use thiserror::Error;

/// Errors a handler module's `open`/`check_config` callback can raise
/// (spec.md §4.2).
#[derive(Error, Debug)]
pub enum HandlerError {
    #[error("{0}")]
    Rejected(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("duplicate handler subtype `{0}`")]
    DuplicateSubtype(String),
}
