use std::io;

/// everything that can go wrong inside a tick or a persistence call.
/// the engine stays usable after any of these; no partial state is
/// committed once an error surfaces.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("illegal state: {0}")]
    IllegalState(String),
    #[error("read state callback declined")]
    ReadDeclined,
    #[error("unsupported snapshot version {0:#04x}")]
    VersionMismatch(u8),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
