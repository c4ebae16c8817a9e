use std::fmt;
use std::io;

/// Unified error type for the storage engine.
#[derive(Debug)]
pub enum Error {
    /// IO error from disk operations.
    Io(io::Error),
    /// Data corruption detected (CRC mismatch, bad format, etc).
    Corruption(String),
    /// No version of the key exists in any live table.
    /// Tombstones are found, not `NotFound`.
    NotFound,
    /// The engine was closed; no further writes are accepted.
    Closed,
    /// The background flush worker stopped unexpectedly.
    WorkerGone,
    /// A caller-supplied timestamp outside `1..u64::MAX`.
    InvalidTimestamp(u64),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "IO error: {e}"),
            Error::Corruption(msg) => write!(f, "Corruption: {msg}"),
            Error::NotFound => write!(f, "Not found"),
            Error::Closed => write!(f, "Storage engine is closed"),
            Error::WorkerGone => write!(f, "Flush worker is not running"),
            Error::InvalidTimestamp(ts) => write!(f, "Invalid timestamp: {ts}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}

/// Result type alias used throughout the engine.
pub type Result<T> = std::result::Result<T, Error>;
