use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced by the public API.
///
/// The producer path (`emit`) is infallible by design: overload and write
/// failures are observable only through telemetry. Errors here come from
/// opening an engine or from explicit read-back helpers.
#[derive(Debug, Error)]
pub enum SinkError {
    /// Another engine instance holds the exclusive lock on the data directory.
    #[error("another writer holds the lock on {path}")]
    Locked {
        /// The lock file that could not be acquired.
        path: PathBuf,
    },

    /// An underlying filesystem operation failed.
    #[error(transparent)]
    Io(#[from] io::Error),
}
