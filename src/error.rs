//! Error taxonomy shared by tables, snapshots and traversals.

use std::io;
use std::path::PathBuf;

/// Errors reported by table operations, snapshot I/O and traversals.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Strict lookup (`at`) missed.
    #[error("key not found: {key}")]
    KeyNotFound {
        /// Debug rendering of the requested key.
        key: String,
    },

    /// Mutation attempted on a table backed by a mapped snapshot.
    #[error("cannot {operation}: table is a read-only mapped snapshot")]
    ReadOnly {
        /// The rejected operation.
        operation: &'static str,
    },

    /// Opening, creating or writing a snapshot file failed.
    #[error("I/O failure on {}: {source}", path.display())]
    Io {
        /// File being accessed.
        path: PathBuf,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },

    /// Mapping a snapshot file into memory failed.
    #[error("failed to map {} into memory: {source}", path.display())]
    Mapping {
        /// File being mapped.
        path: PathBuf,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },

    /// Snapshot bytes do not describe a valid table.
    #[error("corrupt snapshot {}: {reason}", path.display())]
    Corrupt {
        /// File being read.
        path: PathBuf,
        /// What did not line up.
        reason: String,
    },

    /// The OS refused to start a pool worker thread.
    #[error("failed to spawn worker thread: {source}")]
    Spawn {
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },

    /// One or more traversal callbacks panicked; the aggregate is incomplete.
    #[error("{panics} traversal task(s) panicked")]
    TaskPanicked {
        /// Number of chunks whose callback panicked.
        panics: usize,
    },
}

impl Error {
    pub(crate) fn read_only(operation: &'static str) -> Self {
        Error::ReadOnly { operation }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Error::Corrupt {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// True for errors raised because the table is a mapped snapshot.
    pub fn is_read_only(&self) -> bool {
        matches!(self, Error::ReadOnly { .. })
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
