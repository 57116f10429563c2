//! Error types for group-file coordination.

/// Errors that can occur while locking, reading, or rewriting `/etc/group`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed group file at line {line}: {detail}")]
    MalformedGroupFile { line: usize, detail: String },

    #[error("lock wait timed out after {0:?}")]
    LockTimeout(std::time::Duration),
}
