//! Top-level error surface a transport layer builds on (spec.md §6/§7).
//! Each lower crate defines its own narrower error and converts with
//! `#[from]`, following the teacher's `ah-core::Error` /
//! `ah_local_db::Error` layering.

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{kind} not found: {key}")]
    NotFound { kind: &'static str, key: String },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),

    #[error("permission error: {0}")]
    Permission(String),

    #[error("corrupt database: {0}")]
    Corrupt(String),

    #[error("lock wait timed out after {0:?}")]
    LockTimeout(std::time::Duration),

    #[error("malformed group file line {line}: {detail}")]
    MalformedGroupFile { line: usize, detail: String },

    #[error("maximum pre-auth user population ({0}) exceeded")]
    MaxPreAuthExceeded(usize),

    #[error(transparent)]
    Db(#[from] authd_db::Error),

    #[error(transparent)]
    GroupFile(#[from] authd_groupfile::Error),

    #[error(transparent)]
    Temp(#[from] authd_temp::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
