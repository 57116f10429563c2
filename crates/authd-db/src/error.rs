//! Error taxonomy for the identity database (spec.md §6/§7).

/// Errors surfaced by `authd-db`.
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

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error(transparent)]
    GroupFile(#[from] authd_groupfile::Error),
}

impl Error {
    pub fn not_found(kind: &'static str, key: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            key: key.into(),
        }
    }
}
