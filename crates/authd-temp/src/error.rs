//! Error taxonomy for in-memory temporary-record coordination (spec.md §6/§7).

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("maximum pre-auth user population ({0}) exceeded")]
    MaxPreAuthExceeded(usize),

    #[error("id generation exhausted after {attempts} attempts")]
    IdGenerationExhausted { attempts: usize },

    #[error("invalid login name: {0}")]
    InvalidLoginName(String),

    #[error(transparent)]
    GroupFile(#[from] authd_groupfile::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
