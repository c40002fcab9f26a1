//! Engine error taxonomy

use crate::storage::StorageError;

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, VcsError>;

/// Errors surfaced by [`crate::Engine`] operations
#[derive(Debug, thiserror::Error)]
pub enum VcsError {
    #[error("Invalid repository name: {0:?}")]
    InvalidName(String),

    #[error("Invalid commit: {0}")]
    InvalidCommit(String),

    #[error("Repository '{0}' not found")]
    RepositoryNotFound(String),

    #[error("Commit '{0}' not found")]
    CommitNotFound(String),

    #[error("Parent commit '{0}' not found")]
    ParentNotFound(String),

    #[error("Target repository '{0}' already exists")]
    TargetAlreadyExists(String),

    #[error(transparent)]
    Storage(StorageError),
}

impl VcsError {
    /// Stable machine-readable tag, used by callers that serialize errors
    pub fn kind(&self) -> &'static str {
        match self {
            VcsError::InvalidName(_) => "invalid_name",
            VcsError::InvalidCommit(_) => "invalid_commit",
            VcsError::RepositoryNotFound(_) => "repository_not_found",
            VcsError::CommitNotFound(_) => "commit_not_found",
            VcsError::ParentNotFound(_) => "parent_not_found",
            VcsError::TargetAlreadyExists(_) => "target_already_exists",
            VcsError::Storage(StorageError::DuplicateCommit(_)) => "duplicate_commit",
            VcsError::Storage(_) => "storage_failure",
        }
    }

    /// Whether the error was caused by caller input rather than the backend
    pub fn is_client_error(&self) -> bool {
        !matches!(self, VcsError::Storage(_))
    }
}

impl From<StorageError> for VcsError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::RepositoryNotFound(name) => VcsError::RepositoryNotFound(name),
            other => VcsError::Storage(other),
        }
    }
}
