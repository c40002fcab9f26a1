//! Storage abstraction layer for MiniVCS
//!
//! The engine's algorithms (change computation, push, pull, clone) are written
//! once against [`Storage`]. Backends only decide how repositories, blobs,
//! commits, change sets and refs are persisted.

use async_trait::async_trait;
use std::collections::HashMap;

use crate::commit::{ChangeSet, Commit, CommitId, HeadUpdate, Refs};
use crate::name::RepoName;
use crate::object::ObjectId;

/// Result type for storage operations
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur during storage operations
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Repository '{0}' not found")]
    RepositoryNotFound(String),

    #[error("Commit '{0}' already exists")]
    DuplicateCommit(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Corrupt repository data: {0}")]
    Corrupt(String),
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        StorageError::Database(err.to_string())
    }
}

/// Persistence contract every backend implements
///
/// All operations on a repository that does not exist fail with
/// [`StorageError::RepositoryNotFound`], except `create_repo`,
/// `repo_exists` and `list_repos`.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Short backend name for logs
    fn name(&self) -> &'static str;

    // ==================== Repository lifecycle ====================

    /// Create an empty repository; returns false if it already existed
    async fn create_repo(&self, repo: &RepoName) -> Result<bool>;

    async fn repo_exists(&self, repo: &RepoName) -> Result<bool>;

    /// Remove the repository and everything it owns
    async fn delete_repo(&self, repo: &RepoName) -> Result<()>;

    /// All repositories, sorted by name
    async fn list_repos(&self) -> Result<Vec<RepoName>>;

    // ==================== Object store ====================

    /// Store content, returning its id. Writing content that is already
    /// present is a no-op.
    async fn put_blob(&self, repo: &RepoName, content: &str) -> Result<ObjectId>;

    async fn get_blob(&self, repo: &RepoName, id: &ObjectId) -> Result<Option<String>>;

    /// Every blob id in the repository, sorted
    async fn list_blobs(&self, repo: &RepoName) -> Result<Vec<ObjectId>>;

    // ==================== Commit graph ====================

    /// Atomically insert a commit with its change set and apply `head` to the
    /// refs. Fails with [`StorageError::DuplicateCommit`] if the id exists.
    async fn record_commit(
        &self,
        repo: &RepoName,
        commit: &Commit,
        changes: &ChangeSet,
        head: HeadUpdate,
    ) -> Result<()>;

    /// Insert `batch` in order, applying `head` after each commit as
    /// [`record_commit`](Storage::record_commit) would.
    ///
    /// Backends override this to write the whole batch at once, failing with
    /// [`StorageError::DuplicateCommit`] and writing nothing if any id exists.
    /// The default records the commits one at a time.
    async fn import_commits(
        &self,
        repo: &RepoName,
        batch: &[(Commit, ChangeSet)],
        head: HeadUpdate,
    ) -> Result<()> {
        for (commit, changes) in batch {
            self.record_commit(repo, commit, changes, head).await?;
        }
        Ok(())
    }

    async fn get_commit(&self, repo: &RepoName, id: &str) -> Result<Option<Commit>>;

    async fn has_commit(&self, repo: &RepoName, id: &str) -> Result<bool>;

    /// Every commit of the repository, in no particular order
    async fn list_commits(&self, repo: &RepoName) -> Result<Vec<Commit>>;

    /// The change set recorded with a commit, `None` for an unknown commit
    async fn get_changes(&self, repo: &RepoName, id: &str) -> Result<Option<ChangeSet>>;

    /// Change sets of every commit, keyed by commit id
    async fn list_changes(&self, repo: &RepoName) -> Result<HashMap<CommitId, ChangeSet>> {
        let mut all = HashMap::new();
        for commit in self.list_commits(repo).await? {
            if let Some(changes) = self.get_changes(repo, &commit.id).await? {
                all.insert(commit.id, changes);
            }
        }
        Ok(all)
    }

    async fn refs(&self, repo: &RepoName) -> Result<Refs>;

    async fn set_refs(&self, repo: &RepoName, refs: &Refs) -> Result<()>;
}
