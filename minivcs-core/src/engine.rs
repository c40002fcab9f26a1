//! The version-control engine
//!
//! [`Engine`] owns one storage backend and serves every repository in it.
//! Repository lifecycle and read operations live here; push, pull and clone
//! are in [`crate::sync`].

use std::sync::Arc;

use crate::commit::{
    ChangeSet, Commit, CommitDetail, CommitId, CommitSummary, CreateOutcome, FileEntry,
    FileHistoryEntry, LastCommit, RepoSummary,
};
use crate::config::EngineConfig;
use crate::diff::{FileVersion, Snapshot};
use crate::error::{Result, VcsError};
use crate::lock::RepoLocks;
use crate::name::RepoName;
use crate::storage::{Storage, StorageError};

/// Version-control engine over a single storage backend
pub struct Engine<S: Storage + ?Sized = dyn Storage> {
    pub(crate) storage: Arc<S>,
    pub(crate) config: EngineConfig,
    pub(crate) locks: RepoLocks,
}

impl Engine<dyn Storage> {
    /// Open the backend selected by `config`
    pub fn from_config(config: EngineConfig) -> Result<Self> {
        let storage = config.open_storage()?;
        Ok(Self::new(storage, config))
    }
}

impl<S: Storage + ?Sized> Engine<S> {
    pub fn new(storage: Arc<S>, config: EngineConfig) -> Self {
        tracing::debug!("Engine using {} backend", storage.name());
        Self {
            storage,
            config,
            locks: RepoLocks::new(),
        }
    }

    pub fn storage(&self) -> &Arc<S> {
        &self.storage
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ==================== Repository lifecycle ====================

    pub async fn create_repo(&self, name: &str) -> Result<CreateOutcome> {
        let repo = RepoName::parse(name)?;
        let _guard = self.locks.write(&repo).await;

        if self.storage.create_repo(&repo).await? {
            tracing::info!("Created repository '{}'", repo);
            Ok(CreateOutcome::Created)
        } else {
            Ok(CreateOutcome::AlreadyExists)
        }
    }

    pub async fn delete_repo(&self, name: &str) -> Result<()> {
        let repo = RepoName::parse(name)?;
        let _guard = self.locks.write(&repo).await;

        self.storage.delete_repo(&repo).await?;
        tracing::info!("Deleted repository '{}'", repo);
        Ok(())
    }

    /// Summaries of every repository, sorted by name
    pub async fn list_repos(&self) -> Result<Vec<RepoSummary>> {
        let mut summaries = Vec::new();
        for repo in self.storage.list_repos().await? {
            let _guard = self.locks.read(&repo).await;
            match self.summarize(&repo).await {
                Ok(summary) => summaries.push(summary),
                // deleted between enumeration and summary
                Err(VcsError::RepositoryNotFound(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(summaries)
    }

    async fn summarize(&self, repo: &RepoName) -> Result<RepoSummary> {
        let commits = self.storage.list_commits(repo).await?;
        let refs = self.storage.refs(repo).await?;

        let last_commit = refs.head.as_deref().and_then(|head| {
            commits.iter().find(|c| c.id == head).map(|c| LastCommit {
                id: c.id.clone(),
                message: c.message.clone(),
                author: c.author.clone(),
                timestamp: c.timestamp.clone(),
            })
        });

        Ok(RepoSummary {
            name: repo.to_string(),
            commit_count: commits.len(),
            file_count: commits.iter().map(|c| c.files.len()).sum(),
            last_commit,
        })
    }

    // ==================== Reads ====================

    /// Commit summaries, newest first
    pub async fn get_commits(&self, name: &str) -> Result<Vec<CommitSummary>> {
        let repo = RepoName::parse(name)?;
        let _guard = self.locks.read(&repo).await;

        let mut commits = self.storage.list_commits(&repo).await?;
        commits.sort_by(Commit::newest_first);

        let changes = self.storage.list_changes(&repo).await?;
        Ok(commits
            .iter()
            .map(|commit| {
                let change_count = changes.get(&commit.id).map_or(0, |c| c.len());
                CommitSummary::new(commit, change_count)
            })
            .collect())
    }

    /// A commit with its file contents and change set
    pub async fn get_commit(&self, name: &str, id: &str) -> Result<CommitDetail> {
        let repo = RepoName::parse(name)?;
        let _guard = self.locks.read(&repo).await;

        let commit = self.require_commit(&repo, id).await?;
        let changes = self
            .storage
            .get_changes(&repo, id)
            .await?
            .unwrap_or_default();

        let mut files = std::collections::BTreeMap::new();
        for (path, hash) in &commit.files {
            let content = self.storage.get_blob(&repo, hash).await?;
            files.insert(
                path.clone(),
                FileEntry {
                    hash: *hash,
                    content,
                },
            );
        }

        Ok(CommitDetail {
            id: commit.id,
            message: commit.message,
            author: commit.author,
            timestamp: commit.timestamp,
            parent_id: commit.parent_id,
            files,
            changes,
        })
    }

    pub async fn get_changes(&self, name: &str, id: &str) -> Result<ChangeSet> {
        let repo = RepoName::parse(name)?;
        let _guard = self.locks.read(&repo).await;

        self.storage
            .get_changes(&repo, id)
            .await?
            .ok_or_else(|| VcsError::CommitNotFound(id.to_string()))
    }

    pub async fn check_commit(&self, name: &str, id: &str) -> Result<bool> {
        let repo = RepoName::parse(name)?;
        let _guard = self.locks.read(&repo).await;

        Ok(self.storage.has_commit(&repo, id).await?)
    }

    /// Current tip, `None` for a repository without commits
    pub async fn head(&self, name: &str) -> Result<Option<CommitId>> {
        let repo = RepoName::parse(name)?;
        let _guard = self.locks.read(&repo).await;

        Ok(self.storage.refs(&repo).await?.head)
    }

    /// Every change to `path`, newest first
    pub async fn file_history(&self, name: &str, path: &str) -> Result<Vec<FileHistoryEntry>> {
        let repo = RepoName::parse(name)?;
        let _guard = self.locks.read(&repo).await;

        let mut commits = self.storage.list_commits(&repo).await?;
        commits.sort_by(Commit::newest_first);

        let mut all_changes = self.storage.list_changes(&repo).await?;
        let mut history = Vec::new();
        for commit in commits {
            let Some(change) = all_changes
                .get_mut(&commit.id)
                .and_then(|changes| changes.remove(path))
            else {
                continue;
            };
            history.push(FileHistoryEntry {
                commit_id: commit.id,
                message: commit.message,
                author: commit.author,
                timestamp: commit.timestamp,
                status: change.status,
                diff: change.diff,
                previous_hash: change.previous_hash,
                current_hash: change.current_hash,
            });
        }
        Ok(history)
    }

    // ==================== Helpers ====================

    pub(crate) async fn require_commit(&self, repo: &RepoName, id: &str) -> Result<Commit> {
        self.storage
            .get_commit(repo, id)
            .await?
            .ok_or_else(|| VcsError::CommitNotFound(id.to_string()))
    }

    /// Load the files of a recorded commit with their contents
    pub(crate) async fn snapshot(&self, repo: &RepoName, commit: &Commit) -> Result<Snapshot> {
        let mut snapshot = Snapshot::new();
        for (path, hash) in &commit.files {
            let content = self.storage.get_blob(repo, hash).await?.ok_or_else(|| {
                StorageError::Corrupt(format!(
                    "blob {} of '{}' in commit {} is missing",
                    hash, path, commit.id
                ))
            })?;
            snapshot.insert(
                path.clone(),
                FileVersion {
                    hash: *hash,
                    content,
                },
            );
        }
        Ok(snapshot)
    }
}
