//! In-memory storage backend
//!
//! Keeps every repository in process memory. Nothing survives a restart;
//! useful for tests and ephemeral engines.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use tokio::sync::RwLock;

use crate::commit::{ChangeSet, Commit, CommitId, HeadUpdate, Refs};
use crate::name::RepoName;
use crate::object::ObjectId;
use crate::storage::{Result, Storage, StorageError};

#[derive(Default)]
struct RepoState {
    /// Object storage
    objects: BTreeMap<ObjectId, String>,
    /// Commit history (id -> commit)
    commits: HashMap<CommitId, Commit>,
    /// Change sets keyed by commit id
    changes: HashMap<CommitId, ChangeSet>,
    refs: Refs,
}

/// In-memory backend
#[derive(Default)]
pub struct MemoryStore {
    repos: RwLock<BTreeMap<RepoName, RepoState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn not_found(repo: &RepoName) -> StorageError {
    StorageError::RepositoryNotFound(repo.to_string())
}

#[async_trait]
impl Storage for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn create_repo(&self, repo: &RepoName) -> Result<bool> {
        let mut repos = self.repos.write().await;
        if repos.contains_key(repo) {
            return Ok(false);
        }
        repos.insert(repo.clone(), RepoState::default());
        Ok(true)
    }

    async fn repo_exists(&self, repo: &RepoName) -> Result<bool> {
        Ok(self.repos.read().await.contains_key(repo))
    }

    async fn delete_repo(&self, repo: &RepoName) -> Result<()> {
        self.repos
            .write()
            .await
            .remove(repo)
            .map(|_| ())
            .ok_or_else(|| not_found(repo))
    }

    async fn list_repos(&self) -> Result<Vec<RepoName>> {
        Ok(self.repos.read().await.keys().cloned().collect())
    }

    async fn put_blob(&self, repo: &RepoName, content: &str) -> Result<ObjectId> {
        let id = ObjectId::for_content(content);
        let mut repos = self.repos.write().await;
        let state = repos.get_mut(repo).ok_or_else(|| not_found(repo))?;
        state
            .objects
            .entry(id)
            .or_insert_with(|| content.to_string());
        Ok(id)
    }

    async fn get_blob(&self, repo: &RepoName, id: &ObjectId) -> Result<Option<String>> {
        let repos = self.repos.read().await;
        let state = repos.get(repo).ok_or_else(|| not_found(repo))?;
        Ok(state.objects.get(id).cloned())
    }

    async fn list_blobs(&self, repo: &RepoName) -> Result<Vec<ObjectId>> {
        let repos = self.repos.read().await;
        let state = repos.get(repo).ok_or_else(|| not_found(repo))?;
        Ok(state.objects.keys().copied().collect())
    }

    async fn record_commit(
        &self,
        repo: &RepoName,
        commit: &Commit,
        changes: &ChangeSet,
        head: HeadUpdate,
    ) -> Result<()> {
        let mut repos = self.repos.write().await;
        let state = repos.get_mut(repo).ok_or_else(|| not_found(repo))?;
        if state.commits.contains_key(&commit.id) {
            return Err(StorageError::DuplicateCommit(commit.id.clone()));
        }
        state.commits.insert(commit.id.clone(), commit.clone());
        state.changes.insert(commit.id.clone(), changes.clone());
        head.apply(&mut state.refs, commit);
        Ok(())
    }

    async fn import_commits(
        &self,
        repo: &RepoName,
        batch: &[(Commit, ChangeSet)],
        head: HeadUpdate,
    ) -> Result<()> {
        let mut repos = self.repos.write().await;
        let state = repos.get_mut(repo).ok_or_else(|| not_found(repo))?;
        let mut seen = HashSet::with_capacity(batch.len());
        for (commit, _) in batch {
            if state.commits.contains_key(&commit.id) || !seen.insert(commit.id.as_str()) {
                return Err(StorageError::DuplicateCommit(commit.id.clone()));
            }
        }
        for (commit, changes) in batch {
            state.commits.insert(commit.id.clone(), commit.clone());
            state.changes.insert(commit.id.clone(), changes.clone());
            head.apply(&mut state.refs, commit);
        }
        Ok(())
    }

    async fn get_commit(&self, repo: &RepoName, id: &str) -> Result<Option<Commit>> {
        let repos = self.repos.read().await;
        let state = repos.get(repo).ok_or_else(|| not_found(repo))?;
        Ok(state.commits.get(id).cloned())
    }

    async fn has_commit(&self, repo: &RepoName, id: &str) -> Result<bool> {
        let repos = self.repos.read().await;
        let state = repos.get(repo).ok_or_else(|| not_found(repo))?;
        Ok(state.commits.contains_key(id))
    }

    async fn list_commits(&self, repo: &RepoName) -> Result<Vec<Commit>> {
        let repos = self.repos.read().await;
        let state = repos.get(repo).ok_or_else(|| not_found(repo))?;
        Ok(state.commits.values().cloned().collect())
    }

    async fn get_changes(&self, repo: &RepoName, id: &str) -> Result<Option<ChangeSet>> {
        let repos = self.repos.read().await;
        let state = repos.get(repo).ok_or_else(|| not_found(repo))?;
        Ok(state.changes.get(id).cloned())
    }

    async fn list_changes(&self, repo: &RepoName) -> Result<HashMap<CommitId, ChangeSet>> {
        let repos = self.repos.read().await;
        let state = repos.get(repo).ok_or_else(|| not_found(repo))?;
        Ok(state.changes.clone())
    }

    async fn refs(&self, repo: &RepoName) -> Result<Refs> {
        let repos = self.repos.read().await;
        let state = repos.get(repo).ok_or_else(|| not_found(repo))?;
        Ok(state.refs.clone())
    }

    async fn set_refs(&self, repo: &RepoName, refs: &Refs) -> Result<()> {
        let mut repos = self.repos.write().await;
        let state = repos.get_mut(repo).ok_or_else(|| not_found(repo))?;
        state.refs = refs.clone();
        Ok(())
    }
}
