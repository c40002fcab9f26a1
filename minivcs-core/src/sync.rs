//! History transfer: push, pull and clone
//!
//! - **push** appends one commit, computing its change set against the parent.
//! - **pull** copies every commit of a source whose parent the target already
//!   has, parents first. Commits whose parent is missing are left for a later
//!   pull, so repeated pulls converge.
//! - **clone** is a structural copy of a whole repository into a new name and
//!   is all-or-nothing.

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::commit::{
    ChangeSet, CloneReport, Commit, CommitDescriptor, CommitId, HeadUpdate, PullReport,
    PushReport,
};
use crate::diff::{FileVersion, Snapshot, compute_changes};
use crate::engine::Engine;
use crate::error::{Result, VcsError};
use crate::name::RepoName;
use crate::object::ObjectId;
use crate::storage::{Storage, StorageError};

/// Pulled commits are recorded in batches of this size; a failure keeps every
/// batch written before it
const PULL_BATCH_SIZE: usize = 256;

impl<S: Storage + ?Sized> Engine<S> {
    /// Append a commit to `name`, creating the repository on first use
    ///
    /// Pushing an id that is already recorded changes nothing and reports
    /// `accepted: false`.
    pub async fn push_commit(&self, name: &str, desc: CommitDescriptor) -> Result<PushReport> {
        let repo = RepoName::parse(name)?;
        if desc.id.is_empty() {
            return Err(VcsError::InvalidCommit("commit id must not be empty".into()));
        }
        let _guard = self.locks.write(&repo).await;

        let exists = self.storage.repo_exists(&repo).await?;
        if exists && self.storage.has_commit(&repo, &desc.id).await? {
            tracing::debug!("Commit {} already in '{}'", desc.id, repo);
            return Ok(PushReport {
                accepted: false,
                change_count: 0,
            });
        }

        let parent = match desc.parent_id.as_deref() {
            None => None,
            Some(parent_id) => {
                let found = if exists {
                    self.storage.get_commit(&repo, parent_id).await?
                } else {
                    None
                };
                Some(found.ok_or_else(|| VcsError::ParentNotFound(parent_id.to_string()))?)
            }
        };

        if !exists && self.storage.create_repo(&repo).await? {
            tracing::info!("Created repository '{}' on push", repo);
        }

        let mut current = Snapshot::new();
        for (path, content) in &desc.files {
            let hash = self.storage.put_blob(&repo, content).await?;
            current.insert(
                path.clone(),
                FileVersion {
                    hash,
                    content: content.clone(),
                },
            );
        }

        let parent_snapshot = match &parent {
            Some(parent) => Some(self.snapshot(&repo, parent).await?),
            None => None,
        };
        let changes = compute_changes(parent_snapshot.as_ref(), &current);

        let commit = Commit {
            timestamp: desc.effective_timestamp(),
            id: desc.id,
            message: desc.message,
            author: desc.author,
            parent_id: desc.parent_id,
            files: current.into_iter().map(|(p, f)| (p, f.hash)).collect(),
        };

        match self
            .storage
            .record_commit(&repo, &commit, &changes, HeadUpdate::FastForward)
            .await
        {
            Ok(()) => {}
            Err(StorageError::DuplicateCommit(_)) => {
                return Ok(PushReport {
                    accepted: false,
                    change_count: 0,
                });
            }
            Err(e) => return Err(e.into()),
        }

        tracing::debug!(
            "Recorded commit {} in '{}' ({} changes)",
            commit.id,
            repo,
            changes.len()
        );
        Ok(PushReport {
            accepted: true,
            change_count: changes.len(),
        })
    }

    /// Copy the commits of `source` that `target` is missing
    pub async fn pull(&self, source: &str, target: &str) -> Result<PullReport> {
        let source = RepoName::parse(source)?;
        let target = RepoName::parse(target)?;
        let _guard = self.locks.transfer(&source, &target).await;

        if !self.storage.repo_exists(&source).await? {
            return Err(VcsError::RepositoryNotFound(source.to_string()));
        }
        if self.storage.create_repo(&target).await? {
            tracing::info!("Created repository '{}' as pull target", target);
        }

        let head_update = self.config.pull_head_policy.head_update();
        let commits = topological_order(self.storage.list_commits(&source).await?);
        let mut source_changes = self.storage.list_changes(&source).await?;
        let mut present: HashSet<CommitId> = self
            .storage
            .list_commits(&target)
            .await?
            .into_iter()
            .map(|c| c.id)
            .collect();

        let mut report = PullReport {
            pulled_count: 0,
            skipped_count: 0,
        };
        let mut batch = Vec::new();
        for commit in commits {
            if present.contains(&commit.id) {
                report.skipped_count += 1;
                continue;
            }
            if let Some(parent_id) = commit.parent_id.as_deref() {
                if !present.contains(parent_id) {
                    tracing::debug!(
                        "Skipping {}: parent {} not in '{}' yet",
                        commit.id,
                        parent_id,
                        target
                    );
                    continue;
                }
            }

            self.copy_blobs(&source, &target, commit.files.values().copied())
                .await?;
            let changes = source_changes.remove(&commit.id).unwrap_or_default();
            present.insert(commit.id.clone());
            batch.push((commit, changes));
            if batch.len() == PULL_BATCH_SIZE {
                report.pulled_count += self.flush(&target, &mut batch, head_update).await?;
            }
        }
        report.pulled_count += self.flush(&target, &mut batch, head_update).await?;

        tracing::info!(
            "Pulled '{}' into '{}': {} pulled, {} skipped",
            source,
            target,
            report.pulled_count,
            report.skipped_count
        );
        Ok(report)
    }

    /// Copy `source` into a new repository `target`
    ///
    /// On any failure the partially written target is removed again.
    pub async fn clone_repo(&self, source: &str, target: &str) -> Result<CloneReport> {
        let source = RepoName::parse(source)?;
        let target = RepoName::parse(target)?;
        let _guard = self.locks.transfer(&source, &target).await;

        if !self.storage.repo_exists(&source).await? {
            return Err(VcsError::RepositoryNotFound(source.to_string()));
        }
        if self.storage.repo_exists(&target).await? {
            return Err(VcsError::TargetAlreadyExists(target.to_string()));
        }
        self.storage.create_repo(&target).await?;

        match self.copy_repo(&source, &target).await {
            Ok(report) => {
                tracing::info!(
                    "Cloned '{}' to '{}' ({} commits)",
                    source,
                    target,
                    report.commit_count
                );
                Ok(report)
            }
            Err(e) => {
                tracing::warn!("Clone of '{}' to '{}' failed, rolling back: {}", source, target, e);
                if let Err(cleanup) = self.storage.delete_repo(&target).await {
                    tracing::warn!("Could not remove partial clone '{}': {}", target, cleanup);
                }
                Err(e)
            }
        }
    }

    async fn copy_repo(&self, source: &RepoName, target: &RepoName) -> Result<CloneReport> {
        let blobs = self.storage.list_blobs(source).await?;
        self.copy_blobs(source, target, blobs).await?;

        let commits = topological_order(self.storage.list_commits(source).await?);
        let mut changes = self.storage.list_changes(source).await?;
        let paths: BTreeSet<String> = commits
            .iter()
            .flat_map(|c| c.files.keys().cloned())
            .collect();
        let report = CloneReport {
            commit_count: commits.len(),
            file_count: paths.len(),
        };

        let history: Vec<(Commit, ChangeSet)> = commits
            .into_iter()
            .map(|commit| {
                let recorded = changes.remove(&commit.id).unwrap_or_default();
                (commit, recorded)
            })
            .collect();
        self.storage
            .import_commits(target, &history, HeadUpdate::Keep)
            .await?;

        let refs = self.storage.refs(source).await?;
        self.storage.set_refs(target, &refs).await?;
        Ok(report)
    }

    /// Record and empty `batch`, returning how many commits it held
    async fn flush(
        &self,
        target: &RepoName,
        batch: &mut Vec<(Commit, ChangeSet)>,
        head: HeadUpdate,
    ) -> Result<usize> {
        if batch.is_empty() {
            return Ok(0);
        }
        self.storage
            .import_commits(target, batch.as_slice(), head)
            .await?;
        let recorded = batch.len();
        batch.clear();
        Ok(recorded)
    }

    async fn copy_blobs(
        &self,
        source: &RepoName,
        target: &RepoName,
        ids: impl IntoIterator<Item = ObjectId>,
    ) -> Result<()> {
        for id in ids {
            let content = self.storage.get_blob(source, &id).await?.ok_or_else(|| {
                StorageError::Corrupt(format!("blob {} missing from '{}'", id, source))
            })?;
            let stored = self.storage.put_blob(target, &content).await?;
            if stored != id {
                return Err(StorageError::Corrupt(format!(
                    "blob {} in '{}' hashes to {}",
                    id, source, stored
                ))
                .into());
            }
        }
        Ok(())
    }

}

/// Order commits so each one comes after its parent
///
/// Chains are walked from the oldest commit (by timestamp, then id) with an
/// explicit stack, so history depth never grows the call stack. Commits whose
/// parent is absent from the set start a chain of their own.
pub fn topological_order(mut commits: Vec<Commit>) -> Vec<Commit> {
    commits.sort_by(Commit::oldest_first);
    let index: HashMap<&str, usize> = commits
        .iter()
        .enumerate()
        .map(|(i, c)| (c.id.as_str(), i))
        .collect();

    let mut visited: HashSet<usize> = HashSet::with_capacity(commits.len());
    let mut order: Vec<usize> = Vec::with_capacity(commits.len());
    let mut stack: Vec<usize> = Vec::new();

    for start in 0..commits.len() {
        let mut cursor = Some(start);
        while let Some(i) = cursor {
            if !visited.insert(i) {
                break;
            }
            stack.push(i);
            cursor = commits[i]
                .parent_id
                .as_deref()
                .and_then(|p| index.get(p).copied());
        }
        while let Some(i) = stack.pop() {
            order.push(i);
        }
    }

    let mut slots: Vec<Option<Commit>> = commits.into_iter().map(Some).collect();
    order.into_iter().filter_map(|i| slots[i].take()).collect()
}
