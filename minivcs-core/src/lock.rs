//! Per-repository reader/writer locks
//!
//! Every mutation of a repository (create, push, pull target, clone target,
//! delete) holds that repository's write lock from its first read until its
//! last write. Readers share the read lock. Different repositories never block
//! each other.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

use crate::name::RepoName;

/// Lock table keyed by repository name
///
/// Entries exist only while some operation holds or waits for them.
#[derive(Default)]
pub struct RepoLocks {
    locks: Mutex<HashMap<RepoName, Arc<RwLock<()>>>>,
}

/// A held repository lock. Dropping the last one for a name removes the
/// name from the table.
pub struct RepoGuard<'a, G> {
    guard: Option<G>,
    repo: RepoName,
    locks: &'a RepoLocks,
}

pub type ReadGuard<'a> = RepoGuard<'a, OwnedRwLockReadGuard<()>>;
pub type WriteGuard<'a> = RepoGuard<'a, OwnedRwLockWriteGuard<()>>;

impl<G> Drop for RepoGuard<'_, G> {
    fn drop(&mut self) {
        // the rwlock must be released before the entry's handle count is read
        self.guard.take();
        self.locks.release(&self.repo);
    }
}

/// Guards held by an operation spanning a source and a target repository
pub enum PairGuard<'a> {
    /// Source and target are the same repository
    Same(WriteGuard<'a>),
    Distinct {
        _source: ReadGuard<'a>,
        _target: WriteGuard<'a>,
    },
}

impl RepoLocks {
    pub fn new() -> Self {
        Self::default()
    }

    // A poisoned table only means another thread panicked while holding it;
    // the map itself is still usable.
    fn table(&self) -> MutexGuard<'_, HashMap<RepoName, Arc<RwLock<()>>>> {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_for(&self, repo: &RepoName) -> Arc<RwLock<()>> {
        self.table().entry(repo.clone()).or_default().clone()
    }

    /// Drop the entry for `repo` once the table holds the only handle
    fn release(&self, repo: &RepoName) {
        let mut locks = self.table();
        if locks
            .get(repo)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(repo);
        }
    }

    fn guard<G>(&self, repo: &RepoName, guard: G) -> RepoGuard<'_, G> {
        RepoGuard {
            guard: Some(guard),
            repo: repo.clone(),
            locks: self,
        }
    }

    pub async fn read(&self, repo: &RepoName) -> ReadGuard<'_> {
        let guard = self.lock_for(repo).read_owned().await;
        self.guard(repo, guard)
    }

    pub async fn write(&self, repo: &RepoName) -> WriteGuard<'_> {
        let guard = self.lock_for(repo).write_owned().await;
        self.guard(repo, guard)
    }

    /// Share `source` and own `target`, acquiring in name order so two
    /// opposite transfers cannot deadlock
    pub async fn transfer(&self, source: &RepoName, target: &RepoName) -> PairGuard<'_> {
        if source == target {
            return PairGuard::Same(self.write(target).await);
        }
        if source < target {
            let s = self.read(source).await;
            let t = self.write(target).await;
            PairGuard::Distinct {
                _source: s,
                _target: t,
            }
        } else {
            let t = self.write(target).await;
            let s = self.read(source).await;
            PairGuard::Distinct {
                _source: s,
                _target: t,
            }
        }
    }

    /// Number of names currently tracked
    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.table().len()
    }
}
