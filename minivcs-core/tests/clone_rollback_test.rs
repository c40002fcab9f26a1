//! Failure handling during multi-step writes
//!
//! `FaultyStore` wraps the in-memory backend and fails selected writes into
//! one repository.

use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use minivcs_core::storage::Result;
use minivcs_core::{
    ChangeSet, Commit, CommitDescriptor, Engine, EngineConfig, HeadUpdate, MemoryStore, ObjectId,
    Refs, RepoName, Storage, StorageError, VcsError,
};

#[derive(Clone, Copy, PartialEq, Eq)]
enum Fault {
    RecordCommit,
    SetRefs,
}

struct FaultyStore {
    inner: MemoryStore,
    victim: String,
    fault: Fault,
    armed: AtomicBool,
}

impl FaultyStore {
    fn new(victim: &str, fault: Fault) -> Self {
        Self {
            inner: MemoryStore::new(),
            victim: victim.to_string(),
            fault,
            armed: AtomicBool::new(false),
        }
    }

    fn arm(&self, armed: bool) {
        self.armed.store(armed, Ordering::SeqCst);
    }

    fn trips(&self, repo: &RepoName, fault: Fault) -> Result<()> {
        if self.fault == fault && repo.as_str() == self.victim && self.armed.load(Ordering::SeqCst) {
            return Err(StorageError::Io(std::io::Error::other("injected fault")));
        }
        Ok(())
    }
}

#[async_trait]
impl Storage for FaultyStore {
    fn name(&self) -> &'static str {
        "faulty"
    }

    async fn create_repo(&self, repo: &RepoName) -> Result<bool> {
        self.inner.create_repo(repo).await
    }

    async fn repo_exists(&self, repo: &RepoName) -> Result<bool> {
        self.inner.repo_exists(repo).await
    }

    async fn delete_repo(&self, repo: &RepoName) -> Result<()> {
        self.inner.delete_repo(repo).await
    }

    async fn list_repos(&self) -> Result<Vec<RepoName>> {
        self.inner.list_repos().await
    }

    async fn put_blob(&self, repo: &RepoName, content: &str) -> Result<ObjectId> {
        self.inner.put_blob(repo, content).await
    }

    async fn get_blob(&self, repo: &RepoName, id: &ObjectId) -> Result<Option<String>> {
        self.inner.get_blob(repo, id).await
    }

    async fn list_blobs(&self, repo: &RepoName) -> Result<Vec<ObjectId>> {
        self.inner.list_blobs(repo).await
    }

    async fn record_commit(
        &self,
        repo: &RepoName,
        commit: &Commit,
        changes: &ChangeSet,
        head: HeadUpdate,
    ) -> Result<()> {
        self.trips(repo, Fault::RecordCommit)?;
        self.inner.record_commit(repo, commit, changes, head).await
    }

    async fn get_commit(&self, repo: &RepoName, id: &str) -> Result<Option<Commit>> {
        self.inner.get_commit(repo, id).await
    }

    async fn has_commit(&self, repo: &RepoName, id: &str) -> Result<bool> {
        self.inner.has_commit(repo, id).await
    }

    async fn list_commits(&self, repo: &RepoName) -> Result<Vec<Commit>> {
        self.inner.list_commits(repo).await
    }

    async fn get_changes(&self, repo: &RepoName, id: &str) -> Result<Option<ChangeSet>> {
        self.inner.get_changes(repo, id).await
    }

    async fn refs(&self, repo: &RepoName) -> Result<Refs> {
        self.inner.refs(repo).await
    }

    async fn set_refs(&self, repo: &RepoName, refs: &Refs) -> Result<()> {
        self.trips(repo, Fault::SetRefs)?;
        self.inner.set_refs(repo, refs).await
    }
}

fn descriptor(id: &str, ts: &str, parent: Option<&str>, content: &str) -> CommitDescriptor {
    CommitDescriptor {
        id: id.into(),
        message: format!("commit {id}"),
        author: "dave".into(),
        timestamp: Some(ts.into()),
        parent_id: parent.map(Into::into),
        files: [("f.txt".to_string(), content.to_string())].into(),
    }
}

async fn seeded(victim: &str, fault: Fault) -> Engine<FaultyStore> {
    let engine = Engine::new(Arc::new(FaultyStore::new(victim, fault)), EngineConfig::default());
    engine
        .push_commit("src", descriptor("A", "1", None, "one"))
        .await
        .unwrap();
    engine
        .push_commit("src", descriptor("B", "2", Some("A"), "two"))
        .await
        .unwrap();
    engine.storage().arm(true);
    engine
}

#[tokio::test]
async fn test_clone_rolls_back_when_commit_copy_fails() {
    let engine = seeded("dst", Fault::RecordCommit).await;

    let err = engine.clone_repo("src", "dst").await.unwrap_err();
    assert!(matches!(err, VcsError::Storage(StorageError::Io(_))));
    assert_eq!(err.kind(), "storage_failure");

    let names: Vec<_> = engine
        .list_repos()
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.name)
        .collect();
    assert_eq!(names, ["src"]);
    assert_eq!(engine.get_commits("src").await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_clone_rolls_back_when_refs_copy_fails() {
    let engine = seeded("dst", Fault::SetRefs).await;

    assert!(engine.clone_repo("src", "dst").await.is_err());
    assert!(matches!(
        engine.check_commit("dst", "A").await,
        Err(VcsError::RepositoryNotFound(_))
    ));

    // once the fault clears the same clone goes through
    engine.storage().arm(false);
    let report = engine.clone_repo("src", "dst").await.unwrap();
    assert_eq!(report.commit_count, 2);
    assert_eq!(engine.head("dst").await.unwrap().as_deref(), Some("B"));
}

#[tokio::test]
async fn test_failed_push_leaves_head_alone() {
    let engine = seeded("src", Fault::RecordCommit).await;

    let err = engine
        .push_commit("src", descriptor("C", "3", Some("B"), "three"))
        .await
        .unwrap_err();
    assert!(!err.is_client_error());
    assert!(!engine.check_commit("src", "C").await.unwrap());
    assert_eq!(engine.head("src").await.unwrap().as_deref(), Some("B"));
}

#[tokio::test]
async fn test_pull_keeps_progress_before_a_fault() {
    let engine = seeded("dst", Fault::RecordCommit).await;
    engine.storage().arm(false);
    engine.create_repo("dst").await.unwrap();
    engine.pull("src", "dst").await.unwrap();

    engine
        .push_commit("src", descriptor("C", "3", Some("B"), "three"))
        .await
        .unwrap();
    engine.storage().arm(true);
    assert!(engine.pull("src", "dst").await.is_err());

    assert!(engine.check_commit("dst", "B").await.unwrap());
    assert!(!engine.check_commit("dst", "C").await.unwrap());
    assert_eq!(engine.head("dst").await.unwrap().as_deref(), Some("B"));
}
