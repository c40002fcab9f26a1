//! Document storage backend
//!
//! Each repository is a directory holding one JSON document for its commit
//! graph and a content-addressed flat-file object store (like git objects).
//!
//! Layout on disk:
//! ```text
//! {root}/
//!   {repo}/
//!     graph.json                          commits, change sets, branches, HEAD
//!     objects/{hash[0..2]}/{hash[2..]}    blob contents
//! ```
//!
//! Every write goes through a temp file followed by a rename, so a reader never
//! sees a half-written graph or object. Read-modify-write of `graph.json` is
//! not synchronized here; callers serialize writers per repository.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use crate::commit::{ChangeSet, Commit, CommitId, HeadUpdate, Refs};
use crate::name::RepoName;
use crate::object::ObjectId;
use crate::storage::{Result, Storage, StorageError};

const GRAPH_FILE: &str = "graph.json";
const OBJECTS_DIR: &str = "objects";

/// A commit as stored inside the graph document (keyed by its id)
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CommitNode {
    message: String,
    author: String,
    timestamp: String,
    parent_id: Option<CommitId>,
    files: BTreeMap<String, ObjectId>,
}

impl CommitNode {
    fn from_commit(commit: &Commit) -> Self {
        Self {
            message: commit.message.clone(),
            author: commit.author.clone(),
            timestamp: commit.timestamp.clone(),
            parent_id: commit.parent_id.clone(),
            files: commit.files.clone(),
        }
    }

    fn to_commit(&self, id: &str) -> Commit {
        Commit {
            id: id.to_string(),
            message: self.message.clone(),
            author: self.author.clone(),
            timestamp: self.timestamp.clone(),
            parent_id: self.parent_id.clone(),
            files: self.files.clone(),
        }
    }
}

/// The per-repository graph document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct GraphDocument {
    #[serde(default)]
    commits: BTreeMap<CommitId, CommitNode>,
    #[serde(default)]
    changes: BTreeMap<CommitId, ChangeSet>,
    #[serde(flatten)]
    refs: Refs,
}

/// Flat-file object store plus a JSON graph document per repository
pub struct DocumentStore {
    root: PathBuf,
}

impl DocumentStore {
    /// Open or create a document store rooted at `path`
    pub fn open(path: &Path) -> Result<Self> {
        fs::create_dir_all(path)?;
        Ok(Self {
            root: path.to_path_buf(),
        })
    }

    fn repo_path(&self, repo: &RepoName) -> PathBuf {
        self.root.join(repo.as_str())
    }

    fn graph_path(&self, repo: &RepoName) -> PathBuf {
        self.repo_path(repo).join(GRAPH_FILE)
    }

    fn object_path(&self, repo: &RepoName, id: &ObjectId) -> PathBuf {
        let (dir, file) = id.fanout();
        self.repo_path(repo).join(OBJECTS_DIR).join(dir).join(file)
    }

    fn ensure_exists(&self, repo: &RepoName) -> Result<()> {
        if self.graph_path(repo).exists() {
            Ok(())
        } else {
            Err(StorageError::RepositoryNotFound(repo.to_string()))
        }
    }

    // ==================== Graph document ====================

    fn load_graph(&self, repo: &RepoName) -> Result<GraphDocument> {
        let path = self.graph_path(repo);
        let data = match fs::read_to_string(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::RepositoryNotFound(repo.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_str(&data)?)
    }

    fn save_graph(&self, repo: &RepoName, graph: &GraphDocument) -> Result<()> {
        let data = serde_json::to_string_pretty(graph)?;
        write_atomic(&self.graph_path(repo), data.as_bytes())
    }
}

/// Write via temp file + rename
fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let tmp_path = path.with_extension("tmp");
    fs::write(&tmp_path, data)?;
    fs::rename(&tmp_path, path)?;
    Ok(())
}

#[async_trait]
impl Storage for DocumentStore {
    fn name(&self) -> &'static str {
        "document"
    }

    async fn create_repo(&self, repo: &RepoName) -> Result<bool> {
        if self.graph_path(repo).exists() {
            return Ok(false);
        }
        fs::create_dir_all(self.repo_path(repo).join(OBJECTS_DIR))?;
        self.save_graph(repo, &GraphDocument::default())?;
        Ok(true)
    }

    async fn repo_exists(&self, repo: &RepoName) -> Result<bool> {
        Ok(self.graph_path(repo).exists())
    }

    async fn delete_repo(&self, repo: &RepoName) -> Result<()> {
        let path = self.repo_path(repo);
        if !path.exists() {
            return Err(StorageError::RepositoryNotFound(repo.to_string()));
        }
        fs::remove_dir_all(&path)?;
        Ok(())
    }

    async fn list_repos(&self) -> Result<Vec<RepoName>> {
        let mut repos = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.path().join(GRAPH_FILE).is_file() {
                continue;
            }
            // Directories that are not valid names were not created by us
            if let Some(name) = entry.file_name().to_str() {
                if let Ok(name) = RepoName::parse(name) {
                    repos.push(name);
                }
            }
        }
        repos.sort();
        Ok(repos)
    }

    async fn put_blob(&self, repo: &RepoName, content: &str) -> Result<ObjectId> {
        self.ensure_exists(repo)?;
        let id = ObjectId::for_content(content);
        let path = self.object_path(repo, &id);
        if path.exists() {
            return Ok(id); // Already stored (content-addressed = idempotent)
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        write_atomic(&path, content.as_bytes())?;
        tracing::debug!(repo = %repo, object = %id, "stored blob");
        Ok(id)
    }

    async fn get_blob(&self, repo: &RepoName, id: &ObjectId) -> Result<Option<String>> {
        self.ensure_exists(repo)?;
        match fs::read(self.object_path(repo, id)) {
            Ok(data) => String::from_utf8(data)
                .map(Some)
                .map_err(|e| StorageError::Corrupt(format!("object {} is not UTF-8: {}", id, e))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_blobs(&self, repo: &RepoName) -> Result<Vec<ObjectId>> {
        self.ensure_exists(repo)?;
        let objects_dir = self.repo_path(repo).join(OBJECTS_DIR);
        let mut ids = Vec::new();
        if !objects_dir.exists() {
            return Ok(ids);
        }
        for fan in fs::read_dir(&objects_dir)? {
            let fan = fan?;
            if !fan.file_type()?.is_dir() {
                continue;
            }
            let prefix = fan.file_name().to_string_lossy().to_string();
            for obj in fs::read_dir(fan.path())? {
                let obj = obj?;
                let rest = obj.file_name().to_string_lossy().to_string();
                // Leftover temp files and strays are not objects
                if let Ok(id) = ObjectId::from_hex(&format!("{}{}", prefix, rest)) {
                    ids.push(id);
                }
            }
        }
        ids.sort();
        Ok(ids)
    }

    async fn record_commit(
        &self,
        repo: &RepoName,
        commit: &Commit,
        changes: &ChangeSet,
        head: HeadUpdate,
    ) -> Result<()> {
        let mut graph = self.load_graph(repo)?;
        if graph.commits.contains_key(&commit.id) {
            return Err(StorageError::DuplicateCommit(commit.id.clone()));
        }
        graph
            .commits
            .insert(commit.id.clone(), CommitNode::from_commit(commit));
        graph.changes.insert(commit.id.clone(), changes.clone());
        head.apply(&mut graph.refs, commit);
        self.save_graph(repo, &graph)
    }

    async fn import_commits(
        &self,
        repo: &RepoName,
        batch: &[(Commit, ChangeSet)],
        head: HeadUpdate,
    ) -> Result<()> {
        let mut graph = self.load_graph(repo)?;
        for (commit, changes) in batch {
            if graph.commits.contains_key(&commit.id) {
                return Err(StorageError::DuplicateCommit(commit.id.clone()));
            }
            graph
                .commits
                .insert(commit.id.clone(), CommitNode::from_commit(commit));
            graph.changes.insert(commit.id.clone(), changes.clone());
            head.apply(&mut graph.refs, commit);
        }
        // nothing reaches disk unless the whole batch applied
        self.save_graph(repo, &graph)
    }

    async fn get_commit(&self, repo: &RepoName, id: &str) -> Result<Option<Commit>> {
        let graph = self.load_graph(repo)?;
        Ok(graph.commits.get(id).map(|node| node.to_commit(id)))
    }

    async fn has_commit(&self, repo: &RepoName, id: &str) -> Result<bool> {
        Ok(self.load_graph(repo)?.commits.contains_key(id))
    }

    async fn list_commits(&self, repo: &RepoName) -> Result<Vec<Commit>> {
        let graph = self.load_graph(repo)?;
        Ok(graph
            .commits
            .iter()
            .map(|(id, node)| node.to_commit(id))
            .collect())
    }

    async fn get_changes(&self, repo: &RepoName, id: &str) -> Result<Option<ChangeSet>> {
        let mut graph = self.load_graph(repo)?;
        if !graph.commits.contains_key(id) {
            return Ok(None);
        }
        Ok(Some(graph.changes.remove(id).unwrap_or_default()))
    }

    async fn list_changes(&self, repo: &RepoName) -> Result<HashMap<CommitId, ChangeSet>> {
        let mut graph = self.load_graph(repo)?;
        Ok(graph
            .commits
            .keys()
            .map(|id| (id.clone(), graph.changes.remove(id).unwrap_or_default()))
            .collect())
    }

    async fn refs(&self, repo: &RepoName) -> Result<Refs> {
        Ok(self.load_graph(repo)?.refs)
    }

    async fn set_refs(&self, repo: &RepoName, refs: &Refs) -> Result<()> {
        let mut graph = self.load_graph(repo)?;
        graph.refs = refs.clone();
        self.save_graph(repo, &graph)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commit::ChangeRecord;
    use tempfile::TempDir;

    fn name(s: &str) -> RepoName {
        RepoName::parse(s).unwrap()
    }

    #[tokio::test]
    async fn test_document_store_layout() {
        let tmp = TempDir::new().unwrap();
        let store = DocumentStore::open(tmp.path()).unwrap();
        let repo = name("layout");
        assert!(store.create_repo(&repo).await.unwrap());
        assert!(!store.create_repo(&repo).await.unwrap());

        let id = store.put_blob(&repo, "v1").await.unwrap();
        let hex = id.to_hex();
        let expected = tmp
            .path()
            .join("layout")
            .join("objects")
            .join(&hex[..2])
            .join(&hex[2..]);
        assert_eq!(fs::read_to_string(expected).unwrap(), "v1");
        assert!(tmp.path().join("layout").join("graph.json").is_file());
    }

    #[tokio::test]
    async fn test_document_store_graph_shape() {
        let tmp = TempDir::new().unwrap();
        let store = DocumentStore::open(tmp.path()).unwrap();
        let repo = name("shape");
        store.create_repo(&repo).await.unwrap();

        let blob = store.put_blob(&repo, "v1").await.unwrap();
        let commit = Commit {
            id: "A".into(),
            message: "first".into(),
            author: "alice".into(),
            timestamp: "2024-01-01T00:00:00".into(),
            parent_id: None,
            files: [("f.txt".to_string(), blob)].into_iter().collect(),
        };
        let changes: ChangeSet = [("f.txt".to_string(), ChangeRecord::added(blob))]
            .into_iter()
            .collect();
        store
            .record_commit(&repo, &commit, &changes, HeadUpdate::FastForward)
            .await
            .unwrap();

        let raw = fs::read_to_string(tmp.path().join("shape").join("graph.json")).unwrap();
        let doc: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(doc["HEAD"], "A");
        assert_eq!(doc["branches"]["main"], "A");
        assert_eq!(doc["commits"]["A"]["files"]["f.txt"], blob.to_hex());
        assert_eq!(doc["changes"]["A"]["f.txt"]["status"], "added");
    }

    #[tokio::test]
    async fn test_document_store_ignores_temp_files() {
        let tmp = TempDir::new().unwrap();
        let store = DocumentStore::open(tmp.path()).unwrap();
        let repo = name("strays");
        store.create_repo(&repo).await.unwrap();
        let id = store.put_blob(&repo, "data").await.unwrap();

        let (dir, file) = id.fanout();
        let stray = tmp
            .path()
            .join("strays")
            .join("objects")
            .join(dir)
            .join(format!("{}.tmp", file));
        fs::write(stray, "partial").unwrap();
        fs::create_dir_all(tmp.path().join("not a repo")).unwrap();

        assert_eq!(store.list_blobs(&repo).await.unwrap(), vec![id]);
        assert_eq!(store.list_repos().await.unwrap(), vec![repo]);
    }

    #[tokio::test]
    async fn test_document_store_persists_across_reopen() {
        let tmp = TempDir::new().unwrap();
        let repo = name("reopen");
        let id = {
            let store = DocumentStore::open(tmp.path()).unwrap();
            store.create_repo(&repo).await.unwrap();
            store.put_blob(&repo, "kept").await.unwrap()
        };
        let store = DocumentStore::open(tmp.path()).unwrap();
        assert!(store.repo_exists(&repo).await.unwrap());
        assert_eq!(store.get_blob(&repo, &id).await.unwrap().as_deref(), Some("kept"));
    }

    #[tokio::test]
    async fn test_document_store_import_writes_graph_once() {
        let tmp = TempDir::new().unwrap();
        let store = DocumentStore::open(tmp.path()).unwrap();
        let repo = name("bulk");
        store.create_repo(&repo).await.unwrap();

        let blob = store.put_blob(&repo, "v").await.unwrap();
        let batch: Vec<(Commit, ChangeSet)> = (0..3)
            .map(|i| {
                let commit = Commit {
                    id: format!("c{i}"),
                    message: String::new(),
                    author: String::new(),
                    timestamp: format!("{i}"),
                    parent_id: (i > 0).then(|| format!("c{}", i - 1)),
                    files: [("f".to_string(), blob)].into_iter().collect(),
                };
                (commit, ChangeSet::new())
            })
            .collect();
        store
            .import_commits(&repo, &batch, HeadUpdate::Keep)
            .await
            .unwrap();
        assert_eq!(store.list_commits(&repo).await.unwrap().len(), 3);
        assert_eq!(store.refs(&repo).await.unwrap(), Refs::default());

        // a batch overlapping stored history leaves graph.json untouched
        let graph = tmp.path().join("bulk").join("graph.json");
        let before = fs::read_to_string(&graph).unwrap();
        let err = store
            .import_commits(&repo, &batch[1..], HeadUpdate::FastForward)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::DuplicateCommit(_)));
        assert_eq!(fs::read_to_string(&graph).unwrap(), before);
        assert_eq!(store.list_changes(&repo).await.unwrap().len(), 3);
    }
}
