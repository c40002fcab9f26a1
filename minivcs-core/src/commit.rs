//! Commit graph data model
//!
//! Commits are immutable snapshots mapping file paths to blob ids. Their ids
//! are supplied by the caller, the engine never mints them. Each commit carries
//! a [`ChangeSet`] computed once against its parent at push time.

use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::object::ObjectId;

/// Caller-supplied commit identifier
pub type CommitId = String;

/// Name of the only branch a repository carries
pub const MAIN_BRANCH: &str = "main";

/// A recorded commit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    pub id: CommitId,
    pub message: String,
    pub author: String,
    /// ISO-8601 timestamp as supplied by the caller
    pub timestamp: String,
    pub parent_id: Option<CommitId>,
    /// path -> blob id
    pub files: BTreeMap<String, ObjectId>,
}

impl Commit {
    /// Newest first by timestamp, ties broken by ascending id
    pub fn newest_first(a: &Commit, b: &Commit) -> Ordering {
        b.timestamp.cmp(&a.timestamp).then_with(|| a.id.cmp(&b.id))
    }

    /// Oldest first by timestamp, ties broken by ascending id
    pub fn oldest_first(a: &Commit, b: &Commit) -> Ordering {
        a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id))
    }
}

/// What a caller pushes: a commit whose files still carry their content
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitDescriptor {
    pub id: CommitId,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub author: String,
    /// Filled with the current UTC time when absent
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub parent_id: Option<CommitId>,
    /// path -> content
    #[serde(default)]
    pub files: BTreeMap<String, String>,
}

impl CommitDescriptor {
    /// Id scheme used by the reference client: the SHA-1 of
    /// `message ++ author ++ timestamp ++ parent_id`.
    pub fn derive_id(&self) -> CommitId {
        let mut hasher = Sha1::new();
        hasher.update(self.message.as_bytes());
        hasher.update(self.author.as_bytes());
        hasher.update(self.timestamp.as_deref().unwrap_or("").as_bytes());
        hasher.update(self.parent_id.as_deref().unwrap_or("").as_bytes());
        hex::encode(hasher.finalize())
    }

    /// The timestamp to record, defaulting to now
    pub fn effective_timestamp(&self) -> String {
        self.timestamp
            .clone()
            .unwrap_or_else(|| chrono::Utc::now().to_rfc3339())
    }
}

/// Per-path change status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeStatus {
    Added,
    Modified,
    Deleted,
}

impl ChangeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeStatus::Added => "added",
            ChangeStatus::Modified => "modified",
            ChangeStatus::Deleted => "deleted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "added" => Some(ChangeStatus::Added),
            "modified" => Some(ChangeStatus::Modified),
            "deleted" => Some(ChangeStatus::Deleted),
            _ => None,
        }
    }
}

impl std::fmt::Display for ChangeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How one path changed in one commit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub status: ChangeStatus,
    /// Unified diff, only present for `modified`
    pub diff: Option<String>,
    pub previous_hash: Option<ObjectId>,
    pub current_hash: Option<ObjectId>,
}

impl ChangeRecord {
    pub fn added(current: ObjectId) -> Self {
        Self {
            status: ChangeStatus::Added,
            diff: None,
            previous_hash: None,
            current_hash: Some(current),
        }
    }

    pub fn deleted(previous: ObjectId) -> Self {
        Self {
            status: ChangeStatus::Deleted,
            diff: None,
            previous_hash: Some(previous),
            current_hash: None,
        }
    }

    pub fn modified(previous: ObjectId, current: ObjectId, diff: String) -> Self {
        Self {
            status: ChangeStatus::Modified,
            diff: Some(diff),
            previous_hash: Some(previous),
            current_hash: Some(current),
        }
    }
}

/// path -> change, for a single commit
pub type ChangeSet = BTreeMap<String, ChangeRecord>;

/// HEAD and branch pointers of a repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Refs {
    #[serde(rename = "HEAD")]
    pub head: Option<CommitId>,
    pub branches: BTreeMap<String, Option<CommitId>>,
}

impl Refs {
    /// Move HEAD and `main` together
    pub fn advance(&mut self, id: &str) {
        self.head = Some(id.to_string());
        self.branches
            .insert(MAIN_BRANCH.to_string(), Some(id.to_string()));
    }
}

impl Default for Refs {
    fn default() -> Self {
        let mut branches = BTreeMap::new();
        branches.insert(MAIN_BRANCH.to_string(), None);
        Self {
            head: None,
            branches,
        }
    }
}

/// How a recorded commit may move the repository's refs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeadUpdate {
    /// Advance when HEAD is unset or equals the commit's parent
    FastForward,
    /// Advance only when HEAD is unset
    IfUnset,
    /// Never touch the refs
    Keep,
}

impl HeadUpdate {
    /// Apply the rule for `commit` to `refs`, returning whether HEAD moved
    pub fn apply(self, refs: &mut Refs, commit: &Commit) -> bool {
        let advance = match self {
            HeadUpdate::FastForward => {
                refs.head.is_none() || refs.head.as_deref() == commit.parent_id.as_deref()
            }
            HeadUpdate::IfUnset => refs.head.is_none(),
            HeadUpdate::Keep => false,
        };
        if advance {
            refs.advance(&commit.id);
        }
        advance
    }
}

// ─────────────────────────────────────────────────────
// Operation payloads
// ─────────────────────────────────────────────────────

/// Commit listing entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitSummary {
    pub id: CommitId,
    pub message: String,
    pub author: String,
    pub timestamp: String,
    pub parent_id: Option<CommitId>,
    pub change_count: usize,
}

impl CommitSummary {
    pub fn new(commit: &Commit, change_count: usize) -> Self {
        Self {
            id: commit.id.clone(),
            message: commit.message.clone(),
            author: commit.author.clone(),
            timestamp: commit.timestamp.clone(),
            parent_id: commit.parent_id.clone(),
            change_count,
        }
    }
}

/// The latest commit shown in a repository listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastCommit {
    pub id: CommitId,
    pub message: String,
    pub author: String,
    pub timestamp: String,
}

/// A file of a commit with its content resolved
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub hash: ObjectId,
    /// `None` if the blob is missing from the object store
    pub content: Option<String>,
}

/// Full commit with file contents and its change set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitDetail {
    pub id: CommitId,
    pub message: String,
    pub author: String,
    pub timestamp: String,
    pub parent_id: Option<CommitId>,
    pub files: BTreeMap<String, FileEntry>,
    pub changes: ChangeSet,
}

/// Repository listing entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoSummary {
    pub name: String,
    pub commit_count: usize,
    /// Total file entries across all commits
    pub file_count: usize,
    pub last_commit: Option<LastCommit>,
}

/// One event in the history of a single path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileHistoryEntry {
    pub commit_id: CommitId,
    pub message: String,
    pub author: String,
    pub timestamp: String,
    pub status: ChangeStatus,
    pub diff: Option<String>,
    pub previous_hash: Option<ObjectId>,
    pub current_hash: Option<ObjectId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreateOutcome {
    Created,
    AlreadyExists,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushReport {
    /// false when the commit id was already present
    pub accepted: bool,
    pub change_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullReport {
    pub pulled_count: usize,
    pub skipped_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloneReport {
    pub commit_count: usize,
    /// Distinct paths across all commits
    pub file_count: usize,
}
