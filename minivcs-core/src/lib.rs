//! MiniVCS Core Library
//!
//! A small version-control engine:
//! - Content-addressed blob store (SHA-1)
//! - Single-parent commit graph with a fast-forward HEAD
//! - Per-commit change sets with unified diffs
//! - Push, pull and clone between repositories
//! - Interchangeable storage backends (document, SQLite, in-memory)
//!
//! ```no_run
//! # async fn demo() -> minivcs_core::error::Result<()> {
//! use minivcs_core::{CommitDescriptor, Engine, EngineConfig};
//!
//! let engine = Engine::from_config(EngineConfig::default())?;
//! let mut commit = CommitDescriptor::default();
//! commit.id = "c1".into();
//! commit.files.insert("README".into(), "hello\n".into());
//! engine.push_commit("demo", commit).await?;
//! # Ok(())
//! # }
//! ```

pub mod commit;
pub mod config;
pub mod diff;
pub mod document_store;
pub mod engine;
pub mod error;
pub mod lock;
pub mod memory_store;
pub mod name;
pub mod object;
pub mod sqlite_store;
pub mod storage;
pub mod sync;

pub use commit::{
    ChangeRecord, ChangeSet, ChangeStatus, CloneReport, Commit, CommitDescriptor, CommitDetail,
    CommitId, CommitSummary, CreateOutcome, FileEntry, FileHistoryEntry, HeadUpdate, LastCommit,
    PullReport, PushReport, Refs, RepoSummary,
};
pub use config::{BackendKind, ConfigError, EngineConfig, PullHeadPolicy};
pub use document_store::DocumentStore;
pub use engine::Engine;
pub use error::VcsError;
pub use memory_store::MemoryStore;
pub use name::RepoName;
pub use object::ObjectId;
pub use sqlite_store::SqliteStore;
pub use storage::{Storage, StorageError};
