//! SQLite storage backend
//!
//! Every repository is a directory holding one SQLite database (WAL mode) with
//! normalized tables for commits, their file maps, blob contents, change sets
//! and refs. Each commit is recorded in a single transaction, so a crash never
//! leaves a commit without its files or changes.

use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension, params};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::commit::{ChangeRecord, ChangeSet, ChangeStatus, Commit, CommitId, HeadUpdate, Refs};
use crate::name::RepoName;
use crate::object::ObjectId;
use crate::storage::{Result, Storage, StorageError};

const DB_FILE: &str = "vcs.db";

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS commits (
        id TEXT PRIMARY KEY,
        message TEXT NOT NULL,
        author TEXT NOT NULL,
        timestamp TEXT NOT NULL,
        parent_id TEXT NULL
    );
    CREATE TABLE IF NOT EXISTS commit_files (
        commit_id TEXT NOT NULL REFERENCES commits(id),
        path TEXT NOT NULL,
        hash TEXT NOT NULL,
        PRIMARY KEY (commit_id, path)
    ) WITHOUT ROWID;
    CREATE TABLE IF NOT EXISTS objects (
        hash TEXT PRIMARY KEY,
        content TEXT NOT NULL
    ) WITHOUT ROWID;
    CREATE TABLE IF NOT EXISTS changes (
        commit_id TEXT NOT NULL REFERENCES commits(id),
        path TEXT NOT NULL,
        status TEXT NOT NULL,
        diff TEXT NULL,
        previous_hash TEXT NULL,
        current_hash TEXT NULL,
        PRIMARY KEY (commit_id, path)
    ) WITHOUT ROWID;
    CREATE TABLE IF NOT EXISTS head (
        id INTEGER PRIMARY KEY CHECK (id = 0),
        commit_id TEXT NULL
    );
    CREATE TABLE IF NOT EXISTS branches (
        name TEXT PRIMARY KEY,
        commit_id TEXT NULL
    ) WITHOUT ROWID;
";

fn open_db(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.pragma_update(None, "temp_store", "MEMORY")?;
    conn.execute_batch(SCHEMA)?;
    Ok(conn)
}

fn parse_oid(hex: &str) -> Result<ObjectId> {
    ObjectId::from_hex(hex).map_err(|e| StorageError::Corrupt(format!("bad object id {hex:?}: {e}")))
}

fn parse_opt_oid(hex: Option<String>) -> Result<Option<ObjectId>> {
    hex.as_deref().map(parse_oid).transpose()
}

fn conn_has_commit(conn: &Connection, id: &str) -> Result<bool> {
    Ok(conn
        .query_row("SELECT 1 FROM commits WHERE id=?1", params![id], |_| Ok(()))
        .optional()?
        .is_some())
}

fn conn_files(conn: &Connection, commit_id: &str) -> Result<BTreeMap<String, ObjectId>> {
    let mut stmt = conn.prepare_cached("SELECT path,hash FROM commit_files WHERE commit_id=?1")?;
    let mut rows = stmt.query(params![commit_id])?;
    let mut files = BTreeMap::new();
    while let Some(row) = rows.next()? {
        let path: String = row.get(0)?;
        let hash: String = row.get(1)?;
        files.insert(path, parse_oid(&hash)?);
    }
    Ok(files)
}

fn conn_refs(conn: &Connection) -> Result<Refs> {
    let head: Option<String> = conn
        .query_row("SELECT commit_id FROM head WHERE id=0", [], |r| r.get(0))
        .optional()?
        .flatten();
    let mut stmt = conn.prepare_cached("SELECT name,commit_id FROM branches ORDER BY name")?;
    let mut rows = stmt.query([])?;
    let mut branches = BTreeMap::new();
    while let Some(row) = rows.next()? {
        branches.insert(row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?);
    }
    Ok(Refs { head, branches })
}

fn conn_write_refs(conn: &Connection, refs: &Refs) -> Result<()> {
    conn.execute(
        "INSERT INTO head (id,commit_id) VALUES (0,?1) \
         ON CONFLICT(id) DO UPDATE SET commit_id=excluded.commit_id",
        params![refs.head],
    )?;
    conn.execute("DELETE FROM branches", [])?;
    for (name, target) in &refs.branches {
        conn.execute(
            "INSERT INTO branches (name,commit_id) VALUES (?1,?2)",
            params![name, target],
        )?;
    }
    Ok(())
}

/// Insert one commit with its files and change set
fn conn_insert_commit(conn: &Connection, commit: &Commit, changes: &ChangeSet) -> Result<()> {
    if conn_has_commit(conn, &commit.id)? {
        return Err(StorageError::DuplicateCommit(commit.id.clone()));
    }
    conn.execute(
        "INSERT INTO commits (id,message,author,timestamp,parent_id) VALUES (?1,?2,?3,?4,?5)",
        params![
            commit.id,
            commit.message,
            commit.author,
            commit.timestamp,
            commit.parent_id
        ],
    )?;
    let mut files =
        conn.prepare_cached("INSERT INTO commit_files (commit_id,path,hash) VALUES (?1,?2,?3)")?;
    for (path, hash) in &commit.files {
        files.execute(params![commit.id, path, hash.to_hex()])?;
    }
    let mut rows = conn.prepare_cached(
        "INSERT INTO changes (commit_id,path,status,diff,previous_hash,current_hash) \
         VALUES (?1,?2,?3,?4,?5,?6)",
    )?;
    for (path, change) in changes {
        rows.execute(params![
            commit.id,
            path,
            change.status.as_str(),
            change.diff,
            change.previous_hash.map(|h| h.to_hex()),
            change.current_hash.map(|h| h.to_hex()),
        ])?;
    }
    Ok(())
}

fn conn_change_record(row: &rusqlite::Row<'_>) -> Result<ChangeRecord> {
    let status: String = row.get("status")?;
    let status = ChangeStatus::parse(&status)
        .ok_or_else(|| StorageError::Corrupt(format!("unknown change status {status:?}")))?;
    Ok(ChangeRecord {
        status,
        diff: row.get("diff")?,
        previous_hash: parse_opt_oid(row.get("previous_hash")?)?,
        current_hash: parse_opt_oid(row.get("current_hash")?)?,
    })
}

type SharedConnection = Arc<Mutex<Connection>>;

/// One SQLite database per repository
///
/// Connections are opened on first use and kept until the repository is
/// deleted.
pub struct SqliteStore {
    root: PathBuf,
    connections: Mutex<HashMap<RepoName, SharedConnection>>,
}

impl SqliteStore {
    /// Open or create a SQLite store rooted at `path`
    pub fn open(path: &Path) -> Result<Self> {
        fs::create_dir_all(path)?;
        Ok(Self {
            root: path.to_path_buf(),
            connections: Mutex::new(HashMap::new()),
        })
    }

    fn repo_path(&self, repo: &RepoName) -> PathBuf {
        self.root.join(repo.as_str())
    }

    fn db_path(&self, repo: &RepoName) -> PathBuf {
        self.repo_path(repo).join(DB_FILE)
    }

    fn connections(&self) -> MutexGuard<'_, HashMap<RepoName, SharedConnection>> {
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Cached connection to an existing repository's database
    fn conn(&self, repo: &RepoName) -> Result<SharedConnection> {
        let mut connections = self.connections();
        if let Some(conn) = connections.get(repo) {
            return Ok(conn.clone());
        }
        let path = self.db_path(repo);
        if !path.exists() {
            return Err(StorageError::RepositoryNotFound(repo.to_string()));
        }
        let conn = Arc::new(Mutex::new(open_db(&path)?));
        connections.insert(repo.clone(), conn.clone());
        Ok(conn)
    }

    fn with_conn<T>(
        &self,
        repo: &RepoName,
        f: impl FnOnce(&mut Connection) -> Result<T>,
    ) -> Result<T> {
        let conn = self.conn(repo)?;
        let mut conn = conn.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut conn)
    }
}

#[async_trait]
impl Storage for SqliteStore {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn create_repo(&self, repo: &RepoName) -> Result<bool> {
        let path = self.db_path(repo);
        if path.exists() {
            return Ok(false);
        }
        fs::create_dir_all(self.repo_path(repo))?;
        let conn = open_db(&path)?;
        conn_write_refs(&conn, &Refs::default())?;
        self.connections()
            .insert(repo.clone(), Arc::new(Mutex::new(conn)));
        Ok(true)
    }

    async fn repo_exists(&self, repo: &RepoName) -> Result<bool> {
        Ok(self.db_path(repo).exists())
    }

    async fn delete_repo(&self, repo: &RepoName) -> Result<()> {
        let path = self.repo_path(repo);
        if !path.exists() {
            return Err(StorageError::RepositoryNotFound(repo.to_string()));
        }
        self.connections().remove(repo);
        fs::remove_dir_all(&path)?;
        Ok(())
    }

    async fn list_repos(&self) -> Result<Vec<RepoName>> {
        let mut repos = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.path().join(DB_FILE).is_file() {
                continue;
            }
            if let Some(Ok(name)) = entry.file_name().to_str().map(RepoName::parse) {
                repos.push(name);
            }
        }
        repos.sort();
        Ok(repos)
    }

    async fn put_blob(&self, repo: &RepoName, content: &str) -> Result<ObjectId> {
        let id = ObjectId::for_content(content);
        let inserted = self.with_conn(repo, |conn| {
            let mut stmt = conn
                .prepare_cached("INSERT OR IGNORE INTO objects (hash,content) VALUES (?1,?2)")?;
            Ok(stmt.execute(params![id.to_hex(), content])? > 0)
        })?;
        if inserted {
            tracing::debug!(repo = %repo, object = %id, "stored blob");
        }
        Ok(id)
    }

    async fn get_blob(&self, repo: &RepoName, id: &ObjectId) -> Result<Option<String>> {
        self.with_conn(repo, |conn| {
            let mut stmt = conn.prepare_cached("SELECT content FROM objects WHERE hash=?1")?;
            Ok(stmt
                .query_row(params![id.to_hex()], |r| r.get(0))
                .optional()?)
        })
    }

    async fn list_blobs(&self, repo: &RepoName) -> Result<Vec<ObjectId>> {
        self.with_conn(repo, |conn| {
            let mut stmt = conn.prepare_cached("SELECT hash FROM objects ORDER BY hash")?;
            let mut rows = stmt.query([])?;
            let mut ids = Vec::new();
            while let Some(row) = rows.next()? {
                let hex: String = row.get(0)?;
                ids.push(parse_oid(&hex)?);
            }
            Ok(ids)
        })
    }

    async fn record_commit(
        &self,
        repo: &RepoName,
        commit: &Commit,
        changes: &ChangeSet,
        head: HeadUpdate,
    ) -> Result<()> {
        self.with_conn(repo, |conn| {
            let tx = conn.transaction()?;
            conn_insert_commit(&tx, commit, changes)?;
            let mut refs = conn_refs(&tx)?;
            if head.apply(&mut refs, commit) {
                conn_write_refs(&tx, &refs)?;
            }
            tx.commit()?;
            Ok(())
        })
    }

    async fn import_commits(
        &self,
        repo: &RepoName,
        batch: &[(Commit, ChangeSet)],
        head: HeadUpdate,
    ) -> Result<()> {
        self.with_conn(repo, |conn| {
            let tx = conn.transaction()?;
            let mut refs = conn_refs(&tx)?;
            let mut moved = false;
            for (commit, changes) in batch {
                conn_insert_commit(&tx, commit, changes)?;
                moved |= head.apply(&mut refs, commit);
            }
            if moved {
                conn_write_refs(&tx, &refs)?;
            }
            tx.commit()?;
            Ok(())
        })
    }

    async fn get_commit(&self, repo: &RepoName, id: &str) -> Result<Option<Commit>> {
        self.with_conn(repo, |conn| {
            let row = conn
                .query_row(
                    "SELECT id,message,author,timestamp,parent_id FROM commits WHERE id=?1",
                    params![id],
                    |r| {
                        Ok(Commit {
                            id: r.get(0)?,
                            message: r.get(1)?,
                            author: r.get(2)?,
                            timestamp: r.get(3)?,
                            parent_id: r.get(4)?,
                            files: BTreeMap::new(),
                        })
                    },
                )
                .optional()?;
            match row {
                Some(mut commit) => {
                    commit.files = conn_files(conn, id)?;
                    Ok(Some(commit))
                }
                None => Ok(None),
            }
        })
    }

    async fn has_commit(&self, repo: &RepoName, id: &str) -> Result<bool> {
        self.with_conn(repo, |conn| conn_has_commit(conn, id))
    }

    async fn list_commits(&self, repo: &RepoName) -> Result<Vec<Commit>> {
        self.with_conn(repo, |conn| {
            let mut files: HashMap<String, BTreeMap<String, ObjectId>> = HashMap::new();
            {
                let mut stmt =
                    conn.prepare_cached("SELECT commit_id,path,hash FROM commit_files")?;
                let mut rows = stmt.query([])?;
                while let Some(row) = rows.next()? {
                    let commit_id: String = row.get(0)?;
                    let path: String = row.get(1)?;
                    let hash: String = row.get(2)?;
                    files
                        .entry(commit_id)
                        .or_default()
                        .insert(path, parse_oid(&hash)?);
                }
            }
            let mut stmt =
                conn.prepare_cached("SELECT id,message,author,timestamp,parent_id FROM commits")?;
            let mut rows = stmt.query([])?;
            let mut commits = Vec::new();
            while let Some(row) = rows.next()? {
                let id: String = row.get(0)?;
                let commit_files = files.remove(&id).unwrap_or_default();
                commits.push(Commit {
                    id,
                    message: row.get(1)?,
                    author: row.get(2)?,
                    timestamp: row.get(3)?,
                    parent_id: row.get(4)?,
                    files: commit_files,
                });
            }
            Ok(commits)
        })
    }

    async fn get_changes(&self, repo: &RepoName, id: &str) -> Result<Option<ChangeSet>> {
        self.with_conn(repo, |conn| {
            if !conn_has_commit(conn, id)? {
                return Ok(None);
            }
            let mut stmt = conn.prepare_cached(
                "SELECT path,status,diff,previous_hash,current_hash FROM changes WHERE commit_id=?1",
            )?;
            let mut rows = stmt.query(params![id])?;
            let mut changes = ChangeSet::new();
            while let Some(row) = rows.next()? {
                changes.insert(row.get("path")?, conn_change_record(row)?);
            }
            Ok(Some(changes))
        })
    }

    async fn list_changes(&self, repo: &RepoName) -> Result<HashMap<CommitId, ChangeSet>> {
        self.with_conn(repo, |conn| {
            let mut all: HashMap<CommitId, ChangeSet> = HashMap::new();
            {
                let mut stmt = conn.prepare_cached("SELECT id FROM commits")?;
                let mut rows = stmt.query([])?;
                while let Some(row) = rows.next()? {
                    all.insert(row.get(0)?, ChangeSet::new());
                }
            }
            let mut stmt = conn.prepare_cached(
                "SELECT commit_id,path,status,diff,previous_hash,current_hash FROM changes",
            )?;
            let mut rows = stmt.query([])?;
            while let Some(row) = rows.next()? {
                let commit_id: String = row.get("commit_id")?;
                all.entry(commit_id)
                    .or_default()
                    .insert(row.get("path")?, conn_change_record(row)?);
            }
            Ok(all)
        })
    }

    async fn refs(&self, repo: &RepoName) -> Result<Refs> {
        self.with_conn(repo, |conn| conn_refs(conn))
    }

    async fn set_refs(&self, repo: &RepoName, refs: &Refs) -> Result<()> {
        self.with_conn(repo, |conn| {
            let tx = conn.transaction()?;
            conn_write_refs(&tx, refs)?;
            tx.commit()?;
            Ok(())
        })
    }
}
