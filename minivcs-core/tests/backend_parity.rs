//! Backend parity tests
//!
//! Runs one workload against every backend and checks that all of them
//! report the same logical results.

use std::sync::Arc;

use minivcs_core::{
    CommitDescriptor, DocumentStore, Engine, EngineConfig, MemoryStore, SqliteStore, Storage,
};
use serde_json::{Value, json};
use tempfile::TempDir;

fn descriptor(id: &str, ts: &str, parent: Option<&str>, files: &[(&str, &str)]) -> CommitDescriptor {
    CommitDescriptor {
        id: id.into(),
        message: format!("commit {id}"),
        author: "carol".into(),
        timestamp: Some(ts.into()),
        parent_id: parent.map(Into::into),
        files: files
            .iter()
            .map(|(p, c)| (p.to_string(), c.to_string()))
            .collect(),
    }
}

fn backends(dir: &TempDir) -> Vec<Arc<dyn Storage>> {
    vec![
        Arc::new(MemoryStore::new()),
        Arc::new(DocumentStore::open(&dir.path().join("document")).unwrap()),
        Arc::new(SqliteStore::open(&dir.path().join("sqlite")).unwrap()),
    ]
}

/// Drive a mixed workload and capture every observable result
async fn workload(engine: &Engine) -> Value {
    let mut log = Vec::new();

    let readme_v1 = "# Project\n\nline a\nline b\nline c\nline d\nline e\n";
    let readme_v2 = "# Project\n\nline a\nline B\nline c\nline d\nline e\nline f\n";

    log.push(json!(engine.create_repo("main").await.unwrap()));
    log.push(json!(engine.create_repo("main").await.unwrap()));

    for (desc, repo) in [
        (descriptor("c1", "2024-05-01T09:00:00", None, &[("README.md", readme_v1), ("src/lib.rs", "fn a() {}")]), "main"),
        (descriptor("c2", "2024-05-01T10:00:00", Some("c1"), &[("README.md", readme_v2), ("src/lib.rs", "fn a() {}")]), "main"),
        (descriptor("c3", "2024-05-01T10:00:00", Some("c2"), &[("README.md", readme_v2)]), "main"),
        (descriptor("side", "2024-05-02T00:00:00", Some("c1"), &[("other.txt", "side branch")]), "main"),
        (descriptor("c2", "2024-05-01T10:00:00", Some("c1"), &[]), "main"),
    ] {
        log.push(json!(engine.push_commit(repo, desc).await.unwrap()));
    }
    log.push(json!(
        engine
            .push_commit("main", descriptor("bad", "1", Some("missing"), &[]))
            .await
            .unwrap_err()
            .kind()
    ));

    log.push(json!(engine.get_commits("main").await.unwrap()));
    log.push(json!(engine.get_commit("main", "c2").await.unwrap()));
    log.push(json!(engine.get_changes("main", "c3").await.unwrap()));
    log.push(json!(engine.check_commit("main", "side").await.unwrap()));
    log.push(json!(engine.head("main").await.unwrap()));
    log.push(json!(engine.file_history("main", "README.md").await.unwrap()));

    log.push(json!(engine.pull("main", "mirror").await.unwrap()));
    log.push(json!(engine.pull("main", "mirror").await.unwrap()));
    log.push(json!(engine.get_commits("mirror").await.unwrap()));
    log.push(json!(engine.head("mirror").await.unwrap()));

    log.push(json!(engine.clone_repo("main", "copy").await.unwrap()));
    log.push(json!(engine.clone_repo("main", "copy").await.unwrap_err().kind()));
    log.push(json!(engine.get_commits("copy").await.unwrap()));
    log.push(json!(engine.head("copy").await.unwrap()));

    log.push(json!(engine.list_repos().await.unwrap()));
    engine.delete_repo("copy").await.unwrap();
    log.push(json!(engine.list_repos().await.unwrap()));
    log.push(json!(engine.get_commits("copy").await.unwrap_err().kind()));

    Value::Array(log)
}

#[tokio::test]
async fn test_backends_agree() {
    let dir = TempDir::new().unwrap();
    let mut results = Vec::new();
    for storage in backends(&dir) {
        let backend = storage.name();
        let engine: Engine = Engine::new(storage, EngineConfig::default());
        results.push((backend, workload(&engine).await));
    }

    let (reference_name, reference) = &results[0];
    for (backend, result) in &results[1..] {
        assert_eq!(
            result, reference,
            "{backend} diverges from {reference_name}"
        );
    }
}

#[tokio::test]
async fn test_workload_expectations() {
    let storage: Arc<dyn Storage> = Arc::new(MemoryStore::new());
    let engine: Engine = Engine::new(storage, EngineConfig::default());
    let log = workload(&engine).await;

    assert_eq!(log[0], json!("created"));
    assert_eq!(log[1], json!("already_exists"));
    // duplicate c2 push
    assert_eq!(log[6], json!({"accepted": false, "change_count": 0}));
    assert_eq!(log[7], json!("parent_not_found"));
    // head stays on the c3 tip, the side commit diverged
    assert_eq!(log[12], json!("c3"));
    assert_eq!(log[14], json!({"pulled_count": 4, "skipped_count": 0}));
    assert_eq!(log[15], json!({"pulled_count": 0, "skipped_count": 4}));
    assert_eq!(log[17], json!("c3"));
    assert_eq!(log[19], json!("target_already_exists"));
    assert_eq!(log[21], json!("c3"));
    assert_eq!(log[24], json!("repository_not_found"));
}

#[tokio::test]
async fn test_on_disk_backends_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let document_root = dir.path().join("document");
    let sqlite_root = dir.path().join("sqlite");

    {
        let stores: [Arc<dyn Storage>; 2] = [
            Arc::new(DocumentStore::open(&document_root).unwrap()),
            Arc::new(SqliteStore::open(&sqlite_root).unwrap()),
        ];
        for storage in stores {
            let engine: Engine = Engine::new(storage, EngineConfig::default());
            engine
                .push_commit("r", descriptor("a", "1", None, &[("f", "kept")]))
                .await
                .unwrap();
        }
    }

    let stores: [Arc<dyn Storage>; 2] = [
        Arc::new(DocumentStore::open(&document_root).unwrap()),
        Arc::new(SqliteStore::open(&sqlite_root).unwrap()),
    ];
    for storage in stores {
        let engine: Engine = Engine::new(storage, EngineConfig::default());
        let detail = engine.get_commit("r", "a").await.unwrap();
        assert_eq!(detail.files["f"].content.as_deref(), Some("kept"));
        assert_eq!(engine.head("r").await.unwrap().as_deref(), Some("a"));
    }
}
