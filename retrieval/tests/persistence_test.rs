//! Integration tests for index snapshots.

mod common;

use common::{service, write, write_capital_corpus};
use docqa_retrieval::RagError;
use pretty_assertions::assert_eq;
use tempfile::TempDir;

#[tokio::test]
async fn test_persist_and_load_round_trip() {
    let docs = TempDir::new().unwrap();
    write_capital_corpus(docs.path());
    let (original, _) = service(docs.path());
    original.ingest_directory(docs.path(), false).await.unwrap();
    original.persist().await.unwrap();

    let (restored, embedder) = service(docs.path());
    assert!(restored.load().await.unwrap());

    assert_eq!(restored.status().await, original.status().await);
    assert_eq!(
        restored.search("Eiffel Tower", 3).await.unwrap(),
        original.search("Eiffel Tower", 3).await.unwrap()
    );

    // Unchanged files stay skipped after a restart.
    let report = restored.ingest_directory(docs.path(), false).await.unwrap();
    assert_eq!(report.skipped, 3);
    assert_eq!(embedder.call_count(), 1);
}

#[tokio::test]
async fn test_removals_survive_restart() {
    let docs = TempDir::new().unwrap();
    write_capital_corpus(docs.path());
    let (original, _) = service(docs.path());
    original.ingest_directory(docs.path(), false).await.unwrap();
    original
        .remove_document(docs.path().join("a.txt"))
        .await
        .unwrap();
    original.persist().await.unwrap();

    let (restored, _) = service(docs.path());
    restored.load().await.unwrap();

    let status = restored.status().await;
    assert_eq!(status.chunk_count, 2);
    assert_eq!(status.tombstoned, 1);
    let results = restored
        .retrieve("What is the capital of France?", &[])
        .await
        .unwrap();
    assert!(results.is_empty());
}

#[tokio::test]
async fn test_mismatched_snapshots_are_corruption() {
    let docs = TempDir::new().unwrap();
    write_capital_corpus(docs.path());
    let snapshot = docs.path().join(".docqa");

    let (small, _) = service(docs.path());
    small
        .process_document(docs.path().join("a.txt"))
        .await
        .unwrap();
    small.persist().await.unwrap();
    let small_chunks = std::fs::read(snapshot.join("chunks.bin")).unwrap();

    let (large, _) = service(docs.path());
    large.ingest_directory(docs.path(), false).await.unwrap();
    large.persist().await.unwrap();
    std::fs::write(snapshot.join("chunks.bin"), small_chunks).unwrap();

    let (restored, _) = service(docs.path());
    let err = restored.load().await.unwrap_err();
    assert!(matches!(err, RagError::IndexCorruption(_)));
    assert_eq!(restored.status().await.vector_count, 0);
}

#[tokio::test]
async fn test_garbage_snapshot_is_corruption() {
    let docs = TempDir::new().unwrap();
    write(docs.path(), "a.txt", "Some text.");
    let (original, _) = service(docs.path());
    original.persist().await.unwrap();
    std::fs::write(docs.path().join(".docqa").join("index.bin"), b"nonsense").unwrap();

    let (restored, _) = service(docs.path());
    assert!(matches!(
        restored.load().await.unwrap_err(),
        RagError::IndexCorruption(_)
    ));
}

#[tokio::test]
async fn test_compact_then_persist() {
    let docs = TempDir::new().unwrap();
    write_capital_corpus(docs.path());
    let (original, _) = service(docs.path());
    original.ingest_directory(docs.path(), false).await.unwrap();
    original
        .remove_document(docs.path().join("b.txt"))
        .await
        .unwrap();

    assert_eq!(original.compact().await.unwrap(), 1);
    original.persist().await.unwrap();

    let (restored, _) = service(docs.path());
    restored.load().await.unwrap();
    let status = restored.status().await;
    assert_eq!(status.vector_count, 2);
    assert_eq!(status.stored_chunks, 2);
    assert_eq!(status.tombstoned, 0);

    let results = restored
        .retrieve("What is the capital of France?", &[])
        .await
        .unwrap();
    assert_eq!(results[0].filename, "a.txt");
}
