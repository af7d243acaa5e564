//! Integration tests for incremental indexing.

mod common;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use common::{service, write};
use docqa_directory_watcher::FileAction;
use docqa_retrieval::{IncrementalIndexer, RagService, apply};
use pretty_assertions::assert_eq;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

async fn wait_until<F, Fut>(mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    tokio::time::timeout(Duration::from_secs(10), async {
        while !condition().await {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await
    .unwrap();
}

async fn indexed(service: &RagService, path: &Path) -> bool {
    service.is_indexed(path).await
}

async fn removed(service: &RagService, path: &Path) -> bool {
    !service.is_indexed(path).await
}

#[tokio::test]
async fn test_apply_dispatches_actions() {
    let docs = TempDir::new().unwrap();
    let path = write(docs.path(), "a.txt", "Paris is the capital of France.");
    let (service, embedder) = service(docs.path());

    apply(&service, &FileAction::Process(path.clone())).await.unwrap();
    apply(&service, &FileAction::Process(path.clone())).await.unwrap();
    assert_eq!(embedder.call_count(), 1);

    apply(&service, &FileAction::Update(path.clone())).await.unwrap();
    assert_eq!(embedder.call_count(), 2);
    assert_eq!(service.status().await.chunk_count, 1);

    apply(&service, &FileAction::Remove(path.clone())).await.unwrap();
    assert!(!service.is_indexed(&path).await);

    // Removing an unknown path is a no-op.
    apply(&service, &FileAction::Remove(path)).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_watcher_indexes_changes() {
    let docs = TempDir::new().unwrap();
    let (service, embedder) = service(docs.path());
    let service = Arc::new(service);
    let cancel = CancellationToken::new();

    let handle = IncrementalIndexer::new(Arc::clone(&service))
        .with_debounce(Duration::from_millis(300))
        .start(cancel.clone())
        .unwrap();

    let path = write(docs.path(), "notes.txt", "The meeting is on Tuesday.");
    write(docs.path(), "ignored.png", "not a document");
    wait_until(|| indexed(&service, &path)).await;
    assert_eq!(service.status().await.source_count, 1);

    std::fs::remove_file(&path).unwrap();
    wait_until(|| removed(&service, &path)).await;

    cancel.cancel();
    handle.await.unwrap();
    assert!(embedder.call_count() >= 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_burst_of_writes_is_indexed_once() {
    let docs = TempDir::new().unwrap();
    let (service, embedder) = service(docs.path());
    let service = Arc::new(service);
    let cancel = CancellationToken::new();

    let handle = IncrementalIndexer::new(Arc::clone(&service))
        .with_debounce(Duration::from_millis(500))
        .start(cancel.clone())
        .unwrap();

    let path = docs.path().join("draft.md");
    for i in 0..3 {
        std::fs::write(&path, format!("# Draft\n\nRevision {i}.")).unwrap();
    }

    wait_until(|| indexed(&service, &path)).await;
    tokio::time::sleep(Duration::from_millis(1500)).await;

    assert_eq!(embedder.call_count(), 1);
    let chunks = service.chunks_of(&path).await;
    assert!(chunks[0].content.ends_with("Revision 2."));

    cancel.cancel();
    handle.await.unwrap();
}

#[tokio::test]
async fn test_missing_root_fails_to_start() {
    let docs = TempDir::new().unwrap();
    let (service, _) = service(docs.path());

    let result = IncrementalIndexer::new(Arc::new(service))
        .with_root(docs.path().join("missing"))
        .start(CancellationToken::new());
    assert!(result.is_err());
}
