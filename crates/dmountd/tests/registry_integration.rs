//! Concurrency tests for the mount registry.
//!
//! Tests CAN use `.unwrap()` and `.expect()`.

use std::path::Path;
use std::sync::Arc;

use dmount_core::Sandbox;
use dmountd::MountRegistry;
use tempfile::TempDir;
use tokio::sync::Barrier;

// ============================================================================
// Constants
// ============================================================================

const NARROW: &str = "a,b\n1,2\n";
const WIDE: &str = "a,b,c\n7,8,9\n7,8,9\n";

// ============================================================================
// Test Helpers
// ============================================================================

fn registry() -> (TempDir, Arc<MountRegistry>) {
    let dir = tempfile::tempdir().unwrap();
    let sandbox = Sandbox::open(dir.path()).unwrap();
    (dir, Arc::new(MountRegistry::new(sandbox)))
}

/// Replaces `name` in one step so a loader never sees a half-written file.
fn replace_file(dir: &Path, name: &str, contents: &str, tag: usize) {
    let staging = dir.join(format!(".{name}.{tag}.tmp"));
    std::fs::write(&staging, contents).unwrap();
    std::fs::rename(&staging, dir.join(name)).unwrap();
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_mounts_of_distinct_paths() {
    let (dir, registry) = registry();
    for i in 0..16 {
        std::fs::write(dir.path().join(format!("d{i:02}.csv")), format!("n\n{i}\n")).unwrap();
    }

    let mut tasks = Vec::new();
    for i in 0..16 {
        let registry = Arc::clone(&registry);
        tasks.push(tokio::spawn(async move {
            registry.mount(&format!("d{i:02}.csv")).await
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let status = registry.status().await;
    assert_eq!(status.len(), 16);
    for (i, summary) in status.iter().enumerate() {
        assert_eq!(summary.path.to_string(), format!("d{i:02}.csv"));
        assert_eq!(summary.row_count, 1);
    }
    assert_eq!(registry.get_row("d07.csv", 0).await.unwrap(), vec!["7"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_remounts_of_one_path() {
    let (dir, registry) = registry();
    replace_file(dir.path(), "shared.csv", NARROW, 0);
    registry.mount("shared.csv").await.unwrap();

    for round in 0..25usize {
        // Both writers leave the barrier together, so their replace and
        // mount steps interleave freely.
        let barrier = Arc::new(Barrier::new(3));
        let mut writers = Vec::new();
        for (slot, contents) in [NARROW, WIDE].into_iter().enumerate() {
            let registry = Arc::clone(&registry);
            let barrier = Arc::clone(&barrier);
            let root = dir.path().to_path_buf();
            writers.push(tokio::spawn(async move {
                barrier.wait().await;
                replace_file(&root, "shared.csv", contents, round * 2 + slot + 1);
                registry.mount("shared.csv").await.unwrap();
            }));
        }

        let reader = {
            let registry = Arc::clone(&registry);
            let barrier = Arc::clone(&barrier);
            tokio::spawn(async move {
                barrier.wait().await;
                for _ in 0..10 {
                    let row = registry.get_row("shared.csv", 0).await.unwrap();
                    assert!(row == ["1", "2"] || row == ["7", "8", "9"], "mixed row {row:?}");
                    tokio::task::yield_now().await;
                }
            })
        };

        for writer in writers {
            writer.await.unwrap();
        }
        reader.await.unwrap();

        let status = registry.status().await;
        assert_eq!(status.len(), 1);
        let summary = &status[0];
        let first = registry.get_row("shared.csv", 0).await.unwrap();
        match summary.columns.len() {
            2 => {
                assert_eq!(summary.row_count, 1);
                assert_eq!(first, ["1", "2"]);
                assert!(registry.get_row("shared.csv", 1).await.is_err());
            }
            3 => {
                assert_eq!(summary.row_count, 2);
                assert_eq!(first, ["7", "8", "9"]);
                assert_eq!(registry.get_row("shared.csv", 1).await.unwrap(), ["7", "8", "9"]);
            }
            n => panic!("round {round}: unexpected column count {n}"),
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_unmount_while_reading() {
    let (dir, registry) = registry();
    replace_file(dir.path(), "gone.csv", NARROW, 0);
    registry.mount("gone.csv").await.unwrap();

    let barrier = Arc::new(Barrier::new(2));
    let reader = {
        let registry = Arc::clone(&registry);
        let barrier = Arc::clone(&barrier);
        tokio::spawn(async move {
            barrier.wait().await;
            let mut outcomes = Vec::new();
            for _ in 0..200 {
                outcomes.push(registry.get_row("gone.csv", 0).await);
                tokio::task::yield_now().await;
            }
            outcomes
        })
    };

    barrier.wait().await;
    assert!(registry.unmount("gone.csv").await);
    assert!(!registry.unmount("gone.csv").await);

    let outcomes = reader.await.unwrap();
    let first_miss = outcomes.iter().position(Result::is_err);
    for (i, outcome) in outcomes.iter().enumerate() {
        match outcome {
            // Every hit is the whole row.
            Ok(row) => {
                assert_eq!(row, &["1", "2"]);
                assert!(first_miss.map_or(true, |miss| i < miss), "hit at {i} after a miss");
            }
            Err(e) => assert_eq!(e.to_string(), "invalid path or index: gone.csv/0"),
        }
    }

    assert!(registry.get_row("gone.csv", 0).await.is_err());
    assert!(registry.is_empty().await);
}
