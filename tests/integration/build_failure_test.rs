//! Build Failure Integration Tests
//!
//! Failed builds report their stage and never disturb the previous index.

use crate::support::{agent, expect_success, rebuild, runtime, test_config, upload, POISON};
use deusto_knowledge::services::knowledge::BuildStatus;
use deusto_knowledge::{AppError, BuildStage};

const RUST: &str = "Rust guarantees memory safety through ownership and borrowing rules.";
const CARGO: &str = "Cargo builds crates, resolves dependencies and runs tests.";

#[tokio::test]
async fn test_failed_rebuild_keeps_previous_index() {
    let tmp = tempfile::tempdir().unwrap();
    let (rt, _) = runtime(test_config(tmp.path()));
    let a = agent("A");

    upload(&rt, &a, "cargo.txt", CARGO).await;
    upload(&rt, &a, "rust.md", RUST).await;
    expect_success(rebuild(&rt, &a).await);
    let before = rt.knowledge().search(&a, "ownership borrowing", 3).await.unwrap();
    let index_bytes = std::fs::read(rt.knowledge().index().index_path(&a)).unwrap();

    upload(&rt, &a, "zz_poisoned.txt", &format!("{} in the last batch", POISON)).await;
    match rebuild(&rt, &a).await {
        BuildStatus::Failed {
            stage, retryable, ..
        } => {
            assert_eq!(stage, Some(BuildStage::Embed));
            assert!(retryable);
        }
        other => panic!("expected failure, got {:?}", other),
    }

    let after = rt.knowledge().search(&a, "ownership borrowing", 3).await.unwrap();
    assert_eq!(before, after);
    assert_eq!(
        std::fs::read(rt.knowledge().index().index_path(&a)).unwrap(),
        index_bytes
    );
    let stats = rt.knowledge().stats(&a).await.unwrap().unwrap();
    assert_eq!(stats.document_count, 2);
}

#[tokio::test]
async fn test_failed_first_build_leaves_no_index() {
    let tmp = tempfile::tempdir().unwrap();
    let (rt, _) = runtime(test_config(tmp.path()));
    let a = agent("A");

    // batch size 2: the poisoned document is alone in the last batch
    upload(&rt, &a, "cargo.txt", CARGO).await;
    upload(&rt, &a, "rust.md", RUST).await;
    upload(&rt, &a, "zz_poisoned.txt", POISON).await;

    assert!(matches!(
        rebuild(&rt, &a).await,
        BuildStatus::Failed { .. }
    ));
    assert!(!rt.knowledge().index().exists(&a));
    assert!(rt.knowledge().search(&a, "cargo", 3).await.unwrap().is_empty());

    let leftovers: Vec<_> = std::fs::read_dir(rt.knowledge().index().index_dir())
        .map(|entries| entries.filter_map(Result::ok).collect())
        .unwrap_or_default();
    assert!(leftovers.is_empty(), "temp files left behind: {:?}", leftovers);
}

#[tokio::test]
async fn test_unreadable_document_fails_whole_build_by_default() {
    let tmp = tempfile::tempdir().unwrap();
    let (rt, _) = runtime(test_config(tmp.path()));
    let a = agent("A");

    upload(&rt, &a, "broken.pdf", "this is not a pdf").await;
    upload(&rt, &a, "rust.md", RUST).await;

    match rebuild(&rt, &a).await {
        BuildStatus::Failed { stage, message, .. } => {
            assert_eq!(stage, Some(BuildStage::Load));
            assert!(message.contains("broken.pdf"));
        }
        other => panic!("expected failure, got {:?}", other),
    }
    assert!(!rt.knowledge().index().exists(&a));
}

#[tokio::test]
async fn test_tolerant_build_skips_unreadable_document() {
    let tmp = tempfile::tempdir().unwrap();
    let mut config = test_config(tmp.path());
    config.indexing.tolerate_document_failures = true;
    let (rt, _) = runtime(config);
    let a = agent("A");

    upload(&rt, &a, "broken.pdf", "this is not a pdf").await;
    upload(&rt, &a, "rust.md", RUST).await;

    let report = expect_success(rebuild(&rt, &a).await);
    assert_eq!(report.documents_indexed, 1);
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].file_name, "broken.pdf");

    let results = rt.knowledge().search(&a, "borrowing", 3).await.unwrap();
    assert_eq!(results[0].passage.source.file_name, "rust.md");
}

#[tokio::test(flavor = "current_thread")]
async fn test_second_build_for_same_agent_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    let (rt, _) = runtime(test_config(tmp.path()));
    let a = agent("A");
    upload(&rt, &a, "rust.md", RUST).await;
    let documents = rt.uploads().list(&a).await.unwrap();

    // no await between the submits: the first job cannot have finished
    let mut first = rt.scheduler().submit(a.clone(), documents.clone()).unwrap();
    let err = rt.scheduler().submit(a.clone(), documents).err().unwrap();
    assert!(matches!(err, AppError::BuildInProgress(_)));

    expect_success(first.wait().await);
    expect_success(rebuild(&rt, &a).await);
}

#[tokio::test]
async fn test_different_agents_build_in_parallel() {
    let tmp = tempfile::tempdir().unwrap();
    let (rt, _) = runtime(test_config(tmp.path()));
    let (a, b) = (agent("A"), agent("B"));
    upload(&rt, &a, "rust.md", RUST).await;
    upload(&rt, &b, "cargo.txt", CARGO).await;

    let mut job_a = rt.rebuild(&a).await.unwrap();
    let mut job_b = rt.rebuild(&b).await.unwrap();
    let (status_a, status_b) = tokio::join!(job_a.wait(), job_b.wait());
    expect_success(status_a);
    expect_success(status_b);

    let hits = rt.knowledge().search(&b, "dependencies", 1).await.unwrap();
    assert_eq!(hits[0].passage.source.file_name, "cargo.txt");
}
