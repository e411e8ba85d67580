//! Knowledge Base Lifecycle Integration Tests
//!
//! Upload documents, build through the background scheduler, search, reuse
//! on rebuild, reload after restart and delete.

use crate::support::{agent, expect_success, rebuild, runtime, test_config, upload};
use deusto_knowledge::services::knowledge::BuildStatus;

const BIOLOGY: &str = "The mitochondria is the powerhouse of the cell and produces energy.";
const RUST: &str = "Rust guarantees memory safety through ownership and borrowing rules.";

// ============================================================================
// Search
// ============================================================================

#[tokio::test]
async fn test_search_without_knowledge_base_is_empty() {
    let tmp = tempfile::tempdir().unwrap();
    let (rt, _) = runtime(test_config(tmp.path()));

    let results = rt
        .knowledge()
        .search(&agent("A"), "what is X?", 3)
        .await
        .unwrap();
    assert!(results.is_empty());
    assert!(rt.knowledge().stats(&agent("A")).await.unwrap().is_none());
}

#[tokio::test]
async fn test_two_files_search_attributes_source() {
    let tmp = tempfile::tempdir().unwrap();
    let (rt, _) = runtime(test_config(tmp.path()));
    let a = agent("A");

    upload(&rt, &a, "biology.txt", BIOLOGY).await;
    upload(&rt, &a, "rust.md", RUST).await;
    let report = expect_success(rebuild(&rt, &a).await);
    assert_eq!(report.documents_indexed, 2);
    assert_eq!(report.passages, 2);

    let results = rt
        .knowledge()
        .search(&a, "ownership and borrowing give memory safety", 3)
        .await
        .unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].passage.source.file_name, "rust.md");
    assert_eq!(results[0].passage.content, RUST);
    assert!(results[0].score > results[1].score);
}

#[tokio::test]
async fn test_search_is_repeatable_and_bounded_by_k() {
    let tmp = tempfile::tempdir().unwrap();
    let (rt, _) = runtime(test_config(tmp.path()));
    let a = agent("A");

    let long = (0..40)
        .map(|i| format!("Sentence number {} about compilers and parsers.", i))
        .collect::<Vec<_>>()
        .join(" ");
    upload(&rt, &a, "long.txt", &long).await;
    expect_success(rebuild(&rt, &a).await);

    let first = rt.knowledge().search(&a, "parsers", 3).await.unwrap();
    let second = rt.knowledge().search(&a, "parsers", 3).await.unwrap();
    assert_eq!(first.len(), 3);
    assert_eq!(first, second);
    assert!(first.windows(2).all(|w| w[0].score >= w[1].score));
}

#[tokio::test]
async fn test_agents_are_isolated() {
    let tmp = tempfile::tempdir().unwrap();
    let (rt, _) = runtime(test_config(tmp.path()));

    upload(&rt, &agent("A"), "rust.md", RUST).await;
    expect_success(rebuild(&rt, &agent("A")).await);

    let other = rt.knowledge().search(&agent("B"), "ownership", 3).await.unwrap();
    assert!(other.is_empty());
}

// ============================================================================
// Rebuild and persistence
// ============================================================================

#[tokio::test]
async fn test_rebuild_reuses_unchanged_documents() {
    let tmp = tempfile::tempdir().unwrap();
    let (rt, _) = runtime(test_config(tmp.path()));
    let a = agent("A");

    upload(&rt, &a, "biology.txt", BIOLOGY).await;
    expect_success(rebuild(&rt, &a).await);

    upload(&rt, &a, "rust.md", RUST).await;
    let report = expect_success(rebuild(&rt, &a).await);
    assert_eq!(report.documents_indexed, 2);
    assert_eq!(report.reused_documents, 1);
    assert_eq!(report.embedded_passages, 1);

    let unchanged = expect_success(rebuild(&rt, &a).await);
    assert_eq!(unchanged.reused_documents, 2);
    assert_eq!(unchanged.embedded_passages, 0);
}

#[tokio::test]
async fn test_index_survives_restart() {
    let tmp = tempfile::tempdir().unwrap();
    let a = agent("A");
    {
        let (rt, _) = runtime(test_config(tmp.path()));
        upload(&rt, &a, "rust.md", RUST).await;
        expect_success(rebuild(&rt, &a).await);
    }

    let (restarted, _) = runtime(test_config(tmp.path()));
    let results = restarted.knowledge().search(&a, "borrowing", 1).await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].passage.source.file_name, "rust.md");

    let stats = restarted.knowledge().stats(&a).await.unwrap().unwrap();
    assert_eq!(stats.document_count, 1);
    assert_eq!(stats.embedding_model, restarted.embeddings().model_id());
}

#[tokio::test]
async fn test_removed_upload_leaves_index_on_rebuild() {
    let tmp = tempfile::tempdir().unwrap();
    let (rt, _) = runtime(test_config(tmp.path()));
    let a = agent("A");

    upload(&rt, &a, "biology.txt", BIOLOGY).await;
    upload(&rt, &a, "rust.md", RUST).await;
    expect_success(rebuild(&rt, &a).await);

    assert!(rt.uploads().delete(&a, "biology.txt").await.unwrap());
    let report = expect_success(rebuild(&rt, &a).await);
    assert_eq!(report.documents_indexed, 1);

    let results = rt.knowledge().search(&a, "mitochondria cell", 3).await.unwrap();
    assert!(results
        .iter()
        .all(|r| r.passage.source.file_name == "rust.md"));
}

// ============================================================================
// Deletion
// ============================================================================

#[tokio::test]
async fn test_delete_agent_removes_index_and_uploads() {
    let tmp = tempfile::tempdir().unwrap();
    let (rt, _) = runtime(test_config(tmp.path()));
    let a = agent("A");

    upload(&rt, &a, "rust.md", RUST).await;
    expect_success(rebuild(&rt, &a).await);
    assert!(rt.knowledge().index().exists(&a));

    assert!(rt.delete_agent(&a).await.unwrap());
    assert!(!rt.knowledge().index().exists(&a));
    assert!(rt.uploads().list(&a).await.unwrap().is_empty());
    assert!(rt.knowledge().search(&a, "borrowing", 3).await.unwrap().is_empty());
    assert!(!rt.delete_agent(&a).await.unwrap());
}

#[tokio::test]
async fn test_scheduler_status_tracks_latest_job() {
    let tmp = tempfile::tempdir().unwrap();
    let (rt, _) = runtime(test_config(tmp.path()));
    let a = agent("A");

    assert!(rt.scheduler().status(&a).is_none());
    upload(&rt, &a, "rust.md", RUST).await;
    expect_success(rebuild(&rt, &a).await);
    assert!(matches!(
        rt.scheduler().status(&a),
        Some(BuildStatus::Succeeded { .. })
    ));
}
