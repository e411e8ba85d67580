//! Response Assembly Integration Tests
//!
//! `respond` against real knowledge bases, profiles read from disk and a
//! recording chat model.

use crate::support::{agent, expect_success, rebuild, runtime, test_config, upload};
use deusto_knowledge::models::agent::DEFAULT_PERSONALITY;
use deusto_knowledge::{ChatMessage, MessageRole};

const RUST: &str = "Rust guarantees memory safety through ownership and borrowing rules.";

#[tokio::test]
async fn test_answer_without_knowledge_base_has_no_citations() {
    let tmp = tempfile::tempdir().unwrap();
    let (rt, llm) = runtime(test_config(tmp.path()));

    let response = rt
        .assembler()
        .respond(&agent("A"), &[], "Tell me a joke")
        .await
        .unwrap();
    assert_eq!(response.answer, "recorded answer");
    assert!(response.citations.is_empty());

    let (messages, system) = llm.last_request();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].content, "Tell me a joke");
    assert_eq!(system.as_deref(), Some(DEFAULT_PERSONALITY));
}

#[tokio::test]
async fn test_answer_with_knowledge_base_cites_sources() {
    let tmp = tempfile::tempdir().unwrap();
    let (rt, llm) = runtime(test_config(tmp.path()));
    let a = agent("A");
    upload(&rt, &a, "rust.md", RUST).await;
    expect_success(rebuild(&rt, &a).await);

    let response = rt
        .assembler()
        .respond(&a, &[], "How does Rust achieve memory safety?")
        .await
        .unwrap();
    assert_eq!(response.citations.len(), 1);
    assert_eq!(response.citations[0].document_name, "rust.md");
    assert_eq!(response.citations[0].text, RUST);
    assert_eq!(response.citations[0].preview, RUST);

    let (messages, _) = llm.last_request();
    let prompt = &messages.last().unwrap().content;
    assert!(prompt.starts_with(&format!("Relevant information: {}", RUST)));
    assert!(prompt.contains("User question: How does Rust achieve memory safety?"));
}

#[tokio::test]
async fn test_profile_from_disk_and_history_window() {
    let tmp = tempfile::tempdir().unwrap();
    let config = test_config(tmp.path());
    std::fs::create_dir_all(&config.storage.profiles_dir).unwrap();
    std::fs::write(
        config.storage.profiles_dir.join("tutor.json"),
        r#"{"agent_id":"tutor","name":"Tutor","personality":"You are a patient Rust tutor.","temperature":0.2}"#,
    )
    .unwrap();
    let (rt, llm) = runtime(config);

    let history: Vec<ChatMessage> = (0..5)
        .flat_map(|i| {
            vec![
                ChatMessage::user(format!("question {}", i)),
                ChatMessage::assistant(format!("answer {}", i)),
            ]
        })
        .collect();
    rt.assembler()
        .respond(&agent("tutor"), &history, "next question")
        .await
        .unwrap();

    let (messages, system) = llm.last_request();
    assert_eq!(system.as_deref(), Some("You are a patient Rust tutor."));
    assert_eq!(messages.len(), 9);
    assert_eq!(messages[0].content, "question 1");
    assert_eq!(messages[8].role, MessageRole::User);
    assert_eq!(messages[8].content, "next question");
}

#[tokio::test]
async fn test_unreadable_index_degrades_to_plain_answer() {
    let tmp = tempfile::tempdir().unwrap();
    let (rt, llm) = runtime(test_config(tmp.path()));
    let a = agent("A");

    let index_path = rt.knowledge().index().index_path(&a);
    std::fs::create_dir_all(index_path.parent().unwrap()).unwrap();
    std::fs::write(&index_path, b"garbage").unwrap();
    assert!(rt.knowledge().search(&a, "anything", 3).await.is_err());

    let response = rt.assembler().respond(&a, &[], "Still works?").await.unwrap();
    assert!(response.citations.is_empty());
    assert_eq!(llm.last_request().0[0].content, "Still works?");
}
