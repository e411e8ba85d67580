//! Response Assembler
//!
//! Answers a chat turn for an agent: retrieves passages from the agent's
//! knowledge base, injects them ahead of the question and calls the
//! conversational model with the agent's persona. Retrieval failures degrade
//! to an answer without context instead of failing the turn.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::context::{format_context, select_context, Citation};
use super::profile::AgentProfileSource;
use crate::models::agent::AgentProfile;
use crate::models::document::ScoredPassage;
use crate::models::settings::RetrievalSettings;
use crate::services::knowledge::manager::KnowledgeBaseManager;
use crate::utils::error::{AppError, AppResult};
use deusto_knowledge_core::{recent_exchanges, AgentId, ChatMessage};
use deusto_knowledge_llm::{LlmError, LlmProvider, LlmRequestOptions};

/// Source of scored passages for an agent.
#[async_trait]
pub trait PassageRetriever: Send + Sync {
    async fn retrieve(
        &self,
        agent: &AgentId,
        query: &str,
        k: usize,
    ) -> AppResult<Vec<ScoredPassage>>;
}

#[async_trait]
impl PassageRetriever for KnowledgeBaseManager {
    async fn retrieve(
        &self,
        agent: &AgentId,
        query: &str,
        k: usize,
    ) -> AppResult<Vec<ScoredPassage>> {
        self.search(agent, query, k).await
    }
}

/// Answer text plus the passages that were injected to produce it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RagResponse {
    pub answer: String,
    pub citations: Vec<Citation>,
}

pub struct ResponseAssembler {
    retriever: Arc<dyn PassageRetriever>,
    profiles: Arc<dyn AgentProfileSource>,
    llm: Arc<dyn LlmProvider>,
    settings: RetrievalSettings,
    chat_timeout: Duration,
}

impl ResponseAssembler {
    pub fn new(
        retriever: Arc<dyn PassageRetriever>,
        profiles: Arc<dyn AgentProfileSource>,
        llm: Arc<dyn LlmProvider>,
        settings: RetrievalSettings,
        chat_timeout: Duration,
    ) -> Self {
        Self {
            retriever,
            profiles,
            llm,
            settings,
            chat_timeout,
        }
    }

    pub fn settings(&self) -> &RetrievalSettings {
        &self.settings
    }

    /// Answer `question` for `agent` given the prior conversation.
    pub async fn respond(
        &self,
        agent: &AgentId,
        history: &[ChatMessage],
        question: &str,
    ) -> AppResult<RagResponse> {
        if question.trim().is_empty() {
            return Err(AppError::validation("question must not be empty"));
        }

        let profile = self
            .profiles
            .profile(agent)
            .await?
            .unwrap_or_else(|| AgentProfile::default_for(agent.clone()));

        let retrieved = match self
            .retriever
            .retrieve(agent, question, self.settings.top_k)
            .await
        {
            Ok(passages) => passages,
            Err(e) => {
                warn!(agent = %agent, error = %e, "retrieval failed, answering without context");
                Vec::new()
            }
        };
        let retrieved_count = retrieved.len();
        let selected = select_context(retrieved, self.settings.max_context_chars);
        if selected.len() < retrieved_count {
            debug!(
                agent = %agent,
                retrieved = retrieved_count,
                kept = selected.len(),
                "context trimmed to budget"
            );
        }

        let mut messages = recent_exchanges(history, self.settings.history_window);
        messages.push(ChatMessage::user(build_user_message(question, &selected)));

        let options = LlmRequestOptions {
            temperature_override: profile.temperature,
            max_tokens_override: profile.max_output_tokens,
        };
        let call = self
            .llm
            .send_message(messages, Some(profile.personality.clone()), options);
        let response = match tokio::time::timeout(self.chat_timeout, call).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(AppError::Chat(LlmError::Timeout {
                    seconds: self.chat_timeout.as_secs(),
                }))
            }
        };

        let citations: Vec<Citation> = selected
            .iter()
            .map(|p| Citation::from_scored(p, self.settings.citation_preview_chars))
            .collect();
        info!(
            agent = %agent,
            model = %response.model,
            citations = citations.len(),
            "response assembled"
        );

        Ok(RagResponse {
            answer: response.text().to_string(),
            citations,
        })
    }
}

/// The question alone, or the question preceded by the retrieved context.
pub fn build_user_message(question: &str, context: &[ScoredPassage]) -> String {
    if context.is_empty() {
        return question.to_string();
    }
    format!(
        "{}\n\nUser question: {}\n\nAnswer using the provided information when it is relevant.",
        format_context(context),
        question
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::document::{DocumentRef, Passage};
    use crate::services::rag::profile::StaticProfiles;
    use deusto_knowledge_core::MessageRole;
    use deusto_knowledge_llm::{
        LlmResponse, LlmResult, Message, ProviderConfig, StopReason, UsageStats,
    };
    use std::sync::Mutex;

    type Recorded = (Vec<Message>, Option<String>, LlmRequestOptions);

    struct MockLlm {
        config: ProviderConfig,
        delay: Option<Duration>,
        calls: Mutex<Vec<Recorded>>,
    }

    impl MockLlm {
        fn new() -> Self {
            Self {
                config: ProviderConfig::default(),
                delay: None,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn last_call(&self) -> Recorded {
            self.calls.lock().unwrap().last().cloned().unwrap()
        }
    }

    #[async_trait]
    impl LlmProvider for MockLlm {
        fn name(&self) -> &'static str {
            "mock"
        }

        fn model(&self) -> &str {
            "mock-chat"
        }

        async fn send_message(
            &self,
            messages: Vec<Message>,
            system: Option<String>,
            request_options: LlmRequestOptions,
        ) -> LlmResult<LlmResponse> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.calls
                .lock()
                .unwrap()
                .push((messages, system, request_options));
            Ok(LlmResponse {
                content: Some("the answer".to_string()),
                stop_reason: StopReason::EndTurn,
                usage: UsageStats::default(),
                model: "mock-chat".to_string(),
            })
        }

        async fn health_check(&self) -> LlmResult<()> {
            Ok(())
        }

        fn config(&self) -> &ProviderConfig {
            &self.config
        }
    }

    enum MockRetriever {
        Fixed(Vec<ScoredPassage>),
        Failing,
    }

    #[async_trait]
    impl PassageRetriever for MockRetriever {
        async fn retrieve(
            &self,
            _agent: &AgentId,
            _query: &str,
            k: usize,
        ) -> AppResult<Vec<ScoredPassage>> {
            match self {
                MockRetriever::Fixed(passages) => Ok(passages.iter().take(k).cloned().collect()),
                MockRetriever::Failing => Err(AppError::search("index corrupt")),
            }
        }
    }

    fn scored(content: &str, file: &str, score: f32) -> ScoredPassage {
        ScoredPassage {
            passage: Passage {
                content: content.to_string(),
                ordinal: 0,
                chunk_index: 0,
                char_start: 0,
                char_end: content.chars().count(),
                char_len: content.chars().count(),
                byte_len: content.len(),
                segment_index: 0,
                source: DocumentRef {
                    document_id: file.to_string(),
                    file_name: file.to_string(),
                },
            },
            score,
        }
    }

    fn assembler(
        retriever: MockRetriever,
        profiles: StaticProfiles,
        llm: Arc<MockLlm>,
    ) -> ResponseAssembler {
        ResponseAssembler::new(
            Arc::new(retriever),
            Arc::new(profiles),
            llm,
            RetrievalSettings::default(),
            Duration::from_secs(5),
        )
    }

    fn agent() -> AgentId {
        AgentId::new("tutor").unwrap()
    }

    #[tokio::test]
    async fn test_respond_with_context() {
        let llm = Arc::new(MockLlm::new());
        let retriever = MockRetriever::Fixed(vec![
            scored("Rust was first released in 2015.", "rust.md", 0.9),
            scored("Cargo is the package manager.", "cargo.txt", 0.7),
        ]);
        let rag = assembler(retriever, StaticProfiles::new(), Arc::clone(&llm));

        let response = rag.respond(&agent(), &[], "When was Rust released?").await.unwrap();
        assert_eq!(response.answer, "the answer");
        assert_eq!(response.citations.len(), 2);
        assert_eq!(response.citations[0].document_name, "rust.md");
        assert_eq!(response.citations[1].document_name, "cargo.txt");

        let (messages, system, _) = llm.last_call();
        assert_eq!(messages.len(), 1);
        let prompt = &messages[0].content;
        assert!(prompt.starts_with("Relevant information: Rust was first released in 2015."));
        assert!(prompt.contains("User question: When was Rust released?"));
        assert_eq!(system.as_deref(), Some(crate::models::agent::DEFAULT_PERSONALITY));
    }

    #[tokio::test]
    async fn test_respond_without_knowledge_uses_bare_question() {
        let llm = Arc::new(MockLlm::new());
        let rag = assembler(
            MockRetriever::Fixed(Vec::new()),
            StaticProfiles::new(),
            Arc::clone(&llm),
        );

        let response = rag.respond(&agent(), &[], "Hello!").await.unwrap();
        assert!(response.citations.is_empty());
        let (messages, _, _) = llm.last_call();
        assert_eq!(messages.last().unwrap().content, "Hello!");
    }

    #[tokio::test]
    async fn test_retrieval_failure_falls_back_to_no_context() {
        let llm = Arc::new(MockLlm::new());
        let rag = assembler(MockRetriever::Failing, StaticProfiles::new(), Arc::clone(&llm));

        let response = rag.respond(&agent(), &[], "Still there?").await.unwrap();
        assert_eq!(response.answer, "the answer");
        assert!(response.citations.is_empty());
        assert_eq!(llm.last_call().0[0].content, "Still there?");
    }

    #[tokio::test]
    async fn test_profile_overrides_persona_and_parameters() {
        let llm = Arc::new(MockLlm::new());
        let profiles = StaticProfiles::new();
        profiles
            .insert(
                AgentProfile::new(agent(), "Tutor", "You are a strict Latin tutor.")
                    .with_temperature(0.1)
                    .with_max_output_tokens(128),
            )
            .await;
        let rag = assembler(MockRetriever::Fixed(Vec::new()), profiles, Arc::clone(&llm));

        rag.respond(&agent(), &[], "Salve").await.unwrap();
        let (_, system, options) = llm.last_call();
        assert_eq!(system.as_deref(), Some("You are a strict Latin tutor."));
        assert_eq!(options.temperature_override, Some(0.1));
        assert_eq!(options.max_tokens_override, Some(128));
    }

    #[tokio::test]
    async fn test_history_is_windowed() {
        let llm = Arc::new(MockLlm::new());
        let rag = assembler(
            MockRetriever::Fixed(Vec::new()),
            StaticProfiles::new(),
            Arc::clone(&llm),
        );
        let history: Vec<ChatMessage> = (0..6)
            .flat_map(|i| {
                vec![
                    ChatMessage::user(format!("q{}", i)),
                    ChatMessage::assistant(format!("a{}", i)),
                ]
            })
            .collect();

        rag.respond(&agent(), &history, "q6").await.unwrap();
        let (messages, _, _) = llm.last_call();
        // four prior exchanges plus the new question
        assert_eq!(messages.len(), 9);
        assert_eq!(messages[0].content, "q2");
        assert_eq!(messages[8].role, MessageRole::User);
        assert_eq!(messages[8].content, "q6");
    }

    #[tokio::test]
    async fn test_citation_previews_are_truncated() {
        let llm = Arc::new(MockLlm::new());
        let long = "x".repeat(300);
        let rag = assembler(
            MockRetriever::Fixed(vec![scored(&long, "big.txt", 0.5)]),
            StaticProfiles::new(),
            llm,
        );

        let response = rag.respond(&agent(), &[], "What?").await.unwrap();
        let citation = &response.citations[0];
        assert_eq!(citation.text, long);
        assert_eq!(citation.preview.len(), 203);
    }

    #[tokio::test]
    async fn test_chat_timeout() {
        let llm = Arc::new(MockLlm {
            delay: Some(Duration::from_secs(10)),
            ..MockLlm::new()
        });
        let rag = ResponseAssembler::new(
            Arc::new(MockRetriever::Fixed(Vec::new())),
            Arc::new(StaticProfiles::new()),
            llm,
            RetrievalSettings::default(),
            Duration::from_millis(20),
        );

        let err = rag.respond(&agent(), &[], "Anyone?").await.unwrap_err();
        assert!(matches!(err, AppError::Chat(LlmError::Timeout { .. })));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_empty_question_rejected() {
        let rag = assembler(
            MockRetriever::Fixed(Vec::new()),
            StaticProfiles::new(),
            Arc::new(MockLlm::new()),
        );
        let err = rag.respond(&agent(), &[], "   ").await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn test_build_user_message() {
        assert_eq!(build_user_message("Hi", &[]), "Hi");
        let text = build_user_message("Why?", &[scored("Because.", "a.txt", 1.0)]);
        assert_eq!(
            text,
            "Relevant information: Because.\n\nUser question: Why?\n\nAnswer using the provided information when it is relevant."
        );
    }
}
