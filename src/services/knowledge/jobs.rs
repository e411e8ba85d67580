//! Background Builds
//!
//! Runs knowledge-base builds as Tokio tasks off the request path. Each agent
//! has at most one active job; its latest status stays queryable after the
//! job finishes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::models::document::Document;
use crate::services::knowledge::manager::{BuildReport, KnowledgeBaseManager};
use crate::utils::error::{AppError, AppResult, BuildStage};
use deusto_knowledge_core::AgentId;

/// Lifecycle of a background build.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum BuildStatus {
    Queued,
    Running,
    Succeeded { report: BuildReport },
    Failed {
        message: String,
        stage: Option<BuildStage>,
        retryable: bool,
    },
    Cancelled,
}

impl BuildStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BuildStatus::Succeeded { .. } | BuildStatus::Failed { .. } | BuildStatus::Cancelled
        )
    }

    fn from_result(result: AppResult<BuildReport>) -> Self {
        match result {
            Ok(report) => BuildStatus::Succeeded { report },
            Err(AppError::Cancelled) => BuildStatus::Cancelled,
            Err(e) => BuildStatus::Failed {
                message: e.to_string(),
                stage: e.build_stage(),
                retryable: e.is_retryable(),
            },
        }
    }
}

/// Handle to one submitted build.
pub struct BuildJob {
    agent: AgentId,
    status: watch::Receiver<BuildStatus>,
    cancel: CancellationToken,
}

impl BuildJob {
    pub fn agent(&self) -> &AgentId {
        &self.agent
    }

    pub fn status(&self) -> BuildStatus {
        self.status.borrow().clone()
    }

    /// Wait until the build reaches a terminal state.
    pub async fn wait(&mut self) -> BuildStatus {
        match self.status.wait_for(BuildStatus::is_terminal).await {
            Ok(status) => status.clone(),
            Err(_) => BuildStatus::Failed {
                message: "build task ended without reporting a result".to_string(),
                stage: None,
                retryable: true,
            },
        }
    }

    /// Request cancellation. In-flight embedding calls are aborted and
    /// nothing is persisted.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

/// Spawns builds and tracks their latest status per agent.
pub struct BuildScheduler {
    manager: Arc<KnowledgeBaseManager>,
    jobs: Mutex<HashMap<AgentId, watch::Receiver<BuildStatus>>>,
}

impl BuildScheduler {
    pub fn new(manager: Arc<KnowledgeBaseManager>) -> Self {
        Self {
            manager,
            jobs: Mutex::new(HashMap::new()),
        }
    }

    /// Start a build for `agent`. Rejected with `BuildInProgress` while a
    /// previous job for the same agent has not finished.
    pub fn submit(&self, agent: AgentId, documents: Vec<Document>) -> AppResult<BuildJob> {
        let (tx, rx) = watch::channel(BuildStatus::Queued);
        {
            let mut jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
            let active = jobs
                .get(&agent)
                .is_some_and(|latest| !latest.borrow().is_terminal());
            if active || self.manager.is_building(&agent) {
                return Err(AppError::BuildInProgress(agent.to_string()));
            }
            jobs.insert(agent.clone(), rx.clone());
        }

        let cancel = CancellationToken::new();
        let manager = Arc::clone(&self.manager);
        let task_agent = agent.clone();
        let task_cancel = cancel.clone();

        tokio::spawn(async move {
            if task_cancel.is_cancelled() {
                let _ = tx.send(BuildStatus::Cancelled);
                return;
            }
            let _ = tx.send(BuildStatus::Running);

            let result = manager
                .build_for_agent_with_cancel(&task_agent, &documents, &task_cancel)
                .await;
            if let Err(ref e) = result {
                warn!(agent = %task_agent, error = %e, "background build did not succeed");
            }
            let _ = tx.send(BuildStatus::from_result(result));
        });

        info!(agent = %agent, "background build submitted");
        Ok(BuildJob {
            agent,
            status: rx,
            cancel,
        })
    }

    /// Latest known status for `agent`, if a build was ever submitted.
    pub fn status(&self, agent: &AgentId) -> Option<BuildStatus> {
        self.jobs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(agent)
            .map(|rx| rx.borrow().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::embedding::{EmbeddingManager, EmbeddingManagerConfig, LocalEmbeddingProvider};
    use crate::services::knowledge::chunker::SlidingWindowChunker;
    use crate::services::knowledge::loader::LoaderRegistry;
    use crate::services::knowledge::vector_index::VectorIndex;
    use std::path::Path;

    fn scheduler(index_dir: &Path) -> BuildScheduler {
        let manager = KnowledgeBaseManager::new(
            Arc::new(LoaderRegistry::default()),
            Arc::new(SlidingWindowChunker::new(100, 20).unwrap()),
            Arc::new(EmbeddingManager::new(
                Arc::new(LocalEmbeddingProvider::with_dimension(16)),
                EmbeddingManagerConfig::default(),
            )),
            VectorIndex::new(index_dir),
            false,
        );
        BuildScheduler::new(Arc::new(manager))
    }

    fn doc(dir: &Path, agent: &AgentId, name: &str, text: &str) -> Document {
        let path = dir.join(name);
        std::fs::write(&path, text).unwrap();
        Document::from_path(agent.clone(), path, text.len() as u64)
    }

    #[tokio::test]
    async fn test_submit_and_wait() {
        let tmp = tempfile::tempdir().unwrap();
        let sched = scheduler(&tmp.path().join("idx"));
        let a = AgentId::new("A").unwrap();
        let d = doc(tmp.path(), &a, "a.txt", "hello knowledge base");

        assert!(sched.status(&a).is_none());
        let mut job = sched.submit(a.clone(), vec![d]).unwrap();
        match job.wait().await {
            BuildStatus::Succeeded { report } => assert_eq!(report.passages, 1),
            other => panic!("unexpected status {:?}", other),
        }
        assert!(matches!(sched.status(&a), Some(BuildStatus::Succeeded { .. })));

        // a finished job does not block the next one
        let mut again = sched.submit(a, vec![]).unwrap();
        assert!(again.wait().await.is_terminal());
    }

    #[tokio::test]
    async fn test_failed_build_reports_stage() {
        let tmp = tempfile::tempdir().unwrap();
        let sched = scheduler(&tmp.path().join("idx"));
        let a = AgentId::new("A").unwrap();
        let bad = doc(tmp.path(), &a, "bad.pdf", "not a pdf");

        let mut job = sched.submit(a, vec![bad]).unwrap();
        match job.wait().await {
            BuildStatus::Failed { stage, message, .. } => {
                assert_eq!(stage, Some(BuildStage::Load));
                assert!(message.contains("bad.pdf"));
            }
            other => panic!("unexpected status {:?}", other),
        }
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_second_submit_rejected_while_active() {
        let tmp = tempfile::tempdir().unwrap();
        let sched = scheduler(&tmp.path().join("idx"));
        let a = AgentId::new("A").unwrap();

        // current_thread: the spawned task cannot run before we yield
        let mut first = sched.submit(a.clone(), vec![]).unwrap();
        assert!(matches!(first.status(), BuildStatus::Queued));
        let err = sched.submit(a.clone(), vec![]).err().unwrap();
        assert!(matches!(err, AppError::BuildInProgress(_)));

        let b = AgentId::new("B").unwrap();
        let mut other = sched.submit(b, vec![]).unwrap();

        first.wait().await;
        other.wait().await;
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_cancel_before_start() {
        let tmp = tempfile::tempdir().unwrap();
        let sched = scheduler(&tmp.path().join("idx"));
        let a = AgentId::new("A").unwrap();

        let mut job = sched.submit(a.clone(), vec![]).unwrap();
        job.cancel();
        assert!(matches!(job.wait().await, BuildStatus::Cancelled));
        assert!(!tmp.path().join("idx").join("A.kb").exists());
    }
}
