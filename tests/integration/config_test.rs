//! Configuration Integration Tests

use deusto_knowledge::services::embedding::EmbeddingProviderType;
use deusto_knowledge::storage::ConfigService;
use deusto_knowledge::{AppConfig, KnowledgeRuntime, SettingsUpdate};

use crate::support::test_config;

#[test]
fn test_config_file_round_trip() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("nested").join("config.json");

    let mut service = ConfigService::with_path(&path).unwrap();
    assert!(path.exists());
    assert_eq!(service.stored().retrieval.top_k, 3);

    service
        .update_config(SettingsUpdate {
            chunk_size: Some(500),
            overlap: Some(50),
            embedding_provider: Some(EmbeddingProviderType::Local),
            ..Default::default()
        })
        .unwrap();

    let reopened = ConfigService::with_path(&path).unwrap();
    assert_eq!(reopened.stored().chunking.chunk_size, 500);
    assert_eq!(
        reopened.stored().embedding.provider.provider,
        EmbeddingProviderType::Local
    );
}

#[test]
fn test_invalid_chunking_rejected_and_not_saved() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("config.json");
    let mut service = ConfigService::with_path(&path).unwrap();

    let err = service.update_config(SettingsUpdate {
        overlap: Some(5000),
        ..Default::default()
    });
    assert!(err.is_err());
    let reopened = ConfigService::with_path(&path).unwrap();
    assert_eq!(reopened.stored().chunking.overlap, 200);
}

#[test]
fn test_env_overrides_apply_to_storage_and_keys() {
    let mut config = AppConfig::default();
    config.apply_env_overrides(|key| match key {
        "OPENAI_API_KEY" => Some("sk-test".to_string()),
        "DEUSTO_INDEX_DIR" => Some("/srv/indexes".to_string()),
        _ => None,
    });
    assert_eq!(config.chat.api_key.as_deref(), Some("sk-test"));
    assert_eq!(config.embedding.provider.api_key.as_deref(), Some("sk-test"));
    assert_eq!(config.storage.index_dir, std::path::PathBuf::from("/srv/indexes"));
}

#[tokio::test]
async fn test_runtime_from_local_config() {
    let tmp = tempfile::tempdir().unwrap();
    let runtime = KnowledgeRuntime::from_config(test_config(tmp.path())).unwrap();
    assert_eq!(runtime.embeddings().model_id(), "local/hashed-tf@256");
    assert_eq!(runtime.config().chunking.chunk_size, 200);
}

#[tokio::test]
async fn test_runtime_rejects_remote_embeddings_without_key() {
    let tmp = tempfile::tempdir().unwrap();
    let mut config = test_config(tmp.path());
    config.embedding.provider.provider = EmbeddingProviderType::OpenAI;
    config.embedding.provider.dimension = None;
    assert!(KnowledgeRuntime::from_config(config).is_err());
}
