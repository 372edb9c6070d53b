//! Storage-backed response cache for language-model calls.
//!
//! Responses are keyed by task, a hash of the prompt, and the model id, so a
//! re-run over unchanged text does not hit the model again.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tracing::debug;

use clearsure_llm::{LanguageModel, PromptTask};
use clearsure_shared::Result;
use clearsure_storage::Storage;

/// Cache key for `prompt` under `task`.
pub fn prompt_hash(prompt: &str, task: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(prompt.as_bytes());
    hasher.update(task.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Wraps a model so task prompts are answered from `llm_cache` when possible.
/// Plain [`LanguageModel::invoke`] calls bypass the cache.
pub struct CachedModel<'a> {
    inner: &'a dyn LanguageModel,
    storage: &'a Storage,
    hits: AtomicUsize,
    misses: AtomicUsize,
}

impl<'a> CachedModel<'a> {
    pub fn new(inner: &'a dyn LanguageModel, storage: &'a Storage) -> Self {
        Self {
            inner,
            storage,
            hits: AtomicUsize::new(0),
            misses: AtomicUsize::new(0),
        }
    }

    /// `(hits, misses)` so far.
    pub fn stats(&self) -> (usize, usize) {
        (
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
        )
    }
}

#[async_trait]
impl LanguageModel for CachedModel<'_> {
    async fn invoke(&self, prompt: &str) -> Result<String> {
        self.inner.invoke(prompt).await
    }

    fn model_id(&self) -> &str {
        self.inner.model_id()
    }

    async fn invoke_task(&self, task: PromptTask, prompt: &str) -> Result<String> {
        let hash = prompt_hash(prompt, task.as_str());
        let model_id = self.inner.model_id();

        if let Some(cached) = self
            .storage
            .get_llm_cache(task.as_str(), &hash, model_id)
            .await?
        {
            self.hits.fetch_add(1, Ordering::Relaxed);
            debug!(task = task.as_str(), "LLM cache hit");
            return Ok(cached);
        }

        let response = self.inner.invoke_task(task, prompt).await?;
        self.misses.fetch_add(1, Ordering::Relaxed);
        self.storage
            .set_llm_cache(task.as_str(), &hash, model_id, &response)
            .await?;
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clearsure_llm::MockModel;
    use clearsure_llm::prompts::label_text;

    async fn test_storage() -> Storage {
        let path = std::env::temp_dir().join(format!("clearsure_cache_{}.db", uuid::Uuid::now_v7()));
        Storage::open(&path).await.expect("open test db")
    }

    #[test]
    fn hash_depends_on_task() {
        assert_eq!(prompt_hash("text", "label_text"), prompt_hash("text", "label_text"));
        assert_ne!(prompt_hash("text", "label_text"), prompt_hash("text", "simplify_text"));
    }

    #[tokio::test]
    async fn second_call_is_served_from_storage() {
        let storage = test_storage().await;
        let mock = MockModel::new(["Flood Cover"]);
        let cached = CachedModel::new(&mock, &storage);

        assert_eq!(label_text("Floods are covered.", &cached).await.unwrap(), "Flood Cover");
        assert_eq!(label_text("Floods are covered.", &cached).await.unwrap(), "Flood Cover");
        assert_eq!(mock.prompts().len(), 1);
        assert_eq!(cached.stats(), (1, 1));
    }

    #[tokio::test]
    async fn cache_is_per_model() {
        let storage = test_storage().await;
        let first = MockModel::new(["Flood Cover"]).with_model_id("llama3");
        label_text("x", &CachedModel::new(&first, &storage)).await.unwrap();

        let second = MockModel::new(["Water Damage"]).with_model_id("qwen");
        let answer = label_text("x", &CachedModel::new(&second, &storage)).await.unwrap();
        assert_eq!(answer, "Water Damage");
    }

    #[tokio::test]
    async fn plain_invoke_is_not_cached() {
        let storage = test_storage().await;
        let mock = MockModel::new(["a", "b"]);
        let cached = CachedModel::new(&mock, &storage);
        assert_eq!(cached.invoke("p").await.unwrap(), "a");
        assert_eq!(cached.invoke("p").await.unwrap(), "b");
        assert_eq!(cached.stats(), (0, 0));
    }
}
