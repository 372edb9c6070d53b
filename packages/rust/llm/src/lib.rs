//! Language-model access for ClearSure.
//!
//! [`LanguageModel`] is the seam every pipeline stage talks to. Two HTTP
//! backends implement it ([`OllamaClient`] and [`OpenAiClient`]); the
//! [`prompts`] module holds the task-specific templates and [`text`] the
//! output clean-up helpers.

mod ollama;
mod openai;
pub mod prompts;
pub mod text;

#[cfg(any(test, feature = "test-util"))]
mod mock;

use async_trait::async_trait;
use tracing::info;

use clearsure_shared::{LlmProvider, LlmSettings, Result};

pub use ollama::OllamaClient;
pub use openai::OpenAiClient;
pub use text::{
    SplitSpan, clean_label, extract_json_block, parse_split_spans, parse_yes_no,
    remove_think_block, strip_fence,
};

#[cfg(any(test, feature = "test-util"))]
pub use mock::MockModel;

/// The kind of request a prompt represents. Used as the cache key namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PromptTask {
    Simplify,
    SimplifyStage2,
    KnowledgeOntology,
    CleanUp,
    Label,
    TopicSame,
    Summary,
    SplitSpans,
}

impl PromptTask {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Simplify => "simplify_text",
            Self::SimplifyStage2 => "simplify_text_stage2",
            Self::KnowledgeOntology => "create_knowledge_ontology",
            Self::CleanUp => "clean_up_first_phase",
            Self::Label => "label_text",
            Self::TopicSame => "sentence_topic_same",
            Self::Summary => "one_sentence_summary",
            Self::SplitSpans => "propose_split_spans",
        }
    }
}

/// A text-in, text-out model.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Send a single prompt and return the answer text.
    async fn invoke(&self, prompt: &str) -> Result<String>;

    /// Identifier of the underlying model, e.g. `deepseek-r1:14b`.
    fn model_id(&self) -> &str;

    /// Send a prompt on behalf of `task`. Wrappers such as caches override
    /// this; plain backends ignore the task.
    async fn invoke_task(&self, task: PromptTask, prompt: &str) -> Result<String> {
        let _ = task;
        self.invoke(prompt).await
    }
}

/// Construct the configured backend.
pub fn build_model(settings: &LlmSettings) -> Result<Box<dyn LanguageModel>> {
    info!(provider = %settings.provider, model = %settings.model, "Building language model");
    match settings.provider {
        LlmProvider::Ollama => Ok(Box::new(OllamaClient::new(settings)?)),
        LlmProvider::OpenAi => Ok(Box::new(OpenAiClient::new(settings)?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(provider: LlmProvider, api_key: Option<&str>) -> LlmSettings {
        LlmSettings {
            provider,
            model: "m".into(),
            host: "http://localhost:11434".into(),
            num_ctx: 8192,
            temperature: 0.0,
            api_key: api_key.map(String::from),
            openai_base_url: "https://api.openai.com/v1".into(),
            timeout_secs: 5,
            embedding_model: "all-minilm".into(),
        }
    }

    #[test]
    fn builds_configured_provider() {
        let model = build_model(&settings(LlmProvider::Ollama, None)).unwrap();
        assert_eq!(model.model_id(), "m");
        assert!(build_model(&settings(LlmProvider::OpenAi, Some("k"))).is_ok());
        assert!(build_model(&settings(LlmProvider::OpenAi, None)).is_err());
    }

    #[test]
    fn task_names_are_distinct() {
        let tasks = [
            PromptTask::Simplify,
            PromptTask::SimplifyStage2,
            PromptTask::KnowledgeOntology,
            PromptTask::CleanUp,
            PromptTask::Label,
            PromptTask::TopicSame,
            PromptTask::Summary,
            PromptTask::SplitSpans,
        ];
        let names: std::collections::HashSet<_> = tasks.iter().map(|t| t.as_str()).collect();
        assert_eq!(names.len(), tasks.len());
    }

    #[tokio::test]
    async fn default_invoke_task_delegates() {
        let model = MockModel::new(["answer"]);
        let out = model.invoke_task(PromptTask::Label, "prompt").await.unwrap();
        assert_eq!(out, "answer");
    }
}
