//! Ollama REST client (`/api/generate` and `/api/embed`).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use clearsure_shared::{ClearSureError, LlmSettings, Result};

use crate::LanguageModel;

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    num_ctx: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

/// Client for a local or remote Ollama server.
pub struct OllamaClient {
    client: Client,
    host: String,
    model: String,
    embedding_model: String,
    num_ctx: u32,
    temperature: f32,
}

impl OllamaClient {
    pub fn new(settings: &LlmSettings) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|e| ClearSureError::Llm(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            host: settings.host.trim_end_matches('/').to_string(),
            model: settings.model.clone(),
            embedding_model: settings.embedding_model.clone(),
            num_ctx: settings.num_ctx,
            temperature: settings.temperature,
        })
    }

    /// Embed `texts` with the configured embedding model.
    ///
    /// Vectors are L2-normalised so dot product equals cosine similarity.
    pub async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let url = format!("{}/api/embed", self.host);
        let request = EmbedRequest {
            model: &self.embedding_model,
            input: texts,
        };

        debug!(url = %url, count = texts.len(), "Sending embedding request");

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| ClearSureError::Llm(format!("embedding request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ClearSureError::Llm(format!("Ollama HTTP {status}: {body}")));
        }

        let parsed: EmbedResponse = response
            .json()
            .await
            .map_err(|e| ClearSureError::Llm(format!("invalid embedding response: {e}")))?;

        if parsed.embeddings.len() != texts.len() {
            return Err(ClearSureError::Llm(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                parsed.embeddings.len()
            )));
        }

        Ok(parsed.embeddings.into_iter().map(normalize).collect())
    }
}

fn normalize(mut vector: Vec<f32>) -> Vec<f32> {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        vector.iter_mut().for_each(|v| *v /= norm);
    }
    vector
}

#[async_trait]
impl LanguageModel for OllamaClient {
    async fn invoke(&self, prompt: &str) -> Result<String> {
        let url = format!("{}/api/generate", self.host);
        let request = GenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
            options: GenerateOptions {
                num_ctx: self.num_ctx,
                temperature: self.temperature,
            },
        };

        debug!(model = %self.model, prompt_chars = prompt.len(), "Ollama generate");

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| ClearSureError::Llm(format!("request to {url} failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ClearSureError::Llm(format!("Ollama HTTP {status}: {body}")));
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| ClearSureError::Llm(format!("invalid Ollama response: {e}")))?;

        Ok(parsed.response.trim().to_string())
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clearsure_shared::LlmProvider;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn settings(host: String) -> LlmSettings {
        LlmSettings {
            provider: LlmProvider::Ollama,
            model: "deepseek-r1:14b".into(),
            host,
            num_ctx: 8192,
            temperature: 0.0,
            api_key: None,
            openai_base_url: String::new(),
            timeout_secs: 5,
            embedding_model: "all-minilm".into(),
        }
    }

    #[tokio::test]
    async fn generate_sends_options_and_trims() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .and(body_partial_json(serde_json::json!({
                "model": "deepseek-r1:14b",
                "stream": false,
                "options": {"num_ctx": 8192}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "response": "  The insurer pays.\n",
                "done": true
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = OllamaClient::new(&settings(format!("{}/", server.uri()))).unwrap();
        let out = client.invoke("Simplify this").await.unwrap();
        assert_eq!(out, "The insurer pays.");
        assert_eq!(client.model_id(), "deepseek-r1:14b");
    }

    #[tokio::test]
    async fn generate_surfaces_http_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(ResponseTemplate::new(404).set_body_string("model not found"))
            .mount(&server)
            .await;

        let client = OllamaClient::new(&settings(server.uri())).unwrap();
        let err = client.invoke("hi").await.unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("404"));
        assert!(msg.contains("model not found"));
    }

    #[tokio::test]
    async fn embeddings_are_normalized() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/embed"))
            .and(body_partial_json(serde_json::json!({"model": "all-minilm"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "embeddings": [[3.0, 4.0], [0.0, 0.0]]
            })))
            .mount(&server)
            .await;

        let client = OllamaClient::new(&settings(server.uri())).unwrap();
        let vectors = client
            .embed(&["Flood cover".to_string(), "Empty".to_string()])
            .await
            .unwrap();
        assert_eq!(vectors[0], vec![0.6, 0.8]);
        assert_eq!(vectors[1], vec![0.0, 0.0]);
    }
}
