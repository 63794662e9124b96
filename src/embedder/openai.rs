//! OpenAI embeddings backend.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use crate::config::EmbeddingConfig;
use crate::types::DocsError;

use super::EmbeddingProvider;

const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";

/// `POST /embeddings` client for OpenAI-compatible endpoints.
pub struct OpenAiEmbedder {
    client: Client,
    api_base: String,
    api_key: String,
    model: String,
    dimensions: usize,
}

impl OpenAiEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self, DocsError> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| DocsError::Configuration("OPENAI_API_KEY is not set".to_string()))?;
        let client = Client::builder()
            .user_agent(concat!("docsmith/", env!("CARGO_PKG_VERSION")))
            .use_rustls_tls()
            .build()
            .map_err(|err| DocsError::Configuration(err.to_string()))?;
        Ok(Self {
            client,
            api_base: config
                .api_base
                .clone()
                .unwrap_or_else(|| DEFAULT_API_BASE.to_string())
                .trim_end_matches('/')
                .to_string(),
            api_key,
            model: config.model.clone(),
            dimensions: config.dimensions,
        })
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
    dimensions: usize,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingEntry>,
}

#[derive(Deserialize)]
struct EmbeddingEntry {
    index: usize,
    embedding: Vec<f32>,
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbedder {
    fn name(&self) -> &str {
        "openai"
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, DocsError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let response = self
            .client
            .post(format!("{}/embeddings", self.api_base))
            .bearer_auth(&self.api_key)
            .json(&EmbeddingRequest {
                model: &self.model,
                input: texts,
                dimensions: self.dimensions,
            })
            .send()
            .await
            .map_err(|err| DocsError::FetchTransient(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = format!("embedding request returned {status}: {body}");
            // Rate limiting and server-side errors are worth a retry.
            return if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                Err(DocsError::FetchTransient(message))
            } else {
                Err(DocsError::Embedding(message))
            };
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|err| DocsError::Embedding(err.to_string()))?;

        if parsed.data.len() != texts.len() {
            return Err(DocsError::Embedding(format!(
                "expected {} embeddings, provider returned {}",
                texts.len(),
                parsed.data.len()
            )));
        }

        let mut entries = parsed.data;
        entries.sort_by_key(|entry| entry.index);
        Ok(entries.into_iter().map(|entry| entry.embedding).collect())
    }
}
