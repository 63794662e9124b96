//! Embedding provider seam and the batching wrapper around it.
//!
//! [`EmbeddingProvider`] is the one trait the rest of the engine talks to;
//! [`Embedder`] layers batching, bounded concurrency, and transient-failure
//! retries on top of whichever provider is configured.

pub mod cache;
pub mod openai;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt, TryStreamExt};
use tracing::warn;

use crate::config::{EmbeddingConfig, EmbeddingProviderKind};
use crate::types::DocsError;

pub use cache::{CacheStats, EmbeddingCache};
pub use openai::OpenAiEmbedder;

/// A backend that turns text into fixed-dimension vectors.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Output vector dimensionality.
    fn dimensions(&self) -> usize;

    /// Embeds a batch of texts, preserving input order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, DocsError>;
}

/// Builds the provider selected by configuration.
pub fn provider_from_config(
    config: &EmbeddingConfig,
) -> Result<Arc<dyn EmbeddingProvider>, DocsError> {
    match config.provider {
        EmbeddingProviderKind::OpenAi => Ok(Arc::new(OpenAiEmbedder::new(config)?)),
        EmbeddingProviderKind::Mock => {
            Ok(Arc::new(MockEmbeddingProvider::new(config.dimensions)))
        }
    }
}

/// Batching and retry wrapper over an [`EmbeddingProvider`].
#[derive(Clone)]
pub struct Embedder {
    provider: Arc<dyn EmbeddingProvider>,
    batch_size: usize,
    concurrency: usize,
    max_attempts: usize,
}

impl Embedder {
    pub fn new(provider: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            provider,
            batch_size: 100,
            concurrency: 5,
            max_attempts: 3,
        }
    }

    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn dimensions(&self) -> usize {
        self.provider.dimensions()
    }

    /// Embeds one query string.
    pub async fn embed_one(&self, text: &str) -> Result<Vec<f32>, DocsError> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors.pop().ok_or_else(|| {
            DocsError::Embedding("provider returned no vector for query".to_string())
        })
    }

    /// Embeds a single batch with transient-failure retries.
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, DocsError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let mut attempt = 1;
        loop {
            match self.provider.embed_batch(texts).await {
                Ok(vectors) => return Ok(vectors),
                Err(err) if err.is_transient() && attempt < self.max_attempts => {
                    warn!(
                        provider = self.provider.name(),
                        attempt,
                        error = %err,
                        "embedding batch failed, retrying"
                    );
                    tokio::time::sleep(Duration::from_millis(200 * attempt as u64)).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Embeds an arbitrary number of texts by partitioning them into
    /// `batch_size` batches and running up to `concurrency` batches in
    /// parallel. Output order matches input order.
    pub async fn embed_stream(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, DocsError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let batches: Vec<Vec<String>> = texts
            .chunks(self.batch_size)
            .map(|batch| batch.to_vec())
            .collect();

        let futures = batches.into_iter().map(|batch| {
            let embedder = self.clone();
            async move { embedder.embed_batch(&batch).await }
        });

        let results: Vec<Vec<Vec<f32>>> = stream::iter(futures)
            .buffered(self.concurrency)
            .try_collect()
            .await?;

        Ok(results.into_iter().flatten().collect())
    }
}

/// Deterministic hash-seeded embeddings for tests and offline runs.
#[derive(Clone, Debug)]
pub struct MockEmbeddingProvider {
    dimensions: usize,
}

impl MockEmbeddingProvider {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }

    fn hash_to_vec(&self, text: &str) -> Vec<f32> {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut hasher = DefaultHasher::new();
        text.hash(&mut hasher);
        let seed = hasher.finish();
        (0..self.dimensions)
            .map(|i| {
                let bits = seed.rotate_left((i % 64) as u32) ^ ((i as u64) << 24);
                (bits as f32) / u64::MAX as f32
            })
            .collect()
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbeddingProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, DocsError> {
        Ok(texts.iter().map(|text| self.hash_to_vec(text)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn mock_provider_is_deterministic() {
        let provider = MockEmbeddingProvider::new(8);
        let texts = vec!["hello".to_string(), "world".to_string(), "hello".to_string()];
        let first = provider.embed_batch(&texts).await.unwrap();
        let second = provider.embed_batch(&texts).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first[0], first[2]);
        assert_ne!(first[0], first[1]);
    }

    #[tokio::test]
    async fn empty_input_skips_provider_contact() {
        struct Exploding;

        #[async_trait]
        impl EmbeddingProvider for Exploding {
            fn name(&self) -> &str {
                "exploding"
            }
            fn dimensions(&self) -> usize {
                4
            }
            async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, DocsError> {
                panic!("provider must not be called for empty input");
            }
        }

        let embedder = Embedder::new(Arc::new(Exploding));
        assert!(embedder.embed_stream(Vec::new()).await.unwrap().is_empty());
        assert!(embedder.embed_batch(&[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn stream_preserves_input_order_across_batches() {
        let provider = Arc::new(MockEmbeddingProvider::new(6));
        let embedder = Embedder::new(provider.clone())
            .with_batch_size(3)
            .with_concurrency(4);

        let texts: Vec<String> = (0..20).map(|i| format!("text {i}")).collect();
        let streamed = embedder.embed_stream(texts.clone()).await.unwrap();
        let direct = provider.embed_batch(&texts).await.unwrap();
        assert_eq!(streamed, direct);
    }

    #[tokio::test]
    async fn transient_failures_retry_up_to_three_times() {
        struct FlakyProvider {
            calls: AtomicUsize,
        }

        #[async_trait]
        impl EmbeddingProvider for FlakyProvider {
            fn name(&self) -> &str {
                "flaky"
            }
            fn dimensions(&self) -> usize {
                2
            }
            async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, DocsError> {
                let call = self.calls.fetch_add(1, Ordering::SeqCst);
                if call < 2 {
                    Err(DocsError::FetchTransient("flaky".to_string()))
                } else {
                    Ok(texts.iter().map(|_| vec![1.0, 2.0]).collect())
                }
            }
        }

        let provider = Arc::new(FlakyProvider {
            calls: AtomicUsize::new(0),
        });
        let embedder = Embedder::new(provider.clone());
        let vectors = embedder
            .embed_batch(&["a".to_string()])
            .await
            .unwrap();
        assert_eq!(vectors.len(), 1);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_transient_failures_do_not_retry() {
        struct RejectingProvider {
            calls: AtomicUsize,
        }

        #[async_trait]
        impl EmbeddingProvider for RejectingProvider {
            fn name(&self) -> &str {
                "rejecting"
            }
            fn dimensions(&self) -> usize {
                2
            }
            async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, DocsError> {
                self.calls.fetch_add(1, Ordering::SeqCst);
                Err(DocsError::Embedding("bad request".to_string()))
            }
        }

        let provider = Arc::new(RejectingProvider {
            calls: AtomicUsize::new(0),
        });
        let embedder = Embedder::new(provider.clone());
        assert!(embedder.embed_batch(&["a".to_string()]).await.is_err());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }
}
