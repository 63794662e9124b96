//! Seam for the external description/answer-synthesis collaborator.
//!
//! The engine only needs two calls: derive a one-line source description
//! from document titles, and synthesize an answer from retrieved documents.
//! Both are infallible at this seam; implementations backed by a generative
//! model are expected to fall back to the defaults below on failure.

use async_trait::async_trait;

use crate::search::SearchDocument;

/// Default description used when no collaborator (or a failing one) is
/// available.
pub fn fallback_description(name: &str) -> String {
    format!("Documentation for {name}")
}

/// Default answer used when synthesis is unavailable.
pub fn fallback_answer() -> String {
    "Unable to synthesize an answer; see the retrieved documents.".to_string()
}

#[async_trait]
pub trait Summarizer: Send + Sync {
    /// Derives a short source description from its document titles.
    async fn describe(&self, name: &str, base_url: &str, titles: &[String]) -> String;

    /// Synthesizes an answer to `query` from retrieved documents.
    async fn synthesize(&self, query: &str, documents: &[SearchDocument]) -> String;
}

/// No-network implementation returning the fallback strings.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultSummarizer;

#[async_trait]
impl Summarizer for DefaultSummarizer {
    async fn describe(&self, name: &str, _base_url: &str, _titles: &[String]) -> String {
        fallback_description(name)
    }

    async fn synthesize(&self, _query: &str, _documents: &[SearchDocument]) -> String {
        fallback_answer()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn default_summarizer_returns_fallbacks() {
        let summarizer = DefaultSummarizer;
        assert_eq!(
            summarizer.describe("tokio", "https://tokio.rs", &[]).await,
            "Documentation for tokio"
        );
        assert_eq!(summarizer.synthesize("q", &[]).await, fallback_answer());
    }
}
