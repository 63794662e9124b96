//! Query-side search service.
//!
//! A query is embedded once (through the process-wide cache), both store
//! legs run in parallel, and the fused chunk ranking is materialized into a
//! bounded-size document list.

pub mod fusion;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tracing::info;

use crate::cleaner;
use crate::embedder::{Embedder, EmbeddingCache};
use crate::store::{ChunkHit, SearchFilters, SqliteStore};
use crate::types::DocsError;

pub const DEFAULT_LIMIT: usize = 5;
pub const DEFAULT_MAX_TOTAL_CHARS: usize = 50_000;

/// Floor for per-leg fetch size on the per-source path.
const MIN_FETCH_LIMIT: usize = 15;

/// A per-source search request.
#[derive(Clone, Debug)]
pub struct SearchRequest {
    pub query: String,
    pub limit: usize,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            limit: DEFAULT_LIMIT,
        }
    }

    #[must_use]
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }
}

/// A grouped search request across several sources.
#[derive(Clone, Debug)]
pub struct GroupSearchRequest {
    pub query: String,
    pub source_names: Vec<String>,
    pub limit: usize,
}

impl GroupSearchRequest {
    pub fn new(query: impl Into<String>, source_names: Vec<String>) -> Self {
        Self {
            query: query.into(),
            source_names,
            limit: DEFAULT_LIMIT,
        }
    }

    #[must_use]
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }
}

/// Response-size bounds.
#[derive(Clone, Copy, Debug)]
pub struct SearchLimits {
    pub max_total_chars: usize,
}

impl Default for SearchLimits {
    fn default() -> Self {
        Self {
            max_total_chars: DEFAULT_MAX_TOTAL_CHARS,
        }
    }
}

/// One document in a search response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SearchDocument {
    pub title: String,
    pub url: String,
    pub content: String,
}

/// Bounded search response.
#[derive(Clone, Debug, Default)]
pub struct SearchResponse {
    pub documents: Vec<SearchDocument>,
    pub total_chars: usize,
    pub truncated: bool,
}

/// Hybrid search over one source or a group of sources.
#[derive(Clone)]
pub struct SearchService {
    store: SqliteStore,
    embedder: Embedder,
    cache: Arc<EmbeddingCache>,
}

impl SearchService {
    pub fn new(store: SqliteStore, embedder: Embedder, cache: Arc<EmbeddingCache>) -> Self {
        Self {
            store,
            embedder,
            cache,
        }
    }

    /// Searches a single source: parallel vector + lexical legs fused with
    /// reciprocal rank fusion.
    pub async fn search(
        &self,
        source: &str,
        request: &SearchRequest,
        limits: &SearchLimits,
    ) -> Result<SearchResponse, DocsError> {
        let started = Instant::now();
        let normalized = normalize_query(&request.query);
        let (embedding, cache_hit) = self.query_embedding(&normalized).await?;

        let limit = request.limit.max(1);
        let fetch_limit = (limit * 3).max(MIN_FETCH_LIMIT);
        let filters = SearchFilters::for_source(source, fetch_limit);

        let vector_leg = async {
            let leg_started = Instant::now();
            let result = self.store.vector_search(&embedding, &filters).await;
            (result, leg_started.elapsed())
        };
        let lexical_leg = async {
            let leg_started = Instant::now();
            let result = self.store.lexical_search(&normalized, &filters).await;
            (result, leg_started.elapsed())
        };
        let ((vector, vector_elapsed), (lexical, lexical_elapsed)) =
            tokio::join!(vector_leg, lexical_leg);
        let (vector, lexical) = (vector?, lexical?);

        let fused = fusion::fuse(vector, lexical, limit);
        let response = self
            .materialize(fused, limit, limits.max_total_chars)
            .await?;

        info!(
            source,
            query = %request.query,
            cache_hit,
            vector_ms = vector_elapsed.as_millis() as u64,
            lexical_ms = lexical_elapsed.as_millis() as u64,
            total_ms = started.elapsed().as_millis() as u64,
            results = response.documents.len(),
            truncated = response.truncated,
            "search complete"
        );
        Ok(response)
    }

    /// Searches every source of a group in parallel and merges the flat
    /// result set by ascending distance (no cross-source fusion).
    pub async fn search_group(
        &self,
        group: &str,
        request: &GroupSearchRequest,
        limits: &SearchLimits,
    ) -> Result<SearchResponse, DocsError> {
        let started = Instant::now();
        let mut source_names = request.source_names.clone();
        if source_names.is_empty() {
            source_names = self
                .store
                .sources_by_group(group)
                .await?
                .into_iter()
                .map(|source| source.name)
                .collect();
        }
        if source_names.is_empty() {
            return Err(DocsError::NotFound(format!("group '{group}' has no sources")));
        }

        let normalized = normalize_query(&request.query);
        let (embedding, cache_hit) = self.query_embedding(&normalized).await?;

        let limit = request.limit.max(1);
        let per_leg = (limit * 3).div_ceil(source_names.len()) + 2;

        let legs = source_names.iter().map(|name| {
            let filters = SearchFilters::for_source(name.clone(), per_leg);
            let embedding = &embedding;
            let normalized = &normalized;
            async move {
                tokio::join!(
                    self.store.vector_search(embedding, &filters),
                    self.store.lexical_search(normalized, &filters),
                )
            }
        });
        let leg_results = futures_util::future::join_all(legs).await;

        let mut hits: Vec<ChunkHit> = Vec::new();
        for (vector, lexical) in leg_results {
            hits.extend(vector?);
            hits.extend(lexical?);
        }
        hits.sort_by(|a, b| {
            a.distance
                .total_cmp(&b.distance)
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });

        let response = self
            .materialize(hits, limit, limits.max_total_chars)
            .await?;

        info!(
            group,
            query = %request.query,
            sources = source_names.len(),
            cache_hit,
            total_ms = started.elapsed().as_millis() as u64,
            results = response.documents.len(),
            truncated = response.truncated,
            "group search complete"
        );
        Ok(response)
    }

    /// Cache-then-embed for the normalized query. Returns the vector and
    /// whether it was a cache hit.
    async fn query_embedding(&self, normalized: &str) -> Result<(Vec<f32>, bool), DocsError> {
        if let Some(embedding) = self.cache.get(normalized) {
            return Ok((embedding, true));
        }
        let embedding = self.embedder.embed_one(normalized).await?;
        self.cache.set(normalized, embedding.clone());
        Ok((embedding, false))
    }

    /// Turns a chunk ranking into at most `limit` distinct documents,
    /// cleaned and admitted against a running character budget.
    async fn materialize(
        &self,
        hits: Vec<ChunkHit>,
        limit: usize,
        max_total_chars: usize,
    ) -> Result<SearchResponse, DocsError> {
        let mut document_ids: Vec<i64> = Vec::new();
        for hit in &hits {
            if !document_ids.contains(&hit.document_id) {
                document_ids.push(hit.document_id);
                if document_ids.len() == limit {
                    break;
                }
            }
        }

        let records = self.store.get_documents_by_ids(&document_ids).await?;
        let mut by_id: HashMap<i64, _> = records
            .into_iter()
            .map(|record| (record.id, record))
            .collect();

        let mut response = SearchResponse::default();
        for document_id in document_ids {
            let Some(record) = by_id.remove(&document_id) else {
                continue;
            };
            let content = cleaner::clean(&record.content);
            let remaining = max_total_chars - response.total_chars;
            if content.len() > remaining {
                response.truncated = true;
                let budget = remaining.saturating_sub(cleaner::TRUNCATION_MARKER.len());
                if budget > 0 {
                    let cut = cleaner::truncate(&content, budget);
                    response.total_chars += cut.len();
                    response.documents.push(SearchDocument {
                        title: record.title,
                        url: record.url,
                        content: cut,
                    });
                }
                break;
            }
            response.total_chars += content.len();
            response.documents.push(SearchDocument {
                title: record.title,
                url: record.url,
                content,
            });
        }
        Ok(response)
    }
}

fn normalize_query(query: &str) -> String {
    query.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_normalization_lowercases_and_trims() {
        assert_eq!(normalize_query("  Async Rust  "), "async rust");
    }

    #[test]
    fn default_limits() {
        assert_eq!(SearchRequest::new("q").limit, 5);
        assert_eq!(SearchLimits::default().max_total_chars, 50_000);
    }
}
