//! The ingestion pipeline: source → fetch → chunk → embed → store.
//!
//! Documents are processed sequentially and input-ordered; the embedder
//! fans out internally. Per-document failures are counted and skipped,
//! fetcher failures abort the source. Progress rows make interrupted runs
//! resumable; progress tracking itself is best-effort and never blocks
//! ingestion.

use std::sync::Arc;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use url::Url;

use crate::chunker::{self, ChunkOptions};
use crate::embedder::Embedder;
use crate::fetch::{CrawlFetcher, CrawlOptions, FetchedDocument, ManifestFetcher};
use crate::store::{
    NewDocument, ProgressStatus, ProgressUpdate, SourceConfig, SourceKind, SqliteStore,
};
use crate::summarize::Summarizer;
use crate::types::DocsError;

/// Lowercase hex SHA-256 of document content, the identity used for
/// unchanged-document skip detection.
pub fn content_hash(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}

/// Ingestion switches.
#[derive(Clone, Copy, Debug, Default)]
pub struct IngestOptions {
    /// Continue from the most recent `in_progress` row, if any.
    pub resume: bool,
    /// Fetch and report, but write nothing.
    pub dry_run: bool,
}

/// Per-document summary inside a [`DryRunReport`].
#[derive(Clone, Debug)]
pub struct DryRunDocument {
    pub url: String,
    pub title: String,
    pub content_size: usize,
}

/// What a dry run would have ingested.
#[derive(Clone, Debug)]
pub struct DryRunReport {
    pub document_count: usize,
    pub total_content_size: usize,
    pub estimated_total_chunks: usize,
    pub documents: Vec<DryRunDocument>,
}

/// Seam between the pipeline and the concrete fetchers, so tests can feed
/// documents directly.
#[async_trait]
pub trait DocumentFetcher: Send + Sync {
    async fn fetch(
        &self,
        source: &SourceConfig,
        cached_urls: &[String],
    ) -> Result<Vec<FetchedDocument>, DocsError>;
}

/// Default fetcher: dispatches on the source kind.
pub struct SourceRouter {
    manifest: ManifestFetcher,
    crawl: Option<CrawlFetcher>,
}

impl SourceRouter {
    pub fn new(manifest: ManifestFetcher, crawl: Option<CrawlFetcher>) -> Self {
        Self { manifest, crawl }
    }
}

#[async_trait]
impl DocumentFetcher for SourceRouter {
    async fn fetch(
        &self,
        source: &SourceConfig,
        cached_urls: &[String],
    ) -> Result<Vec<FetchedDocument>, DocsError> {
        let base_url = Url::parse(&source.base_url)
            .map_err(|err| DocsError::Validation(format!("invalid base_url: {err}")))?;
        let options = source.options.clone().unwrap_or_default();

        match source.kind {
            SourceKind::LinkManifest => {
                self.manifest
                    .fetch(&base_url, options.include_optional.unwrap_or(false))
                    .await
            }
            SourceKind::WebCrawl => {
                let crawl = self.crawl.as_ref().ok_or_else(|| {
                    DocsError::Configuration("no crawl client configured".to_string())
                })?;
                if options.crawl_limit == Some(0) {
                    return Err(DocsError::Validation(
                        "crawl_limit must be positive".to_string(),
                    ));
                }
                let crawl_options = CrawlOptions {
                    crawl_limit: options.crawl_limit.unwrap_or(100),
                    include_paths: options.include_paths.unwrap_or_default(),
                    exclude_paths: options.exclude_paths.unwrap_or_default(),
                };
                crawl.fetch(&base_url, &crawl_options, cached_urls).await
            }
        }
    }
}

enum DocumentOutcome {
    Processed { chunk_count: usize },
    Skipped,
}

/// Drives one source through fetch → hash-skip → chunk → embed → store.
pub struct IngestPipeline {
    store: SqliteStore,
    embedder: Embedder,
    fetcher: Arc<dyn DocumentFetcher>,
    summarizer: Arc<dyn Summarizer>,
    chunk_options: ChunkOptions,
}

impl IngestPipeline {
    pub fn new(
        store: SqliteStore,
        embedder: Embedder,
        fetcher: Arc<dyn DocumentFetcher>,
        summarizer: Arc<dyn Summarizer>,
    ) -> Self {
        Self {
            store,
            embedder,
            fetcher,
            summarizer,
            chunk_options: ChunkOptions::default(),
        }
    }

    #[must_use]
    pub fn with_chunk_options(mut self, chunk_options: ChunkOptions) -> Self {
        self.chunk_options = chunk_options;
        self
    }

    /// Ingests one source. Returns a report instead of writing anything
    /// when `options.dry_run` is set.
    pub async fn ingest(
        &self,
        source: &SourceConfig,
        options: &IngestOptions,
    ) -> Result<Option<DryRunReport>, DocsError> {
        let existing = self.store.get_source(&source.name).await?;

        // A re-crawl can skip pages whose URLs the store already holds.
        let mut cached_urls = Vec::new();
        if !options.dry_run
            && source.kind == SourceKind::WebCrawl
            && let Some(existing) = &existing
            && existing.kind == SourceKind::WebCrawl
        {
            cached_urls = self.store.document_urls(existing.id).await?;
        }

        let documents = self.fetcher.fetch(source, &cached_urls).await?;

        if options.dry_run {
            return Ok(Some(dry_run_report(&documents)));
        }

        let mut config = source.clone();
        if config.description.is_none() {
            config.description = existing.as_ref().and_then(|e| e.description.clone());
        }
        if config.description.is_none() {
            let titles: Vec<String> = documents.iter().map(|d| d.title.clone()).collect();
            config.description = Some(
                self.summarizer
                    .describe(&config.name, &config.base_url, &titles)
                    .await,
            );
        }
        let source_id = self.store.upsert_source(&config).await?;

        // Progress is best-effort: a failure here degrades resumability,
        // not ingestion.
        let mut tracker = None;
        if options.resume {
            match self.store.get_incomplete_progress(source_id).await {
                Ok(found) => tracker = found,
                Err(err) => warn!(error = %err, "could not read ingestion progress"),
            }
        }
        if tracker.is_none() {
            match self
                .store
                .create_progress(source_id, documents.len() as i64)
                .await
            {
                Ok(created) => tracker = Some(created),
                Err(err) => warn!(error = %err, "progress tracking unavailable"),
            }
        }

        let mut processed = tracker.as_ref().map_or(0, |t| t.processed);
        let mut skipped = tracker.as_ref().map_or(0, |t| t.skipped);
        let mut failed = tracker.as_ref().map_or(0, |t| t.failed);
        let mut last_error = tracker.as_ref().and_then(|t| t.error_message.clone());

        let mut remaining: &[FetchedDocument] = &documents;
        if options.resume
            && let Some(last_url) = tracker.as_ref().and_then(|t| t.last_processed_url.clone())
            && let Some(position) = documents.iter().position(|d| d.url == last_url)
        {
            info!(
                source = %config.name,
                resumed_after = %last_url,
                skipped_prefix = position + 1,
                "resuming ingestion"
            );
            remaining = &documents[position + 1..];
        }

        for document in remaining {
            match self.process_document(source_id, document).await {
                Ok(DocumentOutcome::Processed { chunk_count }) => {
                    processed += 1;
                    debug!(url = %document.url, chunk_count, "document ingested");
                }
                Ok(DocumentOutcome::Skipped) => {
                    skipped += 1;
                    debug!(url = %document.url, "document unchanged, skipped");
                }
                Err(err) => {
                    failed += 1;
                    last_error = Some(err.to_string());
                    warn!(url = %document.url, error = %err, "document ingestion failed");
                }
            }

            if let Some(progress) = &tracker {
                let update = ProgressUpdate {
                    total: documents.len() as i64,
                    processed,
                    skipped,
                    failed,
                    last_processed_url: Some(document.url.clone()),
                    error_message: last_error.clone(),
                };
                if let Err(err) = self.store.update_progress(progress.id, &update).await {
                    warn!(error = %err, "progress update failed");
                }
            }
        }

        self.store.touch_last_ingested(source_id).await?;
        if let Some(progress) = &tracker {
            let status = if failed > 0 {
                ProgressStatus::CompletedWithErrors
            } else {
                ProgressStatus::Completed
            };
            if let Err(err) = self.store.complete_progress(progress.id, status).await {
                warn!(error = %err, "could not complete progress row");
            }
        }

        info!(
            source = %config.name,
            processed,
            skipped,
            failed,
            "ingestion complete"
        );
        Ok(None)
    }

    async fn process_document(
        &self,
        source_id: i64,
        document: &FetchedDocument,
    ) -> Result<DocumentOutcome, DocsError> {
        let hash = content_hash(&document.content);
        let stored = self.store.get_document_hash(source_id, &document.url).await?;
        if stored.as_deref() == Some(hash.as_str()) {
            return Ok(DocumentOutcome::Skipped);
        }

        let chunks = chunker::chunk(&document.content, &self.chunk_options);
        let embeddings = self.embedder.embed_stream(chunks.clone()).await?;
        if embeddings.len() != chunks.len() {
            return Err(DocsError::Document(format!(
                "expected {} embeddings, got {}",
                chunks.len(),
                embeddings.len()
            )));
        }

        let record = NewDocument {
            url: document.url.clone(),
            title: document.title.clone(),
            path: Some(document.path.clone()),
            content: document.content.clone(),
            content_hash: hash,
            metadata: serde_json::to_value(&document.metadata).ok(),
        };
        let document_id = self.store.upsert_document(source_id, &record).await?;

        for (index, (content, embedding)) in chunks.iter().zip(&embeddings).enumerate() {
            let token_count = chunker::count_tokens(content) as i64;
            self.store
                .insert_chunk(document_id, index as i64, content, embedding, token_count)
                .await?;
        }

        Ok(DocumentOutcome::Processed {
            chunk_count: chunks.len(),
        })
    }
}

fn dry_run_report(documents: &[FetchedDocument]) -> DryRunReport {
    DryRunReport {
        document_count: documents.len(),
        total_content_size: documents.iter().map(|d| d.content.len()).sum(),
        estimated_total_chunks: documents
            .iter()
            .map(|d| d.content.len().div_ceil(1000))
            .sum(),
        documents: documents
            .iter()
            .map(|d| DryRunDocument {
                url: d.url.clone(),
                title: d.title.clone(),
                content_size: d.content.len(),
            })
            .collect(),
    }
}
