//! Asynchronous web-crawl orchestration.
//!
//! The crawl itself is vendor territory: implementors of [`CrawlClient`]
//! start a job and report [`CrawlSnapshot`]s. This module owns everything
//! around that seam: include/exclude path filters, exclusion of URLs the
//! store already holds, status polling, and turning finished pages into
//! [`FetchedDocument`]s.

use std::sync::Arc;
use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use url::Url;

use crate::cleaner;
use crate::types::DocsError;

use super::{DocumentMetadata, FetchedDocument, derive_relative_path};

/// Minimum wait between status polls.
const MIN_POLL_INTERVAL: Duration = Duration::from_secs(2);

static TITLE_SUFFIX_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\s*[–—|-]\s*(documentation|docs)\s*$").expect("title-suffix regex")
});

/// Parameters for starting a crawl job.
#[derive(Clone, Debug, Serialize)]
pub struct CrawlRequest {
    pub url: String,
    pub limit: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub include_paths: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub exclude_paths: Vec<String>,
}

/// Crawl job state as reported by the vendor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrawlState {
    Scraping,
    Completed,
    Failed,
    Cancelled,
    #[serde(other)]
    Pending,
}

/// One page returned by a finished crawl.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct CrawlPage {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub markdown: Option<String>,
    #[serde(default)]
    pub metadata: CrawlPageMetadata,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct CrawlPageMetadata {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default, rename = "sourceURL")]
    pub source_url: Option<String>,
    #[serde(default, rename = "ogUrl")]
    pub og_url: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

/// A status poll result.
#[derive(Clone, Debug, Deserialize)]
pub struct CrawlSnapshot {
    pub status: CrawlState,
    #[serde(default)]
    pub completed: u64,
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub data: Vec<CrawlPage>,
}

/// Vendor seam: start a crawl job and poll it.
#[async_trait]
pub trait CrawlClient: Send + Sync {
    async fn start(&self, request: &CrawlRequest) -> Result<String, DocsError>;
    async fn status(&self, job_id: &str) -> Result<CrawlSnapshot, DocsError>;
}

/// Source-level crawl options.
#[derive(Clone, Debug)]
pub struct CrawlOptions {
    pub crawl_limit: usize,
    pub include_paths: Vec<String>,
    pub exclude_paths: Vec<String>,
}

impl Default for CrawlOptions {
    fn default() -> Self {
        Self {
            crawl_limit: 100,
            include_paths: Vec::new(),
            exclude_paths: Vec::new(),
        }
    }
}

/// Drives a crawl job to completion and shapes its pages into documents.
#[derive(Clone)]
pub struct CrawlFetcher {
    client: Arc<dyn CrawlClient>,
    poll_interval: Duration,
}

impl CrawlFetcher {
    pub fn new(client: Arc<dyn CrawlClient>) -> Self {
        Self {
            client,
            poll_interval: MIN_POLL_INTERVAL,
        }
    }

    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(MIN_POLL_INTERVAL);
        self
    }

    /// Crawls `base_url`, excluding paths for `cached_urls` the store
    /// already holds, and returns the cleaned pages.
    pub async fn fetch(
        &self,
        base_url: &Url,
        options: &CrawlOptions,
        cached_urls: &[String],
    ) -> Result<Vec<FetchedDocument>, DocsError> {
        let mut exclude_paths = options.exclude_paths.clone();
        exclude_paths.extend(cached_url_patterns(base_url, cached_urls));

        let request = CrawlRequest {
            url: base_url.to_string(),
            limit: options.crawl_limit,
            include_paths: options.include_paths.clone(),
            exclude_paths,
        };

        let job_id = self.client.start(&request).await?;
        info!(job_id = %job_id, url = %base_url, limit = request.limit, "crawl started");

        let mut last_completed = 0;
        let snapshot = loop {
            let snapshot = self.client.status(&job_id).await?;
            if snapshot.completed > last_completed {
                info!(
                    job_id = %job_id,
                    completed = snapshot.completed,
                    total = snapshot.total,
                    "crawl progress"
                );
                last_completed = snapshot.completed;
            }
            match snapshot.status {
                CrawlState::Completed => break snapshot,
                CrawlState::Failed => {
                    return Err(DocsError::FetchFatal(format!(
                        "crawl job {job_id} failed"
                    )));
                }
                CrawlState::Cancelled => {
                    return Err(DocsError::FetchFatal(format!(
                        "crawl job {job_id} was cancelled"
                    )));
                }
                CrawlState::Scraping | CrawlState::Pending => {
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        };

        let mut documents = Vec::with_capacity(snapshot.data.len());
        for page in snapshot.data {
            match page_to_document(page, base_url) {
                Some(document) => documents.push(document),
                None => debug!("skipping crawl page without usable url or markdown"),
            }
        }
        Ok(documents)
    }
}

/// Converts cached URLs on the crawl host into exclude-path patterns so the
/// crawler does not refetch pages the store already holds.
fn cached_url_patterns(base_url: &Url, cached_urls: &[String]) -> Vec<String> {
    cached_urls
        .iter()
        .filter_map(|raw| match Url::parse(raw) {
            Ok(url) if url.host_str() == base_url.host_str() => Some(url.path().to_string()),
            Ok(_) => None,
            Err(err) => {
                warn!(url = raw, error = %err, "ignoring unparsable cached URL");
                None
            }
        })
        .collect()
}

fn page_to_document(page: CrawlPage, base_url: &Url) -> Option<FetchedDocument> {
    let markdown = page.markdown?;
    let raw_url = page
        .metadata
        .source_url
        .or(page.metadata.og_url)
        .or(page.metadata.url)
        .or(page.url)?;
    let url = Url::parse(&raw_url).ok()?;

    let title = page
        .metadata
        .title
        .filter(|t| !t.trim().is_empty())
        .or_else(|| first_heading(&markdown))
        .unwrap_or_else(|| "Untitled".to_string());
    let title = TITLE_SUFFIX_RE.replace(title.trim(), "").into_owned();

    Some(FetchedDocument {
        path: derive_relative_path(&url, base_url),
        url: url.to_string(),
        title,
        content: cleaner::clean(&markdown),
        metadata: DocumentMetadata::default(),
    })
}

/// First `# ` heading that is not cookie-banner residue.
fn first_heading(markdown: &str) -> Option<String> {
    markdown
        .lines()
        .filter_map(|line| line.strip_prefix("# "))
        .map(str::trim)
        .find(|text| !text.is_empty() && !text.to_lowercase().contains("cookie"))
        .map(ToString::to_string)
}
