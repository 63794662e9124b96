//! Document acquisition: link-manifest fetching and web-crawl orchestration.
//!
//! Both fetchers emit the same [`FetchedDocument`] shape so the ingestion
//! pipeline stays agnostic of where content came from.

pub mod crawl;
pub mod manifest;

use serde::{Deserialize, Serialize};
use url::Url;

pub use crawl::{
    CrawlClient, CrawlFetcher, CrawlOptions, CrawlPage, CrawlPageMetadata, CrawlRequest,
    CrawlSnapshot, CrawlState,
};
pub use manifest::{ManifestEntry, ManifestFetcher, parse_manifest};

/// Per-document metadata captured at fetch time.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A document ready for ingestion.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FetchedDocument {
    pub url: String,
    pub title: String,
    pub content: String,
    pub path: String,
    pub metadata: DocumentMetadata,
}

/// Derives the stored `path` for a URL: the URL path with the leading `/`
/// and a trailing `.md` stripped; the empty path maps to `"index"`.
pub fn derive_path(url: &Url) -> String {
    normalize_path(url.path())
}

/// Crawl variant of [`derive_path`]: pages under the crawl base are stored
/// relative to it, pages on other hosts keep their full pathname.
pub fn derive_relative_path(url: &Url, base: &Url) -> String {
    if url.host_str() == base.host_str() {
        let base_path = base.path().trim_end_matches('/');
        if !base_path.is_empty() {
            if let Some(rest) = url.path().strip_prefix(base_path) {
                return normalize_path(rest);
            }
        }
    }
    normalize_path(url.path())
}

fn normalize_path(raw: &str) -> String {
    let trimmed = raw.trim_start_matches('/').trim_end_matches(".md");
    if trimmed.is_empty() {
        "index".to_string()
    } else {
        trimmed.to_string()
    }
}
