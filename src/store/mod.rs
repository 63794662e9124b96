//! Persistent storage for sources, documents, chunks, and ingestion
//! progress.
//!
//! The only backend is SQLite with the `sqlite-vec` vector extension and an
//! FTS5 mirror of chunk content; see [`sqlite::SqliteStore`]. The types in
//! this module are the rows and query shapes shared with the rest of the
//! engine.

pub mod sqlite;

use serde::{Deserialize, Serialize};

use crate::types::DocsError;

pub use sqlite::SqliteStore;

/// How a source's documents are acquired.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    LinkManifest,
    WebCrawl,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::LinkManifest => "link_manifest",
            SourceKind::WebCrawl => "web_crawl",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, DocsError> {
        match raw {
            "link_manifest" => Ok(SourceKind::LinkManifest),
            "web_crawl" => Ok(SourceKind::WebCrawl),
            other => Err(DocsError::Validation(format!(
                "unknown source kind '{other}'"
            ))),
        }
    }
}

/// Optional per-source settings, stored as a JSON column.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crawl_limit: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub include_optional: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub include_paths: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exclude_paths: Option<Vec<String>>,
}

/// Input shape for creating or updating a source.
#[derive(Clone, Debug)]
pub struct SourceConfig {
    pub name: String,
    pub kind: SourceKind,
    pub base_url: String,
    pub group_name: Option<String>,
    pub description: Option<String>,
    pub options: Option<SourceOptions>,
}

/// A stored source row.
#[derive(Clone, Debug)]
pub struct SourceRecord {
    pub id: i64,
    pub name: String,
    pub kind: SourceKind,
    pub base_url: String,
    pub group_name: Option<String>,
    pub description: Option<String>,
    pub options: SourceOptions,
    pub last_ingested_at: Option<String>,
}

/// Input shape for upserting a document.
#[derive(Clone, Debug)]
pub struct NewDocument {
    pub url: String,
    pub title: String,
    pub path: Option<String>,
    pub content: String,
    /// Lowercase hex SHA-256 of `content`.
    pub content_hash: String,
    pub metadata: Option<serde_json::Value>,
}

/// A stored document row.
#[derive(Clone, Debug)]
pub struct DocumentRecord {
    pub id: i64,
    pub source_id: i64,
    pub url: String,
    pub title: String,
    pub path: Option<String>,
    pub content: String,
    pub content_hash: String,
    pub metadata: Option<serde_json::Value>,
    pub updated_at: String,
}

/// One chunk returned by vector or lexical search.
///
/// `distance` is ascending-is-better in both legs: cosine distance for the
/// vector leg, `|bm25|` for the lexical leg.
#[derive(Clone, Debug)]
pub struct ChunkHit {
    pub chunk_id: i64,
    pub document_id: i64,
    pub url: String,
    pub title: String,
    pub path: Option<String>,
    pub content: String,
    pub distance: f64,
}

/// Filters shared by both search legs.
#[derive(Clone, Debug, Default)]
pub struct SearchFilters {
    /// Restrict to a source by name.
    pub source: Option<String>,
    /// Restrict to documents whose path starts with this prefix.
    pub path_prefix: Option<String>,
    /// Restrict to documents whose metadata section matches exactly.
    pub section: Option<String>,
    pub limit: usize,
}

impl SearchFilters {
    pub fn for_source(source: impl Into<String>, limit: usize) -> Self {
        Self {
            source: Some(source.into()),
            limit,
            ..Self::default()
        }
    }
}

/// Terminal and non-terminal ingestion run states.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProgressStatus {
    InProgress,
    Completed,
    CompletedWithErrors,
}

impl ProgressStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProgressStatus::InProgress => "in_progress",
            ProgressStatus::Completed => "completed",
            ProgressStatus::CompletedWithErrors => "completed_with_errors",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, DocsError> {
        match raw {
            "in_progress" => Ok(ProgressStatus::InProgress),
            "completed" => Ok(ProgressStatus::Completed),
            "completed_with_errors" => Ok(ProgressStatus::CompletedWithErrors),
            other => Err(DocsError::Validation(format!(
                "unknown progress status '{other}'"
            ))),
        }
    }
}

/// A stored ingestion-progress row.
#[derive(Clone, Debug)]
pub struct ProgressRecord {
    pub id: i64,
    pub source_id: i64,
    pub started_at: String,
    pub total: i64,
    pub processed: i64,
    pub skipped: i64,
    pub failed: i64,
    pub status: ProgressStatus,
    pub last_processed_url: Option<String>,
    pub error_message: Option<String>,
}

/// Absolute counter values written by [`SqliteStore::update_progress`].
#[derive(Clone, Debug, Default)]
pub struct ProgressUpdate {
    pub total: i64,
    pub processed: i64,
    pub skipped: i64,
    pub failed: i64,
    pub last_processed_url: Option<String>,
    pub error_message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_kind_round_trips() {
        for kind in [SourceKind::LinkManifest, SourceKind::WebCrawl] {
            assert_eq!(SourceKind::parse(kind.as_str()).unwrap(), kind);
        }
        assert!(SourceKind::parse("rss").is_err());
    }

    #[test]
    fn source_kind_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&SourceKind::LinkManifest).unwrap(),
            "\"link_manifest\""
        );
    }

    #[test]
    fn progress_status_round_trips() {
        for status in [
            ProgressStatus::InProgress,
            ProgressStatus::Completed,
            ProgressStatus::CompletedWithErrors,
        ] {
            assert_eq!(ProgressStatus::parse(status.as_str()).unwrap(), status);
        }
    }

    #[test]
    fn source_options_tolerate_unknown_fields() {
        let parsed: SourceOptions = serde_json::from_str(
            r#"{"crawl_limit": 25, "description": "legacy", "unknown_flag": true}"#,
        )
        .unwrap();
        assert_eq!(parsed.crawl_limit, Some(25));
    }
}
