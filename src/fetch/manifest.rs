//! `llms.txt`-style link-manifest parsing and fetching.
//!
//! A manifest is a markdown outline of `## Section` headers and
//! `- [Title](URL): description` bullets. Sections whose name contains
//! "optional" mark their entries optional; a lone `# Title` header becomes
//! the default section for entries that appear before any `##` header.

use std::sync::LazyLock;

use regex::Regex;
use reqwest::Client;
use tracing::{debug, warn};
use url::Url;

use crate::types::DocsError;

use super::{DocumentMetadata, FetchedDocument, derive_path};

static ENTRY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*[-*+]\s+\[([^\]]+)\]\(([^)\s]+)\)\s*(?::\s*(.*))?$").expect("entry regex")
});

/// One parsed manifest bullet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ManifestEntry {
    pub title: String,
    pub url: Url,
    pub section: Option<String>,
    pub description: Option<String>,
    pub optional: bool,
}

/// Parses manifest text into entries, resolving scheme-less URLs against
/// `manifest_url` (absolute paths against its origin, relative paths against
/// its full URL).
pub fn parse_manifest(manifest_url: &Url, text: &str) -> Vec<ManifestEntry> {
    let mut entries = Vec::new();
    let mut section: Option<String> = None;
    let mut optional = false;

    for line in text.lines() {
        if let Some(rest) = line.strip_prefix("## ") {
            let name = rest.trim();
            optional = name.to_lowercase().contains("optional");
            section = Some(name.to_string());
            continue;
        }
        if let Some(rest) = line.strip_prefix("# ") {
            // A lone top-level title acts as the default section, but never
            // overrides a section that is already open.
            if section.is_none() {
                section = Some(rest.trim().to_string());
            }
            continue;
        }

        let Some(caps) = ENTRY_RE.captures(line) else {
            continue;
        };
        let title = caps[1].trim().to_string();
        let href = caps[2].trim();
        let description = caps
            .get(3)
            .map(|m| m.as_str().trim().to_string())
            .filter(|d| !d.is_empty());

        let url = match manifest_url.join(href) {
            Ok(url) => url,
            Err(err) => {
                warn!(href, error = %err, "skipping manifest entry with unresolvable URL");
                continue;
            }
        };

        entries.push(ManifestEntry {
            title,
            url,
            section: section.clone(),
            description,
            optional,
        });
    }

    entries
}

/// Fetches every document a manifest links to.
#[derive(Clone)]
pub struct ManifestFetcher {
    client: Client,
}

impl ManifestFetcher {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Downloads the manifest at `manifest_url`, then each linked document.
    ///
    /// Entries in optional sections are skipped unless `include_optional`.
    /// A failing entry URL is retried once with a `.md` suffix; entries that
    /// still fail are logged and dropped, never fatal to the batch.
    pub async fn fetch(
        &self,
        manifest_url: &Url,
        include_optional: bool,
    ) -> Result<Vec<FetchedDocument>, DocsError> {
        let response = self
            .client
            .get(manifest_url.clone())
            .send()
            .await
            .map_err(|err| DocsError::FetchFatal(err.to_string()))?;
        if !response.status().is_success() {
            return Err(DocsError::FetchFatal(format!(
                "manifest fetch returned {} for {manifest_url}",
                response.status()
            )));
        }
        let text = response
            .text()
            .await
            .map_err(|err| DocsError::FetchFatal(err.to_string()))?;

        let entries = parse_manifest(manifest_url, &text);
        debug!(
            manifest = %manifest_url,
            entries = entries.len(),
            "parsed link manifest"
        );

        let mut documents = Vec::new();
        for entry in entries {
            if entry.optional && !include_optional {
                continue;
            }
            match self.fetch_entry(&entry).await {
                Ok(document) => documents.push(document),
                Err(err) => {
                    warn!(url = %entry.url, error = %err, "skipping manifest entry");
                }
            }
        }
        Ok(documents)
    }

    async fn fetch_entry(&self, entry: &ManifestEntry) -> Result<FetchedDocument, DocsError> {
        let (url, content) = match self.get_text(entry.url.clone()).await {
            Ok(content) => (entry.url.clone(), content),
            Err(first_err) => {
                if entry.url.path().ends_with(".md") {
                    return Err(first_err);
                }
                let retry_url = Url::parse(&format!("{}.md", entry.url))
                    .map_err(|err| DocsError::FetchFatal(err.to_string()))?;
                let content = self.get_text(retry_url.clone()).await?;
                (retry_url, content)
            }
        };

        Ok(FetchedDocument {
            path: derive_path(&url),
            url: url.to_string(),
            title: entry.title.clone(),
            content,
            metadata: DocumentMetadata {
                section: entry.section.clone(),
                description: entry.description.clone(),
            },
        })
    }

    async fn get_text(&self, url: Url) -> Result<String, DocsError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|err| DocsError::FetchTransient(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(DocsError::FetchTransient(format!(
                "document fetch returned {status}"
            )));
        }
        response
            .text()
            .await
            .map_err(|err| DocsError::FetchTransient(err.to_string()))
    }
}
