//! Tool registry for the external tool-call transport.
//!
//! Tool names are derived from source and group names at startup:
//! `search_<name>_docs` per standalone source, `search_<group>_docs` per
//! group. The transport lists tools via [`ToolRegistry::tools`] and routes
//! calls through [`ToolRegistry::handle`], which renders results as
//! markdown and never propagates storage errors to the agent.

use std::collections::{BTreeMap, HashSet};

use tracing::error;

use crate::search::{
    DEFAULT_LIMIT, GroupSearchRequest, SearchLimits, SearchRequest, SearchResponse, SearchService,
};
use crate::store::SqliteStore;
use crate::types::DocsError;

/// Human-readable substitute for empty results and for failures.
pub const NO_RESULTS_MESSAGE: &str =
    "No results found for this query. Try rephrasing or using different keywords.";

/// Arguments accepted by every search tool.
#[derive(Clone, Debug)]
pub struct ToolArgs {
    pub query: String,
    pub limit: Option<usize>,
}

/// What a tool searches.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ToolTarget {
    Source(String),
    Group { name: String, members: Vec<String> },
}

#[derive(Clone, Debug)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub target: ToolTarget,
}

/// Snapshot of the store's sources and groups as callable tools.
#[derive(Clone, Debug, Default)]
pub struct ToolRegistry {
    tools: Vec<ToolDefinition>,
}

impl ToolRegistry {
    /// Builds the registry from the current source rows. Sources shadow
    /// groups: a group whose name collides with a source name gets no tool.
    pub async fn from_store(store: &SqliteStore) -> Result<Self, DocsError> {
        let sources = store.list_sources().await?;
        let source_names: HashSet<&str> = sources.iter().map(|s| s.name.as_str()).collect();

        let mut tools = Vec::new();
        for source in &sources {
            if source.group_name.is_some() {
                continue;
            }
            tools.push(ToolDefinition {
                name: tool_name(&source.name),
                description: source
                    .description
                    .clone()
                    .unwrap_or_else(|| format!("Search the {} documentation", source.name)),
                target: ToolTarget::Source(source.name.clone()),
            });
        }

        let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for source in &sources {
            if let Some(group) = &source.group_name {
                groups
                    .entry(group.clone())
                    .or_default()
                    .push(source.name.clone());
            }
        }
        for (group, members) in groups {
            if source_names.contains(group.as_str()) {
                continue;
            }
            tools.push(ToolDefinition {
                name: tool_name(&group),
                description: format!(
                    "Search the {group} documentation ({} sources)",
                    members.len()
                ),
                target: ToolTarget::Group {
                    name: group,
                    members,
                },
            });
        }

        Ok(Self { tools })
    }

    pub fn tools(&self) -> &[ToolDefinition] {
        &self.tools
    }

    pub fn find(&self, name: &str) -> Option<&ToolDefinition> {
        self.tools.iter().find(|tool| tool.name == name)
    }

    /// Dispatches a tool call. Failures are logged and surface to the
    /// caller as the no-results string.
    pub async fn handle(&self, search: &SearchService, name: &str, args: &ToolArgs) -> String {
        let Some(tool) = self.find(name) else {
            error!(tool = name, "unknown tool");
            return NO_RESULTS_MESSAGE.to_string();
        };
        let limit = args.limit.unwrap_or(DEFAULT_LIMIT);
        let limits = SearchLimits::default();

        let result = match &tool.target {
            ToolTarget::Source(source) => {
                let request = SearchRequest::new(&args.query).with_limit(limit);
                search.search(source, &request, &limits).await
            }
            ToolTarget::Group { name, members } => {
                let request =
                    GroupSearchRequest::new(&args.query, members.clone()).with_limit(limit);
                search.search_group(name, &request, &limits).await
            }
        };

        match result {
            Ok(response) => render_markdown(&response),
            Err(err) => {
                error!(tool = name, error = %err, "tool search failed");
                NO_RESULTS_MESSAGE.to_string()
            }
        }
    }
}

/// `search_<sanitized>_docs`: lowercased, non-alphanumerics folded to `_`.
pub fn tool_name(raw: &str) -> String {
    let mut sanitized = String::with_capacity(raw.len());
    let mut last_was_underscore = false;
    for c in raw.to_lowercase().chars() {
        if c.is_ascii_alphanumeric() {
            sanitized.push(c);
            last_was_underscore = false;
        } else if !last_was_underscore {
            sanitized.push('_');
            last_was_underscore = true;
        }
    }
    let sanitized = sanitized.trim_matches('_');
    format!("search_{sanitized}_docs")
}

/// `## {title}\n{url}\n\n{content}` blocks joined by `---` rules.
pub fn render_markdown(response: &SearchResponse) -> String {
    if response.documents.is_empty() {
        return NO_RESULTS_MESSAGE.to_string();
    }
    response
        .documents
        .iter()
        .map(|doc| format!("## {}\n{}\n\n{}", doc.title, doc.url, doc.content))
        .collect::<Vec<_>>()
        .join("\n\n---\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::SearchDocument;

    #[test]
    fn tool_names_are_sanitized() {
        assert_eq!(tool_name("tokio"), "search_tokio_docs");
        assert_eq!(tool_name("Rust Book"), "search_rust_book_docs");
        assert_eq!(tool_name("api--v2.1"), "search_api_v2_1_docs");
        assert_eq!(tool_name("--edge--"), "search_edge_docs");
    }

    #[test]
    fn renders_documents_as_markdown_blocks() {
        let response = SearchResponse {
            documents: vec![
                SearchDocument {
                    title: "Alpha".to_string(),
                    url: "https://d/one".to_string(),
                    content: "first body".to_string(),
                },
                SearchDocument {
                    title: "Beta".to_string(),
                    url: "https://d/two".to_string(),
                    content: "second body".to_string(),
                },
            ],
            total_chars: 21,
            truncated: false,
        };
        assert_eq!(
            render_markdown(&response),
            "## Alpha\nhttps://d/one\n\nfirst body\n\n---\n\n## Beta\nhttps://d/two\n\nsecond body"
        );
    }

    #[test]
    fn empty_response_renders_no_results() {
        assert_eq!(
            render_markdown(&SearchResponse::default()),
            NO_RESULTS_MESSAGE
        );
    }
}
