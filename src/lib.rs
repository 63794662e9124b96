//! Documentation search engine: ingest heterogeneous documentation sources
//! into an embedded vector + full-text store and serve hybrid semantic
//! queries.
//!
//! ```text
//! Source config ─┬─► fetch::manifest (llms.txt outline)  ─┐
//!                └─► fetch::crawl    (async crawl job)    ─┤
//!                                                          ▼
//!                              ingest::IngestPipeline ──► chunker ──► embedder
//!                                                          │
//!                                                          ▼
//!                                        store::SqliteStore (sqlite-vec + FTS5)
//!
//! Query ──► embedder::cache ──► search::SearchService ─┬─► vector leg ─┐
//!                                                      └─► lexical leg ─┴─► RRF
//!                                                          │
//!                                                          ▼
//!                                       cleaner ──► bounded document response
//! ```
//!
//! The stdio transport, CLI parsing, and logger formatting are external
//! collaborators; [`tools::ToolRegistry`] is the surface they consume.

pub mod chunker;
pub mod cleaner;
pub mod config;
pub mod embedder;
pub mod fetch;
pub mod ingest;
pub mod search;
pub mod store;
pub mod summarize;
pub mod tools;
pub mod types;

pub use config::EngineConfig;
pub use embedder::{Embedder, EmbeddingCache, EmbeddingProvider, MockEmbeddingProvider};
pub use ingest::{IngestOptions, IngestPipeline};
pub use search::{SearchRequest, SearchResponse, SearchService};
pub use store::SqliteStore;
pub use tools::ToolRegistry;
pub use types::DocsError;
