//! Environment-driven configuration.
//!
//! Every knob is read from the process environment (a `.env` file is loaded
//! opportunistically). The database location follows the XDG convention
//! unless `DATABASE_URL` overrides it with a `file:` URL or `:memory:`.

use std::env;
use std::path::PathBuf;

use crate::types::DocsError;

pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";
pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 1536;

/// Which embedding backend to construct.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EmbeddingProviderKind {
    OpenAi,
    /// Deterministic hash-based vectors, for tests and offline runs.
    Mock,
}

/// Embedding backend settings.
#[derive(Clone, Debug)]
pub struct EmbeddingConfig {
    pub provider: EmbeddingProviderKind,
    pub model: String,
    pub dimensions: usize,
    pub api_key: Option<String>,
    /// Override for the provider endpoint, used by HTTP-mock tests.
    pub api_base: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProviderKind::OpenAi,
            model: DEFAULT_EMBEDDING_MODEL.to_string(),
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
            api_key: None,
            api_base: None,
        }
    }
}

/// Top-level engine configuration.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Path or URL handed to the store (`file:…` and `:memory:` accepted).
    pub database_url: String,
    pub embedding: EmbeddingConfig,
    /// Forwarded to the external logging collaborator.
    pub log_level: Option<String>,
    pub log_format: Option<String>,
}

impl EngineConfig {
    /// Reads configuration from the environment.
    pub fn from_env() -> Result<Self, DocsError> {
        let _ = dotenvy::dotenv();

        let database_url = match env::var("DATABASE_URL") {
            Ok(value) if !value.trim().is_empty() => value,
            _ => default_database_path()?.to_string_lossy().into_owned(),
        };

        let provider = match env::var("EMBEDDING_PROVIDER")
            .unwrap_or_else(|_| "openai".to_string())
            .to_lowercase()
            .as_str()
        {
            "openai" => EmbeddingProviderKind::OpenAi,
            "mock" => EmbeddingProviderKind::Mock,
            other => {
                return Err(DocsError::Configuration(format!(
                    "unsupported EMBEDDING_PROVIDER '{other}'"
                )));
            }
        };

        let model =
            env::var("EMBEDDING_MODEL").unwrap_or_else(|_| DEFAULT_EMBEDDING_MODEL.to_string());

        let dimensions = match env::var("EMBEDDING_DIMENSIONS") {
            Ok(raw) => raw.trim().parse::<usize>().map_err(|_| {
                DocsError::Configuration(format!("invalid EMBEDDING_DIMENSIONS '{raw}'"))
            })?,
            Err(_) => DEFAULT_EMBEDDING_DIMENSIONS,
        };
        if dimensions == 0 {
            return Err(DocsError::Configuration(
                "EMBEDDING_DIMENSIONS must be positive".to_string(),
            ));
        }

        Ok(Self {
            database_url,
            embedding: EmbeddingConfig {
                provider,
                model,
                dimensions,
                api_key: env::var("OPENAI_API_KEY").ok(),
                api_base: env::var("OPENAI_API_BASE").ok(),
            },
            log_level: env::var("LOG_LEVEL").ok(),
            log_format: env::var("LOG_FORMAT").ok(),
        })
    }
}

/// Default on-disk database location.
///
/// `$XDG_DATA_HOME/mcp-docs/docs.db`, falling back to
/// `~/.local/share/mcp-docs/docs.db`.
pub fn default_database_path() -> Result<PathBuf, DocsError> {
    let data_home = match env::var("XDG_DATA_HOME") {
        Ok(value) if !value.trim().is_empty() => PathBuf::from(value),
        _ => {
            let home = env::var("HOME").map_err(|_| {
                DocsError::Configuration("neither XDG_DATA_HOME nor HOME is set".to_string())
            })?;
            PathBuf::from(home).join(".local").join("share")
        }
    };
    Ok(data_home.join("mcp-docs").join("docs.db"))
}
