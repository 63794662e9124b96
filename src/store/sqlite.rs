//! SQLite-backed store with `sqlite-vec` vector search and an FTS5 mirror.
//!
//! Layout:
//! - `sources`, `documents`, `chunks`, `ingestion_progress`: plain tables.
//! - `chunks_vec`: a `vec0` virtual table holding one cosine-metric
//!   embedding per chunk, keyed by the chunk rowid.
//! - `chunks_fts`: an external-content FTS5 table over `chunks(id, content)`
//!   kept in sync by three triggers, so every chunk is lexically searchable
//!   the moment it exists.
//!
//! All access goes through one [`Connection`] handle (a background SQLite
//! thread); clones share it, which keeps the single-writer model intact
//! while readers stay concurrent under WAL.

use std::mem::transmute;
use std::os::raw::c_char;
use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;

use chrono::Utc;
use rusqlite::ffi;
use rusqlite::{OptionalExtension, params, params_from_iter};
use tokio_rusqlite::Connection;
use tracing::debug;

use crate::types::DocsError;

use super::{
    ChunkHit, DocumentRecord, NewDocument, ProgressRecord, ProgressStatus, ProgressUpdate,
    SearchFilters, SourceConfig, SourceKind, SourceOptions, SourceRecord,
};

/// Store handle. Cheap to clone; all clones share one SQLite connection.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Connection,
    dimensions: usize,
}

impl SqliteStore {
    /// Opens (and if needed creates) the database at `path`.
    ///
    /// Accepts plain paths, `file:` URLs, and `:memory:`. Enables WAL
    /// journaling with a 5 s busy timeout, creates the schema idempotently,
    /// and applies additive column migrations so older databases open
    /// cleanly.
    pub async fn open(path: impl AsRef<Path>, dimensions: usize) -> Result<Self, DocsError> {
        register_sqlite_vec()?;

        // Plain paths get their parent directory created; `file:` URLs and
        // `:memory:` are handed to SQLite untouched.
        let path = path.as_ref();
        let raw = path.to_string_lossy();
        if raw != ":memory:"
            && !raw.starts_with("file:")
            && let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }

        let conn = Connection::open(path).await?;
        conn.call(move |conn| {
            conn.busy_timeout(Duration::from_secs(5))?;
            let _mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
            let _version: String = conn.query_row("SELECT vec_version()", [], |row| row.get(0))?;
            create_schema(conn, dimensions)?;
            apply_migrations(conn)?;
            Ok(())
        })
        .await?;
        Ok(Self { conn, dimensions })
    }

    /// Embedding dimensionality the vector table was created with.
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Underlying connection, for queries outside the store's surface.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    // ------------------------------------------------------------------
    // Sources and groups
    // ------------------------------------------------------------------

    /// Creates a source or, on a name conflict, updates every field.
    pub async fn upsert_source(&self, config: &SourceConfig) -> Result<i64, DocsError> {
        let name = config.name.clone();
        let kind = config.kind.as_str();
        let base_url = config.base_url.clone();
        let group_name = config.group_name.clone();
        let description = config.description.clone();
        let options_json = config
            .options
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let id = self
            .conn
            .call(move |conn| {
                let id = conn.query_row(
                    "INSERT INTO sources (name, kind, base_url, group_name, description, options) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6) \
                     ON CONFLICT(name) DO UPDATE SET \
                         kind = excluded.kind, \
                         base_url = excluded.base_url, \
                         group_name = excluded.group_name, \
                         description = excluded.description, \
                         options = excluded.options \
                     RETURNING id",
                    params![name, kind, base_url, group_name, description, options_json],
                    |row| row.get(0),
                )?;
                Ok(id)
            })
            .await?;
        Ok(id)
    }

    pub async fn get_source(&self, name: &str) -> Result<Option<SourceRecord>, DocsError> {
        let name = name.to_string();
        let record = self
            .conn
            .call(move |conn| {
                let record = conn
                    .query_row(
                        &format!("{SOURCE_SELECT} WHERE name = ?1"),
                        [&name],
                        map_source_row,
                    )
                    .optional()?;
                Ok(record)
            })
            .await?;
        Ok(record)
    }

    pub async fn list_sources(&self) -> Result<Vec<SourceRecord>, DocsError> {
        let records = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(&format!("{SOURCE_SELECT} ORDER BY name"))?;
                let rows = stmt.query_map([], map_source_row)?;
                collect_rows(rows)
            })
            .await?;
        Ok(records)
    }

    /// Deletes a source and everything it owns: chunks (with their vectors
    /// and FTS rows), documents, progress rows, then the source itself.
    /// Returns whether anything was removed.
    pub async fn remove_source(&self, name: &str) -> Result<bool, DocsError> {
        let name = name.to_string();
        let removed = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let existing: Option<i64> = tx
                    .query_row("SELECT id FROM sources WHERE name = ?1", [&name], |row| {
                        row.get(0)
                    })
                    .optional()?;
                let Some(source_id) = existing else {
                    return Ok(false);
                };
                delete_source_rows(&tx, source_id)?;
                tx.commit()?;
                Ok(true)
            })
            .await?;
        Ok(removed)
    }

    /// Stamps the source's last successful ingestion time.
    pub async fn touch_last_ingested(&self, source_id: i64) -> Result<(), DocsError> {
        let now = Utc::now().to_rfc3339();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE sources SET last_ingested_at = ?1 WHERE id = ?2",
                    params![now, source_id],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// A group exists iff at least one source carries the group name and no
    /// source has that exact name. Sources shadow groups.
    pub async fn is_group(&self, name: &str) -> Result<bool, DocsError> {
        let name = name.to_string();
        let result = self
            .conn
            .call(move |conn| {
                let exists: bool = conn.query_row(
                    "SELECT EXISTS(SELECT 1 FROM sources WHERE group_name = ?1) \
                     AND NOT EXISTS(SELECT 1 FROM sources WHERE name = ?1)",
                    [&name],
                    |row| row.get(0),
                )?;
                Ok(exists)
            })
            .await?;
        Ok(result)
    }

    pub async fn sources_by_group(&self, group: &str) -> Result<Vec<SourceRecord>, DocsError> {
        let group = group.to_string();
        let records = self
            .conn
            .call(move |conn| {
                let mut stmt =
                    conn.prepare(&format!("{SOURCE_SELECT} WHERE group_name = ?1 ORDER BY name"))?;
                let rows = stmt.query_map([&group], map_source_row)?;
                collect_rows(rows)
            })
            .await?;
        Ok(records)
    }

    /// Removes every source in the group (and all their data). Returns
    /// whether anything was removed.
    pub async fn remove_group(&self, group: &str) -> Result<bool, DocsError> {
        let group = group.to_string();
        let removed = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let ids: Vec<i64> = {
                    let mut stmt = tx.prepare("SELECT id FROM sources WHERE group_name = ?1")?;
                    let rows = stmt.query_map([&group], |row| row.get(0))?;
                    rows.collect::<rusqlite::Result<_>>()?
                };
                for source_id in &ids {
                    delete_source_rows(&tx, *source_id)?;
                }
                tx.commit()?;
                Ok(!ids.is_empty())
            })
            .await?;
        Ok(removed)
    }

    // ------------------------------------------------------------------
    // Documents and chunks
    // ------------------------------------------------------------------

    /// Upserts a document row. On conflict over `(source_id, url)` every
    /// field and `updated_at` are replaced, and the document's existing
    /// chunks (vector and FTS rows included) are deleted in the same
    /// transaction so stale embeddings cannot outlive a content change.
    pub async fn upsert_document(
        &self,
        source_id: i64,
        document: &NewDocument,
    ) -> Result<i64, DocsError> {
        let url = document.url.clone();
        let title = document.title.clone();
        let path = document.path.clone();
        let content = document.content.clone();
        let content_hash = document.content_hash.clone();
        let metadata_json = document.metadata.as_ref().map(serde_json::Value::to_string);
        let updated_at = Utc::now().to_rfc3339();

        let id = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let existing: Option<i64> = tx
                    .query_row(
                        "SELECT id FROM documents WHERE source_id = ?1 AND url = ?2",
                        params![source_id, url],
                        |row| row.get(0),
                    )
                    .optional()?;
                if let Some(document_id) = existing {
                    delete_document_chunks(&tx, document_id)?;
                }
                let id = tx.query_row(
                    "INSERT INTO documents (source_id, url, title, path, content, content_hash, metadata, updated_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8) \
                     ON CONFLICT(source_id, url) DO UPDATE SET \
                         title = excluded.title, \
                         path = excluded.path, \
                         content = excluded.content, \
                         content_hash = excluded.content_hash, \
                         metadata = excluded.metadata, \
                         updated_at = excluded.updated_at \
                     RETURNING id",
                    params![source_id, url, title, path, content, content_hash, metadata_json, updated_at],
                    |row| row.get(0),
                )?;
                tx.commit()?;
                Ok(id)
            })
            .await?;
        Ok(id)
    }

    /// Inserts one chunk and its embedding; a `(document_id, chunk_index)`
    /// conflict overwrites both.
    pub async fn insert_chunk(
        &self,
        document_id: i64,
        chunk_index: i64,
        content: &str,
        embedding: &[f32],
        token_count: i64,
    ) -> Result<i64, DocsError> {
        let content = content.to_string();
        let embedding_json = serde_json::to_string(embedding)?;
        let id = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let id: i64 = tx.query_row(
                    "INSERT INTO chunks (document_id, chunk_index, content, token_count) \
                     VALUES (?1, ?2, ?3, ?4) \
                     ON CONFLICT(document_id, chunk_index) DO UPDATE SET \
                         content = excluded.content, \
                         token_count = excluded.token_count \
                     RETURNING id",
                    params![document_id, chunk_index, content, token_count],
                    |row| row.get(0),
                )?;
                tx.execute("DELETE FROM chunks_vec WHERE rowid = ?1", [id])?;
                tx.execute(
                    "INSERT INTO chunks_vec (rowid, embedding) VALUES (?1, vec_f32(?2))",
                    params![id, embedding_json],
                )?;
                tx.commit()?;
                Ok(id)
            })
            .await?;
        Ok(id)
    }

    pub async fn get_document_hash(
        &self,
        source_id: i64,
        url: &str,
    ) -> Result<Option<String>, DocsError> {
        let url = url.to_string();
        let hash = self
            .conn
            .call(move |conn| {
                let hash = conn
                    .query_row(
                        "SELECT content_hash FROM documents WHERE source_id = ?1 AND url = ?2",
                        params![source_id, url],
                        |row| row.get(0),
                    )
                    .optional()?;
                Ok(hash)
            })
            .await?;
        Ok(hash)
    }

    pub async fn document_urls(&self, source_id: i64) -> Result<Vec<String>, DocsError> {
        let urls = self
            .conn
            .call(move |conn| {
                let mut stmt =
                    conn.prepare("SELECT url FROM documents WHERE source_id = ?1 ORDER BY id")?;
                let rows = stmt.query_map([source_id], |row| row.get(0))?;
                collect_rows(rows)
            })
            .await?;
        Ok(urls)
    }

    pub async fn get_documents_by_ids(
        &self,
        ids: &[i64],
    ) -> Result<Vec<DocumentRecord>, DocsError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!(
            "SELECT id, source_id, url, title, path, content, content_hash, metadata, updated_at \
             FROM documents WHERE id IN ({placeholders})"
        );
        let ids = ids.to_vec();
        let records = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map(params_from_iter(ids.iter()), map_document_row)?;
                collect_rows(rows)
            })
            .await?;
        Ok(records)
    }

    pub async fn document_count(&self, source_id: i64) -> Result<i64, DocsError> {
        let count = self
            .conn
            .call(move |conn| {
                let count = conn.query_row(
                    "SELECT COUNT(*) FROM documents WHERE source_id = ?1",
                    [source_id],
                    |row| row.get(0),
                )?;
                Ok(count)
            })
            .await?;
        Ok(count)
    }

    pub async fn chunk_count(&self, source_id: i64) -> Result<i64, DocsError> {
        let count = self
            .conn
            .call(move |conn| {
                let count = conn.query_row(
                    "SELECT COUNT(*) FROM chunks c \
                     JOIN documents d ON d.id = c.document_id \
                     WHERE d.source_id = ?1",
                    [source_id],
                    |row| row.get(0),
                )?;
                Ok(count)
            })
            .await?;
        Ok(count)
    }

    /// `(chunk_index, content)` pairs for one document, index-ordered.
    pub async fn document_chunks(
        &self,
        document_id: i64,
    ) -> Result<Vec<(i64, String)>, DocsError> {
        let chunks = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT chunk_index, content FROM chunks \
                     WHERE document_id = ?1 ORDER BY chunk_index",
                )?;
                let rows = stmt.query_map([document_id], |row| {
                    Ok((row.get(0)?, row.get(1)?))
                })?;
                collect_rows(rows)
            })
            .await?;
        Ok(chunks)
    }

    // ------------------------------------------------------------------
    // Search
    // ------------------------------------------------------------------

    /// Chunks ordered by ascending cosine distance to `embedding`.
    pub async fn vector_search(
        &self,
        embedding: &[f32],
        filters: &SearchFilters,
    ) -> Result<Vec<ChunkHit>, DocsError> {
        let embedding_json = serde_json::to_string(embedding)?;
        let source = filters.source.clone();
        let path_prefix = filters.path_prefix.clone();
        let section = filters.section.clone();
        let limit = filters.limit as i64;

        let hits = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT c.id, c.document_id, d.url, d.title, d.path, c.content, \
                            vec_distance_cosine(v.embedding, vec_f32(?1)) AS distance \
                     FROM chunks c \
                     JOIN chunks_vec v ON v.rowid = c.id \
                     JOIN documents d ON d.id = c.document_id \
                     JOIN sources s ON s.id = d.source_id \
                     WHERE (?2 IS NULL OR s.name = ?2) \
                       AND (?3 IS NULL OR d.path LIKE ?3 || '%') \
                       AND (?4 IS NULL OR json_extract(d.metadata, '$.section') = ?4) \
                     ORDER BY distance ASC \
                     LIMIT ?5",
                )?;
                let rows = stmt.query_map(
                    params![embedding_json, source, path_prefix, section, limit],
                    map_chunk_hit,
                )?;
                collect_rows(rows)
            })
            .await?;
        Ok(hits)
    }

    /// BM25 search over the FTS mirror.
    ///
    /// BM25 scores are negative (more negative is better); the absolute
    /// value is reported so `distance` is ascending-is-better like the
    /// vector leg.
    pub async fn lexical_search(
        &self,
        query: &str,
        filters: &SearchFilters,
    ) -> Result<Vec<ChunkHit>, DocsError> {
        let match_expr = prepare_fts_query(query);
        let source = filters.source.clone();
        let path_prefix = filters.path_prefix.clone();
        let section = filters.section.clone();
        let limit = filters.limit as i64;

        let hits = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT c.id, c.document_id, d.url, d.title, d.path, c.content, \
                            abs(bm25(chunks_fts)) AS distance \
                     FROM chunks_fts \
                     JOIN chunks c ON c.id = chunks_fts.rowid \
                     JOIN documents d ON d.id = c.document_id \
                     JOIN sources s ON s.id = d.source_id \
                     WHERE chunks_fts MATCH ?1 \
                       AND (?2 IS NULL OR s.name = ?2) \
                       AND (?3 IS NULL OR d.path LIKE ?3 || '%') \
                       AND (?4 IS NULL OR json_extract(d.metadata, '$.section') = ?4) \
                     ORDER BY bm25(chunks_fts) ASC \
                     LIMIT ?5",
                )?;
                let rows = stmt.query_map(
                    params![match_expr, source, path_prefix, section, limit],
                    map_chunk_hit,
                )?;
                collect_rows(rows)
            })
            .await?;
        Ok(hits)
    }

    // ------------------------------------------------------------------
    // Ingestion progress
    // ------------------------------------------------------------------

    pub async fn create_progress(
        &self,
        source_id: i64,
        total: i64,
    ) -> Result<ProgressRecord, DocsError> {
        let started_at = Utc::now().to_rfc3339();
        let started_at_for_row = started_at.clone();
        let id = self
            .conn
            .call(move |conn| {
                let id = conn.query_row(
                    "INSERT INTO ingestion_progress (source_id, started_at, total) \
                     VALUES (?1, ?2, ?3) RETURNING id",
                    params![source_id, started_at, total],
                    |row| row.get(0),
                )?;
                Ok(id)
            })
            .await?;
        Ok(ProgressRecord {
            id,
            source_id,
            started_at: started_at_for_row,
            total,
            processed: 0,
            skipped: 0,
            failed: 0,
            status: ProgressStatus::InProgress,
            last_processed_url: None,
            error_message: None,
        })
    }

    /// Most recent `in_progress` row for the source, if any. The schema
    /// permits duplicates; resume always takes the newest.
    pub async fn get_incomplete_progress(
        &self,
        source_id: i64,
    ) -> Result<Option<ProgressRecord>, DocsError> {
        let record = self
            .conn
            .call(move |conn| {
                let record = conn
                    .query_row(
                        "SELECT id, source_id, started_at, total, processed, skipped, failed, \
                                status, last_processed_url, error_message \
                         FROM ingestion_progress \
                         WHERE source_id = ?1 AND status = 'in_progress' \
                         ORDER BY started_at DESC, id DESC LIMIT 1",
                        [source_id],
                        map_progress_row,
                    )
                    .optional()?;
                Ok(record)
            })
            .await?;
        Ok(record)
    }

    pub async fn update_progress(
        &self,
        progress_id: i64,
        update: &ProgressUpdate,
    ) -> Result<(), DocsError> {
        let update = update.clone();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE ingestion_progress SET \
                         total = ?1, processed = ?2, skipped = ?3, failed = ?4, \
                         last_processed_url = ?5, error_message = ?6 \
                     WHERE id = ?7",
                    params![
                        update.total,
                        update.processed,
                        update.skipped,
                        update.failed,
                        update.last_processed_url,
                        update.error_message,
                        progress_id
                    ],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Moves a progress row to one of its terminal states.
    pub async fn complete_progress(
        &self,
        progress_id: i64,
        status: ProgressStatus,
    ) -> Result<(), DocsError> {
        let status = status.as_str();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE ingestion_progress SET status = ?1 WHERE id = ?2",
                    params![status, progress_id],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }
}

const SOURCE_SELECT: &str = "SELECT id, name, kind, base_url, group_name, description, options, \
                             last_ingested_at FROM sources";

/// FTS query preparation: strip FTS5 operator characters, then turn every
/// remaining whitespace-separated term into a quoted prefix match joined by
/// OR. Nothing left means the empty phrase, which matches nothing.
pub fn prepare_fts_query(query: &str) -> String {
    let cleaned: String = query
        .chars()
        .map(|c| {
            if matches!(c, '"' | '(' | ')' | '*' | '-' | '+' | ':' | '^') {
                ' '
            } else {
                c
            }
        })
        .collect();
    let terms: Vec<String> = cleaned
        .split_whitespace()
        .map(|term| format!("\"{term}\"*"))
        .collect();
    if terms.is_empty() {
        "\"\"".to_string()
    } else {
        terms.join(" OR ")
    }
}

fn register_sqlite_vec() -> Result<(), DocsError> {
    static RESULT: OnceLock<Result<(), String>> = OnceLock::new();

    let result = RESULT.get_or_init(|| unsafe {
        type SqliteExtensionInit = unsafe extern "C" fn(
            *mut ffi::sqlite3,
            *mut *mut c_char,
            *const ffi::sqlite3_api_routines,
        ) -> i32;

        let init: unsafe extern "C" fn() = sqlite_vec::sqlite3_vec_init;
        let init_fn: SqliteExtensionInit =
            transmute::<unsafe extern "C" fn(), SqliteExtensionInit>(init);
        let rc = ffi::sqlite3_auto_extension(Some(init_fn));
        if rc != ffi::SQLITE_OK {
            Err(format!("failed to register sqlite-vec extension (code {rc})"))
        } else {
            Ok(())
        }
    });

    result.clone().map_err(DocsError::Storage)
}

fn create_schema(conn: &rusqlite::Connection, dimensions: usize) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS sources (
             id INTEGER PRIMARY KEY AUTOINCREMENT,
             name TEXT NOT NULL UNIQUE,
             kind TEXT NOT NULL,
             base_url TEXT NOT NULL,
             group_name TEXT,
             description TEXT,
             options TEXT,
             created_at TEXT NOT NULL DEFAULT (datetime('now')),
             last_ingested_at TEXT
         );
         CREATE INDEX IF NOT EXISTS idx_sources_group_name ON sources(group_name);

         CREATE TABLE IF NOT EXISTS documents (
             id INTEGER PRIMARY KEY AUTOINCREMENT,
             source_id INTEGER NOT NULL REFERENCES sources(id),
             url TEXT NOT NULL,
             title TEXT NOT NULL,
             path TEXT,
             content TEXT NOT NULL,
             content_hash TEXT NOT NULL,
             metadata TEXT,
             updated_at TEXT NOT NULL DEFAULT (datetime('now')),
             UNIQUE(source_id, url)
         );
         CREATE INDEX IF NOT EXISTS idx_documents_source_id ON documents(source_id);
         CREATE INDEX IF NOT EXISTS idx_documents_path ON documents(path);

         CREATE TABLE IF NOT EXISTS chunks (
             id INTEGER PRIMARY KEY AUTOINCREMENT,
             document_id INTEGER NOT NULL REFERENCES documents(id),
             chunk_index INTEGER NOT NULL,
             content TEXT NOT NULL,
             token_count INTEGER NOT NULL DEFAULT 0,
             UNIQUE(document_id, chunk_index)
         );
         CREATE INDEX IF NOT EXISTS idx_chunks_document_id ON chunks(document_id);

         CREATE TABLE IF NOT EXISTS ingestion_progress (
             id INTEGER PRIMARY KEY AUTOINCREMENT,
             source_id INTEGER NOT NULL REFERENCES sources(id),
             started_at TEXT NOT NULL,
             total INTEGER NOT NULL DEFAULT 0,
             processed INTEGER NOT NULL DEFAULT 0,
             skipped INTEGER NOT NULL DEFAULT 0,
             failed INTEGER NOT NULL DEFAULT 0,
             status TEXT NOT NULL DEFAULT 'in_progress',
             last_processed_url TEXT,
             error_message TEXT,
             UNIQUE(source_id, started_at)
         );
         CREATE INDEX IF NOT EXISTS idx_progress_source_status
             ON ingestion_progress(source_id, status);

         CREATE VIRTUAL TABLE IF NOT EXISTS chunks_fts
             USING fts5(content, content='chunks', content_rowid='id');

         CREATE TRIGGER IF NOT EXISTS chunks_fts_insert AFTER INSERT ON chunks BEGIN
             INSERT INTO chunks_fts(rowid, content) VALUES (new.id, new.content);
         END;
         CREATE TRIGGER IF NOT EXISTS chunks_fts_delete AFTER DELETE ON chunks BEGIN
             INSERT INTO chunks_fts(chunks_fts, rowid, content)
                 VALUES ('delete', old.id, old.content);
         END;
         CREATE TRIGGER IF NOT EXISTS chunks_fts_update AFTER UPDATE ON chunks BEGIN
             INSERT INTO chunks_fts(chunks_fts, rowid, content)
                 VALUES ('delete', old.id, old.content);
             INSERT INTO chunks_fts(rowid, content) VALUES (new.id, new.content);
         END;",
    )?;

    conn.execute_batch(&format!(
        "CREATE VIRTUAL TABLE IF NOT EXISTS chunks_vec \
             USING vec0(embedding float[{dimensions}] distance_metric=cosine);"
    ))?;
    Ok(())
}

/// Additive migrations for databases created by older builds. A column that
/// already exists is not an error.
fn apply_migrations(conn: &rusqlite::Connection) -> rusqlite::Result<()> {
    const COLUMNS: [(&str, &str); 5] = [
        ("sources", "description TEXT"),
        ("sources", "last_ingested_at TEXT"),
        ("documents", "path TEXT"),
        ("documents", "metadata TEXT"),
        ("chunks", "token_count INTEGER NOT NULL DEFAULT 0"),
    ];
    for (table, column) in COLUMNS {
        match conn.execute_batch(&format!("ALTER TABLE {table} ADD COLUMN {column};")) {
            Ok(()) => {}
            Err(err) if err.to_string().contains("duplicate column name") => {
                debug!(table, column, "column already present, skipping migration");
            }
            Err(err) => return Err(err),
        }
    }
    Ok(())
}

fn delete_document_chunks(tx: &rusqlite::Transaction<'_>, document_id: i64) -> rusqlite::Result<()> {
    tx.execute(
        "DELETE FROM chunks_vec WHERE rowid IN (SELECT id FROM chunks WHERE document_id = ?1)",
        [document_id],
    )?;
    // The FTS delete trigger removes the mirror rows.
    tx.execute("DELETE FROM chunks WHERE document_id = ?1", [document_id])?;
    Ok(())
}

/// Chunks, documents, progress rows, then the source, in that order.
fn delete_source_rows(tx: &rusqlite::Transaction<'_>, source_id: i64) -> rusqlite::Result<()> {
    tx.execute(
        "DELETE FROM chunks_vec WHERE rowid IN (
             SELECT c.id FROM chunks c
             JOIN documents d ON d.id = c.document_id
             WHERE d.source_id = ?1
         )",
        [source_id],
    )?;
    tx.execute(
        "DELETE FROM chunks WHERE document_id IN (SELECT id FROM documents WHERE source_id = ?1)",
        [source_id],
    )?;
    tx.execute("DELETE FROM documents WHERE source_id = ?1", [source_id])?;
    tx.execute(
        "DELETE FROM ingestion_progress WHERE source_id = ?1",
        [source_id],
    )?;
    tx.execute("DELETE FROM sources WHERE id = ?1", [source_id])?;
    Ok(())
}

fn collect_rows<T>(
    rows: impl Iterator<Item = rusqlite::Result<T>>,
) -> Result<Vec<T>, tokio_rusqlite::Error> {
    let mut collected = Vec::new();
    for row in rows {
        collected.push(row?);
    }
    Ok(collected)
}

fn map_source_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<SourceRecord> {
    let kind_raw: String = row.get(2)?;
    let kind = SourceKind::parse(&kind_raw).map_err(|err| {
        rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(err))
    })?;

    let mut description: Option<String> = row.get(5)?;
    let options = match row.get::<_, Option<String>>(6)? {
        Some(raw) => {
            let value: serde_json::Value = serde_json::from_str(&raw).unwrap_or_default();
            // Older writers stored the description inside options; lift it
            // into the dedicated column's slot on read.
            if description.is_none() {
                description = value
                    .get("description")
                    .and_then(|v| v.as_str())
                    .map(ToString::to_string);
            }
            serde_json::from_value::<SourceOptions>(value).unwrap_or_default()
        }
        None => SourceOptions::default(),
    };

    Ok(SourceRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        kind,
        base_url: row.get(3)?,
        group_name: row.get(4)?,
        description,
        options,
        last_ingested_at: row.get(7)?,
    })
}

fn map_document_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DocumentRecord> {
    let metadata = row
        .get::<_, Option<String>>(7)?
        .and_then(|raw| serde_json::from_str(&raw).ok());
    Ok(DocumentRecord {
        id: row.get(0)?,
        source_id: row.get(1)?,
        url: row.get(2)?,
        title: row.get(3)?,
        path: row.get(4)?,
        content: row.get(5)?,
        content_hash: row.get(6)?,
        metadata,
        updated_at: row.get(8)?,
    })
}

fn map_chunk_hit(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChunkHit> {
    Ok(ChunkHit {
        chunk_id: row.get(0)?,
        document_id: row.get(1)?,
        url: row.get(2)?,
        title: row.get(3)?,
        path: row.get(4)?,
        content: row.get(5)?,
        distance: row.get(6)?,
    })
}

fn map_progress_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ProgressRecord> {
    let status_raw: String = row.get(7)?;
    let status = ProgressStatus::parse(&status_raw).map_err(|err| {
        rusqlite::Error::FromSqlConversionFailure(7, rusqlite::types::Type::Text, Box::new(err))
    })?;
    Ok(ProgressRecord {
        id: row.get(0)?,
        source_id: row.get(1)?,
        started_at: row.get(2)?,
        total: row.get(3)?,
        processed: row.get(4)?,
        skipped: row.get(5)?,
        failed: row.get(6)?,
        status,
        last_processed_url: row.get(8)?,
        error_message: row.get(9)?,
    })
}
