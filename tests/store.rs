//! Store-level integration tests: schema idempotence, the FTS mirror
//! triggers, chunk invalidation on content change, and group resolution.

use docsmith::store::{
    NewDocument, ProgressStatus, ProgressUpdate, SearchFilters, SourceConfig, SourceKind,
    SqliteStore,
};
use tempfile::tempdir;

const DIMS: usize = 4;

fn source_config(name: &str) -> SourceConfig {
    SourceConfig {
        name: name.to_string(),
        kind: SourceKind::LinkManifest,
        base_url: format!("https://{name}.example.com/llms.txt"),
        group_name: None,
        description: None,
        options: None,
    }
}

fn new_document(url: &str, content: &str) -> NewDocument {
    NewDocument {
        url: url.to_string(),
        title: "Title".to_string(),
        path: Some("title".to_string()),
        content: content.to_string(),
        content_hash: docsmith::ingest::content_hash(content),
        metadata: None,
    }
}

async fn open_store() -> SqliteStore {
    SqliteStore::open(":memory:", DIMS).await.unwrap()
}

async fn fts_count(store: &SqliteStore) -> i64 {
    store
        .connection()
        .call(|conn| {
            let count = conn.query_row("SELECT COUNT(*) FROM chunks_fts", [], |row| row.get(0))?;
            Ok(count)
        })
        .await
        .unwrap()
}

#[tokio::test]
async fn schema_creation_is_idempotent_on_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("docs.db");

    {
        let store = SqliteStore::open(&path, DIMS).await.unwrap();
        store.upsert_source(&source_config("demo")).await.unwrap();
    }
    // Reopening applies the schema and migrations again without damage.
    let store = SqliteStore::open(&path, DIMS).await.unwrap();
    assert!(store.get_source("demo").await.unwrap().is_some());
}

#[tokio::test]
async fn upsert_source_updates_on_name_conflict() {
    let store = open_store().await;
    let first_id = store.upsert_source(&source_config("demo")).await.unwrap();

    let mut updated = source_config("demo");
    updated.description = Some("fresh description".to_string());
    updated.base_url = "https://new.example.com/llms.txt".to_string();
    let second_id = store.upsert_source(&updated).await.unwrap();

    assert_eq!(first_id, second_id);
    let record = store.get_source("demo").await.unwrap().unwrap();
    assert_eq!(record.base_url, "https://new.example.com/llms.txt");
    assert_eq!(record.description.as_deref(), Some("fresh description"));
}

#[tokio::test]
async fn legacy_description_in_options_surfaces_on_read() {
    let store = open_store().await;
    store
        .connection()
        .call(|conn| {
            conn.execute(
                "INSERT INTO sources (name, kind, base_url, options) \
                 VALUES ('legacy', 'link_manifest', 'https://l.example.com', \
                         '{\"crawl_limit\": 10, \"description\": \"from options\"}')",
                [],
            )?;
            Ok(())
        })
        .await
        .unwrap();

    let record = store.get_source("legacy").await.unwrap().unwrap();
    assert_eq!(record.description.as_deref(), Some("from options"));
    assert_eq!(record.options.crawl_limit, Some(10));
}

#[tokio::test]
async fn every_chunk_has_exactly_one_fts_row() {
    let store = open_store().await;
    let source_id = store.upsert_source(&source_config("demo")).await.unwrap();
    let document_id = store
        .upsert_document(source_id, &new_document("https://d/one", "body"))
        .await
        .unwrap();

    let embedding = vec![0.1_f32; DIMS];
    store
        .insert_chunk(document_id, 0, "first chunk text", &embedding, 3)
        .await
        .unwrap();
    store
        .insert_chunk(document_id, 1, "second chunk text", &embedding, 3)
        .await
        .unwrap();
    assert_eq!(fts_count(&store).await, 2);

    // Overwriting a chunk keeps the mirror in sync through the update
    // trigger: the old content is gone, the new one is findable.
    store
        .insert_chunk(document_id, 1, "replacement chunk text", &embedding, 3)
        .await
        .unwrap();
    assert_eq!(fts_count(&store).await, 2);

    let filters = SearchFilters::for_source("demo", 10);
    let old = store.lexical_search("second", &filters).await.unwrap();
    assert!(old.is_empty(), "old content must leave the mirror");
    let new = store.lexical_search("replacement", &filters).await.unwrap();
    assert_eq!(new.len(), 1);
}

#[tokio::test]
async fn document_change_invalidates_all_chunks() {
    let store = open_store().await;
    let source_id = store.upsert_source(&source_config("demo")).await.unwrap();

    let document_id = store
        .upsert_document(source_id, &new_document("https://d/one", "old content"))
        .await
        .unwrap();
    let old_embedding = vec![1.0_f32, 0.0, 0.0, 0.0];
    for index in 0..4 {
        store
            .insert_chunk(
                document_id,
                index,
                &format!("ancient passage {index}"),
                &old_embedding,
                3,
            )
            .await
            .unwrap();
    }

    let new_id = store
        .upsert_document(source_id, &new_document("https://d/one", "new content"))
        .await
        .unwrap();
    assert_eq!(document_id, new_id);
    for index in 0..2 {
        store
            .insert_chunk(
                new_id,
                index,
                &format!("modern passage {index}"),
                &old_embedding,
                3,
            )
            .await
            .unwrap();
    }

    let chunks = store.document_chunks(new_id).await.unwrap();
    assert_eq!(chunks.len(), 2, "exactly the two new chunk rows remain");
    assert_eq!(fts_count(&store).await, 2);

    let filters = SearchFilters::for_source("demo", 10);
    assert!(
        store
            .lexical_search("ancient", &filters)
            .await
            .unwrap()
            .is_empty()
    );
    let vector_hits = store
        .vector_search(&old_embedding, &filters)
        .await
        .unwrap();
    assert_eq!(vector_hits.len(), 2, "only the new chunks are searchable");
    assert!(vector_hits.iter().all(|h| h.content.contains("modern")));
}

#[tokio::test]
async fn vector_search_orders_by_cosine_distance() {
    let store = open_store().await;
    let source_id = store.upsert_source(&source_config("demo")).await.unwrap();

    let close = vec![1.0_f32, 0.0, 0.0, 0.0];
    let near = vec![0.8_f32, 0.6, 0.0, 0.0];
    let far = vec![0.0_f32, 1.0, 0.0, 0.0];
    for (i, (name, embedding)) in [("close", &close), ("near", &near), ("far", &far)]
        .into_iter()
        .enumerate()
    {
        let document_id = store
            .upsert_document(
                source_id,
                &new_document(&format!("https://d/{name}"), name),
            )
            .await
            .unwrap();
        store
            .insert_chunk(document_id, 0, &format!("content {name} {i}"), embedding, 2)
            .await
            .unwrap();
    }

    let filters = SearchFilters::for_source("demo", 10);
    let hits = store.vector_search(&close, &filters).await.unwrap();
    assert_eq!(hits.len(), 3);
    assert!(hits[0].content.contains("close"));
    assert!(hits[1].content.contains("near"));
    assert!(hits[2].content.contains("far"));
    assert!(hits[0].distance <= hits[1].distance);
    assert!(hits[1].distance <= hits[2].distance);
}

#[tokio::test]
async fn search_filters_restrict_by_source() {
    let store = open_store().await;
    let embedding = vec![1.0_f32, 0.0, 0.0, 0.0];
    for name in ["one", "two"] {
        let source_id = store.upsert_source(&source_config(name)).await.unwrap();
        let document_id = store
            .upsert_document(
                source_id,
                &new_document(&format!("https://{name}/doc"), "shared words"),
            )
            .await
            .unwrap();
        store
            .insert_chunk(document_id, 0, "shared words", &embedding, 2)
            .await
            .unwrap();
    }

    let filters = SearchFilters::for_source("one", 10);
    assert_eq!(store.vector_search(&embedding, &filters).await.unwrap().len(), 1);
    assert_eq!(store.lexical_search("shared", &filters).await.unwrap().len(), 1);
}

#[tokio::test]
async fn remove_source_cascades_to_everything_it_owns() {
    let store = open_store().await;
    let source_id = store.upsert_source(&source_config("demo")).await.unwrap();
    let document_id = store
        .upsert_document(source_id, &new_document("https://d/one", "body"))
        .await
        .unwrap();
    store
        .insert_chunk(document_id, 0, "chunk body", &[0.5; DIMS], 2)
        .await
        .unwrap();
    store.create_progress(source_id, 1).await.unwrap();

    assert!(store.remove_source("demo").await.unwrap());
    assert!(store.get_source("demo").await.unwrap().is_none());
    assert_eq!(fts_count(&store).await, 0);
    assert!(
        store
            .get_incomplete_progress(source_id)
            .await
            .unwrap()
            .is_none()
    );
    // Second removal finds nothing.
    assert!(!store.remove_source("demo").await.unwrap());
}

#[tokio::test]
async fn groups_exist_only_unshadowed() {
    let store = open_store().await;

    let mut member = source_config("rust-std");
    member.group_name = Some("rust".to_string());
    store.upsert_source(&member).await.unwrap();

    let mut second = source_config("rust-book");
    second.group_name = Some("rust".to_string());
    store.upsert_source(&second).await.unwrap();

    assert!(store.is_group("rust").await.unwrap());
    assert_eq!(store.sources_by_group("rust").await.unwrap().len(), 2);

    // A source named like the group shadows it.
    store.upsert_source(&source_config("rust")).await.unwrap();
    assert!(!store.is_group("rust").await.unwrap());

    store.remove_source("rust").await.unwrap();
    assert!(store.is_group("rust").await.unwrap());

    assert!(store.remove_group("rust").await.unwrap());
    assert!(!store.is_group("rust").await.unwrap());
    assert!(store.get_source("rust-std").await.unwrap().is_none());
}

#[tokio::test]
async fn progress_lifecycle_and_resume_selection() {
    let store = open_store().await;
    let source_id = store.upsert_source(&source_config("demo")).await.unwrap();

    let first = store.create_progress(source_id, 5).await.unwrap();
    let second = store.create_progress(source_id, 5).await.unwrap();

    // Duplicated in_progress rows are tolerated; the most recent wins.
    let resumed = store
        .get_incomplete_progress(source_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(resumed.id, second.id);

    store
        .update_progress(
            second.id,
            &ProgressUpdate {
                total: 5,
                processed: 3,
                skipped: 1,
                failed: 0,
                last_processed_url: Some("https://d/three".to_string()),
                error_message: None,
            },
        )
        .await
        .unwrap();
    let resumed = store
        .get_incomplete_progress(source_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(resumed.processed, 3);
    assert_eq!(resumed.last_processed_url.as_deref(), Some("https://d/three"));

    store
        .complete_progress(second.id, ProgressStatus::Completed)
        .await
        .unwrap();
    store
        .complete_progress(first.id, ProgressStatus::CompletedWithErrors)
        .await
        .unwrap();
    assert!(
        store
            .get_incomplete_progress(source_id)
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn lexical_search_with_unmatchable_query_returns_nothing() {
    let store = open_store().await;
    let source_id = store.upsert_source(&source_config("demo")).await.unwrap();
    let document_id = store
        .upsert_document(source_id, &new_document("https://d/one", "body"))
        .await
        .unwrap();
    store
        .insert_chunk(document_id, 0, "cats dogs birds", &[0.5; DIMS], 3)
        .await
        .unwrap();

    let filters = SearchFilters::for_source("demo", 10);
    // Only operator characters: prepared as the empty phrase.
    assert!(store.lexical_search("()*", &filters).await.unwrap().is_empty());
    assert!(
        store
            .lexical_search("xyznonexistent", &filters)
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn lexical_search_uses_prefix_expansion() {
    let store = open_store().await;
    let source_id = store.upsert_source(&source_config("demo")).await.unwrap();
    let document_id = store
        .upsert_document(source_id, &new_document("https://d/one", "body"))
        .await
        .unwrap();
    store
        .insert_chunk(document_id, 0, "concurrency primitives", &[0.5; DIMS], 2)
        .await
        .unwrap();

    let filters = SearchFilters::for_source("demo", 10);
    let hits = store.lexical_search("concurr", &filters).await.unwrap();
    assert_eq!(hits.len(), 1, "prefix form must match");
}
