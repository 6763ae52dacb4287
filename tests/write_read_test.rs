mod helpers;

use cairn::embedding::hashing::HashingEmbeddingProvider;
use cairn::embedding::EmbeddingProvider;
use cairn::error::MemoryError;
use cairn::memory::types::{Scope, ScopeRef, SearchMode, SearchRequest, WriteMetadata};

fn request(query: &str, scopes: Vec<ScopeRef>, k: usize) -> SearchRequest {
    SearchRequest {
        query: query.into(),
        scopes,
        k,
        min_score: 0.0,
        mode: SearchMode::Merge,
    }
}

#[tokio::test]
async fn search_after_write_returns_the_entry() {
    let engine = helpers::engine();
    let texts = [
        "The build uses cargo workspaces",
        "Staging deploys run every night at two",
        "Alice owns the billing service",
        "Use rustfmt before every commit",
    ];
    let mut ids = Vec::new();
    for text in texts {
        ids.push(
            engine
                .write(Scope::Project, Some("alpha"), text, WriteMetadata::default())
                .await
                .unwrap(),
        );
    }

    for (text, id) in texts.iter().zip(&ids) {
        let hits = engine
            .search(request(text, vec![ScopeRef::owned(Scope::Project, "alpha")], 5))
            .await
            .unwrap();
        assert!(hits.iter().any(|h| &h.entry.id == id), "{text} not found");
        assert_eq!(&hits[0].entry.id, id, "exact text should rank first");
    }
}

#[tokio::test]
async fn scopes_are_isolated_by_owner() {
    let engine = helpers::engine();
    let mut alpha_ids = Vec::new();
    for i in 0..10 {
        alpha_ids.push(
            engine
                .write(
                    Scope::Project,
                    Some("alpha"),
                    &format!("alpha design decision number {i}"),
                    WriteMetadata::default(),
                )
                .await
                .unwrap(),
        );
    }
    engine
        .write(Scope::Project, Some("beta"), "beta has its own notes", WriteMetadata::default())
        .await
        .unwrap();

    let hits = engine
        .search(request(
            "alpha design decision",
            vec![ScopeRef::owned(Scope::Project, "beta")],
            20,
        ))
        .await
        .unwrap();
    assert!(hits.iter().all(|h| !alpha_ids.contains(&h.entry.id)));
    assert!(hits.iter().all(|h| h.entry.owner_key.as_deref() == Some("beta")));
}

#[tokio::test]
async fn scopes_are_isolated_from_each_other() {
    let engine = helpers::engine();
    engine
        .write(Scope::Agent, Some("planner"), "planner prefers short plans", WriteMetadata::default())
        .await
        .unwrap();

    let hits = engine
        .search(request("planner prefers short plans", vec![ScopeRef::global()], 5))
        .await
        .unwrap();
    assert!(hits.is_empty());
}

#[tokio::test]
async fn empty_corpus_returns_no_results() {
    let engine = helpers::engine();
    let hits = engine
        .search(request("anything", vec![ScopeRef::global()], 5))
        .await
        .unwrap();
    assert!(hits.is_empty());
}

#[tokio::test]
async fn emptied_collection_returns_no_results() {
    let engine = helpers::engine();
    engine
        .write(Scope::Global, None, "soon to be pruned", WriteMetadata::default())
        .await
        .unwrap();
    engine
        .prune(cairn::memory::prune::PrunePlan {
            scope: Scope::Global,
            owner_key: None,
            strategy: Default::default(),
            limit: Some(0),
            dry_run: false,
            trigger: cairn::memory::prune::PruneTrigger::Manual,
        })
        .await
        .unwrap();

    let collections = engine.list_collections().await.unwrap();
    assert_eq!(collections.len(), 1, "collection survives pruning");

    let hits = engine
        .search(request("anything", vec![ScopeRef::global()], 5))
        .await
        .unwrap();
    assert!(hits.is_empty());
}

#[tokio::test]
async fn merged_search_spans_scopes() {
    let engine = helpers::engine();
    let global = engine
        .write(Scope::Global, None, "team style guide lives in the wiki", WriteMetadata::default())
        .await
        .unwrap();
    let thread = engine
        .write(Scope::Thread, Some("t-1"), "the wiki moved last week", WriteMetadata::default())
        .await
        .unwrap();

    let hits = engine
        .search(request(
            "wiki",
            vec![ScopeRef::global(), ScopeRef::owned(Scope::Thread, "t-1")],
            5,
        ))
        .await
        .unwrap();
    let ids: Vec<&str> = hits.iter().map(|h| h.entry.id.as_str()).collect();
    assert!(ids.contains(&global.as_str()));
    assert!(ids.contains(&thread.as_str()));
}

#[tokio::test]
async fn stats_count_entries_per_scope() {
    let engine = helpers::engine();
    for owner in ["a", "b"] {
        for i in 0..3 {
            engine
                .write(Scope::Agent, Some(owner), &format!("{owner} note {i}"), WriteMetadata::default())
                .await
                .unwrap();
        }
    }

    let all = engine.stats(Scope::Agent, None).await.unwrap();
    assert_eq!(all.collections, 2);
    assert_eq!(all.entry_count, 6);
    assert!(all.size_estimate_bytes > 0);

    let one = engine.stats(Scope::Agent, Some("a")).await.unwrap();
    assert_eq!(one.entry_count, 3);

    let none = engine.stats(Scope::Objectives, None).await.unwrap();
    assert_eq!(none.entry_count, 0);
}

#[tokio::test]
async fn metadata_round_trips() {
    let engine = helpers::engine();
    let mut metadata = WriteMetadata {
        importance: Some(0.9),
        tags: vec!["decision".into()],
        extra: Some(serde_json::json!({ "pr": 42 })),
        ..WriteMetadata::default()
    };
    metadata.sources.insert("file".into(), "src/lib.rs".into());
    engine
        .write(Scope::Artifacts, Some("repo"), "the lib root re-exports modules", metadata)
        .await
        .unwrap();

    let hits = engine
        .search(request(
            "lib root re-exports",
            vec![ScopeRef::owned(Scope::Artifacts, "repo")],
            1,
        ))
        .await
        .unwrap();
    let md = &hits[0].entry.metadata;
    assert_eq!(md.importance, 0.9);
    assert_eq!(md.tags, vec!["decision".to_string()]);
    assert_eq!(md.sources["file"], "src/lib.rs");
    assert_eq!(md.extra.as_ref().unwrap()["pr"], 42);
}

#[tokio::test]
async fn importance_out_of_range_is_rejected() {
    let engine = helpers::engine();
    let err = engine
        .write(Scope::Global, None, "too important", helpers::meta(1.5))
        .await
        .unwrap_err();
    assert!(matches!(err, MemoryError::InvalidRequest(_)));
    assert!(engine.list_collections().await.unwrap().is_empty());
}

#[test]
fn embedding_is_deterministic_across_instances() {
    let a = HashingEmbeddingProvider::new(helpers::DIM);
    let b = HashingEmbeddingProvider::new(helpers::DIM);
    for text in ["", "hello", "The quick brown fox", "ünïcödé text 123"] {
        let x = a.embed(text).unwrap();
        let y = b.embed(text).unwrap();
        assert_eq!(x.len(), helpers::DIM);
        for (p, q) in x.iter().zip(&y) {
            assert!((p - q).abs() < 1e-6);
        }
    }
}

#[tokio::test]
async fn changed_dimension_fails_writes_and_degrades_search() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, _) = helpers::engine_on_disk(dir.path(), helpers::test_config());
    let id = engine
        .write(Scope::Global, None, "written with 32 dimensions", WriteMetadata::default())
        .await
        .unwrap();
    drop(engine);

    let mut config = helpers::test_config();
    config.embedding.dimension = 16;
    let (engine, _) = helpers::engine_on_disk(dir.path(), config);

    let err = engine
        .write(Scope::Global, None, "written with 16 dimensions", WriteMetadata::default())
        .await
        .unwrap_err();
    match err {
        MemoryError::SchemaMismatch {
            collection,
            declared,
            actual,
        } => {
            assert_eq!(collection, "global");
            assert_eq!(declared, 32);
            assert_eq!(actual, 16);
        }
        other => panic!("expected SchemaMismatch, got {other:?}"),
    }

    let hits = engine
        .search(request("written with 32 dimensions", vec![ScopeRef::global()], 5))
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].entry.id, id);
    assert!(hits[0].dense_rank.is_none());
    assert_eq!(hits[0].sparse_rank, Some(1));
}
