mod helpers;

use cairn::memory::registry;
use cairn::memory::types::{Scope, StoredMetadata};
use cairn::memory::vector::{EntryPayload, PayloadFilter, SqliteVectorStore, VectorStore};

fn spike(i: usize) -> Vec<f32> {
    let mut v = vec![0.0; helpers::DIM];
    v[i] = 1.0;
    v
}

#[test]
fn payload_metadata_is_returned_with_the_point() {
    let conn = helpers::test_db();
    let handle = registry::ensure(&conn, Scope::Artifacts, Some("build"), helpers::DIM, 50).unwrap();
    let store = SqliteVectorStore::new(&conn);

    let mut metadata = StoredMetadata::default();
    metadata.tags.push("release".into());
    metadata.sources.insert("pipeline".into(), "nightly".into());
    store
        .upsert(
            &handle,
            "artifact-1",
            &spike(2),
            &EntryPayload {
                text: "release bundle checksum",
                scope: handle.scope,
                owner_key: handle.owner_key.as_deref(),
                importance: 0.7,
                created_at: "2024-05-01T12:00:00.000000Z",
                metadata: &metadata,
            },
        )
        .unwrap();

    let hits = store
        .query(&handle, &spike(2), 1, &PayloadFilter::for_collection(&handle), true)
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].payload.metadata.tags, vec!["release".to_string()]);
    assert_eq!(
        hits[0].payload.metadata.sources.get("pipeline").map(String::as_str),
        Some("nightly")
    );
    assert_eq!(hits[0].vector.as_deref(), Some(spike(2).as_slice()));
}
