use std::sync::Arc;

use coldbase::{Coldbase, Error, MemoryStore, Metric, SearchOptions, VectorError, VectorOptions};
use serde_json::json;

fn vectors(metric: Metric, dimension: usize) -> coldbase::VectorCollection {
    let db = Coldbase::new(Arc::new(MemoryStore::new()));
    db.vector_collection("vecs", VectorOptions::new(dimension, metric))
        .unwrap()
}

#[tokio::test]
async fn cosine_search_ranks_by_similarity() {
    let vecs = vectors(Metric::Cosine, 3);
    vecs.put(json!({"id": "a", "vector": [1.0, 0.0, 0.0]})).await.unwrap();
    vecs.put(json!({"id": "b", "vector": [0.0, 1.0, 0.0]})).await.unwrap();
    vecs.put(json!({"id": "c", "vector": [0.9, 0.1, 0.0]})).await.unwrap();

    let hits = vecs
        .search(
            &[1.0, 0.0, 0.0],
            SearchOptions {
                limit: Some(2),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].id, "a");
    assert!((hits[0].score - 1.0).abs() < 1e-5);
    assert_eq!(hits[1].id, "c");
    assert!(hits[1].score > 0.9);
}

#[tokio::test]
async fn euclidean_sorts_ascending_with_upper_bound_threshold() {
    let vecs = vectors(Metric::Euclidean, 2);
    vecs.put(json!({"id": "near", "vector": [0.1, 0.0]})).await.unwrap();
    vecs.put(json!({"id": "mid", "vector": [1.0, 0.0]})).await.unwrap();
    vecs.put(json!({"id": "far", "vector": [5.0, 5.0]})).await.unwrap();

    let hits = vecs
        .search(
            &[0.0, 0.0],
            SearchOptions {
                threshold: Some(2.0),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let ids: Vec<&str> = hits.iter().map(|h| h.id.as_str()).collect();
    assert_eq!(ids, ["near", "mid"]);
    assert!(hits[0].score < hits[1].score);
}

#[tokio::test]
async fn dot_product_threshold_is_a_lower_bound() {
    let vecs = vectors(Metric::DotProduct, 2);
    vecs.put(json!({"id": "big", "vector": [3.0, 0.0]})).await.unwrap();
    vecs.put(json!({"id": "small", "vector": [0.5, 0.0]})).await.unwrap();

    let hits = vecs
        .search(
            &[1.0, 0.0],
            SearchOptions {
                threshold: Some(1.0),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, "big");
}

#[tokio::test]
async fn vectors_are_stripped_unless_requested() {
    let vecs = vectors(Metric::Cosine, 2);
    vecs.put(json!({"id": "a", "vector": [1.0, 0.0], "tag": "kept"}))
        .await
        .unwrap();

    let hits = vecs.search(&[1.0, 0.0], SearchOptions::default()).await.unwrap();
    assert!(hits[0].data.get("vector").is_none());
    assert_eq!(hits[0].data["tag"], "kept");

    let hits = vecs
        .search(
            &[1.0, 0.0],
            SearchOptions {
                include_vector: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(hits[0].data.get("vector").is_some());
}

#[tokio::test]
async fn search_respects_filters_and_deletions() {
    let vecs = vectors(Metric::Cosine, 2);
    vecs.put(json!({"id": "a", "vector": [1.0, 0.0], "kind": "x"})).await.unwrap();
    vecs.put(json!({"id": "b", "vector": [1.0, 0.0], "kind": "y"})).await.unwrap();
    vecs.put(json!({"id": "dead", "vector": [1.0, 0.0], "kind": "x"})).await.unwrap();
    vecs.delete("dead").await.unwrap();

    let hits = vecs
        .search(
            &[1.0, 0.0],
            SearchOptions {
                filter: Some(coldbase::Filter::Matches(
                    json!({"kind": "x"}).as_object().unwrap().clone(),
                )),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, "a");
}

#[tokio::test]
async fn write_validation_precedes_storage() {
    let store = Arc::new(MemoryStore::new());
    let db = Coldbase::new(store.clone());
    let vecs = db
        .vector_collection("vecs", VectorOptions::new(3, Metric::Cosine))
        .unwrap();

    assert!(matches!(
        vecs.put(json!({"id": "a", "vector": [1.0, 0.0]})).await,
        Err(Error::Vector(VectorError::Dimension { expected: 3, got: 2 }))
    ));
    assert!(matches!(
        vecs.put(json!({"id": "a", "novector": true})).await,
        Err(Error::Vector(VectorError::MissingVector))
    ));
    assert_eq!(store.blob_count(), 0);

    assert!(matches!(
        vecs.search(&[1.0, 0.0], SearchOptions::default()).await,
        Err(Error::Vector(VectorError::Dimension { .. }))
    ));
    assert!(matches!(
        vecs.search(&[f32::NAN, 0.0, 0.0], SearchOptions::default()).await,
        Err(Error::Vector(VectorError::NotFinite))
    ));
}

#[tokio::test]
async fn normalization_is_idempotent_through_storage() {
    let vecs = vectors(Metric::Cosine, 2);
    vecs.put(json!({"id": "a", "vector": [3.0, 4.0]})).await.unwrap();

    let stored = vecs.get("a").await.unwrap().unwrap();
    let first: Vec<f64> = stored["vector"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_f64().unwrap())
        .collect();
    let norm: f64 = first.iter().map(|v| v * v).sum::<f64>().sqrt();
    assert!((norm - 1.0).abs() < 1e-5);

    // Re-storing the stored vector changes nothing.
    vecs.put(stored.clone()).await.unwrap();
    let second = vecs.get("a").await.unwrap().unwrap();
    let again: Vec<f64> = second["vector"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_f64().unwrap())
        .collect();
    for (a, b) in first.iter().zip(&again) {
        assert!((a - b).abs() < 1e-5);
    }
}

#[tokio::test]
async fn empty_vector_collection_searches_empty() {
    let vecs = vectors(Metric::Cosine, 2);
    let hits = vecs.search(&[1.0, 0.0], SearchOptions::default()).await.unwrap();
    assert!(hits.is_empty());
}

#[tokio::test]
async fn search_survives_compaction_and_vacuum() {
    let vecs = vectors(Metric::Cosine, 2);
    vecs.put(json!({"id": "a", "vector": [1.0, 0.0]})).await.unwrap();
    vecs.put(json!({"id": "b", "vector": [0.0, 1.0]})).await.unwrap();
    vecs.put(json!({"id": "a", "vector": [0.7, 0.7]})).await.unwrap();

    vecs.documents().compact().await.unwrap();
    vecs.documents().vacuum().await.unwrap();

    let hits = vecs.search(&[1.0, 0.0], SearchOptions::default()).await.unwrap();
    assert_eq!(hits.len(), 2);
    // "a" was replaced by its diagonal version.
    let a = hits.iter().find(|h| h.id == "a").unwrap();
    assert!((a.score - std::f32::consts::FRAC_1_SQRT_2).abs() < 1e-3);
}
