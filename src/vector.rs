use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::collection::{Collection, Filter};
use crate::config::CollectionOptions;
use crate::error::Result;
use crate::util::clock::now_ms;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum Metric {
    Cosine,
    Euclidean,
    DotProduct,
}

impl Metric {
    /// Euclidean is a distance: smaller is better, thresholds are
    /// upper bounds. The similarity metrics are the opposite.
    fn ascending(&self) -> bool {
        matches!(self, Metric::Euclidean)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum VectorError {
    #[error("vector has {got} dimensions, collection is declared with {expected}")]
    Dimension { expected: usize, got: usize },
    #[error("vector contains a non-finite component")]
    NotFinite,
    #[error("document must carry a numeric \"vector\" array")]
    MissingVector,
}

#[derive(Clone, Debug)]
pub struct VectorOptions {
    pub dimension: usize,
    pub metric: Metric,
    /// L2-normalize stored and query vectors. Defaults to true iff the
    /// metric is cosine.
    pub normalize: Option<bool>,
    pub collection: CollectionOptions,
}

impl VectorOptions {
    pub fn new(dimension: usize, metric: Metric) -> Self {
        Self {
            dimension,
            metric,
            normalize: None,
            collection: CollectionOptions::default(),
        }
    }
}

#[derive(Clone, Default)]
pub struct SearchOptions {
    pub limit: Option<usize>,
    pub threshold: Option<f32>,
    pub filter: Option<Filter>,
    /// Keep the `vector` field in returned documents. Off by default;
    /// vectors dominate payload size and callers rarely want them back.
    pub include_vector: bool,
}

#[derive(Clone, Debug, Serialize)]
pub struct SearchHit {
    pub id: String,
    pub score: f32,
    pub data: Value,
}

/// A collection whose documents carry a fixed-dimension `vector` field,
/// scored exactly (O(n·d)) on the read path. Callers cut `n` with
/// `filter` where possible; this layer never builds an ANN structure.
#[derive(Clone)]
pub struct VectorCollection {
    documents: Collection,
    dimension: usize,
    metric: Metric,
    normalize: bool,
}

impl VectorCollection {
    pub(crate) fn new(documents: Collection, options: &VectorOptions) -> Self {
        Self {
            documents,
            dimension: options.dimension,
            metric: options.metric,
            normalize: options
                .normalize
                .unwrap_or(options.metric == Metric::Cosine),
        }
    }

    pub fn name(&self) -> &str {
        self.documents.name()
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn metric(&self) -> Metric {
        self.metric
    }

    /// The underlying document collection: get/find/count/batch and
    /// maintenance all behave as for any other collection.
    pub fn documents(&self) -> &Collection {
        &self.documents
    }

    /// Validates the `vector` field before anything touches storage,
    /// normalizing it in place when enabled.
    pub async fn put(&self, mut data: Value) -> Result<()> {
        let mut vector = extract_vector(&data, self.dimension)?;
        if self.normalize {
            l2_normalize(&mut vector);
            store_vector(&mut data, &vector);
        }
        self.documents.put(data).await
    }

    pub async fn delete(&self, id: impl Into<String>) -> Result<()> {
        self.documents.delete(id).await
    }

    pub async fn get(&self, id: &str) -> Result<Option<Value>> {
        self.documents.get(id).await
    }

    pub async fn search(&self, query: &[f32], options: SearchOptions) -> Result<Vec<SearchHit>> {
        if query.len() != self.dimension {
            return Err(VectorError::Dimension {
                expected: self.dimension,
                got: query.len(),
            }
            .into());
        }
        if query.iter().any(|v| !v.is_finite()) {
            return Err(VectorError::NotFinite.into());
        }
        let mut query = query.to_vec();
        if self.normalize {
            l2_normalize(&mut query);
        }

        let latest = self.documents.latest_by_id(None).await?;
        let ttl = self.documents.0.options.ttl_field.clone();
        let now = now_ms();

        let mut scored: Vec<SearchHit> = Vec::new();
        for (id, rec) in latest {
            if rec.is_tombstone() || rec.is_expired(ttl.as_deref(), now) {
                continue;
            }
            if let Some(filter) = &options.filter {
                if !filter.matches(&rec.data) {
                    continue;
                }
            }
            // Records without a usable vector are unscorable, not an
            // error: the log may hold documents written before the
            // collection was treated as vectorized.
            let Ok(vector) = extract_vector(&rec.data, self.dimension) else {
                continue;
            };
            let score = score(self.metric, &vector, &query);
            let passes = match options.threshold {
                Some(threshold) if self.metric.ascending() => score <= threshold,
                Some(threshold) => score >= threshold,
                None => true,
            };
            if !passes {
                continue;
            }
            let mut data = rec.data;
            if !options.include_vector {
                if let Some(obj) = data.as_object_mut() {
                    obj.remove("vector");
                }
            }
            scored.push(SearchHit { id, score, data });
        }

        if self.metric.ascending() {
            scored.sort_by(compare_scores_asc);
        } else {
            scored.sort_by(compare_scores_desc);
        }
        if let Some(limit) = options.limit {
            scored.truncate(limit);
        }
        Ok(scored)
    }
}

fn compare_scores_desc(a: &SearchHit, b: &SearchHit) -> Ordering {
    b.score
        .partial_cmp(&a.score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.id.cmp(&b.id))
}

fn compare_scores_asc(a: &SearchHit, b: &SearchHit) -> Ordering {
    a.score
        .partial_cmp(&b.score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.id.cmp(&b.id))
}

fn score(metric: Metric, a: &[f32], b: &[f32]) -> f32 {
    match metric {
        Metric::Cosine => {
            let (mut dot, mut norm_a, mut norm_b) = (0.0f32, 0.0f32, 0.0f32);
            for (x, y) in a.iter().zip(b) {
                dot += x * y;
                norm_a += x * x;
                norm_b += y * y;
            }
            if norm_a == 0.0 || norm_b == 0.0 {
                0.0
            } else {
                dot / (norm_a.sqrt() * norm_b.sqrt())
            }
        }
        Metric::DotProduct => a.iter().zip(b).map(|(x, y)| x * y).sum(),
        Metric::Euclidean => a
            .iter()
            .zip(b)
            .map(|(x, y)| (x - y) * (x - y))
            .sum::<f32>()
            .sqrt(),
    }
}

fn l2_normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

/// Pull and validate the `vector` field: right length, every component
/// finite.
fn extract_vector(data: &Value, dimension: usize) -> std::result::Result<Vec<f32>, VectorError> {
    let Some(values) = data.get("vector").and_then(Value::as_array) else {
        return Err(VectorError::MissingVector);
    };
    if values.len() != dimension {
        return Err(VectorError::Dimension {
            expected: dimension,
            got: values.len(),
        });
    }
    let mut vector = Vec::with_capacity(values.len());
    for value in values {
        let Some(v) = value.as_f64() else {
            return Err(VectorError::MissingVector);
        };
        if !v.is_finite() {
            return Err(VectorError::NotFinite);
        }
        vector.push(v as f32);
    }
    Ok(vector)
}

fn store_vector(data: &mut Value, vector: &[f32]) {
    if let Some(obj) = data.as_object_mut() {
        obj.insert(
            "vector".to_string(),
            Value::Array(
                vector
                    .iter()
                    .map(|v| {
                        serde_json::Number::from_f64(*v as f64)
                            .map(Value::Number)
                            .unwrap_or(Value::Null)
                    })
                    .collect(),
            ),
        );
    }
}
