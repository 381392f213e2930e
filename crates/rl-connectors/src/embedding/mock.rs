//! Deterministic embedder for tests.

use crate::mock::{MockBehavior, MockControl};
use crate::traits::{ConnectorError, ConnectorResult, Embedder};
use async_trait::async_trait;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// A mock embedder producing deterministic unit vectors.
///
/// Without topics every text maps to a pseudo-random vector seeded by its
/// hash, so unrelated texts are nearly orthogonal. Registered topics map to
/// fixed axes: any text mentioning a topic (case-insensitively) gets weight on
/// that axis, which lets tests control similarity precisely.
pub struct MockEmbedder {
    dimension: usize,
    model_id: String,
    topics: Vec<String>,
    max_input_chars: Option<usize>,
    control: MockControl,
}

impl MockEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            model_id: "mock-embedder-v1".to_string(),
            topics: Vec::new(),
            max_input_chars: None,
            control: MockControl::default(),
        }
    }

    /// Overrides the reported model id.
    pub fn with_model_id(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = model_id.into();
        self
    }

    /// Registers topic phrases that map onto dedicated axes.
    pub fn with_topics<I, S>(mut self, topics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.topics = topics.into_iter().map(|t| t.into().to_lowercase()).collect();
        self
    }

    /// Rejects inputs longer than `max` characters.
    pub fn with_max_input_chars(mut self, max: usize) -> Self {
        self.max_input_chars = Some(max);
        self
    }

    pub async fn set_behavior(&self, behavior: MockBehavior) {
        self.control.set(behavior).await;
    }

    /// Number of embed calls made so far.
    pub fn call_count(&self) -> u64 {
        self.control.call_count()
    }

    fn generate_embedding(&self, text: &str) -> Vec<f32> {
        let lowered = text.to_lowercase();
        let mut embedding = vec![0.0f32; self.dimension];

        let mut matched = false;
        for (i, topic) in self.topics.iter().enumerate() {
            if lowered.contains(topic.as_str()) {
                embedding[i % self.dimension] += 1.0;
                matched = true;
            }
        }

        if !matched {
            let mut hasher = DefaultHasher::new();
            text.hash(&mut hasher);
            let mut seed = hasher.finish();
            // axes reserved for topics stay zero so hash vectors never align with them
            for value in embedding.iter_mut().skip(self.topics.len()) {
                seed = seed
                    .wrapping_mul(6364136223846793005)
                    .wrapping_add(1442695040888963407);
                *value = ((seed as f64) / (u64::MAX as f64) * 2.0 - 1.0) as f32;
            }
        }

        let magnitude: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for v in &mut embedding {
                *v /= magnitude;
            }
        }
        embedding
    }
}

#[async_trait]
impl Embedder for MockEmbedder {
    async fn embed(&self, text: &str) -> ConnectorResult<Vec<f32>> {
        self.control.check().await?;
        if let Some(max) = self.max_input_chars {
            let len = text.chars().count();
            if len > max {
                return Err(ConnectorError::InvalidRequest(format!(
                    "input of {} chars exceeds limit of {}",
                    len, max
                )));
            }
        }
        Ok(self.generate_embedding(text))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}
