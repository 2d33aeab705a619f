use serde::{Deserialize, Serialize};

/// Tunable parameters that govern each search stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalTuning {
    /// Maximum hits requested from the similarity search.
    #[serde(default = "default_similarity_top_k")]
    pub similarity_top_k: usize,
    /// Minimum cosine similarity for a semantic hit.
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,
    /// Row cap for filtered search.
    #[serde(default = "default_structured_limit")]
    pub structured_limit: usize,
    /// Row cap for the recency pool used when a query has no filters.
    #[serde(default = "default_fallback_limit")]
    pub fallback_limit: usize,
    /// `filter_match` assigned to recency-pool candidates.
    #[serde(default = "default_fallback_filter_score")]
    pub fallback_filter_score: f64,
    /// Upper bound on each retrieval operation.
    #[serde(default = "default_retrieval_timeout_ms")]
    pub retrieval_timeout_ms: u64,
    /// Decay constant for the recency dimension, in days.
    #[serde(default = "default_recency_tau_days")]
    pub recency_tau_days: f64,
    /// Organization whose affiliates receive the affinity boost. Any affiliation counts when unset.
    #[serde(default)]
    pub affinity_organization: Option<String>,
    /// Concurrent neighbor lookups per traversal level.
    #[serde(default = "default_graph_fetch_concurrency")]
    pub graph_fetch_concurrency: usize,
}

impl Default for RetrievalTuning {
    fn default() -> Self {
        Self {
            similarity_top_k: default_similarity_top_k(),
            similarity_threshold: default_similarity_threshold(),
            structured_limit: default_structured_limit(),
            fallback_limit: default_fallback_limit(),
            fallback_filter_score: default_fallback_filter_score(),
            retrieval_timeout_ms: default_retrieval_timeout_ms(),
            recency_tau_days: default_recency_tau_days(),
            affinity_organization: None,
            graph_fetch_concurrency: default_graph_fetch_concurrency(),
        }
    }
}

/// Wrapper containing tuning plus per-request flags.
#[derive(Debug, Clone, Default)]
pub struct RetrievalConfig {
    pub tuning: RetrievalTuning,
    /// Collect per-stage diagnostics into the result.
    pub capture_diagnostics: bool,
}

impl RetrievalConfig {
    pub fn new(tuning: RetrievalTuning) -> Self {
        Self {
            tuning,
            capture_diagnostics: false,
        }
    }

    #[must_use]
    pub fn with_diagnostics(mut self, enabled: bool) -> Self {
        self.capture_diagnostics = enabled;
        self
    }
}

const fn default_similarity_top_k() -> usize {
    1000
}

const fn default_similarity_threshold() -> f32 {
    0.1
}

const fn default_structured_limit() -> usize {
    500
}

const fn default_fallback_limit() -> usize {
    100
}

const fn default_fallback_filter_score() -> f64 {
    0.5
}

const fn default_retrieval_timeout_ms() -> u64 {
    5_000
}

const fn default_recency_tau_days() -> f64 {
    180.0
}

const fn default_graph_fetch_concurrency() -> usize {
    8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_tuning_falls_back_to_defaults() {
        let tuning: RetrievalTuning =
            serde_json::from_str(r#"{"similarity_top_k": 25, "affinity_organization": "Yale"}"#)
                .unwrap();

        assert_eq!(tuning.similarity_top_k, 25);
        assert_eq!(tuning.affinity_organization.as_deref(), Some("Yale"));
        assert_eq!(tuning.structured_limit, 500);
        assert!((tuning.fallback_filter_score - 0.5).abs() < f64::EPSILON);
        assert!((tuning.similarity_threshold - 0.1).abs() < f32::EPSILON);
    }
}
