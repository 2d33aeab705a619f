use std::{
    cmp,
    collections::{BTreeMap, BTreeSet, HashMap},
    future::Future,
    time::Duration,
};

use common::{error::AppError, storage::types::person::Person};
use serde::Serialize;
use tracing::{debug, instrument, warn};

use crate::{
    pipeline::{CollectCandidatesStats, RetrievalTuning},
    query::{Query, ScoreDimension},
    store::{CandidateStore, SimilarityHit},
};

pub const FALLBACK_REASON: &str = "recently updated profile";

/// Per-dimension scores, each in [0, 1].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct DimensionScores {
    pub embedding_similarity: f64,
    pub filter_match: f64,
    pub graph_proximity: f64,
    pub affinity: f64,
    pub recency: f64,
    pub completeness: f64,
}

impl DimensionScores {
    pub const fn get(&self, dimension: ScoreDimension) -> f64 {
        match dimension {
            ScoreDimension::EmbeddingSimilarity => self.embedding_similarity,
            ScoreDimension::FilterMatch => self.filter_match,
            ScoreDimension::GraphProximity => self.graph_proximity,
            ScoreDimension::Affinity => self.affinity,
            ScoreDimension::Recency => self.recency,
            ScoreDimension::Completeness => self.completeness,
        }
    }

    pub fn set(&mut self, dimension: ScoreDimension, value: f64) {
        let slot = match dimension {
            ScoreDimension::EmbeddingSimilarity => &mut self.embedding_similarity,
            ScoreDimension::FilterMatch => &mut self.filter_match,
            ScoreDimension::GraphProximity => &mut self.graph_proximity,
            ScoreDimension::Affinity => &mut self.affinity,
            ScoreDimension::Recency => &mut self.recency,
            ScoreDimension::Completeness => &mut self.completeness,
        };
        *slot = value;
    }

    /// Elementwise maximum.
    pub fn merge_max(&mut self, other: &Self) {
        for dimension in ScoreDimension::ALL {
            let merged = self.get(dimension).max(other.get(dimension));
            self.set(dimension, merged);
        }
    }
}

/// One person scored against one query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Candidate {
    pub entity_id: String,
    pub entity: Person,
    pub scores: DimensionScores,
    pub final_score: f64,
    pub match_reasons: BTreeSet<String>,
    pub matched_filter_values: BTreeMap<String, BTreeSet<String>>,
    pub score_breakdown: BTreeMap<String, f64>,
}

impl Candidate {
    pub fn new(entity: Person) -> Self {
        Self {
            entity_id: entity.id.clone(),
            entity,
            scores: DimensionScores::default(),
            final_score: 0.0,
            match_reasons: BTreeSet::new(),
            matched_filter_values: BTreeMap::new(),
            score_breakdown: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_score(mut self, dimension: ScoreDimension, score: f64) -> Self {
        self.scores.set(dimension, clamp_unit(score));
        self
    }

    #[must_use]
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.match_reasons.insert(reason.into());
        self
    }

    pub fn add_reason(&mut self, reason: impl Into<String>) {
        self.match_reasons.insert(reason.into());
    }

    pub fn record_matched_values<I>(&mut self, category: &str, values: I)
    where
        I: IntoIterator<Item = String>,
    {
        let entry = self
            .matched_filter_values
            .entry(category.to_owned())
            .or_default();
        entry.extend(values);
        if entry.is_empty() {
            self.matched_filter_values.remove(category);
        }
    }

    /// Folds another candidate for the same entity into this one.
    pub fn absorb(&mut self, other: Self) {
        self.scores.merge_max(&other.scores);
        self.match_reasons.extend(other.match_reasons);
        for (category, values) in other.matched_filter_values {
            self.matched_filter_values
                .entry(category)
                .or_default()
                .extend(values);
        }
        if prefers_snapshot(&self.entity, &other.entity) {
            self.entity = other.entity;
        }
    }
}

/// Newer snapshot wins; equal timestamps fall back to the larger serialized form.
fn prefers_snapshot(current: &Person, incoming: &Person) -> bool {
    match incoming.updated_at.cmp(&current.updated_at) {
        cmp::Ordering::Greater => true,
        cmp::Ordering::Less => false,
        cmp::Ordering::Equal => snapshot_key(incoming) > snapshot_key(current),
    }
}

fn snapshot_key(person: &Person) -> String {
    serde_json::to_string(person).unwrap_or_default()
}

pub fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(0.0, 1.0)
}

/// Merges `incoming` into `target` keyed by entity id.
///
/// Scores take the per-dimension maximum; reasons and matched values are
/// unioned. The result does not depend on insertion order.
pub fn merge_candidates(target: &mut HashMap<String, Candidate>, incoming: Vec<Candidate>) {
    for candidate in incoming {
        match target.get_mut(&candidate.entity_id) {
            Some(existing) => existing.absorb(candidate),
            None => {
                target.insert(candidate.entity_id.clone(), candidate);
            }
        }
    }
}

pub fn semantic_candidates(hits: Vec<SimilarityHit>) -> Vec<Candidate> {
    hits.into_iter()
        .map(|hit| {
            let score = clamp_unit(f64::from(hit.score));
            Candidate::new(hit.entity)
                .with_score(ScoreDimension::EmbeddingSimilarity, score)
                .with_reason(format!("semantic similarity: {score:.2}"))
        })
        .collect()
}

pub fn structured_candidates(query: &Query, rows: Vec<Person>, fallback_score: f64) -> Vec<Candidate> {
    let filters = query.filters();
    rows.into_iter()
        .map(|person| {
            if filters.is_empty() {
                return Candidate::new(person)
                    .with_score(ScoreDimension::FilterMatch, fallback_score)
                    .with_reason(FALLBACK_REASON);
            }

            let mut candidate = Candidate::new(person).with_score(ScoreDimension::FilterMatch, 1.0);
            for filter in filters {
                if !filter.matches(&candidate.entity) {
                    continue;
                }
                let matched = filter.matched_values(&candidate.entity);
                let reason = if matched.is_empty() {
                    format!("{} constraint satisfied", filter.category())
                } else {
                    let preview: Vec<&str> = matched.iter().take(2).map(String::as_str).collect();
                    format!("{} matches: {}", filter.category(), preview.join(", "))
                };
                candidate.add_reason(reason);
                candidate.record_matched_values(filter.category(), matched);
            }
            candidate
        })
        .collect()
}

/// Output of candidate generation: a deduplicated pool plus per-operation stats.
#[derive(Debug, Default)]
pub struct CandidatePool {
    pub candidates: HashMap<String, Candidate>,
    pub stats: CollectCandidatesStats,
}

/// Fails `fut` with a retrieval error once `timeout` elapses.
pub(crate) async fn bounded<T, F>(operation: &'static str, timeout: Duration, fut: F) -> Result<T, AppError>
where
    F: Future<Output = Result<T, AppError>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(AppError::Retrieval(format!(
            "{operation} timed out after {}ms",
            timeout.as_millis()
        ))),
    }
}

/// Runs semantic and structured retrieval concurrently and merges their output.
///
/// A failed or timed-out operation is logged and contributes nothing.
#[instrument(level = "trace", skip_all)]
pub async fn generate_candidates(
    store: &dyn CandidateStore,
    query: &Query,
    tuning: &RetrievalTuning,
) -> CandidatePool {
    let timeout = Duration::from_millis(tuning.retrieval_timeout_ms);

    let semantic = async {
        match query.embedding() {
            Some(vector) => bounded(
                "similarity_search",
                timeout,
                store.similarity_search(vector, tuning.similarity_top_k, tuning.similarity_threshold),
            )
            .await
            .map(Some),
            None => Ok(None),
        }
    };

    let structured = async {
        let limit = if query.filters().is_empty() {
            tuning.fallback_limit
        } else {
            tuning.structured_limit
        };
        bounded(
            "filtered_search",
            timeout,
            store.filtered_search(query.filters(), limit),
        )
        .await
    };

    let (semantic_result, structured_result) = tokio::join!(semantic, structured);

    let mut stats = CollectCandidatesStats {
        used_fallback: query.filters().is_empty(),
        ..CollectCandidatesStats::default()
    };

    let semantic_candidates = match semantic_result {
        Ok(Some(hits)) => {
            stats.semantic_ran = true;
            semantic_candidates(hits)
        }
        Ok(None) => Vec::new(),
        Err(err) => {
            warn!(error = %err, "Semantic retrieval failed; continuing without it");
            stats.semantic_ran = true;
            stats.semantic_failed = true;
            Vec::new()
        }
    };

    let structured_candidates = match structured_result {
        Ok(rows) => structured_candidates(query, rows, tuning.fallback_filter_score),
        Err(err) => {
            warn!(error = %err, "Structured retrieval failed; continuing without it");
            stats.structured_failed = true;
            Vec::new()
        }
    };

    stats.semantic_candidates = semantic_candidates.len();
    stats.structured_candidates = structured_candidates.len();

    let mut candidates = HashMap::new();
    merge_candidates(&mut candidates, semantic_candidates);
    merge_candidates(&mut candidates, structured_candidates);
    stats.merged_candidates = candidates.len();

    debug!(
        semantic = stats.semantic_candidates,
        structured = stats.structured_candidates,
        merged = stats.merged_candidates,
        fallback = stats.used_fallback,
        "Candidate generation counts"
    );

    CandidatePool { candidates, stats }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::filter::{Filter, FilterField};

    fn person(id: &str, name: &str) -> Person {
        let mut person = Person::new(name);
        person.id = id.to_owned();
        person
    }

    fn candidate(id: &str, embedding: f64, filter: f64, reason: &str) -> Candidate {
        Candidate::new(person(id, id))
            .with_score(ScoreDimension::EmbeddingSimilarity, embedding)
            .with_score(ScoreDimension::FilterMatch, filter)
            .with_reason(reason)
    }

    fn merged(batches: Vec<Vec<Candidate>>) -> HashMap<String, Candidate> {
        let mut pool = HashMap::new();
        for batch in batches {
            merge_candidates(&mut pool, batch);
        }
        pool
    }

    #[test]
    fn merge_is_order_independent() {
        let a = candidate("a", 0.8, 0.0, "semantic similarity: 0.80");
        let b = candidate("b", 0.4, 0.0, "semantic similarity: 0.40");
        let c = candidate("a", 0.0, 1.0, "location matches: nyc");
        let d = candidate("c", 0.0, 1.0, "title matches: pm");

        let forward = merged(vec![vec![a.clone(), b.clone()], vec![c.clone(), d.clone()]]);
        let backward = merged(vec![vec![c, d], vec![a, b]]);

        assert_eq!(forward, backward);
        assert_eq!(forward.len(), 3);

        let merged_a = &forward["a"];
        assert!((merged_a.scores.embedding_similarity - 0.8).abs() < f64::EPSILON);
        assert!((merged_a.scores.filter_match - 1.0).abs() < f64::EPSILON);
        assert_eq!(merged_a.match_reasons.len(), 2);
    }

    #[test]
    fn equal_timestamps_keep_the_same_snapshot_in_any_order() {
        let stale = person("a", "Ada");
        let mut enriched = stale.clone();
        enriched.location = Some("New York".into());

        let mut forward = Candidate::new(stale.clone());
        forward.absorb(Candidate::new(enriched.clone()));
        let mut backward = Candidate::new(enriched);
        backward.absorb(Candidate::new(stale));

        assert_eq!(forward.entity, backward.entity);
    }

    #[test]
    fn merge_is_idempotent() {
        let batch = vec![candidate("a", 0.5, 1.0, "x"), candidate("b", 0.2, 0.0, "y")];
        let once = merged(vec![batch.clone()]);
        let twice = merged(vec![batch.clone(), batch]);
        assert_eq!(once, twice);
    }

    #[test]
    fn structured_reasons_list_first_two_values() {
        let mut dana = person("dana", "Dana");
        dana.location = Some("New York City (NYC)".into());
        let query = Query::builder("people in nyc")
            .filter(Filter::any_of(FilterField::Location, ["new york", "nyc", "manhattan"]).unwrap())
            .build()
            .unwrap();

        let candidates = structured_candidates(&query, vec![dana], 0.5);
        let only = &candidates[0];
        assert!((only.scores.filter_match - 1.0).abs() < f64::EPSILON);
        assert!(only.match_reasons.contains("location matches: new york, nyc"));
        assert_eq!(only.matched_filter_values["location"].len(), 2);
    }

    #[test]
    fn fallback_rows_get_reduced_filter_score() {
        let query = Query::builder("anyone").build().unwrap();
        let candidates = structured_candidates(&query, vec![person("p", "P")], 0.5);
        assert!((candidates[0].scores.filter_match - 0.5).abs() < f64::EPSILON);
        assert!(candidates[0].match_reasons.contains(FALLBACK_REASON));
    }

    struct ScriptedStore {
        semantic: Result<Vec<(String, f32)>, ()>,
        structured: Result<Vec<String>, ()>,
        semantic_delay: Duration,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl CandidateStore for ScriptedStore {
        async fn similarity_search(
            &self,
            _vector: &[f32],
            _top_k: usize,
            _min_score: f32,
        ) -> Result<Vec<SimilarityHit>, AppError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.semantic_delay).await;
            self.semantic
                .clone()
                .map(|hits| {
                    hits.into_iter()
                        .map(|(id, score)| SimilarityHit {
                            entity_id: id.clone(),
                            score,
                            entity: person(&id, &id),
                        })
                        .collect()
                })
                .map_err(|()| AppError::Retrieval("vector index offline".into()))
        }

        async fn filtered_search(
            &self,
            _filters: &[Filter],
            _limit: usize,
        ) -> Result<Vec<Person>, AppError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.structured
                .clone()
                .map(|ids| ids.iter().map(|id| person(id, id)).collect())
                .map_err(|()| AppError::Retrieval("database offline".into()))
        }
    }

    fn query_with_embedding() -> Query {
        Query::builder("pms")
            .embedding(vec![1.0, 0.0])
            .filter(Filter::any_of(FilterField::Title, ["pm"]).unwrap())
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn both_operations_merge_into_one_pool() {
        let store = ScriptedStore {
            semantic: Ok(vec![("a".into(), 0.9), ("b".into(), 0.3)]),
            structured: Ok(vec!["a".into(), "c".into()]),
            semantic_delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        };

        let pool =
            generate_candidates(&store, &query_with_embedding(), &RetrievalTuning::default()).await;

        assert_eq!(pool.candidates.len(), 3);
        assert_eq!(pool.stats.semantic_candidates, 2);
        assert_eq!(pool.stats.structured_candidates, 2);
        assert_eq!(store.calls.load(Ordering::SeqCst), 2);
        let a = &pool.candidates["a"];
        assert!(a.scores.embedding_similarity > 0.89);
        assert!((a.scores.filter_match - 1.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn failures_degrade_to_partial_or_empty_pools() {
        let semantic_down = ScriptedStore {
            semantic: Err(()),
            structured: Ok(vec!["c".into()]),
            semantic_delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        };
        let pool = generate_candidates(
            &semantic_down,
            &query_with_embedding(),
            &RetrievalTuning::default(),
        )
        .await;
        assert_eq!(pool.candidates.len(), 1);
        assert!(pool.stats.semantic_failed);

        let all_down = ScriptedStore {
            semantic: Err(()),
            structured: Err(()),
            semantic_delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        };
        let pool =
            generate_candidates(&all_down, &query_with_embedding(), &RetrievalTuning::default())
                .await;
        assert!(pool.candidates.is_empty());
        assert!(pool.stats.semantic_failed && pool.stats.structured_failed);
    }

    #[tokio::test]
    async fn slow_operation_times_out_and_keeps_the_other() {
        let store = ScriptedStore {
            semantic: Ok(vec![("a".into(), 0.9)]),
            structured: Ok(vec!["c".into()]),
            semantic_delay: Duration::from_millis(500),
            calls: AtomicUsize::new(0),
        };
        let tuning = RetrievalTuning {
            retrieval_timeout_ms: 20,
            ..RetrievalTuning::default()
        };

        let pool = generate_candidates(&store, &query_with_embedding(), &tuning).await;
        assert!(pool.stats.semantic_failed);
        assert_eq!(pool.candidates.keys().collect::<Vec<_>>(), vec!["c"]);
    }

    #[tokio::test]
    async fn missing_embedding_skips_semantic_search() {
        let store = ScriptedStore {
            semantic: Ok(vec![("a".into(), 0.9)]),
            structured: Ok(vec!["c".into()]),
            semantic_delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        };
        let query = Query::builder("anyone").build().unwrap();

        let pool = generate_candidates(&store, &query, &RetrievalTuning::default()).await;
        assert_eq!(store.calls.load(Ordering::SeqCst), 1);
        assert!(!pool.stats.semantic_ran);
        assert!(pool.stats.used_fallback);
        assert!(pool.candidates["c"].match_reasons.contains(FALLBACK_REASON));
    }
}
