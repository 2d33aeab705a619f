use serde::Serialize;
use tracing::debug;

use crate::query::{Query, QueryIntent, RankingHints, RankingWeights, ScoreDimension};

const HINT_STEP: f64 = 0.1;
const HINT_SPLIT: f64 = 0.05;

/// Row of the decision table that produced a weight profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WeightProfile {
    Explicit,
    Investors,
    Alumni,
    FilterHeavy,
    GraphConstrained,
    Default,
}

impl WeightProfile {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Explicit => "explicit",
            Self::Investors => "investors",
            Self::Alumni => "alumni",
            Self::FilterHeavy => "filter_heavy",
            Self::GraphConstrained => "graph_constrained",
            Self::Default => "default",
        }
    }
}

/// Base weights for a query shape. First matching row wins; dimensions a row
/// does not mention keep their default-profile value.
pub fn select_weights(
    intent: QueryIntent,
    filter_count: usize,
    graph_present: bool,
) -> (WeightProfile, RankingWeights) {
    let mut weights = RankingWeights::default();

    let profile = if intent == QueryIntent::FindInvestors {
        weights.filter_match = 0.5;
        weights.embedding_similarity = 0.3;
        weights.affinity = 0.2;
        WeightProfile::Investors
    } else if intent == QueryIntent::FindAlumni {
        weights.affinity = 0.4;
        weights.filter_match = 0.3;
        weights.embedding_similarity = 0.3;
        WeightProfile::Alumni
    } else if filter_count > 3 {
        weights.filter_match = 0.5;
        weights.embedding_similarity = 0.25;
        weights.affinity = 0.15;
        weights.graph_proximity = 0.1;
        WeightProfile::FilterHeavy
    } else if graph_present {
        weights.graph_proximity = 0.3;
        weights.filter_match = 0.35;
        weights.embedding_similarity = 0.25;
        weights.affinity = 0.1;
        WeightProfile::GraphConstrained
    } else {
        weights.embedding_similarity = 0.45;
        weights.filter_match = 0.3;
        weights.affinity = 0.15;
        weights.graph_proximity = 0.1;
        WeightProfile::Default
    };

    (profile, weights)
}

fn nudge(weights: &mut RankingWeights, dimension: ScoreDimension, delta: f64) {
    let value = (weights.get(dimension) + delta).max(0.0);
    weights.set(dimension, value);
}

/// Applies each active hint in turn, never letting a weight drop below zero.
pub fn apply_hints(weights: &mut RankingWeights, hints: &RankingHints, boost_affinity: bool) {
    if hints.prioritize_embedding {
        nudge(weights, ScoreDimension::EmbeddingSimilarity, HINT_STEP);
        nudge(weights, ScoreDimension::FilterMatch, -HINT_STEP);
    }
    if hints.prioritize_filters {
        nudge(weights, ScoreDimension::FilterMatch, HINT_STEP);
        nudge(weights, ScoreDimension::EmbeddingSimilarity, -HINT_STEP);
    }
    if hints.prioritize_affinity || boost_affinity {
        nudge(weights, ScoreDimension::Affinity, HINT_STEP);
        nudge(weights, ScoreDimension::EmbeddingSimilarity, -HINT_SPLIT);
        nudge(weights, ScoreDimension::FilterMatch, -HINT_SPLIT);
    }
    if hints.prioritize_graph {
        nudge(weights, ScoreDimension::GraphProximity, HINT_STEP);
        nudge(weights, ScoreDimension::EmbeddingSimilarity, -HINT_SPLIT);
        nudge(weights, ScoreDimension::FilterMatch, -HINT_SPLIT);
    }
}

/// Computes the final weights for `query` without touching it.
pub fn resolve_weights(query: &Query) -> (WeightProfile, RankingWeights) {
    if query.weights_explicit() {
        return (WeightProfile::Explicit, query.weights().normalized());
    }

    let graph = query.graph_constraint();
    let (profile, mut weights) =
        select_weights(query.intent(), query.filters().len(), graph.is_some());
    let boost_affinity = graph.is_some_and(|constraint| constraint.boost_affinity());
    apply_hints(&mut weights, query.hints(), boost_affinity);
    weights.normalize();
    (profile, weights)
}

/// Rewrites the query's weights once. Returns the profile that was used.
pub fn finalize_query_weights(query: &mut Query) -> WeightProfile {
    let (profile, weights) = resolve_weights(query);
    if query.finalize_weights(weights) {
        debug!(profile = profile.as_str(), ?weights, "Selected ranking weights");
    }
    profile
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        filter::{Filter, FilterField},
        query::GraphConstraint,
    };

    fn assert_close(actual: f64, expected: f64) {
        assert!((actual - expected).abs() < 1e-9, "{actual} != {expected}");
    }

    #[test]
    fn table_rows_take_precedence_in_order() {
        let (profile, weights) = select_weights(QueryIntent::FindInvestors, 10, true);
        assert_eq!(profile, WeightProfile::Investors);
        assert_close(weights.filter_match, 0.5);
        assert_close(weights.embedding_similarity, 0.3);
        assert_close(weights.affinity, 0.2);
        assert_close(weights.graph_proximity, 0.15);
        assert_close(weights.recency, 0.03);
        assert_close(weights.completeness, 0.02);

        let (profile, weights) = select_weights(QueryIntent::FindAlumni, 0, false);
        assert_eq!(profile, WeightProfile::Alumni);
        assert_close(weights.affinity, 0.4);

        let (profile, _) = select_weights(QueryIntent::FindPeople, 4, true);
        assert_eq!(profile, WeightProfile::FilterHeavy);

        let (profile, weights) = select_weights(QueryIntent::FindPeople, 3, true);
        assert_eq!(profile, WeightProfile::GraphConstrained);
        assert_close(weights.graph_proximity, 0.3);

        let (profile, weights) = select_weights(QueryIntent::FindConnections, 1, false);
        assert_eq!(profile, WeightProfile::Default);
        assert_close(weights.embedding_similarity, 0.45);
    }

    #[test]
    fn hints_nudge_and_clamp_at_zero() {
        let mut weights = RankingWeights::ZERO;
        weights.embedding_similarity = 0.5;
        weights.filter_match = 0.05;

        apply_hints(
            &mut weights,
            &RankingHints {
                prioritize_embedding: true,
                ..RankingHints::default()
            },
            false,
        );
        assert_close(weights.embedding_similarity, 0.6);
        assert_close(weights.filter_match, 0.0);

        apply_hints(&mut weights, &RankingHints::default(), true);
        assert_close(weights.affinity, 0.1);
        assert_close(weights.embedding_similarity, 0.55);
        assert_close(weights.filter_match, 0.0);
    }

    #[test]
    fn resolved_weights_are_normalized() {
        let query = Query::builder("alumni investors near me")
            .intent(QueryIntent::FindInvestors)
            .graph_constraint(GraphConstraint::new(2).unwrap().with_boost_affinity(true))
            .hints(RankingHints {
                prioritize_filters: true,
                ..RankingHints::default()
            })
            .build()
            .unwrap();

        let (profile, weights) = resolve_weights(&query);
        assert_eq!(profile, WeightProfile::Investors);
        assert!((weights.sum() - 1.0).abs() < 1e-6);
        assert!(weights.filter_match > weights.embedding_similarity);
    }

    #[test]
    fn explicit_weights_skip_the_table() {
        let mut query = Query::builder("pms")
            .filters((0..5).map(|_| Filter::any_of(FilterField::Title, ["pm"]).unwrap()))
            .weights(RankingWeights::try_new(2.0, 2.0, 0.0, 0.0, 0.0, 0.0).unwrap())
            .build()
            .unwrap();

        let profile = finalize_query_weights(&mut query);
        assert_eq!(profile, WeightProfile::Explicit);
        assert_close(query.weights().embedding_similarity, 0.5);
        assert_close(query.weights().filter_match, 0.5);
    }

    #[test]
    fn finalization_happens_once() {
        let mut query = Query::builder("anyone").build().unwrap();
        finalize_query_weights(&mut query);
        let first = *query.weights();
        finalize_query_weights(&mut query);
        assert_eq!(query.weights(), &first);
        // default row sums to 1.05 before normalization
        assert_close(first.embedding_similarity, 0.45 / 1.05);
    }
}
