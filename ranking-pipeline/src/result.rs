use std::collections::BTreeMap;

use common::storage::types::person::Person;
use serde::Serialize;

use crate::{
    candidates::Candidate,
    filter::{Filter, FilterValue},
    parser::ParsedEntities,
    pipeline::{PipelineDiagnostics, PipelineStageTimings},
    policy::WeightProfile,
    query::{Query, QueryIntent, RankingWeights},
    scoring::RankingStrategy,
};

#[derive(Debug, Clone, Serialize)]
pub struct FilterExplanation {
    pub field: String,
    pub operator: String,
    pub values: Vec<FilterValue>,
    pub negated: bool,
    pub purpose: String,
}

impl From<&Filter> for FilterExplanation {
    fn from(filter: &Filter) -> Self {
        Self {
            field: filter.field().as_str().to_owned(),
            operator: filter.operator().as_str().to_owned(),
            values: filter.values().to_vec(),
            negated: filter.negated(),
            purpose: filter.field().purpose().to_owned(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GraphExplanation {
    pub enabled: bool,
    pub max_hops: Option<u32>,
    pub boost_affinity: Option<bool>,
    pub source_entity_id: Option<String>,
}

/// How a query was interpreted: filters, graph settings and the chosen weights.
#[derive(Debug, Clone, Serialize)]
pub struct QueryExplanation {
    pub original_query: String,
    pub intent: QueryIntent,
    pub confidence: f32,
    pub parsed_entities: ParsedEntities,
    pub filters: Vec<FilterExplanation>,
    pub graph: GraphExplanation,
    pub weights: RankingWeights,
    pub ranking_strategy: RankingStrategy,
    pub embedding_dimensions: usize,
}

pub fn explain_query(query: &Query) -> QueryExplanation {
    let constraint = query.graph_constraint();
    QueryExplanation {
        original_query: query.raw_text().to_owned(),
        intent: query.intent(),
        confidence: query.confidence(),
        parsed_entities: query.parsed_entities().clone(),
        filters: query.filters().iter().map(FilterExplanation::from).collect(),
        graph: GraphExplanation {
            enabled: constraint.is_some(),
            max_hops: constraint.map(|c| c.max_hops()),
            boost_affinity: constraint.map(|c| c.boost_affinity()),
            source_entity_id: query.source_entity_id().map(str::to_owned),
        },
        weights: *query.weights(),
        ranking_strategy: RankingStrategy::from_weights(query.weights()),
        embedding_dimensions: query.embedding().map_or(0, <[f32]>::len),
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DebugInfo {
    pub query_explanation: QueryExplanation,
    pub weight_profile: Option<WeightProfile>,
    pub stage_timings_ms: BTreeMap<String, u128>,
    pub diagnostics: Option<PipelineDiagnostics>,
}

/// Ranked output of one search. The full pool stays available for debugging;
/// callers see the first `max_results`.
#[derive(Debug, Clone)]
pub struct QueryResult {
    query: Query,
    ranked: Vec<Candidate>,
    debug_info: DebugInfo,
}

impl QueryResult {
    pub fn new(query: Query, ranked: Vec<Candidate>, weight_profile: Option<WeightProfile>) -> Self {
        let debug_info = DebugInfo {
            query_explanation: explain_query(&query),
            weight_profile,
            stage_timings_ms: BTreeMap::new(),
            diagnostics: None,
        };
        Self {
            query,
            ranked,
            debug_info,
        }
    }

    #[must_use]
    pub fn with_run_details(
        mut self,
        timings: &PipelineStageTimings,
        diagnostics: Option<PipelineDiagnostics>,
    ) -> Self {
        self.debug_info.stage_timings_ms = timings.as_millis_map();
        self.debug_info.diagnostics = diagnostics;
        self
    }

    pub const fn query(&self) -> &Query {
        &self.query
    }

    /// The top `max_results` candidates, best first.
    pub fn candidates(&self) -> &[Candidate] {
        let take = self.ranked.len().min(self.query.max_results());
        &self.ranked[..take]
    }

    /// Every ranked candidate before truncation.
    pub fn all_candidates(&self) -> &[Candidate] {
        &self.ranked
    }

    pub fn total_count(&self) -> usize {
        self.ranked.len()
    }

    pub const fn debug_info(&self) -> &DebugInfo {
        &self.debug_info
    }

    pub fn to_response(&self) -> SearchResponse {
        let include_explanation = self.query.include_explanation();
        SearchResponse {
            query: self.query.raw_text().to_owned(),
            total_count: self.total_count(),
            intent: self.query.intent(),
            ranking_strategy: RankingStrategy::from_weights(self.query.weights()),
            weights: *self.query.weights(),
            results: self
                .candidates()
                .iter()
                .map(|candidate| SearchHit::from_candidate(candidate, include_explanation))
                .collect(),
            explanation: include_explanation.then(|| self.debug_info.query_explanation.clone()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub entity_id: String,
    pub entity: Person,
    pub score: f64,
    pub match_reasons: Vec<String>,
    pub matched_filters: BTreeMap<String, Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score_breakdown: Option<BTreeMap<String, f64>>,
}

impl SearchHit {
    fn from_candidate(candidate: &Candidate, include_breakdown: bool) -> Self {
        Self {
            entity_id: candidate.entity_id.clone(),
            entity: candidate.entity.clone(),
            score: round_score(candidate.final_score),
            match_reasons: candidate.match_reasons.iter().cloned().collect(),
            matched_filters: candidate
                .matched_filter_values
                .iter()
                .map(|(category, values)| (category.clone(), values.iter().cloned().collect()))
                .collect(),
            score_breakdown: include_breakdown.then(|| {
                candidate
                    .score_breakdown
                    .iter()
                    .map(|(dimension, value)| (dimension.clone(), round_score(*value)))
                    .collect()
            }),
        }
    }
}

/// Serialized API payload for one search.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub query: String,
    pub total_count: usize,
    pub intent: QueryIntent,
    pub ranking_strategy: RankingStrategy,
    pub weights: RankingWeights,
    pub results: Vec<SearchHit>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explanation: Option<QueryExplanation>,
}

fn round_score(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        filter::FilterField,
        query::{GraphConstraint, ScoreDimension},
    };

    fn ranked(ids: &[&str]) -> Vec<Candidate> {
        ids.iter()
            .enumerate()
            .map(|(i, id)| {
                let mut person = Person::new(*id);
                person.id = (*id).to_owned();
                let mut candidate = Candidate::new(person)
                    .with_score(ScoreDimension::FilterMatch, 1.0)
                    .with_reason("title matches: pm");
                candidate.final_score = 1.0 - 0.1 * i as f64;
                candidate.score_breakdown.insert("total".into(), candidate.final_score);
                candidate.record_matched_values("title", vec!["pm".to_owned()]);
                candidate
            })
            .collect()
    }

    #[test]
    fn truncates_to_max_results_and_keeps_total() {
        let query = Query::builder("pms").max_results(2).build().unwrap();
        let result = QueryResult::new(query, ranked(&["a", "b", "c"]), None);

        assert_eq!(result.total_count(), 3);
        assert_eq!(result.candidates().len(), 2);
        assert_eq!(result.all_candidates().len(), 3);

        let response = result.to_response();
        assert_eq!(response.total_count, 3);
        assert_eq!(response.results.len(), 2);
        assert_eq!(response.results[0].entity_id, "a");
        assert_eq!(response.results[0].matched_filters["title"], vec!["pm"]);
        assert!(response.results[0].score_breakdown.is_some());
    }

    #[test]
    fn breakdown_is_omitted_without_explanation() {
        let query = Query::builder("pms")
            .include_explanation(false)
            .build()
            .unwrap();
        let response = QueryResult::new(query, ranked(&["a"]), None).to_response();

        assert!(response.results[0].score_breakdown.is_none());
        assert!(response.explanation.is_none());
        let json = serde_json::to_value(&response).unwrap();
        assert!(json["results"][0].get("score_breakdown").is_none());
    }

    #[test]
    fn empty_result_is_valid() {
        let query = Query::builder("nobody").build().unwrap();
        let response = QueryResult::new(query, Vec::new(), None).to_response();
        assert_eq!(response.total_count, 0);
        assert!(response.results.is_empty());
    }

    #[test]
    fn explanation_describes_filters_and_graph() {
        let query = Query::builder("pms near me")
            .filter(Filter::any_of(FilterField::Location, ["boston"]).unwrap())
            .graph_constraint(GraphConstraint::new(3).unwrap().with_boost_affinity(true))
            .source_entity_id("me")
            .build()
            .unwrap();

        let explanation = explain_query(&query);
        assert_eq!(explanation.filters[0].purpose, "Geographic constraint");
        assert_eq!(explanation.filters[0].operator, "IN");
        assert!(explanation.graph.enabled);
        assert_eq!(explanation.graph.max_hops, Some(3));
        assert_eq!(explanation.graph.source_entity_id.as_deref(), Some("me"));
        assert_eq!(explanation.ranking_strategy, RankingStrategy::Balanced);
        assert_eq!(explanation.embedding_dimensions, 0);
    }
}
