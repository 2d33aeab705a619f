use std::{collections::BTreeSet, fmt, str::FromStr};

use common::error::AppError;
use serde::{Deserialize, Serialize};

use crate::{filter::Filter, parser::ParsedEntities};

pub const DEFAULT_MAX_RESULTS: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryIntent {
    #[default]
    FindPeople,
    FindInvestors,
    FindAlumni,
    FindConnections,
}

impl QueryIntent {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::FindPeople => "find_people",
            Self::FindInvestors => "find_investors",
            Self::FindAlumni => "find_alumni",
            Self::FindConnections => "find_connections",
        }
    }
}

impl fmt::Display for QueryIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueryIntent {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "find_people" => Ok(Self::FindPeople),
            "find_investors" => Ok(Self::FindInvestors),
            "find_alumni" => Ok(Self::FindAlumni),
            "find_connections" => Ok(Self::FindConnections),
            other => Err(AppError::Validation(format!("unknown query intent '{other}'"))),
        }
    }
}

/// The six ranking signals, in breakdown order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ScoreDimension {
    EmbeddingSimilarity,
    FilterMatch,
    GraphProximity,
    Affinity,
    Recency,
    Completeness,
}

impl ScoreDimension {
    pub const ALL: [Self; 6] = [
        Self::EmbeddingSimilarity,
        Self::FilterMatch,
        Self::GraphProximity,
        Self::Affinity,
        Self::Recency,
        Self::Completeness,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::EmbeddingSimilarity => "embedding_similarity",
            Self::FilterMatch => "filter_match",
            Self::GraphProximity => "graph_proximity",
            Self::Affinity => "affinity",
            Self::Recency => "recency",
            Self::Completeness => "completeness",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RankingWeights {
    pub embedding_similarity: f64,
    pub filter_match: f64,
    pub graph_proximity: f64,
    pub affinity: f64,
    pub recency: f64,
    pub completeness: f64,
}

impl Default for RankingWeights {
    fn default() -> Self {
        Self {
            embedding_similarity: 0.4,
            filter_match: 0.3,
            graph_proximity: 0.15,
            affinity: 0.1,
            recency: 0.03,
            completeness: 0.02,
        }
    }
}

impl RankingWeights {
    pub const ZERO: Self = Self {
        embedding_similarity: 0.0,
        filter_match: 0.0,
        graph_proximity: 0.0,
        affinity: 0.0,
        recency: 0.0,
        completeness: 0.0,
    };

    /// Validates caller-supplied weights: every value must be finite and non-negative.
    pub fn try_new(
        embedding_similarity: f64,
        filter_match: f64,
        graph_proximity: f64,
        affinity: f64,
        recency: f64,
        completeness: f64,
    ) -> Result<Self, AppError> {
        let weights = Self {
            embedding_similarity,
            filter_match,
            graph_proximity,
            affinity,
            recency,
            completeness,
        };
        weights.validate()?;
        Ok(weights)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        for dimension in ScoreDimension::ALL {
            let value = self.get(dimension);
            if !value.is_finite() || value < 0.0 {
                return Err(AppError::Validation(format!(
                    "weight {} must be a non-negative finite number, got {value}",
                    dimension.as_str()
                )));
            }
        }
        Ok(())
    }

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

    pub fn sum(&self) -> f64 {
        ScoreDimension::ALL.iter().map(|d| self.get(*d)).sum()
    }

    /// Scales the weights so they sum to 1.0. All-zero weights are left untouched.
    pub fn normalize(&mut self) {
        let total = self.sum();
        if total <= 0.0 || !total.is_finite() {
            return;
        }
        for dimension in ScoreDimension::ALL {
            self.set(dimension, self.get(dimension) / total);
        }
    }

    #[must_use]
    pub fn normalized(mut self) -> Self {
        self.normalize();
        self
    }
}

/// Bounded nudges applied on top of the selected weight profile.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RankingHints {
    pub prioritize_embedding: bool,
    pub prioritize_filters: bool,
    pub prioritize_affinity: bool,
    pub prioritize_graph: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphConstraint {
    max_hops: u32,
    min_connection_strength: f32,
    connection_types: BTreeSet<String>,
    boost_affinity: bool,
}

impl GraphConstraint {
    pub const DEFAULT_MAX_HOPS: u32 = 2;

    pub fn new(max_hops: u32) -> Result<Self, AppError> {
        if max_hops < 1 {
            return Err(AppError::Validation(
                "graph constraint requires max_hops >= 1".into(),
            ));
        }
        Ok(Self {
            max_hops,
            min_connection_strength: 0.0,
            connection_types: BTreeSet::new(),
            boost_affinity: false,
        })
    }

    pub fn with_min_connection_strength(mut self, strength: f32) -> Result<Self, AppError> {
        if !(0.0..=1.0).contains(&strength) {
            return Err(AppError::Validation(format!(
                "min_connection_strength must be within [0, 1], got {strength}"
            )));
        }
        self.min_connection_strength = strength;
        Ok(self)
    }

    #[must_use]
    pub fn with_connection_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.connection_types = types
            .into_iter()
            .map(|t| t.into().trim().to_ascii_lowercase())
            .filter(|t| !t.is_empty())
            .collect();
        self
    }

    #[must_use]
    pub fn with_boost_affinity(mut self, boost: bool) -> Self {
        self.boost_affinity = boost;
        self
    }

    pub const fn max_hops(&self) -> u32 {
        self.max_hops
    }

    pub const fn min_connection_strength(&self) -> f32 {
        self.min_connection_strength
    }

    pub const fn connection_types(&self) -> &BTreeSet<String> {
        &self.connection_types
    }

    pub const fn boost_affinity(&self) -> bool {
        self.boost_affinity
    }

    /// Whether an edge of this type and strength may be traversed.
    pub fn admits(&self, edge_type: &str, strength: f32) -> bool {
        if strength < self.min_connection_strength {
            return false;
        }
        self.connection_types.is_empty()
            || self
                .connection_types
                .contains(&edge_type.trim().to_ascii_lowercase())
    }
}

/// A fully parsed search request. Only the weight policy rewrites it, once.
#[derive(Debug, Clone, Serialize)]
pub struct Query {
    raw_text: String,
    #[serde(skip)]
    embedding: Option<Vec<f32>>,
    filters: Vec<Filter>,
    graph_constraint: Option<GraphConstraint>,
    weights: RankingWeights,
    weights_explicit: bool,
    intent: QueryIntent,
    confidence: f32,
    max_results: usize,
    include_explanation: bool,
    parsed_entities: ParsedEntities,
    hints: RankingHints,
    source_entity_id: Option<String>,
    #[serde(skip)]
    weights_finalized: bool,
}

impl Query {
    pub fn builder(raw_text: impl Into<String>) -> QueryBuilder {
        QueryBuilder::new(raw_text)
    }

    pub fn raw_text(&self) -> &str {
        &self.raw_text
    }

    pub fn embedding(&self) -> Option<&[f32]> {
        self.embedding.as_deref().filter(|v| !v.is_empty())
    }

    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }

    pub const fn graph_constraint(&self) -> Option<&GraphConstraint> {
        self.graph_constraint.as_ref()
    }

    pub const fn weights(&self) -> &RankingWeights {
        &self.weights
    }

    pub const fn weights_explicit(&self) -> bool {
        self.weights_explicit
    }

    pub const fn intent(&self) -> QueryIntent {
        self.intent
    }

    pub const fn confidence(&self) -> f32 {
        self.confidence
    }

    pub const fn max_results(&self) -> usize {
        self.max_results
    }

    pub const fn include_explanation(&self) -> bool {
        self.include_explanation
    }

    pub const fn parsed_entities(&self) -> &ParsedEntities {
        &self.parsed_entities
    }

    pub const fn hints(&self) -> &RankingHints {
        &self.hints
    }

    pub fn source_entity_id(&self) -> Option<&str> {
        self.source_entity_id.as_deref()
    }

    pub(crate) fn attach_embedding(&mut self, embedding: Vec<f32>) {
        if self.embedding().is_none() {
            self.embedding = Some(embedding);
        }
    }

    /// Installs the final weight vector. Later calls are ignored.
    pub(crate) fn finalize_weights(&mut self, weights: RankingWeights) -> bool {
        if self.weights_finalized {
            return false;
        }
        self.weights = weights;
        self.weights_finalized = true;
        true
    }
}

#[derive(Debug, Clone)]
pub struct QueryBuilder {
    raw_text: String,
    embedding: Option<Vec<f32>>,
    filters: Vec<Filter>,
    graph_constraint: Option<GraphConstraint>,
    weights: Option<RankingWeights>,
    intent: QueryIntent,
    confidence: f32,
    max_results: usize,
    include_explanation: bool,
    parsed_entities: ParsedEntities,
    hints: RankingHints,
    source_entity_id: Option<String>,
}

impl QueryBuilder {
    pub fn new(raw_text: impl Into<String>) -> Self {
        Self {
            raw_text: raw_text.into(),
            embedding: None,
            filters: Vec::new(),
            graph_constraint: None,
            weights: None,
            intent: QueryIntent::default(),
            confidence: 0.0,
            max_results: DEFAULT_MAX_RESULTS,
            include_explanation: true,
            parsed_entities: ParsedEntities::default(),
            hints: RankingHints::default(),
            source_entity_id: None,
        }
    }

    #[must_use]
    pub fn embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    #[must_use]
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    #[must_use]
    pub fn filters(mut self, filters: impl IntoIterator<Item = Filter>) -> Self {
        self.filters.extend(filters);
        self
    }

    #[must_use]
    pub fn graph_constraint(mut self, constraint: GraphConstraint) -> Self {
        self.graph_constraint = Some(constraint);
        self
    }

    /// Fixes the weights; the policy table is skipped and only normalization applies.
    #[must_use]
    pub fn weights(mut self, weights: RankingWeights) -> Self {
        self.weights = Some(weights);
        self
    }

    #[must_use]
    pub fn intent(mut self, intent: QueryIntent) -> Self {
        self.intent = intent;
        self
    }

    #[must_use]
    pub fn confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence;
        self
    }

    #[must_use]
    pub fn max_results(mut self, max_results: usize) -> Self {
        self.max_results = max_results;
        self
    }

    #[must_use]
    pub fn include_explanation(mut self, include: bool) -> Self {
        self.include_explanation = include;
        self
    }

    #[must_use]
    pub fn parsed_entities(mut self, entities: ParsedEntities) -> Self {
        self.parsed_entities = entities;
        self
    }

    #[must_use]
    pub fn hints(mut self, hints: RankingHints) -> Self {
        self.hints = hints;
        self
    }

    #[must_use]
    pub fn source_entity_id(mut self, id: impl Into<String>) -> Self {
        self.source_entity_id = Some(id.into());
        self
    }

    pub fn build(self) -> Result<Query, AppError> {
        if self.max_results == 0 {
            return Err(AppError::Validation("max_results must be at least 1".into()));
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(AppError::Validation(format!(
                "confidence must be within [0, 1], got {}",
                self.confidence
            )));
        }
        if let Some(weights) = &self.weights {
            weights.validate()?;
        }

        Ok(Query {
            raw_text: self.raw_text,
            embedding: self.embedding,
            filters: self.filters,
            graph_constraint: self.graph_constraint,
            weights_explicit: self.weights.is_some(),
            weights: self.weights.unwrap_or_default(),
            intent: self.intent,
            confidence: self.confidence,
            max_results: self.max_results,
            include_explanation: self.include_explanation,
            parsed_entities: self.parsed_entities,
            hints: self.hints,
            source_entity_id: self.source_entity_id,
            weights_finalized: false,
        })
    }
}
