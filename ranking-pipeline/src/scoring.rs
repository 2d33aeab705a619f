use std::{cmp::Ordering, collections::BTreeMap, fmt};

use chrono::{DateTime, Utc};
use common::storage::types::person::Person;
use serde::Serialize;

use crate::{
    candidates::{clamp_unit, Candidate, DimensionScores},
    query::{RankingWeights, ScoreDimension},
};

pub const TOTAL_KEY: &str = "total";

const NAME_WEIGHT: f64 = 0.2;
const LOCATION_WEIGHT: f64 = 0.2;
const HEADLINE_WEIGHT: f64 = 0.3;
const SUMMARY_WEIGHT: f64 = 0.2;
const LINK_WEIGHT: f64 = 0.1;

/// Inputs shared by every candidate in one ranking pass.
#[derive(Debug, Clone)]
pub struct RankingContext {
    pub now: DateTime<Utc>,
    pub recency_tau_days: f64,
    pub affinity_organization: Option<String>,
}

impl RankingContext {
    pub fn new(now: DateTime<Utc>, recency_tau_days: f64) -> Self {
        Self {
            now,
            recency_tau_days,
            affinity_organization: None,
        }
    }

    #[must_use]
    pub fn with_affinity_organization(mut self, organization: Option<String>) -> Self {
        self.affinity_organization = organization
            .map(|org| org.trim().to_owned())
            .filter(|org| !org.is_empty());
        self
    }
}

/// The affiliation that satisfies the boost predicate, if any.
pub fn affinity_match<'a>(person: &'a Person, organization: Option<&str>) -> Option<&'a str> {
    person
        .affiliations
        .iter()
        .find(|affiliation| match organization {
            Some(org) => affiliation.organization.eq_ignore_ascii_case(org),
            None => !affiliation.organization.trim().is_empty(),
        })
        .map(|affiliation| affiliation.organization.as_str())
}

pub fn affinity_score(person: &Person, organization: Option<&str>) -> f64 {
    if affinity_match(person, organization).is_some() {
        1.0
    } else {
        0.0
    }
}

/// Exponential decay on profile age. Timestamps in the future count as fresh.
pub fn recency_score(updated_at: DateTime<Utc>, now: DateTime<Utc>, tau_days: f64) -> f64 {
    if tau_days <= 0.0 || !tau_days.is_finite() {
        return 0.0;
    }
    let age_seconds = (now - updated_at).num_seconds();
    if age_seconds <= 0 {
        return 1.0;
    }
    let age_days = age_seconds as f64 / 86_400.0;
    clamp_unit((-age_days / tau_days).exp())
}

fn present(value: Option<&String>) -> bool {
    value.is_some_and(|v| !v.trim().is_empty())
}

pub fn completeness_score(person: &Person) -> f64 {
    let mut score = 0.0;
    if !person.full_name.trim().is_empty() {
        score += NAME_WEIGHT;
    }
    if present(person.location.as_ref()) {
        score += LOCATION_WEIGHT;
    }
    if present(person.headline.as_ref()) {
        score += HEADLINE_WEIGHT;
    }
    if present(person.summary.as_ref()) {
        score += SUMMARY_WEIGHT;
    }
    if present(person.linkedin_url.as_ref()) {
        score += LINK_WEIGHT;
    }
    score.min(1.0)
}

/// Weighted sum of the six dimensions with a per-dimension breakdown plus `total`.
pub fn weighted_score(
    scores: &DimensionScores,
    weights: &RankingWeights,
) -> (f64, BTreeMap<String, f64>) {
    let mut breakdown = BTreeMap::new();
    let mut total = 0.0;
    for dimension in ScoreDimension::ALL {
        let contribution = weights.get(dimension) * scores.get(dimension);
        total += contribution;
        breakdown.insert(dimension.as_str().to_owned(), contribution);
    }
    breakdown.insert(TOTAL_KEY.to_owned(), total);
    (total, breakdown)
}

/// Fills in the profile-derived dimensions and the final score for one candidate.
pub fn score_candidate(candidate: &mut Candidate, weights: &RankingWeights, ctx: &RankingContext) {
    let organization = ctx.affinity_organization.as_deref();
    if let Some(org) = affinity_match(&candidate.entity, organization).map(str::to_owned) {
        candidate.scores.set(ScoreDimension::Affinity, 1.0);
        candidate.add_reason(format!("affiliated with {org}"));
    }
    candidate.scores.set(
        ScoreDimension::Recency,
        recency_score(candidate.entity.updated_at, ctx.now, ctx.recency_tau_days),
    );
    candidate.scores.set(
        ScoreDimension::Completeness,
        completeness_score(&candidate.entity),
    );

    let (total, breakdown) = weighted_score(&candidate.scores, weights);
    candidate.final_score = total;
    candidate.score_breakdown = breakdown;
}

/// Highest score first, then display name, then id.
pub fn compare_ranked(a: &Candidate, b: &Candidate) -> Ordering {
    b.final_score
        .total_cmp(&a.final_score)
        .then_with(|| a.entity.full_name.cmp(&b.entity.full_name))
        .then_with(|| a.entity_id.cmp(&b.entity_id))
}

/// Scores every candidate and returns them in a total, deterministic order.
pub fn rank_candidates<I>(candidates: I, weights: &RankingWeights, ctx: &RankingContext) -> Vec<Candidate>
where
    I: IntoIterator<Item = Candidate>,
{
    let mut ranked: Vec<Candidate> = candidates
        .into_iter()
        .map(|mut candidate| {
            score_candidate(&mut candidate, weights, ctx);
            candidate
        })
        .collect();
    ranked.sort_by(compare_ranked);
    ranked
}

/// Label describing which signal dominates a weight vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RankingStrategy {
    StructuredPriority,
    SemanticPriority,
    AffinityPriority,
    NetworkPriority,
    Balanced,
}

impl RankingStrategy {
    pub fn from_weights(weights: &RankingWeights) -> Self {
        if weights.filter_match > 0.4 {
            Self::StructuredPriority
        } else if weights.embedding_similarity > 0.4 {
            Self::SemanticPriority
        } else if weights.affinity > 0.3 {
            Self::AffinityPriority
        } else if weights.graph_proximity > 0.2 {
            Self::NetworkPriority
        } else {
            Self::Balanced
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::StructuredPriority => "structured_priority",
            Self::SemanticPriority => "semantic_priority",
            Self::AffinityPriority => "affinity_priority",
            Self::NetworkPriority => "network_priority",
            Self::Balanced => "balanced",
        }
    }
}

impl fmt::Display for RankingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
