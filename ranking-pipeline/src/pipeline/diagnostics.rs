use serde::Serialize;

use crate::graph::GraphFilterStats;

#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineDiagnostics {
    pub embed: Option<EmbedStats>,
    pub collect_candidates: Option<CollectCandidatesStats>,
    pub graph_constraint: Option<GraphFilterStats>,
    pub weight_policy: Option<WeightPolicyStats>,
    pub rank: Option<RankStats>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct EmbedStats {
    pub provided: bool,
    pub generated: bool,
    pub failed: bool,
    pub dimensions: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CollectCandidatesStats {
    pub semantic_ran: bool,
    pub semantic_failed: bool,
    pub structured_failed: bool,
    pub used_fallback: bool,
    pub semantic_candidates: usize,
    pub structured_candidates: usize,
    pub merged_candidates: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct WeightPolicyStats {
    pub profile: String,
    pub ranking_strategy: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RankStats {
    pub ranked: usize,
    pub returned: usize,
    pub top_score: Option<f64>,
}
