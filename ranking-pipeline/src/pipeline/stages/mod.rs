use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::error::AppError;
use std::{collections::HashMap, time::Duration};
use tracing::{debug, instrument, warn};

use crate::{
    candidates::{bounded, generate_candidates, Candidate},
    graph::{apply_graph_constraint, ConnectionGraph, GraphFilterStats},
    policy::{finalize_query_weights, WeightProfile},
    query::Query,
    scoring::{rank_candidates, RankingContext, RankingStrategy},
    store::CandidateStore,
    Embedder,
};

use super::{
    config::RetrievalConfig,
    diagnostics::{
        CollectCandidatesStats, EmbedStats, PipelineDiagnostics, RankStats, WeightPolicyStats,
    },
    PipelineStage, PipelineStageTimings, StageKind,
};

pub struct PipelineContext<'a> {
    pub store: &'a dyn CandidateStore,
    pub graph: &'a dyn ConnectionGraph,
    pub embedder: Option<&'a dyn Embedder>,
    pub config: RetrievalConfig,
    pub query: Query,
    /// Clock used for recency scoring.
    pub now: DateTime<Utc>,
    pub candidates: HashMap<String, Candidate>,
    pub ranked: Vec<Candidate>,
    pub weight_profile: Option<WeightProfile>,
    pub diagnostics: Option<PipelineDiagnostics>,
    stage_timings: PipelineStageTimings,
}

impl<'a> PipelineContext<'a> {
    pub fn new(
        store: &'a dyn CandidateStore,
        graph: &'a dyn ConnectionGraph,
        embedder: Option<&'a dyn Embedder>,
        query: Query,
        config: RetrievalConfig,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            store,
            graph,
            embedder,
            config,
            query,
            now,
            candidates: HashMap::new(),
            ranked: Vec::new(),
            weight_profile: None,
            diagnostics: None,
            stage_timings: PipelineStageTimings::default(),
        }
    }

    pub fn enable_diagnostics(&mut self) {
        if self.diagnostics.is_none() {
            self.diagnostics = Some(PipelineDiagnostics::default());
        }
    }

    pub fn record_embed(&mut self, stats: EmbedStats) {
        if let Some(diag) = self.diagnostics.as_mut() {
            diag.embed = Some(stats);
        }
    }

    pub fn record_collect_candidates(&mut self, stats: CollectCandidatesStats) {
        if let Some(diag) = self.diagnostics.as_mut() {
            diag.collect_candidates = Some(stats);
        }
    }

    pub fn record_graph_constraint(&mut self, stats: GraphFilterStats) {
        if let Some(diag) = self.diagnostics.as_mut() {
            diag.graph_constraint = Some(stats);
        }
    }

    pub fn record_weight_policy(&mut self, stats: WeightPolicyStats) {
        if let Some(diag) = self.diagnostics.as_mut() {
            diag.weight_policy = Some(stats);
        }
    }

    pub fn record_rank(&mut self, stats: RankStats) {
        if let Some(diag) = self.diagnostics.as_mut() {
            diag.rank = Some(stats);
        }
    }

    pub fn take_diagnostics(&mut self) -> Option<PipelineDiagnostics> {
        self.diagnostics.take()
    }

    pub fn take_stage_timings(&mut self) -> PipelineStageTimings {
        std::mem::take(&mut self.stage_timings)
    }

    pub fn record_stage_duration(&mut self, kind: StageKind, duration: std::time::Duration) {
        self.stage_timings.record(kind, duration);
    }

    pub fn take_ranked(&mut self) -> Vec<Candidate> {
        std::mem::take(&mut self.ranked)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EmbedStage;

#[async_trait]
impl PipelineStage for EmbedStage {
    fn kind(&self) -> StageKind {
        StageKind::Embed
    }

    async fn execute(&self, ctx: &mut PipelineContext<'_>) -> Result<(), AppError> {
        embed(ctx).await
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CollectCandidatesStage;

#[async_trait]
impl PipelineStage for CollectCandidatesStage {
    fn kind(&self) -> StageKind {
        StageKind::CollectCandidates
    }

    async fn execute(&self, ctx: &mut PipelineContext<'_>) -> Result<(), AppError> {
        collect_candidates(ctx).await
    }
}

#[derive(Debug, Clone, Copy)]
pub struct GraphConstraintStage;

#[async_trait]
impl PipelineStage for GraphConstraintStage {
    fn kind(&self) -> StageKind {
        StageKind::GraphConstraint
    }

    async fn execute(&self, ctx: &mut PipelineContext<'_>) -> Result<(), AppError> {
        constrain_by_graph(ctx).await
    }
}

#[derive(Debug, Clone, Copy)]
pub struct WeightPolicyStage;

#[async_trait]
impl PipelineStage for WeightPolicyStage {
    fn kind(&self) -> StageKind {
        StageKind::WeightPolicy
    }

    async fn execute(&self, ctx: &mut PipelineContext<'_>) -> Result<(), AppError> {
        select_weights(ctx);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RankStage;

#[async_trait]
impl PipelineStage for RankStage {
    fn kind(&self) -> StageKind {
        StageKind::Rank
    }

    async fn execute(&self, ctx: &mut PipelineContext<'_>) -> Result<(), AppError> {
        rank(ctx);
        Ok(())
    }
}

#[instrument(level = "trace", skip_all)]
pub async fn embed(ctx: &mut PipelineContext<'_>) -> Result<(), AppError> {
    if let Some(existing) = ctx.query.embedding() {
        let stats = EmbedStats {
            provided: true,
            dimensions: existing.len(),
            ..EmbedStats::default()
        };
        ctx.record_embed(stats);
        return Ok(());
    }

    let Some(embedder) = ctx.embedder else {
        debug!("No embedder configured; semantic retrieval disabled");
        return Ok(());
    };

    let timeout = Duration::from_millis(ctx.config.tuning.retrieval_timeout_ms);
    let mut stats = EmbedStats::default();
    match bounded("embed", timeout, embedder.embed(ctx.query.raw_text())).await {
        Ok(vector) if !vector.is_empty() => {
            stats.generated = true;
            stats.dimensions = vector.len();
            ctx.query.attach_embedding(vector);
        }
        Ok(_) => {
            warn!("Embedder returned an empty vector; continuing without semantic retrieval");
            stats.failed = true;
        }
        Err(err) => {
            warn!(error = %err, "Query embedding failed; continuing without semantic retrieval");
            stats.failed = true;
        }
    }
    ctx.record_embed(stats);
    Ok(())
}

#[instrument(level = "trace", skip_all)]
pub async fn collect_candidates(ctx: &mut PipelineContext<'_>) -> Result<(), AppError> {
    let pool = generate_candidates(ctx.store, &ctx.query, &ctx.config.tuning).await;
    debug!(
        merged = pool.candidates.len(),
        semantic_failed = pool.stats.semantic_failed,
        structured_failed = pool.stats.structured_failed,
        "Collected candidates"
    );
    ctx.candidates = pool.candidates;
    ctx.record_collect_candidates(pool.stats);
    Ok(())
}

#[instrument(level = "trace", skip_all)]
pub async fn constrain_by_graph(ctx: &mut PipelineContext<'_>) -> Result<(), AppError> {
    let stats = apply_graph_constraint(
        ctx.graph,
        ctx.query.graph_constraint(),
        ctx.query.source_entity_id(),
        &mut ctx.candidates,
        ctx.config.tuning.graph_fetch_concurrency,
    )
    .await;
    ctx.record_graph_constraint(stats);
    Ok(())
}

pub fn select_weights(ctx: &mut PipelineContext<'_>) {
    let profile = finalize_query_weights(&mut ctx.query);
    ctx.weight_profile = Some(profile);
    let stats = WeightPolicyStats {
        profile: profile.as_str().to_owned(),
        ranking_strategy: RankingStrategy::from_weights(ctx.query.weights())
            .as_str()
            .to_owned(),
    };
    ctx.record_weight_policy(stats);
}

#[instrument(level = "trace", skip_all)]
pub fn rank(ctx: &mut PipelineContext<'_>) {
    let tuning = &ctx.config.tuning;
    let ranking = RankingContext::new(ctx.now, tuning.recency_tau_days)
        .with_affinity_organization(tuning.affinity_organization.clone());

    let pool = std::mem::take(&mut ctx.candidates);
    ctx.ranked = rank_candidates(pool.into_values(), ctx.query.weights(), &ranking);

    let stats = RankStats {
        ranked: ctx.ranked.len(),
        returned: ctx.ranked.len().min(ctx.query.max_results()),
        top_score: ctx.ranked.first().map(|c| c.final_score),
    };
    debug!(ranked = stats.ranked, returned = stats.returned, "Ranked candidates");
    ctx.record_rank(stats);
}
