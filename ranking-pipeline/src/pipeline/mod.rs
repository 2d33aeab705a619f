mod config;
mod diagnostics;
mod stages;
mod strategies;

pub use config::{RetrievalConfig, RetrievalTuning};
pub use diagnostics::{
    CollectCandidatesStats, EmbedStats, PipelineDiagnostics, RankStats, WeightPolicyStats,
};
pub use stages::PipelineContext;
pub use strategies::SearchDriver;

use async_trait::async_trait;
use common::error::AppError;
use std::{
    collections::BTreeMap,
    time::{Duration, Instant},
};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageKind {
    Embed,
    CollectCandidates,
    GraphConstraint,
    WeightPolicy,
    Rank,
}

impl StageKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Embed => "embed",
            Self::CollectCandidates => "collect_candidates",
            Self::GraphConstraint => "graph_constraint",
            Self::WeightPolicy => "weight_policy",
            Self::Rank => "rank",
        }
    }
}

#[async_trait]
pub trait PipelineStage: Send + Sync {
    fn kind(&self) -> StageKind;
    async fn execute(&self, ctx: &mut PipelineContext<'_>) -> Result<(), AppError>;
}

pub type BoxedStage = Box<dyn PipelineStage>;

#[async_trait]
pub trait StrategyDriver: Send + Sync {
    type Output;

    fn stages(&self) -> Vec<BoxedStage>;
    fn finalize(&self, ctx: &mut PipelineContext<'_>) -> Result<Self::Output, AppError>;
}

#[derive(Debug, Default, Clone)]
pub struct PipelineStageTimings {
    timings: Vec<(StageKind, Duration)>,
}

impl PipelineStageTimings {
    pub fn record(&mut self, kind: StageKind, duration: Duration) {
        self.timings.push((kind, duration));
    }

    /// Stage label to elapsed milliseconds, for debug output.
    pub fn as_millis_map(&self) -> BTreeMap<String, u128> {
        self.timings
            .iter()
            .map(|(kind, duration)| (kind.as_str().to_owned(), duration.as_millis()))
            .collect()
    }
}

pub struct PipelineRunOutput<T> {
    pub results: T,
    pub diagnostics: Option<PipelineDiagnostics>,
    pub stage_timings: PipelineStageTimings,
}

pub async fn run_with_driver<D: StrategyDriver>(
    driver: D,
    mut ctx: PipelineContext<'_>,
) -> Result<PipelineRunOutput<D::Output>, AppError> {
    if ctx.config.capture_diagnostics {
        ctx.enable_diagnostics();
    }

    for stage in driver.stages() {
        let start = Instant::now();
        stage.execute(&mut ctx).await?;
        let elapsed = start.elapsed();
        debug!(stage = stage.kind().as_str(), elapsed_ms = elapsed.as_millis(), "Stage complete");
        ctx.record_stage_duration(stage.kind(), elapsed);
    }

    let diagnostics = ctx.take_diagnostics();
    let stage_timings = ctx.take_stage_timings();
    let results = driver.finalize(&mut ctx)?;

    Ok(PipelineRunOutput {
        results,
        diagnostics,
        stage_timings,
    })
}
