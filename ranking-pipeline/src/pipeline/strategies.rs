use super::{
    stages::{
        CollectCandidatesStage, EmbedStage, GraphConstraintStage, PipelineContext, RankStage,
        WeightPolicyStage,
    },
    BoxedStage, StrategyDriver,
};
use crate::result::QueryResult;
use common::error::AppError;

/// Hybrid people search: every signal source, then graph narrowing, then ranking.
#[derive(Debug, Default, Clone, Copy)]
pub struct SearchDriver;

impl SearchDriver {
    pub const fn new() -> Self {
        Self
    }
}

impl StrategyDriver for SearchDriver {
    type Output = QueryResult;

    fn stages(&self) -> Vec<BoxedStage> {
        vec![
            Box::new(EmbedStage),
            Box::new(CollectCandidatesStage),
            Box::new(GraphConstraintStage),
            Box::new(WeightPolicyStage),
            Box::new(RankStage),
        ]
    }

    fn finalize(&self, ctx: &mut PipelineContext<'_>) -> Result<Self::Output, AppError> {
        Ok(QueryResult::new(
            ctx.query.clone(),
            ctx.take_ranked(),
            ctx.weight_profile,
        ))
    }
}
