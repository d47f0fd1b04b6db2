//! Sequential execution of a pipeline.

use std::future::Future;

use super::chain::{End, Pipeline};
use super::context::{StepContext, StepReport};
use super::step::Step;
use crate::client::ChainClient;
use crate::error::PhaseError;
use crate::explorer::VerificationService;

/// Run every step in order, stopping at the first failure.
pub trait RunPipeline {
    fn run<C, V>(
        &self,
        ctx: &mut StepContext<'_, C, V>,
    ) -> impl Future<Output = Result<Vec<StepReport>, PhaseError>> + Send
    where
        C: ChainClient,
        V: VerificationService;
}

async fn run_step<S, C, V>(
    step: &S,
    ctx: &mut StepContext<'_, C, V>,
) -> Result<StepReport, PhaseError>
where
    S: Step,
    C: ChainClient,
    V: VerificationService,
{
    let network = ctx.network();
    tracing::info!(phase = %S::PHASE, network = %network, "Starting phase");
    let report = step.run(ctx).await?;
    tracing::info!(
        phase = %S::PHASE,
        network = %network,
        transactions = report.transactions,
        skipped = report.skipped,
        "Phase complete"
    );
    Ok(report)
}

impl<S: Step> RunPipeline for Pipeline<S, End> {
    async fn run<C, V>(
        &self,
        ctx: &mut StepContext<'_, C, V>,
    ) -> Result<Vec<StepReport>, PhaseError>
    where
        C: ChainClient,
        V: VerificationService,
    {
        Ok(vec![run_step(&self.step, ctx).await?])
    }
}

impl<S: Step, S2: Step> RunPipeline for Pipeline<S, Pipeline<S2, End>> {
    async fn run<C, V>(
        &self,
        ctx: &mut StepContext<'_, C, V>,
    ) -> Result<Vec<StepReport>, PhaseError>
    where
        C: ChainClient,
        V: VerificationService,
    {
        let mut reports = vec![run_step(&self.step, ctx).await?];
        reports.push(run_step(&self.next.step, ctx).await?);
        Ok(reports)
    }
}

impl<S: Step, S2: Step, S3: Step> RunPipeline for Pipeline<S, Pipeline<S2, Pipeline<S3, End>>> {
    async fn run<C, V>(
        &self,
        ctx: &mut StepContext<'_, C, V>,
    ) -> Result<Vec<StepReport>, PhaseError>
    where
        C: ChainClient,
        V: VerificationService,
    {
        let mut reports = vec![run_step(&self.step, ctx).await?];
        reports.push(run_step(&self.next.step, ctx).await?);
        reports.push(run_step(&self.next.next.step, ctx).await?);
        Ok(reports)
    }
}
