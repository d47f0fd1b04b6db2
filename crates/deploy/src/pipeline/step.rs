//! Core step trait.

use std::future::Future;

use super::context::{StepContext, StepReport};
use super::stages::PipelineStage;
use crate::client::ChainClient;
use crate::error::{Phase, PhaseError};
use crate::explorer::VerificationService;

/// One phase of provisioning.
///
/// The `Stage` associated type fixes where in the pipeline the step may run.
pub trait Step: Send + Sync {
    type Stage: PipelineStage;

    /// Phase reported in errors and logs.
    const PHASE: Phase;

    fn run<C, V>(
        &self,
        ctx: &mut StepContext<'_, C, V>,
    ) -> impl Future<Output = Result<StepReport, PhaseError>> + Send
    where
        C: ChainClient,
        V: VerificationService;
}
