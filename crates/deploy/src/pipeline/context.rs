//! State shared by the steps of one invocation.

use crate::artifacts::ArtifactStore;
use crate::error::Phase;
use crate::store::RegistryStore;
use crate::suite::Suite;

/// Borrowed view of the orchestrator handed to each step in turn.
pub struct StepContext<'a, C, V> {
    pub client: &'a C,
    /// `None` when no explorer is configured.
    pub verifier: Option<&'a V>,
    pub store: &'a mut RegistryStore,
    pub suite: &'a Suite,
    pub artifacts: &'a ArtifactStore,
    /// Submit implementations for verification right after deploying them.
    pub verify_after_deploy: bool,
}

impl<C, V> StepContext<'_, C, V> {
    /// Name of the network the registry belongs to.
    pub fn network(&self) -> String {
        self.store.registry().network.name.clone()
    }
}

/// What a step did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepReport {
    pub phase: Phase,
    /// Transactions confirmed by the step.
    pub transactions: usize,
    /// Units of work found already done (reused contracts, applied wiring, transferred owners).
    pub skipped: usize,
}

impl StepReport {
    pub fn new(phase: Phase) -> Self {
        Self {
            phase,
            transactions: 0,
            skipped: 0,
        }
    }
}
