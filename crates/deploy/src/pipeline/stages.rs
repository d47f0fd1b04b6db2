//! Stage markers for the provisioning type-state.
//!
//! Provisioning order is fixed: deploy -> wire -> transfer-ownership.
//! Ownership transfer is terminal: nothing can be chained after it.

/// Contracts are planned and deployed.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeployStage;

/// Deployed contracts are bound to each other.
#[derive(Debug, Clone, Copy, Default)]
pub struct WireStage;

/// Administrative control moves to governance.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransferStage;

mod sealed {
    pub trait Sealed {}
    impl Sealed for super::DeployStage {}
    impl Sealed for super::WireStage {}
    impl Sealed for super::TransferStage {}
}

/// Marker trait for provisioning stages.
pub trait PipelineStage: sealed::Sealed + Default + Clone + Send + Sync + 'static {}

impl PipelineStage for DeployStage {}
impl PipelineStage for WireStage {}
impl PipelineStage for TransferStage {}

/// Valid stage transitions:
/// - DeployStage -> WireStage
/// - WireStage -> TransferStage
pub trait NextStage: PipelineStage {
    type Next: PipelineStage;
}

impl NextStage for DeployStage {
    type Next = WireStage;
}

impl NextStage for WireStage {
    type Next = TransferStage;
}

// TransferStage has no NextStage impl.
