//! Error taxonomy for orchestrated deployments.
//!
//! Every failure that reaches an operator is a [`PhaseError`]: the underlying
//! [`DeployError`] plus the phase, network and logical contract it happened in,
//! which is what an operator needs to fix the registry and re-run.

use crate::registry::ContractName;

/// The phases an invocation can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
#[strum(serialize_all = "kebab-case")]
pub enum Phase {
    Preflight,
    Deploy,
    Wire,
    TransferOwnership,
    Upgrade,
    Repoint,
    Reconcile,
    Verify,
    Status,
}

/// Failure classes of the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeployError {
    /// Missing input, malformed arguments, wrong phase order. Raised before any transaction.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A transaction or a simulated call reverted on chain.
    #[error("transaction reverted: {0}")]
    TransactionReverted(String),

    /// The deploying key does not hold the privilege the call needs.
    #[error("authorization error: {0}")]
    Authorization(String),

    /// Timeouts and connection failures.
    #[error("transient network error: {0}")]
    TransientNetwork(String),

    /// The node refused a request for a reason other than a revert (nonce, gas price, ...).
    #[error("rpc error: {0}")]
    Rpc(String),

    /// The registry could not be read, written, or would have lost data.
    #[error("registry error: {0}")]
    Registry(String),

    /// Source verification failed for a reason other than "already verified".
    #[error(transparent)]
    Verification(#[from] VerifyError),
}

impl DeployError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Whether the external call layer may retry the request that produced this error.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientNetwork(_))
    }

    /// Attach phase context.
    pub fn in_phase(self, phase: Phase, network: &str) -> PhaseError {
        PhaseError {
            phase,
            network: network.to_string(),
            contract: None,
            kind: self,
        }
    }
}

/// A [`DeployError`] annotated with where it happened.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{phase} failed on {network}{}: {kind}", contract_suffix(.contract))]
pub struct PhaseError {
    pub phase: Phase,
    pub network: String,
    pub contract: Option<ContractName>,
    #[source]
    pub kind: DeployError,
}

fn contract_suffix(contract: &Option<ContractName>) -> String {
    contract
        .as_ref()
        .map(|c| format!(" for {c}"))
        .unwrap_or_default()
}

impl PhaseError {
    pub fn for_contract(mut self, contract: &ContractName) -> Self {
        self.contract = Some(contract.clone());
        self
    }
}

/// Shorthand used by the steps to lift errors into phase context.
pub(crate) trait PhaseContext<T> {
    fn phase(self, phase: Phase, network: &str) -> Result<T, PhaseError>;
    fn contract(self, phase: Phase, network: &str, contract: &ContractName)
    -> Result<T, PhaseError>;
}

impl<T> PhaseContext<T> for Result<T, DeployError> {
    fn phase(self, phase: Phase, network: &str) -> Result<T, PhaseError> {
        self.map_err(|e| e.in_phase(phase, network))
    }

    fn contract(
        self,
        phase: Phase,
        network: &str,
        contract: &ContractName,
    ) -> Result<T, PhaseError> {
        self.map_err(|e| e.in_phase(phase, network).for_contract(contract))
    }
}

/// Verification outcomes that are not a plain success.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VerifyError {
    #[error("contract source code already verified")]
    AlreadyVerified,

    #[error("verification rejected: {0}")]
    Rejected(String),

    #[error("verification transport failure: {0}")]
    Transport(String),

    #[error("verification still pending after {0} polls")]
    Timeout(u32),

    #[error("verification unavailable: {0}")]
    Unsupported(String),
}
