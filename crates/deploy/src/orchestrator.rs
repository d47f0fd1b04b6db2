//! Entry point tying a chain client, a locked registry and a suite together.

use alloy_core::primitives::{Address, Bytes};

use crate::artifacts::ArtifactStore;
use crate::client::{ChainClient, attach};
use crate::error::{DeployError, Phase, PhaseContext, PhaseError};
use crate::explorer::{EtherscanVerifier, VerificationService};
use crate::pipeline::{Pipeline, Provision, RunPipeline, Step, StepContext, StepReport};
use crate::registry::{AddressRegistry, ContractName, ContractRecord, ContractStatus};
use crate::steps::{DeployStep, TransferStep, UpgradeMode, WireStep, upgrade, verify};
use crate::store::RegistryStore;
use crate::suite::Suite;

/// A [`ContractRecord`] with the owner read from chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusRow {
    pub record: ContractRecord,
    /// `None` when undeployed or not `Ownable`.
    pub owner: Option<Address>,
}

/// Runs phases for one network, one signer, one registry.
///
/// Every operation first checks that the client is connected to the
/// registry's chain. Nothing runs implicitly: each method is one phase, except
/// [`Orchestrator::provision`], the fixed deploy -> wire -> transfer composite.
pub struct Orchestrator<C, V = EtherscanVerifier> {
    client: C,
    verifier: Option<V>,
    store: RegistryStore,
    suite: Suite,
    artifacts: ArtifactStore,
    verify_after_deploy: bool,
}

impl<C: ChainClient> Orchestrator<C, EtherscanVerifier> {
    pub fn new(client: C, store: RegistryStore, suite: Suite, artifacts: ArtifactStore) -> Self {
        Self {
            client,
            verifier: None,
            store,
            suite,
            artifacts,
            verify_after_deploy: false,
        }
    }
}

impl<C, V> Orchestrator<C, V>
where
    C: ChainClient,
    V: VerificationService,
{
    pub fn with_verifier<V2: VerificationService>(self, verifier: V2) -> Orchestrator<C, V2> {
        Orchestrator {
            client: self.client,
            verifier: Some(verifier),
            store: self.store,
            suite: self.suite,
            artifacts: self.artifacts,
            verify_after_deploy: self.verify_after_deploy,
        }
    }

    /// Submit implementations for verification as soon as they are deployed.
    pub fn verify_after_deploy(mut self, enabled: bool) -> Self {
        self.verify_after_deploy = enabled;
        self
    }

    pub fn registry(&self) -> &AddressRegistry {
        self.store.registry()
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn suite(&self) -> &Suite {
        &self.suite
    }

    fn network(&self) -> String {
        self.store.registry().network.name.clone()
    }

    fn context(&mut self) -> StepContext<'_, C, V> {
        StepContext {
            client: &self.client,
            verifier: self.verifier.as_ref(),
            store: &mut self.store,
            suite: &self.suite,
            artifacts: &self.artifacts,
            verify_after_deploy: self.verify_after_deploy,
        }
    }

    /// Refuse to touch a chain other than the registry's.
    pub async fn preflight(&self) -> Result<(), PhaseError> {
        let network = self.network();
        let expected = self.store.registry().network.chain_id;
        let actual = self.client.chain_id().await.phase(Phase::Preflight, &network)?;
        if actual != expected {
            return Err(DeployError::config(format!(
                "registry is for chain {expected} but the RPC endpoint serves chain {actual}"
            ))
            .in_phase(Phase::Preflight, &network));
        }
        tracing::debug!(
            network = %network,
            chain_id = actual,
            sender = %self.client.sender(),
            "Preflight passed"
        );
        Ok(())
    }

    async fn run_one<S: Step>(&mut self, step: S) -> Result<StepReport, PhaseError> {
        self.preflight().await?;
        let reports = Pipeline::new(step).run(&mut self.context()).await?;
        Ok(reports
            .into_iter()
            .next()
            .unwrap_or_else(|| StepReport::new(S::PHASE)))
    }

    pub async fn deploy(&mut self) -> Result<StepReport, PhaseError> {
        self.run_one(DeployStep).await
    }

    pub async fn wire(&mut self) -> Result<StepReport, PhaseError> {
        self.run_one(WireStep).await
    }

    pub async fn transfer_ownership(&mut self) -> Result<StepReport, PhaseError> {
        self.run_one(TransferStep).await
    }

    /// deploy -> wire -> transfer-ownership.
    pub async fn provision(&mut self) -> Result<Vec<StepReport>, PhaseError> {
        self.preflight().await?;
        Provision::standard().run(&mut self.context()).await
    }

    pub async fn upgrade(
        &mut self,
        mode: UpgradeMode,
        contracts: &[ContractName],
        data: &Bytes,
    ) -> Result<StepReport, PhaseError> {
        self.preflight().await?;
        upgrade::upgrade(&mut self.context(), mode, contracts, data).await
    }

    pub async fn repoint(
        &mut self,
        contracts: &[ContractName],
        data: &Bytes,
    ) -> Result<StepReport, PhaseError> {
        self.preflight().await?;
        upgrade::repoint(&mut self.context(), contracts, data).await
    }

    pub async fn reconcile(&mut self) -> Result<Vec<ContractName>, PhaseError> {
        self.preflight().await?;
        upgrade::reconcile(&mut self.context()).await
    }

    pub async fn verify(&mut self, contracts: &[ContractName]) -> Result<StepReport, PhaseError> {
        verify::verify_contracts(&mut self.context(), contracts).await
    }

    /// Inferred lifecycle of every suite contract, in deploy order.
    pub async fn status(&self) -> Result<Vec<StatusRow>, PhaseError> {
        self.preflight().await?;
        let network = self.network();
        let registry = self.store.registry();
        let governance = registry.input(&self.suite.governance).ok();

        let mut rows = Vec::with_capacity(self.suite.contracts.len());
        for spec in self.suite.deploy_order().phase(Phase::Status, &network)? {
            let wiring = self
                .suite
                .wiring_for(&spec.name)
                .map(|call| call.encode(registry))
                .collect::<Result<Vec<_>, _>>();
            let mut record = match wiring {
                Ok(wiring) => registry.contract_record(&spec.name, &wiring),
                Err(err) => {
                    // Calls that cannot be encoded cannot have been applied.
                    tracing::warn!(
                        contract = %spec.name,
                        error = %err,
                        "Wiring cannot be resolved"
                    );
                    let mut record = registry.contract_record(&spec.name, &[]);
                    if record.status == ContractStatus::Wired {
                        record.status = ContractStatus::ProxyDeployed;
                    }
                    record
                }
            };

            let owner = match registry.deployment(&spec.name).and_then(|d| d.handle()) {
                Some(handle) => match attach(&self.client, handle).owner().await {
                    Ok(owner) => Some(owner),
                    Err(DeployError::TransactionReverted(_)) => None,
                    Err(err) => {
                        return Err(err
                            .in_phase(Phase::Status, &network)
                            .for_contract(&spec.name));
                    }
                },
                None => None,
            };

            if owner.is_some() && owner == governance {
                record.status = ContractStatus::OwnershipTransferred;
            }
            rows.push(StatusRow { record, owner });
        }
        Ok(rows)
    }
}
