//! Source verification of deployed implementations and plain contracts.
//!
//! Verification never undoes or blocks on-chain work: after a deployment it is
//! best-effort, and the explicit verify phase reports failures only after every
//! contract has been attempted.

use alloy_core::primitives::{Address, Bytes};

use crate::artifacts::ArtifactStore;
use crate::client::ChainClient;
use crate::error::{DeployError, Phase, PhaseContext, PhaseError, VerifyError};
use crate::explorer::{VerificationRequest, VerificationService};
use crate::pipeline::{StepContext, StepReport};
use crate::registry::{AddressRegistry, ContractName};
use crate::suite::ContractSpec;

/// Build the request for `address` deployed from `artifact`.
pub fn request_for(
    artifacts: &ArtifactStore,
    artifact: &str,
    address: Address,
    constructor_args: Bytes,
) -> Result<VerificationRequest, DeployError> {
    let artifact = artifacts.load(artifact)?;
    let build_info = artifacts.build_info(&artifact)?;
    Ok(VerificationRequest {
        address,
        contract_name: artifact.fully_qualified_name(),
        compiler_version: build_info.solc_long_version,
        standard_json_input: build_info.input,
        constructor_args,
    })
}

/// Submit, counting "already verified" as success.
pub async fn submit<V: VerificationService>(
    verifier: &V,
    request: &VerificationRequest,
) -> Result<(), VerifyError> {
    match verifier.submit(request).await {
        Ok(()) => Ok(()),
        Err(VerifyError::AlreadyVerified) => {
            tracing::info!(address = %request.address, "Already verified");
            Ok(())
        }
        Err(err) => Err(err),
    }
}

/// Artifact, address and constructor arguments the explorer sees for a contract.
pub(crate) fn target(
    spec: &ContractSpec,
    registry: &AddressRegistry,
) -> Result<(String, Address, Bytes), DeployError> {
    let deployment = registry.deployment(&spec.name).cloned().unwrap_or_default();
    let undeployed = || {
        DeployError::config(format!(
            "`{}` has nothing deployed to verify on {}",
            spec.name, registry.network.name
        ))
    };

    if spec.is_proxied() {
        let implementation = deployment.implementation.ok_or_else(undeployed)?;
        let artifact = if registry.upgraded(&spec.name) {
            spec.upgrade_artifact()
        } else {
            spec.artifact.as_str()
        };
        Ok((artifact.to_string(), implementation, Bytes::new()))
    } else {
        let address = deployment.address.ok_or_else(undeployed)?;
        Ok((spec.artifact.clone(), address, spec.encode_args(registry)?))
    }
}

/// Verify one freshly deployed contract, logging instead of failing.
pub(crate) async fn best_effort<C, V>(
    ctx: &StepContext<'_, C, V>,
    artifact: &str,
    address: Address,
    constructor_args: Bytes,
) where
    C: ChainClient,
    V: VerificationService,
{
    let Some(verifier) = ctx.verifier else {
        return;
    };
    if !ctx.verify_after_deploy {
        return;
    }

    let result = match request_for(ctx.artifacts, artifact, address, constructor_args) {
        Ok(request) => submit(verifier, &request).await.map_err(DeployError::from),
        Err(err) => Err(err),
    };
    if let Err(err) = result {
        tracing::warn!(%address, artifact, error = %err, "Verification failed, continuing");
    }
}

/// The explicit verify phase.
///
/// With no names, every contract flagged `verify` is submitted.
pub async fn verify_contracts<C, V>(
    ctx: &mut StepContext<'_, C, V>,
    names: &[ContractName],
) -> Result<StepReport, PhaseError>
where
    C: ChainClient,
    V: VerificationService,
{
    let network = ctx.network();
    let Some(verifier) = ctx.verifier else {
        return Err(DeployError::from(VerifyError::Unsupported(format!(
            "no explorer API configured for {network}"
        )))
        .in_phase(Phase::Verify, &network));
    };

    let specs: Vec<&ContractSpec> = if names.is_empty() {
        ctx.suite.contracts.iter().filter(|c| c.verify).collect()
    } else {
        names
            .iter()
            .map(|name| ctx.suite.contract(name))
            .collect::<Result<_, _>>()
            .phase(Phase::Verify, &network)?
    };

    let mut report = StepReport::new(Phase::Verify);
    let mut first_failure = None;

    for spec in specs {
        let result = match target(spec, ctx.store.registry()) {
            Ok((artifact, address, args)) => {
                match request_for(ctx.artifacts, &artifact, address, args) {
                    Ok(request) => submit(verifier, &request).await.map_err(DeployError::from),
                    Err(err) => Err(err),
                }
            }
            Err(err) => Err(err),
        };

        match result {
            Ok(()) => {
                tracing::info!(contract = %spec.name, network = %network, "Verified");
                report.transactions += 1;
            }
            Err(err) => {
                tracing::warn!(
                    contract = %spec.name,
                    network = %network,
                    error = %err,
                    "Verification failed"
                );
                first_failure
                    .get_or_insert(err.in_phase(Phase::Verify, &network).for_contract(&spec.name));
            }
        }
    }

    match first_failure {
        Some(err) => Err(err),
        None => Ok(report),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    struct Scripted(Mutex<Vec<Result<(), VerifyError>>>);

    impl VerificationService for Scripted {
        async fn submit(&self, _request: &VerificationRequest) -> Result<(), VerifyError> {
            self.0.lock().unwrap().remove(0)
        }
    }

    fn request() -> VerificationRequest {
        VerificationRequest {
            address: Address::with_last_byte(1),
            contract_name: "contracts/Vault.sol:Vault".into(),
            compiler_version: "0.8.26+commit.8a97fa7a".into(),
            standard_json_input: serde_json::json!({}),
            constructor_args: Bytes::new(),
        }
    }

    #[tokio::test]
    async fn test_already_verified_counts_as_success() {
        let verifier = Scripted(Mutex::new(vec![
            Err(VerifyError::AlreadyVerified),
            Err(VerifyError::Rejected("Fail - Unable to verify".into())),
        ]));

        assert!(submit(&verifier, &request()).await.is_ok());
        assert!(matches!(
            submit(&verifier, &request()).await,
            Err(VerifyError::Rejected(_))
        ));
    }
}
