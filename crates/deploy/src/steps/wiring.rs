//! Administrative calls that bind deployed contracts to each other.

use std::collections::BTreeMap;

use alloy_core::dyn_abi::DynSolType;
use alloy_core::primitives::{Address, Bytes};

use crate::abi::CallSignature;
use crate::client::{ChainClient, attach};
use crate::error::{DeployError, Phase, PhaseContext, PhaseError};
use crate::explorer::VerificationService;
use crate::pipeline::{Step, StepContext, StepReport, WireStage};
use crate::registry::{AddressRegistry, ContractName};
use crate::suite::{Probe, WiringCall, resolve_args};

/// Sends the suite's wiring calls, skipping those already in effect.
#[derive(Debug, Clone, Copy, Default)]
pub struct WireStep;

/// A wiring call with every address resolved.
struct ResolvedCall {
    target: ContractName,
    address: Address,
    calldata: Bytes,
    signature: String,
    probe: Option<ResolvedProbe>,
}

struct ResolvedProbe {
    calldata: Bytes,
    expected: Bytes,
}

fn resolve_probe(probe: &Probe, registry: &AddressRegistry) -> Result<ResolvedProbe, DeployError> {
    let sig = CallSignature::parse(&probe.call)?;
    let calldata = sig.encode_call(&resolve_args(&sig, &probe.args, registry)?)?;
    let returns = DynSolType::parse(&probe.returns)
        .map_err(|e| DeployError::config(format!("probe return type `{}`: {e}", probe.returns)))?;
    let expected = probe.expect.resolve(&returns, registry)?.abi_encode().into();
    Ok(ResolvedProbe { calldata, expected })
}

fn resolve(call: &WiringCall, registry: &AddressRegistry) -> Result<ResolvedCall, DeployError> {
    let address = registry.handle(&call.target)?;
    Ok(ResolvedCall {
        target: call.target.clone(),
        address,
        calldata: call.encode(registry)?,
        signature: call.signature()?.canonical(),
        probe: call
            .probe
            .as_ref()
            .map(|p| resolve_probe(p, registry))
            .transpose()?,
    })
}

/// Whether the target already reports the state the call would set.
async fn probe_matches<C: ChainClient>(
    client: &C,
    call: &ResolvedCall,
) -> Result<bool, DeployError> {
    let Some(probe) = &call.probe else {
        return Ok(false);
    };
    match client.call(call.address, probe.calldata.clone()).await {
        Ok(out) => Ok(out == probe.expected),
        Err(DeployError::TransactionReverted(reason)) => {
            tracing::debug!(
                contract = %call.target,
                %reason,
                "Probe reverted, treating as not applied"
            );
            Ok(false)
        }
        Err(err) => Err(err),
    }
}

/// The deploying key must own every target, including targets whose calls
/// were applied earlier: wiring after the hand-off is a phase-order error.
async fn check_authority<C: ChainClient>(
    client: &C,
    targets: &BTreeMap<ContractName, Address>,
    network: &str,
) -> Result<(), PhaseError> {
    let sender = client.sender();
    for (name, address) in targets {
        match attach(client, *address).owner().await {
            Ok(owner) if owner == sender => {}
            Ok(owner) => {
                return Err(DeployError::Authorization(format!(
                    "{address} is owned by {owner}, not the deploying key {sender}; \
                     wiring must run before ownership transfer"
                ))
                .in_phase(Phase::Wire, network)
                .for_contract(name));
            }
            // Not Ownable: the calls themselves will tell.
            Err(DeployError::TransactionReverted(_)) => {}
            Err(err) => return Err(err.in_phase(Phase::Wire, network).for_contract(name)),
        }
    }
    Ok(())
}

impl Step for WireStep {
    type Stage = WireStage;
    const PHASE: Phase = Phase::Wire;

    async fn run<C, V>(&self, ctx: &mut StepContext<'_, C, V>) -> Result<StepReport, PhaseError>
    where
        C: ChainClient,
        V: VerificationService,
    {
        let network = ctx.network();
        let suite = ctx.suite;
        let mut report = StepReport::new(Self::PHASE);

        // Resolve everything before sending anything.
        let mut calls = Vec::with_capacity(suite.wiring.len());
        for call in &suite.wiring {
            calls.push(
                resolve(call, ctx.store.registry()).contract(Self::PHASE, &network, &call.target)?,
            );
        }

        let targets: BTreeMap<ContractName, Address> = calls
            .iter()
            .map(|c| (c.target.clone(), c.address))
            .collect();
        check_authority(ctx.client, &targets, &network).await?;

        for call in calls {
            if ctx.store.registry().wiring_applied(&call.target, &call.calldata) {
                tracing::info!(
                    contract = %call.target,
                    call = %call.signature,
                    "Already wired, skipping"
                );
                report.skipped += 1;
                continue;
            }

            let applied = probe_matches(ctx.client, &call)
                .await
                .contract(Self::PHASE, &network, &call.target)?;
            if applied {
                tracing::info!(
                    contract = %call.target,
                    call = %call.signature,
                    "Probe shows call in effect, skipping"
                );
                ctx.store
                    .record(|r| {
                        r.record_wiring(&call.target, call.calldata.clone(), None);
                        Ok(())
                    })
                    .contract(Self::PHASE, &network, &call.target)?;
                report.skipped += 1;
                continue;
            }

            let receipt = attach(ctx.client, call.address)
                .invoke_raw(call.calldata.clone())
                .await
                .contract(Self::PHASE, &network, &call.target)?;
            ctx.store
                .record(|r| {
                    r.record_wiring(&call.target, call.calldata.clone(), Some(receipt.tx_hash));
                    Ok(())
                })
                .contract(Self::PHASE, &network, &call.target)?;

            tracing::info!(
                contract = %call.target,
                call = %call.signature,
                tx_hash = %receipt.tx_hash,
                "Wiring call applied"
            );
            report.transactions += 1;
        }

        Ok(report)
    }
}
