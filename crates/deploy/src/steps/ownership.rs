//! Hand-off of administrative control to governance.

use alloy_core::primitives::Address;

use crate::abi;
use crate::client::{ChainClient, attach};
use crate::error::{DeployError, Phase, PhaseContext, PhaseError};
use crate::explorer::VerificationService;
use crate::pipeline::{Step, StepContext, StepReport, TransferStage};
use crate::registry::{Action, ContractName};
use crate::suite::ProxyKind;

/// Transfers ownership of every flagged contract (and the `ProxyAdmin` of
/// transparent proxies) to the suite's governance role.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransferStep;

/// One `Ownable` contract to hand off.
struct Transfer {
    contract: ContractName,
    action: Action,
    address: Address,
    /// `false` when governance already owns it.
    needed: bool,
}

/// Look up the owner and decide whether a transfer is needed.
async fn inspect<C: ChainClient>(
    client: &C,
    contract: &ContractName,
    action: Action,
    address: Address,
    governance: Address,
) -> Result<Transfer, DeployError> {
    let owner = attach(client, address).owner().await?;
    let sender = client.sender();

    let needed = if owner == governance {
        false
    } else if owner == sender {
        true
    } else {
        return Err(DeployError::Authorization(format!(
            "{address} is owned by {owner}, neither the deploying key {sender} nor governance {governance}"
        )));
    };

    Ok(Transfer {
        contract: contract.clone(),
        action,
        address,
        needed,
    })
}

impl Step for TransferStep {
    type Stage = TransferStage;
    const PHASE: Phase = Phase::TransferOwnership;

    async fn run<C, V>(&self, ctx: &mut StepContext<'_, C, V>) -> Result<StepReport, PhaseError>
    where
        C: ChainClient,
        V: VerificationService,
    {
        let network = ctx.network();
        let suite = ctx.suite;
        let governance = ctx
            .store
            .registry()
            .input(&suite.governance)
            .phase(Self::PHASE, &network)?;
        let order = suite.deploy_order().phase(Self::PHASE, &network)?;

        // Inspect every owner before the first transfer so a wrong key fails
        // without leaving the suite half handed off.
        let mut transfers = Vec::new();
        for spec in order.into_iter().filter(|c| c.transfer_ownership) {
            let handle = ctx
                .store
                .registry()
                .handle(&spec.name)
                .contract(Self::PHASE, &network, &spec.name)?;

            if spec.is_proxied() && suite.proxy.kind == ProxyKind::Transparent {
                let admin = attach(ctx.client, handle)
                    .admin()
                    .await
                    .contract(Self::PHASE, &network, &spec.name)?;
                transfers.push(
                    inspect(ctx.client, &spec.name, Action::TransferProxyAdmin, admin, governance)
                        .await
                        .contract(Self::PHASE, &network, &spec.name)?,
                );
            }

            transfers.push(
                inspect(ctx.client, &spec.name, Action::TransferOwnership, handle, governance)
                    .await
                    .contract(Self::PHASE, &network, &spec.name)?,
            );
        }

        let mut report = StepReport::new(Self::PHASE);
        for transfer in transfers {
            if !transfer.needed {
                tracing::info!(
                    contract = %transfer.contract,
                    action = %transfer.action,
                    %governance,
                    "Governance already owns it, skipping"
                );
                report.skipped += 1;
                continue;
            }

            let receipt = attach(ctx.client, transfer.address)
                .invoke_raw(abi::transfer_ownership_calldata(governance))
                .await
                .contract(Self::PHASE, &network, &transfer.contract)?;
            ctx.store
                .record(|r| {
                    r.record_transfer(
                        &transfer.contract,
                        transfer.action,
                        governance,
                        receipt.tx_hash,
                    );
                    Ok(())
                })
                .contract(Self::PHASE, &network, &transfer.contract)?;

            tracing::info!(
                contract = %transfer.contract,
                action = %transfer.action,
                address = %transfer.address,
                %governance,
                tx_hash = %receipt.tx_hash,
                "Ownership transferred"
            );
            report.transactions += 1;
        }

        Ok(report)
    }
}
