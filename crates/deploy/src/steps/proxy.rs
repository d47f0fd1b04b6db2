//! Deployment of proxies, their implementations, and plain contracts.

use alloy_core::dyn_abi::DynSolValue;
use alloy_core::primitives::{Address, Bytes};

use super::planner::{Plan, plan};
use super::verify;
use crate::abi;
use crate::client::{ChainClient, attach, deploy_and_wait};
use crate::error::{DeployError, Phase, PhaseContext, PhaseError};
use crate::explorer::VerificationService;
use crate::pipeline::{DeployStage, Step, StepContext, StepReport};
use crate::suite::{ContractSpec, ProxyKind};

/// Deploys every contract of the suite that the registry does not know yet.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeployStep;

impl Step for DeployStep {
    type Stage = DeployStage;
    const PHASE: Phase = Phase::Deploy;

    async fn run<C, V>(&self, ctx: &mut StepContext<'_, C, V>) -> Result<StepReport, PhaseError>
    where
        C: ChainClient,
        V: VerificationService,
    {
        let network = ctx.network();
        let suite = ctx.suite;
        let order = suite.deploy_order().phase(Self::PHASE, &network)?;
        let mut report = StepReport::new(Self::PHASE);

        for spec in order {
            let decision = plan(suite, ctx.store.registry(), &spec.name)
                .contract(Self::PHASE, &network, &spec.name)?;

            match decision {
                Plan::Reuse(address) => {
                    tracing::info!(contract = %spec.name, %address, "Already deployed, reusing");
                    report.skipped += 1;
                    if spec.verify {
                        verify_reused(ctx, spec).await;
                    }
                }
                Plan::Deploy { implementation } => {
                    let sent = if spec.is_proxied() {
                        deploy_proxied(ctx, spec, implementation).await
                    } else {
                        deploy_plain(ctx, spec).await
                    };
                    report.transactions += sent.contract(Self::PHASE, &network, &spec.name)?;
                }
            }
        }

        Ok(report)
    }
}

/// Deploy implementation (unless resumed) and proxy. Returns the number of transactions.
async fn deploy_proxied<C, V>(
    ctx: &mut StepContext<'_, C, V>,
    spec: &ContractSpec,
    resumed: Option<Address>,
) -> Result<usize, DeployError>
where
    C: ChainClient,
    V: VerificationService,
{
    // Everything that can fail without a transaction is checked first.
    let init_data = spec.encode_args(ctx.store.registry())?;
    let proxy_artifact = ctx.artifacts.load(&ctx.suite.proxy.artifact)?;

    let mut transactions = 0;
    let implementation = match resumed {
        Some(implementation) => {
            tracing::info!(
                contract = %spec.name,
                %implementation,
                "Resuming with recorded implementation"
            );
            implementation
        }
        None => {
            let artifact = ctx.artifacts.load(&spec.artifact)?;
            let (implementation, tx) = deploy_and_wait(ctx.client, artifact.bytecode).await?;
            ctx.store
                .record(|r| r.record_implementation(&spec.name, implementation, tx))?;
            tracing::info!(
                contract = %spec.name,
                %implementation,
                tx_hash = %tx,
                "Implementation deployed"
            );
            transactions += 1;
            implementation
        }
    };

    let constructor = ctx.suite.proxy.kind.constructor();
    let constructor_args = match ctx.suite.proxy.kind {
        ProxyKind::Transparent => constructor.encode_args(&[
            DynSolValue::Address(implementation),
            DynSolValue::Address(ctx.client.sender()),
            DynSolValue::Bytes(init_data.to_vec()),
        ])?,
        ProxyKind::Uups => constructor.encode_args(&[
            DynSolValue::Address(implementation),
            DynSolValue::Bytes(init_data.to_vec()),
        ])?,
    };

    let (proxy, tx) = deploy_and_wait(
        ctx.client,
        abi::init_code(&proxy_artifact.bytecode, &constructor_args),
    )
    .await?;
    transactions += 1;
    ctx.store
        .record(|r| r.record_proxy(&spec.name, proxy, implementation, tx))?;

    tracing::info!(
        contract = %spec.name,
        %proxy,
        %implementation,
        tx_hash = %tx,
        "Proxy deployed"
    );

    // The proxy is recorded whatever the slot says; a mismatch fails the run.
    let live = attach(ctx.client, proxy).implementation().await?;
    if live != implementation {
        return Err(DeployError::TransactionReverted(format!(
            "proxy {proxy} points at {live}, expected implementation {implementation}"
        )));
    }

    if spec.verify {
        verify::best_effort(ctx, &spec.artifact, implementation, Bytes::new()).await;
    }
    Ok(transactions)
}

async fn deploy_plain<C, V>(
    ctx: &mut StepContext<'_, C, V>,
    spec: &ContractSpec,
) -> Result<usize, DeployError>
where
    C: ChainClient,
    V: VerificationService,
{
    let constructor_args = spec.encode_args(ctx.store.registry())?;
    let artifact = ctx.artifacts.load(&spec.artifact)?;

    let (address, tx) =
        deploy_and_wait(ctx.client, abi::init_code(&artifact.bytecode, &constructor_args)).await?;
    ctx.store.record(|r| r.record_plain(&spec.name, address, tx))?;

    tracing::info!(contract = %spec.name, %address, tx_hash = %tx, "Contract deployed");

    if spec.verify {
        verify::best_effort(ctx, &spec.artifact, address, constructor_args).await;
    }
    Ok(1)
}

/// Best-effort verification of a contract an earlier run deployed.
async fn verify_reused<C, V>(ctx: &mut StepContext<'_, C, V>, spec: &ContractSpec)
where
    C: ChainClient,
    V: VerificationService,
{
    match verify::target(spec, ctx.store.registry()) {
        Ok((artifact, address, constructor_args)) => {
            verify::best_effort(ctx, &artifact, address, constructor_args).await;
        }
        Err(err) => {
            tracing::warn!(contract = %spec.name, error = %err, "Cannot verify reused contract");
        }
    }
}
