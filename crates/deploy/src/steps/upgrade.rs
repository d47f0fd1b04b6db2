//! New implementations behind existing proxies.
//!
//! An upgrade either repoints the proxy in the same invocation
//! ([`UpgradeMode::Repoint`]) or only deploys the implementation and records it
//! as pending ([`UpgradeMode::ImplementationOnly`]), leaving the repoint to a
//! later [`repoint`] or to governance, followed by [`reconcile`].

use alloy_core::primitives::{Address, Bytes};

use super::verify;
use crate::abi;
use crate::client::{ChainClient, attach, deploy_and_wait};
use crate::error::{DeployError, Phase, PhaseContext, PhaseError};
use crate::explorer::VerificationService;
use crate::pipeline::{StepContext, StepReport};
use crate::registry::{AddressRegistry, ContractName};
use crate::suite::{ContractSpec, ProxyKind, Suite};

/// How an upgrade treats the proxy. Always chosen by the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
#[strum(serialize_all = "kebab-case")]
pub enum UpgradeMode {
    /// Deploy the implementation and repoint the proxy to it.
    Repoint,
    /// Deploy the implementation and record it as pending.
    ImplementationOnly,
}

/// Proxied contracts named, or all of them.
fn proxied_targets<'s>(
    suite: &'s Suite,
    names: &[ContractName],
) -> Result<Vec<&'s ContractSpec>, DeployError> {
    let specs: Vec<&ContractSpec> = if names.is_empty() {
        suite.contracts.iter().filter(|c| c.is_proxied()).collect()
    } else {
        names
            .iter()
            .map(|n| suite.contract(n))
            .collect::<Result<_, _>>()?
    };

    if let Some(plain) = specs.iter().find(|c| !c.is_proxied()) {
        return Err(DeployError::config(format!(
            "`{}` is not behind a proxy and cannot be upgraded",
            plain.name
        )));
    }
    Ok(specs)
}

fn proxy_of(registry: &AddressRegistry, name: &ContractName) -> Result<Address, DeployError> {
    registry
        .deployment(name)
        .and_then(|d| d.proxy)
        .ok_or_else(|| {
            DeployError::config(format!(
                "`{name}` has no proxy on {}, deploy it first",
                registry.network.name
            ))
        })
}

/// Check that the deploying key may repoint `proxy` and return the address
/// the repoint must be sent to.
async fn upgrade_authority<C: ChainClient>(
    client: &C,
    kind: ProxyKind,
    proxy: Address,
) -> Result<Address, DeployError> {
    let authority = match kind {
        ProxyKind::Transparent => attach(client, proxy).admin().await?,
        ProxyKind::Uups => proxy,
    };
    let owner = attach(client, authority).owner().await?;
    let sender = client.sender();
    if owner != sender {
        return Err(DeployError::Authorization(format!(
            "upgrades of {proxy} are controlled by {owner} (through {authority}), not the deploying key {sender}"
        )));
    }
    Ok(authority)
}

fn repoint_calldata(
    kind: ProxyKind,
    proxy: Address,
    implementation: Address,
    data: Bytes,
) -> Bytes {
    match kind {
        ProxyKind::Transparent => abi::upgrade_and_call_calldata(proxy, implementation, data),
        ProxyKind::Uups => abi::upgrade_to_and_call_calldata(implementation, data),
    }
}

/// Send the repoint and record the implementation read back from the proxy.
async fn send_repoint<C, V>(
    ctx: &mut StepContext<'_, C, V>,
    name: &ContractName,
    proxy: Address,
    authority: Address,
    implementation: Address,
    data: &Bytes,
) -> Result<(), DeployError>
where
    C: ChainClient,
    V: VerificationService,
{
    let kind = ctx.suite.proxy.kind;
    let receipt = attach(ctx.client, authority)
        .invoke_raw(repoint_calldata(kind, proxy, implementation, data.clone()))
        .await?;

    let live = attach(ctx.client, proxy).implementation().await?;
    if live != implementation {
        return Err(DeployError::TransactionReverted(format!(
            "proxy {proxy} points at {live} after repointing to {implementation}"
        )));
    }
    ctx.store
        .record(|r| r.record_upgrade(name, implementation, receipt.tx_hash))?;

    tracing::info!(
        contract = %name,
        %proxy,
        %implementation,
        tx_hash = %receipt.tx_hash,
        "Proxy repointed"
    );
    Ok(())
}

/// Deploy new implementations for `names` (all proxied contracts when empty).
///
/// `data` is forwarded with the repoint and ignored for implementation-only upgrades.
pub async fn upgrade<C, V>(
    ctx: &mut StepContext<'_, C, V>,
    mode: UpgradeMode,
    names: &[ContractName],
    data: &Bytes,
) -> Result<StepReport, PhaseError>
where
    C: ChainClient,
    V: VerificationService,
{
    const PHASE: Phase = Phase::Upgrade;
    let network = ctx.network();
    let suite = ctx.suite;
    let kind = suite.proxy.kind;
    let specs = proxied_targets(suite, names).phase(PHASE, &network)?;

    let mut planned = Vec::with_capacity(specs.len());
    for spec in specs {
        let proxy =
            proxy_of(ctx.store.registry(), &spec.name).contract(PHASE, &network, &spec.name)?;
        let artifact = ctx
            .artifacts
            .load(spec.upgrade_artifact())
            .contract(PHASE, &network, &spec.name)?;
        // Fail before deploying anything the key could not put behind the proxy.
        let authority = match mode {
            UpgradeMode::Repoint => Some(
                upgrade_authority(ctx.client, kind, proxy)
                    .await
                    .contract(PHASE, &network, &spec.name)?,
            ),
            UpgradeMode::ImplementationOnly => None,
        };
        planned.push((spec, proxy, artifact, authority));
    }

    let mut report = StepReport::new(PHASE);
    for (spec, proxy, artifact, authority) in planned {
        let (implementation, tx) = deploy_and_wait(ctx.client, artifact.bytecode)
            .await
            .contract(PHASE, &network, &spec.name)?;
        // Recorded as pending first so a failed repoint never orphans it.
        ctx.store
            .record(|r| r.record_pending(&spec.name, implementation, tx))
            .contract(PHASE, &network, &spec.name)?;
        report.transactions += 1;

        tracing::info!(
            contract = %spec.name,
            %proxy,
            %implementation,
            tx_hash = %tx,
            mode = %mode,
            "Implementation deployed"
        );

        if let Some(authority) = authority {
            send_repoint(ctx, &spec.name, proxy, authority, implementation, data)
                .await
                .contract(PHASE, &network, &spec.name)?;
            report.transactions += 1;
        }

        if spec.verify {
            verify::best_effort(ctx, spec.upgrade_artifact(), implementation, Bytes::new()).await;
        }
    }

    Ok(report)
}

/// Repoint proxies to their pending implementations.
///
/// With no names, every contract with a pending implementation is repointed.
pub async fn repoint<C, V>(
    ctx: &mut StepContext<'_, C, V>,
    names: &[ContractName],
    data: &Bytes,
) -> Result<StepReport, PhaseError>
where
    C: ChainClient,
    V: VerificationService,
{
    const PHASE: Phase = Phase::Repoint;
    let network = ctx.network();
    let suite = ctx.suite;
    let kind = suite.proxy.kind;
    let specs = proxied_targets(suite, names).phase(PHASE, &network)?;

    let mut planned = Vec::new();
    for spec in specs {
        let deployment = ctx.store.registry().deployment(&spec.name).cloned().unwrap_or_default();
        let pending = match (deployment.pending_implementation, names.is_empty()) {
            (Some(pending), _) => pending,
            (None, true) => continue,
            (None, false) => {
                return Err(DeployError::config(format!(
                    "`{}` has no pending implementation to repoint to",
                    spec.name
                ))
                .in_phase(PHASE, &network)
                .for_contract(&spec.name));
            }
        };
        let proxy =
            proxy_of(ctx.store.registry(), &spec.name).contract(PHASE, &network, &spec.name)?;
        let authority = upgrade_authority(ctx.client, kind, proxy)
            .await
            .contract(PHASE, &network, &spec.name)?;
        planned.push((&spec.name, proxy, authority, pending));
    }

    let mut report = StepReport::new(PHASE);
    for (name, proxy, authority, pending) in planned {
        send_repoint(ctx, name, proxy, authority, pending, data)
            .await
            .contract(PHASE, &network, name)?;
        report.transactions += 1;
    }
    Ok(report)
}

/// Promote pending implementations that the proxies already point at.
///
/// Returns the contracts whose registry entry changed.
pub async fn reconcile<C, V>(
    ctx: &mut StepContext<'_, C, V>,
) -> Result<Vec<ContractName>, PhaseError>
where
    C: ChainClient,
    V: VerificationService,
{
    const PHASE: Phase = Phase::Reconcile;
    let network = ctx.network();
    let suite = ctx.suite;
    let mut promoted = Vec::new();

    for spec in suite.contracts.iter().filter(|c| c.is_proxied()) {
        let deployment = ctx.store.registry().deployment(&spec.name).cloned().unwrap_or_default();
        let (Some(proxy), Some(pending)) = (deployment.proxy, deployment.pending_implementation)
        else {
            continue;
        };

        let live = attach(ctx.client, proxy)
            .implementation()
            .await
            .contract(PHASE, &network, &spec.name)?;
        if live != pending {
            tracing::info!(contract = %spec.name, %pending, %live, "Proxy not repointed yet");
            continue;
        }

        ctx.store
            .record(|r| r.promote_pending(&spec.name))
            .contract(PHASE, &network, &spec.name)?;
        tracing::info!(
            contract = %spec.name,
            %proxy,
            implementation = %pending,
            "Pending implementation promoted"
        );
        promoted.push(spec.name.clone());
    }

    Ok(promoted)
}
