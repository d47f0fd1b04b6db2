//! gantry deploys suites of proxied contracts and keeps their registries in sync.

mod cli;
mod settings;

use alloy_core::primitives::Address;
use anyhow::{Context, Result};
use clap::Parser;
use comfy_table::Table;
use gantry_deploy::{
    ArtifactStore, ChainClient, ContractName, EtherscanVerifier, JsonRpcClient, LocalSigner,
    Network, Orchestrator, RegistryStore, StatusRow, Suite, VerificationService,
    pipeline::StepReport,
};
use strum::IntoEnumIterator;
use url::Url;

use cli::{Cli, Command};
use settings::Settings;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize the logger.
    tracing_subscriber::fmt()
        .with_max_level(cli.verbosity)
        .init();

    if let Command::Networks = cli.command {
        print_networks();
        return Ok(());
    }

    let settings = Settings::load(&cli.config, &cli.overrides)?;

    let store = RegistryStore::open(settings.registry()?)?;
    let suite = Suite::load_from_file(settings.suite()?)?;
    let profile = store.registry().network.clone();

    let rpc_url = match &settings.rpc_url {
        Some(url) => url.clone(),
        None => profile
            .default_rpc_url()
            .map(Url::parse)
            .transpose()?
            .with_context(|| {
                format!("No rpc_url configured and no default RPC for {}", profile.name)
            })?,
    };
    let signer = settings
        .private_key
        .as_deref()
        .map(LocalSigner::from_hex)
        .transpose()?;
    let client = JsonRpcClient::connect(rpc_url, signer, settings.rpc_options()).await?;

    let orchestrator = Orchestrator::new(
        client,
        store,
        suite,
        ArtifactStore::new(&settings.artifacts),
    )
    .verify_after_deploy(settings.verify_after_deploy);

    match (&settings.explorer_api_key, profile.verification_endpoint()) {
        (Some(key), Some(endpoint)) => {
            let verifier = EtherscanVerifier::new(Url::parse(&endpoint)?, key.clone())?;
            run(orchestrator.with_verifier(verifier), cli.command).await
        }
        _ => {
            if settings.verify_after_deploy {
                tracing::warn!(
                    network = %profile.name,
                    "No explorer API key or endpoint, verification disabled"
                );
            }
            run(orchestrator, cli.command).await
        }
    }
}

async fn run<C, V>(mut orchestrator: Orchestrator<C, V>, command: Command) -> Result<()>
where
    C: ChainClient,
    V: VerificationService,
{
    match command {
        Command::Deploy => log_report(&orchestrator.deploy().await?),
        Command::Wire => log_report(&orchestrator.wire().await?),
        Command::TransferOwnership => log_report(&orchestrator.transfer_ownership().await?),
        Command::Provision => orchestrator.provision().await?.iter().for_each(log_report),
        Command::Upgrade {
            mode,
            contracts,
            calldata,
        } => {
            let report = orchestrator
                .upgrade(mode, &names(contracts), &calldata.unwrap_or_default())
                .await?;
            log_report(&report);
        }
        Command::Repoint {
            contracts,
            calldata,
        } => {
            let report = orchestrator
                .repoint(&names(contracts), &calldata.unwrap_or_default())
                .await?;
            log_report(&report);
        }
        Command::Reconcile => {
            let promoted = orchestrator.reconcile().await?;
            tracing::info!(promoted = promoted.len(), "Reconcile complete");
        }
        Command::Verify { contracts } => log_report(&orchestrator.verify(&names(contracts)).await?),
        Command::Status => print_status(&orchestrator.status().await?),
        Command::Networks => print_networks(),
    }
    Ok(())
}

fn names(contracts: Vec<String>) -> Vec<ContractName> {
    contracts.into_iter().map(ContractName::from).collect()
}

fn log_report(report: &StepReport) {
    tracing::info!(
        phase = %report.phase,
        transactions = report.transactions,
        skipped = report.skipped,
        "Done"
    );
}

fn display(address: Option<Address>) -> String {
    address.map(|a| a.to_string()).unwrap_or_else(|| "-".to_string())
}

fn print_status(rows: &[StatusRow]) {
    let mut table = Table::new();
    table.set_header(vec![
        "Contract",
        "Status",
        "Proxy",
        "Implementation",
        "Pending",
        "Owner",
    ]);
    for row in rows {
        table.add_row(vec![
            row.record.name.to_string(),
            row.record.status.to_string(),
            display(row.record.proxy),
            display(row.record.implementation),
            display(row.record.pending_implementation),
            display(row.owner),
        ]);
    }
    println!("{table}");
}

fn print_networks() {
    let mut table = Table::new();
    table.set_header(vec!["Network", "Chain ID", "Explorer", "Default RPC"]);
    for network in Network::iter() {
        table.add_row(vec![
            network.to_string(),
            network.chain_id().to_string(),
            network.explorer_url().to_string(),
            network.default_rpc_url().unwrap_or("-").to_string(),
        ]);
    }
    println!("{table}");
}

