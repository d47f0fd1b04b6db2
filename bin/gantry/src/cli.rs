use std::path::PathBuf;

use alloy_core::primitives::Bytes;
use clap::{Args, Parser, Subcommand};
use gantry_deploy::UpgradeMode;
use serde::Serialize;
use tracing::level_filters::LevelFilter;
use url::Url;

#[derive(Parser)]
#[command(name = "gantry")]
#[command(
    author,
    version,
    about = "Deploy, wire, hand off and upgrade proxied contract suites, one network at a time"
)]
pub struct Cli {
    /// The verbosity level.
    #[arg(short, long, env = "GANTRY_VERBOSITY", default_value_t = LevelFilter::INFO, global = true)]
    pub verbosity: LevelFilter,

    /// Settings file. Missing files are ignored.
    #[arg(short, long, env = "GANTRY_CONFIG", default_value = "gantry.toml", global = true)]
    pub config: PathBuf,

    #[command(flatten)]
    pub overrides: Overrides,

    /// The phase to run. Nothing runs without one.
    #[command(subcommand)]
    pub command: Command,
}

/// Settings given on the command line. They take precedence over the settings
/// file and `GANTRY_*` environment variables.
#[derive(Debug, Clone, Default, Args, Serialize)]
pub struct Overrides {
    /// Registry file of the target network.
    #[arg(long, global = true)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registry: Option<PathBuf>,

    /// Suite definition.
    #[arg(long, global = true)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suite: Option<PathBuf>,

    /// Root of the hardhat artifacts.
    #[arg(long, global = true)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifacts: Option<PathBuf>,

    /// RPC endpoint. Defaults to the network's public endpoint.
    #[arg(long, global = true)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rpc_url: Option<Url>,

    /// Blocks to wait for after inclusion.
    #[arg(long, global = true)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confirmations: Option<u64>,

    /// Submit implementations for verification right after deploying them.
    #[arg(long, global = true)]
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub verify_after_deploy: bool,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Deploy every suite contract missing from the registry.
    Deploy,

    /// Apply the suite's wiring calls.
    Wire,

    /// Hand ownership of every flagged contract to governance. Terminal.
    TransferOwnership,

    /// deploy, then wire, then transfer-ownership.
    Provision,

    /// Deploy new implementations behind existing proxies.
    Upgrade {
        /// `repoint` switches the proxy in the same run, `implementation-only`
        /// records the implementation as pending.
        #[arg(long)]
        mode: UpgradeMode,

        /// Contracts to upgrade. All proxied contracts when omitted.
        #[arg(long = "contract")]
        contracts: Vec<String>,

        /// Call forwarded to the new implementation with the repoint.
        #[arg(long)]
        calldata: Option<Bytes>,
    },

    /// Repoint proxies to their pending implementations.
    Repoint {
        #[arg(long = "contract")]
        contracts: Vec<String>,

        #[arg(long)]
        calldata: Option<Bytes>,
    },

    /// Record pending implementations that governance already repointed to.
    Reconcile,

    /// Submit sources to the network's explorer.
    Verify {
        /// Contracts to verify. Contracts flagged `verify` when omitted.
        #[arg(long = "contract")]
        contracts: Vec<String>,
    },

    /// Show the inferred lifecycle of every contract.
    Status,

    /// List built-in network profiles.
    Networks,
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_a_phase_is_required() {
        assert!(Cli::try_parse_from(["gantry"]).is_err());
    }

    #[test]
    fn test_upgrade_requires_an_explicit_mode() {
        assert!(Cli::try_parse_from(["gantry", "upgrade"]).is_err());

        let cli = Cli::try_parse_from([
            "gantry",
            "upgrade",
            "--mode",
            "implementation-only",
            "--contract",
            "GatewaySend",
            "--registry",
            "networks/base.toml",
        ])
        .unwrap();
        match cli.command {
            Command::Upgrade {
                mode, contracts, ..
            } => {
                assert_eq!(mode, UpgradeMode::ImplementationOnly);
                assert_eq!(contracts, vec!["GatewaySend".to_string()]);
            }
            _ => panic!("expected upgrade"),
        }
        assert_eq!(cli.overrides.registry, Some(PathBuf::from("networks/base.toml")));
    }
}
