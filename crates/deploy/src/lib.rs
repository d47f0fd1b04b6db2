//! gantry-deploy - Deployment and upgrade orchestration for upgradeable contract suites.
//!
//! This crate drives a suite of mutually dependent proxied contracts through
//! deployment, wiring and the hand-off to governance, one network at a time,
//! and later pushes new implementations behind the same proxies. Every
//! confirmed action is written to the network's registry file before the next
//! one starts, so an interrupted run resumes without duplicating state.

pub mod abi;
pub mod artifacts;
pub mod client;
mod error;
pub mod explorer;
pub mod network;
mod orchestrator;
pub mod pipeline;
pub mod registry;
pub mod steps;
mod store;
pub mod suite;

pub use artifacts::{Artifact, ArtifactStore};
pub use client::{ChainClient, JsonRpcClient, LocalSigner, RpcOptions};
pub use error::{DeployError, Phase, PhaseError, VerifyError};
pub use explorer::{EtherscanVerifier, VerificationRequest, VerificationService};
pub use network::{Network, NetworkProfile};
pub use orchestrator::{Orchestrator, StatusRow};
pub use registry::{AddressRegistry, ContractName, ContractRecord, ContractStatus, Role};
pub use steps::UpgradeMode;
pub use store::RegistryStore;
pub use suite::{ProxyKind, Suite};
