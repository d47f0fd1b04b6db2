//! Per-network address registry.
//!
//! The registry splits addresses into human-curated `inputs` (by role) and
//! orchestrator-owned `outputs` (by logical contract). Output slots only move
//! forward: a populated proxy is never replaced, and an implementation only
//! changes through an explicit upgrade.

use std::collections::BTreeMap;

use alloy_core::primitives::{Address, Bytes, TxHash};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::DeployError;
use crate::network::NetworkProfile;

/// Name of an externally supplied address (gateway, multisig, bot, ...).
#[derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    derive_more::Display,
    derive_more::From,
    derive_more::Deref,
)]
#[serde(transparent)]
pub struct Role(String);

impl From<&str> for Role {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Name of a contract the orchestrator deploys and owns the address of.
#[derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    derive_more::Display,
    derive_more::From,
    derive_more::Deref,
)]
#[serde(transparent)]
pub struct ContractName(String);

impl From<&str> for ContractName {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Addresses recorded for one logical contract.
///
/// Proxied contracts fill `proxy` and `implementation`; plain contracts fill `address`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deployment {
    #[serde(
        default,
        deserialize_with = "deserialize_optional_address",
        skip_serializing_if = "Option::is_none"
    )]
    pub proxy: Option<Address>,
    #[serde(
        default,
        deserialize_with = "deserialize_optional_address",
        skip_serializing_if = "Option::is_none"
    )]
    pub implementation: Option<Address>,
    /// Deployed by an implementation-only upgrade and not yet behind the proxy.
    #[serde(
        default,
        deserialize_with = "deserialize_optional_address",
        skip_serializing_if = "Option::is_none"
    )]
    pub pending_implementation: Option<Address>,
    #[serde(
        default,
        deserialize_with = "deserialize_optional_address",
        skip_serializing_if = "Option::is_none"
    )]
    pub address: Option<Address>,
}

impl Deployment {
    /// The address other contracts and callers talk to.
    pub fn handle(&self) -> Option<Address> {
        self.proxy.or(self.address)
    }

    fn is_empty(&self) -> bool {
        self.proxy.is_none()
            && self.implementation.is_none()
            && self.pending_implementation.is_none()
            && self.address.is_none()
    }
}

/// Empty strings in hand-edited registries mean "not deployed".
fn deserialize_optional_address<'de, D>(deserializer: D) -> Result<Option<Address>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(s) => s.parse().map(Some).map_err(serde::de::Error::custom),
    }
}

/// Inputs with an empty address are treated as absent.
fn deserialize_inputs<'de, D>(deserializer: D) -> Result<BTreeMap<Role, Address>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: BTreeMap<String, String> = BTreeMap::deserialize(deserializer)?;
    raw.into_iter()
        .filter(|(_, v)| !v.trim().is_empty())
        .map(|(k, v)| {
            v.trim()
                .parse()
                .map(|addr| (Role::from(k.as_str()), addr))
                .map_err(|e| serde::de::Error::custom(format!("input {k}: {e}")))
        })
        .collect()
}

/// Kind of state change recorded in the history log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum Action {
    DeployImplementation,
    DeployProxy,
    DeployPlain,
    Wire,
    TransferOwnership,
    TransferProxyAdmin,
    StageImplementation,
    Upgrade,
    Reconcile,
}

/// One line of the append-only audit log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// RFC 3339 timestamp.
    pub at: String,
    pub action: Action,
    pub contract: ContractName,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx: Option<TxHash>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calldata: Option<Bytes>,
}

impl HistoryEntry {
    fn now(action: Action, contract: &ContractName) -> Self {
        Self {
            at: chrono::Utc::now().to_rfc3339(),
            action,
            contract: contract.clone(),
            address: None,
            tx: None,
            calldata: None,
        }
    }
}

/// Registry of one network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressRegistry {
    pub network: NetworkProfile,
    /// Literal initializer values that differ per network (gas limits, fees, ...).
    #[serde(default)]
    pub params: BTreeMap<String, String>,
    #[serde(default, deserialize_with = "deserialize_inputs")]
    pub inputs: BTreeMap<Role, Address>,
    #[serde(default)]
    pub outputs: BTreeMap<ContractName, Deployment>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub history: Vec<HistoryEntry>,
}

impl AddressRegistry {
    pub fn new(network: NetworkProfile) -> Self {
        Self {
            network,
            params: BTreeMap::new(),
            inputs: BTreeMap::new(),
            outputs: BTreeMap::new(),
            history: Vec::new(),
        }
    }

    pub fn from_toml_str(content: &str) -> Result<Self, DeployError> {
        toml::from_str(content)
            .map_err(|e| DeployError::Registry(format!("failed to parse registry: {e}")))
    }

    /// Serialize for persistence. Empty output slots are dropped.
    pub fn to_toml_string(&self) -> Result<String, DeployError> {
        let mut copy = self.clone();
        copy.outputs.retain(|_, d| !d.is_empty());
        toml::to_string_pretty(&copy)
            .map_err(|e| DeployError::Registry(format!("failed to serialize registry: {e}")))
    }

    pub fn input(&self, role: &Role) -> Result<Address, DeployError> {
        self.inputs.get(role).copied().ok_or_else(|| {
            DeployError::config(format!(
                "input address `{role}` is not set for {}",
                self.network.name
            ))
        })
    }

    pub fn param(&self, name: &str) -> Result<&str, DeployError> {
        self.params.get(name).map(String::as_str).ok_or_else(|| {
            DeployError::config(format!(
                "param `{name}` is not set for {}",
                self.network.name
            ))
        })
    }

    pub fn deployment(&self, name: &ContractName) -> Option<&Deployment> {
        self.outputs.get(name)
    }

    /// Handle address of a contract, or a configuration error if it was never deployed.
    pub fn handle(&self, name: &ContractName) -> Result<Address, DeployError> {
        self.deployment(name)
            .and_then(Deployment::handle)
            .ok_or_else(|| {
                DeployError::config(format!(
                    "contract `{name}` has no deployed address on {}",
                    self.network.name
                ))
            })
    }

    fn slot(&mut self, name: &ContractName) -> &mut Deployment {
        self.outputs.entry(name.clone()).or_default()
    }

    fn push(&mut self, entry: HistoryEntry) {
        self.history.push(entry);
    }

    /// Record an implementation deployed ahead of its proxy.
    pub fn record_implementation(
        &mut self,
        name: &ContractName,
        implementation: Address,
        tx: TxHash,
    ) -> Result<(), DeployError> {
        let slot = self.slot(name);
        if let Some(proxy) = slot.proxy {
            return Err(DeployError::Registry(format!(
                "`{name}` already has proxy {proxy}, its implementation changes only through an upgrade"
            )));
        }
        match slot.implementation {
            Some(existing) if existing != implementation => {
                return Err(DeployError::Registry(format!(
                    "`{name}` already records implementation {existing}"
                )));
            }
            _ => slot.implementation = Some(implementation),
        }

        let mut entry = HistoryEntry::now(Action::DeployImplementation, name);
        entry.address = Some(implementation);
        entry.tx = Some(tx);
        self.push(entry);
        Ok(())
    }

    /// Record a confirmed proxy and the implementation read back from it.
    pub fn record_proxy(
        &mut self,
        name: &ContractName,
        proxy: Address,
        implementation: Address,
        tx: TxHash,
    ) -> Result<(), DeployError> {
        let slot = self.slot(name);
        match slot.proxy {
            Some(existing) if existing == proxy => return Ok(()),
            Some(existing) => {
                return Err(DeployError::Registry(format!(
                    "refusing to replace proxy {existing} of `{name}` with {proxy}"
                )));
            }
            None => {}
        }
        slot.proxy = Some(proxy);
        slot.implementation = Some(implementation);

        let mut entry = HistoryEntry::now(Action::DeployProxy, name);
        entry.address = Some(proxy);
        entry.tx = Some(tx);
        self.push(entry);
        Ok(())
    }

    /// Record a contract deployed without a proxy.
    pub fn record_plain(
        &mut self,
        name: &ContractName,
        address: Address,
        tx: TxHash,
    ) -> Result<(), DeployError> {
        let slot = self.slot(name);
        match slot.address {
            Some(existing) if existing == address => return Ok(()),
            Some(existing) => {
                return Err(DeployError::Registry(format!(
                    "refusing to replace address {existing} of `{name}` with {address}"
                )));
            }
            None => slot.address = Some(address),
        }

        let mut entry = HistoryEntry::now(Action::DeployPlain, name);
        entry.address = Some(address);
        entry.tx = Some(tx);
        self.push(entry);
        Ok(())
    }

    fn proxied_slot(&mut self, name: &ContractName) -> Result<&mut Deployment, DeployError> {
        let network = self.network.name.clone();
        match self.outputs.get_mut(name) {
            Some(slot) if slot.proxy.is_some() => Ok(slot),
            _ => Err(DeployError::config(format!(
                "`{name}` has no proxy on {network}"
            ))),
        }
    }

    /// Record a new implementation deployed for later repointing.
    pub fn record_pending(
        &mut self,
        name: &ContractName,
        implementation: Address,
        tx: TxHash,
    ) -> Result<(), DeployError> {
        let slot = self.proxied_slot(name)?;
        let replaced = slot.pending_implementation.replace(implementation);
        if let Some(replaced) = replaced.filter(|r| *r != implementation) {
            tracing::warn!(
                contract = %name,
                %replaced,
                pending = %implementation,
                "Replacing a pending implementation that was never applied"
            );
        }

        let mut entry = HistoryEntry::now(Action::StageImplementation, name);
        entry.address = Some(implementation);
        entry.tx = Some(tx);
        self.push(entry);
        Ok(())
    }

    /// Record a proxy now pointing at `implementation`.
    pub fn record_upgrade(
        &mut self,
        name: &ContractName,
        implementation: Address,
        tx: TxHash,
    ) -> Result<(), DeployError> {
        let slot = self.proxied_slot(name)?;
        slot.implementation = Some(implementation);
        if slot.pending_implementation == Some(implementation) {
            slot.pending_implementation = None;
        }

        let mut entry = HistoryEntry::now(Action::Upgrade, name);
        entry.address = Some(implementation);
        entry.tx = Some(tx);
        self.push(entry);
        Ok(())
    }

    /// Promote the pending implementation after an out-of-band repoint.
    pub fn promote_pending(&mut self, name: &ContractName) -> Result<Address, DeployError> {
        let slot = self.proxied_slot(name)?;
        let pending = slot.pending_implementation.take().ok_or_else(|| {
            DeployError::config(format!("`{name}` has no pending implementation"))
        })?;
        slot.implementation = Some(pending);

        let mut entry = HistoryEntry::now(Action::Reconcile, name);
        entry.address = Some(pending);
        self.push(entry);
        Ok(pending)
    }

    /// Record a wiring call as applied. `tx` is `None` when a probe showed it was already in effect.
    pub fn record_wiring(&mut self, target: &ContractName, calldata: Bytes, tx: Option<TxHash>) {
        let mut entry = HistoryEntry::now(Action::Wire, target);
        entry.calldata = Some(calldata);
        entry.tx = tx;
        self.push(entry);
    }

    pub fn record_transfer(
        &mut self,
        contract: &ContractName,
        action: Action,
        new_owner: Address,
        tx: TxHash,
    ) {
        let mut entry = HistoryEntry::now(action, contract);
        entry.address = Some(new_owner);
        entry.tx = Some(tx);
        self.push(entry);
    }

    /// Whether this exact wiring call was observed to succeed in an earlier run.
    pub fn wiring_applied(&self, target: &ContractName, calldata: &Bytes) -> bool {
        self.history.iter().any(|e| {
            e.action == Action::Wire
                && &e.contract == target
                && e.calldata.as_ref() == Some(calldata)
        })
    }

    pub fn ownership_transferred(&self, contract: &ContractName) -> bool {
        self.history
            .iter()
            .any(|e| e.action == Action::TransferOwnership && &e.contract == contract)
    }

    /// Whether the proxy was ever repointed, by the orchestrator or by governance.
    pub fn upgraded(&self, contract: &ContractName) -> bool {
        self.history.iter().any(|e| {
            &e.contract == contract && matches!(e.action, Action::Upgrade | Action::Reconcile)
        })
    }

    /// Derive the lifecycle record of a contract.
    ///
    /// `wiring` holds the calldata of every wiring call targeting the contract.
    pub fn contract_record(&self, name: &ContractName, wiring: &[Bytes]) -> ContractRecord {
        let deployment = self.deployment(name).cloned().unwrap_or_default();
        let status = if deployment.handle().is_none() {
            ContractStatus::Undeployed
        } else if self.ownership_transferred(name) {
            ContractStatus::OwnershipTransferred
        } else if wiring.iter().all(|call| self.wiring_applied(name, call)) {
            ContractStatus::Wired
        } else {
            ContractStatus::ProxyDeployed
        };

        ContractRecord {
            name: name.clone(),
            proxy: deployment.proxy,
            implementation: deployment.implementation.or(deployment.address),
            pending_implementation: deployment.pending_implementation,
            status,
        }
    }
}

/// Lifecycle of a logical contract, inferred and never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum ContractStatus {
    Undeployed,
    ProxyDeployed,
    Wired,
    OwnershipTransferred,
}

/// Snapshot of one contract for reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractRecord {
    pub name: ContractName,
    pub proxy: Option<Address>,
    pub implementation: Option<Address>,
    pub pending_implementation: Option<Address>,
    pub status: ContractStatus,
}
