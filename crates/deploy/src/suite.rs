//! Suite definitions: which contracts make up a deployment and how they are wired.
//!
//! A suite is shared by every network it is deployed to. Anything that differs
//! per network (addresses, gas limits, fees) is referenced by name and resolved
//! against the network's [`AddressRegistry`].

use std::collections::BTreeSet;
use std::path::Path;

use alloy_core::dyn_abi::{DynSolType, DynSolValue};
use alloy_core::primitives::Bytes;
use serde::{Deserialize, Serialize};

use crate::abi::{CallSignature, coerce_literal};
use crate::error::DeployError;
use crate::registry::{AddressRegistry, ContractName, Role};

/// Proxy standard used for every proxied contract of a suite.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ProxyKind {
    /// `TransparentUpgradeableProxy(logic, initialOwner, data)`, upgraded through its `ProxyAdmin`.
    Transparent,
    /// `ERC1967Proxy(logic, data)`, upgraded through `upgradeToAndCall` on the proxy.
    Uups,
}

impl ProxyKind {
    pub fn constructor(&self) -> CallSignature {
        let params = match self {
            ProxyKind::Transparent => {
                vec![DynSolType::Address, DynSolType::Address, DynSolType::Bytes]
            }
            ProxyKind::Uups => vec![DynSolType::Address, DynSolType::Bytes],
        };
        CallSignature {
            name: String::new(),
            params,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyConfig {
    pub kind: ProxyKind,
    /// Artifact of the proxy contract itself.
    pub artifact: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DeployKind {
    #[default]
    Proxy,
    Plain,
}

/// Where an argument value comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArgSource {
    /// An input address of the registry.
    Input(Role),
    /// The address of another contract of the suite.
    Contract(ContractName),
    /// A per-network literal from the registry's `params`.
    Param(String),
    Literal(String),
    List(Vec<ArgSource>),
}

impl ArgSource {
    /// Resolve against the registry as a value of type `ty`.
    pub fn resolve(
        &self,
        ty: &DynSolType,
        registry: &AddressRegistry,
    ) -> Result<DynSolValue, DeployError> {
        match self {
            ArgSource::Input(role) => address_value(ty, registry.input(role)?, role),
            ArgSource::Contract(name) => address_value(ty, registry.handle(name)?, name),
            ArgSource::Param(name) => coerce_literal(ty, registry.param(name)?),
            ArgSource::Literal(text) => coerce_literal(ty, text),
            ArgSource::List(items) => match ty {
                DynSolType::Array(inner) => items
                    .iter()
                    .map(|item| item.resolve(inner, registry))
                    .collect::<Result<_, _>>()
                    .map(DynSolValue::Array),
                DynSolType::FixedArray(inner, len) if *len == items.len() => items
                    .iter()
                    .map(|item| item.resolve(inner, registry))
                    .collect::<Result<_, _>>()
                    .map(DynSolValue::FixedArray),
                other => Err(DeployError::config(format!(
                    "a list of {} items cannot be used as {}",
                    items.len(),
                    other.sol_type_name()
                ))),
            },
        }
    }

    fn contract_refs<'a>(&'a self, out: &mut Vec<&'a ContractName>) {
        match self {
            ArgSource::Contract(name) => out.push(name),
            ArgSource::List(items) => items.iter().for_each(|i| i.contract_refs(out)),
            _ => {}
        }
    }
}

fn address_value(
    ty: &DynSolType,
    address: alloy_core::primitives::Address,
    source: &str,
) -> Result<DynSolValue, DeployError> {
    match ty {
        DynSolType::Address => Ok(DynSolValue::Address(address)),
        other => Err(DeployError::config(format!(
            "`{source}` is an address and cannot be used as {}",
            other.sol_type_name()
        ))),
    }
}

/// Resolve every argument of `signature` in order.
pub fn resolve_args(
    signature: &CallSignature,
    args: &[ArgSource],
    registry: &AddressRegistry,
) -> Result<Vec<DynSolValue>, DeployError> {
    if signature.params.len() != args.len() {
        return Err(DeployError::config(format!(
            "`{signature}` takes {} arguments, {} configured",
            signature.params.len(),
            args.len()
        )));
    }
    signature
        .params
        .iter()
        .zip(args)
        .map(|(ty, arg)| arg.resolve(ty, registry))
        .collect()
}

fn yes() -> bool {
    true
}

/// One logical contract of the suite.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractSpec {
    pub name: ContractName,
    /// Artifact name, bare (`GatewaySend`) or fully qualified (`contracts/unified/Vault.sol:Vault`).
    pub artifact: String,
    #[serde(default)]
    pub kind: DeployKind,
    /// Initializer called through the proxy constructor. No call when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initializer: Option<String>,
    /// Constructor parameter list of a plain contract, e.g. `(address,uint256)`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constructor: Option<String>,
    #[serde(default)]
    pub args: Vec<ArgSource>,
    #[serde(default)]
    pub verify: bool,
    #[serde(default = "yes")]
    pub transfer_ownership: bool,
    /// Artifact deployed by upgrades, when it differs from `artifact`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upgrade_artifact: Option<String>,
}

impl ContractSpec {
    pub fn is_proxied(&self) -> bool {
        self.kind == DeployKind::Proxy
    }

    /// Signature the configured `args` are encoded against.
    pub fn signature(&self) -> Result<Option<CallSignature>, DeployError> {
        match self.kind {
            DeployKind::Proxy => self.initializer.as_deref().map(CallSignature::parse).transpose(),
            DeployKind::Plain => Ok(Some(CallSignature::parse(
                self.constructor.as_deref().unwrap_or("()"),
            )?)),
        }
    }

    /// Initializer calldata for a proxy, or encoded constructor arguments for a plain contract.
    pub fn encode_args(&self, registry: &AddressRegistry) -> Result<Bytes, DeployError> {
        match (self.kind, self.signature()?) {
            (DeployKind::Proxy, None) => Ok(Bytes::new()),
            (DeployKind::Proxy, Some(sig)) => {
                sig.encode_call(&resolve_args(&sig, &self.args, registry)?)
            }
            (DeployKind::Plain, Some(sig)) => {
                sig.encode_args(&resolve_args(&sig, &self.args, registry)?)
            }
            (DeployKind::Plain, None) => Ok(Bytes::new()),
        }
    }

    pub fn upgrade_artifact(&self) -> &str {
        self.upgrade_artifact.as_deref().unwrap_or(&self.artifact)
    }

    fn dependencies(&self) -> Vec<&ContractName> {
        let mut out = Vec::new();
        self.args.iter().for_each(|a| a.contract_refs(&mut out));
        out
    }
}

/// A view used to detect that a wiring call is already in effect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Probe {
    pub call: String,
    #[serde(default)]
    pub args: Vec<ArgSource>,
    /// Return type of the view, e.g. `bool` or `address`.
    pub returns: String,
    pub expect: ArgSource,
}

/// An administrative call binding deployed contracts to each other.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WiringCall {
    pub target: ContractName,
    pub call: String,
    #[serde(default)]
    pub args: Vec<ArgSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub probe: Option<Probe>,
}

impl WiringCall {
    pub fn signature(&self) -> Result<CallSignature, DeployError> {
        CallSignature::parse(&self.call)
    }

    pub fn encode(&self, registry: &AddressRegistry) -> Result<Bytes, DeployError> {
        let sig = self.signature()?;
        sig.encode_call(&resolve_args(&sig, &self.args, registry)?)
    }

    fn dependencies(&self) -> Vec<&ContractName> {
        let mut out = vec![&self.target];
        self.args.iter().for_each(|a| a.contract_refs(&mut out));
        if let Some(probe) = &self.probe {
            probe.args.iter().for_each(|a| a.contract_refs(&mut out));
            probe.expect.contract_refs(&mut out);
        }
        out
    }
}

/// A set of contracts deployed and wired together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Suite {
    pub name: String,
    /// Input role that receives ownership in the transfer phase.
    pub governance: Role,
    pub proxy: ProxyConfig,
    #[serde(default)]
    pub contracts: Vec<ContractSpec>,
    #[serde(default)]
    pub wiring: Vec<WiringCall>,
}

impl Suite {
    pub fn from_toml_str(content: &str) -> Result<Self, DeployError> {
        let suite: Self = toml::from_str(content)
            .map_err(|e| DeployError::config(format!("failed to parse suite: {e}")))?;
        suite.validate()?;
        Ok(suite)
    }

    pub fn load_from_file(path: &Path) -> Result<Self, DeployError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            DeployError::config(format!("failed to read suite {}: {e}", path.display()))
        })?;
        let suite = Self::from_toml_str(&content)?;
        tracing::info!(
            path = %path.display(),
            suite = %suite.name,
            contracts = suite.contracts.len(),
            wiring = suite.wiring.len(),
            "Suite loaded"
        );
        Ok(suite)
    }

    pub fn contract(&self, name: &ContractName) -> Result<&ContractSpec, DeployError> {
        self.contracts
            .iter()
            .find(|c| &c.name == name)
            .ok_or_else(|| {
                DeployError::config(format!("`{name}` is not part of suite {}", self.name))
            })
    }

    /// Wiring calls whose target is `name`.
    pub fn wiring_for<'a>(
        &'a self,
        name: &'a ContractName,
    ) -> impl Iterator<Item = &'a WiringCall> + 'a {
        self.wiring.iter().filter(move |w| &w.target == name)
    }

    /// Structural checks that need no registry.
    fn validate(&self) -> Result<(), DeployError> {
        let mut names = BTreeSet::new();
        for contract in &self.contracts {
            if !names.insert(&contract.name) {
                return Err(DeployError::config(format!(
                    "contract `{}` is declared twice",
                    contract.name
                )));
            }
        }

        for contract in &self.contracts {
            match (contract.kind, &contract.initializer, &contract.constructor) {
                (DeployKind::Proxy, _, Some(_)) => {
                    return Err(DeployError::config(format!(
                        "`{}` is proxied and takes an initializer, not a constructor",
                        contract.name
                    )));
                }
                (DeployKind::Plain, Some(_), _) => {
                    return Err(DeployError::config(format!(
                        "`{}` is plain and takes a constructor, not an initializer",
                        contract.name
                    )));
                }
                _ => {}
            }

            let arity = contract.signature()?.map(|s| s.params.len()).unwrap_or(0);
            if arity != contract.args.len() {
                return Err(DeployError::config(format!(
                    "`{}` expects {arity} arguments, {} configured",
                    contract.name,
                    contract.args.len()
                )));
            }

            for dep in contract.dependencies() {
                if !names.contains(dep) {
                    return Err(DeployError::config(format!(
                        "`{}` references unknown contract `{dep}`",
                        contract.name
                    )));
                }
            }
        }

        for call in &self.wiring {
            let sig = call.signature()?;
            if sig.params.len() != call.args.len() {
                return Err(DeployError::config(format!(
                    "wiring `{sig}` on `{}` expects {} arguments, {} configured",
                    call.target,
                    sig.params.len(),
                    call.args.len()
                )));
            }
            if let Some(probe) = &call.probe {
                CallSignature::parse(&probe.call)?;
                DynSolType::parse(&probe.returns).map_err(|e| {
                    DeployError::config(format!("probe return type `{}`: {e}", probe.returns))
                })?;
            }
            for dep in call.dependencies() {
                if !names.contains(dep) {
                    return Err(DeployError::config(format!(
                        "wiring `{sig}` references unknown contract `{dep}`"
                    )));
                }
            }
        }

        self.deploy_order().map(|_| ())
    }

    /// Contracts in an order where every contract follows the contracts its arguments reference.
    ///
    /// Independent contracts keep their declaration order.
    pub fn deploy_order(&self) -> Result<Vec<&ContractSpec>, DeployError> {
        let mut placed: BTreeSet<&ContractName> = BTreeSet::new();
        let mut order = Vec::with_capacity(self.contracts.len());

        while order.len() < self.contracts.len() {
            let next = self.contracts.iter().find(|c| {
                !placed.contains(&c.name)
                    && c.dependencies()
                        .iter()
                        .all(|dep| *dep != &c.name && placed.contains(dep))
            });

            match next {
                Some(contract) => {
                    placed.insert(&contract.name);
                    order.push(contract);
                }
                None => {
                    let stuck: Vec<String> = self
                        .contracts
                        .iter()
                        .filter(|c| !placed.contains(&c.name))
                        .map(|c| c.name.to_string())
                        .collect();
                    return Err(DeployError::config(format!(
                        "dependency cycle between contracts: {}",
                        stuck.join(", ")
                    )));
                }
            }
        }

        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use alloy_core::primitives::{Address, TxHash, U256, address};

    use super::*;
    use crate::network::Network;

    const SUITE: &str = r#"
name = "unified"
governance = "unified_multisig"

[proxy]
kind = "transparent"
artifact = "TransparentUpgradeableProxy"

[[contracts]]
name = "uUSDCMinter"
artifact = "Minter"
initializer = "initialize(address,address)"
args = [{ contract = "uUSDC" }, { contract = "USDCVault" }]

[[contracts]]
name = "uUSDC"
artifact = "UnifiedToken"
initializer = "initialize(string,string)"
args = [{ literal = "Unified USDC" }, { literal = "uUSDC" }]

[[contracts]]
name = "USDCVault"
artifact = "contracts/unified/Vault.sol:Vault"
kind = "plain"

[[wiring]]
target = "uUSDCMinter"
call = "registerAssets(address[],bool[],uint256[],uint256[])"
args = [
    { list = [{ input = "usdc_sepolia" }, { contract = "uUSDC" }] },
    { list = [{ literal = "true" }, { literal = "true" }] },
    { list = [{ literal = "0" }, { literal = "0" }] },
    { list = [{ param = "max_mint" }, { param = "max_mint" }] },
]
"#;

    fn registry() -> AddressRegistry {
        let mut registry = AddressRegistry::new(Network::ZetachainTestnet.profile());
        registry.inputs.insert(
            "usdc_sepolia".into(),
            address!("0x1c7D4B196Cb0C7B01d743Fbc6116a902379C7238"),
        );
        registry.params.insert("max_mint".into(), "1000000".into());
        registry
    }

    #[test]
    fn test_deploy_order_follows_references() {
        let suite = Suite::from_toml_str(SUITE).unwrap();
        let order: Vec<String> = suite
            .deploy_order()
            .unwrap()
            .iter()
            .map(|c| c.name.to_string())
            .collect();
        assert_eq!(order, vec!["uUSDC", "USDCVault", "uUSDCMinter"]);
    }

    #[test]
    fn test_cycles_are_rejected() {
        let suite = r#"
name = "loop"
governance = "multisig"
[proxy]
kind = "uups"
artifact = "ERC1967Proxy"
[[contracts]]
name = "A"
artifact = "A"
initializer = "initialize(address)"
args = [{ contract = "B" }]
[[contracts]]
name = "B"
artifact = "B"
initializer = "initialize(address)"
args = [{ contract = "A" }]
"#;
        let err = Suite::from_toml_str(suite).unwrap_err();
        assert!(matches!(err, DeployError::Configuration(m) if m.contains("cycle")));
    }

    #[test]
    fn test_unknown_references_and_arity_are_rejected() {
        let unknown = SUITE.replace("{ contract = \"USDCVault\" }", "{ contract = \"USDTVault\" }");
        assert!(Suite::from_toml_str(&unknown).is_err());

        let arity = SUITE.replace(
            "initialize(string,string)",
            "initialize(string,string,uint8)",
        );
        assert!(Suite::from_toml_str(&arity).is_err());

        let plain_initializer = SUITE.replace(
            "kind = \"plain\"",
            "kind = \"plain\"\ninitializer = \"initialize()\"",
        );
        assert!(Suite::from_toml_str(&plain_initializer).is_err());
    }

    #[test]
    fn test_missing_dependency_address_is_a_configuration_error() {
        let suite = Suite::from_toml_str(SUITE).unwrap();
        let minter = suite.contract(&"uUSDCMinter".into()).unwrap();

        let err = minter.encode_args(&registry()).unwrap_err();
        assert!(matches!(err, DeployError::Configuration(m) if m.contains("uUSDC")));
    }

    #[test]
    fn test_resolves_nested_lists() {
        let suite = Suite::from_toml_str(SUITE).unwrap();
        let mut registry = registry();
        let token = Address::with_last_byte(0x77);
        registry
            .record_proxy(&"uUSDC".into(), token, Address::with_last_byte(1), TxHash::ZERO)
            .unwrap();

        let call = &suite.wiring[0];
        let sig = call.signature().unwrap();
        let values = resolve_args(&sig, &call.args, &registry).unwrap();

        assert_eq!(
            values[0],
            DynSolValue::Array(vec![
                DynSolValue::Address(address!("0x1c7D4B196Cb0C7B01d743Fbc6116a902379C7238")),
                DynSolValue::Address(token),
            ])
        );
        assert_eq!(
            values[3],
            DynSolValue::Array(vec![
                DynSolValue::Uint(U256::from(1_000_000), 256),
                DynSolValue::Uint(U256::from(1_000_000), 256),
            ])
        );
        assert!(call.encode(&registry).is_ok());
    }

    #[test]
    fn test_address_source_for_non_address_param_is_rejected() {
        let sig = CallSignature::parse("setGasLimit(uint256)").unwrap();
        let err = resolve_args(&sig, &[ArgSource::Input("usdc_sepolia".into())], &registry())
            .unwrap_err();
        assert!(matches!(err, DeployError::Configuration(_)));
    }

    #[test]
    fn test_plain_contract_encodes_constructor_args_without_selector() {
        let spec = ContractSpec {
            name: "MinterAdapter".into(),
            artifact: "MinterAdapter".into(),
            kind: DeployKind::Plain,
            initializer: None,
            constructor: Some("(uint256)".into()),
            args: vec![ArgSource::Param("max_mint".into())],
            verify: true,
            transfer_ownership: false,
            upgrade_artifact: None,
        };
        let encoded = spec.encode_args(&registry()).unwrap();
        assert_eq!(encoded.len(), 32);
        assert_eq!(U256::from_be_slice(&encoded), U256::from(1_000_000));
    }
}
