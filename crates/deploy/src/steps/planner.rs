//! Deploy-or-reuse decisions.

use alloy_core::primitives::Address;

use crate::error::DeployError;
use crate::registry::{AddressRegistry, ContractName};
use crate::suite::Suite;

/// What the deploy step must do for one logical contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Plan {
    /// Already deployed at this handle address. Nothing is sent.
    Reuse(Address),
    /// Deploy. `implementation` is set when an earlier run confirmed the
    /// implementation but not the proxy.
    Deploy { implementation: Option<Address> },
}

/// Decide from the registry alone. Unknown contracts are a configuration error.
pub fn plan(
    suite: &Suite,
    registry: &AddressRegistry,
    name: &ContractName,
) -> Result<Plan, DeployError> {
    let spec = suite.contract(name)?;
    let deployment = registry.deployment(name).cloned().unwrap_or_default();

    if spec.is_proxied() {
        return Ok(match deployment.proxy {
            Some(proxy) => Plan::Reuse(proxy),
            None => Plan::Deploy {
                implementation: deployment.implementation,
            },
        });
    }

    Ok(match deployment.address {
        Some(address) => Plan::Reuse(address),
        None => Plan::Deploy {
            implementation: None,
        },
    })
}

#[cfg(test)]
mod tests {
    use alloy_core::primitives::TxHash;

    use super::*;
    use crate::network::Network;

    const SUITE: &str = r#"
name = "send"
governance = "multisig"

[proxy]
kind = "uups"
artifact = "ERC1967Proxy"

[[contracts]]
name = "GatewaySend"
artifact = "GatewaySend"

[[contracts]]
name = "Adapter"
artifact = "MinterAdapter"
kind = "plain"
"#;

    #[test]
    fn test_plan_follows_registry() {
        let suite = Suite::from_toml_str(SUITE).unwrap();
        let mut registry = AddressRegistry::new(Network::Base.profile());
        let gateway = ContractName::from("GatewaySend");
        let adapter = ContractName::from("Adapter");

        assert_eq!(
            plan(&suite, &registry, &gateway).unwrap(),
            Plan::Deploy { implementation: None }
        );

        let implementation = Address::with_last_byte(2);
        registry
            .record_implementation(&gateway, implementation, TxHash::ZERO)
            .unwrap();
        assert_eq!(
            plan(&suite, &registry, &gateway).unwrap(),
            Plan::Deploy {
                implementation: Some(implementation)
            }
        );

        let proxy = Address::with_last_byte(1);
        registry
            .record_proxy(&gateway, proxy, implementation, TxHash::ZERO)
            .unwrap();
        assert_eq!(plan(&suite, &registry, &gateway).unwrap(), Plan::Reuse(proxy));

        registry
            .record_plain(&adapter, Address::with_last_byte(3), TxHash::ZERO)
            .unwrap();
        assert_eq!(
            plan(&suite, &registry, &adapter).unwrap(),
            Plan::Reuse(Address::with_last_byte(3))
        );
    }

    #[test]
    fn test_empty_string_means_undeployed() {
        let suite = Suite::from_toml_str(SUITE).unwrap();
        let registry = AddressRegistry::from_toml_str(
            r#"
[network]
name = "base"
chain_id = 8453
explorer_url = "https://basescan.org"

[outputs.GatewaySend]
proxy = ""
implementation = ""
"#,
        )
        .unwrap();

        assert_eq!(
            plan(&suite, &registry, &ContractName::from("GatewaySend")).unwrap(),
            Plan::Deploy { implementation: None }
        );
    }

    #[test]
    fn test_unknown_contract_is_a_configuration_error() {
        let suite = Suite::from_toml_str(SUITE).unwrap();
        let registry = AddressRegistry::new(Network::Base.profile());
        let err = plan(&suite, &registry, &ContractName::from("Nope")).unwrap_err();
        assert!(matches!(err, DeployError::Configuration(_)));
    }
}
