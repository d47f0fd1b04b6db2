//! Built-in network profiles.

use serde::{Deserialize, Serialize};

/// Networks the suites are deployed to.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
)]
#[strum(serialize_all = "snake_case")]
pub enum Network {
    Eth,
    Polygon,
    Bnb,
    Base,
    Avax,
    Arb,
    ZetachainMainnet,
    ZetachainTestnet,
    Sepolia,
    ArbSepolia,
}

/// Etherscan v2 serves every chain it indexes from one endpoint keyed by chain id.
fn etherscan_v2(chain_id: u64) -> String {
    format!("https://api.etherscan.io/v2/api?chainid={chain_id}")
}

impl Network {
    pub fn chain_id(&self) -> u64 {
        match self {
            Network::Eth => 1,
            Network::Polygon => 137,
            Network::Bnb => 56,
            Network::Base => 8453,
            Network::Avax => 43114,
            Network::Arb => 42161,
            Network::ZetachainMainnet => 7000,
            Network::ZetachainTestnet => 7001,
            Network::Sepolia => 11155111,
            Network::ArbSepolia => 421614,
        }
    }

    pub fn explorer_url(&self) -> &'static str {
        match self {
            Network::Eth => "https://etherscan.io",
            Network::Polygon => "https://polygonscan.com",
            Network::Bnb => "https://bscscan.com",
            Network::Base => "https://basescan.org",
            Network::Avax => "https://snowscan.xyz",
            Network::Arb => "https://arbiscan.io",
            Network::ZetachainMainnet => "https://zetascan.com",
            Network::ZetachainTestnet => "https://testnet.zetascan.com",
            Network::Sepolia => "https://sepolia.etherscan.io",
            Network::ArbSepolia => "https://sepolia.arbiscan.io",
        }
    }

    pub fn explorer_api_url(&self) -> String {
        match self {
            Network::ZetachainMainnet => "https://zetascan.com/api".to_string(),
            Network::ZetachainTestnet => "https://testnet.zetascan.com/api".to_string(),
            other => etherscan_v2(other.chain_id()),
        }
    }

    /// A public RPC endpoint, when one is known to work without a key.
    pub fn default_rpc_url(&self) -> Option<&'static str> {
        match self {
            Network::Eth => Some("https://1rpc.io/eth"),
            Network::Polygon => Some("https://polygon-rpc.com"),
            Network::Bnb => Some("https://bsc.drpc.org"),
            Network::Base => Some("https://mainnet.base.org"),
            Network::Avax => Some("https://api.avax.network/ext/bc/C/rpc"),
            Network::Arb => Some("https://arb1.arbitrum.io/rpc"),
            Network::ZetachainMainnet => {
                Some("https://zetachain-evm.blockpi.network/v1/rpc/public")
            }
            Network::ZetachainTestnet => {
                Some("https://zetachain-athens-evm.blockpi.network/v1/rpc/public")
            }
            Network::Sepolia => Some("https://sepolia.drpc.org"),
            Network::ArbSepolia => Some("https://arbitrum-sepolia.drpc.org"),
        }
    }

    pub fn profile(&self) -> NetworkProfile {
        NetworkProfile {
            name: self.to_string(),
            chain_id: self.chain_id(),
            explorer_url: self.explorer_url().to_string(),
            explorer_api_url: Some(self.explorer_api_url()),
        }
    }
}

/// Immutable network metadata, stored in the `[network]` table of a registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkProfile {
    pub name: String,
    pub chain_id: u64,
    pub explorer_url: String,
    /// Verification endpoint. Falls back to the built-in profile of the same name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explorer_api_url: Option<String>,
}

impl NetworkProfile {
    /// The built-in network with this profile's name, if any.
    pub fn known(&self) -> Option<Network> {
        self.name.parse().ok()
    }

    pub fn verification_endpoint(&self) -> Option<String> {
        self.explorer_api_url
            .clone()
            .or_else(|| self.known().map(|n| n.explorer_api_url()))
    }

    pub fn default_rpc_url(&self) -> Option<&'static str> {
        self.known().and_then(|n| n.default_rpc_url())
    }

    /// Link to an address on the explorer.
    pub fn address_url(&self, address: &alloy_core::primitives::Address) -> String {
        format!("{}/address/{address}", self.explorer_url.trim_end_matches('/'))
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use strum::IntoEnumIterator;

    use super::*;

    #[test]
    fn test_network_names_match_registry_files() {
        assert_eq!(Network::ZetachainMainnet.to_string(), "zetachain_mainnet");
        assert_eq!(Network::from_str("arb_sepolia").unwrap(), Network::ArbSepolia);
        assert!(Network::from_str("optimism").is_err());
    }

    #[test]
    fn test_chain_ids_are_unique() {
        let mut ids: Vec<u64> = Network::iter().map(|n| n.chain_id()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), Network::iter().count());
    }

    #[test]
    fn test_etherscan_networks_share_v2_endpoint() {
        assert_eq!(
            Network::Base.explorer_api_url(),
            "https://api.etherscan.io/v2/api?chainid=8453"
        );
        assert_eq!(
            Network::ZetachainTestnet.explorer_api_url(),
            "https://testnet.zetascan.com/api"
        );
    }

    #[test]
    fn test_custom_profile_falls_back_to_builtin_endpoint() {
        let profile = NetworkProfile {
            name: "bnb".into(),
            chain_id: 56,
            explorer_url: "https://bscscan.com/".into(),
            explorer_api_url: None,
        };
        assert_eq!(
            profile.verification_endpoint().as_deref(),
            Some("https://api.etherscan.io/v2/api?chainid=56")
        );
        assert_eq!(
            profile.address_url(&alloy_core::primitives::Address::ZERO),
            "https://bscscan.com/address/0x0000000000000000000000000000000000000000"
        );

        let unknown = NetworkProfile {
            name: "devnet".into(),
            chain_id: 31337,
            explorer_url: "http://localhost".into(),
            explorer_api_url: None,
        };
        assert_eq!(unknown.verification_endpoint(), None);
        assert_eq!(unknown.default_rpc_url(), None);
    }
}
