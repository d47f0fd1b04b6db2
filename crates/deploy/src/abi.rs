//! Call signatures, argument encoding and the proxy conventions the orchestrator relies on.

use std::fmt;

use alloy_core::dyn_abi::{DynSolType, DynSolValue};
use alloy_core::primitives::{Address, B256, Bytes, Selector, b256, keccak256};
use alloy_core::sol_types::SolCall;

use crate::error::DeployError;

/// EIP-1967 slot holding the implementation address.
pub const IMPLEMENTATION_SLOT: B256 =
    b256!("0x360894a13ba1a3210667c828492db98dca3e2076cc3735a920a3ca505d382bbc");

/// EIP-1967 slot holding the admin address (the `ProxyAdmin` of a transparent proxy).
pub const ADMIN_SLOT: B256 =
    b256!("0xb53127684a568b3173ae13b9f8a6016e243e63b6e8ee1178d6a717850b5d6103");

alloy_core::sol! {
    function owner() external view returns (address);
    function transferOwnership(address newOwner) external;
    function upgradeToAndCall(address newImplementation, bytes data) external payable;
    function upgradeAndCall(address proxy, address implementation, bytes data) external payable;
}

/// `OwnableUnauthorizedAccount(address)`.
pub const OWNABLE_UNAUTHORIZED: [u8; 4] = [0x11, 0x8c, 0xda, 0xa7];

/// A parsed function or constructor signature such as `initialize(address,uint256)`.
///
/// Constructors have an empty name: `(address,bytes)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSignature {
    pub name: String,
    pub params: Vec<DynSolType>,
}

impl CallSignature {
    pub fn parse(signature: &str) -> Result<Self, DeployError> {
        let signature = signature.trim();
        let open = signature.find('(').ok_or_else(|| {
            DeployError::config(format!("malformed signature `{signature}`: missing `(`"))
        })?;
        let (name, params) = signature.split_at(open);

        if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(DeployError::config(format!(
                "malformed signature `{signature}`: invalid function name"
            )));
        }

        let params: String = params.chars().filter(|c| !c.is_whitespace()).collect();
        let params = match DynSolType::parse(&params) {
            Ok(DynSolType::Tuple(params)) => params,
            Ok(_) | Err(_) => {
                return Err(DeployError::config(format!(
                    "malformed signature `{signature}`: cannot parse parameter list"
                )));
            }
        };

        Ok(Self {
            name: name.to_string(),
            params,
        })
    }

    pub fn is_constructor(&self) -> bool {
        self.name.is_empty()
    }

    /// `name(type,type)` with canonical type names.
    pub fn canonical(&self) -> String {
        let params: Vec<_> = self.params.iter().map(|p| p.sol_type_name()).collect();
        format!("{}({})", self.name, params.join(","))
    }

    pub fn selector(&self) -> Selector {
        Selector::from_slice(&keccak256(self.canonical().as_bytes())[..4])
    }

    /// ABI-encode the arguments without a selector.
    pub fn encode_args(&self, values: &[DynSolValue]) -> Result<Bytes, DeployError> {
        if values.len() != self.params.len() {
            return Err(DeployError::config(format!(
                "`{self}` takes {} arguments, got {}",
                self.params.len(),
                values.len()
            )));
        }

        for (i, (ty, value)) in self.params.iter().zip(values).enumerate() {
            if !ty.matches(value) {
                return Err(DeployError::config(format!(
                    "`{self}` argument {i} must be {}, got {:?}",
                    ty.sol_type_name(),
                    value
                )));
            }
        }

        Ok(DynSolValue::Tuple(values.to_vec()).abi_encode_params().into())
    }

    /// Selector followed by the encoded arguments.
    pub fn encode_call(&self, values: &[DynSolValue]) -> Result<Bytes, DeployError> {
        if self.is_constructor() {
            return Err(DeployError::config(format!(
                "`{self}` is a constructor and cannot be called"
            )));
        }
        let args = self.encode_args(values)?;
        let mut out = Vec::with_capacity(4 + args.len());
        out.extend_from_slice(self.selector().as_slice());
        out.extend_from_slice(&args);
        Ok(out.into())
    }

    /// Decode calldata produced by [`CallSignature::encode_call`].
    pub fn decode_call(&self, data: &[u8]) -> Result<Vec<DynSolValue>, DeployError> {
        if data.len() < 4 || data[..4] != self.selector()[..] {
            return Err(DeployError::config(format!(
                "calldata does not start with the selector of `{self}`"
            )));
        }
        decode_params(&self.params, &data[4..])
    }
}

impl fmt::Display for CallSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

/// Decode an ABI-encoded parameter list.
pub fn decode_params(types: &[DynSolType], data: &[u8]) -> Result<Vec<DynSolValue>, DeployError> {
    match DynSolType::Tuple(types.to_vec()).abi_decode_params(data) {
        Ok(DynSolValue::Tuple(values)) => Ok(values),
        Ok(other) => Ok(vec![other]),
        Err(e) => Err(DeployError::config(format!("failed to decode ABI data: {e}"))),
    }
}

/// Coerce a textual literal into a value of `ty`.
pub fn coerce_literal(ty: &DynSolType, literal: &str) -> Result<DynSolValue, DeployError> {
    ty.coerce_str(literal).map_err(|e| {
        DeployError::config(format!(
            "cannot use `{literal}` as {}: {e}",
            ty.sol_type_name()
        ))
    })
}

/// Read an address from a 32-byte word (storage slot or return value).
pub fn word_to_address(word: &[u8]) -> Result<Address, DeployError> {
    if word.len() < 32 {
        return Err(DeployError::Rpc(format!(
            "expected a 32-byte word, got {} bytes",
            word.len()
        )));
    }
    Ok(Address::from_word(B256::from_slice(&word[..32])))
}

pub fn owner_calldata() -> Bytes {
    ownerCall {}.abi_encode().into()
}

pub fn transfer_ownership_calldata(new_owner: Address) -> Bytes {
    transferOwnershipCall { newOwner: new_owner }.abi_encode().into()
}

/// Repoint a UUPS proxy; sent to the proxy itself.
pub fn upgrade_to_and_call_calldata(implementation: Address, data: Bytes) -> Bytes {
    upgradeToAndCallCall {
        newImplementation: implementation,
        data,
    }
    .abi_encode()
    .into()
}

/// Repoint a transparent proxy; sent to its `ProxyAdmin`.
pub fn upgrade_and_call_calldata(proxy: Address, implementation: Address, data: Bytes) -> Bytes {
    upgradeAndCallCall {
        proxy,
        implementation,
        data,
    }
    .abi_encode()
    .into()
}

/// Init code of a proxy: creation bytecode followed by the encoded constructor arguments.
pub fn init_code(bytecode: &Bytes, constructor_args: &Bytes) -> Bytes {
    let mut out = Vec::with_capacity(bytecode.len() + constructor_args.len());
    out.extend_from_slice(bytecode);
    out.extend_from_slice(constructor_args);
    out.into()
}

#[cfg(test)]
mod tests {
    use alloy_core::primitives::{U256, address, hex};

    use super::*;

    #[test]
    fn test_selector_matches_known_functions() {
        let sig = CallSignature::parse("transferOwnership(address)").unwrap();
        assert_eq!(sig.selector(), Selector::from(transferOwnershipCall::SELECTOR));
        assert_eq!(hex::encode(sig.selector()), "f2fde38b");

        let sig = CallSignature::parse("setWhiteList(address, bool)").unwrap();
        assert_eq!(sig.canonical(), "setWhiteList(address,bool)");
    }

    #[test]
    fn test_constructor_signature() {
        let sig = CallSignature::parse("(address,address,bytes)").unwrap();
        assert!(sig.is_constructor());
        assert_eq!(sig.params.len(), 3);
        assert!(sig.encode_call(&[]).is_err());
    }

    #[test]
    fn test_malformed_signatures_are_configuration_errors() {
        for bad in ["initialize", "init(address", "init(adress)", "in it(uint256)"] {
            assert!(
                matches!(CallSignature::parse(bad), Err(DeployError::Configuration(_))),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn test_arity_and_type_mismatch_are_configuration_errors() {
        let sig = CallSignature::parse("initialize(address,uint256)").unwrap();
        let err = sig
            .encode_call(&[DynSolValue::Address(Address::ZERO)])
            .unwrap_err();
        assert!(matches!(err, DeployError::Configuration(_)));

        let err = sig
            .encode_call(&[
                DynSolValue::Bool(true),
                DynSolValue::Uint(U256::from(1), 256),
            ])
            .unwrap_err();
        assert!(matches!(err, DeployError::Configuration(_)));
    }

    #[test]
    fn test_encode_and_decode_call() {
        let sig = CallSignature::parse("setBot(address,bool)").unwrap();
        let bot = address!("0xa19c93c48b2051135c3a5c5df9753d53e03ef239");
        let data = sig
            .encode_call(&[DynSolValue::Address(bot), DynSolValue::Bool(true)])
            .unwrap();

        assert_eq!(data.len(), 4 + 64);
        let values = sig.decode_call(&data).unwrap();
        assert_eq!(values, vec![DynSolValue::Address(bot), DynSolValue::Bool(true)]);

        let other = CallSignature::parse("setVault(address)").unwrap();
        assert!(other.decode_call(&data).is_err());
    }

    #[test]
    fn test_coerce_literal() {
        let ty = DynSolType::Uint(256);
        assert_eq!(
            coerce_literal(&ty, "700000").unwrap(),
            DynSolValue::Uint(U256::from(700000), 256)
        );
        assert!(coerce_literal(&ty, "seven").is_err());
        assert_eq!(
            coerce_literal(&DynSolType::String, "Unified USDC").unwrap(),
            DynSolValue::String("Unified USDC".into())
        );
    }

    #[test]
    fn test_word_to_address_takes_low_bytes() {
        let expected = address!("0x701Ac6fAD7850956f966a85655348ac1B7c93368");
        let mut word = [0u8; 32];
        word[12..].copy_from_slice(expected.as_slice());
        assert_eq!(word_to_address(&word).unwrap(), expected);
        assert!(word_to_address(&word[..20]).is_err());
    }
}
