//! Local secp256k1 signing of legacy (EIP-155) transactions.

use alloy_core::primitives::{Address, Bytes, U256, keccak256};
use alloy_core::rlp::{Encodable, Header};
use k256::ecdsa::SigningKey;

use crate::error::DeployError;

/// Fields of a legacy transaction. `to == None` is a contract creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyTx {
    pub chain_id: u64,
    pub nonce: u64,
    pub gas_price: u128,
    pub gas_limit: u64,
    pub to: Option<Address>,
    pub value: U256,
    pub data: Bytes,
}

impl LegacyTx {
    fn encode_fields(&self, out: &mut Vec<u8>) {
        self.nonce.encode(out);
        self.gas_price.encode(out);
        self.gas_limit.encode(out);
        match &self.to {
            Some(to) => to.encode(out),
            None => out.push(alloy_core::rlp::EMPTY_STRING_CODE),
        }
        self.value.encode(out);
        self.data.encode(out);
    }

    fn rlp_list(payload: Vec<u8>) -> Vec<u8> {
        let mut out = Vec::with_capacity(payload.len() + 9);
        Header {
            list: true,
            payload_length: payload.len(),
        }
        .encode(&mut out);
        out.extend_from_slice(&payload);
        out
    }

    /// EIP-155 signing payload: the fields followed by `chain_id, 0, 0`.
    pub fn signing_hash(&self) -> alloy_core::primitives::B256 {
        let mut payload = Vec::new();
        self.encode_fields(&mut payload);
        self.chain_id.encode(&mut payload);
        0u8.encode(&mut payload);
        0u8.encode(&mut payload);
        keccak256(Self::rlp_list(payload))
    }

    fn encode_signed(&self, v: u64, r: U256, s: U256) -> Vec<u8> {
        let mut payload = Vec::new();
        self.encode_fields(&mut payload);
        v.encode(&mut payload);
        r.encode(&mut payload);
        s.encode(&mut payload);
        Self::rlp_list(payload)
    }
}

/// A private key held in memory.
#[derive(Clone)]
pub struct LocalSigner {
    key: SigningKey,
    address: Address,
}

impl std::fmt::Debug for LocalSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalSigner")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

impl LocalSigner {
    /// Parse a hex private key, with or without `0x`.
    pub fn from_hex(private_key: &str) -> Result<Self, DeployError> {
        let raw = hex::decode(private_key.trim().trim_start_matches("0x"))
            .map_err(|_| DeployError::config("private key is not valid hex"))?;
        let key = SigningKey::from_slice(&raw)
            .map_err(|_| DeployError::config("private key is not a valid secp256k1 scalar"))?;
        Ok(Self::from_key(key))
    }

    pub fn from_key(key: SigningKey) -> Self {
        let point = key.verifying_key().to_encoded_point(false);
        // Skip the 0x04 uncompressed prefix.
        let address = Address::from_raw_public_key(&point.as_bytes()[1..]);
        Self { key, address }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// Sign and RLP-encode a transaction for `eth_sendRawTransaction`.
    pub fn sign(&self, tx: &LegacyTx) -> Result<Bytes, DeployError> {
        let hash = tx.signing_hash();
        let (signature, recovery_id) = self
            .key
            .sign_prehash_recoverable(hash.as_slice())
            .map_err(|e| DeployError::config(format!("failed to sign transaction: {e}")))?;

        let bytes = signature.to_bytes();
        let r = U256::from_be_slice(&bytes[..32]);
        let s = U256::from_be_slice(&bytes[32..]);
        let v = u64::from(recovery_id.to_byte()) + tx.chain_id * 2 + 35;

        Ok(tx.encode_signed(v, r, s).into())
    }
}

#[cfg(test)]
mod tests {
    use alloy_core::primitives::{address, hex};

    use super::*;

    // Hardhat/anvil account #0.
    const KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    #[test]
    fn test_address_derivation() {
        let signer = LocalSigner::from_hex(KEY).unwrap();
        assert_eq!(
            signer.address(),
            address!("0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266")
        );
        assert!(!format!("{signer:?}").contains("ac0974"));
    }

    #[test]
    fn test_invalid_keys_are_configuration_errors() {
        assert!(matches!(
            LocalSigner::from_hex("0xzz"),
            Err(DeployError::Configuration(_))
        ));
        assert!(matches!(
            LocalSigner::from_hex(&"00".repeat(32)),
            Err(DeployError::Configuration(_))
        ));
    }

    // Example from the EIP-155 specification.
    #[test]
    fn test_eip155_signing_hash_and_signature() {
        let tx = LegacyTx {
            chain_id: 1,
            nonce: 9,
            gas_price: 20_000_000_000,
            gas_limit: 21000,
            to: Some(address!("0x3535353535353535353535353535353535353535")),
            value: U256::from(1_000_000_000_000_000_000u128),
            data: Bytes::new(),
        };
        assert_eq!(
            hex::encode(tx.signing_hash()),
            "daf5a779ae972f972197303d7b574746c7ef83eadac0f2791ad23db92e4c8e53"
        );

        let signer = LocalSigner::from_hex(
            "0x4646464646464646464646464646464646464646464646464646464646464646",
        )
        .unwrap();
        let raw = signer.sign(&tx).unwrap();
        assert_eq!(
            hex::encode(raw),
            "f86c098504a817c800825208943535353535353535353535353535353535353535880de0b6b3a76400008025a028ef61340bd939bc2195fe537567866003e1a15d3c71ff63e1590620aa636276a067cbe9d8997f761aecb703304b3800ccf555c9f3dc64214b297fb1966a3b6d83"
        );
    }

    #[test]
    fn test_creation_encodes_empty_recipient() {
        let tx = LegacyTx {
            chain_id: 7000,
            nonce: 0,
            gas_price: 1,
            gas_limit: 1,
            to: None,
            value: U256::ZERO,
            data: Bytes::from_static(&[0x60, 0x80]),
        };
        let signer = LocalSigner::from_hex(KEY).unwrap();
        let raw = signer.sign(&tx).unwrap();
        // long list header, then nonce 0, gas price 1, gas limit 1, empty `to`
        assert_eq!(raw[0], 0xf8);
        assert_eq!(&raw[2..6], &[0x80, 0x01, 0x01, 0x80]);
    }
}
