//! Chain access used by the deployment steps.
//!
//! [`ChainClient`] is the seam between the orchestrator and the network: the
//! steps only deploy init code, send calldata, wait for receipts and read state.
//! [`JsonRpcClient`] signs locally and talks JSON-RPC; [`mock::MockChain`] is an
//! in-memory chain for tests.

use std::future::Future;

use alloy_core::dyn_abi::DynSolValue;
use alloy_core::primitives::{Address, B256, Bytes, TxHash};

use crate::abi::{self, CallSignature};
use crate::error::DeployError;

pub mod mock;
mod rpc;
mod signer;

pub use rpc::{JsonRpcClient, RpcOptions};
pub use signer::LocalSigner;

/// A mined transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Receipt {
    pub tx_hash: TxHash,
    pub block_number: u64,
    /// Set for contract creations.
    pub contract_address: Option<Address>,
}

/// Access to one network through one signing key.
///
/// Mutating calls (`deploy`, `send`) are submitted once and never retried by
/// implementations; `wait` reports a reverted transaction as
/// [`DeployError::TransactionReverted`].
pub trait ChainClient: Send + Sync {
    /// Address transactions are sent from.
    fn sender(&self) -> Address;

    fn chain_id(&self) -> impl Future<Output = Result<u64, DeployError>> + Send;

    /// Submit a contract creation.
    fn deploy(&self, init_code: Bytes) -> impl Future<Output = Result<TxHash, DeployError>> + Send;

    /// Submit a call to `to`.
    fn send(
        &self,
        to: Address,
        data: Bytes,
    ) -> impl Future<Output = Result<TxHash, DeployError>> + Send;

    /// Block until the transaction is confirmed.
    fn wait(&self, tx: TxHash) -> impl Future<Output = Result<Receipt, DeployError>> + Send;

    /// Execute a read-only call.
    fn call(
        &self,
        to: Address,
        data: Bytes,
    ) -> impl Future<Output = Result<Bytes, DeployError>> + Send;

    fn storage_at(
        &self,
        address: Address,
        slot: B256,
    ) -> impl Future<Output = Result<B256, DeployError>> + Send;
}

impl<C: ChainClient> ChainClient for &C {
    fn sender(&self) -> Address {
        (**self).sender()
    }

    fn chain_id(&self) -> impl Future<Output = Result<u64, DeployError>> + Send {
        (**self).chain_id()
    }

    fn deploy(&self, init_code: Bytes) -> impl Future<Output = Result<TxHash, DeployError>> + Send {
        (**self).deploy(init_code)
    }

    fn send(
        &self,
        to: Address,
        data: Bytes,
    ) -> impl Future<Output = Result<TxHash, DeployError>> + Send {
        (**self).send(to, data)
    }

    fn wait(&self, tx: TxHash) -> impl Future<Output = Result<Receipt, DeployError>> + Send {
        (**self).wait(tx)
    }

    fn call(
        &self,
        to: Address,
        data: Bytes,
    ) -> impl Future<Output = Result<Bytes, DeployError>> + Send {
        (**self).call(to, data)
    }

    fn storage_at(
        &self,
        address: Address,
        slot: B256,
    ) -> impl Future<Output = Result<B256, DeployError>> + Send {
        (**self).storage_at(address, slot)
    }
}

/// Deploy init code and wait for the created address.
pub async fn deploy_and_wait<C: ChainClient>(
    client: &C,
    init_code: Bytes,
) -> Result<(Address, TxHash), DeployError> {
    let tx = client.deploy(init_code).await?;
    let receipt = client.wait(tx).await?;
    let address = receipt.contract_address.ok_or_else(|| {
        DeployError::Rpc(format!("receipt of creation {tx} has no contract address"))
    })?;
    Ok((address, tx))
}

/// A deployed contract bound to a client.
pub struct ContractHandle<'a, C> {
    client: &'a C,
    pub address: Address,
}

/// Bind `address` to `client` for calls.
pub fn attach<C: ChainClient>(client: &C, address: Address) -> ContractHandle<'_, C> {
    ContractHandle { client, address }
}

impl<C: ChainClient> ContractHandle<'_, C> {
    /// Send raw calldata and wait for confirmation.
    pub async fn invoke_raw(&self, data: Bytes) -> Result<Receipt, DeployError> {
        let tx = self.client.send(self.address, data).await?;
        self.client.wait(tx).await
    }

    pub async fn invoke(
        &self,
        signature: &CallSignature,
        args: &[DynSolValue],
    ) -> Result<Receipt, DeployError> {
        self.invoke_raw(signature.encode_call(args)?).await
    }

    pub async fn read(
        &self,
        signature: &CallSignature,
        args: &[DynSolValue],
    ) -> Result<Bytes, DeployError> {
        self.client
            .call(self.address, signature.encode_call(args)?)
            .await
    }

    /// `owner()` of an `Ownable` contract.
    pub async fn owner(&self) -> Result<Address, DeployError> {
        let out = self.client.call(self.address, abi::owner_calldata()).await?;
        abi::word_to_address(&out)
    }

    pub async fn slot_address(&self, slot: B256) -> Result<Address, DeployError> {
        let word = self.client.storage_at(self.address, slot).await?;
        abi::word_to_address(word.as_slice())
    }

    /// Implementation the proxy currently delegates to.
    pub async fn implementation(&self) -> Result<Address, DeployError> {
        self.slot_address(abi::IMPLEMENTATION_SLOT).await
    }

    /// Admin of a transparent proxy (its `ProxyAdmin`).
    pub async fn admin(&self) -> Result<Address, DeployError> {
        self.slot_address(abi::ADMIN_SLOT).await
    }
}
