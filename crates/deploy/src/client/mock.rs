//! In-memory chain for exercising the orchestrator without a node.
//!
//! `MockChain` models just enough EVM behaviour for deployments: CREATE
//! addresses, EIP-1967 proxies (transparent with a `ProxyAdmin`, and UUPS),
//! `Ownable` access control on every administrative call, and setter/getter
//! pairs so wiring probes can observe applied state.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use alloy_core::dyn_abi::DynSolValue;
use alloy_core::primitives::{Address, B256, Bytes, TxHash, keccak256};
use alloy_core::sol_types::SolCall;

use super::{ChainClient, Receipt};
use crate::abi::{
    self, ADMIN_SLOT, CallSignature, IMPLEMENTATION_SLOT, decode_params, transferOwnershipCall,
    upgradeAndCallCall, upgradeToAndCallCall,
};
use crate::error::DeployError;
use crate::suite::ProxyKind;

/// Default deploying account of a [`MockChain`].
pub const MOCK_DEPLOYER: Address = Address::new([0xd0; 20]);

#[derive(Debug, Default)]
struct State {
    sender: Address,
    nonces: HashMap<Address, u64>,
    code: HashMap<Address, Bytes>,
    owners: HashMap<Address, Address>,
    proxy_admins: HashSet<Address>,
    storage: HashMap<(Address, B256), B256>,
    views: HashMap<(Address, Bytes), Bytes>,
    receipts: HashMap<TxHash, Receipt>,
    proxy_bytecode: Vec<(ProxyKind, Bytes)>,
    links: Vec<(CallSignature, CallSignature)>,
    applied: Vec<(Address, Bytes)>,
    fail_next: Option<DeployError>,
    fail_next_read: Option<DeployError>,
    deploys: usize,
    sends: usize,
    block: u64,
}

impl State {
    fn next_tx(&mut self, contract_address: Option<Address>) -> TxHash {
        let sender = self.sender;
        let nonce = self.nonces.entry(sender).or_default();
        let mut seed = sender.to_vec();
        seed.extend_from_slice(&nonce.to_be_bytes());
        *nonce += 1;
        self.block += 1;

        let tx_hash = keccak256(seed);
        self.receipts.insert(
            tx_hash,
            Receipt {
                tx_hash,
                block_number: self.block,
                contract_address,
            },
        );
        tx_hash
    }

    fn require_owner(&self, contract: Address) -> Result<(), DeployError> {
        match self.owners.get(&contract) {
            Some(owner) if *owner == self.sender => Ok(()),
            _ => Err(DeployError::Authorization(format!(
                "OwnableUnauthorizedAccount({}) on {contract}",
                self.sender
            ))),
        }
    }

    fn set_slot(&mut self, address: Address, slot: B256, value: Address) {
        self.storage.insert((address, slot), value.into_word());
    }

    fn slot(&self, address: Address, slot: B256) -> Address {
        self.storage
            .get(&(address, slot))
            .map(|w| Address::from_word(*w))
            .unwrap_or_default()
    }

    fn upgrade(&mut self, proxy: Address, implementation: Address) -> Result<(), DeployError> {
        if !self.code.contains_key(&implementation) {
            return Err(DeployError::TransactionReverted(format!(
                "ERC1967InvalidImplementation({implementation})"
            )));
        }
        self.set_slot(proxy, IMPLEMENTATION_SLOT, implementation);
        Ok(())
    }

    /// Record an administrative call and update linked getters.
    fn apply(&mut self, to: Address, data: Bytes) -> Result<(), DeployError> {
        for (setter, getter) in &self.links {
            let Ok(values) = setter.decode_call(&data) else {
                continue;
            };
            let keys = getter.params.len().min(values.len());
            let key = getter.encode_call(&values[..keys])?;
            let returned = DynSolValue::Tuple(values[keys..].to_vec()).abi_encode_params();
            self.views.insert((to, key), returned.into());
        }
        self.applied.push((to, data));
        Ok(())
    }

    fn deploy_proxy(
        &mut self,
        proxy: Address,
        kind: ProxyKind,
        args: &[u8],
    ) -> Result<(), DeployError> {
        let values = decode_params(&kind.constructor().params, args)?;
        let address_at = |i: usize| values.get(i).and_then(DynSolValue::as_address);
        let logic = address_at(0).unwrap_or_default();
        let data = values
            .last()
            .and_then(DynSolValue::as_bytes)
            .map(Bytes::copy_from_slice)
            .unwrap_or_default();

        self.upgrade(proxy, logic)?;

        if kind == ProxyKind::Transparent {
            let initial_owner = address_at(1).unwrap_or_default();
            // A contract's first CREATE uses nonce 1.
            let admin = proxy.create(1);
            self.code.insert(admin, Bytes::from_static(b"ProxyAdmin"));
            self.owners.insert(admin, initial_owner);
            self.proxy_admins.insert(admin);
            self.set_slot(proxy, ADMIN_SLOT, admin);
        }

        if !data.is_empty() {
            // Initializers run as the deployer and make it the owner.
            self.owners.insert(proxy, self.sender);
            self.apply(proxy, data)?;
        }
        Ok(())
    }
}

/// An in-memory [`ChainClient`].
#[derive(Debug)]
pub struct MockChain {
    chain_id: u64,
    state: Mutex<State>,
}

impl MockChain {
    pub fn new(chain_id: u64) -> Self {
        let state = State {
            sender: MOCK_DEPLOYER,
            ..Default::default()
        };
        Self {
            chain_id,
            state: Mutex::new(state),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Treat init code starting with `bytecode` as a proxy of `kind`.
    pub fn register_proxy(&self, kind: ProxyKind, bytecode: Bytes) {
        self.state().proxy_bytecode.push((kind, bytecode));
    }

    /// After `setter` is applied, `getter` called with the leading setter
    /// arguments returns the remaining ones.
    pub fn link_view(&self, setter: &str, getter: &str) -> Result<(), DeployError> {
        let pair = (CallSignature::parse(setter)?, CallSignature::parse(getter)?);
        self.state().links.push(pair);
        Ok(())
    }

    /// Send subsequent transactions from `sender`.
    pub fn impersonate(&self, sender: Address) {
        self.state().sender = sender;
    }

    /// Fail the next `deploy` or `send` with `error`, without changing state.
    pub fn fail_next(&self, error: DeployError) {
        self.state().fail_next = Some(error);
    }

    /// Fail the next `storage_at` with `error`.
    pub fn fail_next_read(&self, error: DeployError) {
        self.state().fail_next_read = Some(error);
    }

    pub fn deploy_count(&self) -> usize {
        self.state().deploys
    }

    pub fn send_count(&self) -> usize {
        self.state().sends
    }

    pub fn has_code(&self, address: Address) -> bool {
        self.state().code.contains_key(&address)
    }

    pub fn owner_of(&self, address: Address) -> Option<Address> {
        self.state().owners.get(&address).copied()
    }

    pub fn implementation_of(&self, proxy: Address) -> Address {
        self.state().slot(proxy, IMPLEMENTATION_SLOT)
    }

    pub fn admin_of(&self, proxy: Address) -> Address {
        self.state().slot(proxy, ADMIN_SLOT)
    }

    /// Administrative calls applied to `to`, initializers included.
    pub fn applied_calls(&self, to: Address) -> Vec<Bytes> {
        self.state()
            .applied
            .iter()
            .filter(|(target, _)| *target == to)
            .map(|(_, data)| data.clone())
            .collect()
    }
}

impl ChainClient for MockChain {
    fn sender(&self) -> Address {
        self.state().sender
    }

    async fn chain_id(&self) -> Result<u64, DeployError> {
        Ok(self.chain_id)
    }

    async fn deploy(&self, init_code: Bytes) -> Result<TxHash, DeployError> {
        let mut state = self.state();
        if let Some(err) = state.fail_next.take() {
            return Err(err);
        }

        let sender = state.sender;
        let nonce = state.nonces.get(&sender).copied().unwrap_or_default();
        let address = sender.create(nonce);

        let proxy = state
            .proxy_bytecode
            .iter()
            .find(|(_, code)| init_code.starts_with(code))
            .map(|(kind, code)| (*kind, code.len()));

        match proxy {
            Some((kind, prefix)) => state.deploy_proxy(address, kind, &init_code[prefix..])?,
            None => {
                state.owners.insert(address, sender);
            }
        }

        state.code.insert(address, init_code);
        state.deploys += 1;
        Ok(state.next_tx(Some(address)))
    }

    async fn send(&self, to: Address, data: Bytes) -> Result<TxHash, DeployError> {
        let mut state = self.state();
        if let Some(err) = state.fail_next.take() {
            return Err(err);
        }
        if !state.code.contains_key(&to) {
            return Err(DeployError::TransactionReverted(format!(
                "call to {to} which has no code"
            )));
        }

        let selector: [u8; 4] = data
            .get(..4)
            .and_then(|s| s.try_into().ok())
            .ok_or_else(|| DeployError::TransactionReverted("calldata too short".into()))?;

        match selector {
            transferOwnershipCall::SELECTOR => {
                state.require_owner(to)?;
                let values =
                    CallSignature::parse("transferOwnership(address)")?.decode_call(&data)?;
                let new_owner = values
                    .first()
                    .and_then(DynSolValue::as_address)
                    .unwrap_or_default();
                state.owners.insert(to, new_owner);
            }
            upgradeToAndCallCall::SELECTOR => {
                state.require_owner(to)?;
                let values =
                    CallSignature::parse("upgradeToAndCall(address,bytes)")?.decode_call(&data)?;
                let implementation = values
                    .first()
                    .and_then(DynSolValue::as_address)
                    .unwrap_or_default();
                state.upgrade(to, implementation)?;
            }
            upgradeAndCallCall::SELECTOR => {
                if !state.proxy_admins.contains(&to) {
                    return Err(DeployError::TransactionReverted(format!(
                        "{to} is not a ProxyAdmin"
                    )));
                }
                state.require_owner(to)?;
                let values = CallSignature::parse("upgradeAndCall(address,address,bytes)")?
                    .decode_call(&data)?;
                let proxy = values
                    .first()
                    .and_then(DynSolValue::as_address)
                    .unwrap_or_default();
                let implementation = values
                    .get(1)
                    .and_then(DynSolValue::as_address)
                    .unwrap_or_default();
                if state.slot(proxy, ADMIN_SLOT) != to {
                    return Err(DeployError::TransactionReverted(format!(
                        "{to} does not administer {proxy}"
                    )));
                }
                state.upgrade(proxy, implementation)?;
            }
            _ => {
                state.require_owner(to)?;
                state.apply(to, data)?;
            }
        }

        state.sends += 1;
        Ok(state.next_tx(None))
    }

    async fn wait(&self, tx: TxHash) -> Result<Receipt, DeployError> {
        self.state()
            .receipts
            .get(&tx)
            .copied()
            .ok_or_else(|| DeployError::Rpc(format!("unknown transaction {tx}")))
    }

    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, DeployError> {
        let state = self.state();
        if data == abi::owner_calldata() {
            return state
                .owners
                .get(&to)
                .map(|owner| Bytes::from(owner.into_word().to_vec()))
                .ok_or_else(|| DeployError::TransactionReverted(format!("{to} is not Ownable")));
        }
        state
            .views
            .get(&(to, data))
            .cloned()
            .ok_or_else(|| DeployError::TransactionReverted(format!("no view on {to}")))
    }

    async fn storage_at(&self, address: Address, slot: B256) -> Result<B256, DeployError> {
        let mut state = self.state();
        if let Some(err) = state.fail_next_read.take() {
            return Err(err);
        }
        Ok(state.storage.get(&(address, slot)).copied().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{attach, deploy_and_wait};

    const TRANSPARENT: &[u8] = b"transparent-proxy";

    fn chain() -> MockChain {
        let chain = MockChain::new(31337);
        chain.register_proxy(ProxyKind::Transparent, Bytes::from_static(TRANSPARENT));
        chain
    }

    async fn deploy_proxy(chain: &MockChain, init: Bytes) -> (Address, Address) {
        let (logic, _) = deploy_and_wait(chain, Bytes::from_static(b"logic")).await.unwrap();
        let args = ProxyKind::Transparent
            .constructor()
            .encode_args(&[
                DynSolValue::Address(logic),
                DynSolValue::Address(MOCK_DEPLOYER),
                DynSolValue::Bytes(init.to_vec()),
            ])
            .unwrap();
        let init_code = abi::init_code(&Bytes::from_static(TRANSPARENT), &args);
        let (proxy, _) = deploy_and_wait(chain, init_code).await.unwrap();
        (proxy, logic)
    }

    #[tokio::test]
    async fn test_transparent_proxy_deploys_admin_and_sets_slots() {
        let chain = chain();
        let init = CallSignature::parse("initialize()").unwrap().encode_call(&[]).unwrap();
        let (proxy, logic) = deploy_proxy(&chain, init.clone()).await;

        let handle = attach(&chain, proxy);
        assert_eq!(handle.implementation().await.unwrap(), logic);
        let admin = handle.admin().await.unwrap();
        assert_eq!(admin, proxy.create(1));
        assert_eq!(chain.owner_of(admin), Some(MOCK_DEPLOYER));
        assert_eq!(handle.owner().await.unwrap(), MOCK_DEPLOYER);
        assert_eq!(chain.applied_calls(proxy), vec![init]);
        assert_eq!(chain.deploy_count(), 2);
    }

    #[tokio::test]
    async fn test_owner_checks_and_transfer() {
        let chain = chain();
        let initialize = CallSignature::parse("initialize()").unwrap();
        let (proxy, _) = deploy_proxy(&chain, initialize.encode_call(&[]).unwrap()).await;
        let handle = attach(&chain, proxy);
        let governance = Address::with_last_byte(0x99);

        handle
            .invoke_raw(abi::transfer_ownership_calldata(governance))
            .await
            .unwrap();
        assert_eq!(handle.owner().await.unwrap(), governance);

        let set_bot = CallSignature::parse("setBot(address,bool)").unwrap();
        let err = handle
            .invoke(&set_bot, &[DynSolValue::Address(governance), DynSolValue::Bool(true)])
            .await
            .unwrap_err();
        assert!(matches!(err, DeployError::Authorization(_)));
    }

    #[tokio::test]
    async fn test_linked_views_reflect_applied_setters() {
        let chain = chain();
        chain.link_view("setWhiteList(address,bool)", "whiteList(address)").unwrap();
        let initialize = CallSignature::parse("initialize()").unwrap();
        let (proxy, _) = deploy_proxy(&chain, initialize.encode_call(&[]).unwrap()).await;
        let handle = attach(&chain, proxy);
        let member = Address::with_last_byte(0x42);

        let getter = CallSignature::parse("whiteList(address)").unwrap();
        assert!(handle.read(&getter, &[DynSolValue::Address(member)]).await.is_err());

        let setter = CallSignature::parse("setWhiteList(address,bool)").unwrap();
        handle
            .invoke(&setter, &[DynSolValue::Address(member), DynSolValue::Bool(true)])
            .await
            .unwrap();

        let out = handle.read(&getter, &[DynSolValue::Address(member)]).await.unwrap();
        assert_eq!(out.to_vec(), DynSolValue::Bool(true).abi_encode());
    }

    #[tokio::test]
    async fn test_injected_failure_leaves_no_state() {
        let chain = chain();
        chain.fail_next(DeployError::TransientNetwork("connection reset".into()));

        let err = chain.deploy(Bytes::from_static(b"logic")).await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(chain.deploy_count(), 0);
        assert!(chain.deploy(Bytes::from_static(b"logic")).await.is_ok());
    }
}
