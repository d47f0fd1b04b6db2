//! JSON-RPC client that signs transactions locally.

use std::time::{Duration, Instant};

use alloy_core::primitives::{Address, B256, Bytes, TxHash, U64, U256};
use backon::{ExponentialBuilder, Retryable};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use url::Url;

use super::signer::{LegacyTx, LocalSigner};
use super::{ChainClient, Receipt};
use crate::abi::OWNABLE_UNAUTHORIZED;
use crate::error::DeployError;

/// Default timeout for RPC requests.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Attempts for read-only requests on transient failures.
const READ_RETRIES: usize = 3;

/// Tuning of transaction submission and confirmation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcOptions {
    /// Blocks on top of the inclusion block before a receipt counts as confirmed.
    pub confirmations: u64,
    pub receipt_timeout: Duration,
    pub poll_interval: Duration,
    /// Applied to `eth_estimateGas`, in percent.
    pub gas_multiplier_percent: u64,
}

impl Default for RpcOptions {
    fn default() -> Self {
        Self {
            confirmations: 1,
            receipt_timeout: Duration::from_secs(300),
            poll_interval: Duration::from_secs(2),
            gas_multiplier_percent: 120,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
    #[serde(default)]
    data: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcReceipt {
    transaction_hash: TxHash,
    block_number: U64,
    status: U64,
    #[serde(default)]
    contract_address: Option<Address>,
}

/// Map a JSON-RPC error object to the orchestrator's taxonomy.
fn classify(method: &str, error: RpcErrorObject) -> DeployError {
    let data = match &error.data {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Object(o)) => o
            .get("data")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_default(),
        _ => String::new(),
    };
    let message = error.message.to_lowercase();
    let unauthorized_selector = format!("0x{}", hex::encode(OWNABLE_UNAUTHORIZED));

    if data.starts_with(&unauthorized_selector)
        || message.contains("caller is not the owner")
        || message.contains("ownableunauthorizedaccount")
    {
        return DeployError::Authorization(format!("{method}: {} {data}", error.message));
    }

    if message.contains("execution reverted") || error.code == 3 {
        return DeployError::TransactionReverted(format!("{method}: {} {data}", error.message));
    }

    DeployError::Rpc(format!("{method} ({}): {}", error.code, error.message))
}

/// A [`ChainClient`] over HTTP JSON-RPC.
#[derive(Debug, Clone)]
pub struct JsonRpcClient {
    http: reqwest::Client,
    url: Url,
    /// `None` for read-only use.
    signer: Option<LocalSigner>,
    chain_id: u64,
    options: RpcOptions,
}

impl JsonRpcClient {
    /// Connect and fetch the chain id of the endpoint.
    ///
    /// Without a signer the client can read but every submission fails with a
    /// configuration error.
    pub async fn connect(
        url: Url,
        signer: Option<LocalSigner>,
        options: RpcOptions,
    ) -> Result<Self, DeployError> {
        let http = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| DeployError::config(format!("failed to create HTTP client: {e}")))?;

        let mut client = Self {
            http,
            url,
            signer,
            chain_id: 0,
            options,
        };
        let chain_id: U64 = client.read("eth_chainId", vec![]).await?;
        client.chain_id = chain_id.to::<u64>();

        tracing::info!(
            url = %client.url,
            chain_id = client.chain_id,
            sender = %client.sender(),
            read_only = client.signer.is_none(),
            "Connected to RPC endpoint"
        );
        Ok(client)
    }

    /// One JSON-RPC round trip.
    async fn request<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> Result<T, DeployError> {
        tracing::trace!(method, "RPC request");
        let response = self
            .http
            .post(self.url.clone())
            .json(&json!({
                "jsonrpc": "2.0",
                "method": method,
                "params": params,
                "id": 1
            }))
            .send()
            .await
            .map_err(|e| DeployError::TransientNetwork(format!("{method}: {e}")))?;

        let body: Value = response
            .json()
            .await
            .map_err(|e| DeployError::TransientNetwork(format!("{method}: bad response: {e}")))?;

        if let Some(error) = body.get("error") {
            let error: RpcErrorObject = serde_json::from_value(error.clone())
                .map_err(|e| DeployError::Rpc(format!("{method}: malformed error: {e}")))?;
            return Err(classify(method, error));
        }

        let result = body
            .get("result")
            .cloned()
            .ok_or_else(|| DeployError::Rpc(format!("{method}: no result in response")))?;

        serde_json::from_value(result)
            .map_err(|e| DeployError::Rpc(format!("{method}: failed to deserialize result: {e}")))
    }

    /// A read-only request, retried on transient failures.
    async fn read<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> Result<T, DeployError> {
        (|| self.request(method, params.clone()))
            .retry(ExponentialBuilder::default().with_max_times(READ_RETRIES))
            .when(DeployError::is_transient)
            .notify(|err, after| {
                tracing::debug!(method, error = %err, ?after, "Retrying RPC read");
            })
            .await
    }

    async fn submit(&self, to: Option<Address>, data: Bytes) -> Result<TxHash, DeployError> {
        let signer = self.signer.as_ref().ok_or_else(|| {
            DeployError::config("no private key configured, cannot send transactions")
        })?;
        let from = signer.address();
        let mut call = json!({ "from": from, "data": data });
        if let Some(to) = to {
            call["to"] = json!(to);
        }

        let nonce: U64 = self
            .read("eth_getTransactionCount", vec![json!(from), json!("pending")])
            .await?;
        let gas_price: U256 = self.read("eth_gasPrice", vec![]).await?;
        let estimate: U64 = self.read("eth_estimateGas", vec![call]).await?;
        let gas_limit = estimate.to::<u64>() * self.options.gas_multiplier_percent / 100;

        let tx = LegacyTx {
            chain_id: self.chain_id,
            nonce: nonce.to::<u64>(),
            gas_price: gas_price.to::<u128>(),
            gas_limit,
            to,
            value: U256::ZERO,
            data,
        };
        let raw = signer.sign(&tx)?;

        // Never retried: a resubmission could land twice.
        let hash: TxHash = self
            .request("eth_sendRawTransaction", vec![json!(raw)])
            .await?;

        tracing::debug!(
            tx_hash = %hash,
            nonce = tx.nonce,
            gas_limit,
            to = ?to,
            "Transaction submitted"
        );
        Ok(hash)
    }

    /// Poll the head until `block_number` has enough confirmations or `deadline` passes.
    async fn wait_for_confirmations(
        &self,
        tx: TxHash,
        block_number: u64,
        deadline: Instant,
    ) -> Result<(), DeployError> {
        if self.options.confirmations <= 1 {
            return Ok(());
        }
        let target = block_number + self.options.confirmations - 1;
        loop {
            let head: U64 = self.read("eth_blockNumber", vec![]).await?;
            if head.to::<u64>() >= target {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(DeployError::TransientNetwork(format!(
                    "timeout waiting for {} confirmations of {tx}, head at {head}",
                    self.options.confirmations
                )));
            }
            tokio::time::sleep(self.options.poll_interval).await;
        }
    }
}

impl ChainClient for JsonRpcClient {
    fn sender(&self) -> Address {
        self.signer
            .as_ref()
            .map(LocalSigner::address)
            .unwrap_or_default()
    }

    async fn chain_id(&self) -> Result<u64, DeployError> {
        let chain_id: U64 = self.read("eth_chainId", vec![]).await?;
        Ok(chain_id.to::<u64>())
    }

    async fn deploy(&self, init_code: Bytes) -> Result<TxHash, DeployError> {
        self.submit(None, init_code).await
    }

    async fn send(&self, to: Address, data: Bytes) -> Result<TxHash, DeployError> {
        self.submit(Some(to), data).await
    }

    async fn wait(&self, tx: TxHash) -> Result<Receipt, DeployError> {
        let deadline = Instant::now() + self.options.receipt_timeout;

        let receipt = loop {
            if Instant::now() > deadline {
                return Err(DeployError::TransientNetwork(format!(
                    "timeout waiting for receipt of {tx}"
                )));
            }

            let receipt: Option<RpcReceipt> = self
                .read("eth_getTransactionReceipt", vec![json!(tx)])
                .await?;
            match receipt {
                Some(receipt) => break receipt,
                None => {
                    tracing::trace!(tx_hash = %tx, "Receipt not available yet");
                    tokio::time::sleep(self.options.poll_interval).await;
                }
            }
        };

        if receipt.status.is_zero() {
            return Err(DeployError::TransactionReverted(format!(
                "transaction {} reverted in block {}",
                receipt.transaction_hash, receipt.block_number
            )));
        }

        let block_number = receipt.block_number.to::<u64>();
        self.wait_for_confirmations(tx, block_number, deadline).await?;

        Ok(Receipt {
            tx_hash: receipt.transaction_hash,
            block_number,
            contract_address: receipt.contract_address,
        })
    }

    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, DeployError> {
        self.read(
            "eth_call",
            vec![json!({ "to": to, "data": data }), json!("latest")],
        )
        .await
    }

    async fn storage_at(&self, address: Address, slot: B256) -> Result<B256, DeployError> {
        self.read(
            "eth_getStorageAt",
            vec![json!(address), json!(slot), json!("latest")],
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn error(code: i64, message: &str, data: Option<Value>) -> RpcErrorObject {
        RpcErrorObject {
            code,
            message: message.to_string(),
            data,
        }
    }

    #[test]
    fn test_ownable_revert_is_an_authorization_error() {
        let err = classify(
            "eth_estimateGas",
            error(
                3,
                "execution reverted",
                Some(json!(
                    "0x118cdaa7000000000000000000000000f39fd6e51aad88f6f4ce6ab8827279cfffb92266"
                )),
            ),
        );
        assert!(matches!(err, DeployError::Authorization(_)));

        let err = classify(
            "eth_estimateGas",
            error(-32000, "execution reverted: Ownable: caller is not the owner", None),
        );
        assert!(matches!(err, DeployError::Authorization(_)));
    }

    #[test]
    fn test_other_reverts_and_node_errors() {
        let err = classify(
            "eth_estimateGas",
            error(
                -32000,
                "execution reverted",
                Some(json!({ "data": "0x08c379a0" })),
            ),
        );
        assert!(matches!(err, DeployError::TransactionReverted(_)));

        let err = classify("eth_sendRawTransaction", error(-32000, "nonce too low", None));
        assert!(matches!(err, DeployError::Rpc(_)));
    }

    async fn respond(server: &wiremock::MockServer, rpc_method: &str, result: Value) {
        use wiremock::matchers::{body_partial_json, method};
        use wiremock::{Mock, ResponseTemplate};

        Mock::given(method("POST"))
            .and(body_partial_json(json!({ "method": rpc_method })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0", "id": 1, "result": result
            })))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_confirmations_give_up_on_a_stalled_chain() {
        let server = wiremock::MockServer::start().await;
        let tx = TxHash::with_last_byte(0x11);
        respond(&server, "eth_chainId", json!("0x2105")).await;
        respond(
            &server,
            "eth_getTransactionReceipt",
            json!({
                "transactionHash": tx,
                "blockNumber": "0x10",
                "status": "0x1",
                "contractAddress": null
            }),
        )
        .await;
        respond(&server, "eth_blockNumber", json!("0x10")).await;

        let options = RpcOptions {
            confirmations: 3,
            receipt_timeout: Duration::from_millis(50),
            poll_interval: Duration::from_millis(5),
            ..RpcOptions::default()
        };
        let url = Url::parse(&server.uri()).unwrap();
        let client = JsonRpcClient::connect(url, None, options).await.unwrap();
        assert_eq!(client.chain_id, 8453);

        let err = tokio::time::timeout(Duration::from_secs(5), client.wait(tx))
            .await
            .expect("wait must respect the receipt timeout")
            .unwrap_err();
        assert!(matches!(err, DeployError::TransientNetwork(m) if m.contains("confirmations")));
    }

    #[test]
    fn test_receipt_deserialization() {
        let receipt: RpcReceipt = serde_json::from_value(json!({
            "transactionHash": "0x1111111111111111111111111111111111111111111111111111111111111111",
            "blockNumber": "0x10",
            "status": "0x1",
            "contractAddress": null,
            "gasUsed": "0x5208"
        }))
        .unwrap();
        assert_eq!(receipt.block_number.to::<u64>(), 16);
        assert!(!receipt.status.is_zero());
        assert_eq!(receipt.contract_address, None);
    }
}
