//! Source verification against Etherscan-compatible explorers.

use std::future::Future;
use std::time::Duration;

use alloy_core::primitives::{Address, Bytes};
use serde::Deserialize;
use serde_json::Value;
use url::Url;

use crate::error::{DeployError, VerifyError};

/// Everything an explorer needs to match deployed bytecode against its source.
#[derive(Debug, Clone, PartialEq)]
pub struct VerificationRequest {
    pub address: Address,
    /// `contracts/GatewaySend.sol:GatewaySend`.
    pub contract_name: String,
    /// `solcLongVersion` from the build info, e.g. `0.8.26+commit.8a97fa7a`.
    pub compiler_version: String,
    pub standard_json_input: Value,
    /// ABI-encoded constructor arguments, empty for implementations.
    pub constructor_args: Bytes,
}

/// A block explorer verification endpoint.
pub trait VerificationService: Send + Sync {
    /// Submit a request and wait for the verdict.
    ///
    /// `Err(VerifyError::AlreadyVerified)` is reported as is; callers decide
    /// that it counts as success.
    fn submit(
        &self,
        request: &VerificationRequest,
    ) -> impl Future<Output = Result<(), VerifyError>> + Send;
}

impl<V: VerificationService> VerificationService for &V {
    fn submit(
        &self,
        request: &VerificationRequest,
    ) -> impl Future<Output = Result<(), VerifyError>> + Send {
        (**self).submit(request)
    }
}

#[derive(Debug, Deserialize)]
struct ExplorerResponse {
    status: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    result: Value,
}

impl ExplorerResponse {
    fn text(&self) -> String {
        match &self.result {
            Value::String(s) => s.clone(),
            Value::Null => self.message.clone(),
            other => other.to_string(),
        }
    }

    fn is_ok(&self) -> bool {
        self.status == "1"
    }
}

fn classify_failure(text: &str) -> VerifyError {
    if text.to_lowercase().contains("already verified") {
        VerifyError::AlreadyVerified
    } else {
        VerifyError::Rejected(text.to_string())
    }
}

/// Client for the Etherscan `verifysourcecode` API (also served by Blockscout and Zetascan).
#[derive(Debug, Clone)]
pub struct EtherscanVerifier {
    http: reqwest::Client,
    api_url: Url,
    api_key: String,
    poll_interval: Duration,
    max_polls: u32,
}

impl EtherscanVerifier {
    pub fn new(api_url: Url, api_key: impl Into<String>) -> Result<Self, DeployError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| DeployError::config(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            http,
            api_url,
            api_key: api_key.into(),
            poll_interval: Duration::from_secs(5),
            max_polls: 24,
        })
    }

    pub fn with_polling(mut self, interval: Duration, max_polls: u32) -> Self {
        self.poll_interval = interval;
        self.max_polls = max_polls;
        self
    }

    async fn decode(response: reqwest::Response) -> Result<ExplorerResponse, VerifyError> {
        response
            .error_for_status()
            .map_err(|e| VerifyError::Transport(e.to_string()))?
            .json()
            .await
            .map_err(|e| VerifyError::Transport(format!("unexpected explorer response: {e}")))
    }

    async fn poll(&self, guid: &str) -> Result<(), VerifyError> {
        for attempt in 1..=self.max_polls {
            tokio::time::sleep(self.poll_interval).await;

            let response = self
                .http
                .get(self.api_url.clone())
                .query(&[
                    ("module", "contract"),
                    ("action", "checkverifystatus"),
                    ("guid", guid),
                    ("apikey", self.api_key.as_str()),
                ])
                .send()
                .await
                .map_err(|e| VerifyError::Transport(e.to_string()))?;
            let status = Self::decode(response).await?;
            let text = status.text();

            if text.to_lowercase().contains("pending") {
                tracing::debug!(guid, attempt, "Verification pending");
                continue;
            }
            if status.is_ok() {
                return Ok(());
            }
            return Err(classify_failure(&text));
        }

        Err(VerifyError::Timeout(self.max_polls))
    }
}

impl VerificationService for EtherscanVerifier {
    async fn submit(&self, request: &VerificationRequest) -> Result<(), VerifyError> {
        let source = serde_json::to_string(&request.standard_json_input)
            .map_err(|e| VerifyError::Transport(format!("cannot serialize compiler input: {e}")))?;

        let form = [
            ("module", "contract".to_string()),
            ("action", "verifysourcecode".to_string()),
            ("apikey", self.api_key.clone()),
            ("contractaddress", request.address.to_string()),
            ("sourceCode", source),
            ("codeformat", "solidity-standard-json-input".to_string()),
            ("contractname", request.contract_name.clone()),
            ("compilerversion", format!("v{}", request.compiler_version)),
            // The misspelling is part of the API.
            ("constructorArguements", hex::encode(&request.constructor_args)),
        ];

        tracing::info!(
            address = %request.address,
            contract = %request.contract_name,
            "Submitting source for verification"
        );

        let response = self
            .http
            .post(self.api_url.clone())
            .form(&form)
            .send()
            .await
            .map_err(|e| VerifyError::Transport(e.to_string()))?;
        let submitted = Self::decode(response).await?;

        if !submitted.is_ok() {
            return Err(classify_failure(&submitted.text()));
        }

        let guid = submitted.text();
        tracing::debug!(guid = %guid, "Verification queued");
        self.poll(&guid).await
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn request() -> VerificationRequest {
        VerificationRequest {
            address: Address::with_last_byte(0x11),
            contract_name: "contracts/GatewaySend.sol:GatewaySend".into(),
            compiler_version: "0.8.26+commit.8a97fa7a".into(),
            standard_json_input: json!({ "language": "Solidity", "sources": {} }),
            constructor_args: Bytes::new(),
        }
    }

    async fn verifier(server: &MockServer) -> EtherscanVerifier {
        let url = Url::parse(&format!("{}/api", server.uri())).unwrap();
        EtherscanVerifier::new(url, "key")
            .unwrap()
            .with_polling(Duration::from_millis(1), 3)
    }

    async fn queue(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/api"))
            .and(body_string_contains("action=verifysourcecode"))
            .and(body_string_contains("codeformat=solidity-standard-json-input"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "1", "message": "OK", "result": "guid-1"
            })))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_pass_after_pending() {
        let server = MockServer::start().await;
        queue(&server).await;
        Mock::given(method("GET"))
            .and(query_param("action", "checkverifystatus"))
            .and(query_param("guid", "guid-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "0", "message": "NOTOK", "result": "Pending in queue"
            })))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(query_param("action", "checkverifystatus"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "1", "message": "OK", "result": "Pass - Verified"
            })))
            .mount(&server)
            .await;

        verifier(&server).await.submit(&request()).await.unwrap();
    }

    #[tokio::test]
    async fn test_already_verified_is_distinguished() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "0", "message": "NOTOK", "result": "Contract source code already verified"
            })))
            .mount(&server)
            .await;

        let err = verifier(&server).await.submit(&request()).await.unwrap_err();
        assert_eq!(err, VerifyError::AlreadyVerified);
    }

    #[tokio::test]
    async fn test_bad_constructor_args_are_rejected() {
        let server = MockServer::start().await;
        queue(&server).await;
        Mock::given(method("GET"))
            .and(query_param("action", "checkverifystatus"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "0",
                "message": "NOTOK",
                "result": "Fail - Unable to verify. Invalid constructor arguments provided"
            })))
            .mount(&server)
            .await;

        let err = verifier(&server).await.submit(&request()).await.unwrap_err();
        assert!(matches!(err, VerifyError::Rejected(m) if m.contains("constructor arguments")));
    }

    #[tokio::test]
    async fn test_endless_pending_times_out() {
        let server = MockServer::start().await;
        queue(&server).await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "0", "message": "NOTOK", "result": "Pending in queue"
            })))
            .mount(&server)
            .await;

        let err = verifier(&server).await.submit(&request()).await.unwrap_err();
        assert_eq!(err, VerifyError::Timeout(3));
    }

    #[tokio::test]
    async fn test_http_errors_are_transport_failures() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let err = verifier(&server).await.submit(&request()).await.unwrap_err();
        assert!(matches!(err, VerifyError::Transport(_)));
    }
}
