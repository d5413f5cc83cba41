//! Quote service collaborator
//!
//! The quote service owns route computation. The executor only needs it to
//! fetch/refresh a step's transaction, query bridge status for the destination
//! chain, and hand signed intents to the gasless relayer.

use crate::chain::ChainId;
use crate::config::ApiConfig;
use crate::error::{ErrorCode, SdkError};
use crate::step::{SignedTypedData, Step, Token};

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Query for the cross-chain status endpoint
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusRequest {
    pub tx_hash: String,
    pub from_chain: ChainId,
    pub to_chain: ChainId,
    pub bridge: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransferStatus {
    NotFound,
    Invalid,
    Pending,
    Done,
    Failed,
}

/// One side of a bridge transfer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferInfo {
    pub chain_id: ChainId,
    #[serde(default)]
    pub tx_hash: Option<String>,
    #[serde(default)]
    pub tx_link: Option<String>,
    #[serde(default)]
    pub amount: Option<String>,
    #[serde(default)]
    pub token: Option<Token>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub status: TransferStatus,
    #[serde(default)]
    pub substatus: Option<String>,
    #[serde(default)]
    pub substatus_message: Option<String>,
    #[serde(default)]
    pub sending: Option<TransferInfo>,
    #[serde(default)]
    pub receiving: Option<TransferInfo>,
}

/// Signed intents handed to the relayer
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayRequest {
    pub step: Step,
    pub signatures: Vec<SignedTypedData>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayResponse {
    pub task_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelayTaskStatus {
    Pending,
    Done,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayStatusResponse {
    pub status: RelayTaskStatus,
    #[serde(default)]
    pub tx_hash: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Quote service operations used during execution
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StepService: Send + Sync {
    /// Fetch (or refresh) the step with its transaction request populated
    async fn step_transaction(&self, step: &Step) -> Result<Step, SdkError>;

    /// Cross-chain transfer status
    async fn status(&self, request: &StatusRequest) -> Result<StatusResponse, SdkError>;

    /// Submit signed intents to the gasless relayer
    async fn relay(&self, request: &RelayRequest) -> Result<RelayResponse, SdkError>;

    async fn relay_status(&self, task_id: &str) -> Result<RelayStatusResponse, SdkError>;
}

/// reqwest-backed quote service client
pub struct HttpStepService {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpStepService {
    pub fn new(config: &ApiConfig) -> Result<Self, SdkError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| SdkError::internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.header("x-api-key", key),
            None => request,
        }
    }

    async fn send<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
        what: &str,
    ) -> Result<T, SdkError> {
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| transport_error(what, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(http_status_error(what, status, &body));
        }

        response.json::<T>().await.map_err(|e| {
            SdkError::internal(format!("Malformed {} response", what)).with_cause(e.to_string())
        })
    }
}

#[derive(Deserialize)]
struct Envelope<T> {
    data: T,
}

#[async_trait]
impl StepService for HttpStepService {
    async fn step_transaction(&self, step: &Step) -> Result<Step, SdkError> {
        debug!("Requesting transaction for step {}", step.id);
        let request = self.client.post(self.url("advanced/stepTransaction")).json(step);
        self.send(request, "step transaction").await
    }

    async fn status(&self, request: &StatusRequest) -> Result<StatusResponse, SdkError> {
        let from_chain = request.from_chain.to_string();
        let to_chain = request.to_chain.to_string();
        let query = [
            ("txHash", request.tx_hash.as_str()),
            ("fromChain", from_chain.as_str()),
            ("toChain", to_chain.as_str()),
            ("bridge", request.bridge.as_str()),
        ];
        let http = self.client.get(self.url("status")).query(&query);
        self.send(http, "status").await
    }

    async fn relay(&self, request: &RelayRequest) -> Result<RelayResponse, SdkError> {
        let http = self.client.post(self.url("advanced/relay")).json(request);
        let envelope: Envelope<RelayResponse> = self.send(http, "relay").await?;
        Ok(envelope.data)
    }

    async fn relay_status(&self, task_id: &str) -> Result<RelayStatusResponse, SdkError> {
        let http = self
            .client
            .get(self.url("relayer/status"))
            .query(&[("taskId", task_id)]);
        let envelope: Envelope<RelayStatusResponse> = self.send(http, "relay status").await?;
        Ok(envelope.data)
    }
}

fn transport_error(what: &str, err: reqwest::Error) -> SdkError {
    let code = if err.is_timeout() {
        ErrorCode::Timeout
    } else {
        ErrorCode::ProviderUnavailable
    };
    SdkError::new(code, format!("Quote service {} request failed", what)).with_cause(err.to_string())
}

fn http_status_error(what: &str, status: StatusCode, body: &str) -> SdkError {
    let code = match status {
        StatusCode::NOT_FOUND => ErrorCode::NotFound,
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => ErrorCode::ValidationError,
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => ErrorCode::Timeout,
        s if s.is_server_error() || s == StatusCode::TOO_MANY_REQUESTS => {
            ErrorCode::ProviderUnavailable
        }
        _ => ErrorCode::UnknownError,
    };
    SdkError::new(
        code,
        format!("Quote service {} request returned {}", what, status),
    )
    .with_cause(body.to_string())
}
