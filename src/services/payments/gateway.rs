use crate::{
    config::PaymentGatewayConfig,
    errors::ServiceError,
    middleware_helpers::retry::{with_retry, RetryConfig, RetryPolicy},
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, instrument};

/// Body of a "create payment" call
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayRequest {
    pub partner_code: String,
    pub access_key: String,
    pub request_id: String,
    pub amount: u64,
    pub order_id: String,
    pub order_info: String,
    pub redirect_url: String,
    pub ipn_url: String,
    pub extra_data: String,
    pub request_type: String,
    pub signature: String,
    pub lang: String,
}

impl std::fmt::Debug for GatewayRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayRequest")
            .field("partner_code", &self.partner_code)
            .field("request_id", &self.request_id)
            .field("amount", &self.amount)
            .field("order_id", &self.order_id)
            .field("request_type", &self.request_type)
            .finish_non_exhaustive()
    }
}

/// Fields of the gateway answer this service relies on
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayResponse {
    #[serde(default)]
    pub pay_url: Option<String>,
    #[serde(default)]
    pub result_code: Option<i32>,
    #[serde(default)]
    pub message: Option<String>,
}

impl GatewayResponse {
    /// Pay URL of an accepted request: present, non-empty, and not
    /// contradicted by a non-zero result code.
    pub fn accepted_pay_url(&self) -> Option<&str> {
        if matches!(self.result_code, Some(code) if code != 0) {
            return None;
        }
        self.pay_url.as_deref().filter(|url| !url.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    /// Connect failure, timeout, or 5xx
    #[error("gateway unavailable: {0}")]
    Unavailable(String),

    /// Non-retryable refusal that could not be parsed as a gateway answer
    #[error("gateway rejected the request with status {status}: {message}")]
    Rejected { status: u16, message: String },
}

impl GatewayError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

struct TransientGatewayPolicy;

impl RetryPolicy<GatewayError> for TransientGatewayPolicy {
    fn is_retryable(&self, error: &GatewayError) -> bool {
        error.is_transient()
    }
}

/// Outbound payment gateway.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_payment(
        &self,
        request: &GatewayRequest,
    ) -> Result<GatewayResponse, GatewayError>;
}

/// JSON-over-HTTP gateway client with per-attempt timeouts and
/// exponential backoff on transient failures.
#[derive(Debug, Clone)]
pub struct HttpPaymentGateway {
    client: reqwest::Client,
    endpoint: String,
    retry: RetryConfig,
}

impl HttpPaymentGateway {
    pub fn new(config: &PaymentGatewayConfig) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| ServiceError::InternalError(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            retry: RetryConfig {
                max_attempts: config.max_attempts.max(1),
                initial_delay: config.retry_backoff(),
                max_delay: Duration::from_secs(5),
                backoff_factor: 2.0,
            },
        })
    }

    async fn post_once(&self, request: &GatewayRequest) -> Result<GatewayResponse, GatewayError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(request)
            .send()
            .await
            .map_err(|e| GatewayError::Unavailable(describe_transport_error(&e)))?;

        let status = response.status();
        if status.is_server_error() {
            return Err(GatewayError::Unavailable(format!(
                "gateway responded with {}",
                status
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| GatewayError::Unavailable(describe_transport_error(&e)))?;

        match serde_json::from_str::<GatewayResponse>(&body) {
            Ok(parsed) => Ok(parsed),
            Err(err) => Err(GatewayError::Rejected {
                status: status.as_u16(),
                message: format!("unreadable gateway response: {}", err),
            }),
        }
    }
}

fn describe_transport_error(err: &reqwest::Error) -> String {
    if err.is_timeout() {
        "request timed out".to_string()
    } else if err.is_connect() {
        "connection failed".to_string()
    } else {
        err.to_string()
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    #[instrument(skip(self, request), fields(request_id = %request.request_id))]
    async fn create_payment(
        &self,
        request: &GatewayRequest,
    ) -> Result<GatewayResponse, GatewayError> {
        debug!(endpoint = %self.endpoint, "Calling payment gateway");
        with_retry(&self.retry, TransientGatewayPolicy, || self.post_once(request)).await
    }
}
