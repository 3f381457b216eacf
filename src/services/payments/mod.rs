//! Payment initiation: request ids, signing, and the gateway call.

pub mod gateway;
pub mod request_id;
pub mod signature;

pub use gateway::{GatewayError, GatewayRequest, GatewayResponse, HttpPaymentGateway, PaymentGateway};
pub use request_id::{format_request_id, Clock, RequestIdGenerator, SystemClock};
pub use signature::{raw_signature, sign, verify, SignatureFields};

use crate::{
    config::AppConfig,
    entities::payment_payload::{self, PaymentStatus},
    errors::ServiceError,
    events::{Event, EventSender},
};
use chrono::Utc;
use metrics::{counter, histogram};
use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait, QueryOrder, Set};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::time::timeout;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

/// Caller-supplied part of a payment request
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequest {
    #[validate(length(min = 1, max = 64))]
    pub order_id: String,
    #[validate(range(min = 1))]
    pub amount: u64,
    #[validate(length(min = 1, max = 255))]
    pub order_info: String,
}

/// Builds, signs and submits payment requests, and keeps the audit trail
/// of every payload sent.
#[derive(Clone)]
pub struct PaymentService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    gateway: Arc<dyn PaymentGateway>,
    ids: Arc<RequestIdGenerator>,
    config: Arc<AppConfig>,
}

impl PaymentService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        gateway: Arc<dyn PaymentGateway>,
        ids: Arc<RequestIdGenerator>,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            db,
            event_sender,
            gateway,
            ids,
            config,
        }
    }

    /// Submits a signed payment request and returns the gateway's pay URL.
    ///
    /// The payload is persisted whatever the gateway answered, tagged with
    /// the outcome. A gateway failure is reported after persisting.
    ///
    /// # Errors
    ///
    /// * `InvalidInput` - empty order id or description, zero amount
    /// * `GatewayUnavailable` - transport failure, or no answer after retries
    ///   or before the flow deadline
    /// * `GatewayRejected` - the gateway refused or returned no pay URL
    /// * `ClockSkew` - no request id could be generated
    /// * `InternalError` - the payload could not be persisted
    #[instrument(skip(self, request), fields(order_id = %request.order_id))]
    pub async fn submit_payment(&self, request: PaymentRequest) -> Result<String, ServiceError> {
        request
            .validate()
            .map_err(|e| ServiceError::InvalidInput(format!("Invalid payment request: {}", e)))?;
        if i64::try_from(request.amount).is_err() {
            return Err(ServiceError::InvalidInput(format!(
                "Amount {} is out of range",
                request.amount
            )));
        }

        self.try_submit(request).await
    }

    /// Draws the next request id off the async workers; the generator may
    /// sleep through a small clock rewind or spin to the next millisecond.
    async fn next_request_id(&self) -> Result<String, ServiceError> {
        let ids = self.ids.clone();
        let id = tokio::task::spawn_blocking(move || ids.next_id())
            .await
            .map_err(|e| ServiceError::InternalError(format!("Request id task failed: {}", e)))??;
        Ok(format_request_id(id))
    }

    async fn try_submit(&self, request: PaymentRequest) -> Result<String, ServiceError> {
        let deadline = self.config.flow_timeout();
        let flow_started = std::time::Instant::now();
        let gateway_config = &self.config.payment;
        let request_id = timeout(deadline, self.next_request_id())
            .await
            .map_err(|_| ServiceError::Timeout(deadline))??;

        let fields = SignatureFields {
            access_key: &gateway_config.access_key,
            amount: request.amount,
            extra_data: &gateway_config.extra_data,
            ipn_url: &gateway_config.ipn_url,
            order_id: &request.order_id,
            order_info: &request.order_info,
            partner_code: &gateway_config.partner_code,
            redirect_url: &gateway_config.redirect_url,
            request_id: &request_id,
            request_type: &gateway_config.request_type,
        };
        let signature = sign(&fields, &gateway_config.secret_key)?;

        let payload = GatewayRequest {
            partner_code: gateway_config.partner_code.clone(),
            access_key: gateway_config.access_key.clone(),
            request_id: request_id.clone(),
            amount: request.amount,
            order_id: request.order_id.clone(),
            order_info: request.order_info.clone(),
            redirect_url: gateway_config.redirect_url.clone(),
            ipn_url: gateway_config.ipn_url.clone(),
            extra_data: gateway_config.extra_data.clone(),
            request_type: gateway_config.request_type.clone(),
            signature,
            lang: gateway_config.lang.clone(),
        };
        info!(%request_id, order_id = %payload.order_id, amount = payload.amount, "Signed payment request");

        // Only the gateway call is bounded by what is left of the flow
        // deadline; the outcome is persisted either way.
        let remaining = deadline.saturating_sub(flow_started.elapsed());
        let started = std::time::Instant::now();
        let outcome = timeout(remaining, self.gateway.create_payment(&payload))
            .await
            .unwrap_or_else(|_| {
                Err(GatewayError::Unavailable(format!(
                    "no answer within the {:?} flow deadline",
                    deadline
                )))
            });
        histogram!("storefront_gateway_latency_seconds", started.elapsed());

        let (status, response, result) = classify(outcome);
        counter!("storefront_payments_total", 1, "status" => status_label(status));

        let storage_deadline = self.config.storage_timeout();
        timeout(storage_deadline, self.persist(&payload, status, &response))
            .await
            .map_err(|_| {
                error!(%request_id, "Timed out persisting payment payload");
                ServiceError::InternalError("Timed out persisting payment payload".to_string())
            })??;

        match &result {
            Ok(_) => {
                self.event_sender
                    .send_or_log(Event::PaymentSubmitted {
                        request_id,
                        order_id: payload.order_id,
                    })
                    .await
            }
            Err(err) => {
                warn!(%request_id, error = %err, "Payment gateway call failed");
                self.event_sender
                    .send_or_log(Event::PaymentFailed {
                        request_id,
                        order_id: payload.order_id,
                        reason: err.to_string(),
                    })
                    .await
            }
        }

        result
    }

    async fn persist(
        &self,
        payload: &GatewayRequest,
        status: PaymentStatus,
        response: &GatewayResponse,
    ) -> Result<(), ServiceError> {
        let amount = i64::try_from(payload.amount)
            .map_err(|_| ServiceError::InternalError("Amount out of range".to_string()))?;

        payment_payload::ActiveModel {
            id: Set(Uuid::new_v4()),
            request_id: Set(payload.request_id.clone()),
            partner_code: Set(payload.partner_code.clone()),
            access_key: Set(payload.access_key.clone()),
            order_id: Set(payload.order_id.clone()),
            order_info: Set(payload.order_info.clone()),
            amount: Set(amount),
            redirect_url: Set(payload.redirect_url.clone()),
            ipn_url: Set(payload.ipn_url.clone()),
            request_type: Set(payload.request_type.clone()),
            lang: Set(payload.lang.clone()),
            extra_data: Set(payload.extra_data.clone()),
            signature: Set(payload.signature.clone()),
            status: Set(status),
            pay_url: Set(response.pay_url.clone()),
            result_code: Set(response.result_code),
            result_message: Set(response.message.clone()),
            created_at: Set(Utc::now()),
        }
        .insert(&*self.db)
        .await
        .map_err(|e| {
            error!(request_id = %payload.request_id, error = %e, "Failed to persist payment payload");
            ServiceError::InternalError(format!("Failed to persist payment payload: {}", e))
        })?;

        Ok(())
    }

    /// Every persisted payload, oldest first.
    #[instrument(skip(self))]
    pub async fn list_payloads(&self) -> Result<Vec<payment_payload::Model>, ServiceError> {
        let deadline = self.config.flow_timeout();
        let payloads = timeout(
            deadline,
            payment_payload::Entity::find()
                .order_by_asc(payment_payload::Column::CreatedAt)
                .order_by_asc(payment_payload::Column::RequestId)
                .all(&*self.db),
        )
        .await
        .map_err(|_| ServiceError::Timeout(deadline))??;

        Ok(payloads)
    }
}

fn status_label(status: PaymentStatus) -> &'static str {
    match status {
        PaymentStatus::Submitted => "submitted",
        PaymentStatus::Rejected => "rejected",
        PaymentStatus::GatewayUnavailable => "gateway_unavailable",
    }
}

/// Maps a gateway outcome to the recorded status, the response fields to
/// record, and the caller's result.
fn classify(
    outcome: Result<GatewayResponse, GatewayError>,
) -> (PaymentStatus, GatewayResponse, Result<String, ServiceError>) {
    match outcome {
        Ok(response) => match response.accepted_pay_url() {
            Some(url) => {
                let url = url.to_string();
                (PaymentStatus::Submitted, response, Ok(url))
            }
            None => {
                let reason = response
                    .message
                    .clone()
                    .unwrap_or_else(|| "gateway returned no pay URL".to_string());
                let reason = match response.result_code {
                    Some(code) => format!("{} (result code {})", reason, code),
                    None => reason,
                };
                (
                    PaymentStatus::Rejected,
                    response,
                    Err(ServiceError::GatewayRejected(reason)),
                )
            }
        },
        Err(err @ GatewayError::Unavailable(_)) => (
            PaymentStatus::GatewayUnavailable,
            GatewayResponse::default(),
            Err(ServiceError::GatewayUnavailable(err.to_string())),
        ),
        Err(GatewayError::Rejected { status, message }) => (
            PaymentStatus::Rejected,
            GatewayResponse {
                message: Some(message.clone()),
                ..Default::default()
            },
            Err(ServiceError::GatewayRejected(format!(
                "HTTP {}: {}",
                status, message
            ))),
        ),
    }
}
