use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Signed payment request as sent to the gateway, with the gateway's answer.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "payment_payloads")]
#[serde(rename_all = "camelCase")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub request_id: String,
    pub partner_code: String,
    /// Never serialized to API clients
    #[serde(default, skip_serializing)]
    pub access_key: String,
    /// Caller-supplied order reference; not enforced against `orders`
    pub order_id: String,
    pub order_info: String,
    pub amount: i64,
    pub redirect_url: String,
    pub ipn_url: String,
    pub request_type: String,
    pub lang: String,
    pub extra_data: String,
    pub signature: String,
    pub status: PaymentStatus,
    #[sea_orm(nullable)]
    pub pay_url: Option<String>,
    #[sea_orm(nullable)]
    pub result_code: Option<i32>,
    #[sea_orm(nullable)]
    pub result_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

/// Outcome of the gateway call recorded with each payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    #[sea_orm(string_value = "submitted")]
    Submitted,
    #[sea_orm(string_value = "rejected")]
    Rejected,
    #[sea_orm(string_value = "gateway_unavailable")]
    GatewayUnavailable,
}
