//! Mobile-money gateway adapter
//!
//! Sends a signed merchant-pay transaction request on behalf of the payer's
//! wallet. The gateway answers with a server correlation id which becomes
//! the payment's transaction id; the payer approves on their handset and
//! the final result arrives later through reconciliation.

use crate::error::{AppError, AppResult};
use crate::payments::currency::convert_from_cents;
use crate::payments::providers::http::{GatewayHttp, RetryPolicy};
use crate::payments::traits::PaymentGateway;
use crate::payments::types::{GatewayKind, IntentRequest, IntentResponse};
use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use hmac::{Hmac, Mac};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::{error, info};
use uuid::Uuid;

const PROVIDER: &str = "mobile_money";
const TRANSACTION_PATH: &str = "/mm/transactions/type/merchantpay/1.0.0/";

type HmacSha256 = Hmac<Sha256>;

/// Mobile-money gateway configuration
#[derive(Debug, Clone)]
pub struct MobileMoneyConfig {
    /// Gateway API base URL, without trailing slash
    pub base_url: String,
    /// Bearer token sent in `Authorization`
    pub api_key: String,
    /// Secret used to sign request bodies
    pub signing_secret: String,
    /// Merchant wallet credited by every collection
    pub merchant_number: String,
    /// Partner name reported in request metadata
    pub partner_name: String,
    /// Where the gateway posts the final result, if it supports callbacks
    pub callback_url: Option<String>,
    pub timeout_secs: u64,
    pub retry: RetryPolicy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValue {
    pub key: String,
    pub value: String,
}

impl KeyValue {
    fn new(key: &str, value: impl Into<String>) -> Self {
        Self {
            key: key.to_string(),
            value: value.into(),
        }
    }
}

/// Body of a merchant-pay transaction request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRequest {
    pub amount: String,
    pub currency: String,
    pub description_text: String,
    pub request_date: String,
    pub requesting_organisation_transaction_reference: String,
    pub original_transaction_reference: String,
    pub debit_party: Vec<KeyValue>,
    pub credit_party: Vec<KeyValue>,
    pub metadata: Vec<KeyValue>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransactionAccepted {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    server_correlation_id: Option<String>,
    #[serde(default)]
    notification_method: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GatewayFault {
    #[serde(default)]
    error_code: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

/// What would be sent for an intent, with secrets redacted
#[cfg(feature = "gateway-preview")]
#[derive(Debug, Clone, Serialize)]
pub struct RequestPreview {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: TransactionRequest,
    pub signature: String,
}

pub struct MobileMoneyGateway {
    config: MobileMoneyConfig,
    http: GatewayHttp,
}

impl MobileMoneyGateway {
    pub fn new(config: MobileMoneyConfig) -> AppResult<Self> {
        let http = GatewayHttp::new(PROVIDER, config.timeout_secs, config.retry)?;
        Ok(Self { config, http })
    }

    fn endpoint(&self) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), TRANSACTION_PATH)
    }

    /// Build the transaction body for an intent
    pub fn build_request(&self, request: &IntentRequest) -> AppResult<TransactionRequest> {
        let phone = request
            .phone_number
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .ok_or_else(|| AppError::validation("Phone number is required for mobile money payments"))?;

        let mut metadata = vec![
            KeyValue::new("partnerName", self.config.partner_name.clone()),
            KeyValue::new("paymentMethod", request.method.as_str()),
            KeyValue::new("orderReference", request.order_reference.clone()),
        ];
        if let Some(callback_url) = &self.config.callback_url {
            metadata.push(KeyValue::new("callbackUrl", callback_url.clone()));
        }

        Ok(TransactionRequest {
            amount: convert_from_cents(request.amount_cents).to_string(),
            currency: request.currency.clone(),
            description_text: request.description.clone(),
            request_date: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            requesting_organisation_transaction_reference: Uuid::new_v4().simple().to_string(),
            original_transaction_reference: request.transaction_id.clone(),
            debit_party: vec![KeyValue::new("msisdn", phone)],
            credit_party: vec![KeyValue::new("msisdn", self.config.merchant_number.clone())],
            metadata,
        })
    }

    /// Hex HMAC-SHA256 of the exact body bytes
    pub fn sign(&self, body: &[u8]) -> AppResult<String> {
        let mut mac = HmacSha256::new_from_slice(self.config.signing_secret.as_bytes())
            .map_err(|e| AppError::configuration(format!("invalid signing secret: {}", e)))?;
        mac.update(body);
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    #[cfg(feature = "gateway-preview")]
    pub fn preview_request(&self, request: &IntentRequest) -> AppResult<RequestPreview> {
        let body = self.build_request(request)?;
        let bytes = serde_json::to_vec(&body)?;
        let signature = self.sign(&bytes)?;

        Ok(RequestPreview {
            url: self.endpoint(),
            headers: vec![
                ("Authorization".to_string(), "Bearer ***".to_string()),
                ("Content-Type".to_string(), "application/json".to_string()),
                ("X-CorrelationID".to_string(), Uuid::new_v4().to_string()),
                ("X-Signature".to_string(), signature.clone()),
            ],
            body,
            signature,
        })
    }
}

#[async_trait]
impl PaymentGateway for MobileMoneyGateway {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    fn kind(&self) -> GatewayKind {
        GatewayKind::MobileMoney
    }

    async fn create_intent(&self, request: &IntentRequest) -> AppResult<IntentResponse> {
        let body = self.build_request(request)?;
        let bytes = serde_json::to_vec(&body)?;
        let signature = self.sign(&bytes)?;
        let correlation_id = Uuid::new_v4();

        info!(
            payment_id = %request.payment_id,
            transaction_id = %request.transaction_id,
            method = %request.method,
            correlation_id = %correlation_id,
            "Sending mobile money transaction request"
        );

        let builder = self
            .http
            .client()
            .post(self.endpoint())
            .header(AUTHORIZATION, format!("Bearer {}", self.config.api_key))
            .header(CONTENT_TYPE, "application/json")
            .header("X-CorrelationID", correlation_id.to_string())
            .header("X-Signature", signature)
            .body(bytes);

        let reply = self.http.send(builder).await?;

        if !reply.is_success() {
            let fault: GatewayFault = serde_json::from_str(&reply.body).unwrap_or_default();
            let message = fault
                .error_description
                .or(fault.error_code)
                .unwrap_or_else(|| format!("HTTP {}", reply.status));
            error!(
                payment_id = %request.payment_id,
                status = %reply.status,
                "Mobile money gateway rejected request: {}",
                message
            );
            return Err(AppError::provider(PROVIDER, message, false));
        }

        let provider_data: serde_json::Value = serde_json::from_str(&reply.body).map_err(|e| {
            AppError::provider(PROVIDER, format!("Invalid response format: {}", e), false)
        })?;
        let accepted: TransactionAccepted = serde_json::from_value(provider_data.clone()).map_err(|e| {
            AppError::provider(PROVIDER, format!("Invalid response format: {}", e), false)
        })?;

        let correlation = accepted
            .server_correlation_id
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| AppError::provider(PROVIDER, "Response is missing serverCorrelationId", false))?;
        let status = accepted.status.unwrap_or_else(|| "pending".to_string());

        info!(
            payment_id = %request.payment_id,
            server_correlation_id = %correlation,
            status = %status,
            notification_method = accepted.notification_method.as_deref().unwrap_or("polling"),
            "Mobile money transaction accepted"
        );

        Ok(IntentResponse {
            id: correlation.clone(),
            status,
            transaction_id: Some(correlation),
            session: None,
            provider_data,
        })
    }
}
