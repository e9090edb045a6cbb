//! Payment domain types
//!
//! The `Payment` aggregate, the partial `Order` view this subsystem needs,
//! the gateway event log entries, and the projection handed to callers.

use crate::error::AppError;
use crate::payments::status::PaymentStatus;
use chrono::{DateTime, Datelike, Utc};
use rand::Rng;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Prefix of locally generated transaction references
pub const TRANSACTION_ID_PREFIX: &str = "TXN";

/// Payment methods accepted at checkout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Mvola,
    OrangeMoney,
    AirtelMoney,
    /// Hosted checkout session on the card gateway
    Mpgs,
    CardWallet,
}

/// Which adapter family serves a payment method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GatewayKind {
    MobileMoney,
    HostedCheckout,
    CardWallet,
}

impl PaymentMethod {
    pub const ALL: [PaymentMethod; 5] = [
        PaymentMethod::Mvola,
        PaymentMethod::OrangeMoney,
        PaymentMethod::AirtelMoney,
        PaymentMethod::Mpgs,
        PaymentMethod::CardWallet,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Mvola => "mvola",
            PaymentMethod::OrangeMoney => "orange_money",
            PaymentMethod::AirtelMoney => "airtel_money",
            PaymentMethod::Mpgs => "mpgs",
            PaymentMethod::CardWallet => "card_wallet",
        }
    }

    pub fn gateway_kind(&self) -> GatewayKind {
        match self {
            PaymentMethod::Mvola | PaymentMethod::OrangeMoney | PaymentMethod::AirtelMoney => {
                GatewayKind::MobileMoney
            }
            PaymentMethod::Mpgs => GatewayKind::HostedCheckout,
            PaymentMethod::CardWallet => GatewayKind::CardWallet,
        }
    }

    pub fn is_mobile_money(&self) -> bool {
        self.gateway_kind() == GatewayKind::MobileMoney
    }

    pub fn is_hosted_checkout(&self) -> bool {
        self.gateway_kind() == GatewayKind::HostedCheckout
    }
}

impl FromStr for PaymentMethod {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PaymentMethod::ALL
            .into_iter()
            .find(|method| method.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| AppError::validation(format!("Unsupported payment method '{}'", s)))
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Order lifecycle states. Only `Pending -> Confirmed` is driven by payments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Confirmed,
    Preparing,
    Shipped,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Confirmed => "confirmed",
            OrderStatus::Preparing => "preparing",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(OrderStatus::Pending),
            "confirmed" => Some(OrderStatus::Confirmed),
            "preparing" => Some(OrderStatus::Preparing),
            "shipped" => Some(OrderStatus::Shipped),
            "delivered" => Some(OrderStatus::Delivered),
            "cancelled" => Some(OrderStatus::Cancelled),
            _ => None,
        }
    }
}

/// The paying user of an order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub id: Uuid,
    pub email: Option<String>,
    pub phone_number: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub reference: String,
    pub status: OrderStatus,
    pub total_amount: Decimal,
    pub owner: Option<Customer>,
}

/// Payment aggregate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub id: Uuid,
    pub transaction_id: String,
    pub amount: Decimal,
    pub method: PaymentMethod,
    pub status: PaymentStatus,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    /// Integrity token issued by the hosted-checkout gateway at session creation
    pub success_indicator: Option<String>,
    /// Identifier the gateway was given for this payment. Set when the intent
    /// is opened and left alone by reconciliation, so gateway retries keep
    /// resolving after `transaction_id` is replaced.
    pub gateway_order_id: Option<String>,
    pub order_id: Uuid,
    pub phone_number: Option<String>,
    pub version: i64,
}

impl Payment {
    pub fn new(
        order_id: Uuid,
        method: PaymentMethod,
        amount: Decimal,
        phone_number: Option<String>,
    ) -> Self {
        let created_at = Utc::now();
        Self {
            id: Uuid::new_v4(),
            transaction_id: generate_transaction_id(created_at),
            amount,
            method,
            status: PaymentStatus::Pending,
            created_at,
            processed_at: None,
            success_indicator: None,
            gateway_order_id: None,
            order_id,
            phone_number,
            version: 0,
        }
    }

    /// Apply `to` if the state machine allows it from the current status.
    ///
    /// The first move away from `pending` stamps `processed_at`.
    pub fn try_transition(&mut self, to: PaymentStatus, now: DateTime<Utc>) -> bool {
        if !self.status.can_transition_to(&to) {
            return false;
        }
        if self.status == PaymentStatus::Pending && self.processed_at.is_none() {
            self.processed_at = Some(now);
        }
        self.status = to;
        true
    }

    pub fn is_successful(&self) -> bool {
        self.status == PaymentStatus::Completed
    }

    pub fn can_be_refunded(&self) -> bool {
        self.status == PaymentStatus::Completed
    }

    /// Mobile-money gateways settle asynchronously and may need operator follow-up
    pub fn requires_manual_processing(&self) -> bool {
        self.method.is_mobile_money()
    }
}

/// `TXN` + year + six zero-padded random digits
pub fn generate_transaction_id(at: DateTime<Utc>) -> String {
    let suffix: u32 = rand::thread_rng().gen_range(0..1_000_000);
    format!("{}{}{:06}", TRANSACTION_ID_PREFIX, at.year(), suffix)
}

/// Where a gateway payload entered the system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayEventSource {
    IntentCreated,
    Webhook,
    Confirmation,
}

impl GatewayEventSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            GatewayEventSource::IntentCreated => "intent_created",
            GatewayEventSource::Webhook => "webhook",
            GatewayEventSource::Confirmation => "confirmation",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "intent_created" => Some(GatewayEventSource::IntentCreated),
            "webhook" => Some(GatewayEventSource::Webhook),
            "confirmation" => Some(GatewayEventSource::Confirmation),
            _ => None,
        }
    }
}

/// One entry of a payment's append-only gateway log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayEvent {
    pub source: GatewayEventSource,
    pub payload: serde_json::Value,
    pub received_at: DateTime<Utc>,
}

impl GatewayEvent {
    pub fn new(source: GatewayEventSource, payload: serde_json::Value) -> Self {
        Self {
            source,
            payload,
            received_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderSummary {
    pub id: Uuid,
    pub reference: String,
    pub status: OrderStatus,
    pub total_amount: Decimal,
}

/// Public projection of a payment. Never carries the success indicator or gateway log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentView {
    pub id: Uuid,
    pub transaction_id: String,
    pub amount: Decimal,
    pub method: PaymentMethod,
    pub status: PaymentStatus,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub order: OrderSummary,
}

impl PaymentView {
    pub fn new(payment: &Payment, order: &Order) -> Self {
        Self {
            id: payment.id,
            transaction_id: payment.transaction_id.clone(),
            amount: payment.amount,
            method: payment.method,
            status: payment.status,
            created_at: payment.created_at,
            processed_at: payment.processed_at,
            order: OrderSummary {
                id: order.id,
                reference: order.reference.clone(),
                status: order.status,
                total_amount: order.total_amount,
            },
        }
    }
}

/// Input handed to a gateway adapter when opening a payment intent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentRequest {
    pub payment_id: Uuid,
    /// Local reference, reused as the gateway's order id / original transaction reference
    pub transaction_id: String,
    pub method: PaymentMethod,
    /// Amount in minor units
    pub amount_cents: i64,
    pub currency: String,
    pub phone_number: Option<String>,
    pub customer_id: Uuid,
    pub order_reference: String,
    pub description: String,
}

/// Hosted-checkout session identifiers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutSession {
    pub session_id: String,
    pub session_version: Option<String>,
    pub success_indicator: String,
}

/// Normalized gateway answer to an intent request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentResponse {
    /// Gateway-issued identifier (correlation id or session id)
    pub id: String,
    /// Raw status reported by the gateway
    pub status: String,
    /// Replaces the payment's transaction id when present
    pub transaction_id: Option<String>,
    pub session: Option<CheckoutSession>,
    /// Gateway payload kept for the event log, secrets stripped
    pub provider_data: serde_json::Value,
}
