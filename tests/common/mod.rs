//! Shared fixtures: scripted gateways, in-memory stores and a recording notifier.

#![allow(dead_code)]

use async_trait::async_trait;
use pharmapay_backend::cache::cache::ttl;
use pharmapay_backend::cache::{MemoryCache, PaymentViewCache};
use pharmapay_backend::database::in_memory::{InMemoryOrderStore, InMemoryPaymentStore};
use pharmapay_backend::error::{AppError, AppResult};
use pharmapay_backend::payments::notification::{
    Notification, NotificationError, NotificationEvent, Notifier,
};
use pharmapay_backend::payments::orchestrator::{GatewayRegistry, PaymentIntentOrchestrator};
use pharmapay_backend::payments::reconciliation::ReconciliationService;
use pharmapay_backend::payments::traits::PaymentGateway;
use pharmapay_backend::payments::types::{
    CheckoutSession, Customer, GatewayKind, IntentRequest, IntentResponse, Order, OrderStatus,
};
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

pub const SUCCESS_INDICATOR: &str = "a1b2c3d4e5f60718";

/// Hosted-checkout gateway that always opens a session with a fixed indicator
#[derive(Default)]
pub struct FakeHostedCheckout {
    pub calls: AtomicUsize,
}

#[async_trait]
impl PaymentGateway for FakeHostedCheckout {
    fn name(&self) -> &'static str {
        "hosted_checkout"
    }

    fn kind(&self) -> GatewayKind {
        GatewayKind::HostedCheckout
    }

    async fn create_intent(&self, request: &IntentRequest) -> AppResult<IntentResponse> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(IntentResponse {
            id: format!("SESSION-{}", n),
            status: "SUCCESS".to_string(),
            transaction_id: None,
            session: Some(CheckoutSession {
                session_id: format!("SESSION-{}", n),
                session_version: Some("v1".to_string()),
                success_indicator: SUCCESS_INDICATOR.to_string(),
            }),
            provider_data: serde_json::json!({ "order": request.transaction_id }),
        })
    }
}

/// Mobile-money gateway answering with a fresh correlation id
#[derive(Default)]
pub struct FakeMobileMoney {
    pub phones: Mutex<Vec<Option<String>>>,
}

#[async_trait]
impl PaymentGateway for FakeMobileMoney {
    fn name(&self) -> &'static str {
        "mobile_money"
    }

    fn kind(&self) -> GatewayKind {
        GatewayKind::MobileMoney
    }

    async fn create_intent(&self, request: &IntentRequest) -> AppResult<IntentResponse> {
        if let Ok(mut phones) = self.phones.lock() {
            phones.push(request.phone_number.clone());
        }
        let correlation = format!("MM-{}", Uuid::new_v4().simple());
        Ok(IntentResponse {
            id: correlation.clone(),
            status: "pending".to_string(),
            transaction_id: Some(correlation),
            session: None,
            provider_data: serde_json::json!({ "status": "pending" }),
        })
    }
}

/// Gateway that refuses every intent
pub struct DecliningGateway {
    pub kind: GatewayKind,
}

#[async_trait]
impl PaymentGateway for DecliningGateway {
    fn name(&self) -> &'static str {
        "declining"
    }

    fn kind(&self) -> GatewayKind {
        self.kind
    }

    async fn create_intent(&self, _request: &IntentRequest) -> AppResult<IntentResponse> {
        Err(AppError::provider("declining", "merchant account suspended", false))
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub events: Mutex<Vec<(NotificationEvent, String)>>,
}

impl RecordingNotifier {
    pub fn count(&self, event: NotificationEvent) -> usize {
        self.events
            .lock()
            .map(|events| events.iter().filter(|(e, _)| *e == event).count())
            .unwrap_or(0)
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), NotificationError> {
        self.events
            .lock()
            .map_err(|e| NotificationError::Unavailable(e.to_string()))?
            .push((notification.event, notification.order_reference.clone()));
        Ok(())
    }
}

pub fn customer() -> Customer {
    Customer {
        id: Uuid::new_v4(),
        email: Some("patient@example.com".to_string()),
        phone_number: Some("0341234567".to_string()),
    }
}

pub fn order(reference: &str, total: Decimal) -> Order {
    Order {
        id: Uuid::new_v4(),
        reference: reference.to_string(),
        status: OrderStatus::Pending,
        total_amount: total,
        owner: Some(customer()),
    }
}

pub struct Harness {
    pub payments: Arc<InMemoryPaymentStore>,
    pub orders: Arc<InMemoryOrderStore>,
    pub notifier: Arc<RecordingNotifier>,
    pub hosted_checkout: Arc<FakeHostedCheckout>,
    pub mobile_money: Arc<FakeMobileMoney>,
    pub orchestrator: Arc<PaymentIntentOrchestrator>,
    pub reconciliation: Arc<ReconciliationService>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_registry(|registry| registry)
    }

    /// Both services share one in-memory payment view cache
    pub fn with_cache() -> Self {
        Self::build(|registry| registry, true)
    }

    /// Build with both fake gateways registered, then let the caller adjust the registry
    pub fn with_registry(adjust: impl FnOnce(GatewayRegistry) -> GatewayRegistry) -> Self {
        Self::build(adjust, false)
    }

    fn build(adjust: impl FnOnce(GatewayRegistry) -> GatewayRegistry, cached: bool) -> Self {
        let payments = Arc::new(InMemoryPaymentStore::new());
        let orders = Arc::new(InMemoryOrderStore::new());
        let notifier = Arc::new(RecordingNotifier::default());
        let hosted_checkout = Arc::new(FakeHostedCheckout::default());
        let mobile_money = Arc::new(FakeMobileMoney::default());

        let registry = GatewayRegistry::new()
            .register(hosted_checkout.clone())
            .register(mobile_money.clone());

        let mut orchestrator =
            PaymentIntentOrchestrator::new(payments.clone(), adjust(registry), "Ar").unwrap();
        let mut reconciliation =
            ReconciliationService::new(payments.clone(), orders.clone(), notifier.clone());
        if cached {
            let cache = PaymentViewCache::new(Arc::new(MemoryCache::new()), ttl::PAYMENT_VIEW);
            orchestrator = orchestrator.with_cache(cache.clone());
            reconciliation = reconciliation.with_cache(cache);
        }

        Self {
            payments,
            orders,
            notifier,
            hosted_checkout,
            mobile_money,
            orchestrator: Arc::new(orchestrator),
            reconciliation: Arc::new(reconciliation),
        }
    }

    pub async fn add_order(&self, reference: &str, total: Decimal) -> Order {
        let order = order(reference, total);
        self.orders.insert(order.clone()).await;
        order
    }
}
