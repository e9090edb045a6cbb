//! Integration tests for the Postgres payment and order stores
//!
//! These tests require a running Postgres database; migrations are applied on setup.
//! Run with: DATABASE_URL=postgres://... cargo test --test postgres_store_test -- --ignored

use pharmapay_backend::database::order_repository::OrderRepository;
use pharmapay_backend::database::payment_repository::PaymentRepository;
use pharmapay_backend::database::repository::{
    OrderStore, PaymentStore, Reconciliation, TransitionOutcome,
};
use pharmapay_backend::database::{init_pool, run_migrations, PoolConfig};
use pharmapay_backend::payments::status::PaymentStatus;
use pharmapay_backend::payments::types::{
    GatewayEvent, GatewayEventSource, OrderStatus, Payment, PaymentMethod,
};
use rust_decimal_macros::dec;
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

async fn setup_db() -> PgPool {
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let pool = init_pool(&database_url, Some(PoolConfig::default()))
        .await
        .expect("Failed to init DB pool");
    run_migrations(&pool).await.expect("Failed to run migrations");
    pool
}

/// Insert a customer and a pending order, returning the order id and reference
async fn seed_order(pool: &PgPool) -> (Uuid, String) {
    let customer_id = Uuid::new_v4();
    sqlx::query("INSERT INTO customers (id, email, phone_number) VALUES ($1, $2, $3)")
        .bind(customer_id)
        .bind("patient@example.com")
        .bind("0341234567")
        .execute(pool)
        .await
        .unwrap();

    let order_id = Uuid::new_v4();
    let reference = format!("ORD-{}", order_id.simple());
    sqlx::query(
        "INSERT INTO orders (id, reference, customer_id, status, total_amount)
         VALUES ($1, $2, $3, 'pending', $4)",
    )
    .bind(order_id)
    .bind(&reference)
    .bind(customer_id)
    .bind(dec!(45000))
    .execute(pool)
    .await
    .unwrap();

    (order_id, reference)
}

fn event(source: GatewayEventSource) -> GatewayEvent {
    GatewayEvent::new(source, serde_json::json!({ "test": true }))
}

fn completed() -> Reconciliation {
    Reconciliation {
        target: Some(PaymentStatus::Completed),
        transaction_id: None,
        event: event(GatewayEventSource::Confirmation),
    }
}

#[tokio::test]
#[ignore = "requires Postgres"]
async fn test_order_lookup_includes_owner() {
    let pool = setup_db().await;
    let (order_id, reference) = seed_order(&pool).await;
    let orders = OrderRepository::new(pool);

    let order = orders.find_by_reference(&reference).await.unwrap().unwrap();
    assert_eq!(order.id, order_id);
    assert_eq!(order.status, OrderStatus::Pending);
    assert_eq!(order.total_amount, dec!(45000));
    assert_eq!(
        order.owner.unwrap().phone_number.as_deref(),
        Some("0341234567")
    );

    assert!(orders.find_by_id(Uuid::new_v4()).await.unwrap().is_none());
}

#[tokio::test]
#[ignore = "requires Postgres"]
async fn test_intent_then_reconcile() {
    let pool = setup_db().await;
    let (order_id, _) = seed_order(&pool).await;
    let payments = PaymentRepository::new(pool);

    let mut payment = Payment::new(order_id, PaymentMethod::Mpgs, dec!(45000), None);
    payment.success_indicator = Some("indicator-1".to_string());
    let saved = payments
        .save_intent(&payment, event(GatewayEventSource::IntentCreated))
        .await
        .unwrap();
    assert_eq!(saved.status, PaymentStatus::Pending);
    assert_eq!(saved.version, 0);

    let result = payments.reconcile(payment.id, completed()).await.unwrap();
    assert_eq!(
        result.outcome,
        TransitionOutcome::Applied {
            from: PaymentStatus::Pending,
            to: PaymentStatus::Completed
        }
    );
    assert!(result.payment.processed_at.is_some());

    // Refused regressions are still logged
    let result = payments
        .reconcile(
            payment.id,
            Reconciliation {
                target: Some(PaymentStatus::Failed),
                transaction_id: None,
                event: event(GatewayEventSource::Webhook),
            },
        )
        .await
        .unwrap();
    assert!(matches!(result.outcome, TransitionOutcome::Rejected { .. }));

    let stored = payments.find_by_id(payment.id).await.unwrap().unwrap();
    assert_eq!(stored.status, PaymentStatus::Completed);
    assert_eq!(stored.success_indicator.as_deref(), Some("indicator-1"));

    let sources: Vec<_> = payments
        .gateway_events(payment.id)
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.source)
        .collect();
    assert_eq!(
        sources,
        vec![
            GatewayEventSource::IntentCreated,
            GatewayEventSource::Confirmation,
            GatewayEventSource::Webhook
        ]
    );

    // A payment that left pending cannot be overwritten by a new intent
    let err = payments
        .save_intent(&payment, event(GatewayEventSource::IntentCreated))
        .await
        .unwrap_err();
    assert!(err.is_conflict());
}

#[tokio::test]
#[ignore = "requires Postgres"]
async fn test_reported_transaction_id_that_is_taken_is_skipped() {
    let pool = setup_db().await;
    let (first_order, _) = seed_order(&pool).await;
    let (second_order, _) = seed_order(&pool).await;
    let payments = PaymentRepository::new(pool);

    let first = Payment::new(first_order, PaymentMethod::Mvola, dec!(45000), None);
    let second = Payment::new(second_order, PaymentMethod::Mvola, dec!(45000), None);
    payments
        .save_intent(&first, event(GatewayEventSource::IntentCreated))
        .await
        .unwrap();
    payments
        .save_intent(&second, event(GatewayEventSource::IntentCreated))
        .await
        .unwrap();

    let result = payments
        .reconcile(
            second.id,
            Reconciliation {
                target: None,
                transaction_id: Some(first.transaction_id.clone()),
                event: event(GatewayEventSource::Webhook),
            },
        )
        .await
        .unwrap();

    assert!(result.transaction_id_conflict);
    assert_eq!(result.payment.transaction_id, second.transaction_id);
}

#[tokio::test]
#[ignore = "requires Postgres"]
async fn test_gateway_order_id_outlives_transaction_id() {
    let pool = setup_db().await;
    let (order_id, _) = seed_order(&pool).await;
    let payments = PaymentRepository::new(pool);

    let mut payment = Payment::new(order_id, PaymentMethod::Mpgs, dec!(45000), None);
    payment.gateway_order_id = Some(payment.transaction_id.clone());
    payments
        .save_intent(&payment, event(GatewayEventSource::IntentCreated))
        .await
        .unwrap();

    let gateway_transaction = format!("GW-{}", Uuid::new_v4().simple());
    payments
        .reconcile(
            payment.id,
            Reconciliation {
                target: Some(PaymentStatus::Completed),
                transaction_id: Some(gateway_transaction.clone()),
                event: event(GatewayEventSource::Webhook),
            },
        )
        .await
        .unwrap();

    assert!(payments
        .find_by_transaction_id(&payment.transaction_id)
        .await
        .unwrap()
        .is_none());
    let found = payments
        .find_by_gateway_order_id(&payment.transaction_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.id, payment.id);
    assert_eq!(found.transaction_id, gateway_transaction);
}

#[tokio::test]
#[ignore = "requires Postgres"]
async fn test_concurrent_completion_applies_once() {
    let pool = setup_db().await;
    let (order_id, _) = seed_order(&pool).await;
    let payments = Arc::new(PaymentRepository::new(pool.clone()));
    let orders = Arc::new(OrderRepository::new(pool));

    let payment = Payment::new(order_id, PaymentMethod::Mpgs, dec!(45000), None);
    payments
        .save_intent(&payment, event(GatewayEventSource::IntentCreated))
        .await
        .unwrap();

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let payments = payments.clone();
        let orders = orders.clone();
        let payment_id = payment.id;
        tasks.push(tokio::spawn(async move {
            let result = payments.reconcile(payment_id, completed()).await.unwrap();
            let confirmed = orders.confirm_if_pending(order_id).await.unwrap();
            (result.outcome.is_applied(), confirmed)
        }));
    }

    let mut applied = 0;
    let mut confirmed = 0;
    for task in tasks {
        let (a, c) = task.await.unwrap();
        applied += a as usize;
        confirmed += c as usize;
    }
    assert_eq!(applied, 1);
    assert_eq!(confirmed, 1);

    let events = payments.gateway_events(payment.id).await.unwrap();
    assert_eq!(events.len(), 9);
}

#[tokio::test]
#[ignore = "requires Postgres"]
async fn test_confirm_unknown_order_is_not_found() {
    let pool = setup_db().await;
    let orders = OrderRepository::new(pool);

    let err = orders.confirm_if_pending(Uuid::new_v4()).await.unwrap_err();
    assert!(err.is_not_found());
}
