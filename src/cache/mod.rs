//! Caching layer for payment lookup projections

pub mod cache;
pub mod error;
pub mod keys;

pub use cache::{Cache, MemoryCache};
#[cfg(feature = "cache")]
pub use cache::RedisCache;
pub use error::{CacheError, CacheResult};

use crate::payments::types::{Order, Payment, PaymentView};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

#[cfg(feature = "cache")]
use bb8::Pool;
#[cfg(feature = "cache")]
use bb8_redis::RedisConnectionManager;
#[cfg(feature = "cache")]
use tracing::{error, info};

#[cfg(feature = "cache")]
pub type RedisPool = Pool<RedisConnectionManager>;

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub redis_url: String,
    pub max_connections: u32,
    pub min_idle: u32,
    pub connection_timeout: Duration,
    pub max_lifetime: Duration,
    pub idle_timeout: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://127.0.0.1:6379".to_string(),
            max_connections: 20,
            min_idle: 5,
            connection_timeout: Duration::from_secs(5),
            max_lifetime: Duration::from_secs(300),
            idle_timeout: Duration::from_secs(60),
        }
    }
}

#[cfg(feature = "cache")]
pub async fn init_cache_pool(config: CacheConfig) -> Result<RedisPool, CacheError> {
    info!(
        "Initializing Redis cache pool: max_connections={}",
        config.max_connections
    );

    let manager = RedisConnectionManager::new(config.redis_url.clone()).map_err(|e| {
        error!("Failed to create Redis connection manager: {}", e);
        CacheError::ConnectionError(e.to_string())
    })?;

    let pool = Pool::builder()
        .max_size(config.max_connections)
        .min_idle(config.min_idle)
        .connection_timeout(config.connection_timeout)
        .max_lifetime(config.max_lifetime)
        .idle_timeout(config.idle_timeout)
        .test_on_check_out(false)
        .build(manager)
        .await
        .map_err(|e| {
            error!("Failed to build Redis connection pool: {}", e);
            CacheError::ConnectionError(e.to_string())
        })?;

    if let Err(e) = health_check(&pool).await {
        warn!("Initial Redis connection test failed, but continuing: {}", e);
    }

    info!("Redis cache pool initialized successfully");
    Ok(pool)
}

#[cfg(feature = "cache")]
pub async fn health_check(pool: &RedisPool) -> Result<(), CacheError> {
    let mut conn = pool.get().await?;
    let _: String = redis::cmd("PING").query_async(&mut *conn).await?;
    Ok(())
}

/// Read-through cache of payment projections.
///
/// Every error is logged and treated as a miss; the store stays the source
/// of truth and a cache outage never fails a request.
#[derive(Clone)]
pub struct PaymentViewCache {
    backend: Arc<dyn Cache<PaymentView>>,
    ttl: Duration,
}

impl PaymentViewCache {
    pub fn new(backend: Arc<dyn Cache<PaymentView>>, ttl: Duration) -> Self {
        Self { backend, ttl }
    }

    pub async fn get(&self, key: &str) -> Option<PaymentView> {
        match self.backend.get(key).await {
            Ok(view) => view,
            Err(e) => {
                warn!(key = %key, "Payment view cache read failed: {}", e);
                None
            }
        }
    }

    pub async fn put(&self, key: &str, view: &PaymentView) {
        if let Err(e) = self.backend.set(key, view, Some(self.ttl)).await {
            warn!(key = %key, "Payment view cache write failed: {}", e);
        }
    }

    /// Drop every key a lookup for this payment could have used.
    ///
    /// `stale_ids` are transaction or gateway order ids the payment held
    /// before the write being invalidated.
    pub async fn invalidate(&self, payment: &Payment, order: &Order, stale_ids: &[&str]) {
        let mut keys = vec![
            keys::payment_by_order(order.id),
            keys::payment_by_transaction(&payment.transaction_id),
        ];
        if let Some(gateway_order_id) = payment.gateway_order_id.as_deref() {
            keys.push(keys::payment_by_transaction(gateway_order_id));
        }
        keys.extend(stale_ids.iter().map(|id| keys::payment_by_transaction(id)));
        keys.sort();
        keys.dedup();

        for key in keys {
            if let Err(e) = self.backend.delete(&key).await {
                warn!(key = %key, "Payment view cache invalidation failed: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::types::{OrderStatus, PaymentMethod};
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_invalidate_drops_every_lookup_key() {
        let cache = PaymentViewCache::new(Arc::new(MemoryCache::new()), Duration::from_secs(30));
        let order = Order {
            id: Uuid::new_v4(),
            reference: "ORD-7".to_string(),
            status: OrderStatus::Pending,
            total_amount: dec!(100),
            owner: None,
        };
        let mut payment = Payment::new(order.id, PaymentMethod::Mpgs, dec!(100), None);
        payment.gateway_order_id = Some("TXN2026000007".to_string());
        let view = PaymentView::new(&payment, &order);

        let by_order = keys::payment_by_order(order.id);
        let by_txn = keys::payment_by_transaction(&payment.transaction_id);
        let by_gateway_order = keys::payment_by_transaction("TXN2026000007");
        let by_old_txn = keys::payment_by_transaction("OLD-TXN");
        for key in [&by_order, &by_txn, &by_gateway_order, &by_old_txn] {
            cache.put(key, &view).await;
        }
        assert_eq!(cache.get(&by_order).await, Some(view.clone()));

        cache.invalidate(&payment, &order, &["OLD-TXN"]).await;
        for key in [&by_order, &by_txn, &by_gateway_order, &by_old_txn] {
            assert_eq!(cache.get(key).await, None);
        }
    }
}
