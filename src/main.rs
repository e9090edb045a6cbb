use pharmapay_backend::api::{self, AppState};
use pharmapay_backend::cache::PaymentViewCache;
use pharmapay_backend::config::{Config, LogFormat};
use pharmapay_backend::database::order_repository::OrderRepository;
use pharmapay_backend::database::payment_repository::PaymentRepository;
use pharmapay_backend::database::repository::{OrderStore, PaymentStore};
use pharmapay_backend::database::{self, PoolConfig};
use pharmapay_backend::payments::notification::{Notifier, TracingNotifier};
use pharmapay_backend::payments::orchestrator::{GatewayRegistry, PaymentIntentOrchestrator};
use pharmapay_backend::payments::providers::{HostedCheckoutGateway, MobileMoneyGateway};
use pharmapay_backend::payments::reconciliation::ReconciliationService;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=info,sqlx=warn"));

    match format {
        LogFormat::Json => tracing_subscriber::fmt().with_env_filter(filter).json().init(),
        LogFormat::Pretty => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
}

#[cfg(feature = "cache")]
async fn build_view_cache(config: &Config) -> Option<PaymentViewCache> {
    use pharmapay_backend::cache::cache::ttl;
    use pharmapay_backend::cache::{init_cache_pool, CacheConfig, RedisCache};

    let redis = config.redis.as_ref()?;
    let cache_config = CacheConfig {
        redis_url: redis.url.clone(),
        ..Default::default()
    };
    match init_cache_pool(cache_config).await {
        Ok(pool) => {
            info!("Payment view cache enabled");
            Some(PaymentViewCache::new(Arc::new(RedisCache::new(pool)), ttl::PAYMENT_VIEW))
        }
        Err(e) => {
            warn!("Redis unavailable, running without payment view cache: {}", e);
            None
        }
    }
}

#[cfg(not(feature = "cache"))]
async fn build_view_cache(config: &Config) -> Option<PaymentViewCache> {
    if config.redis.is_some() {
        warn!("REDIS_URL is set but the binary was built without the cache feature");
    }
    None
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
    }
    info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    let config = Config::from_env()?;
    init_tracing(config.log_format);

    info!("Starting PharmaPay payment service");
    info!("Environment: {}", config.server.environment);
    info!("Payment currency: {}", config.payments.currency);

    let defaults = PoolConfig::default();
    let pool_config = PoolConfig {
        max_connections: config.database.max_connections,
        min_connections: defaults.min_connections.min(config.database.max_connections),
        ..defaults
    };
    let pool = database::init_pool(&config.database.url, Some(pool_config)).await?;
    if config.database.run_migrations {
        database::run_migrations(&pool).await?;
    }

    let payments: Arc<dyn PaymentStore> = Arc::new(PaymentRepository::new(pool.clone()));
    let orders: Arc<dyn OrderStore> = Arc::new(OrderRepository::new(pool.clone()));
    let notifier: Arc<dyn Notifier> = Arc::new(TracingNotifier);

    let mut registry = GatewayRegistry::new();
    if let Some(mobile_money) = config.payments.mobile_money.clone() {
        registry = registry.register(Arc::new(MobileMoneyGateway::new(mobile_money)?));
    }
    if let Some(hosted_checkout) = config.payments.hosted_checkout.clone() {
        registry = registry.register(Arc::new(HostedCheckoutGateway::new(hosted_checkout)?));
    }
    info!("Gateways: {:?}", registry.names());

    let mut orchestrator =
        PaymentIntentOrchestrator::new(payments.clone(), registry, config.payments.currency.clone())?;
    let mut reconciliation = ReconciliationService::new(payments, orders, notifier);
    if let Some(cache) = build_view_cache(&config).await {
        orchestrator = orchestrator.with_cache(cache.clone());
        reconciliation = reconciliation.with_cache(cache);
    }

    let state = AppState {
        orchestrator: Arc::new(orchestrator),
        reconciliation: Arc::new(reconciliation),
        pool: Some(pool),
        environment: config.server.environment.clone(),
        expose_success_indicator: config.payments.expose_success_indicator,
        expose_error_details: !config.is_production(),
    };
    let app = api::router(state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}
