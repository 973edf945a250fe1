use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tracing::info;

use unipay::api::{self, AppState};
use unipay::cache::{self, store::CacheStore};
use unipay::config::AppConfig;
use unipay::database::{
    self, api_log_repository::ApiLogRepository, config_repository::ConfigRepository,
    notify_queue_repository::NotifyQueueRepository, order_repository::OrderRepository,
    payment_log_repository::PaymentLogRepository, user_repository::UserRepository,
};
use unipay::logging::init_tracing;
use unipay::payments::provider::PaymentProvider;
use unipay::payments::providers::{AlipayProvider, PaypalProvider, StripeProvider, WechatProvider};
use unipay::payments::registry::ProviderRegistry;
use unipay::services::admin::AdminService;
use unipay::services::audit::AuditLogger;
use unipay::services::auth::AuthService;
use unipay::services::notify::NotifyService;
use unipay::services::payment::PaymentService;
use unipay::workers::notify::NotifyWorkerPool;

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received, starting graceful shutdown");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;
    config.validate()?;
    init_tracing(&config.logging);

    info!("starting unipay server");

    let db = database::init_pool(&config.database).await?;
    let redis = cache::init_redis_pool(&config.redis).await?;
    let cache_store = CacheStore::new(redis.clone());

    let users = Arc::new(UserRepository::new(db.clone()));
    let configs = Arc::new(ConfigRepository::new(db.clone()));
    let orders = Arc::new(OrderRepository::new(db.clone()));
    let payment_logs = Arc::new(PaymentLogRepository::new(db.clone()));
    let notify_queue = Arc::new(NotifyQueueRepository::new(db.clone()));
    let api_logs = Arc::new(ApiLogRepository::new(db.clone()));

    // Adapters are constructed and registered here, at the composition
    // root; nothing self-registers.
    let adapters: Vec<Arc<dyn PaymentProvider>> = vec![
        Arc::new(AlipayProvider::new()?),
        Arc::new(WechatProvider::new()?),
        Arc::new(StripeProvider::new()?),
        Arc::new(PaypalProvider::new()?),
    ];
    let registry = Arc::new(ProviderRegistry::with_providers(adapters));
    info!(providers = ?registry.names(), "payment providers registered");

    let audit = Arc::new(AuditLogger::new(payment_logs.clone()));
    let notify = Arc::new(NotifyService::new(
        notify_queue.clone(),
        config.notify.max_retry,
    )?);
    let auth = Arc::new(AuthService::new(users.clone(), cache_store.clone()));
    let payment = Arc::new(PaymentService::new(
        orders.clone(),
        configs.clone(),
        registry.clone(),
        audit,
        notify.clone(),
        redis.clone(),
        cache_store,
    ));
    let admin = Arc::new(AdminService::new(
        users,
        configs,
        orders,
        payment_logs,
        auth.clone(),
        payment.clone(),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker_pool = NotifyWorkerPool::new(
        notify,
        config.notify.worker_count,
        config.notify.retry_interval,
    );
    let worker_handles = worker_pool.spawn(shutdown_rx);

    let state = AppState {
        auth,
        payment,
        admin,
        registry,
        api_logs,
        db,
        redis,
        admin_token: config.admin.token.clone(),
    };
    let app = api::router(state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!(%addr, "listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Workers drain their current tick, nothing is rolled back.
    let _ = shutdown_tx.send(true);
    for handle in worker_handles {
        let _ = handle.await;
    }

    info!("unipay server stopped");
    Ok(())
}
