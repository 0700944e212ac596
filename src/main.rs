use fastloan_backend::api::{self, MpesaState};
use fastloan_backend::config::AppConfig;
use fastloan_backend::database::{
    init_pool_from_config, memory::InMemoryTransactionStore,
    mpesa_transaction_repository::MpesaTransactionRepository, repository::TransactionStore,
    run_migrations,
};
use fastloan_backend::health::HealthChecker;
use fastloan_backend::logging::init_tracing;
use fastloan_backend::payments::{MpesaGateway, MpesaProvider};
use fastloan_backend::services::callback_receiver::CallbackReceiver;
use fastloan_backend::services::payment_initiator::PaymentInitiator;
use fastloan_backend::services::status_resolver::StatusResolver;
use sqlx::PgPool;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;
    init_tracing(&config.logging);
    config.validate()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        mpesa_environment = ?config.mpesa.environment,
        skip_externals = config.skip_externals,
        "Starting Fast Loan payment backend"
    );
    info!(mpesa = ?config.mpesa, "M-Pesa configuration loaded");
    if !config.mpesa.is_complete() {
        warn!("M-Pesa credentials incomplete; payment calls will report a configuration error");
    }

    let store: Arc<dyn TransactionStore>;
    let db_pool: Option<PgPool>;
    if config.skip_externals {
        info!("Skipping database initialization (SKIP_EXTERNALS=true), using in-memory store");
        store = Arc::new(InMemoryTransactionStore::new());
        db_pool = None;
    } else {
        let pool = init_pool_from_config(&config.database).await.map_err(|e| {
            error!("Failed to initialize database pool: {}", e);
            e
        })?;
        run_migrations(&pool).await?;
        info!(
            max_connections = pool.options().get_max_connections(),
            "Database connection pool initialized"
        );
        store = Arc::new(MpesaTransactionRepository::new(pool.clone()));
        db_pool = Some(pool);
    }

    let gateway: Arc<dyn MpesaGateway> = Arc::new(MpesaProvider::new(&config.mpesa)?);
    let mpesa_state = MpesaState {
        initiator: Arc::new(PaymentInitiator::new(
            gateway.clone(),
            config.mpesa.callback_url.clone(),
            config.mpesa.account_reference.clone(),
        )),
        resolver: Arc::new(StatusResolver::new(store.clone(), gateway)),
        callback_receiver: Arc::new(CallbackReceiver::new(store)),
    };
    let health_checker = HealthChecker::new(db_pool, config.mpesa.is_complete());

    let app = api::router(mpesa_state, health_checker, &config.server);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(
        address = %addr,
        callback_url = %config.mpesa.callback_url,
        "Server listening on http://{}",
        addr
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}
