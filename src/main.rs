use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use axum::{routing::get, Router};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use axum::body::Body;
use axum::response::IntoResponse;
use http::{HeaderValue, StatusCode};
use tower_governor::governor::GovernorConfigBuilder;
use tower_governor::key_extractor::SmartIpKeyExtractor;
use tower_governor::{GovernorError, GovernorLayer};

mod config;
mod db;
mod error;
mod i18n;
mod middleware;
mod routes;
mod services;

use config::Config;
use db::{
    DonationRepository, DonationStore, NotificationLedger, NotificationRepository,
    UserDirectory, UserRepository,
};
use error::AppError;
use services::{
    identity::{IdentityGate, JwtIdentityGate},
    init,
    queries::DonationQueries,
    reservation::ReservationEngine,
};

pub struct AppState {
    pub db: sqlx::SqlitePool,
    pub config: Config,
    pub engine: ReservationEngine,
    pub queries: DonationQueries,
    pub donations: Arc<dyn DonationStore>,
    pub ledger: Arc<dyn NotificationLedger>,
    pub directory: Arc<dyn UserDirectory>,
    pub identity: Arc<dyn IdentityGate>,
}

impl AppState {
    /// Wire the SQLite-backed stores and the JWT identity gate.
    pub fn new(db: sqlx::SqlitePool, config: Config) -> Self {
        let donations: Arc<dyn DonationStore> = Arc::new(DonationRepository::new(db.clone()));
        let ledger: Arc<dyn NotificationLedger> =
            Arc::new(NotificationRepository::new(db.clone()));
        let directory: Arc<dyn UserDirectory> = Arc::new(UserRepository::new(db.clone()));
        let identity: Arc<dyn IdentityGate> = Arc::new(JwtIdentityGate::new(&config.jwt));

        AppState {
            engine: ReservationEngine::new(donations.clone(), ledger.clone(), directory.clone()),
            queries: DonationQueries::new(donations.clone()),
            db,
            config,
            donations,
            ledger,
            directory,
            identity,
        }
    }
}

/// 429 (or 400) response in the same JSON shape as `AppError`.
fn rate_limit_response(error: GovernorError) -> http::Response<Body> {
    match error {
        GovernorError::TooManyRequests { wait_time, headers } => {
            let body = AppError::json_body(
                "RATE_LIMITED",
                &AppError::RateLimited.to_string(),
                Some(serde_json::json!({ "retry_after_seconds": wait_time })),
            );

            let mut resp = http::Response::new(Body::from(body));
            *resp.status_mut() = StatusCode::TOO_MANY_REQUESTS;
            resp.headers_mut().insert(
                http::header::CONTENT_TYPE,
                HeaderValue::from_static("application/json"),
            );

            if let Some(hmap) = headers {
                for (name, value) in hmap.iter() {
                    resp.headers_mut().append(name.clone(), value.clone());
                }
            }

            if let Ok(value) = HeaderValue::from_str(&wait_time.to_string()) {
                resp.headers_mut().insert(http::header::RETRY_AFTER, value);
            }

            resp
        }
        GovernorError::UnableToExtractKey => AppError::BadRequest(
            "Unable to determine client IP for rate limiting".to_string(),
        )
        .into_response(),
        GovernorError::Other { code, msg, headers } => {
            let body = msg.unwrap_or_else(|| "Rate limiting error".to_string());
            let mut resp = http::Response::new(Body::from(body));
            *resp.status_mut() =
                StatusCode::from_u16(code.as_u16()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            if let Some(hmap) = headers {
                for (name, value) in hmap.iter() {
                    resp.headers_mut().append(name.clone(), value.clone());
                }
            }
            resp
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;

    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "food_rescue=debug,tower_http=debug".into());
    if config.logging.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    tracing::info!("Starting Food Rescue service");

    let pool = init::init_db(&config).await?;
    let app_state = Arc::new(AppState::new(pool, config.clone()));

    // Shutdown notifier for background workers and std threads
    let (shutdown_tx, _shutdown_rx) = tokio::sync::broadcast::channel::<()>(1);
    let thread_shutdown = Arc::new(AtomicBool::new(false));

    let bg_handles = init::spawn_background_workers(
        &app_state.config,
        app_state.donations.clone(),
        shutdown_tx.clone(),
    );

    // Rate limiter for donation mutations, keyed by client IP
    let mut mutations_builder = GovernorConfigBuilder::default();
    mutations_builder.per_second(config.rate_limit.mutations_per_second.into());
    mutations_builder.burst_size(config.rate_limit.mutations_burst);
    mutations_builder.key_extractor(SmartIpKeyExtractor);
    mutations_builder.error_handler(rate_limit_response);

    let mutations_gov_conf = Arc::new(
        mutations_builder
            .finish()
            .ok_or_else(|| anyhow::anyhow!("Failed to build mutations governor config"))?,
    );

    // Background cleanup for limiter storage
    let limiter_cleaner = {
        let limiter = mutations_gov_conf.limiter().clone();
        let interval = Duration::from_secs(60);
        let flag = thread_shutdown.clone();
        std::thread::spawn(move || {
            let tick = Duration::from_secs(1);
            loop {
                for _ in 0..interval.as_secs() {
                    if flag.load(Ordering::SeqCst) {
                        tracing::info!("Rate limiter cleanup thread exiting");
                        return;
                    }
                    std::thread::sleep(tick);
                }
                tracing::debug!("mutations rate limiter size: {}", limiter.len());
                limiter.retain_recent();
            }
        })
    };

    let mutations_rate_layer = GovernorLayer {
        config: mutations_gov_conf.clone(),
    };

    let cors_origin = config
        .server
        .frontend_url
        .parse::<HeaderValue>()
        .map_err(|_| anyhow::anyhow!("Invalid FRONTEND_URL for CORS"))?;

    let app = Router::new()
        .route("/health", get(routes::health::health_check))
        .nest(
            "/api",
            routes::api_router(routes::donations::mutations_router().layer(mutations_rate_layer)),
        )
        .with_state(app_state.clone())
        .layer(axum::middleware::from_fn(
            middleware::security_headers::security_headers_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(cors_origin)
                .allow_methods([
                    http::Method::GET,
                    http::Method::POST,
                    http::Method::PUT,
                    http::Method::DELETE,
                    http::Method::OPTIONS,
                ])
                .allow_headers([
                    http::header::CONTENT_TYPE,
                    http::header::AUTHORIZATION,
                    http::header::ACCEPT,
                ])
                .allow_credentials(true),
        );

    let addr = format!("{}:{}", config.server.host, config.server.port);
    tracing::info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let server_fut = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    );

    let shutdown_tx_clone = shutdown_tx.clone();
    let thread_shutdown_clone = thread_shutdown.clone();

    let signal_fut = async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut term) => {
                    tokio::select! {
                        _ = ctrl_c => {},
                        _ = term.recv() => {},
                    }
                }
                Err(e) => {
                    tracing::warn!("Failed to bind SIGTERM, listening for Ctrl+C only: {}", e);
                    let _ = ctrl_c.await;
                }
            }
        }

        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
        }

        tracing::info!("Shutdown signal received, notifying background workers and threads");
        let _ = shutdown_tx_clone.send(());
        thread_shutdown_clone.store(true, Ordering::SeqCst);
    };

    tokio::select! {
        res = server_fut => {
            if let Err(e) = res {
                tracing::error!("Server error: {}", e);
            }
        }
        _ = signal_fut => {
            tracing::info!("Signal handler completed; server stopped accepting connections");
        }
    }

    let shutdown_wait = Duration::from_secs(15);
    tracing::info!(
        "Waiting up to {}s for background workers to exit",
        shutdown_wait.as_secs()
    );
    let bg_wait = async {
        for h in bg_handles {
            let _ = h.await;
        }
    };
    let _ = tokio::time::timeout(shutdown_wait, bg_wait).await;

    if let Err(e) = limiter_cleaner.join() {
        tracing::warn!("Rate limiter cleanup thread join failed: {:?}", e);
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
