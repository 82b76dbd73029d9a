//! PROD.AI backend binary.
//!
//! Wires configuration, the live Firestore and Mercado Pago adapters, the
//! router, and the background sweep worker, then serves until ctrl-c or
//! SIGTERM.

use axum::extract::DefaultBodyLimit;
use prodai_backend::auth::{IdentityVerifier, JwtIdentityVerifier};
use prodai_backend::chat::MessageGuard;
use prodai_backend::config::ConfigBuilder;
use prodai_backend::gateway::{MercadoPagoClient, MercadoPagoConfig};
use prodai_backend::http::AppState;
use prodai_backend::jobs::SweepWorker;
use prodai_backend::store::{FirestoreConfig, FirestoreUserStore};
use prodai_backend::subscription::{LifecycleManager, WebhookProcessor};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tower_http::cors::CorsLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ConfigBuilder::new().from_env().build()?;
    prodai_backend::init_tracing_with_config(&config);

    let store = FirestoreUserStore::new(
        FirestoreConfig {
            project_id: config.store.project_id.clone(),
            collection: config.store.collection.clone(),
            base_url: config.store.base_url.clone(),
            timeout_seconds: config.store.timeout_seconds,
        },
        config.store.token.clone(),
    )?;

    let gateway = MercadoPagoClient::new(
        MercadoPagoConfig {
            base_url: config.gateway.base_url.clone(),
            timeout_seconds: config.gateway.timeout_seconds,
        },
        config.gateway.access_token.clone(),
    )?;

    let mut verifier = JwtIdentityVerifier::from_secret(&config.auth.jwt_secret)?;
    if let Some(issuer) = &config.auth.issuer {
        verifier = verifier.with_issuer(issuer);
    }
    if let Some(audience) = &config.auth.audience {
        verifier = verifier.with_audience(audience);
    }
    let verifier: Arc<dyn IdentityVerifier> = Arc::new(verifier);

    let manager = Arc::new(LifecycleManager::new(
        store.clone(),
        gateway.clone(),
        config.subscription.free_daily_quota,
    ));
    let webhooks = Arc::new(WebhookProcessor::new(
        Arc::clone(&manager),
        gateway,
        config.webhook.secret.clone(),
        config.webhook.tolerance_seconds,
    ));
    let guard = Arc::new(MessageGuard::new(store, Arc::clone(&manager)));

    let state = AppState {
        manager: Arc::clone(&manager),
        webhooks,
        guard,
    };

    // Body limit innermost of the stack, trace outermost
    let app = prodai_backend::router(state, verifier)
        .layer(DefaultBodyLimit::max(config.server.max_body_size))
        .layer(TimeoutLayer::new(Duration::from_secs(
            config.server.request_timeout_seconds,
        )))
        .layer(CorsLayer::permissive())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TraceLayer::new_for_http());

    let (sweeper, sweep_rx) = SweepWorker::new(
        Arc::clone(&manager),
        Duration::from_secs(config.subscription.sweep_interval_seconds),
    );
    let sweeper = Arc::new(sweeper);
    let sweep_task = tokio::spawn({
        let sweeper = Arc::clone(&sweeper);
        async move { sweeper.start(sweep_rx).await }
    });

    let addr = config.server.addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;

    tracing::info!("Server starting on http://{}", addr);
    tracing::info!("Health check available at http://{}/health", addr);

    let shutdown = {
        let sweeper = Arc::clone(&sweeper);
        async move {
            shutdown_signal().await;
            sweeper.shutdown().await;
        }
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    let _ = sweep_task.await;
    tracing::info!("Shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
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
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal, starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received terminate signal, starting graceful shutdown");
        },
    }
}
